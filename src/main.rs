use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use packfs::{DEFAULT_PAGE_SIZE, MAX_CONTAINERS, PageLayout, Vfs};

#[derive(Parser)]
#[command(name = "packfs", version, about = "Paged container VFS CLI")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Round-trip a hello-world file through a fresh store.
    Demo(StoreArgs),

    /// Write a literal into a virtual file (appends when it exists).
    Write(WriteArgs),

    /// Print a virtual file to stdout.
    Read(ReadArgs),
}

#[derive(Args)]
struct StoreArgs {
    /// Directory holding the container files.
    #[arg(long, value_name = "DIR", default_value = "./packfs-data")]
    root: PathBuf,

    /// Number of container files (1.vfs, 2.vfs, ...).
    #[arg(long, default_value_t = MAX_CONTAINERS)]
    containers: usize,

    /// Page size in bytes.
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: usize,
}

#[derive(Args)]
struct WriteArgs {
    #[command(flatten)]
    store: StoreArgs,

    /// Virtual path of the file, e.g. /new_dir/new_file.
    #[arg(value_name = "VPATH")]
    path: String,

    /// Bytes to write.
    #[arg(value_name = "DATA")]
    data: String,
}

#[derive(Args)]
struct ReadArgs {
    #[command(flatten)]
    store: StoreArgs,

    /// Virtual path of the file.
    #[arg(value_name = "VPATH")]
    path: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "packfs=info".to_string()))
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Demo(args) => demo_cmd(args).await?,
        Command::Write(args) => write_cmd(args).await?,
        Command::Read(args) => read_cmd(args).await?,
    }

    Ok(())
}

async fn open_store(args: &StoreArgs) -> anyhow::Result<Vfs> {
    let names: Vec<String> = (1..=args.containers).map(|i| format!("{i}.vfs")).collect();
    let layout = PageLayout::new(args.page_size);
    Vfs::with_layout(layout, &names, &args.root)
        .await
        .context("constructing the store")
}

async fn demo_cmd(args: StoreArgs) -> anyhow::Result<()> {
    let fs = open_store(&args).await?;

    let v = fs
        .create("/new_dir/new_file")
        .await?
        .context("create refused /new_dir/new_file")?;
    let written = fs.write(&v, b"Hello world!").await?;
    println!("Number of written bytes: {written}");
    fs.close(v).await;

    let v = fs
        .open("/new_dir/new_file")
        .await?
        .context("open refused /new_dir/new_file")?;
    let mut buf = vec![0u8; 12];
    let read = fs.read(&v, &mut buf).await?;
    println!("Number of read bytes: {read}");
    println!("{}", String::from_utf8_lossy(&buf[..read]));
    fs.close(v).await;

    Ok(())
}

async fn write_cmd(args: WriteArgs) -> anyhow::Result<()> {
    let fs = open_store(&args.store).await?;
    let v = fs
        .create(&args.path)
        .await?
        .with_context(|| format!("create refused {}", args.path))?;
    let written = fs.write(&v, args.data.as_bytes()).await?;
    println!("wrote {written} bytes to {}", args.path);
    fs.close(v).await;
    Ok(())
}

async fn read_cmd(args: ReadArgs) -> anyhow::Result<()> {
    let fs = open_store(&args.store).await?;
    let v = fs
        .open(&args.path)
        .await?
        .with_context(|| format!("no such file: {}", args.path))?;
    let mut buf = vec![0u8; v.len() as usize];
    let read = fs.read(&v, &mut buf).await?;
    let stdout = std::io::stdout();
    use std::io::Write;
    stdout.lock().write_all(&buf[..read])?;
    fs.close(v).await;
    Ok(())
}
