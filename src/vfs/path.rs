//! Virtual path handling.
//!
//! Paths are `/`-separated UTF-8 names in a synthetic namespace rooted at
//! `/`. Relative input is made absolute by prefixing `/`; empty segments
//! collapse. The root itself and its direct children are not openable:
//! top-level entries are always directories, so only grand-children of
//! root and deeper can name files.

/// Normalize to an absolute path with no empty segments.
pub(crate) fn normalize(name: &str) -> String {
    let parts: Vec<&str> = name.split('/').filter(|s| !s.is_empty()).collect();
    let mut out = String::from("/");
    out.push_str(&parts.join("/"));
    out
}

/// Parent of an absolute path; the parent of a top-level entry is `/`.
pub(crate) fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(n) => &path[..n],
    }
}

/// Number of components below root: `/` is 0, `/a` is 1, `/a/b` is 2.
pub(crate) fn depth(path: &str) -> usize {
    if path == "/" {
        0
    } else {
        path.matches('/').count()
    }
}

/// Normalize `name` and admit it as a file path: root and direct children
/// of root are rejected.
pub(crate) fn normalize_file_path(name: &str) -> Option<String> {
    let path = normalize(name);
    if depth(&path) < 2 { None } else { Some(path) }
}
