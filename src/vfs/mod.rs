//! VFS layer.
//!
//! Responsibilities:
//! - Path normalization and the namespace rules (root and its direct
//!   children are not files).
//! - The handle table: directory descriptors, open-file state, the
//!   single-writer-or-many-readers rule.
//! - Directory resolution and materialization over container page chains.
//! - The public facade: construct, open, create, read, write, close.
//!
//! Submodules:
//! - `path`: virtual path helpers
//! - `handles`: handle table and descriptors
//! - `walker`: chain navigation, record creation, chained writes
//! - `fs`: the `Vfs` facade and the construction-time container scan

pub mod fs;
pub mod handles;
pub(crate) mod path;
pub(crate) mod walker;
