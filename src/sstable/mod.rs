//! The SSTable file format: block builder/reader, framing, sparse index,
//! meta block, and the streaming writer and reader.

pub mod block;
pub mod format;
pub mod index;
pub mod meta;
pub mod reader;
pub mod writer;

use std::path::{Path, PathBuf};

/// Path of the bloom sidecar beside a table file: `<table>.bf`.
pub fn sidecar_path(table: &Path) -> PathBuf {
    let mut name = table.as_os_str().to_os_string();
    name.push(".bf");
    PathBuf::from(name)
}
