//! Filesystem path helpers.

use std::env;
use std::io;
use std::path::{Path, PathBuf};

use path_clean::PathClean;

/// Normalize `path` into the canonical absolute form used as a lock key.
///
/// The normalization is purely lexical: relative paths are resolved against
/// the current working directory and `.`/`..` segments are folded without
/// touching the filesystem. Symlinks are intentionally not resolved, so two
/// spellings of the same file through different links keep distinct keys
/// (they still contend on the kernel lock through the inode).
pub fn normalize_path<P: AsRef<Path>>(path: P) -> io::Result<PathBuf> {
    let path = path.as_ref();
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()?.join(path)
    };
    Ok(absolute.clean())
}
