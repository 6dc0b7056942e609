pub mod err;
pub mod fs;
pub mod lock;

// Re-export the acquisition surface so callers don't need the module paths.
pub use err::{LockErrorKind, PathLockError, Result};
pub use lock::{
    LockMode, LockOptions, PathLockGuard, ProcessLevelLockGuard, ThreadLevelLockGuard, path_lock,
    process_level_path_lock, thread_level_path_lock,
};
