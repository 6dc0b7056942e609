//! Thin adapter over the OS advisory per-descriptor readers-writer lock.
//!
//! Everything above this module reasons in terms of shared/exclusive and
//! acquired/contended; this is the only place that talks to the kernel
//! primitive. On Unix the primitive is `flock(2)` (via `fs2`), which locks
//! the open file description: two descriptors for the same path conflict
//! even within one process.
//!
//! Requesting a mode on a descriptor that already holds the other mode is
//! issued as the same single call and converts the lock. `flock(2)` does not
//! promise the conversion is atomic (the kernel may drop the old lock before
//! granting the new one); callers that depend on no intermediate unlocked
//! window must release and reacquire explicitly instead.

use std::fs::File;
use std::io;

use fs2::FileExt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SysLockMode {
    Shared,
    Exclusive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SysLockStatus {
    Acquired,
    /// Non-blocking acquisition declined; nothing changed.
    Contended,
}

// NOTE: `FileExt::` qualification everywhere below. `std::fs::File` has grown
// inherent methods with these exact names; method-call syntax would silently
// resolve to them instead of fs2.

/// Request the kernel lock on `file` in `mode`.
///
/// Blocking calls park in the kernel until granted; non-blocking calls report
/// `Contended` without side effect. Any other kernel failure is surfaced
/// unchanged.
pub(crate) fn acquire(file: &File, mode: SysLockMode, blocking: bool) -> io::Result<SysLockStatus> {
    let result = match (mode, blocking) {
        (SysLockMode::Shared, true) => FileExt::lock_shared(file),
        (SysLockMode::Exclusive, true) => FileExt::lock_exclusive(file),
        (SysLockMode::Shared, false) => FileExt::try_lock_shared(file),
        (SysLockMode::Exclusive, false) => FileExt::try_lock_exclusive(file),
    };
    match result {
        Ok(()) => Ok(SysLockStatus::Acquired),
        Err(err) if is_contended(&err) => Ok(SysLockStatus::Contended),
        Err(err) => Err(err),
    }
}

/// Release whatever mode is held on `file`.
pub(crate) fn release(file: &File) -> io::Result<()> {
    FileExt::unlock(file)
}

fn is_contended(err: &io::Error) -> bool {
    err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
