//! Path-keyed readers-writer locks spanning threads and processes.
//!
//! A lock is named by a filesystem path. All threads of all processes that
//! name the same path contend on the same lock, in shared or exclusive mode,
//! blocking or not, optionally reentrant. Two layers compose: an in-memory
//! thread-level readers-writer lock and a kernel advisory file lock taken on
//! behalf of the whole process.
//!
//! Acquisition order is fixed: registry reference, then thread level, then
//! process level; release runs in exact reverse on every exit path. Taking
//! the thread level first means intra-process contention is settled without
//! ever holding the kernel lock across a wait on a sibling thread, and the
//! kernel lock is only requested once no sibling holds the thread level in
//! an incompatible mode. Reordering either step reintroduces a cross-layer
//! deadlock between a thread that holds one layer and siblings parked on
//! the other while another process pins the kernel lock.
//!
//! Guards release on drop. Acquiring the same path twice from one thread
//! without the reentrant flag is reported as a recursive deadlock instead
//! of hanging.
//!
//! The lock file must already exist and be openable read-write; its contents
//! are never touched by the lock itself. Behavior across `fork()` between
//! acquisition and release is undefined: the child aliases the parent's
//! descriptor and with it the kernel lock.

mod process_level;
mod record;
mod registry;
mod thread_level;

use std::fs::{File, OpenOptions};
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use crate::err::Result;
use crate::path_lock_error_with_source;

pub use record::LockMode;

use record::LockRecord;

/// Acquisition parameters. The default is an exclusive, blocking,
/// non-reentrant lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockOptions {
    /// Request reader mode instead of writer mode.
    pub shared: bool,
    /// Park until compatible instead of failing with a would-block error.
    pub blocking: bool,
    /// Allow the calling thread to reacquire a lock it already holds in the
    /// same mode, deepening it instead of deadlocking.
    pub reentrant: bool,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            shared: false,
            blocking: true,
            reentrant: false,
        }
    }
}

impl LockOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    pub fn reentrant(mut self, reentrant: bool) -> Self {
        self.reentrant = reentrant;
        self
    }

    fn mode(self) -> LockMode {
        if self.shared {
            LockMode::Shared
        } else {
            LockMode::Exclusive
        }
    }
}

// The three RAII pieces below make release order a property of struct
// declaration order: a guard that embeds them as (process, thread, registry)
// releases in exactly that order, and a constructor that builds them
// top-down unwinds the already-built pieces when a later step fails.

#[derive(Debug)]
struct RecordRef {
    record: Arc<LockRecord>,
}

impl RecordRef {
    fn acquire(path: &Path) -> Result<Self> {
        Ok(Self {
            record: registry::acquire_record(path)?,
        })
    }
}

impl Drop for RecordRef {
    fn drop(&mut self) {
        registry::release_record(&self.record);
    }
}

#[derive(Debug)]
struct ThreadAcq {
    record: Arc<LockRecord>,
}

impl ThreadAcq {
    fn acquire(record: &Arc<LockRecord>, options: LockOptions) -> Result<Self> {
        thread_level::t_acquire(record, options.mode(), options.blocking, options.reentrant)?;
        Ok(Self {
            record: Arc::clone(record),
        })
    }
}

impl Drop for ThreadAcq {
    fn drop(&mut self) {
        thread_level::t_release(&self.record);
    }
}

#[derive(Debug)]
struct ProcessAcq {
    record: Arc<LockRecord>,
    file: Arc<File>,
}

impl ProcessAcq {
    fn acquire(record: &Arc<LockRecord>, options: LockOptions) -> Result<Self> {
        let file =
            process_level::p_acquire(record, options.mode(), options.blocking, options.reentrant)?;
        Ok(Self {
            record: Arc::clone(record),
            file,
        })
    }
}

impl Drop for ProcessAcq {
    fn drop(&mut self) {
        process_level::p_release(&self.record);
    }
}

/// Scoped hold of the composite lock: thread level and process level
/// together. Returned by [`path_lock`]; releases on drop.
#[derive(Debug)]
pub struct PathLockGuard {
    process: ProcessAcq,
    thread: ThreadAcq,
    registry: RecordRef,
    mode: LockMode,
}

impl PathLockGuard {
    /// The descriptor the kernel lock is held on, usable for I/O on the
    /// locked file without opening it separately. All holders of a shared
    /// lock in this process see the same descriptor and share its cursor.
    pub fn file(&self) -> &File {
        &self.process.file
    }

    pub fn path(&self) -> &Path {
        self.registry.record.path()
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Deref for PathLockGuard {
    type Target = File;

    fn deref(&self) -> &Self::Target {
        self.file()
    }
}

/// Scoped hold of the thread-level layer only. Coordinates among the
/// threads of this process; the kernel lock is not taken, so other
/// processes are unaffected.
#[derive(Debug)]
pub struct ThreadLevelLockGuard {
    file: File,
    thread: ThreadAcq,
    registry: RecordRef,
    mode: LockMode,
}

impl ThreadLevelLockGuard {
    /// A private read-write descriptor on the locked path, opened for the
    /// caller's I/O.
    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn path(&self) -> &Path {
        self.registry.record.path()
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Deref for ThreadLevelLockGuard {
    type Target = File;

    fn deref(&self) -> &Self::Target {
        self.file()
    }
}

/// Scoped hold of the process-level layer only, for callers that already
/// coordinate their own threads by other means.
#[derive(Debug)]
pub struct ProcessLevelLockGuard {
    process: ProcessAcq,
    registry: RecordRef,
    mode: LockMode,
}

impl ProcessLevelLockGuard {
    /// The descriptor the kernel lock is held on; shared among this
    /// process's holders.
    pub fn file(&self) -> &File {
        &self.process.file
    }

    pub fn path(&self) -> &Path {
        self.registry.record.path()
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Deref for ProcessLevelLockGuard {
    type Target = File;

    fn deref(&self) -> &Self::Target {
        self.file()
    }
}

/// Acquire the composite lock on `path`.
///
/// Arbitrates against every thread of every process that names the same
/// path. The returned guard exposes the locked file's descriptor and
/// releases both layers, in reverse acquisition order, when dropped.
pub fn path_lock<P: AsRef<Path>>(path: P, options: LockOptions) -> Result<PathLockGuard> {
    let registry = RecordRef::acquire(path.as_ref())?;
    let thread = ThreadAcq::acquire(&registry.record, options)?;
    let process = ProcessAcq::acquire(&registry.record, options)?;
    Ok(PathLockGuard {
        process,
        thread,
        registry,
        mode: options.mode(),
    })
}

/// Acquire only the thread-level lock on `path`.
pub fn thread_level_path_lock<P: AsRef<Path>>(
    path: P,
    options: LockOptions,
) -> Result<ThreadLevelLockGuard> {
    let registry = RecordRef::acquire(path.as_ref())?;
    let thread = ThreadAcq::acquire(&registry.record, options)?;
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(registry.record.path())
        .map_err(|e| {
            path_lock_error_with_source!(
                Io,
                e,
                "failed to open {} for the lock handle",
                registry.record.path().display()
            )
        })?;
    Ok(ThreadLevelLockGuard {
        file,
        thread,
        registry,
        mode: options.mode(),
    })
}

/// Acquire only the process-level lock on `path`.
pub fn process_level_path_lock<P: AsRef<Path>>(
    path: P,
    options: LockOptions,
) -> Result<ProcessLevelLockGuard> {
    let registry = RecordRef::acquire(path.as_ref())?;
    let process = ProcessAcq::acquire(&registry.record, options)?;
    Ok(ProcessLevelLockGuard {
        process,
        registry,
        mode: options.mode(),
    })
}
