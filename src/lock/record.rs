//! Per-path lock state.
//!
//! One `LockRecord` exists per canonical path per process. It holds both
//! coordination layers: the thread-level readers-writer accounting and the
//! process-level accounting that mirrors the kernel file lock. All fields
//! live behind a single mutex with short critical sections; blocking happens
//! on the record's condvar or in the kernel, never while the mutex is held.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::ThreadId;

use crate::err::Result;
use crate::fs::sys_lock::SysLockMode;
use crate::path_lock_error;

/// Mode a lock is held in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Reader mode; compatible with other shared holders.
    Shared,
    /// Writer mode; compatible with nothing.
    Exclusive,
}

impl LockMode {
    pub(crate) fn to_sys(self) -> SysLockMode {
        match self {
            LockMode::Shared => SysLockMode::Shared,
            LockMode::Exclusive => SysLockMode::Exclusive,
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            LockMode::Shared => "shared",
            LockMode::Exclusive => "exclusive",
        }
    }
}

/// What one thread currently holds on one layer of one record.
#[derive(Clone, Copy, Debug)]
pub(crate) struct OwnerEntry {
    pub mode: LockMode,
    pub depth: usize,
}

/// Readers-writer accounting for one layer (thread-level or process-level).
///
/// `owners` is the reentrance ledger: a thread appears here exactly while it
/// holds this layer, with the depth of its nested reentrant acquisitions.
/// The counters count holding threads once each, regardless of depth.
#[derive(Debug, Default)]
pub(crate) struct RwSide {
    pub readers: usize,
    pub writer: bool,
    pub owners: HashMap<ThreadId, OwnerEntry>,
}

impl RwSide {
    pub fn is_idle(&self) -> bool {
        self.readers == 0 && !self.writer
    }

    /// Compatibility predicate for a fresh (non-reentrant) acquisition.
    /// Readers are admitted whenever no writer holds, even if writers wait:
    /// the policy is reader-preferring.
    pub fn admits(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => !self.writer,
            LockMode::Exclusive => self.is_idle(),
        }
    }

    /// First acquisition by `thread`: bump the counters and open its ledger
    /// entry at depth 1. Caller must have checked `admits`.
    pub fn enter(&mut self, thread: ThreadId, mode: LockMode) {
        debug_assert!(self.admits(mode));
        debug_assert!(!self.owners.contains_key(&thread));
        match mode {
            LockMode::Shared => self.readers += 1,
            LockMode::Exclusive => self.writer = true,
        }
        self.owners.insert(thread, OwnerEntry { mode, depth: 1 });
    }

    /// Reentrant acquisition: counters stay put, only the depth grows.
    pub fn reenter(&mut self, thread: ThreadId) {
        if let Some(entry) = self.owners.get_mut(&thread) {
            entry.depth += 1;
        } else {
            debug_assert!(false, "reenter without an owner entry");
        }
    }

    /// One release by `thread`. Returns the held mode once the depth reaches
    /// zero and the thread stops counting; `None` while reentrant depth
    /// remains or the thread was not an owner.
    pub fn leave(&mut self, thread: ThreadId) -> Option<LockMode> {
        let entry = self.owners.get_mut(&thread)?;
        entry.depth -= 1;
        if entry.depth > 0 {
            return None;
        }
        let mode = entry.mode;
        self.owners.remove(&thread);
        match mode {
            LockMode::Shared => {
                debug_assert!(self.readers > 0);
                self.readers -= 1;
            }
            LockMode::Exclusive => {
                debug_assert!(self.writer);
                self.writer = false;
            }
        }
        Some(mode)
    }
}

#[derive(Debug)]
pub(crate) struct RecordState {
    /// Live holders plus pending waiters referencing this record. Mutated
    /// only under the registry mutex; the record is unmapped at zero.
    pub refcount: usize,
    pub thread: RwSide,
    pub process: RwSide,
    /// Open descriptor the kernel lock is held on; present iff this process
    /// holds the kernel lock in any mode. Shared among holders so guards can
    /// expose it for I/O.
    pub file: Option<Arc<File>>,
    /// Mirror of the kernel lock state for this process.
    pub file_mode: Option<LockMode>,
    /// A kernel lock transition is in flight with the mutex released.
    /// Serializes first-acquirer/exclusive transitions.
    pub file_op_pending: bool,
}

#[derive(Debug)]
pub(crate) struct LockRecord {
    path: PathBuf,
    state: Mutex<RecordState>,
    cond: Condvar,
}

impl LockRecord {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            state: Mutex::new(RecordState {
                refcount: 0,
                thread: RwSide::default(),
                process: RwSide::default(),
                file: None,
                file_mode: None,
                file_op_pending: false,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_state(&self) -> Result<MutexGuard<'_, RecordState>> {
        self.state.lock().map_err(|_| {
            path_lock_error!(Io, "lock record state poisoned for {}", self.path.display())
        })
    }

    /// Park on the record condvar, releasing the state mutex. Wakes on any
    /// state transition; callers re-evaluate their predicate in a loop.
    pub fn wait<'a>(&self, guard: MutexGuard<'a, RecordState>) -> Result<MutexGuard<'a, RecordState>> {
        self.cond.wait(guard).map_err(|_| {
            path_lock_error!(
                Io,
                "lock record state poisoned while waiting on {}",
                self.path.display()
            )
        })
    }

    pub fn notify_all(&self) {
        self.cond.notify_all();
    }
}
