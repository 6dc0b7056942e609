//! Process-level readers-writer lock over a lock record.
//!
//! Composes intra-process reader/writer accounting (same shape as the
//! thread level, with its own reentrance ledger) with the kernel file lock:
//! only the first shared acquirer in the process takes the kernel lock and
//! only the last releaser drops it; an exclusive acquirer requires the
//! process side to be idle first. Kernel transitions run with the record
//! mutex released and are serialized by the `file_op_pending` flag, so
//! intra-process waiters park on the condvar while cross-process waiters
//! park in the kernel.

use std::fs::{File, OpenOptions};
use std::sync::Arc;
use std::thread;

use crate::err::Result;
use crate::fs::sys_lock::{self, SysLockStatus};
use crate::lock::record::{LockMode, LockRecord};
use crate::{path_lock_error, path_lock_error_with_source};

/// Acquire the process-level lock on `record` in `mode`.
///
/// Returns the shared descriptor the kernel lock is held on; its lifetime is
/// bounded by the holders, and the last release closes it. If anything
/// declines or fails mid-way, every tentative change is rolled back: no
/// counter moves and no descriptor is left open.
pub(crate) fn p_acquire(
    record: &LockRecord,
    mode: LockMode,
    blocking: bool,
    reentrant: bool,
) -> Result<Arc<File>> {
    let me = thread::current().id();
    let mut state = record.lock_state()?;

    if let Some(entry) = state.process.owners.get(&me) {
        if !reentrant {
            return Err(path_lock_error!(
                RecursiveDeadlock,
                "thread {:?} already holds the process-level lock on {} ({})",
                me,
                record.path().display(),
                entry.mode.as_str()
            ));
        }
        if entry.mode != mode {
            return Err(path_lock_error!(
                RecursiveDeadlock,
                "thread {:?} holds the process-level lock on {} as {} and cannot reenter as {}",
                me,
                record.path().display(),
                entry.mode.as_str(),
                mode.as_str()
            ));
        }
        let file = state.file.clone().ok_or_else(|| {
            path_lock_error!(
                Io,
                "process-level lock on {} has an owner but no descriptor",
                record.path().display()
            )
        })?;
        state.process.reenter(me);
        return Ok(file);
    }

    loop {
        if state.file_op_pending || !state.process.admits(mode) {
            if !blocking {
                return Err(path_lock_error!(
                    ProcessLevelWouldBlock,
                    "process-level lock on {} is held in an incompatible mode",
                    record.path().display()
                ));
            }
            state = record.wait(state)?;
            continue;
        }

        if mode == LockMode::Shared && state.process.readers > 0 {
            // The process already holds the kernel lock shared; join it.
            debug_assert_eq!(state.file_mode, Some(LockMode::Shared));
            let file = state.file.clone().ok_or_else(|| {
                path_lock_error!(
                    Io,
                    "process-level lock on {} counts readers but has no descriptor",
                    record.path().display()
                )
            })?;
            state.process.enter(me, LockMode::Shared);
            return Ok(file);
        }
        break;
    }

    // We are the transition: first shared acquirer, or the exclusive
    // acquirer with the process side idle. Take the kernel lock with the
    // mutex released; `file_op_pending` keeps everyone else parked on the
    // condvar meanwhile.
    debug_assert!(state.process.is_idle());
    debug_assert!(state.file.is_none());
    debug_assert_eq!(state.file_mode, None);
    state.file_op_pending = true;
    drop(state);

    let attempt = take_kernel_lock(record, mode, blocking);

    let mut state = match record.lock_state() {
        Ok(state) => state,
        Err(err) => return Err(err),
    };
    state.file_op_pending = false;
    match attempt {
        Ok(file) => {
            state.process.enter(me, mode);
            state.file = Some(file.clone());
            state.file_mode = Some(mode);
            log::debug!(
                "thread {:?} acquired process-level {} lock on {}",
                me,
                mode.as_str(),
                record.path().display()
            );
            drop(state);
            record.notify_all();
            Ok(file)
        }
        Err(err) => {
            // The descriptor opened for the attempt is already closed; only
            // the pending flag needs unwinding before waiters rewake.
            drop(state);
            record.notify_all();
            Err(err)
        }
    }
}

/// Open the path and request the kernel lock on the fresh descriptor. On any
/// failure the descriptor drops here, closed, before the caller re-locks the
/// record state.
fn take_kernel_lock(record: &LockRecord, mode: LockMode, blocking: bool) -> Result<Arc<File>> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(record.path())
        .map_err(|e| {
            path_lock_error_with_source!(
                Io,
                e,
                "failed to open {} for locking",
                record.path().display()
            )
        })?;

    let status = sys_lock::acquire(&file, mode.to_sys(), blocking).map_err(|e| {
        path_lock_error_with_source!(
            Io,
            e,
            "file-lock syscall failed for {}",
            record.path().display()
        )
    })?;
    match status {
        SysLockStatus::Acquired => Ok(Arc::new(file)),
        SysLockStatus::Contended => Err(path_lock_error!(
            ProcessLevelWouldBlock,
            "kernel file lock on {} is held by another process",
            record.path().display()
        )),
    }
}

/// Release one process-level acquisition by the calling thread. The last
/// releaser drops the kernel lock and the descriptor with it.
///
/// Runs from guard teardown: failures are logged, not propagated.
pub(crate) fn p_release(record: &LockRecord) {
    let me = thread::current().id();
    let Ok(mut state) = record.lock_state() else {
        return;
    };
    let Some(mode) = state.process.leave(me) else {
        return;
    };
    log::debug!(
        "thread {:?} released process-level {} lock on {}",
        me,
        mode.as_str(),
        record.path().display()
    );
    if state.process.is_idle() {
        if let Some(file) = state.file.take() {
            if let Err(err) = sys_lock::release(&file) {
                log::error!(
                    "failed to release the kernel lock on {}: {}",
                    record.path().display(),
                    err
                );
            }
        }
        state.file_mode = None;
    }
    drop(state);
    record.notify_all();
}
