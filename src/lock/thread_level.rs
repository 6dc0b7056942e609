//! Thread-level readers-writer lock over a lock record.
//!
//! Coordinates the threads of this process only; the kernel is never
//! involved at this layer. Waiting happens on the record condvar with the
//! compatibility predicate re-evaluated after every wakeup.

use std::thread;

use crate::err::Result;
use crate::lock::record::{LockMode, LockRecord};
use crate::path_lock_error;

/// Acquire the thread-level lock on `record` in `mode`.
///
/// Reentrance is keyed by the OS thread identity. A thread that already
/// holds the record fails with a recursive-deadlock diagnostic unless
/// `reentrant` is set and the requested mode matches the held one; matching
/// reentrant acquisition only deepens the ledger entry. Mode changes under
/// reentrance are not supported.
pub(crate) fn t_acquire(
    record: &LockRecord,
    mode: LockMode,
    blocking: bool,
    reentrant: bool,
) -> Result<()> {
    let me = thread::current().id();
    let mut state = record.lock_state()?;

    if let Some(entry) = state.thread.owners.get(&me) {
        if !reentrant {
            return Err(path_lock_error!(
                RecursiveDeadlock,
                "thread {:?} already holds the thread-level lock on {} ({})",
                me,
                record.path().display(),
                entry.mode.as_str()
            ));
        }
        if entry.mode != mode {
            return Err(path_lock_error!(
                RecursiveDeadlock,
                "thread {:?} holds the thread-level lock on {} as {} and cannot reenter as {}",
                me,
                record.path().display(),
                entry.mode.as_str(),
                mode.as_str()
            ));
        }
        state.thread.reenter(me);
        return Ok(());
    }

    while !state.thread.admits(mode) {
        if !blocking {
            return Err(path_lock_error!(
                ThreadLevelWouldBlock,
                "thread-level lock on {} is held in an incompatible mode",
                record.path().display()
            ));
        }
        state = record.wait(state)?;
    }

    state.thread.enter(me, mode);
    log::trace!(
        "thread {:?} acquired thread-level {} lock on {}",
        me,
        mode.as_str(),
        record.path().display()
    );
    Ok(())
}

/// Release one thread-level acquisition by the calling thread.
///
/// Runs from guard teardown: failures degrade to skipping the wakeup rather
/// than propagating.
pub(crate) fn t_release(record: &LockRecord) {
    let me = thread::current().id();
    let Ok(mut state) = record.lock_state() else {
        return;
    };
    if let Some(mode) = state.thread.leave(me) {
        log::trace!(
            "thread {:?} released thread-level {} lock on {}",
            me,
            mode.as_str(),
            record.path().display()
        );
        drop(state);
        record.notify_all();
    }
}
