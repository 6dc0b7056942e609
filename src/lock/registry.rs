//! Process-wide registry mapping canonical paths to live lock records.
//!
//! Lazily initialized; records are created on first acquisition of a path
//! and destroyed when the last holder or waiter drops its reference. The
//! registry mutex only ever guards map lookups and refcount updates, never
//! a blocking operation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use crate::err::Result;
use crate::fs::util::normalize_path;
use crate::lock::record::LockRecord;
use crate::{path_lock_error, path_lock_error_with_source};

static REGISTRY: OnceLock<Mutex<HashMap<PathBuf, Arc<LockRecord>>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<PathBuf, Arc<LockRecord>>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Look up or create the record for `path` and take a reference on it.
///
/// Two callers naming the same path (after normalization) get the same
/// record. Every reference taken here must be returned through
/// [`release_record`]; waiters count as references, which keeps a record
/// alive while anyone is blocked on it.
pub(crate) fn acquire_record<P: AsRef<std::path::Path>>(path: P) -> Result<Arc<LockRecord>> {
    let key = normalize_path(path.as_ref()).map_err(|e| {
        path_lock_error_with_source!(
            Io,
            e,
            "failed to resolve lock path {}",
            path.as_ref().display()
        )
    })?;

    let mut map = registry()
        .lock()
        .map_err(|_| path_lock_error!(Io, "lock registry poisoned"))?;

    let record = match map.get(&key) {
        Some(record) => record.clone(),
        None => {
            log::trace!("creating lock record for {}", key.display());
            let record = Arc::new(LockRecord::new(key.clone()));
            map.insert(key, record.clone());
            record
        }
    };
    // Refcount mutations stay under the registry mutex so removal is atomic
    // with the count reaching zero.
    record.lock_state()?.refcount += 1;
    Ok(record)
}

/// Drop one reference on `record`, unmapping it when the count hits zero.
///
/// Called from guard teardown, so failures degrade to leaving the record
/// mapped rather than propagating.
pub(crate) fn release_record(record: &Arc<LockRecord>) {
    let Ok(mut map) = registry().lock() else {
        return;
    };
    let remove = match record.lock_state() {
        Ok(mut state) => {
            debug_assert!(state.refcount > 0);
            state.refcount = state.refcount.saturating_sub(1);
            state.refcount == 0
        }
        Err(_) => false,
    };
    if remove {
        log::trace!("destroying lock record for {}", record.path().display());
        map.remove(record.path());
    }
}

/// Whether a record for `path` is currently mapped. Test hook; keyed by
/// path so concurrently running tests on other paths cannot interfere.
#[cfg(test)]
pub(crate) fn is_registered<P: AsRef<std::path::Path>>(path: P) -> bool {
    let Ok(key) = normalize_path(path.as_ref()) else {
        return false;
    };
    registry()
        .lock()
        .map(|map| map.contains_key(&key))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn unique_temp_path(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        p.push(format!(
            "pathlock_registry_{}_{}_{}",
            name,
            std::process::id(),
            nanos
        ));
        p
    }

    #[test]
    fn same_path_yields_same_record() {
        let path = unique_temp_path("same");
        let a = acquire_record(&path).unwrap();
        let b = acquire_record(&path).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.lock_state().unwrap().refcount, 2);
        release_record(&b);
        release_record(&a);
    }

    #[test]
    fn normalized_spellings_share_a_record() {
        let base = unique_temp_path("spelling");
        let dotted = base.parent().unwrap().join(".").join(base.file_name().unwrap());
        let a = acquire_record(&base).unwrap();
        let b = acquire_record(&dotted).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        release_record(&b);
        release_record(&a);
    }

    #[test]
    fn distinct_paths_get_distinct_records() {
        let first = unique_temp_path("first");
        let second = unique_temp_path("second");
        let a = acquire_record(&first).unwrap();
        let b = acquire_record(&second).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        release_record(&b);
        release_record(&a);
    }

    #[test]
    fn last_release_unmaps_the_record() {
        let path = unique_temp_path("unmap");
        let a = acquire_record(&path).unwrap();
        let key = a.path().to_path_buf();
        let b = acquire_record(&path).unwrap();

        release_record(&a);
        {
            let map = registry().lock().unwrap();
            assert!(map.contains_key(&key), "record must survive while referenced");
        }
        release_record(&b);
        {
            let map = registry().lock().unwrap();
            assert!(!map.contains_key(&key), "record must be unmapped at refcount zero");
        }
    }
}
