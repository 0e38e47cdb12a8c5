use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

pub(crate) fn read_lock<'a, T>(lock: &'a RwLock<T>, op: &'static str) -> RwLockReadGuard<'a, T> {
    lock.read().unwrap_or_else(|poisoned| {
        warn!(
            op,
            lock_kind = "rwlock.read",
            hint = "state may be stale after panic in another thread",
            "recovered poisoned lock"
        );
        poisoned.into_inner()
    })
}

pub(crate) fn write_lock<'a, T>(lock: &'a RwLock<T>, op: &'static str) -> RwLockWriteGuard<'a, T> {
    lock.write().unwrap_or_else(|poisoned| {
        warn!(
            op,
            lock_kind = "rwlock.write",
            hint = "state may be stale after panic in another thread",
            "recovered poisoned lock"
        );
        poisoned.into_inner()
    })
}

pub(crate) fn mutex_guard<'a, T>(lock: &'a Mutex<T>, op: &'static str) -> MutexGuard<'a, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        warn!(
            op,
            lock_kind = "mutex.lock",
            hint = "state may be stale after panic in another thread",
            "recovered poisoned lock"
        );
        poisoned.into_inner()
    })
}
