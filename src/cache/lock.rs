//! Poison-tolerant lock acquisition.
//!
//! A panic while holding one of the store or content locks must not take the
//! whole cache down with it; the helpers below log and keep going.

use std::sync::{LockResult, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

fn recover<G>(
    result: LockResult<G>,
    source: &'static str,
    op: &'static str,
    lock_kind: &'static str,
) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(
            op,
            source,
            lock_kind,
            outcome = "poisoned_recovered",
            "Lock poisoned by a panicking holder; continuing with inner state"
        );
        poisoned.into_inner()
    })
}

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    source: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    recover(lock.read(), source, op, "rwlock.read")
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    source: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    recover(lock.write(), source, op, "rwlock.write")
}

pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    source: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    recover(lock.lock(), source, op, "mutex.lock")
}

#[cfg(test)]
mod tests {
    use std::panic;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn poisoned_mutex_is_recovered() {
        let lock = Arc::new(Mutex::new(7_u32));
        let cloned = Arc::clone(&lock);
        let _ = panic::catch_unwind(move || {
            let _guard = cloned.lock().unwrap();
            panic!("poison");
        });
        assert!(lock.is_poisoned());

        let guard = mutex_lock(&lock, "test", "read");
        assert_eq!(*guard, 7);
    }

    #[test]
    fn poisoned_rwlock_allows_writes() {
        let lock = Arc::new(RwLock::new(Vec::<u8>::new()));
        let cloned = Arc::clone(&lock);
        let _ = panic::catch_unwind(move || {
            let _guard = cloned.write().unwrap();
            panic!("poison");
        });

        rw_write(&lock, "test", "push").push(1);
        assert_eq!(rw_read(&lock, "test", "len").len(), 1);
    }
}
