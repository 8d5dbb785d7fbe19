//! A mutex whose guard runs queued callbacks when it is released.
//!
//! Code running under the block manager's lock must never call into user code: a user callback may
//! call back into the block manager and deadlock. Instead, it queues the callback on the guard with
//! [`call_later`](Deferred::call_later). When the guard is dropped, the callbacks queued with
//! [`call_later_in_lock`](Deferred::call_later_in_lock) run first, still holding the lock and with
//! access to the protected value; then the lock is released and the `call_later` callbacks run, in
//! the order they were queued.

use std::{
    ops::{Deref, DerefMut},
    sync::{Mutex, MutexGuard},
};

pub(crate) type Callback = Box<dyn FnOnce() + Send>;

pub(crate) type InLockCallback<T> = Box<dyn FnOnce(&mut T, &mut Deferred<T>) + Send>;

/// Callbacks queued during one critical section.
pub(crate) struct Deferred<T> {
    later: Vec<Callback>,
    in_lock: Vec<InLockCallback<T>>,
}

impl<T> Deferred<T> {
    fn new() -> Deferred<T> {
        Deferred {
            later: Vec::new(),
            in_lock: Vec::new(),
        }
    }

    /// Run `callback` after the lock is released.
    pub(crate) fn call_later(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.later.push(Box::new(callback));
    }

    /// Run `callback` at the end of the critical section, before the lock is released.
    pub(crate) fn call_later_in_lock(
        &mut self,
        callback: impl FnOnce(&mut T, &mut Deferred<T>) + Send + 'static,
    ) {
        self.in_lock.push(Box::new(callback));
    }
}

pub(crate) struct DeferredMutex<T>(Mutex<T>);

impl<T> DeferredMutex<T> {
    pub(crate) fn new(value: T) -> DeferredMutex<T> {
        DeferredMutex(Mutex::new(value))
    }

    pub(crate) fn lock(&self) -> DeferredGuard<'_, T> {
        DeferredGuard {
            guard: Some(self.0.lock().unwrap()),
            deferred: Deferred::new(),
        }
    }
}

pub(crate) struct DeferredGuard<'a, T> {
    guard: Option<MutexGuard<'a, T>>,
    deferred: Deferred<T>,
}

impl<'a, T> DeferredGuard<'a, T> {
    /// Borrow the protected value and the callback queues at the same time.
    pub(crate) fn split(&mut self) -> (&mut T, &mut Deferred<T>) {
        let value = self
            .guard
            .as_mut()
            .map(|guard| &mut **guard)
            .expect("guard is only taken on drop");
        (value, &mut self.deferred)
    }
}

impl<'a, T> Deref for DeferredGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.as_ref().expect("guard is only taken on drop")
    }
}

impl<'a, T> DerefMut for DeferredGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.as_mut().expect("guard is only taken on drop")
    }
}

impl<'a, T> Drop for DeferredGuard<'a, T> {
    fn drop(&mut self) {
        if let Some(mut guard) = self.guard.take() {
            // In-lock callbacks may queue more callbacks of either kind.
            while !self.deferred.in_lock.is_empty() {
                let in_lock = std::mem::take(&mut self.deferred.in_lock);
                for callback in in_lock {
                    callback(&mut guard, &mut self.deferred);
                }
            }
            drop(guard);
        }
        for callback in std::mem::take(&mut self.deferred.later) {
            callback();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn callbacks_run_in_order_after_unlock() {
        let mutex = Arc::new(DeferredMutex::new(0));
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let mut guard = mutex.lock();
            *guard += 1;
            let (_, deferred) = guard.split();
            let log_later = log.clone();
            let mutex_later = mutex.clone();
            deferred.call_later(move || {
                // The lock is free again.
                let value = *mutex_later.lock();
                log_later.lock().unwrap().push(format!("later {}", value));
            });
            let log_in_lock = log.clone();
            deferred.call_later_in_lock(move |value, deferred| {
                *value += 10;
                log_in_lock.lock().unwrap().push(format!("in lock {}", value));
                let log_nested = log_in_lock.clone();
                deferred.call_later(move || log_nested.lock().unwrap().push("nested".into()));
            });
            log.lock().unwrap().push("body".into());
        }
        assert_eq!(
            *log.lock().unwrap(),
            vec!["body", "in lock 11", "later 11", "nested"]
        );
    }
}
