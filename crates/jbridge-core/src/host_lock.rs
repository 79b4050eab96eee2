//! Host interpreter lock integration
//!
//! Host runtimes with a global interpreter lock must let other host threads
//! run while a thread is blocked in foreign code. Every foreign invocation the
//! bridge makes runs inside [`yielding`], which releases the lock for the
//! duration of the call and re-acquires it afterwards, also on unwind. That
//! covers method dispatch, field access, class lookup, exception rendering
//! and the built-in boxing converters.

/// Host interpreter lock
pub trait HostLock: Send + Sync {
    /// Give up the lock before entering foreign code
    fn release(&self);

    /// Take the lock back after foreign code returns
    fn acquire(&self);
}

/// Host without an interpreter lock
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHostLock;

impl HostLock for NoHostLock {
    fn release(&self) {}

    fn acquire(&self) {}
}

/// Re-acquires the host lock when dropped
pub struct YieldGuard<'a> {
    lock: &'a dyn HostLock,
}

impl<'a> YieldGuard<'a> {
    /// Release `lock` until the guard is dropped
    pub fn new(lock: &'a dyn HostLock) -> Self {
        lock.release();
        Self { lock }
    }
}

impl Drop for YieldGuard<'_> {
    fn drop(&mut self) {
        self.lock.acquire();
    }
}

/// Run `f` with the host lock released
pub fn yielding<R>(lock: &dyn HostLock, f: impl FnOnce() -> R) -> R {
    let _guard = YieldGuard::new(lock);
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<&'static str>>,
    }

    impl HostLock for Recorder {
        fn release(&self) {
            self.events.lock().push("release");
        }

        fn acquire(&self) {
            self.events.lock().push("acquire");
        }
    }

    #[test]
    fn test_yielding_brackets_call() {
        let lock = Recorder::default();
        let value = yielding(&lock, || {
            lock.events.lock().push("call");
            42
        });
        assert_eq!(value, 42);
        assert_eq!(*lock.events.lock(), vec!["release", "call", "acquire"]);
    }

    #[test]
    fn test_yielding_reacquires_on_unwind() {
        let lock = Recorder::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            yielding(&lock, || panic!("foreign call failed"))
        }));
        assert!(result.is_err());
        assert_eq!(*lock.events.lock(), vec!["release", "acquire"]);
    }
}
