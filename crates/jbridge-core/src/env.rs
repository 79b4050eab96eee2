//! Runtime handle management
//!
//! Every bridge operation runs inside an [`EnvScope`]. Scopes nest per thread:
//! the outermost scope locates the thread's foreign env, attaching the thread
//! if needed, and the matching exit detaches it again if (and only if) the
//! bridge did the attaching. Threads that were already attached when the
//! bridge first saw them are left attached.

use crate::foreign::{ForeignEnv, ForeignVm};
use crate::options::FatalPolicy;
use crate::{BridgeError, BridgeResult};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct HandleFrame {
    env: Arc<dyn ForeignEnv>,
    depth: usize,
    owned: bool,
}

thread_local! {
    // Keyed by manager id so independent bridges keep independent depths
    static FRAMES: RefCell<FxHashMap<u64, HandleFrame>> = RefCell::new(FxHashMap::default());
}

/// Per-thread, reentrant access to the foreign env
pub struct HandleManager {
    id: u64,
    vm: Arc<dyn ForeignVm>,
    local_capacity: usize,
    fatal: FatalPolicy,
}

impl HandleManager {
    /// Create a manager for `vm`
    pub fn new(vm: Arc<dyn ForeignVm>, local_capacity: usize, fatal: FatalPolicy) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            vm,
            local_capacity,
            fatal,
        }
    }

    /// Enter a scope on the calling thread
    pub fn enter(&self) -> BridgeResult<Arc<dyn ForeignEnv>> {
        let existing = FRAMES.with(|frames| {
            frames.borrow_mut().get_mut(&self.id).map(|frame| {
                frame.depth += 1;
                frame.env.clone()
            })
        });
        if let Some(env) = existing {
            return Ok(env);
        }

        let (env, owned) = match self.vm.current_env() {
            Some(env) => (env, false),
            None => {
                let env = self.vm.attach_current_thread().ok_or(BridgeError::NoRuntime)?;
                tracing::trace!(bridge = self.id, "attached thread to foreign runtime");
                (env, true)
            }
        };
        if !env.ensure_local_capacity(self.local_capacity) {
            env.exception_clear();
            tracing::debug!(capacity = self.local_capacity, "local reference reservation refused");
        }

        FRAMES.with(|frames| {
            frames.borrow_mut().insert(
                self.id,
                HandleFrame {
                    env: env.clone(),
                    depth: 1,
                    owned,
                },
            );
        });
        Ok(env)
    }

    /// Leave a scope entered with [`enter`](Self::enter)
    pub fn exit(&self) {
        let detach = FRAMES.with(|frames| {
            let mut frames = frames.borrow_mut();
            let Some(frame) = frames.get_mut(&self.id) else {
                return false;
            };
            frame.depth -= 1;
            if frame.depth > 0 {
                return false;
            }
            frames.remove(&self.id).map(|frame| frame.owned).unwrap_or(false)
        });
        if detach {
            self.vm.detach_current_thread();
            tracing::trace!(bridge = self.id, "detached thread from foreign runtime");
        }
    }

    /// Enter a scope that exits when dropped
    pub fn scope(&self) -> BridgeResult<EnvScope<'_>> {
        let env = self.enter()?;
        Ok(EnvScope {
            manager: self,
            env,
            exited: false,
        })
    }

    /// Nesting depth on the calling thread (0 outside any scope)
    pub fn depth(&self) -> usize {
        FRAMES.with(|frames| frames.borrow().get(&self.id).map(|f| f.depth).unwrap_or(0))
    }

    /// Whether the calling thread's env was attached by this manager
    pub fn owns_attachment(&self) -> bool {
        FRAMES.with(|frames| frames.borrow().get(&self.id).map(|f| f.owned).unwrap_or(false))
    }

    /// Env of the calling thread, if it is inside a scope
    pub fn current(&self) -> Option<Arc<dyn ForeignEnv>> {
        FRAMES.with(|frames| frames.borrow().get(&self.id).map(|f| f.env.clone()))
    }
}

/// RAII scope around foreign runtime access
///
/// Leaving the outermost scope with a foreign exception still pending is a
/// bug in the bridge; the exception is described and the configured
/// [`FatalPolicy`] applies.
pub struct EnvScope<'a> {
    manager: &'a HandleManager,
    env: Arc<dyn ForeignEnv>,
    exited: bool,
}

impl EnvScope<'_> {
    /// Shared handle to the env
    pub fn env(&self) -> &Arc<dyn ForeignEnv> {
        &self.env
    }

    /// Exit the scope early
    pub fn exit(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if self.exited {
            return;
        }
        self.exited = true;

        let outermost = self.manager.depth() == 1;
        let fatal = outermost && self.env.exception_check() && !std::thread::panicking();
        if fatal {
            self.env.exception_describe();
            tracing::error!("foreign exception pending at runtime scope exit");
        }
        self.manager.exit();
        if fatal {
            match self.manager.fatal {
                FatalPolicy::Abort => std::process::abort(),
                FatalPolicy::Panic => {
                    self.env.exception_clear();
                    panic!("foreign exception pending at runtime scope exit");
                }
            }
        }
    }
}

impl Deref for EnvScope<'_> {
    type Target = dyn ForeignEnv;

    fn deref(&self) -> &Self::Target {
        &*self.env
    }
}

impl Drop for EnvScope<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimVm;

    fn manager(vm: &Arc<SimVm>, fatal: FatalPolicy) -> HandleManager {
        HandleManager::new(vm.clone(), 16, fatal)
    }

    #[test]
    fn test_nested_scopes_share_env() {
        let vm = SimVm::new();
        let handles = manager(&vm, FatalPolicy::Panic);

        let outer = handles.scope().unwrap();
        assert_eq!(handles.depth(), 1);
        {
            let inner = handles.scope().unwrap();
            assert_eq!(handles.depth(), 2);
            assert!(Arc::ptr_eq(outer.env(), inner.env()));
        }
        assert_eq!(handles.depth(), 1);
        drop(outer);
        assert_eq!(handles.depth(), 0);
    }

    #[test]
    fn test_owned_attachment_is_detached() {
        let vm = SimVm::new();
        let handles = manager(&vm, FatalPolicy::Panic);

        std::thread::spawn(move || {
            let scope = handles.scope().unwrap();
            assert!(handles.owns_attachment());
            drop(scope);
            assert_eq!(vm.attach_count(), 1);
            assert_eq!(vm.detach_count(), 1);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_borrowed_attachment_is_kept() {
        let vm = SimVm::new();
        let handles = manager(&vm, FatalPolicy::Panic);

        std::thread::spawn(move || {
            vm.attach_external();
            {
                let _scope = handles.scope().unwrap();
                assert!(!handles.owns_attachment());
            }
            assert_eq!(vm.detach_count(), 0);
            assert!(vm.current_env().is_some());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_unavailable_runtime() {
        let vm = SimVm::new();
        vm.set_available(false);
        let handles = manager(&vm, FatalPolicy::Panic);
        std::thread::spawn(move || {
            assert_eq!(handles.enter().err(), Some(BridgeError::NoRuntime));
            assert_eq!(handles.depth(), 0);
        })
        .join()
        .unwrap();
    }

    #[test]
    #[should_panic(expected = "foreign exception pending")]
    fn test_pending_exception_is_fatal() {
        let vm = SimVm::new();
        let handles = manager(&vm, FatalPolicy::Panic);
        let scope = handles.scope().unwrap();
        scope.throw_new("java/lang/IllegalStateException", "left behind");
        drop(scope);
    }
}
