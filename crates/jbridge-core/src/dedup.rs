//! Wrapper deduplication
//!
//! Maps foreign object identity to the live decorated wrapper of that
//! object, so the same foreign object always crosses to the host as the same
//! wrapper. Entries hold weak pointers; a wrapper removes its own entry when
//! it is dropped or released.

use crate::foreign::{ForeignEnv, ObjRef};
use crate::instance::InstanceWrapper;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

struct DedupEntry {
    // Owned by the wrapper; valid while the entry is linked
    obj: ObjRef,
    wrapper: Weak<InstanceWrapper>,
}

/// Identity-keyed table of live wrappers
pub struct DedupTable {
    buckets: Vec<Mutex<Vec<DedupEntry>>>,
}

impl DedupTable {
    /// Table with `buckets` buckets (at least one)
    pub fn new(buckets: usize) -> Self {
        Self {
            buckets: (0..buckets.max(1)).map(|_| Mutex::new(Vec::new())).collect(),
        }
    }

    fn bucket(&self, hash: i32) -> &Mutex<Vec<DedupEntry>> {
        &self.buckets[(hash as u32 as usize) % self.buckets.len()]
    }

    /// Live wrapper of `obj`, or the one `make` creates, linked atomically
    ///
    /// `make` must return a wrapper holding its own global reference to
    /// `obj`; it runs under the bucket lock.
    pub(crate) fn lookup_or_insert(
        &self,
        env: &dyn ForeignEnv,
        obj: ObjRef,
        hash: i32,
        make: impl FnOnce() -> Arc<InstanceWrapper>,
    ) -> Arc<InstanceWrapper> {
        let mut bucket = self.bucket(hash).lock();
        let mut stale = None;
        for (i, entry) in bucket.iter().enumerate() {
            if !env.is_same_object(Some(entry.obj), Some(obj)) {
                continue;
            }
            match entry.wrapper.upgrade() {
                Some(wrapper) => {
                    tracing::trace!(%obj, "dedup hit");
                    return wrapper;
                }
                // The old wrapper is mid-drop and will unlink itself by pointer
                None => stale = Some(i),
            }
        }

        let wrapper = make();
        let entry = DedupEntry {
            obj: wrapper.raw_ref().unwrap_or(obj),
            wrapper: Arc::downgrade(&wrapper),
        };
        match stale {
            Some(i) => bucket[i] = entry,
            None => bucket.push(entry),
        }
        tracing::trace!(%obj, "dedup miss");
        wrapper
    }

    /// Unlink the entry pointing at `wrapper`, if it is still linked
    pub(crate) fn remove(&self, hash: i32, wrapper: *const InstanceWrapper) {
        let mut bucket = self.bucket(hash).lock();
        if let Some(i) = bucket.iter().position(|e| std::ptr::eq(e.wrapper.as_ptr(), wrapper)) {
            bucket.swap_remove(i);
        }
    }

    /// Number of linked wrappers that are still alive
    pub fn live(&self) -> usize {
        self.buckets
            .iter()
            .map(|b| b.lock().iter().filter(|e| e.wrapper.strong_count() > 0).count())
            .sum()
    }
}

impl std::fmt::Debug for DedupTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupTable")
            .field("buckets", &self.buckets.len())
            .field("live", &self.live())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::sim::SimVm;
    use crate::{Bridge, BridgeOptions, Value};
    use std::sync::Arc;

    #[test]
    fn test_same_object_same_wrapper() {
        let vm = SimVm::new();
        let bridge = Bridge::with_options(vm.clone(), BridgeOptions::default().with_dedup_buckets(2)).unwrap();
        let list_type = bridge.resolve_class("java.util.ArrayList").unwrap();
        let list = bridge.construct(&list_type, &[], &[]).unwrap();
        let inner = bridge.construct(&list_type, &[], &[]).unwrap();
        bridge.invoke(&list, "add", &[inner.clone()]).unwrap();

        let first = bridge.invoke(&list, "get", &[Value::Int(0)]).unwrap();
        let second = bridge.invoke(&list, "get", &[Value::Int(0)]).unwrap();
        assert!(Arc::ptr_eq(first.as_object().unwrap(), inner.as_object().unwrap()));
        assert!(Arc::ptr_eq(first.as_object().unwrap(), second.as_object().unwrap()));
        assert_eq!(bridge.stats().wrappers, 2);
    }

    #[test]
    fn test_dropped_wrapper_unlinks() {
        let vm = SimVm::new();
        let bridge = Bridge::new(vm.clone()).unwrap();
        let list_type = bridge.resolve_class("java.util.ArrayList").unwrap();
        let baseline = vm.global_ref_count();

        let list = bridge.construct(&list_type, &[], &[]).unwrap();
        assert_eq!(bridge.stats().wrappers, 1);
        assert_eq!(vm.global_ref_count(), baseline + 1);
        drop(list);
        assert_eq!(bridge.stats().wrappers, 0);
        assert_eq!(vm.global_ref_count(), baseline);
    }
}
