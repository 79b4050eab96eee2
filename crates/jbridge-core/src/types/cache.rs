//! Type cache keyed by foreign class identity

use super::SynthesizedType;
use crate::foreign::{ForeignEnv, ObjRef};
use crate::intern::Interner;
use parking_lot::Mutex;
use std::sync::Arc;

/// Synthesized types, bucketed by the identity hash of their class
pub struct TypeCache {
    buckets: Vec<Mutex<Vec<Arc<SynthesizedType>>>>,
}

impl TypeCache {
    /// Cache with `buckets` buckets (at least one)
    pub fn new(buckets: usize) -> Self {
        Self {
            buckets: (0..buckets.max(1)).map(|_| Mutex::new(Vec::new())).collect(),
        }
    }

    fn bucket(&self, hash: i32) -> &Mutex<Vec<Arc<SynthesizedType>>> {
        &self.buckets[(hash as u32 as usize) % self.buckets.len()]
    }

    /// Type of `class`, ready or still under construction
    pub fn find(&self, env: &dyn ForeignEnv, class: ObjRef, hash: i32) -> Option<Arc<SynthesizedType>> {
        self.bucket(hash)
            .lock()
            .iter()
            .find(|t| env.is_same_object(Some(t.class()), Some(class)))
            .cloned()
    }

    /// Link `ty` unless its class already has a type; returns the linked one
    pub fn register(&self, env: &dyn ForeignEnv, ty: Arc<SynthesizedType>) -> Arc<SynthesizedType> {
        let mut bucket = self.bucket(ty.identity_hash()).lock();
        let existing = bucket
            .iter()
            .find(|t| Arc::ptr_eq(t, &ty) || env.is_same_object(Some(t.class()), Some(ty.class())))
            .cloned();
        match existing {
            Some(winner) => winner,
            None => {
                bucket.push(ty.clone());
                ty
            }
        }
    }

    /// Number of cached types
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.lock().len()).sum()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All cached types
    pub fn snapshot(&self) -> Vec<Arc<SynthesizedType>> {
        self.buckets.iter().flat_map(|b| b.lock().clone()).collect()
    }

    /// Drop every ready type nothing else references, unless it carries an
    /// own decoration or converters
    ///
    /// The caller holds the synthesis lock.
    pub(crate) fn evict(&self, env: &dyn ForeignEnv, names: &Interner) -> usize {
        let mut evicted = Vec::new();
        for bucket in &self.buckets {
            let mut bucket = bucket.lock();
            let mut i = 0;
            while i < bucket.len() {
                let ty = &bucket[i];
                if ty.is_ready() && Arc::strong_count(ty) == 1 && !ty.pinned() {
                    evicted.push(bucket.swap_remove(i));
                } else {
                    i += 1;
                }
            }
        }
        for ty in &evicted {
            ty.release(env, names);
        }
        evicted.len()
    }

    /// Empty the cache, releasing every type whether referenced or not
    pub(crate) fn release_all(&self, env: &dyn ForeignEnv, names: &Interner) {
        let all: Vec<_> = self.buckets.iter().flat_map(|b| std::mem::take(&mut *b.lock())).collect();
        for ty in &all {
            ty.release(env, names);
        }
    }
}

impl std::fmt::Debug for TypeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeCache")
            .field("buckets", &self.buckets.len())
            .field("types", &self.len())
            .finish()
    }
}
