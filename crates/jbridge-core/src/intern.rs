//! Reference-counted string interning
//!
//! Method, field and type names are interned so that every descriptor naming
//! the same member shares one allocation. Each [`Interner::intern`] must be
//! paired with one [`Interner::release`]; the entry is freed when its count
//! drops to zero.

use dashmap::DashMap;
use std::sync::Arc;

/// Concurrent string interning table
#[derive(Debug, Default)]
pub struct Interner {
    table: DashMap<Arc<str>, usize>,
}

impl Interner {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `s`, returning the shared copy and bumping its count
    pub fn intern(&self, s: &str) -> Arc<str> {
        if let Some(mut entry) = self.table.get_mut(s) {
            *entry.value_mut() += 1;
            return entry.key().clone();
        }
        let mut entry = self.table.entry(Arc::from(s)).or_insert(0);
        *entry.value_mut() += 1;
        entry.key().clone()
    }

    /// Drop one reference to `s`
    pub fn release(&self, s: &str) {
        let emptied = match self.table.get_mut(s) {
            Some(mut entry) => {
                let count = entry.value_mut();
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };
        if emptied {
            self.table.remove_if(s, |_, count| *count == 0);
        }
    }

    /// Current reference count of `s`
    pub fn count(&self, s: &str) -> usize {
        self.table.get(s).map(|entry| *entry.value()).unwrap_or(0)
    }

    /// Number of distinct live strings
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
