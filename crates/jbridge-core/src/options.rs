//! Bridge configuration

use crate::host_lock::{HostLock, NoHostLock};
use std::fmt;
use std::sync::Arc;

/// What happens when a runtime scope exits with a foreign exception pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FatalPolicy {
    /// Describe the exception and abort the process
    #[default]
    Abort,
    /// Describe the exception and panic
    Panic,
}

impl FatalPolicy {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Some(FatalPolicy::Abort),
            "panic" => Some(FatalPolicy::Panic),
            _ => None,
        }
    }
}

/// Options for a [`Bridge`](crate::Bridge)
#[derive(Clone)]
pub struct BridgeOptions {
    /// Buckets in each type's method and field tables
    pub symbol_buckets: usize,

    /// Buckets in the type cache
    pub type_cache_buckets: usize,

    /// Buckets in the wrapper dedup table
    pub dedup_buckets: usize,

    /// Local reference slots reserved when a thread is attached
    pub local_ref_capacity: usize,

    /// Convert boxed primitives to and from host scalars
    pub box_primitives: bool,

    /// Synthesize the string and boxed types at start-up
    pub force_init: bool,

    /// Reaction to a pending exception at scope exit
    pub fatal_policy: FatalPolicy,

    /// Host interpreter lock released around foreign calls
    pub host_lock: Arc<dyn HostLock>,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            symbol_buckets: 64,
            type_cache_buckets: 256,
            dedup_buckets: 1024,
            local_ref_capacity: 65536,
            box_primitives: true,
            force_init: true,
            fatal_policy: FatalPolicy::Abort,
            host_lock: Arc::new(NoHostLock),
        }
    }
}

impl BridgeOptions {
    /// Defaults overridden by `JBRIDGE_*` environment variables
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut options = Self::default();
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<usize>().ok());
        let flag = |key: &str| lookup(key).and_then(|v| parse_flag(&v));

        if let Some(n) = number("JBRIDGE_SYMBOL_BUCKETS") {
            options.symbol_buckets = n;
        }
        if let Some(n) = number("JBRIDGE_TYPE_BUCKETS") {
            options.type_cache_buckets = n;
        }
        if let Some(n) = number("JBRIDGE_DEDUP_BUCKETS") {
            options.dedup_buckets = n;
        }
        if let Some(n) = number("JBRIDGE_LOCAL_REFS") {
            options.local_ref_capacity = n;
        }
        if let Some(b) = flag("JBRIDGE_BOX_PRIMITIVES") {
            options.box_primitives = b;
        }
        if let Some(b) = flag("JBRIDGE_FORCE_INIT") {
            options.force_init = b;
        }
        if let Some(policy) = lookup("JBRIDGE_FATAL").and_then(|v| FatalPolicy::parse(&v)) {
            options.fatal_policy = policy;
        }
        options.clamped()
    }

    /// Set the symbol bucket count
    pub fn with_symbol_buckets(mut self, buckets: usize) -> Self {
        self.symbol_buckets = buckets.max(1);
        self
    }

    /// Set the type cache bucket count
    pub fn with_type_cache_buckets(mut self, buckets: usize) -> Self {
        self.type_cache_buckets = buckets.max(1);
        self
    }

    /// Set the dedup bucket count
    pub fn with_dedup_buckets(mut self, buckets: usize) -> Self {
        self.dedup_buckets = buckets.max(1);
        self
    }

    /// Set the local reference reservation
    pub fn with_local_ref_capacity(mut self, capacity: usize) -> Self {
        self.local_ref_capacity = capacity;
        self
    }

    /// Enable or disable boxed primitive conversion
    pub fn with_box_primitives(mut self, enabled: bool) -> Self {
        self.box_primitives = enabled;
        self
    }

    /// Enable or disable eager synthesis of the built-in types
    pub fn with_force_init(mut self, enabled: bool) -> Self {
        self.force_init = enabled;
        self
    }

    /// Set the fatal policy
    pub fn with_fatal_policy(mut self, policy: FatalPolicy) -> Self {
        self.fatal_policy = policy;
        self
    }

    /// Set the host interpreter lock
    pub fn with_host_lock(mut self, lock: Arc<dyn HostLock>) -> Self {
        self.host_lock = lock;
        self
    }

    pub(crate) fn clamped(mut self) -> Self {
        self.symbol_buckets = self.symbol_buckets.max(1);
        self.type_cache_buckets = self.type_cache_buckets.max(1);
        self.dedup_buckets = self.dedup_buckets.max(1);
        self
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl fmt::Debug for BridgeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeOptions")
            .field("symbol_buckets", &self.symbol_buckets)
            .field("type_cache_buckets", &self.type_cache_buckets)
            .field("dedup_buckets", &self.dedup_buckets)
            .field("local_ref_capacity", &self.local_ref_capacity)
            .field("box_primitives", &self.box_primitives)
            .field("force_init", &self.force_init)
            .field("fatal_policy", &self.fatal_policy)
            .finish_non_exhaustive()
    }
}
