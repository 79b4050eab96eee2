//! jbridge core
//!
//! A dynamic bridge between a JVM-style foreign runtime and a host
//! dynamic-object model:
//! - Reflective synthesis of host types from foreign classes
//! - Bidirectional value marshaling with pluggable converters
//! - Instance wrappers with identity dedup and attribute decoration
//! - Collection, iterator and comparison protocol shims
//! - Per-thread runtime handle management
//!
//! The foreign runtime is reached through the [`foreign::ForeignEnv`] and
//! [`foreign::ForeignVm`] traits. The `sim` module, behind the `sim` feature,
//! ships an in-memory implementation used by the test-suite and by embedders
//! without a JVM.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bridge;
pub mod dedup;
pub mod env;
pub mod foreign;
pub mod host_lock;
pub mod instance;
pub mod intern;
pub mod marshal;
pub mod options;
pub mod protocol;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod types;
pub mod value;

pub use bridge::{Bridge, BridgeStats};
pub use env::{EnvScope, HandleManager};
pub use foreign::{ForeignEnv, ForeignVm, JValue, ObjRef, PrimitiveTag};
pub use host_lock::{HostLock, NoHostLock};
pub use instance::InstanceWrapper;
pub use marshal::convert::{J2pFn, P2jFn};
pub use options::{BridgeOptions, FatalPolicy};
pub use protocol::ForeignIter;
pub use types::{Container, DecorationKind, SynthesizedType};
pub use value::{Callable, CompareOp, Kwargs, Value};

/// Bridge operation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    /// Unknown attribute or field
    #[error("{0}")]
    AttributeNotFound(String),

    /// No method overload matched the call
    #[error("{0}")]
    Lookup(String),

    /// Conversion failure, wrong receiver kind or non-callable object
    #[error("{0}")]
    TypeError(String),

    /// Index out of range
    #[error("{0}")]
    IndexError(String),

    /// Exception raised by the foreign runtime, rendered on a single line
    #[error("{0}")]
    ForeignException(String),

    /// Operation the bridge does not support
    #[error("{0}")]
    NotImplemented(String),

    /// Precondition violation
    #[error("{0}")]
    Runtime(String),

    /// Foreign class lookup failed
    #[error("class not found: {0}")]
    ClassNotFound(String),

    /// No foreign runtime could be located or attached
    #[error("no java runtime available")]
    NoRuntime,

    /// A host callback (decoration or converter) failed
    #[error("callback failed: {0}")]
    Callback(String),
}

/// Bridge operation result
pub type BridgeResult<T> = Result<T, BridgeError>;
