//! Host value representation
//!
//! [`Value`] is the host side of the bridge: a small dynamic-object model with
//! scalars, strings, tuples, callables and the two bridge-owned kinds,
//! wrapped foreign objects and synthesized foreign types.

use crate::instance::InstanceWrapper;
use crate::types::SynthesizedType;
use crate::BridgeResult;
use std::fmt;
use std::sync::Arc;

/// Keyword arguments, in call order
pub type Kwargs = [(String, Value)];

/// Signature of a host callable
pub type CallableFn = dyn Fn(&[Value], &Kwargs) -> BridgeResult<Value> + Send + Sync;

/// A host function value
#[derive(Clone)]
pub struct Callable {
    name: Arc<str>,
    func: Arc<CallableFn>,
}

impl Callable {
    /// Create a named callable
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(&[Value], &Kwargs) -> BridgeResult<Value> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            func: Arc::new(func),
        }
    }

    /// Name the callable was created with
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke with positional and keyword arguments
    pub fn call(&self, args: &[Value], kwargs: &Kwargs) -> BridgeResult<Value> {
        (self.func)(args, kwargs)
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Callable) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<callable {}>", self.name)
    }
}

/// Comparison operator for rich comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CompareOp {
    /// Result of the operator for a three-way comparison outcome
    pub fn holds(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CompareOp::Eq => ordering == Equal,
            CompareOp::Ne => ordering != Equal,
            CompareOp::Lt => ordering == Less,
            CompareOp::Le => ordering != Greater,
            CompareOp::Gt => ordering == Greater,
            CompareOp::Ge => ordering != Less,
        }
    }
}

/// Dynamically typed host value
#[derive(Clone)]
pub enum Value {
    /// Absent value; crosses as the null reference
    None,
    /// Boolean
    Bool(bool),
    /// Arbitrary integer (range-checked against the foreign width)
    Int(i64),
    /// Floating point
    Float(f64),
    /// Text
    Str(Arc<str>),
    /// Immutable sequence
    Tuple(Arc<[Value]>),
    /// Wrapped foreign object
    Object(Arc<InstanceWrapper>),
    /// Synthesized foreign type
    Type(Arc<SynthesizedType>),
    /// Host function
    Callable(Callable),
    /// Sentinel returned when an operation does not apply to its operands
    NotImplemented,
}

impl Value {
    /// Build a string value
    pub fn str(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    /// Build a tuple value
    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Arc::from(items))
    }

    /// Kind name, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Tuple(_) => "tuple",
            Value::Object(_) => "java object",
            Value::Type(_) => "java type",
            Value::Callable(_) => "callable",
            Value::NotImplemented => "NotImplemented",
        }
    }

    /// Whether this is [`Value::None`]
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Boolean payload
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer payload
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Float payload
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// String payload
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Tuple payload
    pub fn as_tuple(&self) -> Option<&[Value]> {
        match self {
            Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    /// Wrapped foreign object
    pub fn as_object(&self) -> Option<&Arc<InstanceWrapper>> {
        match self {
            Value::Object(w) => Some(w),
            _ => None,
        }
    }

    /// Synthesized type
    pub fn as_type(&self) -> Option<&Arc<SynthesizedType>> {
        match self {
            Value::Type(t) => Some(t),
            _ => None,
        }
    }

    /// Callable payload
    pub fn as_callable(&self) -> Option<&Callable> {
        match self {
            Value::Callable(c) => Some(c),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::NotImplemented, Value::NotImplemented) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            // Bridge-owned values compare by identity
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Type(a), Value::Type(b)) => Arc::ptr_eq(a, b),
            (Value::Callable(a), Value::Callable(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Int(i) => write!(f, "Int({})", i),
            Value::Float(x) => write!(f, "Float({})", x),
            Value::Str(s) => write!(f, "Str({:?})", s),
            Value::Tuple(items) => f.debug_tuple("Tuple").field(items).finish(),
            Value::Object(w) => write!(f, "Object(<{}>)", w.java_type().name()),
            Value::Type(t) => write!(f, "Type(<{}>)", t.name()),
            Value::Callable(c) => write!(f, "{:?}", c),
            Value::NotImplemented => write!(f, "NotImplemented"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<Arc<InstanceWrapper>> for Value {
    fn from(w: Arc<InstanceWrapper>) -> Self {
        Value::Object(w)
    }
}

impl From<Arc<SynthesizedType>> for Value {
    fn from(t: Arc<SynthesizedType>) -> Self {
        Value::Type(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn test_scalar_equality() {
        assert_eq!(Value::from(3i64), Value::Int(3));
        assert_eq!(Value::from("a"), Value::str("a"));
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_eq!(
            Value::tuple(vec![Value::None, Value::Bool(true)]),
            Value::tuple(vec![Value::None, Value::Bool(true)])
        );
    }

    #[test]
    fn test_callable_identity() {
        let a = Callable::new("f", |_, _| Ok(Value::None));
        let b = a.clone();
        let c = Callable::new("f", |_, _| Ok(Value::None));
        assert_eq!(Value::Callable(a.clone()), Value::Callable(b));
        assert_ne!(Value::Callable(a), Value::Callable(c));
    }

    #[test]
    fn test_callable_receives_arguments() {
        let sum = Callable::new("sum", |args, kwargs| {
            let total: i64 = args.iter().filter_map(Value::as_int).sum();
            Ok(Value::Int(total + kwargs.len() as i64))
        });
        let kwargs = vec![("k".to_string(), Value::None)];
        assert_eq!(sum.call(&[Value::Int(2), Value::Int(3)], &kwargs).unwrap(), Value::Int(6));
        assert_eq!(sum.name(), "sum");
    }

    #[test]
    fn test_compare_op_holds() {
        assert!(CompareOp::Le.holds(Ordering::Equal));
        assert!(CompareOp::Le.holds(Ordering::Less));
        assert!(!CompareOp::Gt.holds(Ordering::Equal));
        assert!(CompareOp::Ne.holds(Ordering::Greater));
    }
}
