//! Per-type converter chains and the built-in converters
//!
//! A foreign-to-host converter (`J2pFn`) turns an object of the type, or of
//! a subtype, into a plain host value. A host-to-foreign converter (`P2jFn`)
//! produces a new local reference from a host value, or `None` when the
//! value is not its kind. Registration pushes the host-to-foreign side into
//! every ancestor's chain so that `Object`-typed parameters can pick it up.

use crate::foreign::{CallTarget, ForeignEnv, JValue, MethodId, ObjRef, PrimitiveTag};
use crate::host_lock::{yielding, HostLock};
use crate::options::BridgeOptions;
use crate::types::SynthesizedType;
use crate::value::Value;
use crate::{BridgeError, BridgeResult};
use std::fmt;
use std::sync::Arc;

/// Foreign-to-host converter: `(env, class, object) -> value`
pub type J2pFn = Arc<dyn Fn(&dyn ForeignEnv, ObjRef, ObjRef) -> BridgeResult<Option<Value>> + Send + Sync>;

/// Host-to-foreign converter: `(env, target class, value) -> new local reference`
pub type P2jFn = Arc<dyn Fn(&dyn ForeignEnv, ObjRef, &Value) -> Option<ObjRef> + Send + Sync>;

/// Ordered converters of one type
#[derive(Clone, Default)]
pub struct ConverterChain {
    j2p: Vec<J2pFn>,
    p2j: Vec<P2jFn>,
}

impl ConverterChain {
    /// Whether no converter is registered
    pub fn is_empty(&self) -> bool {
        self.j2p.is_empty() && self.p2j.is_empty()
    }

    /// Foreign-to-host converters in registration order
    pub fn j2p(&self) -> &[J2pFn] {
        &self.j2p
    }

    /// Host-to-foreign converters in registration order
    pub fn p2j(&self) -> &[P2jFn] {
        &self.p2j
    }
}

impl fmt::Debug for ConverterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterChain")
            .field("j2p", &self.j2p.len())
            .field("p2j", &self.p2j.len())
            .finish()
    }
}

/// Attach converters to `ty`; `p2j` also lands on every ancestor
pub(crate) fn register(ty: &Arc<SynthesizedType>, j2p: Option<J2pFn>, p2j: Option<P2jFn>) {
    if let Some(j2p) = j2p {
        ty.converters.write().j2p.push(j2p);
    }
    if let Some(p2j) = p2j {
        for t in ty.mro() {
            t.converters.write().p2j.push(p2j.clone());
        }
    }
}

/// Classes whose converters are installed eagerly, in installation order
pub(crate) const FORCE_INIT_CLASSES: &[&str] = &[
    "java.lang.String",
    "java.lang.Integer",
    "java.lang.Long",
    "java.lang.Double",
    "java.lang.Boolean",
    "java.lang.Character",
    "java.lang.Short",
    "java.lang.Byte",
    "java.lang.Float",
];

/// Built-in converter pair for the class named `name`, if there is one
///
/// `class` must stay valid for as long as the converters are registered; it
/// is the global reference of a type that holds converters and is therefore
/// never evicted.
pub(crate) fn builtin(env: &dyn ForeignEnv, name: &str, class: ObjRef, options: &BridgeOptions) -> Option<(J2pFn, P2jFn)> {
    if name == "java.lang.String" {
        return Some(string_converters());
    }
    if !options.box_primitives {
        return None;
    }
    let (primitive, keyword) = match name {
        "java.lang.Boolean" => (PrimitiveTag::Boolean, "boolean"),
        "java.lang.Character" => (PrimitiveTag::Char, "char"),
        "java.lang.Byte" => (PrimitiveTag::Byte, "byte"),
        "java.lang.Short" => (PrimitiveTag::Short, "short"),
        "java.lang.Integer" => (PrimitiveTag::Int, "int"),
        "java.lang.Long" => (PrimitiveTag::Long, "long"),
        "java.lang.Float" => (PrimitiveTag::Float, "float"),
        "java.lang.Double" => (PrimitiveTag::Double, "double"),
        _ => return None,
    };
    let descriptor = primitive.as_char();
    let internal = name.replace('.', "/");
    let unbox = env.method_id(class, &format!("{}Value", keyword), &format!("(){}", descriptor));
    let value_of = env.method_id(class, "valueOf", &format!("({})L{};", descriptor, internal));
    match (unbox, value_of) {
        (Some(unbox), Some(value_of)) => Some(box_converters(
            options.host_lock.clone(),
            class,
            primitive,
            unbox,
            value_of,
        )),
        _ => {
            env.exception_clear();
            tracing::debug!(class = name, "boxing methods absent, no converters installed");
            None
        }
    }
}

fn string_converters() -> (J2pFn, P2jFn) {
    let j2p: J2pFn = Arc::new(|env: &dyn ForeignEnv, _class: ObjRef, obj: ObjRef| {
        Ok(env.string_utf(obj).map(Value::from))
    });
    let p2j: P2jFn = Arc::new(|env: &dyn ForeignEnv, _class: ObjRef, value: &Value| {
        value.as_str().and_then(|s| env.new_string(s))
    });
    (j2p, p2j)
}

fn box_converters(
    lock: Arc<dyn HostLock>,
    class: ObjRef,
    primitive: PrimitiveTag,
    unbox: MethodId,
    value_of: MethodId,
) -> (J2pFn, P2jFn) {
    let unbox_lock = lock.clone();
    let j2p: J2pFn = Arc::new(move |env: &dyn ForeignEnv, _class: ObjRef, obj: ObjRef| {
        let raw = yielding(&*unbox_lock, || {
            env.call_method(CallTarget::Instance(obj), unbox, &[], primitive)
        });
        if env.exception_check() {
            return Err(BridgeError::Callback(format!("unboxing {} failed", primitive)));
        }
        Ok(primitive_to_host(raw))
    });
    let p2j: P2jFn = Arc::new(move |env: &dyn ForeignEnv, _target: ObjRef, value: &Value| {
        let arg = box_argument(primitive, value)?;
        let boxed = yielding(&*lock, || {
            env.call_method(CallTarget::Static(class), value_of, &[arg], PrimitiveTag::Object)
        });
        if env.exception_check() {
            env.exception_clear();
            return None;
        }
        boxed.as_obj()
    });
    (j2p, p2j)
}

/// Primitive argument for `valueOf`, if `value` fits the boxed kind exactly
fn box_argument(primitive: PrimitiveTag, value: &Value) -> Option<JValue> {
    Some(match (primitive, value) {
        (PrimitiveTag::Boolean, Value::Bool(b)) => JValue::Boolean(*b),
        (PrimitiveTag::Byte, Value::Int(i)) => JValue::Byte(i8::try_from(*i).ok()?),
        (PrimitiveTag::Short, Value::Int(i)) => JValue::Short(i16::try_from(*i).ok()?),
        (PrimitiveTag::Int, Value::Int(i)) => JValue::Int(i32::try_from(*i).ok()?),
        (PrimitiveTag::Long, Value::Int(i)) => JValue::Long(*i),
        (PrimitiveTag::Char, Value::Str(s)) => JValue::Char(single_utf16(s)?),
        (PrimitiveTag::Double, Value::Float(x)) => JValue::Double(*x),
        (PrimitiveTag::Float, Value::Float(x)) if (*x as f32) as f64 == *x || x.is_nan() => JValue::Float(*x as f32),
        _ => return None,
    })
}

/// The single UTF-16 unit of a one-character string
pub(crate) fn single_utf16(s: &str) -> Option<u16> {
    let mut chars = s.chars();
    let c = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    u16::try_from(c as u32).ok()
}

/// Host value of a primitive foreign value; `None` for references and void
pub(crate) fn primitive_to_host(raw: JValue) -> Option<Value> {
    Some(match raw {
        JValue::Boolean(b) => Value::Bool(b),
        JValue::Byte(v) => Value::Int(v as i64),
        JValue::Short(v) => Value::Int(v as i64),
        JValue::Int(v) => Value::Int(v as i64),
        JValue::Long(v) => Value::Int(v),
        JValue::Float(v) => Value::Float(v as f64),
        JValue::Double(v) => Value::Float(v),
        JValue::Char(c) => Value::from(String::from_utf16_lossy(&[c])),
        JValue::Void | JValue::Object(_) => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foreign::ForeignVm;
    use crate::sim::{ClassDef, Payload, SimValue, SimVm};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct HeldLock {
        held: AtomicBool,
    }

    impl HostLock for HeldLock {
        fn release(&self) {
            self.held.store(false, Ordering::SeqCst);
        }

        fn acquire(&self) {
            self.held.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_box_argument_range_checks() {
        assert_eq!(box_argument(PrimitiveTag::Int, &Value::Int(7)), Some(JValue::Int(7)));
        assert_eq!(box_argument(PrimitiveTag::Int, &Value::Int(1 << 40)), None);
        assert_eq!(box_argument(PrimitiveTag::Long, &Value::Int(1 << 40)), Some(JValue::Long(1 << 40)));
        assert_eq!(box_argument(PrimitiveTag::Byte, &Value::Int(200)), None);
        assert_eq!(box_argument(PrimitiveTag::Boolean, &Value::Int(1)), None);
        assert_eq!(box_argument(PrimitiveTag::Float, &Value::Float(0.5)), Some(JValue::Float(0.5)));
        assert_eq!(box_argument(PrimitiveTag::Float, &Value::Float(0.1)), None);
        assert_eq!(box_argument(PrimitiveTag::Char, &Value::str("x")), Some(JValue::Char(b'x' as u16)));
        assert_eq!(box_argument(PrimitiveTag::Char, &Value::str("xy")), None);
    }

    #[test]
    fn test_single_utf16_rejects_astral() {
        assert_eq!(single_utf16("é"), Some(0xe9));
        assert_eq!(single_utf16("\u{1F600}"), None);
        assert_eq!(single_utf16(""), None);
    }

    #[test]
    fn test_primitive_to_host() {
        assert_eq!(primitive_to_host(JValue::Char(b'a' as u16)), Some(Value::str("a")));
        assert_eq!(primitive_to_host(JValue::Byte(-3)), Some(Value::Int(-3)));
        assert_eq!(primitive_to_host(JValue::Void), None);
        assert_eq!(primitive_to_host(JValue::null()), None);
    }

    #[test]
    fn test_box_converters_yield_host_lock() {
        let lock = Arc::new(HeldLock { held: AtomicBool::new(true) });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let vm = SimVm::new();
        let (in_unbox, in_value_of) = ((lock.clone(), seen.clone()), (lock.clone(), seen.clone()));
        vm.heap()
            .define_class(
                ClassDef::new("demo.Box")
                    .field("value", "int")
                    .method("intValue", &[], "int", move |heap, t, _| {
                        in_unbox.1.lock().push(("intValue", in_unbox.0.held.load(Ordering::SeqCst)));
                        Ok(t.and_then(|t| heap.field(t, "value")).unwrap_or(SimValue::Int(0)))
                    })
                    .static_method("valueOf", &["int"], "demo.Box", move |heap, _, args| {
                        in_value_of.1.lock().push(("valueOf", in_value_of.0.held.load(Ordering::SeqCst)));
                        let class = heap.class_by_name("demo.Box").unwrap_or(heap.object_class());
                        let boxed = heap.alloc(class, Payload::None);
                        heap.set_field(boxed, "value", args[0]);
                        Ok(SimValue::Ref(Some(boxed)))
                    }),
            )
            .unwrap();
        let env = vm.attach_current_thread().unwrap();
        let class = env.find_class("demo/Box").unwrap();
        let unbox = env.method_id(class, "intValue", "()I").unwrap();
        let value_of = env.method_id(class, "valueOf", "(I)Ldemo/Box;").unwrap();

        let (j2p, p2j) = box_converters(lock.clone(), class, PrimitiveTag::Int, unbox, value_of);
        let boxed = p2j(&*env, class, &Value::Int(5)).unwrap();
        assert_eq!(j2p(&*env, class, boxed).unwrap(), Some(Value::Int(5)));

        assert_eq!(*seen.lock(), vec![("valueOf", false), ("intValue", false)]);
        assert!(lock.held.load(Ordering::SeqCst));
    }
}
