//! Value marshaling between host and foreign representations
//!
//! [`to_foreign`] never fails: `None` means "this value does not fit the
//! target", which overload resolution uses to move on to the next
//! candidate. [`to_host`] wraps anything no converter claims.

pub mod convert;
pub mod exception;

pub use exception::{check_exception, take_exception};

use crate::bridge::BridgeState;
use crate::foreign::{ForeignEnv, JValue, ObjRef, PrimitiveTag};
use crate::instance::InstanceWrapper;
use crate::types::synth::synthesize;
use crate::types::TypeRef;
use crate::value::Value;
use crate::{BridgeError, BridgeResult};
use std::sync::Arc;

/// Marshal a host value into a foreign slot of type `target`
///
/// Object results are new local references owned by the caller.
pub(crate) fn to_foreign(state: &BridgeState, env: &dyn ForeignEnv, value: &Value, target: TypeRef) -> Option<JValue> {
    let existing = match value {
        Value::None => return target.tag.is_reference().then(JValue::null),
        Value::Object(wrapper) => wrapper.obj_ref().ok(),
        Value::Type(ty) => Some(ty.class()),
        _ => None,
    };
    if let Some(obj) = existing {
        if env.is_instance_of(obj, target.class) {
            return Some(JValue::Object(Some(env.new_local_ref(obj))));
        }
    }

    match (target.tag, value) {
        (PrimitiveTag::Boolean, Value::Bool(b)) => Some(JValue::Boolean(*b)),
        (PrimitiveTag::Byte, Value::Int(i)) => i8::try_from(*i).ok().map(JValue::Byte),
        (PrimitiveTag::Short, Value::Int(i)) => i16::try_from(*i).ok().map(JValue::Short),
        (PrimitiveTag::Int, Value::Int(i)) => i32::try_from(*i).ok().map(JValue::Int),
        (PrimitiveTag::Long, Value::Int(i)) => Some(JValue::Long(*i)),
        (PrimitiveTag::Char, Value::Int(i)) => u16::try_from(*i).ok().map(JValue::Char),
        (PrimitiveTag::Char, Value::Str(s)) => convert::single_utf16(s).map(JValue::Char),
        (PrimitiveTag::Float, Value::Float(x)) => {
            if x.is_finite() && x.abs() > f32::MAX as f64 {
                None
            } else {
                Some(JValue::Float(*x as f32))
            }
        }
        (PrimitiveTag::Double, Value::Float(x)) => Some(JValue::Double(*x)),
        (PrimitiveTag::Object | PrimitiveTag::Array, _) => convert_reference(state, env, value, target.class),
        _ => None,
    }
}

/// Run the target type's host-to-foreign converters
fn convert_reference(state: &BridgeState, env: &dyn ForeignEnv, value: &Value, class: ObjRef) -> Option<JValue> {
    let ty = match synthesize(state, env, class) {
        Ok(ty) => ty,
        Err(e) => {
            tracing::debug!(error = %e, "target type unavailable for conversion");
            return None;
        }
    };
    // Converters may call back into the runtime; do not hold the chain lock
    let converters = ty.converters.read().p2j().to_vec();
    for converter in converters {
        let Some(obj) = converter(env, class, value) else {
            env.exception_clear();
            continue;
        };
        if env.exception_check() {
            env.exception_clear();
        } else if env.is_instance_of(obj, class) {
            return Some(JValue::Object(Some(obj)));
        }
        env.delete_local_ref(obj);
    }
    None
}

/// Marshal a foreign reference to the host
///
/// `obj` stays owned by the caller.
pub(crate) fn to_host(state: &Arc<BridgeState>, env: &dyn ForeignEnv, obj: Option<ObjRef>) -> BridgeResult<Value> {
    let Some(obj) = obj else {
        return Ok(Value::None);
    };
    if env.is_class_object(obj) {
        return synthesize(state, env, obj).map(Value::Type);
    }

    let class = env
        .get_object_class(obj)
        .ok_or_else(|| BridgeError::Runtime("java object has no class".to_string()))?;
    let ty = synthesize(state, env, class);
    env.delete_local_ref(class);
    let ty = ty?;

    for t in ty.mro() {
        let converters = t.converters.read().j2p().to_vec();
        for converter in converters {
            let result = converter(env, t.class(), obj);
            if env.exception_check() {
                env.exception_clear();
                tracing::debug!(class = t.name(), "converter left an exception pending, skipped");
                continue;
            }
            match result {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {}
                Err(e) => tracing::debug!(class = t.name(), error = %e, "converter skipped"),
            }
        }
    }
    Ok(Value::Object(InstanceWrapper::wrap(state, env, &ty, obj)))
}

/// Marshal a raw foreign value, consuming its local reference
pub(crate) fn jvalue_to_host(state: &Arc<BridgeState>, env: &dyn ForeignEnv, raw: JValue) -> BridgeResult<Value> {
    match raw {
        JValue::Void => Ok(Value::None),
        JValue::Object(obj) => {
            let value = to_host(state, env, obj);
            if let Some(obj) = obj {
                env.delete_local_ref(obj);
            }
            value
        }
        primitive => Ok(convert::primitive_to_host(primitive).unwrap_or(Value::None)),
    }
}

/// Delete the local references among marshaled arguments
pub(crate) fn release_locals(env: &dyn ForeignEnv, values: &[JValue]) {
    for value in values {
        if let Some(obj) = value.as_obj() {
            env.delete_local_ref(obj);
        }
    }
}
