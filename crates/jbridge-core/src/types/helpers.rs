//! Typed call and field-access helpers
//!
//! Descriptors store a plain function pointer chosen at synthesis time from
//! fixed tables indexed by `(is_static, tag)`, so dispatch never re-inspects
//! the member's signature.

use crate::foreign::{CallTarget, FieldId, ForeignEnv, JValue, MethodId, ObjRef, PrimitiveTag};

/// Invoke a method on a receiver (object for instance helpers, class for static ones)
pub(crate) type CallHelper = fn(&dyn ForeignEnv, ObjRef, MethodId, &[JValue]) -> JValue;

/// Read a field of a receiver
pub(crate) type FieldGetter = fn(&dyn ForeignEnv, ObjRef, FieldId) -> JValue;

/// Write a field of a receiver
pub(crate) type FieldSetter = fn(&dyn ForeignEnv, ObjRef, FieldId, JValue);

/// Accessor pair of a field
#[derive(Debug, Clone, Copy)]
pub(crate) struct FieldAccessors {
    pub get: FieldGetter,
    pub set: FieldSetter,
}

macro_rules! call_helpers {
    ($($tag:ident => $instance:ident, $statik:ident;)*) => {
        $(
            fn $instance(env: &dyn ForeignEnv, obj: ObjRef, id: MethodId, args: &[JValue]) -> JValue {
                env.call_method(CallTarget::Instance(obj), id, args, PrimitiveTag::$tag)
            }

            fn $statik(env: &dyn ForeignEnv, class: ObjRef, id: MethodId, args: &[JValue]) -> JValue {
                env.call_method(CallTarget::Static(class), id, args, PrimitiveTag::$tag)
            }
        )*

        static CALL_HELPERS: [[CallHelper; 10]; 2] = [[$($instance),*], [$($statik),*]];
    };
}

call_helpers! {
    Void => call_void, call_static_void;
    Boolean => call_boolean, call_static_boolean;
    Byte => call_byte, call_static_byte;
    Char => call_char, call_static_char;
    Short => call_short, call_static_short;
    Int => call_int, call_static_int;
    Long => call_long, call_static_long;
    Float => call_float, call_static_float;
    Double => call_double, call_static_double;
    Object => call_object, call_static_object;
}

macro_rules! field_getters {
    ($($tag:ident => $instance:ident, $statik:ident;)*) => {
        $(
            fn $instance(env: &dyn ForeignEnv, obj: ObjRef, id: FieldId) -> JValue {
                env.get_field(CallTarget::Instance(obj), id, PrimitiveTag::$tag)
            }

            fn $statik(env: &dyn ForeignEnv, class: ObjRef, id: FieldId) -> JValue {
                env.get_field(CallTarget::Static(class), id, PrimitiveTag::$tag)
            }
        )*

        static FIELD_GETTERS: [[FieldGetter; 9]; 2] = [[$($instance),*], [$($statik),*]];
    };
}

field_getters! {
    Boolean => get_boolean, get_static_boolean;
    Byte => get_byte, get_static_byte;
    Char => get_char, get_static_char;
    Short => get_short, get_static_short;
    Int => get_int, get_static_int;
    Long => get_long, get_static_long;
    Float => get_float, get_static_float;
    Double => get_double, get_static_double;
    Object => get_object, get_static_object;
}

fn set_instance(env: &dyn ForeignEnv, obj: ObjRef, id: FieldId, value: JValue) {
    env.set_field(CallTarget::Instance(obj), id, value);
}

fn set_static(env: &dyn ForeignEnv, class: ObjRef, id: FieldId, value: JValue) {
    env.set_field(CallTarget::Static(class), id, value);
}

fn return_slot(tag: PrimitiveTag) -> usize {
    match tag {
        PrimitiveTag::Void => 0,
        PrimitiveTag::Boolean => 1,
        PrimitiveTag::Byte => 2,
        PrimitiveTag::Char => 3,
        PrimitiveTag::Short => 4,
        PrimitiveTag::Int => 5,
        PrimitiveTag::Long => 6,
        PrimitiveTag::Float => 7,
        PrimitiveTag::Double => 8,
        PrimitiveTag::Object | PrimitiveTag::Array => 9,
    }
}

/// Call helper for a method returning `ret`
pub(crate) fn call_helper(is_static: bool, ret: PrimitiveTag) -> CallHelper {
    CALL_HELPERS[is_static as usize][return_slot(ret)]
}

/// Constructor helper: allocates and initializes an instance of `class`
pub(crate) fn construct(env: &dyn ForeignEnv, class: ObjRef, id: MethodId, args: &[JValue]) -> JValue {
    JValue::Object(env.new_object(class, id, args))
}

/// Accessors for a field of type `tag`; `void` fields have none
pub(crate) fn field_accessors(is_static: bool, tag: PrimitiveTag) -> Option<FieldAccessors> {
    if tag == PrimitiveTag::Void {
        return None;
    }
    let getter = FIELD_GETTERS[is_static as usize][return_slot(tag) - 1];
    Some(FieldAccessors {
        get: getter,
        set: if is_static { set_static } else { set_instance },
    })
}
