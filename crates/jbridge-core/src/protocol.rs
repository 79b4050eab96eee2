//! Collection, iterator and array protocols
//!
//! Foreign maps, lists, sets, iterables, iterators and arrays get
//! host-style length, indexing, membership, concatenation and iteration.
//! Which operations apply is decided by the protocol set detected when the
//! object's type was synthesized.

use crate::env::EnvScope;
use crate::foreign::{ArrayElements, ForeignEnv, JValue, PrimitiveTag, ReleaseMode};
use crate::instance::InstanceWrapper;
use crate::marshal::convert::primitive_to_host;
use crate::marshal::{jvalue_to_host, release_locals, take_exception, to_foreign};
use crate::types::{Container, TypeRef};
use crate::value::Value;
use crate::{BridgeError, BridgeResult};
use std::sync::Arc;

fn unsupported(wrapper: &InstanceWrapper, what: &str) -> BridgeError {
    BridgeError::TypeError(format!("'{}' object {}", wrapper.java_type().name(), what))
}

fn out_of_range() -> BridgeError {
    BridgeError::IndexError("Index out of range".to_string())
}

fn container(wrapper: &InstanceWrapper) -> Option<Container> {
    wrapper.java_type().protocols().container
}

fn scope(wrapper: &InstanceWrapper) -> BridgeResult<EnvScope<'_>> {
    wrapper.state().handles.scope()
}

/// Resolve a possibly negative index against `len`
fn normalize_index(key: &Value, len: usize) -> BridgeResult<usize> {
    let index = key
        .as_int()
        .ok_or_else(|| BridgeError::TypeError(format!("indices must be integers, not {}", key.type_name())))?;
    let len = len as i64;
    let index = if index < 0 { index + len } else { index };
    if (0..len).contains(&index) {
        Ok(index as usize)
    } else {
        Err(out_of_range())
    }
}

fn as_len(value: Value) -> BridgeResult<usize> {
    value
        .as_int()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| BridgeError::TypeError(format!("size() returned {}", value.type_name())))
}

// ---- length, indexing, membership ----

/// Number of elements
pub fn len(wrapper: &InstanceWrapper) -> BridgeResult<usize> {
    match container(wrapper) {
        Some(Container::Array(_)) => {
            let scope = scope(wrapper)?;
            array_len(wrapper, &**scope.env())
        }
        Some(_) => as_len(wrapper.invoke("size", &[])?),
        None => Err(unsupported(wrapper, "has no len()")),
    }
}

fn array_len(wrapper: &InstanceWrapper, env: &dyn ForeignEnv) -> BridgeResult<usize> {
    env.array_length(wrapper.obj_ref()?)
        .ok_or_else(|| BridgeError::TypeError("not a java array".to_string()))
}

/// `obj[key]`
pub fn get_item(wrapper: &InstanceWrapper, key: &Value) -> BridgeResult<Value> {
    match container(wrapper) {
        Some(Container::Map) => wrapper.invoke("get", &[key.clone()]),
        Some(Container::List) => {
            let index = normalize_index(key, len(wrapper)?)?;
            wrapper.invoke("get", &[Value::Int(index as i64)])
        }
        Some(Container::Array(tag)) => array_get(wrapper, key, tag),
        _ => Err(unsupported(wrapper, "is not subscriptable")),
    }
}

/// `obj[key] = value` (`Some`) or `del obj[key]` (`None`)
pub fn set_item(wrapper: &InstanceWrapper, key: &Value, value: Option<&Value>) -> BridgeResult<()> {
    match (container(wrapper), value) {
        (Some(Container::Map), Some(value)) => wrapper.invoke("put", &[key.clone(), value.clone()]).map(drop),
        (Some(Container::Map), None) => wrapper.invoke("remove", &[key.clone()]).map(drop),
        (Some(Container::List), Some(value)) => {
            let index = normalize_index(key, len(wrapper)?)?;
            wrapper.invoke("set", &[Value::Int(index as i64), value.clone()]).map(drop)
        }
        (Some(Container::List), None) => {
            let index = normalize_index(key, len(wrapper)?)?;
            remove_at(wrapper, index)
        }
        (Some(Container::Array(tag)), Some(value)) => array_set(wrapper, key, value, tag),
        (Some(Container::Array(_)), None) => {
            Err(BridgeError::Runtime("cannot change length of a java array".to_string()))
        }
        _ => Err(unsupported(wrapper, "does not support item assignment")),
    }
}

/// `List.remove(int)`, never the `remove(Object)` overload
fn remove_at(wrapper: &InstanceWrapper, index: usize) -> BridgeResult<()> {
    let scope = scope(wrapper)?;
    let env = &**scope.env();
    let raw = wrapper.invoke_raw(env, "remove", &[Value::Int(index as i64)], Some(&[PrimitiveTag::Int]))?;
    release_locals(env, &[raw]);
    match take_exception(env, wrapper.state().host_lock()) {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

/// `item in obj`
pub fn contains(wrapper: &InstanceWrapper, item: &Value) -> BridgeResult<bool> {
    let method = match container(wrapper) {
        Some(Container::Map) => "containsKey",
        Some(Container::List | Container::Set) => "contains",
        _ => return Err(unsupported(wrapper, "does not support membership tests")),
    };
    match wrapper.invoke(method, &[item.clone()])? {
        Value::Bool(found) => Ok(found),
        other => Err(BridgeError::TypeError(format!("{}() returned {}", method, other.type_name()))),
    }
}

/// `obj + other`, appending in place through `addAll`
pub fn concat(wrapper: &Arc<InstanceWrapper>, other: &Value) -> BridgeResult<Value> {
    match container(wrapper) {
        Some(Container::List | Container::Set) => {
            wrapper.invoke("addAll", &[other.clone()])?;
            Ok(Value::Object(wrapper.clone()))
        }
        _ => Err(unsupported(wrapper, "does not support concatenation")),
    }
}

// ---- arrays ----

fn element_ref(wrapper: &InstanceWrapper, tag: PrimitiveTag) -> BridgeResult<TypeRef> {
    wrapper
        .java_type()
        .element()
        .filter(|e| e.tag == tag)
        .ok_or_else(|| BridgeError::TypeError("not a java array".to_string()))
}

fn array_get(wrapper: &InstanceWrapper, key: &Value, tag: PrimitiveTag) -> BridgeResult<Value> {
    let scope = scope(wrapper)?;
    let env = &**scope.env();
    let array = wrapper.obj_ref()?;
    let index = normalize_index(key, array_len(wrapper, env)?)?;

    if tag.is_reference() {
        let element = env.object_array_element(array, index);
        if let Some(error) = take_exception(env, wrapper.state().host_lock()) {
            release_locals(env, &[JValue::Object(element)]);
            return Err(error);
        }
        return jvalue_to_host(wrapper.state(), env, JValue::Object(element));
    }

    let mut read = None;
    let pinned = env.with_primitive_array_critical(array, ReleaseMode::Abort, &mut |elements: ArrayElements<'_>| {
        read = elements.get(index);
    });
    match read {
        Some(raw) if pinned => Ok(primitive_to_host(raw).unwrap_or(Value::None)),
        _ => Err(out_of_range()),
    }
}

fn array_set(wrapper: &InstanceWrapper, key: &Value, value: &Value, tag: PrimitiveTag) -> BridgeResult<()> {
    let scope = scope(wrapper)?;
    let env = &**scope.env();
    let array = wrapper.obj_ref()?;
    let index = normalize_index(key, array_len(wrapper, env)?)?;
    let element = element_ref(wrapper, tag)?;
    let wrong_type = || BridgeError::TypeError("wrong type for array".to_string());
    let marshaled = to_foreign(wrapper.state(), env, value, element).ok_or_else(wrong_type)?;

    if tag.is_reference() {
        env.set_object_array_element(array, index, marshaled.as_obj());
        release_locals(env, &[marshaled]);
        return match take_exception(env, wrapper.state().host_lock()) {
            Some(error) => Err(error),
            None => Ok(()),
        };
    }

    let mut stored = false;
    let pinned = env.with_primitive_array_critical(array, ReleaseMode::Commit, &mut |mut elements: ArrayElements<'_>| {
        stored = elements.set(index, marshaled);
    });
    if pinned && stored {
        Ok(())
    } else {
        Err(wrong_type())
    }
}

// ---- iteration ----

enum Source {
    Iterator(Arc<InstanceWrapper>),
    Array { array: Arc<InstanceWrapper>, index: usize },
}

/// Host iterator over a foreign iterator or array
///
/// Yields `Err` at most once, then stops.
pub struct ForeignIter {
    source: Source,
    done: bool,
}

impl ForeignIter {
    /// The underlying foreign iterator, if this is not an array walk
    pub fn foreign_iterator(&self) -> Option<&Arc<InstanceWrapper>> {
        match &self.source {
            Source::Iterator(it) => Some(it),
            Source::Array { .. } => None,
        }
    }
}

impl Iterator for ForeignIter {
    type Item = BridgeResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let step = match &mut self.source {
            Source::Iterator(it) => next(it),
            Source::Array { array, index } => match len(array) {
                Ok(n) if *index < n => {
                    *index += 1;
                    get_item(array, &Value::Int(*index as i64 - 1)).map(Some)
                }
                Ok(_) => Ok(None),
                Err(e) => Err(e),
            },
        };
        match step {
            Ok(Some(value)) => Some(Ok(value)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl std::fmt::Debug for ForeignIter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let source = match &self.source {
            Source::Iterator(it) => it.java_type().name().to_string(),
            Source::Array { index, .. } => format!("array at {}", index),
        };
        f.debug_struct("ForeignIter").field("source", &source).field("done", &self.done).finish()
    }
}

/// Iterate a foreign object
///
/// Maps iterate their keys. An iterator iterates itself.
pub fn iter(wrapper: &Arc<InstanceWrapper>) -> BridgeResult<ForeignIter> {
    let protocols = wrapper.java_type().protocols();
    let source = match protocols.container {
        Some(Container::Array(_)) => Source::Array {
            array: wrapper.clone(),
            index: 0,
        },
        Some(Container::Map) => {
            let keys = wrapper.invoke("keySet", &[])?;
            let keys = keys
                .as_object()
                .ok_or_else(|| BridgeError::TypeError(format!("keySet() returned {}", keys.type_name())))?;
            Source::Iterator(foreign_iterator(keys.invoke("iterator", &[])?)?)
        }
        _ if protocols.iterable => Source::Iterator(foreign_iterator(wrapper.invoke("iterator", &[])?)?),
        _ if protocols.iterator => Source::Iterator(wrapper.clone()),
        _ => return Err(unsupported(wrapper, "is not iterable")),
    };
    Ok(ForeignIter { source, done: false })
}

fn foreign_iterator(value: Value) -> BridgeResult<Arc<InstanceWrapper>> {
    match value {
        Value::Object(it) if it.java_type().protocols().iterator => Ok(it),
        other => Err(BridgeError::TypeError(format!(
            "iterator() returned non-iterator {}",
            other.type_name()
        ))),
    }
}

/// Advance a foreign iterator; `None` once exhausted
pub fn next(wrapper: &InstanceWrapper) -> BridgeResult<Option<Value>> {
    if !wrapper.java_type().protocols().iterator {
        return Err(unsupported(wrapper, "is not an iterator"));
    }
    if wrapper.java_type().has_method("hasNext") {
        if let Value::Bool(false) = wrapper.invoke("hasNext", &[])? {
            return Ok(None);
        }
    }

    let scope = scope(wrapper)?;
    let env = &**scope.env();
    let raw = wrapper.invoke_raw(env, "next", &[], None)?;
    if let Some(throwable) = env.exception_occurred() {
        let well_known = wrapper.state().well_known(env)?;
        let exhausted = env.is_instance_of(throwable, well_known.no_such_element);
        env.delete_local_ref(throwable);
        release_locals(env, &[raw]);
        if exhausted {
            env.exception_clear();
            return Ok(None);
        }
        return match take_exception(env, wrapper.state().host_lock()) {
            Some(error) => Err(error),
            None => Ok(None),
        };
    }
    jvalue_to_host(wrapper.state(), env, raw).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{ArrayData, ClassDef, SimValue, SimVm};
    use crate::Bridge;

    fn new_object(bridge: &Bridge, class: &str) -> Arc<InstanceWrapper> {
        let ty = bridge.resolve_class(class).unwrap();
        bridge.construct(&ty, &[], &[]).unwrap().as_object().unwrap().clone()
    }

    fn arrays_vm() -> Arc<SimVm> {
        let vm = SimVm::new();
        vm.heap()
            .define_class(
                ClassDef::new("demo.Arrays")
                    .static_method("ints", &[], "int[]", |heap, _, _| {
                        Ok(SimValue::Ref(Some(heap.new_array(ArrayData::Int(vec![1, 2, 3])))))
                    })
                    .static_method("flags", &[], "boolean[]", |heap, _, _| {
                        Ok(SimValue::Ref(Some(heap.new_array(ArrayData::Boolean(vec![false, true])))))
                    })
                    .static_method("strings", &[], "java.lang.String[]", |heap, _, _| {
                        let component = heap.class_by_name("java.lang.String").unwrap_or(heap.object_class());
                        let items = vec![Some(heap.new_string("x")), None];
                        Ok(SimValue::Ref(Some(heap.new_array(ArrayData::Object { component, items }))))
                    }),
            )
            .unwrap();
        vm
    }

    fn array(bridge: &Bridge, factory: &str) -> Arc<InstanceWrapper> {
        let ty = Value::Type(bridge.resolve_class("demo.Arrays").unwrap());
        bridge.invoke(&ty, factory, &[]).unwrap().as_object().unwrap().clone()
    }

    #[test]
    fn test_normalize_index() {
        assert_eq!(normalize_index(&Value::Int(-1), 3).unwrap(), 2);
        assert_eq!(normalize_index(&Value::Int(0), 3).unwrap(), 0);
        assert!(matches!(normalize_index(&Value::Int(3), 3), Err(BridgeError::IndexError(_))));
        assert!(matches!(normalize_index(&Value::Int(-4), 3), Err(BridgeError::IndexError(_))));
        assert!(matches!(normalize_index(&Value::str("0"), 3), Err(BridgeError::TypeError(_))));
    }

    #[test]
    fn test_list_protocol() {
        let bridge = Bridge::new(SimVm::new()).unwrap();
        let list = new_object(&bridge, "java.util.ArrayList");
        let other = new_object(&bridge, "java.util.ArrayList");
        other.invoke("add", &[Value::str("a")]).unwrap();
        other.invoke("add", &[Value::str("b")]).unwrap();

        assert_eq!(len(&list).unwrap(), 0);
        concat(&list, &Value::Object(other.clone())).unwrap();
        assert_eq!(len(&list).unwrap(), 2);
        assert_eq!(get_item(&list, &Value::Int(-1)).unwrap(), Value::str("b"));
        assert!(contains(&list, &Value::str("a")).unwrap());

        set_item(&list, &Value::Int(0), Some(&Value::str("z"))).unwrap();
        set_item(&list, &Value::Int(-1), None).unwrap();
        assert_eq!(len(&list).unwrap(), 1);
        assert_eq!(get_item(&list, &Value::Int(0)).unwrap(), Value::str("z"));
        assert_eq!(
            get_item(&list, &Value::Int(5)),
            Err(BridgeError::IndexError("Index out of range".to_string()))
        );
    }

    #[test]
    fn test_list_iteration() {
        let bridge = Bridge::new(SimVm::new()).unwrap();
        let list = new_object(&bridge, "java.util.ArrayList");
        for item in ["a", "b", "c"] {
            list.invoke("add", &[Value::str(item)]).unwrap();
        }
        let items: Vec<Value> = iter(&list).unwrap().collect::<BridgeResult<_>>().unwrap();
        assert_eq!(items, vec![Value::str("a"), Value::str("b"), Value::str("c")]);
    }

    #[test]
    fn test_iterator_exhaustion() {
        let bridge = Bridge::new(SimVm::new()).unwrap();
        let list = new_object(&bridge, "java.util.ArrayList");
        list.invoke("add", &[Value::None]).unwrap();
        let it = list.invoke("iterator", &[]).unwrap().as_object().unwrap().clone();

        assert_eq!(next(&it).unwrap(), Some(Value::None));
        assert_eq!(next(&it).unwrap(), None);
        assert_eq!(next(&it).unwrap(), None);
        assert!(matches!(next(&list), Err(BridgeError::TypeError(_))));
    }

    #[test]
    fn test_set_protocol() {
        let bridge = Bridge::new(SimVm::new()).unwrap();
        let set = new_object(&bridge, "java.util.HashSet");
        set.invoke("add", &[Value::Int(7)]).unwrap();
        set.invoke("add", &[Value::Int(7)]).unwrap();
        assert_eq!(len(&set).unwrap(), 1);
        assert!(contains(&set, &Value::Int(7)).unwrap());
        assert!(!contains(&set, &Value::Int(8)).unwrap());
        assert!(matches!(get_item(&set, &Value::Int(0)), Err(BridgeError::TypeError(_))));
    }

    #[test]
    fn test_int_array() {
        let bridge = Bridge::new(arrays_vm()).unwrap();
        let ints = array(&bridge, "ints");
        assert_eq!(len(&ints).unwrap(), 3);
        assert_eq!(get_item(&ints, &Value::Int(-1)).unwrap(), Value::Int(3));

        set_item(&ints, &Value::Int(0), Some(&Value::Int(10))).unwrap();
        assert_eq!(get_item(&ints, &Value::Int(0)).unwrap(), Value::Int(10));

        assert_eq!(
            set_item(&ints, &Value::Int(1), Some(&Value::str("x"))),
            Err(BridgeError::TypeError("wrong type for array".to_string()))
        );
        assert_eq!(get_item(&ints, &Value::Int(1)).unwrap(), Value::Int(2));
        assert!(matches!(get_item(&ints, &Value::Int(3)), Err(BridgeError::IndexError(_))));
        assert_eq!(
            set_item(&ints, &Value::Int(0), None),
            Err(BridgeError::Runtime("cannot change length of a java array".to_string()))
        );

        let items: Vec<Value> = iter(&ints).unwrap().collect::<BridgeResult<_>>().unwrap();
        assert_eq!(items, vec![Value::Int(10), Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn test_boolean_array_rejects_integers() {
        let bridge = Bridge::new(arrays_vm()).unwrap();
        let flags = array(&bridge, "flags");
        assert_eq!(get_item(&flags, &Value::Int(1)).unwrap(), Value::Bool(true));
        assert!(matches!(
            set_item(&flags, &Value::Int(0), Some(&Value::Int(1))),
            Err(BridgeError::TypeError(_))
        ));
        set_item(&flags, &Value::Int(0), Some(&Value::Bool(true))).unwrap();
        assert_eq!(get_item(&flags, &Value::Int(0)).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_object_array() {
        let bridge = Bridge::new(arrays_vm()).unwrap();
        let strings = array(&bridge, "strings");
        assert_eq!(get_item(&strings, &Value::Int(0)).unwrap(), Value::str("x"));
        assert_eq!(get_item(&strings, &Value::Int(1)).unwrap(), Value::None);

        set_item(&strings, &Value::Int(1), Some(&Value::str("y"))).unwrap();
        assert_eq!(get_item(&strings, &Value::Int(-1)).unwrap(), Value::str("y"));
        assert!(matches!(
            set_item(&strings, &Value::Int(0), Some(&Value::Int(1))),
            Err(BridgeError::TypeError(_))
        ));
    }
}
