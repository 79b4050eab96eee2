//! Integration tests for runtime handles, resources and bridge services
//!
//! Tests cover:
//! - Thread attachment and scope nesting
//! - Missing runtime
//! - Global reference accounting for wrappers and types
//! - Named objects
//! - Casting, class objects, symbols and comparison

use jbridge_core::foreign::ForeignEnv;
use jbridge_core::sim::{ClassDef, SimVm};
use jbridge_core::{Bridge, BridgeError, BridgeOptions, CompareOp, FatalPolicy, Value};
use std::sync::Arc;

fn bridge(vm: &Arc<SimVm>) -> Bridge {
    Bridge::with_options(vm.clone(), BridgeOptions::default().with_fatal_policy(FatalPolicy::Panic)).unwrap()
}

fn new_list(bridge: &Bridge, items: &[&str]) -> Value {
    let ty = bridge.resolve_class("java.util.ArrayList").unwrap();
    let list = bridge.construct(&ty, &[], &[]).unwrap();
    for item in items {
        bridge.invoke(&list, "add", &[Value::str(item)]).unwrap();
    }
    list
}

// ===== Handles =====

#[test]
fn test_scope_attaches_once() {
    let vm = SimVm::new();
    std::thread::spawn(move || {
        let bridge = bridge(&vm);
        let attached = vm.attach_count();
        let detached = vm.detach_count();

        bridge.enter().unwrap();
        let list = new_list(&bridge, &["a", "b"]);
        assert_eq!(bridge.invoke(&list, "size", &[]).unwrap(), Value::Int(2));
        assert_eq!(vm.attach_count(), attached + 1);
        drop(list);
        bridge.exit();

        assert_eq!(vm.detach_count(), detached + 1);
    })
    .join()
    .unwrap();
}

#[test]
fn test_external_attachment_is_left_alone() {
    let vm = SimVm::new();
    std::thread::spawn(move || {
        vm.attach_external();
        let bridge = bridge(&vm);
        let list = new_list(&bridge, &["x"]);
        assert_eq!(bridge.invoke(&list, "size", &[]).unwrap(), Value::Int(1));
        assert_eq!(vm.attach_count(), 0);
        assert_eq!(vm.detach_count(), 0);
    })
    .join()
    .unwrap();
}

#[test]
fn test_missing_runtime() {
    let vm = SimVm::new();
    let bridge = bridge(&vm);
    let list_type = bridge.resolve_class("java.util.ArrayList").unwrap();

    vm.set_available(false);
    assert_eq!(bridge.resolve_class("java.lang.String").err(), Some(BridgeError::NoRuntime));
    assert_eq!(bridge.construct(&list_type, &[], &[]).err(), Some(BridgeError::NoRuntime));
    vm.set_available(true);

    assert!(bridge.construct(&list_type, &[], &[]).is_ok());
}

#[test]
#[should_panic(expected = "foreign exception pending")]
fn test_exception_left_pending_is_fatal() {
    let vm = SimVm::new();
    let bridge = bridge(&vm);
    let scope = bridge.scope().unwrap();
    scope.throw_new("java/lang/IllegalStateException", "left behind");
    drop(scope);
}

// ===== Resources =====

#[test]
fn test_wrappers_release_global_refs() {
    let vm = SimVm::new();
    let bridge = bridge(&vm);
    let list_type = bridge.resolve_class("java.util.ArrayList").unwrap();
    let baseline = vm.global_ref_count();

    let lists: Vec<Value> = (0..10)
        .map(|_| bridge.construct(&list_type, &[], &[]).unwrap())
        .collect();
    assert_eq!(vm.global_ref_count(), baseline + 10);
    assert_eq!(bridge.stats().wrappers, 10);

    let first = lists[0].as_object().unwrap().clone();
    first.release();
    assert_eq!(vm.global_ref_count(), baseline + 9);
    assert_eq!(
        first.invoke("size", &[]),
        Err(BridgeError::Runtime("Tried to access a deleted java object".to_string()))
    );

    drop(lists);
    drop(first);
    assert_eq!(vm.global_ref_count(), baseline);
    assert_eq!(bridge.stats().wrappers, 0);
}

#[test]
fn test_bridge_teardown_releases_everything() {
    let vm = SimVm::new();
    let before = vm.global_ref_count();
    {
        let bridge = bridge(&vm);
        let list = new_list(&bridge, &["a"]);
        assert_eq!(bridge.invoke(&list, "get", &[Value::Int(0)]).unwrap(), Value::str("a"));
        assert!(vm.global_ref_count() > before);
    }
    assert_eq!(vm.global_ref_count(), before);
}

#[test]
fn test_gc_after_wrappers_drop() {
    let vm = SimVm::new();
    vm.heap()
        .define_class(ClassDef::new("demo.Temp").field("value", "int"))
        .unwrap();
    let bridge = bridge(&vm);

    let temp_type = bridge.resolve_class("demo.Temp").unwrap();
    let temp = bridge.construct(&temp_type, &[], &[]).unwrap();
    drop(temp_type);

    // The live wrapper keeps its type
    bridge.reset().unwrap();
    let types = bridge.stats().types;
    assert_eq!(bridge.read_field(&temp, "value").unwrap(), Value::Int(0));

    drop(temp);
    assert!(bridge.reset().unwrap() >= 1);
    assert!(bridge.stats().types < types);

    let again = bridge.resolve_class("demo.Temp").unwrap();
    assert!(again.is_ready());
}

// ===== Named objects =====

#[test]
fn test_named_objects() {
    let vm = SimVm::new();
    let bridge = bridge(&vm);
    let heap = vm.heap();

    let greeting = heap.new_local_ref(heap.new_string("hello"));
    let list = heap.new_local_ref(heap.new_list(Vec::new()));
    bridge.register_named_object("greeting", Some(greeting)).unwrap();
    bridge.register_named_object("list", Some(list)).unwrap();

    assert_eq!(bridge.named_object("greeting"), Some(Value::str("hello")));
    let wrapped = bridge.named_object("list").unwrap();
    assert_eq!(bridge.invoke(&wrapped, "size", &[]).unwrap(), Value::Int(0));
    assert_eq!(bridge.stats().named_objects, 2);

    let mut names: Vec<String> = bridge.named_objects().into_iter().map(|(name, _)| name).collect();
    names.sort();
    assert_eq!(names, vec!["greeting".to_string(), "list".to_string()]);

    bridge.register_named_object("greeting", None).unwrap();
    assert_eq!(bridge.named_object("greeting"), None);
    assert_eq!(bridge.stats().named_objects, 1);
}

// ===== Casting and reflection =====

#[test]
fn test_cast_bypasses_converters() {
    let vm = SimVm::new();
    let bridge = bridge(&vm);
    let object_type = bridge.resolve_class("java.lang.Object").unwrap();
    let string_type = bridge.resolve_class("java.lang.String").unwrap();

    let text = bridge.cast(&object_type, &Value::str("abc")).unwrap();
    let text = text.as_object().unwrap();
    assert!(Arc::ptr_eq(text.java_type(), &string_type));
    assert_eq!(text.invoke("length", &[]).unwrap(), Value::Int(3));
    assert_eq!(text.to_display_string().unwrap(), "abc");

    let int_type = bridge.resolve_class("java.lang.Integer").unwrap();
    assert!(matches!(
        bridge.cast(&int_type, &Value::str("abc")),
        Err(BridgeError::TypeError(_))
    ));
    assert_eq!(bridge.cast(&object_type, &Value::None).unwrap(), Value::None);
}

#[test]
fn test_cast_to_primitive_is_rejected() {
    let vm = SimVm::new();
    let bridge = bridge(&vm);
    let int_type = bridge.resolve_class("int").unwrap();
    assert!(int_type.is_primitive());
    assert_eq!(
        bridge.cast(&int_type, &Value::Int(1)),
        Err(BridgeError::TypeError(
            "explicit conversion to primitive type is not supported".to_string()
        ))
    );
}

#[test]
fn test_class_objects_and_symbols() {
    let vm = SimVm::new();
    let bridge = bridge(&vm);
    let list_type = bridge.resolve_class("java.util.ArrayList").unwrap();

    let class_object = bridge.type_as_class_object(&list_type).unwrap();
    let class_type = bridge.resolve_class("java.lang.Class").unwrap();
    assert!(Arc::ptr_eq(class_object.as_object().unwrap().java_type(), &class_type));

    // A class object crossing back becomes its type again
    let env = bridge.scope().unwrap();
    let raw = class_object.as_object().unwrap().obj_ref().unwrap();
    assert_eq!(bridge.wrap_foreign(Some(raw)).unwrap(), Value::Type(list_type.clone()));
    drop(env);

    let symbols = bridge.symbols(&Value::Type(list_type)).unwrap();
    let symbols = symbols.as_tuple().unwrap();
    for name in ["add", "size", "get", "iterator"] {
        assert!(symbols.contains(&Value::str(name)), "missing {}", name);
    }
    assert!(!symbols.contains(&Value::str("<init>")));
}

#[test]
fn test_rich_comparison() {
    let vm = SimVm::new();
    let bridge = bridge(&vm);

    let a = new_list(&bridge, &["x"]);
    let b = new_list(&bridge, &["x"]);
    let c = new_list(&bridge, &["y"]);
    let a = a.as_object().unwrap();

    assert_eq!(a.rich_compare(&b, CompareOp::Eq).unwrap(), Value::Bool(true));
    assert_eq!(a.rich_compare(&c, CompareOp::Eq).unwrap(), Value::Bool(false));
    assert_eq!(a.rich_compare(&c, CompareOp::Ne).unwrap(), Value::Bool(true));
    assert_eq!(a.rich_compare(&Value::Object(a.clone()), CompareOp::Le).unwrap(), Value::Bool(true));
    assert_eq!(a.rich_compare(&Value::Object(a.clone()), CompareOp::Lt).unwrap(), Value::Bool(false));
    assert_eq!(a.rich_compare(&c, CompareOp::Lt).unwrap(), Value::NotImplemented);

    let object_type = bridge.resolve_class("java.lang.Object").unwrap();
    let banana = bridge.cast(&object_type, &Value::str("banana")).unwrap();
    let banana = banana.as_object().unwrap();
    assert_eq!(banana.rich_compare(&Value::str("apple"), CompareOp::Gt).unwrap(), Value::Bool(true));
    assert_eq!(banana.rich_compare(&Value::str("cherry"), CompareOp::Ge).unwrap(), Value::Bool(false));
}

#[test]
fn test_stats_display() {
    let vm = SimVm::new();
    let bridge = bridge(&vm);
    let _list = new_list(&bridge, &[]);
    let stats = bridge.stats();
    assert_eq!(stats.wrappers, 1);
    assert!(stats.types > 0);
    assert!(stats.interned > 0);
    assert!(!stats.to_string().is_empty());
}

#[test]
fn test_env_is_shared_within_scope() {
    let vm = SimVm::new();
    let bridge = bridge(&vm);
    let outer = bridge.scope().unwrap();
    let inner = bridge.scope().unwrap();
    assert!(Arc::ptr_eq(outer.env(), inner.env()));
    assert!(!inner.exception_check());
}
