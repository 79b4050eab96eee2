//! Integration tests for the core bridge guarantees
//!
//! Tests cover:
//! - Type cache singletons, including mutually referencing classes
//! - Wrapper dedup
//! - Primitive round trips through fields
//! - Overload resolution by arity and by argument kind
//! - Decoration inheritance and propagation
//! - Exception translation
//! - Array bounds and element kinds
//! - The map protocol

use jbridge_core::protocol;
use jbridge_core::sim::{ArrayData, ClassDef, Payload, SimValue, SimVm};
use jbridge_core::{
    Bridge, BridgeError, BridgeOptions, Callable, DecorationKind, ForeignEnv, HostLock, J2pFn, ObjRef, P2jFn, Value,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

fn string_arg(heap: &jbridge_core::sim::SimHeap, args: &[SimValue], i: usize) -> String {
    args.get(i)
        .and_then(SimValue::as_obj)
        .and_then(|s| heap.string(s))
        .unwrap_or_default()
}

fn new_str(heap: &jbridge_core::sim::SimHeap, s: &str) -> Result<SimValue, jbridge_core::sim::ObjId> {
    Ok(SimValue::Ref(Some(heap.new_string(s))))
}

// ===== Type cache =====

#[test]
fn test_cache_singleton_with_mutual_references() -> anyhow::Result<()> {
    let vm = SimVm::new();
    vm.heap().define_classes(vec![
        ClassDef::new("demo.Husband").field("wife", "demo.Wife"),
        ClassDef::new("demo.Wife").field("husband", "demo.Husband"),
    ])?;
    let bridge = Bridge::new(vm)?;

    let husband = bridge.resolve_class("demo.Husband")?;
    let wife = bridge.resolve_class("demo/Wife")?;
    assert!(Arc::ptr_eq(&husband, &bridge.resolve_class("demo.Husband")?));
    assert!(Arc::ptr_eq(&wife, &bridge.resolve_class("demo.Wife")?));
    assert!(husband.is_ready());
    assert!(wife.is_ready());

    let types = bridge.stats().types;
    bridge.resolve_class("demo.Wife")?;
    assert_eq!(bridge.stats().types, types);
    Ok(())
}

#[test]
fn test_unknown_class() {
    let bridge = Bridge::new(SimVm::new()).unwrap();
    assert!(matches!(
        bridge.resolve_class("demo.Missing"),
        Err(BridgeError::ClassNotFound(_))
    ));
}

// ===== Dedup =====

#[test]
fn test_dedup_returns_same_wrapper() -> anyhow::Result<()> {
    let bridge = Bridge::new(SimVm::new())?;
    let map_type = bridge.resolve_class("java.util.HashMap")?;
    let list_type = bridge.resolve_class("java.util.ArrayList")?;
    let map = bridge.construct(&map_type, &[], &[])?;
    let list = bridge.construct(&list_type, &[], &[])?;

    bridge.invoke(&map, "put", &[Value::str("k"), list.clone()])?;
    let a = bridge.invoke(&map, "get", &[Value::str("k")])?;
    let b = bridge.invoke(&map, "get", &[Value::str("k")])?;
    assert_eq!(a, list);
    assert_eq!(a, b);

    let plain = bridge.undecorated(&list)?;
    assert_ne!(plain, list);
    assert_eq!(bridge.stats().wrappers, 2);
    Ok(())
}

// ===== Primitives =====

fn primitives_vm() -> Arc<SimVm> {
    let vm = SimVm::new();
    vm.heap()
        .define_class(
            ClassDef::new("demo.Primitives")
                .static_field("z", "boolean")
                .static_field("b", "byte")
                .static_field("s", "short")
                .static_field("i", "int")
                .static_field("j", "long")
                .static_field("c", "char")
                .static_field("f", "float")
                .static_field("d", "double")
                .static_field("text", "java.lang.String")
                .static_field("boxed", "java.lang.Object"),
        )
        .unwrap();
    vm
}

#[test]
fn test_primitive_round_trip() -> anyhow::Result<()> {
    let bridge = Bridge::new(primitives_vm())?;
    let ty = Value::Type(bridge.resolve_class("demo.Primitives")?);

    let cases = [
        ("z", Value::Bool(true)),
        ("b", Value::Int(-128)),
        ("s", Value::Int(32767)),
        ("i", Value::Int(i32::MIN as i64)),
        ("j", Value::Int(i64::MAX)),
        ("c", Value::str("λ")),
        ("f", Value::Float(1.5)),
        ("d", Value::Float(0.1)),
        ("text", Value::str("hello")),
    ];
    for (field, value) in cases {
        bridge.write_field(&ty, field, value.clone())?;
        assert_eq!(bridge.read_field(&ty, field)?, value, "field {}", field);
    }

    // A code unit number is accepted for char and reads back as text
    bridge.write_field(&ty, "c", Value::Int(65))?;
    assert_eq!(bridge.read_field(&ty, "c")?, Value::str("A"));
    Ok(())
}

#[test]
fn test_primitive_range_checks() {
    let bridge = Bridge::new(primitives_vm()).unwrap();
    let ty = Value::Type(bridge.resolve_class("demo.Primitives").unwrap());

    for (field, value) in [
        ("b", Value::Int(128)),
        ("s", Value::Int(-32769)),
        ("i", Value::Int(1 << 31)),
        ("c", Value::Int(-1)),
        ("c", Value::str("ab")),
        ("z", Value::Int(1)),
        ("d", Value::Int(1)),
        ("f", Value::Float(1e300)),
    ] {
        assert!(
            matches!(bridge.write_field(&ty, field, value.clone()), Err(BridgeError::TypeError(_))),
            "{} accepted {:?}",
            field,
            value
        );
    }
}

#[test]
fn test_boxed_values_convert_back() -> anyhow::Result<()> {
    let bridge = Bridge::new(primitives_vm())?;
    let ty = Value::Type(bridge.resolve_class("demo.Primitives")?);
    for value in [Value::Int(7), Value::Bool(false), Value::Float(2.25), Value::str("s")] {
        bridge.write_field(&ty, "boxed", value.clone())?;
        assert_eq!(bridge.read_field(&ty, "boxed")?, value);
    }
    Ok(())
}

// ===== Overloads =====

fn greeter_vm() -> Arc<SimVm> {
    let vm = SimVm::new();
    vm.heap()
        .define_class(
            ClassDef::new("demo.Greeter")
                .static_method("greet", &[], "java.lang.String", |heap, _, _| new_str(heap, "hello"))
                .static_method("greet", &["java.lang.String"], "java.lang.String", |heap, _, args| {
                    new_str(heap, &format!("hello {}", string_arg(heap, args, 0)))
                })
                .static_method("greet", &["java.lang.String", "int"], "java.lang.String", |heap, _, args| {
                    let times = args.get(1).and_then(SimValue::as_int).unwrap_or(0);
                    new_str(heap, &format!("hello {}", string_arg(heap, args, 0)).repeat(times as usize))
                })
                .static_method("describe", &["int"], "java.lang.String", |heap, _, _| new_str(heap, "int"))
                .static_method("describe", &["java.lang.String"], "java.lang.String", |heap, _, _| {
                    new_str(heap, "string")
                })
                .method("name", &[], "java.lang.String", |heap, _, _| new_str(heap, "instance")),
        )
        .unwrap();
    vm
}

#[test]
fn test_overload_by_arity() -> anyhow::Result<()> {
    let bridge = Bridge::new(greeter_vm())?;
    let ty = Value::Type(bridge.resolve_class("demo.Greeter")?);

    assert_eq!(bridge.invoke(&ty, "greet", &[])?, Value::str("hello"));
    assert_eq!(bridge.invoke(&ty, "greet", &[Value::str("ann")])?, Value::str("hello ann"));
    assert_eq!(
        bridge.invoke(&ty, "greet", &[Value::str("bo"), Value::Int(2)])?,
        Value::str("hello bohello bo")
    );
    assert_eq!(
        bridge.invoke(&ty, "greet", &[Value::None, Value::None, Value::None]),
        Err(BridgeError::Lookup("no method found".to_string()))
    );
    Ok(())
}

#[test]
fn test_overload_by_argument_kind() -> anyhow::Result<()> {
    let bridge = Bridge::new(greeter_vm())?;
    let ty = Value::Type(bridge.resolve_class("demo.Greeter")?);

    assert_eq!(bridge.invoke(&ty, "describe", &[Value::Int(1)])?, Value::str("int"));
    assert_eq!(bridge.invoke(&ty, "describe", &[Value::str("x")])?, Value::str("string"));
    assert!(matches!(
        bridge.invoke(&ty, "describe", &[Value::Float(1.0)]),
        Err(BridgeError::Lookup(_))
    ));
    Ok(())
}

#[test]
fn test_instance_method_needs_receiver() -> anyhow::Result<()> {
    let bridge = Bridge::new(greeter_vm())?;
    let ty = bridge.resolve_class("demo.Greeter")?;

    assert!(!bridge.has_method(&Value::Type(ty.clone()), "name")?);
    assert!(bridge.has_method(&Value::Type(ty.clone()), "greet")?);
    assert!(matches!(
        bridge.invoke(&Value::Type(ty.clone()), "name", &[]),
        Err(BridgeError::Lookup(_))
    ));

    let greeter = bridge.construct(&ty, &[], &[])?;
    assert!(bridge.has_method(&greeter, "name")?);
    assert_eq!(bridge.invoke(&greeter, "name", &[])?, Value::str("instance"));
    Ok(())
}

// ===== Decorations =====

fn hierarchy_vm() -> Arc<SimVm> {
    let vm = SimVm::new();
    vm.heap()
        .define_classes(vec![
            ClassDef::new("demo.Base"),
            ClassDef::new("demo.Mid").extends("demo.Base"),
            ClassDef::new("demo.Leaf").extends("demo.Mid"),
            ClassDef::new("demo.Late").extends("demo.Base"),
        ])
        .unwrap();
    vm
}

fn tagged(tag: &'static str) -> Callable {
    Callable::new(tag, move |args, _| {
        assert!(args.len() >= 2);
        Ok(Value::str(tag))
    })
}

#[test]
fn test_decoration_inheritance() -> anyhow::Result<()> {
    let bridge = Bridge::new(hierarchy_vm())?;
    let base = bridge.resolve_class("demo.Base")?;
    let mid = bridge.resolve_class("demo.Mid")?;
    let leaf_type = bridge.resolve_class("demo.Leaf")?;
    let leaf = bridge.construct(&leaf_type, &[], &[])?;
    let leaf = leaf.as_object().unwrap();

    bridge.set_call_decoration(&base, Some(tagged("base")));
    assert_eq!(leaf.call(&[], &[])?, Value::str("base"));

    bridge.set_call_decoration(&mid, Some(tagged("mid")));
    assert_eq!(leaf.call(&[], &[])?, Value::str("mid"));
    assert!(!leaf_type.has_own_decoration(DecorationKind::Call));

    // Re-decorating the base does not override the closer decoration
    bridge.set_call_decoration(&base, Some(tagged("base2")));
    assert_eq!(leaf.call(&[], &[])?, Value::str("mid"));

    bridge.set_call_decoration(&mid, None);
    assert_eq!(leaf.call(&[], &[])?, Value::str("base2"));

    // Types synthesized later pick up the decoration too
    let late_type = bridge.resolve_class("demo.Late")?;
    let late = bridge.construct(&late_type, &[], &[])?;
    assert_eq!(late.as_object().unwrap().call(&[], &[])?, Value::str("base2"));

    bridge.set_call_decoration(&base, None);
    assert_eq!(
        leaf.call(&[], &[]),
        Err(BridgeError::TypeError("Not callable.".to_string()))
    );
    Ok(())
}

#[test]
fn test_call_decoration_arguments() -> anyhow::Result<()> {
    let bridge = Bridge::new(hierarchy_vm())?;
    let base = bridge.resolve_class("demo.Base")?;
    bridge.set_call_decoration(
        &base,
        Some(Callable::new("call", |args, kwargs| {
            let this = args[0].as_object().unwrap();
            let plain = args[1].as_object().unwrap();
            assert!(!this.is_undecorated());
            assert!(plain.is_undecorated());
            assert_eq!(this.identity_hash(), plain.identity_hash());
            Ok(Value::tuple(vec![
                Value::Int(args.len() as i64 - 2),
                Value::Int(kwargs.len() as i64),
            ]))
        })),
    );
    let obj = bridge.construct(&base, &[], &[])?;
    let result = obj
        .as_object()
        .unwrap()
        .call(&[Value::Int(1), Value::Int(2)], &[("k".to_string(), Value::None)])?;
    assert_eq!(result, Value::tuple(vec![Value::Int(2), Value::Int(1)]));
    Ok(())
}

#[test]
fn test_setattr_decoration() -> anyhow::Result<()> {
    let vm = SimVm::new();
    vm.heap().define_class(ClassDef::new("demo.Bag").field("size", "int"))?;
    let bridge = Bridge::new(vm)?;
    let bag_type = bridge.resolve_class("demo.Bag")?;
    bridge.set_setattr_decoration(
        &bag_type,
        Some(Callable::new("setattr", |args, _| {
            let plain = args[1].as_object().unwrap();
            let name = args[2].as_str().unwrap_or_default();
            match args.get(3) {
                Some(Value::Int(n)) => plain.set_attr(name, Some(&Value::Int(n * 10)))?,
                Some(other) => plain.set_attr(name, Some(other))?,
                None => plain.set_attr(name, Some(&Value::Int(0)))?,
            }
            Ok(Value::None)
        })),
    );
    let bag = bridge.construct(&bag_type, &[], &[])?;
    let bag = bag.as_object().unwrap();

    bag.set_attr("size", Some(&Value::Int(4)))?;
    assert_eq!(bag.get_attr("size")?, Value::Int(40));
    bag.set_attr("size", None)?;
    assert_eq!(bag.get_attr("size")?, Value::Int(0));
    Ok(())
}

// ===== Exceptions =====

fn thrower_vm() -> Arc<SimVm> {
    let vm = SimVm::new();
    vm.heap()
        .define_class(
            ClassDef::new("demo.Thrower")
                .static_method("fail", &["java.lang.String"], "void", |heap, _, args| {
                    Err(heap.exception("java.lang.RuntimeException", &string_arg(heap, args, 0)))
                })
                .static_method("ok", &[], "int", |_, _, _| Ok(SimValue::Int(1))),
        )
        .unwrap();
    vm
}

#[test]
fn test_exception_translation() -> anyhow::Result<()> {
    let bridge = Bridge::new(thrower_vm())?;
    let ty = Value::Type(bridge.resolve_class("demo.Thrower")?);

    let expected = BridgeError::ForeignException("java.lang.RuntimeException: boom".to_string());
    assert_eq!(bridge.invoke(&ty, "fail", &[Value::str("boom")]), Err(expected.clone()));
    // Nothing stays pending: the same call fails the same way, others succeed
    assert_eq!(bridge.invoke(&ty, "fail", &[Value::str("boom")]), Err(expected));
    assert_eq!(bridge.invoke(&ty, "ok", &[])?, Value::Int(1));

    assert_eq!(
        bridge.invoke(&ty, "fail", &[Value::str("first\nsecond\nthird")]),
        Err(BridgeError::ForeignException(
            "java.lang.RuntimeException: first second third".to_string()
        ))
    );
    Ok(())
}

#[test]
fn test_exception_from_constructor() -> anyhow::Result<()> {
    let vm = SimVm::new();
    vm.heap().define_class(ClassDef::new("demo.Picky").constructor(&["int"], |heap, _, args| {
        match args.first().and_then(SimValue::as_int) {
            Some(n) if n >= 0 => Ok(SimValue::Void),
            _ => Err(heap.exception("java.lang.IllegalArgumentException", "negative")),
        }
    }))?;
    let bridge = Bridge::new(vm)?;
    let ty = bridge.resolve_class("demo.Picky")?;

    assert!(bridge.construct(&ty, &[Value::Int(1)], &[])?.as_object().is_some());
    assert_eq!(
        bridge.construct(&ty, &[Value::Int(-1)], &[]),
        Err(BridgeError::ForeignException(
            "java.lang.IllegalArgumentException: negative".to_string()
        ))
    );
    assert!(matches!(
        bridge.construct(&ty, &[], &[("n".to_string(), Value::Int(1))]),
        Err(BridgeError::TypeError(_))
    ));
    Ok(())
}

/// Host lock that remembers whether it is currently held
struct HeldLock(AtomicBool);

impl HeldLock {
    fn held(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl HostLock for HeldLock {
    fn release(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    fn acquire(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[test]
fn test_exception_rendering_yields_host_lock() -> anyhow::Result<()> {
    let lock = Arc::new(HeldLock(AtomicBool::new(true)));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (in_shout, in_render) = ((lock.clone(), seen.clone()), (lock.clone(), seen.clone()));

    let vm = SimVm::new();
    vm.heap().define_classes(vec![
        ClassDef::new("demo.Loud")
            .extends("java.lang.RuntimeException")
            .method("toString", &[], "java.lang.String", move |heap, _, _| {
                in_render.1.lock().push(("toString", in_render.0.held()));
                new_str(heap, "LOUD")
            }),
        ClassDef::new("demo.Shouter").static_method("shout", &[], "void", move |heap, _, _| {
            in_shout.1.lock().push(("shout", in_shout.0.held()));
            Err(heap.exception("demo.Loud", "ignored"))
        }),
    ])?;
    let bridge = Bridge::with_options(vm, BridgeOptions::default().with_host_lock(lock.clone()))?;
    let shouter = Value::Type(bridge.resolve_class("demo.Shouter")?);

    assert_eq!(
        bridge.invoke(&shouter, "shout", &[]),
        Err(BridgeError::ForeignException("LOUD".to_string()))
    );
    assert_eq!(*seen.lock(), vec![("shout", false), ("toString", false)]);
    assert!(lock.held());
    Ok(())
}

// ===== Arrays =====

fn arrays_vm() -> Arc<SimVm> {
    let vm = SimVm::new();
    vm.heap()
        .define_class(
            ClassDef::new("demo.Buffers")
                .static_method("doubles", &[], "double[]", |heap, _, _| {
                    Ok(SimValue::Ref(Some(heap.new_array(ArrayData::Double(vec![0.5, 1.5])))))
                })
                .static_method("chars", &[], "char[]", |heap, _, _| {
                    Ok(SimValue::Ref(Some(heap.new_array(ArrayData::Char(vec![104, 105])))))
                }),
        )
        .unwrap();
    vm
}

#[test]
fn test_array_bounds_and_kinds() -> anyhow::Result<()> {
    let bridge = Bridge::new(arrays_vm())?;
    let ty = Value::Type(bridge.resolve_class("demo.Buffers")?);
    let doubles = bridge.invoke(&ty, "doubles", &[])?;
    let doubles = doubles.as_object().unwrap();

    assert_eq!(protocol::len(doubles)?, 2);
    assert_eq!(protocol::get_item(doubles, &Value::Int(-2))?, Value::Float(0.5));
    assert_eq!(
        protocol::get_item(doubles, &Value::Int(2)),
        Err(BridgeError::IndexError("Index out of range".to_string()))
    );
    assert_eq!(
        protocol::set_item(doubles, &Value::Int(-3), Some(&Value::Float(1.0))),
        Err(BridgeError::IndexError("Index out of range".to_string()))
    );
    assert_eq!(
        protocol::set_item(doubles, &Value::Int(0), Some(&Value::Int(1))),
        Err(BridgeError::TypeError("wrong type for array".to_string()))
    );
    assert_eq!(protocol::get_item(doubles, &Value::Int(0))?, Value::Float(0.5));

    protocol::set_item(doubles, &Value::Int(1), Some(&Value::Float(9.0)))?;
    assert_eq!(protocol::get_item(doubles, &Value::Int(1))?, Value::Float(9.0));

    let chars = bridge.invoke(&ty, "chars", &[])?;
    let chars = chars.as_object().unwrap();
    protocol::set_item(chars, &Value::Int(0), Some(&Value::str("H")))?;
    let text: Vec<Value> = protocol::iter(chars)?.collect::<Result<_, _>>()?;
    assert_eq!(text, vec![Value::str("H"), Value::str("i")]);
    Ok(())
}

// ===== Map protocol =====

#[test]
fn test_map_protocol() -> anyhow::Result<()> {
    let bridge = Bridge::new(SimVm::new())?;
    let map_type = bridge.resolve_class("java.util.HashMap")?;
    let map = bridge.construct(&map_type, &[], &[])?;
    let map = map.as_object().unwrap();

    protocol::set_item(map, &Value::str("one"), Some(&Value::Int(1)))?;
    protocol::set_item(map, &Value::str("two"), Some(&Value::Int(2)))?;
    protocol::set_item(map, &Value::str("one"), Some(&Value::Int(11)))?;
    assert_eq!(protocol::len(map)?, 2);
    assert_eq!(protocol::get_item(map, &Value::str("one"))?, Value::Int(11));
    assert_eq!(protocol::get_item(map, &Value::str("three"))?, Value::None);
    assert!(protocol::contains(map, &Value::str("two"))?);

    let keys: Vec<Value> = protocol::iter(map)?.collect::<Result<_, _>>()?;
    assert_eq!(keys, vec![Value::str("one"), Value::str("two")]);

    protocol::set_item(map, &Value::str("one"), None)?;
    assert_eq!(protocol::len(map)?, 1);
    assert!(!protocol::contains(map, &Value::str("one"))?);
    Ok(())
}

// ===== Registered conversions =====

fn tokens_vm() -> Arc<SimVm> {
    let vm = SimVm::new();
    vm.heap()
        .define_classes(vec![
            ClassDef::new("demo.Token").field("id", "int"),
            ClassDef::new("demo.SpecialToken").extends("demo.Token"),
            ClassDef::new("demo.Tokens")
                .static_method("make", &["int"], "demo.Token", |heap, _, args| {
                    let class = heap.class_by_name("demo.Token").unwrap_or(heap.object_class());
                    let token = heap.alloc(class, Payload::None);
                    heap.set_field(token, "id", args[0]);
                    Ok(SimValue::Ref(Some(token)))
                })
                .static_method("special", &[], "demo.SpecialToken", |heap, _, _| {
                    let class = heap.class_by_name("demo.SpecialToken").unwrap_or(heap.object_class());
                    Ok(SimValue::Ref(Some(heap.alloc(class, Payload::None))))
                })
                .static_method("id", &["demo.Token"], "int", |heap, _, args| {
                    let token = args.first().and_then(SimValue::as_obj);
                    Ok(token.and_then(|t| heap.field(t, "id")).unwrap_or(SimValue::Int(-1)))
                }),
        ])
        .unwrap();
    vm
}

#[test]
fn test_registered_conversion() -> anyhow::Result<()> {
    let vm = tokens_vm();
    let bridge = Bridge::new(vm.clone())?;
    let tokens = Value::Type(bridge.resolve_class("demo.Tokens")?);
    let token_type = bridge.resolve_class("demo.Token")?;

    // Without converters a token crosses as a wrapper
    let raw = bridge.invoke(&tokens, "make", &[Value::Int(7)])?;
    assert!(raw.as_object().is_some());
    assert_eq!(bridge.invoke(&tokens, "id", &[raw])?, Value::Int(7));
    assert!(matches!(
        bridge.invoke(&tokens, "id", &[Value::str("token#7")]),
        Err(BridgeError::Lookup(_))
    ));

    let reader = vm.heap().clone();
    let j2p: J2pFn = Arc::new(move |_, _, obj| {
        let id = reader
            .resolve(obj)
            .and_then(|t| reader.field(t, "id"))
            .and_then(|v| v.as_long());
        Ok(id.map(|id| Value::str(&format!("token#{}", id))))
    });
    let writer = vm.heap().clone();
    let p2j: P2jFn = Arc::new(move |_, class, value| {
        let id = value.as_str()?.strip_prefix("token#")?.parse::<i32>().ok()?;
        let token = writer.alloc(writer.resolve(class)?, Payload::None);
        writer.set_field(token, "id", SimValue::Int(id));
        Some(writer.new_local_ref(token))
    });
    bridge.register_conversion(&token_type, Some(j2p), Some(p2j));

    assert_eq!(bridge.invoke(&tokens, "make", &[Value::Int(3)])?, Value::str("token#3"));
    assert_eq!(bridge.invoke(&tokens, "id", &[Value::str("token#5")])?, Value::Int(5));
    // Values the converter declines still find no overload
    assert!(matches!(
        bridge.invoke(&tokens, "id", &[Value::str("nope")]),
        Err(BridgeError::Lookup(_))
    ));
    Ok(())
}

#[test]
fn test_failing_converters_are_skipped() -> anyhow::Result<()> {
    let bridge = Bridge::new(tokens_vm())?;
    let tokens = Value::Type(bridge.resolve_class("demo.Tokens")?);
    let token_type = bridge.resolve_class("demo.Token")?;

    let failing: J2pFn = Arc::new(|env: &dyn ForeignEnv, _: ObjRef, _: ObjRef| {
        env.throw_new("java/lang/IllegalStateException", "converter failed");
        Err(BridgeError::Callback("cannot convert".to_string()))
    });
    let pending: J2pFn = Arc::new(|env: &dyn ForeignEnv, _: ObjRef, _: ObjRef| {
        env.throw_new("java/lang/IllegalStateException", "left pending");
        Ok(Some(Value::str("pending")))
    });
    let declining: J2pFn = Arc::new(|_: &dyn ForeignEnv, _: ObjRef, _: ObjRef| Ok(None));
    let winning: J2pFn = Arc::new(|_: &dyn ForeignEnv, _: ObjRef, _: ObjRef| Ok(Some(Value::str("converted"))));
    for j2p in [failing, pending, declining, winning] {
        bridge.register_conversion(&token_type, Some(j2p), None);
    }

    assert_eq!(bridge.invoke(&tokens, "make", &[Value::Int(1)])?, Value::str("converted"));
    let scope = bridge.scope()?;
    assert!(!scope.exception_check());
    drop(scope);
    assert_eq!(bridge.invoke(&tokens, "make", &[Value::Int(2)])?, Value::str("converted"));
    Ok(())
}

fn label(text: &'static str) -> J2pFn {
    Arc::new(move |_: &dyn ForeignEnv, _: ObjRef, _: ObjRef| Ok(Some(Value::str(text))))
}

#[test]
fn test_converters_follow_mro() -> anyhow::Result<()> {
    let bridge = Bridge::new(tokens_vm())?;
    let tokens = Value::Type(bridge.resolve_class("demo.Tokens")?);
    let token_type = bridge.resolve_class("demo.Token")?;
    let special_type = bridge.resolve_class("demo.SpecialToken")?;

    // Base converters apply to subclasses
    bridge.register_conversion(&token_type, Some(label("token")), None);
    assert_eq!(bridge.invoke(&tokens, "special", &[])?, Value::str("token"));

    let declining: J2pFn = Arc::new(|_: &dyn ForeignEnv, _: ObjRef, _: ObjRef| Ok(None));
    bridge.register_conversion(&special_type, Some(declining), None);
    assert_eq!(bridge.invoke(&tokens, "special", &[])?, Value::str("token"));

    // The most derived type is asked first
    bridge.register_conversion(&special_type, Some(label("special")), None);
    assert_eq!(bridge.invoke(&tokens, "special", &[])?, Value::str("special"));
    assert_eq!(bridge.invoke(&tokens, "make", &[Value::Int(4)])?, Value::str("token"));
    Ok(())
}

#[test]
fn test_rejected_converter_output_is_released() -> anyhow::Result<()> {
    let vm = tokens_vm();
    let bridge = Bridge::new(vm.clone())?;
    let tokens = Value::Type(bridge.resolve_class("demo.Tokens")?);
    let token_type = bridge.resolve_class("demo.Token")?;

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    // Produces a String, which is never a demo.Token
    let wrong_kind: P2jFn = Arc::new(move |env: &dyn ForeignEnv, _: ObjRef, value: &Value| {
        counter.fetch_add(1, Ordering::SeqCst);
        value.as_str().and_then(|s| env.new_string(s))
    });
    bridge.register_conversion(&token_type, None, Some(wrong_kind));

    let no_overload = |result: Result<Value, BridgeError>| matches!(result, Err(BridgeError::Lookup(_)));
    assert!(no_overload(bridge.invoke(&tokens, "id", &[Value::Bool(true)])));
    let locals = vm.heap().local_ref_count();
    assert!(no_overload(bridge.invoke(&tokens, "id", &[Value::str("not a token")])));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(vm.heap().local_ref_count(), locals);
    Ok(())
}
