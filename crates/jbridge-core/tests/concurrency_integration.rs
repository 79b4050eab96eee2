//! Integration tests for concurrent bridge use
//!
//! Threads share one bridge and hammer type synthesis, wrapper dedup and
//! method dispatch in random order.

use jbridge_core::sim::{ClassDef, SimVm};
use jbridge_core::{Bridge, BridgeOptions, FatalPolicy, SynthesizedType, Value};
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::{Arc, Barrier};
use std::thread;

const THREADS: usize = 8;

fn shared_bridge(vm: &Arc<SimVm>) -> Arc<Bridge> {
    Arc::new(
        Bridge::with_options(
            vm.clone(),
            BridgeOptions::default()
                .with_fatal_policy(FatalPolicy::Panic)
                .with_type_cache_buckets(3)
                .with_dedup_buckets(5),
        )
        .unwrap(),
    )
}

#[test]
fn test_concurrent_synthesis_is_idempotent() {
    let vm = SimVm::new();
    let defs = (0..16)
        .map(|i| {
            let def = ClassDef::new(&format!("demo.Node{}", i)).field("next", &format!("demo.Node{}", (i + 1) % 16));
            if i > 0 {
                def.extends(&format!("demo.Node{}", i - 1))
            } else {
                def
            }
        })
        .collect();
    vm.heap().define_classes(defs).unwrap();
    let bridge = shared_bridge(&vm);
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let bridge = bridge.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let mut order: Vec<usize> = (0..16).collect();
                order.shuffle(&mut rand::thread_rng());
                barrier.wait();
                let mut types: Vec<Option<Arc<SynthesizedType>>> = vec![None; 16];
                for i in order {
                    types[i] = Some(bridge.resolve_class(&format!("demo.Node{}", i)).unwrap());
                }
                types.into_iter().map(|t| t.unwrap()).collect::<Vec<_>>()
            })
        })
        .collect();

    let results: Vec<Vec<Arc<SynthesizedType>>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for other in &results[1..] {
        for (a, b) in results[0].iter().zip(other) {
            assert!(Arc::ptr_eq(a, b), "{} synthesized twice", a.name());
            assert!(b.is_ready());
        }
    }
    // Every node but the root extends the previous one
    for (i, ty) in results[0].iter().enumerate().skip(1) {
        assert!(Arc::ptr_eq(ty.base().unwrap(), &results[0][i - 1]));
    }
}

#[test]
fn test_concurrent_dedup() {
    let vm = SimVm::new();
    let bridge = shared_bridge(&vm);
    let list_type = bridge.resolve_class("java.util.ArrayList").unwrap();
    let outer = bridge.construct(&list_type, &[], &[]).unwrap();
    let members: Vec<Value> = (0..4)
        .map(|_| bridge.construct(&list_type, &[], &[]).unwrap())
        .collect();
    for member in &members {
        bridge.invoke(&outer, "add", &[member.clone()]).unwrap();
    }
    let baseline = vm.global_ref_count();

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let bridge = bridge.clone();
            let outer = outer.clone();
            let members = members.clone();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..200 {
                    let i = rng.gen_range(0..members.len());
                    let got = bridge.invoke(&outer, "get", &[Value::Int(i as i64)]).unwrap();
                    assert_eq!(got, members[i]);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(bridge.stats().wrappers, 5);
    assert_eq!(vm.global_ref_count(), baseline);
}

#[test]
fn test_concurrent_wrapper_churn() {
    let vm = SimVm::new();
    let bridge = shared_bridge(&vm);
    let map_type = bridge.resolve_class("java.util.HashMap").unwrap();
    let map = bridge.construct(&map_type, &[], &[]).unwrap();
    let list_type = bridge.resolve_class("java.util.ArrayList").unwrap();
    let baseline = vm.global_ref_count();

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let bridge = bridge.clone();
            let map = map.clone();
            let list_type = list_type.clone();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for round in 0..50 {
                    let key = format!("{}-{}", t, round);
                    let list = bridge.construct(&list_type, &[], &[]).unwrap();
                    let n = rng.gen_range(1..5);
                    for i in 0..n {
                        bridge.invoke(&list, "add", &[Value::Int(i)]).unwrap();
                    }
                    bridge.invoke(&map, "put", &[Value::str(&key), list]).unwrap();
                    let back = bridge.invoke(&map, "get", &[Value::str(&key)]).unwrap();
                    assert_eq!(bridge.invoke(&back, "size", &[]).unwrap(), Value::Int(n));
                    if rng.gen_bool(0.5) {
                        bridge.invoke(&map, "remove", &[Value::str(&key)]).unwrap();
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Every wrapper created by the workers is gone again
    assert_eq!(bridge.stats().wrappers, 1);
    assert_eq!(vm.global_ref_count(), baseline);
}
