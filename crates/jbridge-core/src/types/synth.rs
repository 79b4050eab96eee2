//! Reflective type synthesis
//!
//! Builds a [`SynthesizedType`] from a foreign class by reflection. The shell
//! is registered in the type cache before bases are synthesized, so a class
//! graph that leads back to a type under construction finds the shell
//! instead of recursing forever.

use super::helpers::{call_helper, construct, field_accessors};
use super::{
    bucket_of, Container, DecorationKind, FieldDescriptor, MethodDescriptor, ProtocolSet, SynthesizedType, TypeBody,
    TypeRef, TypeShell,
};
use crate::bridge::BridgeState;
use crate::foreign::{FieldInfo, ForeignEnv, MemberInfo, MethodId, ObjRef, PrimitiveTag};
use crate::marshal::convert;
use crate::BridgeResult;
use std::sync::Arc;

/// Name of constructor descriptors
pub(crate) const CONSTRUCTOR: &str = "<init>";

/// The synthesized type of `class`, creating it on first use
///
/// `class` may be any reference to the class object; the type keeps its own
/// global reference.
pub(crate) fn synthesize(state: &BridgeState, env: &dyn ForeignEnv, class: ObjRef) -> BridgeResult<Arc<SynthesizedType>> {
    let hash = env.identity_hash(class);
    if let Some(ty) = state.types.find(env, class, hash) {
        if ty.is_ready() {
            return Ok(ty);
        }
    }

    let _guard = state.synth_lock.lock();
    // A shell found here is either finished by now or still being built
    // further up this thread's stack
    if let Some(ty) = state.types.find(env, class, hash) {
        return Ok(ty);
    }

    let shell = build_shell(state, env, class, hash);
    let ty = state.types.register(env, Arc::new(SynthesizedType::from_shell(shell)));

    ty.publish(build_body(state, env, &ty));
    for kind in [DecorationKind::Call, DecorationKind::GetAttr, DecorationKind::SetAttr] {
        ty.inherit_decoration(kind);
    }
    install_converters(state, env, &ty);

    tracing::debug!(
        class = ty.name(),
        methods = ty.method_count(),
        fields = ty.field_count(),
        "synthesized type"
    );
    Ok(ty)
}

fn build_shell(state: &BridgeState, env: &dyn ForeignEnv, class: ObjRef, hash: i32) -> TypeShell {
    let display = env.class_display_name(class).unwrap_or_else(|| {
        env.exception_clear();
        "UNKNOWN".to_string()
    });
    let tag = tag_of(env, class);
    let element = if tag == PrimitiveTag::Array {
        env.component_type(class).map(|component| type_ref(env, component))
    } else {
        None
    };
    TypeShell {
        class: env.new_global_ref(class),
        name: state.names.intern(&display),
        identity_hash: hash,
        tag,
        element,
        to_string_id: optional_method(env, class, "toString", "()Ljava/lang/String;"),
        hash_code_id: optional_method(env, class, "hashCode", "()I"),
    }
}

fn build_body(state: &BridgeState, env: &dyn ForeignEnv, ty: &Arc<SynthesizedType>) -> TypeBody {
    let class = ty.class();

    let base = env.superclass(class).and_then(|superclass| {
        let base = synthesize_base(state, env, superclass);
        env.delete_local_ref(superclass);
        base
    });
    let interfaces: Vec<_> = env
        .interfaces(class)
        .into_iter()
        .filter_map(|iface| {
            let synthesized = synthesize_base(state, env, iface);
            env.delete_local_ref(iface);
            synthesized
        })
        .collect();
    for parent in base.iter().chain(&interfaces) {
        parent.add_subclass(ty);
    }

    let buckets = state.options.symbol_buckets;
    let mut methods: Vec<Vec<Arc<MethodDescriptor>>> = vec![Vec::new(); buckets];
    let mut fields: Vec<Vec<Arc<FieldDescriptor>>> = vec![Vec::new(); buckets];
    let mut dir: Vec<Arc<str>> = Vec::new();

    for info in env.constructors(class) {
        let descriptor = method_descriptor(state, env, info, true);
        methods[bucket_of(&descriptor.name, buckets)].insert(0, Arc::new(descriptor));
    }
    for info in env.methods(class) {
        let descriptor = method_descriptor(state, env, info, false);
        if !dir.contains(&descriptor.name) {
            dir.push(descriptor.name.clone());
        }
        methods[bucket_of(&descriptor.name, buckets)].insert(0, Arc::new(descriptor));
    }
    for info in env.fields(class) {
        let descriptor = field_descriptor(state, env, info);
        if !dir.contains(&descriptor.name) {
            dir.push(descriptor.name.clone());
        }
        fields[bucket_of(&descriptor.name, buckets)].insert(0, Arc::new(descriptor));
    }
    if env.exception_check() {
        env.exception_clear();
        tracing::debug!(class = ty.name(), "reflection raised, members may be incomplete");
    }

    let protocols = protocols_of(state, env, class, ty.element());
    TypeBody {
        base,
        interfaces,
        methods,
        fields,
        dir,
        protocols,
    }
}

fn synthesize_base(state: &BridgeState, env: &dyn ForeignEnv, class: ObjRef) -> Option<Arc<SynthesizedType>> {
    match synthesize(state, env, class) {
        Ok(ty) => Some(ty),
        Err(e) => {
            env.exception_clear();
            tracing::debug!(error = %e, "base type unavailable");
            None
        }
    }
}

fn method_descriptor(state: &BridgeState, env: &dyn ForeignEnv, info: MemberInfo, constructor: bool) -> MethodDescriptor {
    let params = info.parameter_types.into_iter().map(|p| type_ref(env, p)).collect();
    if constructor {
        if let Some(ret) = info.return_type {
            env.delete_local_ref(ret);
        }
        return MethodDescriptor {
            name: state.names.intern(CONSTRUCTOR),
            id: info.id,
            params,
            ret: None,
            is_static: true,
            helper: construct,
        };
    }
    let ret = info.return_type.map(|r| type_ref(env, r));
    let is_static = info.modifiers.is_static();
    MethodDescriptor {
        name: state.names.intern(&info.name),
        id: info.id,
        params,
        helper: call_helper(is_static, ret.map(|r| r.tag).unwrap_or(PrimitiveTag::Void)),
        ret,
        is_static,
    }
}

fn field_descriptor(state: &BridgeState, env: &dyn ForeignEnv, info: FieldInfo) -> FieldDescriptor {
    let ty = type_ref(env, info.field_type);
    let is_static = info.modifiers.is_static();
    FieldDescriptor {
        name: state.names.intern(&info.name),
        id: info.id,
        accessors: field_accessors(is_static, ty.tag),
        ty,
        is_static,
    }
}

/// Promote a local class reference to a [`TypeRef`], consuming the local
fn type_ref(env: &dyn ForeignEnv, local: ObjRef) -> TypeRef {
    let tag = tag_of(env, local);
    let class = env.new_global_ref(local);
    env.delete_local_ref(local);
    TypeRef { class, tag }
}

fn tag_of(env: &dyn ForeignEnv, class: ObjRef) -> PrimitiveTag {
    let canonical = env.canonical_name(class);
    if env.exception_check() {
        env.exception_clear();
    }
    let is_array = match env.component_type(class) {
        Some(component) => {
            env.delete_local_ref(component);
            true
        }
        None => false,
    };
    PrimitiveTag::from_canonical_name(canonical.as_deref(), is_array)
}

fn optional_method(env: &dyn ForeignEnv, class: ObjRef, name: &str, descriptor: &str) -> Option<MethodId> {
    let id = env.method_id(class, name, descriptor);
    if id.is_none() || env.exception_check() {
        env.exception_clear();
        tracing::debug!(method = name, "method absent on class");
        return None;
    }
    id
}

fn protocols_of(state: &BridgeState, env: &dyn ForeignEnv, class: ObjRef, element: Option<TypeRef>) -> ProtocolSet {
    let mut protocols = ProtocolSet {
        container: element.map(|e| Container::Array(e.tag)),
        ..ProtocolSet::default()
    };
    let well_known = match state.well_known(env) {
        Ok(well_known) => well_known,
        Err(e) => {
            tracing::debug!(error = %e, "protocol interfaces unavailable");
            return protocols;
        }
    };
    let is = |interface: ObjRef| env.is_assignable_from(class, interface);
    protocols.iterable = is(well_known.iterable);
    protocols.iterator = is(well_known.iterator);
    protocols.comparable = is(well_known.comparable);
    if protocols.container.is_none() {
        protocols.container = if is(well_known.map) {
            Some(Container::Map)
        } else if is(well_known.list) {
            Some(Container::List)
        } else if is(well_known.set) {
            Some(Container::Set)
        } else {
            None
        };
    }
    protocols
}

fn install_converters(state: &BridgeState, env: &dyn ForeignEnv, ty: &Arc<SynthesizedType>) {
    let Some(name) = env.class_name(ty.class()) else {
        env.exception_clear();
        return;
    };
    if let Some((j2p, p2j)) = convert::builtin(env, &name, ty.class(), &state.options) {
        convert::register(ty, Some(j2p), Some(p2j));
    }
}

#[cfg(test)]
mod tests {
    use crate::sim::{ClassDef, SimValue, SimVm};
    use crate::{Bridge, BridgeOptions, Container, DecorationKind, PrimitiveTag};
    use std::sync::Arc;

    #[test]
    fn test_synthesis_is_cached_per_class() {
        let bridge = Bridge::new(SimVm::new()).unwrap();
        let a = bridge.resolve_class("java.util.ArrayList").unwrap();
        let b = bridge.resolve_class("java/util/ArrayList").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name(), "class java.util.ArrayList");
        assert!(a.is_ready());
    }

    #[test]
    fn test_members_and_symbols() {
        let vm = SimVm::new();
        vm.heap()
            .define_class(
                ClassDef::new("demo.Point")
                    .field("x", "int")
                    .static_field("ORIGIN_COUNT", "long")
                    .method("norm", &[], "double", |_, _, _| Ok(SimValue::Double(0.0)))
                    .static_method("of", &["int", "int"], "demo.Point", |_, _, _| Ok(SimValue::Ref(None))),
            )
            .unwrap();
        let bridge = Bridge::new(vm).unwrap();
        let point = bridge.resolve_class("demo.Point").unwrap();

        assert!(point.has_method("norm"));
        assert!(point.has_static_method("of"));
        assert!(!point.has_static_method("norm"));
        assert!(point.methods_named("<init>").all(|c| c.is_static));
        assert_eq!(point.field("x").map(|f| f.ty.tag), Some(PrimitiveTag::Int));
        assert!(point.field("ORIGIN_COUNT").is_some_and(|f| f.is_static));

        let symbols: Vec<&str> = point.symbols().iter().map(|s| &**s).collect();
        assert!(symbols.contains(&"norm"));
        assert!(symbols.contains(&"x"));
        assert!(!symbols.contains(&"<init>"));
        assert_eq!(symbols.iter().filter(|s| **s == "toString").count(), 1);
    }

    #[test]
    fn test_bases_and_protocols() {
        let bridge = Bridge::new(SimVm::new()).unwrap();
        let list = bridge.resolve_class("java.util.ArrayList").unwrap();
        assert_eq!(list.base().map(|b| b.name()), Some("class java.lang.Object"));
        let protocols = list.protocols();
        assert!(protocols.iterable);
        assert!(!protocols.iterator);
        assert_eq!(protocols.container, Some(Container::List));

        let map = bridge.resolve_class("java.util.HashMap").unwrap();
        assert_eq!(map.protocols().container, Some(Container::Map));

        let ints = bridge.resolve_class("[I").unwrap();
        assert_eq!(ints.tag(), PrimitiveTag::Array);
        assert_eq!(ints.protocols().container, Some(Container::Array(PrimitiveTag::Int)));

        let string = bridge.resolve_class("java.lang.String").unwrap();
        assert!(string.protocols().comparable);
        assert!(string.mro().iter().any(|t| t.name() == "interface java.lang.Comparable"));
    }

    #[test]
    fn test_decorations_start_inherited() {
        let bridge = Bridge::with_options(SimVm::new(), BridgeOptions::default().with_force_init(false)).unwrap();
        let object = bridge.resolve_class("java.lang.Object").unwrap();
        for kind in [DecorationKind::Call, DecorationKind::GetAttr, DecorationKind::SetAttr] {
            assert!(!object.has_own_decoration(kind));
            assert!(object.decoration(kind).is_none());
        }
    }
}
