//! Bridge entry point
//!
//! A [`Bridge`] owns every shared service of one host/foreign pairing: the
//! handle manager, the type cache, the dedup table, the name interner and the
//! named-object registry. Nothing here is process-global, so independent
//! bridges can coexist over the same runtime.
//!
//! ```
//! use jbridge_core::sim::SimVm;
//! use jbridge_core::{Bridge, Value};
//!
//! let bridge = Bridge::new(SimVm::new()).unwrap();
//! let list_type = bridge.resolve_class("java.util.ArrayList").unwrap();
//! let list = bridge.construct(&list_type, &[], &[]).unwrap();
//! bridge.invoke(&list, "add", &[Value::str("hi")]).unwrap();
//! assert_eq!(bridge.invoke(&list, "size", &[]).unwrap(), Value::Int(1));
//! assert_eq!(bridge.invoke(&list, "get", &[Value::Int(0)]).unwrap(), Value::str("hi"));
//! ```

use crate::dedup::DedupTable;
use crate::env::{EnvScope, HandleManager};
use crate::foreign::{ForeignEnv, ForeignVm, MethodId, ObjRef};
use crate::host_lock::{yielding, HostLock};
use crate::instance::{self, InstanceWrapper};
use crate::intern::Interner;
use crate::marshal::convert::{self, J2pFn, P2jFn};
use crate::marshal::{release_locals, to_foreign, to_host};
use crate::options::BridgeOptions;
use crate::types::synth::synthesize;
use crate::types::{DecorationKind, SynthesizedType, TypeCache, TypeRef};
use crate::value::{Callable, Kwargs, Value};
use crate::{BridgeError, BridgeResult};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::ReentrantMutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Foreign classes and methods the bridge itself relies on
pub(crate) struct WellKnown {
    pub object: ObjRef,
    pub iterable: ObjRef,
    pub iterator: ObjRef,
    pub comparable: ObjRef,
    pub map: ObjRef,
    pub list: ObjRef,
    pub set: ObjRef,
    pub no_such_element: ObjRef,
    pub object_equals: MethodId,
    pub compare_to: MethodId,
}

impl WellKnown {
    fn resolve(env: &dyn ForeignEnv) -> BridgeResult<Self> {
        let mut held = Vec::new();
        let resolved = Self::resolve_into(env, &mut held);
        if resolved.is_err() {
            env.exception_clear();
            for class in held {
                env.delete_global_ref(class);
            }
        }
        resolved
    }

    fn resolve_into(env: &dyn ForeignEnv, held: &mut Vec<ObjRef>) -> BridgeResult<Self> {
        let mut global = |name: &str| -> BridgeResult<ObjRef> {
            let local = env
                .find_class(name)
                .ok_or_else(|| BridgeError::ClassNotFound(name.replace('/', ".")))?;
            let class = env.new_global_ref(local);
            env.delete_local_ref(local);
            held.push(class);
            Ok(class)
        };
        let object = global("java/lang/Object")?;
        let iterable = global("java/lang/Iterable")?;
        let iterator = global("java/util/Iterator")?;
        let comparable = global("java/lang/Comparable")?;
        let map = global("java/util/Map")?;
        let list = global("java/util/List")?;
        let set = global("java/util/Set")?;
        let no_such_element = global("java/util/NoSuchElementException")?;

        let missing = |what: &str| BridgeError::Runtime(format!("runtime lacks {}", what));
        let object_equals = env
            .method_id(object, "equals", "(Ljava/lang/Object;)Z")
            .ok_or_else(|| missing("Object.equals"))?;
        let compare_to = env
            .method_id(comparable, "compareTo", "(Ljava/lang/Object;)I")
            .ok_or_else(|| missing("Comparable.compareTo"))?;

        Ok(Self {
            object,
            iterable,
            iterator,
            comparable,
            map,
            list,
            set,
            no_such_element,
            object_equals,
            compare_to,
        })
    }

    fn release(&self, env: &dyn ForeignEnv) {
        for class in [
            self.object,
            self.iterable,
            self.iterator,
            self.comparable,
            self.map,
            self.list,
            self.set,
            self.no_such_element,
        ] {
            env.delete_global_ref(class);
        }
    }
}

/// Shared state behind a [`Bridge`] and every wrapper it hands out
pub(crate) struct BridgeState {
    pub handles: HandleManager,
    pub types: TypeCache,
    pub dedup: DedupTable,
    pub names: Interner,
    pub named: DashMap<String, Value>,
    pub options: BridgeOptions,
    pub synth_lock: ReentrantMutex<()>,
    well_known: OnceCell<WellKnown>,
}

impl BridgeState {
    pub(crate) fn host_lock(&self) -> &dyn HostLock {
        &*self.options.host_lock
    }

    pub(crate) fn well_known(&self, env: &dyn ForeignEnv) -> BridgeResult<&WellKnown> {
        self.well_known.get_or_try_init(|| WellKnown::resolve(env))
    }

    /// Look up and synthesize a class by name
    pub(crate) fn resolve_class(&self, env: &dyn ForeignEnv, name: &str) -> BridgeResult<Arc<SynthesizedType>> {
        let internal = name.replace('.', "/");
        let local = yielding(self.host_lock(), || env.find_class(&internal));
        let Some(local) = local else {
            env.exception_clear();
            return Err(BridgeError::ClassNotFound(name.to_string()));
        };
        let ty = synthesize(self, env, local);
        env.delete_local_ref(local);
        ty
    }
}

impl Drop for BridgeState {
    fn drop(&mut self) {
        let Ok(scope) = self.handles.scope() else {
            tracing::warn!(types = self.types.len(), "no foreign runtime at bridge teardown, references leaked");
            return;
        };
        self.types.release_all(&**scope.env(), &self.names);
        if let Some(well_known) = self.well_known.get() {
            well_known.release(&**scope.env());
        }
    }
}

/// Usage counters of a bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeStats {
    /// Synthesized types in the type cache
    pub types: usize,
    /// Live deduplicated wrappers
    pub wrappers: usize,
    /// Distinct interned names
    pub interned: usize,
    /// Entries in the named-object registry
    pub named_objects: usize,
}

impl fmt::Display for BridgeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "types: {}, wrappers: {}, interned strings: {}, named objects: {}",
            self.types, self.wrappers, self.interned, self.named_objects
        )
    }
}

/// Handle to a bridge over one foreign runtime
pub struct Bridge {
    state: Arc<BridgeState>,
}

impl Bridge {
    /// Bridge with default options
    pub fn new(vm: Arc<dyn ForeignVm>) -> BridgeResult<Self> {
        Self::with_options(vm, BridgeOptions::default())
    }

    /// Bridge with explicit options
    pub fn with_options(vm: Arc<dyn ForeignVm>, options: BridgeOptions) -> BridgeResult<Self> {
        let options = options.clamped();
        let state = Arc::new(BridgeState {
            handles: HandleManager::new(vm, options.local_ref_capacity, options.fatal_policy),
            types: TypeCache::new(options.type_cache_buckets),
            dedup: DedupTable::new(options.dedup_buckets),
            names: Interner::new(),
            named: DashMap::new(),
            synth_lock: ReentrantMutex::new(()),
            well_known: OnceCell::new(),
            options,
        });

        if state.options.force_init {
            let scope = state.handles.scope()?;
            for name in convert::FORCE_INIT_CLASSES {
                if let Err(e) = state.resolve_class(&**scope.env(), name) {
                    tracing::debug!(class = name, error = %e, "eager conversion setup skipped");
                }
            }
        }
        Ok(Self { state })
    }

    /// Options the bridge runs with
    pub fn options(&self) -> &BridgeOptions {
        &self.state.options
    }

    // ---- scopes ----

    /// Enter a runtime scope on the calling thread (reentrant)
    pub fn enter(&self) -> BridgeResult<()> {
        self.state.handles.enter().map(|_| ())
    }

    /// Leave a scope entered with [`enter`](Self::enter)
    pub fn exit(&self) {
        self.state.handles.exit();
    }

    /// Scope that exits when dropped
    pub fn scope(&self) -> BridgeResult<EnvScope<'_>> {
        self.state.handles.scope()
    }

    // ---- classes and members ----

    /// Synthesize a class by name (`java.lang.String` or `java/lang/String`)
    pub fn resolve_class(&self, name: &str) -> BridgeResult<Arc<SynthesizedType>> {
        let scope = self.scope()?;
        self.state.resolve_class(&**scope.env(), name)
    }

    /// Call a method on an object, or a static method on a type
    pub fn invoke(&self, receiver: &Value, name: &str, args: &[Value]) -> BridgeResult<Value> {
        match receiver {
            Value::Object(wrapper) => wrapper.invoke(name, args),
            Value::Type(ty) => {
                let scope = self.scope()?;
                instance::dispatch(&self.state, &**scope.env(), ty, None, name, args)
            }
            other => Err(not_foreign(other)),
        }
    }

    /// Whether the receiver has a method named `name`; types only count static methods
    pub fn has_method(&self, receiver: &Value, name: &str) -> BridgeResult<bool> {
        match receiver {
            Value::Object(wrapper) => Ok(wrapper.java_type().has_method(name)),
            Value::Type(ty) => Ok(ty.has_static_method(name)),
            other => Err(not_foreign(other)),
        }
    }

    /// Read a field of an object, or a static field of a type
    pub fn read_field(&self, receiver: &Value, name: &str) -> BridgeResult<Value> {
        match receiver {
            Value::Object(wrapper) => wrapper.get_field(name),
            Value::Type(ty) => {
                let scope = self.scope()?;
                instance::read_field(&self.state, &**scope.env(), ty, None, name)
            }
            other => Err(not_foreign(other)),
        }
    }

    /// Write a field and return the written value
    pub fn write_field(&self, receiver: &Value, name: &str, value: Value) -> BridgeResult<Value> {
        match receiver {
            Value::Object(wrapper) => wrapper.set_field(name, &value)?,
            Value::Type(ty) => {
                let scope = self.scope()?;
                instance::write_field(&self.state, &**scope.env(), ty, None, name, &value)?;
            }
            other => return Err(not_foreign(other)),
        }
        Ok(value)
    }

    /// Instantiate a type through its constructors
    pub fn construct(&self, ty: &Arc<SynthesizedType>, args: &[Value], kwargs: &Kwargs) -> BridgeResult<Value> {
        if !kwargs.is_empty() {
            return Err(BridgeError::TypeError("keyword arguments are not supported".to_string()));
        }
        let scope = self.scope()?;
        instance::dispatch(&self.state, &**scope.env(), ty, None, instance::CONSTRUCTOR, args)
    }

    /// Explicitly view a value as an instance of `ty`, bypassing converters
    pub fn cast(&self, ty: &Arc<SynthesizedType>, value: &Value) -> BridgeResult<Value> {
        if ty.is_primitive() {
            return Err(BridgeError::TypeError(
                "explicit conversion to primitive type is not supported".to_string(),
            ));
        }
        let scope = self.scope()?;
        let env = &**scope.env();
        let target = TypeRef {
            class: ty.class(),
            tag: ty.tag(),
        };
        let raw = to_foreign(&self.state, env, value, target)
            .ok_or_else(|| BridgeError::TypeError(format!("cannot convert {} to {}", value.type_name(), ty.name())))?;
        let Some(obj) = raw.as_obj() else {
            return Ok(Value::None);
        };
        let wrapped = InstanceWrapper::wrap_runtime_class(&self.state, env, obj);
        release_locals(env, &[raw]);
        wrapped.map(Value::Object)
    }

    /// The fresh undecorated view of a wrapped object
    pub fn undecorated(&self, value: &Value) -> BridgeResult<Value> {
        match value {
            Value::Object(wrapper) => wrapper.undecorated().map(Value::Object),
            other => Err(not_foreign(other)),
        }
    }

    /// Member names of an object's or type's class
    pub fn symbols(&self, value: &Value) -> BridgeResult<Value> {
        let ty = match value {
            Value::Object(wrapper) => wrapper.java_type(),
            Value::Type(ty) => ty,
            other => return Err(not_foreign(other)),
        };
        Ok(Value::tuple(ty.symbols().iter().map(|s| Value::Str(s.clone())).collect()))
    }

    /// Wrapper of the `java.lang.Class` object behind a type
    pub fn type_as_class_object(&self, ty: &Arc<SynthesizedType>) -> BridgeResult<Value> {
        let scope = self.scope()?;
        InstanceWrapper::wrap_runtime_class(&self.state, &**scope.env(), ty.class()).map(Value::Object)
    }

    /// Bring a foreign reference owned by the caller across to the host
    pub fn wrap_foreign(&self, obj: Option<ObjRef>) -> BridgeResult<Value> {
        let scope = self.scope()?;
        to_host(&self.state, &**scope.env(), obj)
    }

    // ---- decoration ----

    /// Set or clear the call decoration of a type and its known subtypes
    pub fn set_call_decoration(&self, ty: &Arc<SynthesizedType>, callback: Option<Callable>) {
        self.set_decoration(ty, DecorationKind::Call, callback);
    }

    /// Set or clear the attribute-read decoration
    pub fn set_getattr_decoration(&self, ty: &Arc<SynthesizedType>, callback: Option<Callable>) {
        self.set_decoration(ty, DecorationKind::GetAttr, callback);
    }

    /// Set or clear the attribute-write decoration
    pub fn set_setattr_decoration(&self, ty: &Arc<SynthesizedType>, callback: Option<Callable>) {
        self.set_decoration(ty, DecorationKind::SetAttr, callback);
    }

    fn set_decoration(&self, ty: &Arc<SynthesizedType>, kind: DecorationKind, callback: Option<Callable>) {
        let _guard = self.state.synth_lock.lock();
        ty.set_own_decoration(kind, callback);
        ty.inherit_decoration(kind);

        let mut seen = vec![Arc::as_ptr(ty)];
        let mut queue: VecDeque<_> = ty.subclasses().into();
        while let Some(sub) = queue.pop_front() {
            if seen.contains(&Arc::as_ptr(&sub)) {
                continue;
            }
            seen.push(Arc::as_ptr(&sub));
            // Subtypes with their own decoration stop the propagation
            if sub.inherit_decoration(kind) {
                queue.extend(sub.subclasses());
            }
        }
    }

    // ---- conversions and named objects ----

    /// Register converters on a type
    pub fn register_conversion(&self, ty: &Arc<SynthesizedType>, j2p: Option<J2pFn>, p2j: Option<P2jFn>) {
        let _guard = self.state.synth_lock.lock();
        convert::register(ty, j2p, p2j);
    }

    /// Publish a foreign object under `name`; `None` removes the entry
    ///
    /// On conversion failure inside an enclosing scope, a
    /// `java.lang.Exception` is also raised in the foreign runtime so a
    /// calling native frame sees it.
    pub fn register_named_object(&self, name: &str, obj: Option<ObjRef>) -> BridgeResult<()> {
        let Some(obj) = obj else {
            self.state.named.remove(name);
            return Ok(());
        };
        let nested = self.state.handles.depth() > 0;
        let scope = self.scope()?;
        match to_host(&self.state, &**scope.env(), Some(obj)) {
            Ok(value) => {
                self.state.named.insert(name.to_string(), value);
                Ok(())
            }
            Err(e) => {
                if nested {
                    scope.throw_new("java/lang/Exception", &e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Value published under `name`
    pub fn named_object(&self, name: &str) -> Option<Value> {
        self.state.named.get(name).map(|v| v.value().clone())
    }

    /// All published values
    pub fn named_objects(&self) -> Vec<(String, Value)> {
        self.state
            .named
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    // ---- maintenance ----

    /// Evict unreferenced, undecorated types without converters
    pub fn gc(&self) -> BridgeResult<usize> {
        let scope = self.scope()?;
        let _guard = self.state.synth_lock.lock();
        Ok(self.state.types.evict(&**scope.env(), &self.state.names))
    }

    /// Evict repeatedly until nothing more can go
    pub fn reset(&self) -> BridgeResult<usize> {
        let mut total = 0;
        loop {
            let evicted = self.gc()?;
            if evicted == 0 {
                return Ok(total);
            }
            total += evicted;
        }
    }

    /// Usage counters
    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            types: self.state.types.len(),
            wrappers: self.state.dedup.live(),
            interned: self.state.names.len(),
            named_objects: self.state.named.len(),
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        // Registry entries keep the shared state alive through their wrappers
        self.state.named.clear();
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge").field("stats", &self.stats()).finish_non_exhaustive()
    }
}

fn not_foreign(value: &Value) -> BridgeError {
    BridgeError::TypeError(format!("expected a java object or type, got {}", value.type_name()))
}
