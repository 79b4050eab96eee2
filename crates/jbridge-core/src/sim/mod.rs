//! In-memory foreign runtime
//!
//! A small JVM-shaped object system implementing [`ForeignVm`] and
//! [`ForeignEnv`]. It ships the classes the bridge relies on (`Object`,
//! `String`, the boxed primitives, the common exceptions, `Iterable`,
//! `Iterator`, `Comparable`, `Map`, `List`, `Set` and their `HashMap`,
//! `ArrayList`, `HashSet` implementations) and lets callers define their own
//! classes with native bodies written as Rust closures, see [`ClassDef`].
//!
//! References follow JNI rules: handles are local or global, each env keeps
//! its own pending exception, and `exception_describe` clears what it
//! reports.

mod bootstrap;
mod builder;
mod heap;

pub use builder::{ClassDef, MethodBody};
pub use heap::{identity_hash, ArrayData, ObjId, Payload, SimHeap, SimValue};

use crate::foreign::{
    ArrayElements, CallTarget, FieldId, FieldInfo, ForeignEnv, ForeignVm, JValue, MemberInfo, MethodId, Modifiers,
    ObjRef, PrimitiveTag, ReleaseMode,
};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Errors raised while defining classes
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimError {
    /// A referenced type name is not defined
    #[error("unknown class: {0}")]
    UnknownClass(String),

    /// A class with this name already exists
    #[error("duplicate class: {0}")]
    DuplicateClass(String),
}

/// In-memory virtual machine
pub struct SimVm {
    heap: Arc<SimHeap>,
    envs: Mutex<FxHashMap<ThreadId, Arc<SimEnv>>>,
    described: Arc<Mutex<Vec<String>>>,
    attaches: AtomicUsize,
    detaches: AtomicUsize,
    available: AtomicBool,
}

impl SimVm {
    /// Boot a VM with the built-in classes
    pub fn new() -> Arc<Self> {
        let heap = SimHeap::empty();
        if let Err(e) = bootstrap::install(&heap) {
            // Built-in class graph is static; a failure here is a bug in it
            panic!("built-in classes failed to load: {}", e);
        }
        Arc::new(SimVm {
            heap: Arc::new(heap),
            envs: Mutex::new(FxHashMap::default()),
            described: Arc::new(Mutex::new(Vec::new())),
            attaches: AtomicUsize::new(0),
            detaches: AtomicUsize::new(0),
            available: AtomicBool::new(true),
        })
    }

    /// The shared heap
    pub fn heap(&self) -> &Arc<SimHeap> {
        &self.heap
    }

    /// Attach the calling thread the way an embedding application would,
    /// without going through [`ForeignVm::attach_current_thread`]
    pub fn attach_external(&self) -> Arc<dyn ForeignEnv> {
        self.env_for_current_thread()
    }

    /// Make the runtime (un)locatable, as when no JVM is loaded
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Attaches performed through [`ForeignVm::attach_current_thread`]
    pub fn attach_count(&self) -> usize {
        self.attaches.load(Ordering::SeqCst)
    }

    /// Detaches performed through [`ForeignVm::detach_current_thread`]
    pub fn detach_count(&self) -> usize {
        self.detaches.load(Ordering::SeqCst)
    }

    /// Exceptions reported through `exception_describe`, oldest first
    pub fn described(&self) -> Vec<String> {
        self.described.lock().clone()
    }

    /// Live global references
    pub fn global_ref_count(&self) -> usize {
        self.heap.global_ref_count()
    }

    fn env_for_current_thread(&self) -> Arc<dyn ForeignEnv> {
        let id = thread::current().id();
        self.envs
            .lock()
            .entry(id)
            .or_insert_with(|| {
                Arc::new(SimEnv {
                    heap: self.heap.clone(),
                    pending: Mutex::new(None),
                    described: self.described.clone(),
                })
            })
            .clone()
    }
}

impl ForeignVm for SimVm {
    fn current_env(&self) -> Option<Arc<dyn ForeignEnv>> {
        if !self.available.load(Ordering::SeqCst) {
            return None;
        }
        let env = self.envs.lock().get(&thread::current().id()).cloned();
        env.map(|e| e as Arc<dyn ForeignEnv>)
    }

    fn attach_current_thread(&self) -> Option<Arc<dyn ForeignEnv>> {
        if !self.available.load(Ordering::SeqCst) {
            return None;
        }
        self.attaches.fetch_add(1, Ordering::SeqCst);
        Some(self.env_for_current_thread())
    }

    fn detach_current_thread(&self) {
        if self.envs.lock().remove(&thread::current().id()).is_some() {
            self.detaches.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Per-thread env of a [`SimVm`]
pub struct SimEnv {
    heap: Arc<SimHeap>,
    pending: Mutex<Option<ObjId>>,
    described: Arc<Mutex<Vec<String>>>,
}

impl SimEnv {
    fn id(&self, r: ObjRef) -> Option<ObjId> {
        self.heap.resolve(r)
    }

    fn local(&self, id: Option<ObjId>) -> Option<ObjRef> {
        id.map(|id| self.heap.new_local_ref(id))
    }

    fn raise(&self, class_name: &str, message: &str) {
        *self.pending.lock() = Some(self.heap.exception(class_name, message));
    }

    fn to_sim(&self, value: &JValue) -> SimValue {
        match *value {
            JValue::Void => SimValue::Void,
            JValue::Boolean(v) => SimValue::Bool(v),
            JValue::Byte(v) => SimValue::Byte(v),
            JValue::Char(v) => SimValue::Char(v),
            JValue::Short(v) => SimValue::Short(v),
            JValue::Int(v) => SimValue::Int(v),
            JValue::Long(v) => SimValue::Long(v),
            JValue::Float(v) => SimValue::Float(v),
            JValue::Double(v) => SimValue::Double(v),
            JValue::Object(r) => SimValue::Ref(r.and_then(|r| self.id(r))),
        }
    }

    fn to_jvalue(&self, value: SimValue, tag: PrimitiveTag) -> JValue {
        if tag == PrimitiveTag::Void {
            return JValue::Void;
        }
        match value {
            SimValue::Void => JValue::zero(tag),
            SimValue::Bool(v) => JValue::Boolean(v),
            SimValue::Byte(v) => JValue::Byte(v),
            SimValue::Char(v) => JValue::Char(v),
            SimValue::Short(v) => JValue::Short(v),
            SimValue::Int(v) => JValue::Int(v),
            SimValue::Long(v) => JValue::Long(v),
            SimValue::Float(v) => JValue::Float(v),
            SimValue::Double(v) => JValue::Double(v),
            SimValue::Ref(id) => JValue::Object(self.local(id)),
        }
    }

    fn member_info(&self, def: &heap::MethodDef) -> MemberInfo {
        MemberInfo {
            id: MethodId(def.id),
            name: def.name.clone(),
            modifiers: Modifiers(def.modifiers),
            parameter_types: def.params.iter().map(|p| self.heap.new_local_ref(*p)).collect(),
            return_type: def.ret.map(|r| self.heap.new_local_ref(r)),
        }
    }

    fn run(&self, body: Option<MethodBody>, this: Option<ObjId>, args: &[JValue], name: &str) -> Option<SimValue> {
        let Some(body) = body else {
            self.raise("java.lang.UnsupportedOperationException", &format!("abstract method {}", name));
            return None;
        };
        let args: Vec<SimValue> = args.iter().map(|a| self.to_sim(a)).collect();
        // No heap locks are held here, so bodies may re-enter the runtime
        match body(&self.heap, this, &args) {
            Ok(value) => Some(value),
            Err(throwable) => {
                *self.pending.lock() = Some(throwable);
                None
            }
        }
    }
}

impl ForeignEnv for SimEnv {
    fn find_class(&self, name: &str) -> Option<ObjRef> {
        match self.heap.class_by_name(name) {
            Some(id) => self.local(Some(id)),
            None => {
                self.raise("java.lang.NoClassDefFoundError", name);
                None
            }
        }
    }

    fn get_object_class(&self, obj: ObjRef) -> Option<ObjRef> {
        self.local(self.id(obj).and_then(|id| self.heap.class_of(id)))
    }

    fn is_class_object(&self, obj: ObjRef) -> bool {
        self.id(obj).is_some_and(|id| self.heap.is_class(id))
    }

    fn class_display_name(&self, class: ObjRef) -> Option<String> {
        self.heap.class_display_name(self.id(class)?)
    }

    fn class_name(&self, class: ObjRef) -> Option<String> {
        self.heap.class_name(self.id(class)?)
    }

    fn canonical_name(&self, class: ObjRef) -> Option<String> {
        self.heap.canonical_name(self.id(class)?)
    }

    fn superclass(&self, class: ObjRef) -> Option<ObjRef> {
        let info = self.heap.class_info(self.id(class)?)?;
        self.local(info.superclass)
    }

    fn interfaces(&self, class: ObjRef) -> Vec<ObjRef> {
        let Some(info) = self.id(class).and_then(|c| self.heap.class_info(c)) else {
            return Vec::new();
        };
        info.interfaces.iter().map(|i| self.heap.new_local_ref(*i)).collect()
    }

    fn component_type(&self, class: ObjRef) -> Option<ObjRef> {
        let info = self.heap.class_info(self.id(class)?)?;
        match info.kind {
            heap::ClassKind::Array(component) => self.local(Some(component)),
            _ => None,
        }
    }

    fn constructors(&self, class: ObjRef) -> Vec<MemberInfo> {
        let Some(info) = self.id(class).and_then(|c| self.heap.class_info(c)) else {
            return Vec::new();
        };
        info.constructors
            .iter()
            .filter_map(|id| self.heap.method(*id))
            .map(|def| self.member_info(&def))
            .collect()
    }

    fn methods(&self, class: ObjRef) -> Vec<MemberInfo> {
        let Some(class) = self.id(class) else {
            return Vec::new();
        };
        self.heap
            .visible_methods(class)
            .iter()
            .map(|def| self.member_info(def))
            .collect()
    }

    fn fields(&self, class: ObjRef) -> Vec<FieldInfo> {
        let Some(class) = self.id(class) else {
            return Vec::new();
        };
        self.heap
            .visible_fields(class)
            .iter()
            .map(|def| FieldInfo {
                id: FieldId(def.id),
                name: def.name.clone(),
                modifiers: Modifiers(def.modifiers),
                field_type: self.heap.new_local_ref(def.ty),
            })
            .collect()
    }

    fn method_id(&self, class: ObjRef, name: &str, descriptor: &str) -> Option<MethodId> {
        let found = self.id(class).and_then(|class| {
            let mut candidates = self.heap.visible_methods(class);
            if let Some(object) = self.heap.class_info(self.heap.object_class()) {
                candidates.extend(object.methods.iter().filter_map(|id| self.heap.method(*id)));
            }
            candidates.into_iter().find(|m| {
                if m.name != name {
                    return false;
                }
                let params: String = m.params.iter().map(|p| self.heap.descriptor(*p)).collect();
                let ret = m.ret.map(|r| self.heap.descriptor(r)).unwrap_or_else(|| "V".to_string());
                format!("({}){}", params, ret) == descriptor
            })
        });
        match found {
            Some(def) => Some(MethodId(def.id)),
            None => {
                self.raise("java.lang.NoSuchMethodError", name);
                None
            }
        }
    }

    fn is_assignable_from(&self, sub: ObjRef, sup: ObjRef) -> bool {
        match (self.id(sub), self.id(sup)) {
            (Some(a), Some(b)) => self.heap.is_assignable(a, b),
            _ => false,
        }
    }

    fn is_instance_of(&self, obj: ObjRef, class: ObjRef) -> bool {
        match (self.id(obj), self.id(class)) {
            (Some(o), Some(c)) => self.heap.is_instance(o, c),
            _ => false,
        }
    }

    fn is_same_object(&self, a: Option<ObjRef>, b: Option<ObjRef>) -> bool {
        a.and_then(|r| self.id(r)) == b.and_then(|r| self.id(r))
    }

    fn identity_hash(&self, obj: ObjRef) -> i32 {
        self.id(obj).map(identity_hash).unwrap_or(0)
    }

    fn call_method(&self, target: CallTarget, method: MethodId, args: &[JValue], ret: PrimitiveTag) -> JValue {
        let Some(def) = self.heap.method(method.0) else {
            self.raise("java.lang.NoSuchMethodError", "unknown method id");
            return JValue::zero(ret);
        };
        let (this, body) = match target {
            CallTarget::Static(_) => (None, def.body.clone()),
            CallTarget::Instance(obj) => {
                let Some(id) = self.id(obj) else {
                    self.raise("java.lang.NullPointerException", &def.name);
                    return JValue::zero(ret);
                };
                let runtime = self.heap.class_of(id).unwrap_or(self.heap.object_class());
                (Some(id), self.heap.resolve_virtual(runtime, &def))
            }
        };
        match self.run(body, this, args, &def.name) {
            // A body may leave an exception pending through a nested env call
            Some(_) if self.exception_check() => JValue::zero(ret),
            Some(value) => self.to_jvalue(value, ret),
            None => JValue::zero(ret),
        }
    }

    fn new_object(&self, class: ObjRef, ctor: MethodId, args: &[JValue]) -> Option<ObjRef> {
        let class = self.id(class)?;
        let def = self.heap.method(ctor.0)?;
        let obj = self.heap.alloc(class, Payload::None);
        self.run(def.body.clone(), Some(obj), args, "<init>")?;
        if self.exception_check() {
            return None;
        }
        self.local(Some(obj))
    }

    fn get_field(&self, target: CallTarget, field: FieldId, tag: PrimitiveTag) -> JValue {
        let Some(def) = self.heap.field_def(field.0) else {
            self.raise("java.lang.NoSuchFieldError", "unknown field id");
            return JValue::zero(tag);
        };
        let obj = match target {
            CallTarget::Instance(r) => match self.id(r) {
                Some(id) => Some(id),
                None => {
                    self.raise("java.lang.NullPointerException", &def.name);
                    return JValue::zero(tag);
                }
            },
            CallTarget::Static(_) => None,
        };
        let value = self.heap.get_field_value(obj, &def);
        self.to_jvalue(value, tag)
    }

    fn set_field(&self, target: CallTarget, field: FieldId, value: JValue) {
        let Some(def) = self.heap.field_def(field.0) else {
            self.raise("java.lang.NoSuchFieldError", "unknown field id");
            return;
        };
        let obj = match target {
            CallTarget::Instance(r) => match self.id(r) {
                Some(id) => Some(id),
                None => {
                    self.raise("java.lang.NullPointerException", &def.name);
                    return;
                }
            },
            CallTarget::Static(_) => None,
        };
        let value = self.to_sim(&value);
        self.heap.set_field_value(obj, &def, value);
    }

    fn new_string(&self, value: &str) -> Option<ObjRef> {
        self.local(Some(self.heap.new_string(value)))
    }

    fn string_utf(&self, string: ObjRef) -> Option<String> {
        self.heap.string(self.id(string)?)
    }

    fn array_length(&self, array: ObjRef) -> Option<usize> {
        self.heap.array(self.id(array)?).map(|data| data.len())
    }

    fn object_array_element(&self, array: ObjRef, index: usize) -> Option<ObjRef> {
        let data = self.id(array).and_then(|a| self.heap.array(a));
        match data {
            Some(ArrayData::Object { items, .. }) => match items.get(index) {
                Some(item) => self.local(*item),
                None => {
                    self.raise("java.lang.ArrayIndexOutOfBoundsException", &index.to_string());
                    None
                }
            },
            _ => None,
        }
    }

    fn set_object_array_element(&self, array: ObjRef, index: usize, value: Option<ObjRef>) {
        let Some(array) = self.id(array) else {
            self.raise("java.lang.NullPointerException", "array");
            return;
        };
        let value = value.and_then(|v| self.id(v));
        let component = match self.heap.array(array) {
            Some(ArrayData::Object { component, items }) if index < items.len() => component,
            Some(_) => {
                self.raise("java.lang.IndexOutOfBoundsException", &index.to_string());
                return;
            }
            None => return,
        };
        if value.is_some_and(|v| !self.heap.is_instance(v, component)) {
            self.raise("java.lang.ArrayStoreException", "incompatible element");
            return;
        }
        self.heap.with_payload(array, |p| {
            if let Payload::Array(ArrayData::Object { items, .. }) = p {
                if let Some(slot) = items.get_mut(index) {
                    *slot = value;
                }
            }
        });
    }

    fn with_primitive_array_critical(
        &self,
        array: ObjRef,
        mode: ReleaseMode,
        f: &mut dyn FnMut(ArrayElements<'_>),
    ) -> bool {
        let Some(array) = self.id(array) else {
            return false;
        };
        self.heap
            .with_payload(array, |p| {
                let Payload::Array(data) = p else {
                    return false;
                };
                match mode {
                    ReleaseMode::Commit => match data.elements_mut() {
                        Some(elements) => {
                            f(elements);
                            true
                        }
                        None => false,
                    },
                    ReleaseMode::Abort => {
                        let mut copy = data.clone();
                        match copy.elements_mut() {
                            Some(elements) => {
                                f(elements);
                                true
                            }
                            None => false,
                        }
                    }
                }
            })
            .unwrap_or(false)
    }

    fn exception_check(&self) -> bool {
        self.pending.lock().is_some()
    }

    fn exception_occurred(&self) -> Option<ObjRef> {
        let pending = *self.pending.lock();
        self.local(pending)
    }

    fn exception_clear(&self) {
        *self.pending.lock() = None;
    }

    fn throw(&self, throwable: ObjRef) {
        if let Some(id) = self.id(throwable) {
            *self.pending.lock() = Some(id);
        }
    }

    fn throw_new(&self, class_name: &str, message: &str) {
        let dotted = class_name.replace('/', ".");
        match self.heap.class_by_name(&dotted) {
            Some(_) => self.raise(&dotted, message),
            None => self.raise("java.lang.NoClassDefFoundError", &dotted),
        }
    }

    fn exception_describe(&self) {
        let pending = self.pending.lock().take();
        if let Some(exc) = pending {
            let text = self.heap.java_to_string(Some(exc));
            self.described.lock().push(text);
        }
    }

    fn new_local_ref(&self, obj: ObjRef) -> ObjRef {
        match self.id(obj) {
            Some(id) => self.heap.new_local_ref(id),
            None => obj,
        }
    }

    fn delete_local_ref(&self, obj: ObjRef) {
        self.heap.delete_ref(obj, false);
    }

    fn new_global_ref(&self, obj: ObjRef) -> ObjRef {
        match self.id(obj) {
            Some(id) => self.heap.new_global_ref(id),
            None => obj,
        }
    }

    fn delete_global_ref(&self, obj: ObjRef) {
        self.heap.delete_ref(obj, true);
    }

    fn ensure_local_capacity(&self, _capacity: usize) -> bool {
        true
    }
}
