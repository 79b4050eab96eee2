//! Object heap of the in-memory runtime
//!
//! Holds classes, objects, member tables and the reference table that maps
//! [`ObjRef`] handles to heap objects. Nothing is ever collected: the heap
//! lives as long as its [`SimVm`](super::SimVm).

use super::builder::{ClassDef, MethodBody};
use super::SimError;
use crate::foreign::{ArrayElements, ObjRef, PrimitiveTag};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Heap object identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjId(pub u64);

/// Value as seen by native method bodies
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimValue {
    /// No value
    Void,
    /// boolean
    Bool(bool),
    /// byte
    Byte(i8),
    /// char
    Char(u16),
    /// short
    Short(i16),
    /// int
    Int(i32),
    /// long
    Long(i64),
    /// float
    Float(f32),
    /// double
    Double(f64),
    /// Reference (`None` is null)
    Ref(Option<ObjId>),
}

impl SimValue {
    /// Integral payload widened to i64
    pub fn as_long(&self) -> Option<i64> {
        match *self {
            SimValue::Byte(v) => Some(v as i64),
            SimValue::Char(v) => Some(v as i64),
            SimValue::Short(v) => Some(v as i64),
            SimValue::Int(v) => Some(v as i64),
            SimValue::Long(v) => Some(v),
            _ => None,
        }
    }

    /// Integral payload narrowed to i32
    pub fn as_int(&self) -> Option<i32> {
        self.as_long().map(|v| v as i32)
    }

    /// Floating payload widened to f64
    pub fn as_double(&self) -> Option<f64> {
        match *self {
            SimValue::Float(v) => Some(v as f64),
            SimValue::Double(v) => Some(v),
            _ => self.as_long().map(|v| v as f64),
        }
    }

    /// Boolean payload
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            SimValue::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// Reference payload (`None` for null or non-references)
    pub fn as_obj(&self) -> Option<ObjId> {
        match *self {
            SimValue::Ref(r) => r,
            _ => None,
        }
    }

    pub(crate) fn zero(tag: PrimitiveTag) -> Self {
        match tag {
            PrimitiveTag::Void => SimValue::Void,
            PrimitiveTag::Boolean => SimValue::Bool(false),
            PrimitiveTag::Byte => SimValue::Byte(0),
            PrimitiveTag::Char => SimValue::Char(0),
            PrimitiveTag::Short => SimValue::Short(0),
            PrimitiveTag::Int => SimValue::Int(0),
            PrimitiveTag::Long => SimValue::Long(0),
            PrimitiveTag::Float => SimValue::Float(0.0),
            PrimitiveTag::Double => SimValue::Double(0.0),
            PrimitiveTag::Object | PrimitiveTag::Array => SimValue::Ref(None),
        }
    }
}

/// Backing storage of an array object
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    /// boolean[]
    Boolean(Vec<bool>),
    /// byte[]
    Byte(Vec<i8>),
    /// char[]
    Char(Vec<u16>),
    /// short[]
    Short(Vec<i16>),
    /// int[]
    Int(Vec<i32>),
    /// long[]
    Long(Vec<i64>),
    /// float[]
    Float(Vec<f32>),
    /// double[]
    Double(Vec<f64>),
    /// Reference array with its component class
    Object {
        /// Component class
        component: ObjId,
        /// Elements
        items: Vec<Option<ObjId>>,
    },
}

impl ArrayData {
    /// Number of elements
    pub fn len(&self) -> usize {
        match self {
            ArrayData::Boolean(v) => v.len(),
            ArrayData::Byte(v) => v.len(),
            ArrayData::Char(v) => v.len(),
            ArrayData::Short(v) => v.len(),
            ArrayData::Int(v) => v.len(),
            ArrayData::Long(v) => v.len(),
            ArrayData::Float(v) => v.len(),
            ArrayData::Double(v) => v.len(),
            ArrayData::Object { items, .. } => items.len(),
        }
    }

    /// Whether the array is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn primitive_tag(&self) -> Option<PrimitiveTag> {
        Some(match self {
            ArrayData::Boolean(_) => PrimitiveTag::Boolean,
            ArrayData::Byte(_) => PrimitiveTag::Byte,
            ArrayData::Char(_) => PrimitiveTag::Char,
            ArrayData::Short(_) => PrimitiveTag::Short,
            ArrayData::Int(_) => PrimitiveTag::Int,
            ArrayData::Long(_) => PrimitiveTag::Long,
            ArrayData::Float(_) => PrimitiveTag::Float,
            ArrayData::Double(_) => PrimitiveTag::Double,
            ArrayData::Object { .. } => return None,
        })
    }

    pub(crate) fn elements_mut(&mut self) -> Option<ArrayElements<'_>> {
        Some(match self {
            ArrayData::Boolean(v) => ArrayElements::Boolean(v),
            ArrayData::Byte(v) => ArrayElements::Byte(v),
            ArrayData::Char(v) => ArrayElements::Char(v),
            ArrayData::Short(v) => ArrayElements::Short(v),
            ArrayData::Int(v) => ArrayElements::Int(v),
            ArrayData::Long(v) => ArrayElements::Long(v),
            ArrayData::Float(v) => ArrayElements::Float(v),
            ArrayData::Double(v) => ArrayElements::Double(v),
            ArrayData::Object { .. } => return None,
        })
    }
}

/// Native state attached to an object
#[derive(Debug, Clone, Default)]
pub enum Payload {
    /// Plain object
    #[default]
    None,
    /// java.lang.String
    Str(String),
    /// Array
    Array(ArrayData),
    /// Insertion-ordered map
    Map(Vec<(Option<ObjId>, Option<ObjId>)>),
    /// List
    List(Vec<Option<ObjId>>),
    /// Insertion-ordered set
    Set(Vec<Option<ObjId>>),
    /// Boxed primitive
    Boxed(SimValue),
    /// Snapshot iterator
    Iter {
        /// Remaining elements
        items: Vec<Option<ObjId>>,
        /// Next position
        pos: usize,
    },
    /// Throwable detail message
    Throwable(Option<String>),
}

#[derive(Debug, Default)]
pub(crate) struct ObjState {
    pub fields: FxHashMap<u64, SimValue>,
    pub payload: Payload,
}

#[derive(Debug)]
pub(crate) struct SimObject {
    pub class: ObjId,
    pub state: Mutex<ObjState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClassKind {
    Class,
    Interface,
    Primitive(PrimitiveTag),
    Array(ObjId),
}

#[derive(Debug)]
pub(crate) struct ClassInfo {
    pub name: String,
    pub kind: ClassKind,
    pub superclass: Option<ObjId>,
    pub interfaces: Vec<ObjId>,
    pub constructors: Vec<u64>,
    pub methods: Vec<u64>,
    pub fields: Vec<u64>,
}

pub(crate) struct MethodDef {
    pub id: u64,
    pub name: String,
    pub params: Vec<ObjId>,
    pub ret: Option<ObjId>,
    pub modifiers: u32,
    pub body: Option<MethodBody>,
}

pub(crate) struct FieldDef {
    pub id: u64,
    pub name: String,
    pub ty: ObjId,
    pub modifiers: u32,
    pub static_value: Mutex<SimValue>,
}

#[derive(Debug, Clone, Copy)]
struct RefEntry {
    obj: ObjId,
    global: bool,
}

/// Shared heap of the in-memory runtime
pub struct SimHeap {
    next_obj: AtomicU64,
    next_ref: AtomicU64,
    next_member: AtomicU64,
    object_class: ObjId,
    class_class: ObjId,
    objects: RwLock<FxHashMap<ObjId, Arc<SimObject>>>,
    classes: RwLock<FxHashMap<ObjId, Arc<ClassInfo>>>,
    class_names: RwLock<FxHashMap<String, ObjId>>,
    array_classes: Mutex<FxHashMap<ObjId, ObjId>>,
    methods: RwLock<FxHashMap<u64, Arc<MethodDef>>>,
    fields: RwLock<FxHashMap<u64, Arc<FieldDef>>>,
    refs: Mutex<FxHashMap<u64, RefEntry>>,
}

/// Identity hash of a heap object
pub fn identity_hash(id: ObjId) -> i32 {
    (id.0.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 33) as i32
}

impl SimHeap {
    /// Create an empty heap; ids of `java.lang.Object` and `java.lang.Class` are reserved
    pub(crate) fn empty() -> Self {
        let heap = SimHeap {
            next_obj: AtomicU64::new(3),
            next_ref: AtomicU64::new(1),
            next_member: AtomicU64::new(1),
            object_class: ObjId(1),
            class_class: ObjId(2),
            objects: RwLock::new(FxHashMap::default()),
            classes: RwLock::new(FxHashMap::default()),
            class_names: RwLock::new(FxHashMap::default()),
            array_classes: Mutex::new(FxHashMap::default()),
            methods: RwLock::new(FxHashMap::default()),
            fields: RwLock::new(FxHashMap::default()),
            refs: Mutex::new(FxHashMap::default()),
        };
        heap
    }

    fn alloc_id(&self) -> ObjId {
        ObjId(self.next_obj.fetch_add(1, Ordering::Relaxed))
    }

    fn alloc_member(&self) -> u64 {
        self.next_member.fetch_add(1, Ordering::Relaxed)
    }

    fn insert_class(&self, id: ObjId, info: ClassInfo) {
        self.class_names.write().insert(info.name.clone(), id);
        self.classes.write().insert(id, Arc::new(info));
        self.objects.write().insert(
            id,
            Arc::new(SimObject {
                class: self.class_class,
                state: Mutex::new(ObjState::default()),
            }),
        );
    }

    // ---- classes ----

    /// `java.lang.Object`
    pub fn object_class(&self) -> ObjId {
        self.object_class
    }

    /// Look up a class by binary name (`java.lang.String`, `java/lang/String`, `[I`)
    pub fn class_by_name(&self, name: &str) -> Option<ObjId> {
        let dotted = name.replace('/', ".");
        if let Some(id) = self.class_names.read().get(&dotted) {
            return Some(*id);
        }
        if let Some(rest) = dotted.strip_prefix('[') {
            let component = self.class_from_descriptor(rest)?;
            return Some(self.array_class(component));
        }
        None
    }

    fn class_from_descriptor(&self, desc: &str) -> Option<ObjId> {
        let primitive = |name: &str| self.class_names.read().get(name).copied();
        match desc {
            "Z" => primitive("boolean"),
            "B" => primitive("byte"),
            "C" => primitive("char"),
            "S" => primitive("short"),
            "I" => primitive("int"),
            "J" => primitive("long"),
            "F" => primitive("float"),
            "D" => primitive("double"),
            _ => {
                if let Some(rest) = desc.strip_prefix('[') {
                    let component = self.class_from_descriptor(rest)?;
                    return Some(self.array_class(component));
                }
                let name = desc.strip_prefix('L')?.strip_suffix(';')?;
                self.class_names.read().get(name).copied()
            }
        }
    }

    /// Resolve a source-style type name (`int`, `java.lang.String`, `int[]`)
    pub fn resolve_type(&self, name: &str) -> Option<ObjId> {
        let name = name.trim();
        if let Some(base) = name.strip_suffix("[]") {
            let component = self.resolve_type(base)?;
            return Some(self.array_class(component));
        }
        self.class_by_name(name)
    }

    /// Array class with the given component, created on first use
    pub fn array_class(&self, component: ObjId) -> ObjId {
        if let Some(id) = self.array_classes.lock().get(&component) {
            return *id;
        }
        let component_name = self.class_name(component).unwrap_or_default();
        let name = match self.class_info(component).map(|c| c.kind) {
            Some(ClassKind::Primitive(tag)) => format!("[{}", tag.as_char()),
            Some(ClassKind::Array(_)) => format!("[{}", component_name),
            _ => format!("[L{};", component_name),
        };

        let mut arrays = self.array_classes.lock();
        if let Some(id) = arrays.get(&component) {
            return *id;
        }
        let id = self.alloc_id();
        self.insert_class(id, ClassInfo::bare(&name, ClassKind::Array(component), Some(self.object_class)));
        arrays.insert(component, id);
        id
    }

    pub(crate) fn class_info(&self, class: ObjId) -> Option<Arc<ClassInfo>> {
        self.classes.read().get(&class).cloned()
    }

    /// Whether `obj` is a class object
    pub fn is_class(&self, obj: ObjId) -> bool {
        self.classes.read().contains_key(&obj)
    }

    /// Binary name of a class
    pub fn class_name(&self, class: ObjId) -> Option<String> {
        self.class_info(class).map(|c| c.name.clone())
    }

    /// Canonical name of a class (`int[]` rather than `[I`)
    pub fn canonical_name(&self, class: ObjId) -> Option<String> {
        let info = self.class_info(class)?;
        match info.kind {
            ClassKind::Array(component) => Some(format!("{}[]", self.canonical_name(component)?)),
            _ => Some(info.name.clone()),
        }
    }

    /// `Class.toString()`
    pub fn class_display_name(&self, class: ObjId) -> Option<String> {
        let info = self.class_info(class)?;
        Some(match info.kind {
            ClassKind::Interface => format!("interface {}", info.name),
            ClassKind::Primitive(_) => info.name.clone(),
            _ => format!("class {}", info.name),
        })
    }

    pub(crate) fn primitive_tag_of(&self, class: ObjId) -> PrimitiveTag {
        match self.class_info(class).map(|c| c.kind) {
            Some(ClassKind::Primitive(tag)) => tag,
            Some(ClassKind::Array(_)) => PrimitiveTag::Array,
            _ => PrimitiveTag::Object,
        }
    }

    pub(crate) fn superclass(&self, class: ObjId) -> Option<ObjId> {
        self.class_info(class)?.superclass
    }

    /// Runtime class of an object
    pub fn class_of(&self, obj: ObjId) -> Option<ObjId> {
        self.objects.read().get(&obj).map(|o| o.class)
    }

    /// Whether `sub` is assignable to `sup`
    pub fn is_assignable(&self, sub: ObjId, sup: ObjId) -> bool {
        if sub == sup {
            return true;
        }
        let (Some(sub_info), Some(sup_info)) = (self.class_info(sub), self.class_info(sup)) else {
            return false;
        };
        if matches!(sub_info.kind, ClassKind::Primitive(_)) || matches!(sup_info.kind, ClassKind::Primitive(_)) {
            return false;
        }
        if sup == self.object_class {
            return true;
        }
        if let (ClassKind::Array(a), ClassKind::Array(b)) = (sub_info.kind, sup_info.kind) {
            return self.is_assignable(a, b);
        }
        if sub_info.superclass.is_some_and(|s| self.is_assignable(s, sup)) {
            return true;
        }
        sub_info.interfaces.iter().any(|i| self.is_assignable(*i, sup))
    }

    /// Whether `obj` is an instance of `class`
    pub fn is_instance(&self, obj: ObjId, class: ObjId) -> bool {
        self.class_of(obj).is_some_and(|c| self.is_assignable(c, class))
    }

    /// Define one class
    pub fn define_class(&self, def: ClassDef) -> Result<ObjId, SimError> {
        Ok(self.define_classes(vec![def])?[0])
    }

    /// Define classes that may refer to each other
    pub fn define_classes(&self, defs: Vec<ClassDef>) -> Result<Vec<ObjId>, SimError> {
        for def in &defs {
            if self.class_names.read().contains_key(def.name()) {
                return Err(SimError::DuplicateClass(def.name().to_string()));
            }
        }

        let ids: Vec<ObjId> = defs
            .iter()
            .map(|def| match def.name() {
                "java.lang.Object" => self.object_class,
                "java.lang.Class" => self.class_class,
                _ => self.alloc_id(),
            })
            .collect();
        let mut pending = Vec::with_capacity(defs.len());
        // Register names first so the batch can reference itself
        {
            let mut names = self.class_names.write();
            for (def, id) in defs.iter().zip(&ids) {
                names.insert(def.name().to_string(), *id);
            }
        }

        for (def, id) in defs.into_iter().zip(&ids) {
            let superclass = match (def.is_interface(), def.superclass()) {
                _ if *id == self.object_class => None,
                (true, _) => None,
                (false, Some(name)) => Some(self.require(name)?),
                (false, None) => Some(self.object_class),
            };
            let interfaces = def
                .interfaces()
                .iter()
                .map(|name| self.require(name))
                .collect::<Result<Vec<_>, _>>()?;

            let parts = def.into_parts();
            let ctor_ids: Vec<u64> = parts.constructors.iter().map(|_| self.alloc_member()).collect();
            let method_ids: Vec<u64> = parts.methods.iter().map(|_| self.alloc_member()).collect();
            let field_ids: Vec<u64> = parts.fields.iter().map(|_| self.alloc_member()).collect();
            let kind = if parts.interface { ClassKind::Interface } else { ClassKind::Class };

            self.insert_class(
                *id,
                ClassInfo {
                    name: parts.name.clone(),
                    kind,
                    superclass,
                    interfaces,
                    constructors: ctor_ids.clone(),
                    methods: method_ids.clone(),
                    fields: field_ids.clone(),
                },
            );
            pending.push((parts, ctor_ids, method_ids, field_ids));
        }

        // Member types may name array classes of the batch, so resolve them last
        for (parts, ctor_ids, method_ids, field_ids) in pending {
            for (spec, id) in parts.constructors.into_iter().zip(ctor_ids) {
                self.insert_method(id, spec, true)?;
            }
            for (spec, id) in parts.methods.into_iter().zip(method_ids) {
                self.insert_method(id, spec, false)?;
            }
            for (spec, id) in parts.fields.into_iter().zip(field_ids) {
                let ty = self.require(&spec.ty)?;
                let zero = SimValue::zero(self.primitive_tag_of(ty));
                let mut modifiers = crate::foreign::Modifiers::PUBLIC;
                if spec.is_static {
                    modifiers |= crate::foreign::Modifiers::STATIC;
                }
                self.fields.write().insert(
                    id,
                    Arc::new(FieldDef {
                        id,
                        name: spec.name,
                        ty,
                        modifiers,
                        static_value: Mutex::new(zero),
                    }),
                );
            }
        }
        Ok(ids)
    }

    fn insert_method(&self, id: u64, spec: super::builder::MemberSpec, ctor: bool) -> Result<(), SimError> {
        let params = spec
            .params
            .iter()
            .map(|p| self.require(p))
            .collect::<Result<Vec<_>, _>>()?;
        let ret = match (&spec.ret, ctor) {
            (_, true) => None,
            (Some(r), false) => Some(self.require(r)?),
            (None, false) => Some(self.require("void")?),
        };
        let mut modifiers = crate::foreign::Modifiers::PUBLIC;
        if spec.is_static {
            modifiers |= crate::foreign::Modifiers::STATIC;
        }
        if spec.body.is_none() {
            modifiers |= crate::foreign::Modifiers::ABSTRACT;
        }
        self.methods.write().insert(
            id,
            Arc::new(MethodDef {
                id,
                name: if ctor { "<init>".to_string() } else { spec.name },
                params,
                ret,
                modifiers,
                body: spec.body,
            }),
        );
        Ok(())
    }

    fn require(&self, name: &str) -> Result<ObjId, SimError> {
        self.resolve_type(name).ok_or_else(|| SimError::UnknownClass(name.to_string()))
    }

    pub(crate) fn define_primitive(&self, name: &str, tag: PrimitiveTag) {
        let id = self.alloc_id();
        self.insert_class(id, ClassInfo::bare(name, ClassKind::Primitive(tag), None));
    }

    // ---- members ----

    pub(crate) fn method(&self, id: u64) -> Option<Arc<MethodDef>> {
        self.methods.read().get(&id).cloned()
    }

    pub(crate) fn field_def(&self, id: u64) -> Option<Arc<FieldDef>> {
        self.fields.read().get(&id).cloned()
    }

    /// Public methods of a class, most-derived first, including inherited ones
    pub(crate) fn visible_methods(&self, class: ObjId) -> Vec<Arc<MethodDef>> {
        let mut out: Vec<Arc<MethodDef>> = Vec::new();
        let mut seen_interfaces = Vec::new();
        let push = |m: Arc<MethodDef>, out: &mut Vec<Arc<MethodDef>>| {
            if !out.iter().any(|o| o.name == m.name && o.params == m.params) {
                out.push(m);
            }
        };

        let mut chain = Vec::new();
        let mut cur = Some(class);
        while let Some(c) = cur {
            chain.push(c);
            cur = self.superclass(c);
        }
        for c in &chain {
            if let Some(info) = self.class_info(*c) {
                for id in &info.methods {
                    if let Some(m) = self.method(*id) {
                        push(m, &mut out);
                    }
                }
            }
        }
        for c in &chain {
            self.collect_interfaces(*c, &mut seen_interfaces);
        }
        for iface in seen_interfaces {
            if let Some(info) = self.class_info(iface) {
                for id in &info.methods {
                    if let Some(m) = self.method(*id) {
                        if m.modifiers & crate::foreign::Modifiers::STATIC == 0 {
                            push(m, &mut out);
                        }
                    }
                }
            }
        }
        out
    }

    fn collect_interfaces(&self, class: ObjId, out: &mut Vec<ObjId>) {
        let Some(info) = self.class_info(class) else {
            return;
        };
        if info.kind == ClassKind::Interface && !out.contains(&class) {
            out.push(class);
        }
        for iface in &info.interfaces {
            self.collect_interfaces(*iface, out);
        }
    }

    /// Public fields of a class, including inherited ones
    pub(crate) fn visible_fields(&self, class: ObjId) -> Vec<Arc<FieldDef>> {
        let mut classes = Vec::new();
        let mut cur = Some(class);
        while let Some(c) = cur {
            classes.push(c);
            cur = self.superclass(c);
        }
        let mut interfaces = Vec::new();
        for c in &classes {
            self.collect_interfaces(*c, &mut interfaces);
        }
        classes.extend(interfaces);

        let mut out: Vec<Arc<FieldDef>> = Vec::new();
        for c in classes {
            if let Some(info) = self.class_info(c) {
                for id in &info.fields {
                    if let Some(f) = self.field_def(*id) {
                        if !out.iter().any(|o| o.name == f.name) {
                            out.push(f);
                        }
                    }
                }
            }
        }
        out
    }

    /// JNI-style type descriptor of a class
    pub(crate) fn descriptor(&self, class: ObjId) -> String {
        let Some(info) = self.class_info(class) else {
            return String::new();
        };
        match info.kind {
            ClassKind::Primitive(tag) => tag.as_char().to_string(),
            ClassKind::Array(_) => info.name.replace('.', "/"),
            _ => format!("L{};", info.name.replace('.', "/")),
        }
    }

    /// Implementation of `def` selected by the runtime class of the receiver
    pub(crate) fn resolve_virtual(&self, runtime_class: ObjId, def: &Arc<MethodDef>) -> Option<MethodBody> {
        let mut cur = Some(runtime_class);
        while let Some(c) = cur {
            let info = self.class_info(c)?;
            for id in &info.methods {
                if let Some(m) = self.method(*id) {
                    if m.name == def.name && m.params == def.params && m.body.is_some() {
                        return m.body.clone();
                    }
                }
            }
            cur = info.superclass;
        }
        def.body.clone()
    }

    fn find_field(&self, class: ObjId, name: &str) -> Option<Arc<FieldDef>> {
        self.visible_fields(class).into_iter().find(|f| f.name == name)
    }

    // ---- objects ----

    pub(crate) fn object(&self, obj: ObjId) -> Option<Arc<SimObject>> {
        self.objects.read().get(&obj).cloned()
    }

    /// Allocate an instance of `class` with the given payload, without running a constructor
    pub fn alloc(&self, class: ObjId, payload: Payload) -> ObjId {
        let id = self.alloc_id();
        self.objects.write().insert(
            id,
            Arc::new(SimObject {
                class,
                state: Mutex::new(ObjState {
                    fields: FxHashMap::default(),
                    payload,
                }),
            }),
        );
        id
    }

    fn alloc_named(&self, class_name: &str, payload: Payload) -> ObjId {
        let class = self.class_by_name(class_name).unwrap_or(self.object_class);
        self.alloc(class, payload)
    }

    /// Run `f` over an object's payload
    pub fn with_payload<R>(&self, obj: ObjId, f: impl FnOnce(&mut Payload) -> R) -> Option<R> {
        let object = self.object(obj)?;
        let mut state = object.state.lock();
        Some(f(&mut state.payload))
    }

    /// Clone of an object's payload
    pub fn payload(&self, obj: ObjId) -> Option<Payload> {
        self.with_payload(obj, |p| p.clone())
    }

    /// New `java.lang.String`
    pub fn new_string(&self, s: &str) -> ObjId {
        self.alloc_named("java.lang.String", Payload::Str(s.to_string()))
    }

    /// Contents of a string object
    pub fn string(&self, obj: ObjId) -> Option<String> {
        match self.payload(obj)? {
            Payload::Str(s) => Some(s),
            _ => None,
        }
    }

    /// New array object
    pub fn new_array(&self, data: ArrayData) -> ObjId {
        let component = match &data {
            ArrayData::Object { component, .. } => *component,
            other => {
                let tag = other.primitive_tag().unwrap_or(PrimitiveTag::Int);
                self.resolve_type(primitive_name(tag)).unwrap_or(self.object_class)
            }
        };
        let class = self.array_class(component);
        self.alloc(class, Payload::Array(data))
    }

    /// Clone of an array's storage
    pub fn array(&self, obj: ObjId) -> Option<ArrayData> {
        match self.payload(obj)? {
            Payload::Array(data) => Some(data),
            _ => None,
        }
    }

    /// New `java.util.ArrayList`
    pub fn new_list(&self, items: Vec<Option<ObjId>>) -> ObjId {
        self.alloc_named("java.util.ArrayList", Payload::List(items))
    }

    /// New `java.util.HashMap`
    pub fn new_map(&self, entries: Vec<(Option<ObjId>, Option<ObjId>)>) -> ObjId {
        self.alloc_named("java.util.HashMap", Payload::Map(entries))
    }

    /// New `java.util.HashSet`
    pub fn new_set(&self, items: Vec<Option<ObjId>>) -> ObjId {
        self.alloc_named("java.util.HashSet", Payload::Set(items))
    }

    /// Box a primitive into its wrapper class
    pub fn boxed(&self, value: SimValue) -> ObjId {
        let class = match value {
            SimValue::Bool(_) => "java.lang.Boolean",
            SimValue::Byte(_) => "java.lang.Byte",
            SimValue::Char(_) => "java.lang.Character",
            SimValue::Short(_) => "java.lang.Short",
            SimValue::Int(_) => "java.lang.Integer",
            SimValue::Long(_) => "java.lang.Long",
            SimValue::Float(_) => "java.lang.Float",
            SimValue::Double(_) => "java.lang.Double",
            SimValue::Void | SimValue::Ref(_) => "java.lang.Object",
        };
        self.alloc_named(class, Payload::Boxed(value))
    }

    /// New throwable of the named class
    ///
    /// Falls back to `java.lang.RuntimeException` when the class is unknown.
    pub fn exception(&self, class_name: &str, message: &str) -> ObjId {
        let class = self
            .class_by_name(class_name)
            .or_else(|| self.class_by_name("java.lang.RuntimeException"))
            .unwrap_or(self.object_class);
        self.alloc(class, Payload::Throwable(Some(message.to_string())))
    }

    /// Read a field by name (instance or static)
    pub fn field(&self, obj: ObjId, name: &str) -> Option<SimValue> {
        let class = self.class_of(obj)?;
        let def = self.find_field(class, name)?;
        Some(self.get_field_value(Some(obj), &def))
    }

    /// Write a field by name (instance or static)
    pub fn set_field(&self, obj: ObjId, name: &str, value: SimValue) -> bool {
        let Some(def) = self.class_of(obj).and_then(|c| self.find_field(c, name)) else {
            return false;
        };
        self.set_field_value(Some(obj), &def, value);
        true
    }

    /// Read a static field of a class by name
    pub fn static_field(&self, class: ObjId, name: &str) -> Option<SimValue> {
        let def = self.find_field(class, name)?;
        let value = *def.static_value.lock();
        Some(value)
    }

    pub(crate) fn get_field_value(&self, obj: Option<ObjId>, def: &FieldDef) -> SimValue {
        if def.modifiers & crate::foreign::Modifiers::STATIC != 0 {
            return *def.static_value.lock();
        }
        let zero = SimValue::zero(self.primitive_tag_of(def.ty));
        match obj.and_then(|o| self.object(o)) {
            Some(object) => object.state.lock().fields.get(&def.id).copied().unwrap_or(zero),
            None => zero,
        }
    }

    pub(crate) fn set_field_value(&self, obj: Option<ObjId>, def: &FieldDef, value: SimValue) {
        if def.modifiers & crate::foreign::Modifiers::STATIC != 0 {
            *def.static_value.lock() = value;
            return;
        }
        if let Some(object) = obj.and_then(|o| self.object(o)) {
            object.state.lock().fields.insert(def.id, value);
        }
    }

    /// Value equality used by the built-in collections
    pub fn java_equals(&self, a: Option<ObjId>, b: Option<ObjId>) -> bool {
        let (a, b) = match (a, b) {
            (None, None) => return true,
            (Some(a), Some(b)) => (a, b),
            _ => return false,
        };
        if a == b {
            return true;
        }
        match (self.payload(a), self.payload(b)) {
            (Some(Payload::Str(x)), Some(Payload::Str(y))) => x == y,
            (Some(Payload::Boxed(x)), Some(Payload::Boxed(y))) => x == y && self.class_of(a) == self.class_of(b),
            (Some(Payload::List(x)), Some(Payload::List(y))) => {
                x.len() == y.len() && x.iter().zip(&y).all(|(p, q)| self.java_equals(*p, *q))
            }
            _ => false,
        }
    }

    /// Hash code used by the built-in classes
    pub fn java_hash(&self, obj: ObjId) -> i32 {
        match self.payload(obj) {
            Some(Payload::Str(s)) => s.encode_utf16().fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(c as i32)),
            Some(Payload::Boxed(v)) => match v {
                SimValue::Bool(b) => {
                    if b {
                        1231
                    } else {
                        1237
                    }
                }
                SimValue::Long(l) => (l ^ ((l as u64) >> 32) as i64) as i32,
                SimValue::Float(f) => f.to_bits() as i32,
                SimValue::Double(d) => {
                    let bits = d.to_bits();
                    (bits ^ (bits >> 32)) as i32
                }
                other => other.as_int().unwrap_or(0),
            },
            _ => identity_hash(obj),
        }
    }

    /// `toString()` of the built-in classes
    pub fn java_to_string(&self, obj: Option<ObjId>) -> String {
        let Some(obj) = obj else {
            return "null".to_string();
        };
        match self.payload(obj) {
            Some(Payload::Str(s)) => s,
            Some(Payload::Boxed(v)) => match v {
                SimValue::Bool(b) => b.to_string(),
                SimValue::Char(c) => String::from_utf16_lossy(&[c]),
                SimValue::Float(f) => format!("{:?}", f),
                SimValue::Double(d) => format!("{:?}", d),
                other => other.as_long().map(|l| l.to_string()).unwrap_or_default(),
            },
            Some(Payload::List(items)) | Some(Payload::Set(items)) => {
                let parts: Vec<String> = items.iter().map(|i| self.java_to_string(*i)).collect();
                format!("[{}]", parts.join(", "))
            }
            Some(Payload::Map(entries)) => {
                let parts: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}={}", self.java_to_string(*k), self.java_to_string(*v)))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Some(Payload::Throwable(message)) => {
                let name = self.class_of(obj).and_then(|c| self.class_name(c)).unwrap_or_default();
                match message {
                    Some(m) => format!("{}: {}", name, m),
                    None => name,
                }
            }
            _ => {
                let name = self.class_of(obj).and_then(|c| self.class_name(c)).unwrap_or_default();
                format!("{}@{:x}", name, identity_hash(obj))
            }
        }
    }

    // ---- references ----

    fn insert_ref(&self, obj: ObjId, global: bool) -> ObjRef {
        loop {
            let raw = self.next_ref.fetch_add(1, Ordering::Relaxed);
            // Zero is the null reference; skip it on wrap-around
            if let Some(r) = ObjRef::from_raw(raw) {
                self.refs.lock().insert(raw, RefEntry { obj, global });
                return r;
            }
        }
    }

    /// New local reference to `obj`
    pub fn new_local_ref(&self, obj: ObjId) -> ObjRef {
        self.insert_ref(obj, false)
    }

    /// New global reference to `obj`
    pub fn new_global_ref(&self, obj: ObjId) -> ObjRef {
        self.insert_ref(obj, true)
    }

    /// Object behind a live reference
    pub fn resolve(&self, r: ObjRef) -> Option<ObjId> {
        self.refs.lock().get(&r.as_raw()).map(|e| e.obj)
    }

    pub(crate) fn delete_ref(&self, r: ObjRef, global: bool) {
        let mut refs = self.refs.lock();
        if refs.get(&r.as_raw()).is_some_and(|e| e.global == global) {
            refs.remove(&r.as_raw());
        }
    }

    /// Live global references
    pub fn global_ref_count(&self) -> usize {
        self.refs.lock().values().filter(|e| e.global).count()
    }

    /// Live local references
    pub fn local_ref_count(&self) -> usize {
        self.refs.lock().values().filter(|e| !e.global).count()
    }
}

impl ClassInfo {
    fn bare(name: &str, kind: ClassKind, superclass: Option<ObjId>) -> Self {
        ClassInfo {
            name: name.to_string(),
            kind,
            superclass,
            interfaces: Vec::new(),
            constructors: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
        }
    }
}

pub(crate) fn primitive_name(tag: PrimitiveTag) -> &'static str {
    match tag {
        PrimitiveTag::Void => "void",
        PrimitiveTag::Boolean => "boolean",
        PrimitiveTag::Byte => "byte",
        PrimitiveTag::Char => "char",
        PrimitiveTag::Short => "short",
        PrimitiveTag::Int => "int",
        PrimitiveTag::Long => "long",
        PrimitiveTag::Float => "float",
        PrimitiveTag::Double => "double",
        PrimitiveTag::Object | PrimitiveTag::Array => "java.lang.Object",
    }
}
