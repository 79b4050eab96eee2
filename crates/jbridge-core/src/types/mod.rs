//! Synthesized foreign types
//!
//! A [`SynthesizedType`] is the host-side descriptor of one foreign class. It
//! is created once per class by the synthesizer, shared through the
//! [`TypeCache`], and owns:
//!
//! - method and field descriptors, hashed into name buckets
//! - the ordered symbol directory
//! - base and interface links (the manual MRO)
//! - the decoration record and converter chain
//! - array element metadata and the protocol set

pub mod cache;
pub(crate) mod helpers;
pub(crate) mod synth;

pub use cache::TypeCache;

use crate::foreign::{FieldId, ForeignEnv, MethodId, ObjRef, PrimitiveTag};
use crate::intern::Interner;
use crate::marshal::convert::ConverterChain;
use crate::value::Callable;
use helpers::{CallHelper, FieldAccessors};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::{Arc, Weak};

/// Bucket index hash for member names
pub(crate) fn name_hash(name: &str) -> i32 {
    name.bytes()
        .fold(0i32, |h, c| h.wrapping_mul(23).wrapping_add((c as i32).wrapping_mul(3)))
}

pub(crate) fn bucket_of(name: &str, buckets: usize) -> usize {
    (name_hash(name) as u32 as usize) % buckets.max(1)
}

/// A foreign class reference paired with its primitive tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeRef {
    /// Class (global reference)
    pub class: ObjRef,
    /// Marshaling tag
    pub tag: PrimitiveTag,
}

/// Callable member of a synthesized type
#[derive(Debug)]
pub struct MethodDescriptor {
    /// Member name (`"<init>"` for constructors)
    pub name: Arc<str>,
    /// Foreign method handle
    pub id: MethodId,
    /// Parameter types in order
    pub params: Vec<TypeRef>,
    /// Return type (`None` for constructors)
    pub ret: Option<TypeRef>,
    /// Static methods and constructors dispatch on the class
    pub is_static: bool,
    pub(crate) helper: CallHelper,
}

impl MethodDescriptor {
    /// Number of parameters
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// Field member of a synthesized type
#[derive(Debug)]
pub struct FieldDescriptor {
    /// Field name
    pub name: Arc<str>,
    /// Foreign field handle
    pub id: FieldId,
    /// Declared type
    pub ty: TypeRef,
    /// Static fields are read through the class
    pub is_static: bool,
    pub(crate) accessors: Option<FieldAccessors>,
}

/// Container protocol of a type; at most one applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// `java.util.Map`
    Map,
    /// `java.util.List`
    List,
    /// `java.util.Set`
    Set,
    /// Array with the given element tag
    Array(PrimitiveTag),
}

/// Host protocols installed on a type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtocolSet {
    /// `java.lang.Iterable`
    pub iterable: bool,
    /// `java.util.Iterator`
    pub iterator: bool,
    /// `java.lang.Comparable`
    pub comparable: bool,
    /// Container shim
    pub container: Option<Container>,
}

/// Decoration hook kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecorationKind {
    /// Calling an instance
    Call,
    /// Reading an attribute
    GetAttr,
    /// Writing or deleting an attribute
    SetAttr,
}

#[derive(Debug, Clone)]
pub(crate) struct DecorationSlot {
    pub callback: Option<Callable>,
    pub inherited: bool,
}

impl Default for DecorationSlot {
    fn default() -> Self {
        Self {
            callback: None,
            inherited: true,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Decoration {
    call: DecorationSlot,
    getattr: DecorationSlot,
    setattr: DecorationSlot,
}

impl Decoration {
    pub(crate) fn slot(&self, kind: DecorationKind) -> &DecorationSlot {
        match kind {
            DecorationKind::Call => &self.call,
            DecorationKind::GetAttr => &self.getattr,
            DecorationKind::SetAttr => &self.setattr,
        }
    }

    pub(crate) fn slot_mut(&mut self, kind: DecorationKind) -> &mut DecorationSlot {
        match kind {
            DecorationKind::Call => &mut self.call,
            DecorationKind::GetAttr => &mut self.getattr,
            DecorationKind::SetAttr => &mut self.setattr,
        }
    }
}

pub(crate) struct TypeBody {
    pub base: Option<Arc<SynthesizedType>>,
    pub interfaces: Vec<Arc<SynthesizedType>>,
    pub methods: Vec<Vec<Arc<MethodDescriptor>>>,
    pub fields: Vec<Vec<Arc<FieldDescriptor>>>,
    pub dir: Vec<Arc<str>>,
    pub protocols: ProtocolSet,
}

/// Host descriptor of a foreign class
pub struct SynthesizedType {
    class: ObjRef,
    name: Arc<str>,
    identity_hash: i32,
    tag: PrimitiveTag,
    element: Option<TypeRef>,
    to_string_id: Option<MethodId>,
    hash_code_id: Option<MethodId>,
    body: OnceCell<TypeBody>,
    pub(crate) decoration: RwLock<Decoration>,
    pub(crate) converters: RwLock<ConverterChain>,
    subclasses: Mutex<Vec<Weak<SynthesizedType>>>,
}

pub(crate) struct TypeShell {
    pub class: ObjRef,
    pub name: Arc<str>,
    pub identity_hash: i32,
    pub tag: PrimitiveTag,
    pub element: Option<TypeRef>,
    pub to_string_id: Option<MethodId>,
    pub hash_code_id: Option<MethodId>,
}

impl SynthesizedType {
    pub(crate) fn from_shell(shell: TypeShell) -> Self {
        Self {
            class: shell.class,
            name: shell.name,
            identity_hash: shell.identity_hash,
            tag: shell.tag,
            element: shell.element,
            to_string_id: shell.to_string_id,
            hash_code_id: shell.hash_code_id,
            body: OnceCell::new(),
            decoration: RwLock::new(Decoration::default()),
            converters: RwLock::new(ConverterChain::default()),
            subclasses: Mutex::new(Vec::new()),
        }
    }

    /// Class object (global reference owned by the type)
    pub fn class(&self) -> ObjRef {
        self.class
    }

    /// Display name, e.g. `class java.lang.String`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity hash of the class object
    pub fn identity_hash(&self) -> i32 {
        self.identity_hash
    }

    /// Marshaling tag of values of this type
    pub fn tag(&self) -> PrimitiveTag {
        self.tag
    }

    /// Whether the type describes one of the eight value primitives
    pub fn is_primitive(&self) -> bool {
        self.tag.is_primitive() || self.tag == PrimitiveTag::Void
    }

    /// Component type of an array class
    pub fn element(&self) -> Option<TypeRef> {
        self.element
    }

    /// Whether synthesis has completed
    pub fn is_ready(&self) -> bool {
        self.body.get().is_some()
    }

    pub(crate) fn body(&self) -> Option<&TypeBody> {
        self.body.get()
    }

    pub(crate) fn publish(&self, body: TypeBody) {
        // Synthesis runs under the synthesis lock, so the cell is set once
        let _ = self.body.set(body);
    }

    pub(crate) fn to_string_id(&self) -> Option<MethodId> {
        self.to_string_id
    }

    pub(crate) fn hash_code_id(&self) -> Option<MethodId> {
        self.hash_code_id
    }

    /// Primary base (superclass) type
    pub fn base(&self) -> Option<&Arc<SynthesizedType>> {
        self.body().and_then(|b| b.base.as_ref())
    }

    /// Directly implemented interface types
    pub fn interfaces(&self) -> &[Arc<SynthesizedType>] {
        self.body().map(|b| b.interfaces.as_slice()).unwrap_or(&[])
    }

    /// Installed protocols
    pub fn protocols(&self) -> ProtocolSet {
        self.body().map(|b| b.protocols).unwrap_or_default()
    }

    /// Member names, in first-seen order
    pub fn symbols(&self) -> &[Arc<str>] {
        self.body().map(|b| b.dir.as_slice()).unwrap_or(&[])
    }

    /// Overloads named `name` (constructors are `"<init>"`)
    pub fn methods_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Arc<MethodDescriptor>> + 'a {
        let bucket = self
            .body()
            .filter(|b| !b.methods.is_empty())
            .map(|b| b.methods[bucket_of(name, b.methods.len())].as_slice())
            .unwrap_or(&[]);
        bucket.iter().filter(move |m| &*m.name == name)
    }

    /// Whether any method is named `name`
    pub fn has_method(&self, name: &str) -> bool {
        self.methods_named(name).next().is_some()
    }

    /// Whether a static method is named `name`
    pub fn has_static_method(&self, name: &str) -> bool {
        self.methods_named(name).any(|m| m.is_static)
    }

    /// Field named `name`
    pub fn field(&self, name: &str) -> Option<&Arc<FieldDescriptor>> {
        let body = self.body().filter(|b| !b.fields.is_empty())?;
        body.fields[bucket_of(name, body.fields.len())]
            .iter()
            .find(|f| &*f.name == name)
    }

    /// Number of method descriptors, constructors included
    pub fn method_count(&self) -> usize {
        self.body().map(|b| b.methods.iter().map(Vec::len).sum()).unwrap_or(0)
    }

    /// Number of field descriptors
    pub fn field_count(&self) -> usize {
        self.body().map(|b| b.fields.iter().map(Vec::len).sum()).unwrap_or(0)
    }

    /// Current decoration callback of the given kind, own or inherited
    pub fn decoration(&self, kind: DecorationKind) -> Option<Callable> {
        self.decoration.read().slot(kind).callback.clone()
    }

    /// Whether the decoration of `kind` was set on this type itself
    pub fn has_own_decoration(&self, kind: DecorationKind) -> bool {
        !self.decoration.read().slot(kind).inherited
    }

    pub(crate) fn pinned(&self) -> bool {
        let decoration = self.decoration.read();
        let own = [DecorationKind::Call, DecorationKind::GetAttr, DecorationKind::SetAttr]
            .iter()
            .any(|k| !decoration.slot(*k).inherited);
        own || !self.converters.read().is_empty()
    }

    /// Type, base chain, then interfaces not already present
    pub fn mro(self: &Arc<Self>) -> Vec<Arc<SynthesizedType>> {
        let mut out = vec![self.clone()];
        let mut cur = self.base().cloned();
        while let Some(t) = cur {
            cur = t.base().cloned();
            out.push(t);
        }
        let chain_len = out.len();
        for i in 0..chain_len {
            let interfaces: Vec<_> = out[i].interfaces().to_vec();
            for iface in interfaces {
                for t in iface.mro() {
                    if !out.iter().any(|o| Arc::ptr_eq(o, &t)) {
                        out.push(t);
                    }
                }
            }
        }
        out
    }

    pub(crate) fn add_subclass(&self, sub: &Arc<SynthesizedType>) {
        let mut subs = self.subclasses.lock();
        subs.retain(|w| w.strong_count() > 0);
        if !subs.iter().any(|w| std::ptr::eq(w.as_ptr(), Arc::as_ptr(sub))) {
            subs.push(Arc::downgrade(sub));
        }
    }

    /// Live synthesized subtypes (direct subclasses and implementors)
    pub fn subclasses(&self) -> Vec<Arc<SynthesizedType>> {
        self.subclasses.lock().iter().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn set_own_decoration(&self, kind: DecorationKind, callback: Option<Callable>) {
        let mut decoration = self.decoration.write();
        *decoration.slot_mut(kind) = DecorationSlot {
            inherited: callback.is_none(),
            callback,
        };
    }

    /// Recompute an inherited slot from the bases; false if the slot is owned
    pub(crate) fn inherit_decoration(&self, kind: DecorationKind) -> bool {
        if !self.decoration.read().slot(kind).inherited {
            return false;
        }
        let inherited = self
            .base()
            .into_iter()
            .chain(self.interfaces())
            .find_map(|parent| parent.decoration(kind));
        self.decoration.write().slot_mut(kind).callback = inherited;
        true
    }

    /// Release foreign references and interned names held by the type
    pub(crate) fn release(&self, env: &dyn ForeignEnv, names: &Interner) {
        if let Some(body) = self.body() {
            for m in body.methods.iter().flatten() {
                for p in &m.params {
                    env.delete_global_ref(p.class);
                }
                if let Some(r) = m.ret {
                    env.delete_global_ref(r.class);
                }
                names.release(&m.name);
            }
            for f in body.fields.iter().flatten() {
                env.delete_global_ref(f.ty.class);
                names.release(&f.name);
            }
        }
        if let Some(element) = self.element {
            env.delete_global_ref(element.class);
        }
        names.release(&self.name);
        env.delete_global_ref(self.class);
    }
}

impl fmt::Debug for SynthesizedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynthesizedType")
            .field("name", &self.name)
            .field("tag", &self.tag)
            .field("ready", &self.is_ready())
            .field("methods", &self.method_count())
            .field("fields", &self.field_count())
            .finish()
    }
}

impl fmt::Display for SynthesizedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<java type '{}'>", self.name)
    }
}
