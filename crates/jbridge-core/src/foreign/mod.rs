//! Foreign runtime seam
//!
//! The bridge never talks to a concrete JVM. Everything it needs from the
//! foreign side goes through two traits:
//!
//! - [`ForeignVm`] - locating and attaching per-thread execution handles
//! - [`ForeignEnv`] - the per-thread handle itself (reflection, invocation,
//!   fields, arrays, strings, exceptions, reference management)
//!
//! The shape follows JNI closely: object references are opaque handles that
//! are either *local* (valid on one thread until deleted) or *global* (valid
//! everywhere until deleted), and faults raised by the foreign runtime are
//! left *pending* on the env until cleared.

use std::fmt;
use std::num::NonZeroU64;
use std::sync::Arc;

/// Opaque foreign object reference (local or global)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(NonZeroU64);

impl ObjRef {
    /// Build a reference from its raw handle value (zero is the null reference)
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(ObjRef)
    }

    /// Raw handle value
    pub fn as_raw(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ref#{}", self.0)
    }
}

/// Foreign method handle (stable for the lifetime of its class)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId(pub u64);

/// Foreign field handle (stable for the lifetime of its class)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldId(pub u64);

/// Member modifier bits, using the foreign runtime's encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers(pub u32);

impl Modifiers {
    /// `public`
    pub const PUBLIC: u32 = 0x0001;
    /// `static`
    pub const STATIC: u32 = 0x0008;
    /// `final`
    pub const FINAL: u32 = 0x0010;
    /// `abstract`
    pub const ABSTRACT: u32 = 0x0400;

    /// Whether the `static` bit is set
    pub fn is_static(self) -> bool {
        self.0 & Self::STATIC != 0
    }
}

/// Single-character type discriminator selecting marshaling and helper variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveTag {
    /// `V`
    Void,
    /// `Z`
    Boolean,
    /// `B`
    Byte,
    /// `C`
    Char,
    /// `S`
    Short,
    /// `I`
    Int,
    /// `J`
    Long,
    /// `F`
    Float,
    /// `D`
    Double,
    /// `L`
    Object,
    /// `[`
    Array,
}

impl PrimitiveTag {
    /// Tag of a class given its canonical name and whether it is an array class
    pub fn from_canonical_name(name: Option<&str>, is_array: bool) -> Self {
        if is_array {
            return PrimitiveTag::Array;
        }
        match name {
            Some("void") => PrimitiveTag::Void,
            Some("boolean") => PrimitiveTag::Boolean,
            Some("byte") => PrimitiveTag::Byte,
            Some("char") => PrimitiveTag::Char,
            Some("short") => PrimitiveTag::Short,
            Some("int") => PrimitiveTag::Int,
            Some("long") => PrimitiveTag::Long,
            Some("float") => PrimitiveTag::Float,
            Some("double") => PrimitiveTag::Double,
            Some(n) if n.ends_with("[]") => PrimitiveTag::Array,
            _ => PrimitiveTag::Object,
        }
    }

    /// Descriptor character
    pub fn as_char(self) -> char {
        match self {
            PrimitiveTag::Void => 'V',
            PrimitiveTag::Boolean => 'Z',
            PrimitiveTag::Byte => 'B',
            PrimitiveTag::Char => 'C',
            PrimitiveTag::Short => 'S',
            PrimitiveTag::Int => 'I',
            PrimitiveTag::Long => 'J',
            PrimitiveTag::Float => 'F',
            PrimitiveTag::Double => 'D',
            PrimitiveTag::Object => 'L',
            PrimitiveTag::Array => '[',
        }
    }

    /// Object or array
    pub fn is_reference(self) -> bool {
        matches!(self, PrimitiveTag::Object | PrimitiveTag::Array)
    }

    /// One of the eight value primitives
    pub fn is_primitive(self) -> bool {
        !self.is_reference() && self != PrimitiveTag::Void
    }
}

impl fmt::Display for PrimitiveTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// A foreign value as passed to and returned from the env
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JValue {
    /// No value (void return)
    Void,
    /// boolean
    Boolean(bool),
    /// byte
    Byte(i8),
    /// UTF-16 code unit
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
    /// Object or array reference (`None` is null)
    Object(Option<ObjRef>),
}

impl JValue {
    /// The null reference
    pub fn null() -> Self {
        JValue::Object(None)
    }

    /// Reference payload, if this is a non-null reference
    pub fn as_obj(&self) -> Option<ObjRef> {
        match self {
            JValue::Object(obj) => *obj,
            _ => None,
        }
    }

    /// Zero value of the given tag
    pub fn zero(tag: PrimitiveTag) -> Self {
        match tag {
            PrimitiveTag::Void => JValue::Void,
            PrimitiveTag::Boolean => JValue::Boolean(false),
            PrimitiveTag::Byte => JValue::Byte(0),
            PrimitiveTag::Char => JValue::Char(0),
            PrimitiveTag::Short => JValue::Short(0),
            PrimitiveTag::Int => JValue::Int(0),
            PrimitiveTag::Long => JValue::Long(0),
            PrimitiveTag::Float => JValue::Float(0.0),
            PrimitiveTag::Double => JValue::Double(0.0),
            PrimitiveTag::Object | PrimitiveTag::Array => JValue::Object(None),
        }
    }
}

/// Receiver of an invocation or field access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    /// Virtual dispatch on an object
    Instance(ObjRef),
    /// Static dispatch on a class
    Static(ObjRef),
}

/// Reflective description of a constructor or method
///
/// All class references are local references owned by the caller.
#[derive(Debug, Clone)]
pub struct MemberInfo {
    /// Method handle
    pub id: MethodId,
    /// Simple name (`"<init>"` for constructors)
    pub name: String,
    /// Modifier bits
    pub modifiers: Modifiers,
    /// Parameter classes in declaration order
    pub parameter_types: Vec<ObjRef>,
    /// Return class (`None` for constructors)
    pub return_type: Option<ObjRef>,
}

/// Reflective description of a field
#[derive(Debug, Clone)]
pub struct FieldInfo {
    /// Field handle
    pub id: FieldId,
    /// Simple name
    pub name: String,
    /// Modifier bits
    pub modifiers: Modifiers,
    /// Declared type (local reference owned by the caller)
    pub field_type: ObjRef,
}

/// Raw backing storage of a primitive array, exposed inside a critical section
#[derive(Debug)]
pub enum ArrayElements<'a> {
    /// boolean[]
    Boolean(&'a mut [bool]),
    /// byte[]
    Byte(&'a mut [i8]),
    /// char[]
    Char(&'a mut [u16]),
    /// short[]
    Short(&'a mut [i16]),
    /// int[]
    Int(&'a mut [i32]),
    /// long[]
    Long(&'a mut [i64]),
    /// float[]
    Float(&'a mut [f32]),
    /// double[]
    Double(&'a mut [f64]),
}

impl ArrayElements<'_> {
    /// Element tag of the pinned storage
    pub fn tag(&self) -> PrimitiveTag {
        match self {
            ArrayElements::Boolean(_) => PrimitiveTag::Boolean,
            ArrayElements::Byte(_) => PrimitiveTag::Byte,
            ArrayElements::Char(_) => PrimitiveTag::Char,
            ArrayElements::Short(_) => PrimitiveTag::Short,
            ArrayElements::Int(_) => PrimitiveTag::Int,
            ArrayElements::Long(_) => PrimitiveTag::Long,
            ArrayElements::Float(_) => PrimitiveTag::Float,
            ArrayElements::Double(_) => PrimitiveTag::Double,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        match self {
            ArrayElements::Boolean(s) => s.len(),
            ArrayElements::Byte(s) => s.len(),
            ArrayElements::Char(s) => s.len(),
            ArrayElements::Short(s) => s.len(),
            ArrayElements::Int(s) => s.len(),
            ArrayElements::Long(s) => s.len(),
            ArrayElements::Float(s) => s.len(),
            ArrayElements::Double(s) => s.len(),
        }
    }

    /// Whether the array has no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read one element
    pub fn get(&self, index: usize) -> Option<JValue> {
        Some(match self {
            ArrayElements::Boolean(s) => JValue::Boolean(*s.get(index)?),
            ArrayElements::Byte(s) => JValue::Byte(*s.get(index)?),
            ArrayElements::Char(s) => JValue::Char(*s.get(index)?),
            ArrayElements::Short(s) => JValue::Short(*s.get(index)?),
            ArrayElements::Int(s) => JValue::Int(*s.get(index)?),
            ArrayElements::Long(s) => JValue::Long(*s.get(index)?),
            ArrayElements::Float(s) => JValue::Float(*s.get(index)?),
            ArrayElements::Double(s) => JValue::Double(*s.get(index)?),
        })
    }

    /// Write one element; returns false if the index or value kind does not fit
    pub fn set(&mut self, index: usize, value: JValue) -> bool {
        macro_rules! store {
            ($slice:expr, $v:expr) => {
                match $slice.get_mut(index) {
                    Some(slot) => {
                        *slot = $v;
                        true
                    }
                    None => false,
                }
            };
        }
        match (self, value) {
            (ArrayElements::Boolean(s), JValue::Boolean(v)) => store!(s, v),
            (ArrayElements::Byte(s), JValue::Byte(v)) => store!(s, v),
            (ArrayElements::Char(s), JValue::Char(v)) => store!(s, v),
            (ArrayElements::Short(s), JValue::Short(v)) => store!(s, v),
            (ArrayElements::Int(s), JValue::Int(v)) => store!(s, v),
            (ArrayElements::Long(s), JValue::Long(v)) => store!(s, v),
            (ArrayElements::Float(s), JValue::Float(v)) => store!(s, v),
            (ArrayElements::Double(s), JValue::Double(v)) => store!(s, v),
            _ => false,
        }
    }
}

/// Release mode of a primitive array critical section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseMode {
    /// Copy back any changes
    Commit,
    /// Discard changes (read-only access)
    Abort,
}

/// Per-thread execution handle into the foreign runtime
///
/// Calls that can fault in the foreign runtime leave an exception pending
/// instead of returning an error; callers check with [`exception_check`].
/// Methods returning references hand back *new local references* that the
/// caller must delete.
///
/// [`exception_check`]: ForeignEnv::exception_check
pub trait ForeignEnv: Send + Sync {
    // ---- classes and reflection ----

    /// Find a class by name (`java/lang/String` or `java.lang.String`)
    fn find_class(&self, name: &str) -> Option<ObjRef>;
    /// Runtime class of an object
    fn get_object_class(&self, obj: ObjRef) -> Option<ObjRef>;
    /// Whether the object is itself a class object
    fn is_class_object(&self, obj: ObjRef) -> bool;
    /// `Class.toString()`, e.g. `"class java.lang.String"`
    fn class_display_name(&self, class: ObjRef) -> Option<String>;
    /// `Class.getName()`, e.g. `"java.lang.String"` or `"[I"`
    fn class_name(&self, class: ObjRef) -> Option<String>;
    /// `Class.getCanonicalName()`, e.g. `"int"` or `"int[]"`
    fn canonical_name(&self, class: ObjRef) -> Option<String>;
    /// Superclass (`None` for interfaces, primitives and the root)
    fn superclass(&self, class: ObjRef) -> Option<ObjRef>;
    /// Directly implemented interfaces
    fn interfaces(&self, class: ObjRef) -> Vec<ObjRef>;
    /// Component class of an array class
    fn component_type(&self, class: ObjRef) -> Option<ObjRef>;
    /// Public constructors
    fn constructors(&self, class: ObjRef) -> Vec<MemberInfo>;
    /// Public methods, including inherited ones
    fn methods(&self, class: ObjRef) -> Vec<MemberInfo>;
    /// Public fields, including inherited ones
    fn fields(&self, class: ObjRef) -> Vec<FieldInfo>;
    /// Look up a method by name and descriptor, e.g. `("toString", "()Ljava/lang/String;")`
    fn method_id(&self, class: ObjRef, name: &str, descriptor: &str) -> Option<MethodId>;
    /// Whether `sub` can be assigned to `sup`
    fn is_assignable_from(&self, sub: ObjRef, sup: ObjRef) -> bool;
    /// Whether `obj` is an instance of `class`
    fn is_instance_of(&self, obj: ObjRef, class: ObjRef) -> bool;
    /// Identity comparison (`None` is null)
    fn is_same_object(&self, a: Option<ObjRef>, b: Option<ObjRef>) -> bool;
    /// `System.identityHashCode`
    fn identity_hash(&self, obj: ObjRef) -> i32;

    // ---- invocation and fields ----

    /// Invoke a method; `ret` selects the typed call variant
    fn call_method(&self, target: CallTarget, method: MethodId, args: &[JValue], ret: PrimitiveTag) -> JValue;
    /// Allocate and construct a new object
    fn new_object(&self, class: ObjRef, ctor: MethodId, args: &[JValue]) -> Option<ObjRef>;
    /// Read a field; `tag` selects the typed accessor
    fn get_field(&self, target: CallTarget, field: FieldId, tag: PrimitiveTag) -> JValue;
    /// Write a field
    fn set_field(&self, target: CallTarget, field: FieldId, value: JValue);

    // ---- strings ----

    /// Create a foreign string
    fn new_string(&self, value: &str) -> Option<ObjRef>;
    /// Contents of a foreign string
    fn string_utf(&self, string: ObjRef) -> Option<String>;

    // ---- arrays ----

    /// Array length
    fn array_length(&self, array: ObjRef) -> Option<usize>;
    /// Element of an object array
    fn object_array_element(&self, array: ObjRef, index: usize) -> Option<ObjRef>;
    /// Store into an object array
    fn set_object_array_element(&self, array: ObjRef, index: usize, value: Option<ObjRef>);
    /// Pin a primitive array and run `f` over its storage; false if not a primitive array
    fn with_primitive_array_critical(
        &self,
        array: ObjRef,
        mode: ReleaseMode,
        f: &mut dyn FnMut(ArrayElements<'_>),
    ) -> bool;

    // ---- exceptions ----

    /// Whether an exception is pending
    fn exception_check(&self) -> bool;
    /// The pending exception (new local reference)
    fn exception_occurred(&self) -> Option<ObjRef>;
    /// Clear the pending exception
    fn exception_clear(&self);
    /// Make `throwable` the pending exception
    fn throw(&self, throwable: ObjRef);
    /// Construct and raise an exception of the named class
    fn throw_new(&self, class_name: &str, message: &str);
    /// Report the pending exception on the runtime's fault channel
    fn exception_describe(&self);

    // ---- references ----

    /// New local reference to the same object
    fn new_local_ref(&self, obj: ObjRef) -> ObjRef;
    /// Delete a local reference
    fn delete_local_ref(&self, obj: ObjRef);
    /// New global reference to the same object
    fn new_global_ref(&self, obj: ObjRef) -> ObjRef;
    /// Delete a global reference
    fn delete_global_ref(&self, obj: ObjRef);
    /// Reserve local reference slots for the current thread
    fn ensure_local_capacity(&self, capacity: usize) -> bool;
}

/// Process-level handle to the foreign runtime
pub trait ForeignVm: Send + Sync {
    /// Env already attached to the calling thread, if any
    fn current_env(&self) -> Option<Arc<dyn ForeignEnv>>;
    /// Attach the calling thread and return its env
    fn attach_current_thread(&self) -> Option<Arc<dyn ForeignEnv>>;
    /// Detach the calling thread
    fn detach_current_thread(&self);
}
