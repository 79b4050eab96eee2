//! Instance wrappers and member dispatch
//!
//! An [`InstanceWrapper`] is the host face of one foreign object. It owns a
//! global reference to the object and resolves attribute reads and writes,
//! calls, hashing, string conversion and comparison against its
//! synthesized type, giving the type's decorations the first word.

use crate::bridge::BridgeState;
use crate::foreign::{CallTarget, ForeignEnv, JValue, ObjRef, PrimitiveTag};
use crate::host_lock::yielding;
use crate::marshal::{jvalue_to_host, release_locals, take_exception, to_foreign};
use crate::types::synth::synthesize;
use crate::types::{DecorationKind, FieldDescriptor, SynthesizedType, TypeRef};
use crate::value::{Callable, CompareOp, Kwargs, Value};
use crate::{BridgeError, BridgeResult};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub(crate) use crate::types::synth::CONSTRUCTOR;

/// Host wrapper of a foreign object
pub struct InstanceWrapper {
    state: Arc<BridgeState>,
    ty: Arc<SynthesizedType>,
    // Raw global reference; 0 once released
    obj: AtomicU64,
    undecorated: bool,
    identity_hash: i32,
}

fn deleted() -> BridgeError {
    BridgeError::Runtime("Tried to access a deleted java object".to_string())
}

impl InstanceWrapper {
    fn new(
        state: Arc<BridgeState>,
        env: &dyn ForeignEnv,
        ty: Arc<SynthesizedType>,
        obj: ObjRef,
        undecorated: bool,
        identity_hash: i32,
    ) -> Self {
        Self {
            state,
            ty,
            obj: AtomicU64::new(env.new_global_ref(obj).as_raw()),
            undecorated,
            identity_hash,
        }
    }

    /// The deduplicated wrapper of `obj`, typed as `ty`
    pub(crate) fn wrap(
        state: &Arc<BridgeState>,
        env: &dyn ForeignEnv,
        ty: &Arc<SynthesizedType>,
        obj: ObjRef,
    ) -> Arc<Self> {
        let hash = env.identity_hash(obj);
        state.dedup.lookup_or_insert(env, obj, hash, || {
            Arc::new(Self::new(state.clone(), env, ty.clone(), obj, false, hash))
        })
    }

    /// The deduplicated wrapper of `obj`, typed as its runtime class
    pub(crate) fn wrap_runtime_class(
        state: &Arc<BridgeState>,
        env: &dyn ForeignEnv,
        obj: ObjRef,
    ) -> BridgeResult<Arc<Self>> {
        let class = env
            .get_object_class(obj)
            .ok_or_else(|| BridgeError::Runtime("java object has no class".to_string()))?;
        let ty = synthesize(state, env, class);
        env.delete_local_ref(class);
        Ok(Self::wrap(state, env, &ty?, obj))
    }

    /// Synthesized type of the object
    pub fn java_type(&self) -> &Arc<SynthesizedType> {
        &self.ty
    }

    /// Whether decorations are bypassed for this wrapper
    pub fn is_undecorated(&self) -> bool {
        self.undecorated
    }

    /// Whether the foreign reference has been released
    pub fn is_released(&self) -> bool {
        self.raw_ref().is_none()
    }

    /// Identity hash of the foreign object
    pub fn identity_hash(&self) -> i32 {
        self.identity_hash
    }

    pub(crate) fn raw_ref(&self) -> Option<ObjRef> {
        ObjRef::from_raw(self.obj.load(Ordering::Acquire))
    }

    /// Global reference to the foreign object
    pub fn obj_ref(&self) -> BridgeResult<ObjRef> {
        self.raw_ref().ok_or_else(deleted)
    }

    fn decoration(&self, kind: DecorationKind) -> Option<Callable> {
        if self.undecorated {
            return None;
        }
        self.ty.decoration(kind)
    }

    /// Leading `(wrapper, undecorated wrapper)` arguments of decoration callbacks
    fn decoration_args(self: &Arc<Self>) -> BridgeResult<Vec<Value>> {
        Ok(vec![Value::Object(self.clone()), Value::Object(self.undecorated()?)])
    }

    // ---- attributes ----

    /// Read an attribute: decoration, then `__dict__`, methods and fields
    pub fn get_attr(self: &Arc<Self>, name: &str) -> BridgeResult<Value> {
        if let Some(callback) = self.decoration(DecorationKind::GetAttr) {
            let mut args = self.decoration_args()?;
            args.push(Value::str(name));
            return callback.call(&args, &[]);
        }
        if name == "__dict__" {
            return Ok(Value::tuple(
                self.ty.symbols().iter().map(|s| Value::Str(s.clone())).collect(),
            ));
        }
        if self.ty.has_method(name) {
            return Ok(Value::Callable(self.bound_method(name)));
        }
        self.get_field(name)
    }

    /// Write (`Some`) or delete (`None`) an attribute
    pub fn set_attr(self: &Arc<Self>, name: &str, value: Option<&Value>) -> BridgeResult<()> {
        if let Some(callback) = self.decoration(DecorationKind::SetAttr) {
            let mut args = self.decoration_args()?;
            args.push(Value::str(name));
            args.extend(value.cloned());
            callback.call(&args, &[])?;
            return Ok(());
        }
        match value {
            Some(value) => self.set_field(name, value),
            None => Err(BridgeError::TypeError(format!("cannot delete java attribute '{}'", name))),
        }
    }

    /// Read a field, bypassing decorations
    pub fn get_field(&self, name: &str) -> BridgeResult<Value> {
        let scope = self.state.handles.scope()?;
        let obj = self.obj_ref()?;
        read_field(&self.state, &**scope.env(), &self.ty, Some(obj), name)
    }

    /// Write a field, bypassing decorations
    pub fn set_field(&self, name: &str, value: &Value) -> BridgeResult<()> {
        let scope = self.state.handles.scope()?;
        let obj = self.obj_ref()?;
        write_field(&self.state, &**scope.env(), &self.ty, Some(obj), name, value)
    }

    fn bound_method(self: &Arc<Self>, name: &str) -> Callable {
        let receiver = self.clone();
        let method: Arc<str> = Arc::from(name);
        Callable::new(name, move |args, kwargs| receiver.invoke_kw(&method, args, kwargs))
    }

    // ---- calls ----

    /// Call the object itself; only possible through a call decoration
    pub fn call(self: &Arc<Self>, args: &[Value], kwargs: &Kwargs) -> BridgeResult<Value> {
        match self.decoration(DecorationKind::Call) {
            Some(callback) => {
                let mut full = self.decoration_args()?;
                full.extend_from_slice(args);
                callback.call(&full, kwargs)
            }
            None => Err(BridgeError::TypeError("Not callable.".to_string())),
        }
    }

    /// Call a method by name
    pub fn invoke(&self, name: &str, args: &[Value]) -> BridgeResult<Value> {
        self.invoke_kw(name, args, &[])
    }

    /// Call a method by name; keyword arguments are rejected
    pub fn invoke_kw(&self, name: &str, args: &[Value], kwargs: &Kwargs) -> BridgeResult<Value> {
        if !kwargs.is_empty() {
            return Err(BridgeError::TypeError(
                "java methods do not accept keyword arguments".to_string(),
            ));
        }
        let scope = self.state.handles.scope()?;
        let obj = self.obj_ref()?;
        dispatch(&self.state, &**scope.env(), &self.ty, Some(obj), name, args)
    }

    /// Call a method, leaving any foreign exception pending on `env`
    pub(crate) fn invoke_raw(
        &self,
        env: &dyn ForeignEnv,
        name: &str,
        args: &[Value],
        filter: Option<&[PrimitiveTag]>,
    ) -> BridgeResult<JValue> {
        let obj = self.obj_ref()?;
        dispatch_raw(&self.state, env, &self.ty, Some(obj), name, args, filter)
    }

    pub(crate) fn state(&self) -> &Arc<BridgeState> {
        &self.state
    }

    // ---- object protocol ----

    /// `hashCode()`, or the identity hash when the class has none
    pub fn hash(&self) -> BridgeResult<i32> {
        let scope = self.state.handles.scope()?;
        let env = &**scope.env();
        let obj = self.obj_ref()?;
        let Some(hash_code) = self.ty.hash_code_id() else {
            return Ok(self.identity_hash);
        };
        let raw = yielding(self.state.host_lock(), || {
            env.call_method(CallTarget::Instance(obj), hash_code, &[], PrimitiveTag::Int)
        });
        if let Some(error) = take_exception(env, self.state.host_lock()) {
            return Err(error);
        }
        match raw {
            JValue::Int(h) => Ok(h),
            _ => Ok(self.identity_hash),
        }
    }

    /// `toString()`
    pub fn to_display_string(&self) -> BridgeResult<String> {
        let scope = self.state.handles.scope()?;
        let env = &**scope.env();
        let obj = self.obj_ref()?;
        let Some(to_string) = self.ty.to_string_id() else {
            return Ok(format!("<{} object>", self.ty.name()));
        };
        let raw = yielding(self.state.host_lock(), || {
            env.call_method(CallTarget::Instance(obj), to_string, &[], PrimitiveTag::Object)
        });
        if let Some(error) = take_exception(env, self.state.host_lock()) {
            release_locals(env, &[raw]);
            return Err(error);
        }
        let Some(text) = raw.as_obj() else {
            return Ok("null".to_string());
        };
        let rendered = env.string_utf(text);
        env.delete_local_ref(text);
        Ok(rendered.unwrap_or_default())
    }

    /// Rich comparison; [`Value::NotImplemented`] when the operands do not compare
    pub fn rich_compare(self: &Arc<Self>, other: &Value, op: CompareOp) -> BridgeResult<Value> {
        if let Value::Object(o) = other {
            if Arc::ptr_eq(self, o) {
                return Ok(Value::Bool(matches!(op, CompareOp::Eq | CompareOp::Le | CompareOp::Ge)));
            }
        }
        let scope = self.state.handles.scope()?;
        let env = &**scope.env();
        let obj = self.obj_ref()?;
        let well_known = self.state.well_known(env)?;
        let as_object = TypeRef {
            class: well_known.object,
            tag: PrimitiveTag::Object,
        };
        let lock = self.state.host_lock();

        if matches!(op, CompareOp::Eq | CompareOp::Ne) {
            if let Some(arg) = to_foreign(&self.state, env, other, as_object) {
                let equal = yielding(lock, || {
                    env.call_method(
                        CallTarget::Instance(obj),
                        well_known.object_equals,
                        &[arg],
                        PrimitiveTag::Boolean,
                    )
                });
                release_locals(env, &[arg]);
                match (take_exception(env, lock), equal) {
                    (None, JValue::Boolean(equal)) => return Ok(Value::Bool(equal == (op == CompareOp::Eq))),
                    (Some(e), _) => tracing::debug!(error = %e, "equals raised, trying compareTo"),
                    _ => {}
                }
            }
        }

        if self.ty.protocols().comparable {
            if let Some(arg) = to_foreign(&self.state, env, other, as_object) {
                let order = yielding(lock, || {
                    env.call_method(CallTarget::Instance(obj), well_known.compare_to, &[arg], PrimitiveTag::Int)
                });
                release_locals(env, &[arg]);
                if let (None, JValue::Int(order)) = (take_exception(env, lock), order) {
                    return Ok(Value::Bool(op.holds(order.cmp(&0))));
                }
            }
        }
        Ok(Value::NotImplemented)
    }

    /// Fresh wrapper of the same object that bypasses decorations
    pub fn undecorated(self: &Arc<Self>) -> BridgeResult<Arc<Self>> {
        if self.undecorated {
            return Ok(self.clone());
        }
        let scope = self.state.handles.scope()?;
        let obj = self.obj_ref()?;
        Ok(Arc::new(Self::new(
            self.state.clone(),
            &**scope.env(),
            self.ty.clone(),
            obj,
            true,
            self.identity_hash,
        )))
    }

    /// Release the foreign reference now; later operations fail
    pub fn release(&self) {
        if self.raw_ref().is_none() {
            return;
        }
        if !self.undecorated {
            self.state.dedup.remove(self.identity_hash, self as *const Self);
        }
        let Some(obj) = ObjRef::from_raw(self.obj.swap(0, Ordering::AcqRel)) else {
            return;
        };
        match self.state.handles.scope() {
            Ok(scope) => scope.delete_global_ref(obj),
            Err(_) => tracing::warn!(%obj, "no foreign runtime while releasing wrapper, reference leaked"),
        }
    }
}

impl Drop for InstanceWrapper {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for InstanceWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceWrapper")
            .field("type", &self.ty.name())
            .field("obj", &self.raw_ref())
            .field("undecorated", &self.undecorated)
            .finish()
    }
}

impl fmt::Display for InstanceWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_display_string() {
            Ok(text) => f.write_str(&text),
            Err(e) => write!(f, "<{}: {}>", self.ty.name(), e),
        }
    }
}

// ---- dispatch ----

/// Marshal `args` against `params`, rolling back on the first mismatch
fn marshal_args(state: &BridgeState, env: &dyn ForeignEnv, args: &[Value], params: &[TypeRef]) -> Option<Vec<JValue>> {
    let mut out = Vec::with_capacity(args.len());
    for (arg, param) in args.iter().zip(params) {
        match to_foreign(state, env, arg, *param) {
            Some(value) => out.push(value),
            None => {
                release_locals(env, &out);
                return None;
            }
        }
    }
    Some(out)
}

/// Pick the first overload that accepts `args` and invoke it
///
/// `filter` restricts candidates to the given parameter tags. A foreign
/// exception raised by the call is left pending.
pub(crate) fn dispatch_raw(
    state: &BridgeState,
    env: &dyn ForeignEnv,
    ty: &SynthesizedType,
    receiver: Option<ObjRef>,
    name: &str,
    args: &[Value],
    filter: Option<&[PrimitiveTag]>,
) -> BridgeResult<JValue> {
    for method in ty.methods_named(name) {
        if method.arity() != args.len() {
            continue;
        }
        let target = match (method.is_static, receiver) {
            (true, _) => ty.class(),
            (false, Some(receiver)) => receiver,
            (false, None) => continue,
        };
        if let Some(filter) = filter {
            if method.params.iter().map(|p| p.tag).ne(filter.iter().copied()) {
                continue;
            }
        }
        let Some(marshaled) = marshal_args(state, env, args, &method.params) else {
            continue;
        };
        let raw = yielding(state.host_lock(), || (method.helper)(env, target, method.id, &marshaled));
        release_locals(env, &marshaled);
        return Ok(raw);
    }
    Err(BridgeError::Lookup("no method found".to_string()))
}

/// Invoke a method and bring the result across
pub(crate) fn dispatch(
    state: &Arc<BridgeState>,
    env: &dyn ForeignEnv,
    ty: &SynthesizedType,
    receiver: Option<ObjRef>,
    name: &str,
    args: &[Value],
) -> BridgeResult<Value> {
    let raw = dispatch_raw(state, env, ty, receiver, name, args, None)?;
    if let Some(error) = take_exception(env, state.host_lock()) {
        release_locals(env, &[raw]);
        return Err(error);
    }
    jvalue_to_host(state, env, raw)
}

fn field_target(ty: &SynthesizedType, field: &FieldDescriptor, receiver: Option<ObjRef>) -> BridgeResult<ObjRef> {
    if field.is_static {
        return Ok(ty.class());
    }
    receiver.ok_or_else(|| BridgeError::TypeError(format!("field '{}' is not static", field.name)))
}

fn void_field() -> BridgeError {
    BridgeError::NotImplemented("access to this java field is not yet implemented".to_string())
}

/// Read a field of `receiver`, or a static field of `ty`
pub(crate) fn read_field(
    state: &Arc<BridgeState>,
    env: &dyn ForeignEnv,
    ty: &SynthesizedType,
    receiver: Option<ObjRef>,
    name: &str,
) -> BridgeResult<Value> {
    let field = ty
        .field(name)
        .ok_or_else(|| BridgeError::AttributeNotFound(name.to_string()))?;
    let accessors = field.accessors.ok_or_else(void_field)?;
    let target = field_target(ty, field, receiver)?;
    let raw = yielding(state.host_lock(), || (accessors.get)(env, target, field.id));
    if let Some(error) = take_exception(env, state.host_lock()) {
        release_locals(env, &[raw]);
        return Err(error);
    }
    jvalue_to_host(state, env, raw)
}

/// Write a field of `receiver`, or a static field of `ty`
pub(crate) fn write_field(
    state: &BridgeState,
    env: &dyn ForeignEnv,
    ty: &SynthesizedType,
    receiver: Option<ObjRef>,
    name: &str,
    value: &Value,
) -> BridgeResult<()> {
    let field = ty
        .field(name)
        .ok_or_else(|| BridgeError::AttributeNotFound(name.to_string()))?;
    let accessors = field.accessors.ok_or_else(void_field)?;
    let target = field_target(ty, field, receiver)?;
    let marshaled = to_foreign(state, env, value, field.ty).ok_or_else(|| {
        BridgeError::TypeError(format!("cannot store {} in java field '{}'", value.type_name(), name))
    })?;
    yielding(state.host_lock(), || (accessors.set)(env, target, field.id, marshaled));
    release_locals(env, &[marshaled]);
    match take_exception(env, state.host_lock()) {
        Some(error) => Err(error),
        None => Ok(()),
    }
}
