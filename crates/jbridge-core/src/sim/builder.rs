//! Class definitions for the in-memory runtime
//!
//! ```
//! use jbridge_core::sim::{ClassDef, SimValue, SimVm};
//!
//! let vm = SimVm::new();
//! vm.heap()
//!     .define_class(
//!         ClassDef::new("demo.Counter")
//!             .field("count", "int")
//!             .method("increment", &[], "int", |heap, this, _| {
//!                 let this = this.expect("instance method");
//!                 let next = heap.field(this, "count").and_then(|v| v.as_int()).unwrap_or(0) + 1;
//!                 heap.set_field(this, "count", SimValue::Int(next));
//!                 Ok(SimValue::Int(next))
//!             }),
//!     )
//!     .unwrap();
//! ```

use super::heap::{ObjId, SimHeap, SimValue};
use std::sync::Arc;

/// Native method body: `(heap, this, args) -> result`, `Err` carries a throwable
pub type MethodBody = Arc<dyn Fn(&SimHeap, Option<ObjId>, &[SimValue]) -> Result<SimValue, ObjId> + Send + Sync>;

pub(crate) struct MemberSpec {
    pub name: String,
    pub params: Vec<String>,
    pub ret: Option<String>,
    pub is_static: bool,
    pub body: Option<MethodBody>,
}

pub(crate) struct FieldSpec {
    pub name: String,
    pub ty: String,
    pub is_static: bool,
}

pub(crate) struct ClassParts {
    pub name: String,
    pub interface: bool,
    pub constructors: Vec<MemberSpec>,
    pub methods: Vec<MemberSpec>,
    pub fields: Vec<FieldSpec>,
}

/// Builder for a user-defined class or interface
///
/// Type names are source-style: `int`, `java.lang.String`, `int[]`.
pub struct ClassDef {
    name: String,
    interface: bool,
    superclass: Option<String>,
    interfaces: Vec<String>,
    constructors: Vec<MemberSpec>,
    methods: Vec<MemberSpec>,
    fields: Vec<FieldSpec>,
}

impl ClassDef {
    /// A class extending `java.lang.Object`
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            interface: false,
            superclass: None,
            interfaces: Vec::new(),
            constructors: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// An interface
    pub fn interface(name: &str) -> Self {
        Self {
            interface: true,
            ..Self::new(name)
        }
    }

    /// Set the superclass
    pub fn extends(mut self, name: &str) -> Self {
        self.superclass = Some(name.to_string());
        self
    }

    /// Add an implemented (or, for interfaces, extended) interface
    pub fn implements(mut self, name: &str) -> Self {
        self.interfaces.push(name.to_string());
        self
    }

    /// Add an instance field
    pub fn field(mut self, name: &str, ty: &str) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            ty: ty.to_string(),
            is_static: false,
        });
        self
    }

    /// Add a static field
    pub fn static_field(mut self, name: &str, ty: &str) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            ty: ty.to_string(),
            is_static: true,
        });
        self
    }

    /// Add a constructor; the body receives the fresh object as `this`
    pub fn constructor<F>(mut self, params: &[&str], body: F) -> Self
    where
        F: Fn(&SimHeap, Option<ObjId>, &[SimValue]) -> Result<SimValue, ObjId> + Send + Sync + 'static,
    {
        self.constructors.push(member("<init>", params, None, false, Some(Arc::new(body))));
        self
    }

    /// Add an instance method (`ret` is `"void"` for no result)
    pub fn method<F>(mut self, name: &str, params: &[&str], ret: &str, body: F) -> Self
    where
        F: Fn(&SimHeap, Option<ObjId>, &[SimValue]) -> Result<SimValue, ObjId> + Send + Sync + 'static,
    {
        self.methods.push(member(name, params, Some(ret), false, Some(Arc::new(body))));
        self
    }

    /// Add a static method
    pub fn static_method<F>(mut self, name: &str, params: &[&str], ret: &str, body: F) -> Self
    where
        F: Fn(&SimHeap, Option<ObjId>, &[SimValue]) -> Result<SimValue, ObjId> + Send + Sync + 'static,
    {
        self.methods.push(member(name, params, Some(ret), true, Some(Arc::new(body))));
        self
    }

    /// Add a method without implementation
    pub fn abstract_method(mut self, name: &str, params: &[&str], ret: &str) -> Self {
        self.methods.push(member(name, params, Some(ret), false, None));
        self
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn is_interface(&self) -> bool {
        self.interface
    }

    pub(crate) fn superclass(&self) -> Option<&str> {
        self.superclass.as_deref()
    }

    pub(crate) fn interfaces(&self) -> &[String] {
        &self.interfaces
    }

    pub(crate) fn into_parts(mut self) -> ClassParts {
        if !self.interface && self.constructors.is_empty() {
            self.constructors.push(member(
                "<init>",
                &[],
                None,
                false,
                Some(Arc::new(|_: &SimHeap, _: Option<ObjId>, _: &[SimValue]| Ok(SimValue::Void))),
            ));
        }
        ClassParts {
            name: self.name,
            interface: self.interface,
            constructors: self.constructors,
            methods: self.methods,
            fields: self.fields,
        }
    }
}

fn member(name: &str, params: &[&str], ret: Option<&str>, is_static: bool, body: Option<MethodBody>) -> MemberSpec {
    MemberSpec {
        name: name.to_string(),
        params: params.iter().map(|p| p.to_string()).collect(),
        ret: ret.map(str::to_string),
        is_static,
        body,
    }
}
