//! Shared fixtures for unit tests.
//!
//! Type definitions for a small demo program, a map based [`TypeResolver`], and stand-ins
//! for the interceptor and the runtime bridge so registry and dispatch logic can be tested
//! without the reference runtime.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use crate::{
    metadata::{
        method::{FunctionIdentity, MethodAttributes, MethodDef, MethodImplAttributes},
        signatures::{MethodSig, ScalarKind, TypeName, TypeSig},
        typesystem::{TypeAttributes, TypeDef, TypeDefRc, TypeKind, TypeResolver},
    },
    rewriter::{Backup, EntryInterceptor},
    runtime::{DispatchEntry, RuntimeBridge},
    value::Value,
    Error, Result,
};

/// Map based type resolver.
pub struct Types(HashMap<TypeName, TypeDefRc>);

impl Types {
    pub fn with(defs: Vec<TypeDef>) -> Self {
        Types(
            defs.into_iter()
                .map(|def| (def.name.clone(), Arc::new(def)))
                .collect(),
        )
    }
}

impl TypeResolver for Types {
    fn resolve_type(&self, name: &TypeName) -> Option<TypeDefRc> {
        self.0.get(name).cloned()
    }
}

// Helper function to create a public class deriving from System.Object
pub fn class_type(name: &str, methods: Vec<MethodDef>) -> TypeDef {
    TypeDef {
        name: TypeName::parse(name),
        kind: TypeKind::Class,
        flags: TypeAttributes::PUBLIC,
        base: Some(TypeName::new("System", "Object")),
        interfaces: Vec::new(),
        fields: Vec::new(),
        methods,
    }
}

// Helper function to create a method definition with a CIL body
pub fn method(declaring: &str, name: &str, sig: MethodSig, flags: MethodAttributes) -> MethodDef {
    let flags = if sig.has_this {
        flags
    } else {
        flags | MethodAttributes::STATIC
    };
    MethodDef {
        identity: FunctionIdentity::new(TypeName::parse(declaring), name, sig),
        flags,
        impl_flags: MethodImplAttributes::IL,
    }
}

pub fn add_identity() -> FunctionIdentity {
    add_method().identity
}

/// `static int32 Demo.Calculator::Add(int32,int32)`
pub fn add_method() -> MethodDef {
    let i4 = TypeSig::Scalar(ScalarKind::I4);
    method(
        "Demo.Calculator",
        "Add",
        MethodSig::static_method(i4.clone(), vec![i4.clone(), i4]),
        MethodAttributes::PUBLIC,
    )
}

pub fn calculator_type() -> TypeDef {
    class_type("Demo.Calculator", vec![add_method()])
}

pub fn area_identity() -> FunctionIdentity {
    FunctionIdentity::new(
        TypeName::parse("Demo.Shape"),
        "Area",
        MethodSig::instance(TypeSig::Scalar(ScalarKind::R8), vec![]),
    )
}

/// Abstract `Demo.Shape` with an abstract `Area`.
pub fn shape_type() -> TypeDef {
    let mut shape = class_type(
        "Demo.Shape",
        vec![MethodDef {
            identity: area_identity(),
            flags: MethodAttributes::PUBLIC | MethodAttributes::VIRTUAL | MethodAttributes::ABSTRACT,
            impl_flags: MethodImplAttributes::IL,
        }],
    );
    shape.flags |= TypeAttributes::ABSTRACT;
    shape
}

/// Backup running a closure in place of the original body.
pub struct FnBackup<F>(pub F);

impl<F> Backup for FnBackup<F>
where
    F: Fn(Option<&Value>, &[Value]) -> Result<Value> + Send + Sync,
{
    fn invoke(&self, receiver: Option<&Value>, args: &[Value]) -> Result<Value> {
        (self.0)(receiver, args)
    }
}

/// Interceptor handing out one shared backup and counting calls.
pub struct FnInterceptor {
    backup: Arc<dyn Backup>,
    pub installs: AtomicUsize,
    pub uninstalls: AtomicUsize,
}

impl FnInterceptor {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Option<&Value>, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        FnInterceptor {
            backup: Arc::new(FnBackup(f)),
            installs: AtomicUsize::new(0),
            uninstalls: AtomicUsize::new(0),
        }
    }
}

impl EntryInterceptor for FnInterceptor {
    fn install(&self, _target: &MethodDef, _entry_id: u64) -> Result<Arc<dyn Backup>> {
        self.installs.fetch_add(1, Ordering::Relaxed);
        Ok(self.backup.clone())
    }

    fn uninstall(&self, _target: &MethodDef) -> Result<()> {
        self.uninstalls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Runtime bridge that only resolves types; every other primitive fails.
pub struct StubBridge(pub Types);

impl TypeResolver for StubBridge {
    fn resolve_type(&self, name: &TypeName) -> Option<TypeDefRc> {
        self.0.resolve_type(name)
    }
}

fn unsupported<T>(what: &str) -> Result<T> {
    Err(Error::Runtime(format!("{what} is not supported by the stub")))
}

impl RuntimeBridge for StubBridge {
    fn initialize_engine(&self) -> Result<()> {
        Ok(())
    }

    fn compiled_representation(&self, _ty: &TypeName) -> Result<Vec<u8>> {
        unsupported("compiled_representation")
    }

    fn install_representation(&self, _ty: &TypeName, _bytes: &[u8], _bypass: bool) -> Result<()> {
        unsupported("install_representation")
    }

    fn allocate_instance(&self, _ty: &TypeName) -> Result<Value> {
        unsupported("allocate_instance")
    }

    fn non_virtual_invoke(
        &self,
        _function: &FunctionIdentity,
        _signature: &str,
        _receiver: Option<&Value>,
        _args: &[Value],
    ) -> Result<Value> {
        unsupported("non_virtual_invoke")
    }

    fn static_initializer(&self, _ty: &TypeName) -> Option<FunctionIdentity> {
        None
    }

    fn inject_type(&self, _bytes: &[u8]) -> Result<()> {
        unsupported("inject_type")
    }

    fn bind_dispatch_entry(&self, _entry: &FunctionIdentity, _handler: DispatchEntry) -> Result<()> {
        unsupported("bind_dispatch_entry")
    }
}
