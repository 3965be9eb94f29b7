//! The reference runtime.
//!
//! [`EmulatedRuntime`] keeps every loaded type as a [`TypeImage`] and runs its methods with
//! the interpreter. Installing a new representation swaps the image atomically: calls that
//! already started finish on the image they started with, later calls use the new one.

use std::{
    cell::Cell,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use dashmap::{DashMap, DashSet};

use crate::{
    emulation::{
        config::EmulationConfig,
        corlib::{self, NULL_REFERENCE_EXCEPTION},
        interpreter::{self, coerce},
    },
    image::{verify_image, FieldRef, TypeImage},
    metadata::{
        method::{FunctionIdentity, MethodDef},
        signatures::TypeName,
        typesystem::{TypeDefRc, TypeResolver},
    },
    runtime::{DispatchEntry, RuntimeBridge},
    value::{ObjectRef, Value},
    Error, Result,
};

/// Implementation of a native function.
///
/// Receives the receiver (for instance functions) and the arguments.
pub type NativeFn = Arc<dyn Fn(Option<&Value>, &[Value]) -> Result<Value> + Send + Sync>;

thread_local! {
    static CALL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Counts one level of managed call nesting on the current thread.
struct DepthGuard;

impl DepthGuard {
    fn enter(limit: usize) -> Result<DepthGuard> {
        CALL_DEPTH.with(|depth| {
            let next = depth.get() + 1;
            if next > limit {
                return Err(Error::RecursionLimit(limit));
            }
            depth.set(next);
            Ok(DepthGuard)
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        CALL_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

struct LoadedType {
    image: TypeImage,
    def: TypeDefRc,
}

impl LoadedType {
    fn new(image: TypeImage) -> Arc<LoadedType> {
        let def = Arc::new(image.type_def());
        Arc::new(LoadedType { image, def })
    }
}

/// An in-process CIL runtime.
///
/// Thread safe: types, statics and natives live in concurrent maps, and any number of
/// threads may run managed code at the same time.
///
/// ```rust,no_run
/// use cilplant::emulation::{EmulatedRuntime, TypeBuilder};
///
/// # fn main() -> cilplant::Result<()> {
/// let runtime = EmulatedRuntime::new()?;
/// runtime.load(TypeBuilder::new("Demo.Empty").build()?)?;
/// # Ok(())
/// # }
/// ```
pub struct EmulatedRuntime {
    config: EmulationConfig,
    types: DashMap<TypeName, Arc<LoadedType>>,
    natives: DashMap<FunctionIdentity, NativeFn>,
    statics: DashMap<(TypeName, String), Value>,
    initialized: DashSet<TypeName>,
    engine_attached: AtomicBool,
}

impl EmulatedRuntime {
    /// Creates a runtime with the default configuration and the core library loaded.
    ///
    /// # Errors
    /// Returns an error if the core library fails to build.
    pub fn new() -> Result<Self> {
        Self::with_config(EmulationConfig::default())
    }

    /// Creates a runtime with `config` and the core library loaded.
    ///
    /// # Errors
    /// Returns an error if the core library fails to build.
    pub fn with_config(config: EmulationConfig) -> Result<Self> {
        let runtime = EmulatedRuntime {
            config,
            types: DashMap::new(),
            natives: DashMap::new(),
            statics: DashMap::new(),
            initialized: DashSet::new(),
            engine_attached: AtomicBool::new(false),
        };
        for image in corlib::core_types()? {
            runtime.types.insert(image.name.clone(), LoadedType::new(image));
        }
        Ok(runtime)
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &EmulationConfig {
        &self.config
    }

    /// Loads a new type.
    ///
    /// # Errors
    /// Returns [`Error::Runtime`] if the type exists and [`Error::Malformed`] if it fails
    /// verification.
    pub fn load(&self, image: TypeImage) -> Result<()> {
        if self.config.verify_on_install {
            verify_image(&image)?;
        }
        self.define(image)?;
        Ok(())
    }

    /// Loads several types; stops at the first failure.
    ///
    /// # Errors
    /// See [`EmulatedRuntime::load`].
    pub fn load_all(&self, images: impl IntoIterator<Item = TypeImage>) -> Result<()> {
        images.into_iter().try_for_each(|image| self.load(image))
    }

    /// The current image of `ty`.
    #[must_use]
    pub fn image(&self, ty: &TypeName) -> Option<TypeImage> {
        self.loaded(ty).ok().map(|loaded| loaded.image.clone())
    }

    /// Provides the implementation of a native function.
    ///
    /// # Errors
    /// Returns [`Error::Runtime`] if `function` is not a loaded native function.
    pub fn register_native<F>(&self, function: &FunctionIdentity, implementation: F) -> Result<()>
    where
        F: Fn(Option<&Value>, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        let def = self.method_def(function)?;
        if !def.is_native() {
            return Err(Error::Runtime(format!("{} is not native", function)));
        }
        self.natives.insert(function.clone(), Arc::new(implementation));
        Ok(())
    }

    /// Calls `function` the way managed code calls it: virtual functions dispatch on the
    /// runtime type of `receiver`.
    ///
    /// # Errors
    /// Returns [`Error::TargetInvocation`] if managed code threw.
    pub fn invoke(
        &self,
        function: &FunctionIdentity,
        receiver: Option<&Value>,
        args: &[Value],
    ) -> Result<Value> {
        let target = match receiver {
            Some(this) if !function.is_static() => {
                if this.is_null() {
                    return Err(self.managed_exception(
                        NULL_REFERENCE_EXCEPTION,
                        format!("{} called on null", function),
                    ));
                }
                self.resolve_virtual(function, this)?
            }
            _ => function.clone(),
        };
        self.call_exact(&target, receiver, args)
    }

    /// Allocates an instance of the constructor's type and runs the constructor on it.
    ///
    /// # Errors
    /// Returns [`Error::TargetInvocation`] if the constructor threw.
    pub fn construct(&self, ctor: &FunctionIdentity, args: &[Value]) -> Result<Value> {
        if !ctor.is_constructor() {
            return Err(Error::Runtime(format!("{} is not a constructor", ctor)));
        }
        self.ensure_initialized(&ctor.declaring)?;
        let instance = self.allocate_instance(&ctor.declaring)?;
        self.call_exact(ctor, Some(&instance), args)?;
        Ok(instance)
    }

    /// Current value of a static field; does not trigger the static initializer.
    #[must_use]
    pub fn static_field(&self, ty: &TypeName, name: &str) -> Value {
        if let Some(value) = self.statics.get(&(ty.clone(), name.to_string())) {
            return value.clone();
        }
        self.resolve_type(ty)
            .and_then(|def| def.find_field(name).map(|field| Value::default_for(&field.sig)))
            .unwrap_or_default()
    }

    /// True once the static initializer of `ty` has started.
    #[must_use]
    pub fn is_initialized(&self, ty: &TypeName) -> bool {
        self.initialized.contains(ty)
    }

    /// Creates the exception `ty` with `message` as a thrown managed exception.
    #[must_use]
    pub fn managed_exception(&self, ty: &str, message: impl Into<String>) -> Error {
        Error::TargetInvocation(Value::Object(ObjectRef::exception(
            TypeName::parse(ty),
            message,
        )))
    }

    fn define(&self, image: TypeImage) -> Result<()> {
        match self.types.entry(image.name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::Runtime(format!(
                "Type {} is already defined",
                image.name
            ))),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                log::debug!("Loaded type {}", image.name);
                entry.insert(LoadedType::new(image));
                Ok(())
            }
        }
    }

    fn loaded(&self, ty: &TypeName) -> Result<Arc<LoadedType>> {
        self.types
            .get(ty)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::Runtime(format!("Unknown type {}", ty)))
    }

    fn method_def(&self, function: &FunctionIdentity) -> Result<MethodDef> {
        self.loaded(&function.declaring)?
            .def
            .find_method(&function.name, &function.signature)
            .cloned()
            .ok_or_else(|| Error::Runtime(format!("Unknown function {}", function)))
    }

    /// The implementation of `callee` for `receiver`.
    pub(crate) fn resolve_virtual(
        &self,
        callee: &FunctionIdentity,
        receiver: &Value,
    ) -> Result<FunctionIdentity> {
        let def = self.method_def(callee)?;
        if !def.is_virtual() {
            return Ok(callee.clone());
        }
        Ok(receiver
            .runtime_type_name()
            .and_then(|ty| self.find_override(&ty, &def))
            .map_or_else(|| callee.clone(), |method| method.identity))
    }

    /// Runs the static initializer of `ty` once, before first use.
    ///
    /// The type counts as initialized as soon as the initializer starts, so initializers
    /// that touch their own type do not recurse.
    pub(crate) fn ensure_initialized(&self, ty: &TypeName) -> Result<()> {
        if self.initialized.contains(ty) || !self.initialized.insert(ty.clone()) {
            return Ok(());
        }
        match self.static_initializer(ty) {
            Some(cctor) => {
                log::debug!("Running static initializer of {}", ty);
                self.call_exact(&cctor, None, &[]).map(|_| ())
            }
            None => Ok(()),
        }
    }

    pub(crate) fn load_static(&self, field: &FieldRef) -> Value {
        self.statics
            .get(&(field.declaring.clone(), field.name.clone()))
            .map_or_else(|| Value::default_for(&field.sig), |value| value.clone())
    }

    pub(crate) fn store_static(&self, field: &FieldRef, value: Value) {
        self.statics
            .insert((field.declaring.clone(), field.name.clone()), value);
    }

    /// Calls exactly `function`, on the image current when the call starts.
    pub(crate) fn call_exact(
        &self,
        function: &FunctionIdentity,
        receiver: Option<&Value>,
        args: &[Value],
    ) -> Result<Value> {
        let loaded = self.loaded(&function.declaring)?;
        let index = loaded
            .image
            .method_index(function)
            .ok_or_else(|| Error::Runtime(format!("Unknown function {}", function)))?;
        let method = &loaded.image.methods[index];

        if args.len() != function.signature.params.len() {
            return Err(Error::Runtime(format!(
                "{} takes {} arguments, got {}",
                function,
                function.signature.params.len(),
                args.len()
            )));
        }
        let receiver = if function.signature.has_this {
            match receiver {
                Some(this) if !this.is_null() => Some(this),
                _ => {
                    return Err(self.managed_exception(
                        NULL_REFERENCE_EXCEPTION,
                        format!("{} called without an instance", function),
                    ))
                }
            }
        } else {
            None
        };
        if function.is_static() && !function.is_static_initializer() {
            self.ensure_initialized(&function.declaring)?;
        }

        let args: Vec<Value> = args
            .iter()
            .zip(&function.signature.params)
            .map(|(arg, sig)| coerce(arg.clone(), sig))
            .collect();

        let _depth = DepthGuard::enter(self.config.max_call_depth)?;
        if method.def.is_native() {
            let native = self
                .natives
                .get(function)
                .map(|entry| Arc::clone(entry.value()))
                .ok_or_else(|| {
                    Error::Runtime(format!("Native function {} is not bound", function))
                })?;
            native(receiver, &args)
        } else if method.def.is_abstract() {
            Err(Error::Runtime(format!("{} is abstract", function)))
        } else {
            interpreter::execute(self, &loaded.image, method, receiver, &args)
        }
    }
}

impl TypeResolver for EmulatedRuntime {
    fn resolve_type(&self, name: &TypeName) -> Option<TypeDefRc> {
        if name.is_array() {
            return Some(Arc::new(crate::metadata::typesystem::TypeDef::array(
                name.clone(),
            )));
        }
        self.types.get(name).map(|entry| Arc::clone(&entry.def))
    }
}

impl RuntimeBridge for EmulatedRuntime {
    fn initialize_engine(&self) -> Result<()> {
        if self.engine_attached.swap(true, Ordering::AcqRel) {
            return Err(Error::IllegalState(
                "An engine is already attached to this runtime".to_string(),
            ));
        }
        Ok(())
    }

    fn release_engine(&self) -> Result<()> {
        self.engine_attached.store(false, Ordering::Release);
        Ok(())
    }

    fn compiled_representation(&self, ty: &TypeName) -> Result<Vec<u8>> {
        self.loaded(ty)?.image.encode()
    }

    fn install_representation(
        &self,
        ty: &TypeName,
        bytes: &[u8],
        bypass_verification: bool,
    ) -> Result<()> {
        let image = TypeImage::decode(bytes)?;
        if &image.name != ty {
            return Err(Error::Runtime(format!(
                "Representation of {} installed for {}",
                image.name, ty
            )));
        }
        if !self.types.contains_key(ty) {
            return Err(Error::Runtime(format!("Unknown type {}", ty)));
        }
        if self.config.verify_on_install && !bypass_verification {
            verify_image(&image)?;
        }

        log::debug!(
            "Installing new representation of {} ({} bytes, verification {})",
            ty,
            bytes.len(),
            if bypass_verification { "bypassed" } else { "on" }
        );
        self.types.insert(ty.clone(), LoadedType::new(image));
        Ok(())
    }

    fn allocate_instance(&self, ty: &TypeName) -> Result<Value> {
        let def = self
            .resolve_type(ty)
            .ok_or_else(|| Error::Runtime(format!("Unknown type {}", ty)))?;
        if def.is_abstract() || def.is_interface() || def.is_primitive() || def.is_array() {
            return Err(Error::Runtime(format!("{} cannot be instantiated", ty)));
        }
        Ok(Value::Object(ObjectRef::new(ty.clone())))
    }

    fn non_virtual_invoke(
        &self,
        function: &FunctionIdentity,
        signature: &str,
        receiver: Option<&Value>,
        args: &[Value],
    ) -> Result<Value> {
        let identity = self
            .loaded(&function.declaring)?
            .def
            .methods
            .iter()
            .find(|method| {
                method.identity.name == function.name
                    && method.identity.signature.to_string() == signature
            })
            .map(|method| method.identity.clone())
            .ok_or_else(|| {
                Error::Runtime(format!(
                    "No function {}::{} with signature {}",
                    function.declaring, function.name, signature
                ))
            })?;
        self.call_exact(&identity, receiver, args)
    }

    fn static_initializer(&self, ty: &TypeName) -> Option<FunctionIdentity> {
        self.resolve_type(ty)?
            .methods
            .iter()
            .find(|method| method.identity.is_static_initializer())
            .map(|method| method.identity.clone())
    }

    fn inject_type(&self, bytes: &[u8]) -> Result<()> {
        self.define(TypeImage::decode(bytes)?)
    }

    fn bind_dispatch_entry(&self, entry: &FunctionIdentity, handler: DispatchEntry) -> Result<()> {
        self.register_native(entry, move |_, args| handler(args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        emulation::{
            corlib::{constructor, DIVIDE_BY_ZERO_EXCEPTION, EXCEPTION},
            MethodBuilder, TypeBuilder,
        },
        metadata::signatures::{MethodSig, ScalarKind, TypeSig},
    };

    fn i4() -> TypeSig {
        TypeSig::Scalar(ScalarKind::I4)
    }

    fn counter_type() -> TypeImage {
        TypeBuilder::new("Demo.Counter")
            .static_field("Count", i4())
            .method(MethodBuilder::static_initializer().body(|asm, refs| {
                let count = refs.field("Count")?;
                asm.ldc_i4(10)?.stsfld(count)?.ret()?;
                Ok(())
            }))
            .method(
                MethodBuilder::new("Next", MethodSig::static_method(i4(), vec![])).body(
                    |asm, refs| {
                        let count = refs.field("Count")?;
                        asm.ldsfld(count)?
                            .ldc_i4(1)?
                            .add()?
                            .dup()?
                            .stsfld(count)?
                            .ret()?;
                        Ok(())
                    },
                ),
            )
            .method(
                MethodBuilder::new("Divide", MethodSig::static_method(i4(), vec![i4(), i4()]))
                    .body(|asm, _| {
                        asm.ldarg(0)?.ldarg(1)?.div()?.ret()?;
                        Ok(())
                    }),
            )
            .method(
                MethodBuilder::new("Recurse", MethodSig::static_method(i4(), vec![i4()])).body(
                    |asm, refs| {
                        let recurse =
                            refs.own_method("Recurse", MethodSig::static_method(i4(), vec![i4()]))?;
                        asm.ldarg(0)?.ldc_i4(1)?.add()?.call(recurse, 1, true)?.ret()?;
                        Ok(())
                    },
                ),
            )
            .build()
            .unwrap()
    }

    fn function(name: &str, sig: MethodSig) -> FunctionIdentity {
        FunctionIdentity::new(TypeName::parse("Demo.Counter"), name, sig)
    }

    #[test]
    fn static_initializer_runs_lazily() {
        let runtime = EmulatedRuntime::new().unwrap();
        runtime.load(counter_type()).unwrap();
        let ty = TypeName::parse("Demo.Counter");

        assert!(!runtime.is_initialized(&ty));
        assert_eq!(runtime.static_field(&ty, "Count"), Value::I4(0));

        let next = function("Next", MethodSig::static_method(i4(), vec![]));
        assert_eq!(runtime.invoke(&next, None, &[]).unwrap(), Value::I4(11));
        assert_eq!(runtime.invoke(&next, None, &[]).unwrap(), Value::I4(12));
        assert!(runtime.is_initialized(&ty));
        assert_eq!(runtime.static_field(&ty, "Count"), Value::I4(12));
    }

    #[test]
    fn managed_exceptions_and_limits() {
        let runtime = EmulatedRuntime::with_config(EmulationConfig::default().with_max_call_depth(32))
            .unwrap();
        runtime.load(counter_type()).unwrap();

        let divide = function("Divide", MethodSig::static_method(i4(), vec![i4(), i4()]));
        assert_eq!(
            runtime.invoke(&divide, None, &[Value::I4(7), Value::I4(2)]).unwrap(),
            Value::I4(3)
        );
        match runtime.invoke(&divide, None, &[Value::I4(7), Value::I4(0)]) {
            Err(Error::TargetInvocation(Value::Object(exception))) => {
                assert_eq!(exception.type_name().full_name(), DIVIDE_BY_ZERO_EXCEPTION);
                assert!(runtime.is_subtype(exception.type_name(), &TypeName::parse(EXCEPTION)));
            }
            other => panic!("unexpected {:?}", other),
        }

        let recurse = function("Recurse", MethodSig::static_method(i4(), vec![i4()]));
        assert!(matches!(
            runtime.invoke(&recurse, None, &[Value::I4(0)]),
            Err(Error::RecursionLimit(32))
        ));
        // the guard unwinds with the calls
        assert!(runtime.invoke(&divide, None, &[Value::I4(4), Value::I4(2)]).is_ok());
    }

    #[test]
    fn bridge_primitives() {
        let runtime = EmulatedRuntime::new().unwrap();
        runtime.load(counter_type()).unwrap();
        let ty = TypeName::parse("Demo.Counter");

        assert!(runtime.load(counter_type()).is_err());
        runtime.initialize_engine().unwrap();
        assert!(matches!(runtime.initialize_engine(), Err(Error::IllegalState(_))));
        runtime.release_engine().unwrap();
        runtime.initialize_engine().unwrap();

        let bytes = runtime.compiled_representation(&ty).unwrap();
        runtime.install_representation(&ty, &bytes, false).unwrap();
        assert!(runtime
            .install_representation(&TypeName::parse("Demo.Other"), &bytes, false)
            .is_err());

        assert!(runtime.allocate_instance(&TypeName::parse("System.Int32")).is_err());
        let exception = runtime.allocate_instance(&TypeName::parse(EXCEPTION)).unwrap();
        let ctor = constructor(EXCEPTION, vec![]);
        let sig = ctor.signature.to_string();
        assert_eq!(sig, "instance void()");
        assert!(runtime
            .non_virtual_invoke(&ctor, &sig, Some(&exception), &[])
            .is_ok());
        assert!(runtime
            .non_virtual_invoke(&ctor, "void()", Some(&exception), &[])
            .is_err());

        assert!(runtime.static_initializer(&ty).is_some());
        assert!(runtime.static_initializer(&TypeName::parse(EXCEPTION)).is_none());
    }
}
