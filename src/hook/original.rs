//! Invoking original behavior.
//!
//! [`OriginalInvoker`] calls a function the way it behaved before interception: hooked
//! functions go through their backup, which suppresses the next dispatch on the calling
//! thread; everything else is called through the bridge's non-virtual primitive.

use std::sync::Arc;

use crate::{
    hook::{
        registry::HookRegistry,
        validation::{check_arguments, resolve_function},
    },
    metadata::{
        method::{FunctionIdentity, MethodDef},
        signatures::{TypeName, TypeSig},
    },
    runtime::RuntimeBridge,
    value::Value,
    Result,
};

/// Invokes functions bypassing their callback chains.
pub struct OriginalInvoker {
    registry: Arc<HookRegistry>,
    bridge: Arc<dyn RuntimeBridge>,
}

impl OriginalInvoker {
    /// Creates an invoker consulting `registry` for backups.
    #[must_use]
    pub fn new(registry: Arc<HookRegistry>, bridge: Arc<dyn RuntimeBridge>) -> Self {
        OriginalInvoker { registry, bridge }
    }

    /// Calls the original behavior of `function`.
    ///
    /// Instance functions that are neither private nor constructors are resolved against
    /// the runtime type of `receiver` first, so invoking a base declaration on a derived
    /// instance runs the override.
    ///
    /// # Errors
    /// - [`crate::Error::InvalidTarget`] for abstract, native or unknown functions, arguments
    ///   that do not match the parameters in number or type, a missing receiver, or a
    ///   receiver that is not an instance of the declaring type
    /// - [`crate::Error::TargetInvocation`] if the function threw
    pub fn invoke_original(
        &self,
        function: &FunctionIdentity,
        receiver: Option<&Value>,
        args: &[Value],
    ) -> Result<Value> {
        let method = resolve_function(self.bridge.as_ref(), function)?;
        check_arguments(self.bridge.as_ref(), function, args)?;

        let resolved = if method.is_static() {
            if receiver.is_some_and(|value| !value.is_null()) {
                return Err(invalid_target!("{} is static but got a receiver", function));
            }
            method
        } else {
            let this = receiver
                .filter(|value| !value.is_null())
                .ok_or_else(|| invalid_target!("{} needs a receiver", function))?;
            if !self
                .bridge
                .is_instance(this, &TypeSig::Class(function.declaring.clone()))
            {
                return Err(invalid_target!(
                    "Receiver of type {} is not an instance of {}",
                    this.type_description(),
                    function.declaring
                ));
            }
            self.resolve_virtual(method, this)
        };

        let receiver = receiver.filter(|_| !resolved.is_static());
        match self.registry.backup(&resolved.identity) {
            Some(backup) => backup.invoke(receiver, args),
            None => self.bridge.non_virtual_invoke(
                &resolved.identity,
                &resolved.identity.signature.to_string(),
                receiver,
                args,
            ),
        }
    }

    fn resolve_virtual(&self, method: MethodDef, receiver: &Value) -> MethodDef {
        if method.is_private() || method.is_constructor() {
            return method;
        }
        receiver
            .runtime_type_name()
            .and_then(|runtime_type| self.bridge.find_override(&runtime_type, &method))
            .unwrap_or(method)
    }

    /// Runs the original constructor `ctor` on an already allocated `receiver`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidTarget`] if `ctor` is not a constructor, plus the
    /// errors of [`OriginalInvoker::invoke_original`].
    pub fn invoke_original_constructor(
        &self,
        ctor: &FunctionIdentity,
        receiver: &Value,
        args: &[Value],
    ) -> Result<()> {
        if !ctor.is_constructor() || ctor.is_static() {
            return Err(invalid_target!("{} is not a constructor", ctor));
        }
        self.invoke_original(ctor, Some(receiver), args)?;
        Ok(())
    }

    /// Allocates an instance of the declaring type of `ctor` and runs the original
    /// constructor on it.
    ///
    /// # Errors
    /// See [`OriginalInvoker::allocate_uninitialized`] and
    /// [`OriginalInvoker::invoke_original_constructor`].
    pub fn new_instance_original(&self, ctor: &FunctionIdentity, args: &[Value]) -> Result<Value> {
        let instance = self.allocate_uninitialized(&ctor.declaring)?;
        self.invoke_original_constructor(ctor, &instance, args)?;
        Ok(instance)
    }

    /// Allocates an instance of `ty` without running any constructor.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidTarget`] for unknown, primitive, array, abstract and
    /// interface types.
    pub fn allocate_uninitialized(&self, ty: &TypeName) -> Result<Value> {
        let def = self
            .bridge
            .resolve_type(ty)
            .ok_or_else(|| invalid_target!("Unknown type {}", ty))?;
        if def.is_primitive() || def.is_array() {
            return Err(invalid_target!("Cannot allocate {:?} type {}", def.kind, ty));
        }
        if def.is_interface() || def.is_abstract() {
            return Err(invalid_target!("Cannot allocate abstract type {}", ty));
        }
        self.bridge.allocate_instance(ty)
    }

    /// The static initializer of `ty`.
    #[must_use]
    pub fn static_initializer(&self, ty: &TypeName) -> Option<FunctionIdentity> {
        self.bridge.static_initializer(ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        hook::{callback::MethodHook, HookPriority},
        metadata::{
            method::MethodAttributes,
            signatures::{MethodSig, ScalarKind},
            typesystem::TypeDef,
        },
        test::{class_type, method, shape_type, FnInterceptor, StubBridge, Types},
        value::ObjectRef,
        Error,
    };

    fn speak(declaring: &str) -> MethodDef {
        method(
            declaring,
            "Speak",
            MethodSig::instance(TypeSig::String, vec![]),
            MethodAttributes::PUBLIC | MethodAttributes::VIRTUAL,
        )
    }

    fn animals() -> Vec<TypeDef> {
        let animal = class_type("Demo.Animal", vec![speak("Demo.Animal")]);
        let mut dog = class_type("Demo.Dog", vec![speak("Demo.Dog")]);
        dog.base = Some(TypeName::parse("Demo.Animal"));
        let stone = class_type("Demo.Stone", vec![]);
        vec![animal, dog, stone, shape_type()]
    }

    fn invoker() -> (OriginalInvoker, Arc<HookRegistry>) {
        let interceptor = FnInterceptor::new(|receiver, _| {
            let this = receiver.and_then(Value::as_object).unwrap();
            Ok(Value::from(format!("woof from {}", this.type_name().name())))
        });
        let registry = Arc::new(HookRegistry::new(Arc::new(interceptor)));
        let bridge = Arc::new(StubBridge(Types::with(animals())));
        (OriginalInvoker::new(registry.clone(), bridge), registry)
    }

    #[test]
    fn resolves_overrides_through_the_receiver() {
        let (invoker, registry) = invoker();
        registry
            .register(&speak("Demo.Dog"), Arc::new(MethodHook::new("noop")), HookPriority::NORMAL)
            .unwrap();

        let dog = Value::Object(ObjectRef::new(TypeName::parse("Demo.Dog")));
        let result = invoker
            .invoke_original(&speak("Demo.Animal").identity, Some(&dog), &[])
            .unwrap();
        assert_eq!(result, Value::from("woof from Dog"));
    }

    #[test]
    fn validates_receiver_and_arguments() {
        let (invoker, _) = invoker();
        let animal_speak = speak("Demo.Animal").identity;

        assert!(matches!(
            invoker.invoke_original(&animal_speak, None, &[]),
            Err(Error::InvalidTarget(_))
        ));
        assert!(matches!(
            invoker.invoke_original(&animal_speak, Some(&Value::Null), &[]),
            Err(Error::InvalidTarget(_))
        ));

        let stone = Value::Object(ObjectRef::new(TypeName::parse("Demo.Stone")));
        assert!(matches!(
            invoker.invoke_original(&animal_speak, Some(&stone), &[]),
            Err(Error::InvalidTarget(message)) if message.contains("not an instance")
        ));

        let animal = Value::Object(ObjectRef::new(TypeName::parse("Demo.Animal")));
        assert!(matches!(
            invoker.invoke_original(&speak("Demo.Dog").identity, Some(&animal), &[]),
            Err(Error::InvalidTarget(message)) if message.contains("not an instance")
        ));

        let dog = Value::Object(ObjectRef::new(TypeName::parse("Demo.Dog")));
        assert!(matches!(
            invoker.invoke_original(&animal_speak, Some(&dog), &[Value::I4(1)]),
            Err(Error::InvalidTarget(_))
        ));
    }

    #[test]
    fn unhooked_functions_use_the_non_virtual_primitive() {
        let (invoker, _) = invoker();
        let dog = Value::Object(ObjectRef::new(TypeName::parse("Demo.Dog")));
        // The stub bridge has no non-virtual primitive.
        assert!(matches!(
            invoker.invoke_original(&speak("Demo.Dog").identity, Some(&dog), &[]),
            Err(Error::Runtime(_))
        ));
    }

    #[test]
    fn allocation_rejects_uninstantiable_types() {
        let (invoker, _) = invoker();
        assert!(matches!(
            invoker.allocate_uninitialized(&TypeName::parse("Demo.Shape")),
            Err(Error::InvalidTarget(_))
        ));
        assert!(matches!(
            invoker.allocate_uninitialized(&TypeName::parse("Demo.Missing")),
            Err(Error::InvalidTarget(_))
        ));

        let not_ctor = FunctionIdentity::new(
            TypeName::parse("Demo.Dog"),
            "Speak",
            MethodSig::instance(TypeSig::Scalar(ScalarKind::I4), vec![]),
        );
        let dog = Value::Object(ObjectRef::new(TypeName::parse("Demo.Dog")));
        assert!(matches!(
            invoker.invoke_original_constructor(&not_ctor, &dog, &[]),
            Err(Error::InvalidTarget(_))
        ));
    }
}
