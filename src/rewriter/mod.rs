//! Entry-point rewriting.
//!
//! Interception is pluggable through [`EntryInterceptor`]: installing it on a function
//! makes every call of that function enter the dispatcher, and yields a [`Backup`] that
//! runs the original behavior.
//!
//! [`RewritingInterceptor`] is the provided strategy. It prepends an interception prologue
//! (see [`prologue`]) to the function's CIL body and installs the patched type image
//! through the runtime bridge. The pristine image of each patched type is kept until the
//! last function of the type is released, at which point the pristine bytes are
//! reinstalled.

pub mod prologue;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::{
    config::EngineConfig,
    hook::SuppressionGuard,
    image::{verify_image, MethodImage, TypeImage},
    metadata::{
        method::{FunctionIdentity, MethodAttributes, MethodDef, MethodImplAttributes},
        signatures::{MethodSig, TypeName, TypeSig},
        typesystem::{TypeAttributes, TypeKind},
    },
    runtime::{DispatchEntry, RuntimeBridge},
    value::Value,
    Error, Result,
};

/// Name of the dispatch entry point on the generated type.
pub const ENTRY_NAME: &str = "Entry";

/// Runs the original behavior of an intercepted function.
pub trait Backup: Send + Sync {
    /// Calls the original function with `receiver` and `args`.
    ///
    /// # Errors
    /// Returns [`crate::Error::TargetInvocation`] if the original threw.
    fn invoke(&self, receiver: Option<&Value>, args: &[Value]) -> Result<Value>;
}

/// Strategy redirecting a function's calls into the dispatcher.
pub trait EntryInterceptor: Send + Sync {
    /// Installs interception of `target`; its calls dispatch with `entry_id`.
    ///
    /// # Errors
    /// Any error aborts the installation; nothing may stay installed.
    fn install(&self, target: &MethodDef, entry_id: u64) -> Result<Arc<dyn Backup>>;

    /// Removes interception of `target`.
    ///
    /// # Errors
    /// Returns the runtime's error if the original representation could not be restored.
    fn uninstall(&self, target: &MethodDef) -> Result<()>;
}

/// Backup that re-enters the intercepted function with dispatch suppressed.
struct ReentryBackup {
    bridge: Arc<dyn RuntimeBridge>,
    target: FunctionIdentity,
    signature: String,
}

impl Backup for ReentryBackup {
    fn invoke(&self, receiver: Option<&Value>, args: &[Value]) -> Result<Value> {
        let _guard = SuppressionGuard::arm();
        self.bridge
            .non_virtual_invoke(&self.target, &self.signature, receiver, args)
    }
}

struct PatchedType {
    pristine_bytes: Vec<u8>,
    pristine: TypeImage,
    /// Intercepted functions in installation order.
    hooked: Vec<(MethodDef, u64)>,
    current: Option<TypeImage>,
}

impl PatchedType {
    fn needs_bypass(&self) -> bool {
        self.hooked
            .iter()
            .any(|(method, _)| method.is_constructor() && !method.is_static())
    }

    fn patched_image(&self, entry: &FunctionIdentity) -> Result<TypeImage> {
        let mut image = self.pristine.clone();
        for (method, entry_id) in &self.hooked {
            prologue::rewrite(&mut image, method, *entry_id, entry)?;
        }
        Ok(image)
    }
}

#[derive(Default)]
struct RewriteState {
    entry: Option<FunctionIdentity>,
    /// Suffixes below this one are taken on the runtime.
    next_dispatch_type: u64,
    types: HashMap<TypeName, PatchedType>,
}

/// Interceptor rewriting CIL bodies.
pub struct RewritingInterceptor {
    bridge: Arc<dyn RuntimeBridge>,
    handler: DispatchEntry,
    verify_images: bool,
    generated_namespace: String,
    state: Mutex<RewriteState>,
}

impl RewritingInterceptor {
    /// Creates the interceptor. `handler` becomes the native implementation of the
    /// dispatch entry point once it is injected.
    #[must_use]
    pub fn new(bridge: Arc<dyn RuntimeBridge>, config: &EngineConfig, handler: DispatchEntry) -> Self {
        RewritingInterceptor {
            bridge,
            handler,
            verify_images: config.verify_images,
            generated_namespace: config.generated_namespace.clone(),
            state: Mutex::new(RewriteState::default()),
        }
    }

    /// The dispatch entry point, once injected.
    #[must_use]
    pub fn entry_point(&self) -> Option<FunctionIdentity> {
        lock!(self.state).entry.clone()
    }

    /// The image currently installed for `ty`, `None` if the type is not patched.
    #[must_use]
    pub fn patched_image(&self, ty: &TypeName) -> Option<TypeImage> {
        lock!(self.state)
            .types
            .get(ty)
            .and_then(|patched| patched.current.clone())
    }

    fn ensure_entry(&self, state: &mut RewriteState) -> Result<FunctionIdentity> {
        if let Some(entry) = &state.entry {
            return Ok(entry.clone());
        }

        let name = self.free_dispatch_type_name(state);
        let bundle = TypeSig::array(TypeSig::Object);
        let entry = FunctionIdentity::new(
            name.clone(),
            ENTRY_NAME,
            MethodSig::static_method(bundle.clone(), vec![bundle]),
        );

        let mut image = TypeImage::new(
            name,
            TypeKind::Class,
            TypeAttributes::PUBLIC | TypeAttributes::ABSTRACT | TypeAttributes::SEALED,
            Some(TypeName::new("System", "Object")),
        );
        image.methods.push(MethodImage {
            def: MethodDef {
                identity: entry.clone(),
                flags: MethodAttributes::PUBLIC
                    | MethodAttributes::STATIC
                    | MethodAttributes::HIDE_BY_SIG,
                impl_flags: MethodImplAttributes::INTERNAL_CALL,
            },
            body: None,
        });

        self.bridge.inject_type(&image.encode()?)?;
        self.bridge
            .bind_dispatch_entry(&entry, self.handler.clone())?;
        log::debug!("Injected dispatch entry point {}", entry);

        state.entry = Some(entry.clone());
        Ok(entry)
    }

    /// The first `DispatchN` name in the generated namespace the runtime does not know.
    ///
    /// Engines attached to the same runtime one after another leave their entry types
    /// behind, so numbering continues after theirs.
    fn free_dispatch_type_name(&self, state: &mut RewriteState) -> TypeName {
        loop {
            state.next_dispatch_type += 1;
            let name = TypeName::new(
                self.generated_namespace.clone(),
                format!("Dispatch{}", state.next_dispatch_type),
            );
            if self.bridge.resolve_type(&name).is_none() {
                return name;
            }
        }
    }

    fn install_type(&self, ty: &TypeName, patched: &mut PatchedType, entry: &FunctionIdentity) -> Result<()> {
        let image = patched.patched_image(entry)?;
        let bypass = patched.needs_bypass();
        if self.verify_images && !bypass {
            verify_image(&image)?;
        }
        self.bridge
            .install_representation(ty, &image.encode()?, bypass)?;
        patched.current = Some(image);
        Ok(())
    }
}

impl EntryInterceptor for RewritingInterceptor {
    fn install(&self, target: &MethodDef, entry_id: u64) -> Result<Arc<dyn Backup>> {
        if !target.has_body() {
            return Err(invalid_target!("{} has no CIL body", target));
        }

        let mut state = lock!(self.state);
        let entry = self.ensure_entry(&mut state)?;
        let ty = &target.identity.declaring;

        if !state.types.contains_key(ty) {
            let pristine_bytes = self.bridge.compiled_representation(ty)?;
            let pristine = TypeImage::decode(&pristine_bytes)?;
            state.types.insert(
                ty.clone(),
                PatchedType {
                    pristine_bytes,
                    pristine,
                    hooked: Vec::new(),
                    current: None,
                },
            );
        }

        let Some(patched) = state.types.get_mut(ty) else {
            return Err(Error::IllegalState(format!("No rewrite state for {ty}")));
        };
        patched.hooked.retain(|(method, _)| method.identity != target.identity);
        patched.hooked.push((target.clone(), entry_id));

        if let Err(error) = self.install_type(ty, patched, &entry) {
            patched.hooked.pop();
            if patched.hooked.is_empty() {
                state.types.remove(ty);
            }
            return Err(error);
        }

        log::debug!(
            "Rewrote {} with entry {} (bypass verification: {})",
            target,
            entry_id,
            patched.needs_bypass()
        );

        Ok(Arc::new(ReentryBackup {
            bridge: self.bridge.clone(),
            target: target.identity.clone(),
            signature: target.identity.signature.to_string(),
        }))
    }

    fn uninstall(&self, target: &MethodDef) -> Result<()> {
        let mut state = lock!(self.state);
        let ty = &target.identity.declaring;
        let Some(entry) = state.entry.clone() else {
            return Ok(());
        };
        let Some(patched) = state.types.get_mut(ty) else {
            return Ok(());
        };

        patched
            .hooked
            .retain(|(method, _)| method.identity != target.identity);

        if patched.hooked.is_empty() {
            self.bridge
                .install_representation(ty, &patched.pristine_bytes, false)?;
            state.types.remove(ty);
            log::debug!("Restored pristine representation of {}", ty);
            return Ok(());
        }

        self.install_type(ty, patched, &entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::method::MethodBody,
        test::{add_method, calculator_type, StubBridge, Types},
    };

    #[test]
    fn rejects_targets_without_body() {
        let bridge = Arc::new(StubBridge(Types::with(vec![calculator_type()])));
        let handler: DispatchEntry = Arc::new(|_| Ok(Value::Null));
        let interceptor = RewritingInterceptor::new(bridge, &EngineConfig::default(), handler);

        let native = MethodDef {
            impl_flags: MethodImplAttributes::INTERNAL_CALL,
            ..add_method()
        };
        assert!(matches!(
            interceptor.install(&native, 1),
            Err(Error::InvalidTarget(_))
        ));
        // The stub cannot inject types, so nothing gets installed.
        assert!(interceptor.install(&add_method(), 1).is_err());
        assert!(interceptor.entry_point().is_none());
    }

    #[test]
    fn dispatch_type_names_skip_existing_types() {
        let leftover = crate::test::class_type("CilPlant.Generated.Dispatch1", vec![]);
        let bridge = Arc::new(StubBridge(Types::with(vec![calculator_type(), leftover])));
        let handler: DispatchEntry = Arc::new(|_| Ok(Value::Null));
        let interceptor = RewritingInterceptor::new(bridge, &EngineConfig::default(), handler);

        let mut state = RewriteState::default();
        assert_eq!(
            interceptor.free_dispatch_type_name(&mut state).full_name(),
            "CilPlant.Generated.Dispatch2"
        );
        assert_eq!(
            interceptor.free_dispatch_type_name(&mut state).full_name(),
            "CilPlant.Generated.Dispatch3"
        );
    }

    #[test]
    fn bypass_only_for_instance_constructors() {
        let mut image = TypeImage::new(
            TypeName::parse("Demo.Point"),
            TypeKind::Class,
            TypeAttributes::PUBLIC,
            Some(TypeName::parse("System.Object")),
        );
        let ctor = crate::test::method(
            "Demo.Point",
            ".ctor",
            MethodSig::instance(TypeSig::Void, vec![]),
            MethodAttributes::PUBLIC | MethodAttributes::RT_SPECIAL_NAME,
        );
        image.methods.push(MethodImage {
            def: ctor.clone(),
            body: Some(MethodBody::new(vec![0x2A], 0).encode().unwrap()),
        });

        let mut patched = PatchedType {
            pristine_bytes: image.encode().unwrap(),
            pristine: image,
            hooked: vec![(add_method(), 1)],
            current: None,
        };
        assert!(!patched.needs_bypass());
        patched.hooked.push((ctor, 2));
        assert!(patched.needs_bypass());
    }
}
