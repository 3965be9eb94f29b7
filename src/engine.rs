//! The interception engine.
//!
//! [`Engine`] ties the pieces together: it attaches to a [`RuntimeBridge`], owns the hook
//! registry, and binds the dispatcher as the native implementation of the injected entry
//! point. Hooking a function returns an [`UnhookHandle`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cilplant::{
//!     config::EngineConfig,
//!     emulation::EmulatedRuntime,
//!     hook::HookPriority,
//!     metadata::{method::FunctionIdentity, signatures::{MethodSig, ScalarKind, TypeName, TypeSig}},
//!     Engine, Value,
//! };
//!
//! # fn main() -> cilplant::Result<()> {
//! let runtime = Arc::new(EmulatedRuntime::new()?);
//! let engine = Engine::initialize(runtime.clone(), EngineConfig::default())?;
//!
//! let i4 = TypeSig::Scalar(ScalarKind::I4);
//! let add = FunctionIdentity::new(
//!     TypeName::parse("Demo.Calculator"),
//!     "Add",
//!     MethodSig::static_method(i4.clone(), vec![i4.clone(), i4]),
//! );
//! let handle = engine.hook_before(&add, HookPriority::NORMAL, |ctx| {
//!     let sum = ctx.arg(0)?.as_i4().unwrap_or(0) + ctx.arg(1)?.as_i4().unwrap_or(0);
//!     ctx.set_result(Value::I4(-sum))
//! })?;
//! handle.unhook()?;
//! # Ok(())
//! # }
//! ```

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};

use crate::{
    config::EngineConfig,
    hook::{
        validation::check_hook_target, DispatchContext, Dispatcher, HookCallback, HookId,
        HookPriority, HookRegistrationRc, HookRegistry, MethodHook, OriginalInvoker,
    },
    metadata::{method::FunctionIdentity, signatures::TypeName},
    rewriter::{EntryInterceptor, RewritingInterceptor},
    runtime::{DispatchEntry, RuntimeBridge},
    value::Value,
    Error, Result,
};

/// Name reported by the engine.
pub const FRAMEWORK_NAME: &str = "cilplant";

/// Version reported by the engine.
pub const FRAMEWORK_VERSION: &str = env!("CARGO_PKG_VERSION");

struct EngineShared {
    config: EngineConfig,
    bridge: Arc<dyn RuntimeBridge>,
    registry: Arc<HookRegistry>,
    dispatcher: Dispatcher,
    original: OriginalInvoker,
    shut_down: AtomicBool,
}

impl Drop for EngineShared {
    fn drop(&mut self) {
        if !self.shut_down.load(Ordering::Acquire) {
            if let Err(error) = self.bridge.release_engine() {
                log::warn!("Failed to release the runtime: {}", error);
            }
        }
    }
}

/// A running interception engine.
///
/// Cloning is cheap; all clones share the same registry.
#[derive(Clone)]
pub struct Engine(Arc<EngineShared>);

impl Engine {
    /// Attaches to `bridge` using the CIL rewriting interceptor.
    ///
    /// # Errors
    /// Returns [`Error::IllegalState`] if an engine is already attached to the runtime.
    pub fn initialize(bridge: Arc<dyn RuntimeBridge>, config: EngineConfig) -> Result<Engine> {
        Self::initialize_with(bridge, config, |bridge, config, handler| {
            Arc::new(RewritingInterceptor::new(bridge, config, handler))
        })
    }

    /// Attaches to `bridge` with a custom interceptor.
    ///
    /// `factory` receives the dispatch entry handler the interceptor must route intercepted
    /// calls into.
    ///
    /// # Errors
    /// Returns [`Error::IllegalState`] if an engine is already attached to the runtime.
    pub fn initialize_with<F>(
        bridge: Arc<dyn RuntimeBridge>,
        config: EngineConfig,
        factory: F,
    ) -> Result<Engine>
    where
        F: FnOnce(Arc<dyn RuntimeBridge>, &EngineConfig, DispatchEntry) -> Arc<dyn EntryInterceptor>,
    {
        bridge.initialize_engine()?;

        let shared = Arc::new_cyclic(|weak: &Weak<EngineShared>| {
            let weak = weak.clone();
            let handler: DispatchEntry = Arc::new(move |args: &[Value]| match weak.upgrade() {
                Some(shared) => shared.dispatcher.handle_entry(args),
                // Engine gone: let the original code run.
                None => Ok(Value::Null),
            });

            let interceptor = factory(bridge.clone(), &config, handler);
            let registry = Arc::new(HookRegistry::new(interceptor));
            EngineShared {
                dispatcher: Dispatcher::new(
                    registry.clone(),
                    bridge.clone(),
                    config.failure_observer.clone(),
                ),
                original: OriginalInvoker::new(registry.clone(), bridge.clone()),
                registry,
                bridge,
                config,
                shut_down: AtomicBool::new(false),
            }
        });

        log::info!("{} {} attached", FRAMEWORK_NAME, FRAMEWORK_VERSION);
        Ok(Engine(shared))
    }

    fn ensure_running(&self) -> Result<()> {
        if self.0.shut_down.load(Ordering::Acquire) {
            return Err(Error::IllegalState("The engine was shut down".to_string()));
        }
        Ok(())
    }

    /// The configuration the engine was initialized with.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.0.config
    }

    /// The runtime bridge.
    #[must_use]
    pub fn bridge(&self) -> &Arc<dyn RuntimeBridge> {
        &self.0.bridge
    }

    /// Adds `callback` to the chain of `target`, intercepting it on first use.
    ///
    /// # Errors
    /// - [`Error::InvalidTarget`] if `target` cannot be hooked
    /// - [`Error::InstallationFailed`] if the runtime rejected the rewritten function
    /// - [`Error::IllegalState`] after [`Engine::shutdown`]
    pub fn hook(
        &self,
        target: &FunctionIdentity,
        callback: Arc<dyn HookCallback>,
        priority: HookPriority,
    ) -> Result<UnhookHandle> {
        self.ensure_running()?;
        let method = check_hook_target(&self.0.config, self.0.bridge.as_ref(), target)?;
        let registration = self.0.registry.register(&method, callback, priority)?;
        if self.0.shut_down.load(Ordering::SeqCst) {
            // shutdown may have collected the registrations before this one was added
            self.0.registry.unregister(&registration)?;
            return Err(Error::IllegalState("The engine was shut down".to_string()));
        }
        Ok(UnhookHandle {
            registration,
            engine: Arc::downgrade(&self.0),
        })
    }

    /// Hooks `target` with a before callback.
    ///
    /// # Errors
    /// See [`Engine::hook`].
    pub fn hook_before<F>(
        &self,
        target: &FunctionIdentity,
        priority: HookPriority,
        f: F,
    ) -> Result<UnhookHandle>
    where
        F: Fn(&DispatchContext) -> Result<()> + Send + Sync + 'static,
    {
        let callback = MethodHook::new(format!("before {}", target.name)).before(f);
        self.hook(target, Arc::new(callback), priority)
    }

    /// Hooks `target` with an after callback.
    ///
    /// # Errors
    /// See [`Engine::hook`].
    pub fn hook_after<F>(
        &self,
        target: &FunctionIdentity,
        priority: HookPriority,
        f: F,
    ) -> Result<UnhookHandle>
    where
        F: Fn(&DispatchContext) -> Result<()> + Send + Sync + 'static,
    {
        let callback = MethodHook::new(format!("after {}", target.name)).after(f);
        self.hook(target, Arc::new(callback), priority)
    }

    /// Calls the original behavior of `function`, skipping its callbacks.
    ///
    /// # Errors
    /// See [`OriginalInvoker::invoke_original`].
    pub fn invoke_original(
        &self,
        function: &FunctionIdentity,
        receiver: Option<&Value>,
        args: &[Value],
    ) -> Result<Value> {
        self.0.original.invoke_original(function, receiver, args)
    }

    /// Runs the original constructor `ctor` on `receiver`.
    ///
    /// # Errors
    /// See [`OriginalInvoker::invoke_original_constructor`].
    pub fn invoke_original_constructor(
        &self,
        ctor: &FunctionIdentity,
        receiver: &Value,
        args: &[Value],
    ) -> Result<()> {
        self.0
            .original
            .invoke_original_constructor(ctor, receiver, args)
    }

    /// Allocates an instance and runs the original constructor `ctor` on it.
    ///
    /// # Errors
    /// See [`OriginalInvoker::new_instance_original`].
    pub fn new_instance_original(&self, ctor: &FunctionIdentity, args: &[Value]) -> Result<Value> {
        self.0.original.new_instance_original(ctor, args)
    }

    /// Allocates an instance of `ty` without running a constructor.
    ///
    /// # Errors
    /// See [`OriginalInvoker::allocate_uninitialized`].
    pub fn allocate_uninitialized(&self, ty: &TypeName) -> Result<Value> {
        self.0.original.allocate_uninitialized(ty)
    }

    /// The static initializer of `ty`.
    #[must_use]
    pub fn static_initializer(&self, ty: &TypeName) -> Option<FunctionIdentity> {
        self.0.original.static_initializer(ty)
    }

    /// Active registrations of `target` in dispatch order.
    #[must_use]
    pub fn active_chain(&self, target: &FunctionIdentity) -> Vec<HookRegistrationRc> {
        self.0.registry.active_chain(target)
    }

    /// True if `target` has an active callback.
    #[must_use]
    pub fn is_hooked(&self, target: &FunctionIdentity) -> bool {
        self.0.registry.is_hooked(target)
    }

    /// Number of ids handed out so far.
    #[must_use]
    pub fn hook_counter(&self) -> u64 {
        self.0.registry.hook_counter()
    }

    /// Unhooks everything and detaches from the runtime.
    ///
    /// Calling it again is a no-op.
    ///
    /// # Errors
    /// Returns the first error raised while restoring a function or releasing the runtime;
    /// the remaining functions are still restored.
    pub fn shutdown(&self) -> Result<()> {
        if self.0.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut first_error = None;
        for registration in self.0.registry.registrations() {
            if let Err(error) = self.0.registry.unregister(&registration) {
                log::warn!("Failed to unhook {}: {}", registration.target(), error);
                first_error.get_or_insert(error);
            }
        }
        if let Err(error) = self.0.bridge.release_engine() {
            first_error.get_or_insert(error);
        }

        log::info!("{} detached", FRAMEWORK_NAME);
        first_error.map_or(Ok(()), Err)
    }
}

/// Handle returned by [`Engine::hook`].
///
/// Dropping the handle keeps the hook installed.
#[derive(Clone)]
pub struct UnhookHandle {
    registration: HookRegistrationRc,
    engine: Weak<EngineShared>,
}

impl UnhookHandle {
    /// Removes the callback. Unhooking twice is a no-op.
    ///
    /// # Errors
    /// Returns the runtime's error if the original representation could not be restored.
    pub fn unhook(&self) -> Result<()> {
        match self.engine.upgrade() {
            Some(engine) => engine.registry.unregister(&self.registration),
            None => {
                self.registration.deactivate();
                Ok(())
            }
        }
    }

    /// True until unhooked.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.registration.is_active()
    }

    /// The hooked function.
    #[must_use]
    pub fn target(&self) -> &FunctionIdentity {
        self.registration.target()
    }

    /// The registered callback.
    #[must_use]
    pub fn callback(&self) -> &Arc<dyn HookCallback> {
        self.registration.callback()
    }

    /// Id of the registration.
    #[must_use]
    pub fn id(&self) -> HookId {
        self.registration.id()
    }

    /// Priority of the registration.
    #[must_use]
    pub fn priority(&self) -> HookPriority {
        self.registration.priority()
    }
}

impl std::fmt::Debug for UnhookHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnhookHandle")
            .field("registration", &self.registration)
            .field("engine_alive", &(self.engine.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{add_identity, area_identity, calculator_type, shape_type, FnInterceptor, StubBridge, Types};

    fn engine() -> (Engine, Arc<FnInterceptor>) {
        let interceptor = Arc::new(FnInterceptor::new(|_, _| Ok(Value::I4(3))));
        let bridge = Arc::new(StubBridge(Types::with(vec![calculator_type(), shape_type()])));
        let shared = interceptor.clone();
        let engine = Engine::initialize_with(bridge, EngineConfig::default(), move |_, _, _| shared)
            .unwrap();
        (engine, interceptor)
    }

    #[test]
    fn hook_and_unhook() {
        let (engine, interceptor) = engine();
        let handle = engine
            .hook_before(&add_identity(), HookPriority::NORMAL, |_| Ok(()))
            .unwrap();

        assert!(engine.is_hooked(&add_identity()));
        assert_eq!(engine.active_chain(&add_identity()).len(), 1);
        assert_eq!(handle.target(), &add_identity());
        assert_eq!(interceptor.installs.load(Ordering::Relaxed), 1);

        handle.unhook().unwrap();
        handle.unhook().unwrap();
        assert!(!handle.is_active());
        assert!(!engine.is_hooked(&add_identity()));
        assert_eq!(interceptor.uninstalls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn invalid_targets_leave_no_state() {
        let (engine, interceptor) = engine();
        assert!(matches!(
            engine.hook_after(&area_identity(), HookPriority::NORMAL, |_| Ok(())),
            Err(Error::InvalidTarget(_))
        ));
        assert_eq!(engine.hook_counter(), 0);
        assert_eq!(interceptor.installs.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn shutdown_unhooks_everything() {
        let (engine, interceptor) = engine();
        let first = engine
            .hook_before(&add_identity(), HookPriority::HIGH, |_| Ok(()))
            .unwrap();
        let second = engine
            .hook_after(&add_identity(), HookPriority::LOW, |_| Ok(()))
            .unwrap();

        engine.shutdown().unwrap();
        engine.shutdown().unwrap();
        assert!(!first.is_active() && !second.is_active());
        assert_eq!(interceptor.uninstalls.load(Ordering::Relaxed), 1);
        assert!(matches!(
            engine.hook_before(&add_identity(), HookPriority::NORMAL, |_| Ok(())),
            Err(Error::IllegalState(_))
        ));
    }

    #[test]
    fn handles_outlive_the_engine() {
        let (engine, interceptor) = engine();
        let handle = engine
            .hook_before(&add_identity(), HookPriority::NORMAL, |_| Ok(()))
            .unwrap();
        drop(engine);

        handle.unhook().unwrap();
        assert!(!handle.is_active());
        assert_eq!(interceptor.uninstalls.load(Ordering::Relaxed), 0);
    }
}
