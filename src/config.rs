//! Engine configuration.
//!
//! [`EngineConfig`] is a plain struct with public fields, a [`Default`] and `with_*`
//! builder methods:
//!
//! ```rust,no_run
//! use cilplant::{config::EngineConfig, metadata::signatures::TypeName};
//!
//! let config = EngineConfig::default()
//!     .with_verify_images(true)
//!     .with_denied_type(TypeName::parse("Game.AntiCheat"))
//!     .with_failure_observer(|failure| eprintln!("{failure}"));
//! ```

use std::{collections::HashSet, fmt, sync::Arc};

use strum::Display;

use crate::{
    hook::HookId,
    metadata::{method::FunctionIdentity, signatures::TypeName},
};

/// Namespace of the types the engine injects into the runtime.
pub const DEFAULT_GENERATED_NAMESPACE: &str = "CilPlant.Generated";

/// Callback phase in which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum CallbackPhase {
    /// The before phase
    #[strum(serialize = "before")]
    Before,
    /// The after phase
    #[strum(serialize = "after")]
    After,
}

/// A callback failure isolated by the dispatcher.
#[derive(Debug, Clone)]
pub struct CallbackFailure {
    /// The registration whose callback failed
    pub hook_id: HookId,
    /// The intercepted function
    pub target: FunctionIdentity,
    /// The failing phase
    pub phase: CallbackPhase,
    /// The returned error or the panic payload
    pub message: String,
}

impl fmt::Display for CallbackFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hook {} failed in {} callback of {}: {}",
            self.hook_id, self.phase, self.target, self.message
        )
    }
}

/// Receives every isolated callback failure.
pub type FailureObserver = Arc<dyn Fn(&CallbackFailure) + Send + Sync>;

/// Configuration of an [`crate::Engine`].
#[derive(Clone)]
pub struct EngineConfig {
    /// Reject targets declared on foundational runtime types (object, string, exceptions,
    /// boxed scalar wrappers, core collections, reflection).
    pub deny_foundational_types: bool,

    /// Additional types whose functions must never be hooked.
    pub denied_types: HashSet<TypeName>,

    /// Functions allowed even though their declaring type is denied.
    pub exempt_functions: HashSet<FunctionIdentity>,

    /// Verify rewritten images before installing them.
    ///
    /// Images that need verification bypass (types with an intercepted instance
    /// constructor) are never verified.
    pub verify_images: bool,

    /// Namespace of the injected dispatch entry type.
    pub generated_namespace: String,

    /// Receives isolated callback failures in addition to the log.
    pub failure_observer: Option<FailureObserver>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            deny_foundational_types: true,
            denied_types: HashSet::new(),
            exempt_functions: HashSet::new(),
            verify_images: false,
            generated_namespace: DEFAULT_GENERATED_NAMESPACE.to_string(),
            failure_observer: None,
        }
    }
}

impl EngineConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables the foundational type deny list.
    #[must_use]
    pub fn with_foundational_types_denied(mut self, deny: bool) -> Self {
        self.deny_foundational_types = deny;
        self
    }

    /// Adds a denied type.
    #[must_use]
    pub fn with_denied_type(mut self, ty: TypeName) -> Self {
        self.denied_types.insert(ty);
        self
    }

    /// Exempts a function from the type deny lists.
    ///
    /// `System.Array::Copy`, `System.Buffer::BlockCopy` and the engine's own generated
    /// types stay denied regardless.
    #[must_use]
    pub fn with_exempt_function(mut self, function: FunctionIdentity) -> Self {
        self.exempt_functions.insert(function);
        self
    }

    /// Enables verification of rewritten images before installation.
    #[must_use]
    pub fn with_verify_images(mut self, verify: bool) -> Self {
        self.verify_images = verify;
        self
    }

    /// Sets the namespace of injected types.
    #[must_use]
    pub fn with_generated_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.generated_namespace = namespace.into();
        self
    }

    /// Sets the failure observer.
    #[must_use]
    pub fn with_failure_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&CallbackFailure) + Send + Sync + 'static,
    {
        self.failure_observer = Some(Arc::new(observer));
        self
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("deny_foundational_types", &self.deny_foundational_types)
            .field("denied_types", &self.denied_types)
            .field("exempt_functions", &self.exempt_functions)
            .field("verify_images", &self.verify_images)
            .field("generated_namespace", &self.generated_namespace)
            .field("failure_observer", &self.failure_observer.is_some())
            .finish()
    }
}
