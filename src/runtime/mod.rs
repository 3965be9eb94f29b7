//! The runtime bridge.
//!
//! [`RuntimeBridge`] is the set of primitives the engine needs from the runtime that hosts
//! the managed program. Everything the engine does (fetching and installing compiled type
//! representations, allocating objects, calling functions without virtual dispatch) goes
//! through this trait, so the engine itself holds no runtime specific code.
//!
//! [`crate::emulation::EmulatedRuntime`] is the bundled implementation.

use std::sync::Arc;

use crate::{
    metadata::{method::FunctionIdentity, signatures::TypeName, typesystem::TypeResolver},
    value::Value,
    Result,
};

/// Native implementation bound to the shared dispatch entry point.
///
/// Receives the arguments of the managed call (the call bundle) and returns the carrier.
/// Returning `Err(Error::TargetInvocation(exception))` throws `exception` at the call site.
pub type DispatchEntry = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// Primitives provided by the runtime hosting the managed program.
///
/// Failures of the primitives themselves are reported as [`crate::Error::Runtime`];
/// exceptions raised by managed code as [`crate::Error::TargetInvocation`].
pub trait RuntimeBridge: TypeResolver + Send + Sync {
    /// Prepares the runtime for interception.
    ///
    /// # Errors
    /// Returns [`crate::Error::IllegalState`] if an engine is already attached.
    fn initialize_engine(&self) -> Result<()>;

    /// Detaches the engine again.
    ///
    /// # Errors
    /// Returns [`crate::Error::Runtime`] if the runtime refuses.
    fn release_engine(&self) -> Result<()> {
        Ok(())
    }

    /// The current compiled representation (encoded [`crate::image::TypeImage`]) of `ty`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Runtime`] for unknown types.
    fn compiled_representation(&self, ty: &TypeName) -> Result<Vec<u8>>;

    /// Replaces the compiled representation of `ty`.
    ///
    /// With `bypass_verification` the runtime installs the representation even if its
    /// verifier would reject it.
    ///
    /// # Errors
    /// Returns [`crate::Error::Runtime`] or [`crate::Error::Malformed`] if the representation
    /// is rejected.
    fn install_representation(
        &self,
        ty: &TypeName,
        bytes: &[u8],
        bypass_verification: bool,
    ) -> Result<()>;

    /// Allocates an instance of `ty` without running a constructor.
    ///
    /// # Errors
    /// Returns [`crate::Error::Runtime`] if the type cannot be instantiated.
    fn allocate_instance(&self, ty: &TypeName) -> Result<Value>;

    /// Calls `function` exactly, without virtual dispatch.
    ///
    /// `signature` is the explicit signature string of the function, as rendered by
    /// [`crate::metadata::signatures::MethodSig`]'s `Display` impl.
    ///
    /// # Errors
    /// Returns [`crate::Error::TargetInvocation`] if the function threw.
    fn non_virtual_invoke(
        &self,
        function: &FunctionIdentity,
        signature: &str,
        receiver: Option<&Value>,
        args: &[Value],
    ) -> Result<Value>;

    /// The static initializer of `ty`, if it has one.
    fn static_initializer(&self, ty: &TypeName) -> Option<FunctionIdentity>;

    /// Defines a new type from its encoded representation.
    ///
    /// # Errors
    /// Returns [`crate::Error::Runtime`] if a type with that name exists.
    fn inject_type(&self, bytes: &[u8]) -> Result<()>;

    /// Binds the native implementation of the dispatch entry point `entry`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Runtime`] if `entry` is not a native function.
    fn bind_dispatch_entry(&self, entry: &FunctionIdentity, handler: DispatchEntry) -> Result<()>;
}
