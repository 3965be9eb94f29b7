//! # cilplant Prelude
//!
//! The types needed to hook functions and run managed code, for glob import.
//!
//! ```rust,no_run
//! use cilplant::prelude::*;
//!
//! let sig = MethodSig::static_method(TypeSig::Void, vec![]);
//! let target = FunctionIdentity::new(TypeName::parse("Demo.Program"), "Main", sig);
//! ```

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all cilplant operations
pub use crate::Error;

/// The result type used throughout cilplant
pub use crate::Result;

/// Managed values and heap references
pub use crate::value::{ArrayRef, ObjectRef, Value};

// ================================================================================================
// Engine
// ================================================================================================

/// The interception engine and its hook handles
pub use crate::engine::{Engine, UnhookHandle};

/// Engine configuration
pub use crate::config::{CallbackFailure, CallbackPhase, EngineConfig};

/// Callbacks, priorities and per-invocation state
pub use crate::hook::{DispatchContext, HookCallback, HookId, HookPriority, MethodHook};

/// Primitives a host runtime provides
pub use crate::runtime::{DispatchEntry, RuntimeBridge};

// ================================================================================================
// Type System
// ================================================================================================

/// Function identities and definitions
pub use crate::metadata::method::{FunctionIdentity, MethodAttributes, MethodDef};

/// Signatures and type names
pub use crate::metadata::signatures::{MethodSig, ScalarKind, TypeName, TypeSig};

/// Type definitions and relationships
pub use crate::metadata::typesystem::{TypeAttributes, TypeDef, TypeKind, TypeResolver};

/// Compiled type representations
pub use crate::image::{TypeImage, verify_image};

// ================================================================================================
// Reference Runtime
// ================================================================================================

/// The bundled interpreter and its builders
pub use crate::emulation::{EmulatedRuntime, EmulationConfig, MethodBuilder, TypeBuilder};

/// CIL assembly
pub use crate::assembly::InstructionAssembler;
