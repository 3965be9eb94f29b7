//! Hook registration, dispatch and original invocation.
//!
//! # Architecture
//!
//! - [`registry`]: per-function callback chains and their installation state
//! - [`dispatch`]: the before / original / after protocol for one invocation
//! - [`context`]: per-invocation state handed to callbacks
//! - [`original`]: calling a function's un-intercepted behavior
//! - [`suppress`]: the thread-local flag that lets a backup fall through its own prologue
//! - [`validation`]: which functions may be hooked
//!
//! # Key Types
//!
//! - [`HookCallback`] / [`MethodHook`] - callbacks, as trait or closures
//! - [`HookPriority`] - ordering within a chain
//! - [`DispatchContext`] - arguments, result and exception of one invocation
//! - [`DispatchOutcome`] - fall through, return or throw

mod callback;
mod context;
pub mod dispatch;
pub mod original;
pub mod registry;
pub mod suppress;
pub mod validation;

pub use callback::{HookCallback, HookId, HookPriority, MethodHook, PhaseFn};
pub use context::DispatchContext;
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use original::OriginalInvoker;
pub use registry::{ChainHolder, HookRegistration, HookRegistrationRc, HookRegistry};
pub use suppress::SuppressionGuard;
