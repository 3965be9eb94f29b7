//! Hook callbacks and priorities.
//!
//! - [`HookPriority`]: ordering of callbacks within one chain
//! - [`HookCallback`]: the before/after callback interface
//! - [`MethodHook`]: closure based [`HookCallback`] builder

use std::fmt;

use crate::{hook::context::DispatchContext, Result};

/// Identifier of one hook registration.
///
/// Issued from a single atomic counter per engine, starting at 1 and never reused.
pub type HookId = u64;

/// Priority of a callback within its chain.
///
/// Higher priority callbacks run first in the "before" phase and last in the "after" phase.
/// Registrations with equal priority run newest first.
///
/// | Constant | Value |
/// |----------|-------|
/// | [`HIGHEST`](Self::HIGHEST) | 1000 |
/// | [`HIGH`](Self::HIGH) | 500 |
/// | [`NORMAL`](Self::NORMAL) | 0 |
/// | [`LOW`](Self::LOW) | -500 |
/// | [`LOWEST`](Self::LOWEST) | -1000 |
///
/// Any other value is valid:
///
/// ```rust,no_run
/// use cilplant::hook::HookPriority;
///
/// let between = HookPriority(750);
/// assert!(HookPriority::HIGHEST > between && between > HookPriority::HIGH);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HookPriority(pub i32);

impl HookPriority {
    /// Highest priority (value: 1000).
    pub const HIGHEST: Self = Self(1000);

    /// High priority (value: 500).
    pub const HIGH: Self = Self(500);

    /// Normal priority - default (value: 0).
    pub const NORMAL: Self = Self(0);

    /// Low priority (value: -500).
    pub const LOW: Self = Self(-500);

    /// Lowest priority (value: -1000).
    pub const LOWEST: Self = Self(-1000);
}

impl Default for HookPriority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl From<i32> for HookPriority {
    fn from(value: i32) -> Self {
        HookPriority(value)
    }
}

/// A callback attached to an intercepted function.
///
/// Both phases default to doing nothing. A callback that returns an error or panics is
/// logged and reported to the configured failure observer; the remaining callbacks and the
/// original function still run.
///
/// # Examples
///
/// ```rust,no_run
/// use cilplant::{hook::{DispatchContext, HookCallback}, Result, Value};
///
/// struct Negate;
///
/// impl HookCallback for Negate {
///     fn after(&self, ctx: &DispatchContext) -> Result<()> {
///         let value = ctx.result()?.as_i4()?;
///         ctx.set_result(Value::I4(-value))
///     }
/// }
/// ```
pub trait HookCallback: Send + Sync {
    /// Runs before the original function.
    ///
    /// Calling [`DispatchContext::set_result`] or [`DispatchContext::set_throwable`] here
    /// skips the original function.
    ///
    /// # Errors
    /// Any error is isolated by the dispatcher.
    fn before(&self, ctx: &DispatchContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Runs after the original function, or after the override set by a before callback.
    ///
    /// # Errors
    /// Any error is isolated by the dispatcher.
    fn after(&self, ctx: &DispatchContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }
}

/// Closure signature of a callback phase.
pub type PhaseFn = Box<dyn Fn(&DispatchContext) -> Result<()> + Send + Sync>;

/// A [`HookCallback`] assembled from closures.
///
/// ```rust,no_run
/// use cilplant::{hook::MethodHook, Value};
///
/// let hook = MethodHook::new("log-add")
///     .before(|ctx| {
///         log::info!("add{:?}", ctx.args()?);
///         Ok(())
///     })
///     .after(|ctx| ctx.set_result(Value::I4(ctx.result()?.as_i4()? * 2)));
/// ```
pub struct MethodHook {
    name: String,
    before: Option<PhaseFn>,
    after: Option<PhaseFn>,
}

impl MethodHook {
    /// Creates a hook without phases. `name` only shows up in logs and debug output.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        MethodHook {
            name: name.into(),
            before: None,
            after: None,
        }
    }

    /// Sets the before phase.
    #[must_use]
    pub fn before<F>(mut self, f: F) -> Self
    where
        F: Fn(&DispatchContext) -> Result<()> + Send + Sync + 'static,
    {
        self.before = Some(Box::new(f));
        self
    }

    /// Sets the after phase.
    #[must_use]
    pub fn after<F>(mut self, f: F) -> Self
    where
        F: Fn(&DispatchContext) -> Result<()> + Send + Sync + 'static,
    {
        self.after = Some(Box::new(f));
        self
    }

    /// The hook's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl HookCallback for MethodHook {
    fn before(&self, ctx: &DispatchContext) -> Result<()> {
        match &self.before {
            Some(f) => f(ctx),
            None => Ok(()),
        }
    }

    fn after(&self, ctx: &DispatchContext) -> Result<()> {
        match &self.after {
            Some(f) => f(ctx),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for MethodHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodHook")
            .field("name", &self.name)
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .finish()
    }
}
