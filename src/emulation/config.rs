//! Reference runtime configuration.

/// Default maximum nesting of managed calls.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;

/// Configuration of an [`crate::emulation::EmulatedRuntime`].
///
/// ```rust,no_run
/// use cilplant::emulation::EmulationConfig;
///
/// let config = EmulationConfig::default()
///     .with_max_call_depth(64)
///     .with_verify_on_install(false);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmulationConfig {
    /// Maximum nesting of managed calls on one thread, counting calls re-entered through
    /// native functions.
    pub max_call_depth: usize,

    /// Verify type images when they are loaded or installed, unless the installer asks
    /// for a verification bypass.
    pub verify_on_install: bool,
}

impl Default for EmulationConfig {
    fn default() -> Self {
        EmulationConfig {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            verify_on_install: true,
        }
    }
}

impl EmulationConfig {
    /// Sets the call depth limit.
    #[must_use]
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Enables or disables verification on install.
    #[must_use]
    pub fn with_verify_on_install(mut self, verify: bool) -> Self {
        self.verify_on_install = verify;
        self
    }
}
