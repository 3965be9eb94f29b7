//! The hook registry.
//!
//! Maps every intercepted function to a [`ChainHolder`]: its priority ordered callback
//! chain plus the installation state of the function's interception. Chains are
//! copy-on-write; writers build a new sequence under the holder's lock and swap it in, so
//! the dispatcher reads a snapshot without locking.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use arc_swap::ArcSwap;
use dashmap::DashMap;

use crate::{
    hook::callback::{HookCallback, HookId, HookPriority},
    metadata::method::{FunctionIdentity, MethodDef},
    rewriter::{Backup, EntryInterceptor},
    Error, Result,
};

/// One callback registered on one function.
pub struct HookRegistration {
    id: HookId,
    target: FunctionIdentity,
    callback: Arc<dyn HookCallback>,
    priority: HookPriority,
    active: AtomicBool,
}

/// Shared handle to a [`HookRegistration`].
pub type HookRegistrationRc = Arc<HookRegistration>;

impl HookRegistration {
    /// The registration id.
    #[must_use]
    pub fn id(&self) -> HookId {
        self.id
    }

    /// The hooked function.
    #[must_use]
    pub fn target(&self) -> &FunctionIdentity {
        &self.target
    }

    /// The callback.
    #[must_use]
    pub fn callback(&self) -> &Arc<dyn HookCallback> {
        &self.callback
    }

    /// The priority.
    #[must_use]
    pub fn priority(&self) -> HookPriority {
        self.priority
    }

    /// False once the registration was removed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Marks the registration inactive, returning whether it was active.
    pub(crate) fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }
}

impl fmt::Debug for HookRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistration")
            .field("id", &self.id)
            .field("target", &self.target.to_string())
            .field("priority", &self.priority.0)
            .field("active", &self.is_active())
            .finish()
    }
}

#[derive(Default)]
struct Installation {
    backup: Option<Arc<dyn Backup>>,
    entry_id: Option<u64>,
}

/// Callback chain and interception state of one function.
pub struct ChainHolder {
    target: MethodDef,
    callbacks: ArcSwap<Vec<HookRegistrationRc>>,
    installation: Mutex<Installation>,
}

impl ChainHolder {
    fn new(target: MethodDef) -> Self {
        ChainHolder {
            target,
            callbacks: ArcSwap::from_pointee(Vec::new()),
            installation: Mutex::new(Installation::default()),
        }
    }

    /// The intercepted function.
    #[must_use]
    pub fn target(&self) -> &MethodDef {
        &self.target
    }

    /// Snapshot of the current chain.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<HookRegistrationRc>> {
        self.callbacks.load_full()
    }

    /// The backup of the original behavior, `None` when not installed.
    #[must_use]
    pub fn backup(&self) -> Option<Arc<dyn Backup>> {
        lock!(self.installation).backup.clone()
    }

    /// Dispatch entry id of the current installation.
    #[must_use]
    pub fn entry_id(&self) -> Option<u64> {
        lock!(self.installation).entry_id
    }
}

/// Process-wide table of intercepted functions, owned by one engine.
pub struct HookRegistry {
    holders: DashMap<FunctionIdentity, Arc<ChainHolder>>,
    entries: DashMap<u64, Arc<ChainHolder>>,
    creation: Mutex<()>,
    next_hook_id: AtomicU64,
    next_entry_id: AtomicU64,
    interceptor: Arc<dyn EntryInterceptor>,
}

impl HookRegistry {
    /// Creates an empty registry installing interceptions through `interceptor`.
    #[must_use]
    pub fn new(interceptor: Arc<dyn EntryInterceptor>) -> Self {
        HookRegistry {
            holders: DashMap::new(),
            entries: DashMap::new(),
            creation: Mutex::new(()),
            next_hook_id: AtomicU64::new(1),
            next_entry_id: AtomicU64::new(1),
            interceptor,
        }
    }

    fn holder_for(&self, target: &MethodDef) -> Arc<ChainHolder> {
        if let Some(holder) = self.holders.get(&target.identity) {
            return holder.clone();
        }

        let _creation = lock!(self.creation);
        self.holders
            .entry(target.identity.clone())
            .or_insert_with(|| Arc::new(ChainHolder::new(target.clone())))
            .clone()
    }

    /// Adds `callback` to the chain of `target`, installing the interception on first use.
    ///
    /// `target` must already be validated.
    ///
    /// # Errors
    /// Returns [`Error::InstallationFailed`] if the interceptor could not install; no state
    /// is retained in that case.
    pub fn register(
        &self,
        target: &MethodDef,
        callback: Arc<dyn HookCallback>,
        priority: HookPriority,
    ) -> Result<HookRegistrationRc> {
        let holder = self.holder_for(target);
        let mut installation = lock!(holder.installation);

        if installation.backup.is_none() {
            let entry_id = self.next_entry_id.fetch_add(1, Ordering::Relaxed);
            let backup = self
                .interceptor
                .install(target, entry_id)
                .map_err(|error| Error::InstallationFailed {
                    target: target.to_string(),
                    reason: error.to_string(),
                })?;
            self.entries.insert(entry_id, holder.clone());
            installation.backup = Some(backup);
            installation.entry_id = Some(entry_id);
            log::debug!("Installed interception of {} as entry {}", target, entry_id);
        }

        let registration = Arc::new(HookRegistration {
            id: self.next_hook_id.fetch_add(1, Ordering::Relaxed),
            target: target.identity.clone(),
            callback,
            priority,
            active: AtomicBool::new(true),
        });

        let current = holder.callbacks.load();
        let position = current
            .iter()
            .position(|existing| existing.priority <= priority)
            .unwrap_or(current.len());
        let mut chain = Vec::with_capacity(current.len() + 1);
        chain.extend_from_slice(&current[..position]);
        chain.push(registration.clone());
        chain.extend_from_slice(&current[position..]);
        holder.callbacks.store(Arc::new(chain));

        Ok(registration)
    }

    /// Removes `registration`; uninstalls the interception when the chain became empty.
    ///
    /// Removing an inactive registration does nothing.
    ///
    /// # Errors
    /// Returns the interceptor's error if uninstalling failed. The registration is removed
    /// regardless.
    pub fn unregister(&self, registration: &HookRegistration) -> Result<()> {
        if !registration.deactivate() {
            return Ok(());
        }

        let Some(holder) = self
            .holders
            .get(&registration.target)
            .map(|holder| holder.clone())
        else {
            return Ok(());
        };

        let mut installation = lock!(holder.installation);
        let chain: Vec<_> = holder
            .callbacks
            .load()
            .iter()
            .filter(|existing| existing.id != registration.id)
            .cloned()
            .collect();
        let now_empty = chain.is_empty();
        holder.callbacks.store(Arc::new(chain));

        if now_empty && installation.backup.is_some() {
            installation.backup = None;
            installation.entry_id = None;
            if let Err(error) = self.interceptor.uninstall(&holder.target) {
                log::error!("Failed to uninstall interception of {}: {}", holder.target, error);
                return Err(error);
            }
            log::debug!("Removed interception of {}", holder.target);
        }

        Ok(())
    }

    /// The holder bound to dispatch entry `entry_id`.
    ///
    /// Entries outlive their installation so that a prologue still running while its
    /// function is unhooked finds a holder without backup and falls through.
    #[must_use]
    pub fn resolve_entry(&self, entry_id: u64) -> Option<Arc<ChainHolder>> {
        self.entries.get(&entry_id).map(|holder| holder.clone())
    }

    /// Snapshot of the chain of `target`, empty if never hooked.
    #[must_use]
    pub fn active_chain(&self, target: &FunctionIdentity) -> Vec<HookRegistrationRc> {
        self.holders
            .get(target)
            .map(|holder| Vec::clone(&holder.snapshot()))
            .unwrap_or_default()
    }

    /// True while `target` has an installed interception.
    #[must_use]
    pub fn is_hooked(&self, target: &FunctionIdentity) -> bool {
        self.backup(target).is_some()
    }

    /// The backup of `target`, if it is intercepted.
    #[must_use]
    pub fn backup(&self, target: &FunctionIdentity) -> Option<Arc<dyn Backup>> {
        self.holders.get(target).and_then(|holder| holder.backup())
    }

    /// Number of hook ids issued so far.
    #[must_use]
    pub fn hook_counter(&self) -> u64 {
        self.next_hook_id.load(Ordering::Relaxed) - 1
    }

    /// Every active registration, in no particular order.
    #[must_use]
    pub fn registrations(&self) -> Vec<HookRegistrationRc> {
        self.holders
            .iter()
            .flat_map(|holder| Vec::clone(&holder.snapshot()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{hook::callback::MethodHook, test::add_method, value::Value};

    #[derive(Default)]
    struct RecordingInterceptor {
        installs: Mutex<Vec<u64>>,
        uninstalls: Mutex<usize>,
        fail: AtomicBool,
    }

    struct NoBackup;

    impl Backup for NoBackup {
        fn invoke(&self, _receiver: Option<&Value>, _args: &[Value]) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    impl EntryInterceptor for RecordingInterceptor {
        fn install(&self, _target: &MethodDef, entry_id: u64) -> Result<Arc<dyn Backup>> {
            if self.fail.load(Ordering::Relaxed) {
                return Err(Error::Runtime("rejected".to_string()));
            }
            lock!(self.installs).push(entry_id);
            Ok(Arc::new(NoBackup))
        }

        fn uninstall(&self, _target: &MethodDef) -> Result<()> {
            *lock!(self.uninstalls) += 1;
            Ok(())
        }
    }

    fn noop() -> Arc<dyn HookCallback> {
        Arc::new(MethodHook::new("noop"))
    }

    #[test]
    fn chain_is_ordered_by_priority_newest_first() {
        let registry = HookRegistry::new(Arc::new(RecordingInterceptor::default()));
        let add = add_method();

        let low = registry.register(&add, noop(), HookPriority(1)).unwrap();
        let high = registry.register(&add, noop(), HookPriority(10)).unwrap();
        let tie = registry.register(&add, noop(), HookPriority(1)).unwrap();

        let ids: Vec<_> = registry
            .active_chain(&add.identity)
            .iter()
            .map(|r| r.id())
            .collect();
        assert_eq!(ids, vec![high.id(), tie.id(), low.id()]);
        assert_eq!(registry.hook_counter(), 3);
    }

    #[test]
    fn installs_once_and_uninstalls_when_empty() {
        let interceptor = Arc::new(RecordingInterceptor::default());
        let registry = HookRegistry::new(interceptor.clone());
        let add = add_method();

        let first = registry.register(&add, noop(), HookPriority::NORMAL).unwrap();
        let second = registry.register(&add, noop(), HookPriority::NORMAL).unwrap();
        assert_eq!(lock!(interceptor.installs).len(), 1);
        assert!(registry.is_hooked(&add.identity));
        assert_eq!(registry.resolve_entry(1).unwrap().entry_id(), Some(1));

        registry.unregister(&first).unwrap();
        assert!(registry.is_hooked(&add.identity));
        registry.unregister(&second).unwrap();
        registry.unregister(&second).unwrap();
        assert!(!registry.is_hooked(&add.identity));
        assert!(!second.is_active());
        assert_eq!(*lock!(interceptor.uninstalls), 1);
        assert!(registry.resolve_entry(1).unwrap().backup().is_none());

        registry.register(&add, noop(), HookPriority::NORMAL).unwrap();
        assert_eq!(*lock!(interceptor.installs), vec![1, 2]);
    }

    #[test]
    fn failed_installation_keeps_no_state() {
        let interceptor = Arc::new(RecordingInterceptor::default());
        interceptor.fail.store(true, Ordering::Relaxed);
        let registry = HookRegistry::new(interceptor);
        let add = add_method();

        let error = registry
            .register(&add, noop(), HookPriority::NORMAL)
            .unwrap_err();
        assert!(matches!(error, Error::InstallationFailed { .. }));
        assert!(!registry.is_hooked(&add.identity));
        assert!(registry.active_chain(&add.identity).is_empty());
        assert_eq!(registry.hook_counter(), 0);
    }
}
