//! The dispatch engine.
//!
//! Every rewritten prologue ends up in [`Dispatcher::handle_entry`] with its call bundle:
//! an `object[]` holding the boxed entry id, the receiver for instance functions, and the
//! arguments. The dispatcher runs the chain of the intercepted function around its
//! original body and hands the outcome back to the prologue through the carrier
//! convention: `null` falls through into the original body, a one-element `object[]`
//! carries the value to return.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use crate::{
    config::{CallbackFailure, CallbackPhase, FailureObserver},
    hook::{
        context::{DispatchContext, Released},
        registry::{HookRegistrationRc, HookRegistry},
        suppress,
        validation::mismatched_argument,
    },
    metadata::{
        method::MethodDef,
        signatures::{TypeName, TypeSig},
    },
    runtime::RuntimeBridge,
    value::{ArrayRef, ObjectRef, Value},
    Error, Result,
};

/// Result of dispatching one invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Continue with the original body as compiled
    FallThrough,
    /// Return this value to the caller, `Null` for `void` and constructors
    Return(Value),
    /// Throw this exception at the call site
    Throw(Value),
}

/// Runs callback chains for intercepted invocations.
pub struct Dispatcher {
    registry: Arc<HookRegistry>,
    bridge: Arc<dyn RuntimeBridge>,
    observer: Option<FailureObserver>,
}

impl Dispatcher {
    /// Creates a dispatcher over `registry`.
    ///
    /// `bridge` answers the type checks of returned values; `observer` receives isolated
    /// callback failures.
    #[must_use]
    pub fn new(
        registry: Arc<HookRegistry>,
        bridge: Arc<dyn RuntimeBridge>,
        observer: Option<FailureObserver>,
    ) -> Self {
        Dispatcher {
            registry,
            bridge,
            observer,
        }
    }

    /// Dispatches one call bundle.
    ///
    /// # Errors
    /// - [`Error::IllegalState`] for malformed bundles or unknown entry ids
    /// - [`Error::InvalidCast`] if an argument rewritten by a before callback does not match
    ///   its parameter, or the final result does not match the declared return type
    /// - any non-managed failure of the backup
    pub fn dispatch(&self, bundle: &[Value]) -> Result<DispatchOutcome> {
        if suppress::consume() {
            return Ok(DispatchOutcome::FallThrough);
        }

        let entry_id = bundle
            .first()
            .and_then(|slot| slot.as_i8().ok())
            .and_then(|id| u64::try_from(id).ok())
            .ok_or_else(|| Error::IllegalState("Call bundle carries no entry id".to_string()))?;
        let holder = self.registry.resolve_entry(entry_id).ok_or_else(|| {
            Error::IllegalState(format!("No interception bound to entry {entry_id}"))
        })?;

        let chain = holder.snapshot();
        let Some(backup) = holder.backup() else {
            return Ok(DispatchOutcome::FallThrough);
        };
        if chain.is_empty() {
            return Ok(DispatchOutcome::FallThrough);
        }

        let target = holder.target();
        let expected = 1 + target.identity.signature.arg_count();
        if bundle.len() != expected {
            return Err(Error::IllegalState(format!(
                "Call bundle of {} has {} slots, expected {}",
                target,
                bundle.len(),
                expected
            )));
        }
        let (receiver, args) = if target.is_static() {
            (None, bundle[1..].to_vec())
        } else {
            (Some(bundle[1].clone()), bundle[2..].to_vec())
        };

        let ctx = DispatchContext::new(target.identity.clone(), receiver.clone(), args, chain.len());

        for (index, registration) in chain.iter().enumerate() {
            self.run_phase(&ctx, index, registration, CallbackPhase::Before)?;
        }
        ctx.set_current(None)?;

        if !ctx.skips_original()? {
            let args = ctx.args()?;
            if let Some((index, param)) =
                mismatched_argument(self.bridge.as_ref(), &target.identity, &args)
            {
                ctx.release()?;
                return Err(Error::InvalidCast {
                    expected: param.to_string(),
                    found: format!("{} (argument {})", args[index].type_description(), index),
                });
            }
            match backup.invoke(receiver.as_ref(), &args) {
                Ok(value) => ctx.record_outcome(Ok(value))?,
                Err(Error::TargetInvocation(exception)) => ctx.record_outcome(Err(exception))?,
                Err(error) => {
                    ctx.release()?;
                    return Err(error);
                }
            }
        }

        for (index, registration) in chain.iter().enumerate().rev() {
            self.run_phase(&ctx, index, registration, CallbackPhase::After)?;
        }

        let released = ctx.release()?;
        self.finish(target, released)
    }

    /// Native implementation of the dispatch entry point.
    ///
    /// `args` are the arguments of the managed `Entry(object[])` call. Exceptions to throw,
    /// including the `System.InvalidCastException` raised for a mistyped argument or result,
    /// come back as [`Error::TargetInvocation`].
    ///
    /// # Errors
    /// See [`Dispatcher::dispatch`]; cast failures are converted as described.
    pub fn handle_entry(&self, args: &[Value]) -> Result<Value> {
        let bundle = args
            .first()
            .and_then(Value::as_array)
            .ok_or_else(|| Error::IllegalState("Dispatch entry called without bundle".to_string()))?
            .to_vec();

        match self.dispatch(&bundle) {
            Ok(DispatchOutcome::FallThrough) => Ok(Value::Null),
            Ok(DispatchOutcome::Return(value)) => Ok(Value::Array(ArrayRef::from_values(
                TypeSig::Object,
                vec![value],
            ))),
            Ok(DispatchOutcome::Throw(exception)) => Err(Error::TargetInvocation(exception)),
            Err(error @ Error::InvalidCast { .. }) => {
                Err(Error::TargetInvocation(Value::Object(ObjectRef::exception(
                    TypeName::new("System", "InvalidCastException"),
                    error.to_string(),
                ))))
            }
            Err(error) => Err(error),
        }
    }

    fn run_phase(
        &self,
        ctx: &DispatchContext,
        index: usize,
        registration: &HookRegistrationRc,
        phase: CallbackPhase,
    ) -> Result<()> {
        if !registration.is_active() {
            return Ok(());
        }

        ctx.set_current(Some(index))?;
        let callback = registration.callback();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match phase {
            CallbackPhase::Before => callback.before(ctx),
            CallbackPhase::After => callback.after(ctx),
        }));

        let message = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(error)) => error.to_string(),
            Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        };

        let failure = CallbackFailure {
            hook_id: registration.id(),
            target: registration.target().clone(),
            phase,
            message,
        };
        log::warn!("{failure}");
        if let Some(observer) = &self.observer {
            observer(&failure);
        }
        Ok(())
    }

    fn finish(&self, target: &MethodDef, released: Released) -> Result<DispatchOutcome> {
        if let Some(exception) = released.throwable {
            return Ok(DispatchOutcome::Throw(exception));
        }

        let ret = &target.identity.signature.ret;
        if target.is_constructor() || ret.is_void() {
            return Ok(DispatchOutcome::Return(Value::Null));
        }
        if !self.bridge.is_instance(&released.result, ret) {
            return Err(Error::InvalidCast {
                expected: ret.to_string(),
                found: released.result.type_description(),
            });
        }
        Ok(DispatchOutcome::Return(released.result))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
