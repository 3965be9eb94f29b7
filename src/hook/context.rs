//! Per-invocation state shared by the callbacks of one dispatch.

use std::sync::{Arc, Mutex};

use crate::{metadata::method::FunctionIdentity, value::Value, Error, Result};

struct Frame {
    target: FunctionIdentity,
    receiver: Option<Value>,
    args: Vec<Value>,
    result: Value,
    throwable: Option<Value>,
    extras: Vec<Value>,
    current: Option<usize>,
    skip_origin: bool,
}

/// The state of one intercepted invocation.
///
/// Handed to every callback of the chain. The context lives only for the duration of the
/// invocation: once the dispatcher released it, every accessor fails with
/// [`Error::UseAfterRelease`], also on clones a callback kept around.
///
/// `set_result` and `set_throwable` override the outcome of the call. Whichever is called
/// last wins; in the before phase either one also skips the original function.
#[derive(Clone)]
pub struct DispatchContext(Arc<Mutex<Option<Frame>>>);

/// Final outcome extracted when a context is released.
pub(crate) struct Released {
    pub result: Value,
    pub throwable: Option<Value>,
}

impl DispatchContext {
    pub(crate) fn new(
        target: FunctionIdentity,
        receiver: Option<Value>,
        args: Vec<Value>,
        callback_count: usize,
    ) -> Self {
        DispatchContext(Arc::new(Mutex::new(Some(Frame {
            target,
            receiver,
            args,
            result: Value::Null,
            throwable: None,
            extras: vec![Value::Null; callback_count],
            current: None,
            skip_origin: false,
        }))))
    }

    fn with<R>(&self, f: impl FnOnce(&mut Frame) -> Result<R>) -> Result<R> {
        let mut guard = lock!(self.0);
        match guard.as_mut() {
            Some(frame) => f(frame),
            None => Err(Error::UseAfterRelease),
        }
    }

    /// The intercepted function.
    ///
    /// # Errors
    /// Returns [`Error::UseAfterRelease`] after the invocation completed.
    pub fn target(&self) -> Result<FunctionIdentity> {
        self.with(|frame| Ok(frame.target.clone()))
    }

    /// The receiver, `None` for static functions.
    ///
    /// # Errors
    /// Returns [`Error::UseAfterRelease`] after the invocation completed.
    pub fn receiver(&self) -> Result<Option<Value>> {
        self.with(|frame| Ok(frame.receiver.clone()))
    }

    /// A copy of the current arguments, excluding the receiver.
    ///
    /// # Errors
    /// Returns [`Error::UseAfterRelease`] after the invocation completed.
    pub fn args(&self) -> Result<Vec<Value>> {
        self.with(|frame| Ok(frame.args.clone()))
    }

    /// Argument `index`.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] for an invalid index and [`Error::UseAfterRelease`]
    /// after the invocation completed.
    pub fn arg(&self, index: usize) -> Result<Value> {
        self.with(|frame| frame.args.get(index).cloned().ok_or(Error::OutOfBounds))
    }

    /// Replaces argument `index`. The original function and later callbacks see the new
    /// value.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] for an invalid index and [`Error::UseAfterRelease`]
    /// after the invocation completed.
    pub fn set_arg(&self, index: usize, value: Value) -> Result<()> {
        self.with(|frame| {
            let slot = frame.args.get_mut(index).ok_or(Error::OutOfBounds)?;
            *slot = value;
            Ok(())
        })
    }

    /// Runs `f` on the argument list in place.
    ///
    /// # Errors
    /// Returns [`Error::UseAfterRelease`] after the invocation completed.
    pub fn args_mut<R>(&self, f: impl FnOnce(&mut [Value]) -> R) -> Result<R> {
        self.with(|frame| Ok(f(&mut frame.args)))
    }

    /// The current result, `Null` until the original function returned or a callback set
    /// one.
    ///
    /// # Errors
    /// Returns [`Error::UseAfterRelease`] after the invocation completed.
    pub fn result(&self) -> Result<Value> {
        self.with(|frame| Ok(frame.result.clone()))
    }

    /// Overrides the result and clears any recorded exception.
    ///
    /// # Errors
    /// Returns [`Error::UseAfterRelease`] after the invocation completed.
    pub fn set_result(&self, value: Value) -> Result<()> {
        self.with(|frame| {
            frame.result = value;
            frame.throwable = None;
            frame.skip_origin = true;
            Ok(())
        })
    }

    /// The exception the call will throw, if any.
    ///
    /// # Errors
    /// Returns [`Error::UseAfterRelease`] after the invocation completed.
    pub fn throwable(&self) -> Result<Option<Value>> {
        self.with(|frame| Ok(frame.throwable.clone()))
    }

    /// Makes the call throw `exception` and clears the result.
    ///
    /// # Errors
    /// Returns [`Error::InvalidCast`] if `exception` is not an object and
    /// [`Error::UseAfterRelease`] after the invocation completed.
    pub fn set_throwable(&self, exception: Value) -> Result<()> {
        if exception.as_object().is_none() {
            return Err(Error::InvalidCast {
                expected: "exception object".to_string(),
                found: exception.type_description(),
            });
        }
        self.with(|frame| {
            frame.throwable = Some(exception);
            frame.result = Value::Null;
            frame.skip_origin = true;
            Ok(())
        })
    }

    /// The scratch value of the running callback, kept from its before to its after phase.
    ///
    /// # Errors
    /// Returns [`Error::IllegalState`] outside of a callback and [`Error::UseAfterRelease`]
    /// after the invocation completed.
    pub fn extra(&self) -> Result<Value> {
        self.with(|frame| {
            let index = frame.current.ok_or_else(no_callback)?;
            Ok(frame.extras.get(index).cloned().unwrap_or_default())
        })
    }

    /// Sets the scratch value of the running callback.
    ///
    /// # Errors
    /// Returns [`Error::IllegalState`] outside of a callback and [`Error::UseAfterRelease`]
    /// after the invocation completed.
    pub fn set_extra(&self, value: Value) -> Result<()> {
        self.with(|frame| {
            let index = frame.current.ok_or_else(no_callback)?;
            let slot = frame.extras.get_mut(index).ok_or_else(no_callback)?;
            *slot = value;
            Ok(())
        })
    }

    /// True once the original function will be, or was, skipped.
    ///
    /// # Errors
    /// Returns [`Error::UseAfterRelease`] after the invocation completed.
    pub fn skips_original(&self) -> Result<bool> {
        self.with(|frame| Ok(frame.skip_origin))
    }

    pub(crate) fn set_current(&self, index: Option<usize>) -> Result<()> {
        self.with(|frame| {
            frame.current = index;
            Ok(())
        })
    }

    /// Records what the original function did, without touching skip-origin.
    pub(crate) fn record_outcome(&self, outcome: std::result::Result<Value, Value>) -> Result<()> {
        self.with(|frame| {
            match outcome {
                Ok(value) => {
                    frame.result = value;
                    frame.throwable = None;
                }
                Err(exception) => {
                    frame.result = Value::Null;
                    frame.throwable = Some(exception);
                }
            }
            Ok(())
        })
    }

    /// Ends the invocation. Later accessor calls fail.
    pub(crate) fn release(&self) -> Result<Released> {
        lock!(self.0)
            .take()
            .map(|frame| Released {
                result: frame.result,
                throwable: frame.throwable,
            })
            .ok_or(Error::UseAfterRelease)
    }
}

fn no_callback() -> Error {
    Error::IllegalState("no callback is running".to_string())
}
