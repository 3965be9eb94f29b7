// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # cilplant
//!
//! Runtime method interception for CIL programs. Hook any function with a body, observe and
//! rewrite its arguments, replace its result or exception, and still call the original.
//!
//! ## Features
//!
//! - **Priority ordered hook chains** - any number of callbacks per function, each with a
//!   before and an after phase
//! - **Entry-point rewriting** - intercepted functions get a small prologue that calls one
//!   shared, injected entry point; the untouched body stays in place behind it
//! - **Original invocation** - call the pre-interception behavior of hooked functions,
//!   constructors included
//! - **Lock-free dispatch** - the chain of a function is an atomically swapped snapshot
//! - **Reference runtime** - a bundled CIL interpreter to run it all in-process
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cilplant::prelude::*;
//!
//! # fn main() -> cilplant::Result<()> {
//! let i4 = TypeSig::Scalar(ScalarKind::I4);
//! let sig = MethodSig::static_method(i4.clone(), vec![i4.clone(), i4]);
//!
//! let runtime = Arc::new(EmulatedRuntime::new()?);
//! runtime.load(
//!     TypeBuilder::new("Demo.Calculator")
//!         .method(MethodBuilder::new("Add", sig.clone()).body(|asm, _| {
//!             asm.ldarg(0)?.ldarg(1)?.add()?.ret()?;
//!             Ok(())
//!         }))
//!         .build()?,
//! )?;
//!
//! let engine = Engine::initialize(runtime.clone(), EngineConfig::default())?;
//! let add = FunctionIdentity::new(TypeName::parse("Demo.Calculator"), "Add", sig);
//! let handle = engine.hook_before(&add, HookPriority::NORMAL, |ctx| {
//!     let sum = ctx.arg(0)?.as_i4()? + ctx.arg(1)?.as_i4()?;
//!     ctx.set_result(Value::I4(-sum))
//! })?;
//!
//! assert_eq!(runtime.invoke(&add, None, &[Value::I4(1), Value::I4(2)])?, Value::I4(-3));
//! assert_eq!(engine.invoke_original(&add, None, &[Value::I4(1), Value::I4(2)])?, Value::I4(3));
//!
//! handle.unhook()?;
//! engine.shutdown()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`engine`] - the facade: initialization, hooking, original invocation, shutdown
//! - [`hook`] - registry, callback chains, the dispatcher and the original invoker
//! - [`rewriter`] - entry point injection and prologue rewriting of type images
//! - [`runtime`] - the [`runtime::RuntimeBridge`] primitives the engine needs from a host
//! - [`emulation`] - the bundled reference runtime
//! - [`image`], [`assembly`], [`metadata`] - the compiled type representation, CIL
//!   assembly and decoding, and the type system
//!
//! ## Logging
//!
//! The crate logs through the [`log`] facade: installation and removal of interception at
//! `debug`, engine lifecycle at `info`, callback failures at `warn`.

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

/// Shared functionality which is used in unit-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
pub mod prelude;

/// CIL instruction encoding, decoding and assembly.
pub mod assembly;

/// Engine configuration.
pub mod config;

/// The bundled reference runtime.
pub mod emulation;

pub mod engine;

/// Hook chains and dispatch.
pub mod hook;

/// The compiled representation of a type.
pub mod image;

/// Type names, signatures, method definitions and bodies.
pub mod metadata;

/// Entry point injection and prologue rewriting.
pub mod rewriter;

pub mod runtime;

/// Managed values.
pub mod value;

/// `cilplant` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `cilplant` Error type
///
/// The error type of every operation in this crate. Exceptions raised by managed code are
/// carried as [`Error::TargetInvocation`].
///
/// # Examples
///
/// ```rust,no_run
/// use cilplant::{Error, Value};
///
/// fn describe(result: cilplant::Result<Value>) -> String {
///     match result {
///         Ok(value) => format!("returned {}", value),
///         Err(Error::TargetInvocation(exception)) => format!("threw {}", exception),
///         Err(Error::InvalidTarget(reason)) => format!("cannot hook: {}", reason),
///         Err(e) => format!("failed: {}", e),
///     }
/// }
/// ```
pub use error::Error;

/// The interception engine.
pub use engine::{Engine, UnhookHandle};

/// Low-level byte parsing used by the image and body decoders.
pub use file::parser::Parser;

/// A managed value.
pub use value::Value;
