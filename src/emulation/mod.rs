//! Reference runtime.
//!
//! An in-process runtime that loads [`crate::image::TypeImage`]s and interprets their CIL.
//! It implements [`crate::runtime::RuntimeBridge`], so an [`crate::Engine`] can hook the
//! functions it runs without any other host.
//!
//! # Key Components
//!
//! - [`EmulatedRuntime`] - loaded types, static state, native functions and the bridge
//! - [`TypeBuilder`] and [`MethodBuilder`] - fluent construction of type images
//! - [`EmulationConfig`] - call depth limit and verification switch
//! - [`corlib`] - the core types every runtime starts with
//!
//! # Execution model
//!
//! Each call runs on the image current when it starts. Managed exceptions surface to the
//! host as [`crate::Error::TargetInvocation`] carrying the exception object; typed catch
//! clauses are honored, finally and fault clauses are not run. Static initializers run
//! lazily on first static access, construction or static call.
//!
//! # Example
//!
//! ```rust,no_run
//! use cilplant::{
//!     emulation::{EmulatedRuntime, MethodBuilder, TypeBuilder},
//!     metadata::{
//!         method::FunctionIdentity,
//!         signatures::{MethodSig, ScalarKind, TypeName, TypeSig},
//!     },
//!     Value,
//! };
//!
//! # fn main() -> cilplant::Result<()> {
//! let i4 = TypeSig::Scalar(ScalarKind::I4);
//! let sig = MethodSig::static_method(i4.clone(), vec![i4.clone(), i4]);
//! let runtime = EmulatedRuntime::new()?;
//! runtime.load(
//!     TypeBuilder::new("Demo.Calculator")
//!         .method(MethodBuilder::new("Add", sig.clone()).body(|asm, _| {
//!             asm.ldarg(0)?.ldarg(1)?.add()?.ret()?;
//!             Ok(())
//!         }))
//!         .build()?,
//! )?;
//!
//! let add = FunctionIdentity::new(TypeName::parse("Demo.Calculator"), "Add", sig);
//! assert_eq!(runtime.invoke(&add, None, &[Value::I4(1), Value::I4(2)])?, Value::I4(3));
//! # Ok(())
//! # }
//! ```

mod builder;
mod config;
pub mod corlib;
mod interpreter;
mod runtime;

pub use builder::{BodyFn, BodyRefs, MethodBuilder, TypeBuilder};
pub use config::{EmulationConfig, DEFAULT_MAX_CALL_DEPTH};
pub use runtime::{EmulatedRuntime, NativeFn};
