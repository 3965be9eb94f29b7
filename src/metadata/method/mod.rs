//! Method identities, definitions and bodies.
//!
//! # Key Types
//! - [`FunctionIdentity`] - Value-based identity of a function: declaring type, name and
//!   signature. Used as the hook registry key.
//! - [`MethodDef`] - A function identity plus its attribute flags
//! - [`MethodBody`] - Tiny / fat method body codec
//! - [`ExceptionClause`] - Exception handling table entries

mod body;
mod exceptions;
mod types;

use std::fmt;

pub use body::MethodBody;
pub use exceptions::{ExceptionClause, ExceptionClauseFlags};
pub use types::*;

use crate::metadata::signatures::{MethodSig, TypeName};

/// Name of instance constructors.
pub const CONSTRUCTOR_NAME: &str = ".ctor";
/// Name of static initializers.
pub const STATIC_INITIALIZER_NAME: &str = ".cctor";

/// The identity of a function: declaring type, name and signature.
///
/// Identities are compared by value, so an identity built by a hook client equals the one
/// stored in the runtime's type image, and stays equal after interception replaced the
/// function's compiled representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionIdentity {
    /// The type declaring the function
    pub declaring: TypeName,
    /// Simple name, `.ctor` for constructors
    pub name: String,
    /// Parameter and return types plus the instance flag
    pub signature: MethodSig,
}

impl FunctionIdentity {
    /// Creates a function identity.
    pub fn new(declaring: TypeName, name: impl Into<String>, signature: MethodSig) -> Self {
        FunctionIdentity {
            declaring,
            name: name.into(),
            signature,
        }
    }

    /// True for instance constructors.
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR_NAME
    }

    /// True for static initializers.
    #[must_use]
    pub fn is_static_initializer(&self) -> bool {
        self.name == STATIC_INITIALIZER_NAME
    }

    /// True for functions without a receiver.
    #[must_use]
    pub fn is_static(&self) -> bool {
        !self.signature.has_this
    }
}

impl fmt::Display for FunctionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.signature.has_this {
            f.write_str("instance ")?;
        }
        write!(f, "{} {}::{}(", self.signature.ret, self.declaring, self.name)?;
        for (index, param) in self.signature.params.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str(")")
    }
}

/// A method definition: identity plus attribute flags.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDef {
    /// The function identity
    pub identity: FunctionIdentity,
    /// Definition attributes
    pub flags: MethodAttributes,
    /// Implementation attributes
    pub impl_flags: MethodImplAttributes,
}

impl MethodDef {
    /// True if the method has no body.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.flags.contains(MethodAttributes::ABSTRACT)
    }

    /// True if the implementation is not CIL.
    #[must_use]
    pub fn is_native(&self) -> bool {
        self.flags.contains(MethodAttributes::PINVOKE_IMPL) || self.impl_flags.is_native()
    }

    /// True if the method takes part in virtual dispatch.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.flags.contains(MethodAttributes::VIRTUAL)
    }

    /// True for private methods.
    #[must_use]
    pub fn is_private(&self) -> bool {
        self.flags.is_private()
    }

    /// True for static methods.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.identity.is_static()
    }

    /// True if the method is a CIL body the engine can rewrite.
    #[must_use]
    pub fn has_body(&self) -> bool {
        !self.is_abstract() && !self.is_native()
    }

    /// True for instance constructors.
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.identity.is_constructor()
    }
}

impl fmt::Display for MethodDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.identity.fmt(f)
    }
}
