//! Type definitions and type resolution.
//!
//! [`TypeDef`] is the header of a type (kind, base type, interfaces, fields and method
//! definitions). [`TypeResolver`] is the seam through which the engine asks the runtime
//! about types; its provided methods implement subtype checks, instance checks and the
//! upward walk used for virtual method resolution.

use std::sync::Arc;

use bitflags::bitflags;

use crate::{
    metadata::{
        method::MethodDef,
        signatures::{TypeName, TypeSig},
    },
    value::Value,
};

/// Upper bound on base type chain length, guards against cyclic hierarchies.
const MAX_HIERARCHY_DEPTH: usize = 256;

bitflags! {
    /// Type definition attributes, ECMA-335 II.23.1.15 subset.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TypeAttributes: u32 {
        /// Visible outside the assembly
        const PUBLIC = 0x0000_0001;
        /// The type is an interface
        const INTERFACE = 0x0000_0020;
        /// The type cannot be instantiated
        const ABSTRACT = 0x0000_0080;
        /// The type cannot be derived from
        const SEALED = 0x0000_0100;
        /// The name has special meaning to the runtime
        const SPECIAL_NAME = 0x0000_0400;
        /// Static initializer may run lazily at first static field access
        const BEFORE_FIELD_INIT = 0x0010_0000;
    }
}

/// The category of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// A reference type
    Class,
    /// An interface
    Interface,
    /// A boxed primitive wrapper such as `System.Int32`
    Primitive,
    /// A single-dimension array type
    Array,
}

impl TypeKind {
    /// Stable byte used in type images.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            TypeKind::Class => 0,
            TypeKind::Interface => 1,
            TypeKind::Primitive => 2,
            TypeKind::Array => 3,
        }
    }

    /// Inverse of [`TypeKind::code`].
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(TypeKind::Class),
            1 => Some(TypeKind::Interface),
            2 => Some(TypeKind::Primitive),
            3 => Some(TypeKind::Array),
            _ => None,
        }
    }
}

/// A field declared by a type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Field type
    pub sig: TypeSig,
    /// True for static fields
    pub is_static: bool,
}

/// The definition of a type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDef {
    /// Full name
    pub name: TypeName,
    /// Category
    pub kind: TypeKind,
    /// Attributes
    pub flags: TypeAttributes,
    /// Base type, `None` only for `System.Object` and interfaces
    pub base: Option<TypeName>,
    /// Implemented interfaces
    pub interfaces: Vec<TypeName>,
    /// Declared fields
    pub fields: Vec<FieldDef>,
    /// Declared methods
    pub methods: Vec<MethodDef>,
}

impl TypeDef {
    /// The synthesized definition of the array type with the given name.
    #[must_use]
    pub fn array(name: TypeName) -> Self {
        TypeDef {
            name,
            kind: TypeKind::Array,
            flags: TypeAttributes::PUBLIC | TypeAttributes::SEALED,
            base: Some(TypeName::new("System", "Array")),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// True for array types.
    #[must_use]
    pub fn is_array(&self) -> bool {
        self.kind == TypeKind::Array
    }

    /// True for primitive wrapper types.
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        self.kind == TypeKind::Primitive
    }

    /// True for interfaces.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.kind == TypeKind::Interface || self.flags.contains(TypeAttributes::INTERFACE)
    }

    /// True for abstract types.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.flags.contains(TypeAttributes::ABSTRACT)
    }

    /// Looks up a declared method by exact identity (name and signature).
    #[must_use]
    pub fn find_method(&self, name: &str, sig: &crate::metadata::signatures::MethodSig) -> Option<&MethodDef> {
        self.methods
            .iter()
            .find(|method| method.identity.name == name && &method.identity.signature == sig)
    }

    /// Looks up a declared field by name.
    #[must_use]
    pub fn find_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }
}

/// Shared handle to a type definition.
pub type TypeDefRc = Arc<TypeDef>;

/// Resolves type names to their definitions.
///
/// Implementors only provide [`TypeResolver::resolve_type`]; the type relationships the
/// engine needs are derived from it.
pub trait TypeResolver {
    /// Returns the definition of `name`, or `None` if the type is unknown.
    fn resolve_type(&self, name: &TypeName) -> Option<TypeDefRc>;

    /// True if `sub` is `sup`, derives from it, or implements it.
    fn is_subtype(&self, sub: &TypeName, sup: &TypeName) -> bool {
        if sub == sup || (sup.namespace() == "System" && sup.name() == "Object") {
            return true;
        }

        let mut current = Some(sub.clone());
        for _ in 0..MAX_HIERARCHY_DEPTH {
            let Some(name) = current else {
                return false;
            };
            if &name == sup {
                return true;
            }
            let Some(def) = self.resolve_type(&name) else {
                return false;
            };
            if def
                .interfaces
                .iter()
                .any(|interface| interface == sup || self.is_subtype(interface, sup))
            {
                return true;
            }
            current = def.base.clone();
        }
        false
    }

    /// True if `value` can be stored in a location of type `sig`.
    ///
    /// `null` is an instance of every reference type and of no scalar type. Scalars match
    /// their exact kind or any reference type their wrapper derives from.
    fn is_instance(&self, value: &Value, sig: &TypeSig) -> bool {
        match (value, sig) {
            (_, TypeSig::Void) => false,
            (Value::Null, _) => sig.is_reference(),
            (_, TypeSig::Scalar(kind)) => value.scalar_kind() == Some(*kind),
            (_, TypeSig::Object) => true,
            (Value::Array(array), TypeSig::SzArray(element)) => {
                let actual = array.element_type();
                actual == element.as_ref()
                    || match (actual.type_name(), element.type_name()) {
                        (Some(actual), Some(expected))
                            if array.element_type().is_reference() && element.is_reference() =>
                        {
                            self.is_subtype(&actual, &expected)
                        }
                        _ => false,
                    }
            }
            (_, TypeSig::SzArray(_)) => false,
            (_, TypeSig::String) => matches!(value, Value::Str(_)),
            (_, TypeSig::Class(name)) => value
                .runtime_type_name()
                .is_some_and(|actual| self.is_subtype(&actual, name)),
        }
    }

    /// Finds the override of `method` visible from `runtime_type`.
    ///
    /// Walks from `runtime_type` up the base chain, stopping before the declaring type of
    /// `method`, and returns the first non-abstract virtual method with the same name,
    /// parameter types and return type. Returns `None` if no override exists, in which case
    /// `method` itself is the implementation, and if `runtime_type` does not derive from the
    /// declaring type.
    fn find_override(&self, runtime_type: &TypeName, method: &MethodDef) -> Option<MethodDef> {
        let declaring = &method.identity.declaring;
        if !self.is_subtype(runtime_type, declaring) {
            return None;
        }
        let mut current = Some(runtime_type.clone());
        for _ in 0..MAX_HIERARCHY_DEPTH {
            let name = current?;
            if &name == declaring {
                return None;
            }
            let def = self.resolve_type(&name)?;
            let found = def.methods.iter().find(|candidate| {
                candidate.is_virtual()
                    && !candidate.is_abstract()
                    && !candidate.is_static()
                    && candidate.identity.name == method.identity.name
                    && candidate.identity.signature.same_shape(&method.identity.signature)
            });
            if let Some(found) = found {
                return Some(found.clone());
            }
            current = def.base.clone();
        }
        None
    }
}
