//! Type names and type / method signatures.
//!
//! Signatures follow the ECMA-335 II.23.2 blob layout with one deviation: class types are
//! encoded by name (`CLASS`, compressed length, UTF-8 full name) instead of a coded
//! `TypeDefOrRef` index, which keeps a [`crate::image::TypeImage`] self-contained.
//!
//! # Key Types
//! - [`TypeName`] - Namespace qualified type name
//! - [`ScalarKind`] - The twelve primitive value kinds
//! - [`TypeSig`] - A parameter, return, field or local type
//! - [`MethodSig`] - Calling convention, return type and parameter types

use std::fmt;

use strum::EnumIter;

use crate::{
    file::{
        io::{write_compressed_len, write_compressed_string},
        parser::Parser,
    },
    Result,
};

/// ECMA-335 II.23.1.16 element type constants used in signature blobs.
pub mod element_type {
    /// `void`
    pub const VOID: u8 = 0x01;
    /// `bool`
    pub const BOOLEAN: u8 = 0x02;
    /// `char`
    pub const CHAR: u8 = 0x03;
    /// `int8`
    pub const I1: u8 = 0x04;
    /// `uint8`
    pub const U1: u8 = 0x05;
    /// `int16`
    pub const I2: u8 = 0x06;
    /// `uint16`
    pub const U2: u8 = 0x07;
    /// `int32`
    pub const I4: u8 = 0x08;
    /// `uint32`
    pub const U4: u8 = 0x09;
    /// `int64`
    pub const I8: u8 = 0x0A;
    /// `uint64`
    pub const U8: u8 = 0x0B;
    /// `float32`
    pub const R4: u8 = 0x0C;
    /// `float64`
    pub const R8: u8 = 0x0D;
    /// `string`
    pub const STRING: u8 = 0x0E;
    /// `class <name>`
    pub const CLASS: u8 = 0x12;
    /// `object`
    pub const OBJECT: u8 = 0x1C;
    /// `<type>[]`
    pub const SZARRAY: u8 = 0x1D;
}

/// Calling convention flag marking an instance method signature.
pub const SIG_HAS_THIS: u8 = 0x20;

/// A namespace-qualified type name such as `System.Int32` or `Demo.Calculator`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeName {
    namespace: String,
    name: String,
}

impl TypeName {
    /// Creates a type name from its namespace and simple name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        TypeName {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Splits a full name at its last `.` outside of an array suffix.
    ///
    /// ```rust,no_run
    /// use cilplant::metadata::signatures::TypeName;
    ///
    /// let name = TypeName::parse("System.Collections.Generic.List`1");
    /// assert_eq!(name.namespace(), "System.Collections.Generic");
    /// assert_eq!(name.name(), "List`1");
    /// ```
    #[must_use]
    pub fn parse(full_name: &str) -> Self {
        match full_name.rsplit_once('.') {
            Some((namespace, name)) => TypeName::new(namespace, name),
            None => TypeName::new("", full_name),
        }
    }

    /// The namespace, empty for the global namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The simple name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `Namespace.Name`, or just `Name` in the global namespace.
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// True for single-dimension array type names (`Int32[]`).
    #[must_use]
    pub fn is_array(&self) -> bool {
        self.name.ends_with("[]")
    }

    /// The name of the array type whose elements are of this type.
    #[must_use]
    pub fn array_of(&self) -> TypeName {
        TypeName::new(self.namespace.clone(), format!("{}[]", self.name))
    }

    /// True when the type lives in `namespace` or one of its children.
    #[must_use]
    pub fn in_namespace(&self, namespace: &str) -> bool {
        self.namespace == namespace
            || self
                .namespace
                .strip_prefix(namespace)
                .is_some_and(|rest| rest.starts_with('.'))
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        write_compressed_string(out, &self.namespace)?;
        write_compressed_string(out, &self.name)
    }

    pub(crate) fn decode(parser: &mut Parser) -> Result<Self> {
        let namespace = parser.read_compressed_string_utf8()?;
        let name = parser.read_compressed_string_utf8()?;
        Ok(TypeName { namespace, name })
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}.{}", self.namespace, self.name)
        }
    }
}

impl fmt::Debug for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeName({self})")
    }
}

/// The primitive value kinds of the runtime.
///
/// Each kind has a boxed wrapper type in the `System` namespace (`System.Int32` for
/// [`ScalarKind::I4`]) and an element type code used in signature blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum ScalarKind {
    /// `bool`
    Bool,
    /// `char`, a UTF-16 code unit
    Char,
    /// `int8`
    I1,
    /// `uint8`
    U1,
    /// `int16`
    I2,
    /// `uint16`
    U2,
    /// `int32`
    I4,
    /// `uint32`
    U4,
    /// `int64`
    I8,
    /// `uint64`
    U8,
    /// `float32`
    R4,
    /// `float64`
    R8,
}

impl ScalarKind {
    /// The signature element type code.
    #[must_use]
    pub const fn element_type(self) -> u8 {
        match self {
            ScalarKind::Bool => element_type::BOOLEAN,
            ScalarKind::Char => element_type::CHAR,
            ScalarKind::I1 => element_type::I1,
            ScalarKind::U1 => element_type::U1,
            ScalarKind::I2 => element_type::I2,
            ScalarKind::U2 => element_type::U2,
            ScalarKind::I4 => element_type::I4,
            ScalarKind::U4 => element_type::U4,
            ScalarKind::I8 => element_type::I8,
            ScalarKind::U8 => element_type::U8,
            ScalarKind::R4 => element_type::R4,
            ScalarKind::R8 => element_type::R8,
        }
    }

    /// Maps a signature element type code back to its kind.
    #[must_use]
    pub const fn from_element_type(code: u8) -> Option<Self> {
        Some(match code {
            element_type::BOOLEAN => ScalarKind::Bool,
            element_type::CHAR => ScalarKind::Char,
            element_type::I1 => ScalarKind::I1,
            element_type::U1 => ScalarKind::U1,
            element_type::I2 => ScalarKind::I2,
            element_type::U2 => ScalarKind::U2,
            element_type::I4 => ScalarKind::I4,
            element_type::U4 => ScalarKind::U4,
            element_type::I8 => ScalarKind::I8,
            element_type::U8 => ScalarKind::U8,
            element_type::R4 => ScalarKind::R4,
            element_type::R8 => ScalarKind::R8,
            _ => return None,
        })
    }

    /// Simple name of the boxed wrapper type in the `System` namespace.
    #[must_use]
    pub const fn wrapper_name(self) -> &'static str {
        match self {
            ScalarKind::Bool => "Boolean",
            ScalarKind::Char => "Char",
            ScalarKind::I1 => "SByte",
            ScalarKind::U1 => "Byte",
            ScalarKind::I2 => "Int16",
            ScalarKind::U2 => "UInt16",
            ScalarKind::I4 => "Int32",
            ScalarKind::U4 => "UInt32",
            ScalarKind::I8 => "Int64",
            ScalarKind::U8 => "UInt64",
            ScalarKind::R4 => "Single",
            ScalarKind::R8 => "Double",
        }
    }

    /// The boxed wrapper type, e.g. `System.Int32`.
    #[must_use]
    pub fn wrapper(self) -> TypeName {
        TypeName::new("System", self.wrapper_name())
    }

    /// Maps a wrapper type name back to its kind.
    #[must_use]
    pub fn from_wrapper(name: &TypeName) -> Option<Self> {
        use strum::IntoEnumIterator;

        if name.namespace() != "System" {
            return None;
        }
        ScalarKind::iter().find(|kind| kind.wrapper_name() == name.name())
    }

    /// The ilasm keyword for this kind.
    #[must_use]
    pub const fn ilasm_name(self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::Char => "char",
            ScalarKind::I1 => "int8",
            ScalarKind::U1 => "uint8",
            ScalarKind::I2 => "int16",
            ScalarKind::U2 => "uint16",
            ScalarKind::I4 => "int32",
            ScalarKind::U4 => "uint32",
            ScalarKind::I8 => "int64",
            ScalarKind::U8 => "uint64",
            ScalarKind::R4 => "float32",
            ScalarKind::R8 => "float64",
        }
    }

    /// True for the floating point kinds.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, ScalarKind::R4 | ScalarKind::R8)
    }

    /// True for kinds that occupy 64 bits on the evaluation stack.
    #[must_use]
    pub const fn is_wide(self) -> bool {
        matches!(self, ScalarKind::I8 | ScalarKind::U8 | ScalarKind::R8)
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ilasm_name())
    }
}

/// A parameter, return, field, local or array element type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeSig {
    /// `void`, valid only as a return type
    Void,
    /// A primitive value type
    Scalar(ScalarKind),
    /// `string`
    String,
    /// `object`
    Object,
    /// A named class, interface or value type
    Class(TypeName),
    /// A single-dimension, zero-based array
    SzArray(Box<TypeSig>),
}

impl TypeSig {
    /// `class <full name>`
    pub fn class(full_name: &str) -> Self {
        TypeSig::Class(TypeName::parse(full_name))
    }

    /// `<element>[]`
    #[must_use]
    pub fn array(element: TypeSig) -> Self {
        TypeSig::SzArray(Box::new(element))
    }

    /// True for `void`.
    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self, TypeSig::Void)
    }

    /// The scalar kind, if this is a primitive value type.
    #[must_use]
    pub fn as_scalar(&self) -> Option<ScalarKind> {
        match self {
            TypeSig::Scalar(kind) => Some(*kind),
            _ => None,
        }
    }

    /// True for reference types, which may hold `null`.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            TypeSig::String | TypeSig::Object | TypeSig::Class(_) | TypeSig::SzArray(_)
        )
    }

    /// The named type this signature denotes, `None` for `void`.
    #[must_use]
    pub fn type_name(&self) -> Option<TypeName> {
        match self {
            TypeSig::Void => None,
            TypeSig::Scalar(kind) => Some(kind.wrapper()),
            TypeSig::String => Some(TypeName::new("System", "String")),
            TypeSig::Object => Some(TypeName::new("System", "Object")),
            TypeSig::Class(name) => Some(name.clone()),
            TypeSig::SzArray(element) => element.type_name().map(|name| name.array_of()),
        }
    }

    /// Appends the signature blob encoding of this type.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a class name is too long to encode.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            TypeSig::Void => out.push(element_type::VOID),
            TypeSig::Scalar(kind) => out.push(kind.element_type()),
            TypeSig::String => out.push(element_type::STRING),
            TypeSig::Object => out.push(element_type::OBJECT),
            TypeSig::Class(name) => {
                out.push(element_type::CLASS);
                write_compressed_string(out, &name.full_name())?;
            }
            TypeSig::SzArray(element) => {
                out.push(element_type::SZARRAY);
                element.encode(out)?;
            }
        }
        Ok(())
    }

    /// Decodes a type from a signature blob.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for unknown element types and
    /// [`crate::Error::OutOfBounds`] for truncated input.
    pub fn decode(parser: &mut Parser) -> Result<Self> {
        let code = parser.read_le::<u8>()?;
        if let Some(kind) = ScalarKind::from_element_type(code) {
            return Ok(TypeSig::Scalar(kind));
        }

        match code {
            element_type::VOID => Ok(TypeSig::Void),
            element_type::STRING => Ok(TypeSig::String),
            element_type::OBJECT => Ok(TypeSig::Object),
            element_type::CLASS => {
                let full_name = parser.read_compressed_string_utf8()?;
                Ok(TypeSig::Class(TypeName::parse(&full_name)))
            }
            element_type::SZARRAY => {
                let element = TypeSig::decode(parser)?;
                if element.is_void() {
                    return Err(malformed_error!("Array of void in signature"));
                }
                Ok(TypeSig::array(element))
            }
            _ => Err(malformed_error!("Unknown element type - 0x{:02x}", code)),
        }
    }
}

impl From<ScalarKind> for TypeSig {
    fn from(kind: ScalarKind) -> Self {
        TypeSig::Scalar(kind)
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSig::Void => f.write_str("void"),
            TypeSig::Scalar(kind) => f.write_str(kind.ilasm_name()),
            TypeSig::String => f.write_str("string"),
            TypeSig::Object => f.write_str("object"),
            TypeSig::Class(name) => write!(f, "class {name}"),
            TypeSig::SzArray(element) => write!(f, "{element}[]"),
        }
    }
}

/// A method signature: instance flag, return type and parameter types.
///
/// The [`fmt::Display`] form (`instance int32(int32,int32)`) is the explicit signature
/// string handed to [`crate::runtime::RuntimeBridge::non_virtual_invoke`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSig {
    /// True for instance methods, which receive `this` as argument 0
    pub has_this: bool,
    /// Parameter types in declaration order, excluding `this`
    pub params: Vec<TypeSig>,
    /// Return type
    pub ret: TypeSig,
}

impl MethodSig {
    /// An instance method signature.
    #[must_use]
    pub fn instance(ret: TypeSig, params: Vec<TypeSig>) -> Self {
        MethodSig {
            has_this: true,
            params,
            ret,
        }
    }

    /// A static method signature.
    #[must_use]
    pub fn static_method(ret: TypeSig, params: Vec<TypeSig>) -> Self {
        MethodSig {
            has_this: false,
            params,
            ret,
        }
    }

    /// Number of arguments including `this` for instance methods.
    #[must_use]
    pub fn arg_count(&self) -> usize {
        self.params.len() + usize::from(self.has_this)
    }

    /// True when both signatures take and return the same types, ignoring `has_this`.
    #[must_use]
    pub fn same_shape(&self, other: &MethodSig) -> bool {
        self.ret == other.ret && self.params == other.params
    }

    /// Appends the method signature blob.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the parameter count cannot be encoded.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        out.push(if self.has_this { SIG_HAS_THIS } else { 0x00 });
        write_compressed_len(out, self.params.len())?;
        self.ret.encode(out)?;
        for param in &self.params {
            param.encode(out)?;
        }
        Ok(())
    }

    /// Decodes a method signature blob.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for invalid blobs or `void` parameters.
    pub fn decode(parser: &mut Parser) -> Result<Self> {
        let convention = parser.read_le::<u8>()?;
        if convention & !SIG_HAS_THIS != 0 {
            return Err(malformed_error!(
                "Unsupported calling convention - 0x{:02x}",
                convention
            ));
        }

        let count = parser.read_compressed_len()?;
        let ret = TypeSig::decode(parser)?;
        let mut params = Vec::with_capacity(count.min(parser.remaining()));
        for _ in 0..count {
            let param = TypeSig::decode(parser)?;
            if param.is_void() {
                return Err(malformed_error!("Parameter of type void"));
            }
            params.push(param);
        }

        Ok(MethodSig {
            has_this: convention & SIG_HAS_THIS != 0,
            params,
            ret,
        })
    }
}

impl fmt::Display for MethodSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_this {
            f.write_str("instance ")?;
        }
        write!(f, "{}(", self.ret)?;
        for (index, param) in self.params.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn type_name_parse() {
        let name = TypeName::parse("Demo.Calculator");
        assert_eq!(name.namespace(), "Demo");
        assert_eq!(name.name(), "Calculator");
        assert_eq!(name.to_string(), "Demo.Calculator");

        let global = TypeName::parse("Program");
        assert_eq!(global.namespace(), "");
        assert_eq!(global.full_name(), "Program");

        let array = TypeName::parse("System.Int32").array_of();
        assert!(array.is_array());
        assert_eq!(array.to_string(), "System.Int32[]");
    }

    #[test]
    fn type_name_namespace_prefix() {
        let name = TypeName::parse("CilPlant.Generated.Inner.Entry");
        assert!(name.in_namespace("CilPlant.Generated"));
        assert!(!TypeName::parse("CilPlant.GeneratedX.Entry").in_namespace("CilPlant.Generated"));
    }

    #[test]
    fn scalar_kinds_map_both_ways() {
        for kind in ScalarKind::iter() {
            assert_eq!(ScalarKind::from_element_type(kind.element_type()), Some(kind));
            assert_eq!(ScalarKind::from_wrapper(&kind.wrapper()), Some(kind));
        }
        assert_eq!(ScalarKind::from_wrapper(&TypeName::parse("System.String")), None);
    }

    #[test]
    fn method_signature_blob() {
        let sig = MethodSig::instance(
            TypeSig::Scalar(ScalarKind::I4),
            vec![
                TypeSig::Scalar(ScalarKind::I4),
                TypeSig::array(TypeSig::class("Demo.Point")),
            ],
        );

        let mut blob = Vec::new();
        sig.encode(&mut blob).unwrap();
        assert_eq!(&blob[..4], &[SIG_HAS_THIS, 0x02, element_type::I4, element_type::I4]);
        assert_eq!(blob[4], element_type::SZARRAY);
        assert_eq!(blob[5], element_type::CLASS);

        let decoded = MethodSig::decode(&mut Parser::new(&blob)).unwrap();
        assert_eq!(decoded, sig);
    }

    #[test]
    fn method_signature_display() {
        let sig = MethodSig::static_method(
            TypeSig::Void,
            vec![TypeSig::String, TypeSig::array(TypeSig::Object)],
        );
        assert_eq!(sig.to_string(), "void(string,object[])");

        let sig = MethodSig::instance(TypeSig::class("Demo.Point"), vec![]);
        assert_eq!(sig.to_string(), "instance class Demo.Point()");
    }

    #[test]
    fn decode_rejects_void_parameter() {
        let blob = [0x00, 0x01, element_type::VOID, element_type::VOID];
        assert!(MethodSig::decode(&mut Parser::new(&blob)).is_err());

        let blob = [0x05, 0x00, element_type::VOID];
        assert!(MethodSig::decode(&mut Parser::new(&blob)).is_err());
    }
}
