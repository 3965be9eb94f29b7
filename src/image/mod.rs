//! Type images: the compiled representation of one type.
//!
//! A [`TypeImage`] carries the type header, its fields, its methods with their encoded
//! method bodies, and the token tables the bodies refer to. Images encode to bytes
//! deterministically, so "the bytes are back to pristine" is a meaningful check after the
//! last interception on a type was removed.
//!
//! # Layout
//!
//! ```text
//! "CPIM" u16:version
//! TypeName u8:kind u32:flags u8:has_base [TypeName] cu:n TypeName*n
//! cu:fields   { str:name u8:is_static TypeSig }
//! cu:methods  { str:name u16:flags u16:impl_flags MethodSig u8:has_body [cu:len bytes] }
//! cu:typerefs { TypeSig }
//! cu:members  { u8:kind TypeName str:name (MethodSig | TypeSig u8:is_static) }
//! cu:locals   { cu:n TypeSig*n }
//! cu:strings  { str }
//! ```
//!
//! `cu` is an ECMA-335 compressed unsigned integer and `str` a compressed-length UTF-8
//! string.

mod verify;

use std::fmt;

pub use verify::verify_image;

use crate::{
    file::{
        io::{write_compressed_len, write_compressed_string, write_le},
        parser::Parser,
    },
    metadata::{
        method::{FunctionIdentity, MethodAttributes, MethodBody, MethodDef, MethodImplAttributes},
        signatures::{MethodSig, TypeName, TypeSig},
        token::Token,
        typesystem::{FieldDef, TypeAttributes, TypeDef, TypeKind},
    },
    Result,
};

/// Magic bytes at the start of every encoded image.
pub const IMAGE_MAGIC: &[u8; 4] = b"CPIM";
/// Current image format version.
pub const IMAGE_VERSION: u16 = 1;

/// A method of an image together with its encoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodImage {
    /// The method definition
    pub def: MethodDef,
    /// Encoded method body (header, code, data sections), `None` for abstract and native
    /// methods
    pub body: Option<Vec<u8>>,
}

impl MethodImage {
    /// Parses the method body.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body is damaged.
    pub fn parsed_body(&self) -> Result<Option<MethodBody>> {
        self.body.as_deref().map(MethodBody::parse).transpose()
    }
}

/// A field referenced by token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    /// Declaring type
    pub declaring: TypeName,
    /// Field name
    pub name: String,
    /// Field type
    pub sig: TypeSig,
    /// True for static fields
    pub is_static: bool,
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}::{}", self.sig, self.declaring, self.name)
    }
}

/// An entry of the member reference table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemberRef {
    /// A method of any type
    Method(FunctionIdentity),
    /// A field of any type
    Field(FieldRef),
}

/// The compiled representation of one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeImage {
    /// Full name
    pub name: TypeName,
    /// Category
    pub kind: TypeKind,
    /// Attributes
    pub flags: TypeAttributes,
    /// Base type
    pub base: Option<TypeName>,
    /// Implemented interfaces
    pub interfaces: Vec<TypeName>,
    /// Declared fields, the `0x04` table
    pub fields: Vec<FieldDef>,
    /// Declared methods, the `0x06` table
    pub methods: Vec<MethodImage>,
    /// Type references, the `0x01` table
    pub type_refs: Vec<TypeSig>,
    /// Member references, the `0x0A` table
    pub member_refs: Vec<MemberRef>,
    /// Local variable signatures, the `0x11` table
    pub local_sigs: Vec<Vec<TypeSig>>,
    /// User strings, the `0x70` table
    pub strings: Vec<String>,
}

impl TypeImage {
    /// Creates an empty image.
    #[must_use]
    pub fn new(name: TypeName, kind: TypeKind, flags: TypeAttributes, base: Option<TypeName>) -> Self {
        TypeImage {
            name,
            kind,
            flags,
            base,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            type_refs: Vec::new(),
            member_refs: Vec::new(),
            local_sigs: Vec::new(),
            strings: Vec::new(),
        }
    }

    /// The type definition described by this image.
    #[must_use]
    pub fn type_def(&self) -> TypeDef {
        TypeDef {
            name: self.name.clone(),
            kind: self.kind,
            flags: self.flags,
            base: self.base.clone(),
            interfaces: self.interfaces.clone(),
            fields: self.fields.clone(),
            methods: self.methods.iter().map(|m| m.def.clone()).collect(),
        }
    }

    /// Index of the method with the given identity.
    #[must_use]
    pub fn method_index(&self, identity: &FunctionIdentity) -> Option<usize> {
        self.methods.iter().position(|m| &m.def.identity == identity)
    }

    /// Returns the `0x01` token for `sig`, adding it if not present.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the table overflows.
    pub fn intern_type_ref(&mut self, sig: &TypeSig) -> Result<Token> {
        intern(&mut self.type_refs, sig, Token::TYPE_REF)
    }

    /// Returns the `0x0A` token for `member`, adding it if not present.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the table overflows.
    pub fn intern_member_ref(&mut self, member: &MemberRef) -> Result<Token> {
        intern(&mut self.member_refs, member, Token::MEMBER_REF)
    }

    /// Returns the `0x70` token for `value`, adding it if not present.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the table overflows.
    pub fn intern_string(&mut self, value: &str) -> Result<Token> {
        match self.strings.iter().position(|s| s == value) {
            Some(index) => Token::for_index(Token::STRING, index),
            None => {
                self.strings.push(value.to_string());
                Token::for_index(Token::STRING, self.strings.len() - 1)
            }
        }
    }

    /// Returns the `0x11` token for a local signature, adding it if not present.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the table overflows.
    pub fn intern_local_sig(&mut self, locals: &[TypeSig]) -> Result<Token> {
        match self.local_sigs.iter().position(|sig| sig == locals) {
            Some(index) => Token::for_index(Token::LOCAL_SIG, index),
            None => {
                self.local_sigs.push(locals.to_vec());
                Token::for_index(Token::LOCAL_SIG, self.local_sigs.len() - 1)
            }
        }
    }

    /// Token of the method at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the index does not fit a token.
    pub fn method_token(&self, index: usize) -> Result<Token> {
        Token::for_index(Token::METHOD_DEF, index)
    }

    /// Token of the field named `name`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if there is no such field.
    pub fn field_token(&self, name: &str) -> Result<Token> {
        let index = self
            .fields
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| malformed_error!("No field {} on {}", name, self.name))?;
        Token::for_index(Token::FIELD, index)
    }

    /// Resolves a `0x01` token.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for tokens of other tables or out-of-range rows.
    pub fn resolve_type_ref(&self, token: Token) -> Result<&TypeSig> {
        row(&self.type_refs, token, Token::TYPE_REF)
    }

    /// Resolves a method token of the `0x06` or `0x0A` table.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the token does not denote a method.
    pub fn resolve_method(&self, token: Token) -> Result<FunctionIdentity> {
        match token.table() {
            Token::METHOD_DEF => row(&self.methods, token, Token::METHOD_DEF)
                .map(|method| method.def.identity.clone()),
            Token::MEMBER_REF => match row(&self.member_refs, token, Token::MEMBER_REF)? {
                MemberRef::Method(identity) => Ok(identity.clone()),
                MemberRef::Field(_) => Err(malformed_error!("Token {} is a field", token)),
            },
            _ => Err(malformed_error!("Token {} is not a method", token)),
        }
    }

    /// Resolves a field token of the `0x04` or `0x0A` table.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the token does not denote a field.
    pub fn resolve_field(&self, token: Token) -> Result<FieldRef> {
        match token.table() {
            Token::FIELD => row(&self.fields, token, Token::FIELD).map(|field| FieldRef {
                declaring: self.name.clone(),
                name: field.name.clone(),
                sig: field.sig.clone(),
                is_static: field.is_static,
            }),
            Token::MEMBER_REF => match row(&self.member_refs, token, Token::MEMBER_REF)? {
                MemberRef::Field(field) => Ok(field.clone()),
                MemberRef::Method(_) => Err(malformed_error!("Token {} is a method", token)),
            },
            _ => Err(malformed_error!("Token {} is not a field", token)),
        }
    }

    /// Resolves a `0x70` token.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for invalid tokens.
    pub fn resolve_string(&self, token: Token) -> Result<&str> {
        row(&self.strings, token, Token::STRING).map(String::as_str)
    }

    /// Resolves a `0x11` token.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for invalid tokens.
    pub fn resolve_local_sig(&self, token: Token) -> Result<&[TypeSig]> {
        row(&self.local_sigs, token, Token::LOCAL_SIG).map(Vec::as_slice)
    }

    /// Encodes the image.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a table or string is too large to encode.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(IMAGE_MAGIC);
        write_le(&mut out, IMAGE_VERSION);

        self.name.encode(&mut out)?;
        out.push(self.kind.code());
        write_le(&mut out, self.flags.bits());
        match &self.base {
            Some(base) => {
                out.push(1);
                base.encode(&mut out)?;
            }
            None => out.push(0),
        }
        write_compressed_len(&mut out, self.interfaces.len())?;
        for interface in &self.interfaces {
            interface.encode(&mut out)?;
        }

        write_compressed_len(&mut out, self.fields.len())?;
        for field in &self.fields {
            write_compressed_string(&mut out, &field.name)?;
            out.push(u8::from(field.is_static));
            field.sig.encode(&mut out)?;
        }

        write_compressed_len(&mut out, self.methods.len())?;
        for method in &self.methods {
            if method.def.identity.declaring != self.name {
                return Err(malformed_error!(
                    "Method {} does not belong to {}",
                    method.def.identity,
                    self.name
                ));
            }
            write_compressed_string(&mut out, &method.def.identity.name)?;
            write_le(&mut out, method.def.flags.bits());
            write_le(&mut out, method.def.impl_flags.bits());
            method.def.identity.signature.encode(&mut out)?;
            match &method.body {
                Some(body) => {
                    out.push(1);
                    write_compressed_len(&mut out, body.len())?;
                    out.extend_from_slice(body);
                }
                None => out.push(0),
            }
        }

        write_compressed_len(&mut out, self.type_refs.len())?;
        for sig in &self.type_refs {
            sig.encode(&mut out)?;
        }

        write_compressed_len(&mut out, self.member_refs.len())?;
        for member in &self.member_refs {
            match member {
                MemberRef::Method(identity) => {
                    out.push(0);
                    identity.declaring.encode(&mut out)?;
                    write_compressed_string(&mut out, &identity.name)?;
                    identity.signature.encode(&mut out)?;
                }
                MemberRef::Field(field) => {
                    out.push(1);
                    field.declaring.encode(&mut out)?;
                    write_compressed_string(&mut out, &field.name)?;
                    field.sig.encode(&mut out)?;
                    out.push(u8::from(field.is_static));
                }
            }
        }

        write_compressed_len(&mut out, self.local_sigs.len())?;
        for locals in &self.local_sigs {
            write_compressed_len(&mut out, locals.len())?;
            for local in locals {
                local.encode(&mut out)?;
            }
        }

        write_compressed_len(&mut out, self.strings.len())?;
        for string in &self.strings {
            write_compressed_string(&mut out, string)?;
        }

        Ok(out)
    }

    /// Decodes an image.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a bad magic, version or table entry and
    /// [`crate::Error::OutOfBounds`] for truncated input.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut parser = Parser::new(data);
        if parser.read_bytes(IMAGE_MAGIC.len())? != IMAGE_MAGIC {
            return Err(malformed_error!("Not a type image"));
        }
        let version = parser.read_le::<u16>()?;
        if version != IMAGE_VERSION {
            return Err(malformed_error!("Unsupported image version - {}", version));
        }

        let name = TypeName::decode(&mut parser)?;
        let kind_code = parser.read_le::<u8>()?;
        let kind = TypeKind::from_code(kind_code)
            .ok_or_else(|| malformed_error!("Invalid type kind - {}", kind_code))?;
        let flags = TypeAttributes::from_bits_retain(parser.read_le::<u32>()?);
        let base = match parser.read_le::<u8>()? {
            0 => None,
            _ => Some(TypeName::decode(&mut parser)?),
        };

        let mut image = TypeImage::new(name, kind, flags, base);
        for _ in 0..bounded_count(&mut parser)? {
            image.interfaces.push(TypeName::decode(&mut parser)?);
        }

        for _ in 0..bounded_count(&mut parser)? {
            let name = parser.read_compressed_string_utf8()?;
            let is_static = parser.read_le::<u8>()? != 0;
            let sig = TypeSig::decode(&mut parser)?;
            image.fields.push(FieldDef {
                name,
                sig,
                is_static,
            });
        }

        for _ in 0..bounded_count(&mut parser)? {
            let method_name = parser.read_compressed_string_utf8()?;
            let flags = MethodAttributes::from_bits_retain(parser.read_le::<u16>()?);
            let impl_flags = MethodImplAttributes::from_bits_retain(parser.read_le::<u16>()?);
            let signature = MethodSig::decode(&mut parser)?;
            let body = match parser.read_le::<u8>()? {
                0 => None,
                _ => {
                    let len = parser.read_compressed_len()?;
                    Some(parser.read_bytes(len)?.to_vec())
                }
            };
            image.methods.push(MethodImage {
                def: MethodDef {
                    identity: FunctionIdentity::new(image.name.clone(), method_name, signature),
                    flags,
                    impl_flags,
                },
                body,
            });
        }

        for _ in 0..bounded_count(&mut parser)? {
            image.type_refs.push(TypeSig::decode(&mut parser)?);
        }

        for _ in 0..bounded_count(&mut parser)? {
            let member = match parser.read_le::<u8>()? {
                0 => {
                    let declaring = TypeName::decode(&mut parser)?;
                    let name = parser.read_compressed_string_utf8()?;
                    let signature = MethodSig::decode(&mut parser)?;
                    MemberRef::Method(FunctionIdentity::new(declaring, name, signature))
                }
                1 => {
                    let declaring = TypeName::decode(&mut parser)?;
                    let name = parser.read_compressed_string_utf8()?;
                    let sig = TypeSig::decode(&mut parser)?;
                    let is_static = parser.read_le::<u8>()? != 0;
                    MemberRef::Field(FieldRef {
                        declaring,
                        name,
                        sig,
                        is_static,
                    })
                }
                other => return Err(malformed_error!("Invalid member reference kind - {}", other)),
            };
            image.member_refs.push(member);
        }

        for _ in 0..bounded_count(&mut parser)? {
            let count = bounded_count(&mut parser)?;
            let mut locals = Vec::with_capacity(count);
            for _ in 0..count {
                locals.push(TypeSig::decode(&mut parser)?);
            }
            image.local_sigs.push(locals);
        }

        for _ in 0..bounded_count(&mut parser)? {
            image.strings.push(parser.read_compressed_string_utf8()?);
        }

        if parser.has_more_data() {
            return Err(malformed_error!(
                "{} trailing bytes after type image",
                parser.remaining()
            ));
        }

        Ok(image)
    }
}

/// Reads a table count; every entry takes at least one byte.
fn bounded_count(parser: &mut Parser) -> Result<usize> {
    let count = parser.read_compressed_len()?;
    if count > parser.remaining() {
        return Err(malformed_error!(
            "Table count {} exceeds remaining {} bytes",
            count,
            parser.remaining()
        ));
    }
    Ok(count)
}

fn intern<T: Clone + PartialEq>(table: &mut Vec<T>, item: &T, id: u8) -> Result<Token> {
    match table.iter().position(|existing| existing == item) {
        Some(index) => Token::for_index(id, index),
        None => {
            table.push(item.clone());
            Token::for_index(id, table.len() - 1)
        }
    }
}

fn row<T>(table: &[T], token: Token, id: u8) -> Result<&T> {
    if token.table() != id {
        return Err(malformed_error!(
            "Token {} is not of table 0x{:02x}",
            token,
            id
        ));
    }
    token
        .index()
        .and_then(|index| table.get(index))
        .ok_or_else(|| malformed_error!("Token {} is out of range", token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{metadata::signatures::ScalarKind, Error};

    fn sample() -> TypeImage {
        let name = TypeName::parse("Demo.Counter");
        let mut image = TypeImage::new(
            name.clone(),
            TypeKind::Class,
            TypeAttributes::PUBLIC,
            Some(TypeName::parse("System.Object")),
        );
        image.fields.push(FieldDef {
            name: "count".to_string(),
            sig: ScalarKind::I4.into(),
            is_static: false,
        });
        image.methods.push(MethodImage {
            def: MethodDef {
                identity: FunctionIdentity::new(
                    name,
                    "Get",
                    MethodSig::instance(ScalarKind::I4.into(), vec![]),
                ),
                flags: MethodAttributes::PUBLIC,
                impl_flags: MethodImplAttributes::IL,
            },
            body: Some(vec![0x0A, 0x16, 0x2A]),
        });
        image
    }

    #[test]
    fn encode_is_deterministic_and_decodes_back() {
        let mut image = sample();
        image.intern_string("hello").unwrap();
        image
            .intern_member_ref(&MemberRef::Field(FieldRef {
                declaring: TypeName::parse("Demo.Other"),
                name: "shared".to_string(),
                sig: TypeSig::String,
                is_static: true,
            }))
            .unwrap();
        image.intern_local_sig(&[TypeSig::Object]).unwrap();

        let bytes = image.encode().unwrap();
        assert_eq!(&bytes[..4], IMAGE_MAGIC);
        assert_eq!(bytes, image.encode().unwrap());
        assert_eq!(TypeImage::decode(&bytes).unwrap(), image);
    }

    #[test]
    fn interning_reuses_rows() {
        let mut image = sample();
        let first = image.intern_type_ref(&TypeSig::Object).unwrap();
        let again = image.intern_type_ref(&TypeSig::Object).unwrap();
        let other = image.intern_type_ref(&TypeSig::String).unwrap();
        assert_eq!(first, again);
        assert_eq!(first, Token::new(0x0100_0001));
        assert_eq!(other, Token::new(0x0100_0002));
        assert_eq!(image.type_refs.len(), 2);
    }

    #[test]
    fn token_resolution() {
        let mut image = sample();
        let field = image.field_token("count").unwrap();
        assert_eq!(image.resolve_field(field).unwrap().name, "count");

        let method = image.method_token(0).unwrap();
        assert_eq!(image.resolve_method(method).unwrap().name, "Get");
        assert!(image.resolve_field(method).is_err());

        let hello = image.intern_string("hello").unwrap();
        assert_eq!(image.resolve_string(hello).unwrap(), "hello");
        assert!(image.resolve_string(Token::new(0x7000_0002)).is_err());
        assert!(image.resolve_type_ref(Token::new(0)).is_err());
    }

    #[test]
    fn rejects_damaged_images() {
        let bytes = sample().encode().unwrap();

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert!(matches!(
            TypeImage::decode(&bad_magic),
            Err(Error::Malformed { .. })
        ));

        assert!(TypeImage::decode(&bytes[..bytes.len() - 1]).is_err());

        let mut trailing = bytes;
        trailing.push(0);
        assert!(matches!(
            TypeImage::decode(&trailing),
            Err(Error::Malformed { .. })
        ));
    }
}
