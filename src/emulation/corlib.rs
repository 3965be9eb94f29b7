//! The core library every [`crate::emulation::EmulatedRuntime`] starts with.
//!
//! Only what managed code and the engine need: the root of the hierarchy, strings, arrays,
//! the boxed scalar wrappers and the exceptions the interpreter raises itself.

use strum::IntoEnumIterator;

use crate::{
    emulation::builder::{MethodBuilder, TypeBuilder},
    image::TypeImage,
    metadata::{
        method::{FunctionIdentity, CONSTRUCTOR_NAME},
        signatures::{MethodSig, ScalarKind, TypeName, TypeSig},
        typesystem::{TypeAttributes, TypeKind},
    },
    value::EXCEPTION_MESSAGE_FIELD,
    Result,
};

/// `System.Object`
pub const OBJECT: &str = "System.Object";
/// `System.Exception`
pub const EXCEPTION: &str = "System.Exception";
/// `System.SystemException`
pub const SYSTEM_EXCEPTION: &str = "System.SystemException";
/// Raised by failed casts and unboxing.
pub const INVALID_CAST_EXCEPTION: &str = "System.InvalidCastException";
/// Raised when `null` is dereferenced.
pub const NULL_REFERENCE_EXCEPTION: &str = "System.NullReferenceException";
/// Raised by array accesses out of range.
pub const INDEX_OUT_OF_RANGE_EXCEPTION: &str = "System.IndexOutOfRangeException";
/// Base of arithmetic failures.
pub const ARITHMETIC_EXCEPTION: &str = "System.ArithmeticException";
/// Raised by integer division by zero.
pub const DIVIDE_BY_ZERO_EXCEPTION: &str = "System.DivideByZeroException";
/// Raised by negative array sizes.
pub const OVERFLOW_EXCEPTION: &str = "System.OverflowException";

/// `instance void <ty>::.ctor(<params>)`
#[must_use]
pub fn constructor(ty: &str, params: Vec<TypeSig>) -> FunctionIdentity {
    FunctionIdentity::new(
        TypeName::parse(ty),
        CONSTRUCTOR_NAME,
        MethodSig::instance(TypeSig::Void, params),
    )
}

/// Builds the core library.
///
/// # Errors
/// Returns an error only if assembling one of the bodies fails.
pub fn core_types() -> Result<Vec<TypeImage>> {
    let mut types = vec![
        TypeBuilder::new(OBJECT)
            .base(None)
            .method(MethodBuilder::constructor(vec![]).body(|asm, _| {
                asm.ret()?;
                Ok(())
            }))
            .build()?,
        TypeBuilder::new("System.ValueType")
            .flags(TypeAttributes::ABSTRACT)
            .build()?,
        TypeBuilder::new("System.String")
            .flags(TypeAttributes::SEALED)
            .build()?,
        TypeBuilder::new("System.Array")
            .flags(TypeAttributes::ABSTRACT)
            .build()?,
    ];

    for kind in ScalarKind::iter() {
        types.push(
            TypeBuilder::new(&kind.wrapper().full_name())
                .base(Some("System.ValueType"))
                .kind(TypeKind::Primitive)
                .flags(TypeAttributes::SEALED)
                .build()?,
        );
    }

    types.push(exception_root()?);
    for (name, base) in [
        (SYSTEM_EXCEPTION, EXCEPTION),
        (INVALID_CAST_EXCEPTION, SYSTEM_EXCEPTION),
        (NULL_REFERENCE_EXCEPTION, SYSTEM_EXCEPTION),
        (INDEX_OUT_OF_RANGE_EXCEPTION, SYSTEM_EXCEPTION),
        (ARITHMETIC_EXCEPTION, SYSTEM_EXCEPTION),
        (DIVIDE_BY_ZERO_EXCEPTION, ARITHMETIC_EXCEPTION),
        (OVERFLOW_EXCEPTION, ARITHMETIC_EXCEPTION),
    ] {
        types.push(derived_exception(name, base)?);
    }

    Ok(types)
}

fn exception_root() -> Result<TypeImage> {
    TypeBuilder::new(EXCEPTION)
        .field(EXCEPTION_MESSAGE_FIELD, TypeSig::String)
        .method(MethodBuilder::constructor(vec![]).body(|asm, refs| {
            let base = refs.method(&constructor(OBJECT, vec![]))?;
            asm.ldarg(0)?.call(base, 1, false)?.ret()?;
            Ok(())
        }))
        .method(
            MethodBuilder::constructor(vec![TypeSig::String]).body(|asm, refs| {
                let base = refs.method(&constructor(OBJECT, vec![]))?;
                let message = refs.field(EXCEPTION_MESSAGE_FIELD)?;
                asm.ldarg(0)?
                    .call(base, 1, false)?
                    .ldarg(0)?
                    .ldarg(1)?
                    .stfld(message)?
                    .ret()?;
                Ok(())
            }),
        )
        .method(
            MethodBuilder::new("get_Message", MethodSig::instance(TypeSig::String, vec![]))
                .virtual_()
                .body(|asm, refs| {
                    let message = refs.field(EXCEPTION_MESSAGE_FIELD)?;
                    asm.ldarg(0)?.ldfld(message)?.ret()?;
                    Ok(())
                }),
        )
        .build()
}

fn derived_exception(name: &str, base: &'static str) -> Result<TypeImage> {
    TypeBuilder::new(name)
        .base(Some(base))
        .method(MethodBuilder::constructor(vec![]).body(move |asm, refs| {
            let ctor = refs.method(&constructor(base, vec![]))?;
            asm.ldarg(0)?.call(ctor, 1, false)?.ret()?;
            Ok(())
        }))
        .method(
            MethodBuilder::constructor(vec![TypeSig::String]).body(move |asm, refs| {
                let ctor = refs.method(&constructor(base, vec![TypeSig::String]))?;
                asm.ldarg(0)?.ldarg(1)?.call(ctor, 2, false)?.ret()?;
                Ok(())
            }),
        )
        .build()
}
