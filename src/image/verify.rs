use std::collections::HashSet;

use crate::{
    assembly::{decode_stream, Instruction, Operand},
    image::{MethodImage, TypeImage},
    metadata::{method::MethodBody, token::Token},
    Result,
};

/// Checks every method body of `image` for structural validity.
///
/// A body is valid when it decodes completely, every branch lands on an instruction
/// boundary, every token operand resolves against the image's tables for the kind of
/// operand the instruction expects, exception clauses cover whole instructions, the local
/// signature resolves and the code cannot run off its end.
///
/// Instance constructors of types deriving from anything must additionally call a
/// constructor of the same type or the base type before their first `ret`.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] naming the first offending method.
pub fn verify_image(image: &TypeImage) -> Result<()> {
    for method in &image.methods {
        verify_method(image, method).map_err(|error| match error {
            crate::Error::Malformed { message, file, line } => crate::Error::Malformed {
                message: format!("{}: {}", method.def.identity, message),
                file,
                line,
            },
            other => other,
        })?;
    }
    Ok(())
}

fn verify_method(image: &TypeImage, method: &MethodImage) -> Result<()> {
    let body = match (&method.body, method.def.has_body()) {
        (Some(bytes), true) => MethodBody::parse(bytes)?,
        (None, false) => return Ok(()),
        (Some(_), false) => return Err(malformed_error!("Body present on a method without one")),
        (None, true) => return Err(malformed_error!("Missing method body")),
    };

    if body.code.is_empty() {
        return Err(malformed_error!("Empty method body"));
    }

    let instructions = decode_stream(&body.code)?;
    let boundaries: HashSet<u64> = instructions.iter().map(|i| i.offset).collect();

    for instruction in &instructions {
        for target in &instruction.branch_targets {
            if !boundaries.contains(target) {
                return Err(malformed_error!(
                    "{:?} branches to 0x{:04x}, not an instruction boundary",
                    instruction,
                    target
                ));
            }
        }
        if let Operand::Token(token) = instruction.operand {
            check_token(image, instruction, token)?;
        }
    }

    if let Some(last) = instructions.last() {
        if !last.is_terminal() {
            return Err(malformed_error!("Control flow runs past the end of the code"));
        }
    }

    let code_len = body.code.len() as u64;
    let on_boundary = |offset: u64| offset == code_len || boundaries.contains(&offset);
    for clause in &body.exception_clauses {
        let try_end = u64::from(clause.try_offset) + u64::from(clause.try_length);
        let handler_end = u64::from(clause.handler_offset) + u64::from(clause.handler_length);
        if try_end > code_len || handler_end > code_len {
            return Err(malformed_error!("Exception clause {:?} exceeds the code", clause));
        }
        if !on_boundary(u64::from(clause.try_offset))
            || !on_boundary(try_end)
            || !on_boundary(u64::from(clause.handler_offset))
            || !on_boundary(handler_end)
        {
            return Err(malformed_error!(
                "Exception clause {:?} splits an instruction",
                clause
            ));
        }
        if let Some(class) = clause.class_token() {
            image.resolve_type_ref(class)?;
        }
    }

    if !body.local_var_sig_token.is_null() {
        image.resolve_local_sig(body.local_var_sig_token)?;
    }

    if method.def.is_constructor() && !method.def.is_static() && image.base.is_some() {
        check_constructor_chaining(image, &instructions)?;
    }

    Ok(())
}

fn check_token(image: &TypeImage, instruction: &Instruction, token: Token) -> Result<()> {
    match instruction.mnemonic {
        "call" | "callvirt" => {
            image.resolve_method(token)?;
        }
        "newobj" => {
            if !image.resolve_method(token)?.is_constructor() {
                return Err(malformed_error!("newobj on non-constructor {}", token));
            }
        }
        "ldfld" | "stfld" | "ldsfld" | "stsfld" => {
            let field = image.resolve_field(token)?;
            let wants_static = matches!(instruction.mnemonic, "ldsfld" | "stsfld");
            if field.is_static != wants_static {
                return Err(malformed_error!(
                    "{} used on field {}",
                    instruction.mnemonic,
                    field
                ));
            }
        }
        "ldstr" => {
            image.resolve_string(token)?;
        }
        "box" | "unbox.any" | "castclass" | "isinst" | "newarr" => {
            image.resolve_type_ref(token)?;
        }
        other => return Err(malformed_error!("Unexpected token operand on {}", other)),
    }
    Ok(())
}

/// The first `ret` of an instance constructor must follow a chained constructor call.
fn check_constructor_chaining(image: &TypeImage, instructions: &[Instruction]) -> Result<()> {
    for instruction in instructions {
        match instruction.mnemonic {
            "call" => {
                let Some(token) = instruction.operand.token() else {
                    continue;
                };
                let callee = image.resolve_method(token)?;
                if callee.is_constructor()
                    && (callee.declaring == image.name
                        || image.base.as_ref() == Some(&callee.declaring))
                {
                    return Ok(());
                }
            }
            "ret" => {
                return Err(malformed_error!(
                    "Constructor returns before calling a base constructor"
                ))
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::InstructionAssembler,
        image::MemberRef,
        metadata::{
            method::{
                ExceptionClause, FunctionIdentity, MethodAttributes, MethodDef,
                MethodImplAttributes,
            },
            signatures::{MethodSig, ScalarKind, TypeName, TypeSig},
            typesystem::{TypeAttributes, TypeKind},
        },
        Error,
    };

    fn image() -> TypeImage {
        TypeImage::new(
            TypeName::parse("Demo.Widget"),
            TypeKind::Class,
            TypeAttributes::PUBLIC,
            Some(TypeName::parse("System.Object")),
        )
    }

    fn add_method(image: &mut TypeImage, name: &str, sig: MethodSig, body: &MethodBody) {
        image.methods.push(MethodImage {
            def: MethodDef {
                identity: FunctionIdentity::new(image.name.clone(), name, sig),
                flags: MethodAttributes::PUBLIC,
                impl_flags: MethodImplAttributes::IL,
            },
            body: Some(body.encode().unwrap()),
        });
    }

    fn object_ctor() -> MemberRef {
        MemberRef::Method(FunctionIdentity::new(
            TypeName::parse("System.Object"),
            ".ctor",
            MethodSig::instance(TypeSig::Void, vec![]),
        ))
    }

    #[test]
    fn accepts_well_formed_bodies() {
        let mut image = image();
        let ctor = image.intern_member_ref(&object_ctor()).unwrap();

        let mut asm = InstructionAssembler::new();
        asm.ldarg(0).unwrap().call(ctor, 1, false).unwrap().ret().unwrap();
        let (code, max_stack) = asm.finish().unwrap();
        add_method(
            &mut image,
            ".ctor",
            MethodSig::instance(TypeSig::Void, vec![]),
            &MethodBody::new(code, max_stack),
        );

        let mut asm = InstructionAssembler::new();
        asm.ldarg(0)
            .unwrap()
            .brtrue("yes")
            .unwrap()
            .ldc_i4(0)
            .unwrap()
            .ret()
            .unwrap()
            .label("yes")
            .unwrap()
            .ldc_i4(1)
            .unwrap()
            .ret()
            .unwrap();
        let (code, max_stack) = asm.finish().unwrap();
        add_method(
            &mut image,
            "Check",
            MethodSig::static_method(ScalarKind::I4.into(), vec![ScalarKind::Bool.into()]),
            &MethodBody::new(code, max_stack),
        );

        verify_image(&image).unwrap();
    }

    #[test]
    fn rejects_branch_into_instruction() {
        let mut image = image();
        // ldc.i4 5; br.s -4; ret
        let code = vec![0x20, 0x05, 0x00, 0x00, 0x00, 0x2B, 0xFC, 0x2A];
        add_method(
            &mut image,
            "Loop",
            MethodSig::static_method(TypeSig::Void, vec![]),
            &MethodBody::new(code, 1),
        );
        let error = verify_image(&image).unwrap_err();
        assert!(matches!(error, Error::Malformed { ref message, .. } if message.contains("Loop")));
    }

    #[test]
    fn rejects_unresolvable_tokens_and_fallthrough() {
        let mut image = image();
        // ldstr 0x70000001 with an empty string table
        add_method(
            &mut image,
            "Name",
            MethodSig::static_method(TypeSig::String, vec![]),
            &MethodBody::new(vec![0x72, 0x01, 0x00, 0x00, 0x70, 0x2A], 1),
        );
        assert!(verify_image(&image).is_err());

        let mut image = self::image();
        add_method(
            &mut image,
            "Run",
            MethodSig::static_method(TypeSig::Void, vec![]),
            &MethodBody::new(vec![0x00], 0),
        );
        assert!(verify_image(&image).is_err());
    }

    #[test]
    fn rejects_clause_outside_code() {
        let mut image = image();
        let exception = image
            .intern_type_ref(&TypeSig::class("System.Exception"))
            .unwrap();
        let mut body = MethodBody::new(vec![0x00, 0x2A], 1);
        body.exception_clauses
            .push(ExceptionClause::catch(0, 1, 1, 4, exception));
        add_method(
            &mut image,
            "Guarded",
            MethodSig::static_method(TypeSig::Void, vec![]),
            &body,
        );
        assert!(verify_image(&image).is_err());
    }

    #[test]
    fn constructor_must_chain_before_returning() {
        let mut image = image();
        let ctor = image.intern_member_ref(&object_ctor()).unwrap();

        let mut asm = InstructionAssembler::new();
        asm.ret()
            .unwrap()
            .ldarg(0)
            .unwrap()
            .call(ctor, 1, false)
            .unwrap()
            .ret()
            .unwrap();
        let (code, max_stack) = asm.finish().unwrap();
        add_method(
            &mut image,
            ".ctor",
            MethodSig::instance(TypeSig::Void, vec![]),
            &MethodBody::new(code, max_stack),
        );
        assert!(verify_image(&image).is_err());
    }
}
