//! Interception prologue generation.
//!
//! The prologue packs the call into an `object[]` bundle, calls the dispatch entry point
//! and either returns the carried value or falls through into the untouched original code:
//!
//! ```text
//!         ldc.i4    <slots>
//!         newarr    object
//!         dup; ldc.i4.0; ldc.i8 <entry id>; box int64; stelem.ref
//!         dup; ldc.i4.1; ldarg.0; stelem.ref                  // instance functions
//!         dup; ldc.i4 <slot>; ldarg <n>; [box <T>]; stelem.ref // per parameter
//!         call      object[] <Dispatch>::Entry(object[])
//!         dup
//!         brfalse.s FALL
//!         ldc.i4.0; ldelem.ref; unbox.any <T> | castclass <T>; ret   // or pop; ret for void
//! FALL:   pop
//!         <original code>
//! ```

use crate::{
    assembly::InstructionAssembler,
    image::{MemberRef, TypeImage},
    metadata::{
        method::{FunctionIdentity, MethodBody, MethodDef},
        signatures::{ScalarKind, TypeSig},
    },
    Result,
};

const FALL_THROUGH: &str = "fall_through";

/// Assembled prologue code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prologue {
    /// The instructions
    pub code: Vec<u8>,
    /// Maximum stack depth reached by the prologue alone
    pub max_stack: u16,
}

/// Assembles the prologue of `target`, interning the references it needs into `image`.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if the function has more arguments than a bundle can
/// carry or a token table overflows.
pub fn build(
    image: &mut TypeImage,
    target: &MethodDef,
    entry_id: u64,
    entry: &FunctionIdentity,
) -> Result<Prologue> {
    let sig = &target.identity.signature;
    let object = image.intern_type_ref(&TypeSig::Object)?;
    let int64 = image.intern_type_ref(&TypeSig::Scalar(ScalarKind::I8))?;
    let entry_token = image.intern_member_ref(&MemberRef::Method(entry.clone()))?;

    let slots = i32::try_from(1 + sig.arg_count())
        .map_err(|_| malformed_error!("{} has too many arguments", target))?;
    let entry_id = i64::try_from(entry_id)
        .map_err(|_| malformed_error!("Entry id {} out of range", entry_id))?;

    let mut asm = InstructionAssembler::new();
    asm.ldc_i4(slots)?.newarr(object)?;
    asm.dup()?
        .ldc_i4(0)?
        .ldc_i8(entry_id)?
        .box_(int64)?
        .stelem_ref()?;

    for (slot, arg) in (1..slots).zip(0u16..) {
        asm.dup()?.ldc_i4(slot)?.ldarg(arg)?;
        let param = if sig.has_this {
            usize::from(arg).checked_sub(1).map(|index| &sig.params[index])
        } else {
            Some(&sig.params[usize::from(arg)])
        };
        if let Some(kind) = param.and_then(TypeSig::as_scalar) {
            let boxed = image.intern_type_ref(&TypeSig::Scalar(kind))?;
            asm.box_(boxed)?;
        }
        asm.stelem_ref()?;
    }

    asm.call(entry_token, 1, true)?.dup()?.brfalse(FALL_THROUGH)?;

    if target.is_constructor() || sig.ret.is_void() {
        asm.pop()?.ret()?;
    } else {
        let ret = image.intern_type_ref(&sig.ret)?;
        asm.ldc_i4(0)?.ldelem_ref()?;
        if sig.ret.as_scalar().is_some() {
            asm.unbox_any(ret)?;
        } else {
            asm.castclass(ret)?;
        }
        asm.ret()?;
    }

    asm.label(FALL_THROUGH)?.pop()?;
    let (code, max_stack) = asm.finish()?;
    Ok(Prologue { code, max_stack })
}

/// Prepends `prologue` to `body`.
///
/// Locals and `init_locals` are kept; exception clauses move by the prologue length so they
/// still protect the same instructions.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if the combined code is too large.
pub fn splice(body: &MethodBody, prologue: &Prologue) -> Result<MethodBody> {
    let delta = u32::try_from(prologue.code.len())
        .map_err(|_| malformed_error!("Prologue of {} bytes", prologue.code.len()))?;

    let mut code = Vec::with_capacity(prologue.code.len() + body.code.len());
    code.extend_from_slice(&prologue.code);
    code.extend_from_slice(&body.code);

    Ok(MethodBody {
        max_stack: body.max_stack.max(prologue.max_stack),
        init_locals: body.init_locals,
        local_var_sig_token: body.local_var_sig_token,
        code,
        exception_clauses: body
            .exception_clauses
            .iter()
            .map(|clause| clause.shifted(delta))
            .collect(),
        is_fat: body.is_fat,
    })
}

/// Rewrites the body of `target` inside `image`.
///
/// # Errors
/// Returns [`crate::Error::InvalidTarget`] if `image` has no CIL body for `target`, and
/// codec errors from [`build`] and [`splice`].
pub fn rewrite(
    image: &mut TypeImage,
    target: &MethodDef,
    entry_id: u64,
    entry: &FunctionIdentity,
) -> Result<()> {
    let index = image
        .method_index(&target.identity)
        .ok_or_else(|| invalid_target!("{} is not part of the image of {}", target, image.name))?;
    let body = image.methods[index]
        .parsed_body()?
        .ok_or_else(|| invalid_target!("{} has no body", target))?;

    let prologue = build(image, target, entry_id, entry)?;
    let patched = splice(&body, &prologue)?;
    image.methods[index].body = Some(patched.encode()?);
    Ok(())
}
