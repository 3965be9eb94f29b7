//! Fluent CIL assembler.
//!
//! [`InstructionAssembler`] wraps [`InstructionEncoder`] with one method per instruction and
//! picks the most compact encoding for argument, local and constant loads.
//!
//! ```rust,no_run
//! use cilplant::assembly::InstructionAssembler;
//!
//! let mut asm = InstructionAssembler::new();
//! asm.ldarg(1)?
//!     .ldarg(2)?
//!     .add()?
//!     .ret()?;
//! let (code, max_stack) = asm.finish()?;
//! # Ok::<(), cilplant::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    assembly::{
        encoder::InstructionEncoder,
        instruction::{Immediate, Operand},
    },
    metadata::token::Token,
    Result,
};

/// Fluent builder producing CIL bytecode.
#[derive(Default)]
pub struct InstructionAssembler {
    encoder: InstructionEncoder,
}

impl InstructionAssembler {
    /// Creates an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn emit(&mut self, mnemonic: &str) -> Result<&mut Self> {
        self.encoder.emit_instruction(mnemonic, None)?;
        Ok(self)
    }

    fn emit_with(&mut self, mnemonic: &str, operand: Operand) -> Result<&mut Self> {
        self.encoder.emit_instruction(mnemonic, Some(operand))?;
        Ok(self)
    }

    fn emit_token(&mut self, mnemonic: &str, token: Token) -> Result<&mut Self> {
        self.emit_with(mnemonic, Operand::Token(token))
    }

    /// Defines a label at the current position.
    ///
    /// # Errors
    /// Returns [`crate::Error::DuplicateLabel`] if the label exists.
    pub fn label(&mut self, name: &str) -> Result<&mut Self> {
        self.encoder.define_label(name)?;
        Ok(self)
    }

    /// Defines the entry label of a catch handler, which starts with the exception object on
    /// the stack.
    ///
    /// # Errors
    /// Returns [`crate::Error::DuplicateLabel`] if the label exists.
    pub fn handler_label(&mut self, name: &str) -> Result<&mut Self> {
        self.encoder.define_handler_label(name)?;
        Ok(self)
    }

    /// Current code position.
    #[must_use]
    pub fn position(&self) -> usize {
        self.encoder.current_position()
    }

    /// Resolves labels and returns the code and its maximum stack depth.
    ///
    /// # Errors
    /// Returns an error for undefined labels or branch offsets out of range.
    pub fn finish(self) -> Result<(Vec<u8>, u16)> {
        let (code, max_stack, _) = self.encoder.finalize()?;
        Ok((code, max_stack))
    }

    /// Like [`InstructionAssembler::finish`], also returning label positions.
    ///
    /// # Errors
    /// Returns an error for undefined labels or branch offsets out of range.
    pub fn finish_with_labels(self) -> Result<(Vec<u8>, u16, HashMap<String, u32>)> {
        self.encoder.finalize()
    }

    /// `nop`
    ///
    /// # Errors
    /// Never fails in practice; the signature matches the other emitters.
    pub fn nop(&mut self) -> Result<&mut Self> {
        self.emit("nop")
    }

    /// Loads argument `index` using the shortest encoding.
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldarg(&mut self, index: u16) -> Result<&mut Self> {
        match index {
            0 => self.emit("ldarg.0"),
            1 => self.emit("ldarg.1"),
            2 => self.emit("ldarg.2"),
            3 => self.emit("ldarg.3"),
            _ => match u8::try_from(index) {
                Ok(short) => self.emit_with("ldarg.s", Operand::Immediate(Immediate::UInt8(short))),
                Err(_) => self.emit_with("ldarg", Operand::Immediate(Immediate::UInt16(index))),
            },
        }
    }

    /// Stores into argument `index`.
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn starg(&mut self, index: u16) -> Result<&mut Self> {
        match u8::try_from(index) {
            Ok(short) => self.emit_with("starg.s", Operand::Immediate(Immediate::UInt8(short))),
            Err(_) => self.emit_with("starg", Operand::Immediate(Immediate::UInt16(index))),
        }
    }

    /// Loads local `index` using the shortest encoding.
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldloc(&mut self, index: u16) -> Result<&mut Self> {
        match index {
            0 => self.emit("ldloc.0"),
            1 => self.emit("ldloc.1"),
            2 => self.emit("ldloc.2"),
            3 => self.emit("ldloc.3"),
            _ => match u8::try_from(index) {
                Ok(short) => self.emit_with("ldloc.s", Operand::Immediate(Immediate::UInt8(short))),
                Err(_) => self.emit_with("ldloc", Operand::Immediate(Immediate::UInt16(index))),
            },
        }
    }

    /// Stores into local `index` using the shortest encoding.
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn stloc(&mut self, index: u16) -> Result<&mut Self> {
        match index {
            0 => self.emit("stloc.0"),
            1 => self.emit("stloc.1"),
            2 => self.emit("stloc.2"),
            3 => self.emit("stloc.3"),
            _ => match u8::try_from(index) {
                Ok(short) => self.emit_with("stloc.s", Operand::Immediate(Immediate::UInt8(short))),
                Err(_) => self.emit_with("stloc", Operand::Immediate(Immediate::UInt16(index))),
            },
        }
    }

    /// `ldnull`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldnull(&mut self) -> Result<&mut Self> {
        self.emit("ldnull")
    }

    /// Loads an `int32` constant using the shortest encoding.
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldc_i4(&mut self, value: i32) -> Result<&mut Self> {
        match value {
            -1 => self.emit("ldc.i4.m1"),
            0 => self.emit("ldc.i4.0"),
            1 => self.emit("ldc.i4.1"),
            2 => self.emit("ldc.i4.2"),
            3 => self.emit("ldc.i4.3"),
            4 => self.emit("ldc.i4.4"),
            5 => self.emit("ldc.i4.5"),
            6 => self.emit("ldc.i4.6"),
            7 => self.emit("ldc.i4.7"),
            8 => self.emit("ldc.i4.8"),
            _ => match i8::try_from(value) {
                Ok(short) => self.emit_with("ldc.i4.s", Operand::Immediate(Immediate::Int8(short))),
                Err(_) => self.emit_with("ldc.i4", Operand::Immediate(Immediate::Int32(value))),
            },
        }
    }

    /// `ldc.i8`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldc_i8(&mut self, value: i64) -> Result<&mut Self> {
        self.emit_with("ldc.i8", Operand::Immediate(Immediate::Int64(value)))
    }

    /// `ldc.r4`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldc_r4(&mut self, value: f32) -> Result<&mut Self> {
        self.emit_with("ldc.r4", Operand::Immediate(Immediate::Float32(value)))
    }

    /// `ldc.r8`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldc_r8(&mut self, value: f64) -> Result<&mut Self> {
        self.emit_with("ldc.r8", Operand::Immediate(Immediate::Float64(value)))
    }

    /// `dup`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn dup(&mut self) -> Result<&mut Self> {
        self.emit("dup")
    }

    /// `pop`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn pop(&mut self) -> Result<&mut Self> {
        self.emit("pop")
    }

    /// `call`, popping `num_args` values (receiver included).
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn call(&mut self, method: Token, num_args: u8, has_result: bool) -> Result<&mut Self> {
        self.encoder
            .emit_call("call", Some(Operand::Token(method)), num_args, has_result)?;
        Ok(self)
    }

    /// `callvirt`, popping `num_args` values (receiver included).
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn callvirt(&mut self, method: Token, num_args: u8, has_result: bool) -> Result<&mut Self> {
        self.encoder
            .emit_call("callvirt", Some(Operand::Token(method)), num_args, has_result)?;
        Ok(self)
    }

    /// `newobj`, popping the `num_params` constructor arguments.
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn newobj(&mut self, ctor: Token, num_params: u8) -> Result<&mut Self> {
        self.encoder
            .emit_call("newobj", Some(Operand::Token(ctor)), num_params, true)?;
        Ok(self)
    }

    /// `ret`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ret(&mut self) -> Result<&mut Self> {
        self.emit("ret")
    }

    /// `br` to `label`, short form.
    ///
    /// # Errors
    /// Returns an error if the offset does not fit a byte at finalization.
    pub fn br(&mut self, label: &str) -> Result<&mut Self> {
        self.branch("br.s", label)
    }

    /// `brfalse.s` to `label`.
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn brfalse(&mut self, label: &str) -> Result<&mut Self> {
        self.branch("brfalse.s", label)
    }

    /// `brtrue.s` to `label`.
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn brtrue(&mut self, label: &str) -> Result<&mut Self> {
        self.branch("brtrue.s", label)
    }

    /// `beq.s` to `label`.
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn beq(&mut self, label: &str) -> Result<&mut Self> {
        self.branch("beq.s", label)
    }

    /// `bge.s` to `label`.
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn bge(&mut self, label: &str) -> Result<&mut Self> {
        self.branch("bge.s", label)
    }

    /// `bgt.s` to `label`.
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn bgt(&mut self, label: &str) -> Result<&mut Self> {
        self.branch("bgt.s", label)
    }

    /// `ble.s` to `label`.
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn ble(&mut self, label: &str) -> Result<&mut Self> {
        self.branch("ble.s", label)
    }

    /// `blt.s` to `label`.
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn blt(&mut self, label: &str) -> Result<&mut Self> {
        self.branch("blt.s", label)
    }

    /// `leave.s` to `label`.
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn leave(&mut self, label: &str) -> Result<&mut Self> {
        self.branch("leave.s", label)
    }

    /// Any branch mnemonic, short or long.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidBranch`] for non-branch mnemonics.
    pub fn branch(&mut self, mnemonic: &str, label: &str) -> Result<&mut Self> {
        self.encoder.emit_branch(mnemonic, label)?;
        Ok(self)
    }

    /// `add`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn add(&mut self) -> Result<&mut Self> {
        self.emit("add")
    }

    /// `sub`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn sub(&mut self) -> Result<&mut Self> {
        self.emit("sub")
    }

    /// `mul`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn mul(&mut self) -> Result<&mut Self> {
        self.emit("mul")
    }

    /// `div`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn div(&mut self) -> Result<&mut Self> {
        self.emit("div")
    }

    /// `rem`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn rem(&mut self) -> Result<&mut Self> {
        self.emit("rem")
    }

    /// `neg`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn neg(&mut self) -> Result<&mut Self> {
        self.emit("neg")
    }

    /// `ceq`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn ceq(&mut self) -> Result<&mut Self> {
        self.emit("ceq")
    }

    /// `cgt`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn cgt(&mut self) -> Result<&mut Self> {
        self.emit("cgt")
    }

    /// `clt`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn clt(&mut self) -> Result<&mut Self> {
        self.emit("clt")
    }

    /// `conv.i4`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn conv_i4(&mut self) -> Result<&mut Self> {
        self.emit("conv.i4")
    }

    /// `conv.i8`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn conv_i8(&mut self) -> Result<&mut Self> {
        self.emit("conv.i8")
    }

    /// `conv.r8`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn conv_r8(&mut self) -> Result<&mut Self> {
        self.emit("conv.r8")
    }

    /// `ldstr`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldstr(&mut self, string: Token) -> Result<&mut Self> {
        self.emit_token("ldstr", string)
    }

    /// `ldfld`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn ldfld(&mut self, field: Token) -> Result<&mut Self> {
        self.emit_token("ldfld", field)
    }

    /// `stfld`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn stfld(&mut self, field: Token) -> Result<&mut Self> {
        self.emit_token("stfld", field)
    }

    /// `ldsfld`
    ///
    /// # Errors
    /// Propagates encoder errors.
    pub fn ldsfld(&mut self, field: Token) -> Result<&mut Self> {
        self.emit_token("ldsfld", field)
    }

    /// `stsfld`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn stsfld(&mut self, field: Token) -> Result<&mut Self> {
        self.emit_token("stsfld", field)
    }

    /// `castclass`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn castclass(&mut self, ty: Token) -> Result<&mut Self> {
        self.emit_token("castclass", ty)
    }

    /// `isinst`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn isinst(&mut self, ty: Token) -> Result<&mut Self> {
        self.emit_token("isinst", ty)
    }

    /// `box`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn box_(&mut self, ty: Token) -> Result<&mut Self> {
        self.emit_token("box", ty)
    }

    /// `unbox.any`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn unbox_any(&mut self, ty: Token) -> Result<&mut Self> {
        self.emit_token("unbox.any", ty)
    }

    /// `newarr`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn newarr(&mut self, element: Token) -> Result<&mut Self> {
        self.emit_token("newarr", element)
    }

    /// `ldlen`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn ldlen(&mut self) -> Result<&mut Self> {
        self.emit("ldlen")
    }

    /// `ldelem.ref`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn ldelem_ref(&mut self) -> Result<&mut Self> {
        self.emit("ldelem.ref")
    }

    /// `stelem.ref`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn stelem_ref(&mut self) -> Result<&mut Self> {
        self.emit("stelem.ref")
    }

    /// `throw`
    ///
    /// # Errors
    /// Returns an error on stack underflow.
    pub fn throw(&mut self) -> Result<&mut Self> {
        self.emit("throw")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_forms() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        asm.ldarg(0)?
            .ldarg(5)?
            .ldc_i4(-1)?
            .ldc_i4(100)?
            .ldc_i4(1000)?
            .pop()?
            .pop()?
            .pop()?
            .pop()?
            .pop()?
            .ret()?;
        let (code, max_stack) = asm.finish()?;
        assert_eq!(
            code,
            vec![
                0x02, 0x0E, 0x05, 0x15, 0x1F, 0x64, 0x20, 0xE8, 0x03, 0x00, 0x00, 0x26, 0x26, 0x26,
                0x26, 0x26, 0x2A
            ]
        );
        assert_eq!(max_stack, 5);
        Ok(())
    }

    #[test]
    fn locals_and_large_indices() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        asm.ldarg(300)?.stloc(1)?.ldloc(300)?.stloc(4)?.ret()?;
        let (code, _) = asm.finish()?;
        assert_eq!(
            code,
            vec![0xFE, 0x09, 0x2C, 0x01, 0x0B, 0xFE, 0x0C, 0x2C, 0x01, 0x13, 0x04, 0x2A]
        );
        Ok(())
    }

    #[test]
    fn handler_label_starts_with_exception() -> Result<()> {
        let mut asm = InstructionAssembler::new();
        asm.leave("done")?
            .handler_label("catch")?
            .pop()?
            .leave("done")?
            .label("done")?
            .ret()?;
        let (_, code_labels) = {
            let (code, _, labels) = asm.finish_with_labels()?;
            (code, labels)
        };
        assert_eq!(code_labels["catch"], 2);
        assert_eq!(code_labels["done"], 5);
        Ok(())
    }
}
