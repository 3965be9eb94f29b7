//! Static opcode tables.
//!
//! [`INSTRUCTIONS`] is indexed by the single opcode byte, [`INSTRUCTIONS_FE`] by the second
//! byte of `0xFE`-prefixed opcodes. Entries with an empty mnemonic are opcodes this crate
//! neither emits nor executes; decoding them fails.

use crate::assembly::instruction::{FlowType, OperandType};

/// Metadata of one opcode.
#[derive(Debug, Clone, Copy)]
pub struct CilInstruction {
    /// Mnemonic, empty for unsupported opcodes
    pub instr: &'static str,
    /// Operand kind
    pub op_type: OperandType,
    /// Items popped, zero for signature dependent calls
    pub stack_pops: u8,
    /// Items pushed
    pub stack_pushes: u8,
    /// Control flow behavior
    pub flow: FlowType,
}

/// Prefix byte of two-byte opcodes.
pub const FE_PREFIX: u8 = 0xFE;

const RESERVED: CilInstruction = op("", OperandType::None, 0, 0, FlowType::Sequential);

const fn op(
    instr: &'static str,
    op_type: OperandType,
    stack_pops: u8,
    stack_pushes: u8,
    flow: FlowType,
) -> CilInstruction {
    CilInstruction {
        instr,
        op_type,
        stack_pops,
        stack_pushes,
        flow,
    }
}

const fn seq(instr: &'static str, op_type: OperandType, pops: u8, pushes: u8) -> CilInstruction {
    op(instr, op_type, pops, pushes, FlowType::Sequential)
}

const fn cond(instr: &'static str, op_type: OperandType, pops: u8) -> CilInstruction {
    op(instr, op_type, pops, 0, FlowType::ConditionalBranch)
}

/// Single byte opcodes.
pub static INSTRUCTIONS: [CilInstruction; 256] = single_byte_table();

/// Two byte opcodes, indexed by the byte following [`FE_PREFIX`].
pub static INSTRUCTIONS_FE: [CilInstruction; 32] = two_byte_table();

#[allow(clippy::too_many_lines)]
const fn single_byte_table() -> [CilInstruction; 256] {
    use OperandType::{Float32, Float64, Int32, Int64, Int8, None, Token, UInt8};

    let mut t = [RESERVED; 256];
    t[0x00] = seq("nop", None, 0, 0);
    t[0x02] = seq("ldarg.0", None, 0, 1);
    t[0x03] = seq("ldarg.1", None, 0, 1);
    t[0x04] = seq("ldarg.2", None, 0, 1);
    t[0x05] = seq("ldarg.3", None, 0, 1);
    t[0x06] = seq("ldloc.0", None, 0, 1);
    t[0x07] = seq("ldloc.1", None, 0, 1);
    t[0x08] = seq("ldloc.2", None, 0, 1);
    t[0x09] = seq("ldloc.3", None, 0, 1);
    t[0x0A] = seq("stloc.0", None, 1, 0);
    t[0x0B] = seq("stloc.1", None, 1, 0);
    t[0x0C] = seq("stloc.2", None, 1, 0);
    t[0x0D] = seq("stloc.3", None, 1, 0);
    t[0x0E] = seq("ldarg.s", UInt8, 0, 1);
    t[0x10] = seq("starg.s", UInt8, 1, 0);
    t[0x11] = seq("ldloc.s", UInt8, 0, 1);
    t[0x13] = seq("stloc.s", UInt8, 1, 0);
    t[0x14] = seq("ldnull", None, 0, 1);
    t[0x15] = seq("ldc.i4.m1", None, 0, 1);
    t[0x16] = seq("ldc.i4.0", None, 0, 1);
    t[0x17] = seq("ldc.i4.1", None, 0, 1);
    t[0x18] = seq("ldc.i4.2", None, 0, 1);
    t[0x19] = seq("ldc.i4.3", None, 0, 1);
    t[0x1A] = seq("ldc.i4.4", None, 0, 1);
    t[0x1B] = seq("ldc.i4.5", None, 0, 1);
    t[0x1C] = seq("ldc.i4.6", None, 0, 1);
    t[0x1D] = seq("ldc.i4.7", None, 0, 1);
    t[0x1E] = seq("ldc.i4.8", None, 0, 1);
    t[0x1F] = seq("ldc.i4.s", Int8, 0, 1);
    t[0x20] = seq("ldc.i4", Int32, 0, 1);
    t[0x21] = seq("ldc.i8", Int64, 0, 1);
    t[0x22] = seq("ldc.r4", Float32, 0, 1);
    t[0x23] = seq("ldc.r8", Float64, 0, 1);
    t[0x25] = seq("dup", None, 1, 2);
    t[0x26] = seq("pop", None, 1, 0);
    t[0x28] = op("call", Token, 0, 0, FlowType::Call);
    t[0x2A] = op("ret", None, 0, 0, FlowType::Return);
    t[0x2B] = op("br.s", Int8, 0, 0, FlowType::UnconditionalBranch);
    t[0x2C] = cond("brfalse.s", Int8, 1);
    t[0x2D] = cond("brtrue.s", Int8, 1);
    t[0x2E] = cond("beq.s", Int8, 2);
    t[0x2F] = cond("bge.s", Int8, 2);
    t[0x30] = cond("bgt.s", Int8, 2);
    t[0x31] = cond("ble.s", Int8, 2);
    t[0x32] = cond("blt.s", Int8, 2);
    t[0x33] = cond("bne.un.s", Int8, 2);
    t[0x38] = op("br", Int32, 0, 0, FlowType::UnconditionalBranch);
    t[0x39] = cond("brfalse", Int32, 1);
    t[0x3A] = cond("brtrue", Int32, 1);
    t[0x3B] = cond("beq", Int32, 2);
    t[0x3C] = cond("bge", Int32, 2);
    t[0x3D] = cond("bgt", Int32, 2);
    t[0x3E] = cond("ble", Int32, 2);
    t[0x3F] = cond("blt", Int32, 2);
    t[0x40] = cond("bne.un", Int32, 2);
    t[0x58] = seq("add", None, 2, 1);
    t[0x59] = seq("sub", None, 2, 1);
    t[0x5A] = seq("mul", None, 2, 1);
    t[0x5B] = seq("div", None, 2, 1);
    t[0x5D] = seq("rem", None, 2, 1);
    t[0x65] = seq("neg", None, 1, 1);
    t[0x69] = seq("conv.i4", None, 1, 1);
    t[0x6A] = seq("conv.i8", None, 1, 1);
    t[0x6C] = seq("conv.r8", None, 1, 1);
    t[0x6F] = op("callvirt", Token, 0, 0, FlowType::Call);
    t[0x72] = seq("ldstr", Token, 0, 1);
    t[0x73] = op("newobj", Token, 0, 0, FlowType::Call);
    t[0x74] = seq("castclass", Token, 1, 1);
    t[0x75] = seq("isinst", Token, 1, 1);
    t[0x7A] = op("throw", None, 1, 0, FlowType::Throw);
    t[0x7B] = seq("ldfld", Token, 1, 1);
    t[0x7D] = seq("stfld", Token, 2, 0);
    t[0x7E] = seq("ldsfld", Token, 0, 1);
    t[0x80] = seq("stsfld", Token, 1, 0);
    t[0x8C] = seq("box", Token, 1, 1);
    t[0x8D] = seq("newarr", Token, 1, 1);
    t[0x8E] = seq("ldlen", None, 1, 1);
    t[0x9A] = seq("ldelem.ref", None, 2, 1);
    t[0xA2] = seq("stelem.ref", None, 3, 0);
    t[0xA5] = seq("unbox.any", Token, 1, 1);
    t[0xDC] = op("endfinally", None, 0, 0, FlowType::EndFinally);
    t[0xDD] = op("leave", Int32, 0, 0, FlowType::Leave);
    t[0xDE] = op("leave.s", Int8, 0, 0, FlowType::Leave);
    t
}

const fn two_byte_table() -> [CilInstruction; 32] {
    use OperandType::{None, UInt16};

    let mut t = [RESERVED; 32];
    t[0x01] = seq("ceq", None, 2, 1);
    t[0x02] = seq("cgt", None, 2, 1);
    t[0x04] = seq("clt", None, 2, 1);
    t[0x09] = seq("ldarg", UInt16, 0, 1);
    t[0x0B] = seq("starg", UInt16, 1, 0);
    t[0x0C] = seq("ldloc", UInt16, 0, 1);
    t[0x0E] = seq("stloc", UInt16, 1, 0);
    t[0x1A] = op("rethrow", None, 0, 0, FlowType::Throw);
    t
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn mnemonics_are_unique() {
        let mut seen = HashSet::new();
        for entry in INSTRUCTIONS.iter().chain(INSTRUCTIONS_FE.iter()) {
            if !entry.instr.is_empty() {
                assert!(seen.insert(entry.instr), "duplicate {}", entry.instr);
            }
        }
        assert!(seen.contains("stelem.ref"));
        assert!(seen.contains("ceq"));
    }

    #[test]
    fn short_branches_use_byte_offsets() {
        for entry in INSTRUCTIONS.iter().filter(|e| e.instr.ends_with(".s")) {
            if matches!(
                entry.flow,
                FlowType::ConditionalBranch | FlowType::UnconditionalBranch | FlowType::Leave
            ) {
                assert_eq!(entry.op_type, OperandType::Int8, "{}", entry.instr);
            }
        }
    }
}
