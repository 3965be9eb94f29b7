//! CIL instruction decoding.
//!
//! - [`decode_instruction`] - Decodes one instruction at the parser position
//! - [`decode_stream`] - Decodes a whole code buffer into a linear instruction list
//!
//! ```rust,no_run
//! use cilplant::assembly::decode_stream;
//!
//! let instructions = decode_stream(&[0x00, 0x2A])?; // nop, ret
//! assert_eq!(instructions[1].mnemonic, "ret");
//! # Ok::<(), cilplant::Error>(())
//! ```

use crate::{
    assembly::{
        instruction::{FlowType, Immediate, Instruction, Operand, OperandType, StackBehavior},
        instructions::{FE_PREFIX, INSTRUCTIONS, INSTRUCTIONS_FE},
    },
    file::parser::Parser,
    metadata::token::Token,
    Result,
};

/// Decodes the instruction at the parser's current position.
///
/// Branch operands are decoded as immediates, and the absolute target is stored in
/// [`Instruction::branch_targets`].
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for unknown opcodes and [`crate::Error::OutOfBounds`]
/// for truncated instructions.
pub fn decode_instruction(parser: &mut Parser) -> Result<Instruction> {
    let offset = parser.pos() as u64;
    let first_byte = parser.read_le::<u8>()?;

    let (cil_instruction, prefix, opcode) = if first_byte == FE_PREFIX {
        let second_byte = parser.read_le::<u8>()?;
        match INSTRUCTIONS_FE.get(second_byte as usize) {
            Some(instr) => (instr, FE_PREFIX, second_byte),
            None => return Err(malformed_error!("Invalid opcode: FE {:02X}", second_byte)),
        }
    } else {
        (&INSTRUCTIONS[first_byte as usize], 0, first_byte)
    };

    if cil_instruction.instr.is_empty() {
        return Err(malformed_error!(
            "Unsupported opcode: {:02X}{:02X}",
            prefix,
            opcode
        ));
    }

    let operand = match cil_instruction.op_type {
        OperandType::None => Operand::None,
        OperandType::Int8 => Operand::Immediate(Immediate::Int8(parser.read_le::<i8>()?)),
        OperandType::UInt8 => Operand::Immediate(Immediate::UInt8(parser.read_le::<u8>()?)),
        OperandType::Int16 => Operand::Immediate(Immediate::Int16(parser.read_le::<i16>()?)),
        OperandType::UInt16 => Operand::Immediate(Immediate::UInt16(parser.read_le::<u16>()?)),
        OperandType::Int32 => Operand::Immediate(Immediate::Int32(parser.read_le::<i32>()?)),
        OperandType::UInt32 => Operand::Immediate(Immediate::UInt32(parser.read_le::<u32>()?)),
        OperandType::Int64 => Operand::Immediate(Immediate::Int64(parser.read_le::<i64>()?)),
        OperandType::UInt64 => Operand::Immediate(Immediate::UInt64(parser.read_le::<u64>()?)),
        OperandType::Float32 => Operand::Immediate(Immediate::Float32(parser.read_le::<f32>()?)),
        OperandType::Float64 => Operand::Immediate(Immediate::Float64(parser.read_le::<f64>()?)),
        OperandType::Token => Operand::Token(Token::new(parser.read_le::<u32>()?)),
    };
    let size = parser.pos() as u64 - offset;

    let mut instruction = Instruction {
        offset,
        size,
        opcode,
        prefix,
        mnemonic: cil_instruction.instr,
        flow_type: cil_instruction.flow,
        stack_behavior: StackBehavior {
            pops: cil_instruction.stack_pops,
            pushes: cil_instruction.stack_pushes,
            #[allow(clippy::cast_possible_wrap)]
            net_effect: cil_instruction.stack_pushes as i8 - cil_instruction.stack_pops as i8,
        },
        branch_targets: Vec::new(),
        operand,
    };

    if matches!(
        instruction.flow_type,
        FlowType::ConditionalBranch | FlowType::UnconditionalBranch | FlowType::Leave
    ) {
        if let Some(delta) = instruction.int_operand() {
            #[allow(clippy::cast_sign_loss)]
            let target = (instruction.next_offset() as i64).wrapping_add(delta) as u64;
            instruction.branch_targets.push(target);
        }
    }

    Ok(instruction)
}

/// Decodes a complete code buffer.
///
/// # Errors
/// Returns the first decoding error; a trailing partial instruction is
/// [`crate::Error::OutOfBounds`].
pub fn decode_stream(code: &[u8]) -> Result<Vec<Instruction>> {
    let mut parser = Parser::new(code);
    let mut instructions = Vec::new();
    while parser.has_more_data() {
        instructions.push(decode_instruction(&mut parser)?);
    }
    Ok(instructions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn decode_instruction_basic() {
        let mut parser = Parser::new(&[0x11, 0x10]);
        let result = decode_instruction(&mut parser).unwrap();

        assert_eq!(result.offset, 0);
        assert_eq!(result.size, 2);
        assert_eq!(result.opcode, 0x11);
        assert_eq!(result.prefix, 0);
        assert_eq!(result.mnemonic, "ldloc.s");
        assert_eq!(result.flow_type, FlowType::Sequential);
        assert_eq!(result.operand, Operand::Immediate(Immediate::UInt8(0x10)));
    }

    #[test]
    fn decode_instruction_two_byte() {
        let mut parser = Parser::new(&[0xFE, 0x01]);
        let result = decode_instruction(&mut parser).unwrap();

        assert_eq!(result.opcode, 0x01);
        assert_eq!(result.prefix, 0xFE);
        assert_eq!(result.mnemonic, "ceq");
        assert_eq!(result.stack_behavior.net_effect, -1);
    }

    #[test]
    fn branch_targets_are_absolute() {
        // nop; br.s -3; brfalse 2
        let code = [0x00, 0x2B, 0xFD, 0x39, 0x02, 0x00, 0x00, 0x00];
        let instructions = decode_stream(&code).unwrap();
        assert_eq!(instructions.len(), 3);
        assert_eq!(instructions[1].branch_target(), Some(0));
        assert_eq!(instructions[2].branch_target(), Some(10));
        assert!(instructions[1].is_terminal());
        assert!(!instructions[2].is_terminal());
    }

    #[test]
    fn token_operands() {
        let code = [0x28, 0x01, 0x00, 0x00, 0x0A, 0x2A];
        let instructions = decode_stream(&code).unwrap();
        assert_eq!(
            instructions[0].operand.token(),
            Some(Token::new(0x0A00_0001))
        );
        assert_eq!(instructions[0].flow_type, FlowType::Call);
    }

    #[test]
    fn invalid_and_truncated() {
        assert!(matches!(
            decode_stream(&[0xFF]),
            Err(Error::Malformed { .. })
        ));
        assert!(matches!(
            decode_stream(&[0xFE, 0x40]),
            Err(Error::Malformed { .. })
        ));
        assert!(matches!(
            decode_stream(&[0x20, 0x01]),
            Err(Error::OutOfBounds)
        ));
    }
}
