//! CIL instruction tables, encoding, assembly and decoding.
//!
//! # Key Types
//! - [`Instruction`] - A decoded instruction
//! - [`InstructionEncoder`] - Mnemonic based encoder with label fixups and stack tracking
//! - [`InstructionAssembler`] - Fluent wrapper choosing compact encodings
//!
//! # Main Functions
//! - [`decode_instruction`] - Decode a single instruction
//! - [`decode_stream`] - Decode a whole code buffer

mod assembler;
mod decoder;
mod encoder;
mod instruction;
mod instructions;

pub use assembler::InstructionAssembler;
pub use decoder::{decode_instruction, decode_stream};
pub use encoder::InstructionEncoder;
pub use instruction::{FlowType, Immediate, Instruction, Operand, OperandType, StackBehavior};
pub use instructions::{CilInstruction, FE_PREFIX, INSTRUCTIONS, INSTRUCTIONS_FE};
