//! CIL instruction representation, operand types and decoding metadata.
//!
//! These types are shared by the decoder, the encoder and the interpreter of the reference
//! runtime, so every component agrees on what an instruction looks like.

use std::fmt;

use crate::metadata::token::Token;

/// The kind of operand an instruction carries in the byte stream.
///
/// ```rust,no_run
/// use cilplant::assembly::OperandType;
///
/// assert_eq!(OperandType::UInt8.size(), 1);
/// assert_eq!(OperandType::Token.size(), 4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand
    None,
    /// Signed 8-bit immediate or short branch offset
    Int8,
    /// Unsigned 8-bit immediate, short argument or local index
    UInt8,
    /// Signed 16-bit immediate
    Int16,
    /// Unsigned 16-bit immediate, long argument or local index
    UInt16,
    /// Signed 32-bit immediate or long branch offset
    Int32,
    /// Unsigned 32-bit immediate
    UInt32,
    /// Signed 64-bit immediate
    Int64,
    /// Unsigned 64-bit immediate
    UInt64,
    /// 32-bit float
    Float32,
    /// 64-bit float
    Float64,
    /// Metadata token
    Token,
}

impl OperandType {
    /// Size of the operand in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        match self {
            OperandType::None => 0,
            OperandType::Int8 | OperandType::UInt8 => 1,
            OperandType::Int16 | OperandType::UInt16 => 2,
            OperandType::Int32 | OperandType::UInt32 | OperandType::Float32 | OperandType::Token => {
                4
            }
            OperandType::Int64 | OperandType::UInt64 | OperandType::Float64 => 8,
        }
    }
}

/// An immediate value embedded in an instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Immediate {
    /// Signed byte
    Int8(i8),
    /// Unsigned byte
    UInt8(u8),
    /// Signed short
    Int16(i16),
    /// Unsigned short
    UInt16(u16),
    /// Signed int
    Int32(i32),
    /// Unsigned int
    UInt32(u32),
    /// Signed long
    Int64(i64),
    /// Unsigned long
    UInt64(u64),
    /// Single precision float
    Float32(f32),
    /// Double precision float
    Float64(f64),
}

impl Immediate {
    /// Sign-extended integer view of the immediate, `None` for floats.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Immediate::Int8(v) => Some(i64::from(v)),
            Immediate::UInt8(v) => Some(i64::from(v)),
            Immediate::Int16(v) => Some(i64::from(v)),
            Immediate::UInt16(v) => Some(i64::from(v)),
            Immediate::Int32(v) => Some(i64::from(v)),
            Immediate::UInt32(v) => Some(i64::from(v)),
            Immediate::Int64(v) => Some(v),
            #[allow(clippy::cast_possible_wrap)]
            Immediate::UInt64(v) => Some(v as i64),
            Immediate::Float32(_) | Immediate::Float64(_) => None,
        }
    }
}

impl From<Immediate> for u64 {
    fn from(val: Immediate) -> Self {
        match val {
            #[allow(clippy::cast_sign_loss)]
            Immediate::Int8(value) => value as u64,
            Immediate::UInt8(value) => u64::from(value),
            #[allow(clippy::cast_sign_loss)]
            Immediate::Int16(value) => value as u64,
            Immediate::UInt16(value) => u64::from(value),
            #[allow(clippy::cast_sign_loss)]
            Immediate::Int32(value) => value as u64,
            Immediate::UInt32(value) => u64::from(value),
            #[allow(clippy::cast_sign_loss)]
            Immediate::Int64(value) => value as u64,
            Immediate::UInt64(value) => value,
            Immediate::Float32(value) => u64::from(value.to_bits()),
            Immediate::Float64(value) => value.to_bits(),
        }
    }
}

/// A decoded operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand present
    None,
    /// Constant embedded in the instruction
    Immediate(Immediate),
    /// Absolute branch target offset
    Target(u64),
    /// Metadata token reference
    Token(Token),
}

impl Operand {
    /// The token operand, if any.
    #[must_use]
    pub fn token(&self) -> Option<Token> {
        match self {
            Operand::Token(token) => Some(*token),
            _ => None,
        }
    }

    /// The immediate operand, if any.
    #[must_use]
    pub fn immediate(&self) -> Option<Immediate> {
        match self {
            Operand::Immediate(imm) => Some(*imm),
            _ => None,
        }
    }
}

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Falls through to the next instruction
    Sequential,
    /// Branches or falls through
    ConditionalBranch,
    /// Always branches
    UnconditionalBranch,
    /// Calls a method and continues
    Call,
    /// Returns from the method
    Return,
    /// Raises an exception
    Throw,
    /// Ends a finally or fault handler
    EndFinally,
    /// Leaves a protected region
    Leave,
}

/// Stack effect of an instruction.
///
/// Call instructions have signature dependent effects and report zero here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackBehavior {
    /// Number of items popped
    pub pops: u8,
    /// Number of items pushed
    pub pushes: u8,
    /// Pushes minus pops
    pub net_effect: i8,
}

/// A decoded CIL instruction.
#[derive(Clone, PartialEq)]
pub struct Instruction {
    /// Offset of the instruction from the start of the code
    pub offset: u64,
    /// Encoded size in bytes
    pub size: u64,
    /// Primary opcode byte
    pub opcode: u8,
    /// Prefix byte, `0xFE` for two-byte opcodes and 0 otherwise
    pub prefix: u8,
    /// Mnemonic, e.g. `ldarg.s`
    pub mnemonic: &'static str,
    /// Control flow behavior
    pub flow_type: FlowType,
    /// Operand
    pub operand: Operand,
    /// Stack effect
    pub stack_behavior: StackBehavior,
    /// Absolute branch targets
    pub branch_targets: Vec<u64>,
}

impl Instruction {
    /// True for branches, `leave` included.
    #[must_use]
    pub fn is_branch(&self) -> bool {
        matches!(
            self.flow_type,
            FlowType::ConditionalBranch | FlowType::UnconditionalBranch | FlowType::Leave
        )
    }

    /// True if control never falls through to the next instruction.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.flow_type,
            FlowType::UnconditionalBranch
                | FlowType::Return
                | FlowType::Throw
                | FlowType::EndFinally
                | FlowType::Leave
        )
    }

    /// Offset of the following instruction.
    #[must_use]
    pub fn next_offset(&self) -> u64 {
        self.offset + self.size
    }

    /// The branch target, for single-target branches.
    #[must_use]
    pub fn branch_target(&self) -> Option<u64> {
        self.branch_targets.first().copied()
    }

    /// The operand as a sign-extended integer.
    #[must_use]
    pub fn int_operand(&self) -> Option<i64> {
        self.operand.immediate().and_then(|imm| imm.as_i64())
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04x}: {}", self.offset, self.mnemonic)?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Immediate(imm) => write!(f, " {imm:?}"),
            Operand::Target(target) => write!(f, " IL_{target:04x}"),
            Operand::Token(token) => write!(f, " {token}"),
        }
    }
}
