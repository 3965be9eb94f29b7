//! CIL instruction encoding.
//!
//! The encoder is the reverse of the decoder and uses the same opcode tables. Branches refer
//! to named labels; offsets are patched in [`InstructionEncoder::finalize`]. While emitting,
//! the encoder tracks the evaluation stack depth so the resulting body can declare a correct
//! `max_stack`.
//!
//! ```rust,no_run
//! use cilplant::assembly::InstructionEncoder;
//!
//! let mut encoder = InstructionEncoder::new();
//! encoder.emit_instruction("ldarg.0", None)?;
//! encoder.emit_branch("brfalse.s", "zero")?;
//! encoder.emit_instruction("ldc.i4.1", None)?;
//! encoder.emit_instruction("ret", None)?;
//! encoder.define_label("zero")?;
//! encoder.emit_instruction("ldc.i4.0", None)?;
//! encoder.emit_instruction("ret", None)?;
//!
//! let (bytecode, max_stack, _labels) = encoder.finalize()?;
//! # Ok::<(), cilplant::Error>(())
//! ```

use std::{collections::HashMap, sync::OnceLock};

use crate::{
    assembly::{
        instruction::{FlowType, Immediate, Operand, OperandType},
        instructions::{CilInstruction, FE_PREFIX, INSTRUCTIONS, INSTRUCTIONS_FE},
    },
    Error, Result,
};

type MnemonicEntry = (u8, u8, &'static CilInstruction);

static MNEMONIC_TO_OPCODE: OnceLock<HashMap<&'static str, MnemonicEntry>> = OnceLock::new();

fn get_mnemonic_lookup() -> &'static HashMap<&'static str, MnemonicEntry> {
    MNEMONIC_TO_OPCODE.get_or_init(|| {
        let mut map = HashMap::new();

        for (opcode, instr) in INSTRUCTIONS.iter().enumerate() {
            if let (false, Ok(opcode)) = (instr.instr.is_empty(), u8::try_from(opcode)) {
                map.insert(instr.instr, (opcode, 0, instr));
            }
        }

        for (opcode, instr) in INSTRUCTIONS_FE.iter().enumerate() {
            if let (false, Ok(opcode)) = (instr.instr.is_empty(), u8::try_from(opcode)) {
                map.insert(instr.instr, (opcode, FE_PREFIX, instr));
            }
        }

        map
    })
}

/// Looks up the opcode metadata of a mnemonic.
pub(crate) fn lookup(mnemonic: &str) -> Result<MnemonicEntry> {
    get_mnemonic_lookup()
        .get(mnemonic)
        .copied()
        .ok_or_else(|| Error::InvalidMnemonic(mnemonic.to_string()))
}

/// An unresolved branch offset.
#[derive(Debug, Clone)]
struct LabelFixup {
    label: String,
    fixup_position: usize,
    /// 1 or 4
    offset_size: u8,
}

/// Low level CIL encoder with label resolution and stack depth tracking.
pub struct InstructionEncoder {
    bytecode: Vec<u8>,
    labels: HashMap<String, u32>,
    fixups: Vec<LabelFixup>,
    current_stack_depth: i16,
    max_stack_depth: u16,
    /// Expected depth at each label; every path reaching a label must agree.
    label_stack_depths: HashMap<String, i16>,
    /// Set after `ret`, `throw` and unconditional branches until the next label.
    unreachable: bool,
}

impl InstructionEncoder {
    /// Creates an empty encoder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bytecode: Vec::new(),
            labels: HashMap::new(),
            fixups: Vec::new(),
            current_stack_depth: 0,
            max_stack_depth: 0,
            label_stack_depths: HashMap::new(),
            unreachable: false,
        }
    }

    /// Emits an instruction with an optional operand.
    ///
    /// # Errors
    /// Returns [`Error::InvalidMnemonic`] for unknown mnemonics,
    /// [`Error::WrongOperandType`] / [`Error::UnexpectedOperand`] for operand mismatches and
    /// [`Error::Malformed`] on stack underflow.
    pub fn emit_instruction(&mut self, mnemonic: &str, operand: Option<Operand>) -> Result<()> {
        let (opcode, prefix, metadata) = lookup(mnemonic)?;

        if prefix != 0 {
            self.bytecode.push(prefix);
        }
        self.bytecode.push(opcode);
        self.emit_operand(operand, metadata.op_type)?;

        self.update_stack_depth(metadata.stack_pops, metadata.stack_pushes)
            .map_err(|e| malformed_error!("Stack error at instruction '{}': {}", mnemonic, e))?;

        if matches!(
            metadata.flow,
            FlowType::Return | FlowType::Throw | FlowType::EndFinally
        ) {
            self.unreachable = true;
        }

        Ok(())
    }

    /// Emits a branch to `label`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidBranch`] if `mnemonic` is not a branch.
    pub fn emit_branch(&mut self, mnemonic: &str, label: &str) -> Result<()> {
        let (opcode, prefix, metadata) = lookup(mnemonic)?;

        if !matches!(
            metadata.flow,
            FlowType::ConditionalBranch | FlowType::UnconditionalBranch | FlowType::Leave
        ) {
            return Err(Error::InvalidBranch(format!(
                "instruction '{mnemonic}' is not a branch instruction"
            )));
        }

        if prefix != 0 {
            self.bytecode.push(prefix);
        }
        self.bytecode.push(opcode);

        let offset_size = match metadata.op_type {
            OperandType::Int8 => 1,
            OperandType::Int32 => 4,
            _ => {
                return Err(Error::InvalidBranch(
                    "operand type must be Int8 or Int32".to_string(),
                ))
            }
        };

        self.fixups.push(LabelFixup {
            label: label.to_string(),
            fixup_position: self.bytecode.len(),
            offset_size,
        });
        self.bytecode
            .extend(std::iter::repeat(0).take(offset_size as usize));

        self.update_stack_depth(metadata.stack_pops, metadata.stack_pushes)
            .map_err(|e| {
                malformed_error!("Stack error at branch '{}' to '{}': {}", mnemonic, label, e)
            })?;

        if metadata.flow == FlowType::Leave {
            // leave empties the evaluation stack
            self.current_stack_depth = 0;
        }
        self.record_label_stack_depth(label)?;

        if matches!(
            metadata.flow,
            FlowType::UnconditionalBranch | FlowType::Leave
        ) {
            self.unreachable = true;
        }

        Ok(())
    }

    /// Emits `call`, `callvirt` or `newobj` with an explicit stack effect.
    ///
    /// `num_args` includes the receiver of instance calls. `newobj` callers pass the
    /// constructor's parameter count and `has_result = true`.
    ///
    /// # Errors
    /// Returns an error if the mnemonic is unknown or the operand is not a token.
    pub fn emit_call(
        &mut self,
        mnemonic: &str,
        operand: Option<Operand>,
        num_args: u8,
        has_result: bool,
    ) -> Result<()> {
        let (opcode, prefix, metadata) = lookup(mnemonic)?;
        if metadata.flow != FlowType::Call {
            return Err(Error::InvalidMnemonic(format!("{mnemonic} is not a call")));
        }

        if prefix != 0 {
            self.bytecode.push(prefix);
        }
        self.bytecode.push(opcode);
        self.emit_operand(operand, metadata.op_type)?;

        self.update_stack_depth(num_args, u8::from(has_result))
            .map_err(|e| malformed_error!("Stack error at call '{}': {}", mnemonic, e))
    }

    /// Defines `name` at the current position.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateLabel`] for redefinitions and [`Error::Malformed`] if the
    /// fall-through depth disagrees with the depth recorded by earlier branches.
    pub fn define_label(&mut self, name: &str) -> Result<()> {
        if self.labels.contains_key(name) {
            return Err(Error::DuplicateLabel(name.to_string()));
        }

        if let Some(&expected) = self.label_stack_depths.get(name) {
            if self.unreachable {
                self.current_stack_depth = expected;
            } else if self.current_stack_depth != expected {
                return Err(malformed_error!(
                    "Stack depth mismatch at label '{}': expected {} (from branch), got {} (current)",
                    name,
                    expected,
                    self.current_stack_depth
                ));
            }
        } else if !self.unreachable {
            self.label_stack_depths
                .insert(name.to_string(), self.current_stack_depth);
        } else {
            self.current_stack_depth = 0;
        }

        self.unreachable = false;

        let position = u32::try_from(self.bytecode.len())
            .map_err(|_| malformed_error!("Bytecode length exceeds u32 range"))?;
        self.labels.insert(name.to_string(), position);
        Ok(())
    }

    /// Number of bytes emitted so far.
    #[must_use]
    pub fn current_position(&self) -> usize {
        self.bytecode.len()
    }

    /// Maximum stack depth reached so far.
    #[must_use]
    pub fn max_stack_depth(&self) -> u16 {
        self.max_stack_depth
    }

    /// Current stack depth.
    #[must_use]
    pub fn current_stack_depth(&self) -> i16 {
        self.current_stack_depth
    }

    /// Defines the entry of a catch handler at the current position.
    ///
    /// A handler is entered only through the exception edge, with the exception object as the
    /// single stack item; whatever precedes it in the code does not flow into it.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateLabel`] for redefinitions and [`Error::Malformed`] if a branch
    /// targets the handler.
    pub fn define_handler_label(&mut self, name: &str) -> Result<()> {
        if self.labels.contains_key(name) {
            return Err(Error::DuplicateLabel(name.to_string()));
        }
        if self.label_stack_depths.contains_key(name) {
            return Err(malformed_error!("Branch into handler '{}'", name));
        }

        self.label_stack_depths.insert(name.to_string(), 1);
        self.current_stack_depth = 1;
        self.max_stack_depth = self.max_stack_depth.max(1);
        self.unreachable = false;

        let position = u32::try_from(self.bytecode.len())
            .map_err(|_| malformed_error!("Bytecode length exceeds u32 range"))?;
        self.labels.insert(name.to_string(), position);
        Ok(())
    }

    /// Resolves all labels and returns the bytecode, the maximum stack depth and the label
    /// positions.
    ///
    /// # Errors
    /// Returns [`Error::UndefinedLabel`] for branches to undefined labels and
    /// [`Error::InvalidBranch`] for short branch offsets out of range.
    pub fn finalize(mut self) -> Result<(Vec<u8>, u16, HashMap<String, u32>)> {
        let fixups = std::mem::take(&mut self.fixups);
        for fixup in &fixups {
            let label_position = self
                .labels
                .get(&fixup.label)
                .ok_or_else(|| Error::UndefinedLabel(fixup.label.clone()))?;

            let next_instruction_pos = fixup.fixup_position + fixup.offset_size as usize;
            let label_pos = i64::from(*label_position);
            let next_pos = i64::try_from(next_instruction_pos)
                .map_err(|_| malformed_error!("Instruction position exceeds i64 range"))?;
            let offset = i32::try_from(label_pos - next_pos)
                .map_err(|_| Error::InvalidBranch("offset exceeds i32 range".to_string()))?;

            self.write_branch_offset(offset, fixup)?;
        }

        Ok((self.bytecode, self.max_stack_depth, self.labels))
    }

    fn emit_operand(&mut self, operand: Option<Operand>, expected: OperandType) -> Result<()> {
        let wrong = |name: &str| Error::WrongOperandType {
            expected: name.to_string(),
        };

        match (expected, operand) {
            (OperandType::None, None) => {}
            (OperandType::None, Some(_)) => return Err(Error::UnexpectedOperand),
            (OperandType::Int8, Some(Operand::Immediate(Immediate::Int8(v)))) => {
                self.bytecode.extend_from_slice(&v.to_le_bytes());
            }
            (OperandType::UInt8, Some(Operand::Immediate(Immediate::UInt8(v)))) => {
                self.bytecode.push(v);
            }
            (OperandType::Int16, Some(Operand::Immediate(Immediate::Int16(v)))) => {
                self.bytecode.extend_from_slice(&v.to_le_bytes());
            }
            (OperandType::UInt16, Some(Operand::Immediate(Immediate::UInt16(v)))) => {
                self.bytecode.extend_from_slice(&v.to_le_bytes());
            }
            (OperandType::Int32, Some(Operand::Immediate(Immediate::Int32(v)))) => {
                self.bytecode.extend_from_slice(&v.to_le_bytes());
            }
            (OperandType::UInt32, Some(Operand::Immediate(Immediate::UInt32(v)))) => {
                self.bytecode.extend_from_slice(&v.to_le_bytes());
            }
            (OperandType::Int64, Some(Operand::Immediate(Immediate::Int64(v)))) => {
                self.bytecode.extend_from_slice(&v.to_le_bytes());
            }
            (OperandType::UInt64, Some(Operand::Immediate(Immediate::UInt64(v)))) => {
                self.bytecode.extend_from_slice(&v.to_le_bytes());
            }
            (OperandType::Float32, Some(Operand::Immediate(Immediate::Float32(v)))) => {
                self.bytecode.extend_from_slice(&v.to_le_bytes());
            }
            (OperandType::Float64, Some(Operand::Immediate(Immediate::Float64(v)))) => {
                self.bytecode.extend_from_slice(&v.to_le_bytes());
            }
            (OperandType::Token, Some(Operand::Token(token))) => {
                self.bytecode.extend_from_slice(&token.value().to_le_bytes());
            }
            (expected, _) => return Err(wrong(&format!("{expected:?}"))),
        }
        Ok(())
    }

    fn write_branch_offset(&mut self, offset: i32, fixup: &LabelFixup) -> Result<()> {
        match fixup.offset_size {
            1 => {
                let offset_i8 = i8::try_from(offset).map_err(|_| {
                    Error::InvalidBranch(format!(
                        "offset {offset} out of range for 1-byte instruction"
                    ))
                })?;
                self.bytecode[fixup.fixup_position] = offset_i8.to_le_bytes()[0];
            }
            4 => {
                self.bytecode[fixup.fixup_position..fixup.fixup_position + 4]
                    .copy_from_slice(&offset.to_le_bytes());
            }
            size => {
                return Err(Error::InvalidBranch(format!(
                    "invalid offset size: {size} bytes"
                )))
            }
        }
        Ok(())
    }

    fn update_stack_depth(&mut self, pops: u8, pushes: u8) -> Result<()> {
        self.current_stack_depth += i16::from(pushes) - i16::from(pops);

        if self.current_stack_depth < 0 {
            if !self.unreachable {
                return Err(malformed_error!(
                    "Stack underflow: depth became {} after instruction with {} pops, {} pushes",
                    self.current_stack_depth,
                    pops,
                    pushes
                ));
            }
            self.current_stack_depth = 0;
        }

        let depth = u16::try_from(self.current_stack_depth)
            .map_err(|_| malformed_error!("Stack depth exceeds u16 range"))?;
        self.max_stack_depth = self.max_stack_depth.max(depth);
        Ok(())
    }

    fn record_label_stack_depth(&mut self, label: &str) -> Result<()> {
        if self.unreachable {
            return Ok(());
        }

        match self.label_stack_depths.get(label) {
            Some(&expected) if expected != self.current_stack_depth => Err(malformed_error!(
                "Stack depth mismatch for branch to '{}': expected {}, but branch has {}",
                label,
                expected,
                self.current_stack_depth
            )),
            Some(_) => Ok(()),
            None => {
                self.label_stack_depths
                    .insert(label.to_string(), self.current_stack_depth);
                Ok(())
            }
        }
    }
}

impl Default for InstructionEncoder {
    fn default() -> Self {
        Self::new()
    }
}
