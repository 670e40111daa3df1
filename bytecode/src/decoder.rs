use thiserror::Error;

use crate::instruction::Instruction;
use crate::op::Op;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid opcode 0x{byte:02x} at {offset}")]
    InvalidOpcode { offset: usize, byte: u8 },
    #[error("truncated {op:?} at {offset}")]
    Truncated { offset: usize, op: Op },
}

/// Decode the instruction starting at `offset`.
pub fn decode_at(bytes: &[u8], offset: usize) -> Result<Instruction, DecodeError> {
    let byte = *bytes.get(offset).ok_or(DecodeError::Truncated {
        offset,
        op: Op::Halt,
    })?;
    let op = Op::try_from(byte).map_err(|byte| DecodeError::InvalidOpcode { offset, byte })?;
    let operands = bytes
        .get(offset + 1..offset + op.width())
        .ok_or(DecodeError::Truncated { offset, op })?;

    let u = |i: usize| operands[i];
    let i32_at = || i32::from_le_bytes([operands[0], operands[1], operands[2], operands[3]]);

    Ok(match op {
        Op::Halt => Instruction::Halt,
        Op::Dup => Instruction::Dup,
        Op::PushLocal => Instruction::PushLocal {
            index: u(0),
            context: u(1),
        },
        Op::PushArgument => Instruction::PushArgument {
            index: u(0),
            context: u(1),
        },
        Op::PushField => Instruction::PushField { field: u(0) },
        Op::PushBlock => Instruction::PushBlock { literal: u(0) },
        Op::PushConstant => Instruction::PushConstant { literal: u(0) },
        Op::PushGlobal => Instruction::PushGlobal { literal: u(0) },
        Op::Pop => Instruction::Pop,
        Op::PopLocal => Instruction::PopLocal {
            index: u(0),
            context: u(1),
        },
        Op::PopArgument => Instruction::PopArgument {
            index: u(0),
            context: u(1),
        },
        Op::PopField => Instruction::PopField { field: u(0) },
        Op::Send => Instruction::Send { literal: u(0) },
        Op::SuperSend => Instruction::SuperSend { literal: u(0) },
        Op::UnarySend => Instruction::UnarySend { literal: u(0) },
        Op::ReturnLocal => Instruction::ReturnLocal,
        Op::ReturnNonLocal => Instruction::ReturnNonLocal,
        Op::JumpIfFalse => Instruction::JumpIfFalse { offset: i32_at() },
        Op::JumpIfTrue => Instruction::JumpIfTrue { offset: i32_at() },
        Op::Jump => Instruction::Jump { offset: i32_at() },
        Op::JumpIfGreater => Instruction::JumpIfGreater { offset: i32_at() },
        Op::Inc => Instruction::Inc,
        Op::Dec => Instruction::Dec,
        Op::PushSelf => Instruction::PushSelf,
        Op::ReturnSelf => Instruction::ReturnSelf,
        Op::PushLocal0 => Instruction::PushLocal0,
        Op::PushLocal1 => Instruction::PushLocal1,
        Op::PushLocal2 => Instruction::PushLocal2,
        Op::PushArgument1 => Instruction::PushArgument1,
        Op::PushArgument2 => Instruction::PushArgument2,
        Op::PushField0 => Instruction::PushField0,
        Op::PushField1 => Instruction::PushField1,
        Op::PopLocal0 => Instruction::PopLocal0,
        Op::PopLocal1 => Instruction::PopLocal1,
        Op::PopLocal2 => Instruction::PopLocal2,
        Op::PopField0 => Instruction::PopField0,
        Op::PopField1 => Instruction::PopField1,
        Op::ReturnField0 => Instruction::ReturnField0,
        Op::ReturnField1 => Instruction::ReturnField1,
        Op::ReturnField2 => Instruction::ReturnField2,
        Op::IncField => Instruction::IncField { field: u(0) },
        Op::IncFieldPush => Instruction::IncFieldPush { field: u(0) },
    })
}

/// Decodes a bytecode byte slice into [`Instruction`]s, front to back.
///
/// Iteration stops after the first error.
pub struct BytecodeDecoder<'a> {
    bytes: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> BytecodeDecoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            failed: false,
        }
    }

    /// Current byte offset in the stream.
    #[inline(always)]
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// Whether the decoder has reached the end of the bytecode.
    #[inline(always)]
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// Decode the next instruction together with its offset, or `None` at
    /// end-of-stream.
    pub fn decode_next(&mut self) -> Option<Result<(usize, Instruction), DecodeError>> {
        if self.is_at_end() || self.failed {
            return None;
        }
        let at = self.pos;
        match decode_at(self.bytes, at) {
            Ok(instr) => {
                self.pos += instr.width();
                Some(Ok((at, instr)))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

impl Iterator for BytecodeDecoder<'_> {
    type Item = Result<(usize, Instruction), DecodeError>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.decode_next()
    }
}
