use core::fmt;

use crate::op::Op;

/// A decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Halt,
    Dup,
    PushLocal { index: u8, context: u8 },
    PushArgument { index: u8, context: u8 },
    PushField { field: u8 },
    PushBlock { literal: u8 },
    PushConstant { literal: u8 },
    PushGlobal { literal: u8 },
    Pop,
    PopLocal { index: u8, context: u8 },
    PopArgument { index: u8, context: u8 },
    PopField { field: u8 },
    Send { literal: u8 },
    SuperSend { literal: u8 },
    UnarySend { literal: u8 },
    ReturnLocal,
    ReturnNonLocal,
    JumpIfFalse { offset: i32 },
    JumpIfTrue { offset: i32 },
    Jump { offset: i32 },
    JumpIfGreater { offset: i32 },
    Inc,
    Dec,
    PushSelf,
    ReturnSelf,
    PushLocal0,
    PushLocal1,
    PushLocal2,
    PushArgument1,
    PushArgument2,
    PushField0,
    PushField1,
    PopLocal0,
    PopLocal1,
    PopLocal2,
    PopField0,
    PopField1,
    ReturnField0,
    ReturnField1,
    ReturnField2,
    IncField { field: u8 },
    IncFieldPush { field: u8 },
}

impl Instruction {
    pub fn op(&self) -> Op {
        match self {
            Self::Halt => Op::Halt,
            Self::Dup => Op::Dup,
            Self::PushLocal { .. } => Op::PushLocal,
            Self::PushArgument { .. } => Op::PushArgument,
            Self::PushField { .. } => Op::PushField,
            Self::PushBlock { .. } => Op::PushBlock,
            Self::PushConstant { .. } => Op::PushConstant,
            Self::PushGlobal { .. } => Op::PushGlobal,
            Self::Pop => Op::Pop,
            Self::PopLocal { .. } => Op::PopLocal,
            Self::PopArgument { .. } => Op::PopArgument,
            Self::PopField { .. } => Op::PopField,
            Self::Send { .. } => Op::Send,
            Self::SuperSend { .. } => Op::SuperSend,
            Self::UnarySend { .. } => Op::UnarySend,
            Self::ReturnLocal => Op::ReturnLocal,
            Self::ReturnNonLocal => Op::ReturnNonLocal,
            Self::JumpIfFalse { .. } => Op::JumpIfFalse,
            Self::JumpIfTrue { .. } => Op::JumpIfTrue,
            Self::Jump { .. } => Op::Jump,
            Self::JumpIfGreater { .. } => Op::JumpIfGreater,
            Self::Inc => Op::Inc,
            Self::Dec => Op::Dec,
            Self::PushSelf => Op::PushSelf,
            Self::ReturnSelf => Op::ReturnSelf,
            Self::PushLocal0 => Op::PushLocal0,
            Self::PushLocal1 => Op::PushLocal1,
            Self::PushLocal2 => Op::PushLocal2,
            Self::PushArgument1 => Op::PushArgument1,
            Self::PushArgument2 => Op::PushArgument2,
            Self::PushField0 => Op::PushField0,
            Self::PushField1 => Op::PushField1,
            Self::PopLocal0 => Op::PopLocal0,
            Self::PopLocal1 => Op::PopLocal1,
            Self::PopLocal2 => Op::PopLocal2,
            Self::PopField0 => Op::PopField0,
            Self::PopField1 => Op::PopField1,
            Self::ReturnField0 => Op::ReturnField0,
            Self::ReturnField1 => Op::ReturnField1,
            Self::ReturnField2 => Op::ReturnField2,
            Self::IncField { .. } => Op::IncField,
            Self::IncFieldPush { .. } => Op::IncFieldPush,
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.op().width()
    }

    /// Literal-table index referenced by this instruction, if any.
    pub fn literal(&self) -> Option<u8> {
        match *self {
            Self::PushBlock { literal }
            | Self::PushConstant { literal }
            | Self::PushGlobal { literal }
            | Self::Send { literal }
            | Self::SuperSend { literal }
            | Self::UnarySend { literal } => Some(literal),
            _ => None,
        }
    }

    /// Absolute jump target for an instruction located at `at`.
    pub fn jump_target(&self, at: usize) -> Option<usize> {
        match *self {
            Self::JumpIfFalse { offset }
            | Self::JumpIfTrue { offset }
            | Self::Jump { offset }
            | Self::JumpIfGreater { offset } => {
                let end = (at + self.width()) as i64;
                usize::try_from(end + offset as i64).ok()
            }
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.op().mnemonic();
        match self {
            Self::PushLocal { index, context }
            | Self::PushArgument { index, context }
            | Self::PopLocal { index, context }
            | Self::PopArgument { index, context } => {
                write!(f, "{name} {index}, {context}")
            }
            Self::PushField { field }
            | Self::PopField { field }
            | Self::IncField { field }
            | Self::IncFieldPush { field } => {
                write!(f, "{name} {field}")
            }
            Self::PushBlock { literal }
            | Self::PushConstant { literal }
            | Self::PushGlobal { literal }
            | Self::Send { literal }
            | Self::SuperSend { literal }
            | Self::UnarySend { literal } => write!(f, "{name} #{literal}"),
            Self::JumpIfFalse { offset }
            | Self::JumpIfTrue { offset }
            | Self::Jump { offset }
            | Self::JumpIfGreater { offset } => write!(f, "{name} {offset:+}"),
            _ => f.write_str(name),
        }
    }
}
