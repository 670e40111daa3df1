/// Bytecode opcodes.
///
/// Every opcode is one byte followed by a fixed number of inline operand
/// bytes, so the encoded width depends only on the opcode. Local and
/// argument accesses carry a context level: the number of lexical-context
/// hops from the current frame to the frame that owns the variable.
/// Literal operands index the method's literal table. Jump displacements are
/// little-endian `i32`, relative to the end of the jump instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    /// Stop the dispatch loop and return the top of the stack.
    Halt = 0x00,

    /// Duplicate the top of the stack.
    Dup,

    /// Operands: `index:u8`, `context:u8`
    PushLocal,

    /// Operands: `index:u8`, `context:u8`. Argument 0 is the receiver.
    PushArgument,

    /// Push a field of the receiver.
    /// Operands: `field:u8`
    PushField,

    /// Create a block from a block method literal, capturing the current frame.
    /// Operands: `literal:u8`
    PushBlock,

    /// Operands: `literal:u8`
    PushConstant,

    /// Push the value of a global. The literal holds the global's name, or
    /// its association once resolved.
    /// Operands: `literal:u8`
    PushGlobal,

    /// Discard the top of the stack.
    Pop,

    /// Operands: `index:u8`, `context:u8`
    PopLocal,

    /// Operands: `index:u8`, `context:u8`
    PopArgument,

    /// Operands: `field:u8`
    PopField,

    /// Send the selector literal to the receiver below the arguments.
    /// Operands: `literal:u8`
    Send,

    /// Send, starting lookup in the superclass of the method's holder.
    /// Operands: `literal:u8`
    SuperSend,

    /// Send of a selector without arguments.
    /// Operands: `literal:u8`
    UnarySend,

    /// Return the top of the stack to the caller.
    ReturnLocal,

    /// Return the top of the stack from the enclosing method activation.
    ReturnNonLocal,

    /// Pop; jump if the value is `false`.
    /// Operands: `offset:i32`
    JumpIfFalse,

    /// Pop; jump if the value is `true`.
    /// Operands: `offset:i32`
    JumpIfTrue,

    /// Operands: `offset:i32`
    Jump,

    /// Jump if the top of the stack is greater than the element below it,
    /// popping both. Falls through without popping otherwise.
    /// Operands: `offset:i32`
    JumpIfGreater,

    /// Add one to the top of the stack.
    Inc,

    /// Subtract one from the top of the stack.
    Dec,

    /// Push the receiver of the enclosing method activation.
    PushSelf,

    /// Return the receiver from a method activation.
    ReturnSelf,

    // Single-byte forms of common accesses in the current frame.
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

    /// Return a field of self from the current activation.
    ReturnField0,
    ReturnField1,
    ReturnField2,

    /// Add one to a field of self.
    /// Operands: `field:u8`
    IncField,

    /// Add one to a field of self and push the new value.
    /// Operands: `field:u8`
    IncFieldPush,
}

impl Op {
    pub const COUNT: usize = Op::IncFieldPush as usize + 1;

    /// Encoded size in bytes, opcode included.
    pub const fn width(self) -> usize {
        match self {
            Op::Halt
            | Op::Dup
            | Op::Pop
            | Op::ReturnLocal
            | Op::ReturnNonLocal
            | Op::Inc
            | Op::Dec
            | Op::PushSelf
            | Op::ReturnSelf
            | Op::PushLocal0
            | Op::PushLocal1
            | Op::PushLocal2
            | Op::PushArgument1
            | Op::PushArgument2
            | Op::PushField0
            | Op::PushField1
            | Op::PopLocal0
            | Op::PopLocal1
            | Op::PopLocal2
            | Op::PopField0
            | Op::PopField1
            | Op::ReturnField0
            | Op::ReturnField1
            | Op::ReturnField2 => 1,
            Op::PushField
            | Op::PushBlock
            | Op::PushConstant
            | Op::PushGlobal
            | Op::PopField
            | Op::Send
            | Op::SuperSend
            | Op::UnarySend
            | Op::IncField
            | Op::IncFieldPush => 2,
            Op::PushLocal | Op::PushArgument | Op::PopLocal | Op::PopArgument => 3,
            Op::JumpIfFalse | Op::JumpIfTrue | Op::Jump | Op::JumpIfGreater => 5,
        }
    }

    /// Whether the handler may allocate, making the end of the instruction
    /// a collection safepoint.
    pub const fn may_allocate(self) -> bool {
        matches!(
            self,
            Op::PushBlock
                | Op::PushGlobal
                | Op::Send
                | Op::SuperSend
                | Op::UnarySend
                | Op::ReturnNonLocal
                | Op::Inc
                | Op::Dec
                | Op::IncField
                | Op::IncFieldPush
        )
    }

    /// Whether the instruction leaves the current activation.
    pub const fn is_return(self) -> bool {
        matches!(
            self,
            Op::Halt
                | Op::ReturnLocal
                | Op::ReturnNonLocal
                | Op::ReturnSelf
                | Op::ReturnField0
                | Op::ReturnField1
                | Op::ReturnField2
        )
    }

    pub const fn is_jump(self) -> bool {
        matches!(
            self,
            Op::JumpIfFalse | Op::JumpIfTrue | Op::Jump | Op::JumpIfGreater
        )
    }

    /// Whether the first operand indexes the literal table.
    pub const fn has_literal(self) -> bool {
        matches!(
            self,
            Op::PushBlock
                | Op::PushConstant
                | Op::PushGlobal
                | Op::Send
                | Op::SuperSend
                | Op::UnarySend
        )
    }

    pub const fn mnemonic(self) -> &'static str {
        match self {
            Op::Halt => "HALT",
            Op::Dup => "DUP",
            Op::PushLocal => "PUSH_LOCAL",
            Op::PushArgument => "PUSH_ARGUMENT",
            Op::PushField => "PUSH_FIELD",
            Op::PushBlock => "PUSH_BLOCK",
            Op::PushConstant => "PUSH_CONSTANT",
            Op::PushGlobal => "PUSH_GLOBAL",
            Op::Pop => "POP",
            Op::PopLocal => "POP_LOCAL",
            Op::PopArgument => "POP_ARGUMENT",
            Op::PopField => "POP_FIELD",
            Op::Send => "SEND",
            Op::SuperSend => "SUPER_SEND",
            Op::UnarySend => "UNARY_SEND",
            Op::ReturnLocal => "RETURN_LOCAL",
            Op::ReturnNonLocal => "RETURN_NON_LOCAL",
            Op::JumpIfFalse => "JUMP_IF_FALSE",
            Op::JumpIfTrue => "JUMP_IF_TRUE",
            Op::Jump => "JUMP",
            Op::JumpIfGreater => "JUMP_IF_GREATER",
            Op::Inc => "INC",
            Op::Dec => "DEC",
            Op::PushSelf => "PUSH_SELF",
            Op::ReturnSelf => "RETURN_SELF",
            Op::PushLocal0 => "PUSH_LOCAL_0",
            Op::PushLocal1 => "PUSH_LOCAL_1",
            Op::PushLocal2 => "PUSH_LOCAL_2",
            Op::PushArgument1 => "PUSH_ARGUMENT_1",
            Op::PushArgument2 => "PUSH_ARGUMENT_2",
            Op::PushField0 => "PUSH_FIELD_0",
            Op::PushField1 => "PUSH_FIELD_1",
            Op::PopLocal0 => "POP_LOCAL_0",
            Op::PopLocal1 => "POP_LOCAL_1",
            Op::PopLocal2 => "POP_LOCAL_2",
            Op::PopField0 => "POP_FIELD_0",
            Op::PopField1 => "POP_FIELD_1",
            Op::ReturnField0 => "RETURN_FIELD_0",
            Op::ReturnField1 => "RETURN_FIELD_1",
            Op::ReturnField2 => "RETURN_FIELD_2",
            Op::IncField => "INC_FIELD",
            Op::IncFieldPush => "INC_FIELD_PUSH",
        }
    }

    /// The single-byte form of `kind` with `index` in the current frame,
    /// if there is one.
    pub const fn short_form(kind: Op, index: u8) -> Option<Op> {
        Some(match (kind, index) {
            (Op::PushLocal, 0) => Op::PushLocal0,
            (Op::PushLocal, 1) => Op::PushLocal1,
            (Op::PushLocal, 2) => Op::PushLocal2,
            (Op::PushArgument, 1) => Op::PushArgument1,
            (Op::PushArgument, 2) => Op::PushArgument2,
            (Op::PushField, 0) => Op::PushField0,
            (Op::PushField, 1) => Op::PushField1,
            (Op::PopLocal, 0) => Op::PopLocal0,
            (Op::PopLocal, 1) => Op::PopLocal1,
            (Op::PopLocal, 2) => Op::PopLocal2,
            (Op::PopField, 0) => Op::PopField0,
            (Op::PopField, 1) => Op::PopField1,
            _ => return None,
        })
    }

    /// The op returning field `field` of self, for the first three fields.
    pub const fn return_field(field: u8) -> Option<Op> {
        match field {
            0 => Some(Op::ReturnField0),
            1 => Some(Op::ReturnField1),
            2 => Some(Op::ReturnField2),
            _ => None,
        }
    }

    /// Parse a mnemonic, case-insensitively.
    pub fn from_mnemonic(name: &str) -> Option<Self> {
        (0..Self::COUNT as u8)
            .filter_map(|b| Op::try_from(b).ok())
            .find(|op| op.mnemonic().eq_ignore_ascii_case(name))
    }
}

impl TryFrom<u8> for Op {
    type Error = u8;

    #[inline(always)]
    fn try_from(byte: u8) -> Result<Self, u8> {
        if byte < Self::COUNT as u8 {
            // SAFETY: Op is repr(u8) with contiguous variants starting at 0.
            Ok(unsafe { core::mem::transmute::<u8, Op>(byte) })
        } else {
            Err(byte)
        }
    }
}
