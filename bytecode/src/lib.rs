mod builder;
mod decoder;
mod instruction;
mod op;

pub use builder::{BytecodeBuilder, Label};
pub use decoder::{BytecodeDecoder, DecodeError, decode_at};
pub use instruction::Instruction;
pub use op::Op;

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Vec<Instruction> {
        BytecodeDecoder::new(bytes)
            .map(|r| r.unwrap().1)
            .collect()
    }

    #[test]
    fn decodes_every_operand_shape() {
        let mut b = BytecodeBuilder::new();
        b.push_argument(0, 0);
        b.push_local(2, 1);
        b.push_field(3);
        b.push_constant(4);
        b.push_global(5);
        b.push_block(6);
        b.send(7, 3);
        b.pop_local(1, 2);
        b.pop_argument(1, 0);
        b.pop_field(3);
        b.push_self();
        b.unary_send(8);
        b.super_send(9, 1);
        b.inc();
        b.dec();
        b.dup();
        b.pop();
        b.return_local();
        b.return_non_local();
        b.return_self();
        b.halt();

        assert_eq!(decode_all(b.as_bytes()), vec![
            Instruction::PushArgument { index: 0, context: 0 },
            Instruction::PushLocal { index: 2, context: 1 },
            Instruction::PushField { field: 3 },
            Instruction::PushConstant { literal: 4 },
            Instruction::PushGlobal { literal: 5 },
            Instruction::PushBlock { literal: 6 },
            Instruction::Send { literal: 7 },
            Instruction::PopLocal { index: 1, context: 2 },
            Instruction::PopArgument { index: 1, context: 0 },
            Instruction::PopField { field: 3 },
            Instruction::PushSelf,
            Instruction::UnarySend { literal: 8 },
            Instruction::SuperSend { literal: 9 },
            Instruction::Inc,
            Instruction::Dec,
            Instruction::Dup,
            Instruction::Pop,
            Instruction::ReturnLocal,
            Instruction::ReturnNonLocal,
            Instruction::ReturnSelf,
            Instruction::Halt,
        ]);
    }

    #[test]
    fn current_frame_accesses_use_single_byte_forms() {
        let mut b = BytecodeBuilder::new();
        b.push_local(0, 0);
        b.push_local(2, 0);
        b.push_local(3, 0);
        b.push_argument(0, 0);
        b.push_argument(2, 0);
        b.push_argument(1, 1);
        b.push_field(1);
        b.push_field(2);
        b.pop_local(1, 0);
        b.pop_field(0);
        b.inc_field(4);
        b.inc_field_push(1);
        b.return_field(2);
        b.return_field(3);

        assert_eq!(decode_all(b.as_bytes()), vec![
            Instruction::PushLocal0,
            Instruction::PushLocal2,
            Instruction::PushLocal { index: 3, context: 0 },
            Instruction::PushArgument { index: 0, context: 0 },
            Instruction::PushArgument2,
            Instruction::PushArgument { index: 1, context: 1 },
            Instruction::PushField1,
            Instruction::PushField { field: 2 },
            Instruction::PopLocal1,
            Instruction::PopField0,
            Instruction::IncField { field: 4 },
            Instruction::IncFieldPush { field: 1 },
            Instruction::ReturnField2,
            Instruction::PushField { field: 3 },
            Instruction::ReturnLocal,
        ]);
        assert_eq!(b.max_depth(), 8);
    }

    #[test]
    fn widths_match_encoding() {
        for byte in 0..Op::COUNT as u8 {
            let op = Op::try_from(byte).unwrap();
            let mut bytes = vec![byte];
            bytes.resize(op.width(), 0);
            let instr = decode_at(&bytes, 0).unwrap();
            assert_eq!(instr.op(), op);
            assert_eq!(instr.width(), op.width());
            assert!(matches!(op.width(), 1 | 2 | 3 | 5));
        }
    }

    #[test]
    fn forward_jump() {
        let mut b = BytecodeBuilder::new();
        b.push_constant(0);
        let label = b.jump_if_false();
        b.push_constant(1);
        b.pop();
        b.bind(label);
        b.return_self();

        let bytes = b.into_bytes();
        let instrs: Vec<_> = BytecodeDecoder::new(&bytes).map(Result::unwrap).collect();
        let (at, jump) = instrs[1];
        assert_eq!(jump, Instruction::JumpIfFalse { offset: 3 });
        assert_eq!(jump.jump_target(at), Some(instrs[4].0));
    }

    #[test]
    fn backward_jump() {
        let mut b = BytecodeBuilder::new();
        let top = b.current_offset();
        b.push_constant(0);
        b.pop();
        b.jump_back(top);

        let bytes = b.into_bytes();
        let (at, jump) = BytecodeDecoder::new(&bytes).last().unwrap().unwrap();
        assert_eq!(jump, Instruction::Jump { offset: -8 });
        assert_eq!(jump.jump_target(at), Some(top));
    }

    #[test]
    fn stack_depth_tracking() {
        let mut b = BytecodeBuilder::new();
        b.push_self();
        b.push_constant(0);
        b.push_constant(1);
        assert_eq!(b.depth(), 3);
        b.send(2, 3);
        assert_eq!(b.depth(), 1);
        b.unary_send(3);
        assert_eq!(b.depth(), 1);
        b.return_local();
        assert_eq!(b.max_depth(), 3);
    }

    #[test]
    fn branches_join_at_larger_depth() {
        let mut b = BytecodeBuilder::new();
        b.push_constant(0); // limit
        b.push_constant(1); // counter
        let exit = b.jump_if_greater();
        b.dup();
        b.pop();
        b.inc();
        assert_eq!(b.depth(), 2);
        b.bind(exit);
        assert_eq!(b.depth(), 2);
        assert_eq!(b.max_depth(), 3);
    }

    #[test]
    fn display_instructions() {
        assert_eq!(Instruction::PushLocal { index: 1, context: 2 }.to_string(), "PUSH_LOCAL 1, 2");
        assert_eq!(Instruction::Send { literal: 4 }.to_string(), "SEND #4");
        assert_eq!(Instruction::Jump { offset: -12 }.to_string(), "JUMP -12");
        assert_eq!(Instruction::JumpIfTrue { offset: 7 }.to_string(), "JUMP_IF_TRUE +7");
        assert_eq!(Instruction::Halt.to_string(), "HALT");
        assert_eq!(Instruction::IncFieldPush { field: 2 }.to_string(), "INC_FIELD_PUSH 2");
        assert_eq!(Instruction::PopLocal0.to_string(), "POP_LOCAL_0");
    }

    #[test]
    fn mnemonics_round_trip() {
        for byte in 0..Op::COUNT as u8 {
            let op = Op::try_from(byte).unwrap();
            assert_eq!(Op::from_mnemonic(op.mnemonic()), Some(op));
        }
        assert_eq!(Op::from_mnemonic("push_self"), Some(Op::PushSelf));
        assert_eq!(Op::from_mnemonic("nope"), None);
    }

    #[test]
    fn invalid_opcode_is_reported() {
        let bytes = [Op::Dup as u8, 0xEE];
        let mut d = BytecodeDecoder::new(&bytes);
        assert!(d.next().unwrap().is_ok());
        assert_eq!(
            d.next().unwrap(),
            Err(DecodeError::InvalidOpcode { offset: 1, byte: 0xEE })
        );
        assert!(d.next().is_none());
    }

    #[test]
    fn truncated_operands_are_reported() {
        let bytes = [Op::Jump as u8, 0, 0];
        assert_eq!(
            decode_at(&bytes, 0),
            Err(DecodeError::Truncated { offset: 0, op: Op::Jump })
        );
    }
}
