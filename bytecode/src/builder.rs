use crate::op::Op;

/// A forward jump whose offset has not yet been resolved.
///
/// Created by [`BytecodeBuilder::jump`] and the conditional variants.
/// Resolve it with [`BytecodeBuilder::bind`].
#[derive(Debug)]
#[must_use = "a label must be bound"]
pub struct Label {
    /// Position of the i32 offset bytes in the buffer.
    offset_pos: usize,
    /// Position right after the jump instruction (base for relative offset).
    base: usize,
    /// Stack depth on arrival at the target when the jump is taken.
    depth: usize,
}

/// Builds a bytecode byte sequence and tracks the operand-stack depth.
///
/// Every emit adjusts the tracked depth by the instruction's stack effect;
/// [`max_depth`](Self::max_depth) is the high-water mark a frame for the
/// method must reserve. At a bound label the depth is the larger of the
/// fall-through depth and the depth the jump arrives with.
pub struct BytecodeBuilder {
    buf: Vec<u8>,
    depth: usize,
    max_depth: usize,
}

impl BytecodeBuilder {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            depth: 0,
            max_depth: 0,
        }
    }

    /// Current byte offset in the bytecode stream.
    pub fn current_offset(&self) -> usize {
        self.buf.len()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    // ── emit helpers ───────────────────────────────────────────────

    fn emit_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn emit_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn emit_op(&mut self, op: Op) {
        self.buf.push(op as u8);
    }

    fn push_effect(&mut self, n: usize) {
        self.depth += n;
        self.max_depth = self.max_depth.max(self.depth);
    }

    fn pop_effect(&mut self, n: usize) {
        debug_assert!(self.depth >= n, "stack underflow while building");
        self.depth = self.depth.saturating_sub(n);
    }

    // ── stack ──────────────────────────────────────────────────────

    pub fn halt(&mut self) {
        self.emit_op(Op::Halt);
    }

    pub fn dup(&mut self) {
        self.emit_op(Op::Dup);
        self.push_effect(1);
    }

    pub fn pop(&mut self) {
        self.emit_op(Op::Pop);
        self.pop_effect(1);
    }

    /// Emit the single-byte form of `kind` when one exists for `index` in
    /// the current frame, the general form otherwise.
    fn emit_variable(&mut self, kind: Op, index: u8, context: Option<u8>) {
        let short = match context {
            None | Some(0) => Op::short_form(kind, index),
            Some(_) => None,
        };
        if let Some(op) = short {
            self.emit_op(op);
            return;
        }
        self.emit_op(kind);
        self.emit_u8(index);
        if let Some(context) = context {
            self.emit_u8(context);
        }
    }

    pub fn push_local(&mut self, index: u8, context: u8) {
        self.emit_variable(Op::PushLocal, index, Some(context));
        self.push_effect(1);
    }

    /// Argument 0 of the current frame keeps the general form: in a block
    /// it is the block, not self.
    pub fn push_argument(&mut self, index: u8, context: u8) {
        self.emit_variable(Op::PushArgument, index, Some(context));
        self.push_effect(1);
    }

    pub fn push_field(&mut self, field: u8) {
        self.emit_variable(Op::PushField, field, None);
        self.push_effect(1);
    }

    pub fn push_block(&mut self, literal: u8) {
        self.emit_op(Op::PushBlock);
        self.emit_u8(literal);
        self.push_effect(1);
    }

    pub fn push_constant(&mut self, literal: u8) {
        self.emit_op(Op::PushConstant);
        self.emit_u8(literal);
        self.push_effect(1);
    }

    pub fn push_global(&mut self, literal: u8) {
        self.emit_op(Op::PushGlobal);
        self.emit_u8(literal);
        self.push_effect(1);
    }

    pub fn push_self(&mut self) {
        self.emit_op(Op::PushSelf);
        self.push_effect(1);
    }

    pub fn pop_local(&mut self, index: u8, context: u8) {
        self.emit_variable(Op::PopLocal, index, Some(context));
        self.pop_effect(1);
    }

    pub fn pop_argument(&mut self, index: u8, context: u8) {
        self.emit_op(Op::PopArgument);
        self.emit_u8(index);
        self.emit_u8(context);
        self.pop_effect(1);
    }

    pub fn pop_field(&mut self, field: u8) {
        self.emit_variable(Op::PopField, field, None);
        self.pop_effect(1);
    }

    pub fn inc(&mut self) {
        self.emit_op(Op::Inc);
    }

    pub fn dec(&mut self) {
        self.emit_op(Op::Dec);
    }

    /// `field := field + 1` without touching the stack.
    pub fn inc_field(&mut self, field: u8) {
        self.emit_op(Op::IncField);
        self.emit_u8(field);
    }

    /// `field := field + 1`, leaving the new value on the stack.
    pub fn inc_field_push(&mut self, field: u8) {
        self.emit_op(Op::IncFieldPush);
        self.emit_u8(field);
        self.push_effect(1);
    }

    // ── sends & returns ────────────────────────────────────────────

    /// `Send #literal`. `num_args` counts the receiver.
    pub fn send(&mut self, literal: u8, num_args: usize) {
        self.emit_op(Op::Send);
        self.emit_u8(literal);
        self.pop_effect(num_args);
        self.push_effect(1);
    }

    /// `SuperSend #literal`. `num_args` counts the receiver.
    pub fn super_send(&mut self, literal: u8, num_args: usize) {
        self.emit_op(Op::SuperSend);
        self.emit_u8(literal);
        self.pop_effect(num_args);
        self.push_effect(1);
    }

    pub fn unary_send(&mut self, literal: u8) {
        self.emit_op(Op::UnarySend);
        self.emit_u8(literal);
    }

    pub fn return_local(&mut self) {
        self.emit_op(Op::ReturnLocal);
    }

    pub fn return_non_local(&mut self) {
        self.emit_op(Op::ReturnNonLocal);
    }

    pub fn return_self(&mut self) {
        self.emit_op(Op::ReturnSelf);
    }

    /// Return field `field` of self. Fields past the third take a push
    /// and a local return.
    pub fn return_field(&mut self, field: u8) {
        match Op::return_field(field) {
            Some(op) => self.emit_op(op),
            None => {
                self.push_field(field);
                self.return_local();
            }
        }
    }

    // ── jumps ──────────────────────────────────────────────────────

    /// Emit an unconditional forward jump. Returns a [`Label`] that must be
    /// resolved later with [`bind`](Self::bind).
    pub fn jump(&mut self) -> Label {
        self.emit_jump_placeholder(Op::Jump)
    }

    /// Emit a conditional forward jump (pops; taken on `true`).
    pub fn jump_if_true(&mut self) -> Label {
        self.pop_effect(1);
        self.emit_jump_placeholder(Op::JumpIfTrue)
    }

    /// Emit a conditional forward jump (pops; taken on `false`).
    pub fn jump_if_false(&mut self) -> Label {
        self.pop_effect(1);
        self.emit_jump_placeholder(Op::JumpIfFalse)
    }

    /// Emit a forward loop-exit test. The taken path arrives with both
    /// operands popped; the fall-through path keeps them.
    pub fn jump_if_greater(&mut self) -> Label {
        self.emit_op(Op::JumpIfGreater);
        let offset_pos = self.buf.len();
        self.emit_i32(0);
        Label {
            offset_pos,
            base: self.buf.len(),
            depth: self.depth.saturating_sub(2),
        }
    }

    /// Bind a forward jump label to the current position.
    pub fn bind(&mut self, label: Label) {
        let target = self.buf.len();
        let offset = (target as isize - label.base as isize) as i32;
        self.buf[label.offset_pos..label.offset_pos + 4].copy_from_slice(&offset.to_le_bytes());
        self.depth = self.depth.max(label.depth);
    }

    /// Emit an unconditional backward jump to `target` (a byte offset obtained
    /// from [`current_offset`](Self::current_offset)).
    pub fn jump_back(&mut self, target: usize) {
        self.emit_back(Op::Jump, target);
    }

    /// Emit a conditional backward jump (pops; taken on `true`).
    pub fn jump_back_if_true(&mut self, target: usize) {
        self.pop_effect(1);
        self.emit_back(Op::JumpIfTrue, target);
    }

    /// Emit a conditional backward jump (pops; taken on `false`).
    pub fn jump_back_if_false(&mut self, target: usize) {
        self.pop_effect(1);
        self.emit_back(Op::JumpIfFalse, target);
    }

    /// Emit a backward loop-exit test. Pops both operands only when taken.
    pub fn jump_back_if_greater(&mut self, target: usize) {
        self.emit_back(Op::JumpIfGreater, target);
    }

    fn emit_back(&mut self, op: Op, target: usize) {
        self.emit_op(op);
        let base = self.buf.len() + 4;
        self.emit_i32((target as isize - base as isize) as i32);
    }

    fn emit_jump_placeholder(&mut self, op: Op) -> Label {
        self.emit_op(op);
        let offset_pos = self.buf.len();
        self.emit_i32(0); // placeholder
        Label {
            offset_pos,
            base: self.buf.len(),
            depth: self.depth,
        }
    }
}

impl Default for BytecodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
