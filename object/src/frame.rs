use thiserror::Error;

use crate::managed::SLOT_SIZE;
use crate::Value;

/// Fixed part of a frame: previous, context, method, bytecode index,
/// forwarding pointer, counts and stack pointer.
pub const FRAME_HEADER_SIZE: usize = 7 * SLOT_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("operand stack overflow ({capacity} slots)")]
    StackOverflow { capacity: usize },
    #[error("operand stack underflow")]
    StackUnderflow,
    #[error("slot {index} out of range ({len} slots)")]
    SlotOutOfRange { index: usize, len: usize },
}

/// An activation record.
///
/// Slots are laid out as `[arguments | locals | operand stack]` in one
/// backing allocation sized at creation from the method's declared counts.
/// The receiver is argument 0.
///
/// ```text
///  0            num_args     num_args + num_locals          slots.len()
///  ├─ arguments ─┼── locals ──┼──── operand stack ────────────┤
///                                           ▲ stack_pointer (next free)
/// ```
pub struct Frame {
    /// Calling frame. `None` for the bootstrap frame and for any frame that
    /// has been popped.
    pub previous: Option<Value>,
    /// Lexically enclosing frame of a block activation, `None` for methods.
    pub context: Option<Value>,
    pub method: Value,
    /// Resumption point, flushed at every safepoint.
    pub bytecode_index: usize,
    /// Replacement frame once this one has been abandoned by an emergency
    /// resize.
    pub forwarded: Option<Value>,
    num_args: usize,
    num_locals: usize,
    stack_pointer: usize,
    slots: Box<[Value]>,
}

impl Frame {
    /// A fresh frame with every slot set to `nil`.
    pub fn new(
        method: Value,
        num_args: usize,
        num_locals: usize,
        max_stack: usize,
        nil: Value,
    ) -> Self {
        let len = num_args + num_locals + max_stack;
        Self {
            previous: None,
            context: None,
            method,
            bytecode_index: 0,
            forwarded: None,
            num_args,
            num_locals,
            stack_pointer: num_args + num_locals,
            slots: vec![nil; len].into_boxed_slice(),
        }
    }

    /// A copy of `self` with `extra` additional operand-stack slots.
    ///
    /// Arguments, locals, the live operand stack, linkage and the
    /// resumption point are carried over unchanged.
    pub fn with_extra_capacity(&self, extra: usize, nil: Value) -> Self {
        let mut slots = Vec::with_capacity(self.slots.len() + extra);
        slots.extend_from_slice(&self.slots);
        slots.resize(self.slots.len() + extra, nil);
        Self {
            previous: self.previous,
            context: self.context,
            method: self.method,
            bytecode_index: self.bytecode_index,
            forwarded: None,
            num_args: self.num_args,
            num_locals: self.num_locals,
            stack_pointer: self.stack_pointer,
            slots: slots.into_boxed_slice(),
        }
    }

    // ── layout ─────────────────────────────────────────────────────

    #[inline(always)]
    pub fn num_args(&self) -> usize {
        self.num_args
    }

    #[inline(always)]
    pub fn num_locals(&self) -> usize {
        self.num_locals
    }

    /// Slot offset of argument 0.
    #[inline(always)]
    pub const fn arguments_offset(&self) -> usize {
        0
    }

    /// Slot offset of local 0.
    #[inline(always)]
    pub fn locals_offset(&self) -> usize {
        self.arguments_offset() + self.num_args
    }

    /// Slot offset of the bottom of the operand stack.
    #[inline(always)]
    pub fn stack_base(&self) -> usize {
        self.locals_offset() + self.num_locals
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline(always)]
    pub fn stack_pointer(&self) -> usize {
        self.stack_pointer
    }

    /// Number of live operand-stack entries.
    #[inline(always)]
    pub fn stack_depth(&self) -> usize {
        self.stack_pointer - self.stack_base()
    }

    /// Free operand-stack slots.
    #[inline(always)]
    pub fn remaining_stack_size(&self) -> usize {
        self.slots.len() - self.stack_pointer
    }

    /// The live operand stack, bottom first.
    pub fn stack(&self) -> &[Value] {
        &self.slots[self.stack_base()..self.stack_pointer]
    }

    pub fn arguments(&self) -> &[Value] {
        &self.slots[..self.num_args]
    }

    pub fn locals(&self) -> &[Value] {
        &self.slots[self.num_args..self.stack_base()]
    }

    pub fn reset_stack_pointer(&mut self) {
        self.stack_pointer = self.stack_base();
    }

    // ── operand stack ──────────────────────────────────────────────

    #[inline(always)]
    pub fn push(&mut self, value: Value) -> Result<(), FrameError> {
        let Some(slot) = self.slots.get_mut(self.stack_pointer) else {
            return Err(FrameError::StackOverflow {
                capacity: self.slots.len(),
            });
        };
        *slot = value;
        self.stack_pointer += 1;
        Ok(())
    }

    #[inline(always)]
    pub fn pop(&mut self) -> Result<Value, FrameError> {
        if self.stack_pointer <= self.stack_base() {
            return Err(FrameError::StackUnderflow);
        }
        self.stack_pointer -= 1;
        Ok(self.slots[self.stack_pointer])
    }

    /// Drop `n` entries.
    pub fn pop_n(&mut self, n: usize) -> Result<(), FrameError> {
        if self.stack_depth() < n {
            return Err(FrameError::StackUnderflow);
        }
        self.stack_pointer -= n;
        Ok(())
    }

    #[inline(always)]
    pub fn top(&self) -> Result<Value, FrameError> {
        self.stack_element(0)
    }

    #[inline(always)]
    pub fn set_top(&mut self, value: Value) -> Result<(), FrameError> {
        if self.stack_depth() == 0 {
            return Err(FrameError::StackUnderflow);
        }
        self.slots[self.stack_pointer - 1] = value;
        Ok(())
    }

    /// Entry `depth` positions below the top (0 = top).
    #[inline(always)]
    pub fn stack_element(&self, depth: usize) -> Result<Value, FrameError> {
        if depth >= self.stack_depth() {
            return Err(FrameError::StackUnderflow);
        }
        Ok(self.slots[self.stack_pointer - 1 - depth])
    }

    // ── arguments & locals ─────────────────────────────────────────

    #[inline(always)]
    pub fn argument(&self, index: usize) -> Result<Value, FrameError> {
        if index >= self.num_args {
            return Err(self.out_of_range(index));
        }
        Ok(self.slots[index])
    }

    #[inline(always)]
    pub fn set_argument(&mut self, index: usize, value: Value) -> Result<(), FrameError> {
        if index >= self.num_args {
            return Err(self.out_of_range(index));
        }
        self.slots[index] = value;
        Ok(())
    }

    #[inline(always)]
    pub fn local(&self, index: usize) -> Result<Value, FrameError> {
        if index >= self.num_locals {
            return Err(self.out_of_range(self.num_args + index));
        }
        Ok(self.slots[self.num_args + index])
    }

    #[inline(always)]
    pub fn set_local(&mut self, index: usize, value: Value) -> Result<(), FrameError> {
        if index >= self.num_locals {
            return Err(self.out_of_range(self.num_args + index));
        }
        self.slots[self.num_args + index] = value;
        Ok(())
    }

    fn out_of_range(&self, index: usize) -> FrameError {
        FrameError::SlotOutOfRange {
            index,
            len: self.slots.len(),
        }
    }

    // ── memory contract ────────────────────────────────────────────

    pub(crate) fn payload_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.slots.len() * SLOT_SIZE
    }

    pub(crate) fn walk_references(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        if let Some(previous) = &mut self.previous {
            visitor(previous);
        }
        if let Some(context) = &mut self.context {
            visitor(context);
        }
        visitor(&mut self.method);
        if let Some(forwarded) = &mut self.forwarded {
            visitor(forwarded);
        }
        self.slots.iter_mut().for_each(|v| visitor(v));
    }
}
