//! The dispatch loop.
//!
//! One [`ExecutionState`] is the cursor of the interpreter: current frame,
//! current method and bytecode index. Handlers run to completion; the only
//! place a collection may happen is the safepoint between two instructions
//! that follows an allocating opcode. Before it the bytecode index is
//! flushed into the frame, after it the cursor is reloaded from the frame.

use bytecode::{DecodeError, Op};
use object::{Block, Body, Value};

use crate::frame::{self, context_at, self_of, set_frame};
use crate::method::{MethodBuilder, patch_literal};
use crate::send;
use crate::{FatalError, Number, VM, VmResult, mismatch};

/// Operand-stack slots of the bootstrap frame before any emergency growth.
const BOOTSTRAP_STACK: u16 = 4;

/// The execution cursor.
#[derive(Debug, Default)]
pub struct ExecutionState {
    pub frame: Option<Value>,
    pub method: Option<Value>,
    pub bytecode_index: usize,
    /// Bottom frame that runs the `Halt` method; drivers restart from it.
    pub bootstrap_frame: Option<Value>,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn current_frame(&self) -> VmResult<Value> {
        self.frame.ok_or_else(|| FatalError::NoFrame.into())
    }

    #[inline]
    pub fn current_method(&self) -> VmResult<Value> {
        self.method.ok_or_else(|| FatalError::NoFrame.into())
    }

    /// Persist the bytecode index into the current frame.
    pub fn flush(&self, vm: &mut VM) -> VmResult<()> {
        if let Some(f) = self.frame {
            frame::frame_mut(vm, f)?.bytecode_index = self.bytecode_index;
        }
        Ok(())
    }

    pub(crate) fn visit_mut(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        for v in [&mut self.frame, &mut self.method, &mut self.bootstrap_frame]
            .into_iter()
            .flatten()
        {
            visitor(v);
        }
    }
}

// ── dispatch ──────────────────────────────────────────────────────────

/// Fetch the opcode under the cursor together with its inline operands.
#[inline(always)]
fn fetch(vm: &VM, state: &ExecutionState) -> VmResult<(Op, [u8; 4])> {
    let method = vm.method(state.current_method()?)?;
    let bytes = method.bytecodes();
    let offset = state.bytecode_index;
    let byte = *bytes.get(offset).ok_or(FatalError::JumpOutOfRange(offset as i64))?;
    let op = Op::try_from(byte).map_err(|byte| DecodeError::InvalidOpcode { offset, byte })?;
    let inline = bytes
        .get(offset + 1..offset + op.width())
        .ok_or(DecodeError::Truncated { offset, op })?;
    let mut operands = [0u8; 4];
    operands[..inline.len()].copy_from_slice(inline);
    Ok((op, operands))
}

/// Run until a `Halt` executes and return the top of that frame's stack.
///
/// With `TRACE` every instruction is logged on the `som::trace` target
/// before it runs. Both modes share every handler.
pub fn start<const TRACE: bool>(vm: &mut VM, state: &mut ExecutionState) -> VmResult<Value> {
    loop {
        if let Some(result) = step::<TRACE>(vm, state)? {
            return Ok(result);
        }
    }
}

/// Execute the instruction under the cursor. Answers the result of a `Halt`.
#[inline]
fn step<const TRACE: bool>(vm: &mut VM, state: &mut ExecutionState) -> VmResult<Option<Value>> {
    let (op, operands) = fetch(vm, state)?;
    if TRACE {
        let line = crate::disassembler::trace_line(vm, state)?;
        log::trace!(target: "som::trace", "{line}");
    }
    state.bytecode_index += op.width();

    match op {
        Op::Halt => return frame::top(vm, state).map(Some),
        Op::Dup => do_dup(vm, state)?,
        Op::PushLocal => do_push_local(vm, state, operands[0], operands[1])?,
        Op::PushArgument => do_push_argument(vm, state, operands[0], operands[1])?,
        Op::PushField => do_push_field(vm, state, operands[0])?,
        Op::PushBlock => do_push_block(vm, state, operands[0])?,
        Op::PushConstant => do_push_constant(vm, state, operands[0])?,
        Op::PushGlobal => do_push_global(vm, state, operands[0])?,
        Op::Pop => {
            frame::pop(vm, state)?;
        }
        Op::PopLocal => do_pop_local(vm, state, operands[0], operands[1])?,
        Op::PopArgument => do_pop_argument(vm, state, operands[0], operands[1])?,
        Op::PopField => do_pop_field(vm, state, operands[0])?,
        Op::Send => send::do_send(vm, state, literal(vm, state, operands[0])?)?,
        Op::SuperSend => send::do_super_send(vm, state, literal(vm, state, operands[0])?)?,
        Op::UnarySend => send::do_unary_send(vm, state, literal(vm, state, operands[0])?)?,
        Op::ReturnLocal => do_return_local(vm, state)?,
        Op::ReturnNonLocal => do_return_non_local(vm, state)?,
        Op::JumpIfFalse => {
            let condition = frame::pop(vm, state)?;
            if condition.is(vm.special.false_obj) {
                jump(vm, state, operands)?;
            }
        }
        Op::JumpIfTrue => {
            let condition = frame::pop(vm, state)?;
            if condition.is(vm.special.true_obj) {
                jump(vm, state, operands)?;
            }
        }
        Op::Jump => jump(vm, state, operands)?,
        Op::JumpIfGreater => do_jump_if_greater(vm, state, operands)?,
        Op::Inc => do_step(vm, state, 1)?,
        Op::Dec => do_step(vm, state, -1)?,
        Op::PushSelf => {
            let receiver = self_of(vm, state.current_frame()?)?;
            frame::push(vm, state, receiver)?;
        }
        Op::ReturnSelf => {
            let receiver = self_of(vm, state.current_frame()?)?;
            frame::pop_frame_and_push_result(vm, state, receiver)?;
        }
        Op::PushLocal0 => do_push_local(vm, state, 0, 0)?,
        Op::PushLocal1 => do_push_local(vm, state, 1, 0)?,
        Op::PushLocal2 => do_push_local(vm, state, 2, 0)?,
        Op::PushArgument1 => do_push_argument(vm, state, 1, 0)?,
        Op::PushArgument2 => do_push_argument(vm, state, 2, 0)?,
        Op::PushField0 => do_push_field(vm, state, 0)?,
        Op::PushField1 => do_push_field(vm, state, 1)?,
        Op::PopLocal0 => do_pop_local(vm, state, 0, 0)?,
        Op::PopLocal1 => do_pop_local(vm, state, 1, 0)?,
        Op::PopLocal2 => do_pop_local(vm, state, 2, 0)?,
        Op::PopField0 => do_pop_field(vm, state, 0)?,
        Op::PopField1 => do_pop_field(vm, state, 1)?,
        Op::ReturnField0 => do_return_field(vm, state, 0)?,
        Op::ReturnField1 => do_return_field(vm, state, 1)?,
        Op::ReturnField2 => do_return_field(vm, state, 2)?,
        Op::IncField => do_inc_field::<TRACE>(vm, state, operands[0], false)?,
        Op::IncFieldPush => do_inc_field::<TRACE>(vm, state, operands[0], true)?,
    }

    if op.may_allocate() {
        safepoint(vm, state)?;
    }
    Ok(None)
}

/// Flush the cursor, give the collector a chance to run and reload the
/// cursor from the (possibly relocated) frame.
fn safepoint(vm: &mut VM, state: &mut ExecutionState) -> VmResult<()> {
    state.flush(vm)?;
    if vm.maybe_collect(state) {
        let current = state.current_frame()?;
        set_frame(vm, state, current)?;
    }
    Ok(())
}

#[inline]
fn literal(vm: &VM, state: &ExecutionState, index: u8) -> VmResult<Value> {
    let method = vm.method(state.current_method()?)?;
    method
        .literals()
        .get(index as usize)
        .copied()
        .ok_or_else(|| FatalError::LiteralOutOfRange(index as usize).into())
}

fn jump(vm: &VM, state: &mut ExecutionState, operands: [u8; 4]) -> VmResult<()> {
    let offset = i32::from_le_bytes(operands) as i64;
    let target = state.bytecode_index as i64 + offset;
    let len = vm.method(state.current_method()?)?.bytecodes().len() as i64;
    if !(0..len).contains(&target) {
        return Err(FatalError::JumpOutOfRange(target).into());
    }
    state.bytecode_index = target as usize;
    Ok(())
}

// ── handlers ──────────────────────────────────────────────────────────

fn do_dup(vm: &mut VM, state: &mut ExecutionState) -> VmResult<()> {
    let top = frame::top(vm, state)?;
    frame::push(vm, state, top)
}

fn do_push_local(vm: &mut VM, state: &mut ExecutionState, index: u8, level: u8) -> VmResult<()> {
    let ctx = context_at(vm, state.current_frame()?, level)?;
    let value = frame::frame(vm, ctx)?.local(index as usize)?;
    frame::push(vm, state, value)
}

fn do_push_argument(
    vm: &mut VM,
    state: &mut ExecutionState,
    index: u8,
    level: u8,
) -> VmResult<()> {
    let ctx = context_at(vm, state.current_frame()?, level)?;
    let value = frame::frame(vm, ctx)?.argument(index as usize)?;
    frame::push(vm, state, value)
}

fn do_pop_local(vm: &mut VM, state: &mut ExecutionState, index: u8, level: u8) -> VmResult<()> {
    let value = frame::pop(vm, state)?;
    let ctx = context_at(vm, state.current_frame()?, level)?;
    frame::frame_mut(vm, ctx)?.set_local(index as usize, value)?;
    vm.write_barrier(ctx, value);
    Ok(())
}

fn do_pop_argument(
    vm: &mut VM,
    state: &mut ExecutionState,
    index: u8,
    level: u8,
) -> VmResult<()> {
    let value = frame::pop(vm, state)?;
    let ctx = context_at(vm, state.current_frame()?, level)?;
    frame::frame_mut(vm, ctx)?.set_argument(index as usize, value)?;
    vm.write_barrier(ctx, value);
    Ok(())
}

fn do_push_field(vm: &mut VM, state: &mut ExecutionState, field: u8) -> VmResult<()> {
    let receiver = self_of(vm, state.current_frame()?)?;
    let value = vm.field(receiver, field as usize)?;
    frame::push(vm, state, value)
}

fn do_pop_field(vm: &mut VM, state: &mut ExecutionState, field: u8) -> VmResult<()> {
    let receiver = self_of(vm, state.current_frame()?)?;
    let value = frame::pop(vm, state)?;
    vm.set_field(receiver, field as usize, value)
}

fn do_push_constant(vm: &mut VM, state: &mut ExecutionState, index: u8) -> VmResult<()> {
    let value = literal(vm, state, index)?;
    frame::push(vm, state, value)
}

/// Close the block method in literal `index` over the current frame.
fn do_push_block(vm: &mut VM, state: &mut ExecutionState, index: u8) -> VmResult<()> {
    let method = literal(vm, state, index)?;
    let num_args = {
        let m = vm.method(method)?;
        if !m.is_block {
            return Err(mismatch("block method", method));
        }
        m.num_args as usize
    };
    let class = vm
        .special
        .block_class_for(num_args)
        .ok_or(FatalError::NoBlockClass(num_args))?;
    let context = state.current_frame()?;
    let block = vm.allocate(class, Body::Block(Block { method, context }))?;
    frame::push(vm, state, block)
}

/// Push the value of a global.
///
/// The literal starts out as the global's name. The first successful
/// lookup replaces it with the global's association, which later
/// executions read directly.
fn do_push_global(vm: &mut VM, state: &mut ExecutionState, index: u8) -> VmResult<()> {
    let lit = literal(vm, state, index)?;
    if let Body::Association(assoc) = &vm.object(lit)?.body {
        let value = assoc.value;
        return frame::push(vm, state, value);
    }

    let name = vm.symbol_name(lit)?.to_owned();
    match vm.global_association(&name) {
        Some(assoc) => {
            patch_literal(vm, state.current_method()?, index as usize, lit, assoc)?;
            let value = vm
                .global(&name)?
                .ok_or(FatalError::TypeMismatch { expected: "Association", got: assoc })?;
            frame::push(vm, state, value)
        }
        None => send::send_unknown_global(vm, state, lit),
    }
}

fn do_return_local(vm: &mut VM, state: &mut ExecutionState) -> VmResult<()> {
    let result = frame::pop(vm, state)?;
    frame::pop_frame_and_push_result(vm, state, result)
}

fn do_return_field(vm: &mut VM, state: &mut ExecutionState, field: u8) -> VmResult<()> {
    let receiver = self_of(vm, state.current_frame()?)?;
    let value = vm.field(receiver, field as usize)?;
    frame::pop_frame_and_push_result(vm, state, value)
}

/// Return from the method activation that lexically encloses the current
/// block, unwinding every frame above it.
fn do_return_non_local(vm: &mut VM, state: &mut ExecutionState) -> VmResult<()> {
    let result = frame::pop(vm, state)?;
    let current = state.current_frame()?;
    let target = frame::outer_context(vm, current)?;

    if !frame::has_previous_frame(vm, target)? {
        return send::send_escaped_block(vm, state);
    }

    let mut unwound = 0usize;
    while !state.current_frame()?.is(target) {
        frame::pop_frame(vm, state)?;
        unwound += 1;
    }
    log::debug!("non-local return unwound {unwound} frames to {target:?}");
    frame::pop_frame_and_push_result(vm, state, result)
}

/// Jump and drop both operands when the top of the stack is greater than
/// the element below it.
fn do_jump_if_greater(
    vm: &mut VM,
    state: &mut ExecutionState,
    operands: [u8; 4],
) -> VmResult<()> {
    let top = frame::stack_element(vm, state, 0)?;
    let below = frame::stack_element(vm, state, 1)?;
    let greater = match (vm.number(top)?, vm.number(below)?) {
        (Some(Number::Int(a)), Some(Number::Int(b))) => a > b,
        (Some(a), Some(b)) => a.as_f64() > b.as_f64(),
        _ => false,
    };
    if greater {
        frame::pop(vm, state)?;
        frame::pop(vm, state)?;
        jump(vm, state, operands)?;
    }
    Ok(())
}

/// `Inc` / `Dec`: add `delta` to the top of the stack.
///
/// Integers and doubles are handled inline. Any other receiver gets the
/// ordinary `+`/`-` message with the argument 1.
fn do_step(vm: &mut VM, state: &mut ExecutionState, delta: i64) -> VmResult<()> {
    let top = frame::top(vm, state)?;
    let op = if delta > 0 { "inc" } else { "dec" };
    let result = match vm.number(top)? {
        Some(Number::Int(n)) => {
            let sum = n.checked_add(delta).ok_or(FatalError::IntegerOverflow(op))?;
            vm.new_integer(sum)?
        }
        Some(Number::Double(d)) => vm.new_double(d + delta as f64)?,
        None => {
            let selector = if delta > 0 {
                vm.selectors.plus
            } else {
                vm.selectors.minus
            };
            log::debug!("{op} on non-number {top:?}, sending #{}", vm.symbol_name(selector)?);
            frame::ensure_stack_room(vm, state, 1)?;
            frame::push(vm, state, Value::from_i64(1))?;
            return send::do_send(vm, state, selector);
        }
    };
    frame::set_top(vm, state, result)
}

/// `IncField` / `IncFieldPush`: add one to field `field` of self.
///
/// Integers and doubles are handled inline. Any other value gets the
/// ordinary `+ 1` message, run to completion before the field is stored.
fn do_inc_field<const TRACE: bool>(
    vm: &mut VM,
    state: &mut ExecutionState,
    field: u8,
    push: bool,
) -> VmResult<()> {
    let receiver = self_of(vm, state.current_frame()?)?;
    let value = vm.field(receiver, field as usize)?;
    let result = match vm.number(value)? {
        Some(Number::Int(n)) => {
            let sum = n.checked_add(1).ok_or(FatalError::IntegerOverflow("inc field"))?;
            vm.new_integer(sum)?
        }
        Some(Number::Double(d)) => vm.new_double(d + 1.0)?,
        None => {
            log::debug!("inc field {field} of non-number {value:?}, sending #+");
            frame::ensure_stack_room(vm, state, 2)?;
            frame::push(vm, state, value)?;
            frame::push(vm, state, Value::from_i64(1))?;
            let plus = vm.selectors.plus;
            match run_nested_send::<TRACE>(vm, state, plus)? {
                Some(sum) => sum,
                // The send unwound past this activation.
                None => return Ok(()),
            }
        }
    };
    // The nested send may have moved self.
    let receiver = self_of(vm, state.current_frame()?)?;
    vm.set_field(receiver, field as usize, result)?;
    if push {
        frame::push(vm, state, result)?;
    }
    Ok(())
}

/// Send `selector` to the operands on top of the current frame's stack
/// and run the loop until the result lands back in this frame, which then
/// gives it up.
///
/// Answers `None` when a non-local return unwound past the frame; the
/// cursor is then already where execution continues.
fn run_nested_send<const TRACE: bool>(
    vm: &mut VM,
    state: &mut ExecutionState,
    selector: Value,
) -> VmResult<Option<Value>> {
    vm.handles.push(state.current_frame()?);
    let slot = vm.handles.len() - 1;
    let outcome = drive_back_to::<TRACE>(vm, state, slot, selector);
    vm.handles.truncate(slot);
    outcome
}

fn drive_back_to<const TRACE: bool>(
    vm: &mut VM,
    state: &mut ExecutionState,
    slot: usize,
    selector: Value,
) -> VmResult<Option<Value>> {
    send::do_send(vm, state, selector)?;
    loop {
        // An emergency frame may have replaced the caller meanwhile.
        let caller = frame::resolve(vm, vm.handles[slot])?;
        vm.handles[slot] = caller;
        if state.current_frame()?.is(caller) {
            return frame::pop(vm, state).map(Some);
        }
        if !frame::has_previous_frame(vm, caller)? {
            return Ok(None);
        }
        if step::<TRACE>(vm, state)?.is_some() {
            return Err(FatalError::NoCaller(caller).into());
        }
    }
}

// ── driver ────────────────────────────────────────────────────────────

/// The bottom frame, created on first use. Its method is a lone `Halt`.
pub fn bootstrap_frame(vm: &mut VM, state: &mut ExecutionState) -> VmResult<Value> {
    if let Some(f) = state.bootstrap_frame {
        return Ok(f);
    }
    if state.frame.is_some() {
        return Err(FatalError::MissingBootstrap.into());
    }
    let signature = vm.symbol("bootstrap")?;
    let mut builder = MethodBuilder::method(vm, signature)?;
    builder.code.halt();
    builder.reserve_stack(BOOTSTRAP_STACK);
    let method = builder.assemble(vm)?;
    let f = frame::push_new_frame(vm, state, method, None)?;
    state.bootstrap_frame = Some(f);
    log::debug!("bootstrap frame {f:?}");
    Ok(f)
}

/// Send `selector` with `args` to `receiver` from the bootstrap frame and
/// run until the bootstrap `Halt`.
///
/// After a language-level error the stack is unwound back to the
/// bootstrap frame, so the state can be reused for the next call.
pub fn execute(
    vm: &mut VM,
    state: &mut ExecutionState,
    receiver: Value,
    selector: &str,
    args: &[Value],
    trace: bool,
) -> VmResult<Value> {
    let selector = vm.symbol(selector)?;
    let arity = vm.symbol_arity(selector)?;
    if arity != args.len() + 1 {
        return Err(FatalError::ArityMismatch {
            selector: vm.symbol_name(selector)?.to_owned(),
            expected: arity,
            actual: args.len() + 1,
        }
        .into());
    }

    let bottom = bootstrap_frame(vm, state)?;
    set_frame(vm, state, bottom)?;
    state.bytecode_index = 0;
    frame::ensure_stack_room(vm, state, arity)?;
    frame::push(vm, state, receiver)?;
    for &arg in args {
        frame::push(vm, state, arg)?;
    }
    let class = vm.class_of(receiver)?;

    let outcome = send::send(vm, state, selector, class).and_then(|()| {
        if trace {
            start::<true>(vm, state)
        } else {
            start::<false>(vm, state)
        }
    });

    match outcome {
        Ok(result) => {
            frame::pop(vm, state)?;
            Ok(result)
        }
        Err(e) => {
            if !e.is_fatal() {
                unwind(vm, state)?;
            }
            Err(e)
        }
    }
}

/// Abandon every frame above the bootstrap frame and empty its stack.
///
/// Abandoned frames lose their caller link so blocks that captured them
/// count as escaped.
pub fn unwind(vm: &mut VM, state: &mut ExecutionState) -> VmResult<()> {
    let bottom = state.bootstrap_frame.ok_or(FatalError::MissingBootstrap)?;
    let mut current = state.frame;
    while let Some(f) = current {
        if f.is(bottom) {
            break;
        }
        current = frame::frame_mut(vm, f)?.previous.take();
    }
    frame::frame_mut(vm, bottom)?.reset_stack_pointer();
    set_frame(vm, state, bottom)?;
    state.bytecode_index = 0;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{define_class, install_method};
    use crate::{VmError, VmSettings};
    use heap::HeapSettings;
    use object::{FIXNUM_MAX, Managed, Method};

    fn vm() -> VM {
        VM::new(VmSettings::default()).unwrap()
    }

    fn stressed() -> VM {
        VM::new(VmSettings {
            heap: HeapSettings {
                stress: true,
                ..HeapSettings::default()
            },
            ..VmSettings::default()
        })
        .unwrap()
    }

    /// Assemble a method for `selector` in `class` from `emit`.
    fn define(
        vm: &mut VM,
        class: Value,
        selector: &str,
        emit: impl FnOnce(&mut VM, &mut MethodBuilder),
    ) -> Value {
        let sig = vm.symbol(selector).unwrap();
        let mut b = MethodBuilder::method(vm, sig).unwrap().with_holder(Some(class));
        emit(vm, &mut b);
        let m = b.assemble(vm).unwrap();
        install_method(vm, class, sig, m).unwrap();
        m
    }

    fn block(
        vm: &mut VM,
        holder: Value,
        params: u8,
        emit: impl FnOnce(&mut VM, &mut MethodBuilder),
    ) -> Value {
        let sig = vm.symbol("block").unwrap();
        let mut b = MethodBuilder::block(sig, params).with_holder(Some(holder));
        emit(vm, &mut b);
        b.assemble(vm).unwrap()
    }

    fn sel(vm: &mut VM, b: &mut MethodBuilder, name: &str) -> u8 {
        let s = vm.symbol(name).unwrap();
        b.add_literal(s).unwrap()
    }

    fn run(vm: &mut VM, receiver: Value, selector: &str) -> VmResult<Value> {
        let mut state = ExecutionState::new();
        execute(vm, &mut state, receiver, selector, &[], false)
    }

    fn test_class(vm: &mut VM, fields: &[&str]) -> (Value, Value) {
        let object = vm.special.object_class;
        let class = define_class(vm, "T", Some(object), fields).unwrap();
        let instance = vm.new_instance(class).unwrap();
        (class, instance)
    }

    /// `sum := 0. i := 1. [i > n] whileFalse: [sum := sum + i. i := i + 1]. ^sum`
    fn counting_loop(vm: &mut VM, class: Value, n: i64) {
        define(vm, class, "loop", |vm, b| {
            b.set_num_locals(2);
            let zero = b.add_literal(Value::from_i64(0)).unwrap();
            let one = b.add_literal(Value::from_i64(1)).unwrap();
            let limit = b.add_literal(Value::from_i64(n)).unwrap();
            let plus = sel(vm, b, "+");
            b.code.push_constant(zero);
            b.code.pop_local(0, 0);
            b.code.push_constant(one);
            b.code.pop_local(1, 0);
            let head = b.code.current_offset();
            b.code.push_constant(limit);
            b.code.push_local(1, 0);
            let exit = b.code.jump_if_greater();
            b.code.pop();
            b.code.pop();
            b.code.push_local(0, 0);
            b.code.push_local(1, 0);
            b.code.send(plus, 2);
            b.code.pop_local(0, 0);
            b.code.push_local(1, 0);
            b.code.inc();
            b.code.pop_local(1, 0);
            b.code.jump_back(head);
            b.code.bind(exit);
            b.code.push_local(0, 0);
            b.code.return_local();
        });
    }

    #[test]
    fn constant_method_returns_through_halt() {
        let mut vm = vm();
        let (class, obj) = test_class(&mut vm, &[]);
        define(&mut vm, class, "answer", |_, b| {
            let c = b.add_literal(Value::from_i64(42)).unwrap();
            b.code.push_constant(c);
            b.code.return_local();
        });
        assert_eq!(run(&mut vm, obj, "answer").unwrap(), Value::from_i64(42));
    }

    #[test]
    fn counting_loop_runs_to_completion() {
        let mut vm = vm();
        let (class, obj) = test_class(&mut vm, &[]);
        counting_loop(&mut vm, class, 100);
        assert_eq!(run(&mut vm, obj, "loop").unwrap(), Value::from_i64(5050));
    }

    #[test]
    fn fields_are_read_and_written_on_self() {
        let mut vm = vm();
        let (class, obj) = test_class(&mut vm, &["a", "b"]);
        define(&mut vm, class, "swap", |_, b| {
            let c = b.add_literal(Value::from_i64(7)).unwrap();
            b.code.push_constant(c);
            b.code.pop_field(1);
            b.code.push_field(1);
            b.code.inc();
            b.code.return_local();
        });
        assert_eq!(run(&mut vm, obj, "swap").unwrap(), Value::from_i64(8));
        assert_eq!(vm.field(obj, 1).unwrap(), Value::from_i64(7));
    }

    #[test]
    fn integer_receiver_has_no_fields() {
        let mut vm = vm();
        let integer = vm.special.integer_class;
        define(&mut vm, integer, "field", |_, b| {
            b.code.push_field(0);
            b.code.return_local();
        });
        let err = run(&mut vm, Value::from_i64(3), "field").unwrap_err();
        assert_eq!(err, VmError::Fatal(FatalError::IntegerHasNoFields(Value::from_i64(3))));
    }

    #[test]
    fn stack_never_exceeds_declared_depth() {
        let mut vm = vm();
        let (class, obj) = test_class(&mut vm, &[]);
        counting_loop(&mut vm, class, 10);
        assert!(run(&mut vm, obj, "loop").is_ok());

        // A method that under-declares its depth overflows its frame.
        let sig = vm.symbol("tooDeep").unwrap();
        let mut code = bytecode::BytecodeBuilder::new();
        code.push_self();
        code.push_self();
        code.return_local();
        let method = Method::new(sig, code.into_bytes(), vec![], 1, 0, 1, false);
        let m = vm.allocate(vm.special.method_class, Body::Method(method)).unwrap();
        install_method(&mut vm, class, sig, m).unwrap();
        let err = run(&mut vm, obj, "tooDeep").unwrap_err();
        assert!(matches!(
            err,
            VmError::Fatal(FatalError::Frame(object::FrameError::StackOverflow { .. }))
        ));
    }

    /// A method whose block nests `depth` further blocks; the innermost one
    /// reads argument 0 `depth + 1` contexts out and also pushes self.
    fn nested_self(vm: &mut VM, class: Value, depth: u8) -> Value {
        let value = vm.symbol("value").unwrap();
        let mut inner = block(vm, class, 0, |_, b| {
            b.code.push_argument(0, depth + 1);
            b.code.push_self();
            b.code.pop();
            b.code.return_local();
        });
        for _ in 0..depth {
            let nested = inner;
            inner = block(vm, class, 0, |_, b| {
                let lit = b.add_literal(nested).unwrap();
                let v = b.add_literal(value).unwrap();
                b.code.push_block(lit);
                b.code.unary_send(v);
                b.code.return_local();
            });
        }
        let selector = format!("nested{depth}");
        define(vm, class, &selector, |_, b| {
            let lit = b.add_literal(inner).unwrap();
            let v = b.add_literal(value).unwrap();
            b.code.push_block(lit);
            b.code.unary_send(v);
            b.code.return_local();
        })
    }

    #[test]
    fn blocks_resolve_self_through_every_context() {
        let mut vm = vm();
        let (class, obj) = test_class(&mut vm, &[]);
        for depth in 0..=3u8 {
            nested_self(&mut vm, class, depth);
            let result = run(&mut vm, obj, &format!("nested{depth}")).unwrap();
            assert!(result.is(obj), "depth {depth}");
        }
    }

    #[test]
    fn outer_context_hops_match_nesting() {
        let mut vm = vm();
        let (class, obj) = test_class(&mut vm, &[]);
        let mut state = ExecutionState::new();
        bootstrap_frame(&mut vm, &mut state).unwrap();
        let m = define(&mut vm, class, "host", |_, b| b.code.return_self());
        let blk = block(&mut vm, class, 0, |_, b| b.code.return_local());

        let outer = frame::push_new_frame(&mut vm, &mut state, m, None).unwrap();
        frame::frame_mut(&mut vm, outer).unwrap().set_argument(0, obj).unwrap();
        let mut ctx = outer;
        for n in 0..=3usize {
            ctx = frame::push_new_frame(&mut vm, &mut state, blk, Some(ctx)).unwrap();
            let (target, hops) = frame::outer_context_with_hops(&vm, ctx).unwrap();
            assert!(target.is(outer));
            assert_eq!(hops, n + 1);
            assert!(self_of(&vm, ctx).unwrap().is(obj));
        }
    }

    /// `m` creates a block that returns 42 non-locally and hands it to `c:`,
    /// which evaluates it. `outer` adds one to the result of `m`.
    fn non_local_fixture(vm: &mut VM, class: Value) {
        let blk = block(vm, class, 0, |_, b| {
            let c = b.add_literal(Value::from_i64(42)).unwrap();
            b.code.push_constant(c);
            b.code.return_non_local();
        });
        define(vm, class, "c:", |vm, b| {
            let value = sel(vm, b, "value");
            let c = b.add_literal(Value::from_i64(99)).unwrap();
            b.code.push_argument(1, 0);
            b.code.unary_send(value);
            b.code.pop();
            b.code.push_constant(c);
            b.code.return_local();
        });
        define(vm, class, "m", |vm, b| {
            let lit = b.add_literal(blk).unwrap();
            let c = sel(vm, b, "c:");
            let seven = b.add_literal(Value::from_i64(7)).unwrap();
            b.code.push_self();
            b.code.push_block(lit);
            b.code.send(c, 2);
            b.code.pop();
            b.code.push_constant(seven);
            b.code.return_local();
        });
        define(vm, class, "outer", |vm, b| {
            let m = sel(vm, b, "m");
            let plus = sel(vm, b, "+");
            let one = b.add_literal(Value::from_i64(1)).unwrap();
            b.code.push_self();
            b.code.unary_send(m);
            b.code.push_constant(one);
            b.code.send(plus, 2);
            b.code.return_local();
        });
    }

    #[test]
    fn non_local_return_unwinds_to_home_method() {
        let mut vm = vm();
        let (class, obj) = test_class(&mut vm, &[]);
        non_local_fixture(&mut vm, class);
        let mut state = ExecutionState::new();
        let result = execute(&mut vm, &mut state, obj, "outer", &[], false).unwrap();
        assert_eq!(result, Value::from_i64(43));
        assert_eq!(state.frame, state.bootstrap_frame);
        let bottom = state.bootstrap_frame.unwrap();
        assert_eq!(frame::frame(&vm, bottom).unwrap().stack_depth(), 0);
    }

    fn escaping_fixture(vm: &mut VM, class: Value) {
        let blk = block(vm, class, 0, |_, b| {
            let c = b.add_literal(Value::from_i64(42)).unwrap();
            b.code.push_constant(c);
            b.code.return_non_local();
        });
        define(vm, class, "make", |_, b| {
            let lit = b.add_literal(blk).unwrap();
            b.code.push_block(lit);
            b.code.return_local();
        });
        define(vm, class, "run", |vm, b| {
            let make = sel(vm, b, "make");
            let value = sel(vm, b, "value");
            b.code.push_self();
            b.code.unary_send(make);
            b.code.unary_send(value);
            b.code.return_local();
        });
    }

    #[test]
    fn escaped_block_is_reported_to_sender() {
        let mut vm = vm();
        let (class, obj) = test_class(&mut vm, &["escaped"]);
        escaping_fixture(&mut vm, class);
        define(&mut vm, class, "escapedBlock:", |_, b| {
            let c = b.add_literal(Value::from_i64(-1)).unwrap();
            b.code.push_argument(1, 0);
            b.code.pop_field(0);
            b.code.push_constant(c);
            b.code.return_local();
        });
        assert_eq!(run(&mut vm, obj, "run").unwrap(), Value::from_i64(-1));
        let blk = vm.field(obj, 0).unwrap();
        assert!(matches!(vm.object(blk).unwrap().body, Body::Block(_)));
    }

    #[test]
    fn escaped_block_without_handler_signals() {
        let mut vm = vm();
        let (class, obj) = test_class(&mut vm, &[]);
        escaping_fixture(&mut vm, class);
        let mut state = ExecutionState::new();
        let err = execute(&mut vm, &mut state, obj, "run", &[], false).unwrap_err();
        assert!(matches!(err, VmError::Signal { .. }));
        // The state is usable again.
        define(&mut vm, class, "one", |_, b| {
            let c = b.add_literal(Value::from_i64(1)).unwrap();
            b.code.push_constant(c);
            b.code.return_local();
        });
        let ok = execute(&mut vm, &mut state, obj, "one", &[], false).unwrap();
        assert_eq!(ok, Value::from_i64(1));
    }

    #[test]
    fn does_not_understand_receives_selector_and_arguments() {
        let mut vm = vm();
        let (class, obj) = test_class(&mut vm, &["selector", "calls"]);
        define(&mut vm, class, "doesNotUnderstand:arguments:", |_, b| {
            b.code.push_argument(1, 0);
            b.code.pop_field(0);
            b.code.push_field(1);
            b.code.inc();
            b.code.pop_field(1);
            b.code.push_argument(2, 0);
            b.code.return_local();
        });
        vm.set_field(obj, 1, Value::from_i64(0)).unwrap();
        define(&mut vm, class, "ask", |vm, b| {
            let missing = sel(vm, b, "foo:bar:");
            let a = b.add_literal(Value::from_i64(10)).unwrap();
            let c = b.add_literal(Value::from_i64(20)).unwrap();
            b.code.push_self();
            b.code.push_constant(a);
            b.code.push_constant(c);
            b.code.send(missing, 3);
            b.code.return_local();
        });
        let args = run(&mut vm, obj, "ask").unwrap();
        assert_eq!(vm.array(args).unwrap(), &[Value::from_i64(10), Value::from_i64(20)]);
        let selector = vm.field(obj, 0).unwrap();
        assert_eq!(vm.symbol_name(selector).unwrap(), "foo:bar:");
        assert_eq!(vm.field(obj, 1).unwrap(), Value::from_i64(1));
    }

    #[test]
    fn missing_global_goes_through_unknown_global() {
        let mut vm = vm();
        let (class, obj) = test_class(&mut vm, &[]);
        define(&mut vm, class, "unknownGlobal:", |_, b| {
            b.code.push_argument(1, 0);
            b.code.return_local();
        });
        define(&mut vm, class, "lookup", |vm, b| {
            let name = vm.symbol("Nowhere").unwrap();
            let lit = b.add_unique_literal(name).unwrap();
            b.code.push_global(lit);
            b.code.return_local();
        });
        let result = run(&mut vm, obj, "lookup").unwrap();
        assert_eq!(vm.symbol_name(result).unwrap(), "Nowhere");
    }

    #[test]
    fn global_literal_is_patched_to_association() {
        let mut vm = vm();
        let (class, obj) = test_class(&mut vm, &[]);
        vm.set_global("Answer", Value::from_i64(1)).unwrap();
        let m = define(&mut vm, class, "read", |vm, b| {
            let name = vm.symbol("Answer").unwrap();
            let lit = b.add_unique_literal(name).unwrap();
            b.code.push_global(lit);
            b.code.return_local();
        });
        assert_eq!(run(&mut vm, obj, "read").unwrap(), Value::from_i64(1));
        let lit = vm.method(m).unwrap().literal(0);
        assert!(lit.is(vm.global_association("Answer").unwrap()));

        vm.set_global("Answer", Value::from_i64(2)).unwrap();
        assert_eq!(run(&mut vm, obj, "read").unwrap(), Value::from_i64(2));
    }

    #[test]
    fn emergency_frame_preserves_contents() {
        let mut vm = vm();
        let (class, obj) = test_class(&mut vm, &[]);
        let mut state = ExecutionState::new();
        bootstrap_frame(&mut vm, &mut state).unwrap();
        let m = define(&mut vm, class, "host:", |_, b| {
            b.set_num_locals(1);
            b.code.push_self();
            b.code.return_local();
        });
        let old = frame::push_new_frame(&mut vm, &mut state, m, None).unwrap();
        {
            let f = frame::frame_mut(&mut vm, old).unwrap();
            f.set_argument(0, obj).unwrap();
            f.set_argument(1, Value::from_i64(5)).unwrap();
            f.set_local(0, Value::from_i64(6)).unwrap();
            f.push(Value::from_i64(7)).unwrap();
        }
        assert_eq!(frame::frame(&vm, old).unwrap().remaining_stack_size(), 0);
        let blk = block(&mut vm, class, 0, |_, b| b.code.return_local());
        let child = frame::push_new_frame(&mut vm, &mut state, blk, Some(old)).unwrap();
        frame::set_frame(&vm, &mut state, old).unwrap();

        frame::ensure_stack_room(&mut vm, &mut state, 3).unwrap();
        let new = state.current_frame().unwrap();
        assert!(!new.is(old));
        let (a, b) = (frame::frame(&vm, old).unwrap(), frame::frame(&vm, new).unwrap());
        assert_eq!(a.arguments(), b.arguments());
        assert_eq!(a.locals(), b.locals());
        assert_eq!(a.stack(), b.stack());
        assert!(b.remaining_stack_size() >= 3);
        assert!(vm.object(old).unwrap().is_marked_invalid());
        assert!(frame::context_at(&vm, child, 1).unwrap().is(new));
    }

    #[test]
    fn does_not_understand_grows_a_full_frame() {
        let mut vm = vm();
        let (class, obj) = test_class(&mut vm, &[]);
        define(&mut vm, class, "doesNotUnderstand:arguments:", |_, b| {
            b.code.push_argument(2, 0);
            b.code.return_local();
        });
        // At the send the frame is exactly full; the fallback needs three
        // slots after popping only two.
        define(&mut vm, class, "full", |vm, b| {
            let missing = sel(vm, b, "foo:");
            let a = b.add_literal(Value::from_i64(1)).unwrap();
            b.code.push_self();
            b.code.push_constant(a);
            b.code.send(missing, 2);
            b.code.return_local();
        });
        let args = run(&mut vm, obj, "full").unwrap();
        assert_eq!(vm.array(args).unwrap(), &[Value::from_i64(1)]);
    }

    #[test]
    fn results_survive_collection_at_every_safepoint() {
        let mut plain = vm();
        let mut stress = stressed();
        for vm in [&mut plain, &mut stress] {
            let (class, obj) = test_class(vm, &[]);
            counting_loop(vm, class, 50);
            non_local_fixture(vm, class);
            vm.handles.push(obj);
            let loop_result = run(vm, obj, "loop").unwrap();
            let obj = vm.handles[0];
            let nlr_result = run(vm, obj, "outer").unwrap();
            assert_eq!(loop_result, Value::from_i64(1275));
            assert_eq!(nlr_result, Value::from_i64(43));
        }
        assert!(stress.heap.stats().collections > 0);
    }

    #[test]
    fn collection_keeps_cursor_and_stack() {
        let mut vm = vm();
        let (class, obj) = test_class(&mut vm, &[]);
        let m = define(&mut vm, class, "host", |_, b| {
            b.code.push_self();
            b.code.push_self();
            b.code.return_local();
        });
        let mut state = ExecutionState::new();
        bootstrap_frame(&mut vm, &mut state).unwrap();
        let f = frame::push_new_frame(&mut vm, &mut state, m, None).unwrap();
        frame::frame_mut(&mut vm, f).unwrap().set_argument(0, obj).unwrap();
        let d = vm.new_double(1.5).unwrap();
        frame::push(&mut vm, &state, d).unwrap();
        frame::push(&mut vm, &state, Value::from_i64(9)).unwrap();
        state.bytecode_index = 1;

        vm.request_gc();
        safepoint(&mut vm, &mut state).unwrap();

        assert_eq!(state.bytecode_index, 1);
        let f = state.current_frame().unwrap();
        let stack = frame::frame(&vm, f).unwrap().stack().to_vec();
        assert_eq!(stack[1], Value::from_i64(9));
        assert_eq!(vm.double_value(stack[0]).unwrap(), Some(1.5));
        assert!(state.method.unwrap().is(frame::frame(&vm, f).unwrap().method));
        assert!(!vm.heap.is_live_ref(d));
    }

    #[test]
    fn trace_and_silent_runs_agree() {
        let mut vm = vm();
        let (class, obj) = test_class(&mut vm, &[]);
        counting_loop(&mut vm, class, 20);
        non_local_fixture(&mut vm, class);
        let mut state = ExecutionState::new();
        for selector in ["loop", "outer"] {
            let silent = execute(&mut vm, &mut state, obj, selector, &[], false).unwrap();
            let traced = execute(&mut vm, &mut state, obj, selector, &[], true).unwrap();
            assert_eq!(silent, traced);
        }
    }

    #[test]
    fn inc_and_dec_cross_the_inline_range() {
        let mut vm = vm();
        let (class, obj) = test_class(&mut vm, &[]);
        define(&mut vm, class, "up", |_, b| {
            let c = b.add_literal(Value::from_i64(FIXNUM_MAX)).unwrap();
            b.code.push_constant(c);
            b.code.inc();
            b.code.return_local();
        });
        define(&mut vm, class, "roundTrip", |vm, b| {
            let c = b.add_literal(Value::from_i64(FIXNUM_MAX)).unwrap();
            let eq = sel(vm, b, "=");
            b.code.push_constant(c);
            b.code.inc();
            b.code.dec();
            b.code.push_constant(c);
            b.code.send(eq, 2);
            b.code.return_local();
        });
        let up = run(&mut vm, obj, "up").unwrap();
        assert!(up.is_ref());
        assert_eq!(vm.integer_value(up).unwrap(), Some(FIXNUM_MAX + 1));
        let same = run(&mut vm, obj, "roundTrip").unwrap();
        assert!(same.is(vm.special.true_obj));
    }

    #[test]
    fn inc_on_other_objects_sends_plus() {
        let mut vm = vm();
        let (class, obj) = test_class(&mut vm, &[]);
        define(&mut vm, class, "+", |_, b| {
            b.code.push_argument(1, 0);
            b.code.return_local();
        });
        define(&mut vm, class, "bump", |_, b| {
            b.code.push_self();
            b.code.inc();
            b.code.return_local();
        });
        assert_eq!(run(&mut vm, obj, "bump").unwrap(), Value::from_i64(1));
    }

    #[test]
    fn jump_if_greater_ignores_non_numbers() {
        let mut vm = vm();
        let (class, obj) = test_class(&mut vm, &[]);
        define(&mut vm, class, "cmp", |_, b| {
            let t = b.add_literal(Value::from_i64(1)).unwrap();
            let f = b.add_literal(Value::from_i64(0)).unwrap();
            b.code.push_self();
            b.code.push_self();
            let taken = b.code.jump_if_greater();
            b.code.pop();
            b.code.pop();
            b.code.push_constant(f);
            b.code.return_local();
            b.code.bind(taken);
            b.code.push_constant(t);
            b.code.return_local();
        });
        assert_eq!(run(&mut vm, obj, "cmp").unwrap(), Value::from_i64(0));
    }

    #[test]
    fn jump_out_of_method_is_fatal() {
        let mut vm = vm();
        let (class, obj) = test_class(&mut vm, &[]);
        let sig = vm.symbol("wild").unwrap();
        let mut bytes = vec![Op::Jump as u8];
        bytes.extend_from_slice(&100i32.to_le_bytes());
        let method = Method::new(sig, bytes, vec![], 1, 0, 1, false);
        let m = vm.allocate(vm.special.method_class, Body::Method(method)).unwrap();
        install_method(&mut vm, class, sig, m).unwrap();
        let err = run(&mut vm, obj, "wild").unwrap_err();
        assert_eq!(err, VmError::Fatal(FatalError::JumpOutOfRange(105)));
    }

    #[test]
    fn entry_selector_must_match_arguments() {
        let mut vm = vm();
        let (_, obj) = test_class(&mut vm, &[]);
        let mut state = ExecutionState::new();
        let err = execute(&mut vm, &mut state, obj, "at:", &[], false).unwrap_err();
        assert!(matches!(err, VmError::Fatal(FatalError::ArityMismatch { .. })));
    }

    #[test]
    fn wide_entry_sends_keep_the_bootstrap_frame_current() {
        let mut vm = vm();
        let (class, obj) = test_class(&mut vm, &[]);
        define(&mut vm, class, "a:b:c:d:", |_, b| {
            b.code.push_argument(4, 0);
            b.code.return_local();
        });
        let args = [1, 2, 3, 4].map(Value::from_i64);
        let mut state = ExecutionState::new();

        let first = execute(&mut vm, &mut state, obj, "a:b:c:d:", &args, false).unwrap();
        assert_eq!(first, Value::from_i64(4));
        let bottom = state.bootstrap_frame.unwrap();
        assert_eq!(state.frame, Some(bottom));
        assert!(!vm.object(bottom).unwrap().is_marked_invalid());

        let second = execute(&mut vm, &mut state, obj, "a:b:c:d:", &args, false).unwrap();
        assert_eq!(second, Value::from_i64(4));
        assert_eq!(state.bootstrap_frame, Some(bottom));
        assert_eq!(state.frame, Some(bottom));
        assert_eq!(frame::frame(&vm, bottom).unwrap().stack_depth(), 0);
    }

    #[test]
    fn escaped_block_goes_to_the_invoking_receiver() {
        let mut vm = vm();
        let object = vm.special.object_class;
        let maker = define_class(&mut vm, "Maker", Some(object), &[]).unwrap();
        let caller = define_class(&mut vm, "Caller", Some(object), &["escaped"]).unwrap();
        let blk = block(&mut vm, maker, 0, |_, b| {
            let c = b.add_literal(Value::from_i64(42)).unwrap();
            b.code.push_constant(c);
            b.code.return_non_local();
        });
        define(&mut vm, maker, "make", |_, b| {
            let lit = b.add_literal(blk).unwrap();
            b.code.push_block(lit);
            b.code.return_local();
        });
        define(&mut vm, caller, "call:", |vm, b| {
            let make = sel(vm, b, "make");
            let value = sel(vm, b, "value");
            b.code.push_argument(1, 0);
            b.code.unary_send(make);
            b.code.unary_send(value);
            b.code.return_local();
        });
        define(&mut vm, caller, "escapedBlock:", |_, b| {
            let c = b.add_literal(Value::from_i64(-1)).unwrap();
            b.code.push_argument(1, 0);
            b.code.pop_field(0);
            b.code.push_constant(c);
            b.code.return_local();
        });
        let m = vm.new_instance(maker).unwrap();
        let c = vm.new_instance(caller).unwrap();

        let mut state = ExecutionState::new();
        let result = execute(&mut vm, &mut state, c, "call:", &[m], false).unwrap();
        assert_eq!(result, Value::from_i64(-1));
        let escaped = vm.field(c, 0).unwrap();
        match &vm.object(escaped).unwrap().body {
            Body::Block(b) => assert!(b.method.is(blk)),
            _ => panic!("expected a block in the handler's field"),
        }
    }

    #[test]
    fn single_byte_forms_address_the_current_frame() {
        let mut vm = vm();
        let (class, obj) = test_class(&mut vm, &["a", "b"]);
        let mix = define(&mut vm, class, "mix:with:", |_, b| {
            b.set_num_locals(3);
            b.code.push_argument(1, 0);
            b.code.pop_local(0, 0);
            b.code.push_argument(2, 0);
            b.code.pop_local(2, 0);
            b.code.push_local(2, 0);
            b.code.pop_field(1);
            b.code.push_field(1);
            b.code.pop_local(1, 0);
            b.code.push_local(0, 0);
            b.code.pop_field(0);
            b.code.push_local(1, 0);
            b.code.pop();
            b.code.push_field(0);
            b.code.pop();
            b.code.return_field(0);
        });
        let bytes = vm.method(mix).unwrap().bytecodes().to_vec();
        assert!(bytes.iter().all(|&byte| Op::try_from(byte).unwrap().width() == 1));

        let mut state = ExecutionState::new();
        let args = [Value::from_i64(5), Value::from_i64(6)];
        let result = execute(&mut vm, &mut state, obj, "mix:with:", &args, false).unwrap();
        assert_eq!(result, Value::from_i64(5));
        assert_eq!(vm.field(obj, 0).unwrap(), Value::from_i64(5));
        assert_eq!(vm.field(obj, 1).unwrap(), Value::from_i64(6));
        assert_eq!(state.frame, state.bootstrap_frame);
    }

    /// `bump` increments field 0 in place, `next` also answers the new value.
    fn field_counter(vm: &mut VM, class: Value) {
        define(vm, class, "bump", |_, b| {
            b.code.inc_field(0);
            b.code.return_self();
        });
        define(vm, class, "next", |_, b| {
            b.code.inc_field_push(0);
            b.code.return_local();
        });
    }

    #[test]
    fn field_increments_handle_numbers_inline() {
        let mut vm = vm();
        let (class, obj) = test_class(&mut vm, &["count"]);
        field_counter(&mut vm, class);

        vm.set_field(obj, 0, Value::from_i64(1)).unwrap();
        assert!(run(&mut vm, obj, "bump").unwrap().is(obj));
        assert_eq!(run(&mut vm, obj, "next").unwrap(), Value::from_i64(3));
        assert_eq!(vm.field(obj, 0).unwrap(), Value::from_i64(3));

        vm.set_field(obj, 0, Value::from_i64(FIXNUM_MAX)).unwrap();
        let boxed = run(&mut vm, obj, "next").unwrap();
        assert!(boxed.is_ref());
        assert_eq!(vm.integer_value(boxed).unwrap(), Some(FIXNUM_MAX + 1));

        let d = vm.new_double(0.5).unwrap();
        vm.set_field(obj, 0, d).unwrap();
        let next = run(&mut vm, obj, "next").unwrap();
        assert_eq!(vm.double_value(next).unwrap(), Some(1.5));
    }

    #[test]
    fn field_increment_of_other_objects_sends_plus() {
        let mut plain = vm();
        let mut stress = stressed();
        for vm in [&mut plain, &mut stress] {
            let (class, obj) = test_class(vm, &["count"]);
            let object = vm.special.object_class;
            let tally = define_class(vm, "Tally", Some(object), &["n"]).unwrap();
            // Tally>>+ answers a fresh Tally holding n + the argument.
            define(vm, tally, "+", |vm, b| {
                let new = sel(vm, b, "new");
                let plus = sel(vm, b, "+");
                let set = sel(vm, b, "n:");
                let name = vm.symbol("Tally").unwrap();
                let global = b.add_unique_literal(name).unwrap();
                b.code.push_global(global);
                b.code.unary_send(new);
                b.code.push_field(0);
                b.code.push_argument(1, 0);
                b.code.send(plus, 2);
                b.code.send(set, 2);
                b.code.return_local();
            });
            define(vm, tally, "n:", |_, b| {
                b.code.push_argument(1, 0);
                b.code.pop_field(0);
                b.code.return_self();
            });
            field_counter(vm, class);

            let start = vm.new_instance(tally).unwrap();
            vm.set_field(start, 0, Value::from_i64(10)).unwrap();
            vm.set_field(obj, 0, start).unwrap();
            vm.handles.push(obj);
            let slot = vm.handles.len() - 1;

            run(vm, obj, "bump").unwrap();
            let obj = vm.handles[slot];
            let next = run(vm, obj, "next").unwrap();
            let obj = vm.handles[slot];
            let stored = vm.field(obj, 0).unwrap();
            assert!(next.is(stored));
            assert!(vm.class_of(stored).unwrap().is(vm.global("Tally").unwrap().unwrap()));
            assert_eq!(vm.field(stored, 0).unwrap(), Value::from_i64(12));
        }
        assert!(stress.heap.stats().collections > 0);
    }

    #[test]
    fn integer_receiver_cannot_increment_fields() {
        let mut vm = vm();
        let integer = vm.special.integer_class;
        define(&mut vm, integer, "bumpField", |_, b| {
            b.code.inc_field(0);
            b.code.return_self();
        });
        define(&mut vm, integer, "firstField", |_, b| b.code.return_field(0));
        for selector in ["bumpField", "firstField"] {
            let err = run(&mut vm, Value::from_i64(7), selector).unwrap_err();
            assert_eq!(err, VmError::Fatal(FatalError::IntegerHasNoFields(Value::from_i64(7))));
        }
    }
}
