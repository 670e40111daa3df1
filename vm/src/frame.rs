//! Activation frames in the heap.
//!
//! Frames are ordinary heap objects, so every operation here goes through
//! the [`VM`] and re-resolves the frame on each access: a collection may
//! have moved it since the caller last looked.

use object::{Body, Frame, Managed, Value};

use crate::interpreter::ExecutionState;
use crate::{FatalError, VM, VmResult, mismatch};

pub fn frame(vm: &VM, v: Value) -> VmResult<&Frame> {
    match &vm.object(v)?.body {
        Body::Frame(f) => Ok(f),
        _ => Err(mismatch("Frame", v)),
    }
}

pub fn frame_mut(vm: &mut VM, v: Value) -> VmResult<&mut Frame> {
    match &mut vm.object_mut(v)?.body {
        Body::Frame(f) => Ok(f),
        _ => Err(mismatch("Frame", v)),
    }
}

// ── context chain ─────────────────────────────────────────────────────

/// Follow the forwarding of frames abandoned by an emergency resize.
pub fn resolve(vm: &VM, mut v: Value) -> VmResult<Value> {
    while let Some(next) = frame(vm, v)?.forwarded {
        v = next;
    }
    Ok(v)
}

/// The frame `level` lexical-context hops away from `v`.
pub fn context_at(vm: &VM, v: Value, level: u8) -> VmResult<Value> {
    let mut current = resolve(vm, v)?;
    for _ in 0..level {
        let Some(context) = frame(vm, current)?.context else {
            return Err(FatalError::ContextChain { frame: v, level }.into());
        };
        current = resolve(vm, context)?;
    }
    Ok(current)
}

/// The method activation at the end of the context chain, with the number
/// of hops taken to reach it.
pub fn outer_context_with_hops(vm: &VM, v: Value) -> VmResult<(Value, usize)> {
    let mut current = resolve(vm, v)?;
    let mut hops = 0;
    while let Some(context) = frame(vm, current)?.context {
        current = resolve(vm, context)?;
        hops += 1;
    }
    Ok((current, hops))
}

pub fn outer_context(vm: &VM, v: Value) -> VmResult<Value> {
    Ok(outer_context_with_hops(vm, v)?.0)
}

/// The receiver of the method activation enclosing `v`.
pub fn self_of(vm: &VM, v: Value) -> VmResult<Value> {
    let outer = outer_context(vm, v)?;
    Ok(frame(vm, outer)?.argument(0)?)
}

/// Whether `v` is still on the stack. Popped frames lose their caller.
pub fn has_previous_frame(vm: &VM, v: Value) -> VmResult<bool> {
    Ok(frame(vm, resolve(vm, v)?)?.previous.is_some())
}

/// Number of frames from `v` down to the bottom of the stack.
pub fn depth(vm: &VM, v: Value) -> VmResult<usize> {
    let mut n = 0;
    let mut current = Some(v);
    while let Some(f) = current {
        n += 1;
        current = frame(vm, f)?.previous;
    }
    Ok(n)
}

// ── current frame stack ───────────────────────────────────────────────

pub fn push(vm: &mut VM, state: &ExecutionState, value: Value) -> VmResult<()> {
    let current = state.current_frame()?;
    frame_mut(vm, current)?.push(value)?;
    vm.write_barrier(current, value);
    Ok(())
}

pub fn pop(vm: &mut VM, state: &ExecutionState) -> VmResult<Value> {
    Ok(frame_mut(vm, state.current_frame()?)?.pop()?)
}

pub fn top(vm: &VM, state: &ExecutionState) -> VmResult<Value> {
    Ok(frame(vm, state.current_frame()?)?.top()?)
}

pub fn stack_element(vm: &VM, state: &ExecutionState, depth: usize) -> VmResult<Value> {
    Ok(frame(vm, state.current_frame()?)?.stack_element(depth)?)
}

pub fn set_top(vm: &mut VM, state: &ExecutionState, value: Value) -> VmResult<()> {
    let current = state.current_frame()?;
    frame_mut(vm, current)?.set_top(value)?;
    vm.write_barrier(current, value);
    Ok(())
}

// ── push / pop ────────────────────────────────────────────────────────

/// Make `v` the current frame and load the cursor from it.
pub fn set_frame(vm: &VM, state: &mut ExecutionState, v: Value) -> VmResult<()> {
    let f = frame(vm, v)?;
    state.frame = Some(v);
    state.method = Some(f.method);
    state.bytecode_index = f.bytecode_index;
    Ok(())
}

/// Activate `method` on top of the current frame.
///
/// The caller's resumption point is flushed first. `context` is the
/// captured frame of a block activation, `None` for a method. Arguments
/// are not copied; see [`copy_arguments_from_caller`].
pub fn push_new_frame(
    vm: &mut VM,
    state: &mut ExecutionState,
    method: Value,
    context: Option<Value>,
) -> VmResult<Value> {
    let (num_args, num_locals, max_stack) = {
        let m = vm.method(method)?;
        (
            m.num_args as usize,
            m.num_locals as usize,
            m.max_stack_depth as usize,
        )
    };
    state.flush(vm)?;
    let mut f = Frame::new(method, num_args, num_locals, max_stack, vm.special.nil);
    f.previous = state.frame;
    f.context = context;
    let v = vm.allocate(vm.special.frame_class, Body::Frame(f))?;
    state.frame = Some(v);
    state.method = Some(method);
    state.bytecode_index = 0;
    Ok(v)
}

/// Copy the top `num_args` entries of the caller's stack into the
/// arguments of `callee`. The caller keeps them until the callee returns.
pub fn copy_arguments_from_caller(vm: &mut VM, callee: Value) -> VmResult<()> {
    let (caller, n) = {
        let f = frame(vm, callee)?;
        (f.previous.ok_or(FatalError::NoCaller(callee))?, f.num_args())
    };
    let args: Vec<Value> = {
        let c = frame(vm, caller)?;
        (0..n)
            .map(|i| c.stack_element(n - 1 - i))
            .collect::<Result<_, _>>()?
    };
    let f = frame_mut(vm, callee)?;
    for (i, arg) in args.into_iter().enumerate() {
        f.set_argument(i, arg)?;
    }
    Ok(())
}

/// Pop the current frame and resume its caller. The popped frame loses its
/// caller link, which is how escaped blocks are detected later.
pub fn pop_frame(vm: &mut VM, state: &mut ExecutionState) -> VmResult<Value> {
    let current = state.current_frame()?;
    let previous = frame_mut(vm, current)?
        .previous
        .take()
        .ok_or(FatalError::NoCaller(current))?;
    set_frame(vm, state, previous)?;
    Ok(current)
}

/// Pop the current frame, drop its arguments from the caller's stack and
/// push `result` there.
pub fn pop_frame_and_push_result(
    vm: &mut VM,
    state: &mut ExecutionState,
    result: Value,
) -> VmResult<()> {
    let popped = pop_frame(vm, state)?;
    let num_args = frame(vm, popped)?.num_args();
    let caller = state.current_frame()?;
    let f = frame_mut(vm, caller)?;
    f.pop_n(num_args)?;
    f.push(result)?;
    vm.write_barrier(caller, result);
    Ok(())
}

// ── emergency frames ──────────────────────────────────────────────────

/// Make sure the current frame has `required` free stack slots, replacing
/// it with a larger copy if it does not.
///
/// The old frame is marked invalid and forwards to the replacement, so
/// blocks that captured it observe the replacement. A replaced bootstrap
/// frame is replaced in the cursor as well.
pub fn ensure_stack_room(
    vm: &mut VM,
    state: &mut ExecutionState,
    required: usize,
) -> VmResult<()> {
    let current = state.current_frame()?;
    let remaining = frame(vm, current)?.remaining_stack_size();
    if remaining >= required {
        return Ok(());
    }
    state.flush(vm)?;
    let replacement = frame(vm, current)?.with_extra_capacity(required - remaining, vm.special.nil);
    let new_frame = vm.allocate(vm.special.frame_class, Body::Frame(replacement))?;

    let old = vm.object_mut(current)?;
    old.mark_invalid();
    if let Body::Frame(f) = &mut old.body {
        f.forwarded = Some(new_frame);
        f.previous = None;
    }
    vm.write_barrier(current, new_frame);

    log::debug!(
        "emergency frame {new_frame:?} replaces {current:?} (+{} slots)",
        required - remaining
    );
    state.frame = Some(new_frame);
    if state.bootstrap_frame == Some(current) {
        state.bootstrap_frame = Some(new_frame);
    }
    Ok(())
}
