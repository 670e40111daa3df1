//! Message sends and the reflective fallbacks.
//!
//! A send looks the selector up in the receiver's class and invokes what it
//! finds. Methods get a new frame and the loop continues there; primitives
//! run to completion right away. When lookup fails, or a global is
//! missing, or a non-local return finds its home gone, the interpreter
//! sends a reflective message instead and lets the program decide.

use object::{Body, Value};

use crate::class::{lookup_invokable, superclass};
use crate::frame::{self, self_of};
use crate::interpreter::ExecutionState;
use crate::primitives::Callable;
use crate::{FatalError, VM, VmResult, mismatch};

/// `Send`: the receiver sits below the selector's arguments.
pub fn do_send(vm: &mut VM, state: &mut ExecutionState, selector: Value) -> VmResult<()> {
    let arity = vm.symbol_arity(selector)?;
    let receiver = frame::stack_element(vm, state, arity - 1)?;
    let class = vm.class_of(receiver)?;
    send(vm, state, selector, class)
}

/// `UnarySend`: the receiver is on top.
pub fn do_unary_send(vm: &mut VM, state: &mut ExecutionState, selector: Value) -> VmResult<()> {
    let receiver = frame::top(vm, state)?;
    let class = vm.class_of(receiver)?;
    send(vm, state, selector, class)
}

/// `SuperSend`: look up in the superclass of the class holding the method
/// that lexically encloses the current frame.
pub fn do_super_send(vm: &mut VM, state: &mut ExecutionState, selector: Value) -> VmResult<()> {
    let home = frame::outer_context(vm, state.current_frame()?)?;
    let method = frame::frame(vm, home)?.method;
    let holder = vm
        .method(method)?
        .holder
        .ok_or(FatalError::TypeMismatch {
            expected: "method with holder",
            got: method,
        })?;
    match superclass(vm, holder)? {
        Some(parent) => send(vm, state, selector, parent),
        None => send_does_not_understand(vm, state, selector),
    }
}

/// Resolve `selector` in `class` and invoke it, or fall back to
/// `doesNotUnderstand:arguments:`.
pub fn send(
    vm: &mut VM,
    state: &mut ExecutionState,
    selector: Value,
    class: Value,
) -> VmResult<()> {
    match lookup_invokable(vm, class, selector)? {
        Some(invokable) => invoke(vm, state, invokable),
        None => send_does_not_understand(vm, state, selector),
    }
}

/// Invoke a method or primitive on the receiver and arguments on top of the
/// current frame's stack.
pub fn invoke(vm: &mut VM, state: &mut ExecutionState, invokable: Value) -> VmResult<()> {
    let object = vm.object(invokable)?;
    if !object.header.object_type().is_invokable() {
        return Err(mismatch("invokable", invokable));
    }
    let primitive = match &object.body {
        Body::Primitive(p) => Some((p.index, p.signature)),
        _ => None,
    };
    match primitive {
        None => {
            let callee = frame::push_new_frame(vm, state, invokable, None)?;
            frame::copy_arguments_from_caller(vm, callee)
        }
        Some((index, signature)) => invoke_primitive(vm, state, index, signature),
    }
}

/// Run primitive `index`. Safe primitives take their operands off the
/// stack and push the result; frame primitives work on the stack
/// themselves.
pub fn invoke_primitive(
    vm: &mut VM,
    state: &mut ExecutionState,
    index: u32,
    signature: Value,
) -> VmResult<()> {
    let callable = vm.primitives.callable(index)?;
    log::trace!("primitive #{}", vm.symbol_name(signature)?);
    let result = match callable {
        Callable::Unary(f) => {
            let receiver = frame::pop(vm, state)?;
            f(vm, receiver)?
        }
        Callable::Binary(f) => {
            let arg = frame::pop(vm, state)?;
            let receiver = frame::pop(vm, state)?;
            f(vm, receiver, arg)?
        }
        Callable::Ternary(f) => {
            let second = frame::pop(vm, state)?;
            let first = frame::pop(vm, state)?;
            let receiver = frame::pop(vm, state)?;
            f(vm, receiver, first, second)?
        }
        Callable::Frame(f, _) => return f(vm, state),
    };
    frame::push(vm, state, result)
}

/// Look up a reflective handler on `receiver`, which must exist.
fn handler(vm: &VM, receiver: Value, selector: Value) -> VmResult<Value> {
    let class = vm.class_of(receiver)?;
    match lookup_invokable(vm, class, selector)? {
        Some(invokable) => Ok(invokable),
        None => Err(FatalError::MissingHandler {
            class: vm.class_name(class)?,
            selector: vm.symbol_name(selector)?.to_owned(),
        }
        .into()),
    }
}

/// Replace `receiver arg1 .. argk` on the stack with
/// `receiver selector #(arg1 .. argk)` and send
/// `doesNotUnderstand:arguments:`.
pub fn send_does_not_understand(
    vm: &mut VM,
    state: &mut ExecutionState,
    selector: Value,
) -> VmResult<()> {
    let arity = vm.symbol_arity(selector)?;
    let count = arity - 1;
    let mut args = vec![vm.special.nil; count];
    for slot in args.iter_mut().rev() {
        *slot = frame::pop(vm, state)?;
    }
    let receiver = frame::pop(vm, state)?;
    let array = vm.new_array(args)?;
    log::debug!(
        "{} does not understand #{}",
        vm.class_name(vm.class_of(receiver)?)?,
        vm.symbol_name(selector)?
    );

    frame::ensure_stack_room(vm, state, 3)?;
    frame::push(vm, state, receiver)?;
    frame::push(vm, state, selector)?;
    frame::push(vm, state, array)?;
    let dnu = handler(vm, receiver, vm.selectors.does_not_understand)?;
    invoke(vm, state, dnu)
}

/// Send `unknownGlobal:` with the global's name to the current receiver.
pub fn send_unknown_global(vm: &mut VM, state: &mut ExecutionState, name: Value) -> VmResult<()> {
    let receiver = self_of(vm, state.current_frame()?)?;
    log::debug!("unknown global {}", vm.symbol_name(name)?);
    frame::ensure_stack_room(vm, state, 2)?;
    frame::push(vm, state, receiver)?;
    frame::push(vm, state, name)?;
    let unknown = handler(vm, receiver, vm.selectors.unknown_global)?;
    invoke(vm, state, unknown)
}

/// A non-local return whose home activation has already returned.
///
/// The block activation is abandoned and its invoker receives the result
/// of sending `escapedBlock:` with the block to the invoker's receiver.
pub fn send_escaped_block(vm: &mut VM, state: &mut ExecutionState) -> VmResult<()> {
    let current = state.current_frame()?;
    let (block, invoker) = {
        let f = frame::frame(vm, current)?;
        (f.argument(0)?, f.previous.ok_or(FatalError::NoCaller(current))?)
    };
    let sender = self_of(vm, invoker)?;

    let popped = frame::pop_frame(vm, state)?;
    let num_args = frame::frame(vm, popped)?.num_args();
    frame::frame_mut(vm, state.current_frame()?)?.pop_n(num_args)?;
    log::debug!("escaped block {block:?}, notifying {sender:?}");

    frame::ensure_stack_room(vm, state, 2)?;
    frame::push(vm, state, sender)?;
    frame::push(vm, state, block)?;
    let escaped = handler(vm, sender, vm.selectors.escaped_block)?;
    invoke(vm, state, escaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{define_class, install_method};
    use crate::interpreter::{bootstrap_frame, execute};
    use crate::method::MethodBuilder;
    use crate::{VmError, VmSettings};

    fn setup() -> (VM, ExecutionState, Value, Value) {
        let mut vm = VM::new(VmSettings::default()).unwrap();
        let object = vm.special.object_class;
        let class = define_class(&mut vm, "Subject", Some(object), &[]).unwrap();
        let obj = vm.new_instance(class).unwrap();
        let mut state = ExecutionState::new();
        bootstrap_frame(&mut vm, &mut state).unwrap();
        (vm, state, class, obj)
    }

    fn method(vm: &mut VM, class: Value, selector: &str, emit: impl FnOnce(&mut MethodBuilder)) {
        let sig = vm.symbol(selector).unwrap();
        let mut b = MethodBuilder::method(vm, sig).unwrap();
        emit(&mut b);
        let m = b.assemble(vm).unwrap();
        install_method(vm, class, sig, m).unwrap();
    }

    #[test]
    fn method_send_copies_arguments_into_new_frame() {
        let (mut vm, mut state, class, obj) = setup();
        method(&mut vm, class, "at:put:", |b| {
            b.code.push_argument(2, 0);
            b.code.return_local();
        });
        let sel = vm.symbol("at:put:").unwrap();
        for v in [obj, Value::from_i64(1), Value::from_i64(2)] {
            frame::push(&mut vm, &state, v).unwrap();
        }
        let caller = state.current_frame().unwrap();
        do_send(&mut vm, &mut state, sel).unwrap();

        let callee = state.current_frame().unwrap();
        assert!(!callee.is(caller));
        let f = frame::frame(&vm, callee).unwrap();
        assert_eq!(f.arguments(), &[obj, Value::from_i64(1), Value::from_i64(2)]);
        assert_eq!(f.previous, Some(caller));
        // The caller keeps its arguments until the callee returns.
        assert_eq!(frame::frame(&vm, caller).unwrap().stack_depth(), 3);
    }

    #[test]
    fn binary_primitive_replaces_operands_with_result() {
        let (mut vm, mut state, _, _) = setup();
        let plus = vm.symbol("+").unwrap();
        frame::push(&mut vm, &state, Value::from_i64(3)).unwrap();
        frame::push(&mut vm, &state, Value::from_i64(4)).unwrap();
        do_send(&mut vm, &mut state, plus).unwrap();
        assert_eq!(frame::top(&vm, &state).unwrap(), Value::from_i64(7));
        let f = frame::frame(&vm, state.current_frame().unwrap()).unwrap();
        assert_eq!(f.stack_depth(), 1);
    }

    #[test]
    fn super_send_starts_above_the_holder() {
        let (mut vm, _, parent, _) = setup();
        let child = define_class(&mut vm, "Child", Some(parent), &[]).unwrap();
        method(&mut vm, parent, "who", |b| {
            let c = b.add_literal(Value::from_i64(1)).unwrap();
            b.code.push_constant(c);
            b.code.return_local();
        });
        method(&mut vm, child, "who", |b| {
            let c = b.add_literal(Value::from_i64(2)).unwrap();
            b.code.push_constant(c);
            b.code.return_local();
        });
        let who = vm.symbol("who").unwrap();
        method(&mut vm, child, "parentWho", |b| {
            let w = b.add_literal(who).unwrap();
            b.code.push_self();
            b.code.super_send(w, 1);
            b.code.return_local();
        });
        let obj = vm.new_instance(child).unwrap();
        let mut state = ExecutionState::new();
        let own = execute(&mut vm, &mut state, obj, "who", &[], false).unwrap();
        let inherited = execute(&mut vm, &mut state, obj, "parentWho", &[], false).unwrap();
        assert_eq!(own, Value::from_i64(2));
        assert_eq!(inherited, Value::from_i64(1));
    }

    #[test]
    fn default_does_not_understand_signals() {
        let (mut vm, mut state, _, obj) = setup();
        let err = execute(&mut vm, &mut state, obj, "frobnicate", &[], false).unwrap_err();
        match err {
            VmError::Signal { message, .. } => assert!(message.contains("frobnicate")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_handler_is_fatal() {
        let (mut vm, mut state, class, obj) = setup();
        // Detach the class from Object so no default handler is found.
        vm.class_mut(class).unwrap().superclass = None;
        let err = execute(&mut vm, &mut state, obj, "frobnicate", &[], false).unwrap_err();
        assert!(matches!(err, VmError::Fatal(FatalError::MissingHandler { .. })));
    }

    #[test]
    fn only_methods_and_primitives_are_invoked() {
        let (mut vm, mut state, _, obj) = setup();
        let err = invoke(&mut vm, &mut state, obj).unwrap_err();
        assert!(matches!(
            err,
            VmError::Fatal(FatalError::TypeMismatch { expected: "invokable", .. })
        ));
    }
}
