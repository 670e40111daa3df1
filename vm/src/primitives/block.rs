use object::{Body, Value};

use crate::frame;
use crate::interpreter::ExecutionState;
use crate::{FatalError, VM, VmResult, mismatch};

/// Evaluate the block below its `ARGS - 1` arguments on the caller's
/// stack. The new activation's lexical context is the frame the block
/// captured; its argument 0 is the block itself.
pub fn evaluate<const ARGS: usize>(vm: &mut VM, state: &mut ExecutionState) -> VmResult<()> {
    let block = frame::stack_element(vm, state, ARGS - 1)?;
    let (method, context) = match &vm.object(block)?.body {
        Body::Block(b) => (b.method, b.context),
        _ => return Err(mismatch("Block", block)),
    };
    let declared = vm.method(method)?.num_args as usize;
    if declared != ARGS {
        return Err(FatalError::ArityMismatch {
            selector: "value".into(),
            expected: ARGS,
            actual: declared,
        }
        .into());
    }
    let callee = frame::push_new_frame(vm, state, method, Some(context))?;
    frame::copy_arguments_from_caller(vm, callee)
}

/// Parameters the block takes, not counting itself.
pub fn num_args(vm: &mut VM, receiver: Value) -> VmResult<Value> {
    let method = match &vm.object(receiver)?.body {
        Body::Block(b) => b.method,
        _ => return Err(mismatch("Block", receiver)),
    };
    let n = vm.method(method)?.num_args as i64 - 1;
    Ok(Value::from_i64(n))
}
