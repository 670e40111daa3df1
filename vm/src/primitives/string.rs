use object::{Body, Value};

use crate::primitives::describe;
use crate::{VM, VmResult, mismatch};

fn text(vm: &VM, v: Value) -> VmResult<String> {
    if v.is_fixnum() {
        return Err(mismatch("String", v));
    }
    Ok(vm.string(v)?.to_owned())
}

/// Strings print quoted, symbols with a leading `#`.
pub fn print_string(vm: &mut VM, receiver: Value) -> VmResult<Value> {
    let printed = match &vm.object(receiver)?.body {
        Body::Str(s) => format!("'{s}'"),
        _ => describe(vm, receiver)?,
    };
    vm.new_string(&printed)
}

pub fn as_string(vm: &mut VM, receiver: Value) -> VmResult<Value> {
    if let Body::Str(_) = vm.object(receiver)?.body {
        return Ok(receiver);
    }
    let s = text(vm, receiver)?;
    vm.new_string(&s)
}

pub fn as_symbol(vm: &mut VM, receiver: Value) -> VmResult<Value> {
    let s = text(vm, receiver)?;
    vm.symbol(&s)
}

pub fn concatenate(vm: &mut VM, receiver: Value, arg: Value) -> VmResult<Value> {
    let mut s = text(vm, receiver)?;
    s.push_str(&text(vm, arg)?);
    vm.new_string(&s)
}

pub fn length(vm: &mut VM, receiver: Value) -> VmResult<Value> {
    let n = vm.string(receiver)?.chars().count();
    vm.new_integer(n as i64)
}
