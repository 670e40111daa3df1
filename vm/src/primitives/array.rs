use object::Value;

use crate::primitives::{expect_integer, signal};
use crate::{VM, VmResult};

/// Zero-based slot for a one-based `index`, or an `IndexOutOfBounds`
/// signal.
fn slot(vm: &VM, array: Value, index: Value) -> VmResult<usize> {
    let i = expect_integer(vm, index)?;
    let len = vm.array(array)?.len();
    if i < 1 || i as u64 > len as u64 {
        return Err(signal(
            "IndexOutOfBounds",
            format!("index {i} out of bounds for array of length {len}"),
        ));
    }
    Ok(i as usize - 1)
}

/// `Array class>>new:`
pub fn new(vm: &mut VM, _class: Value, length: Value) -> VmResult<Value> {
    let n = expect_integer(vm, length)?;
    let n = usize::try_from(n)
        .map_err(|_| signal("IndexOutOfBounds", format!("negative array length {n}")))?;
    let nil = vm.special.nil;
    vm.new_array(vec![nil; n])
}

pub fn at(vm: &mut VM, receiver: Value, index: Value) -> VmResult<Value> {
    let i = slot(vm, receiver, index)?;
    Ok(vm.array(receiver)?[i])
}

pub fn at_put(vm: &mut VM, receiver: Value, index: Value, value: Value) -> VmResult<Value> {
    let i = slot(vm, receiver, index)?;
    vm.array_mut(receiver)?[i] = value;
    vm.write_barrier(receiver, value);
    Ok(value)
}

pub fn length(vm: &mut VM, receiver: Value) -> VmResult<Value> {
    let len = vm.array(receiver)?.len();
    vm.new_integer(len as i64)
}
