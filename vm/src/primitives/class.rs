use object::Value;

use crate::{VM, VmResult};

/// `Class>>new`: an instance with every field `nil`.
pub fn new(vm: &mut VM, receiver: Value) -> VmResult<Value> {
    vm.new_instance(receiver)
}

pub fn name(vm: &mut VM, receiver: Value) -> VmResult<Value> {
    Ok(vm.class(receiver)?.name)
}

pub fn superclass(vm: &mut VM, receiver: Value) -> VmResult<Value> {
    Ok(crate::class::superclass(vm, receiver)?.unwrap_or(vm.special.nil))
}
