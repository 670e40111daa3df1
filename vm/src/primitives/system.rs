use object::Value;

use crate::primitives::{describe, expect_integer, expect_symbol};
use crate::{VM, VmError, VmResult};

/// `System>>global:`, `nil` when unbound.
pub fn global(vm: &mut VM, _system: Value, name: Value) -> VmResult<Value> {
    let name = expect_symbol(vm, name)?;
    Ok(vm.global(&name)?.unwrap_or(vm.special.nil))
}

pub fn global_put(vm: &mut VM, _system: Value, name: Value, value: Value) -> VmResult<Value> {
    let name = expect_symbol(vm, name)?;
    vm.set_global(&name, value)?;
    Ok(value)
}

/// Print a string as is, anything else in its printed form.
pub fn print_string(vm: &mut VM, system: Value, value: Value) -> VmResult<Value> {
    let text = match vm.string(value) {
        Ok(s) => s.to_owned(),
        _ => describe(vm, value)?,
    };
    vm.print(&text);
    Ok(system)
}

pub fn print_newline(vm: &mut VM, system: Value) -> VmResult<Value> {
    vm.print("\n");
    Ok(system)
}

pub fn exit(vm: &mut VM, _system: Value, code: Value) -> VmResult<Value> {
    let code = expect_integer(vm, code)?;
    Err(VmError::Exit(code as i32))
}

/// Ask for a collection at the next safepoint.
pub fn full_gc(vm: &mut VM, _system: Value) -> VmResult<Value> {
    vm.request_gc();
    Ok(vm.special.true_obj)
}

/// Milliseconds since the VM started.
pub fn time(vm: &mut VM, _system: Value) -> VmResult<Value> {
    let ms = vm.uptime_millis() as i64;
    vm.new_integer(ms)
}
