use object::Value;

use crate::primitives::expect_double;
use crate::{Number, VM, VmResult, mismatch};

fn operand(vm: &VM, v: Value) -> VmResult<f64> {
    vm.number(v)?
        .map(Number::as_f64)
        .ok_or_else(|| mismatch("Number", v))
}

fn arithmetic(vm: &mut VM, receiver: Value, arg: Value, f: fn(f64, f64) -> f64) -> VmResult<Value> {
    let a = expect_double(vm, receiver)?;
    let b = operand(vm, arg)?;
    vm.new_double(f(a, b))
}

fn compare(vm: &mut VM, receiver: Value, arg: Value, f: fn(&f64, &f64) -> bool) -> VmResult<Value> {
    let a = expect_double(vm, receiver)?;
    let b = operand(vm, arg)?;
    Ok(vm.boolean(f(&a, &b)))
}

pub fn add(vm: &mut VM, receiver: Value, arg: Value) -> VmResult<Value> {
    arithmetic(vm, receiver, arg, |a, b| a + b)
}

pub fn sub(vm: &mut VM, receiver: Value, arg: Value) -> VmResult<Value> {
    arithmetic(vm, receiver, arg, |a, b| a - b)
}

pub fn mul(vm: &mut VM, receiver: Value, arg: Value) -> VmResult<Value> {
    arithmetic(vm, receiver, arg, |a, b| a * b)
}

pub fn div(vm: &mut VM, receiver: Value, arg: Value) -> VmResult<Value> {
    arithmetic(vm, receiver, arg, |a, b| a / b)
}

pub fn lt(vm: &mut VM, receiver: Value, arg: Value) -> VmResult<Value> {
    compare(vm, receiver, arg, f64::lt)
}

pub fn gt(vm: &mut VM, receiver: Value, arg: Value) -> VmResult<Value> {
    compare(vm, receiver, arg, f64::gt)
}

pub fn eq(vm: &mut VM, receiver: Value, arg: Value) -> VmResult<Value> {
    if vm.number(arg)?.is_none() {
        return Ok(vm.special.false_obj);
    }
    compare(vm, receiver, arg, f64::eq)
}

pub fn print_string(vm: &mut VM, receiver: Value) -> VmResult<Value> {
    let d = expect_double(vm, receiver)?;
    vm.new_string(&format!("{d:?}"))
}
