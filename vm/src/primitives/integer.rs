//! Integer arithmetic over inline and boxed integers. A double operand
//! turns the operation into a double one.

use object::Value;

use crate::primitives::{expect_integer, signal};
use crate::{FatalError, Number, VM, VmResult, mismatch};

fn operand(vm: &VM, v: Value) -> VmResult<Number> {
    vm.number(v)?.ok_or_else(|| mismatch("Number", v))
}

fn arithmetic(
    vm: &mut VM,
    receiver: Value,
    arg: Value,
    op: &'static str,
    int: fn(i64, i64) -> Option<i64>,
    double: fn(f64, f64) -> f64,
) -> VmResult<Value> {
    let a = expect_integer(vm, receiver)?;
    match operand(vm, arg)? {
        Number::Int(b) => {
            let n = int(a, b).ok_or(FatalError::IntegerOverflow(op))?;
            vm.new_integer(n)
        }
        Number::Double(b) => vm.new_double(double(a as f64, b)),
    }
}

fn compare(
    vm: &mut VM,
    receiver: Value,
    arg: Value,
    int: fn(&i64, &i64) -> bool,
    double: fn(&f64, &f64) -> bool,
) -> VmResult<Value> {
    let a = expect_integer(vm, receiver)?;
    let result = match operand(vm, arg)? {
        Number::Int(b) => int(&a, &b),
        Number::Double(b) => double(&(a as f64), &b),
    };
    Ok(vm.boolean(result))
}

fn nonzero(vm: &VM, arg: Value) -> VmResult<()> {
    match operand(vm, arg)? {
        Number::Int(0) => Err(signal("ZeroDivide", "division by zero")),
        _ => Ok(()),
    }
}

pub fn add(vm: &mut VM, receiver: Value, arg: Value) -> VmResult<Value> {
    arithmetic(vm, receiver, arg, "+", i64::checked_add, |a, b| a + b)
}

pub fn sub(vm: &mut VM, receiver: Value, arg: Value) -> VmResult<Value> {
    arithmetic(vm, receiver, arg, "-", i64::checked_sub, |a, b| a - b)
}

pub fn mul(vm: &mut VM, receiver: Value, arg: Value) -> VmResult<Value> {
    arithmetic(vm, receiver, arg, "*", i64::checked_mul, |a, b| a * b)
}

/// Truncating division.
pub fn div(vm: &mut VM, receiver: Value, arg: Value) -> VmResult<Value> {
    nonzero(vm, arg)?;
    arithmetic(vm, receiver, arg, "/", i64::checked_div, |a, b| a / b)
}

/// Modulo with the sign of the divisor.
pub fn modulo(vm: &mut VM, receiver: Value, arg: Value) -> VmResult<Value> {
    nonzero(vm, arg)?;
    arithmetic(
        vm,
        receiver,
        arg,
        "%",
        |a, b| {
            let r = a.checked_rem(b)?;
            Some(if r != 0 && (r < 0) != (b < 0) { r + b } else { r })
        },
        |a, b| {
            let r = a % b;
            if r != 0.0 && (r < 0.0) != (b < 0.0) { r + b } else { r }
        },
    )
}

pub fn lt(vm: &mut VM, receiver: Value, arg: Value) -> VmResult<Value> {
    compare(vm, receiver, arg, i64::lt, f64::lt)
}

pub fn gt(vm: &mut VM, receiver: Value, arg: Value) -> VmResult<Value> {
    compare(vm, receiver, arg, i64::gt, f64::gt)
}

pub fn le(vm: &mut VM, receiver: Value, arg: Value) -> VmResult<Value> {
    compare(vm, receiver, arg, i64::le, f64::le)
}

pub fn ge(vm: &mut VM, receiver: Value, arg: Value) -> VmResult<Value> {
    compare(vm, receiver, arg, i64::ge, f64::ge)
}

/// Numeric equality; anything that is not a number is unequal.
pub fn eq(vm: &mut VM, receiver: Value, arg: Value) -> VmResult<Value> {
    if vm.number(arg)?.is_none() {
        return Ok(vm.special.false_obj);
    }
    compare(vm, receiver, arg, i64::eq, f64::eq)
}

pub fn print_string(vm: &mut VM, receiver: Value) -> VmResult<Value> {
    let n = expect_integer(vm, receiver)?;
    vm.new_string(&n.to_string())
}

pub fn as_double(vm: &mut VM, receiver: Value) -> VmResult<Value> {
    let n = expect_integer(vm, receiver)?;
    vm.new_double(n as f64)
}
