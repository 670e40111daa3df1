use std::hash::Hasher;

use object::{Body, Value};
use rustc_hash::FxHasher;

use crate::primitives::{describe, signal};
use crate::{VM, VmResult};

pub fn class(vm: &mut VM, receiver: Value) -> VmResult<Value> {
    vm.class_of(receiver)
}

pub fn identical(vm: &mut VM, receiver: Value, other: Value) -> VmResult<Value> {
    Ok(vm.boolean(receiver.is(other)))
}

pub fn print_string(vm: &mut VM, receiver: Value) -> VmResult<Value> {
    let text = describe(vm, receiver)?;
    vm.new_string(&text)
}

/// Strings and symbols hash their characters and numbers their value.
/// Other objects hash their current heap slot, which changes when a
/// collection moves them.
pub fn hashcode(vm: &mut VM, receiver: Value) -> VmResult<Value> {
    if receiver.is_fixnum() {
        return Ok(receiver);
    }
    let hash = match &vm.object(receiver)?.body {
        Body::Str(s) => {
            let mut hasher = FxHasher::default();
            hasher.write(s.as_bytes());
            hasher.finish() as i64
        }
        Body::Symbol(sym) => sym.id as i64,
        Body::Integer(n) => *n,
        Body::Double(d) => d.to_bits() as i64,
        _ => receiver.index() as i64,
    };
    vm.new_integer(hash >> 2)
}

pub fn halt(vm: &mut VM, receiver: Value) -> VmResult<Value> {
    log::info!("halt: {}", describe(vm, receiver)?);
    Ok(receiver)
}

/// Default `doesNotUnderstand:arguments:`.
pub fn does_not_understand(
    vm: &mut VM,
    receiver: Value,
    selector: Value,
    args: Value,
) -> VmResult<Value> {
    let class = vm.class_name(vm.class_of(receiver)?)?;
    let arguments = describe(vm, args)?;
    Err(signal(
        "MessageNotUnderstood",
        format!(
            "{} does not understand #{} {arguments}",
            describe_receiver(vm, receiver, &class)?,
            vm.symbol_name(selector)?
        ),
    ))
}

/// Default `unknownGlobal:`.
pub fn unknown_global(vm: &mut VM, _receiver: Value, name: Value) -> VmResult<Value> {
    Err(signal(
        "UnknownGlobal",
        format!("unknown global {}", vm.symbol_name(name)?),
    ))
}

/// Default `escapedBlock:`.
pub fn escaped_block(vm: &mut VM, receiver: Value, _block: Value) -> VmResult<Value> {
    let class = vm.class_name(vm.class_of(receiver)?)?;
    Err(signal(
        "EscapedBlock",
        format!(
            "a block escaped from {} and attempted a non-local return",
            describe_receiver(vm, receiver, &class)?
        ),
    ))
}

pub fn error(vm: &mut VM, _receiver: Value, message: Value) -> VmResult<Value> {
    let text = match vm.string(message) {
        Ok(s) => s.to_owned(),
        Err(_) => describe(vm, message)?,
    };
    Err(signal("Error", text))
}

fn describe_receiver(vm: &VM, receiver: Value, class: &str) -> VmResult<String> {
    let text = describe(vm, receiver)?;
    Ok(if text.ends_with(class) {
        text
    } else {
        format!("{text} ({class})")
    })
}
