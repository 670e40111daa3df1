//! Human-readable listings of methods and classes, and the per-instruction
//! trace line.

use std::fmt::Write;

use bytecode::{BytecodeDecoder, Instruction, decode_at};
use object::{Body, Value};

use crate::class::selectors;
use crate::frame;
use crate::interpreter::ExecutionState;
use crate::primitives::describe;
use crate::{VM, VmResult};

/// Printable form of a literal. Associations show their key and value.
fn literal_text(vm: &VM, literal: Value) -> VmResult<String> {
    if literal.is_ref() {
        if let Body::Association(a) = &vm.object(literal)?.body {
            return Ok(format!(
                "{} -> {}",
                vm.symbol_name(a.key)?,
                describe(vm, a.value)?
            ));
        }
    }
    describe(vm, literal)
}

fn annotate(vm: &VM, literals: &[Value], instr: &Instruction, at: usize) -> VmResult<String> {
    if let Some(index) = instr.literal() {
        return match literals.get(index as usize) {
            Some(&lit) => Ok(format!("  ; {}", literal_text(vm, lit)?)),
            None => Ok("  ; <missing literal>".into()),
        };
    }
    Ok(match instr.jump_target(at) {
        Some(target) => format!("  ; -> {target}"),
        None => String::new(),
    })
}

/// One trace line for the instruction under the cursor:
/// frame depth, bytecode index, instruction and resolved literal.
pub fn trace_line(vm: &VM, state: &ExecutionState) -> VmResult<String> {
    let depth = frame::depth(vm, state.current_frame()?)?;
    let method = vm.method(state.current_method()?)?;
    let at = state.bytecode_index;
    let instr = decode_at(method.bytecodes(), at)?;
    let note = annotate(vm, method.literals(), &instr, at)?;
    Ok(format!(
        "{:indent$}[{depth}] {}@{at:<4} {instr}{note}",
        "",
        vm.symbol_name(method.signature)?,
        indent = depth.min(32) * 2
    ))
}

/// Listing of a method and, indented below it, of the blocks it creates.
pub fn dump_method(vm: &VM, method: Value) -> VmResult<String> {
    let mut out = String::new();
    dump_method_into(vm, method, 0, &mut out)?;
    Ok(out)
}

fn dump_method_into(vm: &VM, method: Value, indent: usize, out: &mut String) -> VmResult<()> {
    let pad = " ".repeat(indent);
    let m = vm.method(method)?;
    let _ = writeln!(
        out,
        "{pad}{}{} args={} locals={} stack={}",
        if m.is_block { "[block] " } else { "" },
        vm.symbol_name(m.signature)?,
        m.num_args,
        m.num_locals,
        m.max_stack_depth
    );
    for item in BytecodeDecoder::new(m.bytecodes()) {
        let (at, instr) = item?;
        let note = annotate(vm, m.literals(), &instr, at)?;
        let _ = writeln!(out, "{pad}  {at:>4}  {instr}{note}");
    }
    for &literal in m.literals() {
        let is_block = literal.is_ref()
            && matches!(&vm.object(literal)?.body, Body::Method(inner) if inner.is_block);
        if is_block {
            dump_method_into(vm, literal, indent + 4, out)?;
        }
    }
    Ok(())
}

/// Listing of every method of `class` and of its class side.
pub fn dump_class(vm: &VM, class: Value) -> VmResult<String> {
    let mut out = String::new();
    let name = vm.class_name(class)?;
    let meta = vm.class_of(class)?;
    for (side, target) in [("", class), (" class", meta)] {
        for (selector, invokable) in selectors(vm, target)? {
            let _ = writeln!(out, "{name}{side}>>#{selector}");
            match &vm.object(invokable)?.body {
                Body::Method(_) => out.push_str(&dump_method(vm, invokable)?),
                Body::Primitive(p) => {
                    let _ = writeln!(out, "  <primitive {}>", p.index);
                }
                _ => out.push_str("  <not invokable>\n"),
            }
        }
    }
    Ok(out)
}
