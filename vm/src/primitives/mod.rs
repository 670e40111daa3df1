//! Native routines and their installation into classes.
//!
//! A primitive is registered under a class name and selector. Installing
//! the primitives of a class replaces the compiled methods of the same
//! selector with primitive invokables. A registration may carry the
//! bytecode hash of the method it expects to replace; when the compiled
//! method differs the primitive is not installed and the mismatch is
//! reported.
//!
//! Core primitives expect an empty declaration, a method whose whole body
//! is `return_self`. A reopened core class that declares the selector
//! without a body gets the primitive; one that gives it real code keeps
//! the compiled method.

use bytecode::BytecodeBuilder;
use object::{Body, Primitive, Value, selector_arity};

use crate::class::install_method;
use crate::interpreter::ExecutionState;
use crate::method::bytecode_hash;
use crate::{FatalError, VM, VmError, VmResult};

pub mod array;
pub mod block;
pub mod class;
pub mod double;
pub mod integer;
pub mod objects;
pub mod string;
pub mod system;

pub type UnaryFn = fn(&mut VM, Value) -> VmResult<Value>;
pub type BinaryFn = fn(&mut VM, Value, Value) -> VmResult<Value>;
pub type TernaryFn = fn(&mut VM, Value, Value, Value) -> VmResult<Value>;
pub type FrameFn = fn(&mut VM, &mut ExecutionState) -> VmResult<()>;

/// The shapes a native routine can take.
///
/// Safe routines receive their operands by value and return the result;
/// frame routines manipulate the caller's stack directly and may push a
/// new frame.
#[derive(Clone, Copy)]
pub enum Callable {
    Unary(UnaryFn),
    Binary(BinaryFn),
    Ternary(TernaryFn),
    /// Routine and the number of stack entries it consumes, receiver
    /// included.
    Frame(FrameFn, u8),
}

impl Callable {
    /// Operands including the receiver.
    pub fn arity(&self) -> usize {
        match self {
            Callable::Unary(_) => 1,
            Callable::Binary(_) => 2,
            Callable::Ternary(_) => 3,
            Callable::Frame(_, n) => *n as usize,
        }
    }
}

#[derive(Clone, Copy)]
pub struct PrimitiveDesc {
    pub class: &'static str,
    pub selector: &'static str,
    pub class_side: bool,
    pub callable: Callable,
    /// Bytecode hash of the method this primitive stands in for.
    pub hash: Option<u64>,
    /// Tried when `hash` does not match.
    pub second: Option<(Callable, Option<u64>)>,
}

impl PrimitiveDesc {
    pub const fn new(class: &'static str, selector: &'static str, callable: Callable) -> Self {
        Self {
            class,
            selector,
            class_side: false,
            callable,
            hash: None,
            second: None,
        }
    }

    pub const fn class_side(mut self) -> Self {
        self.class_side = true;
        self
    }

    pub const fn expecting(mut self, hash: u64) -> Self {
        self.hash = Some(hash);
        self
    }

    /// A second routine, installed when the compiled method matches `hash`
    /// instead. The core library has none; installers with several known
    /// method bodies register them.
    pub const fn or_else(mut self, callable: Callable, hash: Option<u64>) -> Self {
        self.second = Some((callable, hash));
        self
    }
}

/// Bytecode hash of a method declared without a body.
pub fn declaration_hash() -> u64 {
    let mut code = BytecodeBuilder::new();
    code.return_self();
    bytecode_hash(code.as_bytes())
}

pub fn default_primitives() -> Vec<PrimitiveDesc> {
    use Callable::{Binary, Frame, Ternary, Unary};
    let declared = declaration_hash();
    let descs = vec![
        PrimitiveDesc::new("Object", "class", Unary(objects::class)),
        PrimitiveDesc::new("Object", "==", Binary(objects::identical)),
        PrimitiveDesc::new("Object", "printString", Unary(objects::print_string)),
        PrimitiveDesc::new("Object", "hashcode", Unary(objects::hashcode)),
        PrimitiveDesc::new("Object", "halt", Unary(objects::halt)),
        PrimitiveDesc::new(
            "Object",
            "doesNotUnderstand:arguments:",
            Ternary(objects::does_not_understand),
        ),
        PrimitiveDesc::new("Object", "unknownGlobal:", Binary(objects::unknown_global)),
        PrimitiveDesc::new("Object", "escapedBlock:", Binary(objects::escaped_block)),
        PrimitiveDesc::new("Object", "error:", Binary(objects::error)),
        PrimitiveDesc::new("Class", "new", Unary(class::new)),
        PrimitiveDesc::new("Class", "name", Unary(class::name)),
        PrimitiveDesc::new("Class", "superclass", Unary(class::superclass)),
        PrimitiveDesc::new("Integer", "+", Binary(integer::add)),
        PrimitiveDesc::new("Integer", "-", Binary(integer::sub)),
        PrimitiveDesc::new("Integer", "*", Binary(integer::mul)),
        PrimitiveDesc::new("Integer", "/", Binary(integer::div)),
        PrimitiveDesc::new("Integer", "%", Binary(integer::modulo)),
        PrimitiveDesc::new("Integer", "<", Binary(integer::lt)),
        PrimitiveDesc::new("Integer", ">", Binary(integer::gt)),
        PrimitiveDesc::new("Integer", "<=", Binary(integer::le)),
        PrimitiveDesc::new("Integer", ">=", Binary(integer::ge)),
        PrimitiveDesc::new("Integer", "=", Binary(integer::eq)),
        PrimitiveDesc::new("Integer", "printString", Unary(integer::print_string)),
        PrimitiveDesc::new("Integer", "asDouble", Unary(integer::as_double)),
        PrimitiveDesc::new("Double", "+", Binary(double::add)),
        PrimitiveDesc::new("Double", "-", Binary(double::sub)),
        PrimitiveDesc::new("Double", "*", Binary(double::mul)),
        PrimitiveDesc::new("Double", "/", Binary(double::div)),
        PrimitiveDesc::new("Double", "<", Binary(double::lt)),
        PrimitiveDesc::new("Double", ">", Binary(double::gt)),
        PrimitiveDesc::new("Double", "=", Binary(double::eq)),
        PrimitiveDesc::new("Double", "printString", Unary(double::print_string)),
        PrimitiveDesc::new("Array", "new:", Binary(array::new)).class_side(),
        PrimitiveDesc::new("Array", "at:", Binary(array::at)),
        PrimitiveDesc::new("Array", "at:put:", Ternary(array::at_put)),
        PrimitiveDesc::new("Array", "length", Unary(array::length)),
        PrimitiveDesc::new("String", "printString", Unary(string::print_string)),
        PrimitiveDesc::new("String", "asString", Unary(string::as_string)),
        PrimitiveDesc::new("String", "asSymbol", Unary(string::as_symbol)),
        PrimitiveDesc::new("String", ",", Binary(string::concatenate)),
        PrimitiveDesc::new("String", "length", Unary(string::length)),
        PrimitiveDesc::new("Symbol", "printString", Unary(string::print_string)),
        PrimitiveDesc::new("Symbol", "asString", Unary(string::as_string)),
        PrimitiveDesc::new("Block", "numArgs", Unary(block::num_args)),
        PrimitiveDesc::new("Block1", "value", Frame(block::evaluate::<1>, 1)),
        PrimitiveDesc::new("Block2", "value:", Frame(block::evaluate::<2>, 2)),
        PrimitiveDesc::new("Block3", "value:with:", Frame(block::evaluate::<3>, 3)),
        PrimitiveDesc::new("System", "global:", Binary(system::global)),
        PrimitiveDesc::new("System", "global:put:", Ternary(system::global_put)),
        PrimitiveDesc::new("System", "printString:", Binary(system::print_string)),
        PrimitiveDesc::new("System", "printNewline", Unary(system::print_newline)),
        PrimitiveDesc::new("System", "exit:", Binary(system::exit)),
        PrimitiveDesc::new("System", "fullGC", Unary(system::full_gc)),
        PrimitiveDesc::new("System", "time", Unary(system::time)),
    ];
    descs.into_iter().map(|d| d.expecting(declared)).collect()
}

struct Entry {
    desc: PrimitiveDesc,
    primary: u32,
    second: Option<u32>,
}

/// Every known primitive, addressed by the index stored in primitive
/// invokables.
pub struct PrimitiveRegistry {
    entries: Vec<Entry>,
    table: Vec<Callable>,
}

/// What installing one primitive did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The class had no method for the selector.
    Added,
    /// A compiled method (or earlier primitive) was replaced.
    Replaced,
    /// The compiled method did not match any expected hash and was kept.
    HashMismatch,
}

impl PrimitiveRegistry {
    pub fn new(descs: Vec<PrimitiveDesc>) -> Self {
        let mut registry = Self {
            entries: Vec::with_capacity(descs.len()),
            table: Vec::with_capacity(descs.len()),
        };
        for desc in descs {
            registry.register(desc);
        }
        registry
    }

    pub fn core() -> Self {
        Self::new(default_primitives())
    }

    /// Add `desc`, superseding an earlier registration for the same slot.
    pub fn register(&mut self, desc: PrimitiveDesc) {
        let primary = self.push(desc.callable);
        let second = desc.second.map(|(callable, _)| self.push(callable));
        self.entries.retain(|e| {
            !(e.desc.class == desc.class
                && e.desc.selector == desc.selector
                && e.desc.class_side == desc.class_side)
        });
        self.entries.push(Entry {
            desc,
            primary,
            second,
        });
    }

    fn push(&mut self, callable: Callable) -> u32 {
        self.table.push(callable);
        (self.table.len() - 1) as u32
    }

    pub fn callable(&self, index: u32) -> VmResult<Callable> {
        self.table.get(index as usize).copied().ok_or_else(|| {
            FatalError::Primitive {
                class: "?".into(),
                selector: "?".into(),
                reason: format!("no primitive with index {index}"),
            }
            .into()
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registrations for `class`, as (desc, primary index, second index).
    fn for_class<'a>(
        &'a self,
        class: &'a str,
        class_side: bool,
    ) -> impl Iterator<Item = (PrimitiveDesc, u32, Option<u32>)> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.desc.class == class && e.desc.class_side == class_side)
            .map(|e| (e.desc, e.primary, e.second))
    }
}

/// Install the registered primitives of `class` on both sides.
///
/// `show_warning` reports primitives whose selector the class does not
/// define. Hash mismatches are warnings, or fatal with
/// `strict_primitive_hashes`.
pub fn install_primitives(
    vm: &mut VM,
    class: Value,
    show_warning: bool,
) -> VmResult<Vec<(String, InstallOutcome)>> {
    let name = vm.class_name(class)?;
    let mut outcomes = Vec::new();
    let mut mismatch = false;

    for class_side in [false, true] {
        let target = crate::class::side(vm, class, class_side)?;
        let descs: Vec<_> = vm.primitives.for_class(&name, class_side).collect();
        for (desc, primary, second) in descs {
            let outcome = install_one(vm, target, &desc, primary, second)?;
            match outcome {
                InstallOutcome::Added if show_warning => log::warn!(
                    "primitive {name}>>#{} is not in the class definition",
                    desc.selector
                ),
                InstallOutcome::HashMismatch => {
                    mismatch = true;
                    log::warn!(
                        "{name}>>#{} does not match its primitive, keeping the compiled method",
                        desc.selector
                    );
                }
                _ => {}
            }
            outcomes.push((desc.selector.to_owned(), outcome));
        }
    }

    if mismatch && vm.settings.strict_primitive_hashes {
        return Err(FatalError::HashMismatch(name).into());
    }
    log::debug!("installed {} primitives in {name}", outcomes.len());
    Ok(outcomes)
}

fn install_one(
    vm: &mut VM,
    target: Value,
    desc: &PrimitiveDesc,
    primary: u32,
    second: Option<u32>,
) -> VmResult<InstallOutcome> {
    let expected = selector_arity(desc.selector) as usize;
    if desc.callable.arity() != expected {
        return Err(FatalError::ArityMismatch {
            selector: desc.selector.to_owned(),
            expected,
            actual: desc.callable.arity(),
        }
        .into());
    }

    let selector = vm.symbol(desc.selector)?;
    let existing = vm.class(target)?.local_method(selector);
    let compiled_hash = match existing {
        Some(m) => match &vm.object(m)?.body {
            Body::Method(method) => Some(bytecode_hash(method.bytecodes())),
            _ => None,
        },
        None => None,
    };

    let matches = |hash: Option<u64>| match (hash, compiled_hash) {
        (Some(expected), Some(actual)) => expected == actual,
        _ => true,
    };
    let index = if matches(desc.hash) {
        primary
    } else {
        match (second, desc.second) {
            (Some(index), Some((callable, hash))) if matches(hash) => {
                if callable.arity() != expected {
                    return Err(FatalError::ArityMismatch {
                        selector: desc.selector.to_owned(),
                        expected,
                        actual: callable.arity(),
                    }
                    .into());
                }
                index
            }
            _ => return Ok(InstallOutcome::HashMismatch),
        }
    };

    let primitive = vm.allocate(
        vm.special.primitive_class,
        Body::Primitive(Primitive {
            signature: selector,
            holder: None,
            index,
        }),
    )?;
    let replaced = install_method(vm, target, selector, primitive)?;
    Ok(if replaced.is_some() {
        InstallOutcome::Replaced
    } else {
        InstallOutcome::Added
    })
}

// ── operand helpers ───────────────────────────────────────────────────

/// A recoverable error raised by a primitive.
pub(crate) fn signal(class: &str, message: impl Into<String>) -> VmError {
    VmError::signal(class, message)
}

pub(crate) fn expect_integer(vm: &VM, v: Value) -> VmResult<i64> {
    vm.integer_value(v)?
        .ok_or_else(|| crate::mismatch("Integer", v))
}

pub(crate) fn expect_double(vm: &VM, v: Value) -> VmResult<f64> {
    vm.double_value(v)?.ok_or_else(|| crate::mismatch("Double", v))
}

pub(crate) fn expect_symbol(vm: &VM, v: Value) -> VmResult<String> {
    Ok(vm.symbol_name(v)?.to_owned())
}

/// Printable form of any value, used by `printString` and the shell.
pub fn describe(vm: &VM, v: Value) -> VmResult<String> {
    if let Some(n) = v.as_fixnum() {
        return Ok(n.to_string());
    }
    if v.is(vm.special.nil) {
        return Ok("nil".into());
    }
    let obj = vm.object(v)?;
    Ok(match &obj.body {
        Body::Integer(n) => n.to_string(),
        Body::Double(d) => format!("{d:?}"),
        Body::Str(s) => s.to_string(),
        Body::Symbol(sym) => format!("#{}", sym.name),
        Body::Class(c) => vm.symbol_name(c.name)?.to_owned(),
        Body::Array(elements) => {
            let parts = elements
                .iter()
                .map(|&e| describe(vm, e))
                .collect::<VmResult<Vec<_>>>()?;
            format!("({})", parts.join(" "))
        }
        Body::Method(m) => format!("a Method #{}", vm.symbol_name(m.signature)?),
        Body::Primitive(p) => format!("a Primitive #{}", vm.symbol_name(p.signature)?),
        _ if v.is(vm.special.true_obj) => "true".into(),
        _ if v.is(vm.special.false_obj) => "false".into(),
        _ => {
            let name = vm.class_name(obj.class)?;
            let article = match name.chars().next() {
                Some(c) if "AEIOU".contains(c) => "an",
                _ => "a",
            };
            format!("{article} {name}")
        }
    })
}
