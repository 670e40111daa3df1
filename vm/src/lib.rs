pub mod asm;
mod bootstrap;
pub mod class;
pub mod disassembler;
pub mod error;
pub mod frame;
pub mod interpreter;
pub mod method;
pub mod primitives;
pub mod send;
pub mod shell;
pub mod symbols;

use std::io::Write;
use std::time::Instant;

use heap::{Heap, HeapSettings, RootProvider};
use object::{
    Association, Body, Class, Method, Object, SpecialObjects, Symbol, Value,
};
use rustc_hash::FxHashMap;

pub use error::{FatalError, VmError, VmResult};
pub use interpreter::ExecutionState;

use primitives::PrimitiveRegistry;
use symbols::{Selectors, SymbolTable};

/// Runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct VmSettings {
    pub heap: HeapSettings,
    /// A primitive whose expected bytecode hash does not match the method it
    /// replaces is fatal instead of a warning.
    pub strict_primitive_hashes: bool,
    pub print_gc_stats: bool,
}

/// The VM owns the heap, the bootstrapped special objects and every table
/// that holds heap references outside of the heap.
pub struct VM {
    pub heap: Heap<Object>,
    pub special: SpecialObjects,
    pub symbols: SymbolTable,
    pub selectors: Selectors,
    /// Global name to association.
    pub globals: FxHashMap<Box<str>, Value>,
    pub primitives: PrimitiveRegistry,
    pub settings: VmSettings,
    /// Values a driver keeps alive across runs of the dispatch loop.
    pub handles: Vec<Value>,
    /// When set, output of the printing primitives is captured here instead
    /// of going to stdout.
    pub transcript: Option<String>,
    pub(crate) gc_requested: bool,
    started: Instant,
}

/// Every root of the VM for one collection: the execution cursor, the
/// special objects, interned symbols, well-known selectors, globals and
/// driver handles.
pub(crate) struct Roots<'a> {
    state: &'a mut ExecutionState,
    special: &'a mut SpecialObjects,
    symbols: &'a mut SymbolTable,
    selectors: &'a mut Selectors,
    globals: &'a mut FxHashMap<Box<str>, Value>,
    handles: &'a mut Vec<Value>,
}

impl RootProvider for Roots<'_> {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        self.state.visit_mut(visitor);
        self.special.visit_mut(visitor);
        self.symbols.visit_mut(visitor);
        self.selectors.visit_mut(visitor);
        for v in self.globals.values_mut() {
            visitor(v);
        }
        for v in self.handles.iter_mut() {
            visitor(v);
        }
    }
}

impl VM {
    pub(crate) fn with_roots<T>(
        &mut self,
        state: &mut ExecutionState,
        f: impl FnOnce(&mut Heap<Object>, &mut Roots<'_>) -> T,
    ) -> T {
        let mut roots = Roots {
            state,
            special: &mut self.special,
            symbols: &mut self.symbols,
            selectors: &mut self.selectors,
            globals: &mut self.globals,
            handles: &mut self.handles,
        };
        f(&mut self.heap, &mut roots)
    }

    /// Collect now. Every value not reachable from a root is stale afterwards.
    pub fn full_gc(&mut self, state: &mut ExecutionState) {
        self.gc_requested = false;
        self.with_roots(state, |heap, roots| heap.full_gc(roots));
    }

    /// Collect if the heap or a primitive asked for it.
    pub(crate) fn maybe_collect(&mut self, state: &mut ExecutionState) -> bool {
        if self.gc_requested {
            self.full_gc(state);
            return true;
        }
        self.with_roots(state, |heap, roots| heap.safepoint(roots))
    }

    pub(crate) fn request_gc(&mut self) {
        self.gc_requested = true;
    }

    pub fn uptime_millis(&self) -> u128 {
        self.started.elapsed().as_millis()
    }

    // ── heap access ───────────────────────────────────────────────────

    #[inline]
    pub fn object(&self, v: Value) -> VmResult<&Object> {
        Ok(self.heap.get(v)?)
    }

    #[inline]
    pub fn object_mut(&mut self, v: Value) -> VmResult<&mut Object> {
        Ok(self.heap.get_mut(v)?)
    }

    pub fn allocate(&mut self, class: Value, body: Body) -> VmResult<Value> {
        Ok(self.heap.allocate(Object::new(class, body))?)
    }

    #[inline]
    pub fn write_barrier(&mut self, source: Value, target: Value) {
        self.heap.write_barrier(source, target);
    }

    /// Class of any value. Inline integers are `Integer`s.
    #[inline]
    pub fn class_of(&self, v: Value) -> VmResult<Value> {
        if v.is_fixnum() {
            return Ok(self.special.integer_class);
        }
        Ok(self.object(v)?.class)
    }

    pub fn boolean(&self, b: bool) -> Value {
        self.special.boolean(b)
    }

    pub fn is_nil(&self, v: Value) -> bool {
        v.is(self.special.nil)
    }

    // ── typed views ───────────────────────────────────────────────────

    pub fn method(&self, v: Value) -> VmResult<&Method> {
        match &self.object(v)?.body {
            Body::Method(m) => Ok(m),
            _ => Err(mismatch("Method", v)),
        }
    }

    pub fn method_mut(&mut self, v: Value) -> VmResult<&mut Method> {
        match &mut self.object_mut(v)?.body {
            Body::Method(m) => Ok(m),
            _ => Err(mismatch("Method", v)),
        }
    }

    pub fn class(&self, v: Value) -> VmResult<&Class> {
        match &self.object(v)?.body {
            Body::Class(c) => Ok(c),
            _ => Err(mismatch("Class", v)),
        }
    }

    pub fn class_mut(&mut self, v: Value) -> VmResult<&mut Class> {
        match &mut self.object_mut(v)?.body {
            Body::Class(c) => Ok(c),
            _ => Err(mismatch("Class", v)),
        }
    }

    pub fn array(&self, v: Value) -> VmResult<&[Value]> {
        match &self.object(v)?.body {
            Body::Array(elements) => Ok(elements),
            _ => Err(mismatch("Array", v)),
        }
    }

    pub fn array_mut(&mut self, v: Value) -> VmResult<&mut Vec<Value>> {
        match &mut self.object_mut(v)?.body {
            Body::Array(elements) => Ok(elements),
            _ => Err(mismatch("Array", v)),
        }
    }

    /// Characters of a string or a symbol.
    pub fn string(&self, v: Value) -> VmResult<&str> {
        match &self.object(v)?.body {
            Body::Str(s) => Ok(s),
            Body::Symbol(sym) => Ok(&sym.name),
            _ => Err(mismatch("String", v)),
        }
    }

    pub fn symbol_name(&self, v: Value) -> VmResult<&str> {
        match &self.object(v)?.body {
            Body::Symbol(sym) => Ok(&sym.name),
            _ => Err(mismatch("Symbol", v)),
        }
    }

    /// Arguments a message with selector `v` carries, receiver included.
    pub fn symbol_arity(&self, v: Value) -> VmResult<usize> {
        match &self.object(v)?.body {
            Body::Symbol(sym) => Ok(sym.arity as usize),
            _ => Err(mismatch("Symbol", v)),
        }
    }

    /// Value of an inline or boxed integer.
    pub fn integer_value(&self, v: Value) -> VmResult<Option<i64>> {
        if let Some(n) = v.as_fixnum() {
            return Ok(Some(n));
        }
        Ok(match self.object(v)?.body {
            Body::Integer(n) => Some(n),
            _ => None,
        })
    }

    pub fn double_value(&self, v: Value) -> VmResult<Option<f64>> {
        if v.is_fixnum() {
            return Ok(None);
        }
        Ok(match self.object(v)?.body {
            Body::Double(d) => Some(d),
            _ => None,
        })
    }

    /// Numeric view of an inline integer, boxed integer or double.
    pub fn number(&self, v: Value) -> VmResult<Option<Number>> {
        if let Some(n) = v.as_fixnum() {
            return Ok(Some(Number::Int(n)));
        }
        Ok(match self.object(v)?.body {
            Body::Integer(n) => Some(Number::Int(n)),
            Body::Double(d) => Some(Number::Double(d)),
            _ => None,
        })
    }

    /// Box `n` as the smallest fitting representation.
    pub fn new_number(&mut self, n: Number) -> VmResult<Value> {
        match n {
            Number::Int(i) => self.new_integer(i),
            Number::Double(d) => self.new_double(d),
        }
    }

    /// Field `index` of an instance.
    pub fn field(&self, obj: Value, index: usize) -> VmResult<Value> {
        let fields = self.fields(obj)?;
        fields.get(index).copied().ok_or_else(|| {
            FatalError::FieldOutOfRange {
                index,
                len: fields.len(),
            }
            .into()
        })
    }

    pub fn set_field(&mut self, obj: Value, index: usize, value: Value) -> VmResult<()> {
        if obj.is_fixnum() {
            return Err(FatalError::IntegerHasNoFields(obj).into());
        }
        match &mut self.object_mut(obj)?.body {
            Body::Instance(fields) => {
                let len = fields.len();
                let slot = fields
                    .get_mut(index)
                    .ok_or(FatalError::FieldOutOfRange { index, len })?;
                *slot = value;
            }
            _ => return Err(mismatch("object with fields", obj)),
        }
        self.write_barrier(obj, value);
        Ok(())
    }

    fn fields(&self, obj: Value) -> VmResult<&[Value]> {
        if obj.is_fixnum() {
            return Err(FatalError::IntegerHasNoFields(obj).into());
        }
        match &self.object(obj)?.body {
            Body::Instance(fields) => Ok(fields),
            _ => Err(mismatch("object with fields", obj)),
        }
    }

    pub fn class_name(&self, class: Value) -> VmResult<String> {
        let name = self.class(class)?.name;
        Ok(self.symbol_name(name)?.to_owned())
    }

    // ── allocation helpers ────────────────────────────────────────────

    /// Intern `name`.
    pub fn symbol(&mut self, name: &str) -> VmResult<Value> {
        if let Some(sym) = self.symbols.get(name) {
            return Ok(sym);
        }
        let id = self.symbols.next_id();
        let sym = self.allocate(self.special.symbol_class, Body::Symbol(Symbol::new(name, id)))?;
        self.symbols.insert(name, sym);
        Ok(sym)
    }

    pub fn new_string(&mut self, s: &str) -> VmResult<Value> {
        self.allocate(self.special.string_class, Body::Str(s.into()))
    }

    pub fn new_array(&mut self, elements: Vec<Value>) -> VmResult<Value> {
        self.allocate(self.special.array_class, Body::Array(elements))
    }

    pub fn new_double(&mut self, d: f64) -> VmResult<Value> {
        self.allocate(self.special.double_class, Body::Double(d))
    }

    /// An inline integer when `n` fits, a boxed one otherwise.
    pub fn new_integer(&mut self, n: i64) -> VmResult<Value> {
        match Value::try_from_i64(n) {
            Some(v) => Ok(v),
            None => self.allocate(self.special.integer_class, Body::Integer(n)),
        }
    }

    /// A fresh instance with every field `nil`.
    pub fn new_instance(&mut self, class: Value) -> VmResult<Value> {
        let fields = self.class(class)?.instance_fields.len();
        let nil = self.special.nil;
        self.allocate(class, Body::Instance(vec![nil; fields]))
    }

    // ── globals ───────────────────────────────────────────────────────

    pub fn global_association(&self, name: &str) -> Option<Value> {
        self.globals.get(name).copied()
    }

    pub fn global(&self, name: &str) -> VmResult<Option<Value>> {
        let Some(assoc) = self.global_association(name) else {
            return Ok(None);
        };
        match &self.object(assoc)?.body {
            Body::Association(a) => Ok(Some(a.value)),
            _ => Err(mismatch("Association", assoc)),
        }
    }

    /// Bind `name`, reusing its association so cached lookups observe the
    /// new value.
    pub fn set_global(&mut self, name: &str, value: Value) -> VmResult<()> {
        if let Some(assoc) = self.global_association(name) {
            match &mut self.object_mut(assoc)?.body {
                Body::Association(a) => a.value = value,
                _ => return Err(mismatch("Association", assoc)),
            }
            self.write_barrier(assoc, value);
            return Ok(());
        }
        let key = self.symbol(name)?;
        let assoc = self.allocate(
            self.special.association_class,
            Body::Association(Association { key, value }),
        )?;
        self.globals.insert(name.into(), assoc);
        Ok(())
    }

    // ── output ────────────────────────────────────────────────────────

    pub fn print(&mut self, text: &str) {
        match &mut self.transcript {
            Some(buffer) => buffer.push_str(text),
            None => {
                let mut out = std::io::stdout().lock();
                if let Err(e) = out.write_all(text.as_bytes()).and_then(|_| out.flush()) {
                    log::warn!("failed to write output: {e}");
                }
            }
        }
    }
}

/// A numeric operand, unboxed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Double(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Double(d) => d,
        }
    }
}

pub(crate) fn mismatch(expected: &'static str, got: Value) -> VmError {
    VmError::Fatal(FatalError::TypeMismatch { expected, got })
}
