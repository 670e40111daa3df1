use crate::frame::Frame;
use crate::header::{Header, ObjectType};
use crate::managed::{Managed, OBJECT_HEADER_SIZE, SLOT_SIZE, align_to_slot};
use crate::Value;

// ── Object ─────────────────────────────────────────────────────────

/// A heap object: header, class pointer and a typed body.
///
/// The heap owns every `Object`; mutator code only ever holds [`Value`]
/// references to them.
pub struct Object {
    pub header: Header,
    pub class: Value,
    pub body: Body,
}

/// The typed payload of a heap [`Object`].
pub enum Body {
    /// Ordinary instance with indexed fields.
    Instance(Vec<Value>),
    Array(Vec<Value>),
    /// An integer outside the inline fixnum range.
    Integer(i64),
    Double(f64),
    Str(Box<str>),
    Symbol(Symbol),
    Association(Association),
    Method(Method),
    Primitive(Primitive),
    Block(Block),
    Frame(Frame),
    Class(Class),
}

impl Body {
    pub fn object_type(&self) -> ObjectType {
        match self {
            Body::Instance(_) => ObjectType::Instance,
            Body::Array(_) => ObjectType::Array,
            Body::Integer(_) => ObjectType::Integer,
            Body::Double(_) => ObjectType::Double,
            Body::Str(_) => ObjectType::Str,
            Body::Symbol(_) => ObjectType::Symbol,
            Body::Association(_) => ObjectType::Association,
            Body::Method(_) => ObjectType::Method,
            Body::Primitive(_) => ObjectType::Primitive,
            Body::Block(_) => ObjectType::Block,
            Body::Frame(_) => ObjectType::Frame,
            Body::Class(_) => ObjectType::Class,
        }
    }
}

impl Object {
    pub fn new(class: Value, body: Body) -> Self {
        Self {
            header: Header::new(body.object_type()),
            class,
            body,
        }
    }

    #[inline(always)]
    pub fn object_type(&self) -> ObjectType {
        self.header.object_type()
    }
}

impl Managed for Object {
    #[inline(always)]
    fn header(&self) -> &Header {
        &self.header
    }

    #[inline(always)]
    fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    #[inline(always)]
    fn class(&self) -> Value {
        self.class
    }

    fn byte_size(&self) -> usize {
        OBJECT_HEADER_SIZE
            + match &self.body {
                Body::Instance(fields) => fields.len() * SLOT_SIZE,
                Body::Array(elements) => SLOT_SIZE + elements.len() * SLOT_SIZE,
                Body::Integer(_) | Body::Double(_) => SLOT_SIZE,
                Body::Str(s) => SLOT_SIZE + align_to_slot(s.len()),
                Body::Symbol(sym) => 2 * SLOT_SIZE + align_to_slot(sym.name.len()),
                Body::Association(_) => 2 * SLOT_SIZE,
                Body::Method(m) => m.payload_size(),
                Body::Primitive(_) => 3 * SLOT_SIZE,
                Body::Block(_) => 2 * SLOT_SIZE,
                Body::Frame(frame) => frame.payload_size(),
                Body::Class(c) => c.payload_size(),
            }
    }

    fn walk_references(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        visitor(&mut self.class);
        match &mut self.body {
            Body::Instance(values) | Body::Array(values) => {
                values.iter_mut().for_each(|v| visitor(v));
            }
            Body::Integer(_) | Body::Double(_) | Body::Str(_) | Body::Symbol(_) => {}
            Body::Association(assoc) => {
                visitor(&mut assoc.key);
                visitor(&mut assoc.value);
            }
            Body::Method(method) => method.walk_references(visitor),
            Body::Primitive(prim) => {
                visitor(&mut prim.signature);
                if let Some(holder) = &mut prim.holder {
                    visitor(holder);
                }
            }
            Body::Block(block) => {
                visitor(&mut block.method);
                visitor(&mut block.context);
            }
            Body::Frame(frame) => frame.walk_references(visitor),
            Body::Class(class) => class.walk_references(visitor),
        }
    }
}

// ── Symbol ─────────────────────────────────────────────────────────

/// An interned, identity-comparable name.
pub struct Symbol {
    pub name: Box<str>,
    /// Stable id assigned by the interner, survives relocation.
    pub id: u32,
    /// Number of arguments a message with this selector carries,
    /// receiver included.
    pub arity: u8,
}

impl Symbol {
    pub fn new(name: &str, id: u32) -> Self {
        Self {
            name: name.into(),
            id,
            arity: selector_arity(name),
        }
    }
}

/// Number of arguments (receiver included) of a selector.
///
/// Binary selectors start with an operator character; keyword selectors
/// have one argument per colon; everything else is unary.
pub fn selector_arity(name: &str) -> u8 {
    match name.chars().next() {
        Some(c) if !c.is_alphanumeric() && c != '_' => 2,
        Some(_) => name.bytes().filter(|&b| b == b':').count() as u8 + 1,
        None => 1,
    }
}

// ── Association ────────────────────────────────────────────────────

/// A global binding. Methods cache these in their literal table.
pub struct Association {
    pub key: Value,
    pub value: Value,
}

// ── Block ──────────────────────────────────────────────────────────

/// A closure: a block method plus the frame it was created in.
pub struct Block {
    pub method: Value,
    pub context: Value,
}

// ── Primitive ──────────────────────────────────────────────────────

/// A native routine installed in a class. `index` selects the routine in
/// the VM's primitive table.
pub struct Primitive {
    pub signature: Value,
    pub holder: Option<Value>,
    pub index: u32,
}

// ── Method ─────────────────────────────────────────────────────────

/// A compiled method or block method.
///
/// Immutable after assembly except for literal patching through
/// [`Method::patch_literal`].
pub struct Method {
    pub signature: Value,
    pub holder: Option<Value>,
    bytecodes: Box<[u8]>,
    literals: Box<[Value]>,
    /// Declared arguments, receiver included.
    pub num_args: u8,
    pub num_locals: u8,
    /// Maximum operand-stack depth computed at compile time.
    pub max_stack_depth: u16,
    pub is_block: bool,
}

impl Method {
    pub fn new(
        signature: Value,
        bytecodes: Vec<u8>,
        literals: Vec<Value>,
        num_args: u8,
        num_locals: u8,
        max_stack_depth: u16,
        is_block: bool,
    ) -> Self {
        Self {
            signature,
            holder: None,
            bytecodes: bytecodes.into_boxed_slice(),
            literals: literals.into_boxed_slice(),
            num_args,
            num_locals,
            max_stack_depth,
            is_block,
        }
    }

    #[inline(always)]
    pub fn bytecodes(&self) -> &[u8] {
        &self.bytecodes
    }

    #[inline(always)]
    pub fn bytecode(&self, index: usize) -> u8 {
        self.bytecodes[index]
    }

    #[inline(always)]
    pub fn literals(&self) -> &[Value] {
        &self.literals
    }

    #[inline(always)]
    pub fn literal(&self, index: usize) -> Value {
        self.literals[index]
    }

    /// Replace literal `index` with `new` if it still holds `current`.
    /// Returns the actual literal on mismatch.
    pub fn patch_literal(&mut self, index: usize, current: Value, new: Value) -> Result<(), Value> {
        let slot = &mut self.literals[index];
        if *slot != current {
            return Err(*slot);
        }
        *slot = new;
        Ok(())
    }

    /// Slots a frame for this method needs.
    pub fn frame_slots(&self) -> usize {
        self.num_args as usize + self.num_locals as usize + self.max_stack_depth as usize
    }

    fn payload_size(&self) -> usize {
        5 * SLOT_SIZE + self.literals.len() * SLOT_SIZE + align_to_slot(self.bytecodes.len())
    }

    fn walk_references(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        visitor(&mut self.signature);
        if let Some(holder) = &mut self.holder {
            visitor(holder);
        }
        self.literals.iter_mut().for_each(|v| visitor(v));
    }
}

// ── Class ──────────────────────────────────────────────────────────

/// A class. The object's own `class` is its metaclass.
pub struct Class {
    pub name: Value,
    pub superclass: Option<Value>,
    /// Instance field names (symbols), inherited fields first.
    pub instance_fields: Vec<Value>,
    /// Method dictionary: selector symbol to invokable.
    pub methods: Vec<(Value, Value)>,
}

impl Class {
    pub fn new(name: Value, superclass: Option<Value>, instance_fields: Vec<Value>) -> Self {
        Self {
            name,
            superclass,
            instance_fields,
            methods: Vec::new(),
        }
    }

    /// Look up an invokable defined directly in this class.
    pub fn local_method(&self, selector: Value) -> Option<Value> {
        self.methods
            .iter()
            .find(|(sel, _)| sel.is(selector))
            .map(|&(_, invokable)| invokable)
    }

    /// Insert or replace a method. Returns the replaced invokable.
    pub fn put_method(&mut self, selector: Value, invokable: Value) -> Option<Value> {
        match self.methods.iter_mut().find(|(sel, _)| sel.is(selector)) {
            Some(entry) => Some(core::mem::replace(&mut entry.1, invokable)),
            None => {
                self.methods.push((selector, invokable));
                None
            }
        }
    }

    pub fn field_index(&self, name: Value) -> Option<usize> {
        self.instance_fields.iter().position(|f| f.is(name))
    }

    fn payload_size(&self) -> usize {
        4 * SLOT_SIZE + self.instance_fields.len() * SLOT_SIZE + self.methods.len() * 2 * SLOT_SIZE
    }

    fn walk_references(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        visitor(&mut self.name);
        if let Some(superclass) = &mut self.superclass {
            visitor(superclass);
        }
        self.instance_fields.iter_mut().for_each(|v| visitor(v));
        for (selector, invokable) in self.methods.iter_mut() {
            visitor(selector);
            visitor(invokable);
        }
    }
}
