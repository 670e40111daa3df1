//! Construction of a VM with its core classes.
//!
//! Classes are named by symbols and symbols are instances of a class, so the
//! core classes are allocated with placeholder names first and patched once
//! `Symbol` exists. Nothing collects during bootstrap: allocation never
//! triggers a collection.

use std::time::Instant;

use heap::Heap;
use object::{Body, Class, SpecialObjects, Value};
use rustc_hash::FxHashMap;

use crate::primitives::{PrimitiveRegistry, install_primitives};
use crate::symbols::{Selectors, SymbolTable};
use crate::{VM, VmResult, VmSettings};

/// Stands in for every special object until it is allocated.
const PLACEHOLDER: Value = Value::from_raw(0);

/// Core classes, parents before children.
const CORE_CLASSES: [(&str, Option<&str>); 21] = [
    ("Object", None),
    ("Class", Some("Object")),
    ("Metaclass", Some("Class")),
    ("Nil", Some("Object")),
    ("Boolean", Some("Object")),
    ("True", Some("Boolean")),
    ("False", Some("Boolean")),
    ("Integer", Some("Object")),
    ("Double", Some("Object")),
    ("Array", Some("Object")),
    ("String", Some("Object")),
    ("Symbol", Some("String")),
    ("Method", Some("Object")),
    ("Primitive", Some("Object")),
    ("Association", Some("Object")),
    ("Frame", Some("Object")),
    ("System", Some("Object")),
    ("Block", Some("Object")),
    ("Block1", Some("Block")),
    ("Block2", Some("Block")),
    ("Block3", Some("Block")),
];

impl VM {
    pub fn new(settings: VmSettings) -> VmResult<Self> {
        let mut vm = VM {
            heap: Heap::new(settings.heap.clone()),
            special: SpecialObjects::uniform(PLACEHOLDER),
            symbols: SymbolTable::default(),
            selectors: Selectors {
                does_not_understand: PLACEHOLDER,
                unknown_global: PLACEHOLDER,
                escaped_block: PLACEHOLDER,
                plus: PLACEHOLDER,
                minus: PLACEHOLDER,
                run: PLACEHOLDER,
                run_with: PLACEHOLDER,
            },
            globals: FxHashMap::default(),
            primitives: PrimitiveRegistry::core(),
            settings,
            handles: Vec::new(),
            transcript: None,
            gc_requested: false,
            started: Instant::now(),
        };

        vm.special.nil = vm.allocate(PLACEHOLDER, Body::Instance(Vec::new()))?;

        let mut classes: Vec<(&str, Value)> = Vec::with_capacity(CORE_CLASSES.len());
        for (name, parent) in CORE_CLASSES {
            let superclass = match parent {
                Some(p) => classes.iter().find(|(n, _)| *n == p).map(|&(_, c)| c),
                None => None,
            };
            let class = vm.allocate(
                PLACEHOLDER,
                Body::Class(Class::new(PLACEHOLDER, superclass, Vec::new())),
            )?;
            classes.push((name, class));
        }
        let find = |name: &str| {
            classes
                .iter()
                .find(|(n, _)| *n == name)
                .map(|&(_, c)| c)
                .unwrap_or(PLACEHOLDER)
        };
        vm.register_special_classes(&find);

        for &(name, class) in &classes {
            vm.finish_class(name, class)?;
        }

        vm.object_mut(vm.special.nil)?.class = vm.special.nil_class;
        vm.special.true_obj = vm.new_instance(vm.special.true_class)?;
        vm.special.false_obj = vm.new_instance(vm.special.false_class)?;
        vm.special.system = vm.new_instance(vm.special.system_class)?;
        vm.set_global("nil", vm.special.nil)?;
        vm.set_global("true", vm.special.true_obj)?;
        vm.set_global("false", vm.special.false_obj)?;
        vm.set_global("system", vm.special.system)?;

        vm.selectors = Selectors {
            does_not_understand: vm.symbol(Selectors::DOES_NOT_UNDERSTAND)?,
            unknown_global: vm.symbol(Selectors::UNKNOWN_GLOBAL)?,
            escaped_block: vm.symbol(Selectors::ESCAPED_BLOCK)?,
            plus: vm.symbol("+")?,
            minus: vm.symbol("-")?,
            run: vm.symbol("run")?,
            run_with: vm.symbol("run:")?,
        };

        for &(_, class) in &classes {
            install_primitives(&mut vm, class, false)?;
        }
        log::debug!(
            "bootstrapped {} classes, {} primitives, {} live objects",
            classes.len(),
            vm.primitives.len(),
            vm.heap.len()
        );
        Ok(vm)
    }

    fn register_special_classes(&mut self, find: &dyn Fn(&str) -> Value) {
        let s = &mut self.special;
        s.object_class = find("Object");
        s.class_class = find("Class");
        s.metaclass_class = find("Metaclass");
        s.nil_class = find("Nil");
        s.boolean_class = find("Boolean");
        s.true_class = find("True");
        s.false_class = find("False");
        s.integer_class = find("Integer");
        s.double_class = find("Double");
        s.array_class = find("Array");
        s.string_class = find("String");
        s.symbol_class = find("Symbol");
        s.method_class = find("Method");
        s.primitive_class = find("Primitive");
        s.association_class = find("Association");
        s.frame_class = find("Frame");
        s.system_class = find("System");
        s.block_class = find("Block");
        s.block_classes = [find("Block1"), find("Block2"), find("Block3")];
    }

    /// Name `class`, give it a metaclass and bind it as a global. Its
    /// superclass must already be finished.
    fn finish_class(&mut self, name: &str, class: Value) -> VmResult<()> {
        let class_name = self.symbol(name)?;
        let superclass = self.class(class)?.superclass;
        self.class_mut(class)?.name = class_name;

        let meta_super = match superclass {
            Some(s) => self.class_of(s)?,
            None => self.special.class_class,
        };
        let meta_name = self.symbol(&format!("{name} class"))?;
        let meta = self.allocate(
            self.special.metaclass_class,
            Body::Class(Class::new(meta_name, Some(meta_super), Vec::new())),
        )?;
        self.object_mut(class)?.class = meta;
        self.write_barrier(class, meta);
        self.set_global(name, class)
    }
}
