use crate::Value;

/// Well-known singleton objects and core classes.
///
/// Holds tagged [`Value`] references to objects the interpreter needs for
/// core operations and for finding the class of values that carry no class
/// pointer of their own (fixnums).
///
/// **Objects are not allocated here.** They must be allocated on the heap
/// first and then stored as tagged references. Every field is a GC root:
/// the owner must expose them through [`SpecialObjects::visit_mut`].
#[derive(Clone, Copy)]
pub struct SpecialObjects {
    // ── Singletons ─────────────────────────────────────────────────
    pub nil: Value,
    pub true_obj: Value,
    pub false_obj: Value,
    /// The `system` global.
    pub system: Value,

    // ── Classes ────────────────────────────────────────────────────
    pub object_class: Value,
    pub class_class: Value,
    pub metaclass_class: Value,
    pub nil_class: Value,
    pub boolean_class: Value,
    pub true_class: Value,
    pub false_class: Value,
    pub integer_class: Value,
    pub double_class: Value,
    pub array_class: Value,
    pub string_class: Value,
    pub symbol_class: Value,
    pub method_class: Value,
    pub primitive_class: Value,
    pub association_class: Value,
    pub frame_class: Value,
    pub system_class: Value,
    /// `Block`, superclass of the per-arity block classes.
    pub block_class: Value,
    /// `Block1` .. `Block3`: blocks taking 0, 1 and 2 parameters.
    pub block_classes: [Value; 3],
}

impl SpecialObjects {
    /// A table with every entry set to `placeholder`, filled in during
    /// bootstrap.
    pub const fn uniform(placeholder: Value) -> Self {
        Self {
            nil: placeholder,
            true_obj: placeholder,
            false_obj: placeholder,
            system: placeholder,
            object_class: placeholder,
            class_class: placeholder,
            metaclass_class: placeholder,
            nil_class: placeholder,
            boolean_class: placeholder,
            true_class: placeholder,
            false_class: placeholder,
            integer_class: placeholder,
            double_class: placeholder,
            array_class: placeholder,
            string_class: placeholder,
            symbol_class: placeholder,
            method_class: placeholder,
            primitive_class: placeholder,
            association_class: placeholder,
            frame_class: placeholder,
            system_class: placeholder,
            block_class: placeholder,
            block_classes: [placeholder; 3],
        }
    }

    /// Visit every entry mutably, for root scanning.
    pub fn visit_mut(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        let Self {
            nil,
            true_obj,
            false_obj,
            system,
            object_class,
            class_class,
            metaclass_class,
            nil_class,
            boolean_class,
            true_class,
            false_class,
            integer_class,
            double_class,
            array_class,
            string_class,
            symbol_class,
            method_class,
            primitive_class,
            association_class,
            frame_class,
            system_class,
            block_class,
            block_classes,
        } = self;
        for v in [
            nil,
            true_obj,
            false_obj,
            system,
            object_class,
            class_class,
            metaclass_class,
            nil_class,
            boolean_class,
            true_class,
            false_class,
            integer_class,
            double_class,
            array_class,
            string_class,
            symbol_class,
            method_class,
            primitive_class,
            association_class,
            frame_class,
            system_class,
            block_class,
        ] {
            visitor(v);
        }
        block_classes.iter_mut().for_each(|v| visitor(v));
    }

    #[inline(always)]
    pub fn boolean(&self, b: bool) -> Value {
        if b { self.true_obj } else { self.false_obj }
    }

    /// Block class for a block method with `num_args` arguments, receiver
    /// (the block itself) included.
    pub fn block_class_for(&self, num_args: usize) -> Option<Value> {
        self.block_classes.get(num_args.checked_sub(1)?).copied()
    }
}
