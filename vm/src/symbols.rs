use rustc_hash::FxHashMap;

use object::Value;

/// Interned symbols: name to heap symbol.
///
/// Every entry is a GC root. Symbol objects carry a stable `id` assigned
/// here, so identity survives relocation even though the [`Value`] changes.
#[derive(Default)]
pub struct SymbolTable {
    table: FxHashMap<Box<str>, Value>,
    next_id: u32,
}

impl SymbolTable {
    pub fn get(&self, name: &str) -> Option<Value> {
        self.table.get(name).copied()
    }

    pub(crate) fn insert(&mut self, name: &str, symbol: Value) {
        self.table.insert(name.into(), symbol);
    }

    pub(crate) fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub(crate) fn visit_mut(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        self.table.values_mut().for_each(|v| visitor(v));
    }
}

/// Selectors the interpreter sends on its own behalf.
#[derive(Clone, Copy)]
pub struct Selectors {
    pub does_not_understand: Value,
    pub unknown_global: Value,
    pub escaped_block: Value,
    pub plus: Value,
    pub minus: Value,
    pub run: Value,
    pub run_with: Value,
}

impl Selectors {
    pub const DOES_NOT_UNDERSTAND: &'static str = "doesNotUnderstand:arguments:";
    pub const UNKNOWN_GLOBAL: &'static str = "unknownGlobal:";
    pub const ESCAPED_BLOCK: &'static str = "escapedBlock:";

    pub(crate) fn visit_mut(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        let Self {
            does_not_understand,
            unknown_global,
            escaped_block,
            plus,
            minus,
            run,
            run_with,
        } = self;
        for v in [
            does_not_understand,
            unknown_global,
            escaped_block,
            plus,
            minus,
            run,
            run_with,
        ] {
            visitor(v);
        }
    }
}
