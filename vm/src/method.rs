//! Method generation: the boundary between a compiler front end and the
//! object model.

use std::hash::Hasher;

use bytecode::BytecodeBuilder;
use object::{Body, Method, Value};
use rustc_hash::FxHasher;

use crate::{FatalError, VM, VmResult};

/// Hash of a method body, compared against the hash a primitive declares
/// for the method it replaces.
pub fn bytecode_hash(bytes: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

/// Collects bytecodes and literals for one method or block and assembles
/// them into a heap [`Method`].
pub struct MethodBuilder {
    pub signature: Value,
    pub holder: Option<Value>,
    pub code: BytecodeBuilder,
    literals: Vec<Value>,
    num_args: u8,
    num_locals: u8,
    min_stack: u16,
    is_block: bool,
}

impl MethodBuilder {
    /// A method whose arguments (receiver included) follow from its
    /// selector.
    pub fn method(vm: &VM, signature: Value) -> VmResult<Self> {
        let num_args = vm.symbol_arity(signature)?;
        Ok(Self::new(signature, num_args as u8, false))
    }

    /// A block taking `params` parameters. Argument 0 is the block itself.
    pub fn block(signature: Value, params: u8) -> Self {
        Self::new(signature, params + 1, true)
    }

    fn new(signature: Value, num_args: u8, is_block: bool) -> Self {
        Self {
            signature,
            holder: None,
            code: BytecodeBuilder::new(),
            literals: Vec::new(),
            num_args,
            num_locals: 0,
            min_stack: 0,
            is_block,
        }
    }

    pub fn with_holder(mut self, holder: Option<Value>) -> Self {
        self.holder = holder;
        self
    }

    pub fn num_args(&self) -> u8 {
        self.num_args
    }

    pub fn set_num_locals(&mut self, n: u8) {
        self.num_locals = n;
    }

    /// Reserve at least `n` operand-stack slots regardless of what the
    /// bytecode needs.
    pub fn reserve_stack(&mut self, n: u16) {
        self.min_stack = self.min_stack.max(n);
    }

    /// Index of `literal` in the literal table, adding it if absent.
    pub fn add_literal(&mut self, literal: Value) -> Result<u8, FatalError> {
        let index = match self.literals.iter().position(|l| l.is(literal)) {
            Some(i) => i,
            None => {
                self.literals.push(literal);
                self.literals.len() - 1
            }
        };
        u8::try_from(index).map_err(|_| FatalError::TooManyLiterals(format!("{:?}", self.signature)))
    }

    /// Always add `literal`, even if an identical one exists. Used for
    /// literals that are patched at run time.
    pub fn add_unique_literal(&mut self, literal: Value) -> Result<u8, FatalError> {
        self.literals.push(literal);
        u8::try_from(self.literals.len() - 1)
            .map_err(|_| FatalError::TooManyLiterals(format!("{:?}", self.signature)))
    }

    pub fn assemble(self, vm: &mut VM) -> VmResult<Value> {
        let max_stack = (self.code.max_depth() as u16).max(self.min_stack);
        let mut method = Method::new(
            self.signature,
            self.code.into_bytes(),
            self.literals,
            self.num_args,
            self.num_locals,
            max_stack,
            self.is_block,
        );
        method.holder = self.holder;
        vm.allocate(vm.special.method_class, Body::Method(method))
    }
}

/// Patch literal `index` of `method` from `current` to `new`.
///
/// The prior value is checked: a mismatch means the bytecode and the
/// runtime disagree about the literal's role.
pub fn patch_literal(
    vm: &mut VM,
    method: Value,
    index: usize,
    current: Value,
    new: Value,
) -> VmResult<()> {
    let m = vm.method_mut(method)?;
    if index >= m.literals().len() {
        return Err(FatalError::LiteralOutOfRange(index).into());
    }
    m.patch_literal(index, current, new).map_err(|found| FatalError::LiteralMismatch {
        index,
        expected: current,
        found,
    })?;
    vm.write_barrier(method, new);
    log::debug!("patched literal {index} of {method:?}: {current:?} -> {new:?}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VmSettings;

    #[test]
    fn literals_are_deduplicated_by_identity() {
        let mut vm = VM::new(VmSettings::default()).unwrap();
        let sig = vm.symbol("foo").unwrap();
        let a = vm.symbol("a").unwrap();
        let mut b = MethodBuilder::method(&vm, sig).unwrap();
        assert_eq!(b.add_literal(a).unwrap(), 0);
        assert_eq!(b.add_literal(Value::from_i64(3)).unwrap(), 1);
        assert_eq!(b.add_literal(a).unwrap(), 0);
        assert_eq!(b.add_unique_literal(a).unwrap(), 2);
    }

    #[test]
    fn assembled_method_records_counts() {
        let mut vm = VM::new(VmSettings::default()).unwrap();
        let sig = vm.symbol("at:put:").unwrap();
        let mut b = MethodBuilder::method(&vm, sig).unwrap();
        b.set_num_locals(2);
        b.code.push_argument(1, 0);
        b.code.push_argument(2, 0);
        b.code.pop();
        b.code.return_local();
        let m = b.assemble(&mut vm).unwrap();
        let method = vm.method(m).unwrap();
        assert_eq!(method.num_args, 3);
        assert_eq!(method.num_locals, 2);
        assert_eq!(method.max_stack_depth, 2);
        assert!(!method.is_block);
    }

    #[test]
    fn block_counts_itself_as_argument() {
        let mut vm = VM::new(VmSettings::default()).unwrap();
        let sig = vm.symbol("block").unwrap();
        let mut b = MethodBuilder::block(sig, 2);
        b.reserve_stack(4);
        b.code.push_argument(1, 0);
        b.code.return_local();
        let m = b.assemble(&mut vm).unwrap();
        let method = vm.method(m).unwrap();
        assert_eq!(method.num_args, 3);
        assert_eq!(method.max_stack_depth, 4);
        assert!(method.is_block);
    }

    #[test]
    fn patch_checks_prior_value() {
        let mut vm = VM::new(VmSettings::default()).unwrap();
        let sig = vm.symbol("foo").unwrap();
        let name = vm.symbol("Foo").unwrap();
        let mut b = MethodBuilder::method(&vm, sig).unwrap();
        let idx = b.add_unique_literal(name).unwrap() as usize;
        b.code.push_global(idx as u8);
        b.code.return_local();
        let m = b.assemble(&mut vm).unwrap();

        let other = Value::from_i64(1);
        let err = patch_literal(&mut vm, m, idx, other, other).unwrap_err();
        assert!(matches!(err, crate::VmError::Fatal(FatalError::LiteralMismatch { .. })));
        patch_literal(&mut vm, m, idx, name, other).unwrap();
        assert_eq!(vm.method(m).unwrap().literal(idx), other);
        assert!(patch_literal(&mut vm, m, 9, name, other).is_err());
    }

    #[test]
    fn hash_depends_on_bytes() {
        assert_eq!(bytecode_hash(&[1, 2, 3]), bytecode_hash(&[1, 2, 3]));
        assert_ne!(bytecode_hash(&[1, 2, 3]), bytecode_hash(&[1, 2, 4]));
    }
}
