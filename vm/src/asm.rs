//! A line-oriented assembler for classes and methods.
//!
//! ```text
//! class Counter : Object        ; superclass defaults to Object
//!   fields count
//!   method increment
//!     push_self
//!     push_field count
//!     inc
//!     pop_field count
//!     return_self
//!   end
//!   classmethod zero
//!     push_constant 0
//!     return_local
//!   end
//! end
//! ```
//!
//! Instructions use the mnemonics of [`Op`] in any case. Locals and
//! arguments take `index [context]`, fields a name or an index, jumps a
//! label defined by a `name:` line, sends a selector, and `push_constant`
//! an integer, a double, `'string'`, `#symbol`, `nil`, `true` or `false`.
//! `push_block <params>` opens a nested block body closed by `end`.
//! `locals <n>` declares temporaries and `stack <n>` reserves stack slots.
//!
//! A method that falls off its end returns self, a block returns its last
//! value (or nil). Reopening an existing class adds methods to it. After a
//! class is read its registered primitives are installed.

use std::collections::VecDeque;
use std::path::Path;

use bytecode::{Label, Op};
use object::{Body, Value};
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::class::{define_class, field_index, install_method, side};
use crate::method::MethodBuilder;
use crate::primitives::install_primitives;
use crate::{FatalError, VM, VmError};

#[derive(Debug, Error)]
pub enum AsmError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Vm(#[from] VmError),
}

impl From<FatalError> for AsmError {
    fn from(e: FatalError) -> Self {
        Self::Vm(e.into())
    }
}

pub type AsmResult<T> = Result<T, AsmError>;

fn syntax(line: usize, message: impl Into<String>) -> AsmError {
    AsmError::Syntax {
        line,
        message: message.into(),
    }
}

/// Split a line into tokens. A quoted string is one token, quotes
/// included, with `''` standing for a quote. `;` starts a comment.
fn tokenize(line: usize, text: &str) -> AsmResult<Vec<String>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == ';' {
            break;
        }
        let mut token = String::new();
        if c == '\'' {
            token.push(c);
            chars.next();
            loop {
                match chars.next() {
                    Some('\'') if chars.peek() == Some(&'\'') => {
                        chars.next();
                        token.push('\'');
                    }
                    Some('\'') => {
                        token.push('\'');
                        break;
                    }
                    Some(ch) => token.push(ch),
                    None => return Err(syntax(line, "unterminated string")),
                }
            }
        } else {
            while let Some(&ch) = chars.peek() {
                if ch.is_whitespace() || ch == ';' {
                    break;
                }
                token.push(ch);
                chars.next();
            }
        }
        tokens.push(token);
    }
    Ok(tokens)
}

/// Non-empty lines with their 1-based line numbers.
struct Source {
    lines: VecDeque<(usize, Vec<String>)>,
    last_line: usize,
}

impl Source {
    fn new(text: &str) -> AsmResult<Self> {
        let mut lines = VecDeque::new();
        let mut last_line = 0;
        for (i, raw) in text.lines().enumerate() {
            last_line = i + 1;
            let tokens = tokenize(i + 1, raw)?;
            if !tokens.is_empty() {
                lines.push_back((i + 1, tokens));
            }
        }
        Ok(Self { lines, last_line })
    }

    fn next(&mut self) -> Option<(usize, Vec<String>)> {
        self.lines.pop_front()
    }

    fn peek_head(&self) -> Option<&str> {
        self.lines.front().map(|(_, tokens)| tokens[0].as_str())
    }

    fn expect_line(&mut self, what: &str) -> AsmResult<(usize, Vec<String>)> {
        self.next()
            .ok_or_else(|| syntax(self.last_line, format!("missing `end` of {what}")))
    }
}

enum LabelState {
    Bound(usize),
    Pending(Vec<Label>),
}

fn returns(last: Option<Op>) -> bool {
    last.is_some_and(Op::is_return)
}

fn byte(line: usize, token: &str) -> AsmResult<u8> {
    token
        .parse()
        .map_err(|_| syntax(line, format!("expected a number 0..255, found `{token}`")))
}

fn single<'t>(line: usize, op: Op, operands: &'t [String]) -> AsmResult<&'t str> {
    match operands {
        [one] => Ok(one),
        _ => Err(syntax(line, format!("{} takes one operand", op.mnemonic()))),
    }
}

fn forward_jump(b: &mut MethodBuilder, op: Op) -> Label {
    match op {
        Op::Jump => b.code.jump(),
        Op::JumpIfTrue => b.code.jump_if_true(),
        Op::JumpIfFalse => b.code.jump_if_false(),
        _ => b.code.jump_if_greater(),
    }
}

struct Assembler<'vm> {
    vm: &'vm mut VM,
    src: Source,
}

impl<'vm> Assembler<'vm> {
    fn new(vm: &'vm mut VM, text: &str) -> AsmResult<Self> {
        Ok(Self {
            vm,
            src: Source::new(text)?,
        })
    }

    fn classes(&mut self) -> AsmResult<Vec<Value>> {
        let mut defined = Vec::new();
        while let Some((line, tokens)) = self.src.next() {
            if tokens[0] != "class" {
                return Err(syntax(line, format!("expected `class`, found `{}`", tokens[0])));
            }
            defined.push(self.class(line, &tokens)?);
        }
        Ok(defined)
    }

    fn class(&mut self, line: usize, header: &[String]) -> AsmResult<Value> {
        let (name, superclass) = match header {
            [_, name] => (name.as_str(), None),
            [_, name, colon, parent] if colon == ":" => (name.as_str(), Some(parent.as_str())),
            _ => return Err(syntax(line, "expected `class Name [: Superclass]`")),
        };
        let mut fields = Vec::new();
        if self.src.peek_head() == Some("fields") {
            if let Some((_, tokens)) = self.src.next() {
                fields = tokens[1..].to_vec();
            }
        }
        let class = self.open_class(line, name, superclass, &fields)?;

        loop {
            let (line, tokens) = self.src.expect_line(&format!("class {name}"))?;
            match (tokens[0].as_str(), tokens.as_slice()) {
                ("end", [_]) => break,
                ("method" | "classmethod", [kind, selector]) => {
                    self.method(class, kind == "classmethod", selector)?;
                }
                _ => {
                    return Err(syntax(
                        line,
                        format!("expected `method <selector>` or `end`, found `{}`", tokens.join(" ")),
                    ));
                }
            }
        }
        install_primitives(self.vm, class, true)?;
        Ok(class)
    }

    fn open_class(
        &mut self,
        line: usize,
        name: &str,
        superclass: Option<&str>,
        fields: &[String],
    ) -> AsmResult<Value> {
        let parent = match superclass {
            Some(p) => Some(self.class_named(line, p)?),
            None => None,
        };
        if let Some(existing) = self.vm.global(name)? {
            if self.is_class(existing)? {
                if !fields.is_empty() {
                    return Err(syntax(line, format!("cannot add fields to existing class {name}")));
                }
                if parent.is_some() && self.vm.class(existing)?.superclass != parent {
                    return Err(syntax(line, format!("cannot change the superclass of {name}")));
                }
                log::debug!("reopening class {name}");
                return Ok(existing);
            }
        }
        let parent = parent.unwrap_or(self.vm.special.object_class);
        let names: Vec<&str> = fields.iter().map(String::as_str).collect();
        Ok(define_class(self.vm, name, Some(parent), &names)?)
    }

    fn is_class(&self, v: Value) -> AsmResult<bool> {
        Ok(v.is_ref() && matches!(self.vm.object(v)?.body, Body::Class(_)))
    }

    fn class_named(&self, line: usize, name: &str) -> AsmResult<Value> {
        match self.vm.global(name)? {
            Some(v) if self.is_class(v)? => Ok(v),
            _ => Err(syntax(line, format!("unknown class {name}"))),
        }
    }

    fn method(&mut self, class: Value, class_side: bool, selector: &str) -> AsmResult<()> {
        let target = side(self.vm, class, class_side)?;
        let signature = self.vm.symbol(selector)?;
        let mut b = MethodBuilder::method(self.vm, signature)?.with_holder(Some(target));
        let last = self.body(&mut b, target, &format!("method {selector}"))?;
        if !returns(last) {
            b.code.return_self();
        }
        let method = b.assemble(self.vm)?;
        install_method(self.vm, target, signature, method)?;
        Ok(())
    }

    fn block(&mut self, line: usize, params: u8, class: Value) -> AsmResult<Value> {
        let name = match params {
            0 => "value",
            1 => "value:",
            2 => "value:with:",
            n => return Err(syntax(line, format!("blocks take at most 2 parameters, not {n}"))),
        };
        let signature = self.vm.symbol(name)?;
        let mut b = MethodBuilder::block(signature, params).with_holder(Some(class));
        let last = self.body(&mut b, class, "block")?;
        if !returns(last) {
            if b.code.depth() == 0 {
                let nil = b.add_literal(self.vm.special.nil)?;
                b.code.push_constant(nil);
            }
            b.code.return_local();
        }
        Ok(b.assemble(self.vm)?)
    }

    /// Assemble instructions up to the matching `end` and return the last
    /// instruction that no label follows.
    fn body(&mut self, b: &mut MethodBuilder, class: Value, what: &str) -> AsmResult<Option<Op>> {
        let mut labels: FxHashMap<String, LabelState> = FxHashMap::default();
        let mut last = None;
        let end_line = loop {
            let (line, tokens) = self.src.expect_line(what)?;
            let head = tokens[0].as_str();
            match head {
                "end" => break line,
                "locals" | "stack" => {
                    let n = match &tokens[1..] {
                        [n] => byte(line, n)?,
                        _ => return Err(syntax(line, format!("`{head}` takes a count"))),
                    };
                    if head == "locals" {
                        b.set_num_locals(n);
                    } else {
                        b.reserve_stack(n.into());
                    }
                }
                _ if tokens.len() == 1 && head.len() > 1 && head.ends_with(':') => {
                    let name = &head[..head.len() - 1];
                    match labels.remove(name) {
                        Some(LabelState::Bound(_)) => {
                            return Err(syntax(line, format!("label {name} defined twice")));
                        }
                        Some(LabelState::Pending(jumps)) => jumps.into_iter().for_each(|l| b.code.bind(l)),
                        None => {}
                    }
                    labels.insert(name.to_owned(), LabelState::Bound(b.code.current_offset()));
                    last = None;
                }
                _ => last = Some(self.instruction(line, &tokens, b, class, &mut labels)?),
            }
        };
        for (name, state) in &labels {
            if let LabelState::Pending(_) = state {
                return Err(syntax(end_line, format!("undefined label {name}")));
            }
        }
        Ok(last)
    }

    fn instruction(
        &mut self,
        line: usize,
        tokens: &[String],
        b: &mut MethodBuilder,
        class: Value,
        labels: &mut FxHashMap<String, LabelState>,
    ) -> AsmResult<Op> {
        let op = Op::from_mnemonic(&tokens[0])
            .ok_or_else(|| syntax(line, format!("unknown instruction `{}`", tokens[0])))?;
        let operands = &tokens[1..];
        match op {
            Op::Halt
            | Op::Dup
            | Op::Pop
            | Op::ReturnLocal
            | Op::ReturnNonLocal
            | Op::ReturnSelf
            | Op::Inc
            | Op::Dec
            | Op::PushSelf => {
                if !operands.is_empty() {
                    return Err(syntax(line, format!("{} takes no operands", op.mnemonic())));
                }
                match op {
                    Op::Halt => b.code.halt(),
                    Op::Dup => b.code.dup(),
                    Op::Pop => b.code.pop(),
                    Op::ReturnLocal => b.code.return_local(),
                    Op::ReturnNonLocal => b.code.return_non_local(),
                    Op::ReturnSelf => b.code.return_self(),
                    Op::Inc => b.code.inc(),
                    Op::Dec => b.code.dec(),
                    _ => b.code.push_self(),
                }
            }
            Op::PushLocal | Op::PushArgument | Op::PopLocal | Op::PopArgument => {
                let (index, context) = match operands {
                    [i] => (byte(line, i)?, 0),
                    [i, c] => (byte(line, i)?, byte(line, c)?),
                    _ => return Err(syntax(line, format!("{} takes `index [context]`", op.mnemonic()))),
                };
                match op {
                    Op::PushLocal => b.code.push_local(index, context),
                    Op::PushArgument => b.code.push_argument(index, context),
                    Op::PopLocal => b.code.pop_local(index, context),
                    _ => b.code.pop_argument(index, context),
                }
            }
            Op::PushField | Op::PopField | Op::IncField | Op::IncFieldPush => {
                let field = self.field(line, single(line, op, operands)?, class)?;
                match op {
                    Op::PushField => b.code.push_field(field),
                    Op::PopField => b.code.pop_field(field),
                    Op::IncField => b.code.inc_field(field),
                    _ => b.code.inc_field_push(field),
                }
            }
            Op::PushLocal0
            | Op::PushLocal1
            | Op::PushLocal2
            | Op::PushArgument1
            | Op::PushArgument2
            | Op::PushField0
            | Op::PushField1
            | Op::PopLocal0
            | Op::PopLocal1
            | Op::PopLocal2
            | Op::PopField0
            | Op::PopField1
            | Op::ReturnField0
            | Op::ReturnField1
            | Op::ReturnField2 => {
                if !operands.is_empty() {
                    return Err(syntax(line, format!("{} takes no operands", op.mnemonic())));
                }
                match op {
                    Op::PushLocal0 => b.code.push_local(0, 0),
                    Op::PushLocal1 => b.code.push_local(1, 0),
                    Op::PushLocal2 => b.code.push_local(2, 0),
                    Op::PushArgument1 => b.code.push_argument(1, 0),
                    Op::PushArgument2 => b.code.push_argument(2, 0),
                    Op::PushField0 => b.code.push_field(0),
                    Op::PushField1 => b.code.push_field(1),
                    Op::PopLocal0 => b.code.pop_local(0, 0),
                    Op::PopLocal1 => b.code.pop_local(1, 0),
                    Op::PopLocal2 => b.code.pop_local(2, 0),
                    Op::PopField0 => b.code.pop_field(0),
                    Op::PopField1 => b.code.pop_field(1),
                    Op::ReturnField0 => b.code.return_field(0),
                    Op::ReturnField1 => b.code.return_field(1),
                    _ => b.code.return_field(2),
                }
            }
            Op::PushBlock => {
                let params = byte(line, single(line, op, operands)?)?;
                let block = self.block(line, params, class)?;
                let literal = b.add_literal(block)?;
                b.code.push_block(literal);
            }
            Op::PushConstant => {
                let value = self.literal(line, single(line, op, operands)?)?;
                let literal = b.add_literal(value)?;
                b.code.push_constant(literal);
            }
            Op::PushGlobal => {
                let name = self.vm.symbol(single(line, op, operands)?)?;
                // Patched to the association on first execution.
                let literal = b.add_unique_literal(name)?;
                b.code.push_global(literal);
            }
            Op::Send | Op::SuperSend | Op::UnarySend => {
                let selector = self.vm.symbol(single(line, op, operands)?)?;
                let arity = self.vm.symbol_arity(selector)?;
                let literal = b.add_literal(selector)?;
                match op {
                    Op::Send => b.code.send(literal, arity),
                    Op::SuperSend => b.code.super_send(literal, arity),
                    _ if arity == 1 => b.code.unary_send(literal),
                    _ => return Err(syntax(line, "unary_send needs a unary selector")),
                }
            }
            Op::Jump | Op::JumpIfTrue | Op::JumpIfFalse | Op::JumpIfGreater => {
                let target = single(line, op, operands)?;
                match labels.get_mut(target) {
                    Some(LabelState::Bound(offset)) => {
                        let offset = *offset;
                        match op {
                            Op::Jump => b.code.jump_back(offset),
                            Op::JumpIfTrue => b.code.jump_back_if_true(offset),
                            Op::JumpIfFalse => b.code.jump_back_if_false(offset),
                            _ => b.code.jump_back_if_greater(offset),
                        }
                    }
                    Some(LabelState::Pending(jumps)) => jumps.push(forward_jump(b, op)),
                    None => {
                        let label = forward_jump(b, op);
                        labels.insert(target.to_owned(), LabelState::Pending(vec![label]));
                    }
                }
            }
        }
        Ok(op)
    }

    fn field(&self, line: usize, token: &str, class: Value) -> AsmResult<u8> {
        if let Ok(index) = token.parse::<u8>() {
            return Ok(index);
        }
        let index = match self.vm.symbols.get(token) {
            Some(name) => field_index(self.vm, class, name)?,
            None => None,
        };
        let index = index.ok_or_else(|| syntax(line, format!("unknown field {token}")))?;
        u8::try_from(index).map_err(|_| syntax(line, format!("field {token} is out of reach")))
    }

    fn literal(&mut self, line: usize, token: &str) -> AsmResult<Value> {
        let vm = &mut *self.vm;
        let value = match token {
            "nil" => vm.special.nil,
            "true" => vm.special.true_obj,
            "false" => vm.special.false_obj,
            _ if token.len() >= 2 && token.starts_with('\'') && token.ends_with('\'') => {
                vm.new_string(&token[1..token.len() - 1])?
            }
            _ if token.len() > 1 && token.starts_with('#') => vm.symbol(&token[1..])?,
            _ if token.starts_with(|c: char| c.is_ascii_digit() || c == '-') => {
                if let Ok(n) = token.parse::<i64>() {
                    vm.new_integer(n)?
                } else if let Ok(d) = token.parse::<f64>() {
                    vm.new_double(d)?
                } else {
                    return Err(syntax(line, format!("bad number `{token}`")));
                }
            }
            _ => return Err(syntax(line, format!("bad literal `{token}`"))),
        };
        Ok(value)
    }
}

/// Assemble every class in `source`. Returns the classes in order.
pub fn load_source(vm: &mut VM, source: &str) -> AsmResult<Vec<Value>> {
    Assembler::new(vm, source)?.classes()
}

pub fn load_file(vm: &mut VM, path: &Path) -> AsmResult<Vec<Value>> {
    let source = std::fs::read_to_string(path).map_err(|source| AsmError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let classes = load_source(vm, &source)?;
    log::debug!("loaded {} classes from {}", classes.len(), path.display());
    Ok(classes)
}

/// Compile a shell statement into a new class `Shell_Class_<counter>`
/// whose `run:` method holds the statement. The argument of `run:` is the
/// previous result. The statement answers its last value, or the receiver
/// when the stack is empty.
pub fn compile_statement(vm: &mut VM, counter: usize, source: &str) -> AsmResult<Value> {
    let object = vm.special.object_class;
    let class = define_class(vm, &format!("Shell_Class_{counter}"), Some(object), &[])?;
    let signature = vm.selectors.run_with;
    let mut b = MethodBuilder::method(vm, signature)?.with_holder(Some(class));

    let mut asm = Assembler::new(vm, &format!("{source}\nend"))?;
    let last = asm.body(&mut b, class, "statement")?;
    if let Some((line, _)) = asm.src.next() {
        return Err(syntax(line, "unexpected `end`"));
    }
    if !returns(last) {
        if b.code.depth() == 0 {
            b.code.return_self();
        } else {
            b.code.return_local();
        }
    }
    let method = b.assemble(vm)?;
    install_method(vm, class, signature, method)?;
    Ok(class)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::{ExecutionState, execute};
    use crate::VmSettings;

    const COUNTER: &str = "
class Counter
  fields count
  method reset
    push_constant 0
    pop_field count
  end
  method count
    push_field count
    return_local
  end
  method bump
    push_field count
    inc
    pop_field count
  end
  method tick
    inc_field count
  end
  method next
    inc_field_push count
    return_local
  end
  method peek
    return_field_0
  end
  method sumTo:           ; 1 + 2 + .. + n
    locals 2
    push_constant 1
    pop_local 0
    push_constant 0
    pop_local 1
  loop:
    push_argument 1
    push_local 0
    jump_if_greater done
    pop
    pop
    push_local 1
    push_local 0
    send +
    pop_local 1
    push_local 0
    inc
    pop_local 0
    jump loop
  done:
    push_local 1
    return_local
  end
  method twice:
    push_block 1
      push_argument 1
      push_argument 1
      send +
    end
    push_argument 1
    send value:
    return_local
  end
  method early
    push_block 0
      push_constant 42
      return_non_local
    end
    unary_send value
    pop
    push_constant 0
    return_local
  end
  classmethod greeting
    push_constant 'it''s here'
    return_local
  end
end
";

    fn run(vm: &mut VM, receiver: Value, selector: &str, args: &[Value]) -> Value {
        let mut state = ExecutionState::new();
        execute(vm, &mut state, receiver, selector, args, false).unwrap()
    }

    #[test]
    fn assembles_and_runs_a_class() {
        let mut vm = VM::new(VmSettings::default()).unwrap();
        let classes = load_source(&mut vm, COUNTER).unwrap();
        assert_eq!(classes.len(), 1);
        let class = classes[0];
        let obj = vm.new_instance(class).unwrap();

        run(&mut vm, obj, "reset", &[]);
        run(&mut vm, obj, "bump", &[]);
        let bumped = run(&mut vm, obj, "bump", &[]);
        assert!(bumped.is(obj));
        assert_eq!(run(&mut vm, obj, "count", &[]), Value::from_i64(2));
        run(&mut vm, obj, "tick", &[]);
        assert_eq!(run(&mut vm, obj, "next", &[]), Value::from_i64(4));
        assert_eq!(run(&mut vm, obj, "peek", &[]), Value::from_i64(4));
        assert_eq!(run(&mut vm, obj, "sumTo:", &[Value::from_i64(100)]), Value::from_i64(5050));
        assert_eq!(run(&mut vm, obj, "twice:", &[Value::from_i64(21)]), Value::from_i64(42));
        assert_eq!(run(&mut vm, obj, "early", &[]), Value::from_i64(42));

        let greeting = run(&mut vm, class, "greeting", &[]);
        assert_eq!(vm.string(greeting).unwrap(), "it's here");
    }

    #[test]
    fn reopening_a_core_class_adds_methods() {
        let mut vm = VM::new(VmSettings::default()).unwrap();
        let source = "
class Integer
  method double
    push_self
    push_self
    send +
    return_local
  end
end";
        let classes = load_source(&mut vm, source).unwrap();
        assert!(classes[0].is(vm.special.integer_class));
        assert_eq!(run(&mut vm, Value::from_i64(21), "double", &[]), Value::from_i64(42));
        // The primitives of Integer are still in place.
        assert_eq!(run(&mut vm, Value::from_i64(2), "*", &[Value::from_i64(3)]), Value::from_i64(6));
    }

    #[test]
    fn core_primitives_replace_only_empty_declarations() {
        let mut vm = VM::new(VmSettings::default()).unwrap();
        let source = "
class Integer
  method printString
  end
  method asDouble
    push_constant 'kept'
    return_local
  end
end";
        load_source(&mut vm, source).unwrap();
        let printed = run(&mut vm, Value::from_i64(7), "printString", &[]);
        assert_eq!(vm.string(printed).unwrap(), "7");
        let kept = run(&mut vm, Value::from_i64(7), "asDouble", &[]);
        assert_eq!(vm.string(kept).unwrap(), "kept");
    }

    #[test]
    fn syntax_errors_name_the_line() {
        let mut vm = VM::new(VmSettings::default()).unwrap();
        let cases = [
            ("class A\n  method m\n    frobnicate\n  end\nend", 3, "unknown instruction"),
            ("class B\n  method m\n    jump nowhere\n  end\nend", 4, "undefined label"),
            ("class C\n  method m\n    push_constant 'open\n  end\nend", 3, "unterminated"),
            ("class D : Missing\nend", 1, "unknown class"),
            ("class E\n  method m\n    push_field nope\n  end\nend", 3, "unknown field"),
        ];
        for (source, expected_line, fragment) in cases {
            match load_source(&mut vm, source) {
                Err(AsmError::Syntax { line, message }) => {
                    assert_eq!(line, expected_line, "{source}");
                    assert!(message.contains(fragment), "{message}");
                }
                other => panic!("unexpected {other:?} for {source}"),
            }
        }
        let err = load_source(&mut vm, "class F\n  method m\n").unwrap_err();
        assert!(err.to_string().contains("missing `end`"), "{err}");
    }

    #[test]
    fn statements_become_shell_classes() {
        let mut vm = VM::new(VmSettings::default()).unwrap();
        let class = compile_statement(&mut vm, 1, "push_argument 1\ninc").unwrap();
        assert_eq!(vm.class_name(class).unwrap(), "Shell_Class_1");
        let obj = vm.new_instance(class).unwrap();
        assert_eq!(run(&mut vm, obj, "run:", &[Value::from_i64(41)]), Value::from_i64(42));

        let empty = compile_statement(&mut vm, 2, "").unwrap();
        let obj = vm.new_instance(empty).unwrap();
        assert!(run(&mut vm, obj, "run:", &[Value::from_i64(0)]).is(obj));

        assert!(compile_statement(&mut vm, 3, "end").is_err());
    }
}
