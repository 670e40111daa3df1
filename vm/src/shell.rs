//! The interactive shell.
//!
//! Each statement is a block of assembler lines ended by an empty line. It
//! becomes the `run:` method of a fresh `Shell_Class_<n>` and runs from
//! the bootstrap frame with the previous result, `it`, as argument 1.
//! Input starting with `class` is loaded as class definitions instead.

use std::io::{self, BufRead, Write};

use object::Value;

use crate::asm::{self, AsmError};
use crate::interpreter::{self, ExecutionState};
use crate::primitives::describe;
use crate::{VM, VmError, VmResult};

pub struct Shell {
    state: ExecutionState,
    counter: usize,
    /// Slot in `vm.handles` holding `it`.
    it: usize,
    trace: bool,
}

/// What a chunk of input did.
#[derive(Debug, PartialEq)]
pub enum Step {
    /// A statement ran and answered this value.
    Value(Value),
    /// Classes were loaded.
    Loaded(Vec<Value>),
}

impl Shell {
    pub fn new(vm: &mut VM, trace: bool) -> VmResult<Self> {
        let mut state = ExecutionState::new();
        interpreter::bootstrap_frame(vm, &mut state)?;
        vm.handles.push(vm.special.nil);
        Ok(Self {
            state,
            counter: 0,
            it: vm.handles.len() - 1,
            trace,
        })
    }

    pub fn it(&self, vm: &VM) -> Value {
        vm.handles[self.it]
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    /// Compile and run one statement, remembering its result as `it`.
    pub fn eval(&mut self, vm: &mut VM, source: &str) -> Result<Value, AsmError> {
        self.counter += 1;
        let class = asm::compile_statement(vm, self.counter, source)?;
        let receiver = vm.new_instance(class)?;
        let it = self.it(vm);
        let result = interpreter::execute(vm, &mut self.state, receiver, "run:", &[it], self.trace)?;
        vm.handles[self.it] = result;
        Ok(result)
    }

    /// Run a chunk of input: class definitions or one statement.
    pub fn submit(&mut self, vm: &mut VM, chunk: &str) -> Result<Step, AsmError> {
        if chunk.trim_start().starts_with("class ") {
            return Ok(Step::Loaded(asm::load_source(vm, chunk)?));
        }
        Ok(Step::Value(self.eval(vm, chunk)?))
    }

    /// Read statements from `input` until it ends or `quit`. Language-level
    /// errors are reported and the shell continues; fatal errors and
    /// `exit:` end it.
    pub fn run(&mut self, vm: &mut VM, input: impl BufRead, mut out: impl Write) -> Result<(), VmError> {
        let mut buffer = String::new();
        let mut lines = input.lines();
        loop {
            prompt(&mut out, if buffer.is_empty() { "> " } else { ". " });
            let line = match lines.next() {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    log::error!("cannot read input: {e}");
                    break;
                }
                None => break,
            };
            let trimmed = line.trim();
            if buffer.is_empty() && (trimmed == "quit" || trimmed == "exit") {
                return Ok(());
            }
            if !trimmed.is_empty() {
                buffer.push_str(&line);
                buffer.push('\n');
                continue;
            }
            if !buffer.is_empty() {
                let chunk = std::mem::take(&mut buffer);
                self.report(vm, &chunk, &mut out)?;
            }
        }
        if !buffer.is_empty() {
            self.report(vm, &buffer, &mut out)?;
        }
        Ok(())
    }

    fn report(&mut self, vm: &mut VM, chunk: &str, out: &mut impl Write) -> Result<(), VmError> {
        match self.submit(vm, chunk) {
            Ok(Step::Value(v)) => {
                let text = describe(vm, v)?;
                write_line(out, &format!("it = {text}"));
            }
            Ok(Step::Loaded(classes)) => {
                for class in classes {
                    write_line(out, &format!("loaded {}", vm.class_name(class)?));
                }
            }
            Err(AsmError::Vm(e @ (VmError::Fatal(_) | VmError::Exit(_)))) => return Err(e),
            Err(e) => write_line(out, &format!("error: {e}")),
        }
        Ok(())
    }
}

fn prompt(out: &mut impl Write, text: &str) {
    if let Err(e) = write!(out, "{text}").and_then(|_| out.flush()) {
        log::warn!("cannot write prompt: {e}");
    }
}

fn write_line(out: &mut impl Write, text: &str) {
    if let Err(e) = writeln!(out, "{text}") {
        log::warn!("cannot write output: {e}");
    }
}

/// Run the shell on stdin and stdout.
pub fn interactive(vm: &mut VM, trace: bool) -> Result<(), VmError> {
    let mut shell = Shell::new(vm, trace)?;
    println!("SOM shell. Statements end with an empty line, `quit` leaves.");
    shell.run(vm, io::stdin().lock(), io::stdout())
}
