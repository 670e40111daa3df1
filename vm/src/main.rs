use clap::Parser as ClapParser;
use std::path::PathBuf;
use std::process;

use heap::HeapSettings;
use log::LevelFilter;
use object::Value;

use vm::asm::{self, AsmError};
use vm::interpreter::{ExecutionState, execute};
use vm::{VM, VmError, VmSettings, disassembler, shell};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Assembler files to load, in order
    #[arg(required = false, help = "The .sasm files to load; Main>>run is invoked afterwards")]
    files: Vec<PathBuf>,

    /// Start the shell after loading files (default if no files)
    #[arg(long)]
    shell: bool,

    /// Log every executed instruction on the `som::trace` target
    #[arg(long)]
    trace: bool,

    /// Print the disassembly of the loaded classes instead of running
    #[arg(long)]
    dump: bool,

    /// Collect at every safepoint
    #[arg(long)]
    gc_stress: bool,

    /// Bytes allocated between two collections
    #[arg(long, value_name = "BYTES")]
    gc_threshold: Option<usize>,

    /// Treat a primitive whose method hash does not match as fatal
    #[arg(long)]
    strict_primitives: bool,

    /// Print collector statistics at exit
    #[arg(long)]
    gc_stats: bool,
}

impl Cli {
    fn settings(&self) -> VmSettings {
        let defaults = HeapSettings::default();
        VmSettings {
            heap: HeapSettings {
                gc_threshold: self.gc_threshold.unwrap_or(defaults.gc_threshold),
                stress: self.gc_stress,
            },
            strict_primitive_hashes: self.strict_primitives,
            print_gc_stats: self.gc_stats,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.trace);

    let status = match run(&cli) {
        Ok(()) => 0,
        Err(AsmError::Vm(VmError::Exit(code))) => code,
        Err(AsmError::Vm(e @ VmError::Fatal(_))) => {
            log::error!("{e}");
            1
        }
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    };
    process::exit(status);
}

fn init_logging(trace: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if trace {
        builder.filter_module("som::trace", LevelFilter::Trace);
    }
    builder.init();
}

fn run(cli: &Cli) -> Result<(), AsmError> {
    let mut vm = VM::new(cli.settings())?;
    let outcome = drive(cli, &mut vm);
    if vm.settings.print_gc_stats {
        eprintln!("gc: {}", vm.heap.stats());
    }
    outcome
}

fn drive(cli: &Cli, vm: &mut VM) -> Result<(), AsmError> {
    let mut loaded = Vec::new();
    for file in &cli.files {
        loaded.extend(asm::load_file(vm, file)?);
    }

    if cli.dump {
        for class in loaded {
            print!("{}", disassembler::dump_class(vm, class)?);
        }
        return Ok(());
    }

    if !cli.files.is_empty() {
        let main = main_class(vm)?;
        let receiver = vm.new_instance(main)?;
        let mut state = ExecutionState::new();
        execute(vm, &mut state, receiver, "run", &[], cli.trace)?;
    }

    if cli.shell || cli.files.is_empty() {
        shell::interactive(vm, cli.trace)?;
    }
    Ok(())
}

fn main_class(vm: &VM) -> Result<Value, VmError> {
    vm.global("Main")?
        .ok_or_else(|| VmError::signal("UnknownGlobal", "no class Main to run"))
}
