//! `quixil <SOURCE_FILE>` — compiles and runs one Quixil script, then exits
//! with 0 (success), 65 (compile error), 70 (runtime error), or 74 (the
//! source file could not be read).

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use quixil_vm::{InterpretError, Vm};
use tracing_subscriber::EnvFilter;

const EX_DATAERR: u8 = 65;
const EX_SOFTWARE: u8 = 70;
const EX_IOERR: u8 = 74;

#[derive(Parser, Debug)]
#[command(name = "quixil", version, about = "Run a Quixil script")]
struct Cli {
    /// Path to the `.qx` source file to run.
    source_file: PathBuf,

    /// Print a per-instruction disassembly and value-stack trace to stderr.
    #[arg(long)]
    trace: bool,

    /// Increase logging verbosity (repeatable: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all logging below error level.
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    color_eyre::install().expect("color-eyre installs exactly once at process start");

    let cli = Cli::parse();
    init_tracing(&cli);

    let source = match fs::read_to_string(&cli.source_file) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("quixil: could not read '{}': {e}", cli.source_file.display());
            return ExitCode::from(EX_IOERR);
        }
    };

    let mut vm = Vm::new();
    vm.set_trace(cli.trace);

    match vm.interpret(&source) {
        Ok(()) => ExitCode::SUCCESS,
        Err(InterpretError::Compile(e)) => {
            eprintln!("{e}");
            ExitCode::from(EX_DATAERR)
        }
        Err(InterpretError::Runtime(e)) => {
            eprintln!("{e}");
            ExitCode::from(EX_SOFTWARE)
        }
    }
}

fn init_tracing(cli: &Cli) {
    let default_directive = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
