//! Sable CLI
//!
//! Run sandboxed programs from files, check syntax, and emit memory
//! reports.

use clap::{CommandFactory, Parser as ClapParser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use sablei::{CancelToken, Interpreter, InterpreterConfig};
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

#[derive(ClapParser)]
#[command(name = "sable")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sable sandboxed interpreter", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Interpret a source file
    Run {
        /// Input source file
        input: PathBuf,

        /// Project config (defaults to sable.toml next to the input,
        /// when present)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Cancel the program after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Print the parsed tree before evaluating
        #[arg(long)]
        print_tree: bool,

        /// Append a memory report to the output
        #[arg(long, value_enum)]
        report: Option<ReportFormat>,
    },

    /// Parse a source file and report errors without evaluating
    Check {
        /// Input source files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            input,
            config,
            timeout_ms,
            print_tree,
            report,
        } => run(&input, config.as_deref(), timeout_ms, print_tree, report),
        Commands::Check { inputs } => check(&inputs),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "sable", &mut io::stdout());
        }
    }
}

fn load_config(input: &Path, explicit: Option<&Path>) -> InterpreterConfig {
    if let Some(path) = explicit {
        match InterpreterConfig::from_file(path) {
            Ok(c) => return c,
            Err(e) => {
                eprintln!("error: {e}");
                process::exit(2);
            }
        }
    }
    let sibling = input.with_file_name("sable.toml");
    if sibling.is_file() {
        match InterpreterConfig::from_file(&sibling) {
            Ok(c) => return c,
            Err(e) => {
                eprintln!("error: {e}");
                process::exit(2);
            }
        }
    }
    InterpreterConfig::from_env()
}

fn run(
    input: &Path,
    config: Option<&Path>,
    timeout_ms: Option<u64>,
    print_tree: bool,
    report: Option<ReportFormat>,
) {
    let source = match std::fs::read_to_string(input) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read {}: {e}", input.display());
            process::exit(2);
        }
    };
    let config = load_config(input, config);
    let token = match timeout_ms {
        Some(ms) => CancelToken::with_timeout(Duration::from_millis(ms)),
        None => CancelToken::none(),
    };
    let mut interp = match Interpreter::with_config(token, config) {
        Ok(i) => i,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(2);
        }
    };
    let output = interp.interpret_with(&source, false, print_tree, false);
    print!("{output}");
    match report {
        Some(ReportFormat::Json) => {
            match serde_json::to_string_pretty(&interp.memory_report()) {
                Ok(json) => println!("{json}"),
                Err(e) => eprintln!("error: report failed: {e}"),
            }
        }
        Some(ReportFormat::Text) => {
            let r = interp.memory_report();
            println!(
                "heap: {}/{} bytes used, peak {}; gc cycles: {}, freed {} bytes",
                r.used_bytes, r.heap_capacity, r.peak_heap_bytes, r.gc_cycles, r.gc_freed_bytes
            );
        }
        None => {}
    }
}

fn check(inputs: &[PathBuf]) {
    let mut failed = false;
    for input in inputs {
        let source = match std::fs::read_to_string(input) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("error: cannot read {}: {e}", input.display());
                failed = true;
                continue;
            }
        };
        match sablei::parser::parse_program(&source) {
            Ok(_) => println!("{}: ok", input.display()),
            Err(e) => {
                println!("{}: {e}", input.display());
                failed = true;
            }
        }
    }
    if failed {
        process::exit(1);
    }
}
