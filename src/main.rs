//! Accumulator machine emulator - CLI entry point
//!
//! Commands:
//! - `accum-emu run <program>` - Run a structured program file
//! - `accum-emu info <program>` - Show a program's layout

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use accum::{start, CpuOptions, PopPolicy, Program, VarInit};

#[derive(Parser)]
#[command(name = "accum-emu")]
#[command(version = "0.1.0")]
#[command(about = "A cycle-level emulator of an accumulator-and-stack educational computer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program until it halts and print its result
    Run {
        /// Path to the structured program file (JSON)
        program: PathBuf,
        /// Text file staged into the input region before the run
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Abort after this many ticks
        #[arg(long)]
        max_ticks: Option<u64>,
        /// Print a diagnostic line per executed instruction
        #[arg(short, long)]
        trace: bool,
        /// Make POP move SP opposite to PUSH instead of the native decrement
        #[arg(long)]
        balanced_pop: bool,
    },
    /// Show a program's layout without executing it
    Info {
        /// Path to the structured program file (JSON)
        program: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            program,
            input,
            max_ticks,
            trace,
            balanced_pop,
        } => {
            let options = CpuOptions {
                pop_policy: if balanced_pop {
                    PopPolicy::Increment
                } else {
                    PopPolicy::Decrement
                },
                max_ticks,
                trace,
            };

            match start(&program, input.as_deref(), options) {
                Ok(result) => {
                    println!("Output:");
                    println!("{result}");
                }
                Err(e) => {
                    eprintln!("❌ {e}");
                    process::exit(1);
                }
            }
        }
        Commands::Info { program } => {
            let program = match Program::from_path(&program) {
                Ok(p) => p,
                Err(e) => {
                    eprintln!("❌ {e}");
                    process::exit(1);
                }
            };

            println!(
                "📂 {} instructions, {} functions, {} variables",
                program.instructions.len(),
                program.functions.len(),
                program.variables.len()
            );

            let mut names: Vec<_> = program.functions.keys().collect();
            names.sort();
            for name in names {
                let table = &program.functions[name];
                let mut labels: Vec<_> = table.iter().collect();
                labels.sort_by_key(|(_, addr)| **addr);
                let rendered: Vec<String> = labels
                    .iter()
                    .map(|(label, addr)| format!("{label}={addr}"))
                    .collect();
                println!("  fn {name}: {}", rendered.join(", "));
            }

            for var in &program.variables {
                match &var.init {
                    VarInit::Int(value) => println!("  var {} = {}", var.name, value),
                    VarInit::Str(text, len) => {
                        println!("  var {} = {:?} ({} cells)", var.name, text, len)
                    }
                }
            }
        }
    }
}
