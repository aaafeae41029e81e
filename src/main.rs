use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;

use osprey::metrics::LoweringMetrics;

#[derive(Parser)]
#[command(
    name = "osprey",
    version,
    about = "Osprey lowering — flatten HIR functions into linear LIR"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Lower a textual HIR module and print the instruction listing
    Lower {
        /// Input .hir file
        input: PathBuf,
        /// Emit a machine-readable JSON report instead of the listing
        #[arg(long)]
        json: bool,
        /// Print the per-kind lowering metrics table to stderr
        #[arg(long)]
        stats: bool,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Lower without printing listings; exit 1 on any function failure
    Check {
        /// Input .hir file
        input: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Command::Lower {
            input,
            json,
            stats,
            output,
        } => cmd_lower(input, json, stats, output),
        Command::Check { input } => cmd_check(input),
    }
}

fn read_input(input: &Path) -> String {
    match std::fs::read_to_string(input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", input.display(), e);
            process::exit(1);
        }
    }
}

// --- osprey lower ---

fn cmd_lower(input: PathBuf, json: bool, stats: bool, output: Option<PathBuf>) {
    let source = read_input(&input);
    let filename = input.to_string_lossy();
    let metrics = LoweringMetrics::new();
    let lowered = match osprey::lower_source(&source, &filename, &metrics) {
        Ok(l) => l,
        Err(_) => process::exit(1),
    };

    let text = if json {
        match serde_json::to_string_pretty(&lowered.report()) {
            Ok(mut s) => {
                s.push('\n');
                s
            }
            Err(e) => {
                eprintln!("error: cannot serialize report: {}", e);
                process::exit(1);
            }
        }
    } else {
        lowered.listing()
    };

    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, &text) {
                eprintln!("error: cannot write '{}': {}", path.display(), e);
                process::exit(1);
            }
            eprintln!("Lowered -> {}", path.display());
        }
        None => print!("{}", text),
    }

    if stats {
        eprintln!("{}", metrics.snapshot());
    }
}

// --- osprey check ---

fn cmd_check(input: PathBuf) {
    let source = read_input(&input);
    let filename = input.to_string_lossy();
    let metrics = LoweringMetrics::new();
    let lowered = match osprey::lower_source(&source, &filename, &metrics) {
        Ok(l) => l,
        Err(_) => process::exit(1),
    };

    if lowered.failed() > 0 {
        for (name, reason) in lowered.failures() {
            eprintln!("error: fn '{}': {}", name, reason);
        }
        process::exit(1);
    }
    eprintln!("OK: {}", input.display());
}
