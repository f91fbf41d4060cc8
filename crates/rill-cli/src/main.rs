//! Rill CLI.
//!
//! Commands:
//! - `rill run <file>` - Compile and run a program, wait for completion
//! - `rill run-all <files>` - Run several programs concurrently
//! - `rill dump <file>` - Print a program's bytecode listing

use std::fs;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use rill_runtime::Stdlib;

#[derive(Parser)]
#[command(name = "rill")]
#[command(about = "Rill interpreter", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and run a program, waiting for completion
    Run {
        /// Source file (.rill)
        file: PathBuf,
    },

    /// Compile and run several programs concurrently
    RunAll {
        /// Source files
        files: Vec<PathBuf>,
    },

    /// Compile a program and print its bytecode listing
    Dump {
        /// Source file (.rill)
        file: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { file } => cmd_run(&file),
        Commands::RunAll { files } => cmd_run_all(&files),
        Commands::Dump { file } => cmd_dump(&file),
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn cmd_run(file: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let source = fs::read_to_string(file)?;
    rill_engine::run_and_wait(&source)?;
    Ok(())
}

fn cmd_run_all(files: &[PathBuf]) -> Result<(), Box<dyn std::error::Error>> {
    if files.is_empty() {
        return Err("no input files".into());
    }
    let mut sources = Vec::with_capacity(files.len());
    for file in files {
        sources.push(fs::read_to_string(file)?);
    }
    rill_engine::run_many(&sources)?;
    Ok(())
}

fn cmd_dump(file: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let source = fs::read_to_string(file)?;
    let stdlib = Stdlib::new();
    let image = rill_engine::compile(&source, &stdlib)?;
    print!("{}", rill_codegen::disasm(&image));
    Ok(())
}
