//! Krill compiler CLI
//!
//! Command-line interface for compiling `.k` programs to x86-64
//! assembly in NASM syntax.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{Shell, generate};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

#[derive(ClapParser)]
#[command(name = "krillc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Krill compiler - compile .k programs to x86-64 assembly", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a .k file to NASM assembly
    Build {
        /// Input .k source file (defaults to main.k)
        input: Option<PathBuf>,

        /// Output assembly path (defaults to the input with a .s extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Path to a compiler configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            input,
            output,
            config,
        } => {
            let input = input.unwrap_or_else(|| PathBuf::from("main.k"));
            let output = output.unwrap_or_else(|| input.with_extension("s"));
            run_build(&input, &output, config.as_deref());
        }
        Commands::Completions { shell } => {
            run_completions(shell);
        }
    }
}

fn run_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "krillc", &mut io::stdout());
}

fn run_build(input: &Path, output: &Path, config_path: Option<&Path>) {
    let config = match config_path {
        Some(path) => {
            let content = match fs::read_to_string(path) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("Error reading config: {}", e);
                    process::exit(1);
                }
            };
            match krillc::CompilerConfig::from_toml(&content) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    process::exit(1);
                }
            }
        }
        None => krillc::CompilerConfig::default(),
    };

    match krillc::compile_file_with_config(input, output, &config) {
        Ok(()) => {
            println!("Compiled {} -> {}", input.display(), output.display());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
