//! Krill compiler library
//!
//! Single-pass ahead-of-time compilation from Krill source to x86-64
//! assembly in NASM syntax. The pipeline is lexer → parser (with
//! compile-time constant folding and the struct registry) → code
//! generator; the emitted `.s` file targets `elf64` and links against
//! a libc that provides `printf` and `strlen`:
//!
//! ```sh
//! krillc build program.k -o program.s
//! nasm -f elf64 program.s -o program.o
//! gcc -no-pie program.o -o program
//! ```
//!
//! Each compile is hermetic: a fresh token sequence, node tree, struct
//! registry, and output buffer. Compilation stops at the first error
//! with a single-line message.

pub mod ast;
pub mod codegen;
pub mod config;
pub mod lexer;
pub mod parser;
pub mod structs;

pub use ast::Program;
pub use codegen::{CodeGen, CodeGenError};
pub use config::{CompilerConfig, Limits, Optimizations};
pub use lexer::{Token, TokenKind, tokenize};
pub use parser::Parser;
pub use structs::{StructDef, StructRegistry};

use std::fs;
use std::path::Path;

/// Compile a Krill source file to an assembly file.
pub fn compile_file(source_path: &Path, output_path: &Path) -> Result<(), String> {
    compile_file_with_config(source_path, output_path, &CompilerConfig::default())
}

/// Compile a Krill source file to an assembly file with a custom
/// configuration. The assembly text is written in one call.
pub fn compile_file_with_config(
    source_path: &Path,
    output_path: &Path,
    config: &CompilerConfig,
) -> Result<(), String> {
    let source = fs::read_to_string(source_path)
        .map_err(|e| format!("Failed to read source file: {}", e))?;
    let asm = compile_to_asm_with_config(&source, config)?;
    fs::write(output_path, asm).map_err(|e| format!("Failed to write output file: {}", e))?;
    Ok(())
}

/// Compile source text to assembly text (for testing and tooling).
pub fn compile_to_asm(source: &str) -> Result<String, String> {
    compile_to_asm_with_config(source, &CompilerConfig::default())
}

/// Compile source text to assembly text with a custom configuration.
pub fn compile_to_asm_with_config(
    source: &str,
    config: &CompilerConfig,
) -> Result<String, String> {
    let tokens = tokenize(source, &config.limits)?;
    let mut parser = Parser::new(tokens, config.limits.clone());
    let program = parser.parse()?;
    let mut codegen = CodeGen::new(config.clone());
    codegen.generate(&program).map_err(|e| e.to_string())
}
