//! Whole-program assembly: section headers, function ordering, frame
//! sizing
//!
//! Emission order: `.data` with the printf format strings and bool
//! messages, `.text` with the externs and `global main`, user functions
//! in source order, then `main` wrapping the remaining top-level
//! statements. Collected string literals land in a trailing `.data`
//! appendix. The finished text is returned as one string and written to
//! disk by the caller in a single call.

use super::error::CodeGenError;
use super::state::CodeGen;
use crate::ast::{Expr, Program, Stmt};
use std::fmt::Write as _;

impl CodeGen {
    /// Generate NASM assembly for a parsed program.
    pub fn generate(&mut self, program: &Program) -> Result<String, CodeGenError> {
        self.reset(&program.structs);

        self.output.push_str("section .data\n");
        self.output.push_str("    fmt db \"%ld\", 10, 0\n");
        self.output.push_str("    fmtf db \"%g\", 10, 0\n");
        self.output.push_str("    fmts db \"%s\", 10, 0\n");
        self.output.push_str("    str_true db \"true\", 10, 0\n");
        self.output.push_str("    str_false db \"false\", 10, 0\n");
        self.output.push('\n');
        self.output.push_str("section .text\n");
        self.output.push_str("    extern printf\n");
        self.output.push_str("    extern strlen\n");
        self.output.push_str("    global main\n");

        // function definitions first, regardless of their position
        for stmt in &program.stmts {
            if let Stmt::FnDef {
                name, params, body, ..
            } = stmt
            {
                self.gen_fn_def(name, params, body)?;
            }
        }

        // every other top-level statement becomes main, in source order
        let main_locals: usize = program
            .stmts
            .iter()
            .filter(|s| !matches!(s, Stmt::FnDef { .. }))
            .map(|s| self.count_stmt_locals(s))
            .sum();
        let frame = Self::frame_bytes(main_locals);

        self.output.push_str("\nmain:\n");
        writeln!(self.output, "    push rbp")?;
        writeln!(self.output, "    mov rbp, rsp")?;
        writeln!(self.output, "    sub rsp, {}", frame)?;

        for stmt in &program.stmts {
            if !matches!(stmt, Stmt::FnDef { .. }) {
                self.gen_stmt(stmt)?;
            }
        }

        self.emit_owned_frees()?;
        writeln!(self.output, "    xor rax, rax")?;
        writeln!(self.output, "    mov rsp, rbp")?;
        writeln!(self.output, "    pop rbp")?;
        writeln!(self.output, "    ret")?;

        if !self.strings.is_empty() {
            self.output.push_str("\nsection .data\n");
            self.output.push_str(&self.strings);
        }

        Ok(std::mem::take(&mut self.output))
    }

    /// Frame slots a block will allocate, matching what `gen_stmt`
    /// does at emission time: one slot per scalar binding, two per
    /// tuple destructure, the element count for arrays, the field
    /// count for constructor bindings, one (plus a tile-origin slot)
    /// per `for` counter. Function bodies size their own frames.
    pub(super) fn count_block_locals(&self, stmts: &[Stmt]) -> usize {
        stmts.iter().map(|s| self.count_stmt_locals(s)).sum()
    }

    fn count_stmt_locals(&self, stmt: &Stmt) -> usize {
        match stmt {
            Stmt::Let { value, .. } => {
                if let Expr::StructInit { type_name, .. } = value {
                    self.structs
                        .find(type_name)
                        .map_or(1, |sd| sd.field_count())
                } else {
                    1
                }
            }
            Stmt::LetPair { .. } => 2,
            Stmt::ArrayDecl { size, .. } => *size,
            Stmt::For {
                var,
                start,
                limit,
                step,
                body,
            } => {
                let counter = if self.should_tile(var, start, limit, step, body) {
                    2
                } else {
                    1
                };
                counter + self.count_block_locals(body)
            }
            Stmt::ForWhere { body, .. } => 1 + self.count_block_locals(body),
            Stmt::If {
                body,
                elifs,
                else_body,
                ..
            } => {
                self.count_block_locals(body)
                    + elifs
                        .iter()
                        .map(|e| self.count_block_locals(&e.body))
                        .sum::<usize>()
                    + else_body
                        .as_ref()
                        .map_or(0, |b| self.count_block_locals(b))
            }
            Stmt::While { body, .. } | Stmt::DoWhile { body, .. } => {
                self.count_block_locals(body)
            }
            Stmt::Match { cases, .. } => cases
                .iter()
                .map(|c| self.count_stmt_locals(&c.body))
                .sum(),
            _ => 0,
        }
    }
}
