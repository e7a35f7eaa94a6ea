//! Control-flow lowering: if/elif/else, while, do-while, match,
//! break/continue
//!
//! Conditions leave 0/1 in `rax` and branch on `test rax, rax`. Each
//! loop pushes a (break, continue) label pair; `break`/`continue` jump
//! to the innermost pair. A `match` evaluates its subject once into
//! `r13` and compares each case value against it.

use super::error::CodeGenError;
use super::state::{CodeGen, LoopLabels};
use crate::ast::{ElifBranch, Expr, MatchCase, Stmt};
use std::fmt::Write as _;

impl CodeGen {
    /// `if`/`elif`*/`else`?: one label per branch plus an end label; a
    /// successful body jumps straight to the end.
    pub(super) fn gen_if(
        &mut self,
        cond: &Expr,
        body: &[Stmt],
        elifs: &[ElifBranch],
        else_body: Option<&[Stmt]>,
    ) -> Result<(), CodeGenError> {
        self.cse.invalidate_scratch();
        let lbl_end = self.new_label();
        let branch_count = elifs.len() + else_body.is_some() as usize;
        let branch_labels: Vec<usize> = (0..branch_count).map(|_| self.new_label()).collect();

        self.gen_expr(cond)?;
        writeln!(self.output, "    test rax, rax")?;
        let first_target = branch_labels.first().copied().unwrap_or(lbl_end);
        writeln!(self.output, "    jz .L{}", first_target)?;
        self.gen_block(body)?;
        writeln!(self.output, "    jmp .L{}", lbl_end)?;

        for (i, elif) in elifs.iter().enumerate() {
            writeln!(self.output, ".L{}:", branch_labels[i])?;
            self.cse.invalidate_scratch();
            self.gen_expr(&elif.cond)?;
            writeln!(self.output, "    test rax, rax")?;
            let next = branch_labels.get(i + 1).copied().unwrap_or(lbl_end);
            writeln!(self.output, "    jz .L{}", next)?;
            self.gen_block(&elif.body)?;
            writeln!(self.output, "    jmp .L{}", lbl_end)?;
        }

        if let Some(else_stmts) = else_body {
            writeln!(self.output, ".L{}:", branch_labels[elifs.len()])?;
            self.cse.invalidate_scratch();
            self.gen_block(else_stmts)?;
        }

        writeln!(self.output, ".L{}:", lbl_end)?;
        self.cse.invalidate_scratch();
        Ok(())
    }

    /// `while`: check at the top, back-edge at the end.
    pub(super) fn gen_while(&mut self, cond: &Expr, body: &[Stmt]) -> Result<(), CodeGenError> {
        self.cse.invalidate_scratch();
        let lbl_start = self.new_label();
        let lbl_end = self.new_label();
        writeln!(self.output, ".L{}:", lbl_start)?;
        self.gen_expr(cond)?;
        writeln!(self.output, "    test rax, rax")?;
        writeln!(self.output, "    jz .L{}", lbl_end)?;

        self.loop_stack.push(LoopLabels {
            break_label: lbl_end,
            continue_label: lbl_start,
        });
        self.gen_block(body)?;
        self.loop_stack.pop();

        writeln!(self.output, "    jmp .L{}", lbl_start)?;
        writeln!(self.output, ".L{}:", lbl_end)?;
        self.cse.invalidate_scratch();
        Ok(())
    }

    /// `do ... while cond`: body first, condition-true back-edge.
    pub(super) fn gen_do_while(&mut self, body: &[Stmt], cond: &Expr) -> Result<(), CodeGenError> {
        self.cse.invalidate_scratch();
        let lbl_body = self.new_label();
        let lbl_check = self.new_label();
        let lbl_end = self.new_label();
        writeln!(self.output, ".L{}:", lbl_body)?;

        self.loop_stack.push(LoopLabels {
            break_label: lbl_end,
            continue_label: lbl_check,
        });
        self.gen_block(body)?;
        self.loop_stack.pop();

        writeln!(self.output, ".L{}:", lbl_check)?;
        self.gen_expr(cond)?;
        writeln!(self.output, "    test rax, rax")?;
        writeln!(self.output, "    jnz .L{}", lbl_body)?;
        writeln!(self.output, ".L{}:", lbl_end)?;
        self.cse.invalidate_scratch();
        Ok(())
    }

    pub(super) fn gen_break(&mut self) -> Result<(), CodeGenError> {
        let labels = self.loop_stack.last().copied().ok_or_else(|| {
            CodeGenError::Logic("Codegen error: 'break' outside of a loop".to_string())
        })?;
        writeln!(self.output, "    jmp .L{}", labels.break_label)?;
        Ok(())
    }

    pub(super) fn gen_continue(&mut self) -> Result<(), CodeGenError> {
        let labels = self.loop_stack.last().copied().ok_or_else(|| {
            CodeGenError::Logic("Codegen error: 'continue' outside of a loop".to_string())
        })?;
        writeln!(self.output, "    jmp .L{}", labels.continue_label)?;
        Ok(())
    }

    /// `match`: subject evaluated once into `r13`, one compare and
    /// conditional jump per case value, unmatched falls to the `else`
    /// body if present, otherwise to the end.
    pub(super) fn gen_match(
        &mut self,
        subject: &Expr,
        cases: &[MatchCase],
    ) -> Result<(), CodeGenError> {
        self.cse.invalidate_scratch();
        let lbl_end = self.new_label();
        let case_labels: Vec<usize> = cases.iter().map(|_| self.new_label()).collect();
        let else_label = cases
            .iter()
            .position(|c| c.value.is_none())
            .map(|i| case_labels[i]);

        // r13 may belong to an induction variable; keep it safe
        let save_r13 = self.regs.r13_in_use();
        if save_r13 {
            writeln!(self.output, "    push r13")?;
        }

        self.gen_expr(subject)?;
        writeln!(self.output, "    mov r13, rax")?;

        for (i, case) in cases.iter().enumerate() {
            let Some(value) = &case.value else { continue };
            self.gen_expr(value)?;
            writeln!(self.output, "    cmp r13, rax")?;
            writeln!(self.output, "    je .L{}", case_labels[i])?;
        }
        let fallthrough = else_label.unwrap_or(lbl_end);
        writeln!(self.output, "    jmp .L{}", fallthrough)?;

        for (i, case) in cases.iter().enumerate() {
            writeln!(self.output, ".L{}:", case_labels[i])?;
            self.cse.invalidate_scratch();
            self.gen_stmt(&case.body)?;
            writeln!(self.output, "    jmp .L{}", lbl_end)?;
        }

        writeln!(self.output, ".L{}:", lbl_end)?;
        if save_r13 {
            writeln!(self.output, "    pop r13")?;
        }
        self.cse.invalidate_scratch();
        Ok(())
    }
}
