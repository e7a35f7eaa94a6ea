//! `for`-loop lowering
//!
//! The plain shape evaluates the start once into the counter's slot,
//! hoists the limit to `r14` and the step to `r15`, enters at a bottom
//! check (`cmp`/`jle`, inclusive upper bound), and increments at a
//! dedicated label so `continue` can target it. Nested loops save and
//! restore `r14`/`r15` around themselves.
//!
//! Three transforms apply on top:
//! - the linear-scan allocator maps the counter to `r12`/`r13` when one
//!   is free, mirroring it to the stack slot at each increment;
//! - loop-invariant `let` statements move in front of the loop;
//! - a loop with literal bounds, step 1, a range above 128, and a body
//!   that indexes an array by the counter is tiled into a two-level
//!   nest with block size 64.

use super::error::CodeGenError;
use super::state::{CodeGen, LoopLabels};
use crate::ast::{DataType, Expr, Stmt};
use std::fmt::Write as _;

/// Iterations per tile.
pub(super) const TILE_SIZE: i64 = 64;
/// Minimum literal range before tiling pays for itself.
pub(super) const TILE_THRESHOLD: i64 = 128;

/// Does this expression index an array with the induction variable?
fn expr_indexes_array(expr: &Expr, var: &str) -> bool {
    match expr {
        Expr::ArrayAccess { index, .. } => {
            index.mentions(var) || expr_indexes_array(index, var)
        }
        Expr::Binary { left, right, .. }
        | Expr::And { left, right }
        | Expr::Or { left, right } => {
            expr_indexes_array(left, var) || expr_indexes_array(right, var)
        }
        Expr::Neg(e) | Expr::Strlen(e) | Expr::Alloc(e) => expr_indexes_array(e, var),
        Expr::Open { path, flags } => {
            expr_indexes_array(path, var) || expr_indexes_array(flags, var)
        }
        Expr::StructInit { args, .. } | Expr::Call { args, .. } => {
            args.iter().any(|a| expr_indexes_array(a, var))
        }
        _ => false,
    }
}

fn stmt_indexes_array(stmt: &Stmt, var: &str) -> bool {
    let exprs_of = |exprs: &[&Expr]| exprs.iter().any(|e| expr_indexes_array(e, var));
    match stmt {
        Stmt::ArrayAssign { index, value, .. } => {
            index.mentions(var)
                || expr_indexes_array(index, var)
                || expr_indexes_array(value, var)
        }
        Stmt::Let { value, .. }
        | Stmt::LetPair { value, .. }
        | Stmt::Reassign { value, .. }
        | Stmt::DerefAssign { value, .. }
        | Stmt::FieldAssign { value, .. }
        | Stmt::Print { value }
        | Stmt::Return { value } => expr_indexes_array(value, var),
        Stmt::ArrayDecl { init, .. } => init.iter().any(|e| expr_indexes_array(e, var)),
        Stmt::Free { ptr, size } => exprs_of(&[ptr, size]),
        Stmt::Read { fd, buf, len } | Stmt::Write { fd, buf, len } => exprs_of(&[fd, buf, len]),
        Stmt::Close { fd } => expr_indexes_array(fd, var),
        Stmt::If {
            cond,
            body,
            elifs,
            else_body,
        } => {
            expr_indexes_array(cond, var)
                || body.iter().any(|s| stmt_indexes_array(s, var))
                || elifs.iter().any(|e| {
                    expr_indexes_array(&e.cond, var)
                        || e.body.iter().any(|s| stmt_indexes_array(s, var))
                })
                || else_body
                    .as_ref()
                    .is_some_and(|b| b.iter().any(|s| stmt_indexes_array(s, var)))
        }
        Stmt::While { cond, body } | Stmt::DoWhile { body, cond } => {
            expr_indexes_array(cond, var) || body.iter().any(|s| stmt_indexes_array(s, var))
        }
        Stmt::For {
            start,
            limit,
            step,
            body,
            ..
        } => {
            exprs_of(&[start, limit, step]) || body.iter().any(|s| stmt_indexes_array(s, var))
        }
        Stmt::ForWhere {
            start,
            limit,
            step,
            cond,
            body,
            ..
        } => {
            exprs_of(&[start, limit, step, cond])
                || body.iter().any(|s| stmt_indexes_array(s, var))
        }
        Stmt::Match { subject, cases } => {
            expr_indexes_array(subject, var)
                || cases.iter().any(|c| {
                    c.value.as_ref().is_some_and(|v| expr_indexes_array(v, var))
                        || stmt_indexes_array(&c.body, var)
                })
        }
        Stmt::ReturnPair { first, second } => exprs_of(&[first, second]),
        Stmt::Call { args, .. } => args.iter().any(|e| expr_indexes_array(e, var)),
        Stmt::StructDef { .. } | Stmt::Break | Stmt::Continue | Stmt::FnDef { .. } => false,
    }
}

/// A `let` whose initializer never reads the counter can move out of
/// the body.
fn is_invariant_let(stmt: &Stmt, var: &str) -> bool {
    matches!(stmt, Stmt::Let { value, .. } if !value.mentions(var))
}

impl CodeGen {
    /// Tiling applies to a plain literal-bound loop with step exactly 1,
    /// a range above the threshold, and a body that indexes an array by
    /// the counter.
    pub(super) fn should_tile(
        &self,
        var: &str,
        start: &Expr,
        limit: &Expr,
        step: &Expr,
        body: &[Stmt],
    ) -> bool {
        if !self.config.optimizations.tiling {
            return false;
        }
        let (Expr::Number(s), Expr::Number(l)) = (start, limit) else {
            return false;
        };
        if *step != Expr::Number(1) || l.saturating_sub(*s) <= TILE_THRESHOLD {
            return false;
        }
        body.iter().any(|stmt| stmt_indexes_array(stmt, var))
    }

    pub(super) fn gen_for(
        &mut self,
        var: &str,
        start: &Expr,
        limit: &Expr,
        step: &Expr,
        filter: Option<&Expr>,
        body: &[Stmt],
    ) -> Result<(), CodeGenError> {
        self.cse.invalidate_scratch();

        // hoist invariant lets in front of the loop
        let (hoisted, rest): (Vec<&Stmt>, Vec<&Stmt>) = if self.config.optimizations.licm {
            body.iter().partition(|s| is_invariant_let(s, var))
        } else {
            (Vec::new(), body.iter().collect())
        };
        for stmt in &hoisted {
            self.gen_stmt(stmt)?;
        }

        if filter.is_none() && self.should_tile(var, start, limit, step, body) {
            let (Expr::Number(start_lit), Expr::Number(limit_lit)) = (start, limit) else {
                return Err(CodeGenError::Logic(
                    "Codegen error: tiled loop requires literal bounds".to_string(),
                ));
            };
            return self.gen_tiled_for(var, *start_lit, *limit_lit, &rest);
        }

        self.gen_expr(start)?;
        let off = self.add_var(var, DataType::Int)?;
        let reg = if self.config.optimizations.loop_registers {
            self.regs.acquire(var)
        } else {
            None
        };
        if let Some(r) = reg {
            writeln!(self.output, "    mov {}, rax", r)?;
        }
        writeln!(self.output, "    mov [rbp-{}], rax", off)?;

        // inner loops clobber the hoisted limit and step
        let nested = self.for_depth > 0;
        if nested {
            writeln!(self.output, "    push r14")?;
            writeln!(self.output, "    push r15")?;
        }
        self.gen_expr(limit)?;
        writeln!(self.output, "    mov r14, rax")?;
        self.gen_expr(step)?;
        writeln!(self.output, "    mov r15, rax")?;

        let lbl_body = self.new_label();
        let lbl_inc = self.new_label();
        let lbl_check = self.new_label();
        let lbl_end = self.new_label();

        writeln!(self.output, "    jmp .L{}", lbl_check)?;
        writeln!(self.output, ".L{}:", lbl_body)?;

        // iteration filter: a failing condition skips to the increment
        if let Some(cond) = filter {
            self.gen_expr(cond)?;
            writeln!(self.output, "    test rax, rax")?;
            writeln!(self.output, "    jz .L{}", lbl_inc)?;
        }

        self.loop_stack.push(LoopLabels {
            break_label: lbl_end,
            continue_label: lbl_inc,
        });
        self.for_depth += 1;
        for stmt in &rest {
            self.gen_stmt(stmt)?;
        }
        self.for_depth -= 1;
        self.loop_stack.pop();

        writeln!(self.output, ".L{}:", lbl_inc)?;
        self.cse.invalidate_var(var);
        self.cse.invalidate_scratch();
        if let Some(r) = reg {
            writeln!(self.output, "    add {}, r15", r)?;
            writeln!(self.output, "    mov [rbp-{}], {}", off, r)?;
        } else {
            writeln!(self.output, "    mov rax, [rbp-{}]", off)?;
            writeln!(self.output, "    add rax, r15")?;
            writeln!(self.output, "    mov [rbp-{}], rax", off)?;
        }

        writeln!(self.output, ".L{}:", lbl_check)?;
        if let Some(r) = reg {
            writeln!(self.output, "    cmp {}, r14", r)?;
        } else {
            writeln!(self.output, "    mov rax, [rbp-{}]", off)?;
            writeln!(self.output, "    cmp rax, r14")?;
        }
        writeln!(self.output, "    jle .L{}", lbl_body)?;
        writeln!(self.output, ".L{}:", lbl_end)?;

        if nested {
            writeln!(self.output, "    pop r15")?;
            writeln!(self.output, "    pop r14")?;
        }
        if reg.is_some() {
            self.regs.release(var);
        }
        self.cse.invalidate_scratch();
        Ok(())
    }

    /// Two-level nest: outer over tile origins with increment 64,
    /// inner over `[origin, min(origin+64, limit))` with the bound
    /// held in `r14`.
    fn gen_tiled_for(
        &mut self,
        var: &str,
        start: i64,
        limit: i64,
        body: &[&Stmt],
    ) -> Result<(), CodeGenError> {
        let origin_name = format!("{}@tile", var);
        let origin_off = self.add_var(&origin_name, DataType::Int)?;
        let off = self.add_var(var, DataType::Int)?;

        let nested = self.for_depth > 0;
        if nested {
            writeln!(self.output, "    push r14")?;
        }

        let lbl_outer_body = self.new_label();
        let lbl_outer_check = self.new_label();
        let lbl_inner_body = self.new_label();
        let lbl_inner_inc = self.new_label();
        let lbl_inner_check = self.new_label();
        let lbl_end = self.new_label();

        writeln!(self.output, "    mov rax, {}", start)?;
        writeln!(self.output, "    mov [rbp-{}], rax", origin_off)?;
        writeln!(self.output, "    jmp .L{}", lbl_outer_check)?;

        writeln!(self.output, ".L{}:", lbl_outer_body)?;
        // counter restarts at the tile origin; bound = min(origin+64, limit)
        writeln!(self.output, "    mov rax, [rbp-{}]", origin_off)?;
        writeln!(self.output, "    mov [rbp-{}], rax", off)?;
        writeln!(self.output, "    mov r14, rax")?;
        writeln!(self.output, "    add r14, {}", TILE_SIZE)?;
        writeln!(self.output, "    mov rax, {}", limit)?;
        writeln!(self.output, "    cmp r14, rax")?;
        writeln!(self.output, "    cmovg r14, rax")?;
        writeln!(self.output, "    jmp .L{}", lbl_inner_check)?;

        writeln!(self.output, ".L{}:", lbl_inner_body)?;
        self.loop_stack.push(LoopLabels {
            break_label: lbl_end,
            continue_label: lbl_inner_inc,
        });
        self.for_depth += 1;
        for stmt in body {
            self.gen_stmt(stmt)?;
        }
        self.for_depth -= 1;
        self.loop_stack.pop();

        writeln!(self.output, ".L{}:", lbl_inner_inc)?;
        self.cse.invalidate_var(var);
        self.cse.invalidate_scratch();
        writeln!(self.output, "    mov rax, [rbp-{}]", off)?;
        writeln!(self.output, "    add rax, 1")?;
        writeln!(self.output, "    mov [rbp-{}], rax", off)?;

        writeln!(self.output, ".L{}:", lbl_inner_check)?;
        writeln!(self.output, "    mov rax, [rbp-{}]", off)?;
        writeln!(self.output, "    cmp rax, r14")?;
        writeln!(self.output, "    jl .L{}", lbl_inner_body)?;

        // next tile origin
        writeln!(self.output, "    mov rax, [rbp-{}]", origin_off)?;
        writeln!(self.output, "    add rax, {}", TILE_SIZE)?;
        writeln!(self.output, "    mov [rbp-{}], rax", origin_off)?;

        writeln!(self.output, ".L{}:", lbl_outer_check)?;
        writeln!(self.output, "    mov rax, [rbp-{}]", origin_off)?;
        writeln!(self.output, "    cmp rax, {}", limit)?;
        writeln!(self.output, "    jl .L{}", lbl_outer_body)?;
        writeln!(self.output, ".L{}:", lbl_end)?;

        if nested {
            writeln!(self.output, "    pop r14")?;
        }
        self.cse.invalidate_scratch();
        Ok(())
    }
}
