//! Expression code generation
//!
//! Expression evaluation always leaves its result in `rax`. Floats are
//! loaded into `xmm0` and bit-copied to `rax` for uniform handling;
//! bools are loaded zero-extended from their single byte. Binary
//! operations stash the left value in `r10` across a simple right
//! operand and push it across one that may itself clobber registers.

use super::cse::{CSE_SCRATCH, CseKey};
use super::error::CodeGenError;
use super::state::{ARG_REGS, CodeGen};
use crate::ast::{BinOp, DataType, Expr};
use std::fmt::Write as _;

/// Right operands that evaluate through calls, syscalls, or further
/// binops get the push/pop treatment; everything else leaves `r10`
/// alone.
fn is_complex_rhs(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Binary { .. }
            | Expr::Call { .. }
            | Expr::Strlen(_)
            | Expr::Alloc(_)
            | Expr::Open { .. }
            | Expr::And { .. }
            | Expr::Or { .. }
    )
}

/// Shift amount for the strength-reducible multipliers.
fn power_of_two_shift(value: i64) -> Option<u32> {
    match value {
        2 => Some(1),
        4 => Some(2),
        8 => Some(3),
        16 => Some(4),
        32 => Some(5),
        64 => Some(6),
        _ => None,
    }
}

impl CodeGen {
    pub(super) fn gen_expr(&mut self, expr: &Expr) -> Result<(), CodeGenError> {
        match expr {
            Expr::Number(v) => {
                writeln!(self.output, "    mov rax, {}", v)?;
            }
            Expr::Bool(b) => {
                writeln!(self.output, "    mov rax, {}", *b as i64)?;
            }
            Expr::Ident(name) => {
                let var = self.var(name)?;
                let (off, dtype) = (var.offset, var.dtype);
                match dtype {
                    DataType::Float => {
                        writeln!(self.output, "    movsd xmm0, [rbp-{}]", off)?;
                        writeln!(self.output, "    movq rax, xmm0")?;
                    }
                    DataType::Bool => {
                        writeln!(self.output, "    xor rax, rax")?;
                        writeln!(self.output, "    mov al, byte [rbp-{}]", off)?;
                    }
                    _ => {
                        writeln!(self.output, "    mov rax, [rbp-{}]", off)?;
                    }
                }
            }
            Expr::Str(text) => {
                let id = self.str_count;
                self.str_count += 1;
                writeln!(self.strings, "    str{} db \"{}\", 0", id, text)?;
                writeln!(self.output, "    lea rax, [rel str{}]", id)?;
            }
            Expr::ArrayAccess { name, index } => {
                let base = self.var_offset(name)?;
                self.gen_expr(index)?;
                writeln!(self.output, "    imul rax, 8")?;
                writeln!(self.output, "    neg rax")?;
                writeln!(self.output, "    add rax, qword -{}", base)?;
                writeln!(self.output, "    add rax, rbp")?;
                writeln!(self.output, "    mov rax, [rax]")?;
            }
            Expr::FieldAccess { name, field } => {
                let (base, foff, _ftype) = self.resolve_field(name, field)?;
                writeln!(self.output, "    mov rax, [rbp-{}]", base + foff)?;
            }
            Expr::Binary { op, left, right } => {
                self.gen_binary(*op, left, right)?;
            }
            Expr::And { left, right } => {
                self.gen_and(left, right)?;
            }
            Expr::Or { left, right } => {
                self.gen_or(left, right)?;
            }
            Expr::Neg(inner) => {
                self.gen_expr(inner)?;
                writeln!(self.output, "    neg rax")?;
            }
            Expr::Strlen(inner) => {
                self.gen_expr(inner)?;
                writeln!(self.output, "    mov rdi, rax")?;
                writeln!(self.output, "    call strlen")?;
                self.cse.invalidate_scratch();
            }
            Expr::Call { name, args } => {
                self.gen_call(name, args)?;
            }
            Expr::Addr(name) => {
                let off = self.var_offset(name)?;
                writeln!(self.output, "    lea rax, [rbp-{}]", off)?;
            }
            Expr::Deref(name) => {
                let off = self.var_offset(name)?;
                writeln!(self.output, "    mov rax, [rbp-{}]", off)?;
                writeln!(self.output, "    mov rax, [rax]")?;
            }
            Expr::Alloc(size) => {
                self.gen_alloc(size)?;
            }
            Expr::Open { path, flags } => {
                self.gen_open(path, flags)?;
            }
            Expr::StructInit { type_name, .. } => {
                return Err(CodeGenError::Logic(format!(
                    "Codegen error: constructor '{}' is only allowed as a let initializer",
                    type_name
                )));
            }
        }
        Ok(())
    }

    /// Resolve `name.field` to (variable base offset, field offset,
    /// field type) through the struct registry.
    pub(super) fn resolve_field(
        &self,
        name: &str,
        field: &str,
    ) -> Result<(usize, usize, DataType), CodeGenError> {
        let var = self.var(name)?;
        let base = var.offset;
        let stype = var.struct_type.clone().ok_or_else(|| {
            CodeGenError::Logic(format!("Codegen error: '{}' is not a struct", name))
        })?;
        let sd = self.structs.find(&stype).ok_or_else(|| {
            CodeGenError::Logic(format!("Codegen error: unknown struct '{}'", stype))
        })?;
        let fd = sd.field(field).ok_or_else(|| {
            CodeGenError::Logic(format!(
                "Codegen error: struct '{}' has no field '{}'",
                stype, field
            ))
        })?;
        Ok((base, fd.offset, fd.dtype))
    }

    fn gen_binary(&mut self, op: BinOp, left: &Expr, right: &Expr) -> Result<(), CodeGenError> {
        // multiply by a literal power of two lowers to a shift
        if op == BinOp::Mul
            && let Expr::Number(v) = right
            && let Some(shift) = power_of_two_shift(*v)
        {
            self.gen_expr(left)?;
            writeln!(self.output, "    shl rax, {}", shift)?;
            return Ok(());
        }

        // cache pure identifier-pair computations in the scratch register
        let key = if self.config.optimizations.cse
            && let (Expr::Ident(l), Expr::Ident(r)) = (left, right)
        {
            Some(CseKey {
                left: l.clone(),
                op,
                right: r.clone(),
            })
        } else {
            None
        };
        if let Some(k) = &key
            && self.cse.hit(k)
        {
            writeln!(self.output, "    mov rax, {}", CSE_SCRATCH)?;
            return Ok(());
        }

        self.gen_expr(left)?;
        if is_complex_rhs(right) {
            writeln!(self.output, "    push rax")?;
            self.gen_expr(right)?;
            writeln!(self.output, "    mov rbx, rax")?;
            writeln!(self.output, "    pop rax")?;
        } else {
            writeln!(self.output, "    mov r10, rax")?;
            self.gen_expr(right)?;
            writeln!(self.output, "    mov rbx, rax")?;
            writeln!(self.output, "    mov rax, r10")?;
        }

        match op {
            BinOp::Add => writeln!(self.output, "    add rax, rbx")?,
            BinOp::Sub => writeln!(self.output, "    sub rax, rbx")?,
            BinOp::Mul => writeln!(self.output, "    imul rax, rbx")?,
            BinOp::Div => {
                writeln!(self.output, "    xor rdx, rdx")?;
                writeln!(self.output, "    idiv rbx")?;
            }
            _ => self.emit_cmp(op)?,
        }

        if let Some(k) = key
            && self.cse.record(k)
        {
            writeln!(self.output, "    mov {}, rax", CSE_SCRATCH)?;
        }
        Ok(())
    }

    /// Integer comparison: expects left in `rax`, right in `rbx`;
    /// leaves 0/1 in `rax`.
    fn emit_cmp(&mut self, op: BinOp) -> Result<(), CodeGenError> {
        writeln!(self.output, "    cmp rax, rbx")?;
        let set = match op {
            BinOp::Gt => "setg",
            BinOp::Lt => "setl",
            BinOp::Eq => "sete",
            BinOp::Ne => "setne",
            BinOp::Ge => "setge",
            BinOp::Le => "setle",
            _ => {
                return Err(CodeGenError::Logic(format!(
                    "Codegen error: '{}' is not a comparison operator",
                    op.symbol()
                )));
            }
        };
        writeln!(self.output, "    {} al", set)?;
        writeln!(self.output, "    movzx rax, al")?;
        Ok(())
    }

    /// Short-circuit logical and: 0/1 in `rax`.
    fn gen_and(&mut self, left: &Expr, right: &Expr) -> Result<(), CodeGenError> {
        let lbl_false = self.new_label();
        let lbl_end = self.new_label();
        self.gen_expr(left)?;
        writeln!(self.output, "    test rax, rax")?;
        writeln!(self.output, "    jz .L{}", lbl_false)?;
        self.gen_expr(right)?;
        writeln!(self.output, "    test rax, rax")?;
        writeln!(self.output, "    jz .L{}", lbl_false)?;
        writeln!(self.output, "    mov rax, 1")?;
        writeln!(self.output, "    jmp .L{}", lbl_end)?;
        writeln!(self.output, ".L{}:", lbl_false)?;
        writeln!(self.output, "    xor rax, rax")?;
        writeln!(self.output, ".L{}:", lbl_end)?;
        self.cse.invalidate_scratch();
        Ok(())
    }

    /// Short-circuit logical or: 0/1 in `rax`.
    fn gen_or(&mut self, left: &Expr, right: &Expr) -> Result<(), CodeGenError> {
        let lbl_true = self.new_label();
        let lbl_end = self.new_label();
        self.gen_expr(left)?;
        writeln!(self.output, "    test rax, rax")?;
        writeln!(self.output, "    jnz .L{}", lbl_true)?;
        self.gen_expr(right)?;
        writeln!(self.output, "    test rax, rax")?;
        writeln!(self.output, "    jnz .L{}", lbl_true)?;
        writeln!(self.output, "    xor rax, rax")?;
        writeln!(self.output, "    jmp .L{}", lbl_end)?;
        writeln!(self.output, ".L{}:", lbl_true)?;
        writeln!(self.output, "    mov rax, 1")?;
        writeln!(self.output, ".L{}:", lbl_end)?;
        self.cse.invalidate_scratch();
        Ok(())
    }

    /// Function call: arguments pushed left to right, then popped into
    /// the System V integer registers in reverse. Result in `rax`
    /// (second tuple value in `rdx`).
    pub(super) fn gen_call(&mut self, name: &str, args: &[Expr]) -> Result<(), CodeGenError> {
        if args.len() > ARG_REGS.len() {
            return Err(CodeGenError::Logic(format!(
                "Codegen error: call to '{}' has too many arguments (max {})",
                name,
                ARG_REGS.len()
            )));
        }
        for arg in args {
            self.gen_expr(arg)?;
            writeln!(self.output, "    push rax")?;
        }
        for i in (0..args.len()).rev() {
            writeln!(self.output, "    pop {}", ARG_REGS[i])?;
        }
        writeln!(self.output, "    call {}", name)?;
        self.cse.invalidate_scratch();
        Ok(())
    }

    /// Static type of an expression as the generator sees it. Derefs
    /// and call results are integer-shaped; `print` relies on that.
    pub(super) fn expr_dtype(&self, expr: &Expr) -> DataType {
        match expr {
            Expr::Number(_) => DataType::Int,
            Expr::Bool(_) => DataType::Bool,
            Expr::Str(_) => DataType::Str,
            Expr::Ident(name) | Expr::ArrayAccess { name, .. } => {
                self.var_dtype(name).unwrap_or(DataType::Int)
            }
            Expr::FieldAccess { name, field } => self
                .resolve_field(name, field)
                .map(|(_, _, dtype)| dtype)
                .unwrap_or(DataType::Int),
            Expr::Addr(_) | Expr::Alloc(_) => DataType::Ptr,
            Expr::StructInit { .. } => DataType::Struct,
            _ => DataType::Int,
        }
    }
}
