//! Statement code generation
//!
//! Dispatch over statement variants: bindings and stores, `print`,
//! returns, and function definitions. Control-flow statements live in
//! `control_flow.rs` and `loops.rs`.

use super::error::CodeGenError;
use super::state::{ARG_REGS, CodeGen, Var};
use crate::ast::{DataType, Expr, Stmt};
use std::fmt::Write as _;

impl CodeGen {
    pub(super) fn gen_block(&mut self, stmts: &[Stmt]) -> Result<(), CodeGenError> {
        for stmt in stmts {
            self.gen_stmt(stmt)?;
        }
        Ok(())
    }

    pub(super) fn gen_stmt(&mut self, stmt: &Stmt) -> Result<(), CodeGenError> {
        match stmt {
            Stmt::Let { name, dtype, value } => self.gen_let(name, *dtype, value),
            Stmt::LetPair {
                first,
                second,
                value,
            } => self.gen_let_pair(first, second, value),
            Stmt::ArrayDecl {
                name,
                dtype,
                size,
                init,
            } => self.gen_array_decl(name, *dtype, *size, init),
            Stmt::ArrayAssign { name, index, value } => self.gen_array_assign(name, index, value),
            Stmt::Reassign { name, value } => self.gen_reassign(name, value),
            // already registered by the parser; emits no code
            Stmt::StructDef { .. } => Ok(()),
            Stmt::FieldAssign { name, field, value } => self.gen_field_assign(name, field, value),
            Stmt::DerefAssign { name, value } => {
                self.gen_expr(value)?;
                let off = self.var_offset(name)?;
                writeln!(self.output, "    mov rbx, [rbp-{}]", off)?;
                writeln!(self.output, "    mov [rbx], rax")?;
                Ok(())
            }
            Stmt::Free { ptr, size } => self.gen_free(ptr, size),
            Stmt::Read { fd, buf, len } => self.gen_read_write(fd, buf, len, false),
            Stmt::Write { fd, buf, len } => self.gen_read_write(fd, buf, len, true),
            Stmt::Close { fd } => self.gen_close(fd),
            Stmt::Print { value } => self.gen_print(value),
            Stmt::If {
                cond,
                body,
                elifs,
                else_body,
            } => self.gen_if(cond, body, elifs, else_body.as_deref()),
            Stmt::While { cond, body } => self.gen_while(cond, body),
            Stmt::DoWhile { body, cond } => self.gen_do_while(body, cond),
            Stmt::For {
                var,
                start,
                limit,
                step,
                body,
            } => self.gen_for(var, start, limit, step, None, body),
            Stmt::ForWhere {
                var,
                start,
                limit,
                step,
                cond,
                body,
            } => self.gen_for(var, start, limit, step, Some(cond), body),
            Stmt::Break => self.gen_break(),
            Stmt::Continue => self.gen_continue(),
            Stmt::Match { subject, cases } => self.gen_match(subject, cases),
            Stmt::FnDef {
                name, params, body, ..
            } => self.gen_fn_def(name, params, body),
            Stmt::Call { name, args } => self.gen_call(name, args),
            Stmt::Return { value } => self.gen_return(value),
            Stmt::ReturnPair { first, second } => self.gen_return_pair(first, second),
        }
    }

    /// `let` with a scalar or struct-constructor initializer.
    fn gen_let(&mut self, name: &str, dtype: DataType, value: &Expr) -> Result<(), CodeGenError> {
        // constructor initializer: field values into successive slots
        if let Expr::StructInit { type_name, args } = value {
            let sd = self.structs.find(type_name).ok_or_else(|| {
                CodeGenError::Logic(format!("Codegen error: unknown struct '{}'", type_name))
            })?;
            let field_count = sd.field_count();
            let offsets: Vec<usize> = sd.fields.iter().map(|f| f.offset).collect();
            let base = self.add_var_struct(name, type_name, field_count)?;
            for (i, arg) in args.iter().enumerate().take(field_count) {
                self.gen_expr(arg)?;
                writeln!(self.output, "    mov [rbp-{}], rax", base + offsets[i])?;
            }
            self.cse.invalidate_var(name);
            return Ok(());
        }

        let off = self.add_var(name, dtype)?;
        match dtype {
            DataType::Float => {
                // int literal converts to double at the assignment site
                if let Expr::Number(v) = value {
                    writeln!(self.output, "    mov rax, {}", v)?;
                    writeln!(self.output, "    cvtsi2sd xmm0, rax")?;
                } else {
                    self.gen_expr(value)?;
                    writeln!(self.output, "    movq xmm0, rax")?;
                }
                writeln!(self.output, "    movsd [rbp-{}], xmm0", off)?;
            }
            DataType::Bool => {
                self.gen_expr(value)?;
                writeln!(self.output, "    mov byte [rbp-{}], al", off)?;
            }
            _ => {
                self.gen_expr(value)?;
                writeln!(self.output, "    mov [rbp-{}], rax", off)?;
            }
        }
        if matches!(value, Expr::Alloc(_)) {
            self.mark_owned(name);
        }
        self.cse.invalidate_var(name);
        Ok(())
    }

    /// `let x, y = f()`: first value from `rax`, second from `rdx`.
    fn gen_let_pair(
        &mut self,
        first: &str,
        second: &str,
        value: &Expr,
    ) -> Result<(), CodeGenError> {
        self.gen_expr(value)?;
        let off1 = self.add_var(first, DataType::Int)?;
        writeln!(self.output, "    mov [rbp-{}], rax", off1)?;
        let off2 = self.add_var(second, DataType::Int)?;
        writeln!(self.output, "    mov [rbp-{}], rdx", off2)?;
        self.cse.invalidate_var(first);
        self.cse.invalidate_var(second);
        Ok(())
    }

    /// Array declaration, with element stores for an inline initializer.
    fn gen_array_decl(
        &mut self,
        name: &str,
        dtype: DataType,
        size: usize,
        init: &[Expr],
    ) -> Result<(), CodeGenError> {
        let base = self.add_var_array(name, dtype, size)?;
        for (i, value) in init.iter().enumerate() {
            self.gen_expr(value)?;
            writeln!(self.output, "    mov qword [rbp-{}], rax", base + i * 8)?;
        }
        Ok(())
    }

    /// `nums[i] = value`: value computed first, address second.
    fn gen_array_assign(
        &mut self,
        name: &str,
        index: &Expr,
        value: &Expr,
    ) -> Result<(), CodeGenError> {
        let base = self.var_offset(name)?;
        self.gen_expr(value)?;
        writeln!(self.output, "    push rax")?;
        self.gen_expr(index)?;
        writeln!(self.output, "    imul rax, 8")?;
        writeln!(self.output, "    neg rax")?;
        writeln!(self.output, "    add rax, qword -{}", base)?;
        writeln!(self.output, "    add rax, rbp")?;
        writeln!(self.output, "    pop rbx")?;
        writeln!(self.output, "    mov [rax], rbx")?;
        Ok(())
    }

    fn gen_reassign(&mut self, name: &str, value: &Expr) -> Result<(), CodeGenError> {
        self.gen_expr(value)?;
        let var = self.var(name)?;
        let (off, dtype) = (var.offset, var.dtype);
        if dtype == DataType::Float {
            writeln!(self.output, "    movq xmm0, rax")?;
            writeln!(self.output, "    movsd [rbp-{}], xmm0", off)?;
        } else {
            writeln!(self.output, "    mov [rbp-{}], rax", off)?;
        }
        self.cse.invalidate_var(name);
        Ok(())
    }

    fn gen_field_assign(
        &mut self,
        name: &str,
        field: &str,
        value: &Expr,
    ) -> Result<(), CodeGenError> {
        let (base, foff, _ftype) = self.resolve_field(name, field)?;
        self.gen_expr(value)?;
        writeln!(self.output, "    mov [rbp-{}], rax", base + foff)?;
        Ok(())
    }

    /// `print(expr)`: the printf format follows the shape of the
    /// argument node: strings and str identifiers, floats, bool
    /// literals and bool identifiers; everything else prints as an
    /// integer, including pointer derefs and call results.
    fn gen_print(&mut self, value: &Expr) -> Result<(), CodeGenError> {
        self.gen_expr(value)?;
        let is_str = matches!(value, Expr::Str(_))
            || matches!(value, Expr::Ident(name)
                if self.var_dtype(name).unwrap_or(DataType::Int) == DataType::Str);
        let is_float = self.expr_dtype(value) == DataType::Float;
        let is_bool = matches!(value, Expr::Bool(_))
            || matches!(value, Expr::Ident(name)
                if self.var_dtype(name).unwrap_or(DataType::Int) == DataType::Bool);

        if is_str {
            writeln!(self.output, "    mov rsi, rax")?;
            writeln!(self.output, "    lea rdi, [rel fmts]")?;
            writeln!(self.output, "    xor rax, rax")?;
            writeln!(self.output, "    call printf")?;
        } else if is_float {
            // bits travel back to xmm0; rax = 1 vector register in use
            writeln!(self.output, "    movq xmm0, rax")?;
            writeln!(self.output, "    lea rdi, [rel fmtf]")?;
            writeln!(self.output, "    mov rax, 1")?;
            writeln!(self.output, "    call printf")?;
        } else if is_bool {
            let lbl_true = self.new_label();
            let lbl_done = self.new_label();
            writeln!(self.output, "    test rax, rax")?;
            writeln!(self.output, "    jnz .L{}", lbl_true)?;
            writeln!(self.output, "    lea rdi, [rel str_false]")?;
            writeln!(self.output, "    jmp .L{}", lbl_done)?;
            writeln!(self.output, ".L{}:", lbl_true)?;
            writeln!(self.output, "    lea rdi, [rel str_true]")?;
            writeln!(self.output, ".L{}:", lbl_done)?;
            writeln!(self.output, "    xor rax, rax")?;
            writeln!(self.output, "    call printf")?;
        } else {
            writeln!(self.output, "    mov rsi, rax")?;
            writeln!(self.output, "    lea rdi, [rel fmt]")?;
            writeln!(self.output, "    xor rax, rax")?;
            writeln!(self.output, "    call printf")?;
        }
        self.cse.invalidate_scratch();
        Ok(())
    }

    fn gen_return(&mut self, value: &Expr) -> Result<(), CodeGenError> {
        self.gen_expr(value)?;
        if self.has_owned_vars() {
            writeln!(self.output, "    push rax")?;
            self.emit_owned_frees()?;
            writeln!(self.output, "    pop rax")?;
        }
        writeln!(self.output, "    mov rsp, rbp")?;
        writeln!(self.output, "    pop rbp")?;
        writeln!(self.output, "    ret")?;
        Ok(())
    }

    /// `return a, b`: first value in `rax`, second in `rdx`.
    fn gen_return_pair(&mut self, first: &Expr, second: &Expr) -> Result<(), CodeGenError> {
        self.gen_expr(first)?;
        writeln!(self.output, "    push rax")?;
        self.gen_expr(second)?;
        writeln!(self.output, "    mov rdx, rax")?;
        writeln!(self.output, "    pop rax")?;
        if self.has_owned_vars() {
            writeln!(self.output, "    push rax")?;
            writeln!(self.output, "    push rdx")?;
            self.emit_owned_frees()?;
            writeln!(self.output, "    pop rdx")?;
            writeln!(self.output, "    pop rax")?;
        }
        writeln!(self.output, "    mov rsp, rbp")?;
        writeln!(self.output, "    pop rbp")?;
        writeln!(self.output, "    ret")?;
        Ok(())
    }

    /// Function definition: fresh frame tables, exact 16-byte-aligned
    /// stack size from a pre-pass over the body, parameters spilled
    /// from their argument registers.
    pub(super) fn gen_fn_def(
        &mut self,
        name: &str,
        params: &[crate::ast::Param],
        body: &[Stmt],
    ) -> Result<(), CodeGenError> {
        if params.len() > ARG_REGS.len() {
            return Err(CodeGenError::Logic(format!(
                "Codegen error: function '{}' has too many parameters (max {})",
                name,
                ARG_REGS.len()
            )));
        }
        let snapshot = self.enter_frame();

        let locals = self.count_block_locals(body);
        let frame = Self::frame_bytes(params.len() + locals);

        writeln!(self.output, "\nglobal {}", name)?;
        writeln!(self.output, "{}:", name)?;
        writeln!(self.output, "    push rbp")?;
        writeln!(self.output, "    mov rbp, rsp")?;
        writeln!(self.output, "    sub rsp, {}", frame)?;

        for (i, param) in params.iter().enumerate() {
            self.stack_top += 8;
            let offset = self.stack_top;
            self.params.push(Var {
                name: param.name.clone(),
                offset,
                dtype: param.dtype,
                array_size: 0,
                struct_type: None,
                owned: false,
            });
            writeln!(self.output, "    mov [rbp-{}], {}", offset, ARG_REGS[i])?;
        }

        self.gen_block(body)?;

        // implicit epilogue for a body without a trailing return
        self.emit_owned_frees()?;
        writeln!(self.output, "    xor rax, rax")?;
        writeln!(self.output, "    mov rsp, rbp")?;
        writeln!(self.output, "    pop rbp")?;
        writeln!(self.output, "    ret")?;

        self.leave_frame(snapshot);
        Ok(())
    }
}
