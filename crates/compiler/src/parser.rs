//! Recursive-descent parser for Krill
//!
//! Statement parsing dispatches on the leading keyword; expression
//! parsing climbs the precedence ladder (logical `and`/`or` and a
//! single comparison on top, then additive, multiplicative, and
//! unary/primary). `comptime(expr)` is folded to an integer literal
//! while parsing, using a name table of previously seen constant
//! bindings. Struct definitions are registered in the shared registry
//! as a side effect of parsing them.

use crate::ast::{
    BinOp, DataType, ElifBranch, Expr, MatchCase, Param, Program, Stmt,
};
use crate::config::Limits;
use crate::lexer::{Token, TokenKind};
use crate::structs::{FieldDef, StructDef, StructRegistry};

/// System V AMD64 passes the first six integer arguments in registers;
/// the language supports exactly that many parameters.
pub const MAX_PARAMS: usize = 6;

/// A compile-time constant binding remembered for `comptime` folding.
struct CtVar {
    name: String,
    value: i64,
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    limits: Limits,
    structs: StructRegistry,
    ct_vars: Vec<CtVar>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>, limits: Limits) -> Self {
        Parser {
            tokens,
            pos: 0,
            limits,
            structs: StructRegistry::new(),
            ct_vars: Vec::new(),
        }
    }

    /// Parse the token sequence into a program: top-level statements in
    /// source order plus the struct registry populated along the way.
    pub fn parse(&mut self) -> Result<Program, String> {
        self.pos = 0;
        self.structs = StructRegistry::new();
        self.ct_vars.clear();
        let mut stmts = Vec::new();
        while !self.check(TokenKind::Eof) {
            stmts.push(self.parse_statement()?);
        }
        let program = Program {
            stmts,
            structs: std::mem::take(&mut self.structs),
        };
        let nodes = program.node_count();
        if nodes > self.limits.max_nodes {
            return Err(format!(
                "Parse error: too many nodes ({} > max {})",
                nodes, self.limits.max_nodes
            ));
        }
        Ok(program)
    }

    // === Token helpers ===

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if tok.kind != TokenKind::Eof {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, String> {
        if !self.check(kind) {
            return Err(format!(
                "Parse error: expected {}, got '{}'",
                what,
                self.peek().text
            ));
        }
        Ok(self.advance())
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    // === Types ===

    /// Parse a type keyword, or an identifier naming a registered
    /// struct. Structs can only be named after their definition.
    fn parse_type_keyword(&mut self) -> Result<DataType, String> {
        let t = self.peek().clone();
        let dtype = match t.kind {
            TokenKind::TyInt => DataType::Int,
            TokenKind::TyFloat => DataType::Float,
            TokenKind::TyStr => DataType::Str,
            TokenKind::TyPtr => DataType::Ptr,
            TokenKind::TyBool => DataType::Bool,
            TokenKind::Ident if self.structs.contains(&t.text) => DataType::Struct,
            _ => {
                return Err(format!("Parse error: expected type, got '{}'", t.text));
            }
        };
        self.advance();
        Ok(dtype)
    }

    /// Optional `: type` annotation; absent means infer.
    fn parse_type_annotation(&mut self) -> Result<DataType, String> {
        if !self.eat(TokenKind::Colon) {
            return Ok(DataType::Unknown);
        }
        self.parse_type_keyword()
    }

    /// Infer the type of a binding from its initializer shape.
    fn infer_type(expr: &Expr) -> DataType {
        match expr {
            Expr::Number(_) => DataType::Int,
            Expr::Str(_) => DataType::Str,
            Expr::Bool(_) => DataType::Bool,
            Expr::StructInit { .. } => DataType::Struct,
            Expr::Addr(_) | Expr::Alloc(_) => DataType::Ptr,
            Expr::Open { .. } | Expr::Deref(_) | Expr::Neg(_) | Expr::Strlen(_) => DataType::Int,
            // identifiers, binops and calls are integer-shaped here
            _ => DataType::Int,
        }
    }

    // === Comptime evaluator ===

    fn ct_set(&mut self, name: &str, value: i64) {
        if let Some(v) = self.ct_vars.iter_mut().find(|v| v.name == name) {
            v.value = value;
            return;
        }
        self.ct_vars.push(CtVar {
            name: name.to_string(),
            value,
        });
    }

    fn ct_get(&self, name: &str) -> Result<i64, String> {
        self.ct_vars
            .iter()
            .find(|v| v.name == name)
            .map(|v| v.value)
            .ok_or_else(|| format!("comptime error: unknown variable '{}'", name))
    }

    /// Fully evaluate an expression at parse time. Only integer
    /// literals, previously seen constant bindings, and the four
    /// arithmetic operators are allowed.
    fn eval_comptime(&self, expr: &Expr) -> Result<i64, String> {
        match expr {
            Expr::Number(v) => Ok(*v),
            Expr::Ident(name) => self.ct_get(name),
            Expr::Binary { op, left, right } => {
                let l = self.eval_comptime(left)?;
                let r = self.eval_comptime(right)?;
                match op {
                    BinOp::Add => Ok(l.wrapping_add(r)),
                    BinOp::Sub => Ok(l.wrapping_sub(r)),
                    BinOp::Mul => Ok(l.wrapping_mul(r)),
                    BinOp::Div => {
                        if r == 0 {
                            Err("comptime error: division by zero".to_string())
                        } else {
                            Ok(l.wrapping_div(r))
                        }
                    }
                    _ => Err(format!("comptime error: unsupported op '{}'", op.symbol())),
                }
            }
            _ => Err("comptime error: cannot evaluate this expression at compile time".to_string()),
        }
    }

    // === Blocks ===

    /// Body block that stops at the first `end`/`elif`/`else` boundary
    /// without consuming it.
    fn parse_block_body(&mut self) -> Result<Vec<Stmt>, String> {
        let mut stmts = Vec::new();
        while !self.check(TokenKind::End)
            && !self.check(TokenKind::Elif)
            && !self.check(TokenKind::Else)
            && !self.check(TokenKind::Eof)
        {
            stmts.push(self.parse_statement()?);
        }
        Ok(stmts)
    }

    /// Full block terminated by `end`, which is consumed.
    fn parse_block(&mut self) -> Result<Vec<Stmt>, String> {
        let mut stmts = Vec::new();
        while !self.check(TokenKind::End) && !self.check(TokenKind::Eof) {
            stmts.push(self.parse_statement()?);
        }
        self.expect(TokenKind::End, "'end'")?;
        Ok(stmts)
    }

    // === Statements ===

    fn parse_statement(&mut self) -> Result<Stmt, String> {
        match self.peek().kind {
            TokenKind::Struct => self.parse_struct_def(),
            TokenKind::Let => self.parse_let(),
            TokenKind::Return => self.parse_return(),
            TokenKind::Print => {
                self.advance();
                self.expect(TokenKind::LParen, "'('")?;
                let value = self.parse_comparison()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(Stmt::Print { value })
            }
            TokenKind::If => self.parse_if(),
            TokenKind::While => {
                self.advance();
                let cond = self.parse_comparison()?;
                let body = self.parse_block()?;
                Ok(Stmt::While { cond, body })
            }
            TokenKind::Do => self.parse_do_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Match => self.parse_match(),
            TokenKind::Fn => self.parse_fn_def(),
            TokenKind::Break => {
                self.advance();
                Ok(Stmt::Break)
            }
            TokenKind::Continue => {
                self.advance();
                Ok(Stmt::Continue)
            }
            TokenKind::Deref => self.parse_deref_assign(),
            TokenKind::Free => {
                self.advance();
                self.expect(TokenKind::LParen, "'('")?;
                let ptr = self.parse_expression()?;
                self.expect(TokenKind::Comma, "','")?;
                let size = self.parse_expression()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(Stmt::Free { ptr, size })
            }
            TokenKind::Read => {
                self.advance();
                let (fd, buf, len) = self.parse_fd_buf_len()?;
                Ok(Stmt::Read { fd, buf, len })
            }
            TokenKind::Write => {
                self.advance();
                let (fd, buf, len) = self.parse_fd_buf_len()?;
                Ok(Stmt::Write { fd, buf, len })
            }
            TokenKind::Close => {
                self.advance();
                self.expect(TokenKind::LParen, "'('")?;
                let fd = self.parse_expression()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(Stmt::Close { fd })
            }
            TokenKind::Ident => self.parse_ident_statement(),
            _ => Err(format!(
                "Parse error: unexpected token '{}'",
                self.peek().text
            )),
        }
    }

    /// Shared argument shape of `read` and `write`.
    fn parse_fd_buf_len(&mut self) -> Result<(Expr, Expr, Expr), String> {
        self.expect(TokenKind::LParen, "'('")?;
        let fd = self.parse_expression()?;
        self.expect(TokenKind::Comma, "','")?;
        let buf = self.parse_expression()?;
        self.expect(TokenKind::Comma, "','")?;
        let len = self.parse_expression()?;
        self.expect(TokenKind::RParen, "')'")?;
        Ok((fd, buf, len))
    }

    /// `struct Name field: type ... end`: registers the definition and
    /// assigns 8-byte field offsets in declaration order.
    fn parse_struct_def(&mut self) -> Result<Stmt, String> {
        self.advance();
        let name = self.expect(TokenKind::Ident, "struct name")?.text;

        let mut fields = Vec::new();
        let mut offset = 0;
        while !self.check(TokenKind::End) && !self.check(TokenKind::Eof) {
            let fname = self.expect(TokenKind::Ident, "field name")?.text;
            self.expect(TokenKind::Colon, "':'")?;
            let ftype = self.parse_type_keyword()?;
            fields.push(FieldDef {
                name: fname,
                dtype: ftype,
                offset,
            });
            offset += 8;
        }
        self.expect(TokenKind::End, "'end'")?;

        self.structs.register(
            StructDef {
                name: name.clone(),
                fields,
            },
            &self.limits,
        )?;
        Ok(Stmt::StructDef { name })
    }

    /// `let` in all of its forms: scalar binding, tuple destructure,
    /// and array declaration with optional inline initializer.
    fn parse_let(&mut self) -> Result<Stmt, String> {
        self.advance();
        let name = self.expect(TokenKind::Ident, "variable name")?.text;
        let declared = self.parse_type_annotation()?;

        // array declaration: let nums: int[5] [= {e, e, ...}]
        if self.eat(TokenKind::LBracket) {
            let size_tok = self.expect(TokenKind::Number, "array size")?;
            let size: usize = size_tok
                .text
                .parse()
                .map_err(|_| format!("Parse error: invalid array size '{}'", size_tok.text))?;
            if size == 0 || size > self.limits.max_array_size {
                return Err(format!(
                    "Parse error: array size {} out of range (max {})",
                    size, self.limits.max_array_size
                ));
            }
            self.expect(TokenKind::RBracket, "']'")?;

            let dtype = if declared != DataType::Unknown {
                declared
            } else {
                DataType::Int
            };
            let mut init = Vec::new();
            if self.eat(TokenKind::Assign) {
                self.expect(TokenKind::LBrace, "'{'")?;
                while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
                    init.push(self.parse_expression()?);
                    self.eat(TokenKind::Comma);
                }
                self.expect(TokenKind::RBrace, "'}'")?;
            }
            return Ok(Stmt::ArrayDecl {
                name,
                dtype,
                size,
                init,
            });
        }

        // tuple destructure: let x, y = f()
        if self.eat(TokenKind::Comma) {
            let second = self.expect(TokenKind::Ident, "second variable name")?.text;
            self.expect(TokenKind::Assign, "'='")?;
            let value = self.parse_expression()?;
            return Ok(Stmt::LetPair {
                first: name,
                second,
                value,
            });
        }

        self.expect(TokenKind::Assign, "'='")?;
        let value = self.parse_comparison()?;
        let inferred = Self::infer_type(&value);

        let dtype = if declared != DataType::Unknown {
            let coerce_ok = (declared == DataType::Float && inferred == DataType::Int)
                || (declared == DataType::Bool && inferred == DataType::Int)
                || (declared == DataType::Struct && inferred == DataType::Struct);
            if !coerce_ok && inferred != DataType::Unknown && declared != inferred {
                return Err(format!(
                    "Type error: '{}' declared as {} but value is {}",
                    name, declared, inferred
                ));
            }
            declared
        } else {
            inferred
        };

        // remember numeric bindings for later comptime expressions
        if let Expr::Number(v) = value {
            self.ct_set(&name, v);
        }

        Ok(Stmt::Let { name, dtype, value })
    }

    fn parse_return(&mut self) -> Result<Stmt, String> {
        self.advance();
        let first = self.parse_expression()?;
        if self.eat(TokenKind::Comma) {
            let second = self.parse_expression()?;
            return Ok(Stmt::ReturnPair { first, second });
        }
        Ok(Stmt::Return { value: first })
    }

    fn parse_if(&mut self) -> Result<Stmt, String> {
        self.advance();
        let cond = self.parse_comparison()?;
        let body = self.parse_block_body()?;
        let mut elifs = Vec::new();
        while self.eat(TokenKind::Elif) {
            let cond = self.parse_comparison()?;
            let body = self.parse_block_body()?;
            elifs.push(ElifBranch { cond, body });
        }
        let else_body = if self.eat(TokenKind::Else) {
            Some(self.parse_block_body()?)
        } else {
            None
        };
        self.expect(TokenKind::End, "'end'")?;
        Ok(Stmt::If {
            cond,
            body,
            elifs,
            else_body,
        })
    }

    /// `do ... while cond`: the `while` closes the body, no `end`.
    fn parse_do_while(&mut self) -> Result<Stmt, String> {
        self.advance();
        let mut body = Vec::new();
        while !self.check(TokenKind::While) && !self.check(TokenKind::Eof) {
            body.push(self.parse_statement()?);
        }
        self.expect(TokenKind::While, "'while'")?;
        let cond = self.parse_comparison()?;
        Ok(Stmt::DoWhile { body, cond })
    }

    /// `for i = start to limit [step e] [where cond] ... end`
    fn parse_for(&mut self) -> Result<Stmt, String> {
        self.advance();
        let var = self.expect(TokenKind::Ident, "loop variable")?.text;
        self.expect(TokenKind::Assign, "'='")?;
        let start = self.parse_expression()?;
        self.expect(TokenKind::To, "'to'")?;
        let limit = self.parse_expression()?;
        let step = if self.eat(TokenKind::Step) {
            self.parse_expression()?
        } else {
            Expr::Number(1)
        };
        if self.eat(TokenKind::Where) {
            let cond = self.parse_comparison()?;
            let body = self.parse_block()?;
            return Ok(Stmt::ForWhere {
                var,
                start,
                limit,
                step,
                cond,
                body,
            });
        }
        let body = self.parse_block()?;
        Ok(Stmt::For {
            var,
            start,
            limit,
            step,
            body,
        })
    }

    /// `match subj (value -> stmt | else -> stmt)* end`: case order
    /// is preserved; the `else` arm may appear anywhere.
    fn parse_match(&mut self) -> Result<Stmt, String> {
        self.advance();
        let subject = self.parse_expression()?;
        let mut cases = Vec::new();
        while !self.check(TokenKind::End) && !self.check(TokenKind::Eof) {
            let value = if self.eat(TokenKind::Else) {
                None
            } else {
                Some(self.parse_expression()?)
            };
            self.expect(TokenKind::Arrow, "'->'")?;
            let body = Box::new(self.parse_statement()?);
            cases.push(MatchCase { value, body });
        }
        self.expect(TokenKind::End, "'end'")?;
        Ok(Stmt::Match { subject, cases })
    }

    /// `fn name(p: t, ...) -> ret[, ret2] ... end`. A second return
    /// type is accepted and discarded; the tuple shape is inferred from
    /// `return a, b` and `let x, y = f()` sites.
    fn parse_fn_def(&mut self) -> Result<Stmt, String> {
        self.advance();
        let name = self.expect(TokenKind::Ident, "function name")?.text;
        self.expect(TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        while !self.check(TokenKind::RParen) {
            if params.len() >= MAX_PARAMS {
                return Err(format!(
                    "Parse error: function '{}' has too many parameters (max {})",
                    name, MAX_PARAMS
                ));
            }
            let pname = self.expect(TokenKind::Ident, "parameter name")?.text;
            let mut dtype = self.parse_type_annotation()?;
            if dtype == DataType::Unknown {
                dtype = DataType::Int;
            }
            params.push(Param { name: pname, dtype });
            self.eat(TokenKind::Comma);
        }
        self.expect(TokenKind::RParen, "')'")?;

        let mut ret = DataType::Int;
        if self.eat(TokenKind::Arrow) {
            ret = self.parse_type_keyword()?;
            if self.eat(TokenKind::Comma) {
                self.parse_type_keyword()?;
            }
        }
        let body = self.parse_block()?;
        Ok(Stmt::FnDef {
            name,
            params,
            ret,
            body,
        })
    }

    /// `deref(p) = expr`: write through a pointer.
    fn parse_deref_assign(&mut self) -> Result<Stmt, String> {
        self.advance();
        self.expect(TokenKind::LParen, "'('")?;
        let name = self.expect(TokenKind::Ident, "variable name")?.text;
        self.expect(TokenKind::RParen, "')'")?;
        self.expect(TokenKind::Assign, "'='")?;
        let value = self.parse_expression()?;
        Ok(Stmt::DerefAssign { name, value })
    }

    /// Statements that begin with an identifier: call, array element
    /// assignment, field assignment, plain reassignment.
    fn parse_ident_statement(&mut self) -> Result<Stmt, String> {
        let name = self.advance().text;

        if self.eat(TokenKind::LParen) {
            let mut args = Vec::new();
            while !self.check(TokenKind::RParen) && !self.check(TokenKind::Eof) {
                args.push(self.parse_expression()?);
                self.eat(TokenKind::Comma);
            }
            self.expect(TokenKind::RParen, "')'")?;
            return Ok(Stmt::Call { name, args });
        }

        if self.eat(TokenKind::LBracket) {
            let index = self.parse_expression()?;
            self.expect(TokenKind::RBracket, "']'")?;
            self.expect(TokenKind::Assign, "'='")?;
            let value = self.parse_expression()?;
            return Ok(Stmt::ArrayAssign { name, index, value });
        }

        if self.eat(TokenKind::Dot) {
            let field = self.expect(TokenKind::Ident, "field name")?.text;
            self.expect(TokenKind::Assign, "'='")?;
            let value = self.parse_expression()?;
            return Ok(Stmt::FieldAssign { name, field, value });
        }

        if self.eat(TokenKind::Assign) {
            let value = self.parse_expression()?;
            return Ok(Stmt::Reassign { name, value });
        }

        Err(format!(
            "Parse error: unexpected token '{}' after identifier",
            self.peek().text
        ))
    }

    // === Expressions ===

    /// Comparison level: at most one relational operator between
    /// additive expressions, then zero or more right-associative
    /// `and`/`or` combinations.
    fn parse_comparison(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_expression()?;
        let cmp = match self.peek().kind {
            TokenKind::Gt => Some(BinOp::Gt),
            TokenKind::Lt => Some(BinOp::Lt),
            TokenKind::EqEq => Some(BinOp::Eq),
            TokenKind::NotEq => Some(BinOp::Ne),
            TokenKind::GtEq => Some(BinOp::Ge),
            TokenKind::LtEq => Some(BinOp::Le),
            _ => None,
        };
        if let Some(op) = cmp {
            self.advance();
            let right = self.parse_expression()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        while self.check(TokenKind::And) || self.check(TokenKind::Or) {
            let is_and = self.advance().kind == TokenKind::And;
            let right = Box::new(self.parse_comparison()?);
            let l = Box::new(left);
            left = if is_and {
                Expr::And { left: l, right }
            } else {
                Expr::Or { left: l, right }
            };
        }
        Ok(left)
    }

    /// Additive level: `term ((+|-) term)*`
    fn parse_expression(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// Multiplicative level: `factor ((*|/) factor)*`
    fn parse_term(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                _ => break,
            };
            self.advance();
            let right = self.parse_factor()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_number(text: &str) -> Result<i64, String> {
        text.parse::<i64>()
            .map_err(|_| format!("Parse error: invalid number literal '{}'", text))
    }

    /// Unary/primary level.
    fn parse_factor(&mut self) -> Result<Expr, String> {
        match self.peek().kind {
            // comptime(expr) folds to a literal during parsing
            TokenKind::Comptime => {
                self.advance();
                self.expect(TokenKind::LParen, "'('")?;
                let inner = self.parse_expression()?;
                self.expect(TokenKind::RParen, "')'")?;
                let value = self.eval_comptime(&inner)?;
                Ok(Expr::Number(value))
            }
            TokenKind::Open => {
                self.advance();
                self.expect(TokenKind::LParen, "'('")?;
                let path = self.parse_expression()?;
                self.expect(TokenKind::Comma, "','")?;
                let flags = self.parse_expression()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(Expr::Open {
                    path: Box::new(path),
                    flags: Box::new(flags),
                })
            }
            TokenKind::Addr => {
                self.advance();
                self.expect(TokenKind::LParen, "'('")?;
                let name = self.expect(TokenKind::Ident, "variable name")?.text;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(Expr::Addr(name))
            }
            TokenKind::Deref => {
                self.advance();
                self.expect(TokenKind::LParen, "'('")?;
                let name = self.expect(TokenKind::Ident, "variable name")?.text;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(Expr::Deref(name))
            }
            TokenKind::Alloc => {
                self.advance();
                self.expect(TokenKind::LParen, "'('")?;
                let size = self.parse_expression()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(Expr::Alloc(Box::new(size)))
            }
            TokenKind::Strlen => {
                self.advance();
                self.expect(TokenKind::LParen, "'('")?;
                let inner = self.parse_expression()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(Expr::Strlen(Box::new(inner)))
            }
            // negative literal folds directly; anything else negates
            TokenKind::Minus => {
                self.advance();
                if self.check(TokenKind::Number) {
                    let tok = self.advance();
                    return Ok(Expr::Number(-Self::parse_number(&tok.text)?));
                }
                let inner = self.parse_factor()?;
                Ok(Expr::Neg(Box::new(inner)))
            }
            TokenKind::Number => {
                let tok = self.advance();
                Ok(Expr::Number(Self::parse_number(&tok.text)?))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            TokenKind::Str => {
                let tok = self.advance();
                Ok(Expr::Str(tok.text))
            }
            TokenKind::Ident => self.parse_ident_expr(),
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            _ => Err(format!(
                "Parse error: unexpected token '{}' in expression",
                self.peek().text
            )),
        }
    }

    /// Identifier-led expressions: struct constructor, function call,
    /// array access, field access, plain variable.
    fn parse_ident_expr(&mut self) -> Result<Expr, String> {
        let name = self.advance().text;

        if self.eat(TokenKind::LParen) {
            let mut args = Vec::new();
            while !self.check(TokenKind::RParen) && !self.check(TokenKind::Eof) {
                args.push(self.parse_expression()?);
                self.eat(TokenKind::Comma);
            }
            self.expect(TokenKind::RParen, "')'")?;
            // a registered struct name makes this a constructor
            if self.structs.contains(&name) {
                return Ok(Expr::StructInit {
                    type_name: name,
                    args,
                });
            }
            return Ok(Expr::Call { name, args });
        }

        if self.eat(TokenKind::LBracket) {
            let index = self.parse_expression()?;
            self.expect(TokenKind::RBracket, "']'")?;
            return Ok(Expr::ArrayAccess {
                name,
                index: Box::new(index),
            });
        }

        if self.eat(TokenKind::Dot) {
            let field = self.expect(TokenKind::Ident, "field name")?.text;
            return Ok(Expr::FieldAccess { name, field });
        }

        Ok(Expr::Ident(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse(source: &str) -> Program {
        let limits = Limits::default();
        let tokens = tokenize(source, &limits).unwrap();
        Parser::new(tokens, limits).parse().unwrap()
    }

    fn parse_err(source: &str) -> String {
        let limits = Limits::default();
        let tokens = tokenize(source, &limits).unwrap();
        Parser::new(tokens, limits).parse().unwrap_err()
    }

    #[test]
    fn test_parse_let_infers_int() {
        let program = parse("let x = 5");
        match &program.stmts[0] {
            Stmt::Let { name, dtype, value, .. } => {
                assert_eq!(name, "x");
                assert_eq!(*dtype, DataType::Int);
                assert_eq!(*value, Expr::Number(5));
            }
            other => panic!("Expected Let, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_precedence() {
        // 2 + 3 * 4 parses as 2 + (3 * 4)
        let program = parse("let x = 2 + 3 * 4");
        match &program.stmts[0] {
            Stmt::Let { value, .. } => match value {
                Expr::Binary { op, left, right } => {
                    assert_eq!(*op, BinOp::Add);
                    assert_eq!(**left, Expr::Number(2));
                    assert!(matches!(**right, Expr::Binary { op: BinOp::Mul, .. }));
                }
                other => panic!("Expected Binary, got {:?}", other),
            },
            other => panic!("Expected Let, got {:?}", other),
        }
    }

    #[test]
    fn test_comptime_folds_to_literal() {
        let program = parse("let x = comptime(2 + 3 * 4)");
        match &program.stmts[0] {
            Stmt::Let { value, .. } => assert_eq!(*value, Expr::Number(14)),
            other => panic!("Expected Let, got {:?}", other),
        }
    }

    #[test]
    fn test_comptime_sees_earlier_constant_bindings() {
        let program = parse("let n = 10 let m = comptime(n * 4 + 2)");
        match &program.stmts[1] {
            Stmt::Let { value, .. } => assert_eq!(*value, Expr::Number(42)),
            other => panic!("Expected Let, got {:?}", other),
        }
    }

    #[test]
    fn test_comptime_chains_through_folded_results() {
        // m is itself comptime-produced, so it participates in later folds
        let program = parse("let n = 6 let m = comptime(n * 7) let k = comptime(m + 1)");
        match &program.stmts[2] {
            Stmt::Let { value, .. } => assert_eq!(*value, Expr::Number(43)),
            other => panic!("Expected Let, got {:?}", other),
        }
    }

    #[test]
    fn test_comptime_division_by_zero() {
        let err = parse_err("let x = comptime(1 / 0)");
        assert!(err.contains("division by zero"));
    }

    #[test]
    fn test_comptime_unknown_variable() {
        let err = parse_err("let x = comptime(y + 1)");
        assert!(err.contains("unknown variable 'y'"));
    }

    #[test]
    fn test_type_mismatch_is_fatal() {
        let err = parse_err("let x: int = \"hello\"");
        assert!(err.contains("Type error"));
    }

    #[test]
    fn test_int_coerces_to_float_binding() {
        let program = parse("let x: float = 3");
        match &program.stmts[0] {
            Stmt::Let { dtype, .. } => assert_eq!(*dtype, DataType::Float),
            other => panic!("Expected Let, got {:?}", other),
        }
    }

    #[test]
    fn test_struct_definition_registers_offsets() {
        let program = parse("struct P x: int y: int end");
        let sd = program.structs.find("P").unwrap();
        assert_eq!(sd.fields[0].offset, 0);
        assert_eq!(sd.fields[1].offset, 8);
        assert_eq!(sd.size(), 16);
    }

    #[test]
    fn test_constructor_recognized_after_definition() {
        let program = parse("struct P x: int y: int end let p = P(3, 4)");
        match &program.stmts[1] {
            Stmt::Let { dtype, value, .. } => {
                assert_eq!(*dtype, DataType::Struct);
                assert!(matches!(value,
                    Expr::StructInit { type_name, args } if type_name == "P" && args.len() == 2));
            }
            other => panic!("Expected Let, got {:?}", other),
        }
    }

    #[test]
    fn test_call_before_struct_definition_is_a_fn_call() {
        let program = parse("let p = P(3, 4) struct P x: int y: int end");
        match &program.stmts[0] {
            Stmt::Let { value, .. } => {
                assert!(matches!(value, Expr::Call { name, .. } if name == "P"));
            }
            other => panic!("Expected Let, got {:?}", other),
        }
    }

    #[test]
    fn test_for_defaults_step_to_one() {
        let program = parse("for i = 0 to 10 print(i) end");
        match &program.stmts[0] {
            Stmt::For { var, step, body, .. } => {
                assert_eq!(var, "i");
                assert_eq!(*step, Expr::Number(1));
                assert_eq!(body.len(), 1);
            }
            other => panic!("Expected For, got {:?}", other),
        }
    }

    #[test]
    fn test_for_where_produces_filtered_variant() {
        let program = parse("for i = 0 to 10 where i > 5 print(i) end");
        assert!(matches!(&program.stmts[0], Stmt::ForWhere { .. }));
    }

    #[test]
    fn test_do_while_body_closed_by_while() {
        let program = parse("let x = 0 do x = x + 1 while x < 3");
        match &program.stmts[1] {
            Stmt::DoWhile { body, cond } => {
                assert_eq!(body.len(), 1);
                assert!(matches!(cond, Expr::Binary { op: BinOp::Lt, .. }));
            }
            other => panic!("Expected DoWhile, got {:?}", other),
        }
    }

    #[test]
    fn test_match_preserves_case_order_and_else() {
        let program = parse(
            "match 2 1 -> print(\"a\") 2 -> print(\"b\") else -> print(\"c\") end",
        );
        match &program.stmts[0] {
            Stmt::Match { cases, .. } => {
                assert_eq!(cases.len(), 3);
                assert_eq!(cases[0].value, Some(Expr::Number(1)));
                assert_eq!(cases[1].value, Some(Expr::Number(2)));
                assert_eq!(cases[2].value, None);
            }
            other => panic!("Expected Match, got {:?}", other),
        }
    }

    #[test]
    fn test_fn_params_default_to_int() {
        let program = parse("fn add(a, b: int) -> int return a + b end");
        match &program.stmts[0] {
            Stmt::FnDef { params, ret, .. } => {
                assert_eq!(params[0].dtype, DataType::Int);
                assert_eq!(params[1].dtype, DataType::Int);
                assert_eq!(*ret, DataType::Int);
            }
            other => panic!("Expected FnDef, got {:?}", other),
        }
    }

    #[test]
    fn test_fn_rejects_seventh_parameter() {
        let err = parse_err("fn f(a, b, c, d, e, g, h) return 0 end");
        assert!(err.contains("too many parameters"));
    }

    #[test]
    fn test_tuple_return_and_destructure() {
        let program = parse("fn swap(a, b) -> int, int return b, a end let x, y = swap(1, 2)");
        match &program.stmts[0] {
            Stmt::FnDef { body, .. } => {
                assert!(matches!(&body[0], Stmt::ReturnPair { .. }));
            }
            other => panic!("Expected FnDef, got {:?}", other),
        }
        assert!(matches!(&program.stmts[1], Stmt::LetPair { .. }));
    }

    #[test]
    fn test_array_decl_with_initializer() {
        let program = parse("let n: int[3] = {10, 20, 30}");
        match &program.stmts[0] {
            Stmt::ArrayDecl { size, init, dtype, .. } => {
                assert_eq!(*size, 3);
                assert_eq!(init.len(), 3);
                assert_eq!(*dtype, DataType::Int);
            }
            other => panic!("Expected ArrayDecl, got {:?}", other),
        }
    }

    #[test]
    fn test_array_size_limit() {
        let err = parse_err("let n: int[9999]");
        assert!(err.contains("out of range"));
    }

    #[test]
    fn test_and_or_are_right_associative() {
        let program = parse("let b = 1 < 2 and 3 < 4 or 5 < 6");
        match &program.stmts[0] {
            Stmt::Let { value, .. } => match value {
                Expr::And { right, .. } => {
                    assert!(matches!(**right, Expr::Or { .. }));
                }
                other => panic!("Expected And at the top, got {:?}", other),
            },
            other => panic!("Expected Let, got {:?}", other),
        }
    }

    #[test]
    fn test_negative_literal_folds() {
        let program = parse("let x = -5");
        match &program.stmts[0] {
            Stmt::Let { value, .. } => assert_eq!(*value, Expr::Number(-5)),
            other => panic!("Expected Let, got {:?}", other),
        }
    }

    #[test]
    fn test_unary_negate_of_expression() {
        let program = parse("let y = 1 let x = -(y)");
        match &program.stmts[1] {
            Stmt::Let { value, .. } => assert!(matches!(value, Expr::Neg(_))),
            other => panic!("Expected Let, got {:?}", other),
        }
    }

    #[test]
    fn test_node_budget_enforced() {
        let limits = Limits {
            max_nodes: 3,
            ..Limits::default()
        };
        let tokens = tokenize("let x = 1 + 2", &limits).unwrap();
        let err = Parser::new(tokens, limits).parse().unwrap_err();
        assert!(err.contains("too many nodes"));
    }

    #[test]
    fn test_unexpected_token_error() {
        let err = parse_err("let x = 5 )");
        assert!(err.contains("unexpected token ')'"));
    }
}
