//! Memory and file built-ins lowered to direct Linux syscalls
//!
//! `alloc`/`free` map to mmap/munmap; `open`/`read`/`write`/`close` to
//! the corresponding file syscalls. `syscall` clobbers `rcx` and `r11`,
//! so the CSE scratch register is dropped at every emission site.

use super::error::CodeGenError;
use super::state::CodeGen;
use crate::ast::Expr;
use std::fmt::Write as _;

// Linux x86-64 syscall numbers
const SYS_READ: u32 = 0;
const SYS_WRITE: u32 = 1;
const SYS_OPEN: u32 = 2;
const SYS_CLOSE: u32 = 3;
const SYS_MMAP: u32 = 9;
const SYS_MUNMAP: u32 = 11;

// mmap constants
const PROT_READ_WRITE: u32 = 3;
const MAP_PRIVATE_ANONYMOUS: u32 = 0x22;

/// Epilogue munmap length for owned pointers. The allocation size is
/// not tracked per variable, so every implicit free unmaps this much.
/// TODO: record the size per alloc site so the epilogue munmap matches.
const OWNED_FREE_BYTES: u32 = 1024;

impl CodeGen {
    /// `alloc(n)`: anonymous private mapping, address in `rax`.
    pub(super) fn gen_alloc(&mut self, size: &Expr) -> Result<(), CodeGenError> {
        self.gen_expr(size)?;
        writeln!(self.output, "    mov rsi, rax")?;
        writeln!(self.output, "    mov rax, {}", SYS_MMAP)?;
        writeln!(self.output, "    xor rdi, rdi")?;
        writeln!(self.output, "    mov rdx, {}", PROT_READ_WRITE)?;
        writeln!(self.output, "    mov r10, {}", MAP_PRIVATE_ANONYMOUS)?;
        writeln!(self.output, "    mov r8, -1")?;
        writeln!(self.output, "    xor r9, r9")?;
        writeln!(self.output, "    syscall")?;
        self.cse.invalidate_scratch();
        Ok(())
    }

    /// `free(p, n)`: munmap.
    pub(super) fn gen_free(&mut self, ptr: &Expr, size: &Expr) -> Result<(), CodeGenError> {
        self.gen_expr(ptr)?;
        writeln!(self.output, "    push rax")?;
        self.gen_expr(size)?;
        writeln!(self.output, "    mov rsi, rax")?;
        writeln!(self.output, "    pop rdi")?;
        writeln!(self.output, "    mov rax, {}", SYS_MUNMAP)?;
        writeln!(self.output, "    syscall")?;
        self.cse.invalidate_scratch();
        Ok(())
    }

    /// `open(path, flags)`: mode 0, descriptor in `rax`.
    pub(super) fn gen_open(&mut self, path: &Expr, flags: &Expr) -> Result<(), CodeGenError> {
        self.gen_expr(path)?;
        writeln!(self.output, "    push rax")?;
        self.gen_expr(flags)?;
        writeln!(self.output, "    mov rsi, rax")?;
        writeln!(self.output, "    pop rdi")?;
        writeln!(self.output, "    mov rax, {}", SYS_OPEN)?;
        writeln!(self.output, "    xor rdx, rdx")?;
        writeln!(self.output, "    syscall")?;
        self.cse.invalidate_scratch();
        Ok(())
    }

    /// `read(fd, buf, len)` / `write(fd, buf, len)`.
    pub(super) fn gen_read_write(
        &mut self,
        fd: &Expr,
        buf: &Expr,
        len: &Expr,
        is_write: bool,
    ) -> Result<(), CodeGenError> {
        self.gen_expr(fd)?;
        writeln!(self.output, "    push rax")?;
        self.gen_expr(buf)?;
        writeln!(self.output, "    push rax")?;
        self.gen_expr(len)?;
        writeln!(self.output, "    mov rdx, rax")?;
        writeln!(self.output, "    pop rsi")?;
        writeln!(self.output, "    pop rdi")?;
        let nr = if is_write { SYS_WRITE } else { SYS_READ };
        writeln!(self.output, "    mov rax, {}", nr)?;
        writeln!(self.output, "    syscall")?;
        self.cse.invalidate_scratch();
        Ok(())
    }

    /// `close(fd)`.
    pub(super) fn gen_close(&mut self, fd: &Expr) -> Result<(), CodeGenError> {
        self.gen_expr(fd)?;
        writeln!(self.output, "    mov rdi, rax")?;
        writeln!(self.output, "    mov rax, {}", SYS_CLOSE)?;
        writeln!(self.output, "    syscall")?;
        self.cse.invalidate_scratch();
        Ok(())
    }

    /// Implicit munmap for every `alloc`-initialized local still in the
    /// table. Emitted by function epilogues, before the return value's
    /// registers are restored by the caller of this helper.
    pub(super) fn emit_owned_frees(&mut self) -> Result<(), CodeGenError> {
        let owned: Vec<usize> = self
            .vars
            .iter()
            .filter(|v| v.owned)
            .map(|v| v.offset)
            .collect();
        if owned.is_empty() {
            return Ok(());
        }
        for off in owned {
            writeln!(self.output, "    mov rdi, [rbp-{}]", off)?;
            writeln!(self.output, "    mov rsi, {}", OWNED_FREE_BYTES)?;
            writeln!(self.output, "    mov rax, {}", SYS_MUNMAP)?;
            writeln!(self.output, "    syscall")?;
        }
        self.cse.invalidate_scratch();
        Ok(())
    }

    /// True when the active frame has owned pointers to release.
    pub(super) fn has_owned_vars(&self) -> bool {
        self.vars.iter().any(|v| v.owned)
    }
}
