//! CodeGen state and core types
//!
//! The CodeGen struct owns everything one compile needs: the pre-sized
//! output and string-literal buffers, the per-function variable and
//! parameter tables, the label counter, the loop-context stack for
//! `break`/`continue`, and the two auxiliary analyses (CSE cache and
//! induction-variable registers). All counters and cursors are reset
//! at the start of `generate`, not at its end.

use super::cse::CseCache;
use super::error::CodeGenError;
use super::regalloc::LoopRegisters;
use crate::ast::DataType;
use crate::config::CompilerConfig;
use crate::structs::StructRegistry;

/// Capacity of the assembly text buffer.
pub(super) const OUT_BUF_SIZE: usize = 4 * 1024 * 1024;
/// Capacity of the `.data` string-literal buffer.
pub(super) const STR_BUF_SIZE: usize = 64 * 1024;

/// System V AMD64 integer argument registers, in order.
pub(super) const ARG_REGS: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];

/// A local variable or parameter in the active function's frame.
/// `offset` is positive and denotes `[rbp-offset]`.
#[derive(Debug, Clone)]
pub(super) struct Var {
    pub name: String,
    pub offset: usize,
    pub dtype: DataType,
    /// Element count for arrays, field count for structs, 0 otherwise
    #[allow(dead_code)] // recorded in the table; indexing is unchecked
    pub array_size: usize,
    /// Struct definition name for struct-typed variables
    pub struct_type: Option<String>,
    /// Set when the value came from `alloc`; the epilogue emits an
    /// implicit munmap for it
    pub owned: bool,
}

/// Jump targets of one enclosing loop.
#[derive(Debug, Clone, Copy)]
pub(super) struct LoopLabels {
    pub break_label: usize,
    pub continue_label: usize,
}

/// Snapshot of the variable tables, taken around function bodies.
pub(super) struct FrameSnapshot {
    vars: Vec<Var>,
    params: Vec<Var>,
    stack_top: usize,
}

pub struct CodeGen {
    pub(super) output: String,
    pub(super) strings: String,
    pub(super) label_count: usize,
    pub(super) str_count: usize,
    pub(super) vars: Vec<Var>,
    pub(super) params: Vec<Var>,
    pub(super) stack_top: usize,
    pub(super) structs: StructRegistry,
    pub(super) loop_stack: Vec<LoopLabels>,
    /// Nesting depth of `for` loops; inner loops save/restore the
    /// hoisted limit/step registers around themselves
    pub(super) for_depth: usize,
    pub(super) cse: CseCache,
    pub(super) regs: LoopRegisters,
    pub(super) config: CompilerConfig,
}

impl Default for CodeGen {
    fn default() -> Self {
        Self::new(CompilerConfig::default())
    }
}

impl CodeGen {
    pub fn new(config: CompilerConfig) -> Self {
        CodeGen {
            output: String::with_capacity(OUT_BUF_SIZE),
            strings: String::with_capacity(STR_BUF_SIZE),
            label_count: 0,
            str_count: 0,
            vars: Vec::new(),
            params: Vec::new(),
            stack_top: 0,
            structs: StructRegistry::new(),
            loop_stack: Vec::new(),
            for_depth: 0,
            cse: CseCache::new(),
            regs: LoopRegisters::new(),
            config,
        }
    }

    /// Reset all state for a fresh compile, keeping buffer capacity.
    pub(super) fn reset(&mut self, structs: &StructRegistry) {
        self.output.clear();
        self.strings.clear();
        self.label_count = 0;
        self.str_count = 0;
        self.vars.clear();
        self.params.clear();
        self.stack_top = 0;
        self.structs = structs.clone();
        self.loop_stack.clear();
        self.for_depth = 0;
        self.cse.flush();
        self.regs.release_all();
    }

    pub(super) fn new_label(&mut self) -> usize {
        let id = self.label_count;
        self.label_count += 1;
        id
    }

    // === Variable table ===

    /// Look up a variable, preferring the most recently declared
    /// shadowing binding (reverse scan), then falling back to the
    /// parameter table.
    pub(super) fn var(&self, name: &str) -> Result<&Var, CodeGenError> {
        self.vars
            .iter()
            .rev()
            .find(|v| v.name == name)
            .or_else(|| self.params.iter().rev().find(|v| v.name == name))
            .ok_or_else(|| {
                CodeGenError::Logic(format!("Codegen error: undefined variable '{}'", name))
            })
    }

    pub(super) fn var_offset(&self, name: &str) -> Result<usize, CodeGenError> {
        Ok(self.var(name)?.offset)
    }

    pub(super) fn var_dtype(&self, name: &str) -> Result<DataType, CodeGenError> {
        Ok(self.var(name)?.dtype)
    }

    fn check_var_capacity(&self) -> Result<(), CodeGenError> {
        if self.vars.len() >= self.config.limits.max_locals {
            return Err(CodeGenError::Logic(format!(
                "Codegen error: too many local variables (max {})",
                self.config.limits.max_locals
            )));
        }
        Ok(())
    }

    /// Allocate one 8-byte slot and return its offset. Offsets grow
    /// monotonically within a function and are unique per variable.
    pub(super) fn add_var(&mut self, name: &str, dtype: DataType) -> Result<usize, CodeGenError> {
        self.check_var_capacity()?;
        self.stack_top += 8;
        self.vars.push(Var {
            name: name.to_string(),
            offset: self.stack_top,
            dtype,
            array_size: 0,
            struct_type: None,
            owned: false,
        });
        Ok(self.stack_top)
    }

    /// Allocate `size` contiguous slots for an array; the recorded
    /// offset is that of element 0, and element i lies at base + i*8.
    pub(super) fn add_var_array(
        &mut self,
        name: &str,
        dtype: DataType,
        size: usize,
    ) -> Result<usize, CodeGenError> {
        self.check_var_capacity()?;
        let base = self.stack_top + 8;
        self.stack_top += size * 8;
        self.vars.push(Var {
            name: name.to_string(),
            offset: base,
            dtype,
            array_size: size,
            struct_type: None,
            owned: false,
        });
        Ok(base)
    }

    /// Allocate `field_count` contiguous slots for a struct value;
    /// field k lies at base + 8*k.
    pub(super) fn add_var_struct(
        &mut self,
        name: &str,
        struct_type: &str,
        field_count: usize,
    ) -> Result<usize, CodeGenError> {
        self.check_var_capacity()?;
        let base = self.stack_top + 8;
        self.stack_top += field_count * 8;
        self.vars.push(Var {
            name: name.to_string(),
            offset: base,
            dtype: DataType::Struct,
            array_size: field_count,
            struct_type: Some(struct_type.to_string()),
            owned: false,
        });
        Ok(base)
    }

    pub(super) fn mark_owned(&mut self, name: &str) {
        if let Some(v) = self.vars.iter_mut().rev().find(|v| v.name == name) {
            v.owned = true;
        }
    }

    // === Frame snapshots around function bodies ===

    pub(super) fn enter_frame(&mut self) -> FrameSnapshot {
        let snapshot = FrameSnapshot {
            vars: std::mem::take(&mut self.vars),
            params: std::mem::take(&mut self.params),
            stack_top: self.stack_top,
        };
        self.stack_top = 0;
        self.cse.flush();
        snapshot
    }

    pub(super) fn leave_frame(&mut self, snapshot: FrameSnapshot) {
        self.vars = snapshot.vars;
        self.params = snapshot.params;
        self.stack_top = snapshot.stack_top;
        self.cse.flush();
    }

    /// Round a frame up to the 16-byte alignment the ABI requires.
    /// Every frame reserves at least 16 bytes.
    pub(super) fn frame_bytes(slots: usize) -> usize {
        let mut bytes = slots * 8;
        if bytes % 16 != 0 {
            bytes += 8;
        }
        if bytes == 0 { 16 } else { bytes }
    }
}
