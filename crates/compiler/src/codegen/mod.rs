//! NASM x86-64 code generation
//!
//! This module walks the AST and emits NASM assembly text (`elf64`)
//! for the System V AMD64 ABI. An external assembler and libc-aware
//! linker turn the text into an executable; nothing here links.
//!
//! # Key Concepts
//!
//! ## Value Discipline
//!
//! Expression evaluation always leaves its result in `rax`. Floats are
//! loaded into `xmm0` and bit-copied into `rax` so spills and moves
//! stay uniform; the bits travel back to `xmm0` at float-specific
//! consumers. Bools occupy one byte of their 8-byte slot and load
//! zero-extended.
//!
//! ## Frames
//!
//! Every function subtracts an exact 16-byte-aligned frame computed by
//! a pre-pass over its body (`count_block_locals`). Locals take 8 bytes
//! each; arrays take `size*8` with the recorded offset at element 0;
//! structs take `field_count*8`. Offsets grow monotonically and denote
//! `[rbp-offset]`.
//!
//! ## Register Budget
//!
//! - `rax`: expression results; `rbx`/`r10`: binop right/left
//! - `r11`: CSE scratch (dropped at calls and syscalls)
//! - `r12`/`r13`: linear-scan induction variables (`r13` doubles as
//!   the match subject, saved around a match when occupied)
//! - `r14`/`r15`: hoisted loop limit and step, saved around inner loops
//!
//! # Module Structure
//!
//! - `state.rs`: CodeGen struct, variable tables, frame sizing
//! - `program.rs`: section layout, function ordering, `main`
//! - `expr.rs`: expression dispatch, comparisons, strength reduction
//! - `statements.rs`: bindings, stores, print, returns, function defs
//! - `control_flow.rs`: if/while/do-while/match, break/continue
//! - `loops.rs`: `for` lowering, LICM, tiling, `where` filters
//! - `syscalls.rs`: alloc/free/open/read/write/close, implicit frees
//! - `cse.rs`: common-subexpression cache
//! - `regalloc.rs`: induction-variable registers
//! - `error.rs`: error types

mod control_flow;
mod cse;
mod error;
mod expr;
mod loops;
mod program;
mod regalloc;
mod state;
mod statements;
mod syscalls;

pub use error::CodeGenError;
pub use state::CodeGen;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::lexer::tokenize;
    use crate::parser::Parser;

    fn compile_with(source: &str, config: CompilerConfig) -> String {
        let tokens = tokenize(source, &config.limits).unwrap();
        let program = Parser::new(tokens, config.limits.clone()).parse().unwrap();
        let mut codegen = CodeGen::new(config);
        codegen.generate(&program).unwrap()
    }

    fn compile(source: &str) -> String {
        compile_with(source, CompilerConfig::default())
    }

    fn compile_err(source: &str) -> String {
        let config = CompilerConfig::default();
        let tokens = tokenize(source, &config.limits).unwrap();
        let program = Parser::new(tokens, config.limits.clone()).parse().unwrap();
        let mut codegen = CodeGen::new(config);
        codegen.generate(&program).unwrap_err().to_string()
    }

    #[test]
    fn test_sections_and_externs() {
        let asm = compile("print(42)");
        assert!(asm.starts_with("section .data\n"));
        assert!(asm.contains("    fmt db \"%ld\", 10, 0"));
        assert!(asm.contains("    fmtf db \"%g\", 10, 0"));
        assert!(asm.contains("    fmts db \"%s\", 10, 0"));
        assert!(asm.contains("    str_true db \"true\", 10, 0"));
        assert!(asm.contains("    str_false db \"false\", 10, 0"));
        assert!(asm.contains("section .text"));
        assert!(asm.contains("    extern printf"));
        assert!(asm.contains("    extern strlen"));
        assert!(asm.contains("    global main"));
        assert!(asm.contains("\nmain:\n"));
    }

    #[test]
    fn test_arithmetic_expression() {
        let asm = compile("let x = 2 + 3 * 4 print(x)");
        assert!(asm.contains("    imul rax, rbx"));
        assert!(asm.contains("    add rax, rbx"));
        assert!(asm.contains("    lea rdi, [rel fmt]"));
    }

    #[test]
    fn test_frame_is_aligned_and_at_least_16() {
        // one local: 8 bytes rounds up to 16
        let asm = compile("let x = 1");
        assert!(asm.contains("    sub rsp, 16"));
        // three locals: 24 bytes rounds up to 32
        let asm = compile("let a = 1 let b = 2 let c = 3");
        assert!(asm.contains("    sub rsp, 32"));
        // no locals still reserves 16
        let asm = compile("print(1)");
        assert!(asm.contains("    sub rsp, 16"));
    }

    #[test]
    fn test_multiply_by_power_of_two_strength_reduces() {
        let asm = compile("let x = 5 let y = x * 8 print(y)");
        assert!(asm.contains("    shl rax, 3"));
        // the multiply itself is gone
        assert!(!asm.contains("    imul rax, rbx"));
    }

    #[test]
    fn test_multiply_by_non_power_of_two_stays_imul() {
        let asm = compile("let x = 5 let y = x * 7 print(y)");
        assert!(asm.contains("    imul rax, rbx"));
        assert!(!asm.contains("    shl rax"));
    }

    #[test]
    fn test_division_clears_rdx() {
        let asm = compile("let x = 10 let y = x / 2 print(y)");
        assert!(asm.contains("    xor rdx, rdx"));
        assert!(asm.contains("    idiv rbx"));
    }

    #[test]
    fn test_comparison_uses_setcc_movzx() {
        let asm = compile("let a = 1 let b = 2 let c = a < b print(c)");
        assert!(asm.contains("    cmp rax, rbx"));
        assert!(asm.contains("    setl al"));
        assert!(asm.contains("    movzx rax, al"));
    }

    #[test]
    fn test_string_literal_collected_in_trailing_data() {
        let asm = compile("let s = \"hi\" print(s)");
        // literal in the appendix, NUL-terminated, newline from fmts
        assert!(asm.contains("    str0 db \"hi\", 0"));
        assert!(asm.contains("    lea rax, [rel str0]"));
        assert!(asm.contains("    lea rdi, [rel fmts]"));
        let appendix = asm.rfind("section .data").unwrap();
        assert!(asm[appendix..].contains("str0"));
    }

    #[test]
    fn test_print_bool_selects_fixed_messages() {
        let asm = compile("let b = true print(b)");
        assert!(asm.contains("    lea rdi, [rel str_true]"));
        assert!(asm.contains("    lea rdi, [rel str_false]"));
        assert!(asm.contains("    mov byte [rbp-8], al"));
    }

    #[test]
    fn test_print_float_sets_vector_count() {
        let asm = compile("let f: float = 3 print(f)");
        assert!(asm.contains("    cvtsi2sd xmm0, rax"));
        assert!(asm.contains("    movsd [rbp-8], xmm0"));
        assert!(asm.contains("    lea rdi, [rel fmtf]"));
        assert!(asm.contains("    mov rax, 1\n    call printf"));
    }

    #[test]
    fn test_bool_loads_zero_extended() {
        let asm = compile("let b = true let c = b print(c)");
        assert!(asm.contains("    xor rax, rax\n    mov al, byte [rbp-8]"));
    }

    #[test]
    fn test_struct_fields_at_eight_byte_offsets() {
        let asm = compile("struct P x: int y: int end let p = P(3, 4) print(p.x + p.y)");
        // constructor stores into base+0 and base+8
        assert!(asm.contains("    mov [rbp-8], rax"));
        assert!(asm.contains("    mov [rbp-16], rax"));
        // field reads from the same offsets
        assert!(asm.contains("    mov rax, [rbp-8]"));
        assert!(asm.contains("    mov rax, [rbp-16]"));
    }

    #[test]
    fn test_field_assign_stores_to_field_slot() {
        let asm = compile("struct P x: int y: int end let p = P(1, 2) p.y = 9");
        assert!(asm.contains("    mov rax, 9\n    mov [rbp-16], rax"));
    }

    #[test]
    fn test_array_indexing_from_element_zero() {
        let asm = compile("let n: int[3] = {10, 20, 30} let i = 1 print(n[i])");
        // initializer stores to base, base+8, base+16
        assert!(asm.contains("    mov qword [rbp-8], rax"));
        assert!(asm.contains("    mov qword [rbp-16], rax"));
        assert!(asm.contains("    mov qword [rbp-24], rax"));
        // indexed read computes rbp - (base + i*8)
        assert!(asm.contains("    imul rax, 8"));
        assert!(asm.contains("    neg rax"));
        assert!(asm.contains("    add rax, qword -8"));
        assert!(asm.contains("    add rax, rbp"));
    }

    #[test]
    fn test_array_assign_stores_through_computed_address() {
        let asm = compile("let n: int[2] let i = 0 n[i] = 5");
        assert!(asm.contains("    pop rbx"));
        assert!(asm.contains("    mov [rax], rbx"));
    }

    #[test]
    fn test_if_elif_else_branch_labels() {
        let asm = compile(
            "let x = 2 if x == 1 print(1) elif x == 2 print(2) else print(3) end",
        );
        assert!(asm.contains("    test rax, rax"));
        // three bodies all jump to the shared end label
        let jmp_count = asm.matches("    jmp .L0").count();
        assert_eq!(jmp_count, 2); // if body and elif body; else falls through
    }

    #[test]
    fn test_while_checks_at_top() {
        let asm = compile("let x = 0 while x < 3 x = x + 1 end");
        assert!(asm.contains(".L0:"));
        assert!(asm.contains("    jz .L1"));
        assert!(asm.contains("    jmp .L0"));
    }

    #[test]
    fn test_do_while_body_first() {
        let asm = compile("let x = 0 do x = x + 1 while x < 3");
        let body = asm.find(".L0:").unwrap();
        let backedge = asm.find("    jnz .L0").unwrap();
        assert!(body < backedge);
    }

    #[test]
    fn test_for_hoists_limit_and_step() {
        let asm = compile("for i = 0 to 4 print(i) end");
        assert!(asm.contains("    mov r14, rax"));
        assert!(asm.contains("    mov r15, rax"));
        // inclusive bound and register-based check
        assert!(asm.contains("    cmp r12, r14"));
        assert!(asm.contains("    jle .L"));
        // counter mirrored to its slot at the increment
        assert!(asm.contains("    add r12, r15"));
        assert!(asm.contains("    mov [rbp-8], r12"));
    }

    #[test]
    fn test_for_without_loop_registers_goes_through_memory() {
        let asm = compile_with(
            "for i = 0 to 4 print(i) end",
            CompilerConfig::without_optimizations(),
        );
        assert!(!asm.contains("r12"));
        assert!(asm.contains("    add rax, r15"));
        assert!(asm.contains("    cmp rax, r14"));
    }

    #[test]
    fn test_nested_for_saves_hoisted_registers() {
        let asm = compile("for i = 0 to 2 for j = 0 to 2 print(j) end end");
        assert!(asm.contains("    push r14\n    push r15"));
        assert!(asm.contains("    pop r15\n    pop r14"));
    }

    #[test]
    fn test_break_and_continue_target_loop_labels() {
        // for labels: body .L0, increment .L1, check .L2, end .L3
        let asm = compile("for i = 0 to 9 if i == 5 break end continue end");
        assert!(asm.contains("    jmp .L3")); // break -> loop end
        assert!(asm.contains("    jmp .L1")); // continue -> increment
        // while labels: check .L0, end .L1
        let asm = compile("while true break end");
        assert!(asm.contains("    jmp .L1"));
    }

    #[test]
    fn test_match_compares_subject_in_r13() {
        let asm = compile(
            "match 2 1 -> print(\"a\") 2 -> print(\"b\") else -> print(\"c\") end",
        );
        assert!(asm.contains("    mov r13, rax"));
        assert!(asm.contains("    cmp r13, rax"));
        let je_count = asm.matches("    je .L").count();
        assert_eq!(je_count, 2); // one per value case; else is the fallthrough
    }

    #[test]
    fn test_match_without_else_falls_to_end() {
        let asm = compile("match 5 1 -> print(1) end");
        assert!(asm.contains("    jmp .L0")); // unmatched goes to end
    }

    #[test]
    fn test_cse_reuses_scratch_register() {
        let asm = compile("let a = 3 let b = 4 let c = a * b let d = a * b print(d)");
        // first computation lands in the scratch, second reloads it
        assert!(asm.contains("    mov r11, rax"));
        assert!(asm.contains("    mov rax, r11"));
        assert_eq!(asm.matches("    imul rax, rbx").count(), 1);
    }

    #[test]
    fn test_cse_invalidated_by_operand_store() {
        let asm = compile("let a = 3 let b = 4 let c = a * b a = 5 let d = a * b print(d)");
        assert_eq!(asm.matches("    imul rax, rbx").count(), 2);
    }

    #[test]
    fn test_cse_disabled_recomputes() {
        let asm = compile_with(
            "let a = 3 let b = 4 let c = a * b let d = a * b print(d)",
            CompilerConfig::without_optimizations(),
        );
        assert!(!asm.contains("r11"));
        assert_eq!(asm.matches("    imul rax, rbx").count(), 2);
    }

    #[test]
    fn test_licm_hoists_invariant_let() {
        let asm = compile("let k = 2 for i = 0 to 9 let t = k * 3 print(i) end");
        // the invariant store happens before the loop entry jump
        let store = asm.find("    imul rax, rbx").unwrap();
        let enter = asm.find("    jmp .L").unwrap();
        assert!(store < enter);
    }

    #[test]
    fn test_licm_keeps_induction_dependent_let() {
        let asm = compile_with(
            "for i = 0 to 9 let t = i * 3 print(t) end",
            CompilerConfig {
                optimizations: crate::config::Optimizations {
                    tiling: false,
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        // the dependent let stays inside: store comes after loop entry
        let enter = asm.find("    jmp .L").unwrap();
        let mul = asm.find("    imul rax, rbx").unwrap();
        assert!(mul > enter);
    }

    #[test]
    fn test_licm_disabled_keeps_let_inside_loop() {
        let asm = compile_with(
            "let k = 2 for i = 0 to 9 let t = k * 3 print(i) end",
            CompilerConfig::without_optimizations(),
        );
        let enter = asm.find("    jmp .L").unwrap();
        let mul = asm.find("    imul rax, rbx").unwrap();
        assert!(mul > enter);
    }

    #[test]
    fn test_tiling_produces_two_level_nest() {
        let asm = compile("let n: int[200] for i = 0 to 200 n[i] = i end");
        // outer increment is the tile size
        assert!(asm.contains("    add rax, 64"));
        // inner bound is min(origin+64, limit)
        assert!(asm.contains("    add r14, 64"));
        assert!(asm.contains("    cmovg r14, rax"));
        assert!(asm.contains("    jl .L"));
    }

    #[test]
    fn test_no_tiling_below_threshold() {
        let asm = compile("let n: int[100] for i = 0 to 100 n[i] = i end");
        assert!(!asm.contains("cmovg"));
        assert!(asm.contains("    jle .L"));
    }

    #[test]
    fn test_no_tiling_without_array_indexing() {
        let asm = compile("for i = 0 to 500 print(i) end");
        assert!(!asm.contains("cmovg"));
    }

    #[test]
    fn test_no_tiling_when_disabled() {
        let asm = compile_with(
            "let n: int[200] for i = 0 to 200 n[i] = i end",
            CompilerConfig::without_optimizations(),
        );
        assert!(!asm.contains("cmovg"));
    }

    #[test]
    fn test_for_where_filter_skips_to_increment() {
        let asm = compile("for i = 0 to 9 where i > 4 print(i) end");
        // filter test jumps to the increment label on false
        assert!(asm.contains("    setg al"));
        assert!(asm.contains("    jz .L1"));
    }

    #[test]
    fn test_function_emitted_before_main_with_global() {
        let asm = compile("print(add(1, 2)) fn add(a: int, b: int) -> int return a + b end");
        let fn_pos = asm.find("\nglobal add\nadd:\n").unwrap();
        let main_pos = asm.find("\nmain:\n").unwrap();
        assert!(fn_pos < main_pos);
        // parameters spilled from their argument registers
        assert!(asm.contains("    mov [rbp-8], rdi"));
        assert!(asm.contains("    mov [rbp-16], rsi"));
    }

    #[test]
    fn test_call_pops_arguments_in_reverse() {
        let asm = compile("fn f(a: int, b: int) -> int return a end f(1, 2)");
        assert!(asm.contains("    pop rsi\n    pop rdi\n    call f"));
    }

    #[test]
    fn test_tuple_return_uses_rax_then_rdx() {
        let asm = compile(
            "fn swap(a: int, b: int) -> int, int return b, a end let x, y = swap(1, 2) print(x)",
        );
        assert!(asm.contains("    mov rdx, rax"));
        assert!(asm.contains("    pop rax"));
        // destructure stores rax then rdx
        assert!(asm.contains("    mov [rbp-8], rax\n"));
        assert!(asm.contains("    mov [rbp-16], rdx"));
    }

    #[test]
    fn test_deref_of_addr_reads_back() {
        let asm = compile("let v = 7 let p = addr(v) print(deref(p))");
        assert!(asm.contains("    lea rax, [rbp-8]"));
        assert!(asm.contains("    mov rax, [rbp-16]\n    mov rax, [rax]"));
    }

    #[test]
    fn test_deref_assign_writes_through_pointer() {
        let asm = compile("let v = 7 let p = addr(v) deref(p) = 9");
        assert!(asm.contains("    mov rbx, [rbp-16]\n    mov [rbx], rax"));
    }

    #[test]
    fn test_alloc_emits_mmap_and_epilogue_munmap() {
        let asm = compile("let p = alloc(4096) print(1)");
        assert!(asm.contains("    mov rax, 9\n"));
        assert!(asm.contains("    mov r10, 34"));
        assert!(asm.contains("    mov r8, -1"));
        // owned pointer gets the implicit epilogue free
        assert!(asm.contains("    mov rsi, 1024\n    mov rax, 11\n    syscall"));
    }

    #[test]
    fn test_explicit_free_emits_munmap() {
        let asm = compile("let p = alloc(64) free(p, 64)");
        assert!(asm.contains("    mov rax, 11"));
    }

    #[test]
    fn test_file_syscalls() {
        let asm = compile(
            "let fd = open(\"f.txt\", 0) let buf = alloc(64) read(fd, buf, 64) write(1, buf, 64) close(fd)",
        );
        assert!(asm.contains("    mov rax, 2\n    xor rdx, rdx\n    syscall")); // open
        assert!(asm.contains("    mov rax, 0\n    syscall")); // read
        assert!(asm.contains("    mov rax, 1\n    syscall")); // write
        assert!(asm.contains("    mov rax, 3\n    syscall")); // close
    }

    #[test]
    fn test_strlen_calls_libc() {
        let asm = compile("let s = \"hello\" print(strlen(s))");
        assert!(asm.contains("    mov rdi, rax\n    call strlen"));
    }

    #[test]
    fn test_and_or_short_circuit() {
        let asm = compile("let a = 1 let b = 0 if a > 0 and b > 0 print(1) end");
        // left false path skips the right operand entirely
        assert!(asm.contains("    jz .L"));
        assert!(asm.contains("    mov rax, 1\n    jmp .L"));
        let asm = compile("let a = 1 if a > 0 or a < 5 print(1) end");
        assert!(asm.contains("    jnz .L"));
    }

    #[test]
    fn test_unary_negate() {
        let asm = compile("let y = 3 let x = -(y) print(x)");
        assert!(asm.contains("    neg rax"));
    }

    #[test]
    fn test_shadowing_uses_latest_binding() {
        let asm = compile("let x = 1 let x = 2 print(x)");
        // the print loads from the second slot
        assert!(asm.contains("    mov rax, [rbp-16]"));
    }

    #[test]
    fn test_undefined_variable_is_fatal() {
        let err = compile_err("print(ghost)");
        assert!(err.contains("undefined variable 'ghost'"));
    }

    #[test]
    fn test_missing_field_is_fatal() {
        let err = compile_err("struct P x: int end let p = P(1) print(p.z)");
        assert!(err.contains("has no field 'z'"));
    }

    #[test]
    fn test_non_struct_field_access_is_fatal() {
        let err = compile_err("let x = 1 print(x.y)");
        assert!(err.contains("is not a struct"));
    }

    #[test]
    fn test_break_outside_loop_is_fatal() {
        let err = compile_err("break");
        assert!(err.contains("'break' outside of a loop"));
    }
}
