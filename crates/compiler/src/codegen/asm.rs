//! Module-level assembly: the structured instruction streams plus rodata
//! strings, zero-initialised globals, and per-function literal pools,
//! rendered as one GNU assembly file for the AOT path.

use super::emit::emit_function;
use super::insts::{AInst, FSize};
use crate::codegen::CodeGenError;
use crate::ir::{Global, Module};
use std::fmt::Write as _;

pub struct AsmFunction {
    pub name: String,
    pub insts: Vec<AInst>,
    /// FP literal pool: raw bits and width, function-local indices.
    pub pool: Vec<(u64, FSize)>,
}

pub struct AsmModule {
    pub funcs: Vec<AsmFunction>,
    pub strings: Vec<String>,
    pub globals: Vec<Global>,
}

/// Run instruction selection over every function.
pub fn generate(module: &Module) -> Result<AsmModule, CodeGenError> {
    let mut funcs = Vec::with_capacity(module.funcs.len());
    let mut pool_base = 0usize;
    for func in &module.funcs {
        let (mut insts, pool) = emit_function(module, func)?;
        // Literal-pool labels are global in the assembly file; offset the
        // function-local indices so they never collide.
        for inst in &mut insts {
            if let AInst::LdrLit { pool: index, .. } = inst {
                *index += pool_base;
            }
        }
        pool_base += pool.len();
        funcs.push(AsmFunction { name: func.name.clone(), insts, pool });
    }
    Ok(AsmModule {
        funcs,
        strings: module.strings.clone(),
        globals: module.globals.clone(),
    })
}

impl AsmModule {
    /// Render the whole module as a `.s` file.
    pub fn to_assembly(&self) -> Result<String, CodeGenError> {
        let mut out = String::new();
        writeln!(out, "\t.arch armv8-a")?;
        writeln!(out, "\t.text")?;
        let mut pool_index = 0usize;
        for func in &self.funcs {
            writeln!(out, "\n\t.globl {}", func.name)?;
            writeln!(out, "\t.p2align 2")?;
            writeln!(out, "\t.type {}, %function", func.name)?;
            for inst in &func.insts {
                writeln!(out, "{}", inst)?;
            }
            if !func.pool.is_empty() {
                writeln!(out, "\t.p2align 3")?;
                for (bits, size) in &func.pool {
                    writeln!(out, ".LCP{}:", pool_index)?;
                    match size {
                        FSize::S => writeln!(out, "\t.word 0x{:08x}", *bits as u32)?,
                        _ => writeln!(out, "\t.quad 0x{:016x}", bits)?,
                    }
                    pool_index += 1;
                }
            }
        }
        if !self.strings.is_empty() {
            writeln!(out, "\n\t.section .rodata")?;
            for (i, text) in self.strings.iter().enumerate() {
                writeln!(out, ".Lstr{}:", i)?;
                write!(out, "\t.string \"")?;
                for byte in text.bytes() {
                    match byte {
                        b'"' => out.push_str("\\\""),
                        b'\\' => out.push_str("\\\\"),
                        b'\n' => out.push_str("\\n"),
                        b'\t' => out.push_str("\\t"),
                        0x20..=0x7e => out.push(byte as char),
                        other => {
                            write!(out, "\\{:03o}", other)?;
                        }
                    }
                }
                writeln!(out, "\"")?;
            }
        }
        if !self.globals.is_empty() {
            writeln!(out, "\n\t.bss")?;
            for global in &self.globals {
                writeln!(out, "\t.p2align 3")?;
                writeln!(out, "{}:", global.symbol)?;
                writeln!(out, "\t.skip {}", global.size.max(8))?;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NeonConfig;
    use crate::lower::lower_program;
    use crate::semantic::analyze_source;

    fn assemble(source: &str) -> String {
        let analyzed = analyze_source(source).expect("analysis");
        let mut module = lower_program(&analyzed).expect("lowering");
        crate::vectorize::vectorize(&mut module, &NeonConfig::default());
        generate(&module).expect("codegen").to_assembly().expect("printing")
    }

    fn assemble_with(source: &str, config: &NeonConfig) -> String {
        let analyzed = analyze_source(source).expect("analysis");
        let mut module = lower_program(&analyzed).expect("lowering");
        crate::vectorize::vectorize(&mut module, config);
        generate(&module).expect("codegen").to_assembly().expect("printing")
    }

    #[test]
    fn hello_world_assembly_shape() {
        let asm = assemble("PRINT \"Hello, World!\" : END");
        assert!(asm.contains("\t.globl main"));
        assert!(asm.contains("\tbti c"));
        assert!(asm.contains("stp x29, x30, [sp, #-"));
        assert!(asm.contains("\tbl basic_runtime_init"));
        assert!(asm.contains("\tbl string_new_ascii"));
        assert!(asm.contains("\tbl basic_print_string"));
        assert!(asm.contains(".Lstr0:"));
        assert!(asm.contains(".string \"Hello, World!\""));
        assert!(asm.contains("\tbl basic_runtime_shutdown"));
        assert!(asm.contains("\tret"));
    }

    #[test]
    fn setjmp_is_called_directly() {
        let asm = assemble("TRY\nTHROW 42, 100\nCATCH 42\nPRINT ERR()\nEND TRY");
        assert!(asm.contains("\tbl setjmp"));
        // Never through any wrapper symbol.
        assert!(!asm.contains("bl basic_exception_setup"));
        assert!(asm.contains("\tbl exception_frame_push"));
        assert!(asm.contains("\tbl basic_throw"));
    }

    #[test]
    fn fma_emits_fmla_and_kill_switch_removes_it() {
        let source = "DIM a(100) AS SINGLE\nDIM b(100) AS SINGLE\nDIM c(100) AS SINGLE\n\
                      DIM d(100) AS SINGLE\nd() = a() + b() * c()";
        let on = assemble(source);
        assert!(on.contains("fmla v28.4s, v29.4s, v30.4s"));
        assert!(on.contains("ldr q28, [x1], #16"));
        // The scalar remainder is fused too.
        assert!(on.contains("fmadd s0, s1, s2, s0"));
        let off = assemble_with(
            source,
            &NeonConfig { loops: false, ..NeonConfig::default() },
        );
        assert!(!off.contains("fmla"));
        assert!(off.contains("fmadd s0, s1, s2, s0"));
    }

    #[test]
    fn integer_divide_by_power_of_two_uses_shift() {
        let asm = assemble("x% = 100\ny% = x% \\ 8");
        assert!(asm.contains("\tasr "));
        // And a general divisor uses sdiv.
        let general = assemble("x% = 100\nz% = 3\ny% = x% \\ z%");
        assert!(general.contains("\tsdiv "));
    }

    #[test]
    fn err_erl_return_in_w0() {
        let asm = assemble("TRY\nTHROW 1\nCATCH\ne% = ERR()\nEND TRY");
        assert!(asm.contains("\tbl basic_err"));
        // The 32-bit result moves out of w0.
        assert!(asm.contains(", w0"));
    }

    #[test]
    fn gosub_pushes_resume_address() {
        let asm = assemble("GOSUB Work\nPRINT 1\nEND\nWork:\nRETURN");
        assert!(asm.contains("\tadr x0, .Lmain_gosub_resume"));
        assert!(asm.contains("\tbl gosub_push"));
        assert!(asm.contains("\tbl gosub_pop"));
        assert!(asm.contains("\tbr x0"));
    }

    #[test]
    fn reduction_folds_horizontally() {
        let asm = assemble("DIM a(50) AS SINGLE\nx! = SUM(a())");
        assert!(asm.contains("faddp"));
        let int_sum = assemble("DIM a%(50)\nx& = SUM(a())");
        assert!(int_sum.contains("sadalp"));
        assert!(int_sum.contains("addp d28, v28.2d"));
    }

    #[test]
    fn udt_copy_is_one_q_move() {
        let source = "TYPE Vec4\nx AS SINGLE\ny AS SINGLE\nz AS SINGLE\nw AS SINGLE\nEND TYPE\n\
                      DIM a AS Vec4\nDIM b AS Vec4\nb = a";
        let asm = assemble(source);
        assert!(asm.contains("ldr q28"));
        assert!(asm.contains("str q28"));
    }

    #[test]
    fn select_dense_cases_build_a_jump_table() {
        let source = "n% = 3\nSELECT CASE n%\nCASE 1\nPRINT 1\nCASE 2\nPRINT 2\nCASE 3\nPRINT 3\n\
                      CASE 4\nPRINT 4\nCASE ELSE\nPRINT 0\nEND SELECT";
        let asm = assemble(source);
        assert!(asm.contains("jumptable"));
        assert!(asm.contains("\tbr x17"));
    }

    #[test]
    fn float_literals_land_in_the_pool() {
        let asm = assemble("x# = 2.5\nPRINT x#");
        assert!(asm.contains("ldr d"));
        assert!(asm.contains(".LCP0:"));
        assert!(asm.contains(".quad 0x4004000000000000"));
    }
}
