//! End-to-end pipeline checks over the public API: source in, IR and
//! assembly out, with the documented invariants asserted on the
//! artifacts.

use fbc::ir::{Inst, Term};
use fbc::{CompilerConfig, NeonConfig, compile_source, compile_to_assembly, emit_ir};

fn default_config() -> CompilerConfig {
    CompilerConfig::default()
}

#[test]
fn hello_world() {
    let asm = compile_to_assembly("PRINT \"Hello, World!\" : END", &default_config()).unwrap();
    assert!(asm.contains(".string \"Hello, World!\""));
    assert!(asm.contains("bl basic_print_string"));
    assert!(asm.contains("bl basic_print_newline"));
    assert!(asm.contains("bl basic_runtime_init"));
    assert!(asm.contains("bl basic_runtime_shutdown"));
}

#[test]
fn perfect_square_sieve_compiles_with_bounds_checks() {
    let source = "DIM a%(100)\nFOR p = 1 TO 100\ni = p\nWHILE i <= 100\n\
                  a%(i) = 1 - a%(i)\ni = i + p\nWEND\nNEXT\n\
                  FOR i = 1 TO 100\nIF a%(i) THEN PRINT i;\nNEXT";
    let asm = compile_to_assembly(source, &default_config()).unwrap();
    assert!(asm.contains("bl array_descriptor_alloc"));
    assert!(asm.contains("bl array_bounds_fail"));
    assert!(asm.contains("bl basic_print_int"));
    // Trailing `;` on the PRINT suppresses one newline path, but the
    // unconditional FOR body still loops.
    let ir = emit_ir(source, &default_config()).unwrap();
    assert!(ir.contains("@for_head"));
    assert!(ir.contains("@while_head"));
}

#[test]
fn whole_array_add_matches_scenario_three() {
    let source = "DIM a(10) AS SINGLE\nDIM b(10) AS SINGLE\nDIM c(10) AS SINGLE\n\
                  FOR i% = 0 TO 10\na(i%) = i% * 1.5\nb(i%) = i% * 0.5\nNEXT\n\
                  c() = a() + b()";
    let with_neon = compile_to_assembly(source, &default_config()).unwrap();
    assert!(with_neon.contains("fadd v28.4s, v28.4s, v29.4s"));
    // Scalar remainder exists alongside the vector loop.
    assert!(with_neon.contains("fadd s0, s0, s1"));

    let mut config = default_config();
    config.neon = NeonConfig { loops: false, ..NeonConfig::default() };
    let scalar = compile_to_assembly(source, &config).unwrap();
    assert!(!scalar.contains("fadd v28.4s"));
    assert!(scalar.contains("fadd s0, s0, s1"));
}

#[test]
fn try_catch_scenario_four() {
    let source = "TRY\nTHROW 42, 100\nCATCH 42\nPRINT \"caught\", ERR(), ERL()\nEND TRY";
    let asm = compile_to_assembly(source, &default_config()).unwrap();
    assert!(asm.contains("bl exception_frame_push"));
    assert!(asm.contains("bl setjmp"));
    assert!(asm.contains("bl exception_frame_pop"));
    assert!(asm.contains("bl basic_throw"));
    assert!(asm.contains("bl basic_err"));
    assert!(asm.contains("bl basic_erl"));
}

#[test]
fn hashmap_scenario_five() {
    let source = "DIM m AS HASHMAP\nm(\"Alice\") = \"A\"\nm(\"Bob\") = \"B\"\nPRINT m(\"Bob\")";
    let asm = compile_to_assembly(source, &default_config()).unwrap();
    assert!(asm.contains("bl hashmap_new"));
    assert!(asm.contains("bl hashmap_put"));
    assert!(asm.contains("bl hashmap_get"));
}

#[test]
fn gosub_in_if_resumes_after_the_gosub() {
    // The regression the auxiliary return stack exists for: RETURN must
    // resume at the statement after the GOSUB, not at the IF's merge
    // point.
    let source = "x% = 1\nresult% = 0\nIF x% = 1 THEN\nGOSUB Sub3\nresult% = result% + 40\n\
                  END IF\nPRINT result%\nEND\nSub3:\nresult% = 2\nRETURN";
    let compiled = compile_source(source, &default_config()).unwrap();
    let main = &compiled.ir.funcs[0];
    let mut checked = false;
    for block in &main.blocks {
        if let Term::Gosub { resume, .. } = &block.term {
            let resume_block = &main.blocks[resume.0];
            // The resume block holds the `result% = result% + 40`
            // statement: an add feeding a store, before any merge jump.
            let has_add = resume_block.insts.iter().any(|inst| {
                matches!(inst, Inst::Bin { op: fbc::ir::BinOp::Add, .. })
            });
            let has_store = resume_block
                .insts
                .iter()
                .any(|inst| matches!(inst, Inst::Store { .. }));
            assert!(
                has_add && has_store,
                "resume block must contain the statement after GOSUB"
            );
            checked = true;
        }
    }
    assert!(checked, "program must lower a GOSUB terminator");
    // And RETURN pops through the runtime stack.
    let asm = compiled.asm.to_assembly().unwrap();
    assert!(asm.contains("bl gosub_push"));
    assert!(asm.contains("bl gosub_pop"));
}

#[test]
fn select_case_shapes() {
    let source = "n% = 15\nSELECT CASE n%\nCASE 10 TO 20\nPRINT \"mid\"\n\
                  CASE IS > 50\nPRINT \"big\"\nCASE ELSE\nPRINT \"other\"\nEND SELECT";
    let ir = emit_ir(source, &default_config()).unwrap();
    // Range and relation arms force the compare-and-branch chain.
    assert!(ir.contains("@case_arm"));
    assert!(!ir.contains("switch"));

    let dense = "n% = 2\nSELECT CASE n%\nCASE 1\nPRINT 1\nCASE 2\nPRINT 2\nCASE 3\nPRINT 3\n\
                 END SELECT";
    let dense_ir = emit_ir(dense, &default_config()).unwrap();
    assert!(dense_ir.contains("switch"));
}

#[test]
fn data_read_restore_lowering() {
    let source = "DATA 10, 2.5, \"three\"\nREAD a%, b#, c$\nRESTORE\nREAD d%";
    let asm = compile_to_assembly(source, &default_config()).unwrap();
    assert!(asm.contains("bl data_register"));
    assert!(asm.contains("bl data_read_int"));
    assert!(asm.contains("bl data_read_double"));
    assert!(asm.contains("bl data_read_string"));
    assert!(asm.contains("bl data_restore"));
}

#[test]
fn channel_io_lowering() {
    let source = "OPEN \"out.txt\" FOR OUTPUT AS #1\nPRINT #1, \"line\"\nCLOSE #1";
    let asm = compile_to_assembly(source, &default_config()).unwrap();
    assert!(asm.contains("bl basic_open"));
    assert!(asm.contains("bl basic_print_channel_string"));
    assert!(asm.contains("bl basic_print_channel_newline"));
    assert!(asm.contains("bl basic_close"));
}

#[test]
fn string_operations_route_through_the_runtime() {
    let source = "s$ = \"Faster\" + \"BASIC\"\nt$ = s$(7 TO 11)\n\
                  IF s$ = t$ THEN PRINT LEN(s$)";
    let asm = compile_to_assembly(source, &default_config()).unwrap();
    assert!(asm.contains("bl string_concat"));
    assert!(asm.contains("bl string_slice"));
    assert!(asm.contains("bl string_compare"));
    assert!(asm.contains("bl string_length"));
}

#[test]
fn udt_simd_arithmetic() {
    let source = "TYPE Vec4\nx AS SINGLE\ny AS SINGLE\nz AS SINGLE\nw AS SINGLE\nEND TYPE\n\
                  DIM a AS Vec4\nDIM b AS Vec4\nDIM c AS Vec4\n\
                  a.x = 1.0\nb.x = 2.0\nc = a + b";
    let asm = compile_to_assembly(source, &default_config()).unwrap();
    assert!(asm.contains("fadd v28.4s, v28.4s, v29.4s"));

    let mut config = default_config();
    config.neon = NeonConfig { arithmetic: false, ..NeonConfig::default() };
    let scalar = compile_to_assembly(source, &config).unwrap();
    assert!(!scalar.contains("fadd v28.4s"));
    assert!(scalar.contains("fadd s0, s0, s1"));
}

#[test]
fn reductions_cover_the_forms() {
    let source = "DIM a(20) AS DOUBLE\nDIM b(20) AS DOUBLE\n\
                  PRINT SUM(a()); MAX(a()); MIN(a()); AVG(a()); DOT(a(), b())";
    let ir = emit_ir(source, &default_config()).unwrap();
    for kind in ["Sum", "Max", "Min", "Avg", "Dot"] {
        assert!(ir.contains(&format!("reduce {}", kind)), "missing {}", kind);
    }
    let asm = compile_to_assembly(source, &default_config()).unwrap();
    assert!(asm.contains("faddp"));
    assert!(asm.contains("fmaxp"));
    assert!(asm.contains("fminp"));
}
