//! FasterBASIC compiler library.
//!
//! Compilation from `.bas` source to ARM64: lexing, parsing, semantic
//! analysis, IR lowering, NEON vectorisation, and code generation, with
//! an AOT path (assembly + system `cc` link against `libfb_runtime.a`)
//! and a JIT path (in-process machine code).
//!
//! ```rust,ignore
//! use fbc::{CompilerConfig, compile_source};
//!
//! let config = CompilerConfig::default();
//! let compiled = compile_source("PRINT \"hi\"", &config)?;
//! println!("{}", compiled.asm.to_assembly()?);
//! ```

pub mod ast;
pub mod codegen;
pub mod config;
pub mod error;
pub mod ir;
pub mod jit;
pub mod lexer;
pub mod lower;
pub mod parser;
pub mod semantic;
pub mod types;
pub mod vectorize;

pub use codegen::{AsmModule, CodeGenError};
pub use config::{CompilerConfig, NeonConfig};
pub use error::CompileError;
pub use lexer::tokenize;
pub use parser::{ParseError, Parser, parse_source};
pub use semantic::{AnalyzedProgram, Analyzer, SemanticError, analyze_source};
pub use types::Type;

use std::path::{Path, PathBuf};
use std::process::Command;

pub struct CompiledProgram {
    pub ir: ir::Module,
    pub asm: AsmModule,
}

/// Run the whole pipeline on a source string.
pub fn compile_source(
    source: &str,
    config: &CompilerConfig,
) -> Result<CompiledProgram, CompileError> {
    let analyzed = semantic::analyze_source(source)?;
    tracing::debug!(
        procs = analyzed.program.procs.len(),
        udts = analyzed.udts.len(),
        "semantic analysis complete"
    );
    let mut module = lower::lower_program(&analyzed)?;
    vectorize::vectorize(&mut module, &config.neon);
    let asm = codegen::generate(&module)?;
    tracing::debug!(funcs = asm.funcs.len(), "code generation complete");
    Ok(CompiledProgram { ir: module, asm })
}

/// `fbc -i`: the textual IR after vectorisation.
pub fn emit_ir(source: &str, config: &CompilerConfig) -> Result<String, CompileError> {
    let analyzed = semantic::analyze_source(source)?;
    let mut module = lower::lower_program(&analyzed)?;
    vectorize::vectorize(&mut module, &config.neon);
    Ok(module.print())
}

/// `fbc -c`: the assembly text.
pub fn compile_to_assembly(source: &str, config: &CompilerConfig) -> Result<String, CompileError> {
    let compiled = compile_source(source, config)?;
    Ok(compiled.asm.to_assembly()?)
}

/// `fbc --jit`: compile and execute in-process; returns the program's
/// exit status.
pub fn jit_run(source: &str, config: &CompilerConfig) -> Result<i32, CompileError> {
    let compiled = compile_source(source, config)?;
    Ok(jit::run(&compiled.asm)?)
}

/// Locate `libfb_runtime.a` for the AOT link: the configured directory
/// first, then the conventional build locations.
fn find_runtime_lib(config: &CompilerConfig) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(dir) = &config.runtime_dir {
        candidates.push(dir.clone());
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            candidates.push(dir.to_path_buf());
        }
    }
    candidates.push(PathBuf::from("target/release"));
    candidates.push(PathBuf::from("target/debug"));
    candidates
        .into_iter()
        .find(|dir| dir.join("libfb_runtime.a").is_file())
}

/// Compile `source_path` to an executable at `output`.
pub fn build_executable(
    source_path: &Path,
    output: &Path,
    config: &CompilerConfig,
) -> Result<(), CompileError> {
    let source = std::fs::read_to_string(source_path)?;
    let compiled = compile_source(&source, config)?;
    let asm_text = compiled.asm.to_assembly().map_err(CompileError::CodeGen)?;

    let asm_path = output.with_extension("s");
    std::fs::write(&asm_path, &asm_text)?;

    let runtime_dir = find_runtime_lib(config).ok_or_else(|| {
        CompileError::Link(
            "cannot find libfb_runtime.a; build fb-runtime or pass --runtime-dir".to_string(),
        )
    })?;

    // The system C compiler assembles and links; the runtime staticlib
    // carries its own libc/libm/libdl needs.
    let status = Command::new("cc")
        .arg(&asm_path)
        .arg("-o")
        .arg(output)
        .arg(format!("-L{}", runtime_dir.display()))
        .arg("-lfb_runtime")
        .arg("-lm")
        .arg("-lpthread")
        .arg("-ldl")
        .output()
        .map_err(|e| CompileError::Link(format!("failed to run cc: {}", e)))?;
    if !status.status.success() {
        return Err(CompileError::Link(format!(
            "cc failed with {}:\n{}",
            status.status,
            String::from_utf8_lossy(&status.stderr)
        )));
    }
    tracing::info!(output = %output.display(), "linked executable");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_end_to_end_artifacts() {
        let config = CompilerConfig::default();
        let source = "DIM a(10) AS SINGLE\nDIM b(10) AS SINGLE\nDIM c(10) AS SINGLE\n\
                      FOR i% = 0 TO 10\na(i%) = i% * 1.5\nb(i%) = i% * 0.5\nNEXT\n\
                      c() = a() + b()\nPRINT SUM(c())";
        let compiled = compile_source(source, &config).expect("compiles");
        assert!(compiled.asm.funcs.iter().any(|f| f.name == "main"));
        let ir_text = emit_ir(source, &config).expect("ir");
        assert!(ir_text.contains("arrayop Add Single simd"));
        let asm_text = compile_to_assembly(source, &config).expect("asm");
        assert!(asm_text.contains("fadd v28.4s, v28.4s, v29.4s"));
    }

    #[test]
    fn errors_carry_stage_identity() {
        let config = CompilerConfig::default();
        let lex = compile_source("PRINT \"oops", &config);
        assert!(matches!(lex, Err(CompileError::Lex(_))));
        let parse = compile_source("IF x THEN\nPRINT 1", &config);
        assert!(matches!(parse, Err(CompileError::Parse(_))));
        let sem = compile_source("x = NOSUCH(1)", &config);
        assert!(matches!(sem, Err(CompileError::Semantic(_))));
    }

    #[test]
    fn ackermann_compiles_with_recursion() {
        let config = CompilerConfig::default();
        let source = "FUNCTION Ack%(m%, n%)\n\
                      IF m% = 0 THEN RETURN n% + 1\n\
                      IF n% = 0 THEN RETURN Ack%(m% - 1, 1)\n\
                      RETURN Ack%(m% - 1, Ack%(m%, n% - 1))\n\
                      END FUNCTION\n\
                      PRINT Ack%(3, 4)";
        let compiled = compile_source(source, &config).expect("compiles");
        assert_eq!(compiled.asm.funcs.len(), 2);
        let asm = compiled.asm.to_assembly().unwrap();
        // Recursive self-calls go through the mangled symbol.
        assert!(asm.contains("\tbl fb_ACK_i"));
    }
}
