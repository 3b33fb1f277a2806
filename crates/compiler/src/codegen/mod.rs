//! ARM64 code generation.
//!
//! The register allocator and emitter turn the typed IR into structured
//! ARM64 instructions once; two backends consume them:
//! - the GNU-assembly printer (`asm.rs`) for the AOT path, linked against
//!   `libfb_runtime.a`;
//! - the binary encoder (`encode.rs`) for the JIT path, resolved against
//!   the in-process runtime and `dlsym`.
//!
//! # Module structure
//!
//! - `insts.rs`: the instruction set, register conventions, printer
//! - `regalloc.rs`: liveness for the forward linear scan
//! - `state.rs`: per-function emitter state, frame layout, literal pool
//! - `emit.rs`: IR → instruction selection
//! - `neon.rs`: whole-array / reduction / whole-UDT expansion
//! - `asm.rs`: module-level assembly output
//! - `encode.rs`: machine-code encoding for the JIT
//! - `runtime.rs`: the runtime ABI symbol table
//! - `error.rs`: the ICE-class error type

pub mod asm;
mod emit;
pub mod encode;
mod error;
pub mod insts;
mod neon;
mod regalloc;
pub mod runtime;
mod state;

pub use asm::{AsmFunction, AsmModule, generate};
pub use error::CodeGenError;
pub use runtime::{LIBC_SYMBOLS, runtime_symbols};
