//! JIT execution.
//!
//! The encoded image is written into an anonymous RW mapping, `bl`
//! targets are resolved against the in-process runtime table (with a
//! `dlsym` fallback for libc/libm names), the mapping is flipped to RX,
//! and the entry point is called on the compiler's thread. Globals live
//! in a separate heap block that stays writable.

use crate::codegen::{AsmModule, CodeGenError, LIBC_SYMBOLS, encode, runtime_symbols};
use std::collections::HashMap;
use std::ffi::CString;

/// Resolve one external symbol: runtime table first, then `dlsym`.
fn resolve_external(table: &HashMap<&'static str, usize>, sym: &str) -> Option<u64> {
    if let Some(&addr) = table.get(sym) {
        return Some(addr as u64);
    }
    if !LIBC_SYMBOLS.contains(&sym) {
        return None;
    }
    let name = CString::new(sym).ok()?;
    let addr = unsafe { libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr()) };
    if addr.is_null() {
        // glibc exports the underscore form of setjmp on some targets.
        if sym == "setjmp" {
            return resolve_external(table, "_setjmp");
        }
        return None;
    }
    Some(addr as u64)
}

struct GlobalsBlock {
    ptr: *mut u8,
    layout: std::alloc::Layout,
}

impl GlobalsBlock {
    fn allocate(asm: &AsmModule) -> (Option<GlobalsBlock>, HashMap<String, u64>) {
        let mut offsets = HashMap::new();
        let mut size = 0usize;
        for global in &asm.globals {
            size = (size + 7) & !7;
            offsets.insert(global.symbol.clone(), size);
            size += global.size.max(8) as usize;
        }
        if size == 0 {
            return (None, HashMap::new());
        }
        let layout = std::alloc::Layout::from_size_align(size, 16).expect("globals layout");
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        assert!(!ptr.is_null(), "globals allocation failed");
        let addresses = offsets
            .into_iter()
            .map(|(sym, off)| (sym, ptr as u64 + off as u64))
            .collect();
        (Some(GlobalsBlock { ptr, layout }), addresses)
    }
}

impl Drop for GlobalsBlock {
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.ptr, self.layout) };
    }
}

/// Encode and run the program in-process; returns its exit status.
pub fn run(asm: &AsmModule) -> Result<i32, CodeGenError> {
    let layout = encode::layout(asm);
    let table = runtime_symbols();
    let (_globals, global_addrs) = GlobalsBlock::allocate(asm);
    let resolve = |sym: &str| -> Option<u64> {
        global_addrs
            .get(sym)
            .copied()
            .or_else(|| resolve_external(&table, sym))
    };
    let words = encode::Encoder::encode_module(asm, &layout, &resolve)?;

    let byte_len = words.len() * 4;
    let page = 4096usize;
    let map_len = (byte_len + page - 1) & !(page - 1);
    unsafe {
        let buf = libc::mmap(
            std::ptr::null_mut(),
            map_len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        );
        if buf == libc::MAP_FAILED {
            return Err(CodeGenError::ice("mmap for the JIT buffer failed"));
        }
        std::ptr::copy_nonoverlapping(words.as_ptr() as *const u8, buf as *mut u8, byte_len);
        if libc::mprotect(buf, map_len, libc::PROT_READ | libc::PROT_EXEC) != 0 {
            libc::munmap(buf, map_len);
            return Err(CodeGenError::ice("mprotect(RX) on the JIT buffer failed"));
        }
        let entry_word = *layout
            .labels
            .get("main")
            .ok_or_else(|| CodeGenError::ice("JIT image has no main"))?;
        let status = call_entry(buf as *const u8, entry_word, byte_len);
        libc::munmap(buf, map_len);
        status
    }
}

#[cfg(target_arch = "aarch64")]
unsafe fn call_entry(buf: *const u8, entry_word: usize, byte_len: usize) -> Result<i32, CodeGenError> {
    unsafe extern "C" {
        fn __clear_cache(start: *mut libc::c_char, end: *mut libc::c_char);
    }
    unsafe {
        __clear_cache(
            buf as *mut libc::c_char,
            buf.add(byte_len) as *mut libc::c_char,
        );
        let entry: extern "C" fn() -> i32 =
            std::mem::transmute(buf.add(entry_word * 4));
        Ok(entry())
    }
}

#[cfg(not(target_arch = "aarch64"))]
unsafe fn call_entry(
    _buf: *const u8,
    _entry_word: usize,
    _byte_len: usize,
) -> Result<i32, CodeGenError> {
    Err(CodeGenError::ice(
        "the JIT executes ARM64 machine code and needs an arm64 host",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_and_libc_symbols_resolve() {
        let table = runtime_symbols();
        assert!(resolve_external(&table, "string_concat").is_some());
        assert!(resolve_external(&table, "basic_throw").is_some());
        assert!(resolve_external(&table, "exp").is_some());
        assert!(resolve_external(&table, "no_such_symbol_anywhere").is_none());
    }

    #[test]
    fn image_encodes_for_a_full_program() {
        // Everything up to the mmap: layout, resolution, encoding.
        let source = "DIM a(10) AS SINGLE\na() = a() * 2.0\nPRINT \"done\"\nEND";
        let analyzed = crate::semantic::analyze_source(source).unwrap();
        let mut module = crate::lower::lower_program(&analyzed).unwrap();
        crate::vectorize::vectorize(&mut module, &crate::config::NeonConfig::default());
        let asm = crate::codegen::generate(&module).unwrap();
        let layout = encode::layout(&asm);
        assert!(layout.labels.contains_key("main"));
        let table = runtime_symbols();
        let (_globals, global_addrs) = GlobalsBlock::allocate(&asm);
        let resolve = |sym: &str| -> Option<u64> {
            global_addrs
                .get(sym)
                .copied()
                .or_else(|| resolve_external(&table, sym))
        };
        let words = encode::Encoder::encode_module(&asm, &layout, &resolve).unwrap();
        assert_eq!(words.len(), layout.total_words);
    }
}
