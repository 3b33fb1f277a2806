//! The runtime symbol table.
//!
//! The JIT resolves `bl` targets against this table first (the runtime is
//! linked into the compiler, so every C-ABI symbol has an in-process
//! address) and falls back to `dlsym` for the libc/libm names the code
//! generator also emits (`setjmp`, `exit`, and the math entry points).

use std::collections::HashMap;

/// Symbols the code generator may emit that live in libc/libm rather than
/// the runtime; the JIT resolves these with `dlsym(RTLD_DEFAULT, …)`.
pub const LIBC_SYMBOLS: &[&str] = &[
    "setjmp", "_setjmp", "exit", "pow", "exp", "sin", "cos", "tan", "log", "atan", "sqrt",
    "floor", "fabs", "fabsf", "labs",
];

macro_rules! runtime_table {
    ($($name:literal => $path:path),+ $(,)?) => {{
        let mut table: HashMap<&'static str, usize> = HashMap::new();
        $(table.insert($name, $path as usize);)+
        table
    }};
}

/// Name → in-process address for every runtime symbol in the ABI contract.
pub fn runtime_symbols() -> HashMap<&'static str, usize> {
    use fb_runtime::{array, data, except, gosub, hashmap, io, lifecycle, list, samm, string};
    runtime_table! {
        // Strings
        "string_new_ascii" => string::string_new_ascii,
        "string_new_utf32" => string::string_new_utf32,
        "string_retain" => string::string_retain,
        "string_release" => string::string_release,
        "string_concat" => string::string_concat,
        "string_slice" => string::string_slice,
        "string_compare" => string::string_compare,
        "string_length" => string::string_length,
        "string_to_utf8" => string::string_to_utf8,
        "string_from_int" => string::string_from_int,
        "string_from_double" => string::string_from_double,
        "string_to_number" => string::string_to_number,
        "string_char" => string::string_char,
        "string_asc" => string::string_asc,
        // Arrays
        "array_descriptor_alloc" => array::array_descriptor_alloc,
        "array_descriptor_erase" => array::array_descriptor_erase,
        "array_descriptor_redim" => array::array_descriptor_redim,
        "array_bounds_fail" => array::array_bounds_fail,
        // SAMM
        "samm_init" => samm::samm_init,
        "samm_shutdown" => samm::samm_shutdown,
        "samm_push" => samm::samm_push,
        "samm_pop" => samm::samm_pop,
        "samm_retain" => samm::samm_retain,
        "samm_register" => samm::samm_register,
        // Exceptions
        "exception_frame_push" => except::exception_frame_push,
        "exception_frame_pop" => except::exception_frame_pop,
        "basic_throw" => except::basic_throw,
        "basic_err" => except::basic_err,
        "basic_erl" => except::basic_erl,
        "basic_uncaught" => except::basic_uncaught,
        // Hashmaps
        "hashmap_new" => hashmap::hashmap_new,
        "hashmap_put" => hashmap::hashmap_put,
        "hashmap_get" => hashmap::hashmap_get,
        "hashmap_remove" => hashmap::hashmap_remove,
        "hashmap_size" => hashmap::hashmap_size,
        "hashmap_haskey" => hashmap::hashmap_haskey,
        "hashmap_clear" => hashmap::hashmap_clear,
        "hashmap_free" => hashmap::hashmap_free,
        // Lists
        "list_create" => list::list_create,
        "list_create_typed" => list::list_create_typed,
        "list_append" => list::list_append,
        "list_prepend" => list::list_prepend,
        "list_insert" => list::list_insert,
        "list_shift" => list::list_shift,
        "list_pop" => list::list_pop,
        "list_remove" => list::list_remove,
        "list_clear" => list::list_clear,
        "list_get_int" => list::list_get_int,
        "list_get_float" => list::list_get_float,
        "list_get_string" => list::list_get_string,
        "list_head" => list::list_head,
        "list_iter_begin" => list::list_iter_begin,
        "list_iter_next" => list::list_iter_next,
        "list_copy" => list::list_copy,
        "list_rest" => list::list_rest,
        "list_reverse" => list::list_reverse,
        "list_contains" => list::list_contains,
        "list_indexof" => list::list_indexof,
        "list_join" => list::list_join,
        "list_free" => list::list_free,
        "list_free_from_samm" => list::list_free_from_samm,
        "list_atom_free_from_samm" => list::list_atom_free_from_samm,
        // GOSUB return stack
        "gosub_push" => gosub::gosub_push,
        "gosub_pop" => gosub::gosub_pop,
        // DATA pool
        "data_register" => data::data_register,
        "data_read_int" => data::data_read_int,
        "data_read_double" => data::data_read_double,
        "data_read_string" => data::data_read_string,
        "data_restore" => data::data_restore,
        // I/O
        "basic_print_int" => io::basic_print_int,
        "basic_print_double" => io::basic_print_double,
        "basic_print_string" => io::basic_print_string,
        "basic_print_char" => io::basic_print_char,
        "basic_print_newline" => io::basic_print_newline,
        "basic_input_line" => io::basic_input_line,
        "basic_open" => io::basic_open,
        "basic_close" => io::basic_close,
        "basic_print_channel_string" => io::basic_print_channel_string,
        "basic_print_channel_int" => io::basic_print_channel_int,
        "basic_print_channel_double" => io::basic_print_channel_double,
        "basic_print_channel_newline" => io::basic_print_channel_newline,
        "basic_input_line_channel" => io::basic_input_line_channel,
        "basic_eof" => io::basic_eof,
        // Lifecycle
        "basic_runtime_init" => lifecycle::basic_runtime_init,
        "basic_runtime_shutdown" => lifecycle::basic_runtime_shutdown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_has_addresses_for_the_contract() {
        let table = runtime_symbols();
        for sym in [
            "string_new_ascii",
            "string_concat",
            "array_descriptor_alloc",
            "array_descriptor_redim",
            "samm_push",
            "samm_retain",
            "exception_frame_push",
            "basic_throw",
            "basic_err",
            "hashmap_put",
            "list_append",
            "gosub_push",
            "basic_print_string",
            "basic_runtime_init",
        ] {
            assert!(table.contains_key(sym), "missing {}", sym);
            assert_ne!(table[sym], 0);
        }
    }

    #[test]
    fn every_emitted_bl_target_is_resolvable() {
        // Compile a program touching most subsystems and check each bl
        // target appears in the runtime table, the libc list, or the
        // module's own functions.
        let source = "GLOBAL g$\nDIM a(10) AS SINGLE\nDIM m AS HASHMAP\nDIM l AS LIST\n\
                      DATA 1\nREAD x%\nRESTORE\n\
                      a() = a() * 2.0\ns! = SUM(a())\n\
                      m(\"k\") = \"v\"\nAPPEND l, 1\n\
                      TRY\nTHROW 9\nCATCH 9\nPRINT ERR()\nFINALLY\nPRINT 1\nEND TRY\n\
                      g$ = STR$(x%) + CHR$(65)\nPRINT g$; VAL(g$); ABS(-2.5); 7 ^ 2\n\
                      GOSUB Fin\nEND\nFin:\nRETURN";
        let analyzed = crate::semantic::analyze_source(source).expect("analysis");
        let mut module = crate::lower::lower_program(&analyzed).expect("lowering");
        crate::vectorize::vectorize(&mut module, &crate::config::NeonConfig::default());
        let asm = crate::codegen::generate(&module).expect("codegen");
        let table = runtime_symbols();
        let internal: Vec<&str> = asm.funcs.iter().map(|f| f.name.as_str()).collect();
        for func in &asm.funcs {
            for inst in &func.insts {
                if let crate::codegen::insts::AInst::Bl { sym } = inst {
                    let known = table.contains_key(sym.as_str())
                        || LIBC_SYMBOLS.contains(&sym.as_str())
                        || internal.contains(&sym.as_str());
                    assert!(known, "unresolvable call target `{}`", sym);
                }
            }
        }
    }
}
