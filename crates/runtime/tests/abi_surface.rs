//! ABI-surface tests: exercise the runtime the way emitted code does:
//! through raw pointers and the published field offsets, not through the
//! Rust struct definitions.

use fb_core::{ElementType, array_desc};
use fb_runtime::{array, hashmap, list, samm, string};

unsafe fn read_i32(base: *const u8, offset: i32) -> i32 {
    unsafe { *(base.add(offset as usize) as *const i32) }
}

unsafe fn read_i64(base: *const u8, offset: i32) -> i64 {
    unsafe { *(base.add(offset as usize) as *const i64) }
}

unsafe fn read_ptr(base: *const u8, offset: i32) -> *mut u8 {
    unsafe { *(base.add(offset as usize) as *const *mut u8) }
}

#[test]
fn array_descriptor_reads_like_the_emitter() {
    fb_runtime::lifecycle::basic_runtime_init();
    samm::samm_push();

    // DIM A(1 TO 100) AS INTEGER
    let desc = array::array_descriptor_alloc(1, 1, 100, 0, 0, 4, ElementType::Int32 as i32);
    let base = desc as *const u8;
    unsafe {
        assert_eq!(read_i64(base, array_desc::LENGTH), 100);
        assert_eq!(read_i32(base, array_desc::LOWER_BOUND_1), 1);
        assert_eq!(read_i32(base, array_desc::UPPER_BOUND_1), 100);
        assert_eq!(read_i32(base, array_desc::ELEMENT_SIZE), 4);
        assert_eq!(read_i32(base, array_desc::DIMENSIONS), 1);
        assert_eq!(
            read_i32(base, array_desc::ELEMENT_TYPE),
            ElementType::Int32 as i32
        );

        // Element addressing the way lowered code computes it:
        // addr = dataPointer + (i - lowerBound1) * elementSize
        let data = read_ptr(base, array_desc::DATA_POINTER);
        let elem_size = read_i32(base, array_desc::ELEMENT_SIZE) as usize;
        let lb = read_i32(base, array_desc::LOWER_BOUND_1) as i64;
        for i in 1..=100i64 {
            let addr = data.add(((i - lb) as usize) * elem_size) as *mut i32;
            *addr = (i * i) as i32;
        }
        let addr_7 = data.add(((7 - lb) as usize) * elem_size) as *const i32;
        assert_eq!(*addr_7, 49);

        // REDIM PRESERVE keeps the prefix and updates the same fields.
        array::array_descriptor_redim(desc, 150, 1);
        assert_eq!(read_i64(base, array_desc::LENGTH), 150);
        assert_eq!(read_i32(base, array_desc::UPPER_BOUND_1), 150);
        let data = read_ptr(base, array_desc::DATA_POINTER);
        let addr_100 = data.add(((100 - lb) as usize) * elem_size) as *const i32;
        assert_eq!(*addr_100, 10_000);
        let addr_150 = data.add(((150 - lb) as usize) * elem_size) as *const i32;
        assert_eq!(*addr_150, 0);
    }

    samm::samm_pop();
    fb_runtime::lifecycle::basic_runtime_shutdown();
}

#[test]
fn scenario_perfect_squares_via_descriptor_math() {
    // The toggle-sieve from the end-to-end corpus, run through raw
    // descriptor arithmetic: exactly the perfect squares stay set.
    fb_runtime::lifecycle::basic_runtime_init();
    samm::samm_push();

    let desc = array::array_descriptor_alloc(1, 1, 100, 0, 0, 4, ElementType::Int32 as i32);
    unsafe {
        let base = desc as *const u8;
        let data = read_ptr(base, array_desc::DATA_POINTER) as *mut i32;
        for p in 1..=100usize {
            let mut i = p;
            while i <= 100 {
                *data.add(i - 1) = 1 - *data.add(i - 1);
                i += p;
            }
        }
        let on: Vec<usize> = (1..=100).filter(|&i| *data.add(i - 1) != 0).collect();
        assert_eq!(on, vec![1, 4, 9, 16, 25, 36, 49, 64, 81, 100]);
    }

    samm::samm_pop();
    fb_runtime::lifecycle::basic_runtime_shutdown();
}

#[test]
fn samm_scopes_compose_with_string_sharing() {
    fb_runtime::lifecycle::basic_runtime_init();

    samm::samm_push();
    let escaped;
    {
        samm::samm_push();
        let a = string::from_str("kept");
        unsafe { samm::samm_retain(a as *mut libc::c_void) };
        escaped = a;
        let _dies_here = string::from_str("scratch");
        samm::samm_pop();
    }
    assert_eq!(unsafe { string::to_string(escaped) }, "kept");
    samm::samm_pop();

    fb_runtime::lifecycle::basic_runtime_shutdown();
}

#[test]
fn hashmap_string_values_survive_map_lifetime() {
    fb_runtime::lifecycle::basic_runtime_init();
    samm::samm_push();

    let m = hashmap::hashmap_new();
    unsafe {
        let k = string::from_str("Bob");
        hashmap::hashmap_put(
            m,
            k,
            hashmap::value_kind::STRING,
            string::from_str("B") as i64,
        );
        let got = hashmap::hashmap_get(m, string::from_str("Bob"));
        assert_eq!(string::to_string(got as *const _), "B");
    }

    samm::samm_pop();
    fb_runtime::lifecycle::basic_runtime_shutdown();
}

#[test]
fn lists_of_strings_round_trip() {
    fb_runtime::lifecycle::basic_runtime_init();
    samm::samm_push();

    unsafe {
        let l = list::list_create_typed(list::atom_kind::STRING);
        for name in ["ada", "grace", "alan"] {
            list::list_append(l, list::atom_kind::STRING, string::from_str(name) as i64);
        }
        assert_eq!((*l).length, 3);
        let joined = list::list_join(l, string::from_str("+"));
        assert_eq!(string::to_string(joined), "ada+grace+alan");
    }

    samm::samm_pop();
    fb_runtime::lifecycle::basic_runtime_shutdown();
}
