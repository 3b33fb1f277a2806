//! DATA pool and READ cursor.
//!
//! The emitted main prologue registers every DATA item in program order;
//! READ statements pull from the cursor with the conversions BASIC allows,
//! and RESTORE moves the cursor to a position the compiler resolved from
//! the RESTORE label.

use crate::hashmap::value_kind;
use crate::string::StringDescriptor;
use fb_core::error_code;
use std::cell::{Cell, RefCell};

thread_local! {
    static POOL: RefCell<Vec<(i32, i64)>> = const { RefCell::new(Vec::new()) };
    static CURSOR: Cell<usize> = const { Cell::new(0) };
}

/// Append one DATA item to the pool. String payloads are descriptors the
/// program-lifetime SAMM frame owns.
#[unsafe(no_mangle)]
pub extern "C" fn data_register(kind: i32, payload: i64) {
    POOL.with(|pool| pool.borrow_mut().push((kind, payload)));
}

fn next_item(line: i32) -> (i32, i64) {
    POOL.with(|pool| {
        let pool = pool.borrow();
        let cursor = CURSOR.get();
        if cursor >= pool.len() {
            unsafe { crate::except::basic_throw(error_code::OUT_OF_DATA, line) };
        }
        CURSOR.set(cursor + 1);
        pool[cursor]
    })
}

/// READ into an integer variable.
#[unsafe(no_mangle)]
pub extern "C" fn data_read_int(line: i32) -> i64 {
    let (kind, payload) = next_item(line);
    match kind {
        value_kind::INT => payload,
        value_kind::FLOAT => f64::from_bits(payload as u64) as i64,
        _ => unsafe { crate::except::basic_throw(error_code::TYPE_CONVERSION, line) },
    }
}

/// READ into a float variable.
#[unsafe(no_mangle)]
pub extern "C" fn data_read_double(line: i32) -> f64 {
    let (kind, payload) = next_item(line);
    match kind {
        value_kind::INT => payload as f64,
        value_kind::FLOAT => f64::from_bits(payload as u64),
        _ => unsafe { crate::except::basic_throw(error_code::TYPE_CONVERSION, line) },
    }
}

/// READ into a string variable. Numeric items convert the way STR$ does.
#[unsafe(no_mangle)]
pub extern "C" fn data_read_string(line: i32) -> *mut StringDescriptor {
    let (kind, payload) = next_item(line);
    match kind {
        value_kind::STRING => payload as *mut StringDescriptor,
        value_kind::INT => crate::string::string_from_int(payload),
        value_kind::FLOAT => crate::string::string_from_double(f64::from_bits(payload as u64)),
        _ => unsafe { crate::except::basic_throw(error_code::TYPE_CONVERSION, line) },
    }
}

/// RESTORE [label]: move the cursor to a compiler-resolved pool index.
#[unsafe(no_mangle)]
pub extern "C" fn data_restore(index: i64) {
    CURSOR.set(index.max(0) as usize);
}

/// Teardown: forget the pool (descriptors belong to SAMM).
pub fn reset() {
    POOL.with(|pool| pool.borrow_mut().clear());
    CURSOR.set(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samm;

    #[test]
    fn read_and_restore() {
        samm::samm_init();
        reset();
        data_register(value_kind::INT, 10);
        data_register(value_kind::FLOAT, 2.5f64.to_bits() as i64);
        data_register(value_kind::STRING, crate::string::from_str("three") as i64);

        assert_eq!(data_read_int(1), 10);
        assert_eq!(data_read_double(2), 2.5);
        let s = data_read_string(3);
        assert_eq!(unsafe { crate::string::to_string(s) }, "three");

        data_restore(1);
        assert_eq!(data_read_int(4), 2); // 2.5 truncates
        reset();
        samm::samm_shutdown();
    }

    #[test]
    fn numeric_to_string_conversion() {
        samm::samm_init();
        reset();
        data_register(value_kind::INT, -7);
        let s = data_read_string(1);
        assert_eq!(unsafe { crate::string::to_string(s) }, "-7");
        reset();
        samm::samm_shutdown();
    }
}
