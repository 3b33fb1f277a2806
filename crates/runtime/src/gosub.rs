//! GOSUB return-address stack.
//!
//! GOSUB can be invoked from any statement position, including inside
//! structured blocks, and RETURN must resume at the statement after the
//! GOSUB without disturbing the blocks' merge points. The return addresses
//! therefore live on this auxiliary stack, not the machine call stack:
//! each GOSUB pushes the address of its following statement, each RETURN
//! pops and branches indirect.

use fb_core::error_code;
use std::cell::RefCell;

thread_local! {
    static RETURNS: RefCell<Vec<*const libc::c_void>> = const { RefCell::new(Vec::new()) };
}

/// Push the address of the statement after a GOSUB.
#[unsafe(no_mangle)]
pub extern "C" fn gosub_push(addr: *const libc::c_void) {
    RETURNS.with(|r| r.borrow_mut().push(addr));
}

/// Pop the resume address for a RETURN. RETURN without a pending GOSUB is a
/// runtime error.
///
/// # Safety
/// Throws (never returns) on underflow.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gosub_pop() -> *const libc::c_void {
    let popped = RETURNS.with(|r| r.borrow_mut().pop());
    match popped {
        Some(addr) => addr,
        None => unsafe { crate::except::basic_throw(error_code::GOSUB_UNDERFLOW, 0) },
    }
}

/// Current stack depth, recorded by TRY entry.
pub fn depth() -> usize {
    RETURNS.with(|r| r.borrow().len())
}

/// Discard entries above `target`; THROW uses this so an exception taken
/// inside a GOSUB body cannot leave stale return addresses behind.
pub fn truncate(target: usize) {
    RETURNS.with(|r| r.borrow_mut().truncate(target));
}

/// Clear the stack at program teardown.
pub fn reset() {
    truncate(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_is_lifo() {
        reset();
        gosub_push(0x1000 as *const _);
        gosub_push(0x2000 as *const _);
        assert_eq!(depth(), 2);
        assert_eq!(unsafe { gosub_pop() } as usize, 0x2000);
        assert_eq!(unsafe { gosub_pop() } as usize, 0x1000);
        assert_eq!(depth(), 0);
    }

    #[test]
    fn truncate_discards_nested_entries() {
        reset();
        gosub_push(0x1000 as *const _);
        gosub_push(0x2000 as *const _);
        gosub_push(0x3000 as *const _);
        truncate(1);
        assert_eq!(depth(), 1);
        assert_eq!(unsafe { gosub_pop() } as usize, 0x1000);
    }
}
