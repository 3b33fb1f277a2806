//! Structured exception handling.
//!
//! TRY pushes an exception frame and calls `setjmp` on the frame's buffer
//! **directly from the emitted code**; the jump context must belong to the
//! generated function's own stack frame, so no Rust wrapper may sit between
//! the emitted call and `setjmp`. THROW travels here: it records the error
//! code and line, unwinds SAMM and GOSUB state back to where the TRY was
//! entered, and `longjmp`s into the frame's dispatch path.
//!
//! `basic_exception_setup` is the published shim form of the same contract:
//! a tail branch straight to `setjmp`, so even through the shim the captured
//! context is the caller's.

use crate::{gosub, samm};
use std::cell::Cell;

unsafe extern "C" {
    fn longjmp(env: *mut libc::c_void, val: libc::c_int) -> !;
}

// Tail-branch shim: no frame is created, so setjmp captures the caller's
// context exactly as a direct call would.
#[cfg(target_arch = "aarch64")]
std::arch::global_asm!(
    ".global basic_exception_setup",
    "basic_exception_setup:",
    "b setjmp",
);

#[cfg(target_arch = "x86_64")]
std::arch::global_asm!(
    ".global basic_exception_setup",
    "basic_exception_setup:",
    "jmp setjmp",
);

/// Platform jmp_buf storage, oversized and 16-aligned so any libc fits.
#[repr(C, align(16))]
pub struct JmpBuf {
    words: [u64; 64],
}

/// One TRY's worth of saved state. Frames form a chain; the newest frame is
/// the THROW target.
#[repr(C)]
pub struct ExceptionFrame {
    pub buf: JmpBuf,
    parent: *mut ExceptionFrame,
    samm_depth: usize,
    gosub_depth: usize,
}

thread_local! {
    static TOP: Cell<*mut ExceptionFrame> = const { Cell::new(std::ptr::null_mut()) };
    static LAST_ERR: Cell<i32> = const { Cell::new(0) };
    static LAST_ERL: Cell<i32> = const { Cell::new(0) };
}

/// Push a fresh exception frame and return a pointer to its jmp buffer for
/// the emitted `setjmp` call.
#[unsafe(no_mangle)]
pub extern "C" fn exception_frame_push() -> *mut libc::c_void {
    let frame = Box::into_raw(Box::new(ExceptionFrame {
        buf: JmpBuf { words: [0; 64] },
        parent: TOP.get(),
        samm_depth: samm::depth(),
        gosub_depth: gosub::depth(),
    }));
    TOP.set(frame);
    unsafe { &raw mut (*frame).buf as *mut libc::c_void }
}

/// Pop the newest frame. Called on normal END TRY exit and at the top of
/// the dispatch block, so a THROW inside a CATCH arm propagates outward.
#[unsafe(no_mangle)]
pub extern "C" fn exception_frame_pop() {
    let top = TOP.get();
    if !top.is_null() {
        unsafe {
            TOP.set((*top).parent);
            drop(Box::from_raw(top));
        }
    }
}

/// Raise error `code` at source `line`.
///
/// Unwinds SAMM frames and the GOSUB stack back to the innermost TRY, then
/// `longjmp`s into its dispatch path. With no TRY active the program
/// terminates with a message and a nonzero status.
///
/// # Safety
/// Never returns; transfers control via `longjmp` into a live jmp buffer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn basic_throw(code: i32, line: i32) -> ! {
    LAST_ERR.set(code);
    LAST_ERL.set(line);
    let top = TOP.get();
    if top.is_null() {
        basic_uncaught(code, line);
    }
    unsafe {
        samm::unwind_to((*top).samm_depth);
        gosub::truncate((*top).gosub_depth);
        longjmp(&raw mut (*top).buf as *mut libc::c_void, 1)
    }
}

/// ERR(): the code of the most recent THROW. 32-bit by contract.
#[unsafe(no_mangle)]
pub extern "C" fn basic_err() -> i32 {
    LAST_ERR.get()
}

/// ERL(): the line of the most recent THROW. 32-bit by contract.
#[unsafe(no_mangle)]
pub extern "C" fn basic_erl() -> i32 {
    LAST_ERL.get()
}

/// Terminal path for an exception no TRY catches.
#[unsafe(no_mangle)]
pub extern "C" fn basic_uncaught(code: i32, line: i32) -> ! {
    eprintln!("error code {} at line {}", code, line);
    crate::lifecycle::teardown();
    std::process::exit(1);
}

/// Number of live exception frames. Test hook.
pub fn frame_depth() -> usize {
    let mut depth = 0;
    let mut frame = TOP.get();
    while !frame.is_null() {
        depth += 1;
        frame = unsafe { (*frame).parent };
    }
    depth
}

/// Drop any frames left behind by an abnormal exit.
pub fn reset() {
    while !TOP.get().is_null() {
        exception_frame_pop();
    }
    LAST_ERR.set(0);
    LAST_ERL.set(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_push_and_pop() {
        reset();
        assert_eq!(frame_depth(), 0);
        let buf = exception_frame_push();
        assert!(!buf.is_null());
        assert_eq!(frame_depth(), 1);
        exception_frame_push();
        assert_eq!(frame_depth(), 2);
        exception_frame_pop();
        exception_frame_pop();
        assert_eq!(frame_depth(), 0);
        // Pop on an empty chain is a no-op.
        exception_frame_pop();
        assert_eq!(frame_depth(), 0);
    }

    #[test]
    fn err_and_erl_hold_last_values() {
        LAST_ERR.set(42);
        LAST_ERL.set(100);
        assert_eq!(basic_err(), 42);
        assert_eq!(basic_erl(), 100);
    }
}
