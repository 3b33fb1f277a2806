//! String descriptors.
//!
//! Strings are refcounted descriptors over UTF-32 storage. A descriptor is
//! immutable once constructed; every mutating operation returns a new
//! descriptor. The single exception is concatenation onto a uniquely-owned
//! descriptor (`refcount == 1`) with spare capacity, which appends in place
//! and hands the caller a second reference to the same storage.
//!
//! Every freshly allocated descriptor registers itself as a heap root in the
//! current SAMM frame; `string_release` is what the frame pop calls.

use crate::samm;
use std::alloc::{Layout, alloc, dealloc};

/// Refcounted UTF-32 string. Layout is ABI: the code generator reads
/// `length` at offset 8 and `data` at offset 24.
#[repr(C)]
pub struct StringDescriptor {
    pub refcount: i64,
    /// Length in UTF-32 code points.
    pub length: i64,
    /// Allocated code points (`>= length`).
    pub capacity: i64,
    pub data: *mut u32,
}

fn data_layout(capacity: i64) -> Layout {
    Layout::array::<u32>(capacity.max(1) as usize).expect("string capacity overflow")
}

fn alloc_descriptor(code_points: &[u32], extra_capacity: i64) -> *mut StringDescriptor {
    let capacity = code_points.len() as i64 + extra_capacity;
    let data = unsafe { alloc(data_layout(capacity)) as *mut u32 };
    assert!(!data.is_null(), "string allocation failed");
    unsafe {
        std::ptr::copy_nonoverlapping(code_points.as_ptr(), data, code_points.len());
    }
    let desc = Box::into_raw(Box::new(StringDescriptor {
        refcount: 1,
        length: code_points.len() as i64,
        capacity,
        data,
    }));
    samm::register(samm::RootKind::Str, desc as *mut libc::c_void);
    desc
}

/// Build a descriptor from a Rust `&str` (decodes UTF-8 to UTF-32).
pub fn from_str(s: &str) -> *mut StringDescriptor {
    let points: Vec<u32> = s.chars().map(|c| c as u32).collect();
    alloc_descriptor(&points, 0)
}

/// Read a descriptor back into a Rust `String`. Null reads as empty.
///
/// # Safety
/// `s` must be null or a live descriptor.
pub unsafe fn to_string(s: *const StringDescriptor) -> String {
    if s.is_null() {
        return String::new();
    }
    unsafe {
        let desc = &*s;
        (0..desc.length)
            .map(|i| {
                let cp = *desc.data.add(i as usize);
                char::from_u32(cp).unwrap_or(char::REPLACEMENT_CHARACTER)
            })
            .collect()
    }
}

unsafe fn code_points<'a>(s: *const StringDescriptor) -> &'a [u32] {
    if s.is_null() {
        return &[];
    }
    unsafe {
        let desc = &*s;
        if desc.length == 0 {
            &[]
        } else {
            std::slice::from_raw_parts(desc.data, desc.length as usize)
        }
    }
}

/// Create a descriptor from a NUL-terminated UTF-8 C string.
///
/// This is what the code generator emits for string literals; the literal
/// bytes live in the program's rodata.
///
/// # Safety
/// `cstr` must be null or point to a NUL-terminated UTF-8 byte sequence.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn string_new_ascii(cstr: *const libc::c_char) -> *mut StringDescriptor {
    if cstr.is_null() {
        return from_str("");
    }
    let bytes = unsafe { std::ffi::CStr::from_ptr(cstr) };
    from_str(&bytes.to_string_lossy())
}

/// Create a descriptor from a buffer of UTF-32 code points.
///
/// # Safety
/// `data` must point to `len` valid code points (or be null with `len == 0`).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn string_new_utf32(data: *const u32, len: i64) -> *mut StringDescriptor {
    if data.is_null() || len <= 0 {
        return from_str("");
    }
    let points = unsafe { std::slice::from_raw_parts(data, len as usize) };
    alloc_descriptor(points, 0)
}

/// Increment the refcount. Null is a no-op.
///
/// # Safety
/// `s` must be null or a live descriptor.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn string_retain(s: *mut StringDescriptor) {
    if !s.is_null() {
        unsafe { (*s).refcount += 1 };
    }
}

/// Decrement the refcount, freeing storage and descriptor at zero.
/// Null is a no-op.
///
/// # Safety
/// `s` must be null or a live descriptor with a positive refcount.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn string_release(s: *mut StringDescriptor) {
    if s.is_null() {
        return;
    }
    unsafe {
        (*s).refcount -= 1;
        if (*s).refcount > 0 {
            return;
        }
        let desc = Box::from_raw(s);
        dealloc(desc.data as *mut u8, data_layout(desc.capacity));
    }
}

/// Concatenate two strings.
///
/// When `a` is uniquely owned and has room, appends into `a`'s storage and
/// returns `a` with its refcount bumped; otherwise allocates. Either way the
/// caller owns one reference to the result and the operands are untouched.
///
/// # Safety
/// `a` and `b` must each be null or live descriptors.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn string_concat(
    a: *mut StringDescriptor,
    b: *mut StringDescriptor,
) -> *mut StringDescriptor {
    unsafe {
        let left = code_points(a);
        let right = code_points(b);
        if !a.is_null() {
            let desc = &mut *a;
            if desc.refcount == 1 && desc.capacity - desc.length >= right.len() as i64 {
                std::ptr::copy_nonoverlapping(
                    right.as_ptr(),
                    desc.data.add(desc.length as usize),
                    right.len(),
                );
                desc.length += right.len() as i64;
                // The caller receives an owned reference, so the frame gets
                // a second entry to balance it.
                desc.refcount += 1;
                samm::register(samm::RootKind::Str, a as *mut libc::c_void);
                return a;
            }
        }
        // Over-allocate so a chain of appends onto the result stays in place.
        let mut points = Vec::with_capacity(left.len() + right.len());
        points.extend_from_slice(left);
        points.extend_from_slice(right);
        let extra = (points.len() / 2).max(8) as i64;
        alloc_descriptor(&points, extra)
    }
}

/// Slice `s` by 1-based, inclusive code-point positions.
///
/// `lo <= 0` clamps to the start; `hi < 0` or `hi > length` clamps to the
/// end, which is how `s$(lo TO)` and `s$(TO hi)` are lowered. An empty
/// range yields the empty string.
///
/// # Safety
/// `s` must be null or a live descriptor.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn string_slice(
    s: *mut StringDescriptor,
    lo: i64,
    hi: i64,
) -> *mut StringDescriptor {
    let points = unsafe { code_points(s) };
    let len = points.len() as i64;
    let lo = lo.max(1);
    let hi = if hi < 0 { len } else { hi.min(len) };
    if lo > hi {
        return from_str("");
    }
    alloc_descriptor(&points[(lo - 1) as usize..hi as usize], 0)
}

/// Lexicographic comparison by code point: -1, 0, or 1.
///
/// # Safety
/// `a` and `b` must each be null or live descriptors.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn string_compare(
    a: *mut StringDescriptor,
    b: *mut StringDescriptor,
) -> i32 {
    let left = unsafe { code_points(a) };
    let right = unsafe { code_points(b) };
    match left.cmp(right) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }
}

/// Length in code points. Null reads as 0.
///
/// # Safety
/// `s` must be null or a live descriptor.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn string_length(s: *mut StringDescriptor) -> i64 {
    if s.is_null() { 0 } else { unsafe { (*s).length } }
}

/// Encode to a malloc'd NUL-terminated UTF-8 buffer. The caller frees it
/// with `free`. Used for OPEN paths and other C-string boundaries.
///
/// # Safety
/// `s` must be null or a live descriptor.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn string_to_utf8(s: *mut StringDescriptor) -> *mut libc::c_char {
    let utf8 = unsafe { to_string(s) };
    let bytes = utf8.as_bytes();
    unsafe {
        let buf = libc::malloc(bytes.len() + 1) as *mut libc::c_char;
        assert!(!buf.is_null(), "string_to_utf8: allocation failed");
        std::ptr::copy_nonoverlapping(bytes.as_ptr() as *const libc::c_char, buf, bytes.len());
        *buf.add(bytes.len()) = 0;
        buf
    }
}

/// STR$ for integers: decimal digits, minus sign when negative.
#[unsafe(no_mangle)]
pub extern "C" fn string_from_int(v: i64) -> *mut StringDescriptor {
    from_str(&v.to_string())
}

/// STR$ for doubles: integral values print without a decimal point.
#[unsafe(no_mangle)]
pub extern "C" fn string_from_double(v: f64) -> *mut StringDescriptor {
    from_str(&crate::io::format_double(v))
}

/// VAL: parse a leading number, 0.0 when none.
///
/// # Safety
/// `s` must be null or a live descriptor.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn string_to_number(s: *mut StringDescriptor) -> f64 {
    let text = unsafe { to_string(s) };
    let trimmed = text.trim_start();
    // Longest prefix that parses as a number, so "12abc" reads as 12.
    let mut end = 0;
    for (i, _) in trimmed.char_indices().chain([(trimmed.len(), ' ')]) {
        if trimmed[..i].parse::<f64>().is_ok() {
            end = i;
        }
    }
    trimmed[..end].parse::<f64>().unwrap_or(0.0)
}

/// CHR$: single code point to string. Out-of-range yields the empty string.
#[unsafe(no_mangle)]
pub extern "C" fn string_char(code: i64) -> *mut StringDescriptor {
    match u32::try_from(code).ok().and_then(char::from_u32) {
        Some(c) => from_str(&c.to_string()),
        None => from_str(""),
    }
}

/// ASC: first code point, 0 for the empty string.
///
/// # Safety
/// `s` must be null or a live descriptor.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn string_asc(s: *mut StringDescriptor) -> i64 {
    let points = unsafe { code_points(s) };
    points.first().copied().unwrap_or(0) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samm;

    fn with_frame<F: FnOnce()>(f: F) {
        samm::samm_init();
        samm::samm_push();
        f();
        samm::samm_pop();
        samm::samm_shutdown();
    }

    #[test]
    fn concat_and_length() {
        with_frame(|| unsafe {
            let a = from_str("Hello, ");
            let b = from_str("World!");
            let c = string_concat(a, b);
            assert_eq!(to_string(c), "Hello, World!");
            assert_eq!(string_length(c), 13);
            assert_eq!(to_string(a), "Hello, ");
        });
    }

    #[test]
    fn concat_in_place_when_unique() {
        with_frame(|| unsafe {
            let a = string_concat(from_str("ab"), from_str("cd"));
            // The result carries spare capacity; appending must reuse it.
            let data_before = (*a).data;
            let b = from_str("ef");
            let c = string_concat(a, b);
            assert_eq!(c, a);
            assert_eq!((*c).data, data_before);
            assert_eq!(to_string(c), "abcdef");
            string_release(c);
        });
    }

    #[test]
    fn slice_clamps_like_basic() {
        with_frame(|| unsafe {
            let s = from_str("FasterBASIC");
            assert_eq!(to_string(string_slice(s, 7, 11)), "BASIC");
            assert_eq!(to_string(string_slice(s, 7, -1)), "BASIC"); // s$(7 TO)
            assert_eq!(to_string(string_slice(s, 1, 6)), "Faster"); // s$(TO 6)
            assert_eq!(to_string(string_slice(s, -3, 2)), "Fa");
            assert_eq!(to_string(string_slice(s, 9, 4)), "");
            assert_eq!(to_string(string_slice(s, 1, 99)), "FasterBASIC");
        });
    }

    #[test]
    fn compare_is_code_point_lexicographic() {
        with_frame(|| unsafe {
            let a = from_str("apple");
            let b = from_str("apricot");
            assert_eq!(string_compare(a, b), -1);
            assert_eq!(string_compare(b, a), 1);
            let c = from_str("apple");
            assert_eq!(string_compare(a, c), 0);
            assert_eq!(string_compare(std::ptr::null_mut(), a), -1);
        });
    }

    #[test]
    fn val_and_str_round_trip() {
        with_frame(|| unsafe {
            assert_eq!(string_to_number(from_str("  42")), 42.0);
            assert_eq!(string_to_number(from_str("3.5e2xyz")), 350.0);
            assert_eq!(string_to_number(from_str("nope")), 0.0);
            assert_eq!(to_string(string_from_int(-7)), "-7");
            assert_eq!(to_string(string_from_double(2.0)), "2");
            assert_eq!(to_string(string_from_double(2.5)), "2.5");
        });
    }

    #[test]
    fn chr_asc() {
        with_frame(|| unsafe {
            assert_eq!(to_string(string_char(65)), "A");
            assert_eq!(string_asc(from_str("A")), 65);
            assert_eq!(string_asc(from_str("")), 0);
            assert_eq!(to_string(string_char(-1)), "");
        });
    }
}
