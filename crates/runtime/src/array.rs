//! Array descriptors.
//!
//! A descriptor is a fixed-layout 56-byte record. The code generator computes
//! element addresses from the field offsets in `fb_core::array_desc` without
//! calling into the runtime, so the struct below is ABI and asserted against
//! those constants at compile time.

use crate::samm;
use fb_core::{ElementType, array_desc, error_code, flags};
use std::alloc::{Layout, alloc_zeroed, dealloc};

/// The 56-byte array descriptor. Field order and padding are load-bearing.
#[repr(C)]
pub struct ArrayDescriptor {
    pub data_pointer: *mut u8,
    pub length: i64,
    pub lower_bound_1: i32,
    pub upper_bound_1: i32,
    pub lower_bound_2: i32,
    pub upper_bound_2: i32,
    pub element_type: i32,
    pub pad1: i32,
    pub element_size: i32,
    pub pad2: i32,
    pub dimensions: i32,
    pub flags: i32,
}

const _: () = {
    use std::mem::offset_of;
    assert!(size_of::<ArrayDescriptor>() == array_desc::SIZE as usize);
    assert!(offset_of!(ArrayDescriptor, data_pointer) == array_desc::DATA_POINTER as usize);
    assert!(offset_of!(ArrayDescriptor, length) == array_desc::LENGTH as usize);
    assert!(offset_of!(ArrayDescriptor, lower_bound_1) == array_desc::LOWER_BOUND_1 as usize);
    assert!(offset_of!(ArrayDescriptor, upper_bound_1) == array_desc::UPPER_BOUND_1 as usize);
    assert!(offset_of!(ArrayDescriptor, lower_bound_2) == array_desc::LOWER_BOUND_2 as usize);
    assert!(offset_of!(ArrayDescriptor, upper_bound_2) == array_desc::UPPER_BOUND_2 as usize);
    assert!(offset_of!(ArrayDescriptor, element_type) == array_desc::ELEMENT_TYPE as usize);
    assert!(offset_of!(ArrayDescriptor, element_size) == array_desc::ELEMENT_SIZE as usize);
    assert!(offset_of!(ArrayDescriptor, dimensions) == array_desc::DIMENSIONS as usize);
    assert!(offset_of!(ArrayDescriptor, flags) == array_desc::FLAGS as usize);
};

fn storage_layout(length: i64, element_size: i32) -> Layout {
    let bytes = (length.max(0) as usize) * (element_size.max(1) as usize);
    Layout::from_size_align(bytes.max(1), 16).expect("array storage overflow")
}

unsafe fn release_string_elements(desc: &ArrayDescriptor, from: i64) {
    if desc.flags & flags::STRING_OWNING == 0 || desc.data_pointer.is_null() {
        return;
    }
    let elems = desc.data_pointer as *mut *mut crate::string::StringDescriptor;
    for i in from..desc.length {
        unsafe { crate::string::string_release(*elems.add(i as usize)) };
    }
}

/// Allocate a descriptor plus zeroed element storage.
///
/// `lb2`/`ub2` are ignored for rank 1. Element storage is zero-filled,
/// which for string arrays means all-null descriptors. The descriptor is
/// registered as a heap root in the current SAMM frame.
#[unsafe(no_mangle)]
pub extern "C" fn array_descriptor_alloc(
    rank: i32,
    lb1: i32,
    ub1: i32,
    lb2: i32,
    ub2: i32,
    elem_size: i32,
    elem_type: i32,
) -> *mut ArrayDescriptor {
    let dim1 = ub1 as i64 - lb1 as i64 + 1;
    let dim2 = if rank == 2 { ub2 as i64 - lb2 as i64 + 1 } else { 1 };
    if dim1 <= 0 || dim2 <= 0 || !(1..=2).contains(&rank) || elem_size <= 0 {
        unsafe { crate::except::basic_throw(error_code::SUBSCRIPT_OUT_OF_RANGE, 0) };
    }
    let length = dim1 * dim2;
    let data = unsafe { alloc_zeroed(storage_layout(length, elem_size)) };
    assert!(!data.is_null(), "array allocation failed");
    let owning = ElementType::from_code(elem_type) == Some(ElementType::Str);
    let desc = Box::into_raw(Box::new(ArrayDescriptor {
        data_pointer: data,
        length,
        lower_bound_1: lb1,
        upper_bound_1: ub1,
        lower_bound_2: if rank == 2 { lb2 } else { 0 },
        upper_bound_2: if rank == 2 { ub2 } else { 0 },
        element_type: elem_type,
        pad1: 0,
        element_size: elem_size,
        pad2: 0,
        dimensions: rank,
        flags: if owning { flags::STRING_OWNING } else { 0 },
    }));
    samm::register(samm::RootKind::Array, desc as *mut libc::c_void);
    desc
}

/// Release element storage (and string elements, when the array owns them),
/// then reset the scalar fields so a later REDIM can reuse the descriptor.
/// Element type, size, and rank survive the erase.
///
/// # Safety
/// `desc` must be null or a live descriptor.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn array_descriptor_erase(desc: *mut ArrayDescriptor) {
    if desc.is_null() {
        return;
    }
    unsafe {
        let d = &mut *desc;
        release_string_elements(d, 0);
        if !d.data_pointer.is_null() {
            dealloc(d.data_pointer, storage_layout(d.length, d.element_size));
            d.data_pointer = std::ptr::null_mut();
        }
        d.length = 0;
        d.lower_bound_1 = 0;
        d.upper_bound_1 = 0;
        d.lower_bound_2 = 0;
        d.upper_bound_2 = 0;
        d.flags &= !flags::PRESERVE;
    }
}

/// REDIM a rank-1 array to `[lb1, new_ub]`, keeping `lb1` as it was on the
/// last DIM (or 0 after an erase). With `preserve != 0` the leading elements
/// survive; the tail (or the whole array) is zero-filled.
///
/// # Safety
/// `desc` must be a live rank-1 descriptor.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn array_descriptor_redim(
    desc: *mut ArrayDescriptor,
    new_ub: i32,
    preserve: i32,
) {
    unsafe {
        let d = &mut *desc;
        if d.dimensions == 2 {
            crate::except::basic_throw(error_code::REDIM_MISMATCH, 0);
        }
        let lb = d.lower_bound_1;
        let new_length = new_ub as i64 - lb as i64 + 1;
        if new_length <= 0 {
            crate::except::basic_throw(error_code::SUBSCRIPT_OUT_OF_RANGE, 0);
        }
        let new_data = alloc_zeroed(storage_layout(new_length, d.element_size));
        assert!(!new_data.is_null(), "array reallocation failed");
        if preserve != 0 && !d.data_pointer.is_null() {
            d.flags |= flags::PRESERVE;
            let keep = d.length.min(new_length);
            std::ptr::copy_nonoverlapping(
                d.data_pointer,
                new_data,
                (keep as usize) * d.element_size as usize,
            );
            // Moved string pointers now live in the new storage; release
            // only the elements that did not survive.
            release_string_elements(d, keep);
        } else {
            release_string_elements(d, 0);
        }
        if !d.data_pointer.is_null() {
            dealloc(d.data_pointer, storage_layout(d.length, d.element_size));
        }
        d.data_pointer = new_data;
        d.length = new_length;
        d.upper_bound_1 = new_ub;
        d.dimensions = 1;
        d.flags &= !flags::PRESERVE;
    }
}

/// Raise the subscript-out-of-range error for a failed bounds check.
/// The code generator branches here from its inline compare.
///
/// # Safety
/// Unwinds via `longjmp`; never returns.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn array_bounds_fail(line: i32) -> ! {
    unsafe { crate::except::basic_throw(error_code::SUBSCRIPT_OUT_OF_RANGE, line) }
}

/// SAMM pop path: erase contents and free the descriptor itself.
///
/// # Safety
/// `desc` must be a live descriptor owned by the popping frame.
pub unsafe fn free_from_samm(desc: *mut ArrayDescriptor) {
    unsafe {
        array_descriptor_erase(desc);
        drop(Box::from_raw(desc));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samm;
    use fb_core::ElementType;

    fn with_frame<F: FnOnce()>(f: F) {
        samm::samm_init();
        samm::samm_push();
        f();
        samm::samm_pop();
        samm::samm_shutdown();
    }

    #[test]
    fn dim_invariants() {
        with_frame(|| unsafe {
            // DIM A(3 TO 7) AS DOUBLE
            let a = array_descriptor_alloc(1, 3, 7, 0, 0, 8, ElementType::Double as i32);
            let d = &*a;
            assert_eq!(d.length, 5);
            assert_eq!(d.lower_bound_1, 3);
            assert_eq!(d.upper_bound_1, 7);
            assert_eq!(d.element_size, 8);
            assert_eq!(d.dimensions, 1);
            // Storage is zero-filled.
            let elems = d.data_pointer as *const f64;
            for i in 0..5 {
                assert_eq!(*elems.add(i), 0.0);
            }
        });
    }

    #[test]
    fn rank2_length() {
        with_frame(|| unsafe {
            let a = array_descriptor_alloc(2, 0, 9, 0, 4, 4, ElementType::Int32 as i32);
            assert_eq!((*a).length, 50);
            assert_eq!((*a).dimensions, 2);
            assert_eq!((*a).upper_bound_2, 4);
        });
    }

    #[test]
    fn redim_preserve_keeps_prefix() {
        with_frame(|| unsafe {
            let a = array_descriptor_alloc(1, 1, 4, 0, 0, 4, ElementType::Int32 as i32);
            let elems = (*a).data_pointer as *mut i32;
            for i in 0..4 {
                *elems.add(i) = (i as i32 + 1) * 10;
            }
            array_descriptor_redim(a, 6, 1);
            assert_eq!((*a).length, 6);
            assert_eq!((*a).upper_bound_1, 6);
            let elems = (*a).data_pointer as *const i32;
            assert_eq!(*elems.add(0), 10);
            assert_eq!(*elems.add(3), 40);
            assert_eq!(*elems.add(4), 0);
            assert_eq!(*elems.add(5), 0);
        });
    }

    #[test]
    fn redim_without_preserve_zeroes() {
        with_frame(|| unsafe {
            let a = array_descriptor_alloc(1, 0, 3, 0, 0, 4, ElementType::Int32 as i32);
            let elems = (*a).data_pointer as *mut i32;
            *elems = 99;
            array_descriptor_redim(a, 7, 0);
            assert_eq!((*a).length, 8);
            assert_eq!(*((*a).data_pointer as *const i32), 0);
        });
    }

    #[test]
    fn erase_releases_string_elements_and_resets() {
        with_frame(|| unsafe {
            let a = array_descriptor_alloc(1, 0, 1, 0, 0, 8, ElementType::Str as i32);
            assert_eq!((*a).flags & fb_core::flags::STRING_OWNING, fb_core::flags::STRING_OWNING);
            let s = crate::string::from_str("owned");
            crate::string::string_retain(s);
            let elems = (*a).data_pointer as *mut *mut crate::string::StringDescriptor;
            *elems = s;
            array_descriptor_erase(a);
            // The array's reference is gone; the frame still owns one.
            assert_eq!((*s).refcount, 1);
            assert!((*a).data_pointer.is_null());
            assert_eq!((*a).length, 0);
            assert_eq!((*a).element_size, 8);
            assert_eq!((*a).dimensions, 1);
        });
    }
}
