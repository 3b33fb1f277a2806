//! Singly-linked lists of tagged atoms.
//!
//! A list is a header `{head, tail, length, element-kind}` over atoms that
//! each carry a kind tag and a 64-bit payload. Atoms and headers are
//! separate SAMM roots: the frame that allocated them frees each with the
//! granular `*_from_samm` functions, which never touch neighbouring atoms.
//! Mutating operations therefore only *unlink* atoms; storage is reclaimed
//! when the owning scope pops.

use crate::samm;
use crate::string::{StringDescriptor, string_compare, string_release, string_retain};

/// Atom kind tags. `ANY` is only meaningful as a header element-kind,
/// marking a heterogeneous list.
pub mod atom_kind {
    pub const INT: i32 = 1;
    pub const FLOAT: i32 = 2;
    pub const STRING: i32 = 3;
    pub const LIST: i32 = 4;
    pub const ANY: i32 = 5;
}

/// One list cell.
#[repr(C)]
pub struct ListAtom {
    pub next: *mut ListAtom,
    pub kind: i32,
    pad: i32,
    pub payload: i64,
}

/// List header.
#[repr(C)]
pub struct ListHeader {
    pub head: *mut ListAtom,
    pub tail: *mut ListAtom,
    pub length: i64,
    pub elem_kind: i32,
    pad: i32,
}

fn new_atom(kind: i32, payload: i64) -> *mut ListAtom {
    let atom = Box::into_raw(Box::new(ListAtom {
        next: std::ptr::null_mut(),
        kind,
        pad: 0,
        payload,
    }));
    samm::register(samm::RootKind::ListAtom, atom as *mut libc::c_void);
    atom
}

unsafe fn retain_payload(kind: i32, payload: i64) {
    if kind == atom_kind::STRING {
        unsafe { string_retain(payload as *mut StringDescriptor) };
    }
}

unsafe fn payload_equal(a_kind: i32, a: i64, b_kind: i32, b: i64) -> bool {
    unsafe {
        match (a_kind, b_kind) {
            (atom_kind::STRING, atom_kind::STRING) => {
                string_compare(a as *mut StringDescriptor, b as *mut StringDescriptor) == 0
            }
            (atom_kind::INT, atom_kind::INT) => a == b,
            (atom_kind::FLOAT, atom_kind::FLOAT) => {
                f64::from_bits(a as u64) == f64::from_bits(b as u64)
            }
            (atom_kind::INT, atom_kind::FLOAT) => (a as f64) == f64::from_bits(b as u64),
            (atom_kind::FLOAT, atom_kind::INT) => f64::from_bits(a as u64) == (b as f64),
            _ => false,
        }
    }
}

/// Create an untyped (heterogeneous) list.
#[unsafe(no_mangle)]
pub extern "C" fn list_create() -> *mut ListHeader {
    list_create_typed(atom_kind::ANY)
}

/// Create a list whose header records a fixed element kind.
#[unsafe(no_mangle)]
pub extern "C" fn list_create_typed(elem_kind: i32) -> *mut ListHeader {
    let header = Box::into_raw(Box::new(ListHeader {
        head: std::ptr::null_mut(),
        tail: std::ptr::null_mut(),
        length: 0,
        elem_kind,
        pad: 0,
    }));
    samm::register(samm::RootKind::List, header as *mut libc::c_void);
    header
}

/// Append to the tail. Retains string payloads.
///
/// # Safety
/// `l` must be a live list header.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn list_append(l: *mut ListHeader, kind: i32, payload: i64) {
    unsafe {
        retain_payload(kind, payload);
        let atom = new_atom(kind, payload);
        let list = &mut *l;
        if list.tail.is_null() {
            list.head = atom;
        } else {
            (*list.tail).next = atom;
        }
        list.tail = atom;
        list.length += 1;
    }
}

/// Prepend to the head. Retains string payloads.
///
/// # Safety
/// `l` must be a live list header.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn list_prepend(l: *mut ListHeader, kind: i32, payload: i64) {
    unsafe {
        retain_payload(kind, payload);
        let atom = new_atom(kind, payload);
        let list = &mut *l;
        (*atom).next = list.head;
        list.head = atom;
        if list.tail.is_null() {
            list.tail = atom;
        }
        list.length += 1;
    }
}

/// Insert at 0-based `index`, clamped to the list length.
///
/// # Safety
/// `l` must be a live list header.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn list_insert(l: *mut ListHeader, index: i64, kind: i32, payload: i64) {
    unsafe {
        let list = &mut *l;
        let index = index.clamp(0, list.length);
        if index == 0 {
            list_prepend(l, kind, payload);
            return;
        }
        if index == list.length {
            list_append(l, kind, payload);
            return;
        }
        retain_payload(kind, payload);
        let atom = new_atom(kind, payload);
        let mut prev = list.head;
        for _ in 1..index {
            prev = (*prev).next;
        }
        (*atom).next = (*prev).next;
        (*prev).next = atom;
        list.length += 1;
    }
}

/// Unlink and return the head payload (0 on empty). The atom itself stays
/// owned by its SAMM frame.
///
/// # Safety
/// `l` must be a live list header.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn list_shift(l: *mut ListHeader) -> i64 {
    unsafe {
        let list = &mut *l;
        if list.head.is_null() {
            return 0;
        }
        let atom = list.head;
        list.head = (*atom).next;
        if list.head.is_null() {
            list.tail = std::ptr::null_mut();
        }
        (*atom).next = std::ptr::null_mut();
        list.length -= 1;
        (*atom).payload
    }
}

/// Unlink and return the tail payload (0 on empty).
///
/// # Safety
/// `l` must be a live list header.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn list_pop(l: *mut ListHeader) -> i64 {
    unsafe {
        let list = &mut *l;
        if list.tail.is_null() {
            return 0;
        }
        let atom = list.tail;
        if list.head == atom {
            list.head = std::ptr::null_mut();
            list.tail = std::ptr::null_mut();
        } else {
            let mut prev = list.head;
            while (*prev).next != atom {
                prev = (*prev).next;
            }
            (*prev).next = std::ptr::null_mut();
            list.tail = prev;
        }
        list.length -= 1;
        (*atom).payload
    }
}

/// Unlink the atom at 0-based `index` and return its payload (0 when out
/// of range).
///
/// # Safety
/// `l` must be a live list header.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn list_remove(l: *mut ListHeader, index: i64) -> i64 {
    unsafe {
        let list = &mut *l;
        if index < 0 || index >= list.length {
            return 0;
        }
        if index == 0 {
            return list_shift(l);
        }
        let mut prev = list.head;
        for _ in 1..index {
            prev = (*prev).next;
        }
        let atom = (*prev).next;
        (*prev).next = (*atom).next;
        if list.tail == atom {
            list.tail = prev;
        }
        (*atom).next = std::ptr::null_mut();
        list.length -= 1;
        (*atom).payload
    }
}

/// Unlink every atom. Atom storage is reclaimed by the owning frames.
///
/// # Safety
/// `l` must be a live list header.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn list_clear(l: *mut ListHeader) {
    unsafe {
        let list = &mut *l;
        list.head = std::ptr::null_mut();
        list.tail = std::ptr::null_mut();
        list.length = 0;
    }
}

unsafe fn atom_at(l: *const ListHeader, index: i64) -> *const ListAtom {
    unsafe {
        let list = &*l;
        if index < 0 || index >= list.length {
            return std::ptr::null();
        }
        let mut atom = list.head as *const ListAtom;
        for _ in 0..index {
            atom = (*atom).next;
        }
        atom
    }
}

/// Payload at `index` as an integer (floats truncate, others read 0).
///
/// # Safety
/// `l` must be a live list header.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn list_get_int(l: *const ListHeader, index: i64) -> i64 {
    unsafe {
        let atom = atom_at(l, index);
        if atom.is_null() {
            return 0;
        }
        match (*atom).kind {
            atom_kind::INT => (*atom).payload,
            atom_kind::FLOAT => f64::from_bits((*atom).payload as u64) as i64,
            _ => 0,
        }
    }
}

/// Payload at `index` as a double (ints widen, others read 0.0).
///
/// # Safety
/// `l` must be a live list header.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn list_get_float(l: *const ListHeader, index: i64) -> f64 {
    unsafe {
        let atom = atom_at(l, index);
        if atom.is_null() {
            return 0.0;
        }
        match (*atom).kind {
            atom_kind::FLOAT => f64::from_bits((*atom).payload as u64),
            atom_kind::INT => (*atom).payload as f64,
            _ => 0.0,
        }
    }
}

/// String payload at `index`, or null for non-string atoms. Borrowed, not
/// retained.
///
/// # Safety
/// `l` must be a live list header.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn list_get_string(
    l: *const ListHeader,
    index: i64,
) -> *mut StringDescriptor {
    unsafe {
        let atom = atom_at(l, index);
        if !atom.is_null() && (*atom).kind == atom_kind::STRING {
            (*atom).payload as *mut StringDescriptor
        } else {
            std::ptr::null_mut()
        }
    }
}

/// Head payload, 0 on empty.
///
/// # Safety
/// `l` must be a live list header.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn list_head(l: *const ListHeader) -> i64 {
    unsafe {
        let list = &*l;
        if list.head.is_null() { 0 } else { (*list.head).payload }
    }
}

/// Begin iteration: the first atom, or null.
///
/// # Safety
/// `l` must be a live list header.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn list_iter_begin(l: *const ListHeader) -> *mut ListAtom {
    unsafe { (*l).head }
}

/// Advance iteration: the next atom, or null.
///
/// # Safety
/// `atom` must be a live atom.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn list_iter_next(atom: *const ListAtom) -> *mut ListAtom {
    unsafe { (*atom).next }
}

/// Deep copy: new header, new atoms, string payloads retained, nested
/// lists copied recursively.
///
/// # Safety
/// `l` must be a live list header.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn list_copy(l: *const ListHeader) -> *mut ListHeader {
    unsafe {
        let out = list_create_typed((*l).elem_kind);
        let mut atom = (*l).head as *const ListAtom;
        while !atom.is_null() {
            if (*atom).kind == atom_kind::LIST {
                let nested = list_copy((*atom).payload as *const ListHeader);
                list_append(out, atom_kind::LIST, nested as i64);
            } else {
                list_append(out, (*atom).kind, (*atom).payload);
            }
            atom = (*atom).next;
        }
        out
    }
}

/// A copy of everything but the head.
///
/// # Safety
/// `l` must be a live list header.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn list_rest(l: *const ListHeader) -> *mut ListHeader {
    unsafe {
        let out = list_create_typed((*l).elem_kind);
        let mut atom = if (*l).head.is_null() {
            std::ptr::null()
        } else {
            (*(*l).head).next as *const ListAtom
        };
        while !atom.is_null() {
            list_append(out, (*atom).kind, (*atom).payload);
            atom = (*atom).next;
        }
        out
    }
}

/// A reversed copy.
///
/// # Safety
/// `l` must be a live list header.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn list_reverse(l: *const ListHeader) -> *mut ListHeader {
    unsafe {
        let out = list_create_typed((*l).elem_kind);
        let mut atom = (*l).head as *const ListAtom;
        while !atom.is_null() {
            list_prepend(out, (*atom).kind, (*atom).payload);
            atom = (*atom).next;
        }
        out
    }
}

/// 1 when an equal payload exists.
///
/// # Safety
/// `l` must be a live list header; a string payload must be live.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn list_contains(l: *const ListHeader, kind: i32, payload: i64) -> i32 {
    unsafe { (list_indexof(l, kind, payload) >= 0) as i32 }
}

/// 0-based index of the first equal payload, -1 when absent.
///
/// # Safety
/// `l` must be a live list header; a string payload must be live.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn list_indexof(l: *const ListHeader, kind: i32, payload: i64) -> i64 {
    unsafe {
        let mut atom = (*l).head as *const ListAtom;
        let mut index = 0;
        while !atom.is_null() {
            if payload_equal((*atom).kind, (*atom).payload, kind, payload) {
                return index;
            }
            index += 1;
            atom = (*atom).next;
        }
        -1
    }
}

/// Join the items into one string with `sep` between them. Numeric atoms
/// format the way PRINT formats them.
///
/// # Safety
/// `l` must be a live list header, `sep` null or a live descriptor.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn list_join(
    l: *const ListHeader,
    sep: *mut StringDescriptor,
) -> *mut StringDescriptor {
    unsafe {
        let sep = crate::string::to_string(sep);
        let mut parts: Vec<String> = Vec::new();
        let mut atom = (*l).head as *const ListAtom;
        while !atom.is_null() {
            parts.push(match (*atom).kind {
                atom_kind::INT => (*atom).payload.to_string(),
                atom_kind::FLOAT => {
                    crate::io::format_double(f64::from_bits((*atom).payload as u64))
                }
                atom_kind::STRING => {
                    crate::string::to_string((*atom).payload as *const StringDescriptor)
                }
                _ => String::new(),
            });
            atom = (*atom).next;
        }
        crate::string::from_str(&parts.join(&sep))
    }
}

/// Free a whole list: atoms, their string payloads, and the header.
/// Only for lists that were never registered with SAMM (runtime-internal
/// use); SAMM-owned lists are reclaimed via the `*_from_samm` pair.
///
/// # Safety
/// `l` must be a live, unregistered list header.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn list_free(l: *mut ListHeader) {
    unsafe {
        let mut atom = (*l).head;
        while !atom.is_null() {
            let next = (*atom).next;
            list_atom_free_from_samm(atom);
            atom = next;
        }
        drop(Box::from_raw(l));
    }
}

/// SAMM pop path for a header: frees the header record alone, leaving the
/// atoms to their own frame entries.
///
/// # Safety
/// `l` must be a live list header owned by the popping frame.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn list_free_from_samm(l: *mut ListHeader) {
    unsafe { drop(Box::from_raw(l)) };
}

/// SAMM pop path for a single atom: releases its string payload and frees
/// the atom without touching its neighbours.
///
/// # Safety
/// `atom` must be a live atom owned by the popping frame.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn list_atom_free_from_samm(atom: *mut ListAtom) {
    unsafe {
        if (*atom).kind == atom_kind::STRING {
            string_release((*atom).payload as *mut StringDescriptor);
        }
        drop(Box::from_raw(atom));
    }
}

/// All atom pointers reachable from `l`. `samm_retain` moves these frame
/// entries together with the header's.
pub(crate) unsafe fn atom_ptrs(l: *const ListHeader) -> Vec<*mut ListAtom> {
    let mut out = Vec::new();
    unsafe {
        let mut atom = (*l).head;
        while !atom.is_null() {
            out.push(atom);
            if (*atom).kind == atom_kind::LIST {
                out.extend(atom_ptrs((*atom).payload as *const ListHeader));
            }
            atom = (*atom).next;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samm;
    use crate::string::{from_str, to_string};

    fn with_frame<F: FnOnce()>(f: F) {
        samm::samm_init();
        samm::samm_push();
        f();
        samm::samm_pop();
        samm::samm_shutdown();
    }

    #[test]
    fn append_prepend_order() {
        with_frame(|| unsafe {
            let l = list_create();
            list_append(l, atom_kind::INT, 2);
            list_append(l, atom_kind::INT, 3);
            list_prepend(l, atom_kind::INT, 1);
            assert_eq!((*l).length, 3);
            assert_eq!(list_get_int(l, 0), 1);
            assert_eq!(list_get_int(l, 1), 2);
            assert_eq!(list_get_int(l, 2), 3);
            assert_eq!(list_head(l), 1);
        });
    }

    #[test]
    fn insert_shift_pop_remove() {
        with_frame(|| unsafe {
            let l = list_create();
            for v in [10, 30, 40] {
                list_append(l, atom_kind::INT, v);
            }
            list_insert(l, 1, atom_kind::INT, 20);
            assert_eq!(list_get_int(l, 1), 20);
            assert_eq!(list_shift(l), 10);
            assert_eq!(list_pop(l), 40);
            assert_eq!(list_remove(l, 0), 20);
            assert_eq!((*l).length, 1);
            assert_eq!(list_get_int(l, 0), 30);
        });
    }

    #[test]
    fn iteration_walks_every_atom() {
        with_frame(|| unsafe {
            let l = list_create_typed(atom_kind::INT);
            for v in 1..=5 {
                list_append(l, atom_kind::INT, v);
            }
            let mut seen = Vec::new();
            let mut atom = list_iter_begin(l);
            while !atom.is_null() {
                seen.push((*atom).payload);
                atom = list_iter_next(atom);
            }
            assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        });
    }

    #[test]
    fn copy_is_deep_for_strings_and_sublists() {
        with_frame(|| unsafe {
            let inner = list_create();
            list_append(inner, atom_kind::INT, 7);
            let l = list_create();
            let s = from_str("item");
            list_append(l, atom_kind::STRING, s as i64);
            list_append(l, atom_kind::LIST, inner as i64);
            let c = list_copy(l);
            assert_eq!((*c).length, 2);
            assert_eq!(to_string(list_get_string(c, 0)), "item");
            // The nested list was copied, not shared.
            let copied_inner = atom_at(c, 1);
            assert_eq!((*copied_inner).kind, atom_kind::LIST);
            assert_ne!((*copied_inner).payload, inner as i64);
            assert_eq!(list_get_int((*copied_inner).payload as *const ListHeader, 0), 7);
        });
    }

    #[test]
    fn reverse_rest_contains_indexof() {
        with_frame(|| unsafe {
            let l = list_create();
            for v in [1, 2, 3] {
                list_append(l, atom_kind::INT, v);
            }
            let r = list_reverse(l);
            assert_eq!(list_get_int(r, 0), 3);
            assert_eq!(list_get_int(r, 2), 1);
            let rest = list_rest(l);
            assert_eq!((*rest).length, 2);
            assert_eq!(list_get_int(rest, 0), 2);
            assert_eq!(list_contains(l, atom_kind::INT, 2), 1);
            assert_eq!(list_contains(l, atom_kind::INT, 9), 0);
            assert_eq!(list_indexof(l, atom_kind::INT, 3), 2);
            assert_eq!(list_indexof(l, atom_kind::INT, 9), -1);
            // Mixed numeric equality.
            list_append(l, atom_kind::FLOAT, 4.0f64.to_bits() as i64);
            assert_eq!(list_contains(l, atom_kind::INT, 4), 1);
        });
    }

    #[test]
    fn join_formats_like_print() {
        with_frame(|| unsafe {
            let l = list_create();
            list_append(l, atom_kind::INT, 1);
            list_append(l, atom_kind::FLOAT, 2.5f64.to_bits() as i64);
            list_append(l, atom_kind::STRING, from_str("x") as i64);
            let joined = list_join(l, from_str(", "));
            assert_eq!(to_string(joined), "1, 2.5, x");
        });
    }

    #[test]
    fn scope_pop_reclaims_lists_without_explicit_free() {
        // No asserts beyond not crashing: the frame owns header and atoms
        // and releases them exactly once.
        with_frame(|| unsafe {
            let l = list_create();
            for i in 0..100 {
                list_append(l, atom_kind::INT, i);
            }
            list_clear(l);
            list_append(l, atom_kind::STRING, from_str("tail") as i64);
        });
    }
}
