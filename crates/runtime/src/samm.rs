//! SAMM: scope-aware memory management.
//!
//! Each lexical scope that can allocate heap roots gets a frame on a
//! process-wide stack. Allocating runtime functions register their result in
//! the current frame; popping a frame releases every root it still owns.
//! `samm_retain` lifts a root into the enclosing frame, which is how values
//! escape the scope that built them (function returns, RETAIN).
//!
//! Frames compose with per-descriptor refcounts: a string shared across
//! frames has refcount > 1 and only dies when its last owning frame pops.

use std::cell::RefCell;

/// What kind of heap root a frame entry is, which decides how pop frees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    Str,
    Array,
    Map,
    List,
    ListAtom,
}

struct Root {
    kind: RootKind,
    ptr: *mut libc::c_void,
}

thread_local! {
    static FRAMES: RefCell<Vec<Vec<Root>>> = const { RefCell::new(Vec::new()) };
}

/// Register a freshly allocated heap root in the current frame.
///
/// Called by the allocating runtime functions themselves, so emitted code
/// never has to pair an allocation with a registration. Outside any frame
/// (runtime not initialised, or shutdown in progress) the root is untracked
/// and the caller keeps sole ownership.
pub fn register(kind: RootKind, ptr: *mut libc::c_void) {
    if ptr.is_null() {
        return;
    }
    FRAMES.with(|frames| {
        if let Some(frame) = frames.borrow_mut().last_mut() {
            frame.push(Root { kind, ptr });
        }
    });
}

fn release_root(root: &Root) {
    unsafe {
        match root.kind {
            RootKind::Str => crate::string::string_release(root.ptr as *mut _),
            RootKind::Array => crate::array::free_from_samm(root.ptr as *mut _),
            RootKind::Map => crate::hashmap::hashmap_free(root.ptr as *mut _),
            RootKind::List => crate::list::list_free_from_samm(root.ptr as *mut _),
            RootKind::ListAtom => crate::list::list_atom_free_from_samm(root.ptr as *mut _),
        }
    }
}

/// Initialise the scope stack with the program-lifetime frame.
#[unsafe(no_mangle)]
pub extern "C" fn samm_init() {
    FRAMES.with(|frames| {
        let mut frames = frames.borrow_mut();
        frames.clear();
        frames.push(Vec::new());
    });
}

/// Pop every remaining frame, releasing all roots. Idempotent.
#[unsafe(no_mangle)]
pub extern "C" fn samm_shutdown() {
    FRAMES.with(|frames| {
        let mut frames = frames.borrow_mut();
        while let Some(frame) = frames.pop() {
            for root in frame.iter().rev() {
                release_root(root);
            }
        }
    });
}

/// Enter a scope.
#[unsafe(no_mangle)]
pub extern "C" fn samm_push() {
    FRAMES.with(|frames| frames.borrow_mut().push(Vec::new()));
}

/// Leave a scope, releasing every root the frame still owns.
#[unsafe(no_mangle)]
pub extern "C" fn samm_pop() {
    FRAMES.with(|frames| {
        let frame = frames.borrow_mut().pop();
        if let Some(frame) = frame {
            // Reverse order: later allocations may reference earlier ones.
            for root in frame.iter().rev() {
                release_root(root);
            }
        }
    });
}

/// Transfer ownership of `ptr` from the current frame to its parent.
///
/// For list headers the list's registered atoms move with it, so the atoms
/// survive exactly as long as the header does.
///
/// # Safety
/// `ptr` must be a root registered in the current frame (or null / already
/// escaped, in which case this is a no-op).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn samm_retain(ptr: *mut libc::c_void) {
    if ptr.is_null() {
        return;
    }
    FRAMES.with(|frames| {
        let mut frames = frames.borrow_mut();
        let depth = frames.len();
        if depth < 2 {
            return;
        }
        let top = depth - 1;
        let mut moved: Vec<Root> = Vec::new();
        {
            let frame = &mut frames[top];
            let Some(pos) = frame.iter().position(|r| r.ptr == ptr) else {
                return;
            };
            let root = frame.remove(pos);
            let atom_ptrs = if root.kind == RootKind::List {
                unsafe { crate::list::atom_ptrs(root.ptr as *mut _) }
            } else {
                Vec::new()
            };
            moved.push(root);
            if !atom_ptrs.is_empty() {
                let mut i = 0;
                while i < frame.len() {
                    if frame[i].kind == RootKind::ListAtom
                        && atom_ptrs.contains(&(frame[i].ptr as *mut crate::list::ListAtom))
                    {
                        moved.push(frame.remove(i));
                    } else {
                        i += 1;
                    }
                }
            }
        }
        frames[top - 1].extend(moved);
    });
}

/// C-ABI registration entry point, for runtime extensions that allocate on
/// behalf of emitted code.
///
/// # Safety
/// `kind` must be a valid root kind code (1..=5) and `ptr` a live heap root
/// of that kind.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn samm_register(kind: i32, ptr: *mut libc::c_void) {
    let kind = match kind {
        1 => RootKind::Str,
        2 => RootKind::Array,
        3 => RootKind::Map,
        4 => RootKind::List,
        5 => RootKind::ListAtom,
        _ => return,
    };
    register(kind, ptr);
}

/// Current frame depth. The exception machinery records this at TRY entry
/// and unwinds back to it on THROW.
pub fn depth() -> usize {
    FRAMES.with(|frames| frames.borrow().len())
}

/// Pop frames until `target` frames remain, releasing roots as each frame
/// goes. Used by THROW between the throw site and the catching TRY.
pub fn unwind_to(target: usize) {
    while depth() > target {
        samm_pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::string::{from_str, string_retain};

    #[test]
    fn pop_releases_frame_roots() {
        samm_init();
        samm_push();
        let s = from_str("scoped");
        unsafe {
            // A second reference that outlives the frame.
            string_retain(s);
        }
        assert_eq!(unsafe { (*s).refcount }, 2);
        samm_pop();
        assert_eq!(unsafe { (*s).refcount }, 1);
        unsafe { crate::string::string_release(s) };
        samm_shutdown();
    }

    #[test]
    fn retain_lifts_to_parent_frame() {
        samm_init();
        samm_push();
        samm_push();
        let s = from_str("escapes");
        unsafe { samm_retain(s as *mut _) };
        samm_pop();
        // Still alive: the parent frame owns it now.
        assert_eq!(unsafe { (*s).refcount }, 1);
        assert_eq!(unsafe { crate::string::to_string(s) }, "escapes");
        samm_pop();
        samm_shutdown();
    }

    #[test]
    fn depth_tracks_frames() {
        samm_init();
        assert_eq!(depth(), 1);
        samm_push();
        samm_push();
        assert_eq!(depth(), 3);
        unwind_to(1);
        assert_eq!(depth(), 1);
        samm_shutdown();
        assert_eq!(depth(), 0);
    }
}
