//! String-keyed hashmaps.
//!
//! Open addressing with linear probing. Capacity is always a power of two
//! and the table grows at 70% load (tombstones included). Values are a
//! tagged 64-bit payload so integer, float, and string-descriptor values
//! all fit one slot.
//!
//! Slot indices are computed with **unsigned** remainder. A signed `rem` on
//! a hash above 2^31 yields a negative index and silently corrupts the
//! table; `u64` arithmetic makes that class of bug unrepresentable here,
//! and the large-hash test below pins it.

use crate::samm;
use crate::string::{StringDescriptor, string_compare, string_release, string_retain};

/// Value kind tags for the tagged payload.
pub mod value_kind {
    pub const INT: i32 = 1;
    pub const FLOAT: i32 = 2;
    pub const STRING: i32 = 3;
}

const INITIAL_CAPACITY: usize = 16;
/// Grow when used slots exceed capacity * 7 / 10.
const LOAD_NUM: usize = 7;
const LOAD_DEN: usize = 10;

enum Slot {
    Empty,
    Tombstone,
    Occupied {
        hash: u32,
        key: *mut StringDescriptor,
        kind: i32,
        payload: i64,
    },
}

/// Map object. Opaque to emitted code, which only carries the pointer.
pub struct BasicHashMap {
    slots: Vec<Slot>,
    live: usize,
    used: usize,
}

/// FNV-1a over the key's code points, 32 bits, the hash width the slot
/// index contract is specified against.
pub(crate) fn hash_key(key: *const StringDescriptor) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    if key.is_null() {
        return hash;
    }
    unsafe {
        let desc = &*key;
        for i in 0..desc.length {
            let cp = *desc.data.add(i as usize);
            for byte in cp.to_le_bytes() {
                hash ^= byte as u32;
                hash = hash.wrapping_mul(0x01000193);
            }
        }
    }
    hash
}

impl BasicHashMap {
    fn new() -> Self {
        BasicHashMap {
            slots: (0..INITIAL_CAPACITY).map(|_| Slot::Empty).collect(),
            live: 0,
            used: 0,
        }
    }

    /// Find the slot holding `key`, or the insertion slot for it.
    /// Returns (index, occupied).
    fn probe(&self, hash: u32, key: *mut StringDescriptor) -> (usize, bool) {
        let cap = self.slots.len() as u64;
        // Unsigned remainder: hashes above 2^31 must map to valid slots.
        let mut idx = (hash as u64 % cap) as usize;
        let mut first_free: Option<usize> = None;
        loop {
            match &self.slots[idx] {
                Slot::Empty => return (first_free.unwrap_or(idx), false),
                Slot::Tombstone => {
                    first_free.get_or_insert(idx);
                }
                Slot::Occupied { hash: h, key: k, .. } => {
                    if *h == hash && unsafe { string_compare(*k, key) } == 0 {
                        return (idx, true);
                    }
                }
            }
            idx = (idx as u64 + 1).rem_euclid(cap) as usize;
        }
    }

    fn grow(&mut self) {
        let new_cap = self.slots.len() * 2;
        let old = std::mem::replace(
            &mut self.slots,
            (0..new_cap).map(|_| Slot::Empty).collect(),
        );
        self.used = self.live;
        for slot in old {
            if let Slot::Occupied { hash, key, kind, payload } = slot {
                let cap = self.slots.len() as u64;
                let mut idx = (hash as u64 % cap) as usize;
                while !matches!(self.slots[idx], Slot::Empty) {
                    idx = (idx as u64 + 1).rem_euclid(cap) as usize;
                }
                self.slots[idx] = Slot::Occupied { hash, key, kind, payload };
            }
        }
    }
}

unsafe fn release_payload(kind: i32, payload: i64) {
    if kind == value_kind::STRING {
        unsafe { string_release(payload as *mut StringDescriptor) };
    }
}

/// Allocate an empty map and register it in the current SAMM frame.
#[unsafe(no_mangle)]
pub extern "C" fn hashmap_new() -> *mut BasicHashMap {
    let map = Box::into_raw(Box::new(BasicHashMap::new()));
    samm::register(samm::RootKind::Map, map as *mut libc::c_void);
    map
}

/// Insert or replace. The map retains the key and any string payload;
/// a replaced string payload is released.
///
/// # Safety
/// `m` must be a live map, `key` a live string descriptor.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hashmap_put(
    m: *mut BasicHashMap,
    key: *mut StringDescriptor,
    kind: i32,
    payload: i64,
) {
    unsafe {
        let map = &mut *m;
        if (map.used + 1) * LOAD_DEN > map.slots.len() * LOAD_NUM {
            map.grow();
        }
        let hash = hash_key(key);
        let (idx, occupied) = map.probe(hash, key);
        if kind == value_kind::STRING {
            string_retain(payload as *mut StringDescriptor);
        }
        if occupied {
            if let Slot::Occupied { kind: old_kind, payload: old_payload, .. } = &mut map.slots[idx]
            {
                release_payload(*old_kind, *old_payload);
                *old_kind = kind;
                *old_payload = payload;
            }
        } else {
            string_retain(key);
            let was_empty = matches!(map.slots[idx], Slot::Empty);
            map.slots[idx] = Slot::Occupied { hash, key, kind, payload };
            map.live += 1;
            if was_empty {
                map.used += 1;
            }
        }
    }
}

/// Look up `key`. Returns the payload, or 0 (null for strings) when absent.
///
/// # Safety
/// `m` must be a live map, `key` a live string descriptor.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hashmap_get(m: *mut BasicHashMap, key: *mut StringDescriptor) -> i64 {
    unsafe {
        let map = &*m;
        let (idx, occupied) = map.probe(hash_key(key), key);
        if occupied {
            if let Slot::Occupied { payload, .. } = map.slots[idx] {
                return payload;
            }
        }
        0
    }
}

/// 1 when `key` is present, else 0.
///
/// # Safety
/// `m` must be a live map, `key` a live string descriptor.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hashmap_haskey(m: *mut BasicHashMap, key: *mut StringDescriptor) -> i32 {
    unsafe {
        let map = &*m;
        let (_, occupied) = map.probe(hash_key(key), key);
        occupied as i32
    }
}

/// Remove `key`, releasing the map's references. Returns 1 if it existed.
///
/// # Safety
/// `m` must be a live map, `key` a live string descriptor.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hashmap_remove(m: *mut BasicHashMap, key: *mut StringDescriptor) -> i32 {
    unsafe {
        let map = &mut *m;
        let (idx, occupied) = map.probe(hash_key(key), key);
        if !occupied {
            return 0;
        }
        if let Slot::Occupied { key: k, kind, payload, .. } =
            std::mem::replace(&mut map.slots[idx], Slot::Tombstone)
        {
            string_release(k);
            release_payload(kind, payload);
        }
        map.live -= 1;
        1
    }
}

/// Number of live entries.
///
/// # Safety
/// `m` must be a live map.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hashmap_size(m: *mut BasicHashMap) -> i64 {
    unsafe { (*m).live as i64 }
}

/// Remove every entry, releasing keys and string payloads.
///
/// # Safety
/// `m` must be a live map.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hashmap_clear(m: *mut BasicHashMap) {
    unsafe {
        let map = &mut *m;
        for slot in &mut map.slots {
            if let Slot::Occupied { key, kind, payload, .. } =
                std::mem::replace(slot, Slot::Empty)
            {
                string_release(key);
                release_payload(kind, payload);
            }
        }
        map.live = 0;
        map.used = 0;
    }
}

/// Free the map and everything it retains. SAMM pop path.
///
/// # Safety
/// `m` must be a live map owned by the caller.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hashmap_free(m: *mut BasicHashMap) {
    unsafe {
        hashmap_clear(m);
        drop(Box::from_raw(m));
    }
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
    fn put_get_round_trip() {
        with_frame(|| unsafe {
            let m = hashmap_new();
            let alice = from_str("Alice");
            let bob = from_str("Bob");
            hashmap_put(m, alice, value_kind::STRING, from_str("A") as i64);
            hashmap_put(m, bob, value_kind::STRING, from_str("B") as i64);
            let got = hashmap_get(m, bob) as *mut StringDescriptor;
            assert_eq!(to_string(got), "B");
            assert_eq!(hashmap_size(m), 2);
            assert_eq!(hashmap_haskey(m, alice), 1);
            let missing = from_str("Carol");
            assert_eq!(hashmap_haskey(m, missing), 0);
            assert_eq!(hashmap_get(m, missing), 0);
        });
    }

    #[test]
    fn replace_keeps_one_entry() {
        with_frame(|| unsafe {
            let m = hashmap_new();
            let k = from_str("key");
            hashmap_put(m, k, value_kind::INT, 1);
            hashmap_put(m, k, value_kind::INT, 2);
            assert_eq!(hashmap_size(m), 1);
            assert_eq!(hashmap_get(m, k), 2);
        });
    }

    #[test]
    fn remove_and_reinsert_through_tombstone() {
        with_frame(|| unsafe {
            let m = hashmap_new();
            let k = from_str("gone");
            hashmap_put(m, k, value_kind::INT, 7);
            assert_eq!(hashmap_remove(m, k), 1);
            assert_eq!(hashmap_remove(m, k), 0);
            assert_eq!(hashmap_haskey(m, k), 0);
            hashmap_put(m, k, value_kind::INT, 8);
            assert_eq!(hashmap_get(m, k), 8);
            assert_eq!(hashmap_size(m), 1);
        });
    }

    #[test]
    fn large_hashes_index_correct_slots() {
        // The regression this pins: a signed remainder on a hash above
        // 2^31 produced a negative slot index. Six independent maps, 40+
        // keys each, with proof that the key set includes large hashes.
        with_frame(|| unsafe {
            let maps: Vec<_> = (0..6).map(|_| hashmap_new()).collect();
            let mut saw_large_hash = false;
            for (mi, &m) in maps.iter().enumerate() {
                for i in 0..48 {
                    let key = from_str(&format!("key-{}-{}", mi, i));
                    if hash_key(key) >= 0x8000_0000 {
                        saw_large_hash = true;
                    }
                    hashmap_put(m, key, value_kind::INT, (mi * 1000 + i) as i64);
                }
            }
            assert!(saw_large_hash, "test corpus must include hashes above 2^31");
            for (mi, &m) in maps.iter().enumerate() {
                assert_eq!(hashmap_size(m), 48);
                for i in 0..48 {
                    let key = from_str(&format!("key-{}-{}", mi, i));
                    assert_eq!(hashmap_get(m, key), (mi * 1000 + i) as i64);
                }
            }
        });
    }

    #[test]
    fn growth_preserves_entries() {
        with_frame(|| unsafe {
            let m = hashmap_new();
            for i in 0..200 {
                let key = from_str(&format!("k{}", i));
                hashmap_put(m, key, value_kind::INT, i);
            }
            assert_eq!(hashmap_size(m), 200);
            assert!((*m).slots.len().is_power_of_two());
            assert!((*m).slots.len() >= 256);
            for i in 0..200 {
                let key = from_str(&format!("k{}", i));
                assert_eq!(hashmap_get(m, key), i);
            }
        });
    }

    #[test]
    fn clear_empties_the_map() {
        with_frame(|| unsafe {
            let m = hashmap_new();
            for i in 0..10 {
                hashmap_put(m, from_str(&format!("c{}", i)), value_kind::INT, i);
            }
            hashmap_clear(m);
            assert_eq!(hashmap_size(m), 0);
            assert_eq!(hashmap_haskey(m, from_str("c3")), 0);
        });
    }
}
