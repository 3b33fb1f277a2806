//! FasterBASIC shared ABI definitions.
//!
//! The code generator and the runtime library hard-code the same descriptor
//! layouts, element-type codes, and error codes. Both crates depend on this
//! one so a layout change is a single edit, and the runtime asserts its
//! `#[repr(C)]` structs against these constants at compile time.
//!
//! Nothing here allocates or does I/O; it is a table of agreed numbers.

/// Byte offsets into the 56-byte array descriptor.
///
/// The emitter computes element addresses from these without calling into
/// the runtime; the runtime's `ArrayDescriptor` struct must match exactly.
pub mod array_desc {
    /// Pointer to element storage.
    pub const DATA_POINTER: i32 = 0;
    /// Total element count (i64).
    pub const LENGTH: i32 = 8;
    /// Lower bound of dimension 1 (i32).
    pub const LOWER_BOUND_1: i32 = 16;
    /// Upper bound of dimension 1 (i32).
    pub const UPPER_BOUND_1: i32 = 20;
    /// Lower bound of dimension 2, 0 for rank-1 arrays (i32).
    pub const LOWER_BOUND_2: i32 = 24;
    /// Upper bound of dimension 2, 0 for rank-1 arrays (i32).
    pub const UPPER_BOUND_2: i32 = 28;
    /// Element type code (i32), one of [`ElementType`].
    pub const ELEMENT_TYPE: i32 = 32;
    /// Bytes per element (i32). Note offset 40, not 24.
    pub const ELEMENT_SIZE: i32 = 40;
    /// Rank: 1 or 2 (i32).
    pub const DIMENSIONS: i32 = 48;
    /// Flag bits (i32), see [`flags`].
    pub const FLAGS: i32 = 52;
    /// Total descriptor size in bytes.
    pub const SIZE: i32 = 56;
}

/// Array descriptor flag bits.
pub mod flags {
    /// Set while a REDIM PRESERVE is copying the old storage.
    pub const PRESERVE: i32 = 1 << 0;
    /// Elements are string descriptors the array owns a refcount on.
    pub const STRING_OWNING: i32 = 1 << 1;
}

/// Element type codes stored in descriptor field `ELEMENT_TYPE` and passed
/// to `array_descriptor_alloc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ElementType {
    Byte = 1,
    Short = 2,
    Int32 = 3,
    Int64 = 4,
    Single = 5,
    Double = 6,
    Str = 7,
    Udt = 8,
}

impl ElementType {
    /// Bytes per element. UDT size is carried in the descriptor, not here.
    pub fn size(self) -> i32 {
        match self {
            ElementType::Byte => 1,
            ElementType::Short => 2,
            ElementType::Int32 | ElementType::Single => 4,
            ElementType::Int64 | ElementType::Double | ElementType::Str => 8,
            ElementType::Udt => 0,
        }
    }

    /// Decode a descriptor field value.
    pub fn from_code(code: i32) -> Option<ElementType> {
        Some(match code {
            1 => ElementType::Byte,
            2 => ElementType::Short,
            3 => ElementType::Int32,
            4 => ElementType::Int64,
            5 => ElementType::Single,
            6 => ElementType::Double,
            7 => ElementType::Str,
            8 => ElementType::Udt,
            _ => return None,
        })
    }
}

/// Stable runtime error codes raised via `basic_throw` and observed through
/// `ERR()`. User THROW codes pass through unchanged; these are the codes the
/// runtime itself raises.
pub mod error_code {
    pub const DIVISION_BY_ZERO: i32 = 1;
    pub const SUBSCRIPT_OUT_OF_RANGE: i32 = 2;
    pub const TYPE_CONVERSION: i32 = 3;
    pub const BAD_FILE_CHANNEL: i32 = 4;
    pub const FILE_IO: i32 = 5;
    pub const OUT_OF_DATA: i32 = 6;
    pub const REDIM_MISMATCH: i32 = 7;
    pub const GOSUB_UNDERFLOW: i32 = 8;
}

/// Number of open file channels the runtime's channel table holds.
/// Channel numbers in OPEN/CLOSE/PRINT#/INPUT# are 1-based and must be
/// below this bound.
pub const MAX_CHANNELS: usize = 16;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_field_offsets_are_the_published_abi() {
        assert_eq!(array_desc::DATA_POINTER, 0);
        assert_eq!(array_desc::LENGTH, 8);
        assert_eq!(array_desc::LOWER_BOUND_1, 16);
        assert_eq!(array_desc::UPPER_BOUND_1, 20);
        assert_eq!(array_desc::LOWER_BOUND_2, 24);
        assert_eq!(array_desc::UPPER_BOUND_2, 28);
        assert_eq!(array_desc::ELEMENT_TYPE, 32);
        assert_eq!(array_desc::ELEMENT_SIZE, 40);
        assert_eq!(array_desc::DIMENSIONS, 48);
        assert_eq!(array_desc::FLAGS, 52);
        assert_eq!(array_desc::SIZE, 56);
    }

    #[test]
    fn element_sizes() {
        assert_eq!(ElementType::Byte.size(), 1);
        assert_eq!(ElementType::Short.size(), 2);
        assert_eq!(ElementType::Int32.size(), 4);
        assert_eq!(ElementType::Single.size(), 4);
        assert_eq!(ElementType::Int64.size(), 8);
        assert_eq!(ElementType::Double.size(), 8);
        assert_eq!(ElementType::Str.size(), 8);
    }

    #[test]
    fn element_type_round_trip() {
        for code in 1..=8 {
            let ty = ElementType::from_code(code).unwrap();
            assert_eq!(ty as i32, code);
        }
        assert!(ElementType::from_code(0).is_none());
        assert!(ElementType::from_code(9).is_none());
    }
}
