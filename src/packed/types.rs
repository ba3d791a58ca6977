//! Tag and value model for the packed calling convention
//!
//! Defines the fixed-layout representation shared with out-of-module callers:
//! a small closed set of tags, one 8-byte value union and the sequence
//! transport record.

use core::ffi::{c_char, c_void};
use core::fmt;
use std::ffi::{CStr, CString};

use super::func::PackedFunc;
use crate::errors::{PackedError, PackedResult};

/// Wire representation of a tag
pub type RawTag = u32;

/// First tag available to host-registered extension types
pub const EXTENSION_START: RawTag = 32;

/// Size in bytes of a `PackedValue` on both sides of the boundary
pub const VALUE_SIZE: usize = 8;

/// Alignment of a `PackedValue` on both sides of the boundary
pub const VALUE_ALIGN: usize = core::mem::align_of::<u64>();

const _: () = assert!(core::mem::size_of::<PackedValue>() == VALUE_SIZE);
const _: () = assert!(core::mem::align_of::<PackedValue>() == VALUE_ALIGN);

/// Type tag selecting the meaningful field of a `PackedValue`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Unknown,
    Int64,
    Float64,
    Pointer,
    String,
    Function,
    Sequence,
    /// Host-registered opaque type, always carried as a pointer
    ///
    /// The code is at or above `EXTENSION_START`; build it with
    /// [`TypeTag::extension`] or `Extension::TAG` rather than by hand.
    Extension(RawTag),
}

impl TypeTag {
    /// Wire code of this tag
    #[inline]
    pub const fn code(self) -> RawTag {
        match self {
            Self::Unknown => 0,
            Self::Int64 => 1,
            Self::Float64 => 2,
            Self::Pointer => 3,
            Self::String => 4,
            Self::Function => 5,
            Self::Sequence => 6,
            Self::Extension(code) => code,
        }
    }

    /// Decode a wire code
    ///
    /// Codes in the reserved gap between the built-ins and the extension
    /// range have no meaning and are rejected.
    pub fn from_code(code: RawTag) -> PackedResult<Self> {
        match code {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Int64),
            2 => Ok(Self::Float64),
            3 => Ok(Self::Pointer),
            4 => Ok(Self::String),
            5 => Ok(Self::Function),
            6 => Ok(Self::Sequence),
            c => Self::extension(c),
        }
    }

    /// Extension tag for `code`, rejecting codes that would alias a built-in
    /// or fall in the reserved gap
    pub const fn extension(code: RawTag) -> PackedResult<Self> {
        if is_extension(code) {
            Ok(Self::Extension(code))
        } else {
            Err(PackedError::UnsupportedConversion { tag: code })
        }
    }

    /// Check if tag lies in the extension range
    #[inline]
    pub const fn is_extension(self) -> bool {
        matches!(self, Self::Extension(_))
    }

    /// Tag describing how a value of this tag is stored
    #[inline]
    pub const fn storage(self) -> Self {
        match self {
            Self::Extension(_) => Self::Pointer,
            other => other,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Int64 => write!(f, "Int64"),
            Self::Float64 => write!(f, "Float64"),
            Self::Pointer => write!(f, "Pointer"),
            Self::String => write!(f, "String"),
            Self::Function => write!(f, "Function"),
            Self::Sequence => write!(f, "Sequence"),
            Self::Extension(code) => write!(f, "Extension({})", code),
        }
    }
}

/// Check if a wire code lies in the extension range
#[inline]
pub const fn is_extension(code: RawTag) -> bool {
    code >= EXTENSION_START
}

/// Packed value (untagged union)
///
/// Never self-describing: only meaningful alongside the tag it travels with.
#[repr(C)]
pub union PackedValue {
    pub v_int64: i64,
    pub v_float64: f64,
    pub v_ptr: *mut c_void,
    pub v_str: *const c_char,
    pub v_func: *const PackedFunc,
    pub v_seq: *const PackedSequence,
}

impl PackedValue {
    #[inline]
    pub const fn int64(v_int64: i64) -> Self {
        Self { v_int64 }
    }

    #[inline]
    pub const fn float64(v_float64: f64) -> Self {
        Self { v_float64 }
    }

    #[inline]
    pub const fn ptr(v_ptr: *mut c_void) -> Self {
        Self { v_ptr }
    }

    #[inline]
    pub const fn str(v_str: *const c_char) -> Self {
        Self { v_str }
    }

    #[inline]
    pub const fn func(v_func: *const PackedFunc) -> Self {
        Self { v_func }
    }

    #[inline]
    pub const fn seq(v_seq: *const PackedSequence) -> Self {
        Self { v_seq }
    }

    /// All-zero value, used for `Unknown`
    #[inline]
    pub const fn null() -> Self {
        Self { v_int64: 0 }
    }
}

impl Default for PackedValue {
    #[inline]
    fn default() -> Self {
        Self::null()
    }
}

// Manual implementations for Copy, Clone, and Debug since union doesn't auto-derive
impl Copy for PackedValue {}
impl Clone for PackedValue {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl fmt::Debug for PackedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Every field is 8 bytes of plain data, so the integer view is always initialized.
        write!(f, "PackedValue {{ bits: {:#018x} }}", unsafe { self.v_int64 })
    }
}

/// Sequence transport record
///
/// A contiguous array of values sharing one element tag. For a sequence of
/// sequences the element tag is `Sequence` and every element points at a
/// nested record.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PackedSequence {
    pub data: *const PackedValue,
    pub len: usize,
    pub tag: RawTag,
}

impl PackedSequence {
    /// Declared tag shared by all elements
    #[inline]
    pub fn element_tag(&self) -> PackedResult<TypeTag> {
        TypeTag::from_code(self.tag)
    }

    /// View the element values
    ///
    /// # Safety
    /// `data` must point to `len` initialized values that outlive `'a`.
    pub unsafe fn values<'a>(&self) -> &'a [PackedValue] {
        if self.len == 0 || self.data.is_null() {
            &[]
        } else {
            core::slice::from_raw_parts(self.data, self.len)
        }
    }
}

/// Compile-time mapping from a native type to its tags
///
/// Types with no mapping simply don't implement this trait, so an unsupported
/// shape is rejected where the conversion is requested.
pub trait TypeCode {
    /// Tag callers see
    const DECLARED: TypeTag;
    /// Tag selecting the meaningful `PackedValue` field
    const STORAGE: TypeTag = Self::DECLARED.storage();
}

impl<T: TypeCode + ?Sized> TypeCode for &T {
    const DECLARED: TypeTag = T::DECLARED;
}

/// Integer widths that all share the `Int64` storage representation
pub(crate) trait Integer: Copy {
    fn to_storage(self) -> PackedResult<i64>;
    fn from_storage(value: i64) -> PackedResult<Self>;
}

macro_rules! integer_code {
    ($($t:ty),* $(,)?) => {$(
        impl TypeCode for $t {
            const DECLARED: TypeTag = TypeTag::Int64;
        }

        impl Integer for $t {
            #[inline]
            fn to_storage(self) -> PackedResult<i64> {
                i64::try_from(self).map_err(|_| PackedError::IntegerOverflow {
                    value: self as i128,
                    target: "i64",
                })
            }

            #[inline]
            fn from_storage(value: i64) -> PackedResult<Self> {
                <$t>::try_from(value).map_err(|_| PackedError::IntegerOverflow {
                    value: value as i128,
                    target: stringify!($t),
                })
            }
        }
    )*};
}

integer_code!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl TypeCode for bool {
    const DECLARED: TypeTag = TypeTag::Int64;
}

impl TypeCode for f32 {
    const DECLARED: TypeTag = TypeTag::Float64;
}

impl TypeCode for f64 {
    const DECLARED: TypeTag = TypeTag::Float64;
}

impl TypeCode for *mut c_void {
    const DECLARED: TypeTag = TypeTag::Pointer;
}

impl TypeCode for str {
    const DECLARED: TypeTag = TypeTag::String;
}

impl TypeCode for String {
    const DECLARED: TypeTag = TypeTag::String;
}

impl TypeCode for CStr {
    const DECLARED: TypeTag = TypeTag::String;
}

impl TypeCode for CString {
    const DECLARED: TypeTag = TypeTag::String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_codes_round_trip() {
        for code in 0..=6 {
            assert_eq!(TypeTag::from_code(code).unwrap().code(), code);
        }
        assert_eq!(TypeTag::from_code(32).unwrap(), TypeTag::Extension(32));
    }

    #[test]
    fn test_reserved_gap_rejected() {
        for code in 7..EXTENSION_START {
            assert!(matches!(
                TypeTag::from_code(code),
                Err(PackedError::UnsupportedConversion { tag }) if tag == code
            ));
        }
    }

    #[test]
    fn test_extension_constructor_guards_builtin_codes() {
        assert!(matches!(
            TypeTag::extension(TypeTag::Int64.code()),
            Err(PackedError::UnsupportedConversion { tag: 1 })
        ));
        assert!(TypeTag::extension(EXTENSION_START - 1).is_err());
        assert_eq!(TypeTag::extension(EXTENSION_START).unwrap(), TypeTag::Extension(32));
    }

    #[test]
    fn test_extension_storage_is_pointer() {
        let tag = TypeTag::Extension(40);
        assert!(tag.is_extension());
        assert_eq!(tag.storage(), TypeTag::Pointer);
        assert_eq!(TypeTag::String.storage(), TypeTag::String);
    }

    #[test]
    fn test_integer_storage_tags() {
        assert_eq!(<i8 as TypeCode>::STORAGE, TypeTag::Int64);
        assert_eq!(<u32 as TypeCode>::STORAGE, TypeTag::Int64);
        assert_eq!(<bool as TypeCode>::DECLARED, TypeTag::Int64);
        assert_eq!(<&str as TypeCode>::DECLARED, TypeTag::String);
    }

    #[test]
    fn test_integer_range_checks() {
        assert!(u64::MAX.to_storage().is_err());
        assert_eq!(7u64.to_storage().unwrap(), 7);
        assert!(matches!(
            i8::from_storage(300),
            Err(PackedError::IntegerOverflow { target: "i8", .. })
        ));
        assert_eq!(u16::from_storage(65535).unwrap(), 65535);
    }

    #[test]
    fn test_empty_sequence_values() {
        let record = PackedSequence { data: core::ptr::null(), len: 0, tag: TypeTag::Int64.code() };
        assert!(unsafe { record.values() }.is_empty());
    }
}
