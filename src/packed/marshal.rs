//! Sequence marshaling - native sequences ↔ transport records
//!
//! Design: flatten into one contiguous value array per nesting level. Every
//! buffer the flat view points into (nested records, string copies, callable
//! copies) is owned by the outermost `ManagedSequence`, so the whole view
//! stays valid exactly as long as it does.

use core::ffi::c_void;
use core::fmt;
use std::ffi::{CStr, CString};

use super::arg::{Arg, FromArg};
use super::extension::{ExtRef, Extension, OwnedExt};
use super::func::PackedFunc;
use super::types::{Integer, PackedSequence, PackedValue, TypeCode, TypeTag};
use crate::errors::{PackedError, PackedResult};

/// Buffers kept alive on behalf of a flattened sequence
#[derive(Default)]
pub struct Keepalive {
    strings: Vec<CString>,
    funcs: Vec<Box<PackedFunc>>,
    nested: Vec<Box<ManagedSequence>>,
    exts: Vec<OwnedExt>,
}

impl Keepalive {
    fn keep_string(&mut self, value: CString) -> PackedValue {
        let packed = PackedValue::str(value.as_ptr());
        self.strings.push(value);
        packed
    }

    fn keep_func(&mut self, value: PackedFunc) -> PackedValue {
        let boxed = Box::new(value);
        let packed = PackedValue::func(&*boxed);
        self.funcs.push(boxed);
        packed
    }

    fn keep_ext(&mut self, value: OwnedExt) -> PackedValue {
        let packed = PackedValue::ptr(value.as_ptr());
        self.exts.push(value);
        packed
    }

    fn keep_nested(&mut self, value: ManagedSequence) -> PackedValue {
        let boxed = Box::new(value);
        let packed = PackedValue::seq(boxed.record());
        self.nested.push(boxed);
        packed
    }
}

/// Native values that can be stored as one element of a flattened sequence
pub trait Pack: TypeCode {
    /// Convert to a value, parking any backing buffer in `keep`
    fn pack(&self, keep: &mut Keepalive) -> PackedResult<PackedValue>;
}

/// Owned transport record plus everything it points into
pub struct ManagedSequence {
    record: PackedSequence,
    values: Vec<PackedValue>,
    keep: Keepalive,
}

impl ManagedSequence {
    /// Flatten a native sequence
    ///
    /// Nested sequences are flattened first and parented to the new record.
    pub fn from_slice<T: Pack>(items: &[T]) -> PackedResult<Self> {
        let mut keep = Keepalive::default();
        let values = items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                item.pack(&mut keep)
                    .map_err(|err| PackedError::sequence_element(index, err))
            })
            .collect::<PackedResult<Vec<_>>>()?;

        // Moving `values` below keeps its heap buffer where `data` points.
        let record = PackedSequence {
            data: values.as_ptr(),
            len: values.len(),
            tag: T::DECLARED.code(),
        };

        Ok(Self { record, values, keep })
    }

    /// Transport record describing the flattened view
    #[inline]
    pub fn record(&self) -> &PackedSequence {
        &self.record
    }

    #[inline]
    pub fn element_tag(&self) -> PackedResult<TypeTag> {
        self.record.element_tag()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of nested records owned directly by this one
    #[inline]
    pub fn nested_len(&self) -> usize {
        self.keep.nested.len()
    }

    /// Unflatten back into a native sequence
    pub fn to_vec<'a, T>(&'a self) -> PackedResult<Vec<T>>
    where
        T: FromArg<'a> + TypeCode,
    {
        unflatten(&self.record)
    }
}

impl fmt::Debug for ManagedSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedSequence")
            .field("tag", &self.record.tag)
            .field("len", &self.record.len)
            .field("nested", &self.keep.nested.len())
            .finish()
    }
}

impl TypeCode for ManagedSequence {
    const DECLARED: TypeTag = TypeTag::Sequence;
}

/// Rebuild a native sequence from a transport record
///
/// The requested element type's tag must equal the record's element tag
/// exactly; nested records are unflattened recursively.
pub fn unflatten<'a, T>(record: &'a PackedSequence) -> PackedResult<Vec<T>>
where
    T: FromArg<'a> + TypeCode,
{
    if record.tag != T::DECLARED.code() {
        return Err(PackedError::type_mismatch(
            T::DECLARED,
            record.element_tag()?,
        ));
    }

    let values = unsafe { record.values() };
    values
        .iter()
        .enumerate()
        .map(|(index, value)| {
            let element = unsafe { Arg::from_raw(record.tag, *value) };
            T::from_arg(&element).map_err(|err| PackedError::sequence_element(index, err))
        })
        .collect()
}

// ============================================================================
// Element conversions
// ============================================================================

macro_rules! pack_integer {
    ($($t:ty),* $(,)?) => {$(
        impl Pack for $t {
            #[inline]
            fn pack(&self, _keep: &mut Keepalive) -> PackedResult<PackedValue> {
                Ok(PackedValue::int64(self.to_storage()?))
            }
        }
    )*};
}

pack_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl Pack for bool {
    #[inline]
    fn pack(&self, _keep: &mut Keepalive) -> PackedResult<PackedValue> {
        Ok(PackedValue::int64(i64::from(*self)))
    }
}

impl Pack for f32 {
    #[inline]
    fn pack(&self, _keep: &mut Keepalive) -> PackedResult<PackedValue> {
        Ok(PackedValue::float64(f64::from(*self)))
    }
}

impl Pack for f64 {
    #[inline]
    fn pack(&self, _keep: &mut Keepalive) -> PackedResult<PackedValue> {
        Ok(PackedValue::float64(*self))
    }
}

impl Pack for *mut c_void {
    #[inline]
    fn pack(&self, _keep: &mut Keepalive) -> PackedResult<PackedValue> {
        Ok(PackedValue::ptr(*self))
    }
}

impl Pack for str {
    fn pack(&self, keep: &mut Keepalive) -> PackedResult<PackedValue> {
        Ok(keep.keep_string(CString::new(self)?))
    }
}

impl Pack for String {
    fn pack(&self, keep: &mut Keepalive) -> PackedResult<PackedValue> {
        self.as_str().pack(keep)
    }
}

impl Pack for CStr {
    fn pack(&self, keep: &mut Keepalive) -> PackedResult<PackedValue> {
        Ok(keep.keep_string(self.to_owned()))
    }
}

impl Pack for CString {
    fn pack(&self, keep: &mut Keepalive) -> PackedResult<PackedValue> {
        self.as_c_str().pack(keep)
    }
}

impl Pack for PackedFunc {
    fn pack(&self, keep: &mut Keepalive) -> PackedResult<PackedValue> {
        Ok(keep.keep_func(self.clone()))
    }
}

/// Extension elements are copied: a view may not outlive its object.
impl<T: Extension> Pack for ExtRef<'_, T> {
    fn pack(&self, keep: &mut Keepalive) -> PackedResult<PackedValue> {
        Ok(keep.keep_ext(OwnedExt::copy_of(self.get())))
    }
}

impl<T: Pack + ?Sized> Pack for &T {
    #[inline]
    fn pack(&self, keep: &mut Keepalive) -> PackedResult<PackedValue> {
        (**self).pack(keep)
    }
}

impl<T: Pack> Pack for [T] {
    fn pack(&self, keep: &mut Keepalive) -> PackedResult<PackedValue> {
        Ok(keep.keep_nested(ManagedSequence::from_slice(self)?))
    }
}

impl<T: Pack> Pack for Vec<T> {
    fn pack(&self, keep: &mut Keepalive) -> PackedResult<PackedValue> {
        self.as_slice().pack(keep)
    }
}

impl<T> TypeCode for [T] {
    const DECLARED: TypeTag = TypeTag::Sequence;
}

impl<T> TypeCode for Vec<T> {
    const DECLARED: TypeTag = TypeTag::Sequence;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::packed::extension::register_extension_type;
    use crate::packed::{RawTag, RetValue};

    static LIVE_MARKERS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug)]
    struct Marker {
        label: String,
    }

    impl Marker {
        fn new(label: &str) -> Self {
            LIVE_MARKERS.fetch_add(1, Ordering::SeqCst);
            Self { label: label.to_string() }
        }
    }

    impl Clone for Marker {
        fn clone(&self) -> Self {
            Self::new(&self.label)
        }
    }

    impl Drop for Marker {
        fn drop(&mut self) {
            LIVE_MARKERS.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl Extension for Marker {
        const TYPE_CODE: RawTag = 94;
        const NAME: &'static str = "Marker";
    }

    #[test]
    fn test_extension_elements_outlive_their_objects() {
        register_extension_type::<Marker>().unwrap();
        let body = PackedFunc::new(|_, ret| {
            let first = Marker::new("left");
            let second = Marker::new("right");
            ret.reset(vec![ExtRef::new(&first), ExtRef::new(&second)])
        });

        let ret: RetValue = body.call(()).unwrap();
        assert_eq!(LIVE_MARKERS.load(Ordering::SeqCst), 2);
        let views: Vec<ExtRef<'_, Marker>> = ret.get().unwrap();
        let labels: Vec<&str> = views.iter().map(|view| view.label.as_str()).collect();
        assert_eq!(labels, vec!["left", "right"]);

        drop(ret);
        assert_eq!(LIVE_MARKERS.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_flatten_scalars() {
        let seq = ManagedSequence::from_slice(&[1i32, 2, 3]).unwrap();
        assert_eq!(seq.len(), 3);
        assert_eq!(seq.element_tag().unwrap(), TypeTag::Int64);
        assert_eq!(seq.nested_len(), 0);
        assert_eq!(seq.to_vec::<i64>().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_flatten_nested_keeps_inner_records() {
        let rows = vec![vec![1i64, 2, 3], vec![4], vec![]];
        let seq = ManagedSequence::from_slice(&rows).unwrap();
        assert_eq!(seq.element_tag().unwrap(), TypeTag::Sequence);
        assert_eq!(seq.nested_len(), 3);
        assert_eq!(seq.to_vec::<Vec<i64>>().unwrap(), rows);
    }

    #[test]
    fn test_flatten_strings_owns_copies() {
        let seq = {
            let words = vec![String::from("alpha"), String::from("beta")];
            ManagedSequence::from_slice(&words).unwrap()
        };
        assert_eq!(seq.to_vec::<String>().unwrap(), vec!["alpha", "beta"]);
        assert_eq!(seq.to_vec::<&str>().unwrap(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_interior_nul_reports_element() {
        let err = ManagedSequence::from_slice(&["ok", "bad\0"]).unwrap_err();
        assert!(matches!(err, PackedError::SequenceElement { index: 1, .. }));
        assert!(matches!(err.root_cause(), PackedError::InteriorNul { position: 3 }));
    }

    #[test]
    fn test_unflatten_requires_exact_element_tag() {
        let seq = ManagedSequence::from_slice(&[1.5f64, 2.5]).unwrap();
        assert!(matches!(
            seq.to_vec::<i64>(),
            Err(PackedError::TypeMismatch { expected: TypeTag::Int64, found: TypeTag::Float64 })
        ));
        assert!(matches!(
            seq.to_vec::<Vec<f64>>(),
            Err(PackedError::TypeMismatch { expected: TypeTag::Sequence, found: TypeTag::Float64 })
        ));
    }

    #[test]
    fn test_unflatten_inner_mismatch_is_wrapped() {
        let rows = vec![vec![1i64], vec![2]];
        let seq = ManagedSequence::from_slice(&rows).unwrap();
        let err = seq.to_vec::<Vec<String>>().unwrap_err();
        assert!(matches!(err, PackedError::SequenceElement { index: 0, .. }));
        assert!(matches!(err.root_cause(), PackedError::TypeMismatch { .. }));
    }

    #[test]
    fn test_empty_sequence_keeps_tag() {
        let empty: Vec<String> = Vec::new();
        let seq = ManagedSequence::from_slice(&empty).unwrap();
        assert!(seq.is_empty());
        assert_eq!(seq.element_tag().unwrap(), TypeTag::String);
        assert!(seq.to_vec::<String>().unwrap().is_empty());
    }
}
