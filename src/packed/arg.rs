//! Argument views - borrowed (tag, value) pairs
//!
//! Construction never copies the referent; extraction checks the tag before
//! touching the union. Native call arguments that need a backing buffer
//! (strings needing a NUL, sequences needing flattening) are staged in an
//! `ArgSlot` that lives for the duration of the call.

use core::ffi::c_void;
use core::marker::PhantomData;
use std::ffi::{CStr, CString};

use smallvec::SmallVec;

use super::extension::{ExtRef, Extension};
use super::func::PackedFunc;
use super::marshal::{unflatten, ManagedSequence, Pack};
use super::types::{Integer, PackedSequence, PackedValue, RawTag, TypeCode, TypeTag};
use crate::errors::{PackedError, PackedResult};

/// Borrowed argument view
///
/// Valid only as long as whatever the value points at.
#[derive(Debug, Clone, Copy)]
pub struct Arg<'a> {
    tag: RawTag,
    value: PackedValue,
    _marker: PhantomData<&'a ()>,
}

impl<'a> Arg<'a> {
    /// Pair a raw tag with a raw value
    ///
    /// # Safety
    /// `value` must hold the field selected by `tag`, and any referent must
    /// outlive `'a`.
    #[inline]
    pub const unsafe fn from_raw(tag: RawTag, value: PackedValue) -> Self {
        Self {
            tag,
            value,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub const fn from_i64(value: i64) -> Self {
        unsafe { Self::from_raw(TypeTag::Int64.code(), PackedValue::int64(value)) }
    }

    #[inline]
    pub const fn from_f64(value: f64) -> Self {
        unsafe { Self::from_raw(TypeTag::Float64.code(), PackedValue::float64(value)) }
    }

    /// Untyped pointer; the view never dereferences it
    #[inline]
    pub const fn from_ptr(value: *mut c_void) -> Self {
        unsafe { Self::from_raw(TypeTag::Pointer.code(), PackedValue::ptr(value)) }
    }

    #[inline]
    pub fn from_cstr(value: &'a CStr) -> Self {
        unsafe { Self::from_raw(TypeTag::String.code(), PackedValue::str(value.as_ptr())) }
    }

    #[inline]
    pub fn from_func(value: &'a PackedFunc) -> Self {
        unsafe { Self::from_raw(TypeTag::Function.code(), PackedValue::func(value)) }
    }

    #[inline]
    pub fn from_record(record: &'a PackedSequence) -> Self {
        unsafe { Self::from_raw(TypeTag::Sequence.code(), PackedValue::seq(record)) }
    }

    #[inline]
    pub fn from_sequence(value: &'a ManagedSequence) -> Self {
        Self::from_record(value.record())
    }

    /// Extension object, tagged with its registered id
    #[inline]
    pub fn from_ext<T: Extension>(value: ExtRef<'a, T>) -> Self {
        unsafe { Self::from_raw(T::TAG.code(), PackedValue::ptr(value.as_ptr())) }
    }

    #[inline]
    pub const fn raw_tag(&self) -> RawTag {
        self.tag
    }

    #[inline]
    pub fn tag(&self) -> PackedResult<TypeTag> {
        TypeTag::from_code(self.tag)
    }

    #[inline]
    pub const fn value(&self) -> PackedValue {
        self.value
    }

    /// Extract as a native value, checking the tag first
    #[inline]
    pub fn extract<T: FromArg<'a>>(&self) -> PackedResult<T> {
        T::from_arg(self)
    }

    /// Fail with `TypeMismatch` unless the view carries `expected`
    pub fn expect_tag(&self, expected: TypeTag) -> PackedResult<()> {
        if self.tag == expected.code() {
            Ok(())
        } else {
            Err(PackedError::type_mismatch(expected, self.tag()?))
        }
    }
}

/// Native types readable from an argument view
pub trait FromArg<'a>: Sized {
    fn from_arg(arg: &Arg<'a>) -> PackedResult<Self>;
}

macro_rules! integer_from_arg {
    ($($t:ty),* $(,)?) => {$(
        impl<'a> FromArg<'a> for $t {
            #[inline]
            fn from_arg(arg: &Arg<'a>) -> PackedResult<Self> {
                arg.expect_tag(TypeTag::Int64)?;
                <$t>::from_storage(unsafe { arg.value.v_int64 })
            }
        }
    )*};
}

integer_from_arg!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl<'a> FromArg<'a> for bool {
    #[inline]
    fn from_arg(arg: &Arg<'a>) -> PackedResult<Self> {
        arg.expect_tag(TypeTag::Int64)?;
        Ok(unsafe { arg.value.v_int64 } != 0)
    }
}

impl<'a> FromArg<'a> for f64 {
    #[inline]
    fn from_arg(arg: &Arg<'a>) -> PackedResult<Self> {
        arg.expect_tag(TypeTag::Float64)?;
        Ok(unsafe { arg.value.v_float64 })
    }
}

/// Narrowing rounds to the nearest `f32`; only finite values past
/// `f32::MAX` are rejected. NaN and infinities carry over.
impl<'a> FromArg<'a> for f32 {
    #[inline]
    fn from_arg(arg: &Arg<'a>) -> PackedResult<Self> {
        let value = f64::from_arg(arg)?;
        if value.is_finite() && value.abs() > f64::from(f32::MAX) {
            return Err(PackedError::FloatOutOfRange { value, target: "f32" });
        }
        Ok(value as f32)
    }
}

impl<'a> FromArg<'a> for *mut c_void {
    #[inline]
    fn from_arg(arg: &Arg<'a>) -> PackedResult<Self> {
        arg.expect_tag(TypeTag::Pointer)?;
        Ok(unsafe { arg.value.v_ptr })
    }
}

impl<'a> FromArg<'a> for &'a CStr {
    fn from_arg(arg: &Arg<'a>) -> PackedResult<Self> {
        arg.expect_tag(TypeTag::String)?;
        let ptr = unsafe { arg.value.v_str };
        if ptr.is_null() {
            return Err(PackedError::NullPointer { tag: TypeTag::String });
        }
        Ok(unsafe { CStr::from_ptr(ptr) })
    }
}

impl<'a> FromArg<'a> for &'a str {
    fn from_arg(arg: &Arg<'a>) -> PackedResult<Self> {
        Ok(<&CStr>::from_arg(arg)?.to_str()?)
    }
}

impl<'a> FromArg<'a> for String {
    fn from_arg(arg: &Arg<'a>) -> PackedResult<Self> {
        <&str>::from_arg(arg).map(str::to_owned)
    }
}

impl<'a> FromArg<'a> for CString {
    fn from_arg(arg: &Arg<'a>) -> PackedResult<Self> {
        <&CStr>::from_arg(arg).map(CStr::to_owned)
    }
}

impl<'a> FromArg<'a> for &'a PackedFunc {
    fn from_arg(arg: &Arg<'a>) -> PackedResult<Self> {
        arg.expect_tag(TypeTag::Function)?;
        unsafe { arg.value.v_func.as_ref() }
            .ok_or(PackedError::NullPointer { tag: TypeTag::Function })
    }
}

/// Shares the body of the referenced callable
impl<'a> FromArg<'a> for PackedFunc {
    fn from_arg(arg: &Arg<'a>) -> PackedResult<Self> {
        <&PackedFunc>::from_arg(arg).map(PackedFunc::clone)
    }
}

impl<'a> FromArg<'a> for &'a PackedSequence {
    fn from_arg(arg: &Arg<'a>) -> PackedResult<Self> {
        arg.expect_tag(TypeTag::Sequence)?;
        unsafe { arg.value.v_seq.as_ref() }
            .ok_or(PackedError::NullPointer { tag: TypeTag::Sequence })
    }
}

/// Deep copy of a (possibly nested) sequence
impl<'a, T> FromArg<'a> for Vec<T>
where
    T: FromArg<'a> + TypeCode,
{
    fn from_arg(arg: &Arg<'a>) -> PackedResult<Self> {
        unflatten(<&PackedSequence>::from_arg(arg)?)
    }
}

impl<'a, T: Extension> FromArg<'a> for ExtRef<'a, T> {
    fn from_arg(arg: &Arg<'a>) -> PackedResult<Self> {
        let tag = T::TAG;
        arg.expect_tag(tag)?;
        unsafe { ExtRef::from_raw(arg.value.v_ptr) }.ok_or(PackedError::NullPointer { tag })
    }
}

/// Void; any tag is accepted
impl<'a> FromArg<'a> for () {
    #[inline]
    fn from_arg(_arg: &Arg<'a>) -> PackedResult<Self> {
        Ok(())
    }
}

impl<'a> FromArg<'a> for Arg<'a> {
    #[inline]
    fn from_arg(arg: &Arg<'a>) -> PackedResult<Self> {
        Ok(*arg)
    }
}

// ============================================================================
// Native call arguments
// ============================================================================

/// One staged argument of a native-looking call
#[derive(Debug)]
pub enum ArgSlot<'a> {
    /// Already a view, nothing to keep alive
    View(Arg<'a>),
    /// NUL-terminated copy of a Rust string
    Str(CString),
    /// Callable passed by value
    Func(PackedFunc),
    /// Flattened sequence
    Seq(ManagedSequence),
}

impl<'a> ArgSlot<'a> {
    /// View of the staged argument, valid while the slot is
    pub fn as_arg(&self) -> Arg<'_> {
        match self {
            Self::View(arg) => *arg,
            Self::Str(value) => Arg::from_cstr(value),
            Self::Func(value) => Arg::from_func(value),
            Self::Seq(value) => Arg::from_sequence(value),
        }
    }
}

/// Native values usable as call arguments
pub trait IntoArgSlot<'a> {
    fn into_slot(self) -> PackedResult<ArgSlot<'a>>;
}

macro_rules! integer_into_slot {
    ($($t:ty),* $(,)?) => {$(
        impl<'a> IntoArgSlot<'a> for $t {
            #[inline]
            fn into_slot(self) -> PackedResult<ArgSlot<'a>> {
                Ok(ArgSlot::View(Arg::from_i64(self.to_storage()?)))
            }
        }
    )*};
}

integer_into_slot!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl<'a> IntoArgSlot<'a> for bool {
    #[inline]
    fn into_slot(self) -> PackedResult<ArgSlot<'a>> {
        Ok(ArgSlot::View(Arg::from_i64(i64::from(self))))
    }
}

impl<'a> IntoArgSlot<'a> for f64 {
    #[inline]
    fn into_slot(self) -> PackedResult<ArgSlot<'a>> {
        Ok(ArgSlot::View(Arg::from_f64(self)))
    }
}

impl<'a> IntoArgSlot<'a> for f32 {
    #[inline]
    fn into_slot(self) -> PackedResult<ArgSlot<'a>> {
        Ok(ArgSlot::View(Arg::from_f64(f64::from(self))))
    }
}

impl<'a> IntoArgSlot<'a> for *mut c_void {
    #[inline]
    fn into_slot(self) -> PackedResult<ArgSlot<'a>> {
        Ok(ArgSlot::View(Arg::from_ptr(self)))
    }
}

impl<'a> IntoArgSlot<'a> for &str {
    fn into_slot(self) -> PackedResult<ArgSlot<'a>> {
        Ok(ArgSlot::Str(CString::new(self)?))
    }
}

impl<'a> IntoArgSlot<'a> for String {
    fn into_slot(self) -> PackedResult<ArgSlot<'a>> {
        Ok(ArgSlot::Str(CString::new(self)?))
    }
}

impl<'a> IntoArgSlot<'a> for &String {
    fn into_slot(self) -> PackedResult<ArgSlot<'a>> {
        self.as_str().into_slot()
    }
}

impl<'a> IntoArgSlot<'a> for CString {
    #[inline]
    fn into_slot(self) -> PackedResult<ArgSlot<'a>> {
        Ok(ArgSlot::Str(self))
    }
}

impl<'a> IntoArgSlot<'a> for &'a CStr {
    #[inline]
    fn into_slot(self) -> PackedResult<ArgSlot<'a>> {
        Ok(ArgSlot::View(Arg::from_cstr(self)))
    }
}

impl<'a> IntoArgSlot<'a> for &'a PackedFunc {
    #[inline]
    fn into_slot(self) -> PackedResult<ArgSlot<'a>> {
        Ok(ArgSlot::View(Arg::from_func(self)))
    }
}

impl<'a> IntoArgSlot<'a> for PackedFunc {
    #[inline]
    fn into_slot(self) -> PackedResult<ArgSlot<'a>> {
        Ok(ArgSlot::Func(self))
    }
}

impl<'a, T: Pack> IntoArgSlot<'a> for &[T] {
    fn into_slot(self) -> PackedResult<ArgSlot<'a>> {
        Ok(ArgSlot::Seq(ManagedSequence::from_slice(self)?))
    }
}

impl<'a, T: Pack> IntoArgSlot<'a> for &Vec<T> {
    fn into_slot(self) -> PackedResult<ArgSlot<'a>> {
        self.as_slice().into_slot()
    }
}

impl<'a, T: Pack> IntoArgSlot<'a> for Vec<T> {
    fn into_slot(self) -> PackedResult<ArgSlot<'a>> {
        self.as_slice().into_slot()
    }
}

impl<'a> IntoArgSlot<'a> for ManagedSequence {
    #[inline]
    fn into_slot(self) -> PackedResult<ArgSlot<'a>> {
        Ok(ArgSlot::Seq(self))
    }
}

impl<'a> IntoArgSlot<'a> for &'a ManagedSequence {
    #[inline]
    fn into_slot(self) -> PackedResult<ArgSlot<'a>> {
        Ok(ArgSlot::View(Arg::from_sequence(self)))
    }
}

impl<'a, T: Extension> IntoArgSlot<'a> for ExtRef<'a, T> {
    #[inline]
    fn into_slot(self) -> PackedResult<ArgSlot<'a>> {
        Ok(ArgSlot::View(Arg::from_ext(self)))
    }
}

impl<'a> IntoArgSlot<'a> for Arg<'a> {
    #[inline]
    fn into_slot(self) -> PackedResult<ArgSlot<'a>> {
        Ok(ArgSlot::View(self))
    }
}

/// Staged argument list, inline up to four arguments
pub type ArgSlots<'a> = SmallVec<[ArgSlot<'a>; 4]>;

/// Argument lists accepted by native-looking calls
pub trait IntoArgs<'a> {
    fn into_slots(self) -> PackedResult<ArgSlots<'a>>;
}

impl<'a> IntoArgs<'a> for () {
    #[inline]
    fn into_slots(self) -> PackedResult<ArgSlots<'a>> {
        Ok(SmallVec::new())
    }
}

impl<'a> IntoArgs<'a> for Vec<ArgSlot<'a>> {
    #[inline]
    fn into_slots(self) -> PackedResult<ArgSlots<'a>> {
        Ok(SmallVec::from_vec(self))
    }
}

macro_rules! tuple_into_args {
    ($($name:ident),+) => {
        impl<'a, $($name: IntoArgSlot<'a>),+> IntoArgs<'a> for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_slots(self) -> PackedResult<ArgSlots<'a>> {
                let ($($name,)+) = self;
                let mut slots = SmallVec::new();
                $(slots.push($name.into_slot()?);)+
                Ok(slots)
            }
        }
    };
}

tuple_into_args!(A);
tuple_into_args!(A, B);
tuple_into_args!(A, B, C);
tuple_into_args!(A, B, C, D);
tuple_into_args!(A, B, C, D, E);
tuple_into_args!(A, B, C, D, E, F);
tuple_into_args!(A, B, C, D, E, F, G);
tuple_into_args!(A, B, C, D, E, F, G, H);
