//! Return values - (tag, value) plus an optional ownership box
//!
//! Design: the owned payload lives beside the value and the value points
//! into it. Overwriting or dropping the `RetValue` drops the payload, so it
//! is released exactly once. Without a payload the value is borrowed and the
//! producer keeps the referent alive.

use core::ffi::c_void;
use core::fmt;
use core::ptr::NonNull;
use std::ffi::{CStr, CString};

use super::arg::{Arg, FromArg};
use super::extension::{extension_descriptor, Extension, OwnedExt};
use super::func::PackedFunc;
use super::marshal::{ManagedSequence, Pack};
use super::types::{Integer, PackedValue, RawTag, TypeTag};
use crate::errors::{PackedError, PackedResult};

/// Payload owned by a return value
///
/// Payloads are held only so the value's pointer stays valid.
#[allow(dead_code)]
enum Owned {
    Str(CString),
    Func(Box<PackedFunc>),
    Seq(Box<ManagedSequence>),
    Ext(OwnedExt),
}

impl Owned {
    fn kind(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Func(_) => "function",
            Self::Seq(_) => "sequence",
            Self::Ext(_) => "extension",
        }
    }
}

/// Owned return value
pub struct RetValue {
    tag: RawTag,
    value: PackedValue,
    owned: Option<Owned>,
}

impl Default for RetValue {
    /// `Unknown`, what a body that sets nothing returns
    fn default() -> Self {
        Self {
            tag: TypeTag::Unknown.code(),
            value: PackedValue::null(),
            owned: None,
        }
    }
}

impl RetValue {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn scalar(tag: TypeTag, value: PackedValue) -> Self {
        Self {
            tag: tag.code(),
            value,
            owned: None,
        }
    }

    fn owned(tag: RawTag, value: PackedValue, owned: Owned) -> Self {
        Self {
            tag,
            value,
            owned: Some(owned),
        }
    }

    fn owned_str(value: CString) -> Self {
        let packed = PackedValue::str(value.as_ptr());
        Self::owned(TypeTag::String.code(), packed, Owned::Str(value))
    }

    fn owned_func(value: Box<PackedFunc>) -> Self {
        let packed = PackedValue::func(&*value);
        Self::owned(TypeTag::Function.code(), packed, Owned::Func(value))
    }

    fn owned_seq(value: Box<ManagedSequence>) -> Self {
        let packed = PackedValue::seq(value.record());
        Self::owned(TypeTag::Sequence.code(), packed, Owned::Seq(value))
    }

    #[inline]
    pub fn raw_tag(&self) -> RawTag {
        self.tag
    }

    #[inline]
    pub fn tag(&self) -> PackedResult<TypeTag> {
        TypeTag::from_code(self.tag)
    }

    #[inline]
    pub fn value(&self) -> PackedValue {
        self.value
    }

    /// Whether the payload is owned (as opposed to borrowed or scalar)
    #[inline]
    pub fn is_owned(&self) -> bool {
        self.owned.is_some()
    }

    /// Borrowed view of the stored value
    #[inline]
    pub fn as_arg(&self) -> Arg<'_> {
        unsafe { Arg::from_raw(self.tag, self.value) }
    }

    /// Extract as a native value, checking the tag first
    #[inline]
    pub fn get<'r, T: FromArg<'r>>(&'r self) -> PackedResult<T> {
        T::from_arg(&self.as_arg())
    }

    /// Store a native value, releasing any previous payload
    ///
    /// On error the previous contents are left untouched.
    pub fn reset<T: IntoRet>(&mut self, value: T) -> PackedResult<()> {
        *self = value.into_ret()?;
        Ok(())
    }

    /// Move the contents of `other` into `self`, leaving `other` as `Unknown`
    pub fn reset_from(&mut self, other: &mut RetValue) {
        *self = core::mem::take(other);
    }

    /// Back to `Unknown`, releasing any payload
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Hand out the (tag, value) pair together with its ownership
    ///
    /// The caller becomes responsible for the payload; it is reclaimed by
    /// passing the box back to `drop`.
    pub fn into_raw_parts(self: Box<Self>) -> (RawTag, PackedValue, *mut RetValue) {
        let tag = self.tag;
        let value = self.value;
        (tag, value, Box::into_raw(self))
    }

    /// Point at a string without copying it
    ///
    /// # Safety
    /// `value` must outlive every reader of this return value.
    pub unsafe fn set_str_borrowed(&mut self, value: &CStr) {
        *self = Self::scalar(TypeTag::String, PackedValue::str(value.as_ptr()));
    }

    /// Point at a callable without copying it
    ///
    /// # Safety
    /// `value` must outlive every reader of this return value.
    pub unsafe fn set_func_borrowed(&mut self, value: &PackedFunc) {
        *self = Self::scalar(TypeTag::Function, PackedValue::func(value));
    }

    /// Store an extension object according to its registered descriptor
    ///
    /// Types registered with `copy_on_return` are copied into an owned box;
    /// others are borrowed.
    ///
    /// # Safety
    /// For borrowed types `value` must outlive every reader.
    pub unsafe fn set_ext<T: Extension>(&mut self, value: &T) -> PackedResult<()> {
        self.set_ext_raw(T::TAG.code(), value as *const T as *mut c_void)
    }

    /// Store a raw extension pointer according to the descriptor for `tag`
    ///
    /// # Safety
    /// `ptr` must point to an object of the type registered under `tag`,
    /// and for borrowed types outlive every reader.
    pub unsafe fn set_ext_raw(&mut self, tag: RawTag, ptr: *mut c_void) -> PackedResult<()> {
        let descriptor =
            extension_descriptor(tag).ok_or(PackedError::ExtensionNotRegistered { tag })?;

        if !descriptor.copy_on_return {
            *self = Self { tag, value: PackedValue::ptr(ptr), owned: None };
            return Ok(());
        }

        let copy = NonNull::new((descriptor.copy)(ptr))
            .ok_or(PackedError::NullPointer { tag: descriptor.type_tag() })?;
        let owned = OwnedExt::from_raw(copy, descriptor.delete);
        *self = Self::owned(tag, PackedValue::ptr(owned.as_ptr()), Owned::Ext(owned));
        Ok(())
    }

    /// Store an extension object owned by this return value
    pub fn set_ext_owned<T: Extension>(&mut self, value: Box<T>) {
        let owned = OwnedExt::boxed(value);
        *self = Self::owned(T::TAG.code(), PackedValue::ptr(owned.as_ptr()), Owned::Ext(owned));
    }

    /// Hand an extension object to the consumer
    ///
    /// Nothing here releases it; the consumer passes it to a releasing
    /// callable or leaks it.
    pub fn set_ext_transfer<T: Extension>(&mut self, value: Box<T>) {
        let ptr = Box::into_raw(value) as *mut c_void;
        *self = Self { tag: T::TAG.code(), value: PackedValue::ptr(ptr), owned: None };
    }
}

impl fmt::Debug for RetValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("RetValue");
        match self.tag() {
            Ok(tag) => out.field("tag", &tag),
            Err(_) => out.field("tag", &self.tag),
        };
        out.field("value", &self.value)
            .field("owned", &self.owned.as_ref().map(Owned::kind))
            .finish()
    }
}

/// Native values that can become a return value
pub trait IntoRet {
    fn into_ret(self) -> PackedResult<RetValue>;
}

macro_rules! integer_into_ret {
    ($($t:ty),* $(,)?) => {$(
        impl IntoRet for $t {
            #[inline]
            fn into_ret(self) -> PackedResult<RetValue> {
                Ok(RetValue::scalar(TypeTag::Int64, PackedValue::int64(self.to_storage()?)))
            }
        }
    )*};
}

integer_into_ret!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl IntoRet for bool {
    #[inline]
    fn into_ret(self) -> PackedResult<RetValue> {
        Ok(RetValue::scalar(TypeTag::Int64, PackedValue::int64(i64::from(self))))
    }
}

impl IntoRet for f64 {
    #[inline]
    fn into_ret(self) -> PackedResult<RetValue> {
        Ok(RetValue::scalar(TypeTag::Float64, PackedValue::float64(self)))
    }
}

impl IntoRet for f32 {
    #[inline]
    fn into_ret(self) -> PackedResult<RetValue> {
        f64::from(self).into_ret()
    }
}

impl IntoRet for *mut c_void {
    #[inline]
    fn into_ret(self) -> PackedResult<RetValue> {
        Ok(RetValue::scalar(TypeTag::Pointer, PackedValue::ptr(self)))
    }
}

impl IntoRet for CString {
    fn into_ret(self) -> PackedResult<RetValue> {
        Ok(RetValue::owned_str(self))
    }
}

impl IntoRet for &CStr {
    fn into_ret(self) -> PackedResult<RetValue> {
        self.to_owned().into_ret()
    }
}

impl IntoRet for String {
    fn into_ret(self) -> PackedResult<RetValue> {
        CString::new(self)?.into_ret()
    }
}

impl IntoRet for &str {
    fn into_ret(self) -> PackedResult<RetValue> {
        CString::new(self)?.into_ret()
    }
}

impl IntoRet for &String {
    fn into_ret(self) -> PackedResult<RetValue> {
        self.as_str().into_ret()
    }
}

impl IntoRet for PackedFunc {
    fn into_ret(self) -> PackedResult<RetValue> {
        Ok(RetValue::owned_func(Box::new(self)))
    }
}

impl IntoRet for &PackedFunc {
    fn into_ret(self) -> PackedResult<RetValue> {
        self.clone().into_ret()
    }
}

impl IntoRet for ManagedSequence {
    fn into_ret(self) -> PackedResult<RetValue> {
        Ok(RetValue::owned_seq(Box::new(self)))
    }
}

/// Sequences are always copied: the native container may not outlive the call.
impl<T: Pack> IntoRet for &[T] {
    fn into_ret(self) -> PackedResult<RetValue> {
        ManagedSequence::from_slice(self)?.into_ret()
    }
}

impl<T: Pack> IntoRet for &Vec<T> {
    fn into_ret(self) -> PackedResult<RetValue> {
        self.as_slice().into_ret()
    }
}

impl<T: Pack> IntoRet for Vec<T> {
    fn into_ret(self) -> PackedResult<RetValue> {
        self.as_slice().into_ret()
    }
}

impl IntoRet for () {
    #[inline]
    fn into_ret(self) -> PackedResult<RetValue> {
        Ok(RetValue::default())
    }
}

impl IntoRet for RetValue {
    #[inline]
    fn into_ret(self) -> PackedResult<RetValue> {
        Ok(self)
    }
}
