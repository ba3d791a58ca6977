//! Extension types - host-registered opaque pointers
//!
//! Each extension type is described once by a descriptor holding its tag,
//! copy and delete functions and whether returns copy it. The value logic
//! consults the descriptor table instead of branching per type.

use core::ffi::c_void;
use core::fmt;
use core::marker::PhantomData;
use core::ops::Deref;
use core::ptr::NonNull;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;

use super::types::{RawTag, TypeCode, TypeTag, EXTENSION_START};
use crate::errors::RegistryError;
use crate::logging::log_extension_registered;

/// Produces an owned copy of an extension object
pub type CopyFn = unsafe extern "C" fn(*const c_void) -> *mut c_void;

/// Releases an extension object produced by the matching `CopyFn`
pub type DeleteFn = unsafe extern "C" fn(*mut c_void);

/// Per-type behaviour of an extension tag
#[derive(Debug, Clone, Copy)]
pub struct ExtensionDescriptor {
    pub tag: RawTag,
    pub name: &'static str,
    pub copy: CopyFn,
    pub delete: DeleteFn,
    /// Whether a return value copies the object instead of borrowing it
    pub copy_on_return: bool,
}

impl ExtensionDescriptor {
    /// Descriptor for a Rust extension type, boxing copies on the heap
    pub fn of<T: Extension>() -> Self {
        Self {
            tag: T::TAG.code(),
            name: T::NAME,
            copy: copy_boxed::<T>,
            delete: delete_boxed::<T>,
            copy_on_return: T::COPY_ON_RETURN,
        }
    }

    #[inline]
    pub const fn type_tag(&self) -> TypeTag {
        TypeTag::Extension(self.tag)
    }
}

/// Rust type exposed to callers as an opaque extension pointer
pub trait Extension: Clone + 'static {
    /// Registered tag, at or above `EXTENSION_START`
    const TYPE_CODE: RawTag;
    const NAME: &'static str;
    const COPY_ON_RETURN: bool = false;

    /// Tag of this type; a `TYPE_CODE` below `EXTENSION_START` fails to
    /// compile wherever the tag is used.
    const TAG: TypeTag = {
        assert!(
            Self::TYPE_CODE >= EXTENSION_START,
            "extension TYPE_CODE must be at or above EXTENSION_START"
        );
        TypeTag::Extension(Self::TYPE_CODE)
    };
}

unsafe extern "C" fn copy_boxed<T: Clone>(ptr: *const c_void) -> *mut c_void {
    let value = &*(ptr as *const T);
    Box::into_raw(Box::new(value.clone())) as *mut c_void
}

pub(crate) unsafe extern "C" fn delete_boxed<T>(ptr: *mut c_void) {
    if !ptr.is_null() {
        drop(Box::from_raw(ptr as *mut T));
    }
}

/// Extension object released through a delete function on drop
pub(crate) struct OwnedExt {
    ptr: NonNull<c_void>,
    delete: DeleteFn,
}

impl OwnedExt {
    /// Take ownership of an object produced by the copy matching `delete`
    ///
    /// # Safety
    /// `delete` must be the release function for `ptr`, and nothing else may
    /// release it.
    pub(crate) unsafe fn from_raw(ptr: NonNull<c_void>, delete: DeleteFn) -> Self {
        Self { ptr, delete }
    }

    pub(crate) fn boxed<T: Extension>(value: Box<T>) -> Self {
        let ptr = NonNull::from(Box::leak(value)).cast::<c_void>();
        Self { ptr, delete: delete_boxed::<T> }
    }

    /// Owned copy of `value`, independent of the original's lifetime
    pub(crate) fn copy_of<T: Extension>(value: &T) -> Self {
        Self::boxed(Box::new(value.clone()))
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut c_void {
        self.ptr.as_ptr()
    }
}

impl Drop for OwnedExt {
    fn drop(&mut self) {
        unsafe { (self.delete)(self.ptr.as_ptr()) }
    }
}

/// Global descriptor table (lock-free concurrent map)
static EXTENSIONS: Lazy<DashMap<RawTag, ExtensionDescriptor>> = Lazy::new(DashMap::new);

/// Register an extension descriptor
///
/// Registering the same name under the same tag again is a no-op, so
/// several init paths may register a type.
pub fn register_extension(descriptor: ExtensionDescriptor) -> Result<(), RegistryError> {
    if descriptor.tag < EXTENSION_START {
        return Err(RegistryError::ExtensionTagOutOfRange {
            tag: descriptor.tag,
            start: EXTENSION_START,
        });
    }

    match EXTENSIONS.entry(descriptor.tag) {
        Entry::Occupied(existing) => {
            let existing = existing.get();
            if existing.name == descriptor.name && existing.copy_on_return == descriptor.copy_on_return {
                Ok(())
            } else {
                Err(RegistryError::DuplicateExtension {
                    tag: descriptor.tag,
                    existing: existing.name.to_string(),
                })
            }
        }
        Entry::Vacant(slot) => {
            log_extension_registered(descriptor.tag, descriptor.name, descriptor.copy_on_return);
            slot.insert(descriptor);
            Ok(())
        }
    }
}

/// Register a Rust extension type
pub fn register_extension_type<T: Extension>() -> Result<(), RegistryError> {
    register_extension(ExtensionDescriptor::of::<T>())
}

/// Look up the descriptor for an extension tag
pub fn extension_descriptor(tag: RawTag) -> Option<ExtensionDescriptor> {
    EXTENSIONS.get(&tag).map(|entry| *entry.value())
}

/// Borrowed view of an extension object
pub struct ExtRef<'a, T> {
    ptr: NonNull<T>,
    _marker: PhantomData<&'a T>,
}

impl<'a, T> ExtRef<'a, T> {
    #[inline]
    pub fn new(value: &'a T) -> Self {
        Self {
            ptr: NonNull::from(value),
            _marker: PhantomData,
        }
    }

    /// Wrap a raw extension pointer
    ///
    /// # Safety
    /// A non-null `ptr` must point to a live `T` for `'a`.
    #[inline]
    pub unsafe fn from_raw(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr as *mut T).map(|ptr| Self {
            ptr,
            _marker: PhantomData,
        })
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut c_void {
        self.ptr.as_ptr() as *mut c_void
    }

    #[inline]
    pub fn get(&self) -> &'a T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> Clone for ExtRef<'_, T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ExtRef<'_, T> {}

impl<T> Deref for ExtRef<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        self.get()
    }
}

impl<T: fmt::Debug> fmt::Debug for ExtRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExtRef").field(self.get()).finish()
    }
}

impl<T: Extension> TypeCode for ExtRef<'_, T> {
    const DECLARED: TypeTag = T::TAG;
}
