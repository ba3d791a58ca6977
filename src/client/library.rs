//! Separately built modules opened at run time
//!
//! A `Library` owns one loader handle and remembers the file it came from,
//! so a failed open or a missing entry point names the module.

use core::ffi::c_void;
use core::fmt;
use core::mem;
use core::ptr::NonNull;
use std::ffi::{CStr, CString};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Loaded module, closed on drop
pub struct Library {
    handle: NonNull<c_void>,
    path: PathBuf,
}

impl Library {
    /// Open the module at `path`
    ///
    /// The path is passed to the platform loader as is, so a bare file name
    /// falls back to the loader's own search rules.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref().to_path_buf();
        let handle = unsafe { sys::open(&path) }?
            .ok_or_else(|| LoadError::Open {
                path: path.clone(),
                reason: sys::last_error(),
            })?;
        Ok(Self { handle, path })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Address of an exported symbol
    pub fn address(&self, name: &str) -> Result<NonNull<c_void>, SymbolError> {
        let cname = CString::new(name).map_err(|_| SymbolError::InvalidName {
            name: name.to_string(),
        })?;
        let address = unsafe { sys::lookup(self.handle, &cname) };
        NonNull::new(address).ok_or_else(|| SymbolError::NotFound {
            name: name.to_string(),
            path: self.path.clone(),
        })
    }

    /// Exported function, cast to the pointer type `F`
    ///
    /// # Safety
    /// The symbol must be a function with exactly the signature of `F`.
    pub unsafe fn entry<F: Copy>(&self, name: &str) -> Result<F, SymbolError> {
        if mem::size_of::<F>() != mem::size_of::<*mut c_void>() {
            return Err(SymbolError::NotAPointer {
                name: name.to_string(),
                size: mem::size_of::<F>(),
            });
        }
        let address = self.address(name)?.as_ptr();
        Ok(mem::transmute_copy::<*mut c_void, F>(&address))
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        unsafe { sys::close(self.handle) }
    }
}

impl fmt::Debug for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Library")
            .field("path", &self.path)
            .field("handle", &self.handle)
            .finish()
    }
}

// The handle is only passed back to the loader, which is thread-safe.
unsafe impl Send for Library {}
unsafe impl Sync for Library {}

#[cfg(unix)]
mod sys {
    use super::*;
    use core::ffi::{c_char, c_int};
    use std::os::unix::ffi::OsStrExt;

    const RTLD_NOW: c_int = 2;

    extern "C" {
        fn dlopen(filename: *const c_char, flag: c_int) -> *mut c_void;
        fn dlsym(handle: *mut c_void, symbol: *const c_char) -> *mut c_void;
        fn dlclose(handle: *mut c_void) -> c_int;
        fn dlerror() -> *const c_char;
    }

    pub(super) unsafe fn open(path: &Path) -> Result<Option<NonNull<c_void>>, LoadError> {
        let cpath = CString::new(path.as_os_str().as_bytes()).map_err(|_| LoadError::InvalidPath {
            path: path.to_path_buf(),
        })?;
        Ok(NonNull::new(dlopen(cpath.as_ptr(), RTLD_NOW)))
    }

    pub(super) unsafe fn lookup(handle: NonNull<c_void>, name: &CStr) -> *mut c_void {
        dlsym(handle.as_ptr(), name.as_ptr())
    }

    pub(super) unsafe fn close(handle: NonNull<c_void>) {
        dlclose(handle.as_ptr());
    }

    pub(super) fn last_error() -> String {
        let message = unsafe { dlerror() };
        if message.is_null() {
            "unknown loader error".to_string()
        } else {
            unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned()
        }
    }
}

#[cfg(windows)]
mod sys {
    use super::*;
    use std::os::windows::ffi::OsStrExt;

    extern "system" {
        fn LoadLibraryW(filename: *const u16) -> *mut c_void;
        fn GetProcAddress(module: *mut c_void, name: *const u8) -> *mut c_void;
        fn FreeLibrary(module: *mut c_void) -> i32;
        fn GetLastError() -> u32;
    }

    pub(super) unsafe fn open(path: &Path) -> Result<Option<NonNull<c_void>>, LoadError> {
        let wide: Vec<u16> = path.as_os_str().encode_wide().collect();
        if wide.contains(&0) {
            return Err(LoadError::InvalidPath { path: path.to_path_buf() });
        }
        let wide: Vec<u16> = wide.into_iter().chain(Some(0)).collect();
        Ok(NonNull::new(LoadLibraryW(wide.as_ptr())))
    }

    pub(super) unsafe fn lookup(handle: NonNull<c_void>, name: &CStr) -> *mut c_void {
        GetProcAddress(handle.as_ptr(), name.as_ptr() as *const u8)
    }

    pub(super) unsafe fn close(handle: NonNull<c_void>) {
        FreeLibrary(handle.as_ptr());
    }

    pub(super) fn last_error() -> String {
        format!("error code {}", unsafe { GetLastError() })
    }
}

/// Module could not be opened
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Library path {} contains a NUL character", .path.display())]
    InvalidPath { path: PathBuf },

    #[error("Failed to load {}: {reason}", .path.display())]
    Open { path: PathBuf, reason: String },
}

/// Entry point could not be resolved
#[derive(Debug, Error)]
pub enum SymbolError {
    #[error("Symbol name '{name}' contains a NUL byte")]
    InvalidName { name: String },

    #[error("Symbol '{name}' not found in {}", .path.display())]
    NotFound { name: String, path: PathBuf },

    #[error("Symbol '{name}' requested as a {size}-byte value, not a function pointer")]
    NotAPointer { name: String, size: usize },
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_missing_library_names_path() {
        let err = Library::open("/nonexistent/libcti_missing.so").unwrap_err();
        match err {
            LoadError::Open { path, reason } => {
                assert_eq!(path, Path::new("/nonexistent/libcti_missing.so"));
                assert!(!reason.is_empty());
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_nul_in_path_rejected() {
        assert!(matches!(
            Library::open("bad\0name"),
            Err(LoadError::InvalidPath { .. })
        ));
    }
}
