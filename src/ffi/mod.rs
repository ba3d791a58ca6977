//! C ABI boundary
//!
//! Design: every entry point returns a `c_int` status and writes results
//! through out-pointers. Buffers handed to the caller are owned by the
//! caller until passed back to the matching free function; nothing is kept
//! in per-thread scratch space except the last error message.
//!
//! 1. Registry access (list names, get handle)
//! 2. Invocation with raw tag/value arrays
//! 3. Release of names, return values and strings

pub mod abi;

pub use abi::{cti_abi_value_layout, cti_abi_version, ValueLayout, ABI_VERSION};

use core::ffi::{c_char, c_int, c_void};
use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::panic::{self, AssertUnwindSafe};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing_appender::non_blocking::WorkerGuard;

use crate::config::{self, Config};
use crate::errors::PackedError;
use crate::logging::{log_boundary_call, log_boundary_failure, log_boundary_panic, log_boundary_return};
use crate::packed::{Args, PackedFunc, PackedValue, RawTag, RetValue};
use crate::registry::Registrable;

/// Opaque reference to a registered callable
pub type FuncHandle = *const c_void;

/// Opaque owner of a return value
pub type RetHandle = *mut c_void;

/// Status returned by every entry point
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success = 0,
    UnknownRegistry = 1,
    NullArgument = 2,
    TypeMismatch = 3,
    UnsupportedConversion = 4,
    CallFailed = 5,
    Panicked = 6,
    InvalidUtf8 = 7,
}

impl Status {
    #[inline]
    pub const fn code(self) -> c_int {
        self as c_int
    }

    pub fn from_code(code: c_int) -> Option<Self> {
        Some(match code {
            0 => Self::Success,
            1 => Self::UnknownRegistry,
            2 => Self::NullArgument,
            3 => Self::TypeMismatch,
            4 => Self::UnsupportedConversion,
            5 => Self::CallFailed,
            6 => Self::Panicked,
            7 => Self::InvalidUtf8,
            _ => return None,
        })
    }
}

impl From<&PackedError> for Status {
    fn from(err: &PackedError) -> Self {
        match err.root_cause() {
            PackedError::TypeMismatch { .. } => Self::TypeMismatch,
            PackedError::UnsupportedConversion { .. }
            | PackedError::ExtensionNotRegistered { .. } => Self::UnsupportedConversion,
            PackedError::InvalidUtf8(_) => Self::InvalidUtf8,
            PackedError::NullPointer { .. } => Self::NullArgument,
            _ => Self::CallFailed,
        }
    }
}

/// Failed entry point: status plus message for `cti_last_error`
struct Failure {
    status: Status,
    message: String,
}

impl Failure {
    fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn null(argument: &str) -> Self {
        Self::new(Status::NullArgument, format!("'{}' must not be null", argument))
    }
}

impl From<PackedError> for Failure {
    fn from(err: PackedError) -> Self {
        Self::new(Status::from(&err), err.to_string())
    }
}

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(message: &str) {
    let message = CString::new(message.replace('\0', " ")).unwrap_or_default();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Run an entry point body, logging it and mapping failure to a status
///
/// A panic never leaves an entry point; it becomes `Status::Panicked`.
fn boundary<F>(entry: &'static str, args_count: usize, body: F) -> c_int
where
    F: FnOnce() -> Result<(), Failure>,
{
    log_boundary_call(entry, args_count);

    let outcome = panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        log_boundary_panic(entry, &message);
        Err(Failure::new(Status::Panicked, message))
    });

    let status = match outcome {
        Ok(()) => Status::Success,
        Err(failure) => {
            log_boundary_failure(entry, failure.status.code(), &failure.message);
            set_last_error(&failure.message);
            failure.status
        }
    };

    log_boundary_return(entry, status.code());
    status.code()
}

/// Accept only the configured registry tag
unsafe fn check_registry_tag(tag: *const c_char) -> Result<(), Failure> {
    let tag = c_str_arg(tag, "tag")?;
    let expected = &config::current().abi.registry_tag;
    if tag == expected.as_str() {
        Ok(())
    } else {
        Err(Failure::new(
            Status::UnknownRegistry,
            format!("Unknown registry '{}' (expected '{}')", tag, expected),
        ))
    }
}

unsafe fn c_str_arg<'a>(ptr: *const c_char, argument: &str) -> Result<&'a str, Failure> {
    if ptr.is_null() {
        return Err(Failure::null(argument));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|err| Failure::from(PackedError::from(err)))
}

// ============================================================================
// Initialization
// ============================================================================

static LOG_GUARD: Lazy<Mutex<Option<WorkerGuard>>> = Lazy::new(|| Mutex::new(None));

/// Discover configuration and initialize logging
///
/// Later calls are no-ops.
#[no_mangle]
pub extern "C" fn cti_init() -> c_int {
    boundary("cti_init", 0, || {
        if let Some(guard) = crate::init(Config::discover()) {
            *LOG_GUARD.lock() = Some(guard);
        }
        Ok(())
    })
}

/// Register the sample extension type and its callables in this module
///
/// Repeated calls keep the first registration.
#[no_mangle]
pub extern "C" fn cti_register_samples() -> c_int {
    boundary("cti_register_samples", 0, || {
        crate::ext_sample::register_sample()
            .map_err(|err| Failure::new(Status::CallFailed, err.to_string()))
    })
}

// ============================================================================
// Registry access
// ============================================================================

/// List every registered name
///
/// On success `*names` holds `*count` NUL-terminated strings (null when
/// empty), owned by the caller until `cti_registry_free_names`.
///
/// # Safety
/// `tag` must be null or NUL-terminated; `count` and `names` must be null or
/// valid for writes.
#[no_mangle]
pub unsafe extern "C" fn cti_registry_list_names(
    tag: *const c_char,
    count: *mut usize,
    names: *mut *mut *mut c_char,
) -> c_int {
    boundary("cti_registry_list_names", 0, || {
        check_registry_tag(tag)?;
        if count.is_null() {
            return Err(Failure::null("count"));
        }
        if names.is_null() {
            return Err(Failure::null("names"));
        }

        let owned = PackedFunc::list_names()
            .into_iter()
            .map(|name| CString::new(name).map_err(PackedError::from))
            .collect::<Result<Vec<_>, _>>()?;

        *count = owned.len();
        *names = if owned.is_empty() {
            core::ptr::null_mut()
        } else {
            let raw: Box<[*mut c_char]> = owned.into_iter().map(CString::into_raw).collect();
            Box::into_raw(raw) as *mut *mut c_char
        };
        Ok(())
    })
}

/// Release a names array from `cti_registry_list_names`
///
/// # Safety
/// `names` must be null or exactly what `cti_registry_list_names` returned
/// together with `count`, not released before.
#[no_mangle]
pub unsafe extern "C" fn cti_registry_free_names(count: usize, names: *mut *mut c_char) -> c_int {
    boundary("cti_registry_free_names", 0, || {
        if names.is_null() {
            return Ok(());
        }
        let raw = Box::from_raw(core::ptr::slice_from_raw_parts_mut(names, count));
        for name in raw.iter() {
            drop(CString::from_raw(*name));
        }
        Ok(())
    })
}

/// Resolve a registered callable
///
/// An unknown name succeeds with a null handle.
///
/// # Safety
/// `tag` and `name` must be null or NUL-terminated; `handle` must be null or
/// valid for writes.
#[no_mangle]
pub unsafe extern "C" fn cti_registry_get(
    tag: *const c_char,
    name: *const c_char,
    handle: *mut FuncHandle,
) -> c_int {
    boundary("cti_registry_get", 0, || {
        check_registry_tag(tag)?;
        let name = c_str_arg(name, "name")?;
        if handle.is_null() {
            return Err(Failure::null("handle"));
        }

        *handle = match PackedFunc::lookup(name) {
            Some(func) => func as *const PackedFunc as FuncHandle,
            None => core::ptr::null(),
        };
        Ok(())
    })
}

// ============================================================================
// Invocation
// ============================================================================

/// Invoke a callable with raw tag and value arrays
///
/// The return tag and value are written to `ret_tag`/`ret_value`. When the
/// value owns a payload, `*ret_owner` receives its owner, which keeps the
/// value readable until passed to `cti_ret_value_free`; otherwise it is null.
///
/// # Safety
/// `handle` must come from `cti_registry_get`. `tags` and `values` must hold
/// `num_args` entries each, every value matching its tag. Output pointers
/// must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn cti_packed_func_call(
    handle: FuncHandle,
    num_args: usize,
    tags: *const RawTag,
    values: *const PackedValue,
    ret_tag: *mut RawTag,
    ret_value: *mut PackedValue,
    ret_owner: *mut RetHandle,
) -> c_int {
    boundary("cti_packed_func_call", num_args, || {
        if handle.is_null() {
            return Err(Failure::null("handle"));
        }
        if num_args > 0 && (tags.is_null() || values.is_null()) {
            return Err(Failure::null("tags/values"));
        }
        if ret_tag.is_null() || ret_value.is_null() || ret_owner.is_null() {
            return Err(Failure::null("ret_tag/ret_value/ret_owner"));
        }

        let func = &*(handle as *const PackedFunc);
        let args = Args::from_raw(num_args, tags, values);
        let mut ret = RetValue::new();
        func.call_packed(&args, &mut ret)?;

        *ret_tag = ret.raw_tag();
        *ret_value = ret.value();
        *ret_owner = if ret.is_owned() {
            let (_, _, owner) = Box::new(ret).into_raw_parts();
            owner as RetHandle
        } else {
            core::ptr::null_mut()
        };
        Ok(())
    })
}

/// Release a return value owner
///
/// # Safety
/// `owner` must be null or an owner from `cti_packed_func_call`, not
/// released before.
#[no_mangle]
pub unsafe extern "C" fn cti_ret_value_free(owner: RetHandle) -> c_int {
    boundary("cti_ret_value_free", 0, || {
        if !owner.is_null() {
            drop(Box::from_raw(owner as *mut RetValue));
        }
        Ok(())
    })
}

// ============================================================================
// Errors
// ============================================================================

/// Copy the calling thread's last error message
///
/// `*message` is null when no entry point has failed on this thread;
/// otherwise the caller releases it with `cti_string_free`.
///
/// # Safety
/// `message` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn cti_last_error(message: *mut *mut c_char) -> c_int {
    if message.is_null() {
        return Status::NullArgument.code();
    }
    *message = LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(core::ptr::null_mut(), |text| text.clone().into_raw())
    });
    Status::Success.code()
}

/// Release a string returned by the boundary
///
/// # Safety
/// `s` must be null or a string from `cti_last_error`, not released before.
#[no_mangle]
pub unsafe extern "C" fn cti_string_free(s: *mut c_char) -> c_int {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
    Status::Success.code()
}
