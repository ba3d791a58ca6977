//! Caller side of the ABI boundary
//!
//! Design: a module is reached only through its `extern "C"` entry points,
//! collected in an `AbiTable`. `RemoteModule` checks the value layout once
//! when it binds the table, then converts native arguments with the same
//! staging rules as in-process calls. Buffers the module hands out are
//! released by the wrappers' destructors.

mod library;

pub use library::{Library, LoadError, SymbolError};

use core::ffi::{c_char, c_int};
use core::fmt;
use core::ptr;
use std::ffi::{CStr, CString};
use std::path::Path;

use smallvec::SmallVec;

use crate::errors::{AbiError, AbiResult, PackedError, PackedResult};
use crate::ffi::{self, FuncHandle, RetHandle, Status, ValueLayout};
use crate::packed::{
    Arg, ArgSlot, FromArg, IntoArgSlot, IntoArgs, PackedFunc, PackedValue, RawTag, TypeTag,
};

/// Registry tag of the callable registry
pub const FUNC_REGISTRY: &str = "PackedFunc";

pub type ValueLayoutFn = unsafe extern "C" fn(*mut usize, *mut usize) -> c_int;
pub type ListNamesFn = unsafe extern "C" fn(*const c_char, *mut usize, *mut *mut *mut c_char) -> c_int;
pub type FreeNamesFn = unsafe extern "C" fn(usize, *mut *mut c_char) -> c_int;
pub type GetFn = unsafe extern "C" fn(*const c_char, *const c_char, *mut FuncHandle) -> c_int;
pub type CallFn = unsafe extern "C" fn(
    FuncHandle,
    usize,
    *const RawTag,
    *const PackedValue,
    *mut RawTag,
    *mut PackedValue,
    *mut RetHandle,
) -> c_int;
pub type FreeRetFn = unsafe extern "C" fn(RetHandle) -> c_int;
pub type LastErrorFn = unsafe extern "C" fn(*mut *mut c_char) -> c_int;
pub type FreeStringFn = unsafe extern "C" fn(*mut c_char) -> c_int;

/// Entry points of one module
#[derive(Clone, Copy)]
pub struct AbiTable {
    pub value_layout: ValueLayoutFn,
    pub list_names: ListNamesFn,
    pub free_names: FreeNamesFn,
    pub get: GetFn,
    pub call: CallFn,
    pub free_ret: FreeRetFn,
    pub last_error: LastErrorFn,
    pub free_string: FreeStringFn,
}

impl AbiTable {
    /// Entry points exported by this crate
    pub fn in_process() -> Self {
        Self {
            value_layout: ffi::cti_abi_value_layout,
            list_names: ffi::cti_registry_list_names,
            free_names: ffi::cti_registry_free_names,
            get: ffi::cti_registry_get,
            call: ffi::cti_packed_func_call,
            free_ret: ffi::cti_ret_value_free,
            last_error: ffi::cti_last_error,
            free_string: ffi::cti_string_free,
        }
    }

    /// Resolve the entry points of a loaded module by symbol name
    ///
    /// # Safety
    /// Every resolved symbol must have the signature of the matching
    /// entry point.
    pub unsafe fn from_library(library: &Library) -> AbiResult<Self> {
        Ok(Self {
            value_layout: library.entry("cti_abi_value_layout")?,
            list_names: library.entry("cti_registry_list_names")?,
            free_names: library.entry("cti_registry_free_names")?,
            get: library.entry("cti_registry_get")?,
            call: library.entry("cti_packed_func_call")?,
            free_ret: library.entry("cti_ret_value_free")?,
            last_error: library.entry("cti_last_error")?,
            free_string: library.entry("cti_string_free")?,
        })
    }
}

impl fmt::Debug for AbiTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbiTable")
            .field("call", &(self.call as *const ()))
            .finish_non_exhaustive()
    }
}

/// Module reached through its entry points
pub struct RemoteModule {
    table: AbiTable,
    _library: Option<Library>,
}

impl RemoteModule {
    /// Bind a table, refusing a module whose value layout differs
    pub fn new(table: AbiTable) -> AbiResult<Self> {
        let (mut size, mut align) = (0usize, 0usize);
        let status = unsafe { (table.value_layout)(&mut size, &mut align) };
        if status != Status::Success.code() {
            return Err(AbiError::Status {
                status: Status::from_code(status).unwrap_or(Status::CallFailed),
                message: "value layout query failed".to_string(),
            });
        }
        ValueLayout::host().check(ValueLayout { size, align })?;

        Ok(Self {
            table,
            _library: None,
        })
    }

    /// This crate's own registry, through the boundary
    pub fn in_process() -> AbiResult<Self> {
        Self::new(AbiTable::in_process())
    }

    /// Load a module and bind its entry points
    ///
    /// # Safety
    /// The library must export the entry points with their documented
    /// signatures.
    pub unsafe fn load(path: impl AsRef<Path>) -> AbiResult<Self> {
        let library = Library::open(path)?;
        let table = AbiTable::from_library(&library)?;
        let mut module = Self::new(table)?;
        module._library = Some(library);
        Ok(module)
    }

    #[inline]
    pub fn table(&self) -> &AbiTable {
        &self.table
    }

    /// Library backing a loaded module; `None` in process
    #[inline]
    pub fn library(&self) -> Option<&Library> {
        self._library.as_ref()
    }

    /// Turn a status into a result, fetching the module's error message
    fn check(&self, status: c_int) -> AbiResult<()> {
        if status == Status::Success.code() {
            return Ok(());
        }

        let message = unsafe {
            let mut raw = ptr::null_mut();
            if (self.table.last_error)(&mut raw) == Status::Success.code() && !raw.is_null() {
                let text = CStr::from_ptr(raw).to_string_lossy().into_owned();
                (self.table.free_string)(raw);
                text
            } else {
                String::new()
            }
        };

        Err(AbiError::Status {
            status: Status::from_code(status).unwrap_or(Status::CallFailed),
            message,
        })
    }

    /// Every name registered under `tag`
    pub fn list_names(&self, tag: &str) -> AbiResult<Vec<String>> {
        let tag = CString::new(tag).map_err(PackedError::from)?;
        let mut count = 0usize;
        let mut names = ptr::null_mut();
        self.check(unsafe { (self.table.list_names)(tag.as_ptr(), &mut count, &mut names) })?;

        if names.is_null() {
            return Ok(Vec::new());
        }

        let listed: Vec<String> = unsafe {
            core::slice::from_raw_parts(names, count)
                .iter()
                .map(|name| CStr::from_ptr(*name).to_string_lossy().into_owned())
                .collect()
        };
        self.check(unsafe { (self.table.free_names)(count, names) })?;
        Ok(listed)
    }

    /// Resolve a callable; `None` when the name is unknown
    pub fn get(&self, tag: &str, name: &str) -> AbiResult<Option<RemoteFunc<'_>>> {
        let tag = CString::new(tag).map_err(PackedError::from)?;
        let cname = CString::new(name).map_err(PackedError::from)?;
        let mut handle = ptr::null();
        self.check(unsafe { (self.table.get)(tag.as_ptr(), cname.as_ptr(), &mut handle) })?;

        Ok((!handle.is_null()).then(|| RemoteFunc {
            module: self,
            handle,
            name: Some(name.to_string()),
        }))
    }
}

impl fmt::Debug for RemoteModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteModule")
            .field("table", &self.table)
            .field("library", &self._library)
            .finish()
    }
}

/// Callable resolved through a module's boundary
pub struct RemoteFunc<'m> {
    module: &'m RemoteModule,
    handle: FuncHandle,
    name: Option<String>,
}

impl<'m> RemoteFunc<'m> {
    /// Registered name; `None` for callables handed back as return values
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[inline]
    pub fn handle(&self) -> FuncHandle {
        self.handle
    }

    /// Invoke with native arguments
    pub fn call<'a, A: IntoArgs<'a>>(&self, args: A) -> AbiResult<RemoteRet<'m>> {
        let slots = args.into_slots()?;
        let (tags, values): (SmallVec<[RawTag; 4]>, SmallVec<[PackedValue; 4]>) = slots
            .iter()
            .map(ArgSlot::as_arg)
            .map(|arg| (arg.raw_tag(), arg.value()))
            .unzip();

        let mut tag = TypeTag::Unknown.code();
        let mut value = PackedValue::null();
        let mut owner = ptr::null_mut();
        let status = unsafe {
            (self.module.table.call)(
                self.handle,
                tags.len(),
                tags.as_ptr(),
                values.as_ptr(),
                &mut tag,
                &mut value,
                &mut owner,
            )
        };
        self.module.check(status)?;

        Ok(RemoteRet {
            module: self.module,
            tag,
            value,
            owner,
        })
    }

    /// Invoke with native arguments and extract the result
    pub fn invoke<'a, R, A>(&self, args: A) -> AbiResult<R>
    where
        R: for<'r> FromArg<'r>,
        A: IntoArgs<'a>,
    {
        let ret = self.call(args)?;
        Ok(ret.get()?)
    }
}

impl fmt::Debug for RemoteFunc<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteFunc")
            .field("name", &self.name)
            .field("handle", &self.handle)
            .finish()
    }
}

/// A resolved callable passes as a `Function` argument to the same module
impl<'a> IntoArgSlot<'a> for &'a RemoteFunc<'_> {
    fn into_slot(self) -> PackedResult<ArgSlot<'a>> {
        let value = PackedValue::func(self.handle as *const PackedFunc);
        Ok(ArgSlot::View(unsafe { Arg::from_raw(TypeTag::Function.code(), value) }))
    }
}

/// Return value owned by the module until dropped
pub struct RemoteRet<'m> {
    module: &'m RemoteModule,
    tag: RawTag,
    value: PackedValue,
    owner: RetHandle,
}

impl RemoteRet<'_> {
    #[inline]
    pub fn raw_tag(&self) -> RawTag {
        self.tag
    }

    #[inline]
    pub fn tag(&self) -> PackedResult<TypeTag> {
        TypeTag::from_code(self.tag)
    }

    /// Whether the module keeps a payload alive for this value
    #[inline]
    pub fn is_owned(&self) -> bool {
        !self.owner.is_null()
    }

    #[inline]
    pub fn as_arg(&self) -> Arg<'_> {
        unsafe { Arg::from_raw(self.tag, self.value) }
    }

    /// Extract as a native value, checking the tag first
    ///
    /// `&PackedFunc` is only meaningful when the module shares this
    /// process's crate build; use [`RemoteRet::func`] otherwise.
    pub fn get<'r, T: FromArg<'r>>(&'r self) -> PackedResult<T> {
        T::from_arg(&self.as_arg())
    }

    /// Returned callable, invoked back through the module
    ///
    /// The handle borrows this value, since an owned callable is released
    /// together with it.
    pub fn func(&self) -> PackedResult<RemoteFunc<'_>> {
        self.as_arg().expect_tag(TypeTag::Function)?;
        self.remote_func(unsafe { self.value.v_func } as FuncHandle)
    }

    /// Returned sequence of callables, each invoked back through the module
    pub fn funcs(&self) -> PackedResult<Vec<RemoteFunc<'_>>> {
        self.as_arg().expect_tag(TypeTag::Sequence)?;
        let record = unsafe { self.value.v_seq.as_ref() }
            .ok_or(PackedError::NullPointer { tag: TypeTag::Sequence })?;
        if record.tag != TypeTag::Function.code() {
            return Err(PackedError::type_mismatch(TypeTag::Function, record.element_tag()?));
        }

        unsafe { record.values() }
            .iter()
            .enumerate()
            .map(|(index, value)| {
                self.remote_func(unsafe { value.v_func } as FuncHandle)
                    .map_err(|err| PackedError::sequence_element(index, err))
            })
            .collect()
    }

    fn remote_func(&self, handle: FuncHandle) -> PackedResult<RemoteFunc<'_>> {
        if handle.is_null() {
            return Err(PackedError::NullPointer { tag: TypeTag::Function });
        }
        Ok(RemoteFunc {
            module: self.module,
            handle,
            name: None,
        })
    }
}

impl Drop for RemoteRet<'_> {
    fn drop(&mut self) {
        if !self.owner.is_null() {
            unsafe { (self.module.table.free_ret)(self.owner) };
        }
    }
}

impl fmt::Debug for RemoteRet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteRet")
            .field("tag", &self.tag)
            .field("value", &self.value)
            .field("owned", &self.is_owned())
            .finish()
    }
}
