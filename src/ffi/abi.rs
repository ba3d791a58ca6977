//! Value layout shared across the boundary
//!
//! Both sides reinterpret raw `PackedValue` arrays, so their size and
//! alignment must agree. A caller checks this once when it binds a module.

use core::ffi::c_int;
use core::mem::{align_of, size_of};

use super::Status;
use crate::errors::{AbiError, AbiResult};
use crate::logging::log_layout_mismatch;
use crate::packed::PackedValue;

/// Version of the entry point set
pub const ABI_VERSION: u32 = 1;

/// Size and alignment of the value union
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueLayout {
    pub size: usize,
    pub align: usize,
}

impl ValueLayout {
    /// Layout compiled into this module
    pub const fn host() -> Self {
        Self {
            size: size_of::<PackedValue>(),
            align: align_of::<PackedValue>(),
        }
    }

    /// Fail with `LayoutMismatch` unless `found` equals this layout
    pub fn check(self, found: ValueLayout) -> AbiResult<()> {
        if self == found {
            return Ok(());
        }

        log_layout_mismatch(self.size, self.align, found.size, found.align);
        Err(AbiError::LayoutMismatch {
            expected_size: self.size,
            expected_align: self.align,
            found_size: found.size,
            found_align: found.align,
        })
    }
}

#[no_mangle]
pub extern "C" fn cti_abi_version() -> u32 {
    ABI_VERSION
}

/// Report the value union layout
///
/// # Safety
/// `size` and `align` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn cti_abi_value_layout(size: *mut usize, align: *mut usize) -> c_int {
    if size.is_null() || align.is_null() {
        return Status::NullArgument.code();
    }

    let layout = ValueLayout::host();
    *size = layout.size;
    *align = layout.align;
    Status::Success.code()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packed::{VALUE_ALIGN, VALUE_SIZE};

    #[test]
    fn test_host_layout_is_eight_bytes() {
        assert_eq!(ValueLayout::host(), ValueLayout { size: VALUE_SIZE, align: VALUE_ALIGN });
        assert_eq!(ValueLayout::host().size, 8);
    }

    #[test]
    fn test_layout_check() {
        let host = ValueLayout::host();
        assert!(host.check(host).is_ok());
        assert!(matches!(
            host.check(ValueLayout { size: 16, align: 8 }),
            Err(AbiError::LayoutMismatch { found_size: 16, .. })
        ));
    }

    #[test]
    fn test_layout_entry_point() {
        let (mut size, mut align) = (0usize, 0usize);
        let status = unsafe { cti_abi_value_layout(&mut size, &mut align) };
        assert_eq!(status, Status::Success.code());
        assert_eq!(ValueLayout { size, align }, ValueLayout::host());
        assert_eq!(
            unsafe { cti_abi_value_layout(core::ptr::null_mut(), &mut align) },
            Status::NullArgument.code()
        );
    }
}
