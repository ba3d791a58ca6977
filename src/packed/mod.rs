//! Packed-value calling convention
//!
//! Tags and the value union, borrowed argument views, owned return values,
//! sequence flattening and the type-erased callable built on them.

pub mod arg;
pub mod extension;
pub mod func;
pub mod marshal;
pub mod ret;
pub mod types;

pub use arg::{Arg, ArgSlot, ArgSlots, FromArg, IntoArgSlot, IntoArgs};
pub use extension::{
    extension_descriptor, register_extension, register_extension_type, CopyFn, DeleteFn,
    ExtRef, Extension, ExtensionDescriptor,
};
pub use func::{Args, PackedBody, PackedFunc};
pub use marshal::{unflatten, Keepalive, ManagedSequence, Pack};
pub use ret::{IntoRet, RetValue};
pub use types::{
    is_extension, PackedSequence, PackedValue, RawTag, TypeCode, TypeTag, EXTENSION_START,
    VALUE_ALIGN, VALUE_SIZE,
};

#[cfg(test)]
mod tests;
