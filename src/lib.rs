//! cti - packed-value calling convention
//!
//! Register a callable once under a name, then discover and invoke it
//! without knowing its native signature, in process or from a separately
//! compiled module through a C ABI.
//!
//! ```ignore
//! use cti::prelude::*;
//!
//! PackedFunc::register("add").set_body(|args, ret| {
//!     let a: i64 = args.arg(0)?;
//!     let b: i64 = args.arg(1)?;
//!     ret.reset(a + b)
//! });
//!
//! let add = PackedFunc::lookup("add").unwrap();
//! let sum: i64 = packed_call!(add, 1, 2)?;
//! ```

pub mod client;
pub mod config;
pub mod errors;
pub mod ext_sample;
pub mod ffi;
pub mod logging;
pub mod packed;
pub mod registry;

#[doc(hidden)]
pub use once_cell;

pub use config::Config;
pub use errors::{AbiError, AbiResult, ConfigError, PackedError, PackedResult, RegistryError};
pub use packed::{
    Arg, Args, ExtRef, Extension, FromArg, IntoArgs, IntoRet, ManagedSequence, PackedFunc,
    PackedValue, RetValue, TypeCode, TypeTag,
};
pub use registry::{Registrable, Registry};

use tracing_appender::non_blocking::WorkerGuard;

/// Commonly used items
pub mod prelude {
    pub use crate::packed::{
        Arg, Args, ExtRef, Extension, FromArg, IntoArgs, IntoRet, ManagedSequence, PackedFunc,
        RetValue, TypeTag,
    };
    pub use crate::packed_call;
    pub use crate::registry::Registrable;
    pub use crate::{PackedError, PackedResult};
}

/// Install `config` process-wide and initialize logging from it
///
/// Only the first call installs anything; later calls return `None`. Keep
/// the returned guard alive to flush buffered log output.
pub fn init(config: Config) -> Option<WorkerGuard> {
    if !config::install(config) {
        return None;
    }

    let config = config::current();
    let guard = logging::init_logging(config.log_config());
    logging::log_init(&config.abi.registry_tag);
    guard
}
