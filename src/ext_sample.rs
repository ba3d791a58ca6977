//! Sample extension type
//!
//! A host-defined object crossing the boundary as an opaque pointer tagged
//! `EXTENSION_START`. Its lifecycle is driven entirely through registered
//! callables: `ext_new` hands a fresh object to the caller, `ext_get` and
//! `ext_transform` read it, and `ext_release` frees it.

use crate::errors::{PackedResult, RegistryError};
use crate::packed::{
    register_extension_type, Args, ExtRef, Extension, PackedFunc, RawTag, RetValue, EXTENSION_START,
};
use crate::registry::Registrable;

pub const EXT_NEW: &str = "ext_new";
pub const EXT_GET: &str = "ext_get";
pub const EXT_TRANSFORM: &str = "ext_transform";
pub const EXT_RELEASE: &str = "ext_release";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleExt {
    pub name: String,
}

impl Default for SampleExt {
    fn default() -> Self {
        Self {
            name: "run".to_string(),
        }
    }
}

impl Extension for SampleExt {
    const TYPE_CODE: RawTag = EXTENSION_START;
    const NAME: &'static str = "SampleExt";
}

/// Register the extension type and its callables
///
/// Safe to call more than once; callables already registered keep their
/// bodies.
pub fn register_sample() -> Result<(), RegistryError> {
    register_extension_type::<SampleExt>()?;

    bind(EXT_NEW, |_, ret| {
        ret.set_ext_transfer(Box::<SampleExt>::default());
        Ok(())
    });

    bind(EXT_GET, |args, ret| {
        let ext: ExtRef<'_, SampleExt> = args.arg(0)?;
        ret.reset(format!("{}!", ext.name))
    });

    bind(EXT_TRANSFORM, |args, ret| {
        let ext: ExtRef<'_, SampleExt> = args.arg(0)?;
        ret.set_ext_transfer(Box::new(SampleExt {
            name: ext.name.to_uppercase(),
        }));
        Ok(())
    });

    bind(EXT_RELEASE, |args, _| {
        let ext: ExtRef<'_, SampleExt> = args.arg(0)?;
        // Objects reaching here were handed out by `ext_new`/`ext_transform`.
        drop(unsafe { Box::from_raw(ext.as_ptr() as *mut SampleExt) });
        Ok(())
    });

    Ok(())
}

fn bind<F>(name: &str, body: F)
where
    F: Fn(&Args<'_>, &mut RetValue) -> PackedResult<()> + Send + Sync + 'static,
{
    if let Ok(func) = PackedFunc::try_register(name) {
        func.set_body(body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packed::TypeTag;

    #[test]
    fn test_sample_lifecycle() {
        register_sample().unwrap();
        register_sample().unwrap();

        let new = PackedFunc::lookup(EXT_NEW).unwrap();
        let get = PackedFunc::lookup(EXT_GET).unwrap();
        let transform = PackedFunc::lookup(EXT_TRANSFORM).unwrap();
        let release = PackedFunc::lookup(EXT_RELEASE).unwrap();

        let created = new.call(()).unwrap();
        assert_eq!(created.tag().unwrap(), TypeTag::Extension(32));
        assert!(!created.is_owned());
        let ext: ExtRef<'_, SampleExt> = created.get().unwrap();

        assert_eq!(get.invoke::<String, _>((ext,)).unwrap(), "run!");

        let transformed = transform.call((ext,)).unwrap();
        let upper: ExtRef<'_, SampleExt> = transformed.get().unwrap();
        assert_eq!(get.invoke::<String, _>((upper,)).unwrap(), "RUN!");

        release.call((upper,)).unwrap();
        release.call((ext,)).unwrap();
    }

    #[test]
    fn test_wrong_tag_rejected() {
        register_sample().unwrap();
        let get = PackedFunc::lookup(EXT_GET).unwrap();
        assert!(get.call((5,)).is_err());
    }
}
