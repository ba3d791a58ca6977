use std::sync::Once;

use cti::client::{RemoteModule, FUNC_REGISTRY};
use cti::ext_sample::{register_sample, SampleExt, EXT_GET, EXT_NEW, EXT_RELEASE, EXT_TRANSFORM};
use cti::packed::{extension_descriptor, register_extension_type, RawTag};
use cti::prelude::*;

#[derive(Debug, Clone, PartialEq)]
struct Snapshot {
    label: String,
}

impl Extension for Snapshot {
    const TYPE_CODE: RawTag = 40;
    const NAME: &'static str = "Snapshot";
    const COPY_ON_RETURN: bool = true;
}

#[derive(Debug, Clone)]
struct Unlisted;

impl Extension for Unlisted {
    const TYPE_CODE: RawTag = 41;
    const NAME: &'static str = "Unlisted";
}

static REGISTER: Once = Once::new();

fn setup() {
    REGISTER.call_once(|| {
        register_sample().unwrap();
        register_extension_type::<Snapshot>().unwrap();

        let kept = Snapshot {
            label: "kept".to_string(),
        };
        PackedFunc::register("snapshot.current").set_body(move |_, ret| unsafe { ret.set_ext(&kept) });

        PackedFunc::register("snapshot.unlisted").set_body(|_, ret| unsafe { ret.set_ext(&Unlisted) });

        PackedFunc::register("sample.names").set_body(|args, ret| {
            let objects: Vec<ExtRef<'_, SampleExt>> = args.arg(0)?;
            let names: Vec<String> = objects.iter().map(|ext| ext.name.clone()).collect();
            ret.reset(names.join(","))
        });
    });
}

#[test]
fn test_sample_descriptor_is_registered() {
    setup();
    let descriptor = extension_descriptor(32).unwrap();
    assert_eq!(descriptor.name, "SampleExt");
    assert!(!descriptor.copy_on_return);
}

#[test]
fn test_sample_lifecycle_in_process() {
    setup();
    let new = PackedFunc::lookup(EXT_NEW).unwrap();
    let get = PackedFunc::lookup(EXT_GET).unwrap();
    let release = PackedFunc::lookup(EXT_RELEASE).unwrap();

    let created = new.call(()).unwrap();
    let ext: ExtRef<'_, SampleExt> = created.get().unwrap();
    assert_eq!(ext.get(), &SampleExt::default());

    let text: String = get.invoke((ext,)).unwrap();
    assert_eq!(text, "run!");
    release.call((ext,)).unwrap();
}

#[test]
fn test_sample_lifecycle_through_boundary() {
    setup();
    let module = RemoteModule::in_process().unwrap();
    let new = module.get(FUNC_REGISTRY, EXT_NEW).unwrap().unwrap();
    let get = module.get(FUNC_REGISTRY, EXT_GET).unwrap().unwrap();
    let transform = module.get(FUNC_REGISTRY, EXT_TRANSFORM).unwrap().unwrap();
    let release = module.get(FUNC_REGISTRY, EXT_RELEASE).unwrap().unwrap();

    let created = new.call(()).unwrap();
    assert_eq!(created.tag().unwrap(), TypeTag::Extension(32));
    assert!(!created.is_owned());
    let ext: ExtRef<'_, SampleExt> = created.get().unwrap();

    let transformed = transform.call((ext,)).unwrap();
    let upper: ExtRef<'_, SampleExt> = transformed.get().unwrap();

    assert_eq!(get.invoke::<String, _>((ext,)).unwrap(), "run!");
    assert_eq!(get.invoke::<String, _>((upper,)).unwrap(), "RUN!");

    release.call((upper,)).unwrap();
    release.call((ext,)).unwrap();
}

#[test]
fn test_copy_on_return_owns_a_copy() {
    setup();
    let current = PackedFunc::lookup("snapshot.current").unwrap();

    let first = current.call(()).unwrap();
    let second = current.call(()).unwrap();
    assert!(first.is_owned());

    let a: ExtRef<'_, Snapshot> = first.get().unwrap();
    let b: ExtRef<'_, Snapshot> = second.get().unwrap();
    assert_eq!(a.label, "kept");
    assert_eq!(a.get(), b.get());
    assert_ne!(a.as_ptr(), b.as_ptr());
}

#[test]
fn test_unregistered_extension_is_unsupported() {
    setup();
    let unlisted = PackedFunc::lookup("snapshot.unlisted").unwrap();
    assert!(matches!(
        unlisted.call(()).unwrap_err(),
        PackedError::ExtensionNotRegistered { tag: 41 }
    ));
}

#[test]
fn test_sequence_of_extension_objects() {
    setup();
    let names = PackedFunc::lookup("sample.names").unwrap();
    let first = SampleExt::default();
    let second = SampleExt {
        name: "walk".to_string(),
    };

    let joined: String = names
        .invoke((vec![ExtRef::new(&first), ExtRef::new(&second)],))
        .unwrap();
    assert_eq!(joined, "run,walk");
}

#[test]
fn test_wrong_extension_type_rejected() {
    setup();
    let get = PackedFunc::lookup(EXT_GET).unwrap();
    let snapshot = Snapshot {
        label: "other".to_string(),
    };
    assert!(matches!(
        get.call((ExtRef::new(&snapshot),)).unwrap_err(),
        PackedError::TypeMismatch {
            expected: TypeTag::Extension(32),
            found: TypeTag::Extension(40)
        }
    ));
}
