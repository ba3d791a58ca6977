//! Global name registry
//!
//! One process-wide registry per stored type. Entries are leaked on
//! registration and never removed, so handed-out references are `'static`.
//! The mutex guards the name map only; entries synchronize themselves.

use std::collections::BTreeMap;
use std::fmt;

use parking_lot::Mutex;

use crate::errors::RegistryError;
use crate::logging::{log_duplicate_registration, log_lookup_miss, log_registration};

/// Types stored in a global registry
pub trait Registrable: Send + Sync + Sized + 'static {
    /// Name used for the registry in logs and at the ABI boundary
    const REGISTRY_NAME: &'static str;

    /// Fresh entry for `name`
    fn create(name: &str) -> Self;

    /// The process-wide registry for this type
    fn registry() -> &'static Registry<Self>;

    /// Register `name`; panics if it is already taken
    fn register(name: &str) -> &'static Self {
        Self::registry().register(name)
    }

    fn try_register(name: &str) -> Result<&'static Self, RegistryError> {
        Self::registry().try_register(name)
    }

    fn lookup(name: &str) -> Option<&'static Self> {
        Self::registry().get(name)
    }

    fn list_names() -> Vec<String> {
        Self::registry().list_names()
    }
}

/// Name-keyed store of leaked entries
pub struct Registry<T: 'static> {
    name: &'static str,
    entries: Mutex<BTreeMap<String, &'static T>>,
}

impl<T: Registrable> Registry<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Insert a fresh entry, refusing an existing name
    pub fn try_register(&self, name: &str) -> Result<&'static T, RegistryError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(name) {
            return Err(RegistryError::Duplicate {
                registry: self.name,
                name: name.to_string(),
            });
        }

        let entry: &'static T = Box::leak(Box::new(T::create(name)));
        entries.insert(name.to_string(), entry);
        log_registration(self.name, name);
        Ok(entry)
    }

    /// Insert a fresh entry
    ///
    /// # Panics
    /// If `name` is already registered. Registration happens at start-up, so
    /// a duplicate is a wiring defect.
    pub fn register(&self, name: &str) -> &'static T {
        match self.try_register(name) {
            Ok(entry) => entry,
            Err(err) => {
                log_duplicate_registration(self.name, name);
                panic!("{}", err);
            }
        }
    }

    /// Look up an entry; absence is not an error
    pub fn get(&self, name: &str) -> Option<&'static T> {
        let found = self.entries.lock().get(name).copied();
        if found.is_none() {
            log_lookup_miss(self.name, name);
        }
        found
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.lock().contains_key(name)
    }

    /// Snapshot of every registered name, sorted
    pub fn list_names(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<T> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("name", &self.name)
            .field("len", &self.entries.lock().len())
            .finish()
    }
}

/// Give a type its process-wide registry
///
/// ```ignore
/// declare_registry!(Widget, "Widget", Widget::named);
/// ```
#[macro_export]
macro_rules! declare_registry {
    ($ty:ty, $name:expr, $create:expr) => {
        impl $crate::registry::Registrable for $ty {
            const REGISTRY_NAME: &'static str = $name;

            fn create(name: &str) -> Self {
                ($create)(name)
            }

            fn registry() -> &'static $crate::registry::Registry<Self> {
                static REGISTRY: $crate::once_cell::sync::Lazy<$crate::registry::Registry<$ty>> =
                    $crate::once_cell::sync::Lazy::new(|| $crate::registry::Registry::new($name));
                &REGISTRY
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packed::PackedFunc;

    #[derive(Debug)]
    struct Setting {
        key: String,
    }

    impl Setting {
        fn named(name: &str) -> Self {
            Self { key: name.to_string() }
        }
    }

    crate::declare_registry!(Setting, "Setting", Setting::named);

    #[test]
    fn test_register_then_get() {
        let entry = Setting::register("registry.tests.alpha");
        assert_eq!(entry.key, "registry.tests.alpha");
        let found = Setting::lookup("registry.tests.alpha").unwrap();
        assert!(core::ptr::eq(entry, found));
    }

    #[test]
    fn test_unknown_name_is_absent() {
        assert!(Setting::lookup("registry.tests.missing").is_none());
    }

    #[test]
    fn test_duplicate_is_refused() {
        Setting::register("registry.tests.dup");
        assert!(matches!(
            Setting::try_register("registry.tests.dup"),
            Err(RegistryError::Duplicate { registry: "Setting", .. })
        ));
    }

    #[test]
    #[should_panic(expected = "already has an entry named 'registry.tests.fatal'")]
    fn test_duplicate_register_panics() {
        Setting::register("registry.tests.fatal");
        Setting::register("registry.tests.fatal");
    }

    #[test]
    fn test_local_registry_lists_exactly_registered() {
        let registry: Registry<Setting> = Registry::new("Local");
        registry.register("b");
        registry.register("a");
        assert_eq!(registry.list_names(), vec!["a", "b"]);
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("a"));
        assert!(!registry.contains("c"));
    }

    #[test]
    fn test_registries_are_per_type() {
        Setting::register("registry.tests.shared");
        assert!(PackedFunc::lookup("registry.tests.shared").is_none());
        let func = PackedFunc::register("registry.tests.shared");
        assert_eq!(func.name(), Some("registry.tests.shared"));
    }
}
