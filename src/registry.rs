//! Typed backend registries.
//!
//! Backends (cache engines, metrics exporters, document stores) are
//! resolved by name from a [`Registry`] parameterized by the interface they
//! implement. Factories may only be added before the service starts;
//! resolving an unregistered name yields [`crate::ErrorKind::UnknownBackend`]
//! so configuration typos fail loudly at startup rather than falling back
//! to a default.

use {
    crate::config::Config,
    crate::{Error, Result},
    parking_lot::RwLock,
    std::collections::HashMap,
    std::sync::Arc,
    std::sync::atomic::{AtomicBool, Ordering},
};

/// A factory producing a backend instance from the service configuration.
pub type Factory<T> = Arc<dyn Fn(&Config) -> Result<Arc<T>> + Send + Sync>;

/// Name-keyed registry of backend factories for one interface `T`.
pub struct Registry<T: ?Sized> {
    factories: RwLock<HashMap<String, Factory<T>>>,
    frozen: AtomicBool,
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Registry<T> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
            frozen: AtomicBool::new(false),
        }
    }

    /// Adds a factory under a name, replacing any previous one.
    ///
    /// Rejected once the registry is frozen by `Service::start()`.
    pub fn register<F>(&self, name: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn(&Config) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        if self.frozen.load(Ordering::SeqCst) {
            return Err(Error::already_running("backend registry"));
        }
        self.factories.write().insert(name.into(), Arc::new(factory));
        Ok(())
    }

    /// Freezes the registry against further registration.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::SeqCst);
    }

    /// Builds the backend registered under `name`.
    pub fn resolve(&self, name: &str, config: &Config) -> Result<Arc<T>> {
        let factory = self
            .factories
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::unknown_backend(name))?;
        factory(config)
    }

    /// Returns the registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync + std::fmt::Debug {
        fn greet(&self) -> String;
    }

    #[derive(Debug)]
    struct English;
    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".into()
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let registry: Registry<dyn Greeter> = Registry::new();
        registry
            .register("english", |_config| Ok(Arc::new(English) as Arc<dyn Greeter>))
            .unwrap();

        let config = Config::default();
        let greeter = registry.resolve("english", &config).unwrap();
        assert_eq!(greeter.greet(), "hello");
        assert_eq!(registry.names(), vec!["english".to_string()]);
    }

    #[test]
    fn test_unknown_name_is_distinct_error() {
        let registry: Registry<dyn Greeter> = Registry::new();
        let err = registry.resolve("klingon", &Config::default()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::UnknownBackend);
        assert!(err.to_string().contains("klingon"));
    }

    #[test]
    fn test_frozen_registry_rejects_registration() {
        let registry: Registry<dyn Greeter> = Registry::new();
        registry.freeze();
        let err = registry
            .register("late", |_config| Ok(Arc::new(English) as Arc<dyn Greeter>))
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::AlreadyRunning);
    }

    #[test]
    fn test_resolution_still_works_after_freeze() {
        let registry: Registry<dyn Greeter> = Registry::new();
        registry
            .register("english", |_config| Ok(Arc::new(English) as Arc<dyn Greeter>))
            .unwrap();
        registry.freeze();
        assert!(registry.resolve("english", &Config::default()).is_ok());
    }
}
