use crate::{elasticsearch, memory, Backend, ConfigMap, Error};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Factory builds an uninitialized Backend.
pub type Factory = fn() -> Box<dyn Backend>;

/// BackendConfig selects a registered backend by name, and carries the
/// free-form configuration passed to its `init`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    #[serde(default)]
    pub config: ConfigMap,
}

/// Mount is an initialized, shareable Backend.
#[derive(Clone)]
pub struct Mount {
    pub name: String,
    pub config: ConfigMap,
    pub backend: Arc<dyn Backend>,
}

impl std::fmt::Debug for Mount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mount").field("name", &self.name).finish()
    }
}

/// Registry maps backend names to the factories which build them.
/// Names are matched case-insensitively.
pub struct Registry {
    factories: BTreeMap<String, Factory>,
}

impl Registry {
    /// A Registry having no registered backends.
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, factory: Factory) -> Result<(), Error> {
        let name = name.to_lowercase();

        if self.factories.contains_key(&name) {
            return Err(Error::DuplicateBackend(name));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Build and initialize the backend selected by `config`.
    #[tracing::instrument(skip_all, fields(backend = %config.name))]
    pub async fn mount(&self, config: &BackendConfig) -> Result<Mount, Error> {
        let Some(factory) = self.factories.get(&config.name.to_lowercase()) else {
            return Err(Error::UnknownBackend(config.name.clone()));
        };

        let mut backend = factory();
        backend.init(&config.config).await?;

        tracing::info!("backend has been initialized");

        Ok(Mount {
            name: config.name.clone(),
            config: config.config.clone(),
            backend: Arc::from(backend),
        })
    }
}

impl Default for Registry {
    /// A Registry of all built-in backends.
    fn default() -> Self {
        let mut registry = Self::empty();

        registry
            .factories
            .insert(elasticsearch::NAME.to_string(), elasticsearch::factory);
        registry
            .factories
            .insert(memory::NAME.to_string(), memory::factory);

        registry
    }
}
