//! Name-to-factory lookup for accessors and adapters
//!
//! Pool configuration names its backends by string; the registry turns
//! those names into trait objects once, when the pool is built.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use super::accessor::{Accessor, DropboxAccessor, FileSystemAccessor, MemoryAccessor};
use super::adapter::{Adapter, IdentityAdapter, RenameFieldsAdapter};
use super::config::ConfigError;

/// Factory arguments: configured `kwargs` plus the config file's directory
#[derive(Debug, Clone, Copy)]
pub struct Kwargs<'a> {
    pub values: &'a Value,
    pub base_dir: &'a Path,
}

impl<'a> Kwargs<'a> {
    pub fn str(&self, key: &str) -> Option<&'a str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// A path argument, resolved against the config directory if relative
    pub fn path(&self, key: &str) -> Option<PathBuf> {
        self.str(key).map(|raw| {
            let path = Path::new(raw);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                self.base_dir.join(path)
            }
        })
    }

    fn require_path(&self, accessor: &str, key: &str) -> Result<PathBuf, ConfigError> {
        self.path(key).ok_or_else(|| {
            ConfigError::Invalid(format!("accessor '{}' requires kwargs.{}", accessor, key))
        })
    }
}

pub type AccessorFactory =
    Arc<dyn Fn(Kwargs<'_>) -> Result<Arc<dyn Accessor>, ConfigError> + Send + Sync>;

pub type AdapterFactory =
    Arc<dyn Fn(Kwargs<'_>) -> Result<Arc<dyn Adapter>, ConfigError> + Send + Sync>;

/// Accessor and adapter factories keyed by name
#[derive(Clone)]
pub struct Registry {
    accessors: HashMap<String, AccessorFactory>,
    adapters: HashMap<String, AdapterFactory>,
}

impl Default for Registry {
    fn default() -> Self {
        let mut registry = Self::empty();

        registry.register_accessor("fs", |kwargs| {
            let root = kwargs.require_path("fs", "root")?;
            Ok(Arc::new(FileSystemAccessor::new(root)))
        });
        registry.register_accessor("fs-dropbox", |kwargs| {
            let root = kwargs.require_path("fs-dropbox", "root")?;
            Ok(Arc::new(DropboxAccessor::new(root)))
        });
        registry.register_accessor("memory", |_| Ok(Arc::new(MemoryAccessor::new())));

        registry.register_adapter("identity", |_| Ok(Arc::new(IdentityAdapter)));
        registry.register_adapter("rename-fields", |kwargs| {
            let mapping: BTreeMap<String, String> = match kwargs.values.get("fields") {
                Some(fields) => serde_json::from_value(fields.clone()).map_err(|e| {
                    ConfigError::Invalid(format!("rename-fields kwargs.fields: {}", e))
                })?,
                None => BTreeMap::new(),
            };
            Ok(Arc::new(RenameFieldsAdapter::new(mapping)))
        });

        registry
    }
}

impl Registry {
    /// A registry without any built-ins
    pub fn empty() -> Self {
        Self {
            accessors: HashMap::new(),
            adapters: HashMap::new(),
        }
    }

    pub fn register_accessor<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn(Kwargs<'_>) -> Result<Arc<dyn Accessor>, ConfigError> + Send + Sync + 'static,
    {
        self.accessors.insert(name.to_string(), Arc::new(factory));
        self
    }

    pub fn register_adapter<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn(Kwargs<'_>) -> Result<Arc<dyn Adapter>, ConfigError> + Send + Sync + 'static,
    {
        self.adapters.insert(name.to_string(), Arc::new(factory));
        self
    }

    pub fn has_accessor(&self, name: &str) -> bool {
        self.accessors.contains_key(name)
    }

    pub fn has_adapter(&self, name: &str) -> bool {
        self.adapters.contains_key(name)
    }

    pub fn create_accessor(
        &self,
        name: &str,
        kwargs: Kwargs<'_>,
    ) -> Result<Arc<dyn Accessor>, ConfigError> {
        let factory = self
            .accessors
            .get(name)
            .ok_or_else(|| ConfigError::UnknownAccessor(name.to_string()))?;
        factory(kwargs)
    }

    pub fn create_adapter(
        &self,
        name: &str,
        kwargs: Kwargs<'_>,
    ) -> Result<Arc<dyn Adapter>, ConfigError> {
        let factory = self
            .adapters
            .get(name)
            .ok_or_else(|| ConfigError::UnknownAdapter(name.to_string()))?;
        factory(kwargs)
    }

    /// Registered accessor names, sorted
    pub fn accessor_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.accessors.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut adapters: Vec<&String> = self.adapters.keys().collect();
        adapters.sort();
        f.debug_struct("Registry")
            .field("accessors", &self.accessor_names())
            .field("adapters", &adapters)
            .finish()
    }
}
