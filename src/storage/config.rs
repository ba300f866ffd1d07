//! Pool configuration and user settings
//!
//! A pool config (YAML, or TOML/JSON by extension) lists the storage tiers
//! of one project in resolution order:
//!
//! ```yaml
//! project: demo
//! write_order: local_first
//! storages:
//!   - name: local
//!     schema: studio
//!     tag_mask: "render | model"
//!     accessor: {name: fs, kwargs: {root: /mnt/local}}
//!     fields:
//!       shot: {regex: 'sh\d{3}'}
//!       _version_: {format: 03d, type: int}
//! ```
//!
//! User settings live in `config.toml` under the platform config directory
//! (or at `$ASSETPOOL_CONFIG`).

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::{FieldConfig, TagMask};

use super::registry::Registry;

/// Overrides the settings file location
pub const CONFIG_ENV: &str = "ASSETPOOL_CONFIG";

/// Platform-separated list of directories holding named schemas
pub const SCHEMA_PATH_ENV: &str = "ASSETPOOL_SCHEMA_PATH";

/// Overrides the user recorded in metadata and revisions
pub const USER_ENV: &str = "ASSETPOOL_USER";

static TAG_MASK_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w\s\-\.&|^()]*$").expect("valid regex"));

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse configuration '{path}': {reason}")]
    Parse { path: String, reason: String },

    #[error("Failed to read '{path}': {reason}")]
    Io { path: String, reason: String },

    #[error("Unknown accessor '{0}'")]
    UnknownAccessor(String),

    #[error("Unknown adapter '{0}'")]
    UnknownAdapter(String),

    #[error("Unable to find schema with name '{0}'")]
    SchemaNotFound(String),

    #[error("Failed to create storage '{storage}': {reason}")]
    Storage { storage: String, reason: String },
}

/// Order in which a write reaches the tiers of a chain
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WriteOrder {
    /// Write this tier, then the ones upstream of it
    #[default]
    LocalFirst,
    /// Write upstream tiers first, this tier last
    UpstreamFirst,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccessorConfig {
    pub name: String,

    #[serde(default)]
    pub kwargs: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdapterConfig {
    pub name: String,

    #[serde(default)]
    pub kwargs: Value,
}

/// One tier of the pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    pub name: String,

    /// Schema directory or schema name on the search path
    pub schema: String,

    #[serde(default)]
    pub fields: FieldConfig,

    pub accessor: AccessorConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter: Option<AdapterConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_mask: Option<String>,
}

impl StorageConfig {
    /// The tag mask, if one is set and not blank
    pub fn effective_tag_mask(&self) -> Option<&str> {
        self.tag_mask.as_deref().filter(|m| !m.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    pub project: String,

    pub storages: Vec<StorageConfig>,

    #[serde(default)]
    pub write_order: WriteOrder,

    /// Directory relative paths are resolved against
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl PoolConfig {
    /// Reads a pool config, picking the parser by file extension
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let parse_err = |reason: String| ConfigError::Parse {
            path: path.display().to_string(),
            reason,
        };

        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let mut config: PoolConfig = match extension.as_str() {
            "toml" => toml::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
            "json" => serde_json::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
            _ => serde_yaml::from_str(&content).map_err(|e| parse_err(e.to_string()))?,
        };

        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })
    }

    /// Checks the config against the registry before any tier is built
    pub fn validate(&self, registry: &Registry) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.project.trim().is_empty() {
            return invalid("'project' must not be empty".to_string());
        }
        if self.storages.is_empty() {
            return invalid("'storages' must list at least one storage".to_string());
        }

        let mut names = HashSet::new();
        for storage in &self.storages {
            let name = storage.name.trim();
            if name.is_empty() {
                return invalid("storage 'name' must not be empty".to_string());
            }
            if !names.insert(name) {
                return invalid(format!("duplicate storage name '{}'", name));
            }
            if storage.schema.trim().is_empty() {
                return invalid(format!("storage '{}' has an empty 'schema'", name));
            }

            for (field, options) in &storage.fields {
                let values = [
                    ("regex", &options.regex),
                    ("format", &options.format),
                    ("label", &options.label),
                ];
                for (key, value) in values {
                    if matches!(value, Some(v) if v.is_empty()) {
                        return invalid(format!(
                            "storage '{}' field '{}' has an empty '{}'",
                            name, field, key
                        ));
                    }
                }
                if matches!(&options.choices, Some(c) if c.is_empty()) {
                    return invalid(format!(
                        "storage '{}' field '{}' has empty 'choices'",
                        name, field
                    ));
                }
            }

            if !registry.has_accessor(&storage.accessor.name) {
                return Err(ConfigError::UnknownAccessor(storage.accessor.name.clone()));
            }
            if let Some(adapter) = &storage.adapter {
                if !registry.has_adapter(&adapter.name) {
                    return Err(ConfigError::UnknownAdapter(adapter.name.clone()));
                }
            }

            if let Some(mask) = storage.effective_tag_mask() {
                if !TAG_MASK_CHARS.is_match(mask) {
                    return invalid(format!(
                        "storage '{}' tag_mask '{}' contains invalid characters",
                        name, mask
                    ));
                }
                TagMask::parse(mask).map_err(|e| {
                    ConfigError::Invalid(format!("storage '{}': {}", name, e))
                })?;
            }
        }

        Ok(())
    }

    pub fn base_dir(&self) -> PathBuf {
        self.base_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Finds a schema directory by path or by name on the search path
pub fn resolve_schema(
    name: &str,
    base_dir: &Path,
    search_paths: &[PathBuf],
) -> Result<PathBuf, ConfigError> {
    let direct = Path::new(name);
    let candidates = if direct.is_absolute() {
        vec![direct.to_path_buf()]
    } else {
        std::iter::once(base_dir.join(direct))
            .chain(search_paths.iter().map(|p| p.join(direct)))
            .collect()
    };

    candidates
        .into_iter()
        .find(|candidate| candidate.is_dir())
        .ok_or_else(|| ConfigError::SchemaNotFound(name.to_string()))
}

/// Output format preference
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Per-user settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Extra directories searched for named schemas
    pub schema_path: Vec<PathBuf>,

    /// User recorded in metadata and revision ownership
    pub user: Option<String>,

    /// Default pool config
    pub pool: Option<PathBuf>,

    /// Default local session store
    pub session: Option<PathBuf>,

    pub default_format: OutputFormat,
}

impl Settings {
    /// Returns the platform config directory
    pub fn config_dir() -> Option<PathBuf> {
        ProjectDirs::from("dev", "assetpool", "assetpool")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Settings file location, honouring `$ASSETPOOL_CONFIG`
    pub fn path() -> Option<PathBuf> {
        env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .or_else(|| Self::config_dir().map(|dir| dir.join("config.toml")))
    }

    /// Loads settings, falling back to defaults when no file exists
    pub fn load() -> Result<Self, ConfigError> {
        match Self::path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Gets the effective user from settings, environment, or the OS login
    pub fn effective_user(&self) -> String {
        self.user
            .clone()
            .or_else(|| env::var(USER_ENV).ok().filter(|u| !u.is_empty()))
            .unwrap_or_else(whoami::username)
    }

    /// Schema search path: `$ASSETPOOL_SCHEMA_PATH` entries, then settings
    pub fn schema_search_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = env::var_os(SCHEMA_PATH_ENV)
            .map(|value| env::split_paths(&value).collect())
            .unwrap_or_default();
        paths.extend(self.schema_path.iter().cloned());
        paths
    }
}
