//! Crate-level error for storage operations

use thiserror::Error;

use crate::domain::FormatError;
use crate::schema::SchemaError;
use crate::storage::{AccessorError, ConfigError};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("Failed to {op} {item} on storage '{storage}'")]
    Accessor {
        item: String,
        storage: String,
        op: &'static str,
        #[source]
        source: AccessorError,
    },

    #[error("There is no data available for item: {0}")]
    Item(String),

    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Metadata error for {item}: {reason}")]
    Metadata { item: String, reason: String },

    #[error("Project name '{project}' not found in path '{path}'")]
    ProjectNameNotFound { project: String, path: String },
}

pub type Result<T, E = StorageError> = std::result::Result<T, E>;
