//! Process-wide schema cache
//!
//! Each distinct schema directory is loaded once. Concurrent first loads
//! of the same directory block on a shared cell instead of walking the
//! tree twice.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::{Lazy, OnceCell};
use parking_lot::Mutex;
use tracing::debug;

use super::{SchemaError, SchemaTree};

type Slot = Arc<OnceCell<Arc<SchemaTree>>>;

static SCHEMAS: Lazy<Mutex<HashMap<PathBuf, Slot>>> = Lazy::new(|| Mutex::new(HashMap::new()));

pub struct SchemaRegistry;

impl SchemaRegistry {
    /// Returns the shared tree for a directory, loading it on first use
    pub fn load(dir: &Path) -> Result<Arc<SchemaTree>, SchemaError> {
        let key = dir
            .canonicalize()
            .map_err(|_| SchemaError::NotFound(dir.to_path_buf()))?;

        let slot = SCHEMAS.lock().entry(key.clone()).or_default().clone();

        slot.get_or_try_init(|| {
            debug!(dir = %key.display(), "loading schema");
            SchemaTree::load(&key).map(Arc::new)
        })
        .cloned()
    }

    /// Forgets every loaded schema
    pub fn clear() {
        SCHEMAS.lock().clear();
    }

    /// Number of directories with a loaded (or loading) schema
    pub fn len() -> usize {
        SCHEMAS.lock().len()
    }
}
