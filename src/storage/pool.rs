//! Ordered set of tiers for one project

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::domain::{Fields, Identifier, TagSet};
use crate::error::StorageError;
use crate::schema::BuildReport;

use super::accessor::normalize_rpath;
use super::config::{PoolConfig, Settings};
use super::item::{MetaItem, StorageItem};
use super::registry::Registry;
use super::tier::{PoolContext, Storage};

/// Entries kept per lookup cache before it is flushed
const CACHE_LIMIT: usize = 4096;

/// Resolves identities against an ordered list of storages
#[derive(Debug)]
pub struct StoragePool {
    context: Arc<PoolContext>,
    storages: Vec<Arc<Storage>>,
    items: RwLock<HashMap<TagSet, Option<MetaItem>>>,
    filenames: RwLock<HashMap<String, Option<StorageItem>>>,
}

impl StoragePool {
    /// Validates the config and builds every tier
    pub fn new(
        config: &PoolConfig,
        registry: &Registry,
        settings: &Settings,
    ) -> Result<Self, StorageError> {
        config.validate(registry)?;

        let context = Arc::new(PoolContext {
            project: config.project.clone(),
            user: settings.effective_user(),
            write_order: config.write_order,
        });

        let base_dir = config.base_dir();
        let search_paths = settings.schema_search_paths();

        let storages = config
            .storages
            .iter()
            .map(|storage| {
                Storage::from_config(
                    storage,
                    Arc::clone(&context),
                    registry,
                    &base_dir,
                    &search_paths,
                )
                .map(Arc::new)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::from_storages(context, storages))
    }

    /// Loads a pool config file with the built-in registry
    pub fn load(path: &Path, settings: &Settings) -> Result<Self, StorageError> {
        let config = PoolConfig::load(path)?;
        Self::new(&config, &Registry::default(), settings)
    }

    /// Assembles a pool from already built storages
    pub fn from_storages(context: Arc<PoolContext>, storages: Vec<Arc<Storage>>) -> Self {
        Self {
            context,
            storages,
            items: RwLock::new(HashMap::new()),
            filenames: RwLock::new(HashMap::new()),
        }
    }

    pub fn project(&self) -> &str {
        &self.context.project
    }

    pub fn user(&self) -> &str {
        &self.context.user
    }

    pub fn storages(&self) -> &[Arc<Storage>] {
        &self.storages
    }

    pub fn storage(&self, name: &str) -> Option<&Arc<Storage>> {
        self.storages.iter().find(|s| s.name() == name)
    }

    /// Chain of every storage serving exactly these tags, in pool order
    pub fn get_item(&self, tags: &TagSet) -> Option<MetaItem> {
        if let Some(hit) = self.items.read().get(tags) {
            return hit.clone();
        }

        let item = MetaItem::chain(tags.clone(), &self.storages);
        debug!(
            tags = ?tags,
            tiers = item.as_ref().map(MetaItem::chain_len).unwrap_or(0),
            "resolved item"
        );

        let mut cache = self.items.write();
        if cache.len() >= CACHE_LIMIT {
            cache.clear();
        }
        cache.insert(tags.clone(), item.clone());
        item
    }

    pub fn get_storage_item(
        &self,
        identifier: &Identifier,
    ) -> Result<Option<StorageItem>, StorageError> {
        match self.get_item(&identifier.tags) {
            Some(item) => item.get_storage_item(&identifier.fields).map(Some),
            None => Ok(None),
        }
    }

    /// Identity of a path relative to the project, first storage wins
    pub fn identifier_from_rpath(&self, rpath: &str) -> Option<Identifier> {
        self.storages
            .iter()
            .find_map(|storage| storage.identifier_from_rpath(rpath))
    }

    /// Resolves a local path back to its storage item
    ///
    /// Paths under a storage's mount resolve relative to that mount. Any
    /// other path must contain `/<project>/`, which is where its rpath
    /// starts.
    pub fn storage_item_from_filename(
        &self,
        filename: &str,
    ) -> Result<Option<StorageItem>, StorageError> {
        let normalized = format!("/{}", normalize_rpath(filename));

        if let Some(hit) = self.filenames.read().get(&normalized) {
            return Ok(hit.clone());
        }

        let mut item = None;
        for storage in &self.storages {
            let Some(rpath) = storage.accessor().rpath_from_filesystem_path(Path::new(filename))
            else {
                continue;
            };
            item = self.storage_item_from_rpath(&rpath)?;
            if item.is_some() {
                debug!(storage = storage.name(), %rpath, "resolved filename under storage root");
                break;
            }
        }

        if item.is_none() {
            let marker = format!("/{}/", self.project());
            let start = normalized
                .find(&marker)
                .ok_or_else(|| StorageError::ProjectNameNotFound {
                    project: self.project().to_string(),
                    path: filename.to_string(),
                })?;
            item = self.storage_item_from_rpath(&normalized[start + 1..])?;
        }

        let mut cache = self.filenames.write();
        if cache.len() >= CACHE_LIMIT {
            cache.clear();
        }
        cache.insert(normalized, item.clone());

        Ok(item)
    }

    fn storage_item_from_rpath(&self, rpath: &str) -> Result<Option<StorageItem>, StorageError> {
        for storage in &self.storages {
            let Some(identifier) = storage.identifier_from_rpath(rpath) else {
                continue;
            };
            if let Some(found) = self.get_storage_item(&identifier)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Scaffolds the structure for an identity on every storage serving it
    pub fn build_structure(
        &self,
        tags: &TagSet,
        fields: &Fields,
    ) -> Vec<(String, BuildReport)> {
        self.storages
            .iter()
            .filter(|storage| storage.is_matching(tags))
            .map(|storage| {
                (
                    storage.name().to_string(),
                    storage.build_structure(tags, fields),
                )
            })
            .collect()
    }

    /// Drops cached lookups
    pub fn clear_caches(&self) {
        self.items.write().clear();
        self.filenames.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{tag_set, FieldFormatter, FieldValue};
    use crate::schema::SchemaTree;
    use crate::storage::accessor::{Accessor, MemoryAccessor};
    use crate::storage::config::WriteOrder;
    use crate::storage::cursor::Cursor;
    use crate::storage::item::{ReadOptions, WriteOptions};
    use std::fs;
    use tempfile::TempDir;

    fn schema_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("project/shots/shot")).unwrap();
        fs::write(root.join("project.yml"), "format: '{project}'\n").unwrap();
        fs::write(
            root.join("project/shots/shot/anchor__render.yml"),
            "tags: [render]\nformat: 'render_v{_version_:03d}.exr'\n",
        )
        .unwrap();
        fs::write(
            root.join("project/anchor__notes.yml"),
            "tags: [notes]\nformat: 'notes.txt'\n",
        )
        .unwrap();
        dir
    }

    struct Fixture {
        _schema: TempDir,
        pool: StoragePool,
        local: Arc<MemoryAccessor>,
        remote: Arc<MemoryAccessor>,
    }

    fn fixture() -> Fixture {
        let schema_dir = schema_dir();
        let schema = Arc::new(SchemaTree::load(schema_dir.path()).unwrap());
        let context = Arc::new(PoolContext {
            project: "demo".into(),
            user: "lee".into(),
            write_order: WriteOrder::LocalFirst,
        });

        let local = Arc::new(MemoryAccessor::new());
        let remote = Arc::new(MemoryAccessor::new());

        let tier = |name: &str, accessor: Arc<MemoryAccessor>, mask: Option<&str>| {
            Arc::new(Storage::new(
                name,
                Arc::clone(&context),
                accessor,
                Arc::clone(&schema),
                FieldFormatter::new(Default::default()).unwrap(),
                None,
                mask.map(|m| crate::domain::TagMask::parse(m).unwrap()),
            ))
        };

        let storages = vec![
            tier("local", Arc::clone(&local), None),
            tier("remote", Arc::clone(&remote), Some("render")),
        ];

        Fixture {
            _schema: schema_dir,
            pool: StoragePool::from_storages(Arc::clone(&context), storages),
            local,
            remote,
        }
    }

    fn render(shot: i64, version: i64) -> Identifier {
        let mut fields = Fields::new();
        fields.insert("shot".into(), FieldValue::Int(shot));
        fields.insert("_version_".into(), FieldValue::Int(version));
        Identifier::new(["render"], fields)
    }

    #[test]
    fn chain_follows_pool_order_and_tag_masks() {
        let f = fixture();

        let render = f.pool.get_item(&tag_set(["render"])).unwrap();
        assert_eq!(render.storage_names(), vec!["local", "remote"]);

        let notes = f.pool.get_item(&tag_set(["notes"])).unwrap();
        assert_eq!(notes.storage_names(), vec!["local"]);

        assert!(f.pool.get_item(&tag_set(["unknown"])).is_none());
    }

    #[test]
    fn read_falls_back_upstream() {
        let f = fixture();
        f.remote.write("demo/shots/10/render_v001.exr", b"pixels").unwrap();

        let mut item = f.pool.get_storage_item(&render(10, 1)).unwrap().unwrap();
        assert_eq!(item.rpath(), "demo/shots/10/render_v001.exr");
        assert!(!item.exists().unwrap());
        assert!(item.exists_upstream().unwrap());

        let data = item.read(ReadOptions::default()).unwrap();
        assert_eq!(data.as_deref(), Some(&b"pixels"[..]));

        let only_local = item
            .read(ReadOptions {
                current_item_only: true,
                ..Default::default()
            })
            .unwrap();
        assert!(only_local.is_none());
    }

    #[test]
    fn write_skips_existing_tiers_unless_forced() {
        let f = fixture();
        f.remote.write("demo/shots/10/render_v001.exr", b"old").unwrap();

        let item = f.pool.get_storage_item(&render(10, 1)).unwrap().unwrap();
        item.write(b"new", WriteOptions::default()).unwrap();

        assert_eq!(f.local.read("demo/shots/10/render_v001.exr").unwrap().unwrap(), b"new");
        assert_eq!(f.remote.read("demo/shots/10/render_v001.exr").unwrap().unwrap(), b"old");

        item.write(
            b"new",
            WriteOptions {
                force: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(f.remote.read("demo/shots/10/render_v001.exr").unwrap().unwrap(), b"new");
    }

    #[test]
    fn pull_copies_downstream_once() {
        let f = fixture();
        f.remote.write("demo/shots/10/render_v002.exr", b"pixels").unwrap();

        let mut item = f
            .pool
            .get_storage_item(&render(10, 2))
            .unwrap()
            .unwrap()
            .most_upstream();

        let pulled = item.pull(true, false).unwrap();
        assert_eq!(pulled.as_deref(), Some(&b"pixels"[..]));
        assert!(f.local.exists("demo/shots/10/render_v002.exr").unwrap());
        assert!(f.local.exists("demo/shots/10/render_v002.exr.meta").unwrap());

        assert!(item.pull(true, false).unwrap().is_none());
    }

    #[test]
    fn pull_of_missing_data_is_an_item_error() {
        let f = fixture();
        let mut item = f.pool.get_storage_item(&render(10, 9)).unwrap().unwrap();
        assert!(matches!(item.pull(false, false), Err(StorageError::Item(_))));
    }

    #[test]
    fn cursor_lists_versions() {
        let f = fixture();
        for version in [1, 2, 5] {
            let rpath = format!("demo/shots/10/render_v{:03}.exr", version);
            f.remote.write(&rpath, b"x").unwrap();
            f.remote.write(&format!("{}.meta", rpath), b"{}").unwrap();
        }

        let meta = f.pool.get_item(&tag_set(["render"])).unwrap();
        let mut fields = Fields::new();
        fields.insert("shot".into(), FieldValue::Int(10));
        let cursor = Cursor::new(meta, fields);

        let values = cursor.values(true).unwrap();
        assert_eq!(
            values,
            vec![FieldValue::Int(1), FieldValue::Int(2), FieldValue::Int(5)]
        );
        assert!(cursor.values(false).unwrap().is_empty());

        let latest = cursor.latest(true).unwrap().unwrap();
        assert_eq!(latest.rpath(), "demo/shots/10/render_v005.exr");

        assert_eq!(cursor.pull(false).unwrap(), 3);
        assert_eq!(cursor.values(false).unwrap().len(), 3);
    }

    #[test]
    fn remove_propagates() {
        let f = fixture();
        let item = f.pool.get_storage_item(&render(10, 1)).unwrap().unwrap();
        item.write(b"x", WriteOptions::default()).unwrap();

        item.remove(false).unwrap();
        assert!(!f.local.exists("demo/shots/10/render_v001.exr").unwrap());
        assert!(f.remote.exists("demo/shots/10/render_v001.exr").unwrap());

        item.remove(true).unwrap();
        assert!(!f.remote.exists("demo/shots/10/render_v001.exr").unwrap());
    }

    #[test]
    fn filename_resolution() {
        let f = fixture();

        let item = f
            .pool
            .storage_item_from_filename("/mnt/studio/demo/shots/10/render_v003.exr")
            .unwrap()
            .unwrap();
        assert_eq!(item.tags(), &tag_set(["render"]));
        assert_eq!(item.fields().get("_version_"), Some(&FieldValue::Int(3)));

        let err = f
            .pool
            .storage_item_from_filename("/mnt/studio/other/shots/10/render_v003.exr")
            .unwrap_err();
        assert!(matches!(err, StorageError::ProjectNameNotFound { .. }));

        assert!(f
            .pool
            .storage_item_from_filename("/mnt/demo/unrelated.bin")
            .unwrap()
            .is_none());
    }
}
