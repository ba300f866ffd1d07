//! Resolved items and their tier chains
//!
//! A [`MetaItem`] is a tag-set resolved against every tier that serves it,
//! in pool order. A [`StorageItem`] is the same chain with concrete fields
//! applied, one rpath per tier.
//!
//! Position 0 is the most downstream (local) tier; higher positions are
//! more upstream (authoritative). "Upstream" and "downstream" are plain
//! forward and reverse walks over that array.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::domain::{FieldValue, Fields, Identifier, ItemType, TagSet, PROJECT_FIELD};
use crate::error::StorageError;

use super::accessor::AccessorError;
use super::config::WriteOrder;
use super::metadata::{self, Metadata};
use super::tier::Storage;

#[derive(Debug, Clone)]
struct MetaTier {
    storage: Arc<Storage>,
    tags: TagSet,
    template: String,
    item_type: ItemType,
}

/// Tag-set resolved across the tiers of a pool
#[derive(Debug, Clone)]
pub struct MetaItem {
    tiers: Arc<Vec<MetaTier>>,
    index: usize,
}

impl MetaItem {
    /// Links every storage serving `tags`, or `None` if none does
    pub(crate) fn chain(tags: TagSet, storages: &[Arc<Storage>]) -> Option<MetaItem> {
        let tiers: Vec<MetaTier> = storages
            .iter()
            .filter_map(|storage| {
                let node = storage.node(&tags)?;
                Some(MetaTier {
                    storage: Arc::clone(storage),
                    tags: tags.clone(),
                    template: node.template().to_string(),
                    item_type: node.item_type(),
                })
            })
            .collect();

        if tiers.is_empty() {
            return None;
        }

        Some(MetaItem {
            tiers: Arc::new(tiers),
            index: 0,
        })
    }

    fn tier(&self) -> &MetaTier {
        &self.tiers[self.index]
    }

    fn at(&self, index: usize) -> MetaItem {
        MetaItem {
            tiers: Arc::clone(&self.tiers),
            index,
        }
    }

    pub fn tags(&self) -> &TagSet {
        &self.tier().tags
    }

    pub fn item_type(&self) -> ItemType {
        self.tier().item_type
    }

    pub fn template(&self) -> &str {
        &self.tier().template
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.tier().storage
    }

    pub fn project(&self) -> &str {
        self.storage().project()
    }

    /// Position of this tier in the chain, 0 being most downstream
    pub fn position(&self) -> usize {
        self.index
    }

    pub fn chain_len(&self) -> usize {
        self.tiers.len()
    }

    /// Storage names of the whole chain, downstream first
    pub fn storage_names(&self) -> Vec<&str> {
        self.tiers.iter().map(|t| t.storage.name()).collect()
    }

    /// Next more authoritative tier
    pub fn upstream(&self) -> Option<MetaItem> {
        (self.index + 1 < self.tiers.len()).then(|| self.at(self.index + 1))
    }

    /// Next more local tier
    pub fn downstream(&self) -> Option<MetaItem> {
        self.index.checked_sub(1).map(|i| self.at(i))
    }

    pub fn most_upstream(&self) -> MetaItem {
        self.at(self.tiers.len() - 1)
    }

    pub fn most_downstream(&self) -> MetaItem {
        self.at(0)
    }

    /// This tier followed by every tier upstream of it
    pub fn iter_chain(&self) -> impl Iterator<Item = MetaItem> + '_ {
        (self.index..self.tiers.len()).map(move |i| self.at(i))
    }

    /// Appends another chain as the upstream tail of this one
    pub fn with_upstream(&self, tail: &MetaItem) -> MetaItem {
        let tiers: Vec<MetaTier> = self.tiers.iter().chain(tail.tiers.iter()).cloned().collect();
        MetaItem {
            tiers: Arc::new(tiers),
            index: self.index,
        }
    }

    fn prepare_fields(&self, fields: &Fields) -> Fields {
        let mut fields = fields.clone();
        fields
            .entry(PROJECT_FIELD.to_string())
            .or_insert_with(|| FieldValue::Str(self.project().to_string()));
        self.item_type().apply_defaults(&mut fields);
        fields
    }

    /// Formats this tier's rpath for a field set
    pub fn build_rpath(&self, fields: &Fields) -> Result<String, StorageError> {
        let tier = self.tier();
        let tier_fields = tier.storage.tier_fields(&tier.tags, &self.prepare_fields(fields));
        Ok(tier.storage.formatter().format(&tier.template, &tier_fields)?)
    }

    /// Applies concrete fields to every tier of the chain
    ///
    /// Tiers whose template can't be formatted with these fields are left
    /// out of the item's chain; failing to format this tier is an error.
    pub fn get_storage_item(&self, fields: &Fields) -> Result<StorageItem, StorageError> {
        let fields = self.prepare_fields(fields);
        let mut tiers = Vec::with_capacity(self.tiers.len());
        let mut index = 0;

        for (position, tier) in self.tiers.iter().enumerate() {
            let tier_fields = tier.storage.tier_fields(&tier.tags, &fields);

            match tier.storage.formatter().format(&tier.template, &tier_fields) {
                Ok(rpath) => {
                    if position == self.index {
                        index = tiers.len();
                    }
                    tiers.push(ItemTier {
                        storage: Arc::clone(&tier.storage),
                        tags: tier.tags.clone(),
                        rpath,
                        fields: tier_fields,
                        meta_index: position,
                    });
                }
                Err(e) if position == self.index => return Err(e.into()),
                Err(e) => {
                    debug!(storage = tier.storage.name(), error = %e, "tier left out of item chain");
                }
            }
        }

        Ok(StorageItem::new(self.clone(), tiers, index))
    }
}

impl fmt::Display for MetaItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MetaItem(tags={:?}, template='{}', storage='{}')",
            self.tags(),
            self.template(),
            self.storage().name()
        )
    }
}

#[derive(Debug, Clone)]
struct ItemTier {
    storage: Arc<Storage>,
    tags: TagSet,
    rpath: String,
    fields: Fields,
    meta_index: usize,
}

/// Options for [`StorageItem::read`]
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    /// Try this tier first, then upstream; otherwise most upstream first
    pub upstream: bool,
    pub current_item_only: bool,
    /// Hydrate the item's metadata from the tier that served the data
    pub with_metadata: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            upstream: true,
            current_item_only: false,
            with_metadata: false,
        }
    }
}

/// Options for [`StorageItem::write`]
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Propagation order; the pool's `write_order` when unset
    pub order: Option<WriteOrder>,
    /// Overwrite tiers that already hold the resource
    pub force: bool,
    /// Also write the `.meta` sidecar
    pub with_metadata: bool,
    pub current_item_only: bool,
}

/// Concrete resource resolved across a tier chain
#[derive(Debug, Clone)]
pub struct StorageItem {
    meta: MetaItem,
    tiers: Arc<Vec<ItemTier>>,
    index: usize,
    metadata: Metadata,
}

impl StorageItem {
    fn new(meta: MetaItem, tiers: Vec<ItemTier>, index: usize) -> Self {
        let tier = &tiers[index];
        let mut metadata = Metadata::new();
        metadata.insert(
            "tags".to_string(),
            Value::from(tier.tags.iter().cloned().collect::<Vec<_>>()),
        );
        metadata.insert(
            "fields".to_string(),
            serde_json::to_value(&tier.fields).unwrap_or(Value::Null),
        );
        metadata.insert(
            "user".to_string(),
            Value::String(tier.storage.context().user.clone()),
        );

        Self {
            meta,
            tiers: Arc::new(tiers),
            index,
            metadata,
        }
    }

    fn tier(&self) -> &ItemTier {
        &self.tiers[self.index]
    }

    fn at(&self, index: usize) -> StorageItem {
        StorageItem {
            meta: self.meta.clone(),
            tiers: Arc::clone(&self.tiers),
            index,
            metadata: self.metadata.clone(),
        }
    }

    pub fn rpath(&self) -> &str {
        &self.tier().rpath
    }

    pub fn tags(&self) -> &TagSet {
        &self.tier().tags
    }

    /// Fields as this tier sees them (after project injection and adapter)
    pub fn fields(&self) -> &Fields {
        &self.tier().fields
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.tier().storage
    }

    pub fn item_type(&self) -> ItemType {
        self.meta_item().item_type()
    }

    pub fn meta_item(&self) -> MetaItem {
        self.meta.at(self.tier().meta_index)
    }

    pub fn identifier(&self) -> Identifier {
        Identifier {
            tags: self.tags().clone(),
            fields: self.fields().clone(),
        }
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn position(&self) -> usize {
        self.index
    }

    pub fn chain_len(&self) -> usize {
        self.tiers.len()
    }

    /// Rpath and storage name of each tier, downstream first
    pub fn chain(&self) -> Vec<(&str, &str)> {
        self.tiers
            .iter()
            .map(|t| (t.storage.name(), t.rpath.as_str()))
            .collect()
    }

    pub fn upstream(&self) -> Option<StorageItem> {
        (self.index + 1 < self.tiers.len()).then(|| self.at(self.index + 1))
    }

    pub fn downstream(&self) -> Option<StorageItem> {
        self.index.checked_sub(1).map(|i| self.at(i))
    }

    pub fn most_upstream(&self) -> StorageItem {
        self.at(self.tiers.len() - 1)
    }

    pub fn most_downstream(&self) -> StorageItem {
        self.at(0)
    }

    fn describe(&self, tier: &ItemTier) -> String {
        format!(
            "StorageItem(tags={:?}, fields={:?}, rpath='{}')",
            tier.tags,
            tier.fields,
            tier.rpath
        )
    }

    fn accessor_error(&self, tier: &ItemTier, op: &'static str, source: AccessorError) -> StorageError {
        StorageError::Accessor {
            item: self.describe(tier),
            storage: tier.storage.name().to_string(),
            op,
            source,
        }
    }

    fn tier_exists(&self, tier: &ItemTier) -> Result<bool, StorageError> {
        tier.storage
            .accessor()
            .exists(&tier.rpath)
            .map_err(|e| self.accessor_error(tier, "check", e))
    }

    /// Whether this tier holds the resource
    pub fn exists(&self) -> Result<bool, StorageError> {
        self.tier_exists(self.tier())
    }

    /// Whether this tier or any tier upstream of it holds the resource
    pub fn exists_upstream(&self) -> Result<bool, StorageError> {
        for tier in &self.tiers[self.index..] {
            if self.tier_exists(tier)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn filesystem_path(&self) -> Option<PathBuf> {
        self.storage().accessor().filesystem_path(self.rpath())
    }

    fn read_tier(&self, tier: &ItemTier) -> Result<Option<Vec<u8>>, StorageError> {
        match tier.storage.accessor().read(&tier.rpath) {
            Ok(data) => Ok(data),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(self.accessor_error(tier, "read", e)),
        }
    }

    fn load_metadata(&self, tier: &ItemTier) -> Result<Option<Metadata>, StorageError> {
        let accessor = tier.storage.accessor();

        let meta_path = metadata::meta_rpath(&tier.rpath);
        if let Some(content) = accessor
            .read(&meta_path)
            .or_else(|e| if e.is_not_found() { Ok(None) } else { Err(e) })
            .map_err(|e| self.accessor_error(tier, "read metadata of", e))?
        {
            let data = metadata::parse_json(&content).map_err(|reason| StorageError::Metadata {
                item: self.describe(tier),
                reason,
            })?;
            return Ok(Some(data));
        }

        let legacy_path = metadata::legacy_rpath(&tier.rpath);
        let legacy = accessor
            .read(&legacy_path)
            .or_else(|e| if e.is_not_found() { Ok(None) } else { Err(e) })
            .map_err(|e| self.accessor_error(tier, "read metadata of", e))?;

        Ok(legacy.map(|content| metadata::parse_legacy(&String::from_utf8_lossy(&content))))
    }

    /// Reads the resource, falling back along the chain on a miss
    pub fn read(&mut self, options: ReadOptions) -> Result<Option<Vec<u8>>, StorageError> {
        let order: Vec<usize> = if options.current_item_only {
            vec![self.index]
        } else if options.upstream {
            (self.index..self.tiers.len()).collect()
        } else {
            (self.index..self.tiers.len()).rev().collect()
        };

        let tiers = Arc::clone(&self.tiers);
        for i in order {
            let tier = &tiers[i];
            let Some(data) = self.read_tier(tier)? else {
                continue;
            };

            debug!(storage = tier.storage.name(), rpath = %tier.rpath, "read item");

            if options.with_metadata {
                if let Some(loaded) = self.load_metadata(tier)? {
                    self.metadata.extend(loaded);
                }
            }
            return Ok(Some(data));
        }

        Ok(None)
    }

    fn write_tier(
        &self,
        position: usize,
        data: &[u8],
        options: &WriteOptions,
        written: &mut Vec<usize>,
    ) -> Result<(), StorageError> {
        let tier = &self.tiers[position];
        if !options.force && self.tier_exists(tier)? {
            debug!(storage = tier.storage.name(), rpath = %tier.rpath, "already exists, skipping write");
            return Ok(());
        }

        debug!(storage = tier.storage.name(), rpath = %tier.rpath, "writing item");
        tier.storage
            .accessor()
            .write(&tier.rpath, data)
            .map_err(|e| self.accessor_error(tier, "write", e))?;
        written.push(position);

        if options.with_metadata {
            let document = metadata::dump(&self.metadata).map_err(|e| StorageError::Metadata {
                item: self.describe(tier),
                reason: e.to_string(),
            })?;
            tier.storage
                .accessor()
                .write(&metadata::meta_rpath(&tier.rpath), &document)
                .map_err(|e| self.accessor_error(tier, "write metadata of", e))?;
        }

        Ok(())
    }

    /// Writes the resource to this tier and every tier upstream of it
    ///
    /// Tiers that already hold the resource are skipped unless `force`.
    pub fn write(&self, data: &[u8], options: WriteOptions) -> Result<(), StorageError> {
        self.write_recorded(data, options, &mut Vec::new())
    }

    /// Like [`write`](Self::write), pushing the chain position of every
    /// tier actually written onto `written`
    ///
    /// Positions are recorded as each tier is stored, so they stay accurate
    /// when a later tier fails.
    pub fn write_recorded(
        &self,
        data: &[u8],
        options: WriteOptions,
        written: &mut Vec<usize>,
    ) -> Result<(), StorageError> {
        if options.current_item_only {
            return self.write_tier(self.index, data, &options, written);
        }

        let order = options
            .order
            .unwrap_or(self.storage().context().write_order);
        let targets = self.index..self.tiers.len();

        match order {
            WriteOrder::LocalFirst => {
                for position in targets {
                    self.write_tier(position, data, &options, written)?;
                }
            }
            WriteOrder::UpstreamFirst => {
                for position in targets.rev() {
                    self.write_tier(position, data, &options, written)?;
                }
            }
        }

        Ok(())
    }

    /// Brings the resource into the most downstream tier
    ///
    /// Returns `None` when the downstream tier already has it and `force`
    /// isn't set.
    pub fn pull(&mut self, with_metadata: bool, force: bool) -> Result<Option<Vec<u8>>, StorageError> {
        let mut downstream = self.most_downstream();
        if !force && downstream.exists()? {
            return Ok(None);
        }

        let data = self
            .read(ReadOptions {
                upstream: false,
                with_metadata,
                ..Default::default()
            })?
            .ok_or_else(|| StorageError::Item(self.to_string()))?;

        downstream.metadata = self.metadata.clone();
        downstream.write(
            &data,
            WriteOptions {
                force,
                with_metadata,
                ..Default::default()
            },
        )?;

        Ok(Some(data))
    }

    /// Reads the resource (with fallback) and writes it outward from here
    pub fn push(&mut self, with_metadata: bool, force: bool) -> Result<Vec<u8>, StorageError> {
        let data = self
            .read(ReadOptions {
                with_metadata,
                ..Default::default()
            })?
            .ok_or_else(|| StorageError::Item(self.to_string()))?;

        self.write(
            &data,
            WriteOptions {
                force,
                with_metadata,
                ..Default::default()
            },
        )?;

        Ok(data)
    }

    pub fn make_directories(&self) -> Result<(), StorageError> {
        let tier = self.tier();
        tier.storage
            .accessor()
            .make_dir(&tier.rpath, true)
            .map_err(|e| self.accessor_error(tier, "make directories for", e))
    }

    /// Removes the resource from this tier, then from every other tier
    pub fn remove(&self, propagate: bool) -> Result<(), StorageError> {
        let others = (0..self.tiers.len()).filter(|&i| propagate && i != self.index);
        self.remove_positions(std::iter::once(self.index).chain(others), false)
    }

    /// Removes the resource and its `.meta` sidecar from the given chain
    /// positions only, as recorded by [`write_recorded`](Self::write_recorded)
    pub fn remove_at(&self, positions: &[usize]) -> Result<(), StorageError> {
        let positions = positions.iter().copied().filter(|&i| i < self.tiers.len());
        self.remove_positions(positions, true)
    }

    fn remove_positions(
        &self,
        positions: impl Iterator<Item = usize>,
        with_metadata: bool,
    ) -> Result<(), StorageError> {
        for i in positions {
            let tier = &self.tiers[i];
            let accessor = tier.storage.accessor();
            debug!(storage = tier.storage.name(), rpath = %tier.rpath, "removing item");

            accessor
                .rm(&tier.rpath)
                .map_err(|e| self.accessor_error(tier, "remove", e))?;
            if with_metadata {
                accessor
                    .rm(&metadata::meta_rpath(&tier.rpath))
                    .map_err(|e| self.accessor_error(tier, "remove metadata of", e))?;
            }
        }

        Ok(())
    }
}

impl fmt::Display for StorageItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tier = self.tier();
        write!(
            f,
            "StorageItem(tags={:?}, fields={:?}, rpath='{}', storage='{}')",
            tier.tags,
            tier.fields,
            tier.rpath,
            tier.storage.name()
        )
    }
}
