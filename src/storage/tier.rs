//! One physical storage tier

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::domain::{
    FieldFormatter, FieldValue, Fields, Identifier, TagMask, TagSet, PROJECT_FIELD,
};
use crate::error::StorageError;
use crate::schema::{BuildReport, SchemaNode, SchemaRegistry, SchemaTree};

use super::accessor::Accessor;
use super::adapter::Adapter;
use super::config::{resolve_schema, ConfigError, StorageConfig, WriteOrder};
use super::item::MetaItem;
use super::registry::{Kwargs, Registry};

/// Pool-wide values every tier of a pool shares
#[derive(Debug, Clone, PartialEq)]
pub struct PoolContext {
    pub project: String,
    /// Recorded as the author of written metadata
    pub user: String,
    pub write_order: WriteOrder,
}

/// Accessor, schema, formatter, adapter and tag mask bound together
pub struct Storage {
    name: String,
    context: Arc<PoolContext>,
    accessor: Arc<dyn Accessor>,
    schema: Arc<SchemaTree>,
    formatter: FieldFormatter,
    adapter: Option<Arc<dyn Adapter>>,
    tag_mask: Option<TagMask>,
}

impl Storage {
    pub fn new(
        name: impl Into<String>,
        context: Arc<PoolContext>,
        accessor: Arc<dyn Accessor>,
        schema: Arc<SchemaTree>,
        formatter: FieldFormatter,
        adapter: Option<Arc<dyn Adapter>>,
        tag_mask: Option<TagMask>,
    ) -> Self {
        Self {
            name: name.into(),
            context,
            accessor,
            schema,
            formatter,
            adapter,
            tag_mask,
        }
    }

    /// Builds a tier from its configuration
    pub fn from_config(
        config: &StorageConfig,
        context: Arc<PoolContext>,
        registry: &Registry,
        base_dir: &Path,
        schema_search_paths: &[std::path::PathBuf],
    ) -> Result<Self, StorageError> {
        let failed = |reason: String| ConfigError::Storage {
            storage: config.name.clone(),
            reason,
        };

        let accessor = registry.create_accessor(
            &config.accessor.name,
            Kwargs {
                values: &config.accessor.kwargs,
                base_dir,
            },
        )?;

        let adapter = match &config.adapter {
            Some(adapter) => Some(registry.create_adapter(
                &adapter.name,
                Kwargs {
                    values: &adapter.kwargs,
                    base_dir,
                },
            )?),
            None => None,
        };

        let formatter =
            FieldFormatter::new(config.fields.clone()).map_err(|e| failed(e.to_string()))?;

        let tag_mask = config
            .effective_tag_mask()
            .map(TagMask::parse)
            .transpose()
            .map_err(|e| failed(e.to_string()))?;

        let schema_dir = resolve_schema(&config.schema, base_dir, schema_search_paths)?;
        let schema = SchemaRegistry::load(&schema_dir)?;

        debug!(
            storage = %config.name,
            accessor = %config.accessor.name,
            schema = %schema_dir.display(),
            "created storage"
        );

        Ok(Self::new(
            config.name.clone(),
            context,
            accessor,
            schema,
            formatter,
            adapter,
            tag_mask,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn project(&self) -> &str {
        &self.context.project
    }

    pub fn context(&self) -> &Arc<PoolContext> {
        &self.context
    }

    pub fn accessor(&self) -> &dyn Accessor {
        self.accessor.as_ref()
    }

    pub fn schema(&self) -> &SchemaTree {
        &self.schema
    }

    pub fn formatter(&self) -> &FieldFormatter {
        &self.formatter
    }

    pub fn adapter(&self) -> Option<&dyn Adapter> {
        self.adapter.as_deref()
    }

    pub fn tag_mask(&self) -> Option<&TagMask> {
        self.tag_mask.as_ref()
    }

    /// Whether this tier serves identities with these tags
    pub fn is_matching(&self, tags: &TagSet) -> bool {
        match &self.tag_mask {
            Some(mask) => mask.matches(tags),
            None => true,
        }
    }

    /// Anchor node for a tag-set this tier serves
    pub fn node(&self, tags: &TagSet) -> Option<&SchemaNode> {
        if !self.is_matching(tags) {
            return None;
        }
        self.schema.get_item(tags)
    }

    /// Single-tier item for a tag-set, outside of any pool chain
    pub fn get_item(self: &Arc<Self>, tags: &TagSet) -> Option<MetaItem> {
        MetaItem::chain(tags.clone(), std::slice::from_ref(self))
    }

    /// Adds the project field when missing, then applies the adapter
    pub fn tier_fields(&self, tags: &TagSet, fields: &Fields) -> Fields {
        let mut fields = fields.clone();
        fields
            .entry(PROJECT_FIELD.to_string())
            .or_insert_with(|| FieldValue::Str(self.context.project.clone()));

        match &self.adapter {
            Some(adapter) => {
                adapter
                    .input(Identifier {
                        tags: tags.clone(),
                        fields,
                    })
                    .fields
            }
            None => fields,
        }
    }

    /// Reverse-resolves an rpath into a pool identity
    pub fn identifier_from_rpath(&self, rpath: &str) -> Option<Identifier> {
        let (tags, fields) = self.schema.get_data_from_rpath(&self.formatter, rpath)?;

        if !self.is_matching(&tags) {
            debug!(storage = %self.name, rpath, "resolved tags rejected by tag mask");
            return None;
        }

        let identifier = Identifier { tags, fields };
        Some(match &self.adapter {
            Some(adapter) => adapter.output(identifier),
            None => identifier,
        })
    }

    /// Scaffolds directories and seed files for an identity
    pub fn build_structure(&self, tags: &TagSet, fields: &Fields) -> BuildReport {
        let fields = self.tier_fields(tags, fields);
        self.schema
            .build_structure(self.accessor.as_ref(), &self.formatter, tags, &fields)
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("name", &self.name)
            .field("schema", &self.schema.root())
            .field("tag_mask", &self.tag_mask.as_ref().map(TagMask::as_str))
            .finish()
    }
}

impl fmt::Display for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Storage(name='{}')", self.name)
    }
}
