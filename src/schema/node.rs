//! Schema tree nodes and their sidecar configuration

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{match_tags, ItemType, TagSet};

/// Prefix identifying anchor description files
pub const ANCHOR_PREFIX: &str = "anchor__";

/// Extension of sidecar and anchor description files
pub const CONFIG_EXTENSION: &str = "yml";

static DISPLAY_SPEC: Lazy<Regex> = Lazy::new(|| Regex::new(r"[:!][^{}]*\}").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Dir,
    File,
    Anchor,
}

/// Condition under which a node is scaffolded alongside an anchor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub tag_mask: String,

    /// Whether descendants inherit this trigger
    #[serde(default)]
    pub propagate: bool,
}

impl Trigger {
    pub fn matches(&self, tags: &TagSet) -> bool {
        match_tags(&self.tag_mask, tags)
    }
}

/// Contents of a `.yml` sidecar; unknown keys are ignored
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub format: Option<String>,

    #[serde(rename = "type")]
    pub item_type: Option<ItemType>,

    pub tags: Option<Vec<String>>,

    pub triggers: Vec<Trigger>,
}

/// One node of a loaded schema tree
#[derive(Debug, Clone)]
pub struct SchemaNode {
    pub(crate) path: PathBuf,
    pub(crate) kind: NodeKind,
    pub(crate) parent: Option<usize>,
    pub(crate) config: NodeConfig,
    pub(crate) template: String,
    pub(crate) triggers: Vec<Trigger>,
}

impl SchemaNode {
    /// Source path inside the schema directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Full `/`-joined template from the schema root down to this node
    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn item_type(&self) -> ItemType {
        self.config.item_type.unwrap_or_default()
    }

    /// Tag-set claimed by an anchor
    pub fn tags(&self) -> TagSet {
        self.config
            .tags
            .iter()
            .flatten()
            .cloned()
            .collect()
    }

    /// Own triggers followed by propagated ancestor triggers
    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    pub fn is_triggered(&self, tags: &TagSet) -> bool {
        self.kind != NodeKind::Anchor && self.triggers.iter().any(|t| t.matches(tags))
    }

    /// Path component this node contributes to its template
    pub(crate) fn basename(&self) -> String {
        match (self.kind, &self.config.format) {
            (NodeKind::Anchor, Some(format)) => format.clone(),
            (NodeKind::Anchor, None) => String::new(),
            (_, Some(format)) => strip_display_specs(format),
            (_, None) => self
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
        }
    }
}

/// Drops `:spec` and `!conv` suffixes from placeholders
pub fn strip_display_specs(format: &str) -> String {
    DISPLAY_SPEC.replace_all(format, "}").to_string()
}

/// Sidecar path describing a directory or plain file
pub fn sidecar_path(path: &Path) -> PathBuf {
    path.with_extension(CONFIG_EXTENSION)
}

pub fn is_anchor_file(path: &Path) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return false;
    };
    name.starts_with(ANCHOR_PREFIX) && name.ends_with(&format!(".{}", CONFIG_EXTENSION))
}

pub fn is_config_file(path: &Path) -> bool {
    path.extension().map(|e| e == CONFIG_EXTENSION).unwrap_or(false)
}
