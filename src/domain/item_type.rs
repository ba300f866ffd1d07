//! Item kinds declared by schema anchors

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::identifier::{FieldValue, Fields, VERSION_FIELD};

/// Field holding a sequence member's index
pub const INDEX_FIELD: &str = "_index_";

/// Field holding a collection member's suffix
pub const SUFFIX_FIELD: &str = "_suffix_";

/// Shape of the resource an anchor describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    /// A single file, optionally versioned through `_version_`
    #[default]
    File,
    /// Numbered members such as image frames
    Sequence,
    /// Arbitrarily named members under one directory
    Collection,
}

impl ItemType {
    /// Field that varies across the siblings of an item of this type
    pub fn primary_field(&self) -> &'static str {
        match self {
            ItemType::File => VERSION_FIELD,
            ItemType::Sequence => INDEX_FIELD,
            ItemType::Collection => SUFFIX_FIELD,
        }
    }

    /// Fills the placeholder defaults a caller may omit
    pub fn apply_defaults(&self, fields: &mut Fields) {
        match self {
            ItemType::File => {}
            ItemType::Sequence => {
                fields
                    .entry(INDEX_FIELD.to_string())
                    .or_insert(FieldValue::Int(1));
            }
            ItemType::Collection => {
                fields
                    .entry(SUFFIX_FIELD.to_string())
                    .or_insert_with(|| FieldValue::Str(String::new()));
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::File => "file",
            ItemType::Sequence => "sequence",
            ItemType::Collection => "collection",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "file" => Ok(ItemType::File),
            "sequence" => Ok(ItemType::Sequence),
            "collection" => Ok(ItemType::Collection),
            other => Err(format!("Unknown item type: {}", other)),
        }
    }
}
