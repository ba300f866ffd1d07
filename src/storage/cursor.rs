//! Enumeration of sibling members
//!
//! Versioned files, sequences and collections share one template that
//! varies in a single field. A [`Cursor`] discovers which values of that
//! field exist on a tier by listing the backing directory:
//!
//! | Item type | Field | Discovery |
//! |-----------|-------|-----------|
//! | file | `_version_` | numeric match in the listing of the versioned part's parent |
//! | sequence | `_index_` | same as file |
//! | collection | `_suffix_` | every file below the anchor directory |
//!
//! Collection listings leave out `.meta` sidecars, legacy `.txt` sidecars
//! sitting next to their resource, and half-written temp files.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::{FieldValue, Fields, ItemType, INDEX_FIELD, SUFFIX_FIELD, VERSION_FIELD};
use crate::error::StorageError;

use super::accessor::join_rpath;
use super::item::{MetaItem, StorageItem};
use super::metadata::{LEGACY_EXTENSION, META_EXTENSION};

/// Suffix the fs accessor gives files it has not yet renamed into place
static TEMP_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"__[0-9a-f]{32}$").expect("valid regex"));

/// Stand-in number located in a formatted rpath to find the varying part
pub const PLACEHOLDER: i64 = 96969696969696;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKind {
    Revision,
    Sequence,
    Collection,
}

impl CursorKind {
    pub fn for_type(item_type: ItemType) -> Self {
        match item_type {
            ItemType::File => CursorKind::Revision,
            ItemType::Sequence => CursorKind::Sequence,
            ItemType::Collection => CursorKind::Collection,
        }
    }

    pub fn primary_field(&self) -> &'static str {
        match self {
            CursorKind::Revision => VERSION_FIELD,
            CursorKind::Sequence => INDEX_FIELD,
            CursorKind::Collection => SUFFIX_FIELD,
        }
    }

    fn placeholder(&self) -> FieldValue {
        match self {
            CursorKind::Collection => FieldValue::Str(String::new()),
            _ => FieldValue::Int(PLACEHOLDER),
        }
    }
}

/// Enumerates the members of one item
#[derive(Debug, Clone)]
pub struct Cursor {
    meta_item: MetaItem,
    fields: Fields,
    kind: CursorKind,
}

impl Cursor {
    /// Cursor matching the item's declared type
    pub fn new(meta_item: MetaItem, fields: Fields) -> Self {
        let kind = CursorKind::for_type(meta_item.item_type());
        Self::with_kind(meta_item, fields, kind)
    }

    pub fn with_kind(meta_item: MetaItem, fields: Fields, kind: CursorKind) -> Self {
        Self {
            meta_item,
            fields,
            kind,
        }
    }

    /// Cursor over the siblings of an existing item
    pub fn from_item(item: &StorageItem, kind: CursorKind) -> Self {
        Self::with_kind(item.meta_item(), item.fields().clone(), kind)
    }

    pub fn kind(&self) -> CursorKind {
        self.kind
    }

    pub fn primary_field(&self) -> &'static str {
        self.kind.primary_field()
    }

    fn target(&self, from_upstream: bool) -> MetaItem {
        if from_upstream {
            self.meta_item.most_upstream()
        } else {
            self.meta_item.clone()
        }
    }

    fn fields_with(&self, value: FieldValue) -> Fields {
        let mut fields = self.fields.clone();
        fields.insert(self.primary_field().to_string(), value);
        fields
    }

    /// Storage item for one member
    pub fn get_storage_item(&self, value: FieldValue) -> Result<StorageItem, StorageError> {
        self.meta_item.get_storage_item(&self.fields_with(value))
    }

    /// Distinct member values present on a tier, ascending
    pub fn values(&self, from_upstream: bool) -> Result<Vec<FieldValue>, StorageError> {
        let meta_item = self.target(from_upstream);
        let rpath = meta_item.build_rpath(&self.fields_with(self.kind.placeholder()))?;

        match self.kind {
            CursorKind::Collection => collection_values(&meta_item, &rpath),
            _ => numbered_values(&meta_item, &rpath),
        }
    }

    /// One storage item per member, ascending
    pub fn items(&self, from_upstream: bool) -> Result<Vec<StorageItem>, StorageError> {
        let meta_item = self.target(from_upstream);
        self.values(from_upstream)?
            .into_iter()
            .map(|value| meta_item.get_storage_item(&self.fields_with(value)))
            .collect()
    }

    /// Member with the greatest value
    pub fn latest(&self, from_upstream: bool) -> Result<Option<StorageItem>, StorageError> {
        Ok(self.items(from_upstream)?.pop())
    }

    /// Pulls every member found on the most upstream tier
    pub fn pull(&self, with_metadata: bool) -> Result<usize, StorageError> {
        let mut pulled = 0;
        for mut item in self.items(true)? {
            if item.pull(with_metadata, false)?.is_some() {
                pulled += 1;
            }
        }
        Ok(pulled)
    }

    /// Pushes every member found on this tier
    pub fn push(&self, with_metadata: bool) -> Result<usize, StorageError> {
        let mut items = self.items(false)?;
        for item in items.iter_mut() {
            item.push(with_metadata, false)?;
        }
        Ok(items.len())
    }
}

fn list(meta_item: &MetaItem, rpath: &str, recursive: bool) -> Result<Option<Vec<String>>, StorageError> {
    match meta_item.storage().accessor().list(rpath, true, recursive) {
        Ok(entries) => Ok(Some(entries)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(StorageError::Accessor {
            item: meta_item.to_string(),
            storage: meta_item.storage().name().to_string(),
            op: "list",
            source: e,
        }),
    }
}

fn numbered_values(meta_item: &MetaItem, rpath: &str) -> Result<Vec<FieldValue>, StorageError> {
    let placeholder = PLACEHOLDER.to_string();
    let parts: Vec<&str> = rpath.trim_end_matches('/').split('/').collect();

    let Some(position) = parts.iter().position(|part| part.contains(&placeholder)) else {
        return Ok(vec![FieldValue::Int(1)]);
    };

    let root = join_rpath(&parts[..position]);
    let pattern = format!(
        "^{}$",
        regex::escape(parts[position]).replace(&placeholder, r"(\d+)")
    );
    let tail = Regex::new(&pattern).map_err(|e| StorageError::Input(e.to_string()))?;

    let Some(entries) = list(meta_item, &root, false)? else {
        return Ok(Vec::new());
    };

    let found: BTreeSet<i64> = entries
        .iter()
        .filter_map(|entry| tail.captures(entry))
        .filter_map(|caps| caps.get(1)?.as_str().parse().ok())
        .collect();

    Ok(found.into_iter().map(FieldValue::Int).collect())
}

fn collection_values(meta_item: &MetaItem, rpath: &str) -> Result<Vec<FieldValue>, StorageError> {
    let Some(entries) = list(meta_item, rpath, true)? else {
        return Ok(Vec::new());
    };

    let all: BTreeSet<String> = entries.into_iter().collect();
    let found = all
        .iter()
        .filter(|entry| !TEMP_SUFFIX.is_match(entry))
        .filter(|entry| !is_sidecar(entry, &all))
        .cloned()
        .map(FieldValue::Str)
        .collect();
    Ok(found)
}

fn is_sidecar(entry: &str, listing: &BTreeSet<String>) -> bool {
    let Some((stem, extension)) = entry.rsplit_once('.') else {
        return false;
    };
    match extension {
        META_EXTENSION => true,
        LEGACY_EXTENSION => listing.contains(stem),
        _ => false,
    }
}
