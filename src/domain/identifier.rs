//! Logical identity of an asset
//!
//! An [`Identifier`] is an unordered set of tags plus an unordered map of
//! fields. Tags and fields whose names start with `_` are "extra": they
//! steer resolution (`_checkout_`, `_version_`, ...) but never take part
//! in the identity hash.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Tag marking the checkout (work-in-progress) side of a component
pub const CHECKOUT_TAG: &str = "_checkout_";

/// Tag marking the published side of a component
pub const PUBLISH_TAG: &str = "_publish_";

/// Field carrying a revision number
pub const VERSION_FIELD: &str = "_version_";

/// Field injected with the pool's project name when absent
pub const PROJECT_FIELD: &str = "project";

/// Unordered set of tags
pub type TagSet = BTreeSet<String>;

/// Field name to value mapping
pub type Fields = BTreeMap<String, FieldValue>;

/// Returns true if the tag or field name is reserved for internal use
pub fn is_extra(name: &str) -> bool {
    name.starts_with('_')
}

/// Builds a tag set from anything iterable over string-like values
pub fn tag_set<I, S>(tags: I) -> TagSet
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    tags.into_iter().map(Into::into).collect()
}

/// A typed field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl FieldValue {
    /// Parses a command-line style value, preferring integers
    pub fn parse_auto(value: &str) -> Self {
        if let Ok(i) = value.parse::<i64>() {
            return FieldValue::Int(i);
        }
        FieldValue::Str(value.to_string())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the name of the variant, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Int(_) => "int",
            FieldValue::Float(_) => "float",
            FieldValue::Str(_) => "str",
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(i) => write!(f, "{}", i),
            // Debug keeps the trailing `.0` so floats stay distinguishable from ints
            FieldValue::Float(v) => write!(f, "{:?}", v),
            FieldValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Int(value as i64)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Int(value as i64)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Str(value)
    }
}

/// Tags and fields naming one logical asset
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Identifier {
    pub tags: TagSet,
    #[serde(default)]
    pub fields: Fields,
}

impl Identifier {
    /// Creates an identifier from tags and fields
    pub fn new<I, S>(tags: I, fields: Fields) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tag_set(tags),
            fields,
        }
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) -> &mut Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn remove_tag(&mut self, tag: &str) -> &mut Self {
        self.tags.remove(tag);
        self
    }

    pub fn replace_tag(&mut self, old: &str, new: impl Into<String>) -> &mut Self {
        self.remove_tag(old).add_tag(new)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> &mut Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn remove_field(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(name)
    }

    /// Tags without the reserved `_` prefix
    pub fn common_tags(&self) -> TagSet {
        self.tags.iter().filter(|t| !is_extra(t)).cloned().collect()
    }

    /// Fields without the reserved `_` prefix
    pub fn common_fields(&self) -> Fields {
        self.fields
            .iter()
            .filter(|(name, _)| !is_extra(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Returns a copy stripped of every extra tag and field
    pub fn common(&self) -> Identifier {
        Identifier {
            tags: self.common_tags(),
            fields: self.common_fields(),
        }
    }

    /// Stable identity hash over the common tags and fields
    ///
    /// Both collections are ordered, so equal identities always produce
    /// the same canonical text regardless of insertion order.
    pub fn hash(&self) -> String {
        let tags: Vec<String> = self.common_tags().into_iter().collect();
        let fields = self.common_fields();
        let canonical = serde_json::json!([tags, fields]).to_string();
        blake3::hash(canonical.as_bytes()).to_hex().to_string()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        write!(f, "tags=[{}] fields={{{}}}", tags.join(","), fields.join(", "))
    }
}
