//! Sidecar metadata for stored resources
//!
//! Written as `<rpath>.meta` (JSON). Older resources may instead carry a
//! free-text `<rpath>.txt` with `key: value` lines, which is still read:
//!
//! ```text
//! date: 03/14/2021 10:22:01
//! user: lee
//! note: first pass
//! lighting is still temporary
//! ```
//!
//! Lines without a colon continue the previous value, and `note` is read
//! as `comment`.

use std::collections::BTreeMap;

use chrono::{Local, NaiveDateTime};
use serde_json::Value;

use crate::domain::is_extra;

/// Timestamp layout used by both sidecar formats
pub const DATE_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

pub const META_EXTENSION: &str = "meta";
pub const LEGACY_EXTENSION: &str = "txt";

/// Free-form metadata attached to a storage item
pub type Metadata = BTreeMap<String, Value>;

pub fn meta_rpath(rpath: &str) -> String {
    format!("{}.{}", rpath, META_EXTENSION)
}

pub fn legacy_rpath(rpath: &str) -> String {
    format!("{}.{}", rpath, LEGACY_EXTENSION)
}

/// Serializes metadata with a fresh timestamp, dropping `_`-prefixed keys
pub fn dump(metadata: &Metadata) -> Result<Vec<u8>, serde_json::Error> {
    dump_at(metadata, Local::now().naive_local())
}

pub fn dump_at(metadata: &Metadata, date: NaiveDateTime) -> Result<Vec<u8>, serde_json::Error> {
    let mut document: Metadata = metadata
        .iter()
        .filter(|(key, _)| !is_extra(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    document.insert(
        "date".to_string(),
        Value::String(date.format(DATE_FORMAT).to_string()),
    );

    serde_json::to_vec_pretty(&document)
}

/// Parses a `.meta` document; identity keys are dropped
pub fn parse_json(content: &[u8]) -> Result<Metadata, String> {
    let mut data: Metadata = serde_json::from_slice(content).map_err(|e| e.to_string())?;

    if let Some(date) = data.get("date") {
        let text = date.as_str().unwrap_or_default();
        NaiveDateTime::parse_from_str(text, DATE_FORMAT)
            .map_err(|e| format!("invalid date '{}': {}", text, e))?;
    }

    data.remove("tags");
    data.remove("fields");
    Ok(data)
}

/// Parses a legacy `.txt` document
pub fn parse_legacy(content: &str) -> Metadata {
    let mut data = Metadata::new();
    let mut active: Option<String> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some((title, text)) = line.split_once(':') else {
            if let Some(Value::String(previous)) = active.as_ref().and_then(|k| data.get_mut(k)) {
                previous.push('\n');
                previous.push_str(line);
            }
            continue;
        };

        let key = match title.trim() {
            "note" => "comment".to_string(),
            other => other.to_string(),
        };
        data.insert(key.clone(), Value::String(text.trim().to_string()));
        active = Some(key);
    }

    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn fixed_date() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 3, 14)
            .unwrap()
            .and_hms_opt(10, 22, 1)
            .unwrap()
    }

    #[test]
    fn dump_strips_extra_keys_and_adds_date() {
        let mut metadata = Metadata::new();
        metadata.insert("user".into(), json!("lee"));
        metadata.insert("_internal".into(), json!(true));

        let bytes = dump_at(&metadata, fixed_date()).unwrap();
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(parsed["date"], json!("03/14/2021 10:22:01"));
        assert_eq!(parsed["user"], json!("lee"));
        assert!(parsed.get("_internal").is_none());
    }

    #[test]
    fn parse_json_drops_identity() {
        let content = br#"{"date": "03/14/2021 10:22:01", "user": "lee", "tags": ["a"], "fields": {"x": 1}}"#;
        let data = parse_json(content).unwrap();

        assert_eq!(data.get("user"), Some(&json!("lee")));
        assert!(!data.contains_key("tags"));
        assert!(!data.contains_key("fields"));
        assert_eq!(data.get("date"), Some(&json!("03/14/2021 10:22:01")));
    }

    #[test]
    fn parse_json_rejects_bad_date() {
        assert!(parse_json(br#"{"date": "yesterday"}"#).is_err());
    }

    #[test]
    fn legacy_continuation_and_note() {
        let data = parse_legacy(
            "date: 03/14/2021 10:22:01\nuser: lee\nnote: first pass\nlighting is temporary\n\nstatus: wip\n",
        );

        assert_eq!(data.get("user"), Some(&json!("lee")));
        assert_eq!(
            data.get("comment"),
            Some(&json!("first pass\nlighting is temporary"))
        );
        assert_eq!(data.get("status"), Some(&json!("wip")));
        assert_eq!(data.get("date"), Some(&json!("03/14/2021 10:22:01")));
    }

    #[test]
    fn legacy_orphan_continuation_is_ignored() {
        let data = parse_legacy("no colon here\nuser: lee\n");
        assert_eq!(data.len(), 1);
    }
}
