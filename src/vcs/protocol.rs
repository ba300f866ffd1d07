//! Session protocol types
//!
//! Requests and responses are JSON objects. Over a process boundary each
//! one travels as a single line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Fields, TagSet};

/// Named operation understood by every session backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Upserts the component, returns its current unpublished revision
    CreateRevision,
    PublishRevision,
    ChangeOwnership,
    RemoveRevision,
    /// Revisions of one component, newest first
    ListRevisions,
    FindComponent,
    FindComponents,
    RemoveComponent,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CreateRevision => "create_revision",
            Operation::PublishRevision => "publish_revision",
            Operation::ChangeOwnership => "change_ownership",
            Operation::RemoveRevision => "remove_revision",
            Operation::ListRevisions => "list_revisions",
            Operation::FindComponent => "find_component",
            Operation::FindComponents => "find_components",
            Operation::RemoveComponent => "remove_component",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message sent to a session backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    pub operation: Operation,

    /// Operation-specific parameters
    pub params: Value,

    /// User issuing the request
    pub user_id: String,
}

impl SessionRequest {
    pub fn new(operation: Operation, params: impl Into<Value>, user_id: impl Into<String>) -> Self {
        Self {
            operation,
            params: params.into(),
            user_id: user_id.into(),
        }
    }
}

/// A response from a session backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionResponse {
    pub fn success(data: impl Into<Value>) -> Self {
        Self {
            success: true,
            data: Some(data.into()),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Stored component row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentRecord {
    pub id: String,
    pub tags: TagSet,
    #[serde(default)]
    pub fields: Fields,
}

/// Stored revision row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RevisionRecord {
    pub id: i64,
    pub component_id: String,
    pub version: i64,
    pub published: bool,
    #[serde(default)]
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Current owner
    pub user_id: String,
}

/// Acknowledgement of a mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Ack {
    pub id: Value,
}
