//! Versioned components and their revisions
//!
//! A [`Component`] is the logical identity of a published asset, keyed by
//! the hash of its common tags and fields. Each [`Revision`] is one
//! numbered snapshot of it:
//!
//! ```text
//! create_revision ──► unpublished (owned) ──publish──► published
//!        ▲                                                │
//!        └──────────────── next create_revision ◄─────────┘
//! ```
//!
//! Publishing stages bytes into storage first and flips the remote flag
//! second. If the second step fails the bytes it wrote are removed again;
//! copies that were already on a tier before the publish are left alone.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{Fields, FieldValue, Identifier, TagSet, CHECKOUT_TAG, VERSION_FIELD};
use crate::error::StorageError;
use crate::storage::{StorageItem, StoragePool, WriteOptions};

use super::protocol::{Ack, ComponentRecord, Operation, RevisionRecord};
use super::session::{call, Session, SessionError};

const DEFAULT_FIND_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum ComponentError {
    #[error("Failed to create a revision of {component}")]
    Create {
        component: String,
        #[source]
        source: SessionError,
    },

    #[error("Revision {version} of {component} is owned by '{owner}'. Please contact that person to resolve.")]
    Ownership {
        component: String,
        version: i64,
        owner: String,
    },

    #[error("{revision} is already published")]
    Published { revision: String },

    #[error("Failed to publish {revision}")]
    Publish {
        revision: String,
        #[source]
        source: SessionError,
    },

    #[error("Failed to stage data for {revision}")]
    Stage {
        revision: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to acquire {revision}")]
    Acquire {
        revision: String,
        #[source]
        source: SessionError,
    },

    #[error("Failed to look up {target}")]
    List {
        target: String,
        #[source]
        source: SessionError,
    },

    #[error("Failed to remove {target}")]
    Remove {
        target: String,
        #[source]
        source: SessionError,
    },

    #[error("No storage serves tags {0:?}")]
    NoItem(TagSet),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Logical, version-tracked asset identity
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    identifier: Identifier,
    id: String,
}

impl Component {
    /// Component for an identity; extra tags and fields are dropped
    pub fn new(identifier: &Identifier) -> Self {
        let identifier = identifier.common();
        let id = identifier.hash();
        Self { identifier, id }
    }

    fn from_record(record: ComponentRecord) -> Self {
        Self {
            identifier: Identifier {
                tags: record.tags,
                fields: record.fields,
            },
            id: record.id,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    pub fn tags(&self) -> &TagSet {
        &self.identifier.tags
    }

    pub fn fields(&self) -> &Fields {
        &self.identifier.fields
    }

    /// Components whose tags include `tags` and whose fields include `fields`
    pub fn find_components(
        session: &dyn Session,
        tags: &TagSet,
        fields: &Fields,
        limit: Option<usize>,
    ) -> Result<Vec<Component>, ComponentError> {
        let records: Vec<ComponentRecord> = call(
            session,
            Operation::FindComponents,
            json!({
                "tags": tags,
                "fields": fields,
                "limit": limit.unwrap_or(DEFAULT_FIND_LIMIT),
            }),
        )
        .map_err(|source| ComponentError::List {
            target: format!("components tagged {:?}", tags),
            source,
        })?;

        Ok(records.into_iter().map(Component::from_record).collect())
    }

    pub fn find(session: &dyn Session, id: &str) -> Result<Option<Component>, ComponentError> {
        let record: Option<ComponentRecord> =
            call(session, Operation::FindComponent, json!({ "id": id })).map_err(|source| {
                ComponentError::List {
                    target: format!("component {}", id),
                    source,
                }
            })?;

        Ok(record.map(Component::from_record))
    }

    /// Revisions newest first
    pub fn revisions(
        &self,
        session: &dyn Session,
        limit: Option<usize>,
    ) -> Result<Vec<Revision>, ComponentError> {
        let mut params = json!({ "id": self.id });
        if let Some(limit) = limit {
            params["limit"] = json!(limit);
        }

        let records: Vec<RevisionRecord> = call(session, Operation::ListRevisions, params)
            .map_err(|source| ComponentError::List {
                target: format!("revisions of {}", self),
                source,
            })?;

        Ok(records
            .into_iter()
            .map(|record| Revision::new(self.clone(), record))
            .collect())
    }

    pub fn latest_revision(&self, session: &dyn Session) -> Result<Option<Revision>, ComponentError> {
        Ok(self.revisions(session, Some(1))?.into_iter().next())
    }

    /// Current unpublished revision, created on demand
    ///
    /// Fails with [`ComponentError::Ownership`] when someone else owns it,
    /// unless `force_ownership` transfers it to the session user.
    pub fn create_revision(
        &self,
        session: &dyn Session,
        force_ownership: bool,
    ) -> Result<Revision, ComponentError> {
        let record: RevisionRecord = call(
            session,
            Operation::CreateRevision,
            json!({
                "id": self.id,
                "tags": self.identifier.tags,
                "fields": self.identifier.fields,
            }),
        )
        .map_err(|source| ComponentError::Create {
            component: self.to_string(),
            source,
        })?;

        let mut revision = Revision::new(self.clone(), record);
        debug!(%revision, "current revision");

        if revision.user_id() == session.user_id() {
            return Ok(revision);
        }

        if force_ownership {
            revision.acquire(session)?;
            return Ok(revision);
        }

        Err(ComponentError::Ownership {
            component: self.to_string(),
            version: revision.version(),
            owner: revision.user_id().to_string(),
        })
    }

    /// Deletes the component and its revisions from the session
    pub fn remove(&self, session: &dyn Session) -> Result<(), ComponentError> {
        call::<Ack>(session, Operation::RemoveComponent, json!({ "id": self.id })).map_err(
            |source| ComponentError::Remove {
                target: self.to_string(),
                source,
            },
        )?;
        Ok(())
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Component(id={}, tags={:?}, fields={:?})",
            self.id, self.identifier.tags, self.identifier.fields
        )
    }
}

/// Staging area handed to the caller during [`Revision::publish`]
///
/// Bytes written to the temp file are stored once the caller returns; the
/// temp file is deleted when the transaction is dropped.
#[derive(Debug)]
pub struct Transaction {
    temp: PathBuf,
    item: StorageItem,
}

impl Transaction {
    fn new(item: StorageItem) -> Self {
        let temp = std::env::temp_dir().join(format!("assetpool-{}", Uuid::new_v4().simple()));
        Self { temp, item }
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    pub fn item(&self) -> &StorageItem {
        &self.item
    }

    pub fn item_mut(&mut self) -> &mut StorageItem {
        &mut self.item
    }

    /// Replaces the staged bytes
    pub fn write(&self, data: &[u8]) -> io::Result<()> {
        fs::write(&self.temp, data)
    }

    fn staged(&self) -> io::Result<Option<Vec<u8>>> {
        match fs::read(&self.temp) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.temp.exists() {
            let _ = fs::remove_file(&self.temp);
        }
    }
}

/// One numbered snapshot of a component
#[derive(Debug, Clone)]
pub struct Revision {
    component: Component,
    record: RevisionRecord,
}

impl Revision {
    fn new(component: Component, record: RevisionRecord) -> Self {
        Self { component, record }
    }

    pub fn component(&self) -> &Component {
        &self.component
    }

    pub fn record(&self) -> &RevisionRecord {
        &self.record
    }

    pub fn id(&self) -> i64 {
        self.record.id
    }

    pub fn version(&self) -> i64 {
        self.record.version
    }

    pub fn is_published(&self) -> bool {
        self.record.published
    }

    pub fn comment(&self) -> Option<&str> {
        self.record.comment.as_deref()
    }

    pub fn user_id(&self) -> &str {
        &self.record.user_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.record.created_at
    }

    /// Component identity with this revision's version
    pub fn identifier(&self) -> Identifier {
        let mut identifier = self.component.identifier.clone();
        identifier.set_field(VERSION_FIELD, FieldValue::Int(self.record.version));
        identifier
    }

    /// Storage item for this revision
    ///
    /// With `checkout`, the item resolves through the tags plus
    /// `_checkout_`, with the published chain appended upstream so reads
    /// fall back to published data.
    pub fn storage_item(
        &self,
        pool: &StoragePool,
        checkout: bool,
    ) -> Result<StorageItem, ComponentError> {
        let identifier = self.identifier();
        let published = pool
            .get_item(&identifier.tags)
            .ok_or_else(|| ComponentError::NoItem(identifier.tags.clone()))?;

        let meta_item = if checkout {
            let mut tags = identifier.tags.clone();
            tags.insert(CHECKOUT_TAG.to_string());
            let checkout_item = pool
                .get_item(&tags)
                .ok_or_else(|| ComponentError::NoItem(tags.clone()))?;
            checkout_item.with_upstream(&published)
        } else {
            published
        };

        Ok(meta_item.get_storage_item(&identifier.fields)?)
    }

    /// Stages data through `stage`, stores it, then marks the revision published
    ///
    /// Only the session user owning an unpublished revision may publish it.
    /// Data is written with metadata (a `note` carrying the comment). When
    /// storing or the remote commit fails, the data is removed again from
    /// the tiers this call wrote before the error is returned.
    pub fn publish<F>(
        &mut self,
        pool: &StoragePool,
        session: &dyn Session,
        comment: Option<&str>,
        stage: F,
    ) -> Result<StorageItem, ComponentError>
    where
        F: FnOnce(&mut Transaction) -> io::Result<()>,
    {
        if self.is_published() {
            return Err(ComponentError::Published {
                revision: self.to_string(),
            });
        }
        if self.user_id() != session.user_id() {
            return Err(ComponentError::Ownership {
                component: self.component.to_string(),
                version: self.version(),
                owner: self.user_id().to_string(),
            });
        }

        let mut item = self.storage_item(pool, false)?;
        if let Some(comment) = comment {
            item.set_metadata("note", comment);
        }

        let mut transaction = Transaction::new(item);
        let stage_error = |source| ComponentError::Stage {
            revision: self.to_string(),
            source,
        };
        stage(&mut transaction).map_err(stage_error)?;
        let staged = transaction.staged().map_err(stage_error)?;
        let item = transaction.item.clone();
        drop(transaction);

        let mut written = Vec::new();
        if let Some(data) = &staged {
            let stored = item.write_recorded(
                data,
                WriteOptions {
                    with_metadata: true,
                    ..Default::default()
                },
                &mut written,
            );
            if let Err(e) = stored {
                self.roll_back(&item, &written);
                return Err(e.into());
            }
        }

        let committed = call::<Ack>(
            session,
            Operation::PublishRevision,
            json!({ "revision_id": self.record.id, "comment": comment }),
        );
        if let Err(source) = committed {
            self.roll_back(&item, &written);
            return Err(ComponentError::Publish {
                revision: self.to_string(),
                source,
            });
        }

        self.record.published = true;
        self.record.comment = comment.map(str::to_string);
        debug!(revision = %self, rpath = item.rpath(), "published");

        Ok(item)
    }

    fn roll_back(&self, item: &StorageItem, written: &[usize]) {
        if written.is_empty() {
            return;
        }
        if let Err(e) = item.remove_at(written) {
            warn!(revision = %self, error = %e, "failed to remove data of unpublished revision");
        }
    }

    /// Transfers ownership to the session user
    pub fn acquire(&mut self, session: &dyn Session) -> Result<(), ComponentError> {
        let user_id = session.user_id().to_string();
        call::<Ack>(
            session,
            Operation::ChangeOwnership,
            json!({ "revision_id": self.record.id, "user_id": user_id }),
        )
        .map_err(|source| ComponentError::Acquire {
            revision: self.to_string(),
            source,
        })?;

        self.record.user_id = user_id;
        Ok(())
    }

    /// Deletes the revision row; stored bytes are left alone
    pub fn remove(&self, session: &dyn Session) -> Result<(), ComponentError> {
        call::<Ack>(session, Operation::RemoveRevision, json!({ "id": self.record.id })).map_err(
            |source| ComponentError::Remove {
                target: self.to_string(),
                source,
            },
        )?;
        Ok(())
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Revision(id={}, version={}, published={}, comment='{}')",
            self.record.id,
            self.record.version,
            self.record.published,
            self.record.comment.as_deref().unwrap_or_default()
        )
    }
}
