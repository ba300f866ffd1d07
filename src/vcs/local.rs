//! File-backed session
//!
//! The whole store is one JSON document. Every request takes an exclusive
//! lock on `<store>.lock`, reads the document, applies the operation and,
//! if anything changed, rewrites it through a temp file and rename.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::domain::{Fields, TagSet};

use super::protocol::{
    Ack, ComponentRecord, Operation, RevisionRecord, SessionRequest, SessionResponse,
};
use super::session::{dispatch, Session, SessionError};

const DEFAULT_REVISION_LIMIT: usize = 10;
const DEFAULT_COMPONENT_LIMIT: usize = 100;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Store {
    #[serde(default)]
    last_revision_id: i64,
    #[serde(default)]
    components: BTreeMap<String, ComponentRecord>,
    #[serde(default)]
    revisions: Vec<RevisionRecord>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateParams {
    id: String,
    tags: TagSet,
    #[serde(default)]
    fields: Fields,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PublishParams {
    revision_id: i64,
    #[serde(default)]
    comment: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct OwnershipParams {
    revision_id: i64,
    user_id: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RevisionIdParams {
    id: i64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ComponentIdParams {
    id: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FindParams {
    #[serde(default)]
    tags: TagSet,
    #[serde(default)]
    fields: Fields,
    #[serde(default)]
    limit: Option<usize>,
}

fn params<T: DeserializeOwned>(request: &SessionRequest) -> Result<T, String> {
    serde_json::from_value(request.params.clone())
        .map_err(|e| format!("invalid {} params: {}", request.operation, e))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

impl Store {
    fn revision_mut(&mut self, id: i64) -> Result<&mut RevisionRecord, String> {
        self.revisions
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| format!("revision {} not found", id))
    }

    fn latest(&self, component_id: &str) -> Option<&RevisionRecord> {
        self.revisions
            .iter()
            .filter(|r| r.component_id == component_id)
            .max_by_key(|r| r.id)
    }

    /// Applies one request; `dirty` is set when the store changed
    fn apply(&mut self, request: &SessionRequest, dirty: &mut bool) -> Result<Value, String> {
        match request.operation {
            Operation::CreateRevision => {
                let p: CreateParams = params(request)?;

                if !self.components.contains_key(&p.id) {
                    self.components.insert(
                        p.id.clone(),
                        ComponentRecord {
                            id: p.id.clone(),
                            tags: p.tags,
                            fields: p.fields,
                        },
                    );
                    *dirty = true;
                }

                if let Some(current) = self.latest(&p.id).filter(|r| !r.published) {
                    return to_value(current);
                }

                let version = self.latest(&p.id).map(|r| r.version + 1).unwrap_or(1);
                self.last_revision_id += 1;
                let revision = RevisionRecord {
                    id: self.last_revision_id,
                    component_id: p.id,
                    version,
                    published: false,
                    comment: None,
                    created_at: Utc::now(),
                    user_id: request.user_id.clone(),
                };
                let value = to_value(&revision)?;
                self.revisions.push(revision);
                *dirty = true;
                Ok(value)
            }
            Operation::PublishRevision => {
                let p: PublishParams = params(request)?;
                let revision = self.revision_mut(p.revision_id)?;
                revision.published = true;
                revision.comment = p.comment;
                *dirty = true;
                to_value(&Ack { id: json!(p.revision_id) })
            }
            Operation::ChangeOwnership => {
                let p: OwnershipParams = params(request)?;
                self.revision_mut(p.revision_id)?.user_id = p.user_id;
                *dirty = true;
                to_value(&Ack { id: json!(p.revision_id) })
            }
            Operation::RemoveRevision => {
                let p: RevisionIdParams = params(request)?;
                let before = self.revisions.len();
                self.revisions.retain(|r| r.id != p.id);
                if self.revisions.len() == before {
                    return Err(format!("revision {} not found", p.id));
                }
                *dirty = true;
                to_value(&Ack { id: json!(p.id) })
            }
            Operation::ListRevisions => {
                let p: ComponentIdParams = params(request)?;
                let mut revisions: Vec<&RevisionRecord> = self
                    .revisions
                    .iter()
                    .filter(|r| r.component_id == p.id)
                    .collect();
                revisions.sort_by(|a, b| b.id.cmp(&a.id));
                revisions.truncate(p.limit.unwrap_or(DEFAULT_REVISION_LIMIT));
                to_value(&revisions)
            }
            Operation::FindComponent => {
                let p: ComponentIdParams = params(request)?;
                to_value(&self.components.get(&p.id))
            }
            Operation::FindComponents => {
                let p: FindParams = params(request)?;
                let found: Vec<&ComponentRecord> = self
                    .components
                    .values()
                    .filter(|c| p.tags.is_subset(&c.tags))
                    .filter(|c| p.fields.iter().all(|(k, v)| c.fields.get(k) == Some(v)))
                    .take(p.limit.unwrap_or(DEFAULT_COMPONENT_LIMIT))
                    .collect();
                to_value(&found)
            }
            Operation::RemoveComponent => {
                let p: ComponentIdParams = params(request)?;
                if self.components.remove(&p.id).is_none() {
                    return Err(format!("component {} not found", p.id));
                }
                self.revisions.retain(|r| r.component_id != p.id);
                *dirty = true;
                to_value(&Ack { id: json!(p.id) })
            }
        }
    }
}

/// Session backed by a JSON document on disk
#[derive(Debug, Clone)]
pub struct LocalSession {
    path: PathBuf,
    user_id: String,
}

impl LocalSession {
    pub fn new(path: impl Into<PathBuf>, user_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            user_id: user_id.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn store_error(&self, reason: impl ToString) -> SessionError {
        SessionError::Store {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    /// Exclusive lock held until the returned file is dropped
    fn lock(&self) -> Result<File, SessionError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.store_error(e))?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.path.with_extension("lock"))
            .map_err(|e| self.store_error(e))?;
        file.lock_exclusive().map_err(|e| self.store_error(e))?;
        Ok(file)
    }

    fn read_store(&self) -> Result<Store, SessionError> {
        if !self.path.exists() {
            return Ok(Store::default());
        }

        let content = fs::read(&self.path).map_err(|e| self.store_error(e))?;
        if content.is_empty() {
            return Ok(Store::default());
        }
        serde_json::from_slice(&content).map_err(|e| self.store_error(e))
    }

    fn write_store(&self, store: &Store) -> Result<(), SessionError> {
        let temp_path = self.path.with_extension("json.tmp");

        {
            let mut file = File::create(&temp_path).map_err(|e| self.store_error(e))?;
            let content = serde_json::to_vec_pretty(store).map_err(|e| self.store_error(e))?;
            file.write_all(&content).map_err(|e| self.store_error(e))?;
            file.sync_all().map_err(|e| self.store_error(e))?;
        }

        fs::rename(&temp_path, &self.path).map_err(|e| self.store_error(e))
    }
}

impl Session for LocalSession {
    fn execute(&self, request: &SessionRequest) -> Result<SessionResponse, SessionError> {
        let _lock = self.lock()?;
        let mut store = self.read_store()?;

        let mut dirty = false;
        let response = dispatch(request, |req| store.apply(req, &mut dirty));

        if dirty {
            self.write_store(&store)?;
            debug!(path = %self.path.display(), operation = %request.operation, "session store updated");
        }

        Ok(response)
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }
}
