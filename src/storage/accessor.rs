//! Physical backends behind a storage tier
//!
//! An [`Accessor`] knows nothing about tags or templates; it moves bytes
//! to and from relative paths ("rpaths", always `/`-separated) under its
//! own root.
//!
//! | Name | Type | Notes |
//! |------|------|-------|
//! | `fs` | [`FileSystemAccessor`] | atomic temp-file + rename writes |
//! | `fs-dropbox` | [`DropboxAccessor`] | drop folder, no filesystem path exposed |
//! | `memory` | [`MemoryAccessor`] | in-process, for tests and scratch pools |

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum AccessorError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Failed to {op} '{path}': {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("{0}")]
    Backend(String),
}

impl AccessorError {
    /// True when the failure only means the resource is absent
    pub fn is_not_found(&self) -> bool {
        match self {
            AccessorError::NotFound(_) => true,
            AccessorError::Io { source, .. } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            return AccessorError::NotFound(path.display().to_string());
        }
        AccessorError::Io {
            op,
            path: path.display().to_string(),
            source,
        }
    }
}

/// Byte-level operations one backend must provide
pub trait Accessor: Send + Sync + fmt::Debug {
    /// Reads a resource, `None` if it doesn't exist
    fn read(&self, rpath: &str) -> Result<Option<Vec<u8>>, AccessorError>;

    /// Writes a resource, creating intermediate directories
    fn write(&self, rpath: &str, data: &[u8]) -> Result<(), AccessorError>;

    fn exists(&self, rpath: &str) -> Result<bool, AccessorError>;

    fn make_dir(&self, rpath: &str, recursive: bool) -> Result<(), AccessorError>;

    /// Lists entries under a directory
    ///
    /// Non-recursive listings return immediate child names, files and
    /// directories alike. Recursive listings return every file below the
    /// directory. `relative` strips the directory prefix from results.
    fn list(&self, rpath: &str, relative: bool, recursive: bool)
        -> Result<Vec<String>, AccessorError>;

    /// Removes a file or a whole directory; missing resources are ignored
    fn rm(&self, rpath: &str) -> Result<(), AccessorError>;

    /// Local path of a resource, only for locally mounted backends
    fn filesystem_path(&self, rpath: &str) -> Option<PathBuf>;

    /// Inverse of [`Accessor::filesystem_path`]
    fn rpath_from_filesystem_path(&self, _path: &Path) -> Option<String> {
        None
    }
}

/// Strips redundant separators so rpaths compare reliably
pub fn normalize_rpath(rpath: &str) -> String {
    rpath
        .replace('\\', "/")
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Joins rpath fragments with `/`, skipping empty ones
pub fn join_rpath(parts: &[&str]) -> String {
    normalize_rpath(&parts.join("/"))
}

/// Accessor over a local directory
#[derive(Debug, Clone)]
pub struct FileSystemAccessor {
    root: PathBuf,
}

impl FileSystemAccessor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, rpath: &str) -> Result<PathBuf, AccessorError> {
        let rpath = normalize_rpath(rpath);
        if rpath.split('/').any(|part| part == "..") {
            return Err(AccessorError::InvalidPath(rpath));
        }
        Ok(self.root.join(rpath))
    }
}

impl Accessor for FileSystemAccessor {
    fn read(&self, rpath: &str) -> Result<Option<Vec<u8>>, AccessorError> {
        let path = self.resolve(rpath)?;
        if !path.is_file() {
            return Ok(None);
        }
        fs::read(&path)
            .map(Some)
            .map_err(|e| AccessorError::io("read", &path, e))
    }

    fn write(&self, rpath: &str, data: &[u8]) -> Result<(), AccessorError> {
        let path = self.resolve(rpath)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| AccessorError::io("create", parent, e))?;
        }

        let file_name = path
            .file_name()
            .ok_or_else(|| AccessorError::InvalidPath(rpath.to_string()))?
            .to_string_lossy()
            .to_string();
        let temp_path = path.with_file_name(format!("{}__{}", file_name, uuid::Uuid::new_v4().simple()));

        let staged = File::create(&temp_path)
            .and_then(|mut file| {
                file.write_all(data)?;
                file.sync_all()
            })
            .and_then(|_| fs::rename(&temp_path, &path));

        if let Err(e) = staged {
            let _ = fs::remove_file(&temp_path);
            return Err(AccessorError::io("write", &path, e));
        }

        Ok(())
    }

    fn exists(&self, rpath: &str) -> Result<bool, AccessorError> {
        Ok(self.resolve(rpath)?.exists())
    }

    fn make_dir(&self, rpath: &str, recursive: bool) -> Result<(), AccessorError> {
        let path = self.resolve(rpath)?;
        let result = if recursive {
            fs::create_dir_all(&path)
        } else {
            fs::create_dir(&path)
        };
        result.map_err(|e| AccessorError::io("create directory", &path, e))
    }

    fn list(
        &self,
        rpath: &str,
        relative: bool,
        recursive: bool,
    ) -> Result<Vec<String>, AccessorError> {
        let base = normalize_rpath(rpath);
        let dir = self.resolve(&base)?;
        if !dir.is_dir() {
            return Err(AccessorError::NotFound(dir.display().to_string()));
        }

        let mut entries = Vec::new();

        if recursive {
            for entry in WalkDir::new(&dir).min_depth(1) {
                let entry = entry.map_err(|e| AccessorError::Backend(e.to_string()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = entry
                    .path()
                    .strip_prefix(&dir)
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
                    .map_err(|e| AccessorError::Backend(e.to_string()))?;
                entries.push(rel);
            }
        } else {
            let read_dir = fs::read_dir(&dir).map_err(|e| AccessorError::io("list", &dir, e))?;
            for entry in read_dir {
                let entry = entry.map_err(|e| AccessorError::io("list", &dir, e))?;
                entries.push(entry.file_name().to_string_lossy().to_string());
            }
        }

        if !relative {
            entries = entries
                .into_iter()
                .map(|e| join_rpath(&[&base, &e]))
                .collect();
        }

        entries.sort();
        Ok(entries)
    }

    fn rm(&self, rpath: &str) -> Result<(), AccessorError> {
        let path = self.resolve(rpath)?;
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else if path.is_file() {
            fs::remove_file(&path)
        } else {
            return Ok(());
        };
        result.map_err(|e| AccessorError::io("remove", &path, e))
    }

    fn filesystem_path(&self, rpath: &str) -> Option<PathBuf> {
        self.resolve(rpath).ok()
    }

    fn rpath_from_filesystem_path(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.root)
            .ok()
            .map(|p| normalize_rpath(&p.to_string_lossy()))
    }
}

/// Drop-folder accessor
///
/// Same I/O as [`FileSystemAccessor`], but callers never see a local path,
/// so nothing can bypass the storage layer to edit files in place.
#[derive(Debug, Clone)]
pub struct DropboxAccessor {
    inner: FileSystemAccessor,
}

impl DropboxAccessor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            inner: FileSystemAccessor::new(root),
        }
    }
}

impl Accessor for DropboxAccessor {
    fn read(&self, rpath: &str) -> Result<Option<Vec<u8>>, AccessorError> {
        self.inner.read(rpath)
    }

    fn write(&self, rpath: &str, data: &[u8]) -> Result<(), AccessorError> {
        self.inner.write(rpath, data)
    }

    fn exists(&self, rpath: &str) -> Result<bool, AccessorError> {
        self.inner.exists(rpath)
    }

    fn make_dir(&self, rpath: &str, recursive: bool) -> Result<(), AccessorError> {
        self.inner.make_dir(rpath, recursive)
    }

    fn list(
        &self,
        rpath: &str,
        relative: bool,
        recursive: bool,
    ) -> Result<Vec<String>, AccessorError> {
        self.inner.list(rpath, relative, recursive)
    }

    fn rm(&self, rpath: &str) -> Result<(), AccessorError> {
        self.inner.rm(rpath)
    }

    fn filesystem_path(&self, _rpath: &str) -> Option<PathBuf> {
        None
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

impl MemoryState {
    fn add_parents(&mut self, rpath: &str) {
        let mut current = rpath;
        while let Some(idx) = current.rfind('/') {
            current = &current[..idx];
            self.dirs.insert(current.to_string());
        }
    }

    fn is_dir(&self, rpath: &str) -> bool {
        if rpath.is_empty() || self.dirs.contains(rpath) {
            return true;
        }
        let prefix = format!("{}/", rpath);
        self.files.keys().any(|k| k.starts_with(&prefix))
    }
}

/// In-process accessor
#[derive(Debug, Default)]
pub struct MemoryAccessor {
    state: RwLock<MemoryState>,
}

impl MemoryAccessor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Accessor for MemoryAccessor {
    fn read(&self, rpath: &str) -> Result<Option<Vec<u8>>, AccessorError> {
        Ok(self.state.read().files.get(&normalize_rpath(rpath)).cloned())
    }

    fn write(&self, rpath: &str, data: &[u8]) -> Result<(), AccessorError> {
        let rpath = normalize_rpath(rpath);
        if rpath.is_empty() {
            return Err(AccessorError::InvalidPath(rpath));
        }

        let mut state = self.state.write();
        if state.dirs.contains(&rpath) {
            return Err(AccessorError::InvalidPath(format!("{} is a directory", rpath)));
        }
        state.add_parents(&rpath);
        state.files.insert(rpath, data.to_vec());
        Ok(())
    }

    fn exists(&self, rpath: &str) -> Result<bool, AccessorError> {
        let rpath = normalize_rpath(rpath);
        let state = self.state.read();
        Ok(state.files.contains_key(&rpath) || state.is_dir(&rpath))
    }

    fn make_dir(&self, rpath: &str, recursive: bool) -> Result<(), AccessorError> {
        let rpath = normalize_rpath(rpath);
        let mut state = self.state.write();

        if !recursive {
            if let Some(idx) = rpath.rfind('/') {
                if !state.is_dir(&rpath[..idx]) {
                    return Err(AccessorError::NotFound(rpath[..idx].to_string()));
                }
            }
        }

        state.add_parents(&rpath);
        state.dirs.insert(rpath);
        Ok(())
    }

    fn list(
        &self,
        rpath: &str,
        relative: bool,
        recursive: bool,
    ) -> Result<Vec<String>, AccessorError> {
        let base = normalize_rpath(rpath);
        let state = self.state.read();
        if !state.is_dir(&base) {
            return Err(AccessorError::NotFound(base));
        }

        let prefix = if base.is_empty() {
            String::new()
        } else {
            format!("{}/", base)
        };

        let mut entries = BTreeSet::new();
        if recursive {
            for key in state.files.keys() {
                if let Some(rest) = key.strip_prefix(&prefix) {
                    entries.insert(rest.to_string());
                }
            }
        } else {
            let children = state.files.keys().chain(state.dirs.iter());
            for key in children {
                if let Some(rest) = key.strip_prefix(&prefix) {
                    if let Some(name) = rest.split('/').next().filter(|n| !n.is_empty()) {
                        entries.insert(name.to_string());
                    }
                }
            }
        }

        Ok(entries
            .into_iter()
            .map(|e| if relative { e } else { join_rpath(&[&base, &e]) })
            .collect())
    }

    fn rm(&self, rpath: &str) -> Result<(), AccessorError> {
        let rpath = normalize_rpath(rpath);
        let prefix = format!("{}/", rpath);

        let mut state = self.state.write();
        state.files.remove(&rpath);
        state.files.retain(|k, _| !k.starts_with(&prefix));
        state.dirs.remove(&rpath);
        state.dirs.retain(|d| !d.starts_with(&prefix));
        Ok(())
    }

    fn filesystem_path(&self, _rpath: &str) -> Option<PathBuf> {
        None
    }
}
