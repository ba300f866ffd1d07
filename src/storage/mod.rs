//! # Storage Layer
//!
//! Tiered persistence for studio assets. A pool orders its storages from
//! most local to most authoritative; every identity resolves to a chain
//! across the storages that serve it.
//!
//! ## Resolution
//!
//! | Step | Type | Produces |
//! |------|------|----------|
//! | tags | [`StoragePool::get_item`] | [`MetaItem`] chain, one template per tier |
//! | tags + fields | [`MetaItem::get_storage_item`] | [`StorageItem`], one rpath per tier |
//! | filesystem path | [`StoragePool::storage_item_from_filename`] | [`StorageItem`] |
//! | members | [`Cursor`] | versions, frames or collection files |
//!
//! ## Backends
//!
//! | Accessor | Registry name | Notes |
//! |----------|---------------|-------|
//! | [`FileSystemAccessor`] | `fs` | atomic writes (temp file + rename) |
//! | [`DropboxAccessor`] | `fs-dropbox` | synced folder, no local paths exposed |
//! | [`MemoryAccessor`] | `memory` | process-local, used in tests |
//!
//! Further accessors and adapters plug in through [`Registry`].
//!
//! ## Pool Config
//!
//! ```yaml
//! project: demo
//! write_order: local_first
//! storages:
//!   - name: local
//!     schema: studio
//!     accessor: { name: fs, kwargs: { root: ./work } }
//!   - name: remote
//!     schema: studio
//!     tag_mask: "render | comp"
//!     accessor: { name: fs, kwargs: { root: /mnt/server } }
//! ```

mod accessor;
mod adapter;
mod config;
mod cursor;
mod item;
pub mod metadata;
mod pool;
mod registry;
mod tier;

pub use accessor::{
    join_rpath, normalize_rpath, Accessor, AccessorError, DropboxAccessor, FileSystemAccessor,
    MemoryAccessor,
};
pub use adapter::{Adapter, IdentityAdapter, RenameFieldsAdapter};
pub use config::{
    resolve_schema, AccessorConfig, AdapterConfig, ConfigError, OutputFormat, PoolConfig,
    Settings, StorageConfig, WriteOrder, CONFIG_ENV, SCHEMA_PATH_ENV, USER_ENV,
};
pub use cursor::{Cursor, CursorKind, PLACEHOLDER};
pub use item::{MetaItem, ReadOptions, StorageItem, WriteOptions};
pub use metadata::Metadata;
pub use pool::StoragePool;
pub use registry::{AccessorFactory, AdapterFactory, Kwargs, Registry};
pub use tier::{PoolContext, Storage};
