//! assetpool - tiered asset storage for studio pipelines
//!
//! Assets are addressed by identity (tags plus typed fields) rather than by
//! path. A schema directory tree maps each tag-set to a path template; a
//! pool of storages, ordered from local to authoritative, resolves every
//! identity to one path per tier and moves bytes between them.
//!
//! | Module | Concern |
//! |--------|---------|
//! | [`domain`] | identifiers, tag masks, field formatting |
//! | [`schema`] | schema trees and structure scaffolding |
//! | [`storage`] | accessors, tiers, pools, items and cursors |
//! | [`vcs`] | components, revisions and their sessions |
//! | [`cli`] | the `assetpool` command |

pub mod cli;
pub mod domain;
pub mod error;
pub mod schema;
pub mod storage;
pub mod vcs;

pub use domain::{FieldValue, Fields, Identifier, TagMask, TagSet};
pub use error::{Result, StorageError};
pub use storage::{MetaItem, Storage, StorageItem, StoragePool};
pub use vcs::{Component, Revision};
