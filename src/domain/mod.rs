//! Domain models for assetpool
//!
//! Pure value types and algorithms with no I/O: identities, tag masks,
//! field templates and item kinds.

mod formatter;
mod identifier;
mod item_type;
mod tag_mask;

pub use formatter::{
    placeholders, tokenize, FieldConfig, FieldFormatter, FieldOptions, FieldType, FormatError,
    Segment,
};
pub use identifier::{
    is_extra, tag_set, FieldValue, Fields, Identifier, TagSet, CHECKOUT_TAG, PROJECT_FIELD,
    PUBLISH_TAG, VERSION_FIELD,
};
pub use item_type::{ItemType, INDEX_FIELD, SUFFIX_FIELD};
pub use tag_mask::{match_tags, TagMask, TagMaskError};
