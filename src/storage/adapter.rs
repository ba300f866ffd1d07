//! Identity translation between the pool and one tier
//!
//! Tiers may name fields differently from the rest of the pool (an archive
//! keyed by `seq` where the pool says `sequence`). An [`Adapter`] maps
//! identities on the way into a tier and back out of it.

use std::collections::BTreeMap;
use std::fmt;

use crate::domain::{Fields, Identifier};

pub trait Adapter: Send + Sync + fmt::Debug {
    /// Pool identity to tier identity
    fn input(&self, identifier: Identifier) -> Identifier;

    /// Tier identity to pool identity
    fn output(&self, identifier: Identifier) -> Identifier;
}

/// Passes identities through unchanged
#[derive(Debug, Default, Clone)]
pub struct IdentityAdapter;

impl Adapter for IdentityAdapter {
    fn input(&self, identifier: Identifier) -> Identifier {
        identifier
    }

    fn output(&self, identifier: Identifier) -> Identifier {
        identifier
    }
}

/// Renames fields, pool name to tier name
#[derive(Debug, Clone)]
pub struct RenameFieldsAdapter {
    mapping: BTreeMap<String, String>,
}

impl RenameFieldsAdapter {
    pub fn new(mapping: BTreeMap<String, String>) -> Self {
        Self { mapping }
    }

    fn rename<'a>(fields: Fields, pairs: impl Iterator<Item = (&'a String, &'a String)>) -> Fields {
        let lookup: BTreeMap<&String, &String> = pairs.collect();
        fields
            .into_iter()
            .map(|(name, value)| match lookup.get(&name) {
                Some(renamed) => ((*renamed).clone(), value),
                None => (name, value),
            })
            .collect()
    }
}

impl Adapter for RenameFieldsAdapter {
    fn input(&self, mut identifier: Identifier) -> Identifier {
        identifier.fields = Self::rename(identifier.fields, self.mapping.iter());
        identifier
    }

    fn output(&self, mut identifier: Identifier) -> Identifier {
        identifier.fields = Self::rename(identifier.fields, self.mapping.iter().map(|(k, v)| (v, k)));
        identifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FieldValue;

    #[test]
    fn rename_round_trip() {
        let adapter = RenameFieldsAdapter::new(
            [("sequence".to_string(), "seq".to_string())].into_iter().collect(),
        );

        let mut id = Identifier::new(["shot"], Fields::new());
        id.set_field("sequence", "sq01").set_field("shot", "sh010");

        let tier = adapter.input(id.clone());
        assert_eq!(tier.fields.get("seq"), Some(&FieldValue::from("sq01")));
        assert!(!tier.fields.contains_key("sequence"));

        assert_eq!(adapter.output(tier), id);
    }
}
