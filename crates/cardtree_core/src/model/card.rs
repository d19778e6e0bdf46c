//! Card domain model.
//!
//! # Invariants
//! - `id` is stable; `number` is unique per project and never reused.
//! - `version` is 0 until the first save and grows by one per save that
//!   changed the card.

use crate::model::card_type::CardTypeId;
use crate::model::property::PropertyDefId;
use crate::model::value::PropertyValue;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Stable card identifier.
pub type CardId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    /// Human-facing per-project number (`#12`).
    pub number: u32,
    pub name: String,
    pub card_type: CardTypeId,
    /// Property values keyed by property definition id. Absent means nil.
    pub values: BTreeMap<PropertyDefId, PropertyValue>,
    pub tags: BTreeSet<String>,
    pub version: u32,
}

impl Card {
    pub fn new(number: u32, name: impl Into<String>, card_type: CardTypeId) -> Self {
        Self {
            id: Uuid::new_v4(),
            number,
            name: name.into(),
            card_type,
            values: BTreeMap::new(),
            tags: BTreeSet::new(),
            version: 0,
        }
    }

    pub fn value(&self, property: PropertyDefId) -> Option<&PropertyValue> {
        self.values.get(&property)
    }

    /// Sets or clears one value. Returns whether the stored value changed.
    pub fn set_value(&mut self, property: PropertyDefId, value: Option<PropertyValue>) -> bool {
        match value {
            Some(value) => self.values.insert(property, value.clone()).as_ref() != Some(&value),
            None => self.values.remove(&property).is_some(),
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        let wanted = tag.trim().to_lowercase();
        self.tags.iter().any(|candidate| candidate.to_lowercase() == wanted)
    }
}

#[cfg(test)]
mod tests {
    use super::Card;
    use crate::model::value::PropertyValue;
    use uuid::Uuid;

    #[test]
    fn set_value_reports_changes_only() {
        let mut card = Card::new(1, "story", Uuid::new_v4());
        let property = Uuid::new_v4();
        assert!(card.set_value(property, Some(PropertyValue::Text("1".to_string()))));
        assert!(!card.set_value(property, Some(PropertyValue::Text("1".to_string()))));
        assert!(card.set_value(property, None));
        assert!(!card.set_value(property, None));
    }
}
