//! Card type domain model.

use crate::model::property::PropertyDefId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable card type identifier.
pub type CardTypeId = Uuid;

/// Named card type owning an ordered set of applicable properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardType {
    pub id: CardTypeId,
    pub name: String,
    /// Applicable properties in display order, without duplicates.
    pub property_ids: Vec<PropertyDefId>,
}

impl CardType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            property_ids: Vec::new(),
        }
    }

    pub fn has_property(&self, property: PropertyDefId) -> bool {
        self.property_ids.contains(&property)
    }

    /// Appends a property. Returns `false` when it was already associated.
    pub fn add_property(&mut self, property: PropertyDefId) -> bool {
        if self.has_property(property) {
            return false;
        }
        self.property_ids.push(property);
        true
    }

    /// Removes a property. Returns `false` when it was not associated.
    pub fn remove_property(&mut self, property: PropertyDefId) -> bool {
        let before = self.property_ids.len();
        self.property_ids.retain(|id| *id != property);
        before != self.property_ids.len()
    }
}
