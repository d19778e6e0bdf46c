//! Tree configuration and membership records.
//!
//! # Invariants
//! - Levels are strictly ordered; one card type appears at most once.
//! - Every level except the deepest carries exactly one relationship
//!   property whose values are cards of that level's type.
//! - Level numbers are 1-based (`levels[0]` is level 1).

use crate::model::card::CardId;
use crate::model::card_type::CardTypeId;
use crate::model::property::PropertyDefId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable tree configuration identifier.
pub type TreeId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeLevel {
    pub card_type: CardTypeId,
    /// `None` only for the deepest level.
    pub relationship: Option<PropertyDefId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeConfiguration {
    pub id: TreeId,
    pub name: String,
    pub levels: Vec<TreeLevel>,
}

impl TreeConfiguration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            levels: Vec::new(),
        }
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// 1-based level for a card type, if configured.
    pub fn level_of(&self, card_type: CardTypeId) -> Option<usize> {
        self.levels
            .iter()
            .position(|level| level.card_type == card_type)
            .map(|index| index + 1)
    }

    /// Card type configured at a 1-based level.
    pub fn card_type_at(&self, level: usize) -> Option<CardTypeId> {
        level
            .checked_sub(1)
            .and_then(|index| self.levels.get(index))
            .map(|level| level.card_type)
    }

    /// Relationship property pointing at cards of a 1-based level.
    pub fn relationship_at(&self, level: usize) -> Option<PropertyDefId> {
        level
            .checked_sub(1)
            .and_then(|index| self.levels.get(index))
            .and_then(|level| level.relationship)
    }

    /// 1-based level whose cards are the values of `relationship`.
    pub fn level_of_relationship(&self, relationship: PropertyDefId) -> Option<usize> {
        self.levels
            .iter()
            .position(|level| level.relationship == Some(relationship))
            .map(|index| index + 1)
    }

    pub fn relationships(&self) -> impl Iterator<Item = (usize, PropertyDefId)> + '_ {
        self.levels
            .iter()
            .enumerate()
            .filter_map(|(index, level)| level.relationship.map(|id| (index + 1, id)))
    }
}

/// Membership record placing a card in a tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeBelonging {
    pub card: CardId,
    pub tree: TreeId,
    /// Deepest assigned ancestor. `None` means directly under root.
    pub parent: Option<CardId>,
    /// 1-based level implied by the card type.
    pub level: usize,
}
