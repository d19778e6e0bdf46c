//! Project-scoped handle over all state the engine reads and mutates.
//!
//! # Responsibility
//! - Own definitions, cards, tree memberships and dependent records of one
//!   project between an explicit load and commit.
//! - Provide the card-storage surface: by-name property access,
//!   version-on-save bookkeeping and tree membership enumeration.
//!
//! # Invariants
//! - Every by-name lookup is case-insensitive and trims whitespace.
//! - A card id appears in `unsaved` iff it changed since the last save.

use crate::model::card::{Card, CardId};
use crate::model::card_type::{CardType, CardTypeId};
use crate::model::dependents::{
    CardDefaults, HistorySubscription, ProjectVariable, PropertyValueHolder, SavedView, Transition,
};
use crate::model::property::{PropertyDefId, PropertyDefinition, PropertyKind};
use crate::model::tree::{TreeBelonging, TreeConfiguration, TreeId};
use crate::model::value::{PropertyValue, DATE_DISPLAY_FORMAT};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Stable project identifier.
pub type ProjectId = Uuid;

#[derive(Debug, Clone)]
pub struct ProjectState {
    pub id: ProjectId,
    pub identifier: String,
    /// Decimal digits retained for numeric values.
    pub precision: u32,
    pub card_types: Vec<CardType>,
    pub properties: Vec<PropertyDefinition>,
    pub trees: Vec<TreeConfiguration>,
    pub cards: BTreeMap<CardId, Card>,
    pub belongings: BTreeMap<(TreeId, CardId), TreeBelonging>,
    pub transitions: Vec<Transition>,
    pub card_defaults: Vec<CardDefaults>,
    pub subscriptions: Vec<HistorySubscription>,
    pub saved_views: Vec<SavedView>,
    pub variables: Vec<ProjectVariable>,
    next_card_number: u32,
    unsaved: BTreeSet<CardId>,
}

impl ProjectState {
    pub fn new(identifier: impl Into<String>, precision: u32) -> Self {
        Self::with_id(Uuid::new_v4(), identifier, precision)
    }

    /// Creates an empty handle with a caller-provided id (used by loaders).
    pub fn with_id(id: ProjectId, identifier: impl Into<String>, precision: u32) -> Self {
        Self {
            id,
            identifier: identifier.into(),
            precision,
            card_types: Vec::new(),
            properties: Vec::new(),
            trees: Vec::new(),
            cards: BTreeMap::new(),
            belongings: BTreeMap::new(),
            transitions: Vec::new(),
            card_defaults: Vec::new(),
            subscriptions: Vec::new(),
            saved_views: Vec::new(),
            variables: Vec::new(),
            next_card_number: 1,
            unsaved: BTreeSet::new(),
        }
    }

    pub fn card_type(&self, id: CardTypeId) -> Option<&CardType> {
        self.card_types.iter().find(|card_type| card_type.id == id)
    }

    pub fn card_type_mut(&mut self, id: CardTypeId) -> Option<&mut CardType> {
        self.card_types.iter_mut().find(|card_type| card_type.id == id)
    }

    pub fn card_type_by_name(&self, name: &str) -> Option<&CardType> {
        let wanted = name.trim();
        self.card_types
            .iter()
            .find(|card_type| card_type.name.eq_ignore_ascii_case(wanted))
    }

    pub fn card_type_name(&self, id: CardTypeId) -> String {
        self.card_type(id)
            .map_or_else(|| id.to_string(), |card_type| card_type.name.clone())
    }

    pub fn property(&self, id: PropertyDefId) -> Option<&PropertyDefinition> {
        self.properties.iter().find(|property| property.id == id)
    }

    pub fn property_mut(&mut self, id: PropertyDefId) -> Option<&mut PropertyDefinition> {
        self.properties.iter_mut().find(|property| property.id == id)
    }

    pub fn property_by_name(&self, name: &str) -> Option<&PropertyDefinition> {
        self.properties.iter().find(|property| property.is_named(name))
    }

    pub fn property_name(&self, id: PropertyDefId) -> String {
        self.property(id)
            .map_or_else(|| id.to_string(), |property| property.name.clone())
    }

    /// Whether `property` is associated with `card_type` right now.
    pub fn is_applicable(&self, property: PropertyDefId, card_type: CardTypeId) -> bool {
        self.card_type(card_type)
            .is_some_and(|card_type| card_type.has_property(property))
    }

    pub fn tree(&self, id: TreeId) -> Option<&TreeConfiguration> {
        self.trees.iter().find(|tree| tree.id == id)
    }

    pub fn tree_by_name(&self, name: &str) -> Option<&TreeConfiguration> {
        let wanted = name.trim();
        self.trees
            .iter()
            .find(|tree| tree.name.eq_ignore_ascii_case(wanted))
    }

    pub fn card(&self, id: CardId) -> Option<&Card> {
        self.cards.get(&id)
    }

    pub fn card_by_number(&self, number: u32) -> Option<&Card> {
        self.cards.values().find(|card| card.number == number)
    }

    pub fn card_by_name(&self, name: &str) -> Option<&Card> {
        let wanted = name.trim();
        self.cards
            .values()
            .find(|card| card.name.eq_ignore_ascii_case(wanted))
    }

    /// Creates a card, pre-filled with the card type defaults.
    ///
    /// Returns `None` when `card_type` does not exist.
    pub fn create_card(&mut self, name: impl Into<String>, card_type: CardTypeId) -> Option<CardId> {
        self.card_type(card_type)?;
        let mut card = Card::new(self.next_card_number, name, card_type);
        self.next_card_number = self.next_card_number.saturating_add(1);

        let defaults = self
            .card_defaults
            .iter()
            .filter(|defaults| defaults.card_type == card_type)
            .flat_map(|defaults| defaults.assignments.iter());
        for assignment in defaults {
            if self.is_applicable(assignment.property, card_type) {
                card.set_value(assignment.property, assignment.value.clone());
            }
        }

        let id = card.id;
        self.cards.insert(id, card);
        self.unsaved.insert(id);
        Some(id)
    }

    /// Inserts a loaded card without marking it unsaved.
    pub fn restore_card(&mut self, card: Card) {
        self.next_card_number = self.next_card_number.max(card.number.saturating_add(1));
        self.cards.insert(card.id, card);
    }

    pub fn value(&self, card: CardId, property: PropertyDefId) -> Option<&PropertyValue> {
        self.card(card).and_then(|card| card.value(property))
    }

    /// Reads a value by property name.
    pub fn value_by_name(&self, card: CardId, property_name: &str) -> Option<&PropertyValue> {
        let property = self.property_by_name(property_name)?;
        self.value(card, property.id)
    }

    /// Writes one value and records the card as unsaved when it changed.
    pub fn set_value(
        &mut self,
        card: CardId,
        property: PropertyDefId,
        value: Option<PropertyValue>,
    ) -> bool {
        let changed = self
            .cards
            .get_mut(&card)
            .is_some_and(|stored| stored.set_value(property, value));
        if changed {
            self.unsaved.insert(card);
        }
        changed
    }

    pub fn set_card_type(&mut self, card: CardId, card_type: CardTypeId) -> bool {
        let changed = match self.cards.get_mut(&card) {
            Some(stored) if stored.card_type != card_type => {
                stored.card_type = card_type;
                true
            }
            _ => false,
        };
        if changed {
            self.unsaved.insert(card);
        }
        changed
    }

    /// Human-readable value text, as shown on a card.
    pub fn display_value(&self, card: CardId, property: PropertyDefId) -> Option<String> {
        let value = self.value(card, property)?;
        match value {
            PropertyValue::Enum(id) => self
                .property(property)
                .and_then(|definition| definition.enum_value(*id))
                .map(|enum_value| enum_value.value.clone()),
            PropertyValue::Text(text) => Some(text.clone()),
            PropertyValue::Date(date) => Some(date.format(DATE_DISPLAY_FORMAT).to_string()),
            PropertyValue::Card(id) => self
                .card(*id)
                .map(|target| format!("#{} {}", target.number, target.name)),
        }
    }

    pub fn belonging(&self, tree: TreeId, card: CardId) -> Option<&TreeBelonging> {
        self.belongings.get(&(tree, card))
    }

    /// Members of one tree in `(level, number)` order.
    pub fn tree_members(&self, tree: TreeId) -> Vec<CardId> {
        let mut members: Vec<(usize, u32, CardId)> = self
            .belongings
            .range((tree, Uuid::nil())..=(tree, Uuid::from_u128(u128::MAX)))
            .filter_map(|(_, belonging)| {
                self.card(belonging.card)
                    .map(|card| (belonging.level, card.number, card.id))
            })
            .collect();
        members.sort();
        members.into_iter().map(|(_, _, id)| id).collect()
    }

    /// Trees the card currently belongs to.
    pub fn trees_of(&self, card: CardId) -> Vec<TreeId> {
        self.belongings
            .values()
            .filter(|belonging| belonging.card == card)
            .map(|belonging| belonging.tree)
            .collect()
    }

    /// Formula and aggregate definitions, in definition order.
    pub fn calculated_properties(&self) -> impl Iterator<Item = &PropertyDefinition> {
        self.properties
            .iter()
            .filter(|property| property.is_calculated())
    }

    /// Formula definitions associated with any of `card_types`, scanning only
    /// those card types' property lists.
    pub fn formulas_for_card_types(
        &self,
        card_types: &BTreeSet<CardTypeId>,
    ) -> Vec<&PropertyDefinition> {
        let mut seen = BTreeSet::new();
        let mut formulas = Vec::new();
        for card_type in card_types.iter().filter_map(|id| self.card_type(*id)) {
            for property_id in &card_type.property_ids {
                if !seen.insert(*property_id) {
                    continue;
                }
                if let Some(property) = self.property(*property_id) {
                    if matches!(property.kind, PropertyKind::Formula { .. }) {
                        formulas.push(property);
                    }
                }
            }
        }
        formulas
    }

    /// Applies `visit` to cards and every dependent record type.
    pub fn for_each_holder_mut(&mut self, mut visit: impl FnMut(&mut dyn PropertyValueHolder)) {
        for card in self.cards.values_mut() {
            visit(card);
        }
        self.for_each_dependent_mut(visit);
    }

    /// Applies `visit` to every non-card record storing property values.
    pub fn for_each_dependent_mut(&mut self, mut visit: impl FnMut(&mut dyn PropertyValueHolder)) {
        for transition in &mut self.transitions {
            visit(transition);
        }
        for defaults in &mut self.card_defaults {
            visit(defaults);
        }
        for subscription in &mut self.subscriptions {
            visit(subscription);
        }
        for view in &mut self.saved_views {
            visit(view);
        }
        for variable in &mut self.variables {
            visit(variable);
        }
    }

    pub fn mark_unsaved(&mut self, card: CardId) {
        if self.cards.contains_key(&card) {
            self.unsaved.insert(card);
        }
    }

    pub fn unsaved_cards(&self) -> &BTreeSet<CardId> {
        &self.unsaved
    }

    /// Creates one new version for every unsaved card.
    ///
    /// Returns saved card ids in id order.
    pub fn save_changes(&mut self) -> Vec<CardId> {
        let saved: Vec<CardId> = std::mem::take(&mut self.unsaved).into_iter().collect();
        for id in &saved {
            if let Some(card) = self.cards.get_mut(id) {
                card.version = card.version.saturating_add(1);
            }
        }
        saved
    }
}
