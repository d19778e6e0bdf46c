//! Records outside cards that store property values.
//!
//! # Responsibility
//! - Model transitions, card defaults, history subscriptions, saved views and
//!   project variables to the extent they reference property values.
//! - Expose every stored value through [`PropertyValueHolder`] so project-wide
//!   rewrites (precision merges, property deletion) reach all of them.
//!
//! # Invariants
//! - Managed values are referenced by enumeration id, never by text/position.

use crate::model::card::Card;
use crate::model::card_type::CardTypeId;
use crate::model::property::PropertyDefId;
use crate::model::value::PropertyValue;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Anything that stores property values which must follow project-wide
/// rewrites.
pub trait PropertyValueHolder {
    /// Visits each stored value with the property it belongs to.
    fn for_each_value_mut(&mut self, visit: &mut dyn FnMut(PropertyDefId, &mut PropertyValue));
    /// Drops every binding to `property`. Returns whether anything was removed.
    fn forget_property(&mut self, property: PropertyDefId) -> bool;
}

/// `property = value` pair; `value: None` means "(not set)".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyAssignment {
    pub property: PropertyDefId,
    pub value: Option<PropertyValue>,
}

impl PropertyAssignment {
    pub fn new(property: PropertyDefId, value: Option<PropertyValue>) -> Self {
        Self { property, value }
    }
}

fn visit_assignments(
    assignments: &mut [PropertyAssignment],
    visit: &mut dyn FnMut(PropertyDefId, &mut PropertyValue),
) {
    for assignment in assignments {
        if let Some(value) = assignment.value.as_mut() {
            visit(assignment.property, value);
        }
    }
}

fn forget_in(assignments: &mut Vec<PropertyAssignment>, property: PropertyDefId) -> bool {
    let before = assignments.len();
    assignments.retain(|assignment| assignment.property != property);
    before != assignments.len()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub id: Uuid,
    pub name: String,
    pub card_type: Option<CardTypeId>,
    pub prerequisites: Vec<PropertyAssignment>,
    pub actions: Vec<PropertyAssignment>,
}

impl PropertyValueHolder for Transition {
    fn for_each_value_mut(&mut self, visit: &mut dyn FnMut(PropertyDefId, &mut PropertyValue)) {
        visit_assignments(&mut self.prerequisites, visit);
        visit_assignments(&mut self.actions, visit);
    }

    fn forget_property(&mut self, property: PropertyDefId) -> bool {
        let prerequisites = forget_in(&mut self.prerequisites, property);
        let actions = forget_in(&mut self.actions, property);
        prerequisites || actions
    }
}

/// Values pre-filled on cards created with one card type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardDefaults {
    pub card_type: CardTypeId,
    pub assignments: Vec<PropertyAssignment>,
}

impl PropertyValueHolder for CardDefaults {
    fn for_each_value_mut(&mut self, visit: &mut dyn FnMut(PropertyDefId, &mut PropertyValue)) {
        visit_assignments(&mut self.assignments, visit);
    }

    fn forget_property(&mut self, property: PropertyDefId) -> bool {
        forget_in(&mut self.assignments, property)
    }
}

/// Card-history notification filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySubscription {
    pub id: Uuid,
    pub user: String,
    /// Card must hold these values at the time of the change.
    pub involved: Vec<PropertyAssignment>,
    /// Change must set these values.
    pub acquired: Vec<PropertyAssignment>,
}

impl PropertyValueHolder for HistorySubscription {
    fn for_each_value_mut(&mut self, visit: &mut dyn FnMut(PropertyDefId, &mut PropertyValue)) {
        visit_assignments(&mut self.involved, visit);
        visit_assignments(&mut self.acquired, visit);
    }

    fn forget_property(&mut self, property: PropertyDefId) -> bool {
        let involved = forget_in(&mut self.involved, property);
        let acquired = forget_in(&mut self.acquired, property);
        involved || acquired
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Is,
    IsNot,
    LessThan,
    GreaterThan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewFilter {
    pub property: PropertyDefId,
    pub operator: FilterOperator,
    pub value: Option<PropertyValue>,
}

/// Named card list filter saved by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedView {
    pub id: Uuid,
    pub name: String,
    pub filters: Vec<ViewFilter>,
}

impl PropertyValueHolder for SavedView {
    fn for_each_value_mut(&mut self, visit: &mut dyn FnMut(PropertyDefId, &mut PropertyValue)) {
        for filter in &mut self.filters {
            if let Some(value) = filter.value.as_mut() {
                visit(filter.property, value);
            }
        }
    }

    fn forget_property(&mut self, property: PropertyDefId) -> bool {
        let before = self.filters.len();
        self.filters.retain(|filter| filter.property != property);
        before != self.filters.len()
    }
}

/// Project-level named value usable in filters of the bound properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectVariable {
    pub id: Uuid,
    pub name: String,
    pub property_ids: Vec<PropertyDefId>,
    pub value: Option<PropertyValue>,
}

impl PropertyValueHolder for ProjectVariable {
    fn for_each_value_mut(&mut self, visit: &mut dyn FnMut(PropertyDefId, &mut PropertyValue)) {
        // The value is shared by all bound properties; visit it once.
        if let (Some(property), Some(value)) = (self.property_ids.first(), self.value.as_mut()) {
            visit(*property, value);
        }
    }

    fn forget_property(&mut self, property: PropertyDefId) -> bool {
        let before = self.property_ids.len();
        self.property_ids.retain(|id| *id != property);
        if self.property_ids.is_empty() {
            self.value = None;
        }
        before != self.property_ids.len()
    }
}

impl PropertyValueHolder for Card {
    fn for_each_value_mut(&mut self, visit: &mut dyn FnMut(PropertyDefId, &mut PropertyValue)) {
        for (property, value) in self.values.iter_mut() {
            visit(*property, value);
        }
    }

    fn forget_property(&mut self, property: PropertyDefId) -> bool {
        self.values.remove(&property).is_some()
    }
}
