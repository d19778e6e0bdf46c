//! Property definition domain model.
//!
//! # Responsibility
//! - Represent every property flavor as one tagged variant.
//! - Own the positioned enumeration values of managed properties.
//!
//! # Invariants
//! - Enumeration positions are contiguous and start at 1.
//! - Enumeration value ids are stable across renumbering and precision merges.

use crate::aggregate::AggregateDef;
use crate::formula::Formula;
use crate::model::card::CardId;
use crate::model::project::ProjectState;
use crate::model::tree::TreeId;
use crate::model::value::{CardValue, PropertyValue};
use crate::numeric::{equivalent, Number};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable property definition identifier.
pub type PropertyDefId = Uuid;

/// Stable enumeration value identifier.
pub type EnumValueId = Uuid;

/// One legal value of a managed property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumerationValue {
    pub id: EnumValueId,
    pub value: String,
    /// 1-based display/sort position.
    pub position: u32,
}

/// Discriminator for [`PropertyKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKindTag {
    Enumerated,
    Date,
    NumericFreeText,
    FreeText,
    Formula,
    Aggregate,
    CardRelationship,
    TreeRelationship,
}

impl PropertyKindTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enumerated => "enumerated",
            Self::Date => "date",
            Self::NumericFreeText => "numeric_free_text",
            Self::FreeText => "free_text",
            Self::Formula => "formula",
            Self::Aggregate => "aggregate",
            Self::CardRelationship => "card_relationship",
            Self::TreeRelationship => "tree_relationship",
        }
    }
}

/// Property behavior variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PropertyKind {
    /// Managed property with a finite, positioned value list.
    Enumerated {
        numeric: bool,
        #[serde(default)]
        values: Vec<EnumerationValue>,
    },
    Date,
    /// Unmanaged numeric text.
    NumericFreeText,
    /// Unmanaged arbitrary text.
    FreeText,
    Formula { formula: Formula },
    Aggregate { aggregate: AggregateDef },
    CardRelationship,
    /// Parent link at one level of a tree; values are cards of that level.
    TreeRelationship { tree: TreeId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub id: PropertyDefId,
    pub name: String,
    pub kind: PropertyKind,
}

impl PropertyDefinition {
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
        }
    }

    pub fn kind(&self) -> PropertyKindTag {
        match &self.kind {
            PropertyKind::Enumerated { .. } => PropertyKindTag::Enumerated,
            PropertyKind::Date => PropertyKindTag::Date,
            PropertyKind::NumericFreeText => PropertyKindTag::NumericFreeText,
            PropertyKind::FreeText => PropertyKindTag::FreeText,
            PropertyKind::Formula { .. } => PropertyKindTag::Formula,
            PropertyKind::Aggregate { .. } => PropertyKindTag::Aggregate,
            PropertyKind::CardRelationship => PropertyKindTag::CardRelationship,
            PropertyKind::TreeRelationship { .. } => PropertyKindTag::TreeRelationship,
        }
    }

    /// Reads this property on `card`. Formulas are evaluated on the spot;
    /// every other kind reads the stored value. `None` is nil.
    pub fn value_for(&self, project: &ProjectState, card: CardId) -> Option<CardValue> {
        self.value_at_depth(project, card, 0)
    }

    /// `depth` counts formula references followed so far.
    pub(crate) fn value_at_depth(
        &self,
        project: &ProjectState,
        card: CardId,
        depth: usize,
    ) -> Option<CardValue> {
        if let PropertyKind::Formula { formula } = &self.kind {
            return crate::formula::eval::evaluate_nested(project, self, formula, card, depth)
                .map(CardValue::from);
        }
        match (&self.kind, project.value(card, self.id)?) {
            (PropertyKind::Enumerated { numeric, .. }, PropertyValue::Enum(id)) => {
                let value = self.enum_value(*id)?;
                if *numeric {
                    Number::parse(&value.value).map(CardValue::Number)
                } else {
                    Some(CardValue::Position(value.position))
                }
            }
            (
                PropertyKind::NumericFreeText | PropertyKind::Aggregate { .. },
                PropertyValue::Text(text),
            ) => Number::parse(text).map(CardValue::Number),
            (PropertyKind::Date, PropertyValue::Date(date)) => Some(CardValue::Date(*date)),
            (PropertyKind::FreeText, PropertyValue::Text(text)) => {
                Some(CardValue::Text(text.clone()))
            }
            (
                PropertyKind::CardRelationship | PropertyKind::TreeRelationship { .. },
                PropertyValue::Card(id),
            ) => Some(CardValue::Card(*id)),
            _ => None,
        }
    }

    /// Case-insensitive name match used by every by-name lookup.
    pub fn is_named(&self, name: &str) -> bool {
        self.name.trim().eq_ignore_ascii_case(name.trim())
    }

    /// Formula and aggregate values are derived, never user-entered.
    pub fn is_calculated(&self) -> bool {
        matches!(
            self.kind,
            PropertyKind::Formula { .. } | PropertyKind::Aggregate { .. }
        )
    }

    pub fn is_managed_numeric(&self) -> bool {
        matches!(self.kind, PropertyKind::Enumerated { numeric: true, .. })
    }

    pub fn formula(&self) -> Option<&Formula> {
        match &self.kind {
            PropertyKind::Formula { formula } => Some(formula),
            _ => None,
        }
    }

    pub fn aggregate(&self) -> Option<&AggregateDef> {
        match &self.kind {
            PropertyKind::Aggregate { aggregate } => Some(aggregate),
            _ => None,
        }
    }

    pub fn tree(&self) -> Option<TreeId> {
        match &self.kind {
            PropertyKind::TreeRelationship { tree } => Some(*tree),
            _ => None,
        }
    }

    pub fn enum_values(&self) -> &[EnumerationValue] {
        match &self.kind {
            PropertyKind::Enumerated { values, .. } => values.as_slice(),
            _ => &[],
        }
    }

    pub fn enum_value(&self, id: EnumValueId) -> Option<&EnumerationValue> {
        self.enum_values().iter().find(|value| value.id == id)
    }

    /// Finds a managed value by text. Numeric properties match equivalent
    /// representations at `precision` (`1.0` finds `1.00`).
    pub fn find_enum_value(&self, text: &str, precision: u32) -> Option<&EnumerationValue> {
        let wanted = text.trim();
        let numeric = self.is_managed_numeric();
        self.enum_values().iter().find(|candidate| {
            if numeric {
                candidate.value == wanted || equivalent(&candidate.value, wanted, precision)
            } else {
                candidate.value.eq_ignore_ascii_case(wanted)
            }
        })
    }

    /// Appends a managed value at the next position and returns its id.
    ///
    /// Returns `None` for non-enumerated properties.
    pub fn push_enum_value(&mut self, text: impl Into<String>) -> Option<EnumValueId> {
        match &mut self.kind {
            PropertyKind::Enumerated { values, .. } => {
                let id = Uuid::new_v4();
                let position = u32::try_from(values.len()).ok()?.checked_add(1)?;
                values.push(EnumerationValue {
                    id,
                    value: text.into(),
                    position,
                });
                Some(id)
            }
            _ => None,
        }
    }

    /// Removes one managed value and closes the position gap.
    pub fn remove_enum_value(&mut self, id: EnumValueId) -> bool {
        match &mut self.kind {
            PropertyKind::Enumerated { values, .. } => {
                let before = values.len();
                values.retain(|value| value.id != id);
                renumber_positions(values);
                before != values.len()
            }
            _ => false,
        }
    }
}

/// Sorts by current position and rewrites positions to `1..=n`.
pub fn renumber_positions(values: &mut [EnumerationValue]) {
    values.sort_by_key(|value| value.position);
    for (index, value) in values.iter_mut().enumerate() {
        value.position = u32::try_from(index + 1).unwrap_or(u32::MAX);
    }
}

#[cfg(test)]
mod tests {
    use super::{PropertyDefinition, PropertyKind, PropertyKindTag};

    fn numeric_enum() -> PropertyDefinition {
        let mut def = PropertyDefinition::new(
            "Size",
            PropertyKind::Enumerated {
                numeric: true,
                values: Vec::new(),
            },
        );
        for value in ["1", "2.50", "8"] {
            def.push_enum_value(value).unwrap();
        }
        def
    }

    #[test]
    fn finds_equivalent_numeric_values() {
        let def = numeric_enum();
        assert_eq!(def.find_enum_value("2.5", 2).unwrap().value, "2.50");
        assert_eq!(def.find_enum_value("1.00", 2).unwrap().value, "1");
        assert!(def.find_enum_value("3", 2).is_none());
        assert_eq!(def.kind(), PropertyKindTag::Enumerated);
    }

    #[test]
    fn removal_keeps_positions_contiguous() {
        let mut def = numeric_enum();
        let middle = def.enum_values()[1].id;
        assert!(def.remove_enum_value(middle));
        let positions: Vec<u32> = def.enum_values().iter().map(|v| v.position).collect();
        assert_eq!(positions, vec![1, 2]);
        assert_eq!(def.enum_values()[1].value, "8");
    }
}
