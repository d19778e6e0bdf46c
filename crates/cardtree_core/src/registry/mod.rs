//! Property definition registry.
//!
//! # Responsibility
//! - Create card types, property definitions and tree configurations.
//! - Manage card type applicability (associate / dissociate).
//! - Delete definitions, cascading to every stored binding.
//!
//! # Invariants
//! - Property, card type and tree names are unique (case-insensitive).
//! - Formulas and aggregates are validated against the project before they
//!   are stored.
//! - Deleting or dissociating a property read by a formula or aggregate is
//!   refused and names the blocking definition.

use crate::aggregate::{AggregateDef, AggregateScope, AggregateType, ConditionError};
use crate::formula::{output_type, validate_formula, Formula, FormulaError};
use crate::model::card::CardId;
use crate::model::card_type::{CardType, CardTypeId};
use crate::model::project::ProjectState;
use crate::model::property::{EnumValueId, PropertyDefId, PropertyDefinition, PropertyKind};
use crate::model::tree::{TreeConfiguration, TreeId, TreeLevel};
use crate::model::value::ValueType;
use crate::numeric::normalize;
use crate::scheduler::{find_blocker, Blocker};
use log::info;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    BlankName,
    DuplicateName(String),
    UnknownCardType(String),
    UnknownProperty(String),
    UnknownTree(String),
    /// Definition is structurally invalid; message explains why.
    InvalidDefinition(String),
    /// Managed value text is rejected.
    InvalidValue(String),
    Formula(FormulaError),
    Condition(ConditionError),
    /// Another definition still reads the property.
    Blocked(Blocker),
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankName => write!(f, "name must not be blank"),
            Self::DuplicateName(name) => write!(f, "name `{name}` is already taken"),
            Self::UnknownCardType(name) => write!(f, "card type `{name}` does not exist"),
            Self::UnknownProperty(name) => write!(f, "property `{name}` does not exist"),
            Self::UnknownTree(name) => write!(f, "tree `{name}` does not exist"),
            Self::InvalidDefinition(message) => write!(f, "{message}"),
            Self::InvalidValue(value) => write!(f, "`{value}` is not a valid value"),
            Self::Formula(err) => write!(f, "{err}"),
            Self::Condition(err) => write!(f, "{err}"),
            Self::Blocked(blocker) => write!(f, "cannot proceed: {blocker}"),
        }
    }
}

impl Error for RegistryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Formula(err) => Some(err),
            Self::Condition(err) => Some(err),
            _ => None,
        }
    }
}

impl From<FormulaError> for RegistryError {
    fn from(value: FormulaError) -> Self {
        Self::Formula(value)
    }
}

impl From<ConditionError> for RegistryError {
    fn from(value: ConditionError) -> Self {
        Self::Condition(value)
    }
}

fn normalize_name(name: &str) -> RegistryResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(RegistryError::BlankName);
    }
    Ok(trimmed.to_string())
}

fn ensure_property_name_free(project: &ProjectState, name: &str) -> RegistryResult<()> {
    if project.property_by_name(name).is_some() {
        return Err(RegistryError::DuplicateName(name.to_string()));
    }
    Ok(())
}

fn require_card_type(project: &ProjectState, card_type: CardTypeId) -> RegistryResult<()> {
    project
        .card_type(card_type)
        .map(|_| ())
        .ok_or_else(|| RegistryError::UnknownCardType(card_type.to_string()))
}

fn require_property(
    project: &ProjectState,
    property: PropertyDefId,
) -> RegistryResult<&PropertyDefinition> {
    project
        .property(property)
        .ok_or_else(|| RegistryError::UnknownProperty(property.to_string()))
}

pub fn create_card_type(project: &mut ProjectState, name: &str) -> RegistryResult<CardTypeId> {
    let name = normalize_name(name)?;
    if project.card_type_by_name(&name).is_some() {
        return Err(RegistryError::DuplicateName(name));
    }
    let card_type = CardType::new(name);
    let id = card_type.id;
    project.card_types.push(card_type);
    Ok(id)
}

/// Creates a user-valued property and associates it with `card_types`.
///
/// Formula, aggregate and tree relationship definitions have dedicated
/// constructors and are rejected here.
pub fn create_property(
    project: &mut ProjectState,
    name: &str,
    kind: PropertyKind,
    card_types: &[CardTypeId],
) -> RegistryResult<PropertyDefId> {
    let name = normalize_name(name)?;
    ensure_property_name_free(project, &name)?;
    if matches!(
        kind,
        PropertyKind::Formula { .. }
            | PropertyKind::Aggregate { .. }
            | PropertyKind::TreeRelationship { .. }
    ) {
        return Err(RegistryError::InvalidDefinition(format!(
            "`{name}` must be created through its dedicated constructor"
        )));
    }
    for card_type in card_types {
        require_card_type(project, *card_type)?;
    }

    let definition = match kind {
        PropertyKind::Enumerated { numeric, values } => {
            let mut seeded = PropertyDefinition::new(
                name,
                PropertyKind::Enumerated {
                    numeric,
                    values: Vec::new(),
                },
            );
            for value in values {
                push_checked(&mut seeded, &value.value, project.precision)?;
            }
            seeded
        }
        other => PropertyDefinition::new(name, other),
    };
    Ok(insert(project, definition, card_types))
}

fn insert(
    project: &mut ProjectState,
    definition: PropertyDefinition,
    card_types: &[CardTypeId],
) -> PropertyDefId {
    let id = definition.id;
    info!(
        "event=property_create module=registry status=ok property_id={} kind={} card_types={}",
        id,
        definition.kind().as_str(),
        card_types.len()
    );
    project.properties.push(definition);
    for card_type in card_types {
        if let Some(card_type) = project.card_type_mut(*card_type) {
            card_type.add_property(id);
        }
    }
    id
}

fn push_checked(
    definition: &mut PropertyDefinition,
    text: &str,
    precision: u32,
) -> RegistryResult<EnumValueId> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(RegistryError::InvalidValue(text.to_string()));
    }
    let stored = if definition.is_managed_numeric() {
        normalize(trimmed, precision).ok_or_else(|| RegistryError::InvalidValue(text.to_string()))?
    } else {
        trimmed.to_string()
    };
    if definition.find_enum_value(&stored, precision).is_some() {
        return Err(RegistryError::DuplicateName(stored));
    }
    definition
        .push_enum_value(stored)
        .ok_or_else(|| RegistryError::InvalidDefinition(format!(
            "`{}` is not an enumerated property",
            definition.name
        )))
}

/// Appends one managed value. Numeric text is normalized to the project
/// precision; equivalent duplicates are rejected.
pub fn add_enum_value(
    project: &mut ProjectState,
    property: PropertyDefId,
    text: &str,
) -> RegistryResult<EnumValueId> {
    let precision = project.precision;
    let definition = project
        .property_mut(property)
        .ok_or_else(|| RegistryError::UnknownProperty(property.to_string()))?;
    push_checked(definition, text, precision)
}

/// Creates a formula property for `card_types`.
///
/// # Errors
/// - Blank or duplicate name, unknown card type.
/// - Any definition-time formula error (undefined or non-applicable
///   reference, unsupported operand, type mismatch, cycle).
pub fn create_formula(
    project: &mut ProjectState,
    name: &str,
    source: &str,
    card_types: &[CardTypeId],
) -> RegistryResult<PropertyDefId> {
    let name = normalize_name(name)?;
    ensure_property_name_free(project, &name)?;
    for card_type in card_types {
        require_card_type(project, *card_type)?;
    }
    let formula = Formula::parse(source)?;
    validate_formula(project, &name, &formula, card_types)?;
    let definition = PropertyDefinition::new(name, PropertyKind::Formula { formula });
    Ok(insert(project, definition, card_types))
}

/// Creates an aggregate property on the scoping card type of `def`.
///
/// # Errors
/// - The tree does not exist, the scoping card type is not a non-leaf level
///   of it, or a scoped card type is not strictly deeper.
/// - SUM/AVG/MIN/MAX without a target, or a target that is not numeric.
/// - A condition referencing undefined properties.
pub fn create_aggregate(
    project: &mut ProjectState,
    name: &str,
    def: AggregateDef,
) -> RegistryResult<PropertyDefId> {
    let name = normalize_name(name)?;
    ensure_property_name_free(project, &name)?;
    let tree = project
        .tree(def.tree)
        .ok_or_else(|| RegistryError::UnknownTree(def.tree.to_string()))?;
    let scoping_level = tree
        .level_of(def.scoping_card_type)
        .filter(|level| *level < tree.depth())
        .ok_or_else(|| {
            RegistryError::InvalidDefinition(format!(
                "card type `{}` has no descendants in tree `{}`",
                project.card_type_name(def.scoping_card_type),
                tree.name
            ))
        })?;
    if let AggregateScope::CardType { card_type } = &def.scope {
        if !tree
            .level_of(*card_type)
            .is_some_and(|level| level > scoping_level)
        {
            return Err(RegistryError::InvalidDefinition(format!(
                "card type `{}` is not below `{}` in tree `{}`",
                project.card_type_name(*card_type),
                project.card_type_name(def.scoping_card_type),
                tree.name
            )));
        }
    }

    match def.target {
        None if def.aggregate_type != AggregateType::Count => {
            return Err(RegistryError::InvalidDefinition(format!(
                "{} aggregate `{name}` needs a target property",
                def.aggregate_type.as_str()
            )));
        }
        None => {}
        Some(target) => {
            let target_def = require_property(project, target)?;
            let numeric = match &target_def.kind {
                PropertyKind::NumericFreeText
                | PropertyKind::Enumerated { numeric: true, .. }
                | PropertyKind::Aggregate { .. } => true,
                PropertyKind::Formula { .. } => {
                    output_type(project, &target_def.name)? == ValueType::Number
                }
                _ => false,
            };
            if !numeric {
                return Err(RegistryError::InvalidDefinition(format!(
                    "aggregate target `{}` is not numeric",
                    target_def.name
                )));
            }
        }
    }

    if let Some(condition) = &def.condition {
        for referenced in condition.referenced_properties() {
            if project.property_by_name(&referenced).is_none() {
                return Err(ConditionError::UnknownProperty(referenced).into());
            }
        }
    }

    let scoping_card_type = def.scoping_card_type;
    let definition = PropertyDefinition::new(name, PropertyKind::Aggregate { aggregate: def });
    Ok(insert(project, definition, &[scoping_card_type]))
}

/// Configures a tree over `card_types` (root level first).
///
/// One tree relationship property named `"<tree> - <card type>"` is
/// created for every level except the deepest and associated with all
/// deeper card types.
pub fn configure_tree(
    project: &mut ProjectState,
    name: &str,
    card_types: &[CardTypeId],
) -> RegistryResult<TreeId> {
    let name = normalize_name(name)?;
    if project.tree_by_name(&name).is_some() {
        return Err(RegistryError::DuplicateName(name));
    }
    if card_types.len() < 2 {
        return Err(RegistryError::InvalidDefinition(format!(
            "tree `{name}` needs at least two card types"
        )));
    }
    let distinct: BTreeSet<CardTypeId> = card_types.iter().copied().collect();
    if distinct.len() != card_types.len() {
        return Err(RegistryError::InvalidDefinition(format!(
            "tree `{name}` lists a card type more than once"
        )));
    }
    for card_type in card_types {
        require_card_type(project, *card_type)?;
    }
    let relationship_names: Vec<String> = card_types[..card_types.len() - 1]
        .iter()
        .map(|card_type| format!("{name} - {}", project.card_type_name(*card_type)))
        .collect();
    for relationship_name in &relationship_names {
        ensure_property_name_free(project, relationship_name)?;
    }

    let mut tree = TreeConfiguration::new(name);
    for (index, card_type) in card_types.iter().enumerate() {
        let relationship = relationship_names.get(index).map(|relationship_name| {
            let definition = PropertyDefinition::new(
                relationship_name.clone(),
                PropertyKind::TreeRelationship { tree: tree.id },
            );
            insert(project, definition, &card_types[index + 1..])
        });
        tree.levels.push(TreeLevel {
            card_type: *card_type,
            relationship,
        });
    }
    let id = tree.id;
    info!(
        "event=tree_configure module=registry status=ok tree_id={} levels={}",
        id,
        tree.depth()
    );
    project.trees.push(tree);
    Ok(id)
}

/// Makes `property` applicable to `card_type`.
pub fn associate(
    project: &mut ProjectState,
    property: PropertyDefId,
    card_type: CardTypeId,
) -> RegistryResult<bool> {
    let definition = require_property(project, property)?;
    if let Some(formula) = definition.formula() {
        validate_formula(project, &definition.name, formula, &[card_type])?;
    }
    let card_type_name = project.card_type_name(card_type);
    project
        .card_type_mut(card_type)
        .map(|card_type| card_type.add_property(property))
        .ok_or(RegistryError::UnknownCardType(card_type_name))
}

/// Removes `property` from `card_type` and clears its values on cards of
/// that type. Returns the cards that lost a value.
///
/// # Errors
/// - [`RegistryError::Blocked`] when a formula applicable to `card_type`
///   or an aggregate covering it still reads the property.
pub fn dissociate(
    project: &mut ProjectState,
    property: PropertyDefId,
    card_type: CardTypeId,
) -> RegistryResult<Vec<CardId>> {
    require_property(project, property)?;
    require_card_type(project, card_type)?;
    if let Some(blocker) = find_blocker(project, property, Some(card_type)) {
        return Err(RegistryError::Blocked(blocker));
    }

    if let Some(stored) = project.card_type_mut(card_type) {
        stored.remove_property(property);
    }
    let holders: Vec<CardId> = project
        .cards
        .values()
        .filter(|card| card.card_type == card_type && card.value(property).is_some())
        .map(|card| card.id)
        .collect();
    for card in &holders {
        project.set_value(*card, property, None);
    }
    Ok(holders)
}

/// Deletes a property definition and every binding to it.
///
/// # Errors
/// - [`RegistryError::Blocked`] while a formula or aggregate reads it.
/// - Tree relationships are owned by their tree and cannot be deleted.
pub fn delete_property(project: &mut ProjectState, property: PropertyDefId) -> RegistryResult<()> {
    let definition = require_property(project, property)?;
    if definition.tree().is_some() {
        return Err(RegistryError::InvalidDefinition(format!(
            "`{}` belongs to a tree configuration",
            definition.name
        )));
    }
    if let Some(blocker) = find_blocker(project, property, None) {
        return Err(RegistryError::Blocked(blocker));
    }

    let holders: Vec<CardId> = project
        .cards
        .values()
        .filter(|card| card.value(property).is_some())
        .map(|card| card.id)
        .collect();
    let mut dependents = 0usize;
    project.for_each_holder_mut(|holder| {
        if holder.forget_property(property) {
            dependents += 1;
        }
    });
    for card in holders {
        project.mark_unsaved(card);
    }
    for card_type in &mut project.card_types {
        card_type.remove_property(property);
    }
    project.properties.retain(|definition| definition.id != property);
    info!(
        "event=property_delete module=registry status=ok property_id={} bindings_removed={}",
        property, dependents
    );
    Ok(())
}

/// Renames a property. Formulas keep referring to the old name and degrade
/// to nil until they are redefined.
pub fn rename_property(
    project: &mut ProjectState,
    property: PropertyDefId,
    new_name: &str,
) -> RegistryResult<()> {
    let new_name = normalize_name(new_name)?;
    if project
        .property_by_name(&new_name)
        .is_some_and(|existing| existing.id != property)
    {
        return Err(RegistryError::DuplicateName(new_name));
    }
    let definition = project
        .property_mut(property)
        .ok_or_else(|| RegistryError::UnknownProperty(property.to_string()))?;
    definition.name = new_name;
    Ok(())
}
