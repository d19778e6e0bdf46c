//! Project use-case service.
//!
//! # Responsibility
//! - Expose the engine entry points: bulk property updates, reparenting,
//!   aggregate recompute, precision migration and formula evaluation.
//! - Translate user-entered value text into stored values per property kind.
//! - Follow every mutation with a dependency-ordered recompute.
//!
//! # Invariants
//! - Per-card validation failures are reported in [`PerCardResult`] and
//!   never abort the batch.
//! - An unknown card reference or out-of-range precision aborts the call
//!   before anything is written.

use crate::aggregate::{self, condition::resolve_card_literal, AggregateContext};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::formula::evaluate;
use crate::model::card::CardId;
use crate::model::card_type::CardTypeId;
use crate::model::project::ProjectState;
use crate::model::property::{EnumValueId, PropertyDefId, PropertyKind};
use crate::model::tree::TreeId;
use crate::model::value::{parse_date, PropertyValue, Value};
use crate::numeric::normalize;
use crate::precision::{self, MigrationReport};
use crate::registry;
use crate::repo::project_repo::ProjectRepository;
use crate::scheduler::{self, RecomputeReport, Trigger};
use crate::tree::{self, RelationshipTarget, TreeChange};
use log::{error, info};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use uuid::Uuid;

/// Value text that clears a property.
const NOT_SET_SPELLINGS: [&str; 2] = ["(not set)", "not set"];

/// One `property = value` pair of a bulk update. Blank or `(not set)`
/// clears the property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyUpdate {
    pub property: String,
    pub value: String,
}

impl PropertyUpdate {
    pub fn new(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkUpdateOptions {
    /// Unknown managed values are added to the property instead of
    /// rejected.
    pub add_missing_values: bool,
    /// Recompute calculated values after writing.
    pub recompute: bool,
}

impl Default for BulkUpdateOptions {
    fn default() -> Self {
        Self {
            add_missing_values: false,
            recompute: true,
        }
    }
}

/// Outcome for one selected card. Empty `errors` means every update applied.
#[derive(Debug)]
pub struct PerCardResult {
    pub card: CardId,
    pub errors: Vec<EngineError>,
}

impl PerCardResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// One update after its value text has been resolved.
enum PlannedUpdate {
    Reparent(PropertyDefId, RelationshipTarget),
    Value(PropertyDefId, Option<PropertyValue>),
    /// Managed value not listed yet; added once every update has resolved.
    AddValue(PropertyDefId, String),
    /// Value text is invalid for the property; reported on every card.
    Rejected(String),
}

/// Owns one project handle and the configuration it is evaluated with.
pub struct ProjectService {
    project: ProjectState,
    config: EngineConfig,
}

impl ProjectService {
    pub fn new(project: ProjectState, config: EngineConfig) -> Self {
        Self { project, config }
    }

    /// Creates an empty project at the configured default precision.
    pub fn create(identifier: impl Into<String>, config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let project = ProjectState::new(identifier, config.default_precision);
        Ok(Self::new(project, config))
    }

    /// Loads a saved project by identifier.
    pub fn load<R: ProjectRepository>(
        repo: &R,
        identifier: &str,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        let project = repo
            .find_project(identifier)?
            .map(|id| repo.load_project(id))
            .transpose()?
            .flatten()
            .ok_or_else(|| EngineError::NotFound(format!("project `{identifier}`")))?;
        Ok(Self::new(project, config))
    }

    /// Commits the handle. Returns the cards that received a new version.
    pub fn save<R: ProjectRepository>(&mut self, repo: &R) -> EngineResult<Vec<CardId>> {
        Ok(repo.save_project(&mut self.project)?)
    }

    pub fn project(&self) -> &ProjectState {
        &self.project
    }

    /// Direct access for definition management through [`crate::registry`].
    pub fn project_mut(&mut self) -> &mut ProjectState {
        &mut self.project
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn into_project(self) -> ProjectState {
        self.project
    }

    fn context(&self) -> AggregateContext {
        self.config.live_context()
    }

    fn recompute(&mut self, triggers: &[Trigger]) -> EngineResult<RecomputeReport> {
        let ctx = self.context();
        Ok(scheduler::recompute(&mut self.project, triggers, &ctx)?)
    }

    fn property_id(&self, name: &str) -> EngineResult<PropertyDefId> {
        self.project
            .property_by_name(name)
            .map(|property| property.id)
            .ok_or_else(|| EngineError::NotFound(format!("property `{}`", name.trim())))
    }

    fn card_type_id(&self, name: &str) -> EngineResult<CardTypeId> {
        self.project
            .card_type_by_name(name)
            .map(|card_type| card_type.id)
            .ok_or_else(|| EngineError::NotFound(format!("card type `{}`", name.trim())))
    }

    fn tree_id(&self, name: &str) -> EngineResult<TreeId> {
        self.project
            .tree_by_name(name)
            .map(|tree| tree.id)
            .ok_or_else(|| EngineError::NotFound(format!("tree `{}`", name.trim())))
    }

    /// Creates a card and computes its calculated values.
    pub fn create_card(&mut self, name: &str, card_type: &str) -> EngineResult<CardId> {
        let card_type = self.card_type_id(card_type)?;
        let card = self
            .project
            .create_card(name, card_type)
            .ok_or_else(|| EngineError::NotFound(format!("card type {card_type}")))?;
        self.recompute(&[Trigger::Cards(BTreeSet::from([card]))])?;
        Ok(card)
    }

    /// Applies `updates` to every card in `selection`.
    ///
    /// Tree relationships are routed through reparenting; every other kind
    /// is parsed from text once and written to each applicable card.
    ///
    /// Every value is resolved before anything is written. Invalid value
    /// text and non-applicable properties are reported per card.
    ///
    /// # Errors
    /// - An update names an unknown property.
    /// - A relationship value names a card that does not exist.
    pub fn apply_bulk_update(
        &mut self,
        selection: &[CardId],
        updates: &[PropertyUpdate],
        options: BulkUpdateOptions,
    ) -> EngineResult<Vec<PerCardResult>> {
        let started_at = Instant::now();
        info!(
            "event=bulk_update module=service status=start cards={} updates={}",
            selection.len(),
            updates.len()
        );
        let mut errors: BTreeMap<CardId, Vec<EngineError>> =
            selection.iter().map(|card| (*card, Vec::new())).collect();
        let mut triggers = Vec::new();

        let mut planned = Vec::with_capacity(updates.len());
        for update in updates {
            let property = self.property_id(&update.property)?;
            let is_tree_relationship = self
                .project
                .property(property)
                .is_some_and(|definition| definition.tree().is_some());
            let step = if is_tree_relationship {
                PlannedUpdate::Reparent(property, self.relationship_target(&update.value)?)
            } else {
                match self.parse_value(property, &update.value, options) {
                    Ok(step) => step,
                    Err(EngineError::Validation(message)) => PlannedUpdate::Rejected(message),
                    Err(other) => return Err(other),
                }
            };
            planned.push(step);
        }

        for step in planned {
            match step {
                PlannedUpdate::Reparent(property, target) => {
                    let (failures, structure) =
                        self.reparent_cards(selection, property, target)?;
                    for (card, err) in failures {
                        errors.entry(card).or_default().push(err);
                    }
                    triggers.extend(structure);
                }
                PlannedUpdate::Value(property, value) => {
                    self.write_to_selection(selection, property, value, &mut errors, &mut triggers);
                }
                PlannedUpdate::AddValue(property, text) => {
                    let value = self.ensure_enum_value(property, &text)?;
                    self.write_to_selection(
                        selection,
                        property,
                        Some(PropertyValue::Enum(value)),
                        &mut errors,
                        &mut triggers,
                    );
                }
                PlannedUpdate::Rejected(message) => {
                    for card in selection {
                        errors
                            .entry(*card)
                            .or_default()
                            .push(EngineError::Validation(message.clone()));
                    }
                }
            }
        }

        if options.recompute && !triggers.is_empty() {
            self.recompute(&triggers)?;
        }
        let results: Vec<PerCardResult> = selection
            .iter()
            .map(|card| PerCardResult {
                card: *card,
                errors: errors.remove(card).unwrap_or_default(),
            })
            .collect();
        info!(
            "event=bulk_update module=service status=ok cards={} failed_cards={} duration_ms={}",
            results.len(),
            results.iter().filter(|result| !result.is_ok()).count(),
            started_at.elapsed().as_millis()
        );
        Ok(results)
    }

    /// Sets the tree relationship `relationship` on every card in
    /// `selection`. Blank, `(not set)` or `not set` detaches from that level.
    ///
    /// # Errors
    /// - `relationship` is unknown or not a tree relationship.
    /// - `value` names a card that does not exist.
    pub fn reparent(
        &mut self,
        selection: &[CardId],
        relationship: &str,
        value: &str,
    ) -> EngineResult<Vec<PerCardResult>> {
        let property = self.property_id(relationship)?;
        let target = self.relationship_target(value)?;
        let (failures, triggers) = self.reparent_cards(selection, property, target)?;
        self.recompute(&triggers)?;

        let mut errors: BTreeMap<CardId, Vec<EngineError>> = BTreeMap::new();
        for (card, err) in failures {
            errors.entry(card).or_default().push(err);
        }
        Ok(selection
            .iter()
            .map(|card| PerCardResult {
                card: *card,
                errors: errors.remove(card).unwrap_or_default(),
            })
            .collect())
    }

    fn reparent_cards(
        &mut self,
        selection: &[CardId],
        property: PropertyDefId,
        target: RelationshipTarget,
    ) -> EngineResult<(Vec<(CardId, EngineError)>, Vec<Trigger>)> {
        let outcome = tree::reparent(&mut self.project, selection, property, target)?;
        let failures = outcome
            .failures()
            .map(|(card, err)| (card, EngineError::from(err.clone())))
            .collect();
        Ok((failures, self.structure_triggers(outcome.change)))
    }

    /// Structural change plus the relationship values it rewrote, so
    /// conditions reading a relationship also refresh.
    fn structure_triggers(&self, change: TreeChange) -> Vec<Trigger> {
        if change.is_empty() {
            return Vec::new();
        }
        let relationships: BTreeSet<PropertyDefId> = change
            .tree
            .and_then(|tree| self.project.tree(tree))
            .map(|config| config.relationships().map(|(_, id)| id).collect())
            .unwrap_or_default();
        vec![
            Trigger::PropertyValues {
                cards: change.affected.clone(),
                properties: relationships,
            },
            Trigger::Structure(change),
        ]
    }

    fn relationship_target(&self, value: &str) -> EngineResult<RelationshipTarget> {
        if is_not_set(value) {
            return Ok(RelationshipTarget::NotSet);
        }
        self.resolve_card(value)
            .map(RelationshipTarget::Card)
            .ok_or_else(|| EngineError::InvalidValue(format!("card `{}` does not exist", value.trim())))
    }

    fn resolve_card(&self, text: &str) -> Option<CardId> {
        resolve_card_literal(&self.project, text).or_else(|| {
            Uuid::parse_str(text.trim())
                .ok()
                .filter(|id| self.project.card(*id).is_some())
        })
    }

    fn write_to_selection(
        &mut self,
        selection: &[CardId],
        property: PropertyDefId,
        value: Option<PropertyValue>,
        errors: &mut BTreeMap<CardId, Vec<EngineError>>,
        triggers: &mut Vec<Trigger>,
    ) {
        let mut changed = BTreeSet::new();
        for &card in selection {
            match self.write_value(card, property, value.clone()) {
                Ok(true) => {
                    changed.insert(card);
                }
                Ok(false) => {}
                Err(err) => errors.entry(card).or_default().push(err),
            }
        }
        if !changed.is_empty() {
            triggers.push(Trigger::PropertyValues {
                cards: changed,
                properties: BTreeSet::from([property]),
            });
        }
    }

    /// Id of the managed value matching `text`, appending it when an
    /// earlier update in the batch has not already done so.
    fn ensure_enum_value(&mut self, property: PropertyDefId, text: &str) -> EngineResult<EnumValueId> {
        let precision = self.project.precision;
        let existing = self
            .project
            .property(property)
            .and_then(|definition| definition.find_enum_value(text, precision))
            .map(|value| value.id);
        match existing {
            Some(id) => Ok(id),
            None => Ok(registry::add_enum_value(&mut self.project, property, text)?),
        }
    }

    /// Resolves `text` against `property` without touching the project.
    /// A cleared value plans `Value(property, None)`.
    fn parse_value(
        &self,
        property: PropertyDefId,
        text: &str,
        options: BulkUpdateOptions,
    ) -> EngineResult<PlannedUpdate> {
        if is_not_set(text) {
            return Ok(PlannedUpdate::Value(property, None));
        }
        let precision = self.project.precision;
        let definition = self
            .project
            .property(property)
            .ok_or_else(|| EngineError::NotFound(format!("property {property}")))?;
        let name = definition.name.clone();
        let trimmed = text.trim();
        let invalid = || EngineError::Validation(format!("`{trimmed}` is not a valid value for {name}"));

        let value = match &definition.kind {
            PropertyKind::Enumerated { .. } => {
                if let Some(existing) = definition.find_enum_value(trimmed, precision) {
                    return Ok(PlannedUpdate::Value(property, Some(PropertyValue::Enum(existing.id))));
                }
                if !options.add_missing_values {
                    return Err(invalid());
                }
                let stored = if definition.is_managed_numeric() {
                    normalize(trimmed, precision).ok_or_else(invalid)?
                } else {
                    trimmed.to_string()
                };
                return Ok(PlannedUpdate::AddValue(property, stored));
            }
            PropertyKind::Date => parse_date(trimmed)
                .map(|date| Some(PropertyValue::Date(date)))
                .ok_or_else(invalid),
            PropertyKind::NumericFreeText => normalize(trimmed, precision)
                .map(|text| Some(PropertyValue::Text(text)))
                .ok_or_else(invalid),
            PropertyKind::FreeText => Ok(Some(PropertyValue::Text(trimmed.to_string()))),
            PropertyKind::CardRelationship => self
                .resolve_card(trimmed)
                .map(|card| Some(PropertyValue::Card(card)))
                .ok_or_else(|| EngineError::InvalidValue(format!("card `{trimmed}` does not exist"))),
            PropertyKind::Formula { .. } | PropertyKind::Aggregate { .. } => Err(
                EngineError::Validation(format!("{name} is calculated and cannot be set")),
            ),
            PropertyKind::TreeRelationship { .. } => Err(EngineError::Validation(format!(
                "{name} must be set through reparenting"
            ))),
        }?;
        Ok(PlannedUpdate::Value(property, value))
    }

    fn write_value(
        &mut self,
        card: CardId,
        property: PropertyDefId,
        value: Option<PropertyValue>,
    ) -> EngineResult<bool> {
        let card_type = self
            .project
            .card(card)
            .ok_or_else(|| EngineError::NotFound(format!("card {card}")))?
            .card_type;
        if !self.project.is_applicable(property, card_type) {
            return Err(EngineError::Validation(format!(
                "{} is not applicable to card type {}",
                self.project.property_name(property),
                self.project.card_type_name(card_type)
            )));
        }
        Ok(self.project.set_value(card, property, value))
    }

    /// Recomputes one aggregate on every scoping card, then everything
    /// reading it. Returns the cards whose aggregate value changed.
    pub fn recompute_aggregate(&mut self, name: &str) -> EngineResult<Vec<CardId>> {
        let property = self.property_id(name)?;
        let ctx = self.context();
        let changed = aggregate::recompute_all(&mut self.project, property, &ctx)?;
        if !changed.is_empty() {
            self.recompute(&[Trigger::PropertyValues {
                cards: changed.iter().copied().collect(),
                properties: BTreeSet::from([property]),
            }])?;
        }
        info!(
            "event=aggregate_recompute module=service status=ok property_id={} changed_cards={}",
            property,
            changed.len()
        );
        Ok(changed)
    }

    /// Recomputes every calculated value of the project.
    pub fn recompute_all(&mut self) -> EngineResult<RecomputeReport> {
        self.recompute(&[Trigger::Everything])
    }

    /// Migrates the project from precision `old` to `new`.
    ///
    /// # Errors
    /// - [`EngineError::InvalidValue`] for a precision outside
    ///   `0..=max_precision`.
    pub fn migrate_precision(&mut self, old: i64, new: i64) -> EngineResult<MigrationReport> {
        let ctx = self.context();
        let options = self.config.migration_options();
        precision::migrate_precision(&mut self.project, old, new, options, &ctx).map_err(|err| {
            error!(
                "event=precision_migrate module=service status=error project_id={} error={}",
                self.project.id, err
            );
            EngineError::from(err)
        })
    }

    /// Evaluates a formula on one card without storing the result.
    ///
    /// Returns `None` when the formula does not apply to the card or any
    /// operand is nil.
    pub fn evaluate_formula(&self, name: &str, card: CardId) -> EngineResult<Option<Value>> {
        let property = self.property_id(name)?;
        let definition = self
            .project
            .property(property)
            .ok_or_else(|| EngineError::NotFound(format!("property `{name}`")))?;
        let formula = definition
            .formula()
            .ok_or_else(|| EngineError::Validation(format!("{} is not a formula", definition.name)))?;
        let stored = self
            .project
            .card(card)
            .ok_or_else(|| EngineError::NotFound(format!("card {card}")))?;
        if !self.project.is_applicable(property, stored.card_type) {
            return Ok(None);
        }
        Ok(evaluate(&self.project, formula, card))
    }

    /// Changes the type of one card, rehanging it in each of its trees.
    pub fn change_card_type(&mut self, card: CardId, card_type: &str) -> EngineResult<()> {
        let card_type = self.card_type_id(card_type)?;
        let changes = tree::change_card_type(&mut self.project, card, card_type)?;
        let mut triggers = vec![Trigger::Cards(BTreeSet::from([card]))];
        for change in changes {
            triggers.extend(self.structure_triggers(change));
        }
        self.recompute(&triggers)?;
        Ok(())
    }

    /// Adds `card` to a tree, optionally under `parent`.
    pub fn attach(
        &mut self,
        tree_name: &str,
        card: CardId,
        parent: Option<CardId>,
    ) -> EngineResult<()> {
        let tree = self.tree_id(tree_name)?;
        let change = tree::attach(&mut self.project, tree, card, parent)?;
        let triggers = self.structure_triggers(change);
        self.recompute(&triggers)?;
        Ok(())
    }

    /// Removes `card` from a tree; its descendants stay in the tree.
    pub fn detach(&mut self, tree_name: &str, card: CardId) -> EngineResult<()> {
        let tree = self.tree_id(tree_name)?;
        let change = tree::detach(&mut self.project, tree, card)?;
        let triggers = self.structure_triggers(change);
        self.recompute(&triggers)?;
        Ok(())
    }

    /// # Errors
    /// - [`EngineError::BlockedOperation`] while a formula or aggregate
    ///   reads the property.
    pub fn delete_property(&mut self, name: &str) -> EngineResult<()> {
        let property = self.property_id(name)?;
        Ok(registry::delete_property(&mut self.project, property)?)
    }

    /// Removes a property from one card type. Returns the cards that lost a
    /// value.
    pub fn dissociate(&mut self, name: &str, card_type: &str) -> EngineResult<Vec<CardId>> {
        let property = self.property_id(name)?;
        let card_type = self.card_type_id(card_type)?;
        let cleared = registry::dissociate(&mut self.project, property, card_type)?;
        if !cleared.is_empty() {
            self.recompute(&[Trigger::PropertyValues {
                cards: cleared.iter().copied().collect(),
                properties: BTreeSet::from([property]),
            }])?;
        }
        Ok(cleared)
    }

    /// Versions every card changed since the last save, in memory only.
    pub fn save_changes(&mut self) -> Vec<CardId> {
        self.project.save_changes()
    }

    /// Display text of one property on one card.
    pub fn display_value(&self, card: CardId, property: &str) -> Option<String> {
        let property = self.project.property_by_name(property)?;
        self.project.display_value(card, property.id)
    }
}

fn is_not_set(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.is_empty()
        || NOT_SET_SPELLINGS
            .iter()
            .any(|spelling| trimmed.eq_ignore_ascii_case(spelling))
}
