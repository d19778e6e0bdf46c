//! Dependency-ordered recomputation of formulas and aggregates.
//!
//! # Responsibility
//! - Turn a change (property values, tree structure, or everything) into
//!   the minimal set of stale `(definition, cards)` pairs.
//! - Recompute them so every input is fresh before its dependents.
//! - Report which definition blocks deleting or dissociating a property
//!   (see [`graph::find_blocker`]).
//!
//! # Invariants
//! - Affected sets use the card type associations current at planning time.
//! - Formulas reached through an aggregate are found by scanning only the
//!   formulas applicable to card types present in the batch.
//! - An aggregate feeding a formula is recomputed before that formula.

use crate::aggregate::{self, AggregateContext, AggregateError};
use crate::formula::evaluate;
use crate::model::card::CardId;
use crate::model::card_type::CardTypeId;
use crate::model::project::ProjectState;
use crate::model::property::{PropertyDefId, PropertyKind};
use crate::tree::{self, TreeChange};
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

pub mod graph;

pub use graph::{find_blocker, Blocker, DependencyGraph, DependencyKind};

pub type SchedulerResult<T> = Result<T, AggregateError>;

/// Something that changed and may make calculated values stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// `properties` changed on `cards`.
    PropertyValues {
        cards: BTreeSet<CardId>,
        properties: BTreeSet<PropertyDefId>,
    },
    /// Tree membership or parents changed.
    Structure(TreeChange),
    /// Cards created or retyped: every calculated property applicable to
    /// them is stale.
    Cards(BTreeSet<CardId>),
    /// Every calculated value on every card.
    Everything,
}

/// One definition to recompute on a set of cards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecomputeStep {
    pub property: PropertyDefId,
    pub cards: BTreeSet<CardId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecomputePlan {
    pub steps: Vec<RecomputeStep>,
}

impl RecomputePlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Definitions in execution order.
    pub fn properties(&self) -> Vec<PropertyDefId> {
        self.steps.iter().map(|step| step.property).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecomputeReport {
    pub definitions: usize,
    pub evaluations: usize,
    pub changed_cards: BTreeSet<CardId>,
}

/// Computes the stale definitions for `triggers` without mutating anything.
pub fn plan(project: &ProjectState, triggers: &[Trigger]) -> RecomputePlan {
    let mut stale: BTreeMap<PropertyDefId, BTreeSet<CardId>> = BTreeMap::new();
    let mut worklist: Vec<(PropertyDefId, BTreeSet<CardId>)> = Vec::new();

    for trigger in triggers {
        match trigger {
            Trigger::PropertyValues { cards, properties } => {
                for property in properties {
                    worklist.push((*property, cards.clone()));
                }
            }
            Trigger::Structure(change) => {
                for (aggregate, cards) in structural_targets(project, change) {
                    let fresh = mark_stale(&mut stale, aggregate, cards);
                    if !fresh.is_empty() {
                        worklist.push((aggregate, fresh));
                    }
                }
            }
            Trigger::Cards(cards) => {
                for property in project.calculated_properties() {
                    let applicable: BTreeSet<CardId> = cards
                        .iter()
                        .copied()
                        .filter(|card| {
                            project.card(*card).is_some_and(|stored| {
                                project.is_applicable(property.id, stored.card_type)
                            })
                        })
                        .collect();
                    let fresh = mark_stale(&mut stale, property.id, applicable);
                    if !fresh.is_empty() {
                        worklist.push((property.id, fresh));
                    }
                }
            }
            Trigger::Everything => {
                for property in project.calculated_properties() {
                    let cards: BTreeSet<CardId> = project
                        .cards
                        .values()
                        .filter(|card| project.is_applicable(property.id, card.card_type))
                        .map(|card| card.id)
                        .collect();
                    stale.entry(property.id).or_default().extend(cards);
                }
            }
        }
    }

    while let Some((changed, cards)) = worklist.pop() {
        for (dependent, affected) in propagate(project, changed, &cards) {
            let fresh = mark_stale(&mut stale, dependent, affected);
            if !fresh.is_empty() {
                worklist.push((dependent, fresh));
            }
        }
    }

    stale.retain(|_, cards| !cards.is_empty());
    let keys: BTreeSet<PropertyDefId> = stale.keys().copied().collect();
    let order = DependencyGraph::build(project).order(&keys);
    RecomputePlan {
        steps: order
            .into_iter()
            .filter_map(|property| {
                stale
                    .remove(&property)
                    .map(|cards| RecomputeStep { property, cards })
            })
            .collect(),
    }
}

fn mark_stale(
    stale: &mut BTreeMap<PropertyDefId, BTreeSet<CardId>>,
    property: PropertyDefId,
    cards: BTreeSet<CardId>,
) -> BTreeSet<CardId> {
    let entry = stale.entry(property).or_default();
    cards
        .into_iter()
        .filter(|card| entry.insert(*card))
        .collect()
}

/// Aggregates of the changed tree, restricted to scoping cards touched by
/// the change.
fn structural_targets(
    project: &ProjectState,
    change: &TreeChange,
) -> Vec<(PropertyDefId, BTreeSet<CardId>)> {
    let Some(tree) = change.tree else {
        return Vec::new();
    };
    project
        .calculated_properties()
        .filter_map(|property| {
            let def = property.aggregate()?;
            if def.tree != tree {
                return None;
            }
            let cards: BTreeSet<CardId> = change
                .affected
                .iter()
                .copied()
                .filter(|card| {
                    project
                        .card(*card)
                        .is_some_and(|stored| stored.card_type == def.scoping_card_type)
                })
                .collect();
            Some((property.id, cards))
        })
        .collect()
}

/// Direct dependents of `changed` and the cards on which they go stale.
fn propagate(
    project: &ProjectState,
    changed: PropertyDefId,
    cards: &BTreeSet<CardId>,
) -> Vec<(PropertyDefId, BTreeSet<CardId>)> {
    let Some(changed_def) = project.property(changed) else {
        return Vec::new();
    };
    let mut found = Vec::new();

    for property in project.calculated_properties() {
        let Some(def) = property.aggregate() else {
            continue;
        };
        let reads_target = def.target == Some(changed);
        let reads_condition = def
            .condition
            .as_ref()
            .is_some_and(|condition| condition.references(&changed_def.name));
        if !reads_target && !reads_condition {
            continue;
        }
        let scoping: BTreeSet<CardId> = cards
            .iter()
            .flat_map(|card| tree::ancestors(project, def.tree, *card))
            .filter(|ancestor| {
                project
                    .card(*ancestor)
                    .is_some_and(|stored| stored.card_type == def.scoping_card_type)
            })
            .collect();
        found.push((property.id, scoping));
    }

    let card_types: BTreeSet<CardTypeId> = cards
        .iter()
        .filter_map(|card| project.card(*card).map(|stored| stored.card_type))
        .collect();
    for formula in project.formulas_for_card_types(&card_types) {
        if !formula
            .formula()
            .is_some_and(|expr| expr.references(&changed_def.name))
        {
            continue;
        }
        let affected: BTreeSet<CardId> = cards
            .iter()
            .copied()
            .filter(|card| {
                project
                    .card(*card)
                    .is_some_and(|stored| project.is_applicable(formula.id, stored.card_type))
            })
            .collect();
        found.push((formula.id, affected));
    }
    found
}

/// Recomputes every step of `plan` in order.
///
/// # Errors
/// - An aggregate condition is invalid for `ctx.evaluation`.
pub fn execute(
    project: &mut ProjectState,
    plan: &RecomputePlan,
    ctx: &AggregateContext,
) -> SchedulerResult<RecomputeReport> {
    let mut report = RecomputeReport::default();
    for step in &plan.steps {
        let Some(kind) = project.property(step.property).map(|def| def.kind.clone()) else {
            continue;
        };
        report.definitions += 1;
        for card in &step.cards {
            report.evaluations += 1;
            let changed = match &kind {
                PropertyKind::Formula { formula } => {
                    let applicable = project
                        .card(*card)
                        .is_some_and(|stored| project.is_applicable(step.property, stored.card_type));
                    let value = if applicable {
                        evaluate(project, formula, *card)
                            .and_then(|value| value.to_stored(project.precision))
                    } else {
                        None
                    };
                    project.set_value(*card, step.property, value)
                }
                PropertyKind::Aggregate { .. } => {
                    aggregate::recompute_for_card(project, step.property, *card, ctx)?
                }
                _ => false,
            };
            if changed {
                report.changed_cards.insert(*card);
            }
        }
        debug!(
            "event=recompute_step module=scheduler status=ok property_id={} cards={}",
            step.property,
            step.cards.len()
        );
    }
    Ok(report)
}

/// Plans and executes in one call.
pub fn recompute(
    project: &mut ProjectState,
    triggers: &[Trigger],
    ctx: &AggregateContext,
) -> SchedulerResult<RecomputeReport> {
    let started_at = Instant::now();
    let plan = plan(project, triggers);
    let report = execute(project, &plan, ctx)?;
    info!(
        "event=recompute module=scheduler status=ok definitions={} evaluations={} changed_cards={} duration_ms={}",
        report.definitions,
        report.evaluations,
        report.changed_cards.len(),
        started_at.elapsed().as_millis()
    );
    Ok(report)
}
