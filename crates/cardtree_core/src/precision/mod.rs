//! Project-wide precision migration.
//!
//! # Responsibility
//! - Rescale managed numeric values when a project's precision decreases,
//!   merging values that become identical.
//! - Repoint every stored reference to a merged alias at its survivor.
//! - Recompute all calculated values afterwards.
//!
//! # Invariants
//! - Migration is all-or-nothing: it runs on a copy of the project handle
//!   that replaces the original only on success.
//! - Increasing precision never rewrites stored text and is idempotent.
//! - Survivors keep their original relative order with positions `1..=n`.

use crate::aggregate::{AggregateContext, AggregateError};
use crate::model::dependents::PropertyValueHolder;
use crate::model::project::ProjectState;
use crate::model::property::{
    renumber_positions, EnumValueId, EnumerationValue, PropertyDefId, PropertyKind,
};
use crate::model::value::PropertyValue;
use crate::numeric::{merge_plan, normalize, validate_precision, NumericError};
use crate::scheduler::{self, RecomputeReport, Trigger};
use log::{error, info};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

pub type PrecisionResult<T> = Result<T, PrecisionError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrecisionError {
    /// Requested precision outside `0..=max`.
    OutOfRange(NumericError),
    /// `old` does not match the project's current precision.
    Mismatch { expected: u32, actual: u32 },
    Recompute(AggregateError),
}

impl Display for PrecisionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfRange(err) => write!(f, "{err}"),
            Self::Mismatch { expected, actual } => write!(
                f,
                "project precision is {actual}, migration expected {expected}"
            ),
            Self::Recompute(err) => write!(f, "recompute after migration failed: {err}"),
        }
    }
}

impl Error for PrecisionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::OutOfRange(err) => Some(err),
            Self::Mismatch { .. } => None,
            Self::Recompute(err) => Some(err),
        }
    }
}

impl From<NumericError> for PrecisionError {
    fn from(value: NumericError) -> Self {
        Self::OutOfRange(value)
    }
}

impl From<AggregateError> for PrecisionError {
    fn from(value: AggregateError) -> Self {
        Self::Recompute(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecisionChange {
    Increase,
    Decrease,
    Unchanged,
}

impl PrecisionChange {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Increase => "increase",
            Self::Decrease => "decrease",
            Self::Unchanged => "unchanged",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationOptions {
    pub max_precision: u32,
    /// Reformat unmanaged numeric text on decrease.
    pub reformat_free_text: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub change: PrecisionChange,
    pub old: u32,
    pub new: u32,
    /// Managed values removed as aliases of a survivor.
    pub merged_values: usize,
    /// Stored references moved from an alias to its survivor.
    pub repointed_references: usize,
    /// Unmanaged numeric values rewritten at the new precision.
    pub reformatted_values: usize,
    pub recompute: RecomputeReport,
}

/// Migrates `project` from precision `old` to `new`.
///
/// # Errors
/// - Either precision is outside `0..=options.max_precision`.
/// - `old` is not the project's current precision.
/// - Recomputing calculated values fails; the project is left untouched.
pub fn migrate_precision(
    project: &mut ProjectState,
    old: i64,
    new: i64,
    options: MigrationOptions,
    ctx: &AggregateContext,
) -> PrecisionResult<MigrationReport> {
    let started_at = Instant::now();
    let old = validate_precision(old, options.max_precision)?;
    let new = validate_precision(new, options.max_precision)?;
    if old != project.precision {
        return Err(PrecisionError::Mismatch {
            expected: old,
            actual: project.precision,
        });
    }
    let change = match new.cmp(&old) {
        std::cmp::Ordering::Less => PrecisionChange::Decrease,
        std::cmp::Ordering::Greater => PrecisionChange::Increase,
        std::cmp::Ordering::Equal => PrecisionChange::Unchanged,
    };
    info!(
        "event=precision_migrate module=precision status=start project_id={} change={} old={} new={}",
        project.id,
        change.as_str(),
        old,
        new
    );

    let mut working = project.clone();
    let mut report = MigrationReport {
        change,
        old,
        new,
        merged_values: 0,
        repointed_references: 0,
        reformatted_values: 0,
        recompute: RecomputeReport::default(),
    };
    if change == PrecisionChange::Unchanged {
        return Ok(report);
    }

    if change == PrecisionChange::Decrease {
        let aliases = merge_managed_values(&mut working, new);
        report.merged_values = aliases.len();
        let free_text: BTreeSet<PropertyDefId> = if options.reformat_free_text {
            working
                .properties
                .iter()
                .filter(|property| matches!(property.kind, PropertyKind::NumericFreeText))
                .map(|property| property.id)
                .collect()
        } else {
            BTreeSet::new()
        };
        let (repointed, reformatted) = rewrite_references(&mut working, &aliases, &free_text, new);
        report.repointed_references = repointed;
        report.reformatted_values = reformatted;
    }
    working.precision = new;

    match scheduler::recompute(&mut working, &[Trigger::Everything], ctx) {
        Ok(recompute) => report.recompute = recompute,
        Err(err) => {
            error!(
                "event=precision_migrate module=precision status=error project_id={} error={}",
                project.id, err
            );
            return Err(err.into());
        }
    }

    *project = working;
    info!(
        "event=precision_migrate module=precision status=ok project_id={} merged={} repointed={} reformatted={} duration_ms={}",
        project.id,
        report.merged_values,
        report.repointed_references,
        report.reformatted_values,
        started_at.elapsed().as_millis()
    );
    Ok(report)
}

/// Rewrites every managed numeric value list at `precision`. Returns the
/// alias to survivor map of removed values.
fn merge_managed_values(
    project: &mut ProjectState,
    precision: u32,
) -> BTreeMap<EnumValueId, EnumValueId> {
    let mut aliases = BTreeMap::new();
    for property in &mut project.properties {
        let PropertyKind::Enumerated {
            numeric: true,
            values,
        } = &mut property.kind
        else {
            continue;
        };
        values.sort_by_key(|value| value.position);
        let texts: Vec<&str> = values.iter().map(|value| value.value.as_str()).collect();
        let plan = merge_plan(&texts, precision);

        let mut survivors: Vec<EnumerationValue> = Vec::with_capacity(values.len());
        for (index, survivor) in plan.iter().enumerate() {
            if *survivor != index {
                aliases.insert(values[index].id, values[*survivor].id);
                continue;
            }
            let mut kept = values[index].clone();
            if let Some(rescaled) = normalize(&kept.value, precision) {
                kept.value = rescaled;
            }
            survivors.push(kept);
        }
        renumber_positions(&mut survivors);
        *values = survivors;
    }
    aliases
}

/// Repoints aliases and reformats unmanaged numeric text in every holder.
/// Returns `(repointed, reformatted)` counts.
fn rewrite_references(
    project: &mut ProjectState,
    aliases: &BTreeMap<EnumValueId, EnumValueId>,
    free_text: &BTreeSet<PropertyDefId>,
    precision: u32,
) -> (usize, usize) {
    let mut repointed = 0usize;
    let mut reformatted = 0usize;
    let mut touched_cards = Vec::new();
    for card in project.cards.values_mut() {
        let before = (repointed, reformatted);
        rewrite_values(card, aliases, free_text, precision, &mut repointed, &mut reformatted);
        if before != (repointed, reformatted) {
            touched_cards.push(card.id);
        }
    }
    for card in touched_cards {
        project.mark_unsaved(card);
    }

    project.for_each_dependent_mut(|holder| {
        rewrite_values(
            holder,
            aliases,
            free_text,
            precision,
            &mut repointed,
            &mut reformatted,
        );
    });
    (repointed, reformatted)
}

fn rewrite_values(
    holder: &mut dyn PropertyValueHolder,
    aliases: &BTreeMap<EnumValueId, EnumValueId>,
    free_text: &BTreeSet<PropertyDefId>,
    precision: u32,
    repointed: &mut usize,
    reformatted: &mut usize,
) {
    holder.for_each_value_mut(&mut |property, value| match value {
        PropertyValue::Enum(id) => {
            if let Some(survivor) = aliases.get(&*id) {
                *id = *survivor;
                *repointed += 1;
            }
        }
        PropertyValue::Text(text) if free_text.contains(&property) => {
            if let Some(rescaled) = normalize(text, precision) {
                if rescaled != *text {
                    *text = rescaled;
                    *reformatted += 1;
                }
            }
        }
        _ => {}
    });
}
