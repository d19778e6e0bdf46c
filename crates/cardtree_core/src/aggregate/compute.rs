//! Aggregate computation and caching on scoping cards.

use super::condition::ConditionEnv;
use super::{
    AggregateContext, AggregateDef, AggregateError, AggregateResult, AggregateType,
    EvaluationContext,
};
use crate::model::card::CardId;
use crate::model::project::ProjectState;
use crate::model::property::{PropertyDefId, PropertyDefinition};
use crate::model::value::{CardValue, PropertyValue};
use crate::numeric::{display_number, Number};
use crate::tree;

/// Computes one aggregate for one scoping card without storing it.
///
/// Returns `Ok(None)` for nil: the card is not placed in the aggregate's
/// tree, or SUM/AVG/MIN/MAX found no values.
///
/// # Errors
/// - `property` is not an aggregate.
/// - The condition uses live-only constructs in a historical context.
pub fn compute(
    project: &ProjectState,
    property: &PropertyDefinition,
    scoping_card: CardId,
    ctx: &AggregateContext,
) -> AggregateResult<Option<Number>> {
    let def = property
        .aggregate()
        .ok_or_else(|| AggregateError::NotAnAggregate(property.name.clone()))?;
    if let Some(condition) = &def.condition {
        condition.validate_for(ctx.evaluation)?;
    }
    if !tree::include_card(project, def.tree, scoping_card) {
        return Ok(None);
    }

    let env = ConditionEnv {
        project,
        this_card: Some(scoping_card),
        today: ctx.today,
        current_user: ctx.current_user.as_deref(),
    };
    let in_scope: Vec<CardId> = tree::descendants(project, def.tree, scoping_card)
        .into_iter()
        .filter(|card| {
            project
                .card(*card)
                .is_some_and(|stored| def.covers(stored.card_type))
        })
        .filter(|card| {
            def.condition
                .as_ref()
                .map_or(true, |condition| condition.matches(&env, *card))
        })
        .collect();

    let Some(target) = def.target.and_then(|id| project.property(id)) else {
        if def.aggregate_type == AggregateType::Count && def.target.is_none() {
            return Ok(count(in_scope.len()));
        }
        // Target definition was deleted.
        return Ok(None);
    };

    let values: Vec<Number> = in_scope
        .iter()
        .filter_map(|card| match target.value_for(project, *card)? {
            CardValue::Number(number) => Some(number),
            _ => None,
        })
        .collect();
    Ok(reduce(def.aggregate_type, &values))
}

fn count(len: usize) -> Option<Number> {
    i64::try_from(len).ok().map(Number::from_integer)
}

fn reduce(aggregate_type: AggregateType, values: &[Number]) -> Option<Number> {
    if aggregate_type == AggregateType::Count {
        return count(values.len());
    }
    let (first, rest) = values.split_first()?;
    match aggregate_type {
        AggregateType::Sum => rest.iter().try_fold(*first, |acc, value| acc.checked_add(*value)),
        AggregateType::Average => {
            let total = rest
                .iter()
                .try_fold(*first, |acc, value| acc.checked_add(*value))?;
            total.checked_div(count(values.len())?)
        }
        AggregateType::Min => values.iter().min().copied(),
        AggregateType::Max => values.iter().max().copied(),
        AggregateType::Count => count(values.len()),
    }
}

/// Cards currently holding values of `def`: every card of the scoping type.
pub fn scoping_cards(project: &ProjectState, def: &AggregateDef) -> Vec<CardId> {
    project
        .cards
        .values()
        .filter(|card| card.card_type == def.scoping_card_type)
        .map(|card| card.id)
        .collect()
}

/// Recomputes and stores one aggregate on one card. Returns whether the
/// stored value changed.
pub fn recompute_for_card(
    project: &mut ProjectState,
    property: PropertyDefId,
    card: CardId,
    ctx: &AggregateContext,
) -> AggregateResult<bool> {
    let definition = project
        .property(property)
        .ok_or_else(|| AggregateError::NotAnAggregate(property.to_string()))?;
    let applicable = project
        .card(card)
        .is_some_and(|stored| project.is_applicable(property, stored.card_type));
    let stored = if applicable {
        compute(project, definition, card, ctx)?
            .and_then(|number| display_number(number, project.precision))
            .map(PropertyValue::Text)
    } else {
        None
    };
    Ok(project.set_value(card, property, stored))
}

/// Recomputes one aggregate for every scoping card. Returns changed cards.
pub fn recompute_all(
    project: &mut ProjectState,
    property: PropertyDefId,
    ctx: &AggregateContext,
) -> AggregateResult<Vec<CardId>> {
    let definition = project
        .property(property)
        .ok_or_else(|| AggregateError::NotAnAggregate(property.to_string()))?;
    let def = definition
        .aggregate()
        .ok_or_else(|| AggregateError::NotAnAggregate(definition.name.clone()))?;
    if ctx.evaluation == EvaluationContext::Historical {
        if let Some(condition) = &def.condition {
            condition.validate_for(ctx.evaluation)?;
        }
    }

    let mut changed = Vec::new();
    for card in scoping_cards(project, def) {
        if recompute_for_card(project, property, card, ctx)? {
            changed.push(card);
        }
    }
    Ok(changed)
}
