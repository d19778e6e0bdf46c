//! Structural tree mutations.
//!
//! Every mutation computes the new ancestry of each touched card from the
//! state before the mutation, then writes relationship values and
//! belongings. Subtree moves run over an explicit worklist of
//! `(card, inherited ancestry)` pairs.

use super::{
    ancestors, ancestry, children_index, config, descendants, include_card, Ancestry, TreeChange,
    TreeError, TreeResult,
};
use crate::model::card::CardId;
use crate::model::card_type::CardTypeId;
use crate::model::project::ProjectState;
use crate::model::property::PropertyDefId;
use crate::model::tree::{TreeBelonging, TreeConfiguration, TreeId};
use crate::model::value::PropertyValue;
use log::debug;

/// New value for a tree relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipTarget {
    Card(CardId),
    NotSet,
}

/// Per-card results of one reparent batch.
#[derive(Debug, Clone, Default)]
pub struct ReparentOutcome {
    pub results: Vec<(CardId, TreeResult<()>)>,
    pub change: TreeChange,
}

impl ReparentOutcome {
    pub fn succeeded(&self) -> Vec<CardId> {
        self.results
            .iter()
            .filter(|(_, result)| result.is_ok())
            .map(|(card, _)| *card)
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = (CardId, &TreeError)> + '_ {
        self.results
            .iter()
            .filter_map(|(card, result)| result.as_ref().err().map(|err| (*card, err)))
    }
}

/// Inserts `card` into `tree` at the level of its card type.
///
/// With a parent, the card's ancestry becomes the parent's ancestry plus the
/// parent. A parent that is not yet a member is attached at root first.
/// Attaching a member again moves it together with its subtree.
pub fn attach(
    project: &mut ProjectState,
    tree: TreeId,
    card: CardId,
    parent: Option<CardId>,
) -> TreeResult<TreeChange> {
    let config = config(project, tree)?;
    let level = level_for(project, &config, card)?;
    let mut change = TreeChange::new(tree);

    let new_ancestry = match parent {
        None => vec![None; level - 1],
        Some(parent) => {
            let parent_level = level_for(project, &config, parent)?;
            if parent_level >= level {
                return Err(TreeError::InvalidParent {
                    card: card_number(project, card),
                    parent: card_number(project, parent),
                });
            }
            ensure_member(project, &config, parent, &mut change);
            inherit(project, &config, parent, level)
        }
    };

    change.affected.extend(ancestors(project, tree, card));
    move_subtree(project, &config, card, new_ancestry, &mut change);
    Ok(change)
}

/// Removes `card` from `tree`. Descendants stay in the tree and lose the
/// slot the card occupied.
pub fn detach(project: &mut ProjectState, tree: TreeId, card: CardId) -> TreeResult<TreeChange> {
    let config = config(project, tree)?;
    let mut change = TreeChange::new(tree);
    let Some(level) = project.belonging(tree, card).map(|belonging| belonging.level) else {
        return Ok(change);
    };

    change.affected.insert(card);
    change.affected.extend(ancestors(project, tree, card));
    let placements = vacate_slot(project, &config, card, level);
    for (descendant, new_ancestry) in placements {
        change.affected.insert(descendant);
        place(project, &config, descendant, &new_ancestry);
    }
    remove(project, &config, card);
    Ok(change)
}

/// Sets the tree relationship `relationship` of every card in `cards`.
///
/// Cards are validated independently; a failing card is skipped and its
/// error recorded while the others proceed.
///
/// # Errors
/// - `relationship` is not a tree relationship.
/// - The target card does not exist.
pub fn reparent(
    project: &mut ProjectState,
    cards: &[CardId],
    relationship: PropertyDefId,
    target: RelationshipTarget,
) -> TreeResult<ReparentOutcome> {
    let definition = project
        .property(relationship)
        .ok_or_else(|| TreeError::NotATreeRelationship(relationship.to_string()))?;
    let property_name = definition.name.clone();
    let tree = definition
        .tree()
        .ok_or_else(|| TreeError::NotATreeRelationship(property_name.clone()))?;
    let config = config(project, tree)?;
    let changed_level = config
        .level_of_relationship(relationship)
        .ok_or_else(|| TreeError::NotATreeRelationship(property_name.clone()))?;
    let target_type_error = match target {
        RelationshipTarget::Card(target) => {
            let stored = project.card(target).ok_or(TreeError::UnknownCard(target))?;
            let expected = config.card_type_at(changed_level);
            (expected != Some(stored.card_type)).then(|| TreeError::WrongTargetType {
                property: property_name.clone(),
                expected: expected
                    .map(|card_type| project.card_type_name(card_type))
                    .unwrap_or_default(),
            })
        }
        RelationshipTarget::NotSet => None,
    };

    let mut outcome = ReparentOutcome {
        results: Vec::with_capacity(cards.len()),
        change: TreeChange::new(tree),
    };
    for &card in cards {
        let result = reparent_one(
            project,
            &config,
            card,
            ReparentRequest {
                relationship,
                property_name: &property_name,
                changed_level,
                target,
                target_type_error: target_type_error.as_ref(),
            },
            &mut outcome.change,
        );
        if let Err(err) = &result {
            debug!(
                "event=tree_reparent_skip module=tree status=error card_id={} error={}",
                card, err
            );
        }
        outcome.results.push((card, result));
    }
    Ok(outcome)
}

struct ReparentRequest<'a> {
    relationship: PropertyDefId,
    property_name: &'a str,
    changed_level: usize,
    target: RelationshipTarget,
    target_type_error: Option<&'a TreeError>,
}

fn reparent_one(
    project: &mut ProjectState,
    config: &TreeConfiguration,
    card: CardId,
    request: ReparentRequest<'_>,
    change: &mut TreeChange,
) -> TreeResult<()> {
    let card_type = project
        .card(card)
        .ok_or(TreeError::UnknownCard(card))?
        .card_type;
    let level = config
        .level_of(card_type)
        .filter(|level| *level > request.changed_level)
        .filter(|_| project.is_applicable(request.relationship, card_type))
        .ok_or_else(|| TreeError::NotApplicable {
            property: request.property_name.to_string(),
            card_type: project.card_type_name(card_type),
        })?;

    let new_ancestry = match request.target {
        RelationshipTarget::Card(target) => {
            if let Some(err) = request.target_type_error {
                return Err(err.clone());
            }
            ensure_member(project, config, target, change);
            inherit(project, config, target, level)
        }
        RelationshipTarget::NotSet => {
            if !include_card(project, config.id, card) {
                return Ok(());
            }
            let mut kept = ancestry(project, config, card);
            kept.truncate(request.changed_level - 1);
            kept.resize(level - 1, None);
            kept
        }
    };

    change.affected.extend(ancestors(project, config.id, card));
    move_subtree(project, config, card, new_ancestry, change);
    Ok(())
}

/// Changes the type of `card` and rehangs it in every tree it belongs to.
///
/// - New type without a level: the card leaves the tree; descendants are
///   rehung under root keeping only ancestry strictly above its former level.
/// - New type with a level: ancestry above both levels is kept; descendants
///   deeper than the new level are rehung under the card, the others are
///   detached from it.
///
/// Values of properties not applicable to the new type are dropped.
pub fn change_card_type(
    project: &mut ProjectState,
    card: CardId,
    new_type: CardTypeId,
) -> TreeResult<Vec<TreeChange>> {
    let old_type = project
        .card(card)
        .ok_or(TreeError::UnknownCard(card))?
        .card_type;
    project
        .card_type(new_type)
        .ok_or(TreeError::UnknownCardType(new_type))?;
    if old_type == new_type {
        return Ok(Vec::new());
    }

    let mut plans = Vec::new();
    for tree in project.trees_of(card) {
        let config = config(project, tree)?;
        let Some(old_level) = project.belonging(tree, card).map(|belonging| belonging.level)
        else {
            continue;
        };
        let mut change = TreeChange::new(tree);
        change.affected.insert(card);
        change.affected.extend(ancestors(project, tree, card));

        let mut placements: Vec<(CardId, Option<Ancestry>)> = Vec::new();
        match config.level_of(new_type) {
            None => {
                placements.push((card, None));
                placements.extend(
                    truncate_from(project, &config, card, old_level)
                        .into_iter()
                        .map(|(descendant, kept)| (descendant, Some(kept))),
                );
            }
            Some(new_level) => {
                let card_ancestry = ancestry(project, &config, card);
                let keep = old_level.min(new_level) - 1;
                let mut new_ancestry: Ancestry = card_ancestry[..keep].to_vec();
                new_ancestry.resize(new_level - 1, None);

                for descendant in descendants(project, tree, card) {
                    let descendant_level = project
                        .belonging(tree, descendant)
                        .map_or(0, |belonging| belonging.level);
                    let mut old = ancestry(project, &config, descendant);
                    let rehung = if descendant_level > new_level {
                        let mut rehung = new_ancestry.clone();
                        rehung.push(Some(card));
                        rehung.extend(old.get(new_level..).unwrap_or(&[]).iter().copied());
                        rehung
                    } else {
                        if let Some(slot) = old.get_mut(old_level - 1) {
                            *slot = None;
                        }
                        old
                    };
                    placements.push((descendant, Some(rehung)));
                }
                placements.insert(0, (card, Some(new_ancestry)));
            }
        }
        plans.push((config, placements, change));
    }

    project.set_card_type(card, new_type);
    let stale: Vec<PropertyDefId> = project
        .card(card)
        .map(|stored| {
            stored
                .values
                .keys()
                .copied()
                .filter(|property| !project.is_applicable(*property, new_type))
                .collect()
        })
        .unwrap_or_default();
    for property in stale {
        project.set_value(card, property, None);
    }

    let mut changes = Vec::with_capacity(plans.len());
    for (config, placements, mut change) in plans {
        for (target, placement) in placements {
            change.affected.insert(target);
            match placement {
                Some(new_ancestry) => place(project, &config, target, &new_ancestry),
                None => remove(project, &config, target),
            }
        }
        changes.push(change);
    }
    Ok(changes)
}

fn level_for(
    project: &ProjectState,
    config: &TreeConfiguration,
    card: CardId,
) -> TreeResult<usize> {
    let card_type = project
        .card(card)
        .ok_or(TreeError::UnknownCard(card))?
        .card_type;
    config
        .level_of(card_type)
        .ok_or_else(|| TreeError::CardTypeNotInTree {
            card_type: project.card_type_name(card_type),
            tree: config.name.clone(),
        })
}

fn card_number(project: &ProjectState, card: CardId) -> u32 {
    project.card(card).map_or(0, |stored| stored.number)
}

/// Ancestry for a card at `level` placed directly under `parent`.
fn inherit(
    project: &ProjectState,
    config: &TreeConfiguration,
    parent: CardId,
    level: usize,
) -> Ancestry {
    let mut inherited = ancestry(project, config, parent);
    inherited.push(Some(parent));
    inherited.resize(level - 1, None);
    inherited
}

/// Attaches a non-member at root so it can receive children.
fn ensure_member(
    project: &mut ProjectState,
    config: &TreeConfiguration,
    card: CardId,
    change: &mut TreeChange,
) {
    if include_card(project, config.id, card) {
        return;
    }
    let Some(level) = project
        .card(card)
        .and_then(|stored| config.level_of(stored.card_type))
    else {
        return;
    };
    debug!(
        "event=tree_implicit_attach module=tree status=ok tree_id={} card_id={}",
        config.id, card
    );
    change.affected.insert(card);
    place(project, config, card, &vec![None; level - 1]);
}

/// Ancestries of every descendant of `card` with the slot at `level` cleared.
fn vacate_slot(
    project: &ProjectState,
    config: &TreeConfiguration,
    card: CardId,
    level: usize,
) -> Vec<(CardId, Ancestry)> {
    descendants(project, config.id, card)
        .into_iter()
        .map(|descendant| {
            let mut kept = ancestry(project, config, descendant);
            if let Some(slot) = kept.get_mut(level - 1) {
                *slot = None;
            }
            (descendant, kept)
        })
        .collect()
}

/// Ancestries of every descendant of `card` with every slot from `level`
/// down cleared.
fn truncate_from(
    project: &ProjectState,
    config: &TreeConfiguration,
    card: CardId,
    level: usize,
) -> Vec<(CardId, Ancestry)> {
    descendants(project, config.id, card)
        .into_iter()
        .map(|descendant| {
            let mut kept = ancestry(project, config, descendant);
            for slot in kept.iter_mut().skip(level - 1) {
                *slot = None;
            }
            (descendant, kept)
        })
        .collect()
}

/// Moves `card` to `new_ancestry` and carries its subtree along.
///
/// A child inherits its parent's new ancestry plus the parent, followed by
/// its own previous relationships strictly below the parent's level.
fn move_subtree(
    project: &mut ProjectState,
    config: &TreeConfiguration,
    card: CardId,
    new_ancestry: Ancestry,
    change: &mut TreeChange,
) {
    let index = children_index(project, config.id);
    let mut worklist: Vec<(CardId, Ancestry)> = vec![(card, new_ancestry)];
    while let Some((current, inherited)) = worklist.pop() {
        let current_level = inherited.len() + 1;
        for child in index.get(&current).into_iter().flatten() {
            let previous = ancestry(project, config, *child);
            let mut child_ancestry = inherited.clone();
            child_ancestry.push(Some(current));
            child_ancestry.extend(previous.get(current_level..).unwrap_or(&[]).iter().copied());
            worklist.push((*child, child_ancestry));
        }
        change.affected.insert(current);
        change.affected.extend(inherited.iter().flatten().copied());
        place(project, config, current, &inherited);
    }
}

/// Writes relationship values and the belonging for one card.
fn place(
    project: &mut ProjectState,
    config: &TreeConfiguration,
    card: CardId,
    new_ancestry: &[Option<CardId>],
) {
    for (index, level) in config.levels.iter().enumerate() {
        let Some(relationship) = level.relationship else {
            continue;
        };
        let value = new_ancestry
            .get(index)
            .copied()
            .flatten()
            .map(PropertyValue::Card);
        project.set_value(card, relationship, value);
    }

    let belonging = TreeBelonging {
        card,
        tree: config.id,
        parent: new_ancestry.iter().rev().find_map(|ancestor| *ancestor),
        level: new_ancestry.len() + 1,
    };
    if project.belonging(config.id, card) != Some(&belonging) {
        project.belongings.insert((config.id, card), belonging);
        project.mark_unsaved(card);
    }
}

fn remove(project: &mut ProjectState, config: &TreeConfiguration, card: CardId) {
    for relationship in config.relationships().map(|(_, id)| id).collect::<Vec<_>>() {
        project.set_value(card, relationship, None);
    }
    if project.belongings.remove(&(config.id, card)).is_some() {
        project.mark_unsaved(card);
    }
}
