//! Tree hierarchy manager.
//!
//! # Responsibility
//! - Answer membership, level and ancestry queries for configured trees.
//! - Attach, detach and reparent cards while keeping relationship values
//!   and tree belongings in sync (see [`reparent`]).
//! - Rehang subtrees when a card changes type.
//!
//! # Invariants
//! - A card at level `L` holds relationship values only for levels `1..L`,
//!   each pointing at a card of that level in the same tree.
//! - `TreeBelonging::parent` is the deepest assigned ancestor.
//! - Moving a card never changes relationships among its descendants that
//!   sit strictly below it.
//!
//! # See also
//! - `crate::scheduler` consumes [`TreeChange`] to refresh aggregates.

use crate::model::card::CardId;
use crate::model::card_type::CardTypeId;
use crate::model::project::ProjectState;
use crate::model::tree::{TreeConfiguration, TreeId};
use crate::model::value::PropertyValue;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod reparent;

pub use reparent::{
    attach, change_card_type, detach, reparent, RelationshipTarget, ReparentOutcome,
};

/// Relationship values of one card, root first. Index `j - 1` holds the
/// ancestor at level `j`; the length is the card's level minus one.
pub type Ancestry = Vec<Option<CardId>>;

pub type TreeResult<T> = Result<T, TreeError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    UnknownTree(TreeId),
    UnknownCard(CardId),
    UnknownCardType(CardTypeId),
    /// Property exists but is not a tree relationship.
    NotATreeRelationship(String),
    /// Card type has no level in the tree.
    CardTypeNotInTree { card_type: String, tree: String },
    /// Relationship property does not apply to the card's type.
    NotApplicable { property: String, card_type: String },
    /// Relationship value is a card of the wrong type.
    WrongTargetType { property: String, expected: String },
    /// Parent is not at a shallower level than the child.
    InvalidParent { card: u32, parent: u32 },
}

impl Display for TreeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownTree(id) => write!(f, "tree not found: {id}"),
            Self::UnknownCard(id) => write!(f, "card not found: {id}"),
            Self::UnknownCardType(id) => write!(f, "card type not found: {id}"),
            Self::NotATreeRelationship(name) => {
                write!(f, "property `{name}` is not a tree relationship")
            }
            Self::CardTypeNotInTree { card_type, tree } => write!(
                f,
                "card type `{card_type}` is not configured in tree `{tree}`"
            ),
            Self::NotApplicable {
                property,
                card_type,
            } => write!(
                f,
                "{property} is not applicable to card type {card_type}"
            ),
            Self::WrongTargetType { property, expected } => write!(
                f,
                "{property} must be set to a card of type {expected}"
            ),
            Self::InvalidParent { card, parent } => write!(
                f,
                "card #{parent} cannot be the parent of card #{card}: it is not at a higher level"
            ),
        }
    }
}

impl Error for TreeError {}

/// Cards whose tree-derived data may have changed after one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeChange {
    pub tree: Option<TreeId>,
    /// Moved cards, their descendants and their old and new ancestors.
    pub affected: BTreeSet<CardId>,
}

impl TreeChange {
    pub fn new(tree: TreeId) -> Self {
        Self {
            tree: Some(tree),
            affected: BTreeSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.affected.is_empty()
    }
}

pub(crate) fn config(project: &ProjectState, tree: TreeId) -> TreeResult<TreeConfiguration> {
    project
        .tree(tree)
        .cloned()
        .ok_or(TreeError::UnknownTree(tree))
}

/// Membership test, independent of whether the card has any parent.
pub fn include_card(project: &ProjectState, tree: TreeId, card: CardId) -> bool {
    project.belonging(tree, card).is_some()
}

/// 1-based depth of a member card.
pub fn level_in_complete_tree(project: &ProjectState, tree: TreeId, card: CardId) -> Option<usize> {
    project.belonging(tree, card).map(|belonging| belonging.level)
}

/// Relationship values of `card` for every level above its own.
pub fn ancestry(project: &ProjectState, config: &TreeConfiguration, card: CardId) -> Ancestry {
    let level = project
        .belonging(config.id, card)
        .map(|belonging| belonging.level)
        .or_else(|| {
            project
                .card(card)
                .and_then(|stored| config.level_of(stored.card_type))
        })
        .unwrap_or(1);
    (1..level)
        .map(|ancestor_level| {
            config
                .relationship_at(ancestor_level)
                .and_then(|relationship| project.value(card, relationship))
                .and_then(PropertyValue::as_card)
        })
        .collect()
}

/// Assigned ancestors of `card`, root first.
pub fn ancestors(project: &ProjectState, tree: TreeId, card: CardId) -> Vec<CardId> {
    let Some(config) = project.tree(tree) else {
        return Vec::new();
    };
    if !include_card(project, tree, card) {
        return Vec::new();
    }
    ancestry(project, config, card).into_iter().flatten().collect()
}

/// Direct children of `card` in tree member order.
pub fn children(project: &ProjectState, tree: TreeId, card: CardId) -> Vec<CardId> {
    children_index(project, tree)
        .remove(&card)
        .unwrap_or_default()
}

/// All cards below `card`, breadth first.
pub fn descendants(project: &ProjectState, tree: TreeId, card: CardId) -> Vec<CardId> {
    let index = children_index(project, tree);
    let mut found = Vec::new();
    let mut frontier = vec![card];
    while !frontier.is_empty() {
        let mut next = Vec::new();
        for current in frontier {
            if let Some(kids) = index.get(&current) {
                found.extend(kids.iter().copied());
                next.extend(kids.iter().copied());
            }
        }
        frontier = next;
    }
    found
}

/// Parent to children map for one tree, children in member order.
pub(crate) fn children_index(
    project: &ProjectState,
    tree: TreeId,
) -> BTreeMap<CardId, Vec<CardId>> {
    let mut index: BTreeMap<CardId, Vec<CardId>> = BTreeMap::new();
    for member in project.tree_members(tree) {
        if let Some(parent) = project
            .belonging(tree, member)
            .and_then(|belonging| belonging.parent)
        {
            index.entry(parent).or_default().push(member);
        }
    }
    index
}
