//! Definition-level dependency graph between properties.
//!
//! An edge `a -> b` means the value of calculated property `b` reads
//! property `a`. Formula references resolve by name against the current
//! definitions; names that no longer resolve contribute no edge.

use crate::model::card_type::CardTypeId;
use crate::model::project::ProjectState;
use crate::model::property::{PropertyDefId, PropertyDefinition, PropertyKind};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

/// How a calculated property reads another property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    FormulaComponent,
    AggregateTarget,
    AggregateCondition,
}

impl Display for DependencyKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FormulaComponent => write!(f, "is used as a component of formula"),
            Self::AggregateTarget => write!(f, "is the target of aggregate"),
            Self::AggregateCondition => write!(f, "is used in the condition of aggregate"),
        }
    }
}

/// Calculated definition preventing a delete or dissociation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blocker {
    pub property: String,
    pub blocking: String,
    pub kind: DependencyKind,
}

impl Display for Blocker {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.property, self.kind, self.blocking)
    }
}

/// Direct inputs of one calculated definition.
pub fn inputs_of(
    project: &ProjectState,
    definition: &PropertyDefinition,
) -> Vec<(PropertyDefId, DependencyKind)> {
    let mut inputs = Vec::new();
    match &definition.kind {
        PropertyKind::Formula { formula } => {
            for name in formula.referenced_names() {
                if let Some(input) = project.property_by_name(&name) {
                    inputs.push((input.id, DependencyKind::FormulaComponent));
                }
            }
        }
        PropertyKind::Aggregate { aggregate } => {
            if let Some(target) = aggregate.target.filter(|id| project.property(*id).is_some()) {
                inputs.push((target, DependencyKind::AggregateTarget));
            }
            if let Some(condition) = &aggregate.condition {
                for name in condition.referenced_properties() {
                    if let Some(input) = project.property_by_name(&name) {
                        inputs.push((input.id, DependencyKind::AggregateCondition));
                    }
                }
            }
        }
        _ => {}
    }
    inputs
}

pub struct DependencyGraph {
    graph: DiGraph<PropertyDefId, DependencyKind>,
    node_indices: BTreeMap<PropertyDefId, NodeIndex>,
}

impl DependencyGraph {
    /// Builds the graph over every property of the project.
    pub fn build(project: &ProjectState) -> Self {
        let mut graph = DiGraph::new();
        let mut node_indices = BTreeMap::new();
        for property in &project.properties {
            node_indices.insert(property.id, graph.add_node(property.id));
        }
        for property in project.calculated_properties() {
            let Some(&to) = node_indices.get(&property.id) else {
                continue;
            };
            for (input, kind) in inputs_of(project, property) {
                if let Some(&from) = node_indices.get(&input) {
                    graph.add_edge(from, to, kind);
                }
            }
        }
        Self {
            graph,
            node_indices,
        }
    }

    /// Calculated properties reading `property` directly.
    pub fn dependents(&self, property: PropertyDefId) -> Vec<(PropertyDefId, DependencyKind)> {
        let Some(&index) = self.node_indices.get(&property) else {
            return Vec::new();
        };
        let mut found: Vec<(PropertyDefId, DependencyKind)> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .map(|edge| (self.graph[edge.target()], *edge.weight()))
            .collect();
        found.sort_by_key(|(id, _)| *id);
        found.dedup();
        found
    }

    /// Orders `properties` so every input precedes its dependents.
    ///
    /// Cyclic definitions fall back to the given order.
    pub fn order(&self, properties: &BTreeSet<PropertyDefId>) -> Vec<PropertyDefId> {
        match toposort(&self.graph, None) {
            Ok(sorted) => sorted
                .into_iter()
                .map(|index| self.graph[index])
                .filter(|id| properties.contains(id))
                .collect(),
            Err(_) => properties.iter().copied().collect(),
        }
    }
}

/// First calculated definition that reads `property`.
///
/// With `card_type`, only definitions still needed by that card type count:
/// formulas associated with it and aggregates whose scope covers it.
pub fn find_blocker(
    project: &ProjectState,
    property: PropertyDefId,
    card_type: Option<CardTypeId>,
) -> Option<Blocker> {
    let name = project.property(property)?.name.clone();
    let graph = DependencyGraph::build(project);
    graph
        .dependents(property)
        .into_iter()
        .filter_map(|(dependent, kind)| project.property(dependent).map(|def| (def, kind)))
        .find(|(dependent, _)| match card_type {
            None => true,
            Some(card_type) => match &dependent.kind {
                PropertyKind::Formula { .. } => project.is_applicable(dependent.id, card_type),
                PropertyKind::Aggregate { aggregate } => aggregate.covers(card_type),
                _ => false,
            },
        })
        .map(|(dependent, kind)| Blocker {
            property: name.clone(),
            blocking: dependent.name.clone(),
            kind,
        })
}
