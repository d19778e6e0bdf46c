//! Aggregate properties computed over tree descendants.
//!
//! # Responsibility
//! - Describe one aggregate: type, tree, scoping level, scope, target
//!   property and optional condition.
//! - Compute and cache aggregate values on scoping cards (see [`compute`]).
//! - Statically reject live-only condition constructs in historical
//!   evaluation (see [`condition`]).
//!
//! # Invariants
//! - An aggregate is scoped to exactly one card type level of one tree.
//! - Cached values are numeric text formatted at project precision.

use crate::model::card_type::CardTypeId;
use crate::model::property::PropertyDefId;
use crate::model::tree::TreeId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod compute;
pub mod condition;

pub use compute::{compute, recompute_all, recompute_for_card, scoping_cards};
pub use condition::{
    Condition, ConditionEnv, ConditionViolation, EvaluationContext, LiveOnlyConstruct,
};

pub type ConditionResult<T> = Result<T, ConditionError>;
pub type AggregateResult<T> = Result<T, AggregateError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateType {
    Sum,
    Count,
    Average,
    Min,
    Max,
}

impl AggregateType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Count => "count",
            Self::Average => "average",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

/// Which descendants of the scoping card take part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum AggregateScope {
    AllDescendants,
    CardType { card_type: CardTypeId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateDef {
    pub aggregate_type: AggregateType,
    pub tree: TreeId,
    /// Card type whose cards hold the aggregate value.
    pub scoping_card_type: CardTypeId,
    pub scope: AggregateScope,
    /// Property being summed/averaged. `None` only for COUNT.
    pub target: Option<PropertyDefId>,
    #[serde(default)]
    pub condition: Option<Condition>,
}

impl AggregateDef {
    /// Whether `card_type` cards can be counted by this aggregate.
    pub fn covers(&self, card_type: CardTypeId) -> bool {
        match &self.scope {
            AggregateScope::AllDescendants => true,
            AggregateScope::CardType { card_type: scoped } => *scoped == card_type,
        }
    }
}

/// Runtime inputs for aggregate computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateContext {
    pub today: NaiveDate,
    pub current_user: Option<String>,
    pub evaluation: EvaluationContext,
}

impl AggregateContext {
    pub fn live(today: NaiveDate, current_user: Option<String>) -> Self {
        Self {
            today,
            current_user,
            evaluation: EvaluationContext::Live,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionError {
    Parse { position: usize, message: String },
    /// Condition names a property that does not exist.
    UnknownProperty(String),
    /// Live-only constructs used in a historical evaluation.
    DisallowedConstructs(Vec<ConditionViolation>),
    NestingTooDeep { position: usize, limit: usize },
}

impl Display for ConditionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse { position, message } => {
                write!(f, "invalid condition at position {position}: {message}")
            }
            Self::UnknownProperty(name) => write!(f, "property `{name}` does not exist"),
            Self::DisallowedConstructs(violations) => {
                let messages: Vec<String> =
                    violations.iter().map(ToString::to_string).collect();
                write!(f, "{}", messages.join("; "))
            }
            Self::NestingTooDeep { position, limit } => {
                write!(f, "condition nests deeper than {limit} levels at position {position}")
            }
        }
    }
}

impl Error for ConditionError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregateError {
    /// Property is missing or not an aggregate.
    NotAnAggregate(String),
    Condition(ConditionError),
}

impl Display for AggregateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAnAggregate(name) => write!(f, "`{name}` is not an aggregate property"),
            Self::Condition(err) => write!(f, "{err}"),
        }
    }
}

impl Error for AggregateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::NotAnAggregate(_) => None,
            Self::Condition(err) => Some(err),
        }
    }
}

impl From<ConditionError> for AggregateError {
    fn from(value: ConditionError) -> Self {
        Self::Condition(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{AggregateDef, AggregateScope, AggregateType, Condition};
    use uuid::Uuid;

    #[test]
    fn definition_serializes_condition_as_source_text() {
        let task = Uuid::new_v4();
        let def = AggregateDef {
            aggregate_type: AggregateType::Sum,
            tree: Uuid::new_v4(),
            scoping_card_type: Uuid::new_v4(),
            scope: AggregateScope::CardType { card_type: task },
            target: Some(Uuid::new_v4()),
            condition: Some(Condition::parse("Status = Done").unwrap()),
        };
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["aggregate_type"], "sum");
        assert_eq!(json["condition"], "Status = Done");
        assert_eq!(json["scope"]["scope"], "card_type");

        let restored: AggregateDef = serde_json::from_value(json).unwrap();
        assert_eq!(restored, def);
        assert!(restored.covers(task));
        assert!(!restored.covers(Uuid::new_v4()));
    }
}
