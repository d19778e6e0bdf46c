//! Engine-level error taxonomy exposed by [`crate::service`].
//!
//! # Responsibility
//! - Fold layer errors into three caller-facing categories: per-card
//!   validation failures, blocked operations and invalid values.
//!
//! # Invariants
//! - `Validation` never aborts a batch; it is reported per card.
//! - `BlockedOperation` always names the blocking definition.

use crate::aggregate::{AggregateError, ConditionError};
use crate::config::ConfigError;
use crate::formula::FormulaError;
use crate::numeric::NumericError;
use crate::precision::PrecisionError;
use crate::registry::RegistryError;
use crate::repo::project_repo::RepoError;
use crate::tree::TreeError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug)]
pub enum EngineError {
    /// Per-card or per-field rule violation.
    Validation(String),
    /// Whole operation refused because another definition depends on it.
    BlockedOperation {
        property: String,
        blocking: String,
        reason: String,
    },
    /// Referenced card, precision or value does not exist or is out of range.
    InvalidValue(String),
    NotFound(String),
    Formula(FormulaError),
    Condition(ConditionError),
    Tree(TreeError),
    Registry(RegistryError),
    Numeric(NumericError),
    Config(ConfigError),
    Aggregate(AggregateError),
    Precision(PrecisionError),
    Repo(RepoError),
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(message) => write!(f, "{message}"),
            Self::BlockedOperation {
                property,
                blocking,
                reason,
            } => write!(f, "cannot proceed: {property} {reason} {blocking}"),
            Self::InvalidValue(message) => write!(f, "invalid value: {message}"),
            Self::NotFound(name) => write!(f, "{name} does not exist"),
            Self::Formula(err) => write!(f, "{err}"),
            Self::Condition(err) => write!(f, "{err}"),
            Self::Tree(err) => write!(f, "{err}"),
            Self::Registry(err) => write!(f, "{err}"),
            Self::Numeric(err) => write!(f, "{err}"),
            Self::Config(err) => write!(f, "{err}"),
            Self::Aggregate(err) => write!(f, "{err}"),
            Self::Precision(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(_)
            | Self::BlockedOperation { .. }
            | Self::InvalidValue(_)
            | Self::NotFound(_) => None,
            Self::Formula(err) => Some(err),
            Self::Condition(err) => Some(err),
            Self::Tree(err) => Some(err),
            Self::Registry(err) => Some(err),
            Self::Numeric(err) => Some(err),
            Self::Config(err) => Some(err),
            Self::Aggregate(err) => Some(err),
            Self::Precision(err) => Some(err),
            Self::Repo(err) => Some(err),
        }
    }
}

impl From<FormulaError> for EngineError {
    fn from(value: FormulaError) -> Self {
        Self::Formula(value)
    }
}

impl From<ConditionError> for EngineError {
    fn from(value: ConditionError) -> Self {
        Self::Condition(value)
    }
}

impl From<TreeError> for EngineError {
    fn from(value: TreeError) -> Self {
        match value {
            TreeError::NotApplicable { .. } | TreeError::WrongTargetType { .. } => {
                Self::Validation(value.to_string())
            }
            other => Self::Tree(other),
        }
    }
}

impl From<RegistryError> for EngineError {
    fn from(value: RegistryError) -> Self {
        match value {
            RegistryError::Blocked(blocker) => Self::BlockedOperation {
                property: blocker.property,
                blocking: blocker.blocking,
                reason: blocker.kind.to_string(),
            },
            other => Self::Registry(other),
        }
    }
}

impl From<NumericError> for EngineError {
    fn from(value: NumericError) -> Self {
        Self::Numeric(value)
    }
}

impl From<ConfigError> for EngineError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<AggregateError> for EngineError {
    fn from(value: AggregateError) -> Self {
        Self::Aggregate(value)
    }
}

impl From<PrecisionError> for EngineError {
    fn from(value: PrecisionError) -> Self {
        match value {
            PrecisionError::OutOfRange(err) => Self::InvalidValue(err.to_string()),
            other => Self::Precision(other),
        }
    }
}

impl From<RepoError> for EngineError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}
