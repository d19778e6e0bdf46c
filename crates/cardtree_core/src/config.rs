//! Engine configuration.
//!
//! # Responsibility
//! - Hold tunables the engine reads at call time: precision bounds, the
//!   identity and date used by live conditions, migration behavior.
//!
//! # Invariants
//! - `default_precision <= max_precision`.

use crate::aggregate::{AggregateContext, EvaluationContext};
use crate::precision::MigrationOptions;
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    /// Default precision exceeds the configured maximum.
    InvalidPrecision { default_precision: u32, max_precision: u32 },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "invalid engine configuration: {err}"),
            Self::InvalidPrecision {
                default_precision,
                max_precision,
            } => write!(
                f,
                "default precision {default_precision} exceeds max precision {max_precision}"
            ),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::InvalidPrecision { .. } => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Highest precision a project may use.
    pub max_precision: u32,
    /// Precision of newly created projects.
    pub default_precision: u32,
    /// Fixed value for `TODAY`; the local date when absent.
    pub today: Option<NaiveDate>,
    /// Identity matched by `CURRENT USER`.
    pub current_user: Option<String>,
    pub reformat_free_text_on_decrease: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_precision: 10,
            default_precision: 2,
            today: None,
            current_user: None,
            reformat_free_text_on_decrease: true,
        }
    }
}

impl EngineConfig {
    /// Parses a JSON document; missing keys take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_precision > self.max_precision {
            return Err(ConfigError::InvalidPrecision {
                default_precision: self.default_precision,
                max_precision: self.max_precision,
            });
        }
        Ok(())
    }

    pub fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }

    /// Context for live aggregate evaluation.
    pub fn live_context(&self) -> AggregateContext {
        AggregateContext::live(self.today(), self.current_user.clone())
    }

    /// Context for evaluation against a past snapshot.
    pub fn historical_context(&self) -> AggregateContext {
        AggregateContext {
            evaluation: EvaluationContext::Historical,
            ..self.live_context()
        }
    }

    pub fn migration_options(&self) -> MigrationOptions {
        MigrationOptions {
            max_precision: self.max_precision,
            reformat_free_text: self.reformat_free_text_on_decrease,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, EngineConfig};
    use chrono::NaiveDate;

    #[test]
    fn missing_keys_take_defaults() {
        let config = EngineConfig::from_json_str(r#"{"today":"2009-12-20"}"#).unwrap();
        assert_eq!(config.max_precision, 10);
        assert_eq!(config.default_precision, 2);
        assert_eq!(config.today(), NaiveDate::from_ymd_opt(2009, 12, 20).unwrap());
        assert!(config.reformat_free_text_on_decrease);
    }

    #[test]
    fn rejects_default_above_max() {
        let err = EngineConfig::from_json_str(r#"{"max_precision":1,"default_precision":3}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPrecision { .. }));
        assert!(matches!(
            EngineConfig::from_json_str("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
