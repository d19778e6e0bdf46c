//! Derived-property engine for hierarchical card trees.
//! Owns numeric normalization, tree structure, formulas, aggregates,
//! recompute scheduling and precision migration for one project at a time.

pub mod aggregate;
pub mod config;
pub mod db;
pub mod error;
pub mod formula;
pub mod logging;
pub mod model;
pub mod numeric;
pub mod precision;
pub mod registry;
pub mod repo;
pub mod scheduler;
pub mod service;
pub mod tree;

pub use aggregate::{AggregateContext, AggregateDef, AggregateScope, AggregateType, Condition};
pub use config::{ConfigError, EngineConfig};
pub use error::{EngineError, EngineResult};
pub use formula::{Formula, FormulaError};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::{CardId, CardTypeId, ProjectState, PropertyDefId, PropertyKind, PropertyValue, Value};
pub use numeric::Number;
pub use precision::{MigrationReport, PrecisionChange};
pub use repo::{ProjectRepository, RepoError, RepoResult, SqliteProjectRepository};
pub use service::{BulkUpdateOptions, PerCardResult, ProjectService, PropertyUpdate};

/// Returns the engine crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
