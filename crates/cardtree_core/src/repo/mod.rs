//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define whole-project load/commit contracts.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Repositories only accept connections migrated to the latest schema.

pub mod project_repo;

pub use project_repo::{ProjectRepository, RepoError, RepoResult, SqliteProjectRepository};
