//! Engine use-case services.
//!
//! # Responsibility
//! - Orchestrate registry, tree, scheduler and precision calls into the
//!   operations callers use.
//! - Keep callers decoupled from storage details.

pub mod project_service;

pub use project_service::{BulkUpdateOptions, PerCardResult, ProjectService, PropertyUpdate};
