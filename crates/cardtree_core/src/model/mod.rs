//! Domain model for the card tree engine.
//!
//! # Responsibility
//! - Define canonical data structures for projects, card types, property
//!   definitions, trees, cards and the records that reference card values.
//!
//! # Invariants
//! - Every domain object is identified by a stable UUID.
//! - Managed values are referenced by enumeration id from every dependent.

pub mod card;
pub mod card_type;
pub mod dependents;
pub mod project;
pub mod property;
pub mod tree;
pub mod value;

pub use card::{Card, CardId};
pub use card_type::{CardType, CardTypeId};
pub use dependents::{
    CardDefaults, FilterOperator, HistorySubscription, ProjectVariable, PropertyAssignment,
    PropertyValueHolder, SavedView, Transition, ViewFilter,
};
pub use project::{ProjectId, ProjectState};
pub use property::{
    EnumValueId, EnumerationValue, PropertyDefId, PropertyDefinition, PropertyKind,
    PropertyKindTag,
};
pub use tree::{TreeBelonging, TreeConfiguration, TreeId, TreeLevel};
pub use value::{parse_date, CardValue, PropertyValue, Value, ValueType};
