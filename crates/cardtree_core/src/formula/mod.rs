//! Formula property expressions.
//!
//! # Responsibility
//! - Parse arithmetic expressions over literals and property references.
//! - Validate a formula against the project at definition time.
//! - Evaluate a formula for one card (see [`eval`]).
//!
//! # Invariants
//! - Evaluation is total: missing data yields nil, never an error.
//! - References are by property name, so deleted or renamed properties
//!   degrade to nil at evaluation time.

use crate::model::card_type::CardTypeId;
use crate::model::project::ProjectState;
use crate::model::property::PropertyKind;
use crate::model::value::ValueType;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod eval;
pub mod lexer;
pub mod parser;

pub use eval::evaluate;
pub use parser::{parse_expression, BinaryOp, Expr};

pub type FormulaResult<T> = Result<T, FormulaError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormulaError {
    EmptyExpression,
    UnexpectedCharacter { position: usize, found: char },
    UnterminatedQuote { position: usize },
    UnexpectedToken { position: usize, found: String },
    UnexpectedEnd { position: usize },
    InvalidNumber { position: usize, text: String },
    /// Referenced property does not exist.
    UndefinedProperty(String),
    /// Referenced property is not associated with one of the formula's card types.
    NotApplicable { property: String, card_type: String },
    /// Referenced property cannot be used in arithmetic.
    UnsupportedOperand { property: String, kind: &'static str },
    TypeMismatch {
        op: char,
        left: ValueType,
        right: Option<ValueType>,
    },
    /// Formula references itself directly or through other formulas.
    CircularReference(String),
    NestingTooDeep { position: usize, limit: usize },
}

impl Display for FormulaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyExpression => write!(f, "formula must not be blank"),
            Self::UnexpectedCharacter { position, found } => {
                write!(f, "unexpected character `{found}` at position {position}")
            }
            Self::UnterminatedQuote { position } => {
                write!(f, "unterminated quoted name starting at position {position}")
            }
            Self::UnexpectedToken { position, found } => {
                write!(f, "unexpected {found} at position {position}")
            }
            Self::UnexpectedEnd { position } => {
                write!(f, "formula ended unexpectedly at position {position}")
            }
            Self::InvalidNumber { position, text } => {
                write!(f, "invalid number `{text}` at position {position}")
            }
            Self::UndefinedProperty(name) => write!(f, "property `{name}` does not exist"),
            Self::NotApplicable {
                property,
                card_type,
            } => write!(
                f,
                "property `{property}` is not applicable to card type `{card_type}`"
            ),
            Self::UnsupportedOperand { property, kind } => write!(
                f,
                "property `{property}` is a {kind} property and cannot be used in a formula"
            ),
            Self::TypeMismatch { op, left, right } => match right {
                Some(right) => write!(
                    f,
                    "operator `{op}` is not supported between {} and {}",
                    type_label(*left),
                    type_label(*right)
                ),
                None => write!(f, "operator `{op}` is not supported for {}", type_label(*left)),
            },
            Self::CircularReference(name) => {
                write!(f, "formula `{name}` refers to itself")
            }
            Self::NestingTooDeep { position, limit } => {
                write!(f, "formula nests deeper than {limit} levels at position {position}")
            }
        }
    }
}

impl Error for FormulaError {}

fn type_label(value_type: ValueType) -> &'static str {
    match value_type {
        ValueType::Number => "numbers",
        ValueType::Date => "dates",
    }
}

/// Parsed formula keeping its source text for persistence and display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Formula {
    source: String,
    expr: Expr,
}

impl Formula {
    pub fn parse(source: impl Into<String>) -> FormulaResult<Self> {
        let source = source.into();
        let expr = parse_expression(&source)?;
        Ok(Self {
            source: source.trim().to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn referenced_names(&self) -> Vec<String> {
        self.expr.referenced_names()
    }

    /// Whether the expression names `property` (case-insensitive).
    pub fn references(&self, property: &str) -> bool {
        let wanted = property.trim();
        self.referenced_names()
            .iter()
            .any(|name| name.eq_ignore_ascii_case(wanted))
    }
}

impl TryFrom<String> for Formula {
    type Error = FormulaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Formula> for String {
    fn from(value: Formula) -> Self {
        value.source
    }
}

/// Validates a formula named `formula_name` for the given card types and
/// returns its result type.
///
/// # Errors
/// - Any referenced property is undefined, not applicable to one of
///   `card_types`, or not numeric/date/formula/aggregate.
/// - Operand types do not combine (`date + date`, `2 - date`, `date * 2`).
/// - The formula refers back to `formula_name`.
pub fn validate_formula(
    project: &ProjectState,
    formula_name: &str,
    formula: &Formula,
    card_types: &[CardTypeId],
) -> FormulaResult<ValueType> {
    for name in formula.referenced_names() {
        if name.eq_ignore_ascii_case(formula_name.trim()) {
            return Err(FormulaError::CircularReference(formula_name.trim().to_string()));
        }
        let property = project
            .property_by_name(&name)
            .ok_or_else(|| FormulaError::UndefinedProperty(name.clone()))?;
        for card_type in card_types {
            if !project.is_applicable(property.id, *card_type) {
                return Err(FormulaError::NotApplicable {
                    property: property.name.clone(),
                    card_type: project.card_type_name(*card_type),
                });
            }
        }
    }

    let mut resolving = vec![formula_name.trim().to_string()];
    infer_type(project, formula.expr(), &mut resolving)
}

/// Result type of an existing formula property, following nested formulas.
pub fn output_type(project: &ProjectState, formula_name: &str) -> FormulaResult<ValueType> {
    let mut resolving = Vec::new();
    property_type(project, formula_name, &mut resolving)
}

fn infer_type(
    project: &ProjectState,
    expr: &Expr,
    resolving: &mut Vec<String>,
) -> FormulaResult<ValueType> {
    match expr {
        Expr::Literal(_) => Ok(ValueType::Number),
        Expr::Property(name) => property_type(project, name, resolving),
        Expr::Negate(inner) => match infer_type(project, inner, resolving)? {
            ValueType::Number => Ok(ValueType::Number),
            other => Err(FormulaError::TypeMismatch {
                op: '-',
                left: other,
                right: None,
            }),
        },
        Expr::Binary { op, left, right } => {
            let left = infer_type(project, left, resolving)?;
            let right = infer_type(project, right, resolving)?;
            combine_types(*op, left, right)
        }
    }
}

fn property_type(
    project: &ProjectState,
    name: &str,
    resolving: &mut Vec<String>,
) -> FormulaResult<ValueType> {
    let property = project
        .property_by_name(name)
        .ok_or_else(|| FormulaError::UndefinedProperty(name.to_string()))?;
    match &property.kind {
        PropertyKind::NumericFreeText
        | PropertyKind::Enumerated { numeric: true, .. }
        | PropertyKind::Aggregate { .. } => Ok(ValueType::Number),
        PropertyKind::Date => Ok(ValueType::Date),
        PropertyKind::Formula { formula } => {
            if resolving
                .iter()
                .any(|seen| seen.eq_ignore_ascii_case(&property.name))
            {
                let origin = resolving.first().cloned().unwrap_or_else(|| property.name.clone());
                return Err(FormulaError::CircularReference(origin));
            }
            resolving.push(property.name.clone());
            let result = infer_type(project, formula.expr(), resolving);
            resolving.pop();
            result
        }
        _ => Err(FormulaError::UnsupportedOperand {
            property: property.name.clone(),
            kind: property.kind().as_str(),
        }),
    }
}

/// Result type of `left op right`, or a mismatch error.
pub fn combine_types(op: BinaryOp, left: ValueType, right: ValueType) -> FormulaResult<ValueType> {
    use ValueType::{Date, Number};
    match (op, left, right) {
        (_, Number, Number) => Ok(Number),
        (BinaryOp::Add, Date, Number) | (BinaryOp::Add, Number, Date) => Ok(Date),
        (BinaryOp::Subtract, Date, Number) => Ok(Date),
        (BinaryOp::Subtract, Date, Date) => Ok(Number),
        _ => Err(FormulaError::TypeMismatch {
            op: op.symbol(),
            left,
            right: Some(right),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{combine_types, BinaryOp, Formula, FormulaError};
    use crate::model::value::ValueType;

    #[test]
    fn formula_round_trips_through_its_source() {
        let formula = Formula::parse("  3 * 'dev size' ").unwrap();
        assert_eq!(formula.source(), "3 * 'dev size'");
        assert!(formula.references("Dev Size"));
        let json = serde_json::to_string(&formula).unwrap();
        assert_eq!(json, r#""3 * 'dev size'""#);
        let restored: Formula = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, formula);
    }

    #[test]
    fn date_arithmetic_type_rules() {
        assert_eq!(
            combine_types(BinaryOp::Add, ValueType::Number, ValueType::Date).unwrap(),
            ValueType::Date
        );
        assert_eq!(
            combine_types(BinaryOp::Subtract, ValueType::Date, ValueType::Date).unwrap(),
            ValueType::Number
        );
        assert!(matches!(
            combine_types(BinaryOp::Add, ValueType::Date, ValueType::Date),
            Err(FormulaError::TypeMismatch { op: '+', .. })
        ));
        assert!(combine_types(BinaryOp::Subtract, ValueType::Number, ValueType::Date).is_err());
        assert!(combine_types(BinaryOp::Multiply, ValueType::Date, ValueType::Number).is_err());
    }
}
