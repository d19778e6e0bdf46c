//! Formula evaluation for one card.
//!
//! # Invariants
//! - Arithmetic is exact until a date result forces rounding of the day
//!   offset (half away from zero), once per finished expression.
//! - Any nil operand, division by zero or overflow yields nil.

use super::parser::{BinaryOp, Expr};
use super::Formula;
use crate::model::card::CardId;
use crate::model::project::ProjectState;
use crate::model::property::PropertyDefinition;
use crate::model::value::Value;
use crate::numeric::Number;
use chrono::{Days, NaiveDate};

/// Nested formula references deeper than this evaluate to nil.
const MAX_FORMULA_DEPTH: usize = 32;

/// Intermediate result. A date keeps its day offset exact until the
/// expression is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exact {
    Number(Number),
    Date { base: NaiveDate, offset: Number },
}

impl From<Value> for Exact {
    fn from(value: Value) -> Self {
        match value {
            Value::Number(number) => Self::Number(number),
            Value::Date(base) => Self::Date {
                base,
                offset: Number::from_integer(0),
            },
        }
    }
}

impl Exact {
    /// Rounds a pending day offset half away from zero.
    fn finish(self) -> Option<Value> {
        match self {
            Self::Number(number) => Some(Value::Number(number)),
            Self::Date { base, offset } => shift_date(base, offset.round_to_integer()?).map(Value::Date),
        }
    }
}

/// Evaluates `formula` against `card`. Returns `None` for nil.
pub fn evaluate(project: &ProjectState, formula: &Formula, card: CardId) -> Option<Value> {
    eval_expr(project, formula.expr(), card, 0)?.finish()
}

/// Evaluates the formula property `property` as an operand of another
/// formula or an aggregate. Nested formulas are evaluated fresh, so results
/// never depend on recompute order.
pub(crate) fn evaluate_nested(
    project: &ProjectState,
    property: &PropertyDefinition,
    formula: &Formula,
    card: CardId,
    depth: usize,
) -> Option<Value> {
    if depth >= MAX_FORMULA_DEPTH {
        return None;
    }
    let stored_card = project.card(card)?;
    if !project.is_applicable(property.id, stored_card.card_type) {
        return None;
    }
    eval_expr(project, formula.expr(), card, depth + 1)?.finish()
}

fn eval_expr(project: &ProjectState, expr: &Expr, card: CardId, depth: usize) -> Option<Exact> {
    match expr {
        Expr::Literal(number) => Some(Exact::Number(*number)),
        Expr::Property(name) => project
            .property_by_name(name)?
            .value_at_depth(project, card, depth)?
            .arithmetic()
            .map(Exact::from),
        Expr::Negate(inner) => match eval_expr(project, inner, card, depth)? {
            Exact::Number(number) => number.checked_neg().map(Exact::Number),
            Exact::Date { .. } => None,
        },
        Expr::Binary { op, left, right } => {
            let left = eval_expr(project, left, card, depth)?;
            let right = eval_expr(project, right, card, depth)?;
            combine(*op, left, right)
        }
    }
}

fn combine(op: BinaryOp, left: Exact, right: Exact) -> Option<Exact> {
    use Exact::{Date, Number as Num};
    match (op, left, right) {
        (BinaryOp::Add, Num(l), Num(r)) => l.checked_add(r).map(Num),
        (BinaryOp::Subtract, Num(l), Num(r)) => l.checked_sub(r).map(Num),
        (BinaryOp::Multiply, Num(l), Num(r)) => l.checked_mul(r).map(Num),
        (BinaryOp::Divide, Num(l), Num(r)) => l.checked_div(r).map(Num),
        (BinaryOp::Add, Date { base, offset }, Num(days))
        | (BinaryOp::Add, Num(days), Date { base, offset }) => Some(Date {
            base,
            offset: offset.checked_add(days)?,
        }),
        (BinaryOp::Subtract, Date { base, offset }, Num(days)) => Some(Date {
            base,
            offset: offset.checked_sub(days)?,
        }),
        (
            BinaryOp::Subtract,
            Date {
                base: left_base,
                offset: left_offset,
            },
            Date {
                base: right_base,
                offset: right_offset,
            },
        ) => {
            let days = Number::from_integer(left_base.signed_duration_since(right_base).num_days());
            days.checked_add(left_offset)?.checked_sub(right_offset).map(Num)
        }
        _ => None,
    }
}

/// Applies one operator to finished values. Type-invalid combinations
/// yield nil.
pub fn apply(op: BinaryOp, left: Value, right: Value) -> Option<Value> {
    combine(op, left.into(), right.into())?.finish()
}

fn shift_date(date: NaiveDate, days: i128) -> Option<NaiveDate> {
    let magnitude = u64::try_from(days.unsigned_abs()).ok()?;
    if days >= 0 {
        date.checked_add_days(Days::new(magnitude))
    } else {
        date.checked_sub_days(Days::new(magnitude))
    }
}
