//! Numeric value normalization.
//!
//! # Responsibility
//! - Provide exact arithmetic for formula and aggregate evaluation.
//! - Canonicalize numeric text to a project precision.
//! - Identify equivalent representations (`1.0` vs `1.00`).
//!
//! # Invariants
//! - Stored numeric text is never padded to a higher precision.
//! - Rounding is half away from zero everywhere in the crate.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod normalize;
pub mod number;

pub use normalize::{
    display_number, equivalent, fractional_digits, make_uniq, merge_plan, normalize,
    parse_numeric, trim_trailing_zeros,
};
pub use number::Number;

pub type NumericResult<T> = Result<T, NumericError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NumericError {
    /// Input text is not a plain decimal number.
    NotANumber(String),
    /// Requested precision is outside the configured range.
    PrecisionOutOfRange { requested: i64, max: u32 },
}

impl Display for NumericError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotANumber(value) => write!(f, "`{value}` is not a number"),
            Self::PrecisionOutOfRange { requested, max } => write!(
                f,
                "precision {requested} is out of range; expected 0..={max}"
            ),
        }
    }
}

impl Error for NumericError {}

/// Validates a requested precision against the configured maximum.
pub fn validate_precision(requested: i64, max: u32) -> NumericResult<u32> {
    match u32::try_from(requested) {
        Ok(value) if value <= max => Ok(value),
        _ => Err(NumericError::PrecisionOutOfRange { requested, max }),
    }
}
