//! Exact decimal-rational number used by formulas, aggregates and the
//! precision normalizer.
//!
//! # Invariants
//! - `den > 0` and `gcd(|num|, den) == 1` for every constructed value.
//! - Arithmetic is checked: overflow and division by zero return `None`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

static DECIMAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([+-])?(\d*)(?:\.(\d*))?$").expect("valid decimal regex")
});

/// Upper bound on significant digits accepted by [`Number::parse`].
const MAX_PARSE_DIGITS: usize = 30;

/// Exact rational number backed by `i128` numerator/denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Number {
    num: i128,
    den: i128,
}

impl Number {
    pub const ZERO: Number = Number { num: 0, den: 1 };

    pub fn from_integer(value: i64) -> Self {
        Self {
            num: i128::from(value),
            den: 1,
        }
    }

    /// Builds a reduced rational, returning `None` for a zero denominator.
    pub fn from_ratio(num: i128, den: i128) -> Option<Self> {
        if den == 0 {
            return None;
        }
        let (num, den) = if den < 0 {
            (num.checked_neg()?, den.checked_neg()?)
        } else {
            (num, den)
        };
        let divisor = gcd(num.unsigned_abs(), den.unsigned_abs());
        let divisor = i128::try_from(divisor).ok()?;
        Some(Self {
            num: num / divisor,
            den: den / divisor,
        })
    }

    /// Parses a plain decimal literal such as `12`, `-0.50` or `.25`.
    ///
    /// Exponents, thousands separators and surrounding garbage are rejected.
    pub fn parse(text: &str) -> Option<Self> {
        let captures = DECIMAL_RE.captures(text.trim())?;
        let negative = captures.get(1).is_some_and(|sign| sign.as_str() == "-");
        let int_part = captures.get(2).map_or("", |m| m.as_str());
        let frac_part = captures.get(3).map_or("", |m| m.as_str());
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        if int_part.len() + frac_part.len() > MAX_PARSE_DIGITS {
            return None;
        }

        let digits = format!("{int_part}{frac_part}");
        let mut num: i128 = if digits.is_empty() {
            0
        } else {
            digits.parse().ok()?
        };
        if negative {
            num = -num;
        }
        let den = pow10(u32::try_from(frac_part.len()).ok()?)?;
        Self::from_ratio(num, den)
    }

    pub fn numerator(self) -> i128 {
        self.num
    }

    pub fn denominator(self) -> i128 {
        self.den
    }

    pub fn is_zero(self) -> bool {
        self.num == 0
    }

    pub fn is_integer(self) -> bool {
        self.den == 1
    }

    pub fn is_negative(self) -> bool {
        self.num < 0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        let num = self
            .num
            .checked_mul(other.den)?
            .checked_add(other.num.checked_mul(self.den)?)?;
        Self::from_ratio(num, self.den.checked_mul(other.den)?)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.checked_add(other.checked_neg()?)
    }

    pub fn checked_mul(self, other: Self) -> Option<Self> {
        Self::from_ratio(
            self.num.checked_mul(other.num)?,
            self.den.checked_mul(other.den)?,
        )
    }

    pub fn checked_div(self, other: Self) -> Option<Self> {
        if other.num == 0 {
            return None;
        }
        Self::from_ratio(
            self.num.checked_mul(other.den)?,
            self.den.checked_mul(other.num)?,
        )
    }

    pub fn checked_neg(self) -> Option<Self> {
        Some(Self {
            num: self.num.checked_neg()?,
            den: self.den,
        })
    }

    /// Rounds half away from zero to the nearest integer (`2.5 -> 3`, `-2.5 -> -3`).
    pub fn round_to_integer(self) -> Option<i128> {
        let quotient = self.num / self.den;
        let remainder = (self.num % self.den).checked_abs()?;
        if remainder.checked_mul(2)? >= self.den {
            if self.num < 0 {
                quotient.checked_sub(1)
            } else {
                quotient.checked_add(1)
            }
        } else {
            Some(quotient)
        }
    }

    /// Rounds half away from zero to `places` fractional digits.
    pub fn round_to_places(self, places: u32) -> Option<Self> {
        let scale = pow10(places)?;
        let scaled = Self::from_ratio(self.num.checked_mul(scale)?, self.den)?;
        Self::from_ratio(scaled.round_to_integer()?, scale)
    }

    /// Formats with exactly `places` fractional digits after rounding.
    pub fn to_fixed(self, places: u32) -> Option<String> {
        let scale = pow10(places)?;
        let scaled = Self::from_ratio(self.num.checked_mul(scale)?, self.den)?.round_to_integer()?;
        let sign = if scaled < 0 { "-" } else { "" };
        let magnitude = scaled.unsigned_abs();
        let scale = scale.unsigned_abs();
        let int_part = magnitude / scale;
        if places == 0 {
            return Some(format!("{sign}{int_part}"));
        }
        let frac_part = magnitude % scale;
        Some(format!(
            "{sign}{int_part}.{frac_part:0width$}",
            width = places as usize
        ))
    }

    /// Lossy conversion used only where exactness is not observable.
    pub fn to_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Number {
    fn cmp(&self, other: &Self) -> Ordering {
        match (
            self.num.checked_mul(other.den),
            other.num.checked_mul(self.den),
        ) {
            (Some(left), Some(right)) => left.cmp(&right),
            _ => self.to_f64().total_cmp(&other.to_f64()),
        }
    }
}

impl Display for Number {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.den == 1 {
            return write!(f, "{}", self.num);
        }
        write!(f, "{}/{}", self.num, self.den)
    }
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let next = a % b;
        a = b;
        b = next;
    }
    if a == 0 {
        1
    } else {
        a
    }
}

fn pow10(exp: u32) -> Option<i128> {
    10_i128.checked_pow(exp)
}

#[cfg(test)]
mod tests {
    use super::Number;

    fn n(text: &str) -> Number {
        Number::parse(text).expect("test literal should parse")
    }

    #[test]
    fn parses_plain_decimals() {
        assert_eq!(n("1.50"), Number::from_ratio(3, 2).unwrap());
        assert_eq!(n("-.25"), Number::from_ratio(-1, 4).unwrap());
        assert_eq!(n("+7"), Number::from_integer(7));
        assert!(Number::parse("1e3").is_none());
        assert!(Number::parse("abc").is_none());
        assert!(Number::parse(".").is_none());
        assert!(Number::parse("").is_none());
    }

    #[test]
    fn division_stays_exact_until_rounded() {
        let ratio = n("5").checked_div(n("2.32")).unwrap();
        assert_eq!(ratio, Number::from_ratio(125, 58).unwrap());
        assert_eq!(ratio.round_to_integer(), Some(2));
        assert_eq!(ratio.to_fixed(3).as_deref(), Some("2.155"));
    }

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(n("2.5").round_to_integer(), Some(3));
        assert_eq!(n("-2.5").round_to_integer(), Some(-3));
        assert_eq!(n("2.6").round_to_integer(), Some(3));
        assert_eq!(n("2.1").round_to_integer(), Some(2));
        assert_eq!(n("4.64").round_to_integer(), Some(5));
        assert_eq!(n("0.995").to_fixed(2).as_deref(), Some("1.00"));
        assert_eq!(n("-0.004").to_fixed(2).as_deref(), Some("0.00"));
    }

    #[test]
    fn division_by_zero_is_none() {
        assert!(n("1").checked_div(Number::ZERO).is_none());
    }

    #[test]
    fn orders_by_value() {
        assert!(n("1.10") > n("1.09"));
        assert_eq!(n("2.000").cmp(&n("2")), std::cmp::Ordering::Equal);
    }
}
