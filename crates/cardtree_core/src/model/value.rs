//! Stored property values and evaluated formula values.

use crate::model::card::CardId;
use crate::model::property::EnumValueId;
use crate::numeric::{display_number, Number};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Display format used for date property values.
pub const DATE_DISPLAY_FORMAT: &str = "%d %b %Y";

/// Value persisted on a card or in a dependent record.
///
/// Managed values are referenced by stable enumeration id, never by position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    /// Managed enumeration value.
    Enum(EnumValueId),
    /// Free text, including unmanaged numeric text and cached calculations.
    Text(String),
    /// Calendar date.
    Date(NaiveDate),
    /// Card reference for card and tree relationships.
    Card(CardId),
}

impl PropertyValue {
    pub fn as_card(&self) -> Option<CardId> {
        match self {
            Self::Card(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }
}

/// Result type of formula evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Number,
    Date,
}

/// Evaluated (non-nil) formula or aggregate operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Number(Number),
    Date(NaiveDate),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Number(_) => ValueType::Number,
            Self::Date(_) => ValueType::Date,
        }
    }

    pub fn as_number(&self) -> Option<Number> {
        match self {
            Self::Number(number) => Some(*number),
            Self::Date(_) => None,
        }
    }

    /// Formats for display at the given project precision.
    pub fn display(&self, precision: u32) -> Option<String> {
        match self {
            Self::Number(number) => display_number(*number, precision),
            Self::Date(date) => Some(date.format(DATE_DISPLAY_FORMAT).to_string()),
        }
    }

    /// Converts to the representation cached on a card.
    pub fn to_stored(&self, precision: u32) -> Option<PropertyValue> {
        match self {
            Self::Number(number) => display_number(*number, precision).map(PropertyValue::Text),
            Self::Date(date) => Some(PropertyValue::Date(*date)),
        }
    }
}

/// One property read on one card, shaped by the property's kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardValue {
    Number(Number),
    Date(NaiveDate),
    Text(String),
    Card(CardId),
    /// Non-numeric managed value, ordered by position.
    Position(u32),
}

impl CardValue {
    /// Numbers and dates only; everything else is not arithmetic.
    pub fn arithmetic(&self) -> Option<Value> {
        match self {
            Self::Number(number) => Some(Value::Number(*number)),
            Self::Date(date) => Some(Value::Date(*date)),
            _ => None,
        }
    }
}

impl From<Value> for CardValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Number(number) => Self::Number(number),
            Value::Date(date) => Self::Date(date),
        }
    }
}

/// Parses user-entered date text (`2009-12-20` or `20 Dec 2009`).
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, DATE_DISPLAY_FORMAT))
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%d/%m/%Y"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::{parse_date, PropertyValue, Value};
    use crate::numeric::Number;
    use chrono::NaiveDate;

    #[test]
    fn parses_supported_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2009, 12, 20);
        assert_eq!(parse_date("2009-12-20"), expected);
        assert_eq!(parse_date("20 Dec 2009"), expected);
        assert_eq!(parse_date("20/12/2009"), expected);
        assert_eq!(parse_date("tomorrow"), None);
    }

    #[test]
    fn numbers_are_cached_as_trimmed_text() {
        let value = Value::Number(Number::parse("16.00").unwrap());
        assert_eq!(value.to_stored(2), Some(PropertyValue::Text("16".to_string())));
    }

    #[test]
    fn stored_values_serialize_with_kind_tag() {
        let json = serde_json::to_string(&PropertyValue::Text("3".to_string())).unwrap();
        assert_eq!(json, r#"{"kind":"text","value":"3"}"#);
    }
}
