//! Item values — the normalized content of an item after type conversion.

use serde::{Deserialize, Serialize};

/// Two-position state held by switch items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SwitchState {
    On,
    Off,
}

impl SwitchState {
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::On => Self::Off,
            Self::Off => Self::On,
        }
    }
}

impl std::fmt::Display for SwitchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::On => f.write_str("ON"),
            Self::Off => f.write_str("OFF"),
        }
    }
}

/// A converted item value.
///
/// Every value stored in an item went through the item's type conversion,
/// so the variant always agrees with the item kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ItemValue {
    Switch(SwitchState),
    Number(f64),
    Text(String),
    /// Unix timestamp in seconds.
    Date(i64),
    /// One of the canonical choices of a select item.
    Choice(String),
}

impl ItemValue {
    /// JSON form used in templates and snapshots.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Switch(state) => serde_json::Value::String(state.to_string()),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Text(s) | Self::Choice(s) => serde_json::Value::String(s.clone()),
            Self::Date(ts) => serde_json::Value::from(*ts),
        }
    }

    /// Numeric view of the value, if it has one.
    ///
    /// Text values are coerced with [`parse_numeric`]; switches are never numeric.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Date(ts) => Some(*ts as f64),
            Self::Text(s) | Self::Choice(s) => parse_numeric(s),
            Self::Switch(_) => None,
        }
    }

    /// Compare against a literal taken from a rule definition.
    ///
    /// Switch and choice values compare case-insensitively, numbers and
    /// dates numerically, text exactly.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn matches_literal(&self, literal: &serde_json::Value) -> bool {
        match (self, literal) {
            (Self::Switch(state), serde_json::Value::Bool(b)) => {
                *state == if *b { SwitchState::On } else { SwitchState::Off }
            }
            (Self::Switch(state), serde_json::Value::String(s)) => {
                state.to_string().eq_ignore_ascii_case(s.trim())
            }
            (Self::Number(_) | Self::Date(_), serde_json::Value::Number(n)) => {
                n.as_f64() == self.as_number()
            }
            (Self::Number(_) | Self::Date(_), serde_json::Value::String(s)) => {
                parse_numeric(s).is_some_and(|n| Some(n) == self.as_number())
            }
            (Self::Choice(choice), serde_json::Value::String(s)) => choice.eq_ignore_ascii_case(s),
            (Self::Text(text), serde_json::Value::String(s)) => text == s,
            (Self::Text(text), serde_json::Value::Number(n)) => *text == n.to_string(),
            (Self::Text(text), serde_json::Value::Bool(b)) => *text == b.to_string(),
            _ => false,
        }
    }
}

impl std::fmt::Display for ItemValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Switch(state) => state.fmt(f),
            Self::Number(n) => n.fmt(f),
            Self::Text(s) | Self::Choice(s) => f.write_str(s),
            Self::Date(ts) => ts.fmt(f),
        }
    }
}

/// Parse a numeric string the way conditions coerce item values.
///
/// A `.` marks a float, a `,` marks a float with comma as decimal
/// separator, anything else must be an integer.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn parse_numeric(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.contains('.') {
        raw.parse().ok()
    } else if raw.contains(',') {
        raw.replace(',', ".").parse().ok()
    } else {
        raw.parse::<i64>().ok().map(|n| n as f64)
    }
}
