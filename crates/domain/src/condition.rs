//! Condition — boolean gate evaluated when a rule fires.
//!
//! Conditions are evaluated against a live [`StateReader`] at the instant
//! of firing and are never cached. Missing item values make `state` and
//! `numeric_state` nodes false; malformed nodes surface as
//! [`ConditionError`] so the caller can log them and fail closed.

use std::collections::BTreeMap;

use chrono::Timelike;
use serde::{Deserialize, Serialize};

use crate::item::ItemValue;
use crate::time::minute_of_day;

/// Read access to item state used by condition and trigger evaluation.
pub trait StateReader {
    /// Current (fresh) value of the item, `None` if unknown.
    fn item_value(&self, name: &str) -> Option<ItemValue>;

    /// Seconds since the item last changed, `None` if it never changed.
    fn item_age(&self, _name: &str) -> Option<f64> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConditionError {
    #[error("unknown condition type")]
    UnknownKind,

    #[error("invalid time `{value}`, expected HH:MM")]
    InvalidTime { value: String },

    #[error("value of item `{item}` is not numeric")]
    NotNumeric { item: String },

    #[error("unknown operator `{operator}` in `{condition}` condition")]
    UnknownOperator {
        condition: &'static str,
        operator: String,
    },

    #[error("`{condition}` condition has no bound")]
    MissingBound { condition: &'static str },
}

/// Expected value(s) of a `state` condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateMatch {
    Any(Vec<serde_json::Value>),
    One(serde_json::Value),
}

impl StateMatch {
    fn matches(&self, value: &ItemValue) -> bool {
        match self {
            Self::One(literal) => value.matches_literal(literal),
            Self::Any(literals) => literals.iter().any(|literal| value.matches_literal(literal)),
        }
    }
}

/// A node of a condition tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "condition_type", rename_all = "snake_case")]
pub enum Condition {
    /// Item value equals (or, with a list, is one of) the expected state.
    State {
        item_id: String,
        state: StateMatch,
        /// Invert the test.
        #[serde(default)]
        negate: bool,
    },
    /// Numeric-coerced item value lies strictly between the bounds.
    NumericState {
        item_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        above: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        below: Option<f64>,
        /// Keys that are not operators of this node.
        #[serde(flatten)]
        unknown: BTreeMap<String, serde_json::Value>,
    },
    /// Local minute of day within bounds, `HH:MM` strings.
    Time {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        after: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        before: Option<String>,
        /// Inclusive window; wraps past midnight when the start is later than the end.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        between: Option<(String, String)>,
        #[serde(flatten)]
        unknown: BTreeMap<String, serde_json::Value>,
    },
    And {
        conditions: Vec<Condition>,
    },
    Or {
        conditions: Vec<Condition>,
    },
    #[serde(other)]
    Unknown,
}

impl Condition {
    /// Evaluate the node against `reader`, using `local` as the wall-clock time.
    ///
    /// # Errors
    ///
    /// Returns [`ConditionError`] when the node (or any child) is malformed.
    pub fn evaluate<R, T>(&self, reader: &R, local: &T) -> Result<bool, ConditionError>
    where
        R: StateReader + ?Sized,
        T: Timelike,
    {
        match self {
            Self::State {
                item_id,
                state,
                negate,
            } => Ok(reader
                .item_value(item_id)
                .is_some_and(|value| state.matches(&value) != *negate)),
            Self::NumericState {
                item_id,
                above,
                below,
                unknown,
            } => {
                reject_unknown("numeric_state", unknown)?;
                if above.is_none() && below.is_none() {
                    return Err(ConditionError::MissingBound {
                        condition: "numeric_state",
                    });
                }
                let Some(value) = reader.item_value(item_id) else {
                    return Ok(false);
                };
                let number = value.as_number().ok_or_else(|| ConditionError::NotNumeric {
                    item: item_id.clone(),
                })?;
                Ok(above.is_none_or(|bound| number > bound) && below.is_none_or(|bound| number < bound))
            }
            Self::Time {
                after,
                before,
                between,
                unknown,
            } => {
                reject_unknown("time", unknown)?;
                if after.is_none() && before.is_none() && between.is_none() {
                    return Err(ConditionError::MissingBound { condition: "time" });
                }
                let minute = minute_of_day(local);
                if let Some(after) = after
                    && minute < parse_minute(after)?
                {
                    return Ok(false);
                }
                if let Some(before) = before
                    && minute > parse_minute(before)?
                {
                    return Ok(false);
                }
                if let Some((start, end)) = between {
                    let (start, end) = (parse_minute(start)?, parse_minute(end)?);
                    let inside = if start < end {
                        (start..=end).contains(&minute)
                    } else {
                        minute > start || minute < end
                    };
                    if !inside {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::And { conditions } => {
                for condition in conditions {
                    if !condition.evaluate(reader, local)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Or { conditions } => {
                for condition in conditions {
                    if condition.evaluate(reader, local)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Unknown => Err(ConditionError::UnknownKind),
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::State {
                item_id, negate, ..
            } => {
                if *negate {
                    write!(f, "not_state({item_id})")
                } else {
                    write!(f, "state({item_id})")
                }
            }
            Self::NumericState { item_id, .. } => write!(f, "numeric_state({item_id})"),
            Self::Time { .. } => f.write_str("time"),
            Self::And { conditions } => write!(f, "and({})", conditions.len()),
            Self::Or { conditions } => write!(f, "or({})", conditions.len()),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

fn reject_unknown(
    condition: &'static str,
    unknown: &BTreeMap<String, serde_json::Value>,
) -> Result<(), ConditionError> {
    match unknown.keys().next() {
        Some(operator) => Err(ConditionError::UnknownOperator {
            condition,
            operator: operator.clone(),
        }),
        None => Ok(()),
    }
}

fn parse_minute(raw: &str) -> Result<u32, ConditionError> {
    let invalid = || ConditionError::InvalidTime {
        value: raw.to_string(),
    };
    let (hour, minute) = raw.trim().split_once(':').ok_or_else(invalid)?;
    let hour: u32 = hour.parse().map_err(|_| invalid())?;
    let minute: u32 = minute.parse().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    Ok(hour * 60 + minute)
}
