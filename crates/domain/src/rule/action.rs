//! Action — one step of a rule's action list.

use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::error::ValidationError;

fn default_notify_channel() -> String {
    "notify".to_string()
}

/// Value of a write action, either literal or rendered from a template.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSource<'a> {
    Literal(&'a serde_json::Value),
    Template(&'a str),
}

/// A side-effecting step executed when a rule runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "service", rename_all = "snake_case")]
pub enum Action {
    /// Write an item value directly, bypassing output wiring.
    SetItem {
        item_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value_template: Option<String>,
    },
    /// Send a command through the item's output wiring.
    Command {
        item_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value_template: Option<String>,
    },
    /// Render a message and write it to the rule audit log.
    Log {
        #[serde(alias = "data")]
        message: String,
    },
    /// Render a message and enqueue it on a notification channel.
    Notify {
        #[serde(default = "default_notify_channel")]
        channel: String,
        message: String,
    },
    /// Suspend the action list.
    Delay { seconds: f64 },
    /// Stop the remaining actions when the condition is false.
    Condition { condition: Condition },
}

impl Action {
    /// Check that write actions carry a value or a template.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MissingValue`] when neither is set.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::SetItem {
                value: None,
                value_template: None,
                ..
            } => Err(ValidationError::MissingValue { action: "set_item" }),
            Self::Command {
                value: None,
                value_template: None,
                ..
            } => Err(ValidationError::MissingValue { action: "command" }),
            _ => Ok(()),
        }
    }

    /// Where the value of a write action comes from. A template wins over a literal.
    #[must_use]
    pub fn value_source(&self) -> Option<ValueSource<'_>> {
        match self {
            Self::SetItem {
                value,
                value_template,
                ..
            }
            | Self::Command {
                value,
                value_template,
                ..
            } => value_template
                .as_deref()
                .map(ValueSource::Template)
                .or_else(|| value.as_ref().map(ValueSource::Literal)),
            _ => None,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SetItem { item_id, .. } => write!(f, "set_item({item_id})"),
            Self::Command { item_id, .. } => write!(f, "command({item_id})"),
            Self::Log { .. } => f.write_str("log"),
            Self::Notify { channel, .. } => write!(f, "notify({channel})"),
            Self::Delay { seconds } => write!(f, "delay({seconds}s)"),
            Self::Condition { condition } => write!(f, "condition({condition})"),
        }
    }
}
