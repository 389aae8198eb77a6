//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into [`HubError`]
//! via `#[from]` (domain errors) or by boxing itself (adapter errors).

use crate::cron::CronError;

/// Base error for every fallible operation in itemhub.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// A definition violates a domain invariant.
    #[error("validation error")]
    Validation(#[from] ValidationError),

    /// An operation referenced an item name that is not registered.
    #[error(transparent)]
    UnknownItem(#[from] UnknownItemError),

    /// A raw input could not be converted to the item's type.
    #[error(transparent)]
    InvalidValue(#[from] InvalidValueError),

    /// Two item definitions share the same name.
    #[error(transparent)]
    DuplicateItem(#[from] DuplicateItemError),

    /// Snapshot persistence failed.
    #[error("storage error")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A device connector failed to talk to its device (transient).
    #[error("actor error")]
    Actor(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A message or value template failed to render.
    #[error("template error")]
    Template(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Invariant violations detected when building definitions.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("name must not be empty")]
    EmptyName,

    #[error("rule has no actions")]
    NoActions,

    #[error("select item has no choices")]
    NoChoices,

    #[error("{action} action needs either `value` or `value_template`")]
    MissingValue { action: &'static str },

    #[error("invalid schedule `{schedule}`")]
    InvalidSchedule {
        schedule: String,
        #[source]
        source: CronError,
    },
}

#[derive(Debug, thiserror::Error)]
#[error("unknown item `{name}`")]
pub struct UnknownItemError {
    pub name: String,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid value {value} for item `{item}`: {reason}")]
pub struct InvalidValueError {
    pub item: String,
    pub value: serde_json::Value,
    pub reason: &'static str,
}

#[derive(Debug, thiserror::Error)]
#[error("item `{name}` is already registered")]
pub struct DuplicateItemError {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_display_unknown_item_with_name() {
        let err: HubError = UnknownItemError {
            name: "lamp".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "unknown item `lamp`");
    }

    #[test]
    fn should_convert_validation_error_into_hub_error() {
        let err: HubError = ValidationError::NoActions.into();
        assert!(matches!(err, HubError::Validation(ValidationError::NoActions)));
    }

    #[test]
    fn should_render_invalid_value_reason() {
        let err = InvalidValueError {
            item: "temp".to_string(),
            value: serde_json::json!("warm"),
            reason: "not a number",
        };
        assert_eq!(
            err.to_string(),
            "invalid value \"warm\" for item `temp`: not a number"
        );
    }
}
