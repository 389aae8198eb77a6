//! Virtual adapter error types.

use itemhub_domain::error::HubError;

/// Errors raised while handling commands for simulated devices.
#[derive(Debug, thiserror::Error)]
pub enum VirtualError {
    /// The command addresses a device that was never configured.
    #[error("unknown virtual device `{device}`")]
    UnknownDevice { device: String },

    /// The command payload lacks a required field.
    #[error("command payload has no `{field}` field")]
    MissingField { field: &'static str },

    /// The notification payload has no message.
    #[error("notification has no message")]
    EmptyNotification,
}

impl From<VirtualError> for HubError {
    fn from(err: VirtualError) -> Self {
        HubError::Actor(Box::new(err))
    }
}
