//! Actor port — the contract every device connector satisfies.
//!
//! An actor bridges an external protocol (virtual devices, MQTT, HTTP
//! polling, chat notifications…) into the hub. It feeds item values in
//! through an [`ActorContext`] and receives outbound commands addressed
//! to its channel. The engine never depends on anything beyond this trait.
//!
//! The binary drives the lifecycle in order:
//!
//! 1. [`init`](Actor::init) — fast, non-blocking initialisation
//! 2. [`run`](Actor::run) — long-running poll/stream loop, spawned as a task
//! 3. [`handle_command`](Actor::handle_command) — called by the command pump,
//!    one command at a time per actor
//! 4. [`stop`](Actor::stop) — signal shutdown; must not block

use std::sync::Arc;

use async_trait::async_trait;
use itemhub_domain::error::HubError;
use itemhub_domain::item::{ChannelConfig, ItemValue};

/// What the hub exposes to actors.
pub trait ActorContext: Send + Sync {
    /// Report a value read from a device.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::UnknownItem`] if no item has this name.
    fn set_item_value(&self, name: &str, value: &serde_json::Value) -> Result<bool, HubError>;

    /// Current (fresh) value of an item.
    fn get_item_value(&self, name: &str) -> Option<ItemValue>;

    /// Items whose input is wired to `channel`, with their wiring.
    fn items_with_input(&self, channel: &str) -> Vec<(String, ChannelConfig)>;
}

/// A pluggable device connector.
#[async_trait]
pub trait Actor: Send + Sync {
    /// Unique name identifying this actor (e.g. `"virtual"`).
    fn name(&self) -> &str;

    /// Initialise before the run loop starts.
    async fn init(&self, _ctx: &dyn ActorContext) -> Result<(), HubError> {
        Ok(())
    }

    /// Poll or stream device state until [`stop`](Self::stop) is called.
    async fn run(&self, ctx: Arc<dyn ActorContext>) -> Result<(), HubError>;

    /// Whether outbound commands on `channel` belong to this actor.
    fn is_my_command(&self, channel: &str) -> bool {
        channel == self.name()
    }

    /// Deliver one outbound command to the device.
    ///
    /// Failures are transient: they are logged by the caller and the actor
    /// keeps running.
    async fn handle_command(&self, payload: serde_json::Value) -> Result<(), HubError>;

    /// Build the protocol payload for an item command.
    ///
    /// The default merges the output wiring parameters with the value.
    fn format_simple_command(
        &self,
        output: &ChannelConfig,
        value: &serde_json::Value,
    ) -> serde_json::Value {
        let mut payload = output.params.clone();
        payload.insert("value".to_string(), value.clone());
        serde_json::Value::Object(payload)
    }

    /// Signal graceful shutdown.
    fn stop(&self);
}
