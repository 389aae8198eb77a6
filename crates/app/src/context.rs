//! Context — the single synchronization boundary around the item store.
//!
//! Every item write funnels through [`Context::set_item_value`], which
//! serializes store access, publishes `Checked`/`Changed` events on the
//! [`ItemEventBus`] and never holds the store lock across an await.
//! Item commands are routed through the output wiring of the item to the
//! bounded outbound command queue drained by the command pump.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use itemhub_domain::error::{HubError, UnknownItemError};
use itemhub_domain::item::{
    ChannelConfig, ItemStore, ItemValue, ItemView, PersistedItem, RestoreOutcome, StoreReader,
    ValueUpdate,
};
use itemhub_domain::time::{self, Timestamp};

use crate::event_bus::{ItemChange, ItemEvent, ItemEventBus};
use crate::ports::{Actor, ActorContext};

/// An entry of the outbound command queue.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundCommand {
    pub channel: String,
    pub payload: serde_json::Value,
}

/// Mediator owning the item store and the outbound command queue.
pub struct Context {
    store: Mutex<ItemStore>,
    bus: ItemEventBus,
    commands: mpsc::Sender<OutboundCommand>,
    actors: RwLock<Vec<Arc<dyn Actor>>>,
}

impl Context {
    /// Create a context around a populated store.
    #[must_use]
    pub fn new(store: ItemStore, bus: ItemEventBus, commands: mpsc::Sender<OutboundCommand>) -> Self {
        Self {
            store: Mutex::new(store),
            bus,
            commands,
            actors: RwLock::new(Vec::new()),
        }
    }

    /// Make an actor available for formatting item commands.
    pub fn register_actor(&self, actor: Arc<dyn Actor>) {
        self.actors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(actor);
    }

    /// Subscribe to item events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ItemEvent> {
        self.bus.subscribe()
    }

    /// Write an item value.
    ///
    /// Publishes a `Checked` event on every accepted write and a `Changed`
    /// event when the value changed or `force` is set. An input that does
    /// not convert is logged and reported as "no change".
    ///
    /// # Errors
    ///
    /// Returns [`HubError::UnknownItem`] if no item has this name.
    pub fn set_item_value(
        &self,
        name: &str,
        raw: &serde_json::Value,
        force: bool,
    ) -> Result<bool, HubError> {
        let now = time::now();
        let update = match self.lock_store().set_item_value(name, raw, now) {
            Ok(update) => update,
            Err(HubError::UnknownItem(err)) => {
                error!(item = %name, "not found item");
                return Err(err.into());
            }
            Err(HubError::InvalidValue(err)) => {
                warn!(item = %name, error = %err, "ignoring invalid value");
                return Ok(false);
            }
            Err(err) => return Err(err),
        };
        let ValueUpdate {
            old: old_value,
            new: value,
            previous_age,
            changed,
        } = update;

        if changed {
            info!(
                target: "itemhub::items",
                item = %name,
                from = %display_value(old_value.as_ref()),
                to = %display_value(value.as_ref()),
                "item changed"
            );
        }

        self.bus.publish(ItemEvent::Checked {
            name: name.to_string(),
            changed,
            value: value.clone(),
        });
        if let Some(value) = value
            && (changed || force)
        {
            self.bus.publish(ItemEvent::Changed(ItemChange {
                name: name.to_string(),
                value,
                old_value,
                previous_age,
            }));
        }
        Ok(changed)
    }

    /// Send a command to an item.
    ///
    /// With output wiring, the owning actor formats the payload and it is
    /// enqueued for the command pump; `fast_change` items are also written
    /// locally right away. Without wiring the command is a forced write.
    ///
    /// # Errors
    ///
    /// - [`HubError::UnknownItem`] if no item has this name
    /// - [`HubError::Actor`] if the command queue is closed
    #[tracing::instrument(skip(self, command))]
    pub async fn issue_item_command(
        &self,
        name: &str,
        command: &serde_json::Value,
    ) -> Result<(), HubError> {
        let wiring = {
            let store = self.lock_store();
            let Some(item) = store.get_item(name) else {
                error!(item = %name, "no item for command");
                return Err(UnknownItemError {
                    name: name.to_string(),
                }
                .into());
            };
            item.output().cloned().map(|output| (output, item.is_fast_change()))
        };

        let Some((output, fast_change)) = wiring else {
            info!(item = %name, value = %command, "directly set");
            self.set_item_value(name, command, true)?;
            return Ok(());
        };

        let payloads = self.format_for(&output, command);
        if payloads.is_empty() {
            warn!(item = %name, channel = %output.channel, "no actor for output channel");
        }
        for payload in payloads {
            info!(item = %name, channel = %output.channel, payload = %payload, "sending command");
            self.send(OutboundCommand {
                channel: output.channel.clone(),
                payload,
            })
            .await?;
        }

        if fast_change {
            debug!(item = %name, value = %command, "fast change");
            self.set_item_value(name, command, false)?;
        }
        Ok(())
    }

    /// Enqueue a raw command addressed to a channel rather than an item.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Actor`] if the command queue is closed.
    pub async fn enqueue_external_command(
        &self,
        channel: &str,
        payload: serde_json::Value,
    ) -> Result<(), HubError> {
        info!(channel = %channel, "external command");
        self.send(OutboundCommand {
            channel: channel.to_string(),
            payload,
        })
        .await
    }

    /// Current (fresh) value of an item.
    #[must_use]
    pub fn get_item_value(&self, name: &str) -> Option<ItemValue> {
        self.lock_store().value_at(name, time::now())
    }

    /// Item listing sorted by name, optionally filtered by tag.
    #[must_use]
    pub fn list_items(&self, tag: Option<&str>) -> Vec<ItemView> {
        self.lock_store().list_items(tag, time::now())
    }

    /// Current value of every item as JSON, `null` when unknown.
    #[must_use]
    pub fn item_values(&self) -> BTreeMap<String, serde_json::Value> {
        let now = time::now();
        self.lock_store()
            .iter()
            .map(|item| {
                let value = item
                    .value_at(now)
                    .map_or(serde_json::Value::Null, ItemValue::to_json);
                (item.name().to_string(), value)
            })
            .collect()
    }

    /// Run `f` against a consistent view of the store at `now`.
    pub fn with_reader<T>(&self, now: Timestamp, f: impl FnOnce(&StoreReader<'_>) -> T) -> T {
        let store = self.lock_store();
        f(&store.reader(now))
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<PersistedItem> {
        self.lock_store().snapshot()
    }

    /// Restore a snapshot without emitting events.
    pub fn restore(&self, snapshot: &[PersistedItem]) -> RestoreOutcome {
        let outcome = self.lock_store().restore(snapshot);
        for name in &outcome.unknown {
            debug!(item = %name, "skipping snapshot entry for unknown item");
        }
        for name in &outcome.invalid {
            warn!(item = %name, "skipping snapshot entry that no longer converts");
        }
        info!(restored = outcome.restored, "restored item snapshot");
        outcome
    }

    fn format_for(&self, output: &ChannelConfig, command: &serde_json::Value) -> Vec<serde_json::Value> {
        self.actors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|actor| actor.is_my_command(&output.channel))
            .map(|actor| actor.format_simple_command(output, command))
            .collect()
    }

    async fn send(&self, command: OutboundCommand) -> Result<(), HubError> {
        self.commands
            .send(command)
            .await
            .map_err(|err| HubError::Actor(Box::new(err)))
    }

    fn lock_store(&self) -> std::sync::MutexGuard<'_, ItemStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ActorContext for Context {
    fn set_item_value(&self, name: &str, value: &serde_json::Value) -> Result<bool, HubError> {
        Context::set_item_value(self, name, value, false)
    }

    fn get_item_value(&self, name: &str) -> Option<ItemValue> {
        Context::get_item_value(self, name)
    }

    fn items_with_input(&self, channel: &str) -> Vec<(String, ChannelConfig)> {
        self.lock_store().items_with_input(channel)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

fn display_value(value: Option<&ItemValue>) -> String {
    value.map_or_else(|| "unknown".to_string(), ToString::to_string)
}
