//! In-process item event bus backed by a tokio broadcast channel.

use tokio::sync::broadcast;

use itemhub_domain::item::ItemValue;

/// A write that changed an item (or was forced).
#[derive(Debug, Clone, PartialEq)]
pub struct ItemChange {
    pub name: String,
    pub value: ItemValue,
    pub old_value: Option<ItemValue>,
    /// Seconds the previous value had been held, `None` if never changed.
    pub previous_age: Option<f64>,
}

/// Notifications emitted by every item write.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemEvent {
    /// The item was written, whether or not its value changed.
    Checked {
        name: String,
        changed: bool,
        value: Option<ItemValue>,
    },
    /// The value changed, or the write was forced.
    Changed(ItemChange),
}

/// In-process event bus using a tokio [`broadcast`] channel.
///
/// Publishing succeeds even when there are no active subscribers
/// (the event is simply dropped).
#[derive(Clone)]
pub struct ItemEventBus {
    sender: broadcast::Sender<ItemEvent>,
}

impl ItemEventBus {
    /// Create a new event bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events on this bus.
    ///
    /// Returns a receiver that will get all events published *after*
    /// the subscription is created.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ItemEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: ItemEvent) {
        // send fails only when nobody listens
        let _ = self.sender.send(event);
    }
}

impl std::fmt::Debug for ItemEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemEventBus")
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}
