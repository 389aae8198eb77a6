//! Notification sink actor.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use itemhub_app::ports::{Actor, ActorContext};
use itemhub_domain::error::HubError;
use itemhub_domain::time::{self, Timestamp};

use crate::config::NotifyConfig;
use crate::error::VirtualError;

/// A delivered notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub at: Timestamp,
    pub rule: Option<String>,
    pub message: String,
}

/// Actor that logs `notify` commands and keeps a bounded history.
///
/// Stands in for a chat or messaging connector.
pub struct VirtualNotifier {
    channel: String,
    capacity: usize,
    history: Mutex<VecDeque<Notification>>,
    stop: watch::Sender<bool>,
}

impl VirtualNotifier {
    #[must_use]
    pub fn new(config: &NotifyConfig) -> Self {
        Self {
            channel: config.channel.clone(),
            capacity: config.history.max(1),
            history: Mutex::new(VecDeque::new()),
            stop: watch::Sender::new(false),
        }
    }

    /// Delivered notifications, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<Notification> {
        self.lock().iter().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Notification>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Actor for VirtualNotifier {
    fn name(&self) -> &str {
        &self.channel
    }

    async fn run(&self, _ctx: Arc<dyn ActorContext>) -> Result<(), HubError> {
        let mut stop = self.stop.subscribe();
        // nothing to poll
        let _ = stop.wait_for(|stopped| *stopped).await;
        Ok(())
    }

    async fn handle_command(&self, payload: serde_json::Value) -> Result<(), HubError> {
        let message = match &payload {
            serde_json::Value::String(message) => Some(message.clone()),
            other => match other.get("message") {
                Some(serde_json::Value::String(message)) => Some(message.clone()),
                Some(value) if !value.is_null() => Some(value.to_string()),
                _ => None,
            },
        }
        .ok_or(VirtualError::EmptyNotification)?;
        let rule = payload
            .get("rule")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        info!(target: "itemhub::notify", rule = ?rule, "{message}");

        let mut history = self.lock();
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(Notification {
            at: time::now(),
            rule,
            message,
        });
        Ok(())
    }

    fn stop(&self) {
        self.stop.send_replace(true);
    }
}

impl std::fmt::Debug for VirtualNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualNotifier")
            .field("channel", &self.channel)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
