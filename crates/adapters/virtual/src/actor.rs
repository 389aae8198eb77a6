//! Simulated device actor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use itemhub_app::ports::{Actor, ActorContext};
use itemhub_domain::error::HubError;

use crate::config::VirtualConfig;
use crate::devices::DeviceBank;
use crate::error::VirtualError;

/// Actor backed by in-memory devices.
///
/// Items are wired with `input = { channel = "virtual", device = "<id>" }`.
/// Every poll reports the state of each wired device to its item; commands
/// (`{"device": "<id>", "value": ...}`) update the device state, which the
/// next poll reports back.
pub struct VirtualActor {
    channel: String,
    poll_interval: Duration,
    devices: DeviceBank,
    stop: watch::Sender<bool>,
}

impl VirtualActor {
    #[must_use]
    pub fn new(config: &VirtualConfig) -> Self {
        Self {
            channel: config.channel.clone(),
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            devices: DeviceBank::new(config.devices.clone()),
            stop: watch::Sender::new(false),
        }
    }

    /// Override the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Current state of a device.
    #[must_use]
    pub fn device_state(&self, device: &str) -> Option<serde_json::Value> {
        self.devices.get(device)
    }

    /// Change a device state from the outside, as a physical button would.
    pub fn set_device_state(&self, device: &str, state: serde_json::Value) {
        self.devices.set(device, state);
    }

    /// Report every wired device state to its item. Returns the number of
    /// items written.
    pub fn report(&self, ctx: &dyn ActorContext) -> usize {
        let mut reported = 0;
        for (item, input) in ctx.items_with_input(&self.channel) {
            let Some(device) = input.param_str("device") else {
                warn!(item = %item, "virtual input has no `device` parameter");
                continue;
            };
            let Some(state) = self.devices.get(device) else {
                debug!(item = %item, device = %device, "no state for virtual device");
                continue;
            };
            match ctx.set_item_value(&item, &state) {
                Ok(_) => reported += 1,
                Err(err) => warn!(item = %item, error = %err, "failed to report device state"),
            }
        }
        reported
    }
}

#[async_trait]
impl Actor for VirtualActor {
    fn name(&self) -> &str {
        &self.channel
    }

    async fn init(&self, ctx: &dyn ActorContext) -> Result<(), HubError> {
        let wired = ctx.items_with_input(&self.channel);
        for (item, input) in &wired {
            if let Some(device) = input.param_str("device")
                && self.devices.get(device).is_none()
            {
                warn!(item = %item, device = %device, "item wired to unconfigured virtual device");
            }
        }
        info!(channel = %self.channel, items = wired.len(), "virtual actor ready");
        Ok(())
    }

    async fn run(&self, ctx: Arc<dyn ActorContext>) -> Result<(), HubError> {
        let mut stop = self.stop.subscribe();
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            if *stop.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = stop.changed() => {}
                _ = interval.tick() => {
                    self.report(ctx.as_ref());
                }
            }
        }
        debug!(channel = %self.channel, "virtual actor stopped");
        Ok(())
    }

    async fn handle_command(&self, payload: serde_json::Value) -> Result<(), HubError> {
        let device = payload
            .get("device")
            .and_then(serde_json::Value::as_str)
            .ok_or(VirtualError::MissingField { field: "device" })?;
        let command = payload
            .get("value")
            .ok_or(VirtualError::MissingField { field: "value" })?;
        let state = self.devices.apply(device, command)?;
        debug!(device = %device, state = %state, "virtual device updated");
        Ok(())
    }

    fn stop(&self) {
        self.stop.send_replace(true);
    }
}

impl std::fmt::Debug for VirtualActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualActor")
            .field("channel", &self.channel)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itemhub_domain::item::{ChannelConfig, ItemValue};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingContext {
        wiring: Vec<(String, ChannelConfig)>,
        writes: Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl RecordingContext {
        fn wired(item: &str, device: &str) -> Self {
            Self {
                wiring: vec![(
                    item.to_string(),
                    ChannelConfig::new("virtual").with_param("device", device),
                )],
                ..Self::default()
            }
        }

        fn writes(&self) -> Vec<(String, serde_json::Value)> {
            self.writes.lock().unwrap().clone()
        }
    }

    impl ActorContext for RecordingContext {
        fn set_item_value(&self, name: &str, value: &serde_json::Value) -> Result<bool, HubError> {
            self.writes
                .lock()
                .unwrap()
                .push((name.to_string(), value.clone()));
            Ok(true)
        }

        fn get_item_value(&self, _name: &str) -> Option<ItemValue> {
            None
        }

        fn items_with_input(&self, channel: &str) -> Vec<(String, ChannelConfig)> {
            self.wiring
                .iter()
                .filter(|(_, input)| input.channel == channel)
                .cloned()
                .collect()
        }
    }

    fn actor() -> VirtualActor {
        VirtualActor::new(&VirtualConfig {
            devices: BTreeMap::from([("lamp-1".to_string(), json!("OFF"))]),
            ..VirtualConfig::default()
        })
    }

    #[test]
    fn should_use_channel_as_name() {
        assert_eq!(actor().name(), "virtual");
        assert!(actor().is_my_command("virtual"));
    }

    #[test]
    fn should_report_device_state_to_wired_item() {
        let actor = actor();
        let ctx = RecordingContext::wired("lamp", "lamp-1");

        assert_eq!(actor.report(&ctx), 1);
        assert_eq!(ctx.writes(), vec![("lamp".to_string(), json!("OFF"))]);
    }

    #[test]
    fn should_skip_item_wired_to_unknown_device() {
        let actor = actor();
        let ctx = RecordingContext::wired("lamp", "ghost");
        assert_eq!(actor.report(&ctx), 0);
    }

    #[tokio::test]
    async fn should_update_device_on_command() {
        let actor = actor();
        actor
            .handle_command(json!({"device": "lamp-1", "value": "toggle"}))
            .await
            .unwrap();
        assert_eq!(actor.device_state("lamp-1"), Some(json!("ON")));
    }

    #[tokio::test]
    async fn should_reject_command_without_device() {
        let actor = actor();
        let result = actor.handle_command(json!({"value": "ON"})).await;
        assert!(matches!(result, Err(HubError::Actor(_))));
    }

    #[tokio::test]
    async fn should_stop_run_loop_when_stopped() {
        let actor = Arc::new(actor().with_poll_interval(Duration::from_millis(10)));
        let ctx: Arc<dyn ActorContext> = Arc::new(RecordingContext::wired("lamp", "lamp-1"));
        let runner = {
            let actor = Arc::clone(&actor);
            tokio::spawn(async move { actor.run(ctx).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        actor.stop();

        tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
