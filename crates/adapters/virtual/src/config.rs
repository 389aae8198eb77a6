//! Virtual integration configuration.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Configuration for the simulated device actor.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VirtualConfig {
    pub enabled: bool,
    /// Channel the actor reads inputs from and accepts commands on.
    pub channel: String,
    /// Interval between two reports of device state to wired items, in seconds.
    pub poll_interval_secs: u64,
    /// Initial device states, keyed by device id.
    pub devices: BTreeMap<String, serde_json::Value>,
}

impl Default for VirtualConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel: "virtual".to_string(),
            poll_interval_secs: 5,
            devices: BTreeMap::new(),
        }
    }
}

/// Configuration for the notification sink.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub enabled: bool,
    pub channel: String,
    /// How many delivered notifications are kept in memory.
    pub history: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel: "notify".to_string(),
            history: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_apply_defaults_when_section_is_empty() {
        let config: VirtualConfig = toml::from_str("").unwrap();
        assert_eq!(config, VirtualConfig::default());
        assert_eq!(config.channel, "virtual");
    }

    #[test]
    fn should_parse_initial_device_states() {
        let config: VirtualConfig = toml::from_str(
            r#"
            poll_interval_secs = 1

            [devices]
            lamp-1 = "OFF"
            thermo-1 = 21.5
            "#,
        )
        .unwrap();
        assert_eq!(config.poll_interval_secs, 1);
        assert_eq!(config.devices["lamp-1"], serde_json::json!("OFF"));
        assert_eq!(config.devices["thermo-1"], serde_json::json!(21.5));
    }

    #[test]
    fn should_default_notify_channel() {
        let config: NotifyConfig = toml::from_str("history = 3").unwrap();
        assert_eq!(config.channel, "notify");
        assert_eq!(config.history, 3);
    }
}
