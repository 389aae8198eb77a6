//! Item — a named, typed mutable cell fed by actors and rules.
//!
//! Every write goes through the item's type conversion, so the stored
//! [`ItemValue`] always matches the item [`ItemKind`]. Freshness is
//! governed by the item TTL: a value whose last check is older than the
//! TTL reads as unknown.

mod store;
mod value;

pub use store::{ItemStore, PersistedItem, RestoreOutcome, StoreReader, ValueUpdate};
pub use value::{ItemValue, SwitchState, parse_numeric};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::error::{HubError, InvalidValueError, ValidationError};
use crate::time::{Timestamp, seconds, to_local};

/// The type of an item, deciding how raw inputs are converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Switch,
    Number,
    Text,
    Date,
    Select,
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Switch => f.write_str("switch"),
            Self::Number => f.write_str("number"),
            Self::Text => f.write_str("text"),
            Self::Date => f.write_str("date"),
            Self::Select => f.write_str("select"),
        }
    }
}

/// Wiring between an item and an actor channel.
///
/// `channel` names the actor; the remaining keys are actor specific
/// (device address, register, topic…) and opaque to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub channel: String,
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl ChannelConfig {
    #[must_use]
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            params: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// String parameter lookup.
    #[must_use]
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(serde_json::Value::as_str)
    }
}

/// Declarative item definition as loaded from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<ChannelConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<ChannelConfig>,
    /// Seconds after the last check before the value reads as unknown. `0` disables.
    #[serde(default)]
    pub ttl: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u8>,
    #[serde(default)]
    pub choices: Vec<String>,
    #[serde(default)]
    pub fast_change: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ItemDefinition {
    /// Minimal definition with every optional field unset.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ItemKind) -> Self {
        Self {
            name: name.into(),
            kind,
            input: None,
            output: None,
            ttl: 0,
            tags: Vec::new(),
            default: None,
            decimals: None,
            choices: Vec::new(),
            fast_change: false,
            format: None,
            label: None,
        }
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Validation`] when:
    /// - `name` is empty ([`ValidationError::EmptyName`])
    /// - a select item declares no choices ([`ValidationError::NoChoices`])
    pub fn validate(&self) -> Result<(), HubError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        if self.kind == ItemKind::Select && self.choices.is_empty() {
            return Err(ValidationError::NoChoices.into());
        }
        Ok(())
    }
}

/// A registered item with its current state.
#[derive(Debug, Clone)]
pub struct Item {
    definition: ItemDefinition,
    raw: Option<ItemValue>,
    last_checked: Option<Timestamp>,
    last_changed: Option<Timestamp>,
}

impl Item {
    /// Build an item from its definition, applying the declared default.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Validation`] for an invalid definition and
    /// [`HubError::InvalidValue`] when the default does not convert.
    pub fn from_definition(definition: ItemDefinition, now: Timestamp) -> Result<Self, HubError> {
        definition.validate()?;
        let mut item = Self {
            definition,
            raw: None,
            last_checked: None,
            last_changed: None,
        };
        if let Some(default) = item.definition.default.clone() {
            item.set_value(&default, now)?;
        }
        Ok(item)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    #[must_use]
    pub fn kind(&self) -> ItemKind {
        self.definition.kind
    }

    #[must_use]
    pub fn definition(&self) -> &ItemDefinition {
        &self.definition
    }

    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.definition.tags
    }

    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.definition.tags.iter().any(|t| t == tag)
    }

    #[must_use]
    pub fn input(&self) -> Option<&ChannelConfig> {
        self.definition.input.as_ref()
    }

    #[must_use]
    pub fn output(&self) -> Option<&ChannelConfig> {
        self.definition.output.as_ref()
    }

    #[must_use]
    pub fn is_fast_change(&self) -> bool {
        self.definition.fast_change
    }

    /// Human readable name, falling back to the item name.
    #[must_use]
    pub fn label(&self) -> &str {
        self.definition
            .label
            .as_deref()
            .unwrap_or(&self.definition.name)
    }

    /// Latest converted value, ignoring the TTL.
    #[must_use]
    pub fn raw_value(&self) -> Option<&ItemValue> {
        self.raw.as_ref()
    }

    #[must_use]
    pub fn last_checked(&self) -> Option<Timestamp> {
        self.last_checked
    }

    #[must_use]
    pub fn last_changed(&self) -> Option<Timestamp> {
        self.last_changed
    }

    /// Whether the last check is recent enough for the value to be trusted.
    #[must_use]
    pub fn is_fresh_at(&self, now: Timestamp) -> bool {
        if self.definition.ttl == 0 {
            return true;
        }
        let ttl = i64::try_from(self.definition.ttl)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        self.last_checked
            .is_some_and(|checked| now.signed_duration_since(checked) <= ttl)
    }

    /// Current value, or `None` when unset or stale.
    #[must_use]
    pub fn value_at(&self, now: Timestamp) -> Option<&ItemValue> {
        if self.is_fresh_at(now) {
            self.raw.as_ref()
        } else {
            None
        }
    }

    /// Seconds since the last change, or `None` if the item never changed.
    #[must_use]
    pub fn age_at(&self, now: Timestamp) -> Option<f64> {
        self.last_changed
            .map(|changed| seconds(now.signed_duration_since(changed)))
    }

    /// Convert a raw input according to the item kind.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidValueError`] when the input does not fit the item type.
    pub fn convert(&self, raw: &serde_json::Value) -> Result<ItemValue, InvalidValueError> {
        let invalid = |reason: &'static str| InvalidValueError {
            item: self.definition.name.clone(),
            value: raw.clone(),
            reason,
        };
        if raw.is_null() {
            return Err(invalid("missing value"));
        }
        match self.definition.kind {
            ItemKind::Switch => {
                let input = plain_text(raw).to_lowercase();
                let state = match input.trim() {
                    "click" | "switch" => match &self.raw {
                        Some(ItemValue::Switch(current)) => current.toggled(),
                        // unknown toggles to OFF
                        _ => SwitchState::Off,
                    },
                    "on" | "true" | "1" | "open" => SwitchState::On,
                    _ => SwitchState::Off,
                };
                Ok(ItemValue::Switch(state))
            }
            ItemKind::Number => {
                let number = match raw {
                    serde_json::Value::Number(n) => n.as_f64(),
                    serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                }
                .ok_or_else(|| invalid("not a number"))?;
                if !number.is_finite() {
                    return Err(invalid("not a finite number"));
                }
                Ok(ItemValue::Number(match self.definition.decimals {
                    Some(decimals) => round_to(number, decimals),
                    None => number,
                }))
            }
            ItemKind::Text => Ok(ItemValue::Text(plain_text(raw))),
            ItemKind::Date => parse_timestamp(raw)
                .map(ItemValue::Date)
                .ok_or_else(|| invalid("not a timestamp")),
            ItemKind::Select => {
                let input = plain_text(raw);
                self.definition
                    .choices
                    .iter()
                    .find(|choice| choice.eq_ignore_ascii_case(input.trim()))
                    .map(|choice| ItemValue::Choice(choice.clone()))
                    .ok_or_else(|| invalid("not one of the item choices"))
            }
        }
    }

    /// Convert and store a raw input, returning whether the value changed.
    ///
    /// The check time is updated on every successful conversion; the
    /// change time only when the stored value differs.
    pub(crate) fn set_value(
        &mut self,
        raw: &serde_json::Value,
        now: Timestamp,
    ) -> Result<bool, InvalidValueError> {
        let value = self.convert(raw)?;
        self.last_checked = Some(now);
        if self.raw.as_ref() == Some(&value) {
            return Ok(false);
        }
        self.raw = Some(value);
        self.last_changed = Some(now);
        Ok(true)
    }

    /// Restore persisted state without change detection.
    pub(crate) fn restore(
        &mut self,
        raw: &serde_json::Value,
        changed: Option<Timestamp>,
        checked: Option<Timestamp>,
    ) -> Result<(), InvalidValueError> {
        let value = self.convert(raw)?;
        self.raw = Some(value);
        self.last_checked = checked;
        self.last_changed = match (changed, checked) {
            (Some(changed), Some(checked)) => Some(changed.min(checked)),
            (changed, _) => changed,
        };
        Ok(())
    }

    /// Presentation string of the current value.
    #[must_use]
    pub fn formatted_at(&self, now: Timestamp) -> Option<String> {
        let value = self.value_at(now)?;
        if let ItemValue::Date(ts) = value {
            let date = chrono::DateTime::from_timestamp(*ts, 0)?;
            let local = to_local(date);
            let pattern = if local.date_naive() == to_local(now).date_naive() {
                "%H:%M"
            } else {
                "%d.%m %H:%M"
            };
            return Some(local.format(pattern).to_string());
        }
        match self.definition.format.as_deref() {
            Some("duration") => Some(format_duration(value.as_number().unwrap_or_default())),
            Some(pattern) => Some(pattern.replace("{}", &value.to_string())),
            None => Some(value.to_string()),
        }
    }

    /// Read-only listing record for this item.
    #[must_use]
    pub fn view(&self, now: Timestamp) -> ItemView {
        ItemView {
            name: self.definition.name.clone(),
            kind: self.definition.kind,
            ttl: self.definition.ttl,
            value: self.value_at(now).cloned(),
            raw_value: self.raw.clone(),
            age: self.age_at(now),
            checked: self.last_checked,
            changed: self.last_changed,
            tags: self.definition.tags.clone(),
            formatted: self.formatted_at(now),
            label: self.label().to_string(),
        }
    }
}

/// Snapshot of an item as returned by listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemView {
    pub name: String,
    pub kind: ItemKind,
    pub ttl: u64,
    pub value: Option<ItemValue>,
    pub raw_value: Option<ItemValue>,
    pub age: Option<f64>,
    pub checked: Option<Timestamp>,
    pub changed: Option<Timestamp>,
    pub tags: Vec<String>,
    pub formatted: Option<String>,
    pub label: String,
}

/// Render a number of seconds as `"<h>h <m>m"`, omitting a zero hour part.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn format_duration(secs: f64) -> String {
    let total = secs.max(0.0).trunc() as i64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

fn plain_text(raw: &serde_json::Value) -> String {
    match raw {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn round_to(value: f64, decimals: u8) -> f64 {
    let factor = 10f64.powi(i32::from(decimals));
    (value * factor).round() / factor
}

#[allow(clippy::cast_possible_truncation)]
fn parse_timestamp(raw: &serde_json::Value) -> Option<i64> {
    match raw {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        serde_json::Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                chrono::DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|dt| dt.timestamp())
            })
        }
        _ => None,
    }
}
