//! Trigger spec — what makes a rule a candidate for execution.

use serde::{Deserialize, Serialize};

use crate::condition::StateReader;
use crate::cron::CronSchedule;
use crate::error::ValidationError;
use crate::item::{ItemValue, SwitchState};

/// One schedule string or a list of candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Schedule {
    One(String),
    Any(Vec<String>),
}

impl Schedule {
    #[must_use]
    pub fn specs(&self) -> &[String] {
        match self {
            Self::One(spec) => std::slice::from_ref(spec),
            Self::Any(specs) => specs,
        }
    }
}

/// How long an item must hold its value before a duration trigger fires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldDuration {
    #[serde(default)]
    pub hours: u64,
    #[serde(default)]
    pub minutes: u64,
    #[serde(default)]
    pub seconds: u64,
}

impl HoldDuration {
    #[must_use]
    pub fn from_secs(seconds: u64) -> Self {
        Self {
            seconds,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn as_secs(&self) -> u64 {
        self.hours * 3600 + self.minutes * 60 + self.seconds
    }
}

/// An item-change predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemTrigger {
    /// Any change of the named item.
    Name(String),
    /// A change matching optional `from`/`to` values, or, with `for`, a
    /// value held for a minimum duration (polled, never change-driven).
    Predicate {
        item_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<serde_json::Value>,
        #[serde(default, rename = "for", skip_serializing_if = "Option::is_none")]
        held_for: Option<HoldDuration>,
    },
}

impl ItemTrigger {
    #[must_use]
    pub fn item_name(&self) -> &str {
        match self {
            Self::Name(name) | Self::Predicate { item_id: name, .. } => name,
        }
    }

    #[must_use]
    pub fn is_duration(&self) -> bool {
        matches!(
            self,
            Self::Predicate {
                held_for: Some(_),
                ..
            }
        )
    }
}

/// Composite trigger of a rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<Schedule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<ItemTrigger>,
}

impl TriggerSpec {
    /// Whether the trigger needs periodic polling: it has a schedule or a
    /// duration predicate.
    #[must_use]
    pub fn is_time_based(&self) -> bool {
        self.time.is_some() || self.items.iter().any(ItemTrigger::is_duration)
    }

    /// Whether a change of `name` from `old` to `new` fires this trigger.
    ///
    /// Duration predicates never match here.
    #[must_use]
    pub fn matches_change(&self, name: &str, new: &ItemValue, old: Option<&ItemValue>) -> bool {
        self.items.iter().any(|trigger| match trigger {
            ItemTrigger::Name(item) => item == name,
            ItemTrigger::Predicate {
                item_id,
                from,
                to,
                held_for,
            } => {
                held_for.is_none()
                    && item_id == name
                    && from
                        .as_ref()
                        .is_none_or(|from| old.is_some_and(|old| old.matches_literal(from)))
                    && to.as_ref().is_none_or(|to| new.matches_literal(to))
            }
        })
    }

    /// Description of the first duration predicate currently satisfied.
    ///
    /// A predicate is satisfied when the item equals its target (`to`,
    /// defaulting to `ON`) and has held it for at least the configured time.
    #[must_use]
    pub fn held_match<R: StateReader + ?Sized>(&self, reader: &R) -> Option<String> {
        let default_target = serde_json::Value::String(SwitchState::On.to_string());
        self.items.iter().find_map(|trigger| {
            let ItemTrigger::Predicate {
                item_id,
                to,
                held_for: Some(held_for),
                ..
            } = trigger
            else {
                return None;
            };
            let value = reader.item_value(item_id)?;
            let age = reader.item_age(item_id)?;
            #[allow(clippy::cast_precision_loss)]
            let required = held_for.as_secs() as f64;
            (value.matches_literal(to.as_ref().unwrap_or(&default_target)) && age >= required)
                .then(|| format!("item {item_id} {value} for {age:.0} s"))
        })
    }

    /// Parse every schedule candidate.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidSchedule`] for the first unparsable candidate.
    pub fn compile_schedule(&self) -> Result<ScheduleMatcher, ValidationError> {
        let candidates = self
            .time
            .iter()
            .flat_map(Schedule::specs)
            .map(|spec| {
                CronSchedule::parse(spec)
                    .map(|schedule| (spec.trim().to_string(), schedule))
                    .map_err(|source| ValidationError::InvalidSchedule {
                        schedule: spec.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ScheduleMatcher { candidates })
    }
}

/// Parsed schedule candidates of a trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleMatcher {
    candidates: Vec<(String, CronSchedule)>,
}

impl ScheduleMatcher {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// The first candidate matching `t`.
    #[must_use]
    pub fn matching<T: chrono::Datelike + chrono::Timelike>(&self, t: &T) -> Option<&str> {
        self.candidates
            .iter()
            .find(|(_, schedule)| schedule.matches(t))
            .map(|(spec, _)| spec.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::collections::HashMap;

    struct FixedReader(HashMap<&'static str, (ItemValue, f64)>);

    impl StateReader for FixedReader {
        fn item_value(&self, name: &str) -> Option<ItemValue> {
            self.0.get(name).map(|(value, _)| value.clone())
        }

        fn item_age(&self, name: &str) -> Option<f64> {
            self.0.get(name).map(|(_, age)| *age)
        }
    }

    fn on() -> ItemValue {
        ItemValue::Switch(SwitchState::On)
    }

    fn off() -> ItemValue {
        ItemValue::Switch(SwitchState::Off)
    }

    fn spec(value: serde_json::Value) -> TriggerSpec {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn should_detect_time_based_triggers() {
        assert!(spec(json!({"time": "0 * * * *", "items": ["item1"]})).is_time_based());
        assert!(!spec(json!({"items": ["item1", {"item_id": "item2", "to": "on"}]})).is_time_based());
        assert!(
            spec(json!({"items": [{"item_id": "item2", "to": "on", "for": {"seconds": 10}}]}))
                .is_time_based()
        );
    }

    #[test]
    fn should_match_structured_predicate_only_on_expected_transition() {
        let trigger = spec(json!({"items": ["item1", {"item_id": "item2", "to": "on"}]}));
        assert!(trigger.matches_change("item2", &on(), Some(&off())));
        assert!(!trigger.matches_change("item2", &off(), Some(&on())));
    }

    #[test]
    fn should_match_bare_name_on_any_change() {
        let trigger = spec(json!({"items": ["item1", {"item_id": "item2", "to": "on"}]}));
        assert!(trigger.matches_change("item1", &off(), Some(&on())));
        assert!(trigger.matches_change("item1", &ItemValue::Number(5.0), None));
        assert!(!trigger.matches_change("item3", &on(), None));
    }

    #[test]
    fn should_require_from_value_when_specified() {
        let trigger = spec(json!({"items": [{"item_id": "counter", "from": 1}]}));
        assert!(trigger.matches_change(
            "counter",
            &ItemValue::Number(2.0),
            Some(&ItemValue::Number(1.0))
        ));
        assert!(!trigger.matches_change("counter", &ItemValue::Number(2.0), None));
    }

    #[test]
    fn should_never_match_duration_predicate_on_change() {
        let trigger = spec(json!({"items": [{"item_id": "item2", "to": "on", "for": {"seconds": 10}}]}));
        assert!(!trigger.matches_change("item2", &on(), Some(&off())));
    }

    #[test]
    fn should_report_held_match_once_duration_reached() {
        let trigger = spec(json!({"items": [{"item_id": "item2", "to": "on", "for": {"seconds": 10}}]}));
        let short = FixedReader(HashMap::from([("item2", (on(), 9.0))]));
        let long = FixedReader(HashMap::from([("item2", (on(), 10.0))]));
        let other = FixedReader(HashMap::from([("item2", (off(), 60.0))]));
        assert!(trigger.held_match(&short).is_none());
        assert_eq!(trigger.held_match(&long).as_deref(), Some("item item2 ON for 10 s"));
        assert!(trigger.held_match(&other).is_none());
    }

    #[test]
    fn should_default_held_target_to_on() {
        let trigger = spec(json!({"items": [{"item_id": "door", "for": {"minutes": 1}}]}));
        let reader = FixedReader(HashMap::from([("door", (on(), 61.0))]));
        assert!(trigger.held_match(&reader).is_some());
    }

    #[test]
    fn should_sum_hold_duration_parts() {
        let held = HoldDuration {
            hours: 1,
            minutes: 2,
            seconds: 3,
        };
        assert_eq!(held.as_secs(), 3723);
    }

    #[test]
    fn should_report_matching_schedule_candidate() {
        let trigger = spec(json!({"time": ["0 7 * * *", "30 7 * * *"]}));
        let matcher = trigger.compile_schedule().unwrap();
        let t = NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(7, 30, 0)
            .unwrap();
        assert_eq!(matcher.matching(&t), Some("30 7 * * *"));
    }

    #[test]
    fn should_reject_invalid_schedule_when_compiling() {
        let trigger = spec(json!({"time": "every minute"}));
        assert!(matches!(
            trigger.compile_schedule(),
            Err(ValidationError::InvalidSchedule { .. })
        ));
    }
}
