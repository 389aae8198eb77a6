//! Item store — ordered registry of items keyed by unique name.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{Item, ItemValue, ItemView};
use crate::condition::StateReader;
use crate::error::{DuplicateItemError, HubError, UnknownItemError};
use crate::time::Timestamp;

/// Outcome of an accepted write.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueUpdate {
    /// Value before the write, `None` if it was unset or stale.
    pub old: Option<ItemValue>,
    /// Value after the write.
    pub new: Option<ItemValue>,
    /// Seconds the previous value had been held, if it ever changed.
    pub previous_age: Option<f64>,
    /// Whether the stored value differs from the previous one.
    pub changed: bool,
}

/// Persisted state of one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedItem {
    pub name: String,
    pub value: serde_json::Value,
    pub changed: Option<Timestamp>,
    pub checked: Option<Timestamp>,
}

/// Result of restoring a snapshot into the store.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub restored: usize,
    /// Names present in the snapshot but unknown to the store.
    pub unknown: Vec<String>,
    /// Names whose stored value no longer converts.
    pub invalid: Vec<String>,
}

/// Registry of items, preserving insertion order.
#[derive(Debug, Default)]
pub struct ItemStore {
    items: Vec<Item>,
    index: HashMap<String, usize>,
}

impl ItemStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an item.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::DuplicateItem`] if an item with the same name exists.
    pub fn add_item(&mut self, item: Item) -> Result<(), HubError> {
        if self.index.contains_key(item.name()) {
            return Err(DuplicateItemError {
                name: item.name().to_string(),
            }
            .into());
        }
        self.index.insert(item.name().to_string(), self.items.len());
        self.items.push(item);
        Ok(())
    }

    #[must_use]
    pub fn get_item(&self, name: &str) -> Option<&Item> {
        self.index.get(name).map(|&idx| &self.items[idx])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.items.iter()
    }

    /// Convert and store a raw input.
    ///
    /// The check time always moves; [`ValueUpdate::changed`] tells whether
    /// the stored value moved too.
    ///
    /// # Errors
    ///
    /// - [`HubError::UnknownItem`] if no item has this name
    /// - [`HubError::InvalidValue`] if the input does not convert; the item is left untouched
    pub fn set_item_value(
        &mut self,
        name: &str,
        raw: &serde_json::Value,
        now: Timestamp,
    ) -> Result<ValueUpdate, HubError> {
        let idx = *self.index.get(name).ok_or_else(|| UnknownItemError {
            name: name.to_string(),
        })?;
        let item = &mut self.items[idx];
        let old = item.value_at(now).cloned();
        let previous_age = item.age_at(now);
        let changed = item.set_value(raw, now)?;
        Ok(ValueUpdate {
            old,
            new: item.raw_value().cloned(),
            previous_age,
            changed,
        })
    }

    /// Current (fresh) value of an item.
    #[must_use]
    pub fn value_at(&self, name: &str, now: Timestamp) -> Option<ItemValue> {
        self.get_item(name)?.value_at(now).cloned()
    }

    /// Listing records sorted by name, optionally filtered by tag.
    #[must_use]
    pub fn list_items(&self, tag: Option<&str>, now: Timestamp) -> Vec<ItemView> {
        let mut items: Vec<&Item> = self
            .items
            .iter()
            .filter(|item| tag.is_none_or(|tag| item.has_tag(tag)))
            .collect();
        items.sort_by(|a, b| a.name().cmp(b.name()));
        items.into_iter().map(|item| item.view(now)).collect()
    }

    /// Names and input wiring of items fed by the given channel.
    #[must_use]
    pub fn items_with_input(&self, channel: &str) -> Vec<(String, super::ChannelConfig)> {
        self.items
            .iter()
            .filter_map(|item| {
                item.input()
                    .filter(|input| input.channel == channel)
                    .map(|input| (item.name().to_string(), input.clone()))
            })
            .collect()
    }

    /// Persistable state of every item that holds a value.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PersistedItem> {
        self.items
            .iter()
            .filter_map(|item| {
                item.raw_value().map(|value| PersistedItem {
                    name: item.name().to_string(),
                    value: value.to_json(),
                    changed: item.last_changed(),
                    checked: item.last_checked(),
                })
            })
            .collect()
    }

    /// Restore values and timestamps from a snapshot.
    ///
    /// Stored values go through the current type conversion; entries that
    /// no longer convert or whose item is gone are reported, not fatal.
    pub fn restore(&mut self, snapshot: &[PersistedItem]) -> RestoreOutcome {
        let mut outcome = RestoreOutcome::default();
        for entry in snapshot {
            let Some(&idx) = self.index.get(&entry.name) else {
                outcome.unknown.push(entry.name.clone());
                continue;
            };
            match self.items[idx].restore(&entry.value, entry.changed, entry.checked) {
                Ok(()) => outcome.restored += 1,
                Err(_) => outcome.invalid.push(entry.name.clone()),
            }
        }
        outcome
    }

    /// State reader evaluating freshness at `now`.
    #[must_use]
    pub fn reader(&self, now: Timestamp) -> StoreReader<'_> {
        StoreReader { store: self, now }
    }
}

/// [`StateReader`] view of an [`ItemStore`] at a fixed instant.
#[derive(Debug, Clone, Copy)]
pub struct StoreReader<'a> {
    store: &'a ItemStore,
    now: Timestamp,
}

impl StateReader for StoreReader<'_> {
    fn item_value(&self, name: &str) -> Option<ItemValue> {
        self.store.value_at(name, self.now)
    }

    fn item_age(&self, name: &str) -> Option<f64> {
        self.store.get_item(name)?.age_at(self.now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{ItemDefinition, ItemKind, SwitchState};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn at(secs: i64) -> Timestamp {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn store_with(defs: Vec<ItemDefinition>) -> ItemStore {
        let mut store = ItemStore::new();
        for def in defs {
            store.add_item(Item::from_definition(def, at(0)).unwrap()).unwrap();
        }
        store
    }

    #[test]
    fn should_return_duplicate_error_when_name_already_registered() {
        let mut store = store_with(vec![ItemDefinition::new("lamp", ItemKind::Switch)]);
        let again = Item::from_definition(ItemDefinition::new("lamp", ItemKind::Text), at(0)).unwrap();
        let err = store.add_item(again).unwrap_err();
        assert!(matches!(err, HubError::DuplicateItem(e) if e.name == "lamp"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn should_return_none_when_getting_unknown_item() {
        let store = ItemStore::new();
        assert!(store.get_item("ghost").is_none());
    }

    #[test]
    fn should_return_unknown_item_error_when_setting_missing_item() {
        let mut store = ItemStore::new();
        let err = store.set_item_value("ghost", &json!(1), at(0)).unwrap_err();
        assert!(matches!(err, HubError::UnknownItem(_)));
    }

    #[test]
    fn should_report_change_once_when_same_value_set_twice() {
        let mut store = store_with(vec![ItemDefinition::new("lamp", ItemKind::Switch)]);
        let first = store.set_item_value("lamp", &json!("on"), at(1)).unwrap();
        assert_eq!(
            first,
            ValueUpdate {
                old: None,
                new: Some(ItemValue::Switch(SwitchState::On)),
                previous_age: None,
                changed: true,
            }
        );
        let second = store.set_item_value("lamp", &json!("ON"), at(2)).unwrap();
        assert!(!second.changed);
        assert_eq!(second.old, Some(ItemValue::Switch(SwitchState::On)));
        assert_eq!(second.previous_age, Some(1.0));
        assert_eq!(store.get_item("lamp").unwrap().last_checked(), Some(at(2)));
    }

    #[test]
    fn should_report_previous_age_when_value_changes() {
        let mut store = store_with(vec![ItemDefinition::new("lamp", ItemKind::Switch)]);
        store.set_item_value("lamp", &json!("on"), at(0)).unwrap();
        let change = store.set_item_value("lamp", &json!("off"), at(30)).unwrap();
        assert!(change.changed);
        assert_eq!(change.old, Some(ItemValue::Switch(SwitchState::On)));
        assert_eq!(change.previous_age, Some(30.0));
    }

    #[test]
    fn should_leave_item_untouched_when_value_is_invalid() {
        let mut store = store_with(vec![ItemDefinition::new("temp", ItemKind::Number)]);
        store.set_item_value("temp", &json!(20), at(0)).unwrap();
        let err = store.set_item_value("temp", &json!("warm"), at(5)).unwrap_err();
        assert!(matches!(err, HubError::InvalidValue(_)));
        let item = store.get_item("temp").unwrap();
        assert_eq!(item.raw_value(), Some(&ItemValue::Number(20.0)));
        assert_eq!(item.last_checked(), Some(at(0)));
    }

    #[test]
    fn should_list_items_sorted_by_name_and_filtered_by_tag() {
        let mut b = ItemDefinition::new("b_lamp", ItemKind::Switch);
        b.tags = vec!["light".to_string()];
        let mut a = ItemDefinition::new("a_lamp", ItemKind::Switch);
        a.tags = vec!["light".to_string()];
        let store = store_with(vec![b, ItemDefinition::new("temp", ItemKind::Number), a]);

        let all: Vec<String> = store.list_items(None, at(0)).into_iter().map(|v| v.name).collect();
        assert_eq!(all, vec!["a_lamp", "b_lamp", "temp"]);

        let lights: Vec<String> = store
            .list_items(Some("light"), at(0))
            .into_iter()
            .map(|v| v.name)
            .collect();
        assert_eq!(lights, vec!["a_lamp", "b_lamp"]);
    }

    #[test]
    fn should_preserve_insertion_order_when_iterating() {
        let store = store_with(vec![
            ItemDefinition::new("z", ItemKind::Text),
            ItemDefinition::new("a", ItemKind::Text),
        ]);
        let names: Vec<&str> = store.iter().map(Item::name).collect();
        assert_eq!(names, vec!["z", "a"]);
    }

    #[test]
    fn should_restore_snapshot_for_known_items_only() {
        let mut source = store_with(vec![
            ItemDefinition::new("lamp", ItemKind::Switch),
            ItemDefinition::new("temp", ItemKind::Number),
        ]);
        source.set_item_value("lamp", &json!("on"), at(1)).unwrap();
        source.set_item_value("temp", &json!(21.5), at(2)).unwrap();
        let mut snapshot = source.snapshot();
        snapshot.push(PersistedItem {
            name: "ghost".to_string(),
            value: json!(1),
            changed: None,
            checked: None,
        });

        let mut target = store_with(vec![
            ItemDefinition::new("lamp", ItemKind::Switch),
            ItemDefinition::new("temp", ItemKind::Text),
        ]);
        let outcome = target.restore(&snapshot);
        assert_eq!(outcome.restored, 2);
        assert_eq!(outcome.unknown, vec!["ghost".to_string()]);
        assert_eq!(
            target.value_at("lamp", at(3)),
            Some(ItemValue::Switch(SwitchState::On))
        );
        assert_eq!(
            target.value_at("temp", at(3)),
            Some(ItemValue::Text("21.5".to_string()))
        );
        assert_eq!(target.get_item("lamp").unwrap().last_changed(), Some(at(1)));
    }

    #[test]
    fn should_report_invalid_entries_when_restoring() {
        let mut mode = ItemDefinition::new("mode", ItemKind::Select);
        mode.choices = vec!["Home".to_string()];
        let mut store = store_with(vec![mode]);
        let outcome = store.restore(&[PersistedItem {
            name: "mode".to_string(),
            value: json!("Away"),
            changed: Some(at(0)),
            checked: Some(at(0)),
        }]);
        assert_eq!(outcome.restored, 0);
        assert_eq!(outcome.invalid, vec!["mode".to_string()]);
    }

    #[test]
    fn should_find_items_fed_by_channel() {
        let mut lamp = ItemDefinition::new("lamp", ItemKind::Switch);
        lamp.input = Some(crate::item::ChannelConfig::new("virtual").with_param("device", "lamp-1"));
        let store = store_with(vec![lamp, ItemDefinition::new("temp", ItemKind::Number)]);
        let wired = store.items_with_input("virtual");
        assert_eq!(wired.len(), 1);
        assert_eq!(wired[0].0, "lamp");
        assert_eq!(wired[0].1.param_str("device"), Some("lamp-1"));
    }

    #[test]
    fn should_read_values_and_ages_through_reader() {
        let mut store = store_with(vec![ItemDefinition::new("lamp", ItemKind::Switch)]);
        store.set_item_value("lamp", &json!("on"), at(0)).unwrap();
        let reader = store.reader(at(12));
        assert_eq!(
            reader.item_value("lamp"),
            Some(ItemValue::Switch(SwitchState::On))
        );
        assert_eq!(reader.item_age("lamp"), Some(12.0));
        assert_eq!(reader.item_value("ghost"), None);
    }
}
