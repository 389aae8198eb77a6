//! Simulated device states.
//!
//! A device is just a JSON state keyed by its id. Switch-like devices
//! respond to `turn_on` / `turn_off` / `toggle`; any other command value
//! replaces the state verbatim.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use serde_json::Value;

use crate::error::VirtualError;

#[derive(Debug, Default)]
pub(crate) struct DeviceBank {
    states: Mutex<BTreeMap<String, Value>>,
}

impl DeviceBank {
    pub(crate) fn new(initial: BTreeMap<String, Value>) -> Self {
        Self {
            states: Mutex::new(initial),
        }
    }

    pub(crate) fn get(&self, device: &str) -> Option<Value> {
        self.lock().get(device).cloned()
    }

    pub(crate) fn set(&self, device: &str, state: Value) {
        self.lock().insert(device.to_string(), state);
    }

    /// Apply a command to a known device and return its new state.
    pub(crate) fn apply(&self, device: &str, command: &Value) -> Result<Value, VirtualError> {
        let mut states = self.lock();
        let state = states
            .get_mut(device)
            .ok_or_else(|| VirtualError::UnknownDevice {
                device: device.to_string(),
            })?;
        *state = next_state(state, command);
        Ok(state.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Value>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn next_state(current: &Value, command: &Value) -> Value {
    match command.as_str().map(str::to_ascii_lowercase).as_deref() {
        Some("turn_on") => Value::from("ON"),
        Some("turn_off") => Value::from("OFF"),
        Some("toggle") if is_on(current) => Value::from("OFF"),
        Some("toggle") => Value::from("ON"),
        _ => command.clone(),
    }
}

fn is_on(state: &Value) -> bool {
    match state {
        Value::String(s) => s.eq_ignore_ascii_case("on"),
        Value::Bool(b) => *b,
        _ => false,
    }
}
