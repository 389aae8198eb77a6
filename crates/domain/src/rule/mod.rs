//! Rule — trigger → condition → actions.
//!
//! A [`Rule`] is the declarative part of an automation: what fires it
//! ([`TriggerSpec`]), what must hold when it fires ([`Condition`]) and
//! what it does ([`Action`]). Runtime state (busy flag, latch, last run)
//! lives with the engine executing it.

mod action;
mod trigger;

pub use action::{Action, ValueSource};
pub use trigger::{HoldDuration, ItemTrigger, Schedule, ScheduleMatcher, TriggerSpec};

use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::error::{HubError, ValidationError};

/// A named automation unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    #[serde(default)]
    pub trigger: TriggerSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(rename = "action", default)]
    pub actions: Vec<Action>,
}

impl Rule {
    /// Create a builder for constructing a [`Rule`].
    #[must_use]
    pub fn builder() -> RuleBuilder {
        RuleBuilder::default()
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Validation`] when:
    /// - `name` is empty ([`ValidationError::EmptyName`])
    /// - `actions` is empty ([`ValidationError::NoActions`])
    /// - a schedule does not parse ([`ValidationError::InvalidSchedule`])
    /// - a write action has no value ([`ValidationError::MissingValue`])
    pub fn validate(&self) -> Result<(), HubError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        if self.actions.is_empty() {
            return Err(ValidationError::NoActions.into());
        }
        self.trigger.compile_schedule()?;
        for action in &self.actions {
            action.validate()?;
        }
        Ok(())
    }
}

/// Step-by-step builder for [`Rule`].
#[derive(Debug, Default)]
pub struct RuleBuilder {
    name: Option<String>,
    trigger: TriggerSpec,
    condition: Option<Condition>,
    actions: Vec<Action>,
}

impl RuleBuilder {
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn schedule(mut self, schedule: Schedule) -> Self {
        self.trigger.time = Some(schedule);
        self
    }

    #[must_use]
    pub fn on_item(mut self, trigger: ItemTrigger) -> Self {
        self.trigger.items.push(trigger);
        self
    }

    #[must_use]
    pub fn condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    #[must_use]
    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Consume the builder, validate, and return a [`Rule`].
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Validation`] if the rule breaks an invariant.
    pub fn build(self) -> Result<Rule, HubError> {
        let rule = Rule {
            name: self.name.unwrap_or_default(),
            trigger: self.trigger,
            condition: self.condition,
            actions: self.actions,
        };
        rule.validate()?;
        Ok(rule)
    }
}
