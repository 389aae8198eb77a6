//! Template rendering for `log`, `notify` and `value_template` actions.

use std::collections::BTreeMap;

use minijinja::Environment;
use serde::Serialize;

use itemhub_domain::error::HubError;
use itemhub_domain::item::format_duration;

/// What caused a rule run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    ItemChange,
    Time,
    Manual,
}

/// Description of the event that fired a rule, exposed to templates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerEvent {
    #[serde(rename = "type")]
    pub kind: TriggerKind,
    /// Name of the item that changed, if any.
    pub name: Option<String>,
    pub value: Option<serde_json::Value>,
    pub old_value: Option<serde_json::Value>,
    /// Human readable trigger description.
    pub triggered: String,
}

impl TriggerEvent {
    #[must_use]
    pub fn time(description: impl Into<String>) -> Self {
        Self {
            kind: TriggerKind::Time,
            name: None,
            value: None,
            old_value: None,
            triggered: description.into(),
        }
    }

    #[must_use]
    pub fn manual() -> Self {
        Self {
            kind: TriggerKind::Manual,
            name: None,
            value: None,
            old_value: None,
            triggered: "manual".to_string(),
        }
    }
}

/// Variables visible to a template.
#[derive(Debug, Serialize)]
pub struct TemplateContext<'a> {
    pub rule_name: &'a str,
    #[serde(flatten)]
    pub event: &'a TriggerEvent,
    /// Current value of every item, `null` when unknown.
    pub items: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
#[error("failed to render template")]
struct TemplateError(#[source] minijinja::Error);

/// Jinja-style renderer with the hub's filters registered.
pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl TemplateRenderer {
    #[must_use]
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_filter("duration", duration_filter);
        Self { env }
    }

    /// Render `source` against `ctx`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Template`] on syntax or evaluation errors.
    pub fn render(&self, source: &str, ctx: &TemplateContext<'_>) -> Result<String, HubError> {
        self.env
            .render_str(source, ctx)
            .map_err(|err| HubError::Template(Box::new(TemplateError(err))))
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TemplateRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateRenderer").finish_non_exhaustive()
    }
}

fn duration_filter(value: f64) -> String {
    format_duration(value)
}
