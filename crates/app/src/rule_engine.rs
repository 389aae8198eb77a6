//! Rule engine — runtime rule state, trigger dispatch and action execution.
//!
//! Each rule is wrapped in a [`RuleRuntime`] carrying its busy flag, the
//! edge-trigger latch for time-based triggers and run bookkeeping. The
//! engine listens to item change events and a periodic scheduler tick, and
//! spawns one task per fired trigger. A rule never runs concurrently with
//! itself: triggers arriving while it is busy are dropped with a warning.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use itemhub_domain::condition::{Condition, StateReader};
use itemhub_domain::error::HubError;
use itemhub_domain::item::ItemValue;
use itemhub_domain::rule::{Action, Rule, ScheduleMatcher, ValueSource};
use itemhub_domain::time::{self, Timestamp, seconds, to_local};

use crate::context::Context;
use crate::event_bus::{ItemChange, ItemEvent};
use crate::template::{TemplateContext, TemplateRenderer, TriggerEvent, TriggerKind};

/// A failure inside a rule's action list, contained at the rule boundary.
#[derive(Debug, thiserror::Error)]
#[error("rule `{rule}` failed on {trigger}")]
pub struct RuleExecutionError {
    pub rule: String,
    pub trigger: String,
    #[source]
    pub source: HubError,
}

/// Observable runtime state of a rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleStatus {
    pub name: String,
    pub busy: bool,
    pub last_run: Option<Timestamp>,
    pub last_trigger: Option<String>,
    pub last_duration_secs: Option<f64>,
    pub active: bool,
}

#[derive(Debug, Default)]
struct RuntimeState {
    active: bool,
    last_run: Option<Timestamp>,
    last_trigger: Option<String>,
    last_duration: Option<f64>,
    last_schedule_minute: Option<i64>,
}

/// A rule together with its runtime state.
#[derive(Debug)]
pub struct RuleRuntime {
    rule: Rule,
    schedule: ScheduleMatcher,
    busy: AtomicBool,
    state: Mutex<RuntimeState>,
}

impl RuleRuntime {
    /// Validate a rule and prepare it for execution.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Validation`] if the rule is invalid.
    pub fn new(rule: Rule) -> Result<Self, HubError> {
        rule.validate()?;
        let schedule = rule.trigger.compile_schedule()?;
        Ok(Self {
            rule,
            schedule,
            busy: AtomicBool::new(false),
            state: Mutex::new(RuntimeState::default()),
        })
    }

    #[must_use]
    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.rule.name
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Whether an item change fires this rule.
    #[must_use]
    pub fn matches_change(&self, change: &ItemChange) -> bool {
        self.rule
            .trigger
            .matches_change(&change.name, &change.value, change.old_value.as_ref())
    }

    /// Poll the time-based part of the trigger.
    ///
    /// The schedule is evaluated at most once per wall-clock minute;
    /// duration predicates on every call. Returns a trigger description only
    /// on the transition from "not matching" to "matching".
    pub fn check_time_trigger<R: StateReader + ?Sized>(
        &self,
        now: Timestamp,
        reader: &R,
    ) -> Option<String> {
        if !self.rule.trigger.is_time_based() {
            return None;
        }
        let mut state = self.lock_state();

        let mut fired = None;
        if !self.schedule.is_empty() {
            let minute = now.timestamp().div_euclid(60);
            if state.last_schedule_minute != Some(minute) {
                state.last_schedule_minute = Some(minute);
                fired = self
                    .schedule
                    .matching(&to_local(now))
                    .map(|spec| format!("cron {spec}"));
            }
        }
        if fired.is_none() {
            fired = self.rule.trigger.held_match(reader);
        }

        if fired.is_some() && !state.active {
            state.active = true;
            return fired;
        }
        state.active = fired.is_some();
        None
    }

    #[must_use]
    pub fn status(&self) -> RuleStatus {
        let state = self.lock_state();
        RuleStatus {
            name: self.rule.name.clone(),
            busy: self.is_busy(),
            last_run: state.last_run,
            last_trigger: state.last_trigger.clone(),
            last_duration_secs: state.last_duration,
            active: state.active,
        }
    }

    fn record_start(&self, at: Timestamp, trigger: &str) {
        let mut state = self.lock_state();
        state.last_run = Some(at);
        state.last_trigger = Some(trigger.to_string());
    }

    fn record_duration(&self, secs: f64) {
        self.lock_state().last_duration = Some(secs);
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct InFlight(Arc<RuleEngine>);

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Evaluates triggers and runs rules against a [`Context`].
pub struct RuleEngine {
    context: Arc<Context>,
    rules: RwLock<Arc<[Arc<RuleRuntime>]>>,
    templates: TemplateRenderer,
    in_flight: AtomicUsize,
    idle: Notify,
}

impl RuleEngine {
    /// Create an engine with an initial rule list.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Validation`] if any rule is invalid.
    pub fn new(context: Arc<Context>, rules: Vec<Rule>) -> Result<Self, HubError> {
        Ok(Self {
            context,
            rules: RwLock::new(build_runtimes(rules)?),
            templates: TemplateRenderer::new(),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        })
    }

    /// Replace the whole rule list.
    ///
    /// Runs already in flight finish against the old rules. On error the
    /// current list is kept.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Validation`] if any rule is invalid.
    pub fn reload(&self, rules: Vec<Rule>) -> Result<usize, HubError> {
        let runtimes = build_runtimes(rules)?;
        let count = runtimes.len();
        *self.rules.write().unwrap_or_else(PoisonError::into_inner) = runtimes;
        info!(rules = count, "rules reloaded");
        Ok(count)
    }

    /// Current rule list.
    #[must_use]
    pub fn rules(&self) -> Arc<[Arc<RuleRuntime>]> {
        Arc::clone(&self.rules.read().unwrap_or_else(PoisonError::into_inner))
    }

    #[must_use]
    pub fn statuses(&self) -> Vec<RuleStatus> {
        self.rules().iter().map(|rule| rule.status()).collect()
    }

    /// Subscribe to item events and spawn the change listener and the
    /// scheduler. Both stop when `shutdown` flips.
    pub fn start(
        self: &Arc<Self>,
        tick: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let events = self.context.subscribe();
        vec![
            tokio::spawn(Arc::clone(self).listen(events, shutdown.clone())),
            tokio::spawn(Arc::clone(self).schedule(tick, shutdown)),
        ]
    }

    /// Fire every rule whose item trigger matches the change.
    pub fn dispatch_change(self: &Arc<Self>, change: &ItemChange) {
        for rule in self.rules().iter().filter(|rule| rule.matches_change(change)) {
            let event = TriggerEvent {
                kind: TriggerKind::ItemChange,
                name: Some(change.name.clone()),
                value: Some(change.value.to_json()),
                old_value: change.old_value.as_ref().map(ItemValue::to_json),
                triggered: format!(
                    "item {} {} -> {}",
                    change.name,
                    change
                        .old_value
                        .as_ref()
                        .map_or_else(|| "unknown".to_string(), ToString::to_string),
                    change.value
                ),
            };
            self.spawn_run(Arc::clone(rule), event);
        }
    }

    /// Poll the time-based triggers of every rule.
    pub fn tick(self: &Arc<Self>, now: Timestamp) {
        for rule in self.rules().iter() {
            let fired = self
                .context
                .with_reader(now, |reader| rule.check_time_trigger(now, reader));
            if let Some(description) = fired {
                debug!(rule = %rule.name(), trigger = %description, "time trigger fired");
                self.spawn_run(Arc::clone(rule), TriggerEvent::time(description));
            }
        }
    }

    /// Run a rule by name through the usual busy and condition gates.
    ///
    /// Returns `None` if no rule has this name, otherwise whether it ran.
    pub async fn trigger_manually(&self, name: &str) -> Option<bool> {
        let rule = self.rules().iter().find(|rule| rule.name() == name).cloned();
        let Some(rule) = rule else {
            warn!(rule = %name, "no such rule");
            return None;
        };
        Some(self.run_if_allowed(&rule, TriggerEvent::manual()).await)
    }

    /// Run the action list unless the rule is busy or its condition fails.
    ///
    /// Action failures are logged and contained. Returns whether the actions ran.
    pub async fn run_if_allowed(&self, rule: &RuleRuntime, event: TriggerEvent) -> bool {
        if rule.is_busy() {
            warn!(rule = %rule.name(), trigger = %event.triggered, "rule is busy, dropping trigger");
            return false;
        }
        if let Some(condition) = &rule.rule.condition
            && !self.evaluate(rule.name(), condition)
        {
            debug!(rule = %rule.name(), trigger = %event.triggered, "conditions not met");
            return false;
        }
        if rule
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(rule = %rule.name(), trigger = %event.triggered, "rule is busy, dropping trigger");
            return false;
        }
        let _busy = BusyGuard(&rule.busy);

        let started = time::now();
        rule.record_start(started, &event.triggered);
        info!(rule = %rule.name(), trigger = %event.triggered, "running rule");

        let result = self.execute(rule, &event).await;
        rule.record_duration(seconds(time::now().signed_duration_since(started)));

        if let Err(source) = result {
            let err = RuleExecutionError {
                rule: rule.name().to_string(),
                trigger: event.triggered,
                source,
            };
            error!(error = %err, cause = %err.source, "rule execution failed");
        }
        true
    }

    /// Wait until no spawned rule run is in flight.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.idle.notified();
                if self.in_flight.load(Ordering::Acquire) == 0 {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }

    fn spawn_run(self: &Arc<Self>, rule: Arc<RuleRuntime>, event: TriggerEvent) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlight(Arc::clone(self));
        tokio::spawn(async move {
            guard.0.run_if_allowed(&rule, event).await;
            drop(guard);
        });
    }

    async fn listen(
        self: Arc<Self>,
        mut events: broadcast::Receiver<ItemEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = events.recv() => match event {
                    Ok(ItemEvent::Changed(change)) => self.dispatch_change(&change),
                    Ok(ItemEvent::Checked { .. }) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "rule listener lagged behind item events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!("rule listener stopped");
    }

    async fn schedule(self: Arc<Self>, tick: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => self.tick(time::now()),
            }
        }
        debug!("rule scheduler stopped");
    }

    async fn execute(&self, rule: &RuleRuntime, event: &TriggerEvent) -> Result<(), HubError> {
        for action in &rule.rule.actions {
            match action {
                Action::SetItem { item_id, .. } => {
                    let value = self.resolve_value(rule, action, event)?;
                    self.context.set_item_value(item_id, &value, false)?;
                }
                Action::Command { item_id, .. } => {
                    let value = self.resolve_value(rule, action, event)?;
                    info!(rule = %rule.name(), item = %item_id, value = %value, "sending command");
                    self.context.issue_item_command(item_id, &value).await?;
                }
                Action::Log { message } => {
                    let text = self.render(rule, message, event)?;
                    info!(target: "itemhub::rules", rule = %rule.name(), "{text}");
                }
                Action::Notify { channel, message } => {
                    let text = self.render(rule, message, event)?;
                    self.context
                        .enqueue_external_command(
                            channel,
                            serde_json::json!({"message": text, "rule": rule.name()}),
                        )
                        .await?;
                }
                Action::Delay { seconds } => {
                    tokio::time::sleep(Duration::try_from_secs_f64(*seconds).unwrap_or_default())
                        .await;
                }
                Action::Condition { condition } => {
                    if !self.evaluate(rule.name(), condition) {
                        info!(rule = %rule.name(), condition = %condition, "break on condition");
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn resolve_value(
        &self,
        rule: &RuleRuntime,
        action: &Action,
        event: &TriggerEvent,
    ) -> Result<serde_json::Value, HubError> {
        match action.value_source() {
            Some(ValueSource::Template(source)) => {
                Ok(serde_json::Value::String(self.render(rule, source, event)?))
            }
            Some(ValueSource::Literal(value)) => Ok(value.clone()),
            None => Ok(serde_json::Value::Null),
        }
    }

    fn render(
        &self,
        rule: &RuleRuntime,
        source: &str,
        event: &TriggerEvent,
    ) -> Result<String, HubError> {
        let ctx = TemplateContext {
            rule_name: rule.name(),
            event,
            items: self.context.item_values(),
        };
        self.templates.render(source, &ctx)
    }

    fn evaluate(&self, rule: &str, condition: &Condition) -> bool {
        let now = time::now();
        let local = to_local(now);
        self.context
            .with_reader(now, |reader| condition.evaluate(reader, &local))
            .unwrap_or_else(|err| {
                error!(rule = %rule, condition = %condition, error = %err, "condition evaluation failed");
                false
            })
    }
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleEngine")
            .field("rules", &self.rules().len())
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn build_runtimes(rules: Vec<Rule>) -> Result<Arc<[Arc<RuleRuntime>]>, HubError> {
    rules
        .into_iter()
        .map(|rule| RuleRuntime::new(rule).map(Arc::new))
        .collect()
}
