//! End-to-end tests for the full itemhub stack.
//!
//! Each test wires the real context, rule engine, command pump, virtual
//! actors and an in-memory `SQLite` snapshot store, the way `itemhubd`
//! does, without signals or config files.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, watch};

use itemhub_adapter_storage_sqlite_sqlx::{Config, SqliteSnapshotStore};
use itemhub_adapter_virtual::{NotifyConfig, VirtualActor, VirtualConfig, VirtualNotifier};
use itemhub_app::command_pump::CommandPump;
use itemhub_app::context::Context;
use itemhub_app::event_bus::{ItemEvent, ItemEventBus};
use itemhub_app::ports::{Actor, ActorContext, SnapshotStore};
use itemhub_app::rule_engine::RuleEngine;
use itemhub_domain::item::{Item, ItemDefinition, ItemStore, ItemValue, SwitchState};
use itemhub_domain::rule::Rule;
use itemhub_domain::time;

const ITEMS: &str = r#"
[[item]]
name = "lamp"
type = "switch"
input = { channel = "virtual", device = "lamp-1" }
output = { channel = "virtual", device = "lamp-1" }

[[item]]
name = "motion"
type = "switch"
default = "OFF"

[[item]]
name = "temperature"
type = "number"
decimals = 1

[[item]]
name = "log_item"
type = "text"
"#;

const RULES: &str = r#"
[[rule]]
name = "motion light"
trigger = { items = [{ item_id = "motion", to = "ON" }] }
condition = { condition_type = "numeric_state", item_id = "temperature", below = 30.0 }

[[rule.action]]
service = "command"
item_id = "lamp"
value = "ON"

[[rule.action]]
service = "notify"
message = "{{ name }} turned {{ value }}, light on"

[[rule.action]]
service = "set_item"
item_id = "log_item"
value_template = "{{ triggered }}"
"#;

#[derive(Deserialize)]
struct Definitions {
    #[serde(default)]
    item: Vec<ItemDefinition>,
    #[serde(default)]
    rule: Vec<Rule>,
}

struct Hub {
    context: Arc<Context>,
    engine: Arc<RuleEngine>,
    devices: Arc<VirtualActor>,
    notifier: Arc<VirtualNotifier>,
    stop: watch::Sender<bool>,
}

fn store() -> ItemStore {
    let defs: Definitions = toml::from_str(ITEMS).unwrap();
    let mut store = ItemStore::new();
    for def in defs.item {
        store
            .add_item(Item::from_definition(def, time::now()).unwrap())
            .unwrap();
    }
    store
}

fn start_hub() -> Hub {
    let rules: Definitions = toml::from_str(RULES).unwrap();
    let (tx, rx) = mpsc::channel(16);
    let context = Arc::new(Context::new(store(), ItemEventBus::new(64), tx));

    let devices = Arc::new(
        VirtualActor::new(&VirtualConfig {
            devices: [("lamp-1".to_string(), json!("OFF"))].into(),
            ..VirtualConfig::default()
        })
        .with_poll_interval(Duration::from_millis(20)),
    );
    let notifier = Arc::new(VirtualNotifier::new(&NotifyConfig::default()));
    let actors: Vec<Arc<dyn Actor>> = vec![devices.clone(), notifier.clone()];
    for actor in &actors {
        context.register_actor(Arc::clone(actor));
    }

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(CommandPump::new(rx, actors, Duration::from_secs(1)).run(shutdown.clone()));
    let engine = Arc::new(RuleEngine::new(Arc::clone(&context), rules.rule).unwrap());
    engine.start(Duration::from_millis(20), shutdown);

    Hub {
        context,
        engine,
        devices,
        notifier,
        stop,
    }
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn should_switch_device_and_notify_when_motion_is_detected() {
    let hub = start_hub();
    hub.context
        .set_item_value("temperature", &json!("21,54"), false)
        .unwrap();

    hub.context.set_item_value("motion", &json!("on"), false).unwrap();

    eventually("device command", || {
        hub.devices.device_state("lamp-1") == Some(json!("ON"))
    })
    .await;
    eventually("notification", || !hub.notifier.history().is_empty()).await;
    assert!(hub.engine.wait_idle(Duration::from_secs(1)).await);

    let notification = &hub.notifier.history()[0];
    assert_eq!(notification.message, "motion turned ON, light on");
    assert_eq!(notification.rule.as_deref(), Some("motion light"));
    assert_eq!(
        hub.context.get_item_value("log_item"),
        Some(ItemValue::Text("item motion OFF -> ON".to_string()))
    );

    hub.devices.report(hub.context.as_ref());
    assert_eq!(
        hub.context.get_item_value("lamp"),
        Some(ItemValue::Switch(SwitchState::On))
    );
    hub.stop.send_replace(true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn should_not_fire_rule_when_condition_fails() {
    let hub = start_hub();
    hub.context
        .set_item_value("temperature", &json!(35), false)
        .unwrap();

    hub.context.set_item_value("motion", &json!("on"), false).unwrap();

    // give the listener a chance to dispatch
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(hub.engine.wait_idle(Duration::from_secs(1)).await);
    assert_eq!(hub.devices.device_state("lamp-1"), Some(json!("OFF")));
    assert!(hub.notifier.history().is_empty());
    assert_eq!(hub.engine.statuses()[0].last_run, None);
    hub.stop.send_replace(true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn should_observe_checked_and_changed_events() {
    let hub = start_hub();
    let mut events = hub.context.subscribe();

    hub.context
        .set_item_value("temperature", &json!(20.04), false)
        .unwrap();
    hub.context
        .set_item_value("temperature", &json!(20.0), false)
        .unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(events.recv().await.unwrap());
    }
    assert!(matches!(&seen[0], ItemEvent::Checked { changed: true, .. }));
    assert!(matches!(&seen[1], ItemEvent::Changed(change) if change.value == ItemValue::Number(20.0)));
    assert!(matches!(&seen[2], ItemEvent::Checked { changed: false, .. }));
    hub.stop.send_replace(true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn should_report_physical_device_change_to_wired_item() {
    let hub = start_hub();
    let devices = Arc::clone(&hub.devices);
    let ctx: Arc<dyn ActorContext> = hub.context.clone();
    let polling = tokio::spawn(async move { devices.run(ctx).await });

    hub.devices.set_device_state("lamp-1", json!("ON"));

    eventually("lamp report", || {
        hub.context.get_item_value("lamp") == Some(ItemValue::Switch(SwitchState::On))
    })
    .await;
    hub.devices.stop();
    polling.await.unwrap().unwrap();
    hub.stop.send_replace(true);
}

#[tokio::test]
async fn should_restore_item_values_from_sqlite_snapshot() {
    let db = Config {
        database_url: "sqlite::memory:".to_string(),
    }
    .build()
    .await
    .unwrap();
    let snapshots = SqliteSnapshotStore::new(db.pool().clone());

    let (tx, _rx) = mpsc::channel(4);
    let before = Context::new(store(), ItemEventBus::new(8), tx.clone());
    before.set_item_value("motion", &json!("ON"), false).unwrap();
    before
        .set_item_value("log_item", &json!("hello"), false)
        .unwrap();
    snapshots.save(&before.snapshot()).await.unwrap();

    let after = Context::new(store(), ItemEventBus::new(8), tx);
    let outcome = after.restore(&snapshots.load().await.unwrap());

    assert_eq!(outcome.restored, 2);
    assert_eq!(
        after.get_item_value("motion"),
        Some(ItemValue::Switch(SwitchState::On))
    );
    assert_eq!(
        after.get_item_value("log_item"),
        Some(ItemValue::Text("hello".to_string()))
    );
}
