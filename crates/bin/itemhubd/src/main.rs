//! # itemhubd — itemhub daemon
//!
//! Composition root that wires the item store, the rule engine and the
//! actors together and runs until a termination signal.
//!
//! ## Responsibilities
//! - Load configuration (config file, env vars) and install logging
//! - Load item and rule definitions
//! - Initialize the `SQLite` connection pool and restore the item snapshot
//! - Construct actors, the context, the command pump and the rule engine
//! - Persist periodic snapshots and reload rules on `SIGHUP`
//! - Shut down gracefully on `SIGINT`/`SIGTERM` and persist a final snapshot
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer — no domain logic belongs here.

mod config;
mod definitions;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use itemhub_adapter_storage_sqlite_sqlx::{Config as StorageConfig, SqliteSnapshotStore};
use itemhub_adapter_virtual::{VirtualActor, VirtualNotifier};
use itemhub_app::command_pump::CommandPump;
use itemhub_app::context::Context;
use itemhub_app::event_bus::ItemEventBus;
use itemhub_app::ports::{Actor, ActorContext, SnapshotStore};
use itemhub_app::rule_engine::RuleEngine;
use itemhub_domain::time;

use crate::config::Config;

const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    init_tracing(&config.logging.filter);

    // Definitions
    let store = definitions::load_items(&config.definitions.dir, time::now())?;
    let rules = definitions::load_rules(&config.definitions.dir)?;

    // Database
    let db = StorageConfig {
        database_url: config.database_url().to_string(),
    }
    .build()
    .await?;
    let snapshots = SqliteSnapshotStore::new(db.pool().clone());

    // Context
    let (command_tx, command_rx) = mpsc::channel(config.commands.queue_capacity);
    let context = Arc::new(Context::new(
        store,
        ItemEventBus::new(config.events.capacity),
        command_tx,
    ));
    match snapshots.load().await {
        Ok(items) => {
            context.restore(&items);
        }
        Err(err) => warn!(error = %err, "failed to load item snapshot"),
    }

    // Actors
    let actors = build_actors(&config);
    for actor in &actors {
        context.register_actor(Arc::clone(actor));
        if let Err(err) = actor.init(context.as_ref()).await {
            warn!(actor = %actor.name(), error = %err, "actor init failed");
        }
    }
    let mut actor_tasks = JoinSet::new();
    for actor in &actors {
        let actor = Arc::clone(actor);
        let ctx: Arc<dyn ActorContext> = context.clone();
        actor_tasks.spawn(async move {
            if let Err(err) = actor.run(ctx).await {
                warn!(actor = %actor.name(), error = %err, "actor stopped with error");
            }
        });
    }

    // Command pump
    let (pump_stop, pump_shutdown) = watch::channel(false);
    let pump = tokio::spawn(
        CommandPump::new(command_rx, actors.clone(), config.actor_timeout())
            .with_queue_capacity(config.commands.queue_capacity)
            .run(pump_shutdown),
    );

    // Rule engine
    let (engine_stop, engine_shutdown) = watch::channel(false);
    let engine = Arc::new(RuleEngine::new(Arc::clone(&context), rules)?);
    let engine_tasks = engine.start(config.tick_interval(), engine_shutdown.clone());
    let snapshot_task = config.snapshot_interval().map(|every| {
        tokio::spawn(periodic_snapshots(
            Arc::clone(&context),
            snapshots.clone(),
            every,
            engine_shutdown,
        ))
    });

    info!(
        items = context.list_items(None).len(),
        rules = engine.statuses().len(),
        actors = actors.len(),
        "itemhubd started"
    );

    wait_for_shutdown(&engine, &config.definitions.dir).await?;
    info!("shutting down");

    engine_stop.send_replace(true);
    for handle in engine_tasks {
        let _ = handle.await;
    }
    if !engine.wait_idle(IDLE_TIMEOUT).await {
        warn!("rule runs still in flight at shutdown");
    }

    for actor in &actors {
        actor.stop();
    }
    pump_stop.send_replace(true);
    let _ = pump.await;
    while actor_tasks.join_next().await.is_some() {}
    if let Some(task) = snapshot_task {
        let _ = task.await;
    }

    match snapshots.save(&context.snapshot()).await {
        Ok(()) => info!("final snapshot saved"),
        Err(err) => error!(error = %err, "failed to save final snapshot"),
    }
    Ok(())
}

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

fn build_actors(config: &Config) -> Vec<Arc<dyn Actor>> {
    let mut actors: Vec<Arc<dyn Actor>> = Vec::new();
    let integrations = &config.integrations;
    if integrations.virtual_devices.enabled {
        actors.push(Arc::new(VirtualActor::new(&integrations.virtual_devices)));
    }
    if integrations.notify.enabled {
        actors.push(Arc::new(VirtualNotifier::new(&integrations.notify)));
    }
    actors
}

async fn periodic_snapshots(
    context: Arc<Context>,
    store: SqliteSnapshotStore,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(every);
    // the first tick completes immediately
    interval.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {
                if let Err(err) = store.save(&context.snapshot()).await {
                    error!(error = %err, "failed to save item snapshot");
                }
            }
        }
    }
}

fn reload_rules(engine: &RuleEngine, dir: &Path) {
    let result = definitions::load_rules(dir)
        .map_err(Box::<dyn std::error::Error>::from)
        .and_then(|rules| engine.reload(rules).map_err(Into::into));
    if let Err(err) = result {
        error!(error = %err, "rule reload failed, keeping current rules");
    }
}

#[cfg(unix)]
async fn wait_for_shutdown(engine: &RuleEngine, dir: &Path) -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => return result,
            _ = terminate.recv() => return Ok(()),
            _ = hangup.recv() => {
                info!("reloading rules");
                reload_rules(engine, dir);
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_engine: &RuleEngine, _dir: &Path) -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
