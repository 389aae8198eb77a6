//! Command pump — drains the outbound command queue into actors.
//!
//! Each actor gets its own bounded worker queue so a slow device cannot
//! stall commands addressed to other actors. Commands for one actor are
//! delivered in enqueue order, one at a time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::context::OutboundCommand;
use crate::ports::Actor;

/// Routes [`OutboundCommand`]s to the actors claiming their channel.
pub struct CommandPump {
    receiver: mpsc::Receiver<OutboundCommand>,
    actors: Vec<Arc<dyn Actor>>,
    timeout: Duration,
    queue_capacity: usize,
}

impl CommandPump {
    #[must_use]
    pub fn new(
        receiver: mpsc::Receiver<OutboundCommand>,
        actors: Vec<Arc<dyn Actor>>,
        timeout: Duration,
    ) -> Self {
        Self {
            receiver,
            actors,
            timeout,
            queue_capacity: 32,
        }
    }

    /// Capacity of each per-actor queue.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Pump commands until `shutdown` flips or every sender is dropped.
    ///
    /// Commands already handed to a worker are finished before returning.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut workers = JoinSet::new();
        let mut queues = Vec::with_capacity(self.actors.len());
        for actor in &self.actors {
            let (tx, rx) = mpsc::channel(self.queue_capacity);
            workers.spawn(deliver(Arc::clone(actor), rx, self.timeout));
            queues.push((Arc::clone(actor), tx));
        }

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                command = self.receiver.recv() => {
                    let Some(command) = command else { break };
                    route(&queues, command);
                }
            }
        }

        drop(queues);
        while workers.join_next().await.is_some() {}
        debug!("command pump stopped");
    }
}

impl std::fmt::Debug for CommandPump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPump")
            .field("actors", &self.actors.len())
            .field("timeout", &self.timeout)
            .field("queue_capacity", &self.queue_capacity)
            .finish_non_exhaustive()
    }
}

fn route(queues: &[(Arc<dyn Actor>, mpsc::Sender<OutboundCommand>)], command: OutboundCommand) {
    let mut matched = false;
    for (actor, queue) in queues {
        if !actor.is_my_command(&command.channel) {
            continue;
        }
        matched = true;
        if let Err(err) = queue.try_send(command.clone()) {
            warn!(
                actor = %actor.name(),
                channel = %command.channel,
                error = %err,
                "dropping command"
            );
        }
    }
    if !matched {
        warn!(channel = %command.channel, "no actor for command channel");
    }
}

async fn deliver(
    actor: Arc<dyn Actor>,
    mut queue: mpsc::Receiver<OutboundCommand>,
    timeout: Duration,
) {
    while let Some(command) = queue.recv().await {
        debug!(actor = %actor.name(), channel = %command.channel, "delivering command");
        match tokio::time::timeout(timeout, actor.handle_command(command.payload)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(actor = %actor.name(), error = %err, "command failed");
            }
            Err(_) => {
                warn!(actor = %actor.name(), timeout = ?timeout, "command timed out");
            }
        }
    }
}
