use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::event::Event;
use super::group::GroupName;
use super::registry::GroupRegistry;
use crate::error::{GatewayError, Result};

/// Non-blocking hand-off from event producers to the group registry
///
/// Producers (REST write paths, the HTTP publish endpoint) call `emit`,
/// which only enqueues. A background worker drains the queue in order and
/// publishes each event, so a slow fan-out never holds up the producer.
/// When the queue is full the event is dropped; delivery is best-effort.
#[derive(Clone)]
pub struct EventOutbox {
    sender: mpsc::Sender<(GroupName, Event)>,
}

impl EventOutbox {
    /// Creates an outbox and spawns its background publisher.
    ///
    /// Once `shutdown` turns true the worker stops accepting events,
    /// publishes what is already queued and exits.
    pub fn new(
        registry: Arc<GroupRegistry>,
        capacity: usize,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(Self::process_events(registry, receiver, shutdown));
        (Self { sender }, worker)
    }

    /// Queues an event for publication without waiting
    pub fn emit(&self, group: GroupName, event: Event) -> Result<()> {
        let kind = event.kind();
        self.sender.try_send((group, event)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                tracing::warn!(group = %group, kind = kind.as_str(), "Outbox full, dropping event");
                GatewayError::QueueFull
            }
            mpsc::error::TrySendError::Closed(_) => {
                tracing::error!(group = %group, kind = kind.as_str(), "Outbox closed, dropping event");
                GatewayError::QueueClosed
            }
        })
    }

    async fn process_events(
        registry: Arc<GroupRegistry>,
        mut receiver: mpsc::Receiver<(GroupName, Event)>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!("Event outbox processor started");

        if !*shutdown.borrow_and_update() {
            loop {
                tokio::select! {
                    biased;
                    next = receiver.recv() => match next {
                        Some((group, event)) => Self::publish(&registry, group, event).await,
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
        }

        // refuse new events, then flush the backlog
        receiver.close();
        let mut flushed = 0usize;
        while let Some((group, event)) = receiver.recv().await {
            Self::publish(&registry, group, event).await;
            flushed += 1;
        }

        tracing::info!(flushed, "Event outbox processor stopped");
    }

    async fn publish(registry: &GroupRegistry, group: GroupName, event: Event) {
        match registry.publish(group, &event).await {
            Ok(delivered) => tracing::debug!(
                group = %group,
                kind = event.kind().as_str(),
                delivered,
                "Outbox event published"
            ),
            Err(e) => tracing::error!(group = %group, error = %e, "Failed to publish outbox event"),
        }
    }
}
