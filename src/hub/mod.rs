pub mod connection;
pub mod event;
mod group;
mod outbox;
mod presence;
pub mod producer;
mod registry;

pub use connection::{ConnectionHandle, ConnectionId, ConnectionState, Lifecycle, Payload, Role};
pub use event::{Event, EventKind, InboundMessage};
pub use group::{BatchId, GroupName, StudentId};
pub use outbox::EventOutbox;
pub use presence::{Mode, PresenceState, PresenceStatus, PresenceTracker};
pub use registry::GroupRegistry;

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

use crate::collab::{Authenticator, Identity, PresenceStore, StudentDirectory, StudentProfile, UserId};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};

/// The real-time core: group registry, presence tracker and collaborators.
///
/// Built once at start-up and handed to every connection by `Arc`. Call
/// [`LabHub::shutdown`] to make all live connections run their closing phase
/// and the outbox flush, then [`LabHub::drain`] to wait for both.
pub struct LabHub {
    registry: Arc<GroupRegistry>,
    presence: PresenceTracker,
    authenticator: Arc<dyn Authenticator>,
    directory: Arc<dyn StudentDirectory>,
    outbox: EventOutbox,
    outbox_worker: Mutex<Option<JoinHandle<()>>>,
    config: GatewayConfig,
    shutdown: watch::Sender<bool>,
    /// Connections that have not finished their closing phase
    live_sessions: watch::Sender<usize>,
}

/// Counts a connection as live until dropped
pub struct SessionGuard<'a> {
    hub: &'a LabHub,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.hub.live_sessions.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl LabHub {
    /// Creates the hub and starts its outbox worker; must run inside a tokio runtime
    pub fn new(
        config: GatewayConfig,
        authenticator: Arc<dyn Authenticator>,
        directory: Arc<dyn StudentDirectory>,
        store: Arc<dyn PresenceStore>,
    ) -> Arc<Self> {
        let registry = Arc::new(GroupRegistry::new());
        let (shutdown, shutdown_signal) = watch::channel(false);
        let (outbox, worker) = EventOutbox::new(registry.clone(), config.outbox_capacity, shutdown_signal);
        let (live_sessions, _) = watch::channel(0);

        Arc::new(Self {
            presence: PresenceTracker::new(store, config.collaborator_timeout),
            registry,
            authenticator,
            directory,
            outbox,
            outbox_worker: Mutex::new(Some(worker)),
            config,
            shutdown,
            live_sessions,
        })
    }

    pub fn registry(&self) -> &GroupRegistry {
        &self.registry
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Producer handle whose `emit` never blocks the caller
    pub fn outbox(&self) -> EventOutbox {
        self.outbox.clone()
    }

    /// Publishes directly into a group and returns how many members accepted it
    pub async fn publish(&self, group: GroupName, event: &Event) -> Result<usize> {
        self.registry.publish(group, event).await
    }

    pub async fn authenticate(&self, token: Option<&str>) -> Result<Identity> {
        let token = token.filter(|t| !t.is_empty()).ok_or(GatewayError::MissingToken)?;
        self.bounded("authenticate", self.authenticator.authenticate(token)).await
    }

    pub async fn resolve_student(&self, user_id: UserId) -> Result<StudentProfile> {
        self.bounded("resolve student profile", self.directory.resolve_student_profile(user_id))
            .await
    }

    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Signals every live connection to close and stops the outbox taking new events
    pub fn shutdown(&self) {
        tracing::info!(live_sessions = self.live_sessions(), "Lab hub shutting down");
        self.shutdown.send_replace(true);
    }

    /// Marks a connection live until the returned guard is dropped
    pub fn enter_session(&self) -> SessionGuard<'_> {
        self.live_sessions.send_modify(|n| *n += 1);
        SessionGuard { hub: self }
    }

    pub fn live_sessions(&self) -> usize {
        *self.live_sessions.borrow()
    }

    /// Waits until every connection has finished closing and the outbox has
    /// flushed. Returns false if `deadline` passed first.
    pub async fn drain(&self, deadline: Duration) -> bool {
        let started = Instant::now();
        let mut sessions = self.live_sessions.subscribe();
        let closed = timeout(deadline, sessions.wait_for(|n| *n == 0)).await.is_ok();
        if !closed {
            tracing::warn!(live_sessions = self.live_sessions(), "Drain deadline passed with live connections");
            return false;
        }

        let worker = self.outbox_worker().take();
        if let Some(mut worker) = worker {
            let remaining = deadline.saturating_sub(started.elapsed());
            if timeout(remaining, &mut worker).await.is_err() {
                tracing::warn!("Drain deadline passed while the outbox was flushing");
                *self.outbox_worker() = Some(worker);
                return false;
            }
        }

        tracing::info!("Lab hub drained");
        true
    }

    fn outbox_worker(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.outbox_worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn bounded<T>(&self, what: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        match timeout(self.config.collaborator_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(what.to_string())),
        }
    }
}
