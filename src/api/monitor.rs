use async_trait::async_trait;

use super::gateway::RoleSession;
use crate::collab::UserId;
use crate::hub::event::StatusBroadcast;
use crate::hub::{BatchId, Event, GroupName, InboundMessage, LabHub, Mode, PresenceStatus, Role, StudentId};

/// Faculty connection watching one batch.
///
/// Receives the batch snapshot on join, relays everything published into
/// `monitor_batch_{id}` untouched, and accepts manual `status_update`s.
pub struct MonitorSession {
    user_id: UserId,
    batch_id: BatchId,
}

impl MonitorSession {
    pub fn new(user_id: UserId, batch_id: BatchId) -> Self {
        Self { user_id, batch_id }
    }

    fn group(&self) -> GroupName {
        GroupName::monitor_batch(self.batch_id)
    }

    async fn apply_status_update(
        &self,
        hub: &LabHub,
        student_id: StudentId,
        status: PresenceStatus,
        mode: Option<Mode>,
    ) {
        let state = match hub.presence().set_status(student_id, status, mode).await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(
                    batch_id = self.batch_id,
                    student_id,
                    error = %e,
                    "Manual status update not applied, skipping broadcast"
                );
                return;
            }
        };

        let event = Event::StatusBroadcast(StatusBroadcast::from(&state));
        if let Err(e) = hub.publish(self.group(), &event).await {
            tracing::error!(batch_id = self.batch_id, error = %e, "Failed to broadcast status update");
        }
    }
}

#[async_trait]
impl RoleSession for MonitorSession {
    fn role(&self) -> Role {
        Role::Monitor
    }

    fn user_id(&self) -> UserId {
        self.user_id
    }

    fn groups(&self) -> Vec<GroupName> {
        vec![self.group()]
    }

    async fn on_joined(&self, hub: &LabHub) -> Option<Event> {
        match hub.presence().get_snapshot(self.batch_id).await {
            Ok(snapshot) => {
                tracing::debug!(batch_id = self.batch_id, students = snapshot.len(), "Sending initial load");
                Some(Event::initial_load(&snapshot))
            }
            Err(e) => {
                tracing::error!(batch_id = self.batch_id, error = %e, "Failed to read presence snapshot");
                None
            }
        }
    }

    async fn on_message(&self, hub: &LabHub, text: &str) {
        match InboundMessage::parse(text) {
            Ok(InboundMessage::StatusUpdate {
                student_id,
                status,
                mode,
            }) => self.apply_status_update(hub, student_id, status, mode).await,
            Err(e) => {
                tracing::debug!(batch_id = self.batch_id, error = %e, "Dropping malformed monitor message");
            }
        }
    }

    async fn on_left(&self, _hub: &LabHub) {
        tracing::debug!(batch_id = self.batch_id, user_id = self.user_id, "Monitor left");
    }
}
