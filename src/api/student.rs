use async_trait::async_trait;

use super::gateway::RoleSession;
use crate::collab::{StudentProfile, UserId};
use crate::hub::event::StudentStatus;
use crate::hub::{Event, GroupName, LabHub, PresenceStatus, Role};

/// Student connection: a read-only relay of batch and personal events.
///
/// Joining marks the student online and leaving marks them offline, each
/// followed by a `student_status` to the batch's monitors.
pub struct StudentSession {
    user_id: UserId,
    profile: StudentProfile,
}

impl StudentSession {
    pub fn new(user_id: UserId, profile: StudentProfile) -> Self {
        Self { user_id, profile }
    }

    async fn announce(&self, hub: &LabHub, status: PresenceStatus) {
        let student_id = self.profile.student_id;
        let state = match hub.presence().set_status(student_id, status, None).await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(student_id, status = ?status, error = %e, "Presence write failed, skipping broadcast");
                return;
            }
        };

        let event = Event::StudentStatus(StudentStatus::from(&state));
        match hub.publish(GroupName::monitor_batch(self.profile.batch_id), &event).await {
            Ok(delivered) => tracing::debug!(student_id, status = ?status, delivered, "Student status broadcast"),
            Err(e) => tracing::error!(student_id, error = %e, "Failed to broadcast student status"),
        }
    }
}

#[async_trait]
impl RoleSession for StudentSession {
    fn role(&self) -> Role {
        Role::Student
    }

    fn user_id(&self) -> UserId {
        self.user_id
    }

    fn groups(&self) -> Vec<GroupName> {
        vec![
            GroupName::batch(self.profile.batch_id),
            GroupName::student(self.profile.student_id),
        ]
    }

    async fn on_joined(&self, hub: &LabHub) -> Option<Event> {
        self.announce(hub, PresenceStatus::Online).await;
        None
    }

    async fn on_message(&self, _hub: &LabHub, text: &str) {
        tracing::trace!(student_id = self.profile.student_id, bytes = text.len(), "Ignoring student message");
    }

    async fn on_left(&self, hub: &LabHub) {
        self.announce(hub, PresenceStatus::Offline).await;
    }
}
