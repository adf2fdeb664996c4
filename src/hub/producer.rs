//! Event producer API for the CRUD layer.
//!
//! Each function turns a domain write into the `(group, event)` pair that
//! should be published, so the write path calls `LabHub::publish` or
//! `EventOutbox::emit` explicitly instead of relying on save hooks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::{
    Event, SessionStatus, SessionTransition, SessionType, SubmissionEventType, SubmissionPayload,
    TaskEventType, TaskPayload,
};
use super::group::{BatchId, GroupName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabSessionStatus {
    Active,
    Ended,
    Paused,
}

/// A lab session as written by the session service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabSessionRecord {
    pub id: i64,
    pub batch_id: BatchId,
    pub session_type: SessionType,
    pub status: LabSessionStatus,
    pub faculty_name: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Maps a saved lab session to its batch broadcast.
///
/// A freshly created session only announces itself when it starts active.
pub fn session_status_changed(session: &LabSessionRecord, created: bool) -> Option<(GroupName, Event)> {
    let transition = match (created, session.status) {
        (_, LabSessionStatus::Active) => SessionTransition::SessionStarted,
        (true, _) => return None,
        (false, LabSessionStatus::Ended) => SessionTransition::SessionEnded,
        (false, LabSessionStatus::Paused) => SessionTransition::SessionPaused,
    };

    Some((
        GroupName::batch(session.batch_id),
        Event::SessionStatus(SessionStatus {
            status: transition,
            session_id: session.id,
            session_type: session.session_type,
            faculty_name: session.faculty_name.clone(),
            start_time: session.start_time,
            end_time: session.end_time,
        }),
    ))
}

pub fn task_created(task: TaskPayload) -> (GroupName, Event) {
    (
        GroupName::batch(task.batch_id),
        Event::TaskEvent {
            event_type: TaskEventType::TaskCreated,
            task,
        },
    )
}

/// Notifies the batch's monitors that a student handed something in
pub fn submission_received(batch_id: BatchId, submission: SubmissionPayload) -> (GroupName, Event) {
    (
        GroupName::monitor_batch(batch_id),
        Event::SubmissionEvent {
            event_type: SubmissionEventType::SubmissionReceived,
            submission,
        },
    )
}

/// Sends a graded submission back to the student who made it
pub fn evaluation_done(submission: SubmissionPayload) -> (GroupName, Event) {
    (
        GroupName::student(submission.student_id),
        Event::SubmissionEvent {
            event_type: SubmissionEventType::EvaluationDone,
            submission,
        },
    )
}
