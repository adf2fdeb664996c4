//! Typed messages carried over the gateway.
//!
//! Outbound [`Event`]s are what groups fan out and what sockets receive
//! verbatim; [`InboundMessage`] is the closed set of messages a client may
//! send. Both use an internal `type` tag on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::group::{BatchId, StudentId};
use super::presence::{Mode, PresenceState, PresenceStatus};
use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Snapshot of a batch, sent only to the monitor that just joined
    InitialLoad { students: Vec<StudentSummary> },
    /// Result of a monitor's manual status override
    StatusBroadcast(StatusBroadcast),
    /// A student socket came online or went offline
    StudentStatus(StudentStatus),
    SessionStatus(SessionStatus),
    TaskEvent {
        event_type: TaskEventType,
        task: TaskPayload,
    },
    SubmissionEvent {
        event_type: SubmissionEventType,
        submission: SubmissionPayload,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    InitialLoad,
    StatusBroadcast,
    StudentStatus,
    SessionStatus,
    TaskEvent,
    SubmissionEvent,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::InitialLoad => "initial_load",
            EventKind::StatusBroadcast => "status_broadcast",
            EventKind::StudentStatus => "student_status",
            EventKind::SessionStatus => "session_status",
            EventKind::TaskEvent => "task_event",
            EventKind::SubmissionEvent => "submission_event",
        }
    }
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::InitialLoad { .. } => EventKind::InitialLoad,
            Event::StatusBroadcast(_) => EventKind::StatusBroadcast,
            Event::StudentStatus(_) => EventKind::StudentStatus,
            Event::SessionStatus(_) => EventKind::SessionStatus,
            Event::TaskEvent { .. } => EventKind::TaskEvent,
            Event::SubmissionEvent { .. } => EventKind::SubmissionEvent,
        }
    }

    pub fn initial_load(snapshot: &[PresenceState]) -> Self {
        Event::InitialLoad {
            students: snapshot.iter().map(StudentSummary::from).collect(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Row of the monitor's initial student list, named like the student REST resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentSummary {
    pub id: StudentId,
    /// Roll number
    pub student_id: String,
    pub name: String,
    pub email: Option<String>,
    pub batch: BatchId,
    pub batch_name: Option<String>,
    pub pc_id: Option<String>,
    pub status: PresenceStatus,
    pub current_mode: Mode,
    pub last_seen: Option<DateTime<Utc>>,
}

impl From<&PresenceState> for StudentSummary {
    fn from(state: &PresenceState) -> Self {
        Self {
            id: state.student_id,
            student_id: state.roll_number.clone(),
            name: state.name.clone(),
            email: state.email.clone(),
            batch: state.batch_id,
            batch_name: state.batch_name.clone(),
            pc_id: state.pc_id.clone(),
            status: state.status,
            current_mode: state.mode,
            last_seen: state.last_seen,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusBroadcast {
    pub student_id: StudentId,
    pub student_name: String,
    pub pc_id: Option<String>,
    pub status: PresenceStatus,
    pub mode: Mode,
    pub last_seen: Option<DateTime<Utc>>,
}

impl From<&PresenceState> for StatusBroadcast {
    fn from(state: &PresenceState) -> Self {
        Self {
            student_id: state.student_id,
            student_name: state.name.clone(),
            pc_id: state.pc_id.clone(),
            status: state.status,
            mode: state.mode,
            last_seen: state.last_seen,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentStatus {
    pub student_id: StudentId,
    pub status: PresenceStatus,
    pub name: String,
    pub last_seen: Option<DateTime<Utc>>,
}

impl From<&PresenceState> for StudentStatus {
    fn from(state: &PresenceState) -> Self {
        Self {
            student_id: state.student_id,
            status: state.status,
            name: state.name.clone(),
            last_seen: state.last_seen,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionTransition {
    SessionStarted,
    SessionEnded,
    SessionPaused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Regular,
    Viva,
    Exam,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub status: SessionTransition,
    pub session_id: i64,
    pub session_type: SessionType,
    pub faculty_name: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventType {
    TaskCreated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub status: String,
    pub batch_id: BatchId,
    pub created_at: DateTime<Utc>,
    pub faculty_name: String,
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionEventType {
    SubmissionReceived,
    EvaluationDone,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionPayload {
    pub id: i64,
    pub task_id: i64,
    pub task_title: String,
    pub student_id: StudentId,
    pub student_name: String,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub marks: Option<i32>,
    #[serde(default)]
    pub feedback: Option<String>,
}

/// Messages a client may send. Monitors may send `status_update`; students send nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    StatusUpdate {
        student_id: StudentId,
        status: PresenceStatus,
        #[serde(default)]
        mode: Option<Mode>,
    },
}

impl InboundMessage {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| GatewayError::malformed(e.to_string()))
    }
}
