use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use super::group::{BatchId, StudentId};
use crate::collab::PresenceStore;
use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl Default for PresenceStatus {
    fn default() -> Self {
        Self::Offline
    }
}

/// Operating mode a faculty member can put a student machine into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Normal,
    Locked,
    Viva,
    Exam,
}

impl Default for Mode {
    fn default() -> Self {
        Self::Normal
    }
}

/// One student's presence record as held by the presence store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceState {
    pub student_id: StudentId,
    /// Institute roll number
    #[serde(default)]
    pub roll_number: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    pub batch_id: BatchId,
    #[serde(default)]
    pub batch_name: Option<String>,
    #[serde(default)]
    pub pc_id: Option<String>,
    #[serde(default)]
    pub status: PresenceStatus,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

/// Serializes presence writes per student on top of a [`PresenceStore`].
///
/// Writes for the same student run one at a time in arrival order; writes
/// for different students never wait on each other. The tracker does not
/// publish anything, callers fan the returned state out themselves.
pub struct PresenceTracker {
    store: Arc<dyn PresenceStore>,
    student_locks: Mutex<HashMap<StudentId, Arc<tokio::sync::Mutex<()>>>>,
    call_timeout: Duration,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn PresenceStore>, call_timeout: Duration) -> Self {
        Self {
            store,
            student_locks: Mutex::new(HashMap::new()),
            call_timeout,
        }
    }

    /// Reads every student of a batch for a monitor's initial payload
    pub async fn get_snapshot(&self, batch_id: BatchId) -> Result<Vec<PresenceState>> {
        match timeout(self.call_timeout, self.store.read_presence_snapshot(batch_id)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(format!("presence snapshot for batch {}", batch_id))),
        }
    }

    /// Applies a status (and optionally a mode) to one student and returns the stored state
    pub async fn set_status(
        &self,
        student_id: StudentId,
        status: PresenceStatus,
        mode: Option<Mode>,
    ) -> Result<PresenceState> {
        let slot = self.lock_slot(student_id);

        let result = {
            let _guard = slot.lock().await;
            match timeout(
                self.call_timeout,
                self.store.write_presence(student_id, status, mode),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(GatewayError::Timeout(format!("presence write for student {}", student_id))),
            }
        };

        self.release_slot(student_id, slot);

        match &result {
            Ok(state) => tracing::debug!(
                student_id,
                status = ?state.status,
                mode = ?state.mode,
                "Presence updated"
            ),
            Err(e) => tracing::warn!(student_id, error = %e, "Presence write failed"),
        }

        result
    }

    fn lock_slot(&self, student_id: StudentId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .student_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(student_id).or_default().clone()
    }

    /// Drops the per-student lock once nobody else holds or waits on it
    fn release_slot(&self, student_id: StudentId, slot: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self
            .student_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // map entry + our clone
        if Arc::strong_count(&slot) == 2 {
            locks.remove(&student_id);
        }
    }

    #[cfg(test)]
    fn tracked_students(&self) -> usize {
        self.student_locks.lock().map(|l| l.len()).unwrap_or(0)
    }
}
