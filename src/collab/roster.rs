use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{PresenceStore, StudentDirectory, StudentProfile, UserId};
use crate::error::{GatewayError, Result};
use crate::hub::{BatchId, Mode, PresenceState, PresenceStatus, StudentId};

/// One student as listed in a roster seed file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: StudentId,
    pub user_id: UserId,
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
}

/// In-process student directory and presence store.
///
/// Stands in for the CRUD database when the gateway runs on its own, and
/// backs the tests.
#[derive(Default)]
pub struct InMemoryRoster {
    students: RwLock<HashMap<StudentId, PresenceState>>,
    profiles: RwLock<HashMap<UserId, StudentProfile>>,
}

impl InMemoryRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn from_entries(entries: Vec<RosterEntry>) -> Self {
        let roster = Self::new();
        for entry in entries {
            roster.insert(entry).await;
        }
        roster
    }

    /// Loads a JSON array of [`RosterEntry`] from disk
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::RosterLoad(format!("{}: {}", path.display(), e)))?;
        let entries: Vec<RosterEntry> = serde_json::from_str(&content)
            .map_err(|e| GatewayError::RosterLoad(format!("{}: {}", path.display(), e)))?;

        tracing::info!(path = %path.display(), students = entries.len(), "Roster loaded");
        Ok(Self::from_entries(entries).await)
    }

    pub async fn insert(&self, entry: RosterEntry) {
        self.profiles.write().await.insert(
            entry.user_id,
            StudentProfile {
                student_id: entry.id,
                batch_id: entry.batch_id,
            },
        );
        self.students.write().await.insert(
            entry.id,
            PresenceState {
                student_id: entry.id,
                roll_number: entry.roll_number,
                name: entry.name,
                email: entry.email,
                batch_id: entry.batch_id,
                batch_name: entry.batch_name,
                pc_id: entry.pc_id,
                status: entry.status,
                mode: entry.mode,
                last_seen: None,
            },
        );
    }

    pub async fn get(&self, student_id: StudentId) -> Option<PresenceState> {
        self.students.read().await.get(&student_id).cloned()
    }
}

#[async_trait]
impl StudentDirectory for InMemoryRoster {
    async fn resolve_student_profile(&self, user_id: UserId) -> Result<StudentProfile> {
        self.profiles
            .read()
            .await
            .get(&user_id)
            .cloned()
            .ok_or(GatewayError::ProfileNotFound(user_id))
    }
}

#[async_trait]
impl PresenceStore for InMemoryRoster {
    async fn read_presence_snapshot(&self, batch_id: BatchId) -> Result<Vec<PresenceState>> {
        let mut snapshot: Vec<PresenceState> = self
            .students
            .read()
            .await
            .values()
            .filter(|s| s.batch_id == batch_id)
            .cloned()
            .collect();
        snapshot.sort_by(|a, b| a.name.cmp(&b.name).then(a.student_id.cmp(&b.student_id)));
        Ok(snapshot)
    }

    async fn write_presence(
        &self,
        student_id: StudentId,
        status: PresenceStatus,
        mode: Option<Mode>,
    ) -> Result<PresenceState> {
        let mut students = self.students.write().await;
        let state = students
            .get_mut(&student_id)
            .ok_or(GatewayError::StudentNotFound(student_id))?;

        state.status = status;
        state.last_seen = Some(Utc::now());
        if let Some(mode) = mode {
            state.mode = mode;
        }
        Ok(state.clone())
    }
}
