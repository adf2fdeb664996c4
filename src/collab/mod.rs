//! Contracts for the systems the gateway depends on but does not own.
//!
//! Token issuance, the student database and presence persistence live in
//! the CRUD service. The gateway only needs these narrow calls, each of
//! which it bounds with its own timeout.

mod jwt;
mod roster;

pub use jwt::{AccessClaims, JwtAuthenticator};
pub use roster::{InMemoryRoster, RosterEntry};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::hub::{BatchId, Mode, PresenceState, PresenceStatus, StudentId};

pub type UserId = i64;

/// A user resolved from a bearer token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
}

/// The student record behind a user account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub student_id: StudentId,
    pub batch_id: BatchId,
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolves a bearer token to a user; fails without side effects
    async fn authenticate(&self, token: &str) -> Result<Identity>;
}

#[async_trait]
pub trait StudentDirectory: Send + Sync {
    async fn resolve_student_profile(&self, user_id: UserId) -> Result<StudentProfile>;
}

#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn read_presence_snapshot(&self, batch_id: BatchId) -> Result<Vec<PresenceState>>;

    /// Persists a status (and a mode when given) and returns the resulting record
    async fn write_presence(
        &self,
        student_id: StudentId,
        status: PresenceStatus,
        mode: Option<Mode>,
    ) -> Result<PresenceState>;
}
