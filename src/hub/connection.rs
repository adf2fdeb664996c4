use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{GatewayError, Result};

/// Serialized event as it travels from the registry to a socket writer
pub type Payload = Arc<str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Monitor,
    Student,
}

/// Lifecycle of one gateway connection.
///
/// `Connecting -> Authenticating -> Joining -> Active -> Closing -> Closed`,
/// with `Authenticating -> Rejected` on a failed token or profile lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticating,
    Joining,
    Active,
    Closing,
    Closed,
    Rejected,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Authenticating)
                | (Authenticating, Joining)
                | (Authenticating, Rejected)
                | (Joining, Active)
                // a socket can drop while groups are being joined
                | (Joining, Closing)
                | (Active, Closing)
                | (Closing, Closed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Rejected)
    }
}

/// Tracks the lifecycle state of one connection and logs every transition
#[derive(Debug)]
pub struct Lifecycle {
    id: ConnectionId,
    state: ConnectionState,
}

impl Lifecycle {
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            state: ConnectionState::Connecting,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn advance(&mut self, next: ConnectionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(GatewayError::internal(format!(
                "illegal transition {:?} -> {:?} for connection {}",
                self.state, next, self.id
            )));
        }
        tracing::debug!(connection_id = %self.id, from = ?self.state, to = ?next, "Connection state change");
        self.state = next;
        Ok(())
    }
}

/// The registry's view of a live connection: who it is and where to push events
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub role: Role,
    pub user_id: i64,
    sender: mpsc::Sender<Payload>,
}

impl ConnectionHandle {
    pub fn new(role: Role, user_id: i64, sender: mpsc::Sender<Payload>) -> Self {
        Self {
            id: ConnectionId::new(),
            role,
            user_id,
            sender,
        }
    }

    pub fn with_id(mut self, id: ConnectionId) -> Self {
        self.id = id;
        self
    }

    /// Queues a payload for this connection's writer without waiting
    pub fn deliver(&self, payload: Payload) -> Result<()> {
        self.sender.try_send(payload).map_err(|e| {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "outbound queue full",
                mpsc::error::TrySendError::Closed(_) => "connection closing",
            };
            GatewayError::Delivery(format!("{} ({})", self.id, reason))
        })
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
