//! Connection gateway: drives each socket through
//! authenticate -> join groups -> serve -> leave groups.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use warp::ws::{Message, WebSocket};

use super::monitor::MonitorSession;
use super::student::StudentSession;
use crate::collab::UserId;
use crate::error::Result;
use crate::hub::{
    BatchId, ConnectionHandle, ConnectionId, ConnectionState, Event, GroupName, LabHub, Lifecycle,
    Payload, Role,
};

/// Which endpoint a connection came in on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Monitor { batch_id: BatchId },
    Student,
}

/// Per-role protocol running on top of the gateway
#[async_trait]
pub trait RoleSession: Send + Sync {
    fn role(&self) -> Role;

    fn user_id(&self) -> UserId;

    /// Groups to join, fixed for the connection's lifetime
    fn groups(&self) -> Vec<GroupName>;

    /// Runs after every group is joined. A returned event is written to this
    /// socket before any group traffic.
    async fn on_joined(&self, hub: &LabHub) -> Option<Event>;

    async fn on_message(&self, hub: &LabHub, text: &str);

    /// Runs exactly once when the connection starts closing
    async fn on_left(&self, hub: &LabHub);
}

/// Resolves the token (and for students the profile) into a role session
pub async fn authorize(hub: &LabHub, route: Route, token: Option<&str>) -> Result<Box<dyn RoleSession>> {
    let identity = hub.authenticate(token).await?;

    match route {
        Route::Monitor { batch_id } => Ok(Box::new(MonitorSession::new(identity.user_id, batch_id))),
        Route::Student => {
            let profile = hub.resolve_student(identity.user_id).await?;
            Ok(Box::new(StudentSession::new(identity.user_id, profile)))
        }
    }
}

fn advance(lifecycle: &mut Lifecycle, next: ConnectionState) {
    if let Err(e) = lifecycle.advance(next) {
        tracing::error!(error = %e, "Connection lifecycle error");
    }
}

pub async fn handle_connection(mut websocket: WebSocket, hub: Arc<LabHub>, route: Route, token: Option<String>) {
    let _live = hub.enter_session();
    let connection_id = ConnectionId::new();
    let mut lifecycle = Lifecycle::new(connection_id);
    tracing::info!(connection_id = %connection_id, route = ?route, "New WebSocket connection");

    advance(&mut lifecycle, ConnectionState::Authenticating);
    let session = match authorize(&hub, route, token.as_deref()).await {
        Ok(session) => session,
        Err(e) => {
            advance(&mut lifecycle, ConnectionState::Rejected);
            tracing::info!(connection_id = %connection_id, route = ?route, error = %e, "Connection rejected");
            let _ = websocket.close().await;
            return;
        }
    };

    serve_session(websocket, hub.clone(), session, connection_id, lifecycle).await;
}

async fn serve_session(
    websocket: WebSocket,
    hub: Arc<LabHub>,
    session: Box<dyn RoleSession>,
    connection_id: ConnectionId,
    mut lifecycle: Lifecycle,
) {
    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::channel::<Payload>(hub.config().outbound_buffer);
    let handle = ConnectionHandle::new(session.role(), session.user_id(), tx).with_id(connection_id);
    let mut shutdown = hub.subscribe_shutdown();

    advance(&mut lifecycle, ConnectionState::Joining);
    for group in session.groups() {
        hub.registry().join(group, &handle).await;
    }
    let greeting = session.on_joined(&hub).await;
    advance(&mut lifecycle, ConnectionState::Active);
    tracing::info!(
        connection_id = %connection_id,
        role = ?session.role(),
        user_id = session.user_id(),
        "Connection active"
    );

    // Spawn task to send messages to client
    let mut writer = tokio::spawn(async move {
        if let Some(event) = greeting {
            match event.to_json() {
                Ok(text) => {
                    if ws_sender.send(Message::text(text)).await.is_err() {
                        return;
                    }
                }
                Err(e) => tracing::error!(connection_id = %connection_id, error = %e, "Failed to encode greeting"),
            }
        }

        while let Some(payload) = rx.recv().await {
            if let Err(e) = ws_sender.send(Message::text(payload.as_ref())).await {
                tracing::debug!(connection_id = %connection_id, error = %e, "Socket write failed");
                return;
            }
        }

        let _ = ws_sender.close().await;
    });

    let already_shutting_down = *shutdown.borrow_and_update();
    if !already_shutting_down {
        loop {
            tokio::select! {
                incoming = ws_receiver.next() => match incoming {
                    Some(Ok(message)) => {
                        if message.is_close() {
                            tracing::debug!(connection_id = %connection_id, "Client closed connection");
                            break;
                        }
                        if let Ok(text) = message.to_str() {
                            session.on_message(&hub, text).await;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::debug!(connection_id = %connection_id, error = %e, "WebSocket error");
                        break;
                    }
                    None => break,
                },
                _ = shutdown.changed() => break,
                _ = &mut writer => break,
            }
        }
    }

    advance(&mut lifecycle, ConnectionState::Closing);
    let left = hub.registry().leave_all(connection_id).await;

    // collaborator calls in here carry their own bound
    session.on_left(&hub).await;

    // the writer drains what is queued once the last sender is gone
    drop(handle);
    if !writer.is_finished() && timeout(hub.config().close_timeout, &mut writer).await.is_err() {
        tracing::debug!(connection_id = %connection_id, "Socket flush abandoned after timeout");
        writer.abort();
    }

    advance(&mut lifecycle, ConnectionState::Closed);
    tracing::info!(connection_id = %connection_id, groups = left.len(), "WebSocket connection closed");
}
