use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use super::connection::{ConnectionHandle, ConnectionId, Payload};
use super::event::Event;
use super::group::GroupName;
use crate::error::Result;

type Members = HashMap<ConnectionId, ConnectionHandle>;

/// Maps group names to their live connections.
///
/// Each group owns its own member lock, so publishing into one group never
/// waits on another. The outer map lock is only taken for writing when a
/// group is created or pruned; joins and publishes hold it for reading.
pub struct GroupRegistry {
    groups: RwLock<HashMap<GroupName, Arc<RwLock<Members>>>>,
    memberships: RwLock<HashMap<ConnectionId, HashSet<GroupName>>>,
}

impl Default for GroupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            memberships: RwLock::new(HashMap::new()),
        }
    }

    /// Adds a connection to a group; joining twice is a no-op
    pub async fn join(&self, group: GroupName, connection: &ConnectionHandle) {
        loop {
            {
                let groups = self.groups.read().await;
                if let Some(members) = groups.get(&group) {
                    // insert while the outer read lock pins the group against pruning
                    members.write().await.insert(connection.id, connection.clone());
                    break;
                }
            }
            self.groups.write().await.entry(group).or_default();
        }

        self.memberships
            .write()
            .await
            .entry(connection.id)
            .or_default()
            .insert(group);

        tracing::debug!(connection_id = %connection.id, group = %group, "Joined group");
    }

    /// Removes a connection from one group; no-op when it is not a member
    pub async fn leave(&self, group: GroupName, connection_id: ConnectionId) {
        {
            let mut memberships = self.memberships.write().await;
            if let Some(groups) = memberships.get_mut(&connection_id) {
                groups.remove(&group);
                if groups.is_empty() {
                    memberships.remove(&connection_id);
                }
            }
        }
        self.remove_member(group, connection_id).await;
    }

    /// Removes a connection from every group it belongs to and returns those groups
    pub async fn leave_all(&self, connection_id: ConnectionId) -> Vec<GroupName> {
        let groups: Vec<GroupName> = self
            .memberships
            .write()
            .await
            .remove(&connection_id)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();

        for group in &groups {
            self.remove_member(*group, connection_id).await;
        }

        tracing::debug!(connection_id = %connection_id, groups = groups.len(), "Left all groups");
        groups
    }

    async fn remove_member(&self, group: GroupName, connection_id: ConnectionId) {
        let now_empty = {
            let groups = self.groups.read().await;
            match groups.get(&group) {
                Some(members) => {
                    let mut members = members.write().await;
                    members.remove(&connection_id);
                    members.is_empty()
                }
                None => false,
            }
        };

        if now_empty {
            let mut groups = self.groups.write().await;
            let still_empty = match groups.get(&group) {
                Some(members) => members.read().await.is_empty(),
                None => false,
            };
            if still_empty {
                groups.remove(&group);
            }
        }
    }

    /// Delivers an event to every current member of a group.
    ///
    /// Members are snapshotted under the group's lock and then delivered to
    /// without holding it. A member whose queue is full or closed is skipped.
    /// Returns how many members accepted the event.
    pub async fn publish(&self, group: GroupName, event: &Event) -> Result<usize> {
        let payload: Payload = Arc::from(event.to_json()?);
        Ok(self.publish_payload(group, event.kind().as_str(), payload).await)
    }

    pub(crate) async fn publish_payload(&self, group: GroupName, kind: &str, payload: Payload) -> usize {
        let members = {
            let groups = self.groups.read().await;
            groups.get(&group).cloned()
        };

        let Some(members) = members else {
            tracing::debug!(group = %group, kind, "Publish to empty group");
            return 0;
        };

        let snapshot: Vec<ConnectionHandle> = members.read().await.values().cloned().collect();

        let mut delivered = 0;
        for member in &snapshot {
            match member.deliver(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::debug!(group = %group, kind, error = %e, "Skipped member"),
            }
        }

        tracing::debug!(group = %group, kind, delivered, members = snapshot.len(), "Published event");
        delivered
    }

    pub async fn members(&self, group: GroupName) -> Vec<ConnectionId> {
        let members = {
            let groups = self.groups.read().await;
            groups.get(&group).cloned()
        };
        match members {
            Some(members) => members.read().await.keys().copied().collect(),
            None => Vec::new(),
        }
    }

    pub async fn groups_of(&self, connection_id: ConnectionId) -> Vec<GroupName> {
        self.memberships
            .read()
            .await
            .get(&connection_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn group_count(&self) -> usize {
        self.groups.read().await.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.memberships.read().await.len()
    }
}
