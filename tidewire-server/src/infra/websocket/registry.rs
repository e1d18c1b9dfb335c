//! Membership bookkeeping for the gateway: live sockets, the user to
//! connections map and its reverse index. Not synchronized on its own; the
//! gateway keeps it behind one mutex so the three maps never disagree.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use thiserror::Error;
use tidewire_model::{ConnectionId, UserId};

use super::connection::Connection;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),
    #[error("connection is already subscribed as {current}")]
    AlreadyBound { current: UserId },
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sockets: HashMap<ConnectionId, Arc<Connection>>,
    members: HashMap<UserId, BTreeSet<ConnectionId>>,
    owners: HashMap<ConnectionId, UserId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, connection: Arc<Connection>) {
        self.sockets.insert(connection.id, connection);
    }

    /// Drops the socket and its membership. Returns the user it belonged to.
    pub fn remove(&mut self, id: ConnectionId) -> Option<UserId> {
        self.sockets.remove(&id);
        let user = self.owners.remove(&id)?;
        self.detach(&user, id);
        Some(user)
    }

    /// Binds `id` to `user` and returns the user's connection count. Binding
    /// again to the same user is a no-op.
    pub fn bind(
        &mut self,
        id: ConnectionId,
        user: &UserId,
    ) -> Result<usize, RegistryError> {
        if !self.sockets.contains_key(&id) {
            return Err(RegistryError::UnknownConnection(id));
        }
        if let Some(current) = self.owners.get(&id)
            && current != user
        {
            return Err(RegistryError::AlreadyBound {
                current: current.clone(),
            });
        }

        self.owners.insert(id, user.clone());
        let set = self.members.entry(user.clone()).or_default();
        set.insert(id);
        Ok(set.len())
    }

    /// Removes the binding if `id` currently belongs to `user`.
    pub fn unbind(&mut self, id: ConnectionId, user: &UserId) -> bool {
        match self.owners.get(&id) {
            Some(current) if current == user => {
                self.owners.remove(&id);
                self.detach(user, id);
                true
            }
            _ => false,
        }
    }

    fn detach(&mut self, user: &UserId, id: ConnectionId) {
        if let Some(set) = self.members.get_mut(user) {
            set.remove(&id);
            if set.is_empty() {
                self.members.remove(user);
            }
        }
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.sockets.contains_key(&id)
    }

    pub fn owner_of(&self, id: ConnectionId) -> Option<&UserId> {
        self.owners.get(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.sockets.get(&id).cloned()
    }

    pub fn connections_for(&self, user: &UserId) -> Vec<Arc<Connection>> {
        self.members
            .get(user)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.sockets.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn member_count(&self, user: &UserId) -> usize {
        self.members.get(user).map(BTreeSet::len).unwrap_or(0)
    }

    pub fn has_user(&self, user: &UserId) -> bool {
        self.members.contains_key(user)
    }

    pub fn connection_count(&self) -> usize {
        self.sockets.len()
    }

    pub fn user_count(&self) -> usize {
        self.members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn socket(registry: &mut ConnectionRegistry) -> ConnectionId {
        let (tx, rx) = mpsc::channel(4);
        // Receiver dropped on purpose: membership does not depend on it.
        drop(rx);
        let connection = Arc::new(Connection::new(tx));
        let id = connection.id;
        registry.insert(connection);
        id
    }

    fn user(raw: &str) -> UserId {
        UserId::new(raw).unwrap()
    }

    #[test]
    fn bind_is_idempotent() {
        let mut registry = ConnectionRegistry::new();
        let c1 = socket(&mut registry);

        assert_eq!(registry.bind(c1, &user("u1")), Ok(1));
        assert_eq!(registry.bind(c1, &user("u1")), Ok(1));
        assert_eq!(registry.member_count(&user("u1")), 1);

        assert_eq!(registry.remove(c1), Some(user("u1")));
        assert!(!registry.has_user(&user("u1")));
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn connection_cannot_hold_two_users() {
        let mut registry = ConnectionRegistry::new();
        let c1 = socket(&mut registry);
        registry.bind(c1, &user("u1")).unwrap();

        assert_eq!(
            registry.bind(c1, &user("u2")),
            Err(RegistryError::AlreadyBound { current: user("u1") })
        );
        assert!(!registry.has_user(&user("u2")));
    }

    #[test]
    fn unbind_deletes_empty_entry_but_keeps_socket() {
        let mut registry = ConnectionRegistry::new();
        let c1 = socket(&mut registry);
        let c2 = socket(&mut registry);
        registry.bind(c1, &user("u1")).unwrap();
        registry.bind(c2, &user("u1")).unwrap();

        assert!(registry.unbind(c1, &user("u1")));
        assert_eq!(registry.member_count(&user("u1")), 1);
        assert!(registry.unbind(c2, &user("u1")));
        assert!(!registry.has_user(&user("u1")));
        assert!(registry.contains(c1));
        assert!(registry.owner_of(c1).is_none());

        assert!(!registry.unbind(c1, &user("u1")));
    }

    #[test]
    fn unknown_connection_cannot_bind() {
        let mut registry = ConnectionRegistry::new();
        let ghost = ConnectionId::new();
        assert_eq!(
            registry.bind(ghost, &user("u1")),
            Err(RegistryError::UnknownConnection(ghost))
        );
    }
}
