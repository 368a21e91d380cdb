//! Session Registry
//!
//! Maps each user to at most one live connection. Entries are non-owning;
//! the lifecycle task holds the connection and removes its entry on
//! teardown.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use super::connection::Connection;
use super::protocol::CloseCode;
use crate::directory::UserId;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<UserId, Weak<Connection>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `conn` for its authenticated user. A prior connection for the
    /// same user is closed with `ReconnectedElsewhere` and returned.
    ///
    /// Eviction and install happen under the same map shard lock, so two
    /// concurrent registrations for one user are ordered and exactly one
    /// survives.
    pub fn register(&self, conn: &Arc<Connection>) -> Option<Arc<Connection>> {
        let user_id = conn.user_id()?.to_string();

        match self.sessions.entry(user_id) {
            Entry::Occupied(mut entry) => {
                let previous = entry.insert(Arc::downgrade(conn)).upgrade();
                match previous {
                    Some(prev) if prev.id() != conn.id() => {
                        prev.close(Some(CloseCode::ReconnectedElsewhere));
                        info!(
                            user_id = %entry.key(),
                            old_conn = %prev.id(),
                            new_conn = %conn.id(),
                            "Evicted previous session"
                        );
                        Some(prev)
                    }
                    _ => None,
                }
            }
            Entry::Vacant(entry) => {
                debug!(user_id = %entry.key(), conn_id = %conn.id(), "Registered session");
                entry.insert(Arc::downgrade(conn));
                None
            }
        }
    }

    /// Remove the entry for `user_id` only if it still points at
    /// `connection_id`. Returns true if an entry was removed.
    pub fn remove(&self, user_id: &str, connection_id: &str) -> bool {
        self.sessions
            .remove_if(user_id, |_, weak| match weak.upgrade() {
                Some(conn) => conn.id() == connection_id,
                // Dangling entries are always reclaimable
                None => true,
            })
            .is_some()
    }

    pub fn lookup(&self, user_id: &str) -> Option<Arc<Connection>> {
        self.sessions.get(user_id).and_then(|weak| weak.upgrade())
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.lookup(user_id).is_some()
    }

    pub fn user_ids(&self) -> Vec<UserId> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.sessions
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
