//! Presence Tracker
//!
//! The online set is the registry's key set; nothing here keeps separate
//! membership, so the two can never drift. This module only turns registry
//! transitions into `user:online` / `user:offline` notifications.
//!
//! Notifications for one user run one at a time under a per-user gate, and
//! each re-reads the registry after resolving counterparts. The last
//! notification to go out for a user therefore always matches the registry.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::broadcast::{Broadcaster, DeliveryReport};
use super::protocol::ServerEvent;
use super::registry::SessionRegistry;
use super::resolver::ParticipantResolver;
use crate::directory::{DirectoryError, UserId};

#[derive(Clone)]
pub struct PresenceTracker {
    registry: Arc<SessionRegistry>,
    resolver: ParticipantResolver,
    broadcaster: Broadcaster,
    gates: Arc<DashMap<UserId, Arc<Mutex<()>>>>,
}

impl PresenceTracker {
    pub fn new(
        registry: Arc<SessionRegistry>,
        resolver: ParticipantResolver,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            registry,
            resolver,
            broadcaster,
            gates: Arc::new(DashMap::new()),
        }
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.registry.contains(user_id)
    }

    /// Sorted snapshot of every online user.
    pub fn list_online(&self) -> Vec<UserId> {
        let mut ids = self.registry.user_ids();
        ids.sort();
        ids
    }

    /// Online users sharing a conversation with `user_id`.
    pub async fn online_counterparts(&self, user_id: &str) -> Result<Vec<UserId>, DirectoryError> {
        let mut online: Vec<UserId> = self
            .resolver
            .counterparts(user_id)
            .await?
            .into_iter()
            .filter(|id| self.registry.contains(id))
            .collect();
        online.sort();
        Ok(online)
    }

    /// Announce `user_id` to its online counterparts. Skipped if the user
    /// is no longer online by the time the announcement would go out.
    pub async fn mark_online(&self, user_id: &str) -> Result<DeliveryReport, DirectoryError> {
        let event = ServerEvent::UserOnline {
            user_id: user_id.to_string(),
        };
        self.notify_transition(user_id, &event, true).await
    }

    /// Announce that `user_id` left. Skipped if a newer session has
    /// registered for the same user by the time it would go out.
    pub async fn mark_offline(&self, user_id: &str) -> Result<DeliveryReport, DirectoryError> {
        let event = ServerEvent::UserOffline {
            user_id: user_id.to_string(),
        };
        self.notify_transition(user_id, &event, false).await
    }

    async fn notify_transition(
        &self,
        user_id: &str,
        event: &ServerEvent,
        online: bool,
    ) -> Result<DeliveryReport, DirectoryError> {
        let gate = self.gates.entry(user_id.to_string()).or_default().clone();
        let result = {
            let _turn = gate.lock().await;
            self.notify_counterparts(user_id, event, online).await
        };
        drop(gate);
        // Only the map holds the gate when nobody else is waiting on it
        self.gates
            .remove_if(user_id, |_, gate| Arc::strong_count(gate) == 1);
        result
    }

    async fn notify_counterparts(
        &self,
        user_id: &str,
        event: &ServerEvent,
        online: bool,
    ) -> Result<DeliveryReport, DirectoryError> {
        if self.is_online(user_id) != online {
            debug!(user_id, event = event.kind(), "Skipping stale presence notification");
            return Ok(DeliveryReport::default());
        }
        let counterparts = self.resolver.counterparts(user_id).await?;
        if self.is_online(user_id) != online {
            debug!(
                user_id,
                event = event.kind(),
                "Presence changed during lookup, skipping notification"
            );
            return Ok(DeliveryReport::default());
        }

        let report = self
            .broadcaster
            .send_to_users(counterparts.iter().map(String::as_str), event);
        debug!(
            user_id,
            event = event.kind(),
            notified = report.delivered.len(),
            "Presence change"
        );
        Ok(report)
    }
}
