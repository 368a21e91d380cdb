//! Realtime hub
//!
//! Owns the session registry and every component built on it. Constructed
//! once at startup and injected into the WebSocket handler and the request
//! layer; tests build a fresh hub each.

use std::sync::{Arc, Mutex};

use chat_auth::TokenVerifier;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::broadcast::{Broadcaster, DeliveryReport};
use super::connection::{Connection, Delivery};
use super::dispatch::EventRouter;
use super::handshake::HandshakeError;
use super::heartbeat;
use super::presence::PresenceTracker;
use super::protocol::{CloseCode, GroupChange, GroupUpdate, ServerEvent};
use super::registry::SessionRegistry;
use super::resolver::ParticipantResolver;
use crate::config::RealtimeConfig;
use crate::directory::{Directory, User, UserId};
use crate::metrics::ServerMetrics;

pub struct RealtimeHub {
    config: RealtimeConfig,
    registry: Arc<SessionRegistry>,
    directory: Arc<dyn Directory>,
    verifier: Arc<dyn TokenVerifier>,
    broadcaster: Broadcaster,
    presence: PresenceTracker,
    router: EventRouter,
    metrics: Arc<ServerMetrics>,
    shutdown: CancellationToken,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeHub {
    pub fn new(
        config: RealtimeConfig,
        directory: Arc<dyn Directory>,
        verifier: Arc<dyn TokenVerifier>,
        metrics: Arc<ServerMetrics>,
    ) -> Arc<Self> {
        let registry = Arc::new(SessionRegistry::new());
        let resolver = ParticipantResolver::new(directory.clone());
        let broadcaster = Broadcaster::new(registry.clone(), resolver.clone(), metrics.clone());
        let presence = PresenceTracker::new(registry.clone(), resolver.clone(), broadcaster.clone());
        let router = EventRouter::new(resolver, broadcaster.clone(), metrics.clone());

        Arc::new(Self {
            config,
            registry,
            directory,
            verifier,
            broadcaster,
            presence,
            router,
            metrics,
            shutdown: CancellationToken::new(),
            heartbeat_task: Mutex::new(None),
        })
    }

    /// Start the heartbeat loop. Calling again while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let Ok(mut slot) = self.heartbeat_task.lock() else {
            return;
        };
        if slot.is_some() || self.shutdown.is_cancelled() {
            return;
        }
        *slot = Some(tokio::spawn(heartbeat::run(
            self.registry.clone(),
            self.metrics.clone(),
            self.config.heartbeat_interval,
            self.shutdown.clone(),
        )));
        info!(
            interval_secs = self.config.heartbeat_interval.as_secs(),
            "Realtime hub started"
        );
    }

    /// Stop the heartbeat and close every session with "server shutting down".
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let task = self.heartbeat_task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            let _ = task.await;
        }

        let connections = self.registry.connections();
        let count = connections.len();
        for conn in connections {
            conn.close(Some(CloseCode::ServerShutdown));
        }
        info!(closed = count, "Realtime hub shut down");
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn metrics(&self) -> &Arc<ServerMetrics> {
        &self.metrics
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    /// Resolve a presented token to an existing user.
    pub async fn authenticate(&self, token: &str) -> Result<User, HandshakeError> {
        let user_id = self.verifier.verify_token(token)?;
        match self.directory.find_user_by_id(&user_id).await? {
            Some(user) => Ok(user),
            None => Err(HandshakeError::UserNotFound(user_id)),
        }
    }

    /// Promote `conn` to an authenticated session for `user`.
    ///
    /// Order on the wire for the new client: `auth:success`, then the
    /// `users:online` snapshot. Counterparts hear `user:online` afterwards.
    /// Returns false if the connection closed before it could authenticate.
    pub async fn open_session(&self, conn: &Arc<Connection>, user: &User) -> bool {
        if !conn.authenticate(&user.id) {
            return false;
        }
        // Queued before registering: once registered, broadcasts can reach
        // this queue, and the client must see the ack ahead of any of them.
        conn.send_event(&ServerEvent::AuthSuccess);

        if self.registry.register(conn).is_some() {
            self.metrics.session_evicted();
        }
        self.metrics.session_authenticated();
        info!(user_id = %user.id, conn_id = %conn.id(), "Session authenticated");

        let online_user_ids = match self.presence.online_counterparts(&user.id).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(user_id = %user.id, "Failed to resolve online counterparts: {}", e);
                self.metrics.directory_error();
                Vec::new()
            }
        };
        conn.send_event(&ServerEvent::UsersOnline { online_user_ids });

        if let Err(e) = self.presence.mark_online(&user.id).await {
            warn!(user_id = %user.id, "Failed to announce presence: {}", e);
            self.metrics.directory_error();
        }
        true
    }

    /// Tear down the session held by `conn`. Safe to call any number of
    /// times; only the first call removes the registry entry and announces
    /// the user offline. Returns true if this call ended the user's live
    /// session.
    pub async fn disconnect(&self, conn: &Connection) -> bool {
        conn.close(None);

        let Some(user_id) = conn.user_id() else {
            return false;
        };
        if !conn.take_session() {
            return false;
        }

        if !self.registry.remove(user_id, conn.id()) {
            debug!(user_id, conn_id = %conn.id(), "Superseded session closed");
            return false;
        }
        info!(user_id, conn_id = %conn.id(), "Session closed");

        match self.presence.mark_offline(user_id).await {
            Ok(_) => true,
            Err(e) => {
                warn!(user_id, "Failed to announce offline: {}", e);
                self.metrics.directory_error();
                false
            }
        }
    }

    // =========================================================================
    // Fanout surface for the request layer
    // =========================================================================

    /// Deliver `event` to every online participant of `conversation_id`.
    /// Directory failures are logged and yield an empty report.
    pub async fn broadcast(&self, conversation_id: &str, event: &ServerEvent) -> DeliveryReport {
        match self.broadcaster.broadcast(conversation_id, event).await {
            Ok(report) => report,
            Err(e) => {
                warn!(conversation_id, event = event.kind(), "Broadcast failed: {}", e);
                self.metrics.directory_error();
                DeliveryReport::default()
            }
        }
    }

    /// `message:new` to the conversation, after the message is stored.
    pub async fn notify_new_message(
        &self,
        conversation_id: &str,
        message: serde_json::Value,
    ) -> DeliveryReport {
        let event = ServerEvent::MessageNew {
            conversation_id: conversation_id.to_string(),
            message,
        };
        self.broadcast(conversation_id, &event).await
    }

    /// `group:update` to the group's current participants. A user who was
    /// removed or left is told directly, since membership no longer covers
    /// them.
    pub async fn notify_group_update(&self, group_id: &str, change: GroupChange) -> DeliveryReport {
        let departed = match &change {
            GroupChange::Removed { user_id, .. } | GroupChange::Left { user_id } => {
                Some(user_id.clone())
            }
            _ => None,
        };
        let event = ServerEvent::GroupUpdate(GroupUpdate {
            group_id: group_id.to_string(),
            change,
        });

        let mut report = self.broadcast(group_id, &event).await;
        if let Some(user_id) = departed {
            if !report.delivered.contains(&user_id) && self.send_to_user(&user_id, &event) {
                report.delivered.push(user_id);
            }
        }
        report
    }

    /// Deliver `event` to one user. Returns true if it was enqueued.
    pub fn send_to_user(&self, user_id: &str, event: &ServerEvent) -> bool {
        matches!(
            self.broadcaster.send_to_user(user_id, event),
            Some(Delivery::Sent)
        )
    }

    pub fn is_user_online(&self, user_id: &str) -> bool {
        self.presence.is_online(user_id)
    }

    pub fn list_online_users(&self) -> Vec<UserId> {
        self.presence.list_online()
    }

    /// Number of authenticated, registered connections.
    pub fn connected_count(&self) -> usize {
        self.registry.len()
    }
}
