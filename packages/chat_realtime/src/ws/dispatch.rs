//! Event Router
//!
//! Interprets inbound application events from an authenticated connection.
//! Nothing decided here ever closes the session: bad frames and unauthorized
//! events are logged and dropped.

use std::sync::Arc;
use tracing::{debug, warn};

use super::broadcast::{Broadcaster, DeliveryReport};
use super::connection::Connection;
use super::protocol::{ClientEvent, InboundError, ServerEvent};
use super::resolver::ParticipantResolver;
use crate::metrics::ServerMetrics;

#[derive(Clone)]
pub struct EventRouter {
    resolver: ParticipantResolver,
    broadcaster: Broadcaster,
    metrics: Arc<ServerMetrics>,
}

impl EventRouter {
    pub fn new(
        resolver: ParticipantResolver,
        broadcaster: Broadcaster,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            resolver,
            broadcaster,
            metrics,
        }
    }

    /// Handle one text frame. Returns the fanout report when the frame
    /// produced outbound traffic.
    pub async fn dispatch_text(&self, conn: &Connection, text: &str) -> Option<DeliveryReport> {
        let user_id = match (conn.is_open(), conn.user_id()) {
            (true, Some(user_id)) => user_id,
            _ => return None,
        };
        self.metrics.event_received();

        let event = match ClientEvent::parse(text) {
            Ok(event) => event,
            Err(InboundError::UnknownType(kind)) => {
                debug!(user_id, conn_id = %conn.id(), kind = %kind, "Ignoring unknown event type");
                self.metrics.malformed_event();
                return None;
            }
            Err(e) => {
                warn!(user_id, conn_id = %conn.id(), "Dropping malformed event: {}", e);
                self.metrics.malformed_event();
                return None;
            }
        };

        self.dispatch(user_id, event).await
    }

    pub async fn dispatch(&self, user_id: &str, event: ClientEvent) -> Option<DeliveryReport> {
        match event {
            ClientEvent::TypingStart { conversation_id } => {
                self.handle_typing(user_id, &conversation_id, true).await
            }
            ClientEvent::TypingStop { conversation_id } => {
                self.handle_typing(user_id, &conversation_id, false).await
            }
        }
    }

    async fn handle_typing(
        &self,
        user_id: &str,
        conversation_id: &str,
        is_typing: bool,
    ) -> Option<DeliveryReport> {
        match self.resolver.is_participant(user_id, conversation_id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(user_id, conversation_id, "Typing from non-participant ignored");
                return None;
            }
            Err(e) => {
                warn!(user_id, conversation_id, "Participant lookup failed: {}", e);
                self.metrics.directory_error();
                return None;
            }
        }

        let event = ServerEvent::TypingUpdate {
            user_id: user_id.to_string(),
            conversation_id: conversation_id.to_string(),
            is_typing,
        };
        match self
            .broadcaster
            .broadcast_except(conversation_id, &event, Some(user_id))
            .await
        {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(conversation_id, "Typing fanout failed: {}", e);
                self.metrics.directory_error();
                None
            }
        }
    }
}
