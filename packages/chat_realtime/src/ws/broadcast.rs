//! Broadcast Engine
//!
//! Fans an event out to the live connections of a conversation's
//! participants. Each recipient gets a non-blocking enqueue, so a stalled
//! client never holds up the others.

use std::sync::Arc;
use tracing::{debug, error};

use super::connection::Delivery;
use super::protocol::ServerEvent;
use super::registry::SessionRegistry;
use super::resolver::ParticipantResolver;
use crate::directory::{DirectoryError, UserId};
use crate::metrics::ServerMetrics;

/// Outcome of a fanout. Partial delivery is normal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Users whose connection accepted the frame.
    pub delivered: Vec<UserId>,
    /// Recipients with no live connection.
    pub offline: usize,
    /// Recipients whose queue was full or whose connection was closing.
    pub dropped: usize,
}

impl DeliveryReport {
    fn record(&mut self, user_id: &str, delivery: Option<Delivery>) {
        match delivery {
            Some(Delivery::Sent) => self.delivered.push(user_id.to_string()),
            Some(Delivery::NotOpen) | Some(Delivery::QueueFull) => self.dropped += 1,
            None => self.offline += 1,
        }
    }
}

#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<SessionRegistry>,
    resolver: ParticipantResolver,
    metrics: Arc<ServerMetrics>,
}

impl Broadcaster {
    pub fn new(
        registry: Arc<SessionRegistry>,
        resolver: ParticipantResolver,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            registry,
            resolver,
            metrics,
        }
    }

    /// Deliver `event` to every online participant of `conversation_id`.
    pub async fn broadcast(
        &self,
        conversation_id: &str,
        event: &ServerEvent,
    ) -> Result<DeliveryReport, DirectoryError> {
        self.broadcast_except(conversation_id, event, None).await
    }

    /// Like [`broadcast`](Self::broadcast) but skips `except`.
    pub async fn broadcast_except(
        &self,
        conversation_id: &str,
        event: &ServerEvent,
        except: Option<&str>,
    ) -> Result<DeliveryReport, DirectoryError> {
        let participants = self.resolver.participants(conversation_id).await?;
        let recipients = participants
            .iter()
            .map(String::as_str)
            .filter(|user_id| Some(*user_id) != except);

        let report = self.send_to_users(recipients, event);
        debug!(
            conversation_id,
            event = event.kind(),
            delivered = report.delivered.len(),
            offline = report.offline,
            dropped = report.dropped,
            "Broadcast"
        );
        Ok(report)
    }

    /// Deliver `event` to each listed user that is online. The frame is
    /// encoded once and shared.
    pub fn send_to_users<'a>(
        &self,
        user_ids: impl IntoIterator<Item = &'a str>,
        event: &ServerEvent,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let frame = match event.encode() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode {}: {}", event.kind(), e);
                return report;
            }
        };

        for user_id in user_ids {
            let delivery = self
                .registry
                .lookup(user_id)
                .map(|conn| conn.send_text(frame.clone()));
            report.record(user_id, delivery);
        }

        self.metrics.events_sent(report.delivered.len() as u64);
        if report.dropped > 0 {
            self.metrics.events_dropped(report.dropped as u64);
        }
        report
    }

    /// Deliver `event` to a single user's live connection, if any.
    pub fn send_to_user(&self, user_id: &str, event: &ServerEvent) -> Option<Delivery> {
        let conn = self.registry.lookup(user_id)?;
        let delivery = conn.send_event(event);
        match delivery {
            Delivery::Sent => self.metrics.events_sent(1),
            _ => self.metrics.events_dropped(1),
        }
        Some(delivery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{authed_connection, seeded_repository};
    use crate::ws::connection::Outbound;

    async fn broadcaster() -> (Broadcaster, Arc<SessionRegistry>) {
        let registry = Arc::new(SessionRegistry::new());
        let resolver = ParticipantResolver::new(seeded_repository().await);
        let b = Broadcaster::new(registry.clone(), resolver, Arc::new(ServerMetrics::new()));
        (b, registry)
    }

    fn event() -> ServerEvent {
        ServerEvent::MessageNew {
            conversation_id: "conv-abc".into(),
            message: serde_json::json!({ "content": "hi" }),
        }
    }

    #[tokio::test]
    async fn test_reaches_online_participants_only() {
        let (b, registry) = broadcaster().await;
        // alice and carol are participants of conv-abc; dave is not
        let (alice, mut alice_rx) = authed_connection("alice", 8);
        let (carol, mut carol_rx) = authed_connection("carol", 8);
        let (dave, mut dave_rx) = authed_connection("dave", 8);
        registry.register(&alice);
        registry.register(&carol);
        registry.register(&dave);

        let report = b.broadcast("conv-abc", &event()).await.unwrap();

        let mut delivered = report.delivered.clone();
        delivered.sort();
        assert_eq!(delivered, vec!["alice".to_string(), "carol".to_string()]);
        // bob is a participant but offline
        assert_eq!(report.offline, 1);
        assert_eq!(report.dropped, 0);

        assert!(matches!(alice_rx.try_recv(), Ok(Outbound::Text(_))));
        assert!(matches!(carol_rx.try_recv(), Ok(Outbound::Text(_))));
        assert!(dave_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_except_skips_sender() {
        let (b, registry) = broadcaster().await;
        let (alice, mut alice_rx) = authed_connection("alice", 8);
        let (bob, mut bob_rx) = authed_connection("bob", 8);
        registry.register(&alice);
        registry.register(&bob);

        let report = b
            .broadcast_except("conv-ab", &event(), Some("alice"))
            .await
            .unwrap();
        assert_eq!(report.delivered, vec!["bob".to_string()]);
        assert!(alice_rx.try_recv().is_err());
        assert!(bob_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_full_recipient_does_not_block_others() {
        let (b, registry) = broadcaster().await;
        let (alice, _alice_rx) = authed_connection("alice", 1);
        let (bob, mut bob_rx) = authed_connection("bob", 8);
        registry.register(&alice);
        registry.register(&bob);

        // Fill alice's single-slot queue
        assert!(alice.send_text("filler".into()).is_sent());

        let report = b.broadcast("conv-ab", &event()).await.unwrap();
        assert_eq!(report.delivered, vec!["bob".to_string()]);
        assert_eq!(report.dropped, 1);
        assert!(bob_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_empty() {
        let (b, _registry) = broadcaster().await;
        let report = b.broadcast("nope", &event()).await.unwrap();
        assert_eq!(report, DeliveryReport::default());
    }

    #[tokio::test]
    async fn test_send_to_user() {
        let (b, registry) = broadcaster().await;
        assert!(b.send_to_user("alice", &ServerEvent::AuthSuccess).is_none());

        let (alice, mut rx) = authed_connection("alice", 8);
        registry.register(&alice);
        assert_eq!(
            b.send_to_user("alice", &ServerEvent::AuthSuccess),
            Some(Delivery::Sent)
        );
        match rx.try_recv() {
            Ok(Outbound::Text(t)) => assert_eq!(&*t, r#"{"type":"auth:success"}"#),
            other => panic!("unexpected {:?}", other),
        }
    }
}
