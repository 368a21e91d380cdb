//! Per-connection handle and state machine.
//!
//! A `Connection` is shared between the lifecycle task that owns the socket,
//! the session registry, and any task fanning out events. All transitions go
//! through [`Connection::transition`] so concurrent triggers collapse into a
//! single state change.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::protocol::{CloseCode, ServerEvent};
use crate::directory::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Authenticating = 1,
    Authenticated = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Authenticating,
            2 => Self::Authenticated,
            _ => Self::Closed,
        }
    }
}

/// Frames queued for the socket writer.
#[derive(Debug, Clone)]
pub enum Outbound {
    Text(Arc<str>),
    Ping,
}

/// Result of a non-blocking enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    NotOpen,
    QueueFull,
}

impl Delivery {
    pub fn is_sent(self) -> bool {
        self == Self::Sent
    }
}

pub struct Connection {
    id: String,
    state: AtomicU8,
    user_id: OnceLock<UserId>,
    alive: AtomicBool,
    session_released: AtomicBool,
    close_code: OnceLock<CloseCode>,
    outbound: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("user_id", &self.user_id.get())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Create a connection with a bounded outbound queue. The receiver goes to
    /// the socket writer task.
    pub fn new(queue_capacity: usize) -> (Arc<Self>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let conn = Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            user_id: OnceLock::new(),
            alive: AtomicBool::new(true),
            session_released: AtomicBool::new(false),
            close_code: OnceLock::new(),
            outbound: tx,
            cancel: CancellationToken::new(),
        });
        (conn, rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Owning user, present once authenticated.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.get().map(String::as_str)
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Authenticated
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Move `from -> to` atomically. Returns false if another transition won.
    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// `Connecting -> Authenticating`, done as soon as the socket is accepted.
    pub fn begin_auth(&self) -> bool {
        self.transition(ConnectionState::Connecting, ConnectionState::Authenticating)
    }

    /// `Authenticating -> Authenticated`. Happens at most once per connection.
    pub fn authenticate(&self, user_id: &str) -> bool {
        if self.state() != ConnectionState::Authenticating {
            return false;
        }
        if self.user_id.set(user_id.to_string()).is_err() {
            return false;
        }
        self.transition(ConnectionState::Authenticating, ConnectionState::Authenticated)
    }

    /// Move to `Closed` from any state. The first caller's code wins and the
    /// writer is signalled to flush and send the close frame.
    ///
    /// Returns true if this call performed the transition.
    pub fn close(&self, code: Option<CloseCode>) -> bool {
        let prev = self
            .state
            .swap(ConnectionState::Closed as u8, Ordering::AcqRel);
        if prev == ConnectionState::Closed as u8 {
            return false;
        }
        if let Some(code) = code {
            let _ = self.close_code.set(code);
        }
        self.cancel.cancel();
        true
    }

    pub fn close_code(&self) -> Option<CloseCode> {
        self.close_code.get().copied()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Enqueue an encoded frame without waiting for queue space.
    pub fn send_text(&self, frame: Arc<str>) -> Delivery {
        if !self.is_open() {
            return Delivery::NotOpen;
        }
        match self.outbound.try_send(Outbound::Text(frame)) {
            Ok(()) => Delivery::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::QueueFull,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::NotOpen,
        }
    }

    pub fn send_event(&self, event: &ServerEvent) -> Delivery {
        match event.encode() {
            Ok(frame) => self.send_text(frame),
            Err(e) => {
                tracing::error!(conn_id = %self.id, "Failed to encode {}: {}", event.kind(), e);
                Delivery::NotOpen
            }
        }
    }

    /// Clear the liveness flag and queue a transport ping.
    pub fn ping(&self) -> Delivery {
        if !self.is_open() {
            return Delivery::NotOpen;
        }
        self.alive.store(false, Ordering::Release);
        match self.outbound.try_send(Outbound::Ping) {
            Ok(()) => Delivery::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::QueueFull,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::NotOpen,
        }
    }

    /// Called on pong.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Release);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Claim the right to run session teardown (registry removal and offline
    /// notification). Only the first caller gets true.
    pub fn take_session(&self) -> bool {
        !self.session_released.swap(true, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authed(user: &str) -> (Arc<Connection>, mpsc::Receiver<Outbound>) {
        let (conn, rx) = Connection::new(4);
        assert!(conn.begin_auth());
        assert!(conn.authenticate(user));
        (conn, rx)
    }

    #[test]
    fn test_state_progression() {
        let (conn, _rx) = Connection::new(4);
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(conn.user_id().is_none());

        assert!(conn.begin_auth());
        assert_eq!(conn.state(), ConnectionState::Authenticating);
        assert!(!conn.begin_auth());

        assert!(conn.authenticate("alice"));
        assert_eq!(conn.state(), ConnectionState::Authenticated);
        assert_eq!(conn.user_id(), Some("alice"));

        // Exactly once
        assert!(!conn.authenticate("bob"));
        assert_eq!(conn.user_id(), Some("alice"));
    }

    #[test]
    fn test_cannot_authenticate_after_close() {
        let (conn, _rx) = Connection::new(4);
        conn.begin_auth();
        assert!(conn.close(Some(CloseCode::NoTokenProvided)));
        assert!(!conn.authenticate("alice"));
        assert!(conn.is_closed());
    }

    #[test]
    fn test_close_is_single_transition() {
        let (conn, _rx) = authed("alice");
        let token = conn.cancel_token();

        assert!(conn.close(Some(CloseCode::ReconnectedElsewhere)));
        assert!(!conn.close(Some(CloseCode::ServerShutdown)));
        assert!(!conn.close(None));

        assert_eq!(conn.close_code(), Some(CloseCode::ReconnectedElsewhere));
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_send_requires_authenticated() {
        let (conn, mut rx) = Connection::new(4);
        conn.begin_auth();
        assert_eq!(conn.send_text("x".into()), Delivery::NotOpen);

        conn.authenticate("alice");
        assert_eq!(conn.send_text("x".into()), Delivery::Sent);
        assert!(matches!(rx.try_recv(), Ok(Outbound::Text(t)) if &*t == "x"));

        conn.close(None);
        assert_eq!(conn.send_text("y".into()), Delivery::NotOpen);
    }

    #[test]
    fn test_full_queue_reports_without_blocking() {
        let (conn, _rx) = Connection::new(2);
        conn.begin_auth();
        conn.authenticate("alice");

        assert_eq!(conn.send_text("1".into()), Delivery::Sent);
        assert_eq!(conn.send_text("2".into()), Delivery::Sent);
        assert_eq!(conn.send_text("3".into()), Delivery::QueueFull);
    }

    #[test]
    fn test_dropped_receiver_is_not_open() {
        let (conn, rx) = authed("alice");
        drop(rx);
        assert_eq!(conn.send_text("x".into()), Delivery::NotOpen);
    }

    #[test]
    fn test_ping_clears_liveness() {
        let (conn, mut rx) = authed("alice");
        assert!(conn.is_alive());

        assert_eq!(conn.ping(), Delivery::Sent);
        assert!(!conn.is_alive());
        assert!(matches!(rx.try_recv(), Ok(Outbound::Ping)));

        conn.mark_alive();
        assert!(conn.is_alive());
    }

    #[test]
    fn test_take_session_once() {
        let (conn, _rx) = authed("alice");
        assert!(conn.take_session());
        assert!(!conn.take_session());
    }

    #[test]
    fn test_ids_are_unique() {
        let (a, _ra) = Connection::new(1);
        let (b, _rb) = Connection::new(1);
        assert_ne!(a.id(), b.id());
    }
}
