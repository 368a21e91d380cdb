//! Realtime WebSocket core
//!
//! - Session registry: one live connection per user, last connect wins
//! - Presence: online set derived from the registry, with change notifications
//! - Event router and broadcast engine: typing indicators and request-layer
//!   notifications fanned out to conversation participants

mod broadcast;
mod connection;
mod dispatch;
mod handler;
mod handshake;
mod heartbeat;
mod hub;
mod presence;
mod protocol;
mod registry;
mod resolver;

pub use broadcast::DeliveryReport;
pub use connection::{Connection, ConnectionState, Delivery, Outbound};
pub use handler::handle_socket;
pub use handshake::HandshakeError;
pub use hub::RealtimeHub;
pub use protocol::{ClientEvent, CloseCode, GroupChange, GroupUpdate, ServerEvent};
pub use registry::SessionRegistry;
