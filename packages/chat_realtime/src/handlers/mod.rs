pub mod health;
pub mod presence;
pub mod websocket;

pub use health::{health_handler, health_live_handler, health_ready_handler, metrics_handler};
pub use presence::{list_presence_handler, user_presence_handler};
pub use websocket::websocket_handler;
