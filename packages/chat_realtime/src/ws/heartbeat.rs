//! Liveness checking for registered connections.
//!
//! Every tick, a connection that has not answered the previous ping is
//! terminated; the rest get a fresh ping with their liveness flag cleared.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::registry::SessionRegistry;
use crate::metrics::ServerMetrics;

/// Run one liveness pass. Returns the number of connections terminated.
pub fn sweep(registry: &SessionRegistry, metrics: &ServerMetrics) -> usize {
    let mut terminated = 0;
    for conn in registry.connections() {
        if !conn.is_open() {
            continue;
        }
        if !conn.is_alive() {
            if conn.close(None) {
                info!(
                    user_id = conn.user_id().unwrap_or_default(),
                    conn_id = %conn.id(),
                    "Terminating unresponsive connection"
                );
                metrics.heartbeat_terminated();
                terminated += 1;
            }
            continue;
        }
        conn.ping();
    }
    terminated
}

pub async fn run(
    registry: Arc<SessionRegistry>,
    metrics: Arc<ServerMetrics>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let terminated = sweep(&registry, &metrics);
                if terminated > 0 {
                    debug!(terminated, "Heartbeat sweep");
                }
            }
        }
    }
    debug!("Heartbeat stopped");
}
