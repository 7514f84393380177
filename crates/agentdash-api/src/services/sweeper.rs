// Idle session sweeper
//
// Periodically marks sessions without recent activity as stopped and tells
// subscribers about each transition.

use agentdash_core::{BroadcastHub, SessionRegistry};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Run one sweep. Returns the number of sessions stopped.
pub fn sweep_once(registry: &SessionRegistry, hub: &BroadcastHub) -> usize {
    let stopped = registry.sweep_idle(Utc::now());
    let count = stopped.len();
    for state in stopped {
        tracing::debug!(app = %state.app, session_id = %state.session_id, "session idle, stopped");
        hub.publish_session(state);
    }
    count
}

pub fn spawn_idle_sweeper(
    registry: Arc<SessionRegistry>,
    hub: BroadcastHub,
    interval: Duration,
) -> JoinHandle<()> {
    tracing::info!(
        interval_secs = interval.as_secs(),
        idle_timeout_secs = registry.idle_timeout().as_secs(),
        "idle session sweeper started"
    );
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Skip the immediate first tick
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep_once(&registry, &hub);
        }
    })
}
