use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::monitor::ConnectivityState;

/// Polls `probe` every `interval` and feeds the answer into `state`.
///
/// The task runs until aborted.
pub fn spawn_heartbeat<F, Fut>(
    state: Arc<ConnectivityState>,
    interval: Duration,
    mut probe: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let reachable = probe().await;
            debug!(reachable, "heartbeat probe");
            state.set_reachable(reachable);
        }
    })
}
