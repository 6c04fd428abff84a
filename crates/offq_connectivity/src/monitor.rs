use tokio::sync::watch;
use tracing::info;

pub trait ConnectivityMonitor: Send + Sync {
    fn is_reachable(&self) -> bool;

    fn subscribe(&self) -> ReachableEvents;
}

/// Value published on the watch channel. `edges` counts unreachable to
/// reachable transitions, so a flap that is overwritten before a subscriber
/// looks is still seen as a new edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Reachability {
    reachable: bool,
    edges: u64,
}

/// Yields once per unreachable-to-reachable transition. Several transitions
/// that happen before the subscriber polls collapse into a single event.
#[derive(Debug)]
pub struct ReachableEvents {
    rx: watch::Receiver<Reachability>,
    seen_edges: u64,
}

impl ReachableEvents {
    fn new(rx: watch::Receiver<Reachability>) -> Self {
        let seen_edges = rx.borrow().edges;
        Self { rx, seen_edges }
    }

    /// Waits for the next transition to reachable. Returns `None` once the
    /// publishing side is gone.
    pub async fn recv(&mut self) -> Option<()> {
        loop {
            self.rx.changed().await.ok()?;
            let edges = self.rx.borrow_and_update().edges;
            if edges != self.seen_edges {
                self.seen_edges = edges;
                return Some(());
            }
        }
    }
}

/// Watch-channel backed reachability flag. Reporting the current value again
/// publishes nothing, so subscribers only see real transitions.
#[derive(Debug)]
pub struct ConnectivityState {
    tx: watch::Sender<Reachability>,
}

impl ConnectivityState {
    pub fn new(reachable: bool) -> Self {
        let (tx, _) = watch::channel(Reachability {
            reachable,
            edges: 0,
        });
        Self { tx }
    }

    /// Returns `true` when the call changed the state.
    pub fn set_reachable(&self, reachable: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if current.reachable == reachable {
                return false;
            }
            current.reachable = reachable;
            if reachable {
                current.edges = current.edges.wrapping_add(1);
            }
            true
        });
        if changed {
            info!(reachable, "connectivity changed");
        }
        changed
    }
}

impl ConnectivityMonitor for ConnectivityState {
    fn is_reachable(&self) -> bool {
        self.tx.borrow().reachable
    }

    fn subscribe(&self) -> ReachableEvents {
        ReachableEvents::new(self.tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn fires_once_per_transition() {
        let state = ConnectivityState::new(false);
        let mut events = state.subscribe();

        assert!(state.set_reachable(true));
        assert_eq!(events.recv().await, Some(()));

        // repeated online reports are not transitions
        assert!(!state.set_reachable(true));
        let pending = tokio::time::timeout(Duration::from_millis(20), events.recv()).await;
        assert!(pending.is_err());

        assert!(state.set_reachable(false));
        assert!(state.set_reachable(true));
        assert_eq!(events.recv().await, Some(()));
        assert!(state.is_reachable());
    }

    #[tokio::test]
    async fn going_offline_is_not_an_event() {
        let state = ConnectivityState::new(true);
        let mut events = state.subscribe();

        state.set_reachable(false);
        let pending = tokio::time::timeout(Duration::from_millis(20), events.recv()).await;
        assert!(pending.is_err());
        assert!(!state.is_reachable());
    }

    #[tokio::test]
    async fn flap_between_polls_still_fires() {
        let state = ConnectivityState::new(true);
        let mut events = state.subscribe();

        assert!(state.set_reachable(false));
        assert!(state.set_reachable(true));
        let fired = tokio::time::timeout(Duration::from_millis(50), events.recv()).await;
        assert_eq!(fired.expect("edge delivered"), Some(()));

        // several flaps before polling collapse into one event
        state.set_reachable(false);
        state.set_reachable(true);
        state.set_reachable(false);
        state.set_reachable(true);
        assert_eq!(events.recv().await, Some(()));
        let pending = tokio::time::timeout(Duration::from_millis(20), events.recv()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn ends_when_state_is_dropped() {
        let state = ConnectivityState::new(false);
        let mut events = state.subscribe();
        drop(state);
        assert_eq!(events.recv().await, None);
    }
}
