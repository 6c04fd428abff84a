//! Reachability tracking for the upload queue.
//!
//! The queue only consumes two things: a point query ([`ConnectivityMonitor::is_reachable`])
//! and an edge-triggered stream of "became reachable" events. Where the signal
//! comes from (OS callbacks, a heartbeat against the transfer target, a test
//! toggling it by hand) is up to the implementation.

mod heartbeat;
mod monitor;

pub use heartbeat::spawn_heartbeat;
pub use monitor::{ConnectivityMonitor, ConnectivityState, ReachableEvents};
