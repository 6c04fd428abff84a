use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Sub-retries of the network call within one outer attempt.
    pub retry: BackoffPolicy,
    /// Follow-up drains after a pass that left failed records. `max_attempts`
    /// caps how many consecutive failing passes get an automatic follow-up;
    /// `None` leaves failed records for the next natural trigger.
    pub redrain: Option<BackoffPolicy>,
}
