// Tab synchronization between local windows and workspace documents.

pub mod detector;
pub mod guard;
pub mod inbound;
pub mod outbound;
pub mod registry;
pub mod service;
pub mod throttle;

use std::time::Duration;

pub use registry::{BindingStore, MemoryBindingStore, MembershipRegistry};
pub use service::{SyncError, SyncService};

/// Timing knobs for the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTuning {
    /// Minimum spacing between publishes of the same (kind, tab).
    pub throttle: Duration,
    /// Quiet period before a burst of remote documents is reconciled.
    pub debounce: Duration,
    /// How long a window stays initializing after its last restore.
    pub init_settle: Duration,
    /// Hard cap on the initializing flag.
    pub max_init_hold: Duration,
    /// Lifetime of an expected-echo marker.
    pub echo_ttl: Duration,
    /// Bound on connectivity checks and status reads.
    pub connect_timeout: Duration,
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            throttle: Duration::from_millis(1000),
            debounce: Duration::from_millis(500),
            init_settle: Duration::from_millis(2000),
            max_init_hold: guard::DEFAULT_MAX_HOLD,
            echo_ttl: Duration::from_millis(3000),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
