use serde::{Deserialize, Serialize};

/// Point-in-time view of a running pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherStats {
    pub workers: usize,
    pub idle_workers: usize,
    /// Accepted tasks still waiting for an idle worker.
    pub pending_dispatches: usize,
    pub stopping: bool,
    pub stopped: bool,
}
