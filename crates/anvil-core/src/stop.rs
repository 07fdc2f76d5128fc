//! Two-phase stop handshake.
//!
//! The owner of a loop holds a [`StopSignal`]; anyone with a clone may
//! [`request_stop`](StopSignal::request_stop). The loop notices through
//! [`requested`](StopSignal::requested), tears down, then calls
//! [`acknowledge`](StopSignal::acknowledge). Waiters on
//! [`stopped`](StopSignal::stopped) are released at that point.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopPhase {
    Running,
    Requested,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<StopPhase>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(StopPhase::Running);
        Self { tx: Arc::new(tx) }
    }

    /// Ask the owner to stop. Never blocks.
    ///
    /// Returns `true` only for the call that moved the signal out of
    /// `Running`.
    pub fn request_stop(&self) -> bool {
        self.tx.send_if_modified(|phase| {
            if *phase == StopPhase::Running {
                *phase = StopPhase::Requested;
                true
            } else {
                false
            }
        })
    }

    /// Mark teardown as finished.
    pub fn acknowledge(&self) {
        self.tx.send_if_modified(|phase| {
            if *phase == StopPhase::Stopped {
                false
            } else {
                *phase = StopPhase::Stopped;
                true
            }
        });
    }

    pub fn phase(&self) -> StopPhase {
        *self.tx.borrow()
    }

    pub fn is_requested(&self) -> bool {
        self.phase() != StopPhase::Running
    }

    pub fn is_stopped(&self) -> bool {
        self.phase() == StopPhase::Stopped
    }

    /// Resolves once a stop has been requested.
    pub async fn requested(&self) {
        self.wait_for(|phase| phase != StopPhase::Running).await;
    }

    /// Resolves once the owner acknowledged the stop.
    pub async fn stopped(&self) {
        self.wait_for(|phase| phase == StopPhase::Stopped).await;
    }

    async fn wait_for(&self, mut done: impl FnMut(StopPhase) -> bool) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so the channel cannot close here.
        let _ = rx.wait_for(|phase| done(*phase)).await;
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}
