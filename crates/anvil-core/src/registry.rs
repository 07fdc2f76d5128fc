//! Idle-worker registry.
//!
//! A worker that is ready for work parks a [`WorkerInbox`] here. The dispatch
//! loop places a [`Claim`] for every accepted task; claims are served in the
//! order they were placed, each one receiving exactly one inbox.
//!
//! At most one inbox per worker can be parked at a time, so the registry never
//! holds more entries than the pool has workers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::task::Task;

/// Single-use handoff slot of one idle worker.
pub struct WorkerInbox<K, P> {
    worker: usize,
    tx: oneshot::Sender<Task<K, P>>,
}

impl<K, P> WorkerInbox<K, P> {
    pub(crate) fn new(worker: usize, tx: oneshot::Sender<Task<K, P>>) -> Self {
        Self { worker, tx }
    }

    /// Index of the worker that owns this inbox.
    pub fn worker(&self) -> usize {
        self.worker
    }

    /// Hand `task` to the worker. The task comes back if the worker stopped
    /// waiting on this inbox.
    pub fn deliver(self, task: Task<K, P>) -> Result<(), Task<K, P>> {
        self.tx.send(task)
    }
}

/// A reservation on the next idle worker.
pub enum Claim<K, P> {
    Ready(WorkerInbox<K, P>),
    Waiting(oneshot::Receiver<WorkerInbox<K, P>>),
    Closed,
}

impl<K, P> Claim<K, P> {
    /// Wait for the reserved inbox. `None` once the registry is closed.
    pub async fn wait(self) -> Option<WorkerInbox<K, P>> {
        match self {
            Claim::Ready(inbox) => Some(inbox),
            Claim::Waiting(rx) => rx.await.ok(),
            Claim::Closed => None,
        }
    }
}

struct State<K, P> {
    idle: VecDeque<WorkerInbox<K, P>>,
    claims: VecDeque<oneshot::Sender<WorkerInbox<K, P>>>,
    closed: bool,
}

pub struct IdleRegistry<K, P> {
    capacity: usize,
    state: Arc<Mutex<State<K, P>>>,
}

impl<K, P> IdleRegistry<K, P> {
    /// Registry for a pool of `capacity` workers.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Arc::new(Mutex::new(State {
                idle: VecDeque::with_capacity(capacity),
                claims: VecDeque::new(),
                closed: false,
            })),
        }
    }

    /// Park an idle worker's inbox, or pass it straight to the oldest claim.
    ///
    /// Gives the inbox back when the registry is closed.
    pub fn register(&self, mut inbox: WorkerInbox<K, P>) -> Result<(), WorkerInbox<K, P>> {
        let mut state = self.lock();
        if state.closed {
            return Err(inbox);
        }

        while let Some(claim) = state.claims.pop_front() {
            match claim.send(inbox) {
                Ok(()) => return Ok(()),
                // claimant went away; offer the inbox to the next one
                Err(returned) => inbox = returned,
            }
        }

        debug_assert!(
            state.idle.len() < self.capacity,
            "idle registry over capacity ({})",
            self.capacity
        );
        state.idle.push_back(inbox);
        Ok(())
    }

    /// Reserve the next idle worker.
    ///
    /// The reservation's place in line is fixed by this call, not by when the
    /// returned claim is first awaited.
    pub fn claim(&self) -> Claim<K, P> {
        let mut state = self.lock();
        if state.closed {
            return Claim::Closed;
        }
        if let Some(inbox) = state.idle.pop_front() {
            return Claim::Ready(inbox);
        }

        let (tx, rx) = oneshot::channel();
        state.claims.push_back(tx);
        Claim::Waiting(rx)
    }

    /// Remove `worker`'s parked inbox, if it is still parked.
    ///
    /// Returns `false` when the inbox was already claimed; the claimant then
    /// finds it closed and claims again.
    pub fn withdraw(&self, worker: usize) -> bool {
        let mut state = self.lock();
        match state.idle.iter().position(|inbox| inbox.worker == worker) {
            Some(at) => state.idle.remove(at).is_some(),
            None => false,
        }
    }

    /// Refuse further registrations and claims.
    ///
    /// Parked inboxes and pending claims are dropped: their workers see a
    /// closed inbox and their claimants get `None`.
    pub fn close(&self) {
        let (idle, claims) = {
            let mut state = self.lock();
            state.closed = true;
            (
                std::mem::take(&mut state.idle),
                std::mem::take(&mut state.claims),
            )
        };
        drop(idle);
        drop(claims);
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of workers currently parked as idle.
    pub fn idle_len(&self) -> usize {
        self.lock().idle.len()
    }

    /// Number of claims waiting for a worker.
    pub fn pending_claims(&self) -> usize {
        self.lock().claims.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, State<K, P>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K, P> Clone for IdleRegistry<K, P> {
    fn clone(&self) -> Self {
        Self {
            capacity: self.capacity,
            state: Arc::clone(&self.state),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    type Inbox = WorkerInbox<&'static str, u32>;
    type InboxRx = oneshot::Receiver<Task<&'static str, u32>>;

    fn inbox(worker: usize) -> (Inbox, InboxRx) {
        let (tx, rx) = oneshot::channel();
        (WorkerInbox::new(worker, tx), rx)
    }

    #[test]
    fn parked_inbox_is_claimed_immediately() {
        let registry = IdleRegistry::new(2);
        let (a, _rx_a) = inbox(0);
        registry.register(a).ok().unwrap();
        assert_eq!(registry.idle_len(), 1);

        match registry.claim() {
            Claim::Ready(inbox) => assert_eq!(inbox.worker(), 0),
            _ => panic!("expected a ready claim"),
        }
        assert_eq!(registry.idle_len(), 0);
    }

    #[tokio::test]
    async fn claims_are_served_in_order() {
        let registry = IdleRegistry::new(1);
        let first = registry.claim();
        let second = registry.claim();
        assert_eq!(registry.pending_claims(), 2);

        // await the second claim first; the first still wins the next inbox
        let second = tokio::spawn(second.wait());
        let (a, mut rx_a) = inbox(0);
        registry.register(a).ok().unwrap();

        let got = timeout(Duration::from_secs(1), first.wait())
            .await
            .unwrap()
            .unwrap();
        got.deliver(Task::new("kind", 1)).unwrap();
        assert_eq!(rx_a.try_recv().unwrap().into_payload(), 1);
        assert!(!second.is_finished());

        let (b, _rx_b) = inbox(1);
        registry.register(b).ok().unwrap();
        let got = timeout(Duration::from_secs(1), second)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(got.worker(), 1);
    }

    #[test]
    fn abandoned_claim_is_skipped() {
        let registry = IdleRegistry::new(1);
        drop(registry.claim());
        let live = registry.claim();

        let (a, _rx_a) = inbox(0);
        registry.register(a).ok().unwrap();
        assert_eq!(registry.idle_len(), 0);
        assert!(matches!(live, Claim::Waiting(_)));
    }

    #[test]
    fn deliver_returns_task_when_worker_left() {
        let (a, rx_a) = inbox(0);
        drop(rx_a);
        let task = a.deliver(Task::new("kind", 9)).unwrap_err();
        assert_eq!(*task.payload(), 9);
    }

    #[tokio::test]
    async fn close_releases_everyone() {
        let registry = IdleRegistry::new(2);
        let (a, mut rx_a) = inbox(0);
        registry.register(a).ok().unwrap();
        let _ = registry.claim(); // takes the parked inbox
        let waiting = registry.claim();

        let (b, mut rx_b) = inbox(1);
        registry.register(b).ok().unwrap(); // served to `waiting`
        let waiting_inbox = waiting.wait().await.unwrap();
        drop(waiting_inbox);
        assert!(rx_b.try_recv().is_err());

        let pending = registry.claim();
        registry.close();
        assert!(registry.is_closed());
        assert!(pending.wait().await.is_none());
        assert!(matches!(registry.claim(), Claim::Closed));

        let (c, _rx_c) = inbox(2);
        assert!(registry.register(c).is_err());
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn withdrawn_inbox_is_never_claimed() {
        let registry = IdleRegistry::new(2);
        let (a, _rx_a) = inbox(0);
        let (b, _rx_b) = inbox(1);
        registry.register(a).ok().unwrap();
        registry.register(b).ok().unwrap();

        assert!(registry.withdraw(0));
        assert!(!registry.withdraw(0));
        assert_eq!(registry.idle_len(), 1);

        match registry.claim() {
            Claim::Ready(inbox) => assert_eq!(inbox.worker(), 1),
            _ => panic!("expected a ready claim"),
        }
        // already claimed: nothing left to withdraw
        assert!(!registry.withdraw(1));
    }

    #[test]
    fn never_exceeds_capacity() {
        let registry = IdleRegistry::new(3);
        let mut receivers = Vec::new();
        for worker in 0..3 {
            let (i, rx) = inbox(worker);
            receivers.push(rx);
            registry.register(i).ok().unwrap();
            assert!(registry.idle_len() <= registry.capacity());
        }
        assert_eq!(registry.idle_len(), 3);
    }
}
