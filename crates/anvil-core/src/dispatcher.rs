//! Dispatcher: the task queue, the dispatch loop and the shutdown sequence.
//!
//! [`Dispatcher`] collects handlers and settings; [`Dispatcher::run`] freezes
//! them, spawns the workers and the dispatch loop, and returns a
//! [`DispatcherHandle`] used to submit tasks and to stop the pool.
//!
//! For every task it accepts, the dispatch loop places a claim on the idle
//! registry and spawns a matching unit that waits for the claimed worker and
//! hands the task over. The loop itself never waits for a worker, so the queue
//! keeps draining while every worker is busy.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot, watch};
use tracing::Instrument;

use crate::config::DispatcherConfig;
use crate::error::AnvilError;
use crate::handler::{FnHandler, HandlerRegistry, TaskHandler};
use crate::identity::Identity;
use crate::observability::DispatcherStats;
use crate::registry::{Claim, IdleRegistry};
use crate::runtime::Runtime;
use crate::stop::StopSignal;
use crate::task::{Task, TaskKind};
use crate::worker::WorkerGroup;

/// A task on its way into the dispatch loop, with the submitter's
/// acceptance notification.
struct Submission<K, P> {
    task: Task<K, P>,
    accepted: oneshot::Sender<()>,
}

/// Accepted tasks not yet handed to a worker.
#[derive(Clone)]
struct PendingDispatches {
    count: Arc<watch::Sender<usize>>,
}

impl PendingDispatches {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { count: Arc::new(tx) }
    }

    fn begin(&self) {
        self.count.send_modify(|n| *n += 1);
    }

    fn finish(&self) {
        self.count.send_modify(|n| *n = n.saturating_sub(1));
    }

    fn get(&self) -> usize {
        *self.count.borrow()
    }

    /// Resolves once every accepted task reached a worker.
    async fn drained(&self) {
        let mut rx = self.count.subscribe();
        // the sender lives in `self`
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

/// Pool builder.
///
/// # Example
/// ```ignore
/// let pool = Dispatcher::new(4)
///     .set_handler(Kind::Email, |task| send_email(task.into_payload()))
///     .set_handler(Kind::Resize, |task| resize(task.into_payload()))
///     .run()?;
///
/// pool.queue_task(Kind::Email, payload).await?;
/// pool.stop();
/// pool.stopped().await;
/// ```
pub struct Dispatcher<K: TaskKind, P: Send + 'static> {
    config: DispatcherConfig,
    handlers: HandlerRegistry<K, P>,
}

impl<K: TaskKind, P: Send + 'static> Dispatcher<K, P> {
    /// A dispatcher with `workers` workers and default settings otherwise.
    ///
    /// `workers` must be at least 1; [`run`](Self::run) rejects 0.
    pub fn new(workers: usize) -> Self {
        Self::with_config(DispatcherConfig::with_workers(workers))
    }

    pub fn with_config(config: DispatcherConfig) -> Self {
        Self {
            config,
            handlers: HandlerRegistry::new(),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Run `handler` for every task of `kind`, replacing any earlier one.
    ///
    /// The closure runs inline on the worker; long blocking work should go
    /// through [`set_task_handler`](Self::set_task_handler) and
    /// `tokio::task::spawn_blocking` instead.
    pub fn set_handler<F>(self, kind: K, handler: F) -> Self
    where
        F: Fn(Task<K, P>) + Send + Sync + 'static,
    {
        self.set_task_handler(kind, FnHandler::new(handler))
    }

    /// Async variant of [`set_handler`](Self::set_handler).
    pub fn set_task_handler<H>(mut self, kind: K, handler: H) -> Self
    where
        H: TaskHandler<K, P> + 'static,
    {
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    /// Run `handler` for every task regardless of kind.
    ///
    /// Per-kind handlers are ignored while a catch-all is installed.
    pub fn set_catch_all<F>(self, handler: F) -> Self
    where
        F: Fn(Task<K, P>) + Send + Sync + 'static,
    {
        self.set_catch_all_handler(FnHandler::new(handler))
    }

    /// Async variant of [`set_catch_all`](Self::set_catch_all).
    pub fn set_catch_all_handler<H>(mut self, handler: H) -> Self
    where
        H: TaskHandler<K, P> + 'static,
    {
        self.handlers.set_catch_all(Arc::new(handler));
        self
    }

    /// Start the workers and the dispatch loop on the current tokio runtime.
    ///
    /// Handlers are frozen from here on.
    pub fn run(self) -> Result<DispatcherHandle<K, P>, AnvilError> {
        self.config.validate()?;
        let rt = tokio::runtime::Handle::try_current().map_err(|_| AnvilError::NoRuntime)?;

        let workers = self.config.workers;
        let identity = Identity::new(self.config.name.clone());
        let span = identity.span();

        let runtime = Runtime::new(Arc::new(self.handlers), rt.clone());
        let idle = IdleRegistry::new(workers);
        let group = WorkerGroup::spawn(workers, &idle, &runtime, &identity, &rt);

        let (queue_tx, queue_rx) = mpsc::channel(1);
        let stop = StopSignal::new();
        let pending = PendingDispatches::new();

        let dispatch = DispatchLoop {
            queue: queue_rx,
            idle: idle.clone(),
            workers: group,
            stop: stop.clone(),
            limit: self
                .config
                .max_pending_dispatches
                .map(|n| Arc::new(Semaphore::new(n))),
            pending: pending.clone(),
            rt: rt.clone(),
        };
        rt.spawn(dispatch.run().instrument(span.clone()));

        span.in_scope(|| tracing::info!(workers, "dispatcher started"));

        Ok(DispatcherHandle {
            identity,
            span,
            queue: queue_tx,
            idle,
            stop,
            pending,
            workers,
        })
    }
}

/// Handle to a running pool. Cheap to clone.
///
/// Dropping every clone has the same effect as [`stop`](Self::stop).
pub struct DispatcherHandle<K, P> {
    identity: Identity,
    span: tracing::Span,
    queue: mpsc::Sender<Submission<K, P>>,
    idle: IdleRegistry<K, P>,
    stop: StopSignal,
    pending: PendingDispatches,
    workers: usize,
}

impl<K: TaskKind, P: Send + 'static> DispatcherHandle<K, P> {
    /// Submit a task, waiting until the dispatch loop accepts it.
    ///
    /// There is no buffering in front of the loop: while it is busy (or at its
    /// pending-dispatch cap) callers wait here. Fails with
    /// [`AnvilError::Stopped`] once the pool is stopping.
    pub async fn queue_task(&self, kind: K, payload: P) -> Result<(), AnvilError> {
        if self.stop.is_requested() {
            return Err(AnvilError::Stopped);
        }

        let (accepted, accepted_rx) = oneshot::channel();
        let submission = Submission {
            task: Task::new(kind, payload),
            accepted,
        };
        self.queue
            .send(submission)
            .await
            .map_err(|_| AnvilError::Stopped)?;
        accepted_rx.await.map_err(|_| AnvilError::Stopped)
    }

    /// Ask the pool to shut down and return immediately.
    ///
    /// Running handlers finish first; use [`stopped`](Self::stopped) to wait
    /// for the teardown to complete.
    pub fn stop(&self) -> &Self {
        let _enter = self.span.enter();
        if self.stop.request_stop() {
            tracing::trace!("received request to stop");
        }
        self
    }

    /// Resolves once every worker has stopped and the dispatcher acknowledged.
    pub async fn stopped(&self) {
        self.stop.stopped().await;
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The dispatcher's span, shared by every clone of the handle and by the
    /// dispatch loop.
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            workers: self.workers,
            idle_workers: self.idle.idle_len(),
            pending_dispatches: self.pending.get(),
            stopping: self.stop.is_requested(),
            stopped: self.stop.is_stopped(),
        }
    }
}

impl<K, P> Clone for DispatcherHandle<K, P> {
    fn clone(&self) -> Self {
        Self {
            identity: self.identity.clone(),
            span: self.span.clone(),
            queue: self.queue.clone(),
            idle: self.idle.clone(),
            stop: self.stop.clone(),
            pending: self.pending.clone(),
            workers: self.workers,
        }
    }
}

struct DispatchLoop<K: TaskKind, P: Send + 'static> {
    queue: mpsc::Receiver<Submission<K, P>>,
    idle: IdleRegistry<K, P>,
    workers: WorkerGroup,
    stop: StopSignal,
    limit: Option<Arc<Semaphore>>,
    pending: PendingDispatches,
    rt: tokio::runtime::Handle,
}

impl<K: TaskKind, P: Send + 'static> DispatchLoop<K, P> {
    async fn run(mut self) {
        loop {
            let permit = tokio::select! {
                biased;
                _ = self.stop.requested() => break,
                permit = acquire(self.limit.clone()) => permit,
            };

            let submission = tokio::select! {
                biased;
                _ = self.stop.requested() => break,
                submission = self.queue.recv() => match submission {
                    Some(submission) => submission,
                    None => {
                        tracing::debug!("all handles dropped");
                        self.stop.request_stop();
                        break;
                    }
                },
            };

            let Submission { task, accepted } = submission;
            // a submitter that stopped waiting still had its task accepted
            let _ = accepted.send(());

            let claim = self.idle.claim();
            self.pending.begin();
            let unit = hand_off(task, claim, self.idle.clone(), self.pending.clone(), permit);
            self.rt.spawn(unit.in_current_span());
        }

        self.teardown().await;
    }

    async fn teardown(self) {
        let DispatchLoop {
            mut queue,
            idle,
            workers,
            stop,
            pending,
            ..
        } = self;

        // submitters blocked on the queue get `Stopped`
        queue.close();
        drop(queue);

        // accepted tasks still reach a worker before the workers stop
        tracing::trace!(pending = pending.get(), "draining accepted tasks");
        pending.drained().await;

        tracing::trace!("closing all workers");
        workers.shutdown_and_join().await;
        idle.close();

        tracing::trace!("quitting");
        stop.acknowledge();
        tracing::info!("dispatcher stopped");
    }
}

async fn acquire(limit: Option<Arc<Semaphore>>) -> Option<OwnedSemaphorePermit> {
    // the semaphore is never closed
    limit?.acquire_owned().await.ok()
}

/// Matching unit: wait for the claimed worker, then hand it the task.
///
/// A worker can stop between the claim and the delivery; the task then goes
/// to the back of the line with a fresh claim.
async fn hand_off<K: TaskKind, P: Send + 'static>(
    mut task: Task<K, P>,
    mut claim: Claim<K, P>,
    idle: IdleRegistry<K, P>,
    pending: PendingDispatches,
    _permit: Option<OwnedSemaphorePermit>,
) {
    loop {
        let Some(inbox) = claim.wait().await else {
            tracing::warn!(kind = ?task.kind(), "no worker left to run task, dropping it");
            break;
        };

        tracing::trace!(worker = inbox.worker(), kind = ?task.kind(), "dispatching task");
        match inbox.deliver(task) {
            Ok(()) => break,
            Err(returned) => {
                task = returned;
                claim = idle.claim();
            }
        }
    }

    pending.finish();
}
