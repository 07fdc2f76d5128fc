use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::error::AnvilError;
use crate::identity::Identity;
use crate::registry::{IdleRegistry, WorkerInbox};
use crate::runtime::Runtime;
use crate::stop::StopSignal;
use crate::task::{Task, TaskKind};

/// One pool member: runs a single task at a time on its own tokio task.
struct Worker<K: TaskKind, P: Send + 'static> {
    index: usize,
    identity: Identity,
    idle: IdleRegistry<K, P>,
    runtime: Runtime<K, P>,
    stop: StopSignal,
}

impl<K: TaskKind, P: Send + 'static> Worker<K, P> {
    fn start(self, handle: &tokio::runtime::Handle) -> JoinHandle<()> {
        let span = self.identity.span();
        handle.spawn(self.run().instrument(span))
    }

    async fn run(self) {
        tracing::trace!("started");

        loop {
            if self.stop.is_requested() {
                break;
            }

            let (tx, mut rx) = oneshot::channel();
            if self.idle.register(WorkerInbox::new(self.index, tx)).is_err() {
                // registry closed: the pool is being torn down
                self.stop.requested().await;
                break;
            }

            tokio::select! {
                biased;
                task = &mut rx => match task {
                    Ok(task) => self.process(task).await,
                    // inbox dropped by a closing registry
                    Err(_) => {
                        self.stop.requested().await;
                        break;
                    }
                },
                _ = self.stop.requested() => {
                    self.idle.withdraw(self.index);
                    rx.close();
                    // a task handed over before the close still runs
                    if let Ok(task) = rx.try_recv() {
                        self.process(task).await;
                    }
                    break;
                }
            }
        }

        tracing::trace!("quitting");
        self.stop.acknowledge();
    }

    async fn process(&self, task: Task<K, P>) {
        let kind = task.kind().clone();
        tracing::trace!(?kind, "processing task");

        match self.runtime.execute(task).await {
            Ok(()) => {}
            Err(err @ AnvilError::HandlerPanicked(_)) => {
                tracing::error!(?kind, error = %err, "handler failed, worker continues");
            }
            Err(err) => tracing::warn!(?kind, error = %err, "task dropped"),
        }
    }
}

struct WorkerHandle {
    identity: Identity,
    stop: StopSignal,
    join: JoinHandle<()>,
}

/// Worker group handle.
/// - `request_shutdown()` asks every worker to stop once it is idle
/// - `shutdown_and_join()` also waits for all of them to finish
pub struct WorkerGroup {
    workers: Vec<WorkerHandle>,
}

impl WorkerGroup {
    /// Spawn `n` workers on `handle`, identified under `parent`.
    pub fn spawn<K: TaskKind, P: Send + 'static>(
        n: usize,
        idle: &IdleRegistry<K, P>,
        runtime: &Runtime<K, P>,
        parent: &Identity,
        handle: &tokio::runtime::Handle,
    ) -> Self {
        tracing::trace!(count = n, "starting workers");

        let mut workers = Vec::with_capacity(n);
        for index in 0..n {
            let identity = Identity::new("worker").with_parent(parent);
            let stop = StopSignal::new();
            let worker = Worker {
                index,
                identity: identity.clone(),
                idle: idle.clone(),
                runtime: runtime.clone(),
                stop: stop.clone(),
            };

            let join = worker.start(handle);
            workers.push(WorkerHandle {
                identity,
                stop,
                join,
            });
        }

        Self { workers }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Ask a single worker to stop once it is idle.
    ///
    /// Returns `false` for an unknown index or a worker already stopping.
    pub fn request_stop(&self, index: usize) -> bool {
        self.workers
            .get(index)
            .is_some_and(|worker| worker.stop.request_stop())
    }

    /// Request shutdown for all workers.
    /// In-flight handlers are not cancelled; each worker stops when it next
    /// waits for work.
    pub fn request_shutdown(&self) {
        for worker in &self.workers {
            worker.stop.request_stop();
        }
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for worker in self.workers {
            if let Err(err) = worker.join.await {
                tracing::error!(worker = %worker.identity, error = %err, "worker exited abnormally");
            }
        }
    }
}
