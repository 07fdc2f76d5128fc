use std::sync::Arc;

use crate::error::AnvilError;
use crate::handler::HandlerRegistry;
use crate::task::{Task, TaskKind};

/// Runtime executes a [`Task`] by dispatching to the resolved handler.
///
/// Shared by every worker of a pool.
pub struct Runtime<K: TaskKind, P: Send + 'static> {
    registry: Arc<HandlerRegistry<K, P>>,
    rt: tokio::runtime::Handle,
}

impl<K: TaskKind, P: Send + 'static> Runtime<K, P> {
    /// Handlers run as tasks on `rt`.
    pub fn new(registry: Arc<HandlerRegistry<K, P>>, rt: tokio::runtime::Handle) -> Self {
        Self { registry, rt }
    }

    pub fn registry(&self) -> &HandlerRegistry<K, P> {
        &self.registry
    }

    /// Execute one task to completion.
    ///
    /// The handler runs on its own tokio task so a panic stays contained: it
    /// comes back as [`AnvilError::HandlerPanicked`] and the caller keeps going.
    pub async fn execute(&self, task: Task<K, P>) -> Result<(), AnvilError> {
        let kind = task.kind().clone();
        let handler = self
            .registry
            .resolve(&kind)
            .cloned()
            .ok_or_else(|| AnvilError::HandlerNotFound(format!("{kind:?}")))?;

        match self.rt.spawn(async move { handler.handle(task).await }).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_panic() => Err(AnvilError::HandlerPanicked(format!("{kind:?}"))),
            // only happens while the tokio runtime itself shuts down
            Err(_) => Err(AnvilError::Stopped),
        }
    }
}

impl<K: TaskKind, P: Send + 'static> Clone for Runtime<K, P> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            rt: self.rt.clone(),
        }
    }
}
