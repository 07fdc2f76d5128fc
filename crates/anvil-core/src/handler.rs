use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::task::{Task, TaskKind};

/// Executes one task.
///
/// Handlers report nothing back: a task is fire-and-forget once queued. A
/// handler that never returns occupies its worker forever.
#[async_trait]
pub trait TaskHandler<K: TaskKind, P: Send + 'static>: Send + Sync {
    async fn handle(&self, task: Task<K, P>);
}

/// Adapter running a plain closure inline on the worker.
pub(crate) struct FnHandler<F, K, P> {
    f: F,
    _marker: PhantomData<fn(Task<K, P>)>,
}

impl<F, K, P> FnHandler<F, K, P> {
    pub(crate) fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, K, P> TaskHandler<K, P> for FnHandler<F, K, P>
where
    F: Fn(Task<K, P>) + Send + Sync + 'static,
    K: TaskKind,
    P: Send + 'static,
{
    async fn handle(&self, task: Task<K, P>) {
        (self.f)(task)
    }
}

/// Handlers keyed by task kind, plus an optional catch-all.
///
/// Filled while the dispatcher is being configured, then frozen behind an
/// `Arc` when it starts running, so lookups need no locking.
pub struct HandlerRegistry<K: TaskKind, P: Send + 'static> {
    handlers: HashMap<K, Arc<dyn TaskHandler<K, P>>>,
    catch_all: Option<Arc<dyn TaskHandler<K, P>>>,
}

impl<K: TaskKind, P: Send + 'static> HandlerRegistry<K, P> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            catch_all: None,
        }
    }

    /// Register the handler for `kind`. Last registration wins.
    pub fn insert(&mut self, kind: K, handler: Arc<dyn TaskHandler<K, P>>) {
        self.handlers.insert(kind, handler);
    }

    /// Install a handler that receives every task, ignoring the per-kind map.
    pub fn set_catch_all(&mut self, handler: Arc<dyn TaskHandler<K, P>>) {
        self.catch_all = Some(handler);
    }

    /// The catch-all when present, otherwise the handler registered for `kind`.
    pub fn resolve(&self, kind: &K) -> Option<&Arc<dyn TaskHandler<K, P>>> {
        self.catch_all.as_ref().or_else(|| self.handlers.get(kind))
    }

    pub fn has_catch_all(&self) -> bool {
        self.catch_all.is_some()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<K: TaskKind, P: Send + 'static> Default for HandlerRegistry<K, P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Kind {
        Email,
        Thumbnail,
    }

    /// Records which handler saw which payload.
    struct Recorder {
        tag: &'static str,
        seen: Arc<Mutex<Vec<(&'static str, u32)>>>,
    }

    #[async_trait]
    impl TaskHandler<Kind, u32> for Recorder {
        async fn handle(&self, task: Task<Kind, u32>) {
            self.seen.lock().unwrap().push((self.tag, *task.payload()));
        }
    }

    fn recorder(tag: &'static str, seen: &Arc<Mutex<Vec<(&'static str, u32)>>>) -> Arc<Recorder> {
        Arc::new(Recorder {
            tag,
            seen: Arc::clone(seen),
        })
    }

    #[tokio::test]
    async fn resolves_registered_kind() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut reg = HandlerRegistry::new();
        reg.insert(Kind::Email, recorder("email", &seen));

        let handler = reg.resolve(&Kind::Email).unwrap();
        handler.handle(Task::new(Kind::Email, 7)).await;

        assert!(reg.resolve(&Kind::Thumbnail).is_none());
        assert_eq!(*seen.lock().unwrap(), vec![("email", 7)]);
    }

    #[tokio::test]
    async fn later_registration_overwrites() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut reg = HandlerRegistry::new();
        reg.insert(Kind::Email, recorder("first", &seen));
        reg.insert(Kind::Email, recorder("second", &seen));
        assert_eq!(reg.len(), 1);

        reg.resolve(&Kind::Email)
            .unwrap()
            .handle(Task::new(Kind::Email, 1))
            .await;
        assert_eq!(*seen.lock().unwrap(), vec![("second", 1)]);
    }

    #[tokio::test]
    async fn catch_all_overrides_per_kind_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut reg = HandlerRegistry::new();
        reg.insert(Kind::Email, recorder("email", &seen));
        reg.set_catch_all(recorder("all", &seen));
        assert!(reg.has_catch_all());

        for (kind, payload) in [(Kind::Email, 1), (Kind::Thumbnail, 2)] {
            reg.resolve(&kind)
                .unwrap()
                .handle(Task::new(kind, payload))
                .await;
        }
        assert_eq!(*seen.lock().unwrap(), vec![("all", 1), ("all", 2)]);
    }

    #[tokio::test]
    async fn closures_run_through_fn_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = FnHandler::new({
            let seen = Arc::clone(&seen);
            move |task: Task<Kind, u32>| seen.lock().unwrap().push(("fn", *task.payload()))
        });

        handler.handle(Task::new(Kind::Thumbnail, 42)).await;
        assert_eq!(*seen.lock().unwrap(), vec![("fn", 42)]);
    }

    #[test]
    fn empty_registry_resolves_nothing() {
        let reg: HandlerRegistry<Kind, u32> = HandlerRegistry::default();
        assert!(reg.is_empty());
        assert!(!reg.has_catch_all());
        assert!(reg.resolve(&Kind::Email).is_none());
    }
}
