use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum AnvilError {
    #[error("handler not found for task kind={0}")]
    HandlerNotFound(String),

    #[error("handler panicked for task kind={0}")]
    HandlerPanicked(String),

    #[error("dispatcher is stopped")]
    Stopped,

    #[error("no tokio runtime available to spawn the worker pool")]
    NoRuntime,

    #[error(transparent)]
    Config(#[from] ConfigError),
}
