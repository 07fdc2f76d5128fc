//! anvil-core
//!
//! In-process task dispatcher: a fixed pool of workers running
//! caller-registered handlers, with an asynchronous two-phase shutdown.
//!
//! # Modules
//! - **dispatcher**: builder, running handle, dispatch loop, teardown
//! - **worker**: worker loop and `WorkerGroup`
//! - **registry**: bounded registry of idle workers with FIFO claims
//! - **handler** / **runtime**: handler resolution and contained execution
//! - **stop**: two-phase stop handshake
//! - **identity**: component identities, rendered as `tracing` spans
//! - **config**, **error**, **observability**: settings, errors, stats
//!
//! # Preconditions
//! - At least one worker (`run` rejects 0).
//! - `run` must be called from inside a tokio runtime.
//! - Tasks submitted after `stop` are refused with `AnvilError::Stopped`.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod identity;
pub mod observability;
pub mod registry;
pub mod runtime;
pub mod stop;
pub mod task;
pub mod worker;

pub use self::config::{ConfigError, DispatcherConfig};
pub use self::dispatcher::{Dispatcher, DispatcherHandle};
pub use self::error::AnvilError;
pub use self::handler::{HandlerRegistry, TaskHandler};
pub use self::identity::Identity;
pub use self::observability::DispatcherStats;
pub use self::stop::{StopPhase, StopSignal};
pub use self::task::{Task, TaskKind};
