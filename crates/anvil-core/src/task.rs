use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// Lookup key for handler resolution.
///
/// Any comparable, hashable value works; embedding applications usually use
/// a small `Copy` enum.
pub trait TaskKind: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> TaskKind for T where T: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

/// A unit of work: a kind plus an opaque payload.
///
/// Immutable once built. Ownership moves from the submitter to the queue, then
/// to the worker that runs it, and finally into the handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task<K, P> {
    kind: K,
    payload: P,
}

impl<K, P> Task<K, P> {
    pub fn new(kind: K, payload: P) -> Self {
        Self { kind, payload }
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn into_payload(self) -> P {
        self.payload
    }

    pub fn into_parts(self) -> (K, P) {
        (self.kind, self.payload)
    }
}
