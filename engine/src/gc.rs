//! Garbage collection hooks.
//!
//! Components that drop references to documents (the mutation queue when a
//! batch is removed, the reference set when a view releases a key) report the
//! key to a [`GarbageCollector`]. An [`EagerGarbageCollector`] remembers these
//! candidates and later asks every [`GarbageSource`] whether the key is still
//! in use.

use crate::DocumentKey;
use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};

/// Receives keys that may no longer be referenced.
pub trait GarbageCollector: Send + Sync {
    /// Called for every key touched by a removed batch or released reference.
    fn add_potential_garbage_key(&self, key: &DocumentKey);
}

/// Anything that can still hold a reference to a document.
pub trait GarbageSource {
    fn contains_key(&self, key: &DocumentKey) -> bool;
}

/// Collector that ignores every candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpGarbageCollector;

impl GarbageCollector for NoOpGarbageCollector {
    fn add_potential_garbage_key(&self, _key: &DocumentKey) {}
}

/// Collector that tracks candidates until [`collect_garbage`] runs.
///
/// [`collect_garbage`]: EagerGarbageCollector::collect_garbage
#[derive(Debug, Default)]
pub struct EagerGarbageCollector {
    potential_garbage: Mutex<BTreeSet<DocumentKey>>,
}

impl EagerGarbageCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of candidates waiting for the next collection.
    pub fn pending_len(&self) -> usize {
        self.candidates().len()
    }

    /// Drain the candidates and return those no source references, in key
    /// order.
    pub fn collect_garbage(&self, sources: &[&dyn GarbageSource]) -> Vec<DocumentKey> {
        let candidates = std::mem::take(&mut *self.candidates());
        let garbage: Vec<DocumentKey> = candidates
            .into_iter()
            .filter(|key| !sources.iter().any(|source| source.contains_key(key)))
            .collect();
        tracing::debug!(collected = garbage.len(), "collected garbage documents");
        garbage
    }

    fn candidates(&self) -> std::sync::MutexGuard<'_, BTreeSet<DocumentKey>> {
        // The set stays consistent even if a holder panicked.
        self.potential_garbage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl GarbageCollector for EagerGarbageCollector {
    fn add_potential_garbage_key(&self, key: &DocumentKey) {
        self.candidates().insert(key.clone());
    }
}
