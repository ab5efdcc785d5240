//! Shared helpers for the integration tests.
#![allow(dead_code)]

use outbox_engine::{
    Document, DocumentKey, MemoryMutationQueue, Mutation, MutationBatch, MutationQueue,
    ResourcePath,
};
use serde_json::json;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install a subscriber once per test binary. Set `RUST_LOG` to see output.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "outbox_engine=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

pub fn key(path: &str) -> DocumentKey {
    DocumentKey::from_string(path).unwrap()
}

pub fn path(path: &str) -> ResourcePath {
    ResourcePath::from_string(path).unwrap()
}

pub fn doc(path: &str, data: serde_json::Value) -> Document {
    Document::new(key(path), data)
}

pub fn set(path: &str) -> Mutation {
    Mutation::set(key(path), json!({ "path": path }))
}

pub fn started_queue() -> MemoryMutationQueue {
    init_tracing();
    let mut queue = MemoryMutationQueue::new();
    queue.start().unwrap();
    queue
}

/// Add one batch writing every path in `paths`.
pub fn add_batch(queue: &mut MemoryMutationQueue, paths: &[&str]) -> Arc<MutationBatch> {
    queue
        .add_mutation_batch(1000, paths.iter().map(|p| set(p)).collect())
        .unwrap()
}

pub fn batch_ids(batches: &[Arc<MutationBatch>]) -> Vec<i64> {
    batches.iter().map(|b| b.batch_id).collect()
}
