//! LocalStore - the client-side state container.
//!
//! The LocalStore owns the mutation queue, the cache of documents confirmed
//! by the backend and the references that keep documents pinned while a view
//! shows them. Reads overlay pending batches on top of the remote cache, so
//! local writes are visible before the backend acknowledges them.

use crate::config::{EngineConfig, GarbageCollection};
use crate::diff::ChangeType;
use crate::error::{violation, Result};
use crate::gc::{EagerGarbageCollector, GarbageCollector};
use crate::mutation_queue::{MemoryMutationQueue, MutationQueue, StreamToken};
use crate::reference::ReferenceSet;
use crate::view::{QueryView, ViewSnapshot};
use crate::{
    BatchId, Document, DocumentKey, Error, Mutation, MutationBatch, Query, TargetId, Timestamp,
};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// The main store holding all client state.
#[derive(Debug)]
pub struct LocalStore {
    config: EngineConfig,
    mutation_queue: MemoryMutationQueue,
    /// Documents as last confirmed by the backend
    remote_documents: BTreeMap<DocumentKey, Document>,
    /// Keys pinned by active views
    local_view_references: ReferenceSet,
    garbage_collector: Option<Arc<EagerGarbageCollector>>,
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl LocalStore {
    /// Create a store with the given configuration.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_queue(config, MemoryMutationQueue::new())
    }

    /// Create a store around an existing queue, e.g. one restored from a
    /// snapshot.
    pub fn with_queue(config: EngineConfig, mut mutation_queue: MemoryMutationQueue) -> Self {
        let mut local_view_references = ReferenceSet::new();
        let garbage_collector = match config.garbage_collection {
            GarbageCollection::Eager => {
                let gc = Arc::new(EagerGarbageCollector::new());
                let hook: Arc<dyn GarbageCollector> = gc.clone();
                mutation_queue.set_garbage_collector(Some(Arc::clone(&hook)));
                local_view_references.set_garbage_collector(Some(hook));
                Some(gc)
            }
            GarbageCollection::Disabled => {
                mutation_queue.set_garbage_collector(None);
                None
            }
        };

        Self {
            config,
            mutation_queue,
            remote_documents: BTreeMap::new(),
            local_view_references,
            garbage_collector,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get the mutation queue.
    pub fn mutation_queue(&self) -> &MemoryMutationQueue {
        &self.mutation_queue
    }

    /// Start the underlying queue.
    pub fn start(&mut self) -> Result<()> {
        self.mutation_queue.start()?;
        self.check_consistency()
    }

    /// Queue a batch of local writes.
    pub fn write_locally(
        &mut self,
        local_write_time: Timestamp,
        mutations: Vec<Mutation>,
    ) -> Result<Arc<MutationBatch>> {
        self.mutation_queue
            .add_mutation_batch(local_write_time, mutations)
    }

    /// Handle the backend accepting `batch_id`.
    ///
    /// The batch is folded into the remote cache and every batch up to and
    /// including it leaves the queue. Fails while an earlier batch is still
    /// waiting for the backend.
    pub fn acknowledge_batch(&mut self, batch_id: BatchId, stream_token: StreamToken) -> Result<()> {
        let batch = self.existing_batch(batch_id, "acknowledged")?;
        let highest_acknowledged = self.mutation_queue.highest_acknowledged_batch_id();
        if let Some(pending) = self
            .mutation_queue
            .all_mutation_batches_through_batch_id(batch_id)
            .iter()
            .find(|b| b.batch_id < batch_id && b.batch_id > highest_acknowledged)
        {
            return Err(violation(Error::AcknowledgeSkipsPendingBatch {
                batch_id,
                pending: pending.batch_id,
            }));
        }
        self.mutation_queue.acknowledge_batch(&batch, stream_token)?;

        for key in batch.keys() {
            let base = self.remote_documents.get(key).cloned();
            match batch.apply_to_local_view(key, base) {
                Some(mut doc) => {
                    doc.has_local_mutations = false;
                    self.remote_documents.insert(key.clone(), doc);
                }
                None => {
                    self.remote_documents.remove(key);
                }
            }
        }

        let acknowledged = self
            .mutation_queue
            .all_mutation_batches_through_batch_id(batch_id);
        self.mutation_queue.remove_mutation_batches(&acknowledged)?;
        tracing::debug!(
            batch_id,
            removed = acknowledged.len(),
            "batch acknowledged"
        );
        self.check_consistency()
    }

    /// Handle the backend refusing `batch_id`. Its writes are discarded.
    pub fn reject_batch(&mut self, batch_id: BatchId) -> Result<()> {
        let batch = self.existing_batch(batch_id, "rejected")?;
        if batch_id <= self.mutation_queue.highest_acknowledged_batch_id() {
            return Err(violation(Error::RejectAcknowledgedBatch(batch_id)));
        }

        self.mutation_queue.remove_mutation_batches(&[batch])?;
        tracing::warn!(batch_id, "batch rejected by backend");
        self.check_consistency()
    }

    /// The next batch to send after `batch_id`.
    pub fn next_mutation_batch(&self, batch_id: BatchId) -> Option<Arc<MutationBatch>> {
        self.mutation_queue
            .next_mutation_batch_after_batch_id(batch_id)
    }

    /// Whether any local write is still waiting for the backend.
    pub fn has_pending_writes(&self) -> bool {
        !self.mutation_queue.all_mutation_batches().is_empty()
    }

    pub fn last_stream_token(&self) -> StreamToken {
        self.mutation_queue.last_stream_token()
    }

    pub fn set_last_stream_token(&mut self, stream_token: StreamToken) {
        self.mutation_queue.set_last_stream_token(stream_token);
    }

    /// Record documents sent by the backend.
    pub fn apply_remote_documents(
        &mut self,
        updates: impl IntoIterator<Item = Document>,
        deletes: impl IntoIterator<Item = DocumentKey>,
    ) {
        let mut changed = 0usize;
        for mut doc in updates {
            doc.has_local_mutations = false;
            self.mark_potential_garbage(&doc.key);
            self.remote_documents.insert(doc.key.clone(), doc);
            changed += 1;
        }
        for key in deletes {
            self.remote_documents.remove(&key);
            changed += 1;
        }
        tracing::trace!(changed, "remote documents applied");
    }

    /// The remote version of `key`, ignoring pending writes.
    pub fn remote_document(&self, key: &DocumentKey) -> Option<&Document> {
        self.remote_documents.get(key)
    }

    /// The document at `key` with every pending write applied.
    pub fn local_document(&self, key: &DocumentKey) -> Result<Option<Document>> {
        let batches = self
            .mutation_queue
            .all_mutation_batches_affecting_document_key(key)?;
        let base = self.remote_documents.get(key).cloned();
        Ok(batches
            .iter()
            .fold(base, |doc, batch| batch.apply_to_local_view(key, doc)))
    }

    /// Documents matching `query` with every pending write applied, in key
    /// order.
    pub fn local_documents(&self, query: &Query) -> Result<Vec<Document>> {
        let start = DocumentKey::scan_start(&query.path);
        let mut results: BTreeMap<DocumentKey, Option<Document>> = self
            .remote_documents
            .range((Bound::Included(start), Bound::Unbounded))
            .take_while(|(key, _)| query.path.is_prefix_of(key.path()))
            .filter(|(key, _)| query.matches_key(key))
            .map(|(key, doc)| (key.clone(), Some(doc.clone())))
            .collect();

        for batch in self
            .mutation_queue
            .all_mutation_batches_affecting_query(&query.path)
        {
            for mutation in &batch.mutations {
                let key = mutation.key();
                if !query.matches_key(key) {
                    continue;
                }
                let entry = results.entry(key.clone()).or_default();
                *entry = mutation.apply_to_local_view(entry.take());
            }
        }

        Ok(results.into_values().flatten().collect())
    }

    /// Recompute `view` from local documents and pin the keys it now shows.
    pub fn update_view(&mut self, view: &mut QueryView) -> Result<Option<ViewSnapshot>> {
        let docs = self.local_documents(view.query())?;
        let has_pending_writes = docs.iter().any(|doc| doc.has_local_mutations);
        let snapshot = view.compute_snapshot(docs, has_pending_writes);

        if let Some(snapshot) = &snapshot {
            let target_id = view.target_id();
            for change in &snapshot.doc_changes {
                match change.kind {
                    ChangeType::Added => self
                        .local_view_references
                        .add_reference(change.doc.key.clone(), target_id),
                    ChangeType::Removed => self
                        .local_view_references
                        .remove_reference(change.doc.key.clone(), target_id),
                    ChangeType::Modified | ChangeType::Metadata => {}
                }
            }
        }
        Ok(snapshot)
    }

    /// Pin `keys` for the view `target_id`.
    pub fn add_view_references(
        &mut self,
        keys: impl IntoIterator<Item = DocumentKey>,
        target_id: TargetId,
    ) {
        self.local_view_references.add_references(keys, target_id);
    }

    pub fn remove_view_references(
        &mut self,
        keys: impl IntoIterator<Item = DocumentKey>,
        target_id: TargetId,
    ) {
        self.local_view_references.remove_references(keys, target_id);
    }

    /// Unpin everything the view `target_id` held.
    pub fn release_target(&mut self, target_id: TargetId) {
        self.local_view_references
            .remove_references_for_id(target_id);
        tracing::debug!(target_id, "target released");
    }

    /// Keys pinned by the view `target_id`.
    pub fn view_references(&self, target_id: TargetId) -> Vec<DocumentKey> {
        self.local_view_references.references_for_id(target_id)
    }

    /// Drop remote documents that no view and no pending batch references.
    ///
    /// Returns the dropped keys. Without an eager collector nothing is ever
    /// dropped.
    pub fn collect_garbage(&mut self) -> Vec<DocumentKey> {
        let Some(gc) = &self.garbage_collector else {
            return Vec::new();
        };
        let garbage = gc.collect_garbage(&[&self.mutation_queue, &self.local_view_references]);
        for key in &garbage {
            self.remote_documents.remove(key);
        }
        garbage
    }

    fn existing_batch(&self, batch_id: BatchId, action: &'static str) -> Result<Arc<MutationBatch>> {
        self.mutation_queue
            .lookup_mutation_batch(batch_id)
            .ok_or_else(|| violation(Error::MissingBatch { batch_id, action }))
    }

    fn mark_potential_garbage(&self, key: &DocumentKey) {
        if let Some(gc) = &self.garbage_collector {
            gc.add_potential_garbage_key(key);
        }
    }

    fn check_consistency(&self) -> Result<()> {
        if self.config.consistency_checks {
            self.mutation_queue.perform_consistency_check()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Direction, ResourcePath};
    use serde_json::json;

    fn key(path: &str) -> DocumentKey {
        DocumentKey::from_string(path).unwrap()
    }

    fn store(gc: GarbageCollection) -> LocalStore {
        let mut store = LocalStore::new(EngineConfig {
            consistency_checks: true,
            garbage_collection: gc,
        });
        store.start().unwrap();
        store
    }

    fn rooms() -> Query {
        Query::at_path(ResourcePath::from_string("rooms").unwrap())
    }

    #[test]
    fn local_writes_overlay_remote_documents() {
        let mut store = store(GarbageCollection::Disabled);
        store.apply_remote_documents(
            vec![Document::new(key("rooms/a"), json!({"name": "a", "size": 1}))],
            Vec::new(),
        );
        store
            .write_locally(1000, vec![Mutation::patch(key("rooms/a"), json!({"size": 2}))])
            .unwrap();

        let doc = store.local_document(&key("rooms/a")).unwrap().unwrap();
        assert_eq!(doc.data, json!({"name": "a", "size": 2}));
        assert!(doc.has_local_mutations);
        assert_eq!(store.remote_document(&key("rooms/a")).unwrap().data["size"], 1);
        assert!(store.has_pending_writes());
    }

    #[test]
    fn local_documents_for_query() {
        let mut store = store(GarbageCollection::Disabled);
        store.apply_remote_documents(
            vec![
                Document::new(key("rooms/a"), json!({})),
                Document::new(key("rooms/b"), json!({})),
                Document::new(key("rooms/a/messages/1"), json!({})),
                Document::new(key("roomsx/a"), json!({})),
            ],
            Vec::new(),
        );
        store
            .write_locally(
                1000,
                vec![
                    Mutation::delete(key("rooms/b")),
                    Mutation::set(key("rooms/c"), json!({"new": true})),
                ],
            )
            .unwrap();

        let keys: Vec<_> = store
            .local_documents(&rooms())
            .unwrap()
            .into_iter()
            .map(|doc| doc.key.to_string())
            .collect();
        assert_eq!(keys, vec!["rooms/a", "rooms/c"]);
    }

    #[test]
    fn acknowledge_folds_batch_into_remote_cache() {
        let mut store = store(GarbageCollection::Disabled);
        let b1 = store
            .write_locally(1000, vec![Mutation::set(key("rooms/a"), json!({"n": 1}))])
            .unwrap();
        let b2 = store
            .write_locally(1001, vec![Mutation::set(key("rooms/b"), json!({"n": 2}))])
            .unwrap();

        store
            .acknowledge_batch(b1.batch_id, StreamToken::from(vec![7]))
            .unwrap();
        let remote = store.remote_document(&key("rooms/a")).unwrap();
        assert_eq!(remote.data, json!({"n": 1}));
        assert!(!remote.has_local_mutations);
        assert_eq!(store.last_stream_token().as_bytes(), &[7]);
        assert_eq!(
            store.next_mutation_batch(crate::BATCH_ID_UNKNOWN).map(|b| b.batch_id),
            Some(b2.batch_id)
        );
    }

    #[test]
    fn reject_discards_writes() {
        let mut store = store(GarbageCollection::Disabled);
        let b1 = store
            .write_locally(1000, vec![Mutation::set(key("rooms/a"), json!({}))])
            .unwrap();
        store.reject_batch(b1.batch_id).unwrap();
        assert_eq!(store.local_document(&key("rooms/a")).unwrap(), None);
        assert!(!store.has_pending_writes());

        let err = store.reject_batch(b1.batch_id).unwrap_err();
        assert!(matches!(err, Error::MissingBatch { .. }));
    }

    #[test]
    fn reject_refuses_acknowledged_batches() {
        let mut store = store(GarbageCollection::Disabled);
        let b1 = store
            .write_locally(1000, vec![Mutation::set(key("rooms/a"), json!({}))])
            .unwrap();
        let b2 = store
            .write_locally(1001, vec![Mutation::set(key("rooms/b"), json!({}))])
            .unwrap();
        // Acknowledge 2 directly so batch 1 stays queued but behind the ack.
        store.mutation_queue.acknowledge_batch(&b2, StreamToken::empty()).unwrap();

        let err = store.reject_batch(b1.batch_id).unwrap_err();
        assert_eq!(err, Error::RejectAcknowledgedBatch(1));
    }

    #[test]
    fn acknowledge_refuses_to_skip_pending_batches() {
        let mut store = store(GarbageCollection::Disabled);
        store
            .write_locally(1000, vec![Mutation::set(key("rooms/a"), json!({"v": 1}))])
            .unwrap();
        store
            .write_locally(1001, vec![Mutation::set(key("rooms/b"), json!({"v": 2}))])
            .unwrap();

        let err = store
            .acknowledge_batch(2, StreamToken::from(vec![7]))
            .unwrap_err();
        assert_eq!(
            err,
            Error::AcknowledgeSkipsPendingBatch {
                batch_id: 2,
                pending: 1
            }
        );
        assert!(err.is_invariant_violation());

        // Nothing was dropped or folded.
        assert!(store.mutation_queue().lookup_mutation_batch(1).is_some());
        assert!(store.mutation_queue().lookup_mutation_batch(2).is_some());
        assert_eq!(store.mutation_queue().highest_acknowledged_batch_id(), -1);
        assert!(store.last_stream_token().is_empty());
        assert!(store.remote_document(&key("rooms/b")).is_none());
        let local = store.local_document(&key("rooms/a")).unwrap().unwrap();
        assert_eq!(local.data, json!({"v": 1}));

        store.acknowledge_batch(1, StreamToken::empty()).unwrap();
        store.acknowledge_batch(2, StreamToken::empty()).unwrap();
        assert!(!store.has_pending_writes());
        assert_eq!(store.remote_document(&key("rooms/a")).unwrap().data, json!({"v": 1}));
        assert_eq!(store.remote_document(&key("rooms/b")).unwrap().data, json!({"v": 2}));
    }

    #[test]
    fn update_view_pins_keys() {
        let mut store = store(GarbageCollection::Eager);
        store.apply_remote_documents(
            vec![
                Document::new(key("rooms/a"), json!({"rank": 2})),
                Document::new(key("rooms/b"), json!({"rank": 1})),
            ],
            Vec::new(),
        );
        let mut view = QueryView::new(rooms().order_by("rank", Direction::Ascending), 7);

        let snapshot = store.update_view(&mut view).unwrap().unwrap();
        let keys: Vec<_> = snapshot.docs.iter().map(|d| d.key.to_string()).collect();
        assert_eq!(keys, vec!["rooms/b", "rooms/a"]);
        assert_eq!(store.view_references(7), vec![key("rooms/a"), key("rooms/b")]);

        // Pinned documents survive collection.
        assert!(store.collect_garbage().is_empty());

        store.release_target(7);
        let mut garbage = store.collect_garbage();
        garbage.sort();
        assert_eq!(garbage, vec![key("rooms/a"), key("rooms/b")]);
        assert!(store.remote_document(&key("rooms/a")).is_none());
    }

    #[test]
    fn pending_batches_keep_documents_alive() {
        let mut store = store(GarbageCollection::Eager);
        let batch = store
            .write_locally(1000, vec![Mutation::set(key("rooms/a"), json!({}))])
            .unwrap();
        store.acknowledge_batch(batch.batch_id, StreamToken::empty()).unwrap();
        store.apply_remote_documents(
            vec![Document::new(key("rooms/b"), json!({}))],
            Vec::new(),
        );
        store
            .write_locally(1001, vec![Mutation::patch(key("rooms/b"), json!({"x": 1}))])
            .unwrap();

        // rooms/a lost its last reference when its batch was acknowledged;
        // rooms/b is still written by a pending batch.
        assert_eq!(store.collect_garbage(), vec![key("rooms/a")]);
        assert!(store.remote_document(&key("rooms/b")).is_some());
    }

    #[test]
    fn disabled_collection_keeps_everything() {
        let mut store = store(GarbageCollection::Disabled);
        store.apply_remote_documents(
            vec![Document::new(key("rooms/a"), json!({}))],
            Vec::new(),
        );
        assert!(store.collect_garbage().is_empty());
        assert!(store.remote_document(&key("rooms/a")).is_some());
    }
}
