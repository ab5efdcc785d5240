//! The offline write log.
//!
//! Locally issued writes are appended as [`MutationBatch`]es with strictly
//! increasing ids and wait here until the backend acknowledges or rejects
//! them. A secondary index of [`DocReference`] rows maps each document key to
//! the batches that write it.
//!
//! # Positional lookup
//!
//! [`MemoryMutationQueue`] stores batches in id order with no gaps, so the
//! position of a batch is `batch_id - front.batch_id`. Keeping that true is
//! what the removal rules are for:
//!
//! - removal always covers a contiguous run of live batches;
//! - a run that starts at the front is dropped, together with any tombstones
//!   directly behind it;
//! - a run anywhere else is replaced by tombstones in place.
//!
//! Every rule violation is a caller bug and is reported as an [`Error`]
//! before any state changes.

use crate::error::{violation, Result};
use crate::gc::{GarbageCollector, GarbageSource};
use crate::reference::DocReference;
use crate::snapshot::QueueSnapshot;
use crate::sorted::SortedSet;
use crate::{
    BatchId, DocumentKey, Error, Mutation, MutationBatch, ResourcePath, Timestamp,
    BATCH_ID_UNKNOWN,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Opaque checkpoint echoed back to the backend when a write stream resumes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamToken(Vec<u8>);

impl StreamToken {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for StreamToken {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for StreamToken {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

/// The contract every mutation queue backend satisfies.
///
/// Callers serialize access; no two operations interleave.
pub trait MutationQueue: GarbageSource {
    /// Prepare the queue for use. An empty queue restarts ids at 1.
    fn start(&mut self) -> Result<()>;

    fn check_empty(&self) -> bool;

    /// The id the next added batch will receive.
    fn next_batch_id(&self) -> BatchId;

    /// [`BATCH_ID_UNKNOWN`] until the first acknowledgement.
    fn highest_acknowledged_batch_id(&self) -> BatchId;

    /// Record that the backend accepted `batch`. Batches are acknowledged in
    /// id order.
    fn acknowledge_batch(&mut self, batch: &MutationBatch, stream_token: StreamToken)
        -> Result<()>;

    fn last_stream_token(&self) -> StreamToken;

    fn set_last_stream_token(&mut self, stream_token: StreamToken);

    /// Append a batch holding `mutations` under the next batch id.
    fn add_mutation_batch(
        &mut self,
        local_write_time: Timestamp,
        mutations: Vec<Mutation>,
    ) -> Result<Arc<MutationBatch>>;

    /// The live batch with `batch_id`, if any.
    fn lookup_mutation_batch(&self, batch_id: BatchId) -> Option<Arc<MutationBatch>>;

    /// The first live, unacknowledged batch after `batch_id`.
    fn next_mutation_batch_after_batch_id(&self, batch_id: BatchId) -> Option<Arc<MutationBatch>>;

    /// Every live batch, in id order.
    fn all_mutation_batches(&self) -> Vec<Arc<MutationBatch>>;

    /// Every live batch with an id up to and including `batch_id`.
    fn all_mutation_batches_through_batch_id(&self, batch_id: BatchId) -> Vec<Arc<MutationBatch>>;

    /// Every live batch that writes `key`, in id order.
    fn all_mutation_batches_affecting_document_key(
        &self,
        key: &DocumentKey,
    ) -> Result<Vec<Arc<MutationBatch>>>;

    /// Every live batch that writes a direct child of `query_path`, in id
    /// order and without duplicates.
    fn all_mutation_batches_affecting_query(
        &self,
        query_path: &ResourcePath,
    ) -> Vec<Arc<MutationBatch>>;

    /// Remove a contiguous run of live batches.
    fn remove_mutation_batches(&mut self, batches: &[Arc<MutationBatch>]) -> Result<()>;

    fn set_garbage_collector(&mut self, collector: Option<Arc<dyn GarbageCollector>>);

    /// Verify that an empty queue leaves no rows in the key index.
    fn perform_consistency_check(&self) -> Result<()>;
}

/// In-memory reference implementation of [`MutationQueue`].
#[derive(Clone)]
pub struct MemoryMutationQueue {
    /// Batches in id order, tombstones included
    queue: VecDeque<Arc<MutationBatch>>,
    next_batch_id: BatchId,
    highest_acknowledged_batch_id: BatchId,
    last_stream_token: StreamToken,
    /// (key, batch id) rows for every live batch
    batches_by_document_key: SortedSet<DocReference>,
    garbage_collector: Option<Arc<dyn GarbageCollector>>,
}

impl Default for MemoryMutationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryMutationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMutationQueue")
            .field("queue", &self.queue)
            .field("next_batch_id", &self.next_batch_id)
            .field(
                "highest_acknowledged_batch_id",
                &self.highest_acknowledged_batch_id,
            )
            .finish_non_exhaustive()
    }
}

impl MemoryMutationQueue {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            next_batch_id: 1,
            highest_acknowledged_batch_id: BATCH_ID_UNKNOWN,
            last_stream_token: StreamToken::empty(),
            batches_by_document_key: SortedSet::new(DocReference::compare_by_key),
            garbage_collector: None,
        }
    }

    /// Number of slots in the queue, tombstones included.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Computed position of `batch_id`.
    ///
    /// Negative when the batch was already dropped from the front, and at or
    /// past the end when it has not been issued yet. An empty queue reports 0.
    pub fn index_of_batch_id(&self, batch_id: BatchId) -> i64 {
        match self.queue.front() {
            Some(first) => batch_id.saturating_sub(first.batch_id),
            None => 0,
        }
    }

    fn index_of_existing_batch_id(&self, batch_id: BatchId, action: &'static str) -> Result<usize> {
        let index = self.index_of_batch_id(batch_id);
        match usize::try_from(index) {
            Ok(index) if index < self.queue.len() => Ok(index),
            _ => Err(violation(Error::MissingBatch { batch_id, action })),
        }
    }

    fn find_mutation_batch(&self, batch_id: BatchId) -> Option<&Arc<MutationBatch>> {
        let index = usize::try_from(self.index_of_batch_id(batch_id)).ok()?;
        let batch = self.queue.get(index)?;
        debug_assert_eq!(batch.batch_id, batch_id, "if found batch must match");
        (!batch.is_tombstone()).then_some(batch)
    }

    fn live_batches_before_index(&self, end_index: usize) -> Vec<Arc<MutationBatch>> {
        self.queue
            .iter()
            .take(end_index)
            .filter(|batch| !batch.is_tombstone())
            .cloned()
            .collect()
    }

    /// Export the queue for persistence.
    pub fn export_state(&self) -> QueueSnapshot {
        let mut snapshot = QueueSnapshot::new(self.next_batch_id);
        snapshot.highest_acknowledged_batch_id = self.highest_acknowledged_batch_id;
        snapshot.last_stream_token = self.last_stream_token.clone();
        snapshot.batches = self.queue.iter().map(|batch| (**batch).clone()).collect();
        snapshot
    }

    /// Replace the queue contents with a previously exported snapshot.
    ///
    /// The snapshot is validated first; a rejected snapshot leaves the queue
    /// unchanged. The key index is rebuilt from the live batches.
    pub fn import_state(&mut self, snapshot: QueueSnapshot) -> Result<()> {
        snapshot.validate()?;

        let mut index = SortedSet::new(DocReference::compare_by_key);
        for batch in snapshot.batches.iter().filter(|batch| !batch.is_tombstone()) {
            for key in batch.keys() {
                index = index.insert(DocReference::new(key.clone(), batch.batch_id));
            }
        }

        self.queue = snapshot.batches.into_iter().map(Arc::new).collect();
        self.next_batch_id = snapshot.next_batch_id;
        self.highest_acknowledged_batch_id = snapshot.highest_acknowledged_batch_id;
        self.last_stream_token = snapshot.last_stream_token;
        self.batches_by_document_key = index;
        tracing::debug!(
            batches = self.queue.len(),
            next_batch_id = self.next_batch_id,
            "imported mutation queue state"
        );
        Ok(())
    }
}

impl MutationQueue for MemoryMutationQueue {
    fn start(&mut self) -> Result<()> {
        // The queue outlives sign-out/sign-in cycles, so an empty queue
        // restarts numbering the way a freshly opened durable queue would.
        if self.queue.is_empty() {
            self.next_batch_id = 1;
            self.highest_acknowledged_batch_id = BATCH_ID_UNKNOWN;
        }
        if self.highest_acknowledged_batch_id >= self.next_batch_id {
            return Err(violation(Error::AcknowledgedBeyondNext {
                highest_acknowledged: self.highest_acknowledged_batch_id,
                next_batch_id: self.next_batch_id,
            }));
        }
        tracing::debug!(next_batch_id = self.next_batch_id, "mutation queue started");
        Ok(())
    }

    fn check_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn next_batch_id(&self) -> BatchId {
        self.next_batch_id
    }

    fn highest_acknowledged_batch_id(&self) -> BatchId {
        self.highest_acknowledged_batch_id
    }

    fn acknowledge_batch(
        &mut self,
        batch: &MutationBatch,
        stream_token: StreamToken,
    ) -> Result<()> {
        let batch_id = batch.batch_id;
        if batch_id <= self.highest_acknowledged_batch_id {
            return Err(violation(Error::OutOfOrderAcknowledgement {
                batch_id,
                highest_acknowledged: self.highest_acknowledged_batch_id,
            }));
        }

        let index = self.index_of_existing_batch_id(batch_id, "acknowledged")?;
        let check = &self.queue[index];
        if check.batch_id != batch_id {
            return Err(violation(Error::QueueOrdering {
                expected: batch_id,
                found: check.batch_id,
            }));
        }
        if check.is_tombstone() {
            return Err(violation(Error::AcknowledgeRemovedBatch(batch_id)));
        }

        self.highest_acknowledged_batch_id = batch_id;
        self.last_stream_token = stream_token;
        tracing::debug!(batch_id, "acknowledged mutation batch");
        Ok(())
    }

    fn last_stream_token(&self) -> StreamToken {
        self.last_stream_token.clone()
    }

    fn set_last_stream_token(&mut self, stream_token: StreamToken) {
        self.last_stream_token = stream_token;
    }

    fn add_mutation_batch(
        &mut self,
        local_write_time: Timestamp,
        mutations: Vec<Mutation>,
    ) -> Result<Arc<MutationBatch>> {
        if mutations.is_empty() {
            return Err(violation(Error::EmptyMutationBatch));
        }

        let batch_id = self.next_batch_id;
        if let Some(prior) = self.queue.back() {
            if prior.batch_id >= batch_id {
                return Err(violation(Error::NonMonotonicBatchId {
                    prior: prior.batch_id,
                    next: batch_id,
                }));
            }
        }
        self.next_batch_id += 1;

        let batch = Arc::new(MutationBatch::new(batch_id, local_write_time, mutations));
        let mut index = self.batches_by_document_key.clone();
        for key in batch.keys() {
            index = index.insert(DocReference::new(key.clone(), batch_id));
        }
        self.batches_by_document_key = index;
        self.queue.push_back(Arc::clone(&batch));

        tracing::debug!(
            batch_id,
            mutations = batch.mutations.len(),
            "added mutation batch"
        );
        Ok(batch)
    }

    fn lookup_mutation_batch(&self, batch_id: BatchId) -> Option<Arc<MutationBatch>> {
        self.find_mutation_batch(batch_id).cloned()
    }

    fn next_mutation_batch_after_batch_id(&self, batch_id: BatchId) -> Option<Arc<MutationBatch>> {
        // Everything up to the highest acknowledged id has been handed out
        // already, so never return it again.
        let after = batch_id.max(self.highest_acknowledged_batch_id);
        let start = self.index_of_batch_id(after.saturating_add(1)).max(0);
        let start = usize::try_from(start).unwrap_or(usize::MAX);
        self.queue
            .iter()
            .skip(start)
            .find(|batch| !batch.is_tombstone())
            .cloned()
    }

    fn all_mutation_batches(&self) -> Vec<Arc<MutationBatch>> {
        self.live_batches_before_index(self.queue.len())
    }

    fn all_mutation_batches_through_batch_id(&self, batch_id: BatchId) -> Vec<Arc<MutationBatch>> {
        let count = self.queue.len();
        let end_index = self.index_of_batch_id(batch_id);
        let end_index = match usize::try_from(end_index) {
            Err(_) => 0,
            Ok(index) if index >= count => count,
            // Include the batch itself.
            Ok(index) => index + 1,
        };
        self.live_batches_before_index(end_index)
    }

    fn all_mutation_batches_affecting_document_key(
        &self,
        key: &DocumentKey,
    ) -> Result<Vec<Arc<MutationBatch>>> {
        let start = DocReference::new(key.clone(), 0);
        let end = DocReference::new(key.clone(), BatchId::MAX);
        let mut result = Vec::new();
        let mut dangling = None;
        self.batches_by_document_key
            .for_each_in_range(&start, &end, |reference| {
                if dangling.is_some() {
                    return;
                }
                match self.find_mutation_batch(reference.target_or_batch_id) {
                    Some(batch) => result.push(Arc::clone(batch)),
                    None => dangling = Some(reference.target_or_batch_id),
                }
            });
        if let Some(batch_id) = dangling {
            return Err(violation(Error::DanglingIndexEntry {
                key: key.clone(),
                batch_id,
            }));
        }
        Ok(result)
    }

    fn all_mutation_batches_affecting_query(
        &self,
        query_path: &ResourcePath,
    ) -> Vec<Arc<MutationBatch>> {
        // Only direct children can match: a query on `rooms` never matches
        // `rooms/a/messages/1`. Ancestor queries would need another scan.
        let immediate_children_path_length = query_path.len() + 1;
        let start = DocReference::new(DocumentKey::scan_start(query_path), 0);

        let mut unique_batch_ids: SortedSet<BatchId> = SortedSet::natural();
        self.batches_by_document_key
            .for_each_while(&start, |reference| {
                let row_path = reference.key.path();
                if !query_path.is_prefix_of(row_path) {
                    return false;
                }
                if row_path.len() == immediate_children_path_length {
                    unique_batch_ids = unique_batch_ids.insert(reference.target_or_batch_id);
                }
                true
            });

        unique_batch_ids
            .iter()
            .filter_map(|batch_id| self.find_mutation_batch(*batch_id).cloned())
            .collect()
    }

    fn remove_mutation_batches(&mut self, batches: &[Arc<MutationBatch>]) -> Result<()> {
        let Some(first) = batches.first() else {
            return Err(violation(Error::EmptyRemoval));
        };
        let first_batch_id = first.batch_id;
        let queue_count = self.queue.len();

        // The run need not start at the front of the queue.
        let start_index = self.index_of_existing_batch_id(first_batch_id, "removed")?;
        let start = &self.queue[start_index];
        if start.batch_id != first_batch_id {
            return Err(violation(Error::QueueOrdering {
                expected: first_batch_id,
                found: start.batch_id,
            }));
        }
        if start.is_tombstone() {
            return Err(violation(Error::MissingBatch {
                batch_id: first_batch_id,
                action: "removed",
            }));
        }

        // Check that the run is contiguous, skipping tombstones.
        let mut removed = vec![Arc::clone(start)];
        let mut batch_index = 1;
        let mut queue_index = start_index + 1;
        while batch_index < batches.len() && queue_index < queue_count {
            let batch = &self.queue[queue_index];
            if batch.is_tombstone() {
                queue_index += 1;
                continue;
            }
            let expected = batches[batch_index].batch_id;
            if batch.batch_id != expected {
                return Err(violation(Error::NonContiguousRemoval {
                    expected,
                    found: batch.batch_id,
                }));
            }
            removed.push(Arc::clone(batch));
            batch_index += 1;
            queue_index += 1;
        }
        if batch_index < batches.len() {
            return Err(violation(Error::MissingBatch {
                batch_id: batches[batch_index].batch_id,
                action: "removed",
            }));
        }

        if start_index == 0 {
            // Sweep tombstones left behind by earlier out-of-order removals.
            while queue_index < queue_count && self.queue[queue_index].is_tombstone() {
                queue_index += 1;
            }
            self.queue.drain(start_index..queue_index);
        } else {
            for slot in self.queue.range_mut(start_index..queue_index) {
                if !slot.is_tombstone() {
                    *slot = Arc::new(slot.to_tombstone());
                }
            }
        }

        let mut references = self.batches_by_document_key.clone();
        for batch in &removed {
            for key in batch.keys() {
                if let Some(collector) = &self.garbage_collector {
                    collector.add_potential_garbage_key(key);
                }
                references = references.remove(&DocReference::new(key.clone(), batch.batch_id));
            }
        }
        self.batches_by_document_key = references;

        tracing::debug!(
            first_batch_id,
            count = removed.len(),
            compacted = start_index == 0,
            "removed mutation batches"
        );
        Ok(())
    }

    fn set_garbage_collector(&mut self, collector: Option<Arc<dyn GarbageCollector>>) {
        self.garbage_collector = collector;
    }

    fn perform_consistency_check(&self) -> Result<()> {
        if self.queue.is_empty() && !self.batches_by_document_key.is_empty() {
            return Err(violation(Error::DocumentLeak(
                self.batches_by_document_key.len(),
            )));
        }
        Ok(())
    }
}

impl GarbageSource for MemoryMutationQueue {
    fn contains_key(&self, key: &DocumentKey) -> bool {
        let start = DocReference::new(key.clone(), 0);
        self.batches_by_document_key
            .first_after_or_equal(&start)
            .is_some_and(|reference| &reference.key == key)
    }
}
