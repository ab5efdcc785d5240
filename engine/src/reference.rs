//! Join rows between document keys and integer ids.
//!
//! A [`DocReference`] links a document key to either a mutation batch id or a
//! view target id. Rows live in flat [`SortedSet`]s rather than nested maps so
//! that "every row for key K" is a single range scan.

use crate::gc::{GarbageCollector, GarbageSource};
use crate::sorted::SortedSet;
use crate::{DocumentKey, ResourcePath, TargetId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

/// A (document key, id) row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocReference {
    pub key: DocumentKey,
    /// Batch id or target id, depending on the table.
    pub target_or_batch_id: i64,
}

impl DocReference {
    pub fn new(key: DocumentKey, target_or_batch_id: i64) -> Self {
        Self {
            key,
            target_or_batch_id,
        }
    }

    /// Key first, then id.
    pub fn compare_by_key(a: &DocReference, b: &DocReference) -> Ordering {
        a.key
            .cmp(&b.key)
            .then(a.target_or_batch_id.cmp(&b.target_or_batch_id))
    }

    /// Id first, then key.
    pub fn compare_by_target_id(a: &DocReference, b: &DocReference) -> Ordering {
        a.target_or_batch_id
            .cmp(&b.target_or_batch_id)
            .then_with(|| a.key.cmp(&b.key))
    }
}

impl Ord for DocReference {
    fn cmp(&self, other: &Self) -> Ordering {
        Self::compare_by_key(self, other)
    }
}

impl PartialOrd for DocReference {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Many-to-many references between documents and view targets.
///
/// Keys stay referenced while any target holds them; releasing the last
/// reference hands the key to the garbage collector.
#[derive(Clone)]
pub struct ReferenceSet {
    refs_by_key: SortedSet<DocReference>,
    refs_by_target: SortedSet<DocReference>,
    garbage_collector: Option<Arc<dyn GarbageCollector>>,
}

impl Default for ReferenceSet {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReferenceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceSet")
            .field("refs", &self.refs_by_key)
            .finish_non_exhaustive()
    }
}

impl ReferenceSet {
    pub fn new() -> Self {
        Self {
            refs_by_key: SortedSet::new(DocReference::compare_by_key),
            refs_by_target: SortedSet::new(DocReference::compare_by_target_id),
            garbage_collector: None,
        }
    }

    pub fn set_garbage_collector(&mut self, collector: Option<Arc<dyn GarbageCollector>>) {
        self.garbage_collector = collector;
    }

    pub fn is_empty(&self) -> bool {
        self.refs_by_key.is_empty()
    }

    pub fn add_reference(&mut self, key: DocumentKey, id: TargetId) {
        let reference = DocReference::new(key, id);
        self.refs_by_key = self.refs_by_key.insert(reference.clone());
        self.refs_by_target = self.refs_by_target.insert(reference);
    }

    pub fn add_references(&mut self, keys: impl IntoIterator<Item = DocumentKey>, id: TargetId) {
        for key in keys {
            self.add_reference(key, id);
        }
    }

    pub fn remove_reference(&mut self, key: DocumentKey, id: TargetId) {
        self.remove_ref(DocReference::new(key, id));
    }

    pub fn remove_references(
        &mut self,
        keys: impl IntoIterator<Item = DocumentKey>,
        id: TargetId,
    ) {
        for key in keys {
            self.remove_reference(key, id);
        }
    }

    /// Drop every reference held by `id`.
    pub fn remove_references_for_id(&mut self, id: TargetId) {
        for reference in self.target_rows(id) {
            self.remove_ref(reference);
        }
    }

    pub fn remove_all_references(&mut self) {
        let all: Vec<DocReference> = self.refs_by_key.iter().cloned().collect();
        for reference in all {
            self.remove_ref(reference);
        }
    }

    /// Keys referenced by `id`, in key order.
    pub fn references_for_id(&self, id: TargetId) -> Vec<DocumentKey> {
        self.target_rows(id)
            .into_iter()
            .map(|reference| reference.key)
            .collect()
    }

    pub fn contains_key(&self, key: &DocumentKey) -> bool {
        let start = DocReference::new(key.clone(), TargetId::MIN);
        self.refs_by_key
            .first_after_or_equal(&start)
            .is_some_and(|reference| &reference.key == key)
    }

    fn target_rows(&self, id: TargetId) -> Vec<DocReference> {
        let start = DocReference::new(DocumentKey::scan_start(&ResourcePath::empty()), id);
        let mut rows = Vec::new();
        self.refs_by_target.for_each_while(&start, |reference| {
            let matches = reference.target_or_batch_id == id;
            if matches {
                rows.push(reference.clone());
            }
            matches
        });
        rows
    }

    fn remove_ref(&mut self, reference: DocReference) {
        if !self.refs_by_key.contains(&reference) {
            return;
        }
        self.refs_by_key = self.refs_by_key.remove(&reference);
        self.refs_by_target = self.refs_by_target.remove(&reference);
        if let Some(collector) = &self.garbage_collector {
            collector.add_potential_garbage_key(&reference.key);
        }
    }
}

impl GarbageSource for ReferenceSet {
    fn contains_key(&self, key: &DocumentKey) -> bool {
        ReferenceSet::contains_key(self, key)
    }
}
