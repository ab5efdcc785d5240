//! Query views: the result set one listener currently sees.

use crate::diff::{compute_changes, ChangeType, DocumentChange, DocumentViewChange};
use crate::error::Result;
use crate::view_cache::{CacheNode, ViewCache};
use crate::{Document, DocumentKey, DocumentSet, Query, TargetId};
use std::cmp::Ordering;

/// What a listener is shown after one round of updates.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSnapshot {
    pub query: Query,
    /// Results before this snapshot
    pub old_docs: DocumentSet,
    pub docs: DocumentSet,
    /// Typed changes from `old_docs` to `docs`, in application order
    pub doc_changes: Vec<DocumentViewChange>,
    /// Whether the server has not yet confirmed a complete result set
    pub from_cache: bool,
    pub has_pending_writes: bool,
}

impl ViewSnapshot {
    /// Positional changes for listeners that keep results in an array.
    pub fn changes(&self) -> Result<Vec<DocumentChange>> {
        compute_changes(&self.old_docs, &self.doc_changes)
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

/// Maintains the cached result set of one query.
///
/// The server side of the cache holds what the backend confirmed; the event
/// side holds what was last handed to the listener.
#[derive(Debug, Clone)]
pub struct QueryView {
    query: Query,
    target_id: TargetId,
    cache: ViewCache<DocumentSet>,
    has_pending_writes: bool,
    from_cache: bool,
}

impl QueryView {
    pub fn new(query: Query, target_id: TargetId) -> Self {
        let empty = DocumentSet::new(query.comparator());
        let cache = ViewCache::new(
            CacheNode::new(empty.clone(), false, false),
            CacheNode::new(empty, false, false),
        );
        Self {
            query,
            target_id,
            cache,
            has_pending_writes: false,
            from_cache: true,
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn target_id(&self) -> TargetId {
        self.target_id
    }

    pub fn cache(&self) -> &ViewCache<DocumentSet> {
        &self.cache
    }

    /// The documents last shown to the listener.
    pub fn docs(&self) -> &DocumentSet {
        self.cache.event_cache().node()
    }

    /// Keys of the documents last shown to the listener.
    pub fn keys(&self) -> Vec<DocumentKey> {
        self.docs().iter().map(|doc| doc.key.clone()).collect()
    }

    /// Replace the server side with documents the backend sent for this
    /// query. Documents outside the query are ignored.
    pub fn apply_server_documents(
        &mut self,
        docs: impl IntoIterator<Item = Document>,
        complete: bool,
    ) {
        let set = self.collect(docs);
        tracing::trace!(
            target_id = self.target_id,
            docs = set.len(),
            complete,
            "server documents applied"
        );
        self.cache = self.cache.update_server_snap(set, complete, false);
    }

    /// Recompute the listener's results from the latest local documents.
    ///
    /// Returns `None` when a snapshot was already emitted and nothing the
    /// listener can observe has changed.
    pub fn compute_snapshot(
        &mut self,
        local_docs: impl IntoIterator<Item = Document>,
        has_pending_writes: bool,
    ) -> Option<ViewSnapshot> {
        let first = self.cache.complete_event_snap().is_none();
        let old_docs = self.docs().clone();
        let new_docs = self.collect(local_docs);
        let from_cache = self.cache.complete_server_snap().is_none();

        let doc_changes = classify_changes(&old_docs, &new_docs);
        if !first
            && doc_changes.is_empty()
            && from_cache == self.from_cache
            && has_pending_writes == self.has_pending_writes
        {
            return None;
        }

        self.cache = self.cache.update_event_snap(new_docs.clone(), true, false);
        self.from_cache = from_cache;
        self.has_pending_writes = has_pending_writes;
        tracing::debug!(
            target_id = self.target_id,
            changes = doc_changes.len(),
            from_cache,
            "view snapshot computed"
        );

        Some(ViewSnapshot {
            query: self.query.clone(),
            old_docs,
            docs: new_docs,
            doc_changes,
            from_cache,
            has_pending_writes,
        })
    }

    fn collect(&self, docs: impl IntoIterator<Item = Document>) -> DocumentSet {
        docs.into_iter()
            .filter(|doc| self.query.matches(doc))
            .fold(DocumentSet::new(self.query.comparator()), |set, doc| {
                set.add(doc)
            })
    }
}

/// Removed documents first, then added, then modified, each group in result
/// order.
fn classify_changes(old_docs: &DocumentSet, new_docs: &DocumentSet) -> Vec<DocumentViewChange> {
    let mut removed = Vec::new();
    let mut added = Vec::new();
    let mut modified = Vec::new();

    for doc in old_docs {
        if !new_docs.has(&doc.key) {
            removed.push(DocumentViewChange::new(ChangeType::Removed, doc.clone()));
        }
    }
    for doc in new_docs {
        match old_docs.get(&doc.key) {
            None => added.push(DocumentViewChange::new(ChangeType::Added, doc.clone())),
            Some(old) if old.data != doc.data => {
                modified.push(DocumentViewChange::new(ChangeType::Modified, doc.clone()))
            }
            Some(old) if old.has_local_mutations != doc.has_local_mutations => {
                modified.push(DocumentViewChange::new(ChangeType::Metadata, doc.clone()))
            }
            Some(_) => {}
        }
    }

    // Removed documents were collected in old order, the rest in new order.
    let cmp = new_docs.comparator();
    removed.sort_by(|a, b| cmp(&a.doc, &b.doc));
    debug_assert!(added
        .windows(2)
        .all(|pair| cmp(&pair[0].doc, &pair[1].doc) == Ordering::Less));

    removed.extend(added);
    removed.extend(modified);
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::ChangeKind;
    use crate::{Direction, ResourcePath};
    use serde_json::json;

    fn doc(path: &str, rank: i64) -> Document {
        Document::new(DocumentKey::from_string(path).unwrap(), json!({ "rank": rank }))
    }

    fn rooms_view() -> QueryView {
        let query = Query::at_path(ResourcePath::from_string("rooms").unwrap())
            .order_by("rank", Direction::Ascending);
        QueryView::new(query, 1)
    }

    #[test]
    fn first_snapshot_adds_in_query_order() {
        let mut view = rooms_view();
        let snapshot = view
            .compute_snapshot(
                vec![doc("rooms/c", 1), doc("rooms/a", 3), doc("rooms/b", 2)],
                false,
            )
            .unwrap();

        assert!(snapshot.from_cache);
        let keys: Vec<_> = snapshot
            .doc_changes
            .iter()
            .map(|c| c.doc.key.to_string())
            .collect();
        assert_eq!(keys, vec!["rooms/c", "rooms/b", "rooms/a"]);

        let changes = snapshot.changes().unwrap();
        assert_eq!(changes[2].new_index, Some(2));
    }

    #[test]
    fn documents_outside_the_query_are_ignored() {
        let mut view = rooms_view();
        let snapshot = view
            .compute_snapshot(vec![doc("rooms/a", 1), doc("rooms/a/messages/1", 0)], false)
            .unwrap();
        assert_eq!(snapshot.docs.len(), 1);
    }

    #[test]
    fn unchanged_results_emit_nothing() {
        let mut view = rooms_view();
        view.compute_snapshot(vec![doc("rooms/a", 1)], false).unwrap();
        assert!(view.compute_snapshot(vec![doc("rooms/a", 1)], false).is_none());
        // Pending write state alone is observable.
        assert!(view.compute_snapshot(vec![doc("rooms/a", 1)], true).is_some());
    }

    #[test]
    fn server_completion_clears_from_cache() {
        let mut view = rooms_view();
        view.compute_snapshot(vec![doc("rooms/a", 1)], false).unwrap();

        view.apply_server_documents(vec![doc("rooms/a", 1)], true);
        assert!(view.cache().complete_server_snap().is_some());
        let snapshot = view.compute_snapshot(vec![doc("rooms/a", 1)], false).unwrap();
        assert!(!snapshot.from_cache);
        assert!(snapshot.doc_changes.is_empty());
    }

    #[test]
    fn changes_are_grouped_removed_added_modified() {
        let mut view = rooms_view();
        view.compute_snapshot(vec![doc("rooms/a", 1), doc("rooms/b", 2)], false)
            .unwrap();

        let snapshot = view
            .compute_snapshot(
                vec![
                    doc("rooms/a", 5),
                    doc("rooms/c", 3),
                    doc("rooms/b", 2).with_local_mutations(),
                ],
                true,
            )
            .unwrap();
        let kinds: Vec<_> = snapshot.doc_changes.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![ChangeType::Added, ChangeType::Metadata, ChangeType::Modified]
        );

        let changes = snapshot.changes().unwrap();
        assert_eq!(changes[0].kind, ChangeKind::Added);
        assert_eq!(changes[0].new_index, Some(2));
        assert_eq!(view.keys().len(), 3);
    }
}
