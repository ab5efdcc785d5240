//! Positional change lists for listeners.
//!
//! Indexes are computed against a running copy of the previous result set,
//! updated change by change, so a listener that applies the list in order to
//! its own array of results ends up with the new result set.

use crate::error::{violation, Result};
use crate::{Document, DocumentSet, Error};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// How a document changed between two view versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeType {
    Added,
    Modified,
    Removed,
    /// Only the pending-write state changed
    Metadata,
}

/// A typed change produced by a view, in application order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentViewChange {
    #[serde(rename = "type")]
    pub kind: ChangeType,
    pub doc: Document,
}

impl DocumentViewChange {
    pub fn new(kind: ChangeType, doc: Document) -> Self {
        Self { kind, doc }
    }
}

/// The change kinds reported to listeners. Metadata-only changes surface as
/// [`ChangeKind::Modified`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl From<ChangeType> for ChangeKind {
    fn from(kind: ChangeType) -> Self {
        match kind {
            ChangeType::Added => ChangeKind::Added,
            ChangeType::Modified | ChangeType::Metadata => ChangeKind::Modified,
            ChangeType::Removed => ChangeKind::Removed,
        }
    }
}

/// One entry of a listener-facing change list.
///
/// `old_index` is `None` for added documents and `new_index` is `None` for
/// removed ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentChange {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub document: Document,
    pub old_index: Option<usize>,
    pub new_index: Option<usize>,
}

/// Derive positional changes from `changes` applied on top of `old_docs`.
///
/// When `old_docs` is empty this is a listener's first snapshot: every change
/// must be an addition and additions must arrive in result order.
pub fn compute_changes(
    old_docs: &DocumentSet,
    changes: &[DocumentViewChange],
) -> Result<Vec<DocumentChange>> {
    if old_docs.is_empty() {
        first_snapshot_changes(old_docs, changes)
    } else {
        incremental_changes(old_docs, changes)
    }
}

fn first_snapshot_changes(
    old_docs: &DocumentSet,
    changes: &[DocumentViewChange],
) -> Result<Vec<DocumentChange>> {
    let cmp = old_docs.comparator();
    let mut last_doc: Option<&Document> = None;
    let mut result = Vec::with_capacity(changes.len());

    for (index, change) in changes.iter().enumerate() {
        if change.kind != ChangeType::Added {
            return Err(violation(Error::InvalidFirstSnapshotChange(
                change.doc.key.clone(),
            )));
        }
        if let Some(last) = last_doc {
            if cmp(last, &change.doc) != Ordering::Less {
                return Err(violation(Error::AddedOutOfOrder(change.doc.key.clone())));
            }
        }
        last_doc = Some(&change.doc);
        result.push(DocumentChange {
            kind: ChangeKind::Added,
            document: change.doc.clone(),
            old_index: None,
            new_index: Some(index),
        });
    }

    Ok(result)
}

fn incremental_changes(
    old_docs: &DocumentSet,
    changes: &[DocumentViewChange],
) -> Result<Vec<DocumentChange>> {
    let mut index_tracker = old_docs.clone();
    let mut result = Vec::with_capacity(changes.len());

    for change in changes {
        let key = &change.doc.key;
        let mut old_index = None;
        let mut new_index = None;

        if change.kind != ChangeType::Added {
            let index = index_tracker
                .index_of(key)
                .ok_or_else(|| violation(Error::UnknownDocument(key.clone())))?;
            old_index = Some(index);
            index_tracker = index_tracker.delete(key);
        }
        if change.kind != ChangeType::Removed {
            index_tracker = index_tracker.add(change.doc.clone());
            new_index = index_tracker.index_of(key);
        }

        result.push(DocumentChange {
            kind: change.kind.into(),
            document: change.doc.clone(),
            old_index,
            new_index,
        });
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Direction, DocumentKey, Query, ResourcePath};
    use serde_json::json;

    fn doc(id: &str, rank: i64) -> Document {
        Document::new(
            DocumentKey::from_string(&format!("rooms/{id}")).unwrap(),
            json!({ "rank": rank }),
        )
    }

    fn empty_set() -> DocumentSet {
        let query = Query::at_path(ResourcePath::from_string("rooms").unwrap())
            .order_by("rank", Direction::Ascending);
        DocumentSet::new(query.comparator())
    }

    fn added(doc: Document) -> DocumentViewChange {
        DocumentViewChange::new(ChangeType::Added, doc)
    }

    #[test]
    fn first_snapshot_counts_up() {
        let changes = vec![added(doc("d1", 1)), added(doc("d2", 2)), added(doc("d3", 3))];
        let result = compute_changes(&empty_set(), &changes).unwrap();

        let indexes: Vec<_> = result.iter().map(|c| (c.old_index, c.new_index)).collect();
        assert_eq!(indexes, vec![(None, Some(0)), (None, Some(1)), (None, Some(2))]);
        assert!(result.iter().all(|c| c.kind == ChangeKind::Added));
    }

    #[test]
    fn first_snapshot_rejects_non_additions() {
        let changes = vec![DocumentViewChange::new(ChangeType::Modified, doc("d1", 1))];
        let err = compute_changes(&empty_set(), &changes).unwrap_err();
        assert!(matches!(err, Error::InvalidFirstSnapshotChange(_)));
    }

    #[test]
    fn first_snapshot_rejects_unordered_additions() {
        let changes = vec![added(doc("d2", 2)), added(doc("d1", 1))];
        let err = compute_changes(&empty_set(), &changes).unwrap_err();
        assert_eq!(err, Error::AddedOutOfOrder(doc("d1", 1).key));
    }

    #[test]
    fn incremental_indexes_follow_running_set() {
        let old = empty_set()
            .add(doc("d1", 1))
            .add(doc("d2", 2))
            .add(doc("d3", 3));
        let changes = vec![
            DocumentViewChange::new(ChangeType::Removed, doc("d2", 2)),
            added(doc("d4", 4)),
            // Moves d1 to the end.
            DocumentViewChange::new(ChangeType::Modified, doc("d1", 9)),
            DocumentViewChange::new(ChangeType::Metadata, doc("d3", 3)),
        ];
        let result = compute_changes(&old, &changes).unwrap();

        assert_eq!(result[0].kind, ChangeKind::Removed);
        assert_eq!((result[0].old_index, result[0].new_index), (Some(1), None));
        assert_eq!(result[1].kind, ChangeKind::Added);
        assert_eq!((result[1].old_index, result[1].new_index), (None, Some(2)));
        assert_eq!((result[2].old_index, result[2].new_index), (Some(0), Some(2)));
        assert_eq!(result[3].kind, ChangeKind::Modified);
        assert_eq!((result[3].old_index, result[3].new_index), (Some(0), Some(0)));
    }

    #[test]
    fn incremental_rejects_unknown_documents() {
        let old = empty_set().add(doc("d1", 1));
        let changes = vec![DocumentViewChange::new(ChangeType::Removed, doc("d9", 9))];
        let err = compute_changes(&old, &changes).unwrap_err();
        assert_eq!(err, Error::UnknownDocument(doc("d9", 9).key));
    }

    #[test]
    fn change_type_names() {
        let change = added(doc("d1", 1));
        let json = serde_json::to_string(&change).unwrap();
        assert!(json.contains("\"type\":\"added\""));
        assert_eq!(ChangeKind::from(ChangeType::Metadata), ChangeKind::Modified);
    }
}
