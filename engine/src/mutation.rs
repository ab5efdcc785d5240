//! Local writes and the batches that group them.
//!
//! The queue only ever looks at [`Mutation::key`]. The payload semantics
//! below exist so pending writes can be overlaid on server documents.

use crate::{BatchId, Document, DocumentKey, Timestamp};
use serde::{Deserialize, Serialize};

/// A single pending write to one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Mutation {
    /// Replace the whole document
    Set {
        key: DocumentKey,
        value: serde_json::Value,
    },
    /// Merge top-level fields into an existing document
    Patch {
        key: DocumentKey,
        value: serde_json::Value,
    },
    /// Remove the document
    Delete { key: DocumentKey },
}

impl Mutation {
    pub fn set(key: DocumentKey, value: serde_json::Value) -> Self {
        Mutation::Set { key, value }
    }

    pub fn patch(key: DocumentKey, value: serde_json::Value) -> Self {
        Mutation::Patch { key, value }
    }

    pub fn delete(key: DocumentKey) -> Self {
        Mutation::Delete { key }
    }

    /// The document this mutation writes.
    pub fn key(&self) -> &DocumentKey {
        match self {
            Mutation::Set { key, .. } | Mutation::Patch { key, .. } | Mutation::Delete { key } => key,
        }
    }

    /// Apply this write on top of `base` for latency compensation.
    ///
    /// A patch on a missing document leaves it missing.
    pub fn apply_to_local_view(&self, base: Option<Document>) -> Option<Document> {
        match self {
            Mutation::Set { key, value } => {
                Some(Document::new(key.clone(), value.clone()).with_local_mutations())
            }
            Mutation::Patch { value, .. } => base.map(|mut doc| {
                merge_fields(&mut doc.data, value);
                doc.with_local_mutations()
            }),
            Mutation::Delete { .. } => None,
        }
    }
}

fn merge_fields(target: &mut serde_json::Value, patch: &serde_json::Value) {
    match (target.as_object_mut(), patch.as_object()) {
        (Some(fields), Some(updates)) => {
            for (name, value) in updates {
                fields.insert(name.clone(), value.clone());
            }
        }
        _ => *target = patch.clone(),
    }
}

/// An atomically applied group of local writes.
///
/// A removed batch that cannot be dropped from the queue yet is replaced by a
/// tombstone: same id, no mutations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationBatch {
    pub batch_id: BatchId,
    /// When the batch was written locally (milliseconds since epoch)
    pub local_write_time: Timestamp,
    pub mutations: Vec<Mutation>,
    #[serde(default)]
    pub tombstone: bool,
}

impl MutationBatch {
    pub fn new(batch_id: BatchId, local_write_time: Timestamp, mutations: Vec<Mutation>) -> Self {
        Self {
            batch_id,
            local_write_time,
            mutations,
            tombstone: false,
        }
    }

    /// The inert placeholder left behind when this batch is removed out of
    /// order.
    pub fn to_tombstone(&self) -> Self {
        Self {
            batch_id: self.batch_id,
            local_write_time: self.local_write_time,
            mutations: Vec::new(),
            tombstone: true,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.tombstone
    }

    /// Keys written by this batch, in mutation order.
    pub fn keys(&self) -> impl Iterator<Item = &DocumentKey> {
        self.mutations.iter().map(Mutation::key)
    }

    /// Apply every mutation of this batch that targets `key`.
    pub fn apply_to_local_view(&self, key: &DocumentKey, base: Option<Document>) -> Option<Document> {
        self.mutations
            .iter()
            .filter(|mutation| mutation.key() == key)
            .fold(base, |doc, mutation| mutation.apply_to_local_view(doc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(path: &str) -> DocumentKey {
        DocumentKey::from_string(path).unwrap()
    }

    #[test]
    fn set_patch_delete_on_local_view() {
        let base = Document::new(key("rooms/a"), json!({"name": "a", "size": 1}));

        let set = Mutation::set(key("rooms/a"), json!({"name": "b"}));
        let doc = set.apply_to_local_view(Some(base.clone())).unwrap();
        assert_eq!(doc.data, json!({"name": "b"}));
        assert!(doc.has_local_mutations);

        let patch = Mutation::patch(key("rooms/a"), json!({"size": 2}));
        let doc = patch.apply_to_local_view(Some(base)).unwrap();
        assert_eq!(doc.data, json!({"name": "a", "size": 2}));

        assert_eq!(patch.apply_to_local_view(None), None);
        assert_eq!(
            Mutation::delete(key("rooms/a")).apply_to_local_view(Some(doc)),
            None
        );
    }

    #[test]
    fn batch_applies_only_matching_keys_in_order() {
        let batch = MutationBatch::new(
            1,
            1000,
            vec![
                Mutation::set(key("rooms/a"), json!({"n": 1})),
                Mutation::set(key("rooms/b"), json!({"n": 9})),
                Mutation::patch(key("rooms/a"), json!({"m": 2})),
            ],
        );
        let doc = batch.apply_to_local_view(&key("rooms/a"), None).unwrap();
        assert_eq!(doc.data, json!({"n": 1, "m": 2}));
        assert_eq!(batch.keys().count(), 3);
    }

    #[test]
    fn tombstone_keeps_id_and_drops_mutations() {
        let batch = MutationBatch::new(4, 1000, vec![Mutation::delete(key("rooms/a"))]);
        let tombstone = batch.to_tombstone();
        assert_eq!(tombstone.batch_id, 4);
        assert!(tombstone.is_tombstone());
        assert!(tombstone.mutations.is_empty());
        assert!(!batch.is_tombstone());
    }

    #[test]
    fn serialization_format() {
        let mutation = Mutation::set(key("rooms/a"), json!({"n": 1}));
        let json = serde_json::to_string(&mutation).unwrap();
        assert!(json.contains("\"type\":\"set\""));

        let batch = MutationBatch::new(1, 1000, vec![mutation]);
        let json = serde_json::to_string(&batch).unwrap();
        assert!(json.contains("batchId"));
        assert!(json.contains("localWriteTime"));
        let parsed: MutationBatch = serde_json::from_str(&json).unwrap();
        assert_eq!(batch, parsed);
    }
}
