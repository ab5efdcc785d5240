//! Documents and ordered document sets.

use crate::sorted::{Comparator, Iter, SortedSet};
use crate::DocumentKey;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// A document as seen by a listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub key: DocumentKey,
    /// The document contents
    pub data: serde_json::Value,
    /// Whether pending local writes are reflected in `data`
    #[serde(default)]
    pub has_local_mutations: bool,
}

impl Document {
    pub fn new(key: DocumentKey, data: serde_json::Value) -> Self {
        Self {
            key,
            data,
            has_local_mutations: false,
        }
    }

    /// Mark the document as carrying unacknowledged local writes.
    pub fn with_local_mutations(mut self) -> Self {
        self.has_local_mutations = true;
        self
    }

    /// Look up a top-level field.
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.data.get(name)
    }
}

/// Comparator over documents.
pub type DocComparator = Comparator<Document>;

fn compare_keys(a: &Document, b: &Document) -> Ordering {
    a.key.cmp(&b.key)
}

/// A persistent set of documents ordered by a query comparator and indexed by
/// key.
///
/// Documents that the comparator considers equal are ordered by key, so the
/// order is total.
#[derive(Clone)]
pub struct DocumentSet {
    keyed: SortedSet<Document>,
    sorted: SortedSet<Document>,
}

impl DocumentSet {
    pub fn new(cmp: DocComparator) -> Self {
        Self {
            keyed: SortedSet::new(compare_keys),
            sorted: SortedSet::new(move |a: &Document, b: &Document| {
                cmp(a, b).then_with(|| compare_keys(a, b))
            }),
        }
    }

    /// An empty set ordered by document key.
    pub fn by_key() -> Self {
        Self::new(Arc::new(compare_keys))
    }

    /// The total order used by this set.
    pub fn comparator(&self) -> &DocComparator {
        self.sorted.comparator()
    }

    pub fn len(&self) -> usize {
        self.keyed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keyed.is_empty()
    }

    pub fn has(&self, key: &DocumentKey) -> bool {
        self.get(key).is_some()
    }

    pub fn get(&self, key: &DocumentKey) -> Option<&Document> {
        self.keyed.seek(|doc| doc.key.cmp(key))
    }

    pub fn first(&self) -> Option<&Document> {
        self.sorted.first()
    }

    pub fn last(&self) -> Option<&Document> {
        self.sorted.last()
    }

    /// Position of the document with `key` in set order.
    pub fn index_of(&self, key: &DocumentKey) -> Option<usize> {
        let doc = self.get(key)?;
        self.sorted.index_of(doc)
    }

    /// A new version containing `doc`, replacing any document with its key.
    #[must_use]
    pub fn add(&self, doc: Document) -> Self {
        let base = self.delete(&doc.key);
        Self {
            keyed: base.keyed.insert(doc.clone()),
            sorted: base.sorted.insert(doc),
        }
    }

    /// A new version without the document for `key`.
    #[must_use]
    pub fn delete(&self, key: &DocumentKey) -> Self {
        match self.get(key) {
            Some(doc) => Self {
                keyed: self.keyed.remove(doc),
                sorted: self.sorted.remove(doc),
            },
            None => self.clone(),
        }
    }

    /// Documents in set order.
    pub fn iter(&self) -> Iter<'_, Document> {
        self.sorted.iter()
    }
}

impl Default for DocumentSet {
    fn default() -> Self {
        Self::by_key()
    }
}

impl<'a> IntoIterator for &'a DocumentSet {
    type Item = &'a Document;
    type IntoIter = Iter<'a, Document>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl PartialEq for DocumentSet {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl fmt::Debug for DocumentSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
