//! Resource paths and document keys.
//!
//! A path is a list of segments such as `rooms/a/messages/1`. Collections sit
//! at odd depths and documents at even depths, so a [`DocumentKey`] always has
//! an even, non-zero number of segments.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while parsing paths and document keys.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("invalid document key '{0}': document keys need an even number of segments")]
    NotADocument(String),

    #[error("invalid path '{0}': paths must not contain empty segments")]
    EmptySegment(String),
}

/// A slash-separated path into the document tree.
///
/// Ordering compares segment by segment; a path sorts before every path it
/// is a prefix of.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourcePath {
    segments: Vec<String>,
}

impl ResourcePath {
    /// The root path.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a path from already split segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a slash-separated path. Leading and trailing slashes are ignored.
    pub fn from_string(path: &str) -> Result<Self, PathError> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::empty());
        }
        let segments: Vec<String> = trimmed.split('/').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(PathError::EmptySegment(path.to_string()));
        }
        Ok(Self { segments })
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn last_segment(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// A new path with `segment` appended.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// A new path without the last segment.
    pub fn pop_last(&self) -> Self {
        let mut segments = self.segments.clone();
        segments.pop();
        Self { segments }
    }

    /// True if every segment of `self` leads `other`, including `self == other`.
    pub fn is_prefix_of(&self, other: &ResourcePath) -> bool {
        self.len() <= other.len() && other.segments.starts_with(&self.segments)
    }

    /// Canonical slash-separated form.
    pub fn canonical_string(&self) -> String {
        self.segments.join("/")
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_string())
    }
}

/// Identifies a single document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "ResourcePath", into = "ResourcePath")]
pub struct DocumentKey {
    path: ResourcePath,
}

impl DocumentKey {
    /// Whether `path` has the shape of a document path.
    pub fn is_document_key(path: &ResourcePath) -> bool {
        !path.is_empty() && path.len() % 2 == 0
    }

    pub fn from_path(path: ResourcePath) -> Result<Self, PathError> {
        if !Self::is_document_key(&path) {
            return Err(PathError::NotADocument(path.canonical_string()));
        }
        Ok(Self { path })
    }

    pub fn from_string(path: &str) -> Result<Self, PathError> {
        Self::from_path(ResourcePath::from_string(path)?)
    }

    /// A key that sorts before every document key under `prefix`.
    ///
    /// The empty segment precedes all others, so for a collection path the
    /// result is `prefix/""`, which is not a valid document key and is only
    /// ever used as a scan start.
    pub(crate) fn scan_start(prefix: &ResourcePath) -> Self {
        if Self::is_document_key(prefix) {
            Self {
                path: prefix.clone(),
            }
        } else {
            Self {
                path: prefix.child(""),
            }
        }
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// The path of the collection holding this document.
    pub fn collection_path(&self) -> ResourcePath {
        self.path.pop_last()
    }
}

impl TryFrom<ResourcePath> for DocumentKey {
    type Error = PathError;

    fn try_from(path: ResourcePath) -> Result<Self, Self::Error> {
        Self::from_path(path)
    }
}

impl From<DocumentKey> for ResourcePath {
    fn from(key: DocumentKey) -> Self {
        key.path
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.path.fmt(f)
    }
}
