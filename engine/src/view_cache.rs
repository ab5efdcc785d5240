//! Per-listener cached snapshots.
//!
//! A [`ViewCache`] pairs what the server last confirmed with what listeners
//! were last shown. Both halves are immutable and shared between versions:
//! updating one side produces a new cache that reuses the other side.

use crate::{DocumentKey, DocumentSet};
use std::sync::Arc;

/// A cached snapshot plus what is known about its completeness.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheNode<N> {
    node: N,
    fully_initialized: bool,
    filtered: bool,
}

impl<N> CacheNode<N> {
    pub fn new(node: N, fully_initialized: bool, filtered: bool) -> Self {
        Self {
            node,
            fully_initialized,
            filtered,
        }
    }

    /// The cached snapshot, complete or not.
    pub fn node(&self) -> &N {
        &self.node
    }

    /// Whether the snapshot reflects everything the source holds.
    pub fn is_fully_initialized(&self) -> bool {
        self.fully_initialized
    }

    /// Whether the snapshot was narrowed by a query filter.
    pub fn is_filtered(&self) -> bool {
        self.filtered
    }
}

impl CacheNode<DocumentSet> {
    /// Whether this cache can answer for `key` on its own: it is complete and
    /// unfiltered, or it holds the document.
    pub fn is_complete_for_key(&self, key: &DocumentKey) -> bool {
        (self.fully_initialized && !self.filtered) || self.node.has(key)
    }
}

/// The event-side and server-side caches of one listener.
#[derive(Debug, PartialEq)]
pub struct ViewCache<N> {
    event_cache: Arc<CacheNode<N>>,
    server_cache: Arc<CacheNode<N>>,
}

impl<N> Clone for ViewCache<N> {
    fn clone(&self) -> Self {
        Self {
            event_cache: Arc::clone(&self.event_cache),
            server_cache: Arc::clone(&self.server_cache),
        }
    }
}

impl<N: Default> ViewCache<N> {
    /// The zero state: empty snapshots on both sides, neither complete nor
    /// filtered.
    pub fn empty() -> Self {
        Self::new(
            CacheNode::new(N::default(), false, false),
            CacheNode::new(N::default(), false, false),
        )
    }
}

impl<N: Default> Default for ViewCache<N> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<N> ViewCache<N> {
    pub fn new(event_cache: CacheNode<N>, server_cache: CacheNode<N>) -> Self {
        Self {
            event_cache: Arc::new(event_cache),
            server_cache: Arc::new(server_cache),
        }
    }

    /// A new cache with the event side replaced.
    #[must_use]
    pub fn update_event_snap(&self, snap: N, complete: bool, filtered: bool) -> Self {
        Self {
            event_cache: Arc::new(CacheNode::new(snap, complete, filtered)),
            server_cache: Arc::clone(&self.server_cache),
        }
    }

    /// A new cache with the server side replaced.
    #[must_use]
    pub fn update_server_snap(&self, snap: N, complete: bool, filtered: bool) -> Self {
        Self {
            event_cache: Arc::clone(&self.event_cache),
            server_cache: Arc::new(CacheNode::new(snap, complete, filtered)),
        }
    }

    pub fn event_cache(&self) -> &CacheNode<N> {
        &self.event_cache
    }

    pub fn server_cache(&self) -> &CacheNode<N> {
        &self.server_cache
    }

    /// The event snapshot if it is complete, otherwise `None`.
    pub fn complete_event_snap(&self) -> Option<&N> {
        complete(&self.event_cache)
    }

    /// The server snapshot if it is complete, otherwise `None`.
    pub fn complete_server_snap(&self) -> Option<&N> {
        complete(&self.server_cache)
    }
}

fn complete<N>(cache: &CacheNode<N>) -> Option<&N> {
    cache.fully_initialized.then_some(&cache.node)
}
