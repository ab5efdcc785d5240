//! Snapshot types for persisting and restoring mutation queue state.
//!
//! A [`QueueSnapshot`] is what a durable backend writes to disk between
//! sessions. Tombstones are kept so that positional lookup still works after
//! a restore.

use crate::mutation_queue::StreamToken;
use crate::{error::Result, BatchId, Error, MutationBatch, BATCH_ID_UNKNOWN};
use serde::{Deserialize, Serialize};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time copy of a mutation queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    pub next_batch_id: BatchId,
    pub highest_acknowledged_batch_id: BatchId,
    #[serde(default)]
    pub last_stream_token: StreamToken,
    /// Batches in id order, tombstones included
    pub batches: Vec<MutationBatch>,
}

impl QueueSnapshot {
    /// Create an empty snapshot.
    pub fn new(next_batch_id: BatchId) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            next_batch_id,
            highest_acknowledged_batch_id: BATCH_ID_UNKNOWN,
            last_stream_token: StreamToken::empty(),
            batches: Vec::new(),
        }
    }

    /// Count batches that have not been removed.
    pub fn live_batch_count(&self) -> usize {
        self.batches.iter().filter(|b| !b.is_tombstone()).count()
    }

    /// Check that the snapshot describes a queue the engine could have built.
    pub fn validate(&self) -> Result<()> {
        if self.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                self.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        if self.next_batch_id < 1 {
            return Err(Error::InvalidSnapshot(format!(
                "next batch id {} must be at least 1",
                self.next_batch_id
            )));
        }

        if self.highest_acknowledged_batch_id < BATCH_ID_UNKNOWN {
            return Err(Error::InvalidSnapshot(format!(
                "highest acknowledged batch {} is below {}",
                self.highest_acknowledged_batch_id, BATCH_ID_UNKNOWN
            )));
        }

        if self.highest_acknowledged_batch_id >= self.next_batch_id {
            return Err(Error::InvalidSnapshot(format!(
                "highest acknowledged batch {} is not below next batch id {}",
                self.highest_acknowledged_batch_id, self.next_batch_id
            )));
        }

        if let Some(first) = self.batches.first() {
            if first.batch_id < 1 {
                return Err(Error::InvalidSnapshot(format!(
                    "batch ids start at 1, found {}",
                    first.batch_id
                )));
            }
            if first.is_tombstone() {
                return Err(Error::InvalidSnapshot(format!(
                    "queue must not start with tombstone {}",
                    first.batch_id
                )));
            }
        }

        // Positional lookup needs consecutive ids.
        for pair in self.batches.windows(2) {
            if pair[1].batch_id != pair[0].batch_id + 1 {
                return Err(Error::InvalidSnapshot(format!(
                    "batch {} does not follow batch {}",
                    pair[1].batch_id, pair[0].batch_id
                )));
            }
        }

        for batch in &self.batches {
            if batch.batch_id >= self.next_batch_id {
                return Err(Error::InvalidSnapshot(format!(
                    "batch {} is not below next batch id {}",
                    batch.batch_id, self.next_batch_id
                )));
            }
            if !batch.is_tombstone() && batch.mutations.is_empty() {
                return Err(Error::InvalidSnapshot(format!(
                    "batch {} has no mutations",
                    batch.batch_id
                )));
            }
        }

        Ok(())
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}
