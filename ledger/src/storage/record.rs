//! # Record Reconstruction
//!
//! The chain never stores "the current record". It stores every mutation.
//! The current state of a record is whatever you get by folding its blocks
//! in index order:
//!
//! ```text
//! create ──► update ──► update ──► delete
//!   │          │          │          │
//!   ▼          ▼          ▼          ▼
//!  v1         v2         v3     v3 + deleted
//! ```
//!
//! [`LedgerDb`](super::db::LedgerDb) materializes this fold on every write
//! so the verification engine can answer "does this record still resolve?"
//! without replaying the chain. Deleted records stay resolvable as
//! tombstones: their deletion is itself on the chain.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::block::{Block, RecordAction, RecordSnapshot};
use super::db::DbResult;

// ---------------------------------------------------------------------------
// RecordState
// ---------------------------------------------------------------------------

/// Current state of a medical record, derived from its blocks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordState {
    pub record_id: String,
    pub patient_id: String,
    pub doctor_id: String,
    pub snapshot: RecordSnapshot,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Identity behind the most recent mutation.
    pub last_modified_by: String,
    pub deleted: bool,
    /// Number of blocks folded into this state.
    pub version: u64,
    /// Index of the most recent block for this record.
    pub last_block_index: u64,
}

impl RecordState {
    /// Start a state from the first block seen for a record.
    ///
    /// Normally that is a `create`, but partial chains (imported backups)
    /// may start mid-history; the state then begins from that block.
    fn from_block(block: &Block) -> Self {
        Self {
            record_id: block.data.record_id.clone(),
            patient_id: block.data.patient_id.clone(),
            doctor_id: block.data.doctor_id.clone(),
            snapshot: block.data.snapshot.clone(),
            created_at: block.timestamp,
            updated_at: block.timestamp,
            last_modified_by: block.data.performed_by().to_string(),
            deleted: block.data.action == RecordAction::Delete,
            version: 1,
            last_block_index: block.index,
        }
    }

    /// Fold one more block into the state.
    pub fn apply(state: Option<RecordState>, block: &Block) -> RecordState {
        let Some(mut state) = state else {
            return Self::from_block(block);
        };

        match block.data.action {
            RecordAction::Create => {
                // A second create for the same id restarts the record.
                let version = state.version + 1;
                state = Self::from_block(block);
                state.version = version;
                return state;
            }
            RecordAction::Update => {
                state.snapshot = block.data.snapshot.clone();
                state.deleted = false;
            }
            RecordAction::Delete => {
                state.snapshot = block.data.snapshot.clone();
                state.deleted = true;
            }
        }

        state.patient_id = block.data.patient_id.clone();
        state.doctor_id = block.data.doctor_id.clone();
        state.updated_at = block.timestamp;
        state.last_modified_by = block.data.performed_by().to_string();
        state.version += 1;
        state.last_block_index = block.index;
        state
    }

    /// Fold a record's blocks, given in index order.
    ///
    /// Returns `None` for an empty sequence.
    pub fn fold<'a, I>(blocks: I) -> Option<RecordState>
    where
        I: IntoIterator<Item = &'a Block>,
    {
        blocks
            .into_iter()
            .fold(None, |state, block| Some(RecordState::apply(state, block)))
    }
}

// ---------------------------------------------------------------------------
// RecordResolver
// ---------------------------------------------------------------------------

/// Answers whether the record a block refers to can still be found.
///
/// The ledger's own materialized view implements this, but callers that own
/// the authoritative record datastore can plug that in instead. A lookup
/// that fails is an error, not a missing record.
pub trait RecordResolver: Send + Sync {
    fn resolve(&self, record_id: &str) -> DbResult<bool>;
}

impl RecordResolver for HashSet<String> {
    fn resolve(&self, record_id: &str) -> DbResult<bool> {
        Ok(self.contains(record_id))
    }
}

/// Resolver that treats every record as present.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysResolves;

impl RecordResolver for AlwaysResolves {
    fn resolve(&self, _record_id: &str) -> DbResult<bool> {
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
