//! # Append Engine
//!
//! The only component that writes to the chain. It turns a domain event
//! ("doctor X updated record Y") into a sealed block.
//!
//! ## Pipeline
//!
//! ```text
//! 1. VALIDATE  — reject malformed requests before anything is read
//! 2. LOCK      — take the process-local writer mutex
//! 3. READ      — observe the current head once
//! 4. STAMP     — build the draft, timestamped while the lock is held
//! 5. COMMIT    — LedgerDb::append with that head as the expected value
//! 6. RETRY     — on HeadConflict, re-read, re-stamp and try again (bounded)
//! ```
//!
//! The mutex serializes writers inside one process. The head check inside
//! the store transaction covers writers the mutex cannot see, such as a
//! second engine opened on the same database.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::MAX_IDENTIFIER_LENGTH;
use crate::error::{LedgerError, LedgerResult};
use crate::storage::block::{Block, BlockData, BlockDraft, RecordAction, RecordSnapshot};
use crate::storage::db::{DbError, LedgerDb};

// ---------------------------------------------------------------------------
// AppendRequest
// ---------------------------------------------------------------------------

/// A domain event to record on the chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendRequest {
    pub action: RecordAction,
    pub record_id: String,
    pub patient_id: String,
    pub doctor_id: String,
    pub snapshot: RecordSnapshot,
    pub actor: Option<String>,
}

impl AppendRequest {
    /// Check the request without touching storage.
    pub fn validate(&self) -> LedgerResult<()> {
        validate_identifier("record_id", &self.record_id)?;
        validate_identifier("patient_id", &self.patient_id)?;
        validate_identifier("doctor_id", &self.doctor_id)?;

        match (&self.actor, self.action.requires_actor()) {
            (Some(actor), _) => validate_identifier("actor", actor),
            (None, true) => Err(LedgerError::Validation(format!(
                "{} events require an actor",
                self.action
            ))),
            (None, false) => Ok(()),
        }
    }

    fn into_data(self) -> BlockData {
        BlockData {
            action: self.action,
            record_id: self.record_id,
            patient_id: self.patient_id,
            doctor_id: self.doctor_id,
            snapshot: self.snapshot,
            actor: self.actor,
        }
    }
}

pub(crate) fn validate_identifier(field: &str, value: &str) -> LedgerResult<()> {
    if value.trim().is_empty() {
        return Err(LedgerError::Validation(format!("{field} must not be empty")));
    }
    if value.len() > MAX_IDENTIFIER_LENGTH {
        return Err(LedgerError::Validation(format!(
            "{field} exceeds {MAX_IDENTIFIER_LENGTH} bytes"
        )));
    }
    // Covers the 0x00 separator used in secondary index keys.
    if value.chars().any(char::is_control) {
        return Err(LedgerError::Validation(format!(
            "{field} contains control characters"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// AppendEngine
// ---------------------------------------------------------------------------

/// Single-writer front end to [`LedgerDb::append`].
pub struct AppendEngine {
    db: Arc<LedgerDb>,
    write_lock: Mutex<()>,
    max_retries: u32,
}

impl AppendEngine {
    pub fn new(db: Arc<LedgerDb>, max_retries: u32) -> Self {
        Self {
            db,
            write_lock: Mutex::new(()),
            max_retries,
        }
    }

    /// Validate `request` and seal it onto the chain.
    pub fn append_event(&self, request: AppendRequest) -> LedgerResult<Block> {
        request.validate()?;
        let data = request.into_data();
        let _guard = self.write_lock.lock();
        // Stamped under the lock so timestamps never run backwards.
        self.commit_locked(|| BlockDraft::new(data.clone()))
    }

    /// Seal an already-built draft. The draft's timestamp is kept.
    pub fn commit(&self, draft: BlockDraft) -> LedgerResult<Block> {
        let _guard = self.write_lock.lock();
        self.commit_locked(|| draft.clone())
    }

    /// Caller holds `write_lock`. `make_draft` runs once per attempt, after
    /// the head for that attempt has been read.
    fn commit_locked<F>(&self, mut make_draft: F) -> LedgerResult<Block>
    where
        F: FnMut() -> BlockDraft,
    {
        let attempts = self.max_retries + 1;

        for attempt in 1..=attempts {
            let head = self.db.head()?;
            let draft = make_draft();
            debug!(attempt, head = ?head, record_id = %draft.data.record_id, "appending block");

            match self.db.append(&draft, head) {
                Ok(block) => {
                    info!(
                        index = block.index,
                        action = %block.data.action,
                        record_id = %block.data.record_id,
                        hash = %block.hash,
                        "block appended"
                    );
                    return Ok(block);
                }
                Err(DbError::HeadConflict { expected, actual }) => {
                    warn!(attempt, expected = ?expected, actual = ?actual, "head moved during append");
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(attempts, "append retry budget exhausted");
        Err(LedgerError::ConcurrentAppendConflict { attempts })
    }
}
