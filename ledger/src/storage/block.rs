//! # Block Structure
//!
//! A block is one immutable ledger entry describing a single create, update,
//! or delete of a medical record. Each block links to its predecessor by
//! hash, so rewriting any historical entry breaks either its own digest or
//! the link from the block after it.
//!
//! ## Block Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  index: u64                                 │
//! │  timestamp: DateTime<Utc>   (ms precision)  │
//! │  data: BlockData                            │
//! │  ├── action: create | update | delete       │
//! │  ├── record_id / patient_id / doctor_id     │
//! │  ├── snapshot: RecordSnapshot               │
//! │  └── actor: Option<String>                  │
//! │  previous_hash: hex   (sentinel for index 0)│
//! │  hash: hex            (SHA-256, see below)  │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Hash Computation
//!
//! The hash covers `index`, `timestamp`, `data` and `previous_hash`, fed
//! through the canonical JSON adapter in [`crate::crypto::hash`]. The
//! stored `hash` field itself is obviously not part of the preimage.

use std::fmt;

use chrono::{DateTime, NaiveDate, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::config::GENESIS_PREVIOUS_HASH;
use crate::crypto::hash::hash_canonical;

// ---------------------------------------------------------------------------
// RecordAction
// ---------------------------------------------------------------------------

/// The kind of record mutation a block captures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordAction {
    Create,
    Update,
    Delete,
}

impl RecordAction {
    /// Update and delete events must name who performed them.
    pub fn requires_actor(self) -> bool {
        matches!(self, RecordAction::Update | RecordAction::Delete)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordAction::Create => "create",
            RecordAction::Update => "update",
            RecordAction::Delete => "delete",
        }
    }
}

impl fmt::Display for RecordAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(RecordAction::Create),
            "update" => Ok(RecordAction::Update),
            "delete" => Ok(RecordAction::Delete),
            other => Err(format!("unknown record action: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordSnapshot / BlockData
// ---------------------------------------------------------------------------

/// The medical fields of a record at the instant a block was written.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub diagnosis: String,
    pub treatment: String,
    pub medication: String,
    pub note: String,
    pub follow_up_date: Option<NaiveDate>,
}

/// Payload of a block: which record changed, how, and what it looked like.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockData {
    pub action: RecordAction,
    pub record_id: String,
    pub patient_id: String,
    pub doctor_id: String,
    pub snapshot: RecordSnapshot,
    /// Identity that performed an update or delete. Optional on create.
    pub actor: Option<String>,
}

impl BlockData {
    /// The identity credited with this mutation: the actor when present,
    /// otherwise the record's doctor.
    pub fn performed_by(&self) -> &str {
        self.actor.as_deref().unwrap_or(&self.doctor_id)
    }
}

// ---------------------------------------------------------------------------
// BlockDraft
// ---------------------------------------------------------------------------

/// An unsealed block: content and time, but no position in the chain yet.
///
/// The chain store turns a draft into a [`Block`] by assigning the next
/// index and linking it to the current head.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockDraft {
    pub timestamp: DateTime<Utc>,
    pub data: BlockData,
}

impl BlockDraft {
    /// Draft stamped with the current time, truncated to milliseconds so the
    /// stored value and the hashed rendering agree exactly.
    pub fn new(data: BlockData) -> Self {
        Self::with_timestamp(data, Utc::now())
    }

    pub fn with_timestamp(data: BlockData, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp: timestamp.trunc_subsecs(3),
            data,
        }
    }
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// A sealed ledger entry.
///
/// Blocks are immutable once sealed. The only way to "correct" one is to
/// append a new block for the same record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Position in the chain, 0 for genesis.
    pub index: u64,
    /// When the mutation was recorded.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub data: BlockData,
    /// Hash of block `index - 1`, or the genesis sentinel.
    pub previous_hash: String,
    /// SHA-256 over the canonical preimage of the fields above.
    pub hash: String,
}

impl Block {
    /// Seal `draft` on top of `parent`.
    ///
    /// With no parent the block becomes the genesis block: index 0 and
    /// [`GENESIS_PREVIOUS_HASH`] as its previous hash.
    pub fn new(parent: Option<&Block>, draft: BlockDraft) -> Self {
        let (index, previous_hash) = match parent {
            Some(p) => (p.index + 1, p.hash.clone()),
            None => (0, GENESIS_PREVIOUS_HASH.to_string()),
        };
        Self::seal(index, previous_hash, draft)
    }

    /// Seal `draft` at an explicit position.
    pub fn seal(index: u64, previous_hash: String, draft: BlockDraft) -> Self {
        let hash = compute_block_hash(index, &draft.timestamp, &draft.data, &previous_hash);
        Block {
            index,
            timestamp: draft.timestamp,
            data: draft.data,
            previous_hash,
            hash,
        }
    }

    /// Recompute the hash from the block's current content.
    pub fn compute_hash(&self) -> String {
        compute_block_hash(self.index, &self.timestamp, &self.data, &self.previous_hash)
    }

    /// Whether the stored hash still matches the content.
    pub fn hash_matches(&self) -> bool {
        self.compute_hash() == self.hash
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    /// Whether `previous_hash` is the genesis sentinel.
    pub fn has_genesis_sentinel(&self) -> bool {
        self.previous_hash == GENESIS_PREVIOUS_HASH
    }

    pub fn record_id(&self) -> &str {
        &self.data.record_id
    }

    pub fn patient_id(&self) -> &str {
        &self.data.patient_id
    }

    /// Milliseconds since the Unix epoch, as used by the time index.
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

// ---------------------------------------------------------------------------
// Hash Computation
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct BlockPreimage<'a> {
    index: u64,
    timestamp: String,
    data: &'a BlockData,
    previous_hash: &'a str,
}

/// Hash a block from its constituent fields.
///
/// The timestamp is rendered as RFC 3339 with millisecond precision and a
/// `Z` suffix, independent of how it was originally parsed.
pub fn compute_block_hash(
    index: u64,
    timestamp: &DateTime<Utc>,
    data: &BlockData,
    previous_hash: &str,
) -> String {
    hash_canonical(&BlockPreimage {
        index,
        timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        data,
        previous_hash,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_data(action: RecordAction, diagnosis: &str) -> BlockData {
        BlockData {
            action,
            record_id: "rec-1".into(),
            patient_id: "pat-1".into(),
            doctor_id: "doc-1".into(),
            snapshot: RecordSnapshot {
                diagnosis: diagnosis.into(),
                treatment: "rest".into(),
                medication: "paracetamol".into(),
                note: String::new(),
                follow_up_date: NaiveDate::from_ymd_opt(2026, 3, 1),
            },
            actor: action.requires_actor().then(|| "doc-1".to_string()),
        }
    }

    fn fixed_ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn draft(action: RecordAction, diagnosis: &str, secs: i64) -> BlockDraft {
        BlockDraft::with_timestamp(make_data(action, diagnosis), fixed_ts(secs))
    }

    #[test]
    fn genesis_block_properties() {
        let genesis = Block::new(None, draft(RecordAction::Create, "flu", 0));
        assert_eq!(genesis.index, 0);
        assert!(genesis.is_genesis());
        assert!(genesis.has_genesis_sentinel());
        assert!(genesis.hash_matches());
    }

    #[test]
    fn block_hash_is_deterministic() {
        let a = Block::new(None, draft(RecordAction::Create, "flu", 0));
        let b = Block::new(None, draft(RecordAction::Create, "flu", 0));
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn new_block_links_to_parent() {
        let b0 = Block::new(None, draft(RecordAction::Create, "flu", 0));
        let b1 = Block::new(Some(&b0), draft(RecordAction::Update, "cold", 10));

        assert_eq!(b1.index, 1);
        assert_eq!(b1.previous_hash, b0.hash);
        assert!(!b1.has_genesis_sentinel());
        assert!(b1.hash_matches());
    }

    #[test]
    fn tampered_snapshot_breaks_hash() {
        let mut block = Block::new(None, draft(RecordAction::Create, "flu", 0));
        block.data.snapshot.diagnosis = "nothing to see here".into();
        assert!(!block.hash_matches());
    }

    #[test]
    fn tampered_timestamp_breaks_hash() {
        let mut block = Block::new(None, draft(RecordAction::Create, "flu", 0));
        block.timestamp = fixed_ts(-3600);
        assert!(!block.hash_matches());
    }

    #[test]
    fn tampered_previous_hash_breaks_hash() {
        let b0 = Block::new(None, draft(RecordAction::Create, "flu", 0));
        let mut b1 = Block::new(Some(&b0), draft(RecordAction::Update, "cold", 1));
        b1.previous_hash = "ff".repeat(32);
        assert!(!b1.hash_matches());
    }

    #[test]
    fn draft_truncates_to_milliseconds() {
        let ts = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let d = BlockDraft::with_timestamp(make_data(RecordAction::Create, "flu"), ts);
        assert_eq!(d.timestamp.timestamp_subsec_nanos(), 123_000_000);
    }

    #[test]
    fn performed_by_falls_back_to_doctor() {
        let create = make_data(RecordAction::Create, "flu");
        assert_eq!(create.performed_by(), "doc-1");

        let mut update = make_data(RecordAction::Update, "flu");
        update.actor = Some("nurse-7".into());
        assert_eq!(update.performed_by(), "nurse-7");
    }

    #[test]
    fn action_parsing_and_display() {
        assert_eq!("UPDATE".parse::<RecordAction>().unwrap(), RecordAction::Update);
        assert!("archive".parse::<RecordAction>().is_err());
        assert_eq!(RecordAction::Delete.to_string(), "delete");
        assert!(!RecordAction::Create.requires_actor());
    }

    #[test]
    fn block_serialization_roundtrip() {
        let block = Block::new(None, draft(RecordAction::Create, "flu", 0));

        let json = serde_json::to_string(&block).expect("serialize");
        let from_json: Block = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(block, from_json);
        assert!(from_json.hash_matches());

        let bytes = bincode::serialize(&block).expect("bincode serialize");
        let from_bincode: Block = bincode::deserialize(&bytes).expect("bincode deserialize");
        assert_eq!(block, from_bincode);
    }

    #[test]
    fn action_serializes_lowercase() {
        let json = serde_json::to_value(RecordAction::Update).unwrap();
        assert_eq!(json, serde_json::json!("update"));
    }
}
