//! # Chain Store
//!
//! The persistence layer for the ledger, built on sled's embedded key-value
//! store. Every sealed block lives here and nowhere else.
//!
//! ## Tree Layout
//!
//! | Tree            | Key                                   | Value                  |
//! |-----------------|---------------------------------------|------------------------|
//! | `blocks`        | `index` (8B BE)                       | `bincode(Block)`       |
//! | `record_index`  | `record_id ‖ 0x00 ‖ index` (8B BE)    | empty                  |
//! | `patient_index` | `patient_id ‖ 0x00 ‖ index` (8B BE)   | empty                  |
//! | `time_index`    | `timestamp_ms` (8B, sign-flipped BE) ‖ `index` | empty         |
//! | `records`       | `record_id` (UTF-8)                   | `bincode(RecordState)` |
//! | `metadata`      | key (UTF-8)                           | value (bytes)          |
//!
//! Indices are stored big-endian so sled's lexicographic ordering matches
//! numeric ordering. Secondary index keys end in the block index, so a
//! prefix scan over an identifier yields its blocks in chain order.
//!
//! ## Atomicity
//!
//! Appending a block touches all six trees. The writes happen inside one
//! multi-tree sled transaction that also re-reads the head pointer and
//! aborts if it moved since the caller looked at it. Two writers racing on
//! the same database therefore cannot both link to the same head: one of
//! them gets [`DbError::HeadConflict`] and nothing it staged lands on disk.

use std::path::Path;

use chrono::{DateTime, Utc};
use sled::transaction::{
    ConflictableTransactionError, TransactionError, Transactional, TransactionalTree,
};
use sled::{Db, Tree};
use tracing::{debug, warn};

use super::block::{Block, BlockDraft};
use super::record::{RecordResolver, RecordState};
use crate::config::{
    INDEX_KEY_SEPARATOR, TREE_BLOCKS, TREE_METADATA, TREE_PATIENT_INDEX, TREE_RECORDS,
    TREE_RECORD_INDEX, TREE_TIME_INDEX,
};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("chain head moved: expected {expected:?}, found {actual:?}")]
    HeadConflict {
        expected: Option<u64>,
        actual: Option<u64>,
    },

    #[error("block index {index} is not above the current head {head:?}")]
    IndexNotAboveHead { index: u64, head: Option<u64> },

    #[error("corrupt store: {0}")]
    Corrupt(String),
}

pub type DbResult<T> = Result<T, DbError>;

type TxResult<T> = Result<T, ConflictableTransactionError<DbError>>;

// ---------------------------------------------------------------------------
// Metadata Keys
// ---------------------------------------------------------------------------

/// Well-known key in the `metadata` tree for the head block index.
const META_HEAD_INDEX: &[u8] = b"head_index";

/// Value stored under secondary index keys.
const EMPTY: &[u8] = &[];

// ---------------------------------------------------------------------------
// LedgerDb
// ---------------------------------------------------------------------------

/// Persistent, append-only store of sealed blocks.
///
/// # Thread Safety
///
/// sled trees support lock-free concurrent reads and serialized writes, so
/// `LedgerDb` can be shared via `Arc<LedgerDb>` or cloned freely. Readers
/// never block appends; a read that starts mid-append simply does not see
/// the new block yet.
#[derive(Debug, Clone)]
pub struct LedgerDb {
    db: Db,
    blocks: Tree,
    record_index: Tree,
    patient_index: Tree,
    time_index: Tree,
    records: Tree,
    metadata: Tree,
}

impl LedgerDb {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a database that is discarded on drop. Used by tests.
    pub fn open_temporary() -> DbResult<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        Ok(Self {
            blocks: db.open_tree(TREE_BLOCKS)?,
            record_index: db.open_tree(TREE_RECORD_INDEX)?,
            patient_index: db.open_tree(TREE_PATIENT_INDEX)?,
            time_index: db.open_tree(TREE_TIME_INDEX)?,
            records: db.open_tree(TREE_RECORDS)?,
            metadata: db.open_tree(TREE_METADATA)?,
            db,
        })
    }

    // -- Writes -------------------------------------------------------------

    /// Seal `draft` on top of the current head and persist it.
    ///
    /// `expected_head` is the head index the caller observed when building
    /// the draft (`None` for an empty chain). If the head has moved since,
    /// nothing is written and [`DbError::HeadConflict`] is returned.
    pub fn append(&self, draft: &BlockDraft, expected_head: Option<u64>) -> DbResult<Block> {
        let result = self.all_trees().transaction(
            |(blocks, record_index, patient_index, time_index, records, metadata)| {
                let head = read_head(metadata)?;
                if head != expected_head {
                    return Err(ConflictableTransactionError::Abort(DbError::HeadConflict {
                        expected: expected_head,
                        actual: head,
                    }));
                }

                let parent = match head {
                    Some(h) => Some(read_block(blocks, h)?.ok_or_else(|| {
                        ConflictableTransactionError::Abort(DbError::Corrupt(format!(
                            "head points at missing block {h}"
                        )))
                    })?),
                    None => None,
                };

                let block = Block::new(parent.as_ref(), draft.clone());
                stage_block(
                    &block,
                    blocks,
                    record_index,
                    patient_index,
                    time_index,
                    records,
                    metadata,
                )?;
                Ok(block)
            },
        );

        let block = unwrap_tx(result)?;
        self.db.flush()?;
        debug!(index = block.index, hash = %block.hash, "block persisted");
        Ok(block)
    }

    /// Persist an already-sealed block verbatim.
    ///
    /// Used to restore exported chains. The stored hash is kept as-is, not
    /// recomputed, so a restored chain verifies exactly as the original
    /// would. The block's index must be above the current head; gaps are
    /// allowed so partial backups can still be loaded and verified.
    pub fn import_block(&self, block: &Block) -> DbResult<()> {
        let result = self.all_trees().transaction(
            |(blocks, record_index, patient_index, time_index, records, metadata)| {
                let head = read_head(metadata)?;
                if head.is_some_and(|h| block.index <= h) {
                    return Err(ConflictableTransactionError::Abort(
                        DbError::IndexNotAboveHead {
                            index: block.index,
                            head,
                        },
                    ));
                }
                stage_block(
                    block,
                    blocks,
                    record_index,
                    patient_index,
                    time_index,
                    records,
                    metadata,
                )
            },
        );

        unwrap_tx(result)?;
        self.db.flush()?;
        Ok(())
    }

    fn all_trees(&self) -> (&Tree, &Tree, &Tree, &Tree, &Tree, &Tree) {
        (
            &self.blocks,
            &self.record_index,
            &self.patient_index,
            &self.time_index,
            &self.records,
            &self.metadata,
        )
    }

    // -- Block reads --------------------------------------------------------

    /// Retrieve a block by its index.
    pub fn get_block(&self, index: u64) -> DbResult<Option<Block>> {
        match self.blocks.get(index.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All blocks for a record, in index order. Empty if the record is unknown.
    pub fn get_by_record(&self, record_id: &str) -> DbResult<Vec<Block>> {
        self.scan_id_index(&self.record_index, record_id)
    }

    /// All blocks for a patient, in index order.
    pub fn get_by_patient(&self, patient_id: &str) -> DbResult<Vec<Block>> {
        self.scan_id_index(&self.patient_index, patient_id)
    }

    /// Blocks whose timestamp lies within `[start, end]`, in index order.
    ///
    /// Either bound may be omitted. Bounds are not validated here; the query
    /// layer rejects inverted ranges before they reach the store.
    pub fn get_range(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> DbResult<Vec<Block>> {
        let lower = time_key(start.map_or(i64::MIN, |t| t.timestamp_millis()), 0);
        let upper = time_key(end.map_or(i64::MAX, |t| t.timestamp_millis()), u64::MAX);

        let mut blocks = Vec::new();
        for entry in self.time_index.range(lower..=upper) {
            let (key, _) = entry?;
            let index = trailing_index(&key)?;
            match self.get_block(index)? {
                Some(block) => blocks.push(block),
                None => warn!(index, "time index points at a missing block"),
            }
        }
        blocks.sort_by_key(|b| b.index);
        Ok(blocks)
    }

    /// Lazily iterate the full chain in index order.
    ///
    /// Each call starts a fresh pass, so the sequence is restartable.
    pub fn iter(&self) -> impl Iterator<Item = DbResult<Block>> {
        self.blocks.iter().map(|entry| -> DbResult<Block> {
            let (_, value) = entry?;
            decode(&value)
        })
    }

    /// Collect the whole chain.
    pub fn all_blocks(&self) -> DbResult<Vec<Block>> {
        self.iter().collect()
    }

    /// Number of blocks stored.
    pub fn count(&self) -> usize {
        self.blocks.len()
    }

    /// Index of the most recent block, `None` when the chain is empty.
    pub fn head(&self) -> DbResult<Option<u64>> {
        match self.metadata.get(META_HEAD_INDEX)? {
            Some(bytes) => Ok(Some(index_from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_id_index(&self, tree: &Tree, id: &str) -> DbResult<Vec<Block>> {
        let mut prefix = id.as_bytes().to_vec();
        prefix.push(INDEX_KEY_SEPARATOR);

        // Only `id ‖ 0x00 ‖ index` matches; longer keys belong to ids that
        // merely start with `id ‖ 0x00`.
        let exact_len = prefix.len() + 8;

        let mut blocks = Vec::new();
        for entry in tree.scan_prefix(&prefix) {
            let (key, _) = entry?;
            if key.len() != exact_len {
                continue;
            }
            let index = trailing_index(&key)?;
            match self.get_block(index)? {
                Some(block) => blocks.push(block),
                None => warn!(id, index, "secondary index points at a missing block"),
            }
        }
        Ok(blocks)
    }

    // -- Record reads -------------------------------------------------------

    /// Materialized state of a record.
    pub fn get_record(&self, record_id: &str) -> DbResult<Option<RecordState>> {
        match self.records.get(record_id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Number of distinct records that have ever appeared on the chain.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    // -- Utility ------------------------------------------------------------

    /// Force a flush of all pending writes to disk.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl RecordResolver for LedgerDb {
    fn resolve(&self, record_id: &str) -> DbResult<bool> {
        Ok(self.get_record(record_id)?.is_some())
    }
}

// ---------------------------------------------------------------------------
// Transaction Helpers
// ---------------------------------------------------------------------------

fn stage_block(
    block: &Block,
    blocks: &TransactionalTree,
    record_index: &TransactionalTree,
    patient_index: &TransactionalTree,
    time_index: &TransactionalTree,
    records: &TransactionalTree,
    metadata: &TransactionalTree,
) -> TxResult<()> {
    let index_key = block.index.to_be_bytes();

    blocks.insert(&index_key[..], encode(block).map_err(ConflictableTransactionError::Abort)?)?;
    record_index.insert(id_key(block.record_id(), block.index), EMPTY)?;
    patient_index.insert(id_key(block.patient_id(), block.index), EMPTY)?;
    time_index.insert(time_key(block.timestamp_millis(), block.index).to_vec(), EMPTY)?;

    let previous = match records.get(block.record_id().as_bytes())? {
        Some(bytes) => Some(decode::<RecordState>(&bytes).map_err(ConflictableTransactionError::Abort)?),
        None => None,
    };
    let state = RecordState::apply(previous, block);
    records.insert(
        block.record_id().as_bytes(),
        encode(&state).map_err(ConflictableTransactionError::Abort)?,
    )?;

    metadata.insert(META_HEAD_INDEX, &index_key[..])?;
    Ok(())
}

fn read_head(metadata: &TransactionalTree) -> TxResult<Option<u64>> {
    match metadata.get(META_HEAD_INDEX)? {
        Some(bytes) => Ok(Some(
            index_from_bytes(&bytes).map_err(ConflictableTransactionError::Abort)?,
        )),
        None => Ok(None),
    }
}

fn read_block(blocks: &TransactionalTree, index: u64) -> TxResult<Option<Block>> {
    match blocks.get(index.to_be_bytes())? {
        Some(bytes) => Ok(Some(decode(&bytes).map_err(ConflictableTransactionError::Abort)?)),
        None => Ok(None),
    }
}

fn unwrap_tx<T>(result: Result<T, TransactionError<DbError>>) -> DbResult<T> {
    match result {
        Ok(value) => Ok(value),
        Err(TransactionError::Abort(e)) => Err(e),
        Err(TransactionError::Storage(e)) => Err(DbError::Sled(e)),
    }
}

// ---------------------------------------------------------------------------
// Key & Value Encoding
// ---------------------------------------------------------------------------

fn id_key(id: &str, index: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(id.len() + 9);
    key.extend_from_slice(id.as_bytes());
    key.push(INDEX_KEY_SEPARATOR);
    key.extend_from_slice(&index.to_be_bytes());
    key
}

/// Flip the sign bit so negative millisecond values sort before positive ones.
fn time_key(millis: i64, index: u64) -> [u8; 16] {
    let ordered = (millis as u64) ^ (1 << 63);
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&ordered.to_be_bytes());
    key[8..].copy_from_slice(&index.to_be_bytes());
    key
}

fn trailing_index(key: &[u8]) -> DbResult<u64> {
    if key.len() < 8 {
        return Err(DbError::Corrupt(format!("index key too short: {} bytes", key.len())));
    }
    index_from_bytes(&key[key.len() - 8..])
}

fn index_from_bytes(bytes: &[u8]) -> DbResult<u64> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| DbError::Serialization("invalid index bytes".to_string()))?;
    Ok(u64::from_be_bytes(array))
}

fn encode<T: serde::Serialize>(value: &T) -> DbResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| DbError::Serialization(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    bincode::deserialize(bytes).map_err(|e| DbError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::block::{BlockData, RecordAction, RecordSnapshot};
    use chrono::TimeZone;

    // -- Helpers ------------------------------------------------------------

    fn ts(minutes: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + minutes * 60, 0).unwrap()
    }

    fn make_draft(record: &str, patient: &str, action: RecordAction, minutes: i64) -> BlockDraft {
        BlockDraft::with_timestamp(
            BlockData {
                action,
                record_id: record.into(),
                patient_id: patient.into(),
                doctor_id: "doc-1".into(),
                snapshot: RecordSnapshot {
                    diagnosis: format!("diagnosis at {minutes}"),
                    ..Default::default()
                },
                actor: action.requires_actor().then(|| "doc-1".to_string()),
            },
            ts(minutes),
        )
    }

    fn append_all(db: &LedgerDb, drafts: &[BlockDraft]) -> Vec<Block> {
        drafts
            .iter()
            .map(|d| {
                let head = db.head().unwrap();
                db.append(d, head).unwrap()
            })
            .collect()
    }

    // -- Tests --------------------------------------------------------------

    #[test]
    fn open_temporary_database() {
        let db = LedgerDb::open_temporary().expect("should create temp db");
        assert_eq!(db.count(), 0);
        assert_eq!(db.record_count(), 0);
        assert!(db.head().unwrap().is_none());
    }

    #[test]
    fn open_persistent_database_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let block = {
            let db = LedgerDb::open(dir.path()).expect("should open db");
            db.append(&make_draft("rec-1", "pat-1", RecordAction::Create, 0), None)
                .unwrap()
        };

        let db2 = LedgerDb::open(dir.path()).expect("should reopen db");
        assert_eq!(db2.count(), 1);
        assert_eq!(db2.head().unwrap(), Some(0));
        assert_eq!(db2.get_block(0).unwrap().unwrap(), block);
    }

    #[test]
    fn first_append_is_genesis() {
        let db = LedgerDb::open_temporary().unwrap();
        let block = db
            .append(&make_draft("rec-1", "pat-1", RecordAction::Create, 0), None)
            .unwrap();
        assert_eq!(block.index, 0);
        assert!(block.has_genesis_sentinel());
        assert!(block.hash_matches());
    }

    #[test]
    fn appends_are_linked_and_gapless() {
        let db = LedgerDb::open_temporary().unwrap();
        let blocks = append_all(
            &db,
            &[
                make_draft("rec-1", "pat-1", RecordAction::Create, 0),
                make_draft("rec-1", "pat-1", RecordAction::Update, 1),
                make_draft("rec-2", "pat-2", RecordAction::Create, 2),
            ],
        );

        for (i, block) in blocks.iter().enumerate() {
            assert_eq!(block.index, i as u64);
            assert!(block.hash_matches());
        }
        assert_eq!(blocks[1].previous_hash, blocks[0].hash);
        assert_eq!(blocks[2].previous_hash, blocks[1].hash);
        assert_eq!(db.head().unwrap(), Some(2));
        assert_eq!(db.count(), 3);
    }

    #[test]
    fn stale_head_is_rejected_without_side_effects() {
        let db = LedgerDb::open_temporary().unwrap();
        db.append(&make_draft("rec-1", "pat-1", RecordAction::Create, 0), None)
            .unwrap();

        let err = db
            .append(&make_draft("rec-2", "pat-2", RecordAction::Create, 1), None)
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::HeadConflict {
                expected: None,
                actual: Some(0)
            }
        ));

        assert_eq!(db.count(), 1);
        assert!(db.get_by_record("rec-2").unwrap().is_empty());
        assert!(db.get_record("rec-2").unwrap().is_none());
    }

    #[test]
    fn get_block_returns_none_for_missing_index() {
        let db = LedgerDb::open_temporary().unwrap();
        assert!(db.get_block(999).unwrap().is_none());
    }

    #[test]
    fn record_and_patient_indexes() {
        let db = LedgerDb::open_temporary().unwrap();
        append_all(
            &db,
            &[
                make_draft("rec-1", "pat-1", RecordAction::Create, 0),
                make_draft("rec-2", "pat-2", RecordAction::Create, 1),
                make_draft("rec-1", "pat-1", RecordAction::Update, 2),
                make_draft("rec-3", "pat-1", RecordAction::Create, 3),
            ],
        );

        let rec1: Vec<u64> = db.get_by_record("rec-1").unwrap().iter().map(|b| b.index).collect();
        assert_eq!(rec1, vec![0, 2]);

        let pat1: Vec<u64> = db.get_by_patient("pat-1").unwrap().iter().map(|b| b.index).collect();
        assert_eq!(pat1, vec![0, 2, 3]);

        assert!(db.get_by_record("rec-404").unwrap().is_empty());
    }

    #[test]
    fn id_prefix_does_not_leak_into_longer_ids() {
        let db = LedgerDb::open_temporary().unwrap();
        append_all(
            &db,
            &[
                make_draft("rec-1", "pat-1", RecordAction::Create, 0),
                make_draft("rec-10", "pat-10", RecordAction::Create, 1),
            ],
        );

        assert_eq!(db.get_by_record("rec-1").unwrap().len(), 1);
        assert_eq!(db.get_by_patient("pat-1").unwrap().len(), 1);
    }

    #[test]
    fn separator_in_imported_id_does_not_leak_into_lookups() {
        let db = LedgerDb::open_temporary().unwrap();
        let genuine = db
            .append(&make_draft("rec-1", "pat-1", RecordAction::Create, 0), None)
            .unwrap();

        // The store itself accepts any id on import; lookups must still
        // match the id exactly.
        let forged = Block::new(
            Some(&genuine),
            make_draft("rec-1\u{0}evil", "pat-1\u{0}evil", RecordAction::Create, 1),
        );
        db.import_block(&forged).unwrap();

        let rec1: Vec<u64> = db.get_by_record("rec-1").unwrap().iter().map(|b| b.index).collect();
        assert_eq!(rec1, vec![0]);
        let pat1: Vec<u64> = db.get_by_patient("pat-1").unwrap().iter().map(|b| b.index).collect();
        assert_eq!(pat1, vec![0]);

        assert_eq!(db.get_by_record("rec-1\u{0}evil").unwrap().len(), 1);
    }

    #[test]
    fn time_range_query() {
        let db = LedgerDb::open_temporary().unwrap();
        append_all(
            &db,
            &[
                make_draft("rec-1", "pat-1", RecordAction::Create, 0),
                make_draft("rec-1", "pat-1", RecordAction::Update, 10),
                make_draft("rec-1", "pat-1", RecordAction::Update, 20),
                make_draft("rec-1", "pat-1", RecordAction::Update, 30),
            ],
        );

        let all = db.get_range(None, None).unwrap();
        assert_eq!(all.len(), 4);

        let mid = db.get_range(Some(ts(10)), Some(ts(20))).unwrap();
        assert_eq!(mid.iter().map(|b| b.index).collect::<Vec<_>>(), vec![1, 2]);

        let from = db.get_range(Some(ts(15)), None).unwrap();
        assert_eq!(from.iter().map(|b| b.index).collect::<Vec<_>>(), vec![2, 3]);

        let until = db.get_range(None, Some(ts(0))).unwrap();
        assert_eq!(until.iter().map(|b| b.index).collect::<Vec<_>>(), vec![0]);

        assert!(db.get_range(Some(ts(31)), None).unwrap().is_empty());
    }

    #[test]
    fn iter_is_restartable_and_ordered() {
        let db = LedgerDb::open_temporary().unwrap();
        append_all(
            &db,
            &[
                make_draft("rec-1", "pat-1", RecordAction::Create, 0),
                make_draft("rec-2", "pat-2", RecordAction::Create, 1),
                make_draft("rec-3", "pat-3", RecordAction::Create, 2),
            ],
        );

        let first: Vec<u64> = db.iter().map(|b| b.unwrap().index).collect();
        let second: Vec<u64> = db.iter().map(|b| b.unwrap().index).collect();
        assert_eq!(first, vec![0, 1, 2]);
        assert_eq!(first, second);
    }

    #[test]
    fn records_are_materialized_on_append() {
        let db = LedgerDb::open_temporary().unwrap();
        append_all(
            &db,
            &[
                make_draft("rec-1", "pat-1", RecordAction::Create, 0),
                make_draft("rec-1", "pat-1", RecordAction::Update, 5),
                make_draft("rec-1", "pat-1", RecordAction::Delete, 9),
            ],
        );

        let state = db.get_record("rec-1").unwrap().expect("materialized");
        assert_eq!(state.version, 3);
        assert!(state.deleted);
        assert_eq!(state.last_block_index, 2);
        assert!(db.resolve("rec-1").unwrap());
        assert!(!db.resolve("rec-2").unwrap());
    }

    #[test]
    fn import_keeps_stored_hash_verbatim() {
        let source = LedgerDb::open_temporary().unwrap();
        let blocks = append_all(
            &source,
            &[
                make_draft("rec-1", "pat-1", RecordAction::Create, 0),
                make_draft("rec-1", "pat-1", RecordAction::Update, 1),
            ],
        );

        let mut tampered = blocks[1].clone();
        tampered.data.snapshot.diagnosis = "rewritten".into();

        let target = LedgerDb::open_temporary().unwrap();
        target.import_block(&blocks[0]).unwrap();
        target.import_block(&tampered).unwrap();

        let stored = target.get_block(1).unwrap().unwrap();
        assert_eq!(stored.hash, blocks[1].hash);
        assert!(!stored.hash_matches());
        assert_eq!(target.head().unwrap(), Some(1));
    }

    #[test]
    fn import_rejects_index_at_or_below_head() {
        let db = LedgerDb::open_temporary().unwrap();
        let blocks = append_all(
            &db,
            &[
                make_draft("rec-1", "pat-1", RecordAction::Create, 0),
                make_draft("rec-1", "pat-1", RecordAction::Update, 1),
            ],
        );

        let err = db.import_block(&blocks[1]).unwrap_err();
        assert!(matches!(err, DbError::IndexNotAboveHead { index: 1, head: Some(1) }));
        assert_eq!(db.count(), 2);
    }

    #[test]
    fn import_allows_gaps() {
        let source = LedgerDb::open_temporary().unwrap();
        let blocks = append_all(
            &source,
            &[
                make_draft("rec-1", "pat-1", RecordAction::Create, 0),
                make_draft("rec-1", "pat-1", RecordAction::Update, 1),
                make_draft("rec-1", "pat-1", RecordAction::Update, 2),
            ],
        );

        let target = LedgerDb::open_temporary().unwrap();
        target.import_block(&blocks[0]).unwrap();
        target.import_block(&blocks[2]).unwrap();

        assert_eq!(target.count(), 2);
        assert!(target.get_block(1).unwrap().is_none());
        assert_eq!(target.head().unwrap(), Some(2));
    }

    #[test]
    fn concurrent_reads_do_not_block() {
        use std::sync::Arc;
        use std::thread;

        let db = Arc::new(LedgerDb::open_temporary().unwrap());
        for i in 0..10i64 {
            let head = db.head().unwrap();
            db.append(&make_draft(&format!("rec-{i}"), "pat-1", RecordAction::Create, i), head)
                .unwrap();
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let db = Arc::clone(&db);
                thread::spawn(move || {
                    assert_eq!(db.get_by_patient("pat-1").unwrap().len(), 10);
                    assert_eq!(db.get_block(0).unwrap().unwrap().index, 0);
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("reader thread should not panic");
        }
    }

    #[test]
    fn time_key_orders_negative_before_positive() {
        assert!(time_key(-1, 0) < time_key(0, 0));
        assert!(time_key(0, 5) < time_key(1, 0));
        assert!(time_key(i64::MIN, 0) < time_key(i64::MAX, u64::MAX));
    }
}
