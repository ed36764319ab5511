//! # Verification Engine
//!
//! Re-derives every integrity property of a block sequence and reports what
//! does not hold. Verification never fails because the chain is broken;
//! detecting a broken chain *is* its successful output.
//!
//! ## Checks
//!
//! For each block in the (possibly filtered) input:
//!
//! | Check                                    | Finding                 | Severity |
//! |------------------------------------------|-------------------------|----------|
//! | recomputed hash ≠ stored hash            | `INVALID_HASH`          | HIGH     |
//! | `previous_hash` ≠ hash of block `i - 1`  | `INVALID_PREVIOUS_HASH` | MEDIUM   |
//! | record no longer resolvable              | `MISSING_RECORD`        | LOW      |
//!
//! Block `i - 1` is looked up in the *full* chain, never in the filtered
//! input: a patient's blocks are rarely adjacent, and comparing against the
//! previous block of the filtered list would report every gap as tampering.
//!
//! A genesis block (index 0) carrying anything other than the sentinel
//! produces one chain-level `GENESIS_INVALID` finding instead of a
//! per-block one.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::GENESIS_PREVIOUS_HASH;
use crate::storage::block::{Block, RecordAction};
use crate::storage::db::{DbResult, LedgerDb};
use crate::storage::record::RecordResolver;

// ---------------------------------------------------------------------------
// Findings
// ---------------------------------------------------------------------------

/// How bad a finding is. Reporting metadata only: any finding at all makes
/// the block invalid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Referential gap.
    Low,
    /// Broken linkage: reordering or removal.
    Medium,
    /// Direct evidence of content tampering.
    High,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingKind {
    InvalidHash,
    InvalidPreviousHash,
    MissingRecord,
    GenesisInvalid,
}

impl FindingKind {
    pub fn severity(self) -> Severity {
        match self {
            FindingKind::InvalidHash => Severity::High,
            FindingKind::InvalidPreviousHash | FindingKind::GenesisInvalid => Severity::Medium,
            FindingKind::MissingRecord => Severity::Low,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FindingKind::InvalidHash => "INVALID_HASH",
            FindingKind::InvalidPreviousHash => "INVALID_PREVIOUS_HASH",
            FindingKind::MissingRecord => "MISSING_RECORD",
            FindingKind::GenesisInvalid => "GENESIS_INVALID",
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evidence attached to a finding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FindingDetail {
    Hash {
        stored: String,
        calculated: String,
    },
    Link {
        stored: String,
        /// `None` when block `i - 1` is absent from the chain.
        expected: Option<String>,
        previous_block_exists: bool,
    },
    Record {
        record_id: String,
    },
    Genesis {
        stored: String,
        expected: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub severity: Severity,
    pub message: String,
    pub detail: FindingDetail,
}

impl Finding {
    fn new(kind: FindingKind, message: String, detail: FindingDetail) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            message,
            detail,
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Verification outcome for one block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BlockVerification {
    pub index: u64,
    pub hash: String,
    pub record_id: String,
    pub patient_id: String,
    pub action: RecordAction,
    pub timestamp: DateTime<Utc>,
    pub is_valid: bool,
    pub findings: Vec<Finding>,
}

/// Verification outcome for a block sequence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChainVerification {
    pub is_valid: bool,
    pub genesis_block_valid: bool,
    pub blocks: Vec<BlockVerification>,
    /// Findings about the chain as a whole rather than a single block.
    pub chain_findings: Vec<Finding>,
}

impl ChainVerification {
    pub fn total_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn valid_blocks(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_valid).count()
    }

    pub fn invalid_blocks(&self) -> impl Iterator<Item = &BlockVerification> {
        self.blocks.iter().filter(|b| !b.is_valid)
    }

    /// Every finding, chain-level first.
    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.chain_findings
            .iter()
            .chain(self.blocks.iter().flat_map(|b| b.findings.iter()))
    }
}

// ---------------------------------------------------------------------------
// Full-Chain Lookup
// ---------------------------------------------------------------------------

/// Access to the unfiltered chain, used to resolve block `i - 1`.
pub trait BlockLookup {
    fn hash_at(&self, index: u64) -> DbResult<Option<String>>;
}

impl BlockLookup for LedgerDb {
    fn hash_at(&self, index: u64) -> DbResult<Option<String>> {
        Ok(self.get_block(index)?.map(|b| b.hash))
    }
}

/// A slice sorted by index stands in for the full chain.
impl BlockLookup for [Block] {
    fn hash_at(&self, index: u64) -> DbResult<Option<String>> {
        Ok(self
            .binary_search_by_key(&index, |b| b.index)
            .ok()
            .map(|pos| self[pos].hash.clone()))
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Verify `blocks` (in index order) against the full chain behind `chain`.
///
/// The result depends only on the three inputs; calling it twice with the
/// same inputs gives the same answer.
pub fn verify_blocks<L, R>(blocks: &[Block], chain: &L, resolver: &R) -> DbResult<ChainVerification>
where
    L: BlockLookup + ?Sized,
    R: RecordResolver + ?Sized,
{
    let mut results = Vec::with_capacity(blocks.len());
    let mut chain_findings = Vec::new();
    let mut genesis_block_valid = true;
    let mut previous: Option<&Block> = None;

    for block in blocks {
        let mut findings = Vec::new();

        let calculated = block.compute_hash();
        if calculated != block.hash {
            findings.push(Finding::new(
                FindingKind::InvalidHash,
                format!("block {} content does not match its stored hash", block.index),
                FindingDetail::Hash {
                    stored: block.hash.clone(),
                    calculated,
                },
            ));
        }

        if block.index > 0 {
            let prev_index = block.index - 1;
            // Adjacent input blocks save a store round-trip.
            let expected = match previous {
                Some(p) if p.index == prev_index => Some(p.hash.clone()),
                _ => chain.hash_at(prev_index)?,
            };
            if expected.as_deref() != Some(block.previous_hash.as_str()) {
                let previous_block_exists = expected.is_some();
                let message = if previous_block_exists {
                    format!("block {} does not link to block {}", block.index, prev_index)
                } else {
                    format!("block {} follows missing block {}", block.index, prev_index)
                };
                findings.push(Finding::new(
                    FindingKind::InvalidPreviousHash,
                    message,
                    FindingDetail::Link {
                        stored: block.previous_hash.clone(),
                        expected,
                        previous_block_exists,
                    },
                ));
            }
        } else if !block.has_genesis_sentinel() && genesis_block_valid {
            genesis_block_valid = false;
            chain_findings.push(Finding::new(
                FindingKind::GenesisInvalid,
                "genesis block does not carry the genesis sentinel".to_string(),
                FindingDetail::Genesis {
                    stored: block.previous_hash.clone(),
                    expected: GENESIS_PREVIOUS_HASH.to_string(),
                },
            ));
        }

        if !resolver.resolve(block.record_id())? {
            findings.push(Finding::new(
                FindingKind::MissingRecord,
                format!("record {} referenced by block {} no longer exists", block.record_id(), block.index),
                FindingDetail::Record {
                    record_id: block.record_id().to_string(),
                },
            ));
        }

        for finding in &findings {
            warn!(index = block.index, kind = %finding.kind, severity = ?finding.severity, "integrity finding");
        }

        results.push(BlockVerification {
            index: block.index,
            hash: block.hash.clone(),
            record_id: block.data.record_id.clone(),
            patient_id: block.data.patient_id.clone(),
            action: block.data.action,
            timestamp: block.timestamp,
            is_valid: findings.is_empty(),
            findings,
        });
        previous = Some(block);
    }

    if !genesis_block_valid {
        warn!("genesis block is invalid");
    }

    let is_valid = chain_findings.is_empty() && results.iter().all(|b| b.is_valid);
    Ok(ChainVerification {
        is_valid,
        genesis_block_valid,
        blocks: results,
        chain_findings,
    })
}

// ---------------------------------------------------------------------------
// Record-Level Views
// ---------------------------------------------------------------------------

/// Verdict for a single record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RecordVerification {
    pub record_id: String,
    pub is_valid: bool,
    pub message: String,
    /// Index of the record's most recent block.
    pub block_index: u64,
}

impl RecordVerification {
    /// Summarize a verification run over one record's blocks.
    ///
    /// Returns `None` if the run covered no blocks.
    pub fn from_chain(record_id: &str, result: &ChainVerification) -> Option<Self> {
        let last = result.blocks.last()?;
        let invalid = result.invalid_blocks().count();
        let total = result.total_blocks();

        let message = if result.is_valid {
            format!("all {total} block(s) for record {record_id} verified")
        } else if invalid == 0 {
            format!("record {record_id} blocks verified but the chain itself is invalid")
        } else {
            format!("{invalid} of {total} block(s) for record {record_id} failed verification")
        };

        Some(Self {
            record_id: record_id.to_string(),
            is_valid: result.is_valid,
            message,
            block_index: last.index,
        })
    }
}

/// One line of a record's audit trail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub action: RecordAction,
    pub timestamp: DateTime<Utc>,
    pub block_index: u64,
    pub hash: String,
    pub updated_by: String,
}

/// The full audit trail of a record, oldest first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RecordHistory {
    pub record_id: String,
    pub entries: Vec<HistoryEntry>,
    pub total_transactions: usize,
}

impl RecordHistory {
    pub fn from_blocks(record_id: &str, blocks: &[Block]) -> Self {
        let entries: Vec<HistoryEntry> = blocks
            .iter()
            .map(|b| HistoryEntry {
                action: b.data.action,
                timestamp: b.timestamp,
                block_index: b.index,
                hash: b.hash.clone(),
                updated_by: b.data.performed_by().to_string(),
            })
            .collect();

        Self {
            record_id: record_id.to_string(),
            total_transactions: entries.len(),
            entries,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
