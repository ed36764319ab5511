//! # Ledger Configuration & Constants
//!
//! Every fixed value the ledger depends on lives here. Some of these are
//! baked into stored data (the genesis sentinel, the hash algorithm, the
//! sled tree names) and changing them makes existing chains unreadable or
//! unverifiable. The rest are operational knobs collected in
//! [`LedgerConfig`].

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Chain Format
// ---------------------------------------------------------------------------

/// Previous-hash value carried by the genesis block (index 0).
///
/// A zeroed 32-byte digest rendered as lowercase hex.
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Hash function used for block digests.
pub const HASH_ALGORITHM: &str = "SHA-256";

/// Digest length in bytes.
pub const HASH_OUTPUT_LENGTH: usize = 32;

/// Version of the canonical block preimage. Bump if the preimage layout
/// in `crypto::hash` ever changes.
pub const CANONICAL_FORMAT_VERSION: u16 = 1;

/// Crate version, reported by the CLI.
pub const LEDGER_VERSION: &str = env!("CARGO_PKG_VERSION");

// ---------------------------------------------------------------------------
// Storage Layout
// ---------------------------------------------------------------------------

/// Blocks keyed by index (8-byte big-endian).
pub const TREE_BLOCKS: &str = "blocks";

/// Secondary index: `record_id ‖ 0x00 ‖ index`.
pub const TREE_RECORD_INDEX: &str = "record_index";

/// Secondary index: `patient_id ‖ 0x00 ‖ index`.
pub const TREE_PATIENT_INDEX: &str = "patient_index";

/// Secondary index: `timestamp_ms ‖ index`.
pub const TREE_TIME_INDEX: &str = "time_index";

/// Materialized record state, keyed by record id.
pub const TREE_RECORDS: &str = "records";

/// Chain metadata (head index).
pub const TREE_METADATA: &str = "metadata";

/// Separator between an identifier and the index in secondary index keys.
/// Identifiers are validated to never contain it.
pub const INDEX_KEY_SEPARATOR: u8 = 0x00;

// ---------------------------------------------------------------------------
// Operational Defaults
// ---------------------------------------------------------------------------

/// Appends retried this many times on a head conflict before giving up.
pub const DEFAULT_MAX_APPEND_RETRIES: u32 = 3;

/// Page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_LIMIT: usize = 20;

/// Upper bound on page size for `list_blocks`.
pub const MAX_PAGE_LIMIT: usize = 100;

/// Longest identifier (record, patient, doctor, actor) accepted on append.
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Runtime configuration for a [`Ledger`](crate::ledger::Ledger).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Retries on `ConcurrentAppendConflict` before surfacing the error.
    pub max_append_retries: u32,
    /// Page size when none is given.
    pub default_page_limit: usize,
    /// Largest page size a caller may request.
    pub max_page_limit: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_append_retries: DEFAULT_MAX_APPEND_RETRIES,
            default_page_limit: DEFAULT_PAGE_LIMIT,
            max_page_limit: MAX_PAGE_LIMIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_sentinel_is_a_zeroed_digest() {
        assert_eq!(GENESIS_PREVIOUS_HASH.len(), HASH_OUTPUT_LENGTH * 2);
        assert!(GENESIS_PREVIOUS_HASH.bytes().all(|b| b == b'0'));
    }

    #[test]
    fn tree_names_are_distinct() {
        let names = [
            TREE_BLOCKS,
            TREE_RECORD_INDEX,
            TREE_PATIENT_INDEX,
            TREE_TIME_INDEX,
            TREE_RECORDS,
            TREE_METADATA,
        ];
        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn default_config_page_limits_are_sane() {
        let cfg = LedgerConfig::default();
        assert!(cfg.default_page_limit > 0);
        assert!(cfg.default_page_limit <= cfg.max_page_limit);
        assert!(cfg.max_append_retries > 0);
    }

    #[test]
    fn config_roundtrips_through_json() {
        let cfg = LedgerConfig {
            max_append_retries: 7,
            default_page_limit: 5,
            max_page_limit: 50,
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: LedgerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
