//! Error types for the ledger's public API.
//!
//! Every [`Ledger`](crate::ledger::Ledger) operation that can fail returns a
//! [`LedgerError`]. Integrity problems found by verification are *not*
//! errors: they come back as findings inside a successful result.

use thiserror::Error;

use crate::storage::db::DbError;

/// Errors surfaced by ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// An append request was malformed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Another writer extended the chain while this append was in flight,
    /// and the retry budget ran out.
    #[error("concurrent append conflict after {attempts} attempt(s)")]
    ConcurrentAppendConflict {
        /// How many times the append was attempted.
        attempts: u32,
    },

    /// No block exists at the requested index.
    #[error("block {0} not found")]
    BlockNotFound(u64),

    /// No block references the requested record.
    #[error("record {0} not found")]
    RecordNotFound(String),

    /// A time range whose start lies after its end.
    #[error("invalid time range: {0}")]
    InvalidRange(String),

    /// Page or limit outside the accepted bounds.
    #[error("invalid pagination: {0}")]
    InvalidPagination(String),

    /// An exported chain could not be loaded.
    #[error("import failed at line {line}: {reason}")]
    Import { line: usize, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] DbError),

    /// Reading an import or writing an export failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LedgerError {
    /// Whether the same call may succeed if simply retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::ConcurrentAppendConflict { .. })
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(LedgerError::BlockNotFound(7).to_string(), "block 7 not found");
        assert_eq!(
            LedgerError::Import { line: 3, reason: "bad json".into() }.to_string(),
            "import failed at line 3: bad json"
        );
    }

    #[test]
    fn storage_errors_convert() {
        let err: LedgerError = DbError::Corrupt("oops".into()).into();
        assert!(matches!(err, LedgerError::Storage(_)));
        assert!(!err.is_retryable());
        assert!(LedgerError::ConcurrentAppendConflict { attempts: 3 }.is_retryable());
    }
}
