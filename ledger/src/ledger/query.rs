//! # Query Layer
//!
//! Selects the subset of blocks a caller wants to look at or verify. All
//! argument validation happens here, before anything touches the store:
//! an inverted time range or an out-of-bounds page is rejected outright
//! rather than silently returning nothing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::storage::block::Block;
use crate::storage::db::{DbResult, LedgerDb};

// ---------------------------------------------------------------------------
// TimeRange
// ---------------------------------------------------------------------------

/// Inclusive time window. Either bound may be open.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> LedgerResult<Self> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(LedgerError::InvalidRange(format!(
                    "start {} is after end {}",
                    s.to_rfc3339(),
                    e.to_rfc3339()
                )));
            }
        }
        Ok(Self { start, end })
    }

    /// A range with no bounds at all.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| *ts >= s) && self.end.map_or(true, |e| *ts <= e)
    }
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

/// A validated, 1-based page request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub page: usize,
    pub limit: usize,
}

impl PageRequest {
    /// Validate `page` and `limit` against `max_limit`.
    pub fn new(page: usize, limit: usize, max_limit: usize) -> LedgerResult<Self> {
        if page == 0 {
            return Err(LedgerError::InvalidPagination("page starts at 1".into()));
        }
        if limit == 0 {
            return Err(LedgerError::InvalidPagination("limit must be positive".into()));
        }
        if limit > max_limit {
            return Err(LedgerError::InvalidPagination(format!(
                "limit {limit} exceeds maximum of {max_limit}"
            )));
        }
        Ok(Self { page, limit })
    }

    /// Number of items skipped before this page.
    pub fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.limit)
    }
}

/// One page of blocks plus the numbers needed to render a pager.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPage {
    pub blocks: Vec<Block>,
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub pages: usize,
}

impl BlockPage {
    pub fn new(blocks: Vec<Block>, request: PageRequest, total: usize) -> Self {
        Self {
            blocks,
            page: request.page,
            limit: request.limit,
            total,
            pages: total.div_ceil(request.limit),
        }
    }
}

// ---------------------------------------------------------------------------
// BlockQuery
// ---------------------------------------------------------------------------

/// Filter over the chain. Unset fields match everything.
///
/// ```
/// use medledger::ledger::query::{BlockQuery, TimeRange};
///
/// let q = BlockQuery::all().for_patient("pat-1").within(TimeRange::unbounded());
/// assert_eq!(q.patient_id.as_deref(), Some("pat-1"));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockQuery {
    pub patient_id: Option<String>,
    pub record_id: Option<String>,
    pub range: TimeRange,
}

impl BlockQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_patient(mut self, patient_id: impl Into<String>) -> Self {
        self.patient_id = Some(patient_id.into());
        self
    }

    pub fn for_record(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    pub fn within(mut self, range: TimeRange) -> Self {
        self.range = range;
        self
    }

    pub fn matches(&self, block: &Block) -> bool {
        self.patient_id.as_deref().map_or(true, |p| block.patient_id() == p)
            && self.record_id.as_deref().map_or(true, |r| block.record_id() == r)
            && self.range.contains(&block.timestamp)
    }

    /// Run the query against the store, in index order.
    ///
    /// The most selective index is scanned first and the remaining
    /// criteria are applied as a filter.
    pub fn select(&self, db: &LedgerDb) -> DbResult<Vec<Block>> {
        let candidates = if let Some(record_id) = &self.record_id {
            db.get_by_record(record_id)?
        } else if let Some(patient_id) = &self.patient_id {
            db.get_by_patient(patient_id)?
        } else if !self.range.is_unbounded() {
            db.get_range(self.range.start, self.range.end)?
        } else {
            db.all_blocks()?
        };

        Ok(candidates.into_iter().filter(|b| self.matches(b)).collect())
    }
}
