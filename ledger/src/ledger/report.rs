//! # Statistics & Reporting
//!
//! Aggregates a [`ChainVerification`] into the numbers an auditor looks at
//! first. Reports are derived on demand and never persisted. They contain
//! no wall-clock values, so two reports over the same chain are equal.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::verification::{BlockVerification, ChainVerification, FindingKind, Severity};
use crate::storage::block::RecordAction;

/// Headline counts.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VerificationSummary {
    pub total_blocks: usize,
    pub valid_blocks: usize,
    pub invalid_blocks: usize,
    /// Share of valid blocks, two decimals. An empty set counts as 100.
    pub validity_percentage: f64,
}

impl VerificationSummary {
    pub fn from_verification(result: &ChainVerification) -> Self {
        let total = result.total_blocks();
        let valid = result.valid_blocks();
        Self {
            total_blocks: total,
            valid_blocks: valid,
            invalid_blocks: total - valid,
            validity_percentage: percentage(valid, total),
        }
    }
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    let raw = part as f64 / total as f64 * 100.0;
    (raw * 100.0).round() / 100.0
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ActionBreakdown {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
}

impl ActionBreakdown {
    pub fn from_blocks(blocks: &[BlockVerification]) -> Self {
        let mut breakdown = Self::default();
        for block in blocks {
            match block.action {
                RecordAction::Create => breakdown.create += 1,
                RecordAction::Update => breakdown.update += 1,
                RecordAction::Delete => breakdown.delete += 1,
            }
        }
        breakdown
    }
}

/// Finding counts by severity and by kind. Chain-level findings included.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ErrorSummary {
    pub total_findings: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub by_kind: BTreeMap<FindingKind, usize>,
}

impl ErrorSummary {
    pub fn from_verification(result: &ChainVerification) -> Self {
        let mut summary = Self::default();
        for finding in result.findings() {
            summary.total_findings += 1;
            match finding.severity {
                Severity::High => summary.high += 1,
                Severity::Medium => summary.medium += 1,
                Severity::Low => summary.low += 1,
            }
            *summary.by_kind.entry(finding.kind).or_insert(0) += 1;
        }
        summary
    }
}

/// When the verified blocks start and stop.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Timeline {
    pub first_block_index: Option<u64>,
    pub last_block_index: Option<u64>,
    pub first_block_at: Option<DateTime<Utc>>,
    pub last_block_at: Option<DateTime<Utc>>,
    /// Milliseconds between first and last block, 0 for fewer than two.
    pub elapsed_ms: i64,
}

impl Timeline {
    pub fn from_blocks(blocks: &[BlockVerification]) -> Self {
        let (Some(first), Some(last)) = (blocks.first(), blocks.last()) else {
            return Self::default();
        };
        Self {
            first_block_index: Some(first.index),
            last_block_index: Some(last.index),
            first_block_at: Some(first.timestamp),
            last_block_at: Some(last.timestamp),
            elapsed_ms: (last.timestamp - first.timestamp).num_milliseconds(),
        }
    }
}

/// Everything a verification call returns.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IntegrityReport {
    pub summary: VerificationSummary,
    pub actions: ActionBreakdown,
    pub errors: ErrorSummary,
    pub timeline: Timeline,
    pub verification: ChainVerification,
}

impl IntegrityReport {
    pub fn build(verification: ChainVerification) -> Self {
        Self {
            summary: VerificationSummary::from_verification(&verification),
            actions: ActionBreakdown::from_blocks(&verification.blocks),
            errors: ErrorSummary::from_verification(&verification),
            timeline: Timeline::from_blocks(&verification.blocks),
            verification,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.verification.is_valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::verification::verify_blocks;
    use crate::storage::block::{Block, BlockData, BlockDraft, RecordSnapshot};
    use crate::storage::record::AlwaysResolves;
    use chrono::TimeZone;

    fn chain(actions: &[RecordAction]) -> Vec<Block> {
        let mut blocks: Vec<Block> = Vec::new();
        for (i, action) in actions.iter().enumerate() {
            let data = BlockData {
                action: *action,
                record_id: "rec-1".into(),
                patient_id: "pat-1".into(),
                doctor_id: "doc-1".into(),
                snapshot: RecordSnapshot::default(),
                actor: Some("doc-1".into()),
            };
            let ts = Utc.timestamp_opt(1_700_000_000 + i as i64 * 90, 0).unwrap();
            let block = Block::new(blocks.last(), BlockDraft::with_timestamp(data, ts));
            blocks.push(block);
        }
        blocks
    }

    fn report(blocks: &[Block]) -> IntegrityReport {
        IntegrityReport::build(verify_blocks(blocks, blocks, &AlwaysResolves).unwrap())
    }

    #[test]
    fn empty_set_is_fully_valid() {
        let r = report(&[]);
        assert_eq!(r.summary.total_blocks, 0);
        assert_eq!(r.summary.validity_percentage, 100.0);
        assert!(r.is_valid());
        assert_eq!(r.timeline, Timeline::default());
    }

    #[test]
    fn percentage_rounds_to_two_decimals() {
        assert_eq!(percentage(2, 3), 66.67);
        assert_eq!(percentage(1, 3), 33.33);
        assert_eq!(percentage(3, 3), 100.0);
        assert_eq!(percentage(0, 5), 0.0);
    }

    #[test]
    fn aggregates_over_tampered_chain() {
        let mut blocks = chain(&[
            RecordAction::Create,
            RecordAction::Update,
            RecordAction::Update,
            RecordAction::Delete,
        ]);
        blocks[1].data.snapshot.note = "edited".into();

        let r = report(&blocks);
        assert_eq!(r.summary.total_blocks, 4);
        assert_eq!(r.summary.invalid_blocks, 1);
        assert_eq!(r.summary.validity_percentage, 75.0);
        assert_eq!(r.actions, ActionBreakdown { create: 1, update: 2, delete: 1 });
        assert_eq!(r.errors.high, 1);
        assert_eq!(r.errors.total_findings, 1);
        assert_eq!(r.errors.by_kind.get(&FindingKind::InvalidHash), Some(&1));
        assert_eq!(r.timeline.elapsed_ms, 3 * 90 * 1000);
        assert_eq!(r.timeline.last_block_index, Some(3));
    }

    #[test]
    fn reports_are_idempotent() {
        let blocks = chain(&[RecordAction::Create, RecordAction::Update]);
        assert_eq!(report(&blocks), report(&blocks));
    }

    #[test]
    fn report_serializes_to_json() {
        let blocks = chain(&[RecordAction::Create]);
        let json = serde_json::to_value(report(&blocks)).unwrap();
        assert_eq!(json["summary"]["validity_percentage"], serde_json::json!(100.0));
        assert_eq!(json["verification"]["genesis_block_valid"], serde_json::json!(true));
    }
}
