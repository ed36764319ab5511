// Copyright (c) 2026 MedLedger Contributors. MIT License.
// See LICENSE for details.

//! # MedLedger — Core Library
//!
//! An append-only, hash-linked ledger for medical records. Every create,
//! update and delete of a record becomes a block; every block carries the
//! SHA-256 digest of its own content and of the block before it. Rewriting
//! history after the fact breaks one of those digests, and verification
//! says exactly which one.
//!
//! This is not a distributed blockchain. There is one writer, one sled
//! database, and no consensus: the ledger is a tamper-evidence log sitting
//! next to an application's ordinary record datastore.
//!
//! ## Architecture
//!
//! - **crypto** — SHA-256 and the canonical JSON preimage.
//! - **storage** — Block model, record folding, sled-backed chain store.
//! - **ledger** — Append engine, query layer, verification, reporting.
//! - **config** — Chain format constants and runtime knobs.
//! - **error** — The public error type.
//!
//! ## Quick Start
//!
//! ```
//! use medledger::config::LedgerConfig;
//! use medledger::ledger::{AppendRequest, Ledger};
//! use medledger::storage::{RecordAction, RecordSnapshot};
//!
//! let ledger = Ledger::open_temporary(LedgerConfig::default()).unwrap();
//! ledger
//!     .append_event(AppendRequest {
//!         action: RecordAction::Create,
//!         record_id: "rec-1".into(),
//!         patient_id: "pat-1".into(),
//!         doctor_id: "doc-1".into(),
//!         snapshot: RecordSnapshot::default(),
//!         actor: None,
//!     })
//!     .unwrap();
//!
//! assert!(ledger.verify_all().unwrap().is_valid());
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod storage;

pub use error::{LedgerError, LedgerResult};
