//! # Storage Module
//!
//! Everything that ends up on disk: the block structure, the materialized
//! record view, and the sled-backed chain store.
//!
//! ## Architecture
//!
//! ```text
//! block.rs   — Block structure, drafts, hash computation
//! record.rs  — Record state folding and the RecordResolver seam
//! db.rs      — sled persistence with secondary indexes
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! BlockDraft → LedgerDb::append → Block
//!                   │
//!                   ├─ blocks / record_index / patient_index / time_index
//!                   └─ records (RecordState::apply)
//! ```
//!
//! Bincode is the on-disk encoding. JSON is reserved for hashing, export and
//! the CLI.

pub mod block;
pub mod db;
pub mod record;

pub use block::{Block, BlockData, BlockDraft, RecordAction, RecordSnapshot};
pub use db::{DbError, DbResult, LedgerDb};
pub use record::{AlwaysResolves, RecordResolver, RecordState};
