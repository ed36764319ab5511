//! # Hash Function Adapter
//!
//! Deterministic digests of block content. Nothing in the ledger hashes
//! bytes directly; everything goes through [`hash::hash_canonical`] so the
//! preimage layout is defined in exactly one place.

pub mod hash;

pub use hash::{canonical_json, hash_canonical, sha256, sha256_hex};
