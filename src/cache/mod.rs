//! Offline cache primitives.
//!
//! This module knows nothing about favorites or lifecycles. It provides:
//! - Cache key derivation and the key scheme each request path uses
//! - The eligibility policy deciding what is kept for offline use
//! - A generational store of materialized responses (SQLite or memory)

pub mod key;
pub mod policy;
pub mod storage;
pub mod traits;

pub use key::{CacheKey, KeyScheme};
pub use policy::CachePolicy;
pub use storage::{CacheStore, MemoryStore, SqliteStore};
pub use traits::{FetchOutcome, Payload};
