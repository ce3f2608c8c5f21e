//! # Cohort Store
//!
//! Storage abstraction for Cohort. Provides a trait-based interface for
//! community persistence with SQLite and in-memory implementations.
//!
//! ## Overview
//!
//! Community state is persisted behind the [`Store`] trait so the manager
//! stays storage-agnostic. The primary implementation is [`SqliteStore`],
//! with [`MemoryStore`] for testing.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`CommunityRecord`] - Latest signed description plus local-only key material
//! - [`StoredKey`] / [`DeliveryMarker`] - Community and channel keys and their delivery
//! - [`InsertResult`] - Result of appending to the description history
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cohort_store::{SqliteStore, Store, StoreExt};
//!
//! async fn example() {
//!     let store = SqliteStore::open("cohort.db").unwrap();
//!
//!     // Or use an in-memory database for testing
//!     let store = SqliteStore::open_memory().unwrap();
//!
//!     // let record: CommunityRecord = ...;
//!     // store.commit_community(&record).await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Append-only history**: every committed description is kept by `(community, clock)`
//! - **Conflict detection**: a different description at a recorded clock returns `Conflict`

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    CommunityRecord, DeliveryMarker, DeliveryState, InsertResult, Store, StoreExt, StoredKey,
};

/// Current time in milliseconds.
pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
