//! Flashcard review engine for Nous
//!
//! This module provides:
//! - Card scheduling (learning steps, graduation, lapses, leeches, fuzz)
//! - Daily new/due quotas computed from the review log
//! - Incrementally loaded review queues per card category
//! - A review coordinator that interleaves the queues and persists answers
//! - In-memory and JSON file card stores

pub mod algorithm;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod memory;
pub mod models;
pub mod queue;
pub mod session;
pub mod storage;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use algorithm::{fuzz_range, CardScheduler};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CollectionConfig, LeechAction, NewCardOrder, WritePolicy};
pub use coordinator::{ReviewCoordinator, ReviewPhase};
pub use errors::{Result, ReviewError};
pub use memory::{Collection, MemoryStore};
pub use models::*;
pub use queue::IncrementalCardQueue;
pub use session::ReviewSession;
pub use storage::FileStore;
pub use store::{
    BulkUpdate, CardOrder, CardQuery, CardStore, LoadDepth, StoreError, Table,
};
