//! Spaced repetition review for Nous flashcards

pub mod flashcards;

pub use flashcards::{
    CardScheduler, CardStore, CollectionConfig, FileStore, IncrementalCardQueue, MemoryStore,
    ReviewCoordinator, ReviewError, ReviewSession,
};
