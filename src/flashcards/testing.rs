//! Fixtures shared by the review tests

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use super::memory::MemoryStore;
use super::models::{Card, CardId, NoteId, PracticeState, ReviewLog};
use super::store::{BulkUpdate, CardQuery, CardStore, Result, StoreError, Table};

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// A card with a payload in `state`, due at `due`
pub fn card(id: CardId, note_id: NoteId, state: PracticeState, due: DateTime<Utc>) -> Card {
    let mut card = Card::new(id, note_id, now())
        .with_data(serde_json::json!({ "front": format!("question {}", id) }));
    card.practice_state = state;
    card.due = due;
    if state != PracticeState::New {
        card.e_factor = 2.5;
        card.interval = 1;
    }
    card
}

/// Wraps a [`MemoryStore`], counting card queries and failing on demand
pub struct CountingStore {
    inner: MemoryStore,
    queries: AtomicUsize,
    failures: AtomicUsize,
    log_failures: AtomicUsize,
    card_write_failures: AtomicUsize,
}

/// Consume one pending failure, if any
fn take_failure(pending: &AtomicUsize) -> bool {
    pending
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl CountingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            queries: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            log_failures: AtomicUsize::new(0),
            card_write_failures: AtomicUsize::new(0),
        }
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Make the next `n` card queries fail
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` review log inserts fail
    pub fn fail_next_log(&self, n: usize) {
        self.log_failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` card updates or deletes fail
    pub fn fail_next_card_write(&self, n: usize) {
        self.card_write_failures.store(n, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }
}

#[async_trait]
impl CardStore for CountingStore {
    async fn query_cards(&self, query: &CardQuery) -> Result<Vec<Card>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.failures) {
            return Err(StoreError::Backend("connection reset".into()));
        }
        self.inner.query_cards(query).await
    }

    async fn insert_card(&self, card: &Card) -> Result<()> {
        self.inner.insert_card(card).await
    }

    async fn update_card(&self, card: &Card) -> Result<()> {
        if take_failure(&self.card_write_failures) {
            return Err(StoreError::Backend("disk full".into()));
        }
        self.inner.update_card(card).await
    }

    async fn insert_log(&self, log: &ReviewLog) -> Result<()> {
        if take_failure(&self.log_failures) {
            return Err(StoreError::Backend("disk full".into()));
        }
        self.inner.insert_log(log).await
    }

    async fn query_logs(&self, since: DateTime<Utc>) -> Result<Vec<ReviewLog>> {
        self.inner.query_logs(since).await
    }

    async fn delete(&self, table: Table, id: i64) -> Result<()> {
        if table == Table::Cards && take_failure(&self.card_write_failures) {
            return Err(StoreError::Backend("disk full".into()));
        }
        self.inner.delete(table, id).await
    }

    async fn bulk_update(&self, update: &BulkUpdate) -> Result<usize> {
        self.inner.bulk_update(update).await
    }
}
