//! In-process card store

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::models::{Card, CardId, MiscState, PracticeState, ReviewLog};
use super::store::{
    BulkUpdate, CardOrder, CardQuery, CardStore, LoadDepth, Result, StoreError, Table,
};

/// Everything a collection persists
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Collection {
    pub cards: BTreeMap<CardId, Card>,
    pub review_logs: BTreeMap<i64, ReviewLog>,
}

impl Collection {
    pub fn query(&self, query: &CardQuery) -> Vec<Card> {
        let mut rows: Vec<&Card> = self.cards.values().filter(|c| query.matches(c)).collect();

        match query.order {
            CardOrder::Id => {}
            CardOrder::Due => rows.sort_by_key(|c| (c.due, c.id)),
            CardOrder::Random(seed) => rows.shuffle(&mut StdRng::seed_from_u64(seed)),
        }

        let limit = query.limit.unwrap_or(usize::MAX);
        rows.into_iter()
            .take(limit)
            .map(|c| match query.depth {
                LoadDepth::Shallow => c.shallow(),
                LoadDepth::Full => c.clone(),
            })
            .collect()
    }

    pub fn apply(&mut self, update: &BulkUpdate) -> usize {
        match update {
            BulkUpdate::PostponeSiblings {
                note_id,
                except,
                until,
            } => {
                let mut touched = 0;
                for card in self.cards.values_mut() {
                    if card.note_id != *note_id
                        || card.id == *except
                        || card.practice_state == PracticeState::Deleted
                        || card.due >= *until
                    {
                        continue;
                    }
                    card.due = *until;
                    card.misc_state.insert(MiscState::DISMISSED);
                    touched += 1;
                }
                touched
            }
        }
    }

    pub fn logs_since(&self, since: DateTime<Utc>) -> Vec<ReviewLog> {
        self.review_logs
            .range(since.timestamp_millis()..)
            .map(|(_, log)| log.clone())
            .collect()
    }
}

/// A [`CardStore`] holding the whole collection in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    collection: Mutex<Collection>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_collection(collection: Collection) -> Self {
        Self {
            collection: Mutex::new(collection),
        }
    }

    pub fn with_cards(cards: impl IntoIterator<Item = Card>) -> Self {
        let mut collection = Collection::default();
        for card in cards {
            collection.cards.insert(card.id, card);
        }
        Self::from_collection(collection)
    }

    pub fn lock(&self) -> MutexGuard<'_, Collection> {
        self.collection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn card(&self, id: CardId) -> Option<Card> {
        self.lock().cards.get(&id).cloned()
    }

    pub fn snapshot(&self) -> Collection {
        self.lock().clone()
    }
}

#[async_trait]
impl CardStore for MemoryStore {
    async fn query_cards(&self, query: &CardQuery) -> Result<Vec<Card>> {
        Ok(self.lock().query(query))
    }

    async fn insert_card(&self, card: &Card) -> Result<()> {
        let mut collection = self.lock();
        if collection.cards.contains_key(&card.id) {
            return Err(StoreError::Backend(format!("card {} already exists", card.id)));
        }
        collection.cards.insert(card.id, card.clone());
        Ok(())
    }

    async fn update_card(&self, card: &Card) -> Result<()> {
        let mut collection = self.lock();
        let slot = collection
            .cards
            .get_mut(&card.id)
            .ok_or(StoreError::CardNotFound(card.id))?;
        // Shallow copies never overwrite the stored payload
        let data = card.data.clone().or_else(|| slot.data.take());
        *slot = Card {
            data,
            ..card.clone()
        };
        Ok(())
    }

    async fn insert_log(&self, log: &ReviewLog) -> Result<()> {
        self.lock().review_logs.insert(log.id, log.clone());
        Ok(())
    }

    async fn query_logs(&self, since: DateTime<Utc>) -> Result<Vec<ReviewLog>> {
        Ok(self.lock().logs_since(since))
    }

    async fn delete(&self, table: Table, id: i64) -> Result<()> {
        let mut collection = self.lock();
        match table {
            Table::Cards => {
                collection
                    .cards
                    .remove(&id)
                    .ok_or(StoreError::CardNotFound(id))?;
            }
            Table::ReviewLogs => {
                collection.review_logs.remove(&id);
            }
        }
        Ok(())
    }

    async fn bulk_update(&self, update: &BulkUpdate) -> Result<usize> {
        Ok(self.lock().apply(update))
    }
}
