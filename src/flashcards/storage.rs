//! JSON file storage for a review collection
//!
//! Directory structure:
//! ```text
//! {collection}/
//! ├── cards.json          # Map of card id to card
//! └── review_logs.json    # Map of review start timestamp to log
//! ```
//!
//! The whole collection is kept in memory and the touched table is rewritten
//! after every change.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::memory::{Collection, MemoryStore};
use super::models::{Card, ReviewLog};
use super::store::{BulkUpdate, CardQuery, CardStore, Result, Table};

pub struct FileStore {
    dir: PathBuf,
    inner: MemoryStore,
}

impl FileStore {
    /// Open (or create) the collection stored in `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut collection = Collection::default();

        let cards_path = dir.join("cards.json");
        if cards_path.exists() {
            let content = fs::read_to_string(&cards_path)?;
            collection.cards = serde_json::from_str(&content)?;
        }

        let logs_path = dir.join("review_logs.json");
        if logs_path.exists() {
            let content = fs::read_to_string(&logs_path)?;
            collection.review_logs = serde_json::from_str(&content)?;
        }

        log::debug!(
            "Opened collection at {} ({} cards, {} logs)",
            dir.display(),
            collection.cards.len(),
            collection.review_logs.len()
        );

        Ok(Self {
            dir,
            inner: MemoryStore::from_collection(collection),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Get the file backing a table
    fn table_path(&self, table: Table) -> PathBuf {
        self.dir.join(format!("{}.json", self.table_name(table)))
    }

    fn save(&self, table: Table) -> Result<()> {
        let content = {
            let collection = self.inner.lock();
            match table {
                Table::Cards => serde_json::to_string_pretty(&collection.cards)?,
                Table::ReviewLogs => serde_json::to_string_pretty(&collection.review_logs)?,
            }
        };
        fs::write(self.table_path(table), content)?;
        Ok(())
    }

    pub fn snapshot(&self) -> Collection {
        self.inner.snapshot()
    }
}

#[async_trait]
impl CardStore for FileStore {
    async fn query_cards(&self, query: &CardQuery) -> Result<Vec<Card>> {
        self.inner.query_cards(query).await
    }

    async fn insert_card(&self, card: &Card) -> Result<()> {
        self.inner.insert_card(card).await?;
        self.save(Table::Cards)
    }

    async fn update_card(&self, card: &Card) -> Result<()> {
        self.inner.update_card(card).await?;
        self.save(Table::Cards)
    }

    async fn insert_log(&self, log: &ReviewLog) -> Result<()> {
        self.inner.insert_log(log).await?;
        self.save(Table::ReviewLogs)
    }

    async fn query_logs(&self, since: DateTime<Utc>) -> Result<Vec<ReviewLog>> {
        self.inner.query_logs(since).await
    }

    async fn delete(&self, table: Table, id: i64) -> Result<()> {
        self.inner.delete(table, id).await?;
        self.save(table)
    }

    async fn bulk_update(&self, update: &BulkUpdate) -> Result<usize> {
        let touched = self.inner.bulk_update(update).await?;
        if touched > 0 {
            self.save(Table::Cards)?;
        }
        Ok(touched)
    }
}
