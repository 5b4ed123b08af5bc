//! The query/persistence capability the review core runs against
//!
//! The core never talks to a concrete database. Everything it needs from
//! storage goes through [`CardStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::models::{Card, CardId, NoteId, QueueFilter, ReviewLog};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Card not found: {0}")]
    CardNotFound(CardId),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persisted tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Cards,
    ReviewLogs,
}

/// Sort order for card queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardOrder {
    /// Creation order
    Id,
    /// Earliest due first, ties by id
    Due,
    /// Shuffled with the given seed
    Random(u64),
}

/// How much of each row to load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadDepth {
    /// Scheduling columns only, no payload
    Shallow,
    Full,
}

/// Card selection for [`CardStore::query_cards`]
#[derive(Debug, Clone)]
pub struct CardQuery {
    pub states: QueueFilter,
    pub due_before: Option<DateTime<Utc>>,
    /// Restrict to these ids
    pub ids: Option<Vec<CardId>>,
    pub exclude_ids: Vec<CardId>,
    pub include_suspended: bool,
    pub limit: Option<usize>,
    pub order: CardOrder,
    pub depth: LoadDepth,
}

impl CardQuery {
    pub fn new(states: QueueFilter) -> Self {
        Self {
            states,
            due_before: None,
            ids: None,
            exclude_ids: Vec::new(),
            include_suspended: false,
            limit: None,
            order: CardOrder::Id,
            depth: LoadDepth::Full,
        }
    }

    /// Full rows for specific cards, whatever their state
    pub fn by_ids(ids: Vec<CardId>) -> Self {
        Self {
            ids: Some(ids),
            include_suspended: true,
            ..Self::new(QueueFilter::all())
        }
    }

    pub fn due_before(mut self, due_before: DateTime<Utc>) -> Self {
        self.due_before = Some(due_before);
        self
    }

    pub fn excluding(mut self, ids: Vec<CardId>) -> Self {
        self.exclude_ids = ids;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn order(mut self, order: CardOrder) -> Self {
        self.order = order;
        self
    }

    pub fn depth(mut self, depth: LoadDepth) -> Self {
        self.depth = depth;
        self
    }

    /// Whether `card` passes every filter of the query (ordering and limit aside)
    pub fn matches(&self, card: &Card) -> bool {
        if !self.states.intersects(card.practice_state.filter()) {
            return false;
        }
        if !self.include_suspended && card.is_suspended() {
            return false;
        }
        if let Some(due_before) = self.due_before {
            if card.due >= due_before {
                return false;
            }
        }
        if let Some(ids) = &self.ids {
            if !ids.contains(&card.id) {
                return false;
            }
        }
        !self.exclude_ids.contains(&card.id)
    }
}

/// Set-based updates applied directly in storage
#[derive(Debug, Clone, PartialEq)]
pub enum BulkUpdate {
    /// Push every other live card of `note_id` due before `until` to `until`
    /// and flag it dismissed
    PostponeSiblings {
        note_id: NoteId,
        except: CardId,
        until: DateTime<Utc>,
    },
}

#[async_trait]
pub trait CardStore: Send + Sync {
    async fn query_cards(&self, query: &CardQuery) -> Result<Vec<Card>>;

    async fn insert_card(&self, card: &Card) -> Result<()>;

    async fn update_card(&self, card: &Card) -> Result<()>;

    async fn insert_log(&self, log: &ReviewLog) -> Result<()>;

    /// Logs of reviews started at or after `since`, oldest first
    async fn query_logs(&self, since: DateTime<Utc>) -> Result<Vec<ReviewLog>>;

    async fn delete(&self, table: Table, id: i64) -> Result<()>;

    /// Returns the number of rows touched
    async fn bulk_update(&self, update: &BulkUpdate) -> Result<usize>;

    fn table_name(&self, table: Table) -> &'static str {
        match table {
            Table::Cards => "cards",
            Table::ReviewLogs => "review_logs",
        }
    }
}
