//! Incrementally loaded review queue
//!
//! One queue per [`QueueKind`]. Each keeps a buffer of cards in review order:
//!
//! ```text
//!  items:  [ visited ........ | hydrated ahead ... | shallow stubs ...... ]
//!                              ^cursor              ^hydrated
//! ```
//!
//! - `items[..cursor]` have been handed out (or dismissed as siblings). The
//!   current card is `items[cursor - 1]`.
//! - `items[cursor..hydrated]` are full rows ready to be shown.
//! - `items[hydrated..]` are shallow rows that must be hydrated first.
//!
//! Loads and hydrations run as spawned tasks. At most one of each is in
//! flight per queue; concurrent callers await the same shared future. The
//! buffer is only touched under the queue's own mutex, which is never held
//! across an await.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;

use super::config::{CollectionConfig, NewCardOrder};
use super::errors::{Result, ReviewError};
use super::models::{Card, CardId, QueueKind};
use super::store::{self, CardOrder, CardQuery, CardStore, LoadDepth};

type PendingOp = Shared<BoxFuture<'static, ()>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
    Load,
    Hydrate,
}

/// Rows returned by one load
struct Batch {
    full: Vec<Card>,
    shallow: Vec<Card>,
    exhausted: bool,
}

#[derive(Default)]
struct QueueState {
    items: Vec<Card>,
    cursor: usize,
    hydrated: usize,
    dismissed: HashSet<CardId>,
    end_of_store: bool,
    /// First load finished, successfully or not
    initialized: bool,
    loaded_once: bool,
    last_fetch_failed: bool,
    loading: Option<PendingOp>,
    hydrating: Option<PendingOp>,
}

impl QueueState {
    fn current(&self) -> Option<&Card> {
        self.cursor.checked_sub(1).and_then(|i| self.items.get(i))
    }

    fn ahead(&self) -> impl Iterator<Item = &Card> + '_ {
        self.items[self.cursor..]
            .iter()
            .filter(|c| !self.dismissed.contains(&c.id))
    }

    fn available(&self) -> usize {
        self.ahead().count()
    }

    /// Visited cards that were not dismissed
    fn taken(&self) -> usize {
        self.items[..self.cursor]
            .iter()
            .filter(|c| !self.dismissed.contains(&c.id))
            .count()
    }

    fn contains(&self, id: CardId) -> bool {
        self.items.iter().any(|c| c.id == id)
    }

    /// Step over dismissed entries sitting right at the cursor
    fn skip_dismissed(&mut self) {
        while let Some(card) = self.items.get(self.cursor) {
            if !self.dismissed.contains(&card.id) {
                break;
            }
            self.cursor += 1;
            self.hydrated = self.hydrated.max(self.cursor);
        }
    }

    /// Sort what is ahead of the cursor by due date, keeping full rows ahead of stubs
    fn sort_ahead(&mut self) {
        let (cursor, hydrated) = (self.cursor, self.hydrated);
        self.items[cursor..hydrated].sort_by_key(|c| c.due);
        self.items[hydrated..].sort_by_key(|c| c.due);
    }

    fn insert_ahead(&mut self, card: Card, sorted: bool) {
        let at = self.hydrated;
        self.items.insert(at, card);
        self.hydrated += 1;
        if sorted {
            self.sort_ahead();
        }
    }

    fn append(&mut self, batch: Batch, sorted: bool) -> usize {
        let known: HashSet<CardId> = self.items.iter().map(|c| c.id).collect();
        let full: Vec<Card> = batch
            .full
            .into_iter()
            .filter(|c| !known.contains(&c.id))
            .collect();
        let shallow: Vec<Card> = batch
            .shallow
            .into_iter()
            .filter(|c| !known.contains(&c.id))
            .collect();
        let added = full.len() + shallow.len();

        let at = self.hydrated;
        let hydrated = full.len();
        self.items.splice(at..at, full);
        self.hydrated += hydrated;
        self.items.extend(shallow);

        if batch.exhausted || added == 0 {
            self.end_of_store = true;
        }
        if sorted {
            self.sort_ahead();
        }
        added
    }

    /// Swap full rows in for the stubs `ids`. Stubs that vanished from
    /// storage or no longer belong in the queue are dropped.
    fn hydrate(&mut self, ids: &[CardId], rows: Vec<Card>, filter: &CardQuery) -> usize {
        let mut rows: HashMap<CardId, Card> = rows.into_iter().map(|c| (c.id, c)).collect();
        let mut hydrated = 0;

        for id in ids {
            let Some(offset) = self.items[self.hydrated..].iter().position(|c| c.id == *id)
            else {
                // Dismissed as a sibling while we were loading
                continue;
            };
            let pos = self.hydrated + offset;

            match rows.remove(id) {
                Some(card) if filter.matches(&card) => {
                    let at = self.hydrated;
                    self.items[at..=pos].rotate_right(1);
                    self.items[at] = card;
                    self.hydrated += 1;
                    hydrated += 1;
                }
                _ => {
                    self.items.remove(pos);
                }
            }
        }

        hydrated
    }
}

struct QueueInner {
    kind: QueueKind,
    quota: Option<usize>,
    day_end: DateTime<Utc>,
    seed: u64,
    config: Arc<CollectionConfig>,
    store: Arc<dyn CardStore>,
    state: Mutex<QueueState>,
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sorted(&self) -> bool {
        self.kind != QueueKind::New
    }

    fn quota_reached(&self, st: &QueueState) -> bool {
        self.quota.map_or(false, |quota| st.taken() >= quota)
    }

    /// Everything this queue may contain today
    fn base_query(&self) -> CardQuery {
        let order = match (self.kind, self.config.new_card_order) {
            (QueueKind::New, NewCardOrder::Sequential) => CardOrder::Id,
            (QueueKind::New, NewCardOrder::Random) => CardOrder::Random(self.seed),
            _ => CardOrder::Due,
        };
        CardQuery::new(self.kind.filter())
            .due_before(self.day_end)
            .order(order)
    }

    async fn fetch_initial(&self) -> store::Result<Batch> {
        let base = self.base_query();

        if self.kind == QueueKind::Learning {
            let full = self.store.query_cards(&base).await?;
            return Ok(Batch {
                full,
                shallow: Vec::new(),
                exhausted: true,
            });
        }

        let limit = self.quota.unwrap_or(0) + self.config.incremental_load_max;
        let rows = self
            .store
            .query_cards(&base.limit(limit).depth(LoadDepth::Shallow))
            .await?;
        let exhausted = rows.len() < limit;

        let cap = self.config.incremental_further_load_max.min(rows.len());
        let ids: Vec<CardId> = rows[..cap].iter().map(|c| c.id).collect();
        let mut full_rows: HashMap<CardId, Card> = if ids.is_empty() {
            HashMap::new()
        } else {
            self.store
                .query_cards(&CardQuery::by_ids(ids))
                .await?
                .into_iter()
                .map(|c| (c.id, c))
                .collect()
        };

        let mut rows = rows.into_iter();
        let full = rows
            .by_ref()
            .take(cap)
            .filter_map(|c| full_rows.remove(&c.id))
            .collect();
        let shallow = rows.collect();

        Ok(Batch {
            full,
            shallow,
            exhausted,
        })
    }

    async fn fetch_more(&self, exclude: Vec<CardId>, limit: usize) -> store::Result<Batch> {
        let query = self
            .base_query()
            .excluding(exclude)
            .limit(limit)
            .depth(LoadDepth::Shallow);
        let shallow = self.store.query_cards(&query).await?;
        Ok(Batch {
            exhausted: shallow.len() < limit,
            full: Vec::new(),
            shallow,
        })
    }

    async fn run_load(self: Arc<Self>, initial: bool, exclude: Vec<CardId>) {
        let limit = self.config.incremental_load_max.max(1);
        let result = if initial {
            self.fetch_initial().await
        } else {
            self.fetch_more(exclude, limit).await
        };

        let mut st = self.lock();
        st.loading = None;
        st.initialized = true;
        match result {
            Ok(batch) => {
                st.loaded_once = true;
                st.last_fetch_failed = false;
                let added = st.append(batch, self.sorted());
                log::debug!(
                    "{} queue: loaded {} cards ({} buffered, {} hydrated, end of store: {})",
                    self.kind,
                    added,
                    st.items.len(),
                    st.hydrated,
                    st.end_of_store
                );
            }
            Err(e) => {
                st.last_fetch_failed = true;
                log::warn!("{} queue: load failed, will retry: {}", self.kind, e);
            }
        }
    }

    async fn run_hydrate(self: Arc<Self>, ids: Vec<CardId>) {
        let result = self.store.query_cards(&CardQuery::by_ids(ids.clone())).await;

        let mut st = self.lock();
        st.hydrating = None;
        match result {
            Ok(rows) => {
                st.last_fetch_failed = false;
                let hydrated = st.hydrate(&ids, rows, &self.base_query());
                log::debug!("{} queue: hydrated {} of {} cards", self.kind, hydrated, ids.len());
            }
            Err(e) => {
                st.last_fetch_failed = true;
                log::warn!("{} queue: hydration failed, will retry: {}", self.kind, e);
            }
        }
    }

    /// Run `fut` on the runtime and hand back a future any number of callers can await
    fn spawn_op<F>(self: &Arc<Self>, op: OpKind, fut: F) -> PendingOp
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        let inner = Arc::clone(self);
        async move {
            if let Err(e) = handle.await {
                log::error!("{} queue: {:?} task failed: {}", inner.kind, op, e);
                let mut st = inner.lock();
                st.initialized = true;
                st.last_fetch_failed = true;
                match op {
                    OpKind::Load => st.loading = None,
                    OpKind::Hydrate => st.hydrating = None,
                }
            }
        }
        .boxed()
        .shared()
    }

    fn start_load(self: &Arc<Self>, st: &mut QueueState) -> PendingOp {
        if let Some(op) = &st.loading {
            return op.clone();
        }
        let initial = !st.loaded_once;
        let exclude = if initial {
            Vec::new()
        } else {
            st.items.iter().map(|c| c.id).collect()
        };
        let op = self.spawn_op(OpKind::Load, Arc::clone(self).run_load(initial, exclude));
        st.loading = Some(op.clone());
        op
    }

    fn start_hydrate(self: &Arc<Self>, st: &mut QueueState) -> Option<PendingOp> {
        if let Some(op) = &st.hydrating {
            return Some(op.clone());
        }
        let end = (st.hydrated + self.config.incremental_further_load_max.max(1)).min(st.items.len());
        if st.hydrated >= end {
            return None;
        }
        let ids: Vec<CardId> = st.items[st.hydrated..end].iter().map(|c| c.id).collect();
        let op = self.spawn_op(OpKind::Hydrate, Arc::clone(self).run_hydrate(ids));
        st.hydrating = Some(op.clone());
        Some(op)
    }

    /// Keep enough cards buffered and hydrated ahead of the cursor
    fn prefetch(self: &Arc<Self>, st: &mut QueueState) {
        if let Some(quota) = self.quota {
            let need = quota.saturating_sub(st.taken());
            if !st.end_of_store && st.loading.is_none() && st.available() < need {
                let _ = self.start_load(st);
            }
        }

        let hydrated_ahead = st.hydrated - st.cursor;
        if st.hydrated < st.items.len()
            && st.hydrating.is_none()
            && hydrated_ahead < self.config.incremental_further_load_min
        {
            let _ = self.start_hydrate(st);
        }
    }

    fn check_ready(&self, st: &QueueState) -> Result<()> {
        if !st.initialized && st.items.is_empty() && st.loading.is_some() {
            return Err(ReviewError::InvalidState(format!(
                "{} queue is still loading",
                self.kind
            )));
        }
        Ok(())
    }
}

/// A forward-only, incrementally loaded view over one category of cards
#[derive(Clone)]
pub struct IncrementalCardQueue {
    inner: Arc<QueueInner>,
}

impl IncrementalCardQueue {
    /// Create the queue and start its first load in the background.
    ///
    /// `quota` caps how many cards the queue hands out; `None` means no cap.
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        kind: QueueKind,
        quota: Option<usize>,
        day_end: DateTime<Utc>,
        config: Arc<CollectionConfig>,
        store: Arc<dyn CardStore>,
        seed: u64,
    ) -> Self {
        let inner = Arc::new(QueueInner {
            kind,
            quota,
            day_end,
            seed,
            config,
            store,
            state: Mutex::new(QueueState::default()),
        });

        {
            let mut st = inner.lock();
            if quota == Some(0) {
                log::debug!("{} queue: quota exhausted, nothing to load", kind);
                st.initialized = true;
                st.end_of_store = true;
            } else {
                let _ = inner.start_load(&mut st);
            }
        }

        Self { inner }
    }

    pub fn kind(&self) -> QueueKind {
        self.inner.kind
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lock().initialized
    }

    /// Wait for the first load to finish
    pub async fn initialized(&self) {
        loop {
            let pending = {
                let st = self.inner.lock();
                if st.initialized {
                    return;
                }
                st.loading.clone()
            };
            match pending {
                Some(op) => op.await,
                None => return,
            }
        }
    }

    /// Advance to the next card, loading or hydrating as needed.
    ///
    /// Returns `false` when the queue is exhausted, its quota is used up, or
    /// the store failed this round.
    pub async fn move_next(&self) -> bool {
        loop {
            let pending = {
                let mut st = self.inner.lock();
                if self.inner.quota_reached(&st) {
                    return false;
                }
                st.skip_dismissed();

                if st.cursor < st.items.len() {
                    if st.cursor < st.hydrated {
                        st.cursor += 1;
                        self.inner.prefetch(&mut st);
                        return true;
                    }
                    match self.inner.start_hydrate(&mut st) {
                        Some(op) => op,
                        None => return false,
                    }
                } else if !st.end_of_store {
                    self.inner.start_load(&mut st)
                } else {
                    return false;
                }
            };

            pending.await;

            if self.inner.lock().last_fetch_failed {
                return false;
            }
        }
    }

    /// The card the cursor is on
    pub fn current(&self) -> Option<Card> {
        self.inner.lock().current().cloned()
    }

    /// Mark the current card dismissed so it no longer counts against the quota
    pub fn dismiss_current(&self) -> Option<CardId> {
        let mut st = self.inner.lock();
        let id = st.current()?.id;
        st.dismissed.insert(id);
        Some(id)
    }

    /// Move every unvisited sibling of `card` behind the cursor and mark it
    /// dismissed. Returns how many were suppressed.
    pub fn dismiss_siblings(&self, card: &Card) -> usize {
        let mut st = self.inner.lock();
        let (cursor, hydrated) = (st.cursor, st.hydrated);

        let is_sibling = |c: &Card| c.note_id == card.note_id && c.id != card.id;
        if !st.items[cursor..].iter().any(is_sibling) {
            return 0;
        }

        let tail: Vec<Card> = st.items.drain(cursor..).collect();
        let mut siblings = Vec::new();
        let mut rest = Vec::with_capacity(tail.len());
        let mut crossed = 0;
        for (offset, item) in tail.into_iter().enumerate() {
            if is_sibling(&item) {
                if cursor + offset >= hydrated {
                    crossed += 1;
                }
                siblings.push(item);
            } else {
                rest.push(item);
            }
        }

        let count = siblings.len();
        for sibling in &siblings {
            st.dismissed.insert(sibling.id);
        }
        st.items.extend(siblings);
        st.items.extend(rest);
        st.cursor += count;
        st.hydrated += crossed;

        log::debug!(
            "{} queue: suppressed {} siblings of card {} (note {})",
            self.inner.kind,
            count,
            card.id,
            card.note_id
        );
        count
    }

    /// Record the answered state of the current card. A learning card that is
    /// still learning and due today goes back into the queue.
    pub fn on_answered(&self, card: &Card) {
        let mut st = self.inner.lock();
        let Some(pos) = st
            .cursor
            .checked_sub(1)
            .filter(|&p| st.items[p].id == card.id)
        else {
            return;
        };

        if self.inner.kind == QueueKind::Learning && self.belongs_today(card) {
            st.items.remove(pos);
            st.cursor -= 1;
            st.hydrated -= 1;
            st.insert_ahead(card.clone(), true);
        } else {
            st.items[pos] = card.clone();
        }
    }

    /// Add a card that entered learning during this session.
    /// Returns whether it was added.
    pub fn register(&self, card: &Card) -> bool {
        if self.inner.kind != QueueKind::Learning || !self.belongs_today(card) {
            return false;
        }
        let mut st = self.inner.lock();
        if st.dismissed.contains(&card.id) || st.contains(card.id) {
            return false;
        }
        st.insert_ahead(card.clone(), true);
        true
    }

    fn belongs_today(&self, card: &Card) -> bool {
        card.practice_state.is_learning() && card.due < self.inner.day_end && !card.is_suspended()
    }

    /// Buffered cards ahead of the cursor that were not dismissed, capped at the quota
    pub fn available_count(&self) -> Result<usize> {
        let st = self.inner.lock();
        self.inner.check_ready(&st)?;
        let available = st.available();
        Ok(self.inner.quota.map_or(available, |q| available.min(q)))
    }

    /// Cards this queue can still hand out today from its buffer
    pub fn review_count(&self) -> Result<usize> {
        let st = self.inner.lock();
        self.inner.check_ready(&st)?;
        let available = st.available();
        Ok(match self.inner.quota {
            Some(quota) => available.min(quota.saturating_sub(st.taken())),
            None => available,
        })
    }

    /// Load more when nothing is buffered but storage may still hold cards.
    /// Returns whether the buffer grew.
    pub async fn top_up(&self) -> bool {
        let (pending, before) = {
            let mut st = self.inner.lock();
            if st.end_of_store || self.inner.quota_reached(&st) || st.available() > 0 {
                return false;
            }
            (self.inner.start_load(&mut st), st.items.len())
        };
        pending.await;
        self.inner.lock().items.len() > before
    }
}
