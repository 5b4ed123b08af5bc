//! Review session orchestration
//!
//! The coordinator owns the three queues and is the only type a front end
//! talks to. Each step picks a queue at random, weighted by how many cards
//! that queue can still hand out, and advances it. Answers go through the
//! scheduler, get logged, and suppress the card's siblings everywhere.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::task::JoinHandle;

use super::algorithm::CardScheduler;
use super::clock::{Clock, SystemClock};
use super::config::{CollectionConfig, WritePolicy};
use super::errors::{Result, ReviewError};
use super::models::{Card, CardAction, Grade, GradeOption, QueueFilter, QueueKind, ReviewLog};
use super::queue::IncrementalCardQueue;
use super::session::ReviewSession;
use super::store::{self, BulkUpdate, CardStore, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReviewPhase {
    Uninitialized,
    Initializing,
    /// A card is current
    Ready,
    Answering,
    Dismissing,
    /// Nothing left to review today
    Exhausted,
}

#[derive(Debug, Clone)]
struct CurrentCard {
    card: Card,
    queue: QueueKind,
    started_at: DateTime<Utc>,
}

pub struct ReviewCoordinator {
    store: Arc<dyn CardStore>,
    config: Arc<CollectionConfig>,
    scheduler: CardScheduler,
    clock: Arc<dyn Clock>,
    rng: StdRng,
    queue_seed: u64,
    phase: ReviewPhase,
    session: Option<ReviewSession>,
    queues: Vec<IncrementalCardQueue>,
    current: Option<CurrentCard>,
    pending_writes: Vec<JoinHandle<()>>,
}

impl ReviewCoordinator {
    pub fn new(store: Arc<dyn CardStore>, config: Arc<CollectionConfig>) -> Self {
        let mut rng = StdRng::from_entropy();
        let queue_seed = rng.gen();
        Self {
            scheduler: CardScheduler::new(Arc::clone(&config)),
            store,
            config,
            clock: Arc::new(SystemClock),
            rng,
            queue_seed,
            phase: ReviewPhase::Uninitialized,
            session: None,
            queues: Vec::new(),
            current: None,
            pending_writes: Vec::new(),
        }
    }

    /// Make queue selection, new card shuffling and interval fuzz reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.scheduler = CardScheduler::with_seed(Arc::clone(&self.config), seed);
        self.rng = StdRng::seed_from_u64(seed);
        self.queue_seed = seed;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn phase(&self) -> ReviewPhase {
        self.phase
    }

    /// Today's quotas, once initialized
    pub fn session(&self) -> Option<&ReviewSession> {
        self.session.as_ref()
    }

    pub fn current(&self) -> Option<&Card> {
        self.current.as_ref().map(|c| &c.card)
    }

    /// Queue the current card came from
    pub fn current_queue(&self) -> Option<QueueKind> {
        self.current.as_ref().map(|c| c.queue)
    }

    fn queue(&self, kind: QueueKind) -> Option<&IncrementalCardQueue> {
        self.queues.iter().find(|q| q.kind() == kind)
    }

    /// Compute today's quotas, load the queues and select the first card.
    /// Returns whether there is anything to review.
    pub async fn initialize(&mut self) -> Result<bool> {
        if self.phase != ReviewPhase::Uninitialized {
            return Err(ReviewError::InvalidState(
                "review session already initialized".into(),
            ));
        }
        self.phase = ReviewPhase::Initializing;

        let now = self.clock.now();
        let session = match ReviewSession::load(self.store.as_ref(), &self.config, now).await {
            Ok(session) => session,
            Err(e) => {
                self.phase = ReviewPhase::Uninitialized;
                return Err(e.into());
            }
        };
        log::info!(
            "Starting review session: {} new and {} due cards left today",
            session.new_limit(),
            session.due_limit()
        );

        let day_end = self.config.tomorrow(now);
        self.queues = QueueKind::ALL
            .iter()
            .map(|&kind| {
                let quota = match kind {
                    QueueKind::New => Some(session.new_limit()),
                    QueueKind::Learning => None,
                    QueueKind::Due => Some(session.due_limit()),
                };
                IncrementalCardQueue::spawn(
                    kind,
                    quota,
                    day_end,
                    Arc::clone(&self.config),
                    Arc::clone(&self.store),
                    self.queue_seed,
                )
            })
            .collect();
        self.session = Some(session);

        join_all(self.queues.iter().map(|q| q.initialized())).await;

        self.select_next().await
    }

    /// Grade the current card and move on. Returns whether another card is current.
    pub async fn answer(&mut self, grade: Grade) -> Result<bool> {
        if grade == Grade::Dismiss {
            return self.dismiss().await;
        }
        let current = self.take_current("answer")?;
        self.phase = ReviewPhase::Answering;

        let now = self.clock.now();
        let mut card = current.card.clone();
        let mut review = ReviewLog::begin(&card, grade, current.started_at);
        let action = match self.scheduler.answer(&mut card, grade, now) {
            Ok(action) => action,
            Err(e) => {
                self.restore(current);
                return Err(e);
            }
        };
        review.complete(&card, now);

        if let Err(e) = self.persist(&card, action, review).await {
            self.restore(current);
            return Err(e);
        }

        log::debug!(
            "Card {} answered {} ({:?} -> {:?}), due {}",
            card.id,
            grade.label(),
            current.card.practice_state,
            card.practice_state,
            card.due
        );

        if let Some(queue) = self.queue(current.queue) {
            queue.on_answered(&card);
        }
        if current.queue != QueueKind::Learning && action == CardAction::Update {
            if let Some(learning) = self.queue(QueueKind::Learning) {
                learning.register(&card);
            }
        }
        self.suppress_siblings(&card);

        self.select_next().await
    }

    /// Push the current card to tomorrow without grading it
    pub async fn dismiss(&mut self) -> Result<bool> {
        let current = self.take_current("dismiss")?;
        self.phase = ReviewPhase::Dismissing;

        let now = self.clock.now();
        let mut card = current.card.clone();
        let mut review = ReviewLog::begin(&card, Grade::Dismiss, current.started_at);
        self.scheduler.dismiss(&mut card, now);
        review.complete(&card, now);

        if let Err(e) = self.persist(&card, CardAction::Update, review).await {
            self.restore(current);
            return Err(e);
        }

        log::debug!("Card {} dismissed until {}", card.id, card.due);

        if let Some(queue) = self.queue(current.queue) {
            queue.on_answered(&card);
            queue.dismiss_current();
        }
        self.suppress_siblings(&card);

        self.select_next().await
    }

    /// Cards the selected queues can still hand out this session
    pub fn count_by_state(&self, filter: QueueFilter) -> Result<usize> {
        if self.queues.is_empty() {
            return Err(ReviewError::InvalidState(
                "review session not initialized".into(),
            ));
        }
        let mut total = 0;
        for queue in &self.queues {
            if filter.intersects(queue.kind().filter()) {
                total += queue.review_count()?;
            }
        }
        Ok(total)
    }

    /// Due date each legal grade would give the current card
    pub fn compute_grades(&self) -> Result<Vec<GradeOption>> {
        let current = self
            .current
            .as_ref()
            .ok_or_else(|| ReviewError::InvalidState("no current card".into()))?;
        Ok(self.scheduler.compute_grades(&current.card, self.clock.now()))
    }

    /// Wait for every background write issued so far
    pub async fn flush(&mut self) {
        for handle in self.pending_writes.drain(..) {
            if let Err(e) = handle.await {
                log::error!("Review write task failed: {}", e);
            }
        }
    }

    fn take_current(&mut self, operation: &str) -> Result<CurrentCard> {
        self.current.take().ok_or_else(|| {
            ReviewError::InvalidState(format!("cannot {} without a current card", operation))
        })
    }

    fn restore(&mut self, current: CurrentCard) {
        self.current = Some(current);
        self.phase = ReviewPhase::Ready;
    }

    fn suppress_siblings(&self, card: &Card) {
        // One queue lock at a time
        for queue in &self.queues {
            queue.dismiss_siblings(card);
        }
    }

    /// Write the review log, then the card, then the sibling postponement.
    ///
    /// The log and the card land together or not at all: a failed card write
    /// removes the log again. A failed postponement only costs the siblings
    /// their push to tomorrow, so it is logged and the review stands.
    async fn persist(&mut self, card: &Card, action: CardAction, review: ReviewLog) -> Result<()> {
        let store = Arc::clone(&self.store);
        let card = card.clone();
        let until = self.config.tomorrow(self.clock.now());

        let write = async move {
            store.insert_log(&review).await?;

            let written = match action {
                CardAction::Update => store.update_card(&card).await,
                CardAction::Delete => store.delete(Table::Cards, card.id).await,
            };
            if let Err(e) = written {
                if let Err(undo) = store.delete(Table::ReviewLogs, review.id).await {
                    log::error!("Failed to remove review log {}: {}", review.id, undo);
                }
                return Err(e);
            }

            let postpone = BulkUpdate::PostponeSiblings {
                note_id: card.note_id,
                except: card.id,
                until,
            };
            if let Err(e) = store.bulk_update(&postpone).await {
                log::warn!("Failed to postpone siblings of card {}: {}", card.id, e);
            }
            Ok::<_, store::StoreError>(())
        };

        match self.config.write_policy {
            WritePolicy::AwaitBeforeAdvance => write.await?,
            WritePolicy::FireAndForget => {
                self.pending_writes.retain(|handle| !handle.is_finished());
                self.pending_writes.push(tokio::spawn(async move {
                    if let Err(e) = write.await {
                        log::error!("Failed to persist review: {}", e);
                    }
                }));
            }
        }
        Ok(())
    }

    /// Weighted random draw over the queues' remaining counts
    async fn select_next(&mut self) -> Result<bool> {
        let mut skipped: Vec<QueueKind> = Vec::new();

        loop {
            let mut weights = Vec::with_capacity(self.queues.len());
            for (index, queue) in self.queues.iter().enumerate() {
                if !skipped.contains(&queue.kind()) {
                    weights.push((index, queue.review_count()?));
                }
            }
            let total: usize = weights.iter().map(|(_, weight)| weight).sum();

            if total == 0 {
                let mut grew = false;
                for queue in &self.queues {
                    if !skipped.contains(&queue.kind()) && queue.top_up().await {
                        grew = true;
                    }
                }
                if grew {
                    continue;
                }
                log::info!("Review session exhausted");
                self.current = None;
                self.phase = ReviewPhase::Exhausted;
                return Ok(false);
            }

            let mut roll = self.rng.gen_range(0..total);
            let mut chosen = None;
            for &(index, weight) in &weights {
                if roll < weight {
                    chosen = Some(index);
                    break;
                }
                roll -= weight;
            }
            let Some(queue) = chosen.map(|index| self.queues[index].clone()) else {
                continue;
            };

            if queue.move_next().await {
                if let Some(card) = queue.current() {
                    log::debug!("Next card {} from the {} queue", card.id, queue.kind());
                    self.current = Some(CurrentCard {
                        card,
                        queue: queue.kind(),
                        started_at: self.clock.now(),
                    });
                    self.phase = ReviewPhase::Ready;
                    return Ok(true);
                }
            }

            log::debug!("{} queue could not deliver a card, skipping it", queue.kind());
            skipped.push(queue.kind());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flashcards::clock::ManualClock;
    use crate::flashcards::config::LeechAction;
    use crate::flashcards::memory::MemoryStore;
    use crate::flashcards::models::{CardId, PracticeState};
    use crate::flashcards::testing::{card, now, CountingStore};
    use chrono::Duration;
    use std::collections::HashSet;

    fn awaiting_config() -> CollectionConfig {
        CollectionConfig {
            write_policy: WritePolicy::AwaitBeforeAdvance,
            ..Default::default()
        }
    }

    fn coordinator(
        store: Arc<dyn CardStore>,
        config: CollectionConfig,
    ) -> (ReviewCoordinator, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now()));
        let coordinator = ReviewCoordinator::new(store, Arc::new(config))
            .with_seed(7)
            .with_clock(clock.clone());
        (coordinator, clock)
    }

    /// Answer every card with `grade` until the session runs dry.
    /// Returns each card as it was when surfaced.
    async fn run_session(
        coordinator: &mut ReviewCoordinator,
        clock: &ManualClock,
        grade: Grade,
    ) -> Vec<Card> {
        let mut surfaced = Vec::new();
        let mut more = coordinator.initialize().await.unwrap();
        while more {
            surfaced.push(coordinator.current().unwrap().clone());
            clock.advance(Duration::seconds(1));
            more = coordinator.answer(grade).await.unwrap();
            assert!(surfaced.len() < 1000, "session does not terminate");
        }
        surfaced
    }

    #[tokio::test]
    async fn test_daily_quotas_are_exact() {
        let mut cards = Vec::new();
        for i in 0..30 {
            cards.push(card(i, i, PracticeState::New, now()));
        }
        for i in 100..130 {
            cards.push(card(i, i, PracticeState::Due, now() - Duration::hours(1)));
        }
        let store = Arc::new(MemoryStore::with_cards(cards));
        let config = CollectionConfig {
            new_card_per_day: 10,
            due_card_per_day: 15,
            incremental_load_max: 4,
            incremental_further_load_max: 3,
            ..awaiting_config()
        };
        let (mut coordinator, clock) = coordinator(store.clone(), config.clone());

        let surfaced = run_session(&mut coordinator, &clock, Grade::Good).await;

        let new: HashSet<CardId> = surfaced
            .iter()
            .filter(|c| c.practice_state == PracticeState::New)
            .map(|c| c.id)
            .collect();
        let due: HashSet<CardId> = surfaced
            .iter()
            .filter(|c| c.practice_state == PracticeState::Due)
            .map(|c| c.id)
            .collect();
        assert_eq!(new.len(), 10);
        assert_eq!(due.len(), 15);
        assert_eq!(coordinator.phase(), ReviewPhase::Exhausted);

        // Every new card was learned the same day
        let learning = surfaced.iter().filter(|c| c.practice_state.is_learning()).count();
        assert_eq!(learning, 10);

        // Starting over the same day finds the quotas used up
        let (mut again, _) = coordinator_at(store, config, clock.now());
        assert!(!again.initialize().await.unwrap());
        let session = again.session().unwrap();
        assert_eq!(session.new_quota, 0);
        assert_eq!(session.due_quota, 0);
    }

    fn coordinator_at(
        store: Arc<dyn CardStore>,
        config: CollectionConfig,
        at: DateTime<Utc>,
    ) -> (ReviewCoordinator, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(at));
        let coordinator = ReviewCoordinator::new(store, Arc::new(config))
            .with_seed(11)
            .with_clock(clock.clone());
        (coordinator, clock)
    }

    #[tokio::test]
    async fn test_siblings_are_suppressed_across_queues() {
        let cards = vec![
            card(1, 1, PracticeState::New, now()),
            card(2, 1, PracticeState::New, now()),
            card(3, 1, PracticeState::New, now()),
            card(4, 1, PracticeState::Due, now() - Duration::hours(2)),
            card(5, 5, PracticeState::New, now()),
            card(6, 6, PracticeState::Due, now() - Duration::hours(2)),
        ];
        let store = Arc::new(MemoryStore::with_cards(cards));
        let (mut coordinator, clock) = coordinator(store.clone(), awaiting_config());

        let surfaced = run_session(&mut coordinator, &clock, Grade::Good).await;

        let note_one: HashSet<CardId> = surfaced
            .iter()
            .filter(|c| c.note_id == 1)
            .map(|c| c.id)
            .collect();
        assert_eq!(note_one.len(), 1);
        let answered = *note_one.iter().next().unwrap();

        let ids: HashSet<CardId> = surfaced.iter().map(|c| c.id).collect();
        assert!(ids.contains(&5));
        assert!(ids.contains(&6));

        // The rest of the note is pushed to tomorrow in storage
        let tomorrow = coordinator.config.tomorrow(now());
        for id in [1, 2, 3, 4].into_iter().filter(|&id| id != answered) {
            let sibling = store.card(id).unwrap();
            assert!(sibling.is_dismissed());
            assert!(sibling.due >= tomorrow);
        }
    }

    #[tokio::test]
    async fn test_answer_requires_current_card() {
        let store = Arc::new(MemoryStore::new());
        let (mut coordinator, _) = coordinator(store, CollectionConfig::default());

        assert!(matches!(
            coordinator.answer(Grade::Good).await,
            Err(ReviewError::InvalidState(_))
        ));
        assert!(matches!(
            coordinator.count_by_state(QueueFilter::all()),
            Err(ReviewError::InvalidState(_))
        ));

        assert!(!coordinator.initialize().await.unwrap());
        assert_eq!(coordinator.phase(), ReviewPhase::Exhausted);
        assert!(matches!(
            coordinator.dismiss().await,
            Err(ReviewError::InvalidState(_))
        ));
        assert!(coordinator.compute_grades().is_err());
    }

    #[tokio::test]
    async fn test_count_by_state() {
        let cards = vec![
            card(1, 1, PracticeState::New, now()),
            card(2, 2, PracticeState::New, now()),
            card(3, 3, PracticeState::New, now()),
            card(4, 4, PracticeState::Due, now() - Duration::days(1)),
            card(5, 5, PracticeState::Due, now()),
            card(6, 6, PracticeState::Learning { step: 0 }, now()),
            card(7, 7, PracticeState::Due, now() + Duration::days(5)),
        ];
        let store = Arc::new(MemoryStore::with_cards(cards));
        let (mut coordinator, _) = coordinator(store, CollectionConfig::default());

        assert!(coordinator.initialize().await.unwrap());

        // One card is already current
        let all = coordinator.count_by_state(QueueFilter::all()).unwrap();
        assert_eq!(all, 5);
        let split = coordinator.count_by_state(QueueFilter::NEW).unwrap()
            + coordinator.count_by_state(QueueFilter::LEARNING).unwrap()
            + coordinator.count_by_state(QueueFilter::DUE).unwrap();
        assert_eq!(split, all);
        assert_eq!(
            coordinator.count_by_state(QueueFilter::empty()).unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_new_card_resurfaces_from_learning() {
        let store = Arc::new(MemoryStore::with_cards(vec![card(1, 1, PracticeState::New, now())]));
        let (mut coordinator, clock) = coordinator(store.clone(), awaiting_config());

        assert!(coordinator.initialize().await.unwrap());
        assert_eq!(coordinator.current_queue(), Some(QueueKind::New));

        clock.advance(Duration::seconds(5));
        assert!(coordinator.answer(Grade::Good).await.unwrap());
        assert_eq!(coordinator.current_queue(), Some(QueueKind::Learning));
        assert_eq!(
            coordinator.current().unwrap().practice_state,
            PracticeState::Learning { step: 1 }
        );

        clock.advance(Duration::seconds(5));
        assert!(!coordinator.answer(Grade::Good).await.unwrap());
        assert_eq!(coordinator.phase(), ReviewPhase::Exhausted);

        let stored = store.card(1).unwrap();
        assert_eq!(stored.practice_state, PracticeState::Due);
        assert_eq!(store.query_logs(now()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_dismiss_frees_slot_within_session() {
        let cards = vec![
            card(1, 1, PracticeState::New, now()),
            card(2, 2, PracticeState::New, now()),
        ];
        let store = Arc::new(MemoryStore::with_cards(cards));
        let config = CollectionConfig {
            new_card_per_day: 1,
            learning_steps: vec![60],
            ..awaiting_config()
        };
        let config_copy = config.clone();
        let (mut coordinator, clock) = coordinator(store.clone(), config);

        assert!(coordinator.initialize().await.unwrap());
        let first = coordinator.current().unwrap().id;
        clock.advance(Duration::seconds(1));
        assert!(coordinator.dismiss().await.unwrap());

        let second = coordinator.current().unwrap().id;
        assert_ne!(first, second);

        let dismissed = store.card(first).unwrap();
        assert!(dismissed.is_dismissed());
        assert_eq!(dismissed.practice_state, PracticeState::New);
        let logs = store.query_logs(now()).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].grade, Grade::Dismiss);

        // Easy graduates at once, and the single new slot is now used
        clock.advance(Duration::seconds(1));
        assert!(!coordinator.answer(Grade::Easy).await.unwrap());

        // A later session the same day counts the dismissal as well
        let (mut again, _) = coordinator_at(store, config_copy, clock.now());
        assert!(!again.initialize().await.unwrap());
        assert_eq!(again.session().unwrap().new_quota, -1);
    }

    #[tokio::test]
    async fn test_compute_grades_previews_current() {
        let store = Arc::new(MemoryStore::with_cards(vec![card(
            1,
            1,
            PracticeState::Due,
            now() - Duration::hours(1),
        )]));
        let (mut coordinator, _) = coordinator(store, CollectionConfig::default());
        assert!(coordinator.initialize().await.unwrap());

        let options = coordinator.compute_grades().unwrap();

        let grades: Vec<Grade> = options.iter().map(|o| o.grade).collect();
        assert_eq!(grades, vec![Grade::Fail, Grade::Hard, Grade::Good, Grade::Easy]);
        assert!(options.iter().all(|o| o.due > now()));
        // Previewing leaves the card alone
        assert_eq!(
            coordinator.current().unwrap().practice_state,
            PracticeState::Due
        );
    }

    #[tokio::test]
    async fn test_same_seed_same_session() {
        let cards: Vec<Card> = (0..10)
            .map(|i| card(i, i, PracticeState::New, now()))
            .chain((10..20).map(|i| card(i, i, PracticeState::Due, now() - Duration::hours(1))))
            .collect();

        let mut sequences = Vec::new();
        for _ in 0..2 {
            let store = Arc::new(MemoryStore::with_cards(cards.clone()));
            let (mut coordinator, clock) = coordinator(store, awaiting_config());
            let ids: Vec<CardId> = run_session(&mut coordinator, &clock, Grade::Good)
                .await
                .iter()
                .map(|c| c.id)
                .collect();
            sequences.push(ids);
        }

        assert_eq!(sequences[0], sequences[1]);
        assert!(sequences[0].len() >= 20);
    }

    #[tokio::test]
    async fn test_background_writes_land_after_flush() {
        let store = Arc::new(MemoryStore::with_cards(vec![card(
            1,
            1,
            PracticeState::Due,
            now() - Duration::hours(1),
        )]));
        let (mut coordinator, clock) = coordinator(store.clone(), CollectionConfig::default());

        assert!(coordinator.initialize().await.unwrap());
        clock.advance(Duration::seconds(3));
        assert!(!coordinator.answer(Grade::Good).await.unwrap());
        coordinator.flush().await;

        let stored = store.card(1).unwrap();
        assert!(stored.interval > 1);
        let logs = store.query_logs(now()).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].evaluation_ms, 3000);
    }

    #[tokio::test]
    async fn test_failing_store_ends_session_gracefully() {
        let store = Arc::new(CountingStore::new(MemoryStore::with_cards(vec![card(
            1,
            1,
            PracticeState::New,
            now(),
        )])));
        // Every first load fails
        store.fail_next(3);
        let (mut coordinator, _) = coordinator(store.clone(), CollectionConfig::default());

        let more = coordinator.initialize().await.unwrap();

        // The new queue retries on demand and still delivers the card
        assert!(more);
        assert_eq!(coordinator.current().unwrap().id, 1);
        assert!(store.queries() > 3);
    }

    fn due_store(cards: Vec<Card>) -> Arc<CountingStore> {
        Arc::new(CountingStore::new(MemoryStore::with_cards(cards)))
    }

    #[tokio::test]
    async fn test_failed_log_write_keeps_card_current() {
        let store = due_store(vec![card(1, 1, PracticeState::Due, now() - Duration::hours(1))]);
        store.fail_next_log(1);
        let (mut coordinator, clock) = coordinator(store.clone(), awaiting_config());
        assert!(coordinator.initialize().await.unwrap());

        clock.advance(Duration::seconds(2));
        assert!(matches!(
            coordinator.answer(Grade::Good).await,
            Err(ReviewError::Store(_))
        ));

        // Neither the session nor storage moved on
        assert_eq!(coordinator.phase(), ReviewPhase::Ready);
        let current = coordinator.current().unwrap();
        assert_eq!((current.id, current.interval), (1, 1));
        assert_eq!(store.inner().card(1).unwrap().interval, 1);
        assert!(store.query_logs(now()).await.unwrap().is_empty());

        // Retrying writes both
        assert!(!coordinator.answer(Grade::Good).await.unwrap());
        assert!(store.inner().card(1).unwrap().interval > 1);
        assert_eq!(store.query_logs(now()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_card_write_takes_log_back() {
        let store = due_store(vec![card(1, 1, PracticeState::Due, now() - Duration::hours(1))]);
        store.fail_next_card_write(1);
        let (mut coordinator, clock) = coordinator(store.clone(), awaiting_config());
        assert!(coordinator.initialize().await.unwrap());

        clock.advance(Duration::seconds(2));
        assert!(coordinator.answer(Grade::Good).await.is_err());

        assert_eq!(coordinator.current().unwrap().id, 1);
        assert_eq!(store.inner().card(1).unwrap().interval, 1);
        assert!(store.query_logs(now()).await.unwrap().is_empty());

        // The next session the same day still has the card's slot
        let (mut again, _) = coordinator_at(store, awaiting_config(), clock.now());
        assert!(again.initialize().await.unwrap());
        assert_eq!(
            again.session().unwrap().due_quota,
            CollectionConfig::default().due_card_per_day
        );
    }

    #[tokio::test]
    async fn test_failed_background_write_does_not_stop_session() {
        let store = due_store(vec![
            card(1, 1, PracticeState::Due, now() - Duration::hours(1)),
            card(2, 2, PracticeState::Due, now() - Duration::hours(1)),
        ]);
        store.fail_next_log(1);
        let (mut coordinator, clock) = coordinator(store.clone(), CollectionConfig::default());
        assert!(coordinator.initialize().await.unwrap());

        let first = coordinator.current().unwrap().id;
        clock.advance(Duration::seconds(1));
        assert!(coordinator.answer(Grade::Good).await.unwrap());
        let second = coordinator.current().unwrap().id;
        assert_ne!(first, second);
        coordinator.flush().await;

        // The lost write left the first card untouched
        assert_eq!(store.inner().card(first).unwrap().interval, 1);
        assert!(store.query_logs(now()).await.unwrap().is_empty());

        clock.advance(Duration::seconds(1));
        assert!(!coordinator.answer(Grade::Good).await.unwrap());
        coordinator.flush().await;

        assert!(store.inner().card(second).unwrap().interval > 1);
        let logs = store.query_logs(now()).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].card_id, second);
    }

    #[tokio::test]
    async fn test_leech_is_deleted_and_session_continues() {
        let mut leech = card(1, 1, PracticeState::Due, now() - Duration::hours(1));
        leech.lapses = 1;
        let store = due_store(vec![
            leech,
            card(2, 2, PracticeState::Due, now() - Duration::hours(1)),
        ]);
        let config = CollectionConfig {
            leech_threshold: 2,
            leech_action: LeechAction::Delete,
            ..awaiting_config()
        };
        let (mut coordinator, clock) = coordinator(store.clone(), config);

        let mut answered = Vec::new();
        let mut more = coordinator.initialize().await.unwrap();
        while more {
            let id = coordinator.current().unwrap().id;
            let grade = if id == 1 { Grade::Fail } else { Grade::Good };
            clock.advance(Duration::seconds(1));
            more = coordinator.answer(grade).await.unwrap();
            answered.push(id);
        }

        // The leech never comes back through the learning queue
        answered.sort();
        assert_eq!(answered, vec![1, 2]);
        assert_eq!(coordinator.phase(), ReviewPhase::Exhausted);

        assert!(store.inner().card(1).is_none());
        assert!(store.inner().card(2).is_some());
        let logs = store.query_logs(now()).await.unwrap();
        assert_eq!(logs.len(), 2);
        let leech_log = logs.iter().find(|log| log.card_id == 1).unwrap();
        assert_eq!(leech_log.state_after, PracticeState::Deleted);
    }
}
