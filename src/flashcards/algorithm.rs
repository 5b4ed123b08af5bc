//! Spaced repetition scheduling
//!
//! A deterministic state machine over [`PracticeState`] and [`Grade`]:
//!
//! - New cards enter the learning steps and are treated as learning cards
//!   for the answer that introduced them.
//! - Learning cards advance one step per Hard/Good answer and graduate after
//!   the last step. Easy graduates immediately, a fail restarts the steps.
//! - Due cards grow their interval on a pass. A fail is a lapse: the card
//!   loses ease and goes back to relearning, and may turn into a leech.
//!
//! Interval fuzz is the only source of randomness. It uses a seedable
//! generator so tests can pin it.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::config::{CollectionConfig, LeechAction};
use super::errors::{Result, ReviewError};
use super::models::{Card, CardAction, Grade, GradeOption, MiscState, PracticeState};

/// Grades offered while a card is new or learning
const LEARNING_GRADES: [Grade; 3] = [Grade::Fail, Grade::Good, Grade::Easy];

/// Grades offered once a card is due
const DUE_GRADES: [Grade; 4] = [Grade::Fail, Grade::Hard, Grade::Good, Grade::Easy];

pub struct CardScheduler {
    config: Arc<CollectionConfig>,
    rng: Mutex<StdRng>,
}

impl CardScheduler {
    pub fn new(config: Arc<CollectionConfig>) -> Self {
        Self {
            config,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Scheduler with a reproducible fuzz sequence
    pub fn with_seed(config: Arc<CollectionConfig>, seed: u64) -> Self {
        Self {
            config,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    /// Apply `grade` to `card`, updating its state, due date, interval and ease
    pub fn answer(&self, card: &mut Card, grade: Grade, now: DateTime<Utc>) -> Result<CardAction> {
        if grade == Grade::Dismiss {
            self.dismiss(card, now);
            return Ok(CardAction::Update);
        }

        if card.practice_state == PracticeState::Deleted {
            return Err(deleted(card));
        }
        card.misc_state = MiscState::empty();

        let action = match card.practice_state {
            PracticeState::New => {
                self.update_learning_step(card, true, now);
                self.answer_learning(card, grade, now)
            }
            PracticeState::Learning { .. } => self.answer_learning(card, grade, now),
            PracticeState::Due if grade.is_fail() => self.lapse(card, grade, now)?,
            PracticeState::Due => self.review(card, grade, now)?,
            PracticeState::Deleted => return Err(deleted(card)),
        };

        card.reviews += 1;
        card.last_modified = now;

        Ok(action)
    }

    /// Push the card to tomorrow without grading it
    pub fn dismiss(&self, card: &mut Card, now: DateTime<Utc>) {
        card.misc_state.insert(MiscState::DISMISSED);
        card.due = card.due.max(self.config.tomorrow(now));
        card.last_modified = now;
    }

    /// Due date each legal grade would produce, computed on a copy of the card
    pub fn compute_grades(&self, card: &Card, now: DateTime<Utc>) -> Vec<GradeOption> {
        let grades: &[Grade] = match card.practice_state {
            PracticeState::New | PracticeState::Learning { .. } => &LEARNING_GRADES,
            PracticeState::Due => &DUE_GRADES,
            PracticeState::Deleted => &[],
        };

        grades
            .iter()
            .filter_map(|&grade| {
                let mut preview = card.clone();
                self.answer(&mut preview, grade, now).ok()?;
                Some(GradeOption {
                    grade,
                    due: preview.due,
                })
            })
            .collect()
    }

    /// Fail a due card back into relearning
    pub fn lapse(&self, card: &mut Card, grade: Grade, now: DateTime<Utc>) -> Result<CardAction> {
        if card.practice_state != PracticeState::Due {
            return Err(ReviewError::InvalidArgument(format!(
                "lapse needs a due card, got {:?}",
                card.practice_state
            )));
        }
        let modifier = match grade {
            Grade::FailSevere => self.config.lapse_fail_severe_ease,
            Grade::FailMedium => self.config.lapse_fail_medium_ease,
            Grade::Fail => self.config.lapse_fail_ease,
            other => {
                return Err(ReviewError::InvalidArgument(format!(
                    "lapse needs a failing grade, got {:?}",
                    other
                )));
            }
        };

        card.lapses += 1;
        self.adjust_ease(card, modifier);
        self.update_learning_step(card, true, now);

        if self.is_leech(card) {
            match self.config.leech_action {
                LeechAction::Suspend => {
                    log::info!("Card {} is a leech ({} lapses), suspending", card.id, card.lapses);
                    card.misc_state.insert(MiscState::SUSPENDED);
                }
                LeechAction::Delete => {
                    log::info!("Card {} is a leech ({} lapses), deleting", card.id, card.lapses);
                    card.practice_state = PracticeState::Deleted;
                    return Ok(CardAction::Delete);
                }
            }
        }

        Ok(CardAction::Update)
    }

    /// Pass a due card, growing its interval
    pub fn review(&self, card: &mut Card, grade: Grade, now: DateTime<Utc>) -> Result<CardAction> {
        if card.practice_state != PracticeState::Due {
            return Err(ReviewError::InvalidArgument(format!(
                "review needs a due card, got {:?}",
                card.practice_state
            )));
        }

        let current = card.interval;
        let days_late = (now - card.due).num_days().max(0) as f32;
        let ivl = current as f32;
        let ease = card.e_factor;

        let (raw, modifier) = match grade {
            Grade::Hard => (
                (ivl + days_late / 4.0) * self.config.review_hard_factor,
                self.config.review_hard_ease,
            ),
            Grade::Good => ((ivl + days_late / 2.0) * ease, self.config.review_good_ease),
            Grade::Easy => (
                (ivl + days_late) * ease * self.config.review_easy_bonus,
                self.config.review_easy_ease,
            ),
            other => {
                return Err(ReviewError::InvalidArgument(format!(
                    "review needs a passing grade, got {:?}",
                    other
                )));
            }
        };

        self.adjust_ease(card, modifier);

        let computed = raw.round().max(1.0) as u32;
        let fuzzed = self.fuzz_interval(computed).max(current.saturating_add(1));
        self.set_interval(card, fuzzed, now);

        Ok(CardAction::Update)
    }

    /// Randomize an interval so cards learned together spread out
    pub fn fuzz_interval(&self, interval: u32) -> u32 {
        let (lo, hi) = fuzz_range(interval);
        if lo == hi {
            return lo;
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.gen_range(lo..=hi)
    }

    fn answer_learning(&self, card: &mut Card, grade: Grade, now: DateTime<Utc>) -> CardAction {
        let step = match card.practice_state {
            PracticeState::Learning { step } => step,
            _ => 0,
        };

        if grade.is_fail() {
            if card.lapses > 0 && self.config.relearn_fail_ease_penalty != 0.0 {
                self.adjust_ease(card, -self.config.relearn_fail_ease_penalty);
            }
            self.update_learning_step(card, true, now);
        } else if grade == Grade::Easy {
            self.graduate(card, true, now);
        } else if step + 1 >= self.steps_for(card).len() {
            self.graduate(card, false, now);
        } else {
            self.update_learning_step(card, false, now);
        }

        CardAction::Update
    }

    /// Move to step 0 (`reset`) or to the next step, and schedule it
    fn update_learning_step(&self, card: &mut Card, reset: bool, now: DateTime<Utc>) {
        let step = match (reset, card.practice_state) {
            (false, PracticeState::Learning { step }) => step + 1,
            _ => 0,
        };
        let steps = self.steps_for(card);
        let delay = steps
            .get(step)
            .or_else(|| steps.last())
            .copied()
            .unwrap_or(0);

        card.practice_state = PracticeState::Learning { step };
        card.due = now + Duration::seconds(i64::from(delay));
    }

    fn graduate(&self, card: &mut Card, easy: bool, now: DateTime<Utc>) {
        let interval = if card.lapses > 0 {
            let scaled = (self.config.lapse_interval_factor * card.interval as f32).floor() as u32;
            scaled.max(self.config.lapse_min_interval)
        } else {
            card.e_factor = self.config.graduation_starting_ease;
            if easy {
                self.config.graduation_easy_interval
            } else {
                self.config.graduation_interval
            }
        };

        // Ease must respect the floor even when the starting ease is configured below it
        self.adjust_ease(card, 0.0);
        card.practice_state = PracticeState::Due;
        self.set_interval(card, interval, now);
    }

    fn set_interval(&self, card: &mut Card, interval: u32, now: DateTime<Utc>) {
        card.interval = interval.clamp(1, self.config.review_max_interval);
        card.due = now + Duration::days(i64::from(card.interval));
    }

    fn adjust_ease(&self, card: &mut Card, modifier: f32) {
        card.e_factor = (card.e_factor + modifier).max(self.config.review_min_ease);
    }

    fn steps_for(&self, card: &Card) -> &[u32] {
        if card.lapses > 0 && !self.config.lapse_steps.is_empty() {
            &self.config.lapse_steps
        } else {
            &self.config.learning_steps
        }
    }

    fn is_leech(&self, card: &Card) -> bool {
        let threshold = self.config.leech_threshold;
        if threshold == 0 || card.lapses < threshold {
            return false;
        }
        let every = threshold.div_ceil(2);
        card.lapses % every == 0
    }
}

/// Inclusive range an interval is fuzzed within
pub fn fuzz_range(interval: u32) -> (u32, u32) {
    if interval < 2 {
        return (interval, interval);
    }
    if interval == 2 {
        return (2, 3);
    }

    let (pct, floor) = if interval < 7 {
        (0.25, 1)
    } else if interval < 30 {
        (0.15, 2)
    } else {
        (0.05, 4)
    };
    let delta = ((interval as f32 * pct).round() as u32).max(floor);

    (interval.saturating_sub(delta).max(2), interval.saturating_add(delta))
}

fn deleted(card: &Card) -> ReviewError {
    ReviewError::InvalidState(format!("card {} has been deleted", card.id))
}
