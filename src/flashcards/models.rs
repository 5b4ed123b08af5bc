//! Data models for the review system

use bitflags::bitflags;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Card identifier: the card's creation timestamp in milliseconds
pub type CardId = i64;

/// Identifier shared by all cards generated from the same note
pub type NoteId = i64;

/// Where a card sits in the learning process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PracticeState {
    /// Never reviewed
    New,
    /// Working through the learning (or relearning) steps
    Learning { step: usize },
    /// Graduated, reviewed on an interval in days
    Due,
    /// Removed by the leech handler
    Deleted,
}

impl Default for PracticeState {
    fn default() -> Self {
        Self::New
    }
}

impl PracticeState {
    pub fn is_learning(&self) -> bool {
        matches!(self, Self::Learning { .. })
    }

    /// The filter bit matching this state
    pub fn filter(&self) -> QueueFilter {
        match self {
            Self::New => QueueFilter::NEW,
            Self::Learning { .. } => QueueFilter::LEARNING,
            Self::Due => QueueFilter::DUE,
            Self::Deleted => QueueFilter::empty(),
        }
    }
}

bitflags! {
    /// Flags orthogonal to the practice state
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct MiscState: u8 {
        const SUSPENDED = 0b01;
        const DISMISSED = 0b10;
    }
}

bitflags! {
    /// Selects practice states, both for store queries and queue counts
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct QueueFilter: u8 {
        const NEW = 0b001;
        const LEARNING = 0b010;
        const DUE = 0b100;
    }
}

/// An answer given to a card, from worst to best
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Grade {
    /// Skip the card until tomorrow without grading it
    Dismiss,
    FailSevere,
    FailMedium,
    Fail,
    Hard,
    Good,
    Easy,
}

impl Grade {
    pub fn is_fail(&self) -> bool {
        matches!(self, Self::FailSevere | Self::FailMedium | Self::Fail)
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Hard | Self::Good | Self::Easy)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Dismiss => "Dismiss",
            Self::FailSevere => "Fail (severe)",
            Self::FailMedium => "Fail (medium)",
            Self::Fail => "Fail",
            Self::Hard => "Hard",
            Self::Good => "Good",
            Self::Easy => "Easy",
        }
    }
}

/// What the caller must do with a card after it was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardAction {
    Update,
    Delete,
}

/// A flashcard's review state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: CardId,
    pub note_id: NoteId,
    pub due: DateTime<Utc>,
    #[serde(default)]
    pub practice_state: PracticeState,
    #[serde(default)]
    pub misc_state: MiscState,
    /// Ease multiplier, 0 until the card first graduates
    #[serde(default)]
    pub e_factor: f32,
    /// Interval in days, 0 until the card first graduates
    #[serde(default)]
    pub interval: u32,
    #[serde(default)]
    pub reviews: u32,
    #[serde(default)]
    pub lapses: u32,
    pub last_modified: DateTime<Utc>,
    /// Opaque payload. `None` on shallow loads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Card {
    /// Create a new card, immediately available for review
    pub fn new(id: CardId, note_id: NoteId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            note_id,
            due: now,
            practice_state: PracticeState::New,
            misc_state: MiscState::empty(),
            e_factor: 0.0,
            interval: 0,
            reviews: 0,
            lapses: 0,
            last_modified: now,
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_suspended(&self) -> bool {
        self.misc_state.contains(MiscState::SUSPENDED)
    }

    pub fn is_dismissed(&self) -> bool {
        self.misc_state.contains(MiscState::DISMISSED)
    }

    /// Copy of the card without its payload, as returned by shallow loads
    pub fn shallow(&self) -> Self {
        Self {
            data: None,
            ..self.clone()
        }
    }
}

/// One legal answer for a card along with the due date it would produce
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeOption {
    pub grade: Grade,
    pub due: DateTime<Utc>,
}

/// Append-only record of a single review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewLog {
    /// Review start timestamp in milliseconds
    pub id: i64,
    pub card_id: CardId,
    pub grade: Grade,
    pub due_before: DateTime<Utc>,
    pub due_after: DateTime<Utc>,
    pub state_before: PracticeState,
    pub state_after: PracticeState,
    pub interval_before: u32,
    pub interval_after: u32,
    pub e_factor_before: f32,
    pub e_factor_after: f32,
    /// Time spent on the card, in milliseconds
    pub evaluation_ms: i64,
}

impl ReviewLog {
    /// Snapshot the card's pre-answer fields
    pub fn begin(card: &Card, grade: Grade, started_at: DateTime<Utc>) -> Self {
        Self {
            id: started_at.timestamp_millis(),
            card_id: card.id,
            grade,
            due_before: card.due,
            due_after: card.due,
            state_before: card.practice_state,
            state_after: card.practice_state,
            interval_before: card.interval,
            interval_after: card.interval,
            e_factor_before: card.e_factor,
            e_factor_after: card.e_factor,
            evaluation_ms: 0,
        }
    }

    /// Fill in the post-answer fields
    pub fn complete(&mut self, card: &Card, finished_at: DateTime<Utc>) {
        self.due_after = card.due;
        self.state_after = card.practice_state;
        self.interval_after = card.interval;
        self.e_factor_after = card.e_factor;
        self.evaluation_ms = (finished_at.timestamp_millis() - self.id).max(0);
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.id)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// The three review queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueueKind {
    New,
    Learning,
    Due,
}

impl QueueKind {
    pub const ALL: [QueueKind; 3] = [QueueKind::New, QueueKind::Learning, QueueKind::Due];

    pub fn filter(&self) -> QueueFilter {
        match self {
            Self::New => QueueFilter::NEW,
            Self::Learning => QueueFilter::LEARNING,
            Self::Due => QueueFilter::DUE,
        }
    }
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Learning => write!(f, "learning"),
            Self::Due => write!(f, "due"),
        }
    }
}
