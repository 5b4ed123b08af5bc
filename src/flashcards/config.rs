//! Per-collection scheduling configuration

use std::path::Path;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::ReviewError;

/// What happens to a card once it becomes a leech
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum LeechAction {
    #[default]
    Suspend,
    Delete,
}

/// Order in which new cards are introduced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum NewCardOrder {
    /// Creation order
    #[default]
    Sequential,
    Random,
}

/// When card and log writes happen relative to handing out the next card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum WritePolicy {
    /// Spawn the write and move on. A crash before it lands loses the review.
    #[default]
    FireAndForget,
    /// Wait for the write before selecting the next card
    AwaitBeforeAdvance,
}

/// Scheduling tunables, fixed for the duration of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionConfig {
    /// Learning step delays in seconds, ascending
    #[serde(default = "default_learning_steps")]
    pub learning_steps: Vec<u32>,
    /// Relearning step delays in seconds. Falls back to `learning_steps` when empty.
    #[serde(default = "default_lapse_steps")]
    pub lapse_steps: Vec<u32>,

    #[serde(default = "default_graduation_interval")]
    pub graduation_interval: u32,
    #[serde(default = "default_graduation_easy_interval")]
    pub graduation_easy_interval: u32,
    #[serde(default = "default_starting_ease")]
    pub graduation_starting_ease: f32,

    #[serde(default = "default_lapse_min_interval")]
    pub lapse_min_interval: u32,
    #[serde(default)]
    pub lapse_interval_factor: f32,
    #[serde(default = "default_lapse_fail_severe_ease")]
    pub lapse_fail_severe_ease: f32,
    #[serde(default = "default_lapse_fail_medium_ease")]
    pub lapse_fail_medium_ease: f32,
    #[serde(default = "default_lapse_fail_ease")]
    pub lapse_fail_ease: f32,

    #[serde(default = "default_review_hard_ease")]
    pub review_hard_ease: f32,
    #[serde(default)]
    pub review_good_ease: f32,
    #[serde(default = "default_review_easy_ease")]
    pub review_easy_ease: f32,
    #[serde(default = "default_review_hard_factor")]
    pub review_hard_factor: f32,
    #[serde(default = "default_review_easy_bonus")]
    pub review_easy_bonus: f32,
    #[serde(default = "default_review_min_ease")]
    pub review_min_ease: f32,
    #[serde(default = "default_review_max_interval")]
    pub review_max_interval: u32,

    /// Extra ease penalty when a relearning card fails again. 0 disables it.
    #[serde(default)]
    pub relearn_fail_ease_penalty: f32,

    /// Lapses before a card is treated as a leech. 0 disables leech handling.
    #[serde(default = "default_leech_threshold")]
    pub leech_threshold: u32,
    #[serde(default)]
    pub leech_action: LeechAction,

    #[serde(default = "default_new_card_per_day")]
    pub new_card_per_day: i32,
    #[serde(default = "default_due_card_per_day")]
    pub due_card_per_day: i32,
    #[serde(default)]
    pub new_card_order: NewCardOrder,

    /// Rows fetched by each load-more, and extra rows on the first load
    #[serde(default = "default_incremental_load_max")]
    pub incremental_load_max: usize,
    /// Rows fully hydrated per batch
    #[serde(default = "default_incremental_further_load_max")]
    pub incremental_further_load_max: usize,
    /// Hydrate ahead once fewer hydrated cards than this remain
    #[serde(default = "default_incremental_further_load_min")]
    pub incremental_further_load_min: usize,

    #[serde(default)]
    pub write_policy: WritePolicy,
    /// UTC hour at which the review day rolls over
    #[serde(default = "default_day_starts_at_hour")]
    pub day_starts_at_hour: u32,
}

fn default_learning_steps() -> Vec<u32> {
    vec![60, 600]
}

fn default_lapse_steps() -> Vec<u32> {
    vec![600]
}

fn default_graduation_interval() -> u32 {
    1
}

fn default_graduation_easy_interval() -> u32 {
    4
}

fn default_starting_ease() -> f32 {
    2.5
}

fn default_lapse_min_interval() -> u32 {
    1
}

fn default_lapse_fail_severe_ease() -> f32 {
    -0.3
}

fn default_lapse_fail_medium_ease() -> f32 {
    -0.25
}

fn default_lapse_fail_ease() -> f32 {
    -0.2
}

fn default_review_hard_ease() -> f32 {
    -0.15
}

fn default_review_easy_ease() -> f32 {
    0.15
}

fn default_review_hard_factor() -> f32 {
    1.2
}

fn default_review_easy_bonus() -> f32 {
    1.3
}

fn default_review_min_ease() -> f32 {
    1.3
}

fn default_review_max_interval() -> u32 {
    36500
}

fn default_leech_threshold() -> u32 {
    8
}

fn default_new_card_per_day() -> i32 {
    20
}

fn default_due_card_per_day() -> i32 {
    200
}

fn default_incremental_load_max() -> usize {
    50
}

fn default_incremental_further_load_max() -> usize {
    10
}

fn default_incremental_further_load_min() -> usize {
    3
}

fn default_day_starts_at_hour() -> u32 {
    4
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            learning_steps: default_learning_steps(),
            lapse_steps: default_lapse_steps(),
            graduation_interval: default_graduation_interval(),
            graduation_easy_interval: default_graduation_easy_interval(),
            graduation_starting_ease: default_starting_ease(),
            lapse_min_interval: default_lapse_min_interval(),
            lapse_interval_factor: 0.0,
            lapse_fail_severe_ease: default_lapse_fail_severe_ease(),
            lapse_fail_medium_ease: default_lapse_fail_medium_ease(),
            lapse_fail_ease: default_lapse_fail_ease(),
            review_hard_ease: default_review_hard_ease(),
            review_good_ease: 0.0,
            review_easy_ease: default_review_easy_ease(),
            review_hard_factor: default_review_hard_factor(),
            review_easy_bonus: default_review_easy_bonus(),
            review_min_ease: default_review_min_ease(),
            review_max_interval: default_review_max_interval(),
            relearn_fail_ease_penalty: 0.0,
            leech_threshold: default_leech_threshold(),
            leech_action: LeechAction::default(),
            new_card_per_day: default_new_card_per_day(),
            due_card_per_day: default_due_card_per_day(),
            new_card_order: NewCardOrder::default(),
            incremental_load_max: default_incremental_load_max(),
            incremental_further_load_max: default_incremental_further_load_max(),
            incremental_further_load_min: default_incremental_further_load_min(),
            write_policy: WritePolicy::default(),
            day_starts_at_hour: default_day_starts_at_hour(),
        }
    }
}

impl CollectionConfig {
    /// Parse a (possibly partial) TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ReviewError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ReviewError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ReviewError> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| ReviewError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ReviewError> {
        if self.learning_steps.is_empty() {
            return Err(ReviewError::Config("learningSteps must not be empty".into()));
        }
        if self.learning_steps.windows(2).any(|w| w[0] > w[1])
            || self.lapse_steps.windows(2).any(|w| w[0] > w[1])
        {
            return Err(ReviewError::Config("step delays must be ascending".into()));
        }
        if self.review_min_ease <= 0.0 {
            return Err(ReviewError::Config("reviewMinEase must be positive".into()));
        }
        if self.review_max_interval == 0 {
            return Err(ReviewError::Config("reviewMaxInterval must be at least 1".into()));
        }
        if self.day_starts_at_hour > 23 {
            return Err(ReviewError::Config("dayStartsAtHour must be below 24".into()));
        }
        Ok(())
    }

    /// Start of the review day containing `now`
    pub fn day_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let rollover = Duration::hours(i64::from(self.day_starts_at_hour));
        let shifted = now - rollover;
        shifted.date_naive().and_time(NaiveTime::MIN).and_utc() + rollover
    }

    /// Start of the next review day
    pub fn tomorrow(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.day_start(now) + Duration::days(1)
    }
}
