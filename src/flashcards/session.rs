//! Daily review quotas

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::config::CollectionConfig;
use super::models::{PracticeState, ReviewLog};
use super::store::{CardStore, Result};

/// What is left of today's quotas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSession {
    pub day_start: DateTime<Utc>,
    /// New cards still allowed today. Zero or negative once exhausted.
    pub new_quota: i32,
    /// Due cards still allowed today. Zero or negative once exhausted.
    pub due_quota: i32,
}

impl ReviewSession {
    /// Subtract today's logged reviews of New and Due cards, dismissals
    /// included, from the daily quotas.
    pub fn compute(logs: &[ReviewLog], config: &CollectionConfig, day_start: DateTime<Utc>) -> Self {
        let today = logs
            .iter()
            .filter(|log| log.id >= day_start.timestamp_millis());

        let (mut new_done, mut due_done) = (0i32, 0i32);
        for log in today {
            match log.state_before {
                PracticeState::New => new_done += 1,
                PracticeState::Due => due_done += 1,
                _ => {}
            }
        }

        Self {
            day_start,
            new_quota: config.new_card_per_day - new_done,
            due_quota: config.due_card_per_day - due_done,
        }
    }

    /// Read today's logs from the store and compute the session
    pub async fn load(
        store: &dyn CardStore,
        config: &CollectionConfig,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let day_start = config.day_start(now);
        let logs = store.query_logs(day_start).await?;
        Ok(Self::compute(&logs, config, day_start))
    }

    /// Quota as a card count, zero when exhausted
    pub fn new_limit(&self) -> usize {
        self.new_quota.max(0) as usize
    }

    pub fn due_limit(&self) -> usize {
        self.due_quota.max(0) as usize
    }
}
