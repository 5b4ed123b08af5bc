use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use nous_review::flashcards::{
    Card, CardId, CardQuery, CardStore, CollectionConfig, FileStore, QueueFilter,
    ReviewCoordinator,
};

/// Shared application state for CLI commands
pub struct App {
    pub store: Arc<FileStore>,
    pub config: Arc<CollectionConfig>,
    pub seed: Option<u64>,
}

impl App {
    pub fn new(collection: Option<&Path>, config: Option<&Path>, seed: Option<u64>) -> Result<Self> {
        let dir = match collection {
            Some(dir) => dir.to_path_buf(),
            None => Self::default_collection_dir()?,
        };
        let store = FileStore::open(&dir)
            .with_context(|| format!("Failed to open collection at {}", dir.display()))?;

        let config_path = match config {
            Some(path) => path.to_path_buf(),
            None => dir.join("config.toml"),
        };
        let config = CollectionConfig::load(&config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

        Ok(Self {
            store: Arc::new(store),
            config: Arc::new(config),
            seed,
        })
    }

    pub fn default_collection_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_dir().context("Failed to get data directory")?;
        Ok(data_dir.join("nous").join("review"))
    }

    /// A review session over the collection
    pub fn coordinator(&self) -> ReviewCoordinator {
        let store: Arc<dyn CardStore> = self.store.clone();
        let coordinator = ReviewCoordinator::new(store, Arc::clone(&self.config));
        match self.seed {
            Some(seed) => coordinator.with_seed(seed),
            None => coordinator,
        }
    }

    /// Every live card, suspended ones included
    pub async fn all_cards(&self) -> Result<Vec<Card>> {
        let mut query = CardQuery::new(QueueFilter::all());
        query.include_suspended = true;
        self.store
            .query_cards(&query)
            .await
            .context("Failed to list cards")
    }

    pub fn find_card(&self, id: CardId) -> Result<Card> {
        self.store
            .snapshot()
            .cards
            .remove(&id)
            .with_context(|| format!("No card with id {}", id))
    }
}
