//! # Place Journal
//!
//! Per-participant search history and saved places, kept in the session's
//! local store. History holds the newest 20 searches; favorites hold the
//! newest 30 places, one per name.

use crate::error::GemResult;
use crate::geo::Coordinate;
use crate::session::{KeyValueStore, Session};
use crate::utils::current_timestamp;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub const MAX_SEARCHES: usize = 20;
pub const MAX_FAVORITES: usize = 30;

/// A city lookup or question the participant asked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchEntry {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    /// Unix seconds; filled in on record when zero
    #[serde(default)]
    pub timestamp: u64,
}

impl SearchEntry {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            city: None,
            timestamp: 0,
        }
    }
}

/// A place the participant bookmarked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FavoritePlace {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Coordinate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub saved_at: u64,
}

/// History and favorites for the session's participant.
pub struct PlaceJournal {
    store: Arc<dyn KeyValueStore>,
    searches_key: String,
    favorites_key: String,
}

impl PlaceJournal {
    pub fn new(session: &Session) -> Self {
        let participant = session.participant_id();
        Self {
            store: session.store().clone(),
            searches_key: format!("journal:{participant}:searches"),
            favorites_key: format!("journal:{participant}:favorites"),
        }
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> GemResult<Vec<T>> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(Vec::new());
        };
        Ok(serde_json::from_str(&raw).unwrap_or_else(|e| {
            debug!("Discarding unreadable journal entry {}: {}", key, e);
            Vec::new()
        }))
    }

    async fn save<T: Serialize>(&self, key: &str, items: &[T]) -> GemResult<()> {
        let raw = serde_json::to_string(items)?;
        self.store.set(key, &raw).await
    }

    /// Puts `entry` at the front of the history.
    pub async fn record_search(&self, mut entry: SearchEntry) -> GemResult<()> {
        if entry.timestamp == 0 {
            entry.timestamp = current_timestamp();
        }
        let mut history: Vec<SearchEntry> = self.load(&self.searches_key).await?;
        history.insert(0, entry);
        history.truncate(MAX_SEARCHES);
        self.save(&self.searches_key, &history).await
    }

    /// Newest first.
    pub async fn searches(&self) -> GemResult<Vec<SearchEntry>> {
        self.load(&self.searches_key).await
    }

    /// Saves `place` unless its name is blank or already saved. Returns
    /// whether anything was added.
    pub async fn save_favorite(&self, mut place: FavoritePlace) -> GemResult<bool> {
        if place.name.trim().is_empty() {
            return Ok(false);
        }
        let mut favorites: Vec<FavoritePlace> = self.load(&self.favorites_key).await?;
        if favorites.iter().any(|fav| fav.name == place.name) {
            return Ok(false);
        }

        place.saved_at = current_timestamp();
        favorites.insert(0, place);
        favorites.truncate(MAX_FAVORITES);
        self.save(&self.favorites_key, &favorites).await?;
        Ok(true)
    }

    /// Newest first.
    pub async fn favorites(&self) -> GemResult<Vec<FavoritePlace>> {
        self.load(&self.favorites_key).await
    }
}
