//! Durable side of the crawl: what gets stored for an accepted player and the
//! stores that hold it.

pub mod in_memory;
pub mod sqlite;
pub mod traits;

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::ProfileStore;

use crate::error::Result;
use crate::types::{FieldKey, PlayerIdentity, PlayerRecord, TimeControl};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingSummary {
    pub rating: Option<i64>,
    pub games: Option<i64>,
}

/// One row of the profiles table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredProfile {
    pub username: PlayerIdentity,
    pub display_name: Option<String>,
    pub player_id: Option<i64>,
    pub status: Option<String>,
    pub joined: Option<i64>,
    pub puzzle_rush_best: Option<i64>,
    pub ratings: BTreeMap<TimeControl, RatingSummary>,
    pub puzzle_rating: Option<i64>,
    pub puzzle_attempts: Option<i64>,
    pub puzzle_seconds: Option<i64>,
    pub retrieved_at: DateTime<Utc>,
}

impl StoredProfile {
    pub fn from_record(record: &PlayerRecord) -> Self {
        let ratings = TimeControl::ALL
            .into_iter()
            .filter_map(|tc| {
                let summary = RatingSummary {
                    rating: record.rating(tc),
                    games: record.games_played(tc),
                };
                (summary != RatingSummary::default()).then_some((tc, summary))
            })
            .collect();

        Self {
            username: record.identity().clone(),
            display_name: record.text(FieldKey::Username).map(str::to_string),
            player_id: record.int(FieldKey::PlayerId),
            status: record.status().map(str::to_string),
            joined: record.int(FieldKey::Joined),
            puzzle_rush_best: record.int(FieldKey::PuzzleRushBest),
            ratings,
            puzzle_rating: record.int(FieldKey::PuzzleRating),
            puzzle_attempts: record.int(FieldKey::PuzzleAttempts),
            puzzle_seconds: record.int(FieldKey::PuzzleSeconds),
            retrieved_at: Utc::now(),
        }
    }

    pub fn rating(&self, tc: TimeControl) -> Option<i64> {
        self.ratings.get(&tc).and_then(|s| s.rating)
    }

    pub fn games(&self, tc: TimeControl) -> Option<i64> {
        self.ratings.get(&tc).and_then(|s| s.games)
    }

    /// SHA-256 over everything but the retrieval time, hex encoded.
    pub fn content_hash(&self) -> Result<String> {
        let mut content = serde_json::to_value(self)?;
        if let Some(obj) = content.as_object_mut() {
            obj.remove("retrieved_at");
        }
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(&content)?);
        Ok(hex::encode(hasher.finalize()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}
