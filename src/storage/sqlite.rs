use super::traits::ProfileStore;
use super::{RatingSummary, StoredProfile, UpsertOutcome};
use crate::error::{CrawlerError, Result};
use crate::types::{PlayerIdentity, RatingPoint, TimeControl};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS profiles (
    row_id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL,
    display_name TEXT,
    player_id INTEGER,
    status TEXT,
    joined INTEGER,
    puzzle_rush_best INTEGER,
    bullet_rating INTEGER,
    bullet_games INTEGER,
    blitz_rating INTEGER,
    blitz_games INTEGER,
    rapid_rating INTEGER,
    rapid_games INTEGER,
    daily_rating INTEGER,
    daily_games INTEGER,
    puzzle_rating INTEGER,
    puzzle_attempts INTEGER,
    puzzle_seconds INTEGER,
    retrieved_at TEXT NOT NULL,
    content_hash TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS rating_history (
    username TEXT NOT NULL,
    time_control TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    rating INTEGER NOT NULL,
    PRIMARY KEY (username, time_control, timestamp)
);
";

const UNIQUE_USERNAME: &str =
    "CREATE UNIQUE INDEX IF NOT EXISTS profiles_username ON profiles (username)";

const PROFILE_COLUMNS: &str = "username, display_name, player_id, status, joined, puzzle_rush_best, \
     bullet_rating, bullet_games, blitz_rating, blitz_games, rapid_rating, rapid_games, \
     daily_rating, daily_games, puzzle_rating, puzzle_attempts, puzzle_seconds, retrieved_at";

/// SQLite-backed profile store. One connection guarded by a mutex; the crawl
/// writes from a single task.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        info!("Opening profile database at {}", path.display());
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        // Older databases may hold duplicate usernames; `dedupe` fixes them.
        if let Err(e) = conn.execute(UNIQUE_USERNAME, []) {
            warn!(
                "profiles table has duplicate usernames, run `dedupe` to repair: {}",
                e
            );
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CrawlerError::Storage("sqlite connection lock poisoned".into()))
    }
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<StoredProfile> {
    let username: String = row.get(0)?;
    let username = PlayerIdentity::new(username)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;
    let retrieved_at: String = row.get(17)?;
    let retrieved_at = DateTime::parse_from_rfc3339(&retrieved_at)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(17, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);

    let mut ratings = BTreeMap::new();
    for (i, tc) in TimeControl::ALL.into_iter().enumerate() {
        let summary = RatingSummary {
            rating: row.get(6 + 2 * i)?,
            games: row.get(7 + 2 * i)?,
        };
        if summary != RatingSummary::default() {
            ratings.insert(tc, summary);
        }
    }

    Ok(StoredProfile {
        username,
        display_name: row.get(1)?,
        player_id: row.get(2)?,
        status: row.get(3)?,
        joined: row.get(4)?,
        puzzle_rush_best: row.get(5)?,
        ratings,
        puzzle_rating: row.get(14)?,
        puzzle_attempts: row.get(15)?,
        puzzle_seconds: row.get(16)?,
        retrieved_at,
    })
}

#[async_trait]
impl ProfileStore for SqliteStore {
    async fn upsert_profile(&self, profile: &StoredProfile) -> Result<UpsertOutcome> {
        let hash = profile.content_hash()?;
        let retrieved_at = profile.retrieved_at.to_rfc3339();
        let conn = self.conn()?;

        let existing: Option<(i64, String)> = conn
            .query_row(
                "SELECT row_id, content_hash FROM profiles WHERE username = ?1
                 ORDER BY row_id DESC LIMIT 1",
                params![profile.username.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let outcome = match existing {
            Some((row_id, existing_hash)) if existing_hash == hash => {
                conn.execute(
                    "UPDATE profiles SET retrieved_at = ?1 WHERE row_id = ?2",
                    params![retrieved_at, row_id],
                )?;
                UpsertOutcome::Unchanged
            }
            Some((row_id, _)) => {
                conn.execute(
                    "UPDATE profiles SET display_name = ?1, player_id = ?2, status = ?3, joined = ?4,
                        puzzle_rush_best = ?5, bullet_rating = ?6, bullet_games = ?7,
                        blitz_rating = ?8, blitz_games = ?9, rapid_rating = ?10, rapid_games = ?11,
                        daily_rating = ?12, daily_games = ?13, puzzle_rating = ?14,
                        puzzle_attempts = ?15, puzzle_seconds = ?16, retrieved_at = ?17,
                        content_hash = ?18
                     WHERE row_id = ?19",
                    params![
                        profile.display_name,
                        profile.player_id,
                        profile.status,
                        profile.joined,
                        profile.puzzle_rush_best,
                        profile.rating(TimeControl::Bullet),
                        profile.games(TimeControl::Bullet),
                        profile.rating(TimeControl::Blitz),
                        profile.games(TimeControl::Blitz),
                        profile.rating(TimeControl::Rapid),
                        profile.games(TimeControl::Rapid),
                        profile.rating(TimeControl::Daily),
                        profile.games(TimeControl::Daily),
                        profile.puzzle_rating,
                        profile.puzzle_attempts,
                        profile.puzzle_seconds,
                        retrieved_at,
                        hash,
                        row_id,
                    ],
                )?;
                UpsertOutcome::Updated
            }
            None => {
                conn.execute(
                    &format!(
                        "INSERT INTO profiles ({PROFILE_COLUMNS}, content_hash)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)"
                    ),
                    params![
                        profile.username.as_str(),
                        profile.display_name,
                        profile.player_id,
                        profile.status,
                        profile.joined,
                        profile.puzzle_rush_best,
                        profile.rating(TimeControl::Bullet),
                        profile.games(TimeControl::Bullet),
                        profile.rating(TimeControl::Blitz),
                        profile.games(TimeControl::Blitz),
                        profile.rating(TimeControl::Rapid),
                        profile.games(TimeControl::Rapid),
                        profile.rating(TimeControl::Daily),
                        profile.games(TimeControl::Daily),
                        profile.puzzle_rating,
                        profile.puzzle_attempts,
                        profile.puzzle_seconds,
                        retrieved_at,
                        hash,
                    ],
                )?;
                UpsertOutcome::Inserted
            }
        };
        debug!("upserted {} ({:?})", profile.username, outcome);
        Ok(outcome)
    }

    async fn get_profile(&self, username: &PlayerIdentity) -> Result<Option<StoredProfile>> {
        let conn = self.conn()?;
        let profile = conn
            .query_row(
                &format!(
                    "SELECT {PROFILE_COLUMNS} FROM profiles WHERE username = ?1
                     ORDER BY row_id DESC LIMIT 1"
                ),
                params![username.as_str()],
                profile_from_row,
            )
            .optional()?;
        Ok(profile)
    }

    async fn count_profiles(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(DISTINCT username) FROM profiles", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    async fn latest_profile(&self) -> Result<Option<StoredProfile>> {
        let conn = self.conn()?;
        let profile = conn
            .query_row(
                &format!(
                    "SELECT {PROFILE_COLUMNS} FROM profiles
                     ORDER BY retrieved_at DESC, row_id DESC LIMIT 1"
                ),
                [],
                profile_from_row,
            )
            .optional()?;
        Ok(profile)
    }

    async fn identities(&self) -> Result<Vec<PlayerIdentity>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT DISTINCT username FROM profiles ORDER BY username")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        names.into_iter().map(PlayerIdentity::new).collect()
    }

    async fn upsert_rating_history(
        &self,
        username: &PlayerIdentity,
        time_control: TimeControl,
        points: &[RatingPoint],
    ) -> Result<usize> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "INSERT INTO rating_history (username, time_control, timestamp, rating)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (username, time_control, timestamp) DO UPDATE SET rating = excluded.rating",
        )?;
        for point in points {
            stmt.execute(params![
                username.as_str(),
                time_control.as_str(),
                point.timestamp,
                point.rating
            ])?;
        }
        Ok(points.len())
    }

    async fn rating_history(
        &self,
        username: &PlayerIdentity,
        time_control: TimeControl,
    ) -> Result<Vec<RatingPoint>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, rating FROM rating_history
             WHERE username = ?1 AND time_control = ?2 ORDER BY timestamp",
        )?;
        let points = stmt
            .query_map(params![username.as_str(), time_control.as_str()], |row| {
                Ok(RatingPoint {
                    timestamp: row.get(0)?,
                    rating: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(points)
    }

    async fn remove_duplicate_profiles(&self) -> Result<usize> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM profiles WHERE row_id NOT IN
                (SELECT MAX(row_id) FROM profiles GROUP BY username)",
            [],
        )?;
        conn.execute(UNIQUE_USERNAME, [])?;
        info!("Removed {} duplicate profile row(s)", removed);
        Ok(removed)
    }

    async fn begin(&self) -> Result<()> {
        self.conn()?.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.conn()?.execute_batch("COMMIT")?;
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let conn = self.conn()?;
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    fn is_transactional(&self) -> bool {
        true
    }
}
