use anyhow::Result;
use async_trait::async_trait;
use chess_crawler::error::CrawlerError;
use chess_crawler::pipeline::save::{ProfileSaver, RatingHistorySaver};
use chess_crawler::pipeline::{Saver, SaverPipeline};
use chess_crawler::retry::RetryPolicy;
use chess_crawler::storage::{ProfileStore, SqliteStore, StoredProfile, UpsertOutcome};
use chess_crawler::types::{
    FieldKey, FieldSet, FieldValue, PlayerIdentity, PlayerRecord, RatingPoint, TimeControl,
};
use rusqlite::Connection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        backoff_base: Duration::from_millis(1),
        timeout: Duration::from_secs(5),
    }
}

fn record(name: &str, rapid: i64) -> PlayerRecord {
    let mut record = PlayerRecord::new(PlayerIdentity::new(name).unwrap());
    record.merge(
        FieldSet::new()
            .with(FieldKey::Username, FieldValue::Text(name.to_string()))
            .with(FieldKey::Status, FieldValue::Text("premium".into()))
            .with(FieldKey::Rating(TimeControl::Rapid), FieldValue::Int(rapid))
            .with(FieldKey::GamesPlayed(TimeControl::Rapid), FieldValue::Int(120))
            .with(
                FieldKey::RatingHistory(TimeControl::Rapid),
                FieldValue::History(vec![
                    RatingPoint { timestamp: 1_700_000_000, rating: rapid - 20 },
                    RatingPoint { timestamp: 1_700_086_400, rating: rapid },
                ]),
            ),
    );
    record
}

/// Fails the first call, then succeeds.
struct FailOnce {
    failed: AtomicBool,
}

#[async_trait]
impl Saver for FailOnce {
    fn name(&self) -> String {
        "fail_once".into()
    }

    async fn save(
        &self,
        _: &PlayerRecord,
        _: &StoredProfile,
        _: &dyn ProfileStore,
    ) -> chess_crawler::Result<()> {
        if self.failed.swap(true, Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CrawlerError::Storage("disk full".into()))
        }
    }
}

#[tokio::test]
async fn test_upsert_is_idempotent_on_disk() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("data").join("profiles.db");
    let store = SqliteStore::open(&path)?;

    let profile = StoredProfile::from_record(&record("MagnusCarlsen", 2800));
    assert_eq!(store.upsert_profile(&profile).await?, UpsertOutcome::Inserted);
    assert_eq!(store.upsert_profile(&profile).await?, UpsertOutcome::Unchanged);

    let changed = StoredProfile::from_record(&record("MagnusCarlsen", 2810));
    assert_eq!(store.upsert_profile(&changed).await?, UpsertOutcome::Updated);
    assert_eq!(store.count_profiles().await?, 1);
    drop(store);

    // reopening sees the same data
    let store = SqliteStore::open(&path)?;
    let stored = store
        .get_profile(&PlayerIdentity::new("magnuscarlsen")?)
        .await?
        .expect("profile stored");
    assert_eq!(stored.rating(TimeControl::Rapid), Some(2810));
    assert_eq!(stored.games(TimeControl::Rapid), Some(120));
    assert_eq!(stored.status.as_deref(), Some("premium"));
    Ok(())
}

#[tokio::test]
async fn test_saver_pipeline_writes_profile_and_history() -> Result<()> {
    let dir = tempdir()?;
    let store = Arc::new(SqliteStore::open(dir.path().join("profiles.db"))?);
    let pipeline = SaverPipeline::new(store.clone(), policy())
        .with_saver(Box::new(ProfileSaver))
        .with_saver(Box::new(RatingHistorySaver { time_control: TimeControl::Rapid }));

    let record = record("hikaru", 2700);
    pipeline.save(&record).await?;
    pipeline.save(&record).await?;

    let identity = PlayerIdentity::new("hikaru")?;
    assert_eq!(store.count_profiles().await?, 1);
    let history = store.rating_history(&identity, TimeControl::Rapid).await?;
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].rating, 2700);
    Ok(())
}

#[tokio::test]
async fn test_failed_writer_rolls_back_the_record() -> Result<()> {
    let dir = tempdir()?;
    let store = Arc::new(SqliteStore::open(dir.path().join("profiles.db"))?);
    let pipeline = SaverPipeline::new(store.clone(), RetryPolicy { max_attempts: 1, ..policy() })
        .with_saver(Box::new(ProfileSaver))
        .with_saver(Box::new(FailOnce { failed: AtomicBool::new(false) }));

    let record = record("fabiano", 2750);
    let failure = pipeline.save(&record).await.unwrap_err();
    assert!(failure.rolled_back);
    assert_eq!(failure.failed, "fail_once");
    assert_eq!(failure.completed, vec!["profile".to_string()]);
    assert_eq!(store.count_profiles().await?, 0);

    // rolled back, so the resume replays every writer
    pipeline.resume(&record, &failure).await?;
    assert_eq!(store.count_profiles().await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_dedupe_repairs_legacy_table() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("legacy.db");

    {
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "CREATE TABLE profiles (
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
            );",
        )?;
        for (name, rating) in [("anna", 1500), ("anna", 1550), ("ben", 1200), ("anna", 1600)] {
            conn.execute(
                "INSERT INTO profiles (username, rapid_rating, retrieved_at, content_hash)
                 VALUES (?1, ?2, '2024-01-01T00:00:00Z', 'legacy')",
                rusqlite::params![name, rating],
            )?;
        }
    }

    let store = SqliteStore::open(&path)?;
    assert_eq!(store.count_profiles().await?, 4);
    assert_eq!(store.remove_duplicate_profiles().await?, 2);
    assert_eq!(store.count_profiles().await?, 2);

    let anna = store
        .get_profile(&PlayerIdentity::new("anna")?)
        .await?
        .expect("newest row kept");
    assert_eq!(anna.rating(TimeControl::Rapid), Some(1600));

    // the unique index now rejects duplicates
    drop(store);
    let conn = Connection::open(&path)?;
    let duplicate = conn.execute(
        "INSERT INTO profiles (username, retrieved_at, content_hash)
         VALUES ('ben', '2024-01-02T00:00:00Z', 'legacy')",
        [],
    );
    assert!(duplicate.is_err());
    Ok(())
}
