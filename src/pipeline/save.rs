use crate::error::CrawlerError;
use crate::retry::{with_retry, RetryPolicy};
use crate::storage::{ProfileStore, StoredProfile, UpsertOutcome};
use crate::types::{FieldKey, PlayerIdentity, PlayerRecord, TimeControl};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// One durable write for an accepted record. Must be an idempotent upsert
/// keyed by the player's identity.
#[async_trait]
pub trait Saver: Send + Sync {
    fn name(&self) -> String;

    async fn save(
        &self,
        record: &PlayerRecord,
        profile: &StoredProfile,
        store: &dyn ProfileStore,
    ) -> crate::error::Result<()>;
}

#[derive(Debug, Error)]
#[error("saver '{failed}' failed for {identity} (completed: {completed:?}, rolled back: {rolled_back}): {source}")]
pub struct SaveFailure {
    pub identity: PlayerIdentity,
    pub completed: Vec<String>,
    pub failed: String,
    /// True when the store discarded the completed writes.
    pub rolled_back: bool,
    #[source]
    pub source: CrawlerError,
}

/// Ordered writers sharing one store. On a transactional store the writers of
/// one record commit or roll back together.
pub struct SaverPipeline {
    savers: Vec<Box<dyn Saver>>,
    store: Arc<dyn ProfileStore>,
    retry: RetryPolicy,
}

impl SaverPipeline {
    pub fn new(store: Arc<dyn ProfileStore>, retry: RetryPolicy) -> Self {
        Self {
            savers: Vec::new(),
            store,
            retry,
        }
    }

    pub fn with_saver(mut self, saver: Box<dyn Saver>) -> Self {
        self.push(saver);
        self
    }

    pub fn push(&mut self, saver: Box<dyn Saver>) {
        self.savers.push(saver);
    }

    pub fn names(&self) -> Vec<String> {
        self.savers.iter().map(|s| s.name()).collect()
    }

    pub async fn save(&self, record: &PlayerRecord) -> Result<StoredProfile, SaveFailure> {
        self.run(record, &[]).await
    }

    /// Finishes a failed save. Writers that completed and were kept are not
    /// replayed.
    pub async fn resume(
        &self,
        record: &PlayerRecord,
        failure: &SaveFailure,
    ) -> Result<StoredProfile, SaveFailure> {
        if failure.rolled_back {
            self.run(record, &[]).await
        } else {
            self.run(record, &failure.completed).await
        }
    }

    async fn run(&self, record: &PlayerRecord, skip: &[String]) -> Result<StoredProfile, SaveFailure> {
        let profile = StoredProfile::from_record(record);
        // a started save runs to completion even if the crawl is cancelled
        let never = CancellationToken::new();
        let failure = |completed: Vec<String>, failed: String, rolled_back: bool, source| SaveFailure {
            identity: record.identity().clone(),
            completed,
            failed,
            rolled_back,
            source,
        };

        if let Err(e) = self.store.begin().await {
            return Err(failure(Vec::new(), "begin".into(), false, e));
        }

        let mut completed = Vec::with_capacity(self.savers.len());
        for saver in &self.savers {
            let name = saver.name();
            if skip.contains(&name) {
                debug!("skipping {} for {}: already completed", name, record.identity());
                completed.push(name);
                continue;
            }
            let result = with_retry(&self.retry, &never, &name, || {
                saver.save(record, &profile, self.store.as_ref())
            })
            .await;
            if let Err(e) = result {
                let rolled_back = self.rollback(record).await;
                return Err(failure(completed, name, rolled_back, e));
            }
            completed.push(name);
        }

        if let Err(e) = self.store.commit().await {
            let rolled_back = self.rollback(record).await;
            return Err(failure(completed, "commit".into(), rolled_back, e));
        }
        Ok(profile)
    }

    async fn rollback(&self, record: &PlayerRecord) -> bool {
        if !self.store.is_transactional() {
            return false;
        }
        match self.store.rollback().await {
            Ok(()) => true,
            Err(e) => {
                error!("rollback failed for {}: {}", record.identity(), e);
                false
            }
        }
    }
}

/// Upserts the profile row.
pub struct ProfileSaver;

#[async_trait]
impl Saver for ProfileSaver {
    fn name(&self) -> String {
        "profile".into()
    }

    async fn save(
        &self,
        _record: &PlayerRecord,
        profile: &StoredProfile,
        store: &dyn ProfileStore,
    ) -> crate::error::Result<()> {
        match store.upsert_profile(profile).await? {
            UpsertOutcome::Unchanged => debug!("{} unchanged", profile.username),
            outcome => info!("{:?} profile {}", outcome, profile.username),
        }
        Ok(())
    }
}

/// Upserts one time control's rating history. A record without that history
/// is left alone.
pub struct RatingHistorySaver {
    pub time_control: TimeControl,
}

#[async_trait]
impl Saver for RatingHistorySaver {
    fn name(&self) -> String {
        format!("rating_history:{}", self.time_control)
    }

    async fn save(
        &self,
        record: &PlayerRecord,
        _profile: &StoredProfile,
        store: &dyn ProfileStore,
    ) -> crate::error::Result<()> {
        let Some(points) = record.history(FieldKey::RatingHistory(self.time_control)) else {
            return Ok(());
        };
        let written = store
            .upsert_rating_history(record.identity(), self.time_control, points)
            .await?;
        debug!("{} {} history point(s) for {}", written, self.time_control, record.identity());
        Ok(())
    }
}
