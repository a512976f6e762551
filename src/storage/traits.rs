use super::{StoredProfile, UpsertOutcome};
use crate::error::Result;
use crate::types::{PlayerIdentity, RatingPoint, TimeControl};
use async_trait::async_trait;

/// Durable store for accepted profiles, keyed by player identity.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    // Profile operations
    async fn upsert_profile(&self, profile: &StoredProfile) -> Result<UpsertOutcome>;
    async fn get_profile(&self, username: &PlayerIdentity) -> Result<Option<StoredProfile>>;
    async fn count_profiles(&self) -> Result<usize>;
    /// Most recently retrieved profile; seeds a crawl when none is configured.
    async fn latest_profile(&self) -> Result<Option<StoredProfile>>;
    async fn identities(&self) -> Result<Vec<PlayerIdentity>>;

    // Rating history operations
    async fn upsert_rating_history(
        &self,
        username: &PlayerIdentity,
        time_control: TimeControl,
        points: &[RatingPoint],
    ) -> Result<usize>;
    async fn rating_history(
        &self,
        username: &PlayerIdentity,
        time_control: TimeControl,
    ) -> Result<Vec<RatingPoint>>;

    /// Keeps the newest row per username and installs the unique index.
    /// Returns the number of rows deleted.
    async fn remove_duplicate_profiles(&self) -> Result<usize>;

    // Transactions; stores without them treat these as no-ops.
    async fn begin(&self) -> Result<()> {
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        Ok(())
    }

    fn is_transactional(&self) -> bool {
        false
    }
}
