use super::traits::ProfileStore;
use super::{StoredProfile, UpsertOutcome};
use crate::error::{CrawlerError, Result};
use crate::types::{PlayerIdentity, RatingPoint, TimeControl};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[derive(Default)]
struct State {
    // username -> (profile, content hash, insertion sequence)
    profiles: HashMap<PlayerIdentity, (StoredProfile, String, u64)>,
    history: BTreeMap<(PlayerIdentity, TimeControl, i64), i64>,
    sequence: u64,
}

/// In-memory store for development and tests. Not transactional: writers
/// that completed before a failure stay applied.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| CrawlerError::Storage("in-memory store lock poisoned".into()))
    }
}

#[async_trait]
impl ProfileStore for InMemoryStore {
    async fn upsert_profile(&self, profile: &StoredProfile) -> Result<UpsertOutcome> {
        let hash = profile.content_hash()?;
        let mut state = self.state()?;
        state.sequence += 1;
        let sequence = state.sequence;

        let outcome = match state.profiles.get_mut(&profile.username) {
            Some((existing, existing_hash, seq)) if *existing_hash == hash => {
                existing.retrieved_at = profile.retrieved_at;
                *seq = sequence;
                UpsertOutcome::Unchanged
            }
            Some(entry) => {
                *entry = (profile.clone(), hash, sequence);
                UpsertOutcome::Updated
            }
            None => {
                state
                    .profiles
                    .insert(profile.username.clone(), (profile.clone(), hash, sequence));
                UpsertOutcome::Inserted
            }
        };
        debug!("upserted {} ({:?})", profile.username, outcome);
        Ok(outcome)
    }

    async fn get_profile(&self, username: &PlayerIdentity) -> Result<Option<StoredProfile>> {
        Ok(self.state()?.profiles.get(username).map(|(p, _, _)| p.clone()))
    }

    async fn count_profiles(&self) -> Result<usize> {
        Ok(self.state()?.profiles.len())
    }

    async fn latest_profile(&self) -> Result<Option<StoredProfile>> {
        Ok(self
            .state()?
            .profiles
            .values()
            .max_by_key(|(p, _, seq)| (p.retrieved_at, *seq))
            .map(|(p, _, _)| p.clone()))
    }

    async fn identities(&self) -> Result<Vec<PlayerIdentity>> {
        let mut ids: Vec<PlayerIdentity> = self.state()?.profiles.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn upsert_rating_history(
        &self,
        username: &PlayerIdentity,
        time_control: TimeControl,
        points: &[RatingPoint],
    ) -> Result<usize> {
        let mut state = self.state()?;
        for point in points {
            state
                .history
                .insert((username.clone(), time_control, point.timestamp), point.rating);
        }
        Ok(points.len())
    }

    async fn rating_history(
        &self,
        username: &PlayerIdentity,
        time_control: TimeControl,
    ) -> Result<Vec<RatingPoint>> {
        Ok(self
            .state()?
            .history
            .iter()
            .filter(|((user, tc, _), _)| user == username && *tc == time_control)
            .map(|((_, _, timestamp), rating)| RatingPoint {
                timestamp: *timestamp,
                rating: *rating,
            })
            .collect())
    }

    async fn remove_duplicate_profiles(&self) -> Result<usize> {
        // keyed by username, so duplicates cannot exist
        Ok(0)
    }
}
