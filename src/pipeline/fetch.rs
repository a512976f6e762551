use crate::error::CrawlerError;
use crate::metrics::{emit_histogram, emit_labeled_counter, MetricName};
use crate::retry::{with_retry, RetryPolicy};
use crate::types::{FieldKey, FieldSet, PlayerIdentity, PlayerRecord};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// One source of player data. Each fetcher contributes its own slice of the
/// record and may read what earlier fetchers produced.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Name used in configuration (`required_fetchers`) and logs.
    fn name(&self) -> String;

    /// Fields this fetcher may set.
    fn provides(&self) -> Vec<FieldKey>;

    /// Fields that must be fetched before this fetcher runs.
    fn requires(&self) -> Vec<FieldKey> {
        Vec::new()
    }

    async fn fetch(&self, identity: &PlayerIdentity, record: &PlayerRecord) -> crate::error::Result<FieldSet>;
}

#[derive(Debug, Error)]
pub enum FetchFailure {
    #[error("required fetcher '{fetcher}' failed for {identity}: {source}")]
    Required {
        identity: PlayerIdentity,
        fetcher: String,
        #[source]
        source: CrawlerError,
    },

    #[error("fetch cancelled")]
    Cancelled,
}

struct Getter {
    fetcher: Box<dyn Fetcher>,
    required: bool,
}

/// Ordered fetchers merged into one record. Consecutive fetchers run
/// concurrently unless one needs a field produced inside the same wave.
pub struct GetterPipeline {
    getters: Vec<Getter>,
    concurrency: usize,
    retry: RetryPolicy,
}

impl GetterPipeline {
    pub fn new(retry: RetryPolicy, concurrency: usize) -> Self {
        Self {
            getters: Vec::new(),
            concurrency: concurrency.max(1),
            retry,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Box<dyn Fetcher>, required: bool) -> Self {
        self.push(fetcher, required);
        self
    }

    pub fn push(&mut self, fetcher: Box<dyn Fetcher>, required: bool) {
        self.getters.push(Getter { fetcher, required });
    }

    pub fn names(&self) -> Vec<String> {
        self.getters.iter().map(|g| g.fetcher.name()).collect()
    }

    /// Every field some configured fetcher can produce.
    pub fn produced_fields(&self) -> BTreeSet<FieldKey> {
        self.getters
            .iter()
            .flat_map(|g| g.fetcher.provides())
            .collect()
    }

    #[instrument(skip(self, cancel), fields(identity = %identity))]
    pub async fn fetch(
        &self,
        identity: &PlayerIdentity,
        cancel: &CancellationToken,
    ) -> Result<PlayerRecord, FetchFailure> {
        let started = std::time::Instant::now();
        let mut record = PlayerRecord::new(identity.clone());
        let mut wave: Vec<usize> = Vec::new();
        let mut wave_fields: BTreeSet<FieldKey> = BTreeSet::new();

        for (index, getter) in self.getters.iter().enumerate() {
            let blocked = getter
                .fetcher
                .requires()
                .iter()
                .any(|key| wave_fields.contains(key));
            if blocked {
                self.run_wave(&wave, identity, &mut record, cancel).await?;
                wave.clear();
                wave_fields.clear();
            }
            wave.push(index);
            wave_fields.extend(getter.fetcher.provides());
        }
        self.run_wave(&wave, identity, &mut record, cancel).await?;

        emit_histogram(MetricName::FetchDuration, started.elapsed().as_secs_f64());
        if record.is_partial() {
            warn!(
                "partial record for {}: {} fetcher(s) failed, missing {:?}",
                identity,
                record.missing().len(),
                record.missing_fields()
            );
        }
        Ok(record)
    }

    async fn run_wave(
        &self,
        wave: &[usize],
        identity: &PlayerIdentity,
        record: &mut PlayerRecord,
        cancel: &CancellationToken,
    ) -> Result<(), FetchFailure> {
        if wave.is_empty() {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(FetchFailure::Cancelled);
        }

        let snapshot: &PlayerRecord = record;
        let mut results = stream::iter(wave.iter().copied())
            .map(|index| {
                let getter = &self.getters[index];
                async move {
                    let name = getter.fetcher.name();
                    let result = with_retry(&self.retry, cancel, &name, || {
                        getter.fetcher.fetch(identity, snapshot)
                    })
                    .await;
                    (index, result)
                }
            })
            .buffer_unordered(self.concurrency);

        let mut contributions = Vec::with_capacity(wave.len());
        let mut failures = Vec::new();
        while let Some((index, result)) = results.next().await {
            let getter = &self.getters[index];
            match result {
                Ok(fields) => contributions.push((index, fields)),
                Err(CrawlerError::Cancelled) => return Err(FetchFailure::Cancelled),
                Err(e) => {
                    emit_labeled_counter(MetricName::FetcherErrors, "fetcher", getter.fetcher.name());
                    if getter.required {
                        return Err(FetchFailure::Required {
                            identity: identity.clone(),
                            fetcher: getter.fetcher.name(),
                            source: e,
                        });
                    }
                    failures.push((index, e));
                }
            }
        }
        drop(results);

        // declared order keeps last-writer-wins deterministic
        contributions.sort_by_key(|(index, _)| *index);
        for (index, fields) in contributions {
            debug!(
                "{} contributed {} field(s)",
                self.getters[index].fetcher.name(),
                fields.fields.len()
            );
            record.merge(fields);
        }
        failures.sort_by_key(|(index, _)| *index);
        for (index, error) in failures {
            let fetcher = &self.getters[index].fetcher;
            let name = fetcher.name();
            warn!("optional fetcher {} failed for {}: {}", name, identity, error);
            record.mark_missing(name, fetcher.provides(), error.to_string());
        }
        Ok(())
    }
}
