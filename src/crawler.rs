use crate::error::{CrawlerError, Result};
use crate::metrics::{emit_counter, MetricName};
use crate::pipeline::{
    DiscriminatorPipeline, FetchFailure, GetterPipeline, PlayerSelector, SaveFailure,
    SaverPipeline, Selection, Verdict,
};
use crate::storage::StoredProfile;
use crate::types::{PlayerIdentity, PlayerRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Where the traversal currently stands.
#[derive(Debug, Clone, PartialEq)]
pub enum Cursor {
    /// Fetch failed; only the identity is known.
    Identity(PlayerIdentity),
    Record(Box<PlayerRecord>),
}

impl Cursor {
    pub fn identity(&self) -> &PlayerIdentity {
        match self {
            Cursor::Identity(identity) => identity,
            Cursor::Record(record) => record.identity(),
        }
    }

    fn selection(&self) -> Selection<'_> {
        match self {
            Cursor::Identity(identity) => Selection::Identity(identity),
            Cursor::Record(record) => Selection::Record(record),
        }
    }
}

/// Traversal state of one crawl: visited players plus the current and
/// previous cursor. Can be carried from one run into the next.
#[derive(Debug, Clone, Default)]
pub struct CrawlState {
    visited: HashSet<PlayerIdentity>,
    current: Option<Cursor>,
    previous: Option<Cursor>,
}

impl CrawlState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_visited(visited: impl IntoIterator<Item = PlayerIdentity>) -> Self {
        Self {
            visited: visited.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn contains(&self, identity: &PlayerIdentity) -> bool {
        self.visited.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.visited.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visited.is_empty()
    }

    pub fn visited(&self) -> impl Iterator<Item = &PlayerIdentity> {
        self.visited.iter()
    }

    pub fn current(&self) -> Option<&Cursor> {
        self.current.as_ref()
    }

    pub fn previous(&self) -> Option<&Cursor> {
        self.previous.as_ref()
    }

    pub(crate) fn mark_visited(&mut self, identity: &PlayerIdentity) -> bool {
        self.visited.insert(identity.clone())
    }

    pub(crate) fn unmark_visited(&mut self, identity: &PlayerIdentity) {
        self.visited.remove(identity);
    }

    pub(crate) fn advance(&mut self, cursor: Cursor) {
        self.previous = self.current.replace(cursor);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StopCondition {
    pub max_iterations: Option<u64>,
    pub max_duration: Option<Duration>,
}

impl StopCondition {
    pub fn iterations(max: u64) -> Self {
        Self {
            max_iterations: Some(max),
            ..Self::default()
        }
    }

    pub fn with_max_duration(mut self, max: Duration) -> Self {
        self.max_duration = Some(max);
        self
    }

    fn reached(&self, iterations: u64, started: Instant) -> Option<StopReason> {
        if self.max_iterations.is_some_and(|max| iterations >= max) {
            return Some(StopReason::MaxIterations);
        }
        if self.max_duration.is_some_and(|max| started.elapsed() >= max) {
            return Some(StopReason::MaxDuration);
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxIterations,
    MaxDuration,
    FrontierExhausted,
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::MaxIterations => "max iterations reached",
            StopReason::MaxDuration => "max duration reached",
            StopReason::FrontierExhausted => "frontier exhausted",
            StopReason::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrawlReport {
    pub run_id: Uuid,
    pub status: StopReason,
    pub iterations: u64,
    pub stored: u64,
    pub rejected: u64,
    pub fetch_failures: u64,
    pub save_failures: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Result of processing one candidate.
#[derive(Debug)]
pub enum VisitOutcome {
    Stored {
        record: Box<PlayerRecord>,
        profile: StoredProfile,
    },
    Rejected {
        record: Box<PlayerRecord>,
        by: String,
    },
    SaveFailed {
        record: Box<PlayerRecord>,
        failure: SaveFailure,
    },
    FetchFailed(FetchFailure),
    /// Stopped before persistence began; the candidate counts as unvisited.
    Cancelled,
}

/// Drives select → fetch → filter → save → advance over the opponent graph.
pub struct Crawler {
    getter: GetterPipeline,
    discriminator: DiscriminatorPipeline,
    saver: SaverPipeline,
    selector: Box<dyn PlayerSelector>,
    max_selection_attempts: usize,
    cancel: CancellationToken,
}

impl Crawler {
    /// Fails when the selector reads a field no fetcher produces.
    pub fn new(
        getter: GetterPipeline,
        discriminator: DiscriminatorPipeline,
        saver: SaverPipeline,
        selector: Box<dyn PlayerSelector>,
        max_selection_attempts: usize,
    ) -> Result<Self> {
        let produced = getter.produced_fields();
        let missing: Vec<String> = selector
            .required_fields()
            .into_iter()
            .filter(|field| !produced.contains(field))
            .map(|field| format!("{field:?}"))
            .collect();
        if !missing.is_empty() {
            return Err(CrawlerError::Config(format!(
                "selector '{}' needs {} but no fetcher ({}) provides it",
                selector.name(),
                missing.join(", "),
                getter.names().join(", ")
            )));
        }

        Ok(Self {
            getter,
            discriminator,
            saver,
            selector,
            max_selection_attempts: max_selection_attempts.max(1),
            cancel: CancellationToken::new(),
        })
    }

    /// Token that stops the crawl after the current step.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&mut self, seed: Option<PlayerIdentity>, stop: &StopCondition) -> CrawlReport {
        self.run_with_state(seed, stop, CrawlState::new()).await.1
    }

    pub async fn run_with_state(
        &mut self,
        seed: Option<PlayerIdentity>,
        stop: &StopCondition,
        mut state: CrawlState,
    ) -> (CrawlState, CrawlReport) {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let started_at = Utc::now();
        let (mut iterations, mut stored, mut rejected) = (0u64, 0u64, 0u64);
        let (mut fetch_failures, mut save_failures) = (0u64, 0u64);
        info!(
            "Starting crawl {} with selector {} ({} already visited)",
            run_id,
            self.selector.name(),
            state.len()
        );

        let mut pending = None;
        if let Some(seed) = seed {
            if !state.contains(&seed) {
                pending = Some(seed);
            } else if state.current().map(Cursor::identity) != Some(&seed) {
                info!("Seed {} was already visited; selecting from it", seed);
                state.advance(Cursor::Identity(seed));
            }
        }

        let status = loop {
            if let Some(reason) = stop.reached(iterations, started) {
                break reason;
            }
            if self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            let candidate = match pending.take().or_else(|| self.select_next(&state)) {
                Some(candidate) => candidate,
                None => break StopReason::FrontierExhausted,
            };
            state.mark_visited(&candidate);

            let cursor = match self.visit(&candidate).await {
                VisitOutcome::Cancelled => {
                    state.unmark_visited(&candidate);
                    break StopReason::Cancelled;
                }
                VisitOutcome::FetchFailed(failure) => {
                    fetch_failures += 1;
                    emit_counter(MetricName::FetchFailures, 1);
                    warn!("Skipping {}: {}", candidate, failure);
                    Cursor::Identity(candidate)
                }
                VisitOutcome::Rejected { record, by } => {
                    rejected += 1;
                    emit_counter(MetricName::ProfilesRejected, 1);
                    info!("Not storing {}: rejected by {}", candidate, by);
                    Cursor::Record(record)
                }
                VisitOutcome::Stored { record, profile } => {
                    stored += 1;
                    emit_counter(MetricName::ProfilesStored, 1);
                    info!("Stored {}", profile.username);
                    Cursor::Record(record)
                }
                VisitOutcome::SaveFailed { record, failure } => {
                    save_failures += 1;
                    emit_counter(MetricName::SaveFailures, 1);
                    error!("{}", failure);
                    Cursor::Record(record)
                }
            };
            iterations += 1;
            emit_counter(MetricName::Visits, 1);
            state.advance(cursor);
        };

        let report = CrawlReport {
            run_id,
            status,
            iterations,
            stored,
            rejected,
            fetch_failures,
            save_failures,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            "Crawl {} finished ({}): {} visited, {} stored, {} rejected, {} fetch failures, {} save failures",
            run_id, status, iterations, stored, rejected, fetch_failures, save_failures
        );
        (state, report)
    }

    #[instrument(skip(self, candidate), fields(identity = %candidate))]
    async fn visit(&self, candidate: &PlayerIdentity) -> VisitOutcome {
        let record = match self.getter.fetch(candidate, &self.cancel).await {
            Ok(record) => Box::new(record),
            Err(FetchFailure::Cancelled) => return VisitOutcome::Cancelled,
            Err(failure) => return VisitOutcome::FetchFailed(failure),
        };

        if let Verdict::Rejected { by } = self.discriminator.evaluate(&record) {
            return VisitOutcome::Rejected { record, by };
        }
        if self.cancel.is_cancelled() {
            return VisitOutcome::Cancelled;
        }

        match self.saver.save(&record).await {
            Ok(profile) => VisitOutcome::Stored { record, profile },
            Err(failure) => VisitOutcome::SaveFailed { record, failure },
        }
    }

    /// Next unvisited candidate: first from the current cursor, then
    /// alternates from the previous one.
    fn select_next(&mut self, state: &CrawlState) -> Option<PlayerIdentity> {
        let current = state.current()?;
        if let Some(candidate) = self.selector.next(current.selection()) {
            if !state.contains(&candidate) {
                return Some(candidate);
            }
            debug!("{} already visited", candidate);
        }

        let fallback = state.previous().unwrap_or(current);
        for attempt in 1..=self.max_selection_attempts {
            match self.selector.next(fallback.selection()) {
                Some(candidate) if !state.contains(&candidate) => {
                    debug!("alternate {} from {} on attempt {}", candidate, fallback.identity(), attempt);
                    return Some(candidate);
                }
                Some(candidate) => debug!("alternate {} already visited", candidate),
                None => break,
            }
        }
        None
    }
}
