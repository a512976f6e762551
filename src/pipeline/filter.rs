use crate::types::{PlayerRecord, TimeControl};
use tracing::debug;

/// Retention predicate over a completed record. Must be pure: no I/O and the
/// same answer for the same record.
pub trait Discriminator: Send + Sync {
    fn name(&self) -> String;
    fn should_save(&self, record: &PlayerRecord) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected { by: String },
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

/// Ordered predicates; the first rejection wins.
#[derive(Default)]
pub struct DiscriminatorPipeline {
    discriminators: Vec<Box<dyn Discriminator>>,
}

impl DiscriminatorPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, discriminator: Box<dyn Discriminator>) -> Self {
        self.push(discriminator);
        self
    }

    pub fn push(&mut self, discriminator: Box<dyn Discriminator>) {
        self.discriminators.push(discriminator);
    }

    pub fn accepts(&self, record: &PlayerRecord) -> bool {
        self.evaluate(record).is_accepted()
    }

    pub fn evaluate(&self, record: &PlayerRecord) -> Verdict {
        for discriminator in &self.discriminators {
            if !discriminator.should_save(record) {
                let by = discriminator.name();
                debug!("{} rejected by {}", record.identity(), by);
                return Verdict::Rejected { by };
            }
        }
        Verdict::Accepted
    }
}

/// Accepts players with at least `min` games in one time control.
pub struct MinGamesDiscriminator {
    pub time_control: TimeControl,
    pub min: i64,
}

impl Discriminator for MinGamesDiscriminator {
    fn name(&self) -> String {
        format!("min_games:{}>={}", self.time_control, self.min)
    }

    fn should_save(&self, record: &PlayerRecord) -> bool {
        record
            .games_played(self.time_control)
            .is_some_and(|games| games >= self.min)
    }
}

pub struct MinRatingDiscriminator {
    pub time_control: TimeControl,
    pub min: i64,
}

impl Discriminator for MinRatingDiscriminator {
    fn name(&self) -> String {
        format!("min_rating:{}>={}", self.time_control, self.min)
    }

    fn should_save(&self, record: &PlayerRecord) -> bool {
        record
            .rating(self.time_control)
            .is_some_and(|rating| rating >= self.min)
    }
}

/// Rejects closed accounts (`closed`, `closed:fair_play_violations`, ...).
pub struct OpenAccountDiscriminator;

impl Discriminator for OpenAccountDiscriminator {
    fn name(&self) -> String {
        "open_account".into()
    }

    fn should_save(&self, record: &PlayerRecord) -> bool {
        record.status().is_some_and(|status| !status.contains("closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldKey, FieldSet, FieldValue, PlayerIdentity};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn record(games: Option<i64>, status: Option<&str>) -> PlayerRecord {
        let mut set = FieldSet::new();
        set.insert_int(FieldKey::GamesPlayed(TimeControl::Rapid), games);
        set.insert_int(FieldKey::Rating(TimeControl::Rapid), Some(1500));
        set.insert_text(FieldKey::Status, status);
        let mut record = PlayerRecord::new(PlayerIdentity::new("p1").unwrap());
        record.merge(set);
        record
    }

    fn min_games(min: i64) -> Box<dyn Discriminator> {
        Box::new(MinGamesDiscriminator { time_control: TimeControl::Rapid, min })
    }

    struct Counting(Arc<AtomicUsize>);

    impl Discriminator for Counting {
        fn name(&self) -> String {
            "counting".into()
        }
        fn should_save(&self, _: &PlayerRecord) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    #[test]
    fn min_games_is_inclusive() {
        let pipeline = DiscriminatorPipeline::new().with(min_games(10));
        assert!(pipeline.accepts(&record(Some(10), Some("basic"))));
        assert!(pipeline.accepts(&record(Some(50), Some("basic"))));
        assert!(!pipeline.accepts(&record(Some(2), Some("basic"))));
    }

    #[test]
    fn missing_data_is_rejected() {
        let pipeline = DiscriminatorPipeline::new()
            .with(min_games(10))
            .with(Box::new(OpenAccountDiscriminator));
        assert!(!pipeline.accepts(&record(None, Some("basic"))));
        assert!(!pipeline.accepts(&record(Some(20), None)));
    }

    #[test]
    fn first_rejection_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = DiscriminatorPipeline::new()
            .with(min_games(10))
            .with(Box::new(Counting(calls.clone())));

        let verdict = pipeline.evaluate(&record(Some(2), Some("basic")));
        assert_eq!(verdict, Verdict::Rejected { by: "min_games:rapid>=10".into() });
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert!(pipeline.accepts(&record(Some(20), Some("basic"))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn closed_accounts_are_rejected() {
        let pipeline = DiscriminatorPipeline::new().with(Box::new(OpenAccountDiscriminator));
        assert!(!pipeline.accepts(&record(Some(20), Some("closed:fair_play_violations"))));
        assert!(pipeline.accepts(&record(Some(20), Some("premium"))));
    }

    #[test]
    fn evaluation_is_deterministic() {
        let pipeline = DiscriminatorPipeline::new()
            .with(min_games(10))
            .with(Box::new(MinRatingDiscriminator { time_control: TimeControl::Rapid, min: 1400 }));
        let r = record(Some(30), Some("basic"));
        let first = pipeline.evaluate(&r);
        for _ in 0..5 {
            assert_eq!(pipeline.evaluate(&r), first);
        }
        assert_eq!(first, Verdict::Accepted);
    }

    #[test]
    fn empty_pipeline_accepts_everything() {
        assert!(DiscriminatorPipeline::new().accepts(&record(None, None)));
    }
}
