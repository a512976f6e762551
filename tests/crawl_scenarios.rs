use anyhow::Result;
use async_trait::async_trait;
use chess_crawler::crawler::{CrawlState, Crawler, StopCondition, StopReason};
use chess_crawler::error::CrawlerError;
use chess_crawler::pipeline::filter::MinGamesDiscriminator;
use chess_crawler::pipeline::save::ProfileSaver;
use chess_crawler::pipeline::selectors::{
    HigherLowerSelector, HighestRatedOpponentSelector, RandomOpponentSelector,
};
use chess_crawler::pipeline::{
    DiscriminatorPipeline, Fetcher, GetterPipeline, PlayerSelector, SaverPipeline,
};
use chess_crawler::retry::RetryPolicy;
use chess_crawler::storage::{InMemoryStore, ProfileStore};
use chess_crawler::types::{
    FieldKey, FieldSet, FieldValue, Opponent, PlayerIdentity, PlayerRecord, TimeControl,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct FakePlayer {
    games: i64,
    rating: Option<i64>,
    opponents: Vec<(&'static str, i64)>,
}

/// Serves a fixed opponent graph; unknown players are not found.
#[derive(Default)]
struct GraphFetcher {
    players: HashMap<String, FakePlayer>,
    fetched: Arc<Mutex<Vec<String>>>,
    cancel_on: Option<(String, Arc<Mutex<Option<CancellationToken>>>)>,
}

impl GraphFetcher {
    fn player(mut self, name: &str, games: i64, rating: i64, opponents: &[(&'static str, i64)]) -> Self {
        self.players.insert(
            name.to_string(),
            FakePlayer { games, rating: Some(rating), opponents: opponents.to_vec() },
        );
        self
    }

    fn unrated(mut self, name: &str, opponents: &[(&'static str, i64)]) -> Self {
        self.players.insert(
            name.to_string(),
            FakePlayer { games: 0, rating: None, opponents: opponents.to_vec() },
        );
        self
    }
}

#[async_trait]
impl Fetcher for GraphFetcher {
    fn name(&self) -> String {
        "profile".into()
    }

    fn provides(&self) -> Vec<FieldKey> {
        vec![
            FieldKey::Username,
            FieldKey::Rating(TimeControl::Rapid),
            FieldKey::GamesPlayed(TimeControl::Rapid),
            FieldKey::Opponents,
        ]
    }

    async fn fetch(&self, identity: &PlayerIdentity, _: &PlayerRecord) -> chess_crawler::Result<FieldSet> {
        self.fetched.lock().unwrap().push(identity.to_string());
        if let Some((name, slot)) = &self.cancel_on {
            if name == identity.as_str() {
                if let Some(token) = slot.lock().unwrap().as_ref() {
                    token.cancel();
                }
            }
        }

        let player = self
            .players
            .get(identity.as_str())
            .ok_or_else(|| CrawlerError::NotFound(identity.to_string()))?;
        let opponents = player
            .opponents
            .iter()
            .map(|(name, rating)| Opponent {
                identity: PlayerIdentity::new(name).unwrap(),
                rating: Some(*rating),
            })
            .collect();
        let mut set = FieldSet::new()
            .with(FieldKey::Username, FieldValue::Text(identity.to_string()))
            .with(FieldKey::GamesPlayed(TimeControl::Rapid), FieldValue::Int(player.games))
            .with(FieldKey::Opponents, FieldValue::Opponents(opponents));
        set.insert_int(FieldKey::Rating(TimeControl::Rapid), player.rating);
        Ok(set)
    }
}

fn policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        backoff_base: Duration::from_millis(1),
        timeout: Duration::from_secs(5),
    }
}

fn id(name: &str) -> PlayerIdentity {
    PlayerIdentity::new(name).unwrap()
}

fn build(
    graph: GraphFetcher,
    store: Arc<InMemoryStore>,
    selector: Box<dyn PlayerSelector>,
) -> Crawler {
    let getter = GetterPipeline::new(policy(), 2).with_fetcher(Box::new(graph), true);
    let discriminator = DiscriminatorPipeline::new().with(Box::new(MinGamesDiscriminator {
        time_control: TimeControl::Rapid,
        min: 10,
    }));
    let saver = SaverPipeline::new(store, policy()).with_saver(Box::new(ProfileSaver));
    Crawler::new(getter, discriminator, saver, selector, 3).unwrap()
}

fn chain() -> GraphFetcher {
    GraphFetcher::default()
        .player("p1", 50, 1500, &[("p2", 1400)])
        .player("p2", 2, 1400, &[("p3", 1300)])
}

#[tokio::test]
async fn test_accepted_rejected_and_missing_players() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let graph = chain();
    let fetched = graph.fetched.clone();
    let mut crawler = build(graph, store.clone(), Box::new(HighestRatedOpponentSelector::new()));

    let (state, report) = crawler
        .run_with_state(Some(id("p1")), &StopCondition::iterations(10), CrawlState::new())
        .await;

    assert_eq!(report.status, StopReason::FrontierExhausted);
    assert_eq!(report.iterations, 3);
    assert_eq!(report.stored, 1);
    assert_eq!(report.rejected, 1);
    assert_eq!(report.fetch_failures, 1);

    // p1 stored, p2 only visited, p3 visited despite the failed fetch
    assert!(store.get_profile(&id("p1")).await?.is_some());
    assert!(store.get_profile(&id("p2")).await?.is_none());
    assert!(store.get_profile(&id("p3")).await?.is_none());
    for name in ["p1", "p2", "p3"] {
        assert!(state.contains(&id(name)), "{name} should be visited");
    }
    assert_eq!(state.current().map(|c| c.identity().clone()), Some(id("p3")));

    // not-found is never retried
    assert_eq!(fetched.lock().unwrap().iter().filter(|n| *n == "p3").count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_player_without_opponents_exhausts_frontier() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let graph = GraphFetcher::default().player("loner", 30, 1200, &[]);
    let mut crawler = build(graph, store.clone(), Box::new(RandomOpponentSelector::new(Some(1))));

    let report = crawler.run(Some(id("loner")), &StopCondition::iterations(10)).await;

    assert_eq!(report.status, StopReason::FrontierExhausted);
    assert_eq!(report.iterations, 1);
    assert_eq!(store.count_profiles().await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_each_player_is_visited_once() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let graph = GraphFetcher::default()
        .player("a", 20, 1500, &[("b", 1500), ("c", 1500)])
        .player("b", 20, 1500, &[("a", 1500), ("c", 1500)])
        .player("c", 20, 1500, &[("a", 1500), ("b", 1500)]);
    let fetched = graph.fetched.clone();
    let mut crawler = build(graph, store.clone(), Box::new(RandomOpponentSelector::new(Some(42))));

    let (state, report) = crawler
        .run_with_state(Some(id("a")), &StopCondition::iterations(20), CrawlState::new())
        .await;

    assert_eq!(report.status, StopReason::FrontierExhausted);
    assert_eq!(report.iterations, 3);
    assert_eq!(state.len(), 3);
    let mut visits = fetched.lock().unwrap().clone();
    visits.sort();
    visits.dedup();
    assert_eq!(visits.len(), 3);
    assert_eq!(store.count_profiles().await?, 3);
    Ok(())
}

#[tokio::test]
async fn test_stop_condition_limits_iterations() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let graph = GraphFetcher::default()
        .player("a", 20, 1500, &[("b", 1600)])
        .player("b", 20, 1600, &[("c", 1700)])
        .player("c", 20, 1700, &[("d", 1800)]);
    let mut crawler = build(graph, store, Box::new(HighestRatedOpponentSelector::new()));

    let report = crawler.run(Some(id("a")), &StopCondition::iterations(2)).await;

    assert_eq!(report.status, StopReason::MaxIterations);
    assert_eq!(report.iterations, 2);
    assert!(report.finished_at >= report.started_at);
    Ok(())
}

#[tokio::test]
async fn test_cancellation_before_save_leaves_candidate_unvisited() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let slot = Arc::new(Mutex::new(None));
    let mut graph = GraphFetcher::default()
        .player("p1", 50, 1500, &[("p2", 1600)])
        .player("p2", 50, 1600, &[]);
    graph.cancel_on = Some(("p2".to_string(), slot.clone()));
    let mut crawler = build(graph, store.clone(), Box::new(HighestRatedOpponentSelector::new()));
    *slot.lock().unwrap() = Some(crawler.cancellation_token());

    let (state, report) = crawler
        .run_with_state(Some(id("p1")), &StopCondition::iterations(10), CrawlState::new())
        .await;

    assert_eq!(report.status, StopReason::Cancelled);
    assert_eq!(report.iterations, 1);
    assert!(state.contains(&id("p1")));
    assert!(!state.contains(&id("p2")));
    assert!(store.get_profile(&id("p2")).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_state_carries_over_between_runs() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let mut crawler = build(chain(), store, Box::new(HighestRatedOpponentSelector::new()));

    let (state, first) = crawler
        .run_with_state(Some(id("p1")), &StopCondition::iterations(1), CrawlState::new())
        .await;
    assert_eq!(first.iterations, 1);

    let (state, second) = crawler
        .run_with_state(None, &StopCondition::iterations(1), state)
        .await;
    assert_eq!(second.iterations, 1);
    assert_eq!(second.rejected, 1);
    assert!(state.contains(&id("p2")));
    assert_ne!(first.run_id, second.run_id);
    Ok(())
}

#[tokio::test]
async fn test_recrawl_keeps_one_profile_per_player() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    for _ in 0..2 {
        let mut crawler = build(chain(), store.clone(), Box::new(HighestRatedOpponentSelector::new()));
        let report = crawler.run(Some(id("p1")), &StopCondition::iterations(10)).await;
        assert_eq!(report.stored, 1);
    }
    assert_eq!(store.count_profiles().await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_unrated_seed_still_leads_to_opponents() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let graph = GraphFetcher::default()
        .unrated("newcomer", &[("opp1", 1200), ("opp2", 800)])
        .player("opp1", 20, 1200, &[])
        .player("opp2", 20, 800, &[]);
    let selector = HigherLowerSelector::new(2400, 600, TimeControl::Rapid, Some(1));
    let mut crawler = build(graph, store.clone(), Box::new(selector));

    let (state, report) = crawler
        .run_with_state(Some(id("newcomer")), &StopCondition::iterations(10), CrawlState::new())
        .await;

    assert_eq!(report.status, StopReason::FrontierExhausted);
    assert_eq!(report.iterations, 3);
    assert_eq!(report.rejected, 1);
    assert!(state.contains(&id("opp1")));
    assert!(state.contains(&id("opp2")));
    assert_eq!(store.count_profiles().await?, 2);
    Ok(())
}
