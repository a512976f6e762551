use super::fetch::Fetcher;
use crate::apis::ChessComClient;
use crate::error::{CrawlerError, Result};
use crate::parser;
use crate::types::{
    FieldKey, FieldSet, FieldValue, Opponent, PlayerIdentity, PlayerRecord, TimeControl,
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument};

// Profile keys mapped onto the closed field set; everything else goes to extras.
const PROFILE_KNOWN_KEYS: [&str; 5] = ["player_id", "username", "status", "joined", "last_online"];

/// Public profile: numeric id, username, account status, join date.
pub struct ProfileFetcher {
    client: Arc<ChessComClient>,
}

impl ProfileFetcher {
    pub fn new(client: Arc<ChessComClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for ProfileFetcher {
    fn name(&self) -> String {
        "profile".into()
    }

    fn provides(&self) -> Vec<FieldKey> {
        vec![
            FieldKey::PlayerId,
            FieldKey::Username,
            FieldKey::Status,
            FieldKey::Joined,
            FieldKey::LastOnline,
        ]
    }

    #[instrument(skip(self, _record), fields(identity = %identity))]
    async fn fetch(&self, identity: &PlayerIdentity, _record: &PlayerRecord) -> Result<FieldSet> {
        let profile = self
            .client
            .get_json(&self.client.profile_url(identity), identity)
            .await?;
        let obj = profile
            .as_object()
            .ok_or_else(|| CrawlerError::Malformed("profile is not an object".into()))?;

        let mut set = FieldSet::new();
        set.insert_int(FieldKey::PlayerId, obj.get("player_id").and_then(Value::as_i64));
        set.insert_text(FieldKey::Username, obj.get("username").and_then(Value::as_str));
        set.insert_text(FieldKey::Status, obj.get("status").and_then(Value::as_str));
        set.insert_int(FieldKey::Joined, obj.get("joined").and_then(Value::as_i64));
        set.insert_int(FieldKey::LastOnline, obj.get("last_online").and_then(Value::as_i64));
        for (key, value) in obj {
            if !PROFILE_KNOWN_KEYS.contains(&key.as_str()) {
                set.insert_extra(key.clone(), value.clone());
            }
        }

        if !set.fields.contains_key(&FieldKey::Username) {
            return Err(CrawlerError::MissingField("username".into()));
        }
        Ok(set)
    }
}

/// Current rating and game count per time control, plus puzzle rush best.
pub struct StatsFetcher {
    client: Arc<ChessComClient>,
}

impl StatsFetcher {
    pub fn new(client: Arc<ChessComClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for StatsFetcher {
    fn name(&self) -> String {
        "stats".into()
    }

    fn provides(&self) -> Vec<FieldKey> {
        let mut keys: Vec<FieldKey> = TimeControl::ALL
            .iter()
            .flat_map(|tc| [FieldKey::Rating(*tc), FieldKey::GamesPlayed(*tc)])
            .collect();
        keys.push(FieldKey::PuzzleRushBest);
        keys
    }

    #[instrument(skip(self, _record), fields(identity = %identity))]
    async fn fetch(&self, identity: &PlayerIdentity, _record: &PlayerRecord) -> Result<FieldSet> {
        let stats = self
            .client
            .get_json(&self.client.stats_url(identity), identity)
            .await?;

        let mut set = FieldSet::new();
        for tc in TimeControl::ALL {
            let Some(section) = stats.get(tc.stats_key()) else {
                continue;
            };
            set.insert_int(FieldKey::Rating(tc), section.pointer("/last/rating").and_then(Value::as_i64));
            if let Some(record) = section.get("record") {
                let count = |name: &str| record.get(name).and_then(Value::as_i64).unwrap_or(0);
                set.insert(
                    FieldKey::GamesPlayed(tc),
                    FieldValue::Int(count("win") + count("loss") + count("draw")),
                );
            }
        }
        set.insert_int(
            FieldKey::PuzzleRushBest,
            stats.pointer("/puzzle_rush/best/score").and_then(Value::as_i64),
        );
        if let Some(highest) = stats.pointer("/tactics/highest/rating") {
            set.insert_extra("tactics_highest", highest.clone());
        }
        Ok(set)
    }
}

/// Opponents from the most recent monthly game archives.
pub struct ArchivedOpponentsFetcher {
    client: Arc<ChessComClient>,
    months: usize,
    time_control: Option<TimeControl>,
}

impl ArchivedOpponentsFetcher {
    pub fn new(client: Arc<ChessComClient>, months: usize, time_control: Option<TimeControl>) -> Self {
        Self {
            client,
            months: months.max(1),
            time_control,
        }
    }
}

#[async_trait]
impl Fetcher for ArchivedOpponentsFetcher {
    fn name(&self) -> String {
        match self.time_control {
            Some(tc) => format!("archived_opponents:{tc}"),
            None => "archived_opponents".into(),
        }
    }

    fn provides(&self) -> Vec<FieldKey> {
        vec![FieldKey::Opponents]
    }

    fn requires(&self) -> Vec<FieldKey> {
        vec![FieldKey::Username]
    }

    #[instrument(skip(self, record), fields(identity = %identity))]
    async fn fetch(&self, identity: &PlayerIdentity, record: &PlayerRecord) -> Result<FieldSet> {
        let archives = self
            .client
            .get_json(&self.client.archives_url(identity), identity)
            .await?;
        let urls: Vec<&str> = archives
            .get("archives")
            .and_then(Value::as_array)
            .ok_or_else(|| CrawlerError::Malformed("archives list missing".into()))?
            .iter()
            .filter_map(Value::as_str)
            .collect();

        let username = record
            .text(FieldKey::Username)
            .unwrap_or(identity.as_str())
            .to_lowercase();
        let mut opponents = Vec::new();
        for url in urls.iter().rev().take(self.months) {
            let month = self.client.get_json(url, identity).await?;
            let games = month.get("games").and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]);
            for game in games {
                if let Some(tc) = self.time_control {
                    if game.get("time_class").and_then(Value::as_str) != Some(tc.as_str()) {
                        continue;
                    }
                }
                if let Some(opponent) = opponent_in(game, &username) {
                    opponents.push(opponent);
                }
            }
        }
        debug!("{} has {} archived opponent game(s)", identity, opponents.len());
        Ok(FieldSet::new().with(FieldKey::Opponents, FieldValue::Opponents(opponents)))
    }
}

fn opponent_in(game: &Value, username: &str) -> Option<Opponent> {
    let white = game.get("white")?;
    let black = game.get("black")?;
    let white_name = white.get("username")?.as_str()?;
    let side = if white_name.to_lowercase() == username { black } else { white };
    let identity = PlayerIdentity::new(side.get("username")?.as_str()?).ok()?;
    Some(Opponent {
        identity,
        rating: side.get("rating").and_then(Value::as_i64),
    })
}

/// Rating history and total games from a live or daily stats page. The page
/// count overrides the stats endpoint's when both run.
pub struct RatingHistoryFetcher {
    client: Arc<ChessComClient>,
    time_control: TimeControl,
}

impl RatingHistoryFetcher {
    pub fn new(client: Arc<ChessComClient>, time_control: TimeControl) -> Self {
        Self { client, time_control }
    }
}

#[async_trait]
impl Fetcher for RatingHistoryFetcher {
    fn name(&self) -> String {
        format!("{}_history", self.time_control)
    }

    fn provides(&self) -> Vec<FieldKey> {
        vec![
            FieldKey::RatingHistory(self.time_control),
            FieldKey::GamesPlayed(self.time_control),
        ]
    }

    #[instrument(skip(self, _record), fields(identity = %identity, time_control = %self.time_control))]
    async fn fetch(&self, identity: &PlayerIdentity, _record: &PlayerRecord) -> Result<FieldSet> {
        let url = self.client.live_stats_url(self.time_control, identity);
        let html = self.client.get_html(&url, identity).await?;

        let history = parser::parse_rating_history(&html)?;
        let mut set = FieldSet::new()
            .with(FieldKey::RatingHistory(self.time_control), FieldValue::History(history));
        set.insert_int(
            FieldKey::GamesPlayed(self.time_control),
            parser::parse_games_total(&html).ok(),
        );
        Ok(set)
    }
}

/// Puzzle rating history, attempts and training time from the puzzle stats page.
pub struct PuzzlesFetcher {
    client: Arc<ChessComClient>,
}

impl PuzzlesFetcher {
    pub fn new(client: Arc<ChessComClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for PuzzlesFetcher {
    fn name(&self) -> String {
        "puzzles".into()
    }

    fn provides(&self) -> Vec<FieldKey> {
        vec![
            FieldKey::PuzzleHistory,
            FieldKey::PuzzleRating,
            FieldKey::PuzzleAttempts,
            FieldKey::PuzzleSeconds,
        ]
    }

    #[instrument(skip(self, _record), fields(identity = %identity))]
    async fn fetch(&self, identity: &PlayerIdentity, _record: &PlayerRecord) -> Result<FieldSet> {
        let html = self
            .client
            .get_html(&self.client.puzzles_url(identity), identity)
            .await?;

        let mut set = FieldSet::new();
        if let Ok(history) = parser::parse_rating_history(&html) {
            set.insert_int(FieldKey::PuzzleRating, history.last().map(|p| p.rating));
            set.insert(FieldKey::PuzzleHistory, FieldValue::History(history));
        }
        set.insert_int(FieldKey::PuzzleAttempts, parser::parse_counter(&html, "attemptCount").ok());
        set.insert_int(FieldKey::PuzzleSeconds, parser::parse_counter(&html, "trainingTime").ok());

        if set.is_empty() {
            return Err(CrawlerError::Malformed("puzzle page has no puzzle data".into()));
        }
        Ok(set)
    }
}
