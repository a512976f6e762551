use crate::error::{CrawlerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Stable key of a chess.com profile. Usernames are case-insensitive on the
/// platform, so the identity is stored lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PlayerIdentity(String);

impl PlayerIdentity {
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(CrawlerError::MissingField("player identity is empty".into()));
        }
        Ok(Self(trimmed.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PlayerIdentity {
    type Error = CrawlerError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<PlayerIdentity> for String {
    fn from(value: PlayerIdentity) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeControl {
    Bullet,
    Blitz,
    Rapid,
    Daily,
}

impl TimeControl {
    pub const ALL: [TimeControl; 4] = [
        TimeControl::Bullet,
        TimeControl::Blitz,
        TimeControl::Rapid,
        TimeControl::Daily,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeControl::Bullet => "bullet",
            TimeControl::Blitz => "blitz",
            TimeControl::Rapid => "rapid",
            TimeControl::Daily => "daily",
        }
    }

    /// Key of this time control in the public stats endpoint.
    pub fn stats_key(&self) -> &'static str {
        match self {
            TimeControl::Bullet => "chess_bullet",
            TimeControl::Blitz => "chess_blitz",
            TimeControl::Rapid => "chess_rapid",
            TimeControl::Daily => "chess_daily",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tc| tc.as_str() == value)
    }
}

impl fmt::Display for TimeControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingPoint {
    pub timestamp: i64,
    pub rating: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opponent {
    pub identity: PlayerIdentity,
    pub rating: Option<i64>,
}

/// Closed set of fields a fetcher may contribute to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldKey {
    PlayerId,
    Username,
    Status,
    Joined,
    LastOnline,
    Rating(TimeControl),
    GamesPlayed(TimeControl),
    RatingHistory(TimeControl),
    PuzzleRushBest,
    PuzzleRating,
    PuzzleHistory,
    PuzzleAttempts,
    PuzzleSeconds,
    Opponents,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Int(i64),
    Text(String),
    History(Vec<RatingPoint>),
    Opponents(Vec<Opponent>),
}

/// Fields contributed by one fetcher.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSet {
    pub fields: BTreeMap<FieldKey, FieldValue>,
    pub extras: BTreeMap<String, serde_json::Value>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: FieldKey, value: FieldValue) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: FieldKey, value: FieldValue) {
        self.fields.insert(key, value);
    }

    pub fn insert_int(&mut self, key: FieldKey, value: Option<i64>) {
        if let Some(v) = value {
            self.fields.insert(key, FieldValue::Int(v));
        }
    }

    pub fn insert_text(&mut self, key: FieldKey, value: Option<&str>) {
        if let Some(v) = value {
            self.fields.insert(key, FieldValue::Text(v.to_string()));
        }
    }

    pub fn insert_extra(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.extras.insert(key.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.extras.is_empty()
    }
}

/// A fetcher that failed without taking the record down with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingData {
    pub fetcher: String,
    /// Fields the fetcher would have provided.
    pub fields: Vec<FieldKey>,
    pub reason: String,
}

/// Everything collected about one player during a single visit.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRecord {
    identity: PlayerIdentity,
    fields: BTreeMap<FieldKey, FieldValue>,
    extras: BTreeMap<String, serde_json::Value>,
    missing: Vec<MissingData>,
}

impl PlayerRecord {
    pub fn new(identity: PlayerIdentity) -> Self {
        Self {
            identity,
            fields: BTreeMap::new(),
            extras: BTreeMap::new(),
            missing: Vec::new(),
        }
    }

    pub fn identity(&self) -> &PlayerIdentity {
        &self.identity
    }

    /// Merges a fetcher's contribution; later writers win per key.
    pub fn merge(&mut self, set: FieldSet) {
        self.fields.extend(set.fields);
        self.extras.extend(set.extras);
    }

    pub fn mark_missing(
        &mut self,
        fetcher: impl Into<String>,
        fields: Vec<FieldKey>,
        reason: impl Into<String>,
    ) {
        self.missing.push(MissingData {
            fetcher: fetcher.into(),
            fields,
            reason: reason.into(),
        });
    }

    pub fn missing(&self) -> &[MissingData] {
        &self.missing
    }

    /// Fields a failed fetcher should have set that no other fetcher filled.
    pub fn missing_fields(&self) -> BTreeSet<FieldKey> {
        self.missing
            .iter()
            .flat_map(|m| m.fields.iter().copied())
            .filter(|key| !self.fields.contains_key(key))
            .collect()
    }

    pub fn is_partial(&self) -> bool {
        !self.missing.is_empty()
    }

    pub fn get(&self, key: FieldKey) -> Option<&FieldValue> {
        self.fields.get(&key)
    }

    pub fn has(&self, key: FieldKey) -> bool {
        self.fields.contains_key(&key)
    }

    pub fn extra(&self, key: &str) -> Option<&serde_json::Value> {
        self.extras.get(key)
    }

    pub fn extras(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.extras
    }

    pub fn int(&self, key: FieldKey) -> Option<i64> {
        match self.fields.get(&key) {
            Some(FieldValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn text(&self, key: FieldKey) -> Option<&str> {
        match self.fields.get(&key) {
            Some(FieldValue::Text(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn history(&self, key: FieldKey) -> Option<&[RatingPoint]> {
        match self.fields.get(&key) {
            Some(FieldValue::History(points)) => Some(points.as_slice()),
            _ => None,
        }
    }

    pub fn rating(&self, tc: TimeControl) -> Option<i64> {
        self.int(FieldKey::Rating(tc))
    }

    pub fn games_played(&self, tc: TimeControl) -> Option<i64> {
        self.int(FieldKey::GamesPlayed(tc))
    }

    pub fn status(&self) -> Option<&str> {
        self.text(FieldKey::Status)
    }

    pub fn opponents(&self) -> Option<&[Opponent]> {
        match self.fields.get(&FieldKey::Opponents) {
            Some(FieldValue::Opponents(list)) => Some(list.as_slice()),
            _ => None,
        }
    }
}
