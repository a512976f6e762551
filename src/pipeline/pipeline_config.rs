//! Declarative pipeline composition, read from the `[pipeline]` table.
//!
//! ```toml
//! [[pipeline.fetchers]]
//! kind = "live_history"
//! time_control = "rapid"
//!
//! [pipeline.selector]
//! kind = "higher_lower"
//! high_rating = 2400
//! ```

use super::fetch::{Fetcher, GetterPipeline};
use super::filter::{
    Discriminator, DiscriminatorPipeline, MinGamesDiscriminator, MinRatingDiscriminator,
    OpenAccountDiscriminator,
};
use super::getters::{
    ArchivedOpponentsFetcher, ProfileFetcher, PuzzlesFetcher, RatingHistoryFetcher, StatsFetcher,
};
use super::save::{ProfileSaver, RatingHistorySaver, Saver, SaverPipeline};
use super::selectors::{
    HigherLowerSelector, HighestRatedOpponentSelector, HighestUntilSwitchSelector, ListSelector,
    PlayerSelector, RandomOpponentSelector, RandomRelativeRatedSelector,
};
use crate::apis::ChessComClient;
use crate::constants::{DEFAULT_ARCHIVE_MONTHS, DEFAULT_LOW_RATING, DEFAULT_SWITCH_RATING};
use crate::error::{CrawlerError, Result};
use crate::retry::RetryPolicy;
use crate::storage::ProfileStore;
use crate::types::{PlayerIdentity, TimeControl};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

fn default_months() -> usize {
    DEFAULT_ARCHIVE_MONTHS
}

fn rapid() -> TimeControl {
    TimeControl::Rapid
}

fn default_switch_rating() -> i64 {
    DEFAULT_SWITCH_RATING
}

fn default_low_rating() -> i64 {
    DEFAULT_LOW_RATING
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetcherConfig {
    Profile,
    Stats,
    ArchivedOpponents {
        #[serde(default = "default_months")]
        months: usize,
        #[serde(default)]
        time_control: Option<TimeControl>,
    },
    LiveHistory {
        time_control: TimeControl,
    },
    DailyHistory,
    Puzzles,
}

impl FetcherConfig {
    /// Name of the built fetcher, as used by `run.required_fetchers`.
    pub fn name(&self) -> String {
        match self {
            FetcherConfig::Profile => "profile".into(),
            FetcherConfig::Stats => "stats".into(),
            FetcherConfig::ArchivedOpponents { time_control: None, .. } => "archived_opponents".into(),
            FetcherConfig::ArchivedOpponents { time_control: Some(tc), .. } => {
                format!("archived_opponents:{tc}")
            }
            FetcherConfig::LiveHistory { time_control } => format!("{time_control}_history"),
            FetcherConfig::DailyHistory => "daily_history".into(),
            FetcherConfig::Puzzles => "puzzles".into(),
        }
    }

    pub fn build(&self, client: Arc<ChessComClient>) -> Box<dyn Fetcher> {
        match self {
            FetcherConfig::Profile => Box::new(ProfileFetcher::new(client)),
            FetcherConfig::Stats => Box::new(StatsFetcher::new(client)),
            FetcherConfig::ArchivedOpponents { months, time_control } => {
                Box::new(ArchivedOpponentsFetcher::new(client, *months, *time_control))
            }
            FetcherConfig::LiveHistory { time_control } => {
                Box::new(RatingHistoryFetcher::new(client, *time_control))
            }
            FetcherConfig::DailyHistory => {
                Box::new(RatingHistoryFetcher::new(client, TimeControl::Daily))
            }
            FetcherConfig::Puzzles => Box::new(PuzzlesFetcher::new(client)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiscriminatorConfig {
    MinGames {
        #[serde(default = "rapid")]
        time_control: TimeControl,
        min: i64,
    },
    MinRating {
        #[serde(default = "rapid")]
        time_control: TimeControl,
        min: i64,
    },
    OpenAccount,
}

impl DiscriminatorConfig {
    pub fn build(&self) -> Box<dyn Discriminator> {
        match *self {
            DiscriminatorConfig::MinGames { time_control, min } => {
                Box::new(MinGamesDiscriminator { time_control, min })
            }
            DiscriminatorConfig::MinRating { time_control, min } => {
                Box::new(MinRatingDiscriminator { time_control, min })
            }
            DiscriminatorConfig::OpenAccount => Box::new(OpenAccountDiscriminator),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SaverConfig {
    Profile,
    RatingHistory { time_control: TimeControl },
}

impl SaverConfig {
    pub fn build(&self) -> Box<dyn Saver> {
        match *self {
            SaverConfig::Profile => Box::new(ProfileSaver),
            SaverConfig::RatingHistory { time_control } => {
                Box::new(RatingHistorySaver { time_control })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectorConfig {
    RandomOpponent {
        #[serde(default)]
        seed: Option<u64>,
    },
    HighestRatedOpponent,
    RandomHigherRated {
        #[serde(default = "rapid")]
        time_control: TimeControl,
        #[serde(default)]
        seed: Option<u64>,
    },
    RandomLowerRated {
        #[serde(default = "rapid")]
        time_control: TimeControl,
        #[serde(default)]
        seed: Option<u64>,
    },
    HighestUntilSwitch {
        #[serde(default = "default_switch_rating")]
        switch_rating: i64,
        #[serde(default = "rapid")]
        time_control: TimeControl,
        #[serde(default)]
        seed: Option<u64>,
    },
    HigherLower {
        #[serde(default = "default_switch_rating")]
        high_rating: i64,
        #[serde(default = "default_low_rating")]
        low_rating: i64,
        #[serde(default = "rapid")]
        time_control: TimeControl,
        #[serde(default)]
        seed: Option<u64>,
    },
    List {
        identities: Vec<PlayerIdentity>,
    },
}

impl SelectorConfig {
    pub fn build(&self) -> Box<dyn PlayerSelector> {
        match self {
            SelectorConfig::RandomOpponent { seed } => Box::new(RandomOpponentSelector::new(*seed)),
            SelectorConfig::HighestRatedOpponent => Box::new(HighestRatedOpponentSelector::new()),
            SelectorConfig::RandomHigherRated { time_control, seed } => {
                Box::new(RandomRelativeRatedSelector::higher(*time_control, *seed))
            }
            SelectorConfig::RandomLowerRated { time_control, seed } => {
                Box::new(RandomRelativeRatedSelector::lower(*time_control, *seed))
            }
            SelectorConfig::HighestUntilSwitch { switch_rating, time_control, seed } => Box::new(
                HighestUntilSwitchSelector::new(*switch_rating, *time_control, *seed),
            ),
            SelectorConfig::HigherLower { high_rating, low_rating, time_control, seed } => Box::new(
                HigherLowerSelector::new(*high_rating, *low_rating, *time_control, *seed),
            ),
            SelectorConfig::List { identities } => Box::new(ListSelector::new(identities.clone())),
        }
    }
}

/// Ordered fetch, filter and save stages plus the selector of one crawl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub fetchers: Vec<FetcherConfig>,
    #[serde(default)]
    pub discriminators: Vec<DiscriminatorConfig>,
    pub savers: Vec<SaverConfig>,
    pub selector: SelectorConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::default_profile_crawl()
    }
}

impl PipelineConfig {
    /// Profile, stats, puzzles and every rating history; keeps open accounts
    /// with at least 50 rapid games and bounces between rating bands.
    pub fn default_profile_crawl() -> Self {
        Self {
            fetchers: vec![
                FetcherConfig::Profile,
                FetcherConfig::Stats,
                FetcherConfig::Puzzles,
                FetcherConfig::LiveHistory { time_control: TimeControl::Bullet },
                FetcherConfig::LiveHistory { time_control: TimeControl::Blitz },
                FetcherConfig::LiveHistory { time_control: TimeControl::Rapid },
                FetcherConfig::DailyHistory,
                FetcherConfig::ArchivedOpponents {
                    months: DEFAULT_ARCHIVE_MONTHS,
                    time_control: None,
                },
            ],
            discriminators: vec![
                DiscriminatorConfig::MinGames { time_control: TimeControl::Rapid, min: 50 },
                DiscriminatorConfig::OpenAccount,
            ],
            savers: vec![
                SaverConfig::Profile,
                SaverConfig::RatingHistory { time_control: TimeControl::Rapid },
                SaverConfig::RatingHistory { time_control: TimeControl::Bullet },
                SaverConfig::RatingHistory { time_control: TimeControl::Blitz },
            ],
            selector: SelectorConfig::HigherLower {
                high_rating: DEFAULT_SWITCH_RATING,
                low_rating: DEFAULT_LOW_RATING,
                time_control: TimeControl::Rapid,
                seed: None,
            },
        }
    }

    pub fn fetcher_names(&self) -> Vec<String> {
        self.fetchers.iter().map(FetcherConfig::name).collect()
    }

    pub fn validate(&self, required_fetchers: &[String]) -> Result<()> {
        if self.fetchers.is_empty() {
            return Err(CrawlerError::Config("pipeline.fetchers is empty".into()));
        }
        if self.savers.is_empty() {
            return Err(CrawlerError::Config("pipeline.savers is empty".into()));
        }

        let names = self.fetcher_names();
        let mut seen = HashSet::new();
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(CrawlerError::Config(format!("fetcher '{name}' is configured twice")));
            }
        }
        for required in required_fetchers {
            if !seen.contains(required.as_str()) {
                return Err(CrawlerError::Config(format!(
                    "required fetcher '{required}' is not configured (have: {})",
                    names.join(", ")
                )));
            }
        }
        if let SelectorConfig::HigherLower { high_rating, low_rating, .. } = self.selector {
            if low_rating >= high_rating {
                return Err(CrawlerError::Config(format!(
                    "higher_lower low_rating {low_rating} must be below high_rating {high_rating}"
                )));
            }
        }
        Ok(())
    }

    pub fn build_getter(
        &self,
        client: Arc<ChessComClient>,
        retry: RetryPolicy,
        concurrency: usize,
        required_fetchers: &[String],
    ) -> GetterPipeline {
        let mut getter = GetterPipeline::new(retry, concurrency);
        for config in &self.fetchers {
            let required = required_fetchers.contains(&config.name());
            getter.push(config.build(client.clone()), required);
        }
        getter
    }

    pub fn build_discriminator(&self) -> DiscriminatorPipeline {
        let mut pipeline = DiscriminatorPipeline::new();
        for config in &self.discriminators {
            pipeline.push(config.build());
        }
        pipeline
    }

    pub fn build_saver(&self, store: Arc<dyn ProfileStore>, retry: RetryPolicy) -> SaverPipeline {
        let mut pipeline = SaverPipeline::new(store, retry);
        for config in &self.savers {
            pipeline.push(config.build());
        }
        pipeline
    }

    pub fn build_selector(&self) -> Box<dyn PlayerSelector> {
        self.selector.build()
    }
}
