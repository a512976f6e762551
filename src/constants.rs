//! Endpoints and defaults for the chess.com sources.

// Public JSON API
pub const CHESS_COM_API_BASE: &str = "https://api.chess.com/pub/player";

// HTML stats pages (rating history lives in inline scripts)
pub const CHESS_COM_STATS_BASE: &str = "https://www.chess.com/stats";

pub const DEFAULT_USER_AGENT: &str = "chess_crawler/0.1";

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const DEFAULT_DATABASE_PATH: &str = "data/chess_crawler.db";

pub const ENV_CONFIG_PATH: &str = "CHESS_CRAWLER_CONFIG";
pub const ENV_DATABASE_PATH: &str = "CHESS_CRAWLER_DB";
pub const ENV_USER_AGENT: &str = "CHESS_CRAWLER_USER_AGENT";

// Archive months read by the opponents fetcher when not configured
pub const DEFAULT_ARCHIVE_MONTHS: usize = 3;

// Ratings used by the switching selectors
pub const DEFAULT_SWITCH_RATING: i64 = 2400;
pub const DEFAULT_LOW_RATING: i64 = 600;
