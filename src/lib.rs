pub mod apis;
pub mod config;
pub mod constants;
pub mod crawler;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod parser;
pub mod pipeline;
pub mod rate_limiter;
pub mod retry;
pub mod storage;
pub mod types;

// Ports the crawl core calls through, and their adapters
pub mod app;
pub mod infra;

pub use crawler::{CrawlReport, CrawlState, Crawler, StopCondition, StopReason};
pub use error::{CrawlerError, Result};
