// Per-visit stages: fetch, filter, save, and picking the next player

pub mod fetch;
pub mod filter;
pub mod getters;
pub mod pipeline_config;
pub mod save;
pub mod selectors;

// Re-export the stage types the crawler is assembled from
pub use fetch::{FetchFailure, Fetcher, GetterPipeline};
pub use filter::{Discriminator, DiscriminatorPipeline, Verdict};
pub use pipeline_config::PipelineConfig;
pub use save::{SaveFailure, Saver, SaverPipeline};
pub use selectors::{PlayerSelector, Selection};
