//! Crawl metrics under Prometheus naming conventions.

use crate::error::{CrawlerError, Result};
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::fmt;
use std::net::SocketAddr;
use tracing::info;

/// Every metric the crawler records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    Visits,
    ProfilesStored,
    ProfilesRejected,
    FetchFailures,
    SaveFailures,
    FetcherErrors,
    FetchDuration,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::Visits => "crawler_visits_total",
            MetricName::ProfilesStored => "crawler_profiles_stored_total",
            MetricName::ProfilesRejected => "crawler_profiles_rejected_total",
            MetricName::FetchFailures => "crawler_fetch_failures_total",
            MetricName::SaveFailures => "crawler_save_failures_total",
            MetricName::FetcherErrors => "crawler_fetcher_errors_total",
            MetricName::FetchDuration => "crawler_fetch_duration_seconds",
        }
    }

    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            Visits,
            ProfilesStored,
            ProfilesRejected,
            FetchFailures,
            SaveFailures,
            FetcherErrors,
            FetchDuration,
        ]
        .into_iter()
    }

    fn description(&self) -> &'static str {
        match self {
            MetricName::Visits => "Players visited",
            MetricName::ProfilesStored => "Accepted profiles persisted",
            MetricName::ProfilesRejected => "Profiles rejected by the filter stage",
            MetricName::FetchFailures => "Visits lost to a required fetcher failure",
            MetricName::SaveFailures => "Accepted profiles that failed to persist",
            MetricName::FetcherErrors => "Individual fetcher failures, by fetcher",
            MetricName::FetchDuration => "Time to fetch one player record",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn emit_counter(name: MetricName, value: u64) {
    counter!(name.as_str()).increment(value);
}

pub fn emit_labeled_counter(name: MetricName, label: &'static str, value: String) {
    counter!(name.as_str(), label => value).increment(1);
}

pub fn emit_histogram(name: MetricName, value: f64) {
    histogram!(name.as_str()).record(value);
}

/// Registers metric descriptions with the installed recorder.
pub fn describe_metrics() {
    for name in MetricName::all_metrics() {
        match name {
            MetricName::FetchDuration => {
                describe_histogram!(name.as_str(), Unit::Seconds, name.description())
            }
            _ => describe_counter!(name.as_str(), Unit::Count, name.description()),
        }
    }
}

/// Installs the Prometheus exporter with an HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| CrawlerError::Config(format!("failed to install Prometheus exporter: {e}")))?;
    describe_metrics();
    info!("Prometheus exporter listening on http://{}/metrics", addr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_prometheus_conventions() {
        for name in MetricName::all_metrics() {
            let s = name.as_str();
            assert!(s.starts_with("crawler_"));
            assert!(s.ends_with("_total") || s.ends_with("_seconds"), "{s}");
        }
    }

    #[test]
    fn recording_without_a_recorder_is_a_no_op() {
        emit_counter(MetricName::Visits, 1);
        emit_labeled_counter(MetricName::FetcherErrors, "fetcher", "profile".into());
        emit_histogram(MetricName::FetchDuration, 0.25);
    }
}
