use crate::app::ports::{HttpClientPort, HttpGetResult, RateLimiterPort};
use crate::constants::{CHESS_COM_API_BASE, CHESS_COM_STATS_BASE};
use crate::error::{CrawlerError, Result};
use crate::infra::RateLimiterAdapter;
use crate::rate_limiter::RateLimiter;
use crate::types::{PlayerIdentity, TimeControl};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Remote profile source: builds chess.com URLs, rate-limits requests and
/// turns HTTP statuses into classified errors.
pub struct ChessComClient {
    http: Arc<dyn HttpClientPort>,
    limiter: Arc<dyn RateLimiterPort>,
    api_base: String,
    stats_base: String,
}

impl ChessComClient {
    pub fn new(http: Arc<dyn HttpClientPort>, limiter: RateLimiter) -> Self {
        Self {
            http,
            limiter: Arc::new(RateLimiterAdapter(limiter)),
            api_base: CHESS_COM_API_BASE.to_string(),
            stats_base: CHESS_COM_STATS_BASE.to_string(),
        }
    }

    pub fn profile_url(&self, id: &PlayerIdentity) -> String {
        format!("{}/{}", self.api_base, id)
    }

    pub fn stats_url(&self, id: &PlayerIdentity) -> String {
        format!("{}/{}/stats", self.api_base, id)
    }

    pub fn archives_url(&self, id: &PlayerIdentity) -> String {
        format!("{}/{}/games/archives", self.api_base, id)
    }

    pub fn live_stats_url(&self, tc: TimeControl, id: &PlayerIdentity) -> String {
        match tc {
            TimeControl::Daily => format!("{}/daily/chess/{}", self.stats_base, id),
            live => format!("{}/live/{}/{}", self.stats_base, live, id),
        }
    }

    pub fn puzzles_url(&self, id: &PlayerIdentity) -> String {
        format!("{}/puzzles/{}", self.stats_base, id)
    }

    #[instrument(skip(self), fields(identity = %id))]
    pub async fn get_json(&self, url: &str, id: &PlayerIdentity) -> Result<Value> {
        let resp = self.get(url, id).await?;
        serde_json::from_slice(&resp.bytes)
            .map_err(|e| CrawlerError::Malformed(format!("{url}: {e}")))
    }

    #[instrument(skip(self), fields(identity = %id))]
    pub async fn get_html(&self, url: &str, id: &PlayerIdentity) -> Result<String> {
        Ok(self.get(url, id).await?.text())
    }

    async fn get(&self, url: &str, id: &PlayerIdentity) -> Result<HttpGetResult> {
        let _permit = self.limiter.acquire().await;
        debug!("GET {}", url);
        let resp = self.http.get(url).await?;
        classify(resp, id)
    }
}

fn classify(resp: HttpGetResult, id: &PlayerIdentity) -> Result<HttpGetResult> {
    match resp.status {
        _ if resp.is_success() => Ok(resp),
        404 | 410 => Err(CrawlerError::NotFound(id.to_string())),
        429 => Err(CrawlerError::RateLimited { retry_after: resp.retry_after }),
        s if s >= 500 => Err(CrawlerError::Unavailable { status: s }),
        status => {
            let message: String = resp.text().chars().take(200).collect();
            Err(CrawlerError::Api { status, message })
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{client_with, MockHttp};
    use super::*;

    fn id(name: &str) -> PlayerIdentity {
        PlayerIdentity::new(name).unwrap()
    }

    #[test]
    fn builds_stats_page_urls_per_time_control() {
        let client = client_with(Arc::new(MockHttp::default()));
        let p = id("Hikaru");
        assert_eq!(client.profile_url(&p), "https://api.chess.com/pub/player/hikaru");
        assert_eq!(
            client.live_stats_url(TimeControl::Rapid, &p),
            "https://www.chess.com/stats/live/rapid/hikaru"
        );
        assert_eq!(
            client.live_stats_url(TimeControl::Daily, &p),
            "https://www.chess.com/stats/daily/chess/hikaru"
        );
    }

    #[tokio::test]
    async fn classifies_error_statuses() {
        let mock = Arc::new(MockHttp::default());
        let client = client_with(mock.clone());
        let p = id("someone");
        mock.respond(client.stats_url(&p), 429, "");
        mock.respond(client.archives_url(&p), 502, "");

        let missing = client.get_json(&client.profile_url(&p), &p).await;
        assert!(matches!(missing, Err(CrawlerError::NotFound(_))));

        let limited = client.get_json(&client.stats_url(&p), &p).await;
        assert!(matches!(limited, Err(CrawlerError::RateLimited { .. })));

        let down = client.get_json(&client.archives_url(&p), &p).await;
        assert!(matches!(down, Err(CrawlerError::Unavailable { status: 502 })));
    }

    #[tokio::test]
    async fn invalid_json_is_malformed() {
        let mock = Arc::new(MockHttp::default());
        let client = client_with(mock.clone());
        let p = id("someone");
        mock.respond(client.profile_url(&p), 200, "<html>oops</html>");

        let result = client.get_json(&client.profile_url(&p), &p).await;
        assert!(matches!(result, Err(CrawlerError::Malformed(_))));
    }
}
