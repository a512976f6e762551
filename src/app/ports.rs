use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

// Remote source ports
#[async_trait]
pub trait HttpClientPort: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpGetResult>;
}

#[derive(Clone, Debug)]
pub struct HttpGetResult {
    pub status: u16,
    pub bytes: Vec<u8>,
    pub retry_after: Option<Duration>,
}

impl HttpGetResult {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Held while a request is in flight.
pub type RatePermit = Box<dyn Send>;

#[async_trait]
pub trait RateLimiterPort: Send + Sync {
    async fn acquire(&self) -> RatePermit;
}
