pub mod http_client;
pub mod rate_limiter_adapter;

pub use http_client::ReqwestHttp;
pub use rate_limiter_adapter::RateLimiterAdapter;
