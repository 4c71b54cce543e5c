use reqwest::{Client, ClientBuilder, Response, StatusCode};

use crate::{config::ClientConfig, ratelimit::RateLimiter};

pub struct RequestClient {
    client: Client,
    rate_limiter: RateLimiter,
}

impl RequestClient {
    pub fn new(config: &ClientConfig) -> reqwest::Result<Self> {
        let client = ClientBuilder::new()
            .timeout(config.request_timeout)
            .build()?;
        let rate_limiter =
            RateLimiter::new(config.requests_per_second, config.min_gap_between_requests);
        Ok(Self {
            client,
            rate_limiter,
        })
    }

    pub async fn fetch_url_response(&self, url: &str) -> reqwest::Result<Response> {
        // Wait (non-blocking) until we're allowed to make a request according
        // to our self-imposed rate-limiting policy.
        self.rate_limiter.wait_until_ready().await;

        let response = self.client.get(url).send().await?;
        Ok(response)
    }

    /// The planner reports its own errors in the body, so non-2xx statuses
    /// are handed back with the body instead of being turned into errors here.
    pub async fn fetch_url_body(&self, url: &str) -> reqwest::Result<(StatusCode, String)> {
        let response = self.fetch_url_response(url).await?;
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }
}
