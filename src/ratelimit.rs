use governor::{DefaultDirectRateLimiter, Quota, RateLimiter as GovernorRateLimiter};
use std::{num::NonZeroU32, time::Duration};

type SpecificGovernorRateLimiter = DefaultDirectRateLimiter;

/// Shared by every worker so the router sees the combined request rate.
pub struct RateLimiter {
    req_per_sec: SpecificGovernorRateLimiter,
    min_gap: Option<SpecificGovernorRateLimiter>,
}

impl RateLimiter {
    pub fn new(req_per_sec: NonZeroU32, min_gap: Option<Duration>) -> Self {
        // Limit to X total req/sec on average.
        let req_per_sec = GovernorRateLimiter::direct(Quota::per_second(req_per_sec));

        // No two requests closer than Y. A zero period yields no quota.
        let min_gap = min_gap
            .and_then(Quota::with_period)
            .map(GovernorRateLimiter::direct);

        RateLimiter {
            req_per_sec,
            min_gap,
        }
    }

    pub async fn wait_until_ready(&self) {
        // Await the coarse limiter first: otherwise callers queued behind a
        // small gap could all cross the per-second boundary at once.
        self.req_per_sec.until_ready().await;
        if let Some(min_gap) = &self.min_gap {
            min_gap.until_ready().await;
        }
    }
}
