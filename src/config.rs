use std::{num::NonZeroU32, time::Duration};

use anyhow::Context;
use nonzero_ext::nonzero;
use serde::{Deserialize, de::DeserializeOwned};

use crate::executor::RetryPolicy;

pub const DEFAULT_PLAN_URL: &str = "http://localhost:8088/otp/routers/default/plan";

/// The env vars needed for scraping. Every field but `database_url` has a default.
#[derive(Debug, Deserialize)]
pub struct ScrapeEnv {
    pub database_url: Option<String>,
    #[serde(default = "ScrapeEnv::default_otp_plan_url")]
    pub otp_plan_url: String,
    #[serde(default = "ScrapeEnv::default_otp_feed_id")]
    pub otp_feed_id: String,
    #[serde(default = "ScrapeEnv::default_max_walk_distance")]
    pub max_walk_distance: u32,
    #[serde(default = "ScrapeEnv::default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "ScrapeEnv::default_requests_per_second")]
    pub requests_per_second: u32,
    #[serde(default)]
    pub min_ms_between_requests: u64,
    #[serde(default = "ScrapeEnv::default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default)]
    pub retry_transport_errors: bool,
    #[serde(default = "ScrapeEnv::default_car_kmh")]
    pub car_kmh: f64,
    #[serde(default = "ScrapeEnv::default_car_travel_factor")]
    pub car_travel_factor: f64,
    #[serde(default = "ScrapeEnv::default_travel_time_factor_threshold")]
    pub travel_time_factor_threshold: f64,
    pub workers: Option<usize>,
    #[serde(default = "ScrapeEnv::default_chunk_size")]
    pub chunk_size: usize,
    pub scrape_year: Option<i32>,
    pub scrape_week: Option<u32>,
    #[serde(default = "ScrapeEnv::default_include_proxy_stops")]
    pub include_proxy_stops: bool,
    #[serde(default = "ScrapeEnv::default_progress_interval_secs")]
    pub progress_interval_secs: u64,
    #[serde(default)]
    pub dry_run: bool,
}

impl ScrapeEnv {
    fn default_otp_plan_url() -> String {
        DEFAULT_PLAN_URL.to_string()
    }
    fn default_otp_feed_id() -> String {
        "1".to_string()
    }
    fn default_max_walk_distance() -> u32 {
        1000
    }
    fn default_request_timeout_secs() -> u64 {
        120
    }
    fn default_requests_per_second() -> u32 {
        DEFAULT_REQ_PER_SEC.get()
    }
    fn default_retry_backoff_ms() -> u64 {
        3140
    }
    fn default_car_kmh() -> f64 {
        50.0
    }
    fn default_car_travel_factor() -> f64 {
        1.4
    }
    fn default_travel_time_factor_threshold() -> f64 {
        2.0
    }
    fn default_chunk_size() -> usize {
        10_000
    }
    fn default_include_proxy_stops() -> bool {
        true
    }
    fn default_progress_interval_secs() -> u64 {
        300
    }

    pub fn client_config(&self) -> anyhow::Result<ClientConfig> {
        let requests_per_second = NonZeroU32::new(self.requests_per_second)
            .context("REQUESTS_PER_SECOND must be greater than zero")?;
        anyhow::ensure!(
            self.car_kmh.is_finite() && self.car_kmh > 0.0,
            "CAR_KMH must be a positive number, got {}",
            self.car_kmh
        );
        anyhow::ensure!(
            self.car_travel_factor.is_finite() && self.car_travel_factor > 0.0,
            "CAR_TRAVEL_FACTOR must be a positive number, got {}",
            self.car_travel_factor
        );
        Ok(ClientConfig {
            plan_url: self.otp_plan_url.clone(),
            feed_id: self.otp_feed_id.clone(),
            max_walk_distance: self.max_walk_distance,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            requests_per_second,
            min_gap_between_requests: (self.min_ms_between_requests > 0)
                .then(|| Duration::from_millis(self.min_ms_between_requests)),
            retry: RetryPolicy {
                backoff: Duration::from_millis(self.retry_backoff_ms),
                retry_transport_errors: self.retry_transport_errors,
                ..RetryPolicy::default()
            },
            car: CarModel {
                kmh: self.car_kmh,
                travel_factor: self.car_travel_factor,
            },
            workers: self.workers.unwrap_or_else(default_workers),
            chunk_size: self.chunk_size.max(1),
        })
    }
}

// The higher, the more load on the router.
pub const DEFAULT_REQ_PER_SEC: NonZeroU32 = nonzero!(200u32);

/// Everything the scraper core needs to talk to the planner and size its pool.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub plan_url: String,
    /// Feed id prefixed to stop ids in `fromPlace`/`toPlace`.
    pub feed_id: String,
    /// Meters.
    pub max_walk_distance: u32,
    pub request_timeout: Duration,
    pub requests_per_second: NonZeroU32,
    pub min_gap_between_requests: Option<Duration>,
    pub retry: RetryPolicy,
    pub car: CarModel,
    pub workers: usize,
    pub chunk_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            plan_url: DEFAULT_PLAN_URL.to_string(),
            feed_id: "1".to_string(),
            max_walk_distance: 1000,
            request_timeout: Duration::from_secs(120),
            requests_per_second: DEFAULT_REQ_PER_SEC,
            min_gap_between_requests: None,
            retry: RetryPolicy::default(),
            car: CarModel::default(),
            workers: default_workers(),
            chunk_size: 10_000,
        }
    }
}

/// Assumed car travel, used as the yardstick for transit durations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CarModel {
    pub kmh: f64,
    /// Street distance over linear distance.
    pub travel_factor: f64,
}

impl Default for CarModel {
    fn default() -> Self {
        Self {
            kmh: 50.0,
            travel_factor: 1.4,
        }
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

// Extension trait.
pub trait LoadFromEnv: DeserializeOwned {
    fn load_from_env() -> anyhow::Result<Self> {
        // Don't throw an error if .env file doesn't exist.
        let _ = dotenv::dotenv();
        let config =
            envy::from_env::<Self>().context("failed to load env variables into config struct")?;
        Ok(config)
    }
}

impl<T: DeserializeOwned> LoadFromEnv for T {}
