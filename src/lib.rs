mod ratelimit;
mod requests;
mod utils;

pub mod config;
pub mod error;
pub mod executor;
pub mod filter;
pub mod models;
pub mod normalizer;
pub mod plan;
pub mod planner;
pub mod pool;
pub mod scraping_context;
pub mod sink;
pub mod stops;
pub mod tasks;

pub use config::{ClientConfig, LoadFromEnv, ScrapeEnv};
pub use error::{DataIntegrityError, PoolError, QueryError, StorageError, TaskError};
pub use executor::{RetryPolicy, RetryingQueryExecutor, TRANSIENT_PLANNER_MESSAGE};
pub use filter::ItineraryFilter;
pub use planner::{OtpClient, RoutePlanner};
pub use pool::{RunResult, ScraperPool, TaskOutcome, scrape, scrape_with_planner};
pub use scraping_context::{ScrapingContext, TaskReport};
pub use sink::{MemorySink, PgResultSink, ResultSink};
pub use tasks::OdTaskGenerator;
pub use utils::{dates_of_iso_week, haversine_km};
