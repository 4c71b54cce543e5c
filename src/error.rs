use thiserror::Error;

/// Failure to obtain a plan from the routing service.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("unknown planner error for {url}: {message}")]
    Upstream { url: String, message: String },
    #[error("no plan for {url} after {attempts} attempts: {message}")]
    RetriesExhausted {
        url: String,
        message: String,
        attempts: u32,
    },
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("malformed planner response from {url}: {message}")]
    Malformed { url: String, message: String },
}

impl QueryError {
    /// Connection, timeout and HTTP status failures. Malformed bodies are not
    /// counted as transport failures.
    pub fn is_transport(&self) -> bool {
        matches!(self, QueryError::Transport { .. })
    }

    pub fn url(&self) -> &str {
        match self {
            QueryError::Upstream { url, .. }
            | QueryError::RetriesExhausted { url, .. }
            | QueryError::Transport { url, .. }
            | QueryError::Malformed { url, .. } => url,
        }
    }
}

/// The planner returned something that breaks the shape we persist.
#[derive(Debug, Error, PartialEq)]
pub enum DataIntegrityError {
    #[error("leg mode {mode} is not one of the allowed transit modes")]
    UnexpectedMode { mode: String },
    #[error("{place} of leg {leg} has no stop id")]
    MissingStopId { leg: usize, place: &'static str },
    #[error("{place} of leg {leg} has no {field} time")]
    MissingTime {
        leg: usize,
        place: &'static str,
        field: &'static str,
    },
    #[error("timestamp {0} ms is out of range")]
    TimestampOutOfRange(i64),
    #[error("itinerary has no legs")]
    NoLegs,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Everything that can fail a single scrape task.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    DataIntegrity(#[from] DataIntegrityError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("task panicked: {0}")]
    Panicked(String),
}

/// Failure to set up a run. Once workers start, failures are per task.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to set up the planner client: {0:#}")]
    Client(anyhow::Error),
}
