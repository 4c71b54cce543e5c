use sqlx::PgPool;

use crate::{error::StorageError, models::StopId};

// Stops sharing coordinates are collapsed to one (the smallest id).
const ORIGINS_QUERY: &str = r#"
    SELECT min(stops.stop_id)
    FROM stop_times
    JOIN stops ON stops.stop_id = stop_times.stop_id
    WHERE stop_sequence = 1
    GROUP BY geom
"#;

const DESTINATIONS_QUERY: &str = r#"
    WITH last_stop_time_per_trip AS (
        SELECT
            stop_id,
            ROW_NUMBER() OVER (PARTITION BY trip_id ORDER BY stop_sequence DESC) AS seq_rank
        FROM stop_times
    )
    SELECT min(stops.stop_id)
    FROM last_stop_time_per_trip
    JOIN stops ON stops.stop_id = last_stop_time_per_trip.stop_id
    WHERE seq_rank = 1
    GROUP BY geom
"#;

const PROXY_STOPS_QUERY: &str = r#"
    UNION
    SELECT min(stops.stop_id)
    FROM stops
    WHERE stop_name IN (SELECT stop_name FROM proxy_stops)
    GROUP BY geom
"#;

/// Reads origin and destination stops from an imported GTFS feed.
pub struct StopSetResolver {
    pool: PgPool,
}

impl StopSetResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Stops where trips start.
    pub async fn origins(&self) -> Result<Vec<StopId>, StorageError> {
        self.fetch_ids(ORIGINS_QUERY.to_string()).await
    }

    /// Stops where trips end, plus the proxy stops standing in for
    /// destinations outside the region when `include_proxy_stops` is set.
    pub async fn destinations(&self, include_proxy_stops: bool) -> Result<Vec<StopId>, StorageError> {
        self.fetch_ids(destinations_query(include_proxy_stops)).await
    }

    async fn fetch_ids(&self, query: String) -> Result<Vec<StopId>, StorageError> {
        let mut ids: Vec<StopId> = sqlx::query_scalar(&query).fetch_all(&self.pool).await?;
        // GROUP BY gives no order; keep runs reproducible.
        ids.sort();
        Ok(ids)
    }
}

fn destinations_query(include_proxy_stops: bool) -> String {
    let mut query = DESTINATIONS_QUERY.to_string();
    if include_proxy_stops {
        query.push_str(PROXY_STOPS_QUERY);
    }
    query
}
