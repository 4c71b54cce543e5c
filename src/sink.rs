use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};

use crate::{
    error::StorageError,
    models::{Itinerary, ItineraryStopTime, NormalizedItinerary},
};

// Postgres accepts at most 65535 bind parameters per statement.
const MAX_BIND_PARAMS: usize = 65_535;
const ITINERARY_COLUMNS: usize = 5;
const STOP_TIME_COLUMNS: usize = 9;

/// Durable destination for the itineraries of one task.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Writes every itinerary and stop time of one task atomically. Not retried.
    async fn persist(&self, batch: &[NormalizedItinerary]) -> Result<(), StorageError>;
}

/// Bulk-inserts into the `itineraries` and `itinerary_stop_times` tables.
pub struct PgResultSink {
    pool: PgPool,
}

impl PgResultSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persisted itinerary and stop time counts.
    pub async fn counts(&self) -> Result<(i64, i64), StorageError> {
        let itineraries: i64 = sqlx::query_scalar("SELECT count(*) FROM itineraries")
            .fetch_one(&self.pool)
            .await?;
        let stop_times: i64 = sqlx::query_scalar("SELECT count(*) FROM itinerary_stop_times")
            .fetch_one(&self.pool)
            .await?;
        Ok((itineraries, stop_times))
    }

    async fn insert_itineraries(
        tx: &mut Transaction<'_, Postgres>,
        itineraries: &[&Itinerary],
    ) -> Result<(), StorageError> {
        for chunk in itineraries.chunks(MAX_BIND_PARAMS / ITINERARY_COLUMNS) {
            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO itineraries (itinerary_id, from_stop_id, to_stop_id, start_time, end_time) ",
            );
            builder.push_values(chunk, |mut row, itinerary| {
                row.push_bind(itinerary.id)
                    .push_bind(&itinerary.origin_stop_id)
                    .push_bind(&itinerary.destination_stop_id)
                    .push_bind(itinerary.start_time)
                    .push_bind(itinerary.end_time);
            });
            builder.build().execute(&mut **tx).await?;
        }
        Ok(())
    }

    async fn insert_stop_times(
        tx: &mut Transaction<'_, Postgres>,
        stop_times: &[&ItineraryStopTime],
    ) -> Result<(), StorageError> {
        for chunk in stop_times.chunks(MAX_BIND_PARAMS / STOP_TIME_COLUMNS) {
            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO itinerary_stop_times (itinerary_id, itinerary_index, stop_id, route_id, \
                 trip_id, stop_index, arrival_time, departure_time, mode) ",
            );
            builder.push_values(chunk, |mut row, stop_time| {
                row.push_bind(stop_time.itinerary_id)
                    .push_bind(stop_time.sequence_index)
                    .push_bind(&stop_time.stop_id)
                    .push_bind(&stop_time.route_id)
                    .push_bind(&stop_time.trip_id)
                    .push_bind(stop_time.stop_index_in_trip)
                    .push_bind(stop_time.arrival_time)
                    .push_bind(stop_time.departure_time)
                    .push_bind(stop_time.mode.as_str());
            });
            builder.build().execute(&mut **tx).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ResultSink for PgResultSink {
    async fn persist(&self, batch: &[NormalizedItinerary]) -> Result<(), StorageError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        // Timestamps are written as UTC regardless of the server's zone.
        sqlx::query("SET LOCAL TIME ZONE 'UTC'")
            .execute(&mut *tx)
            .await?;

        let itineraries: Vec<&Itinerary> = batch.iter().map(|n| &n.itinerary).collect();
        Self::insert_itineraries(&mut tx, &itineraries).await?;

        let stop_times: Vec<&ItineraryStopTime> =
            batch.iter().flat_map(|n| n.stop_times.iter()).collect();
        Self::insert_stop_times(&mut tx, &stop_times).await?;

        tx.commit().await?;
        Ok(())
    }
}

/// Keeps batches in memory in write order. Used for dry runs.
#[derive(Default)]
pub struct MemorySink {
    batches: Mutex<Vec<Vec<NormalizedItinerary>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Vec<NormalizedItinerary>> {
        self.lock().clone()
    }

    pub fn itinerary_count(&self) -> usize {
        self.lock().iter().map(Vec::len).sum()
    }

    pub fn stop_time_count(&self) -> usize {
        self.lock()
            .iter()
            .flatten()
            .map(|n| n.stop_times.len())
            .sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Vec<NormalizedItinerary>>> {
        // A panic while holding the lock cannot leave a half-pushed batch.
        self.batches.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn persist(&self, batch: &[NormalizedItinerary]) -> Result<(), StorageError> {
        if !batch.is_empty() {
            self.lock().push(batch.to_vec());
        }
        Ok(())
    }
}
