use std::sync::Arc;

use log::debug;

use crate::{
    error::TaskError,
    executor::{RetryPolicy, RetryingQueryExecutor},
    filter::ItineraryFilter,
    models::{Coordinate, ScrapeTask},
    normalizer::normalize,
    planner::RoutePlanner,
    sink::ResultSink,
};

/// Counts for one successfully processed task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskReport {
    /// Itineraries the planner returned, rejected ones included.
    pub itineraries_found: usize,
    pub itineraries_accepted: usize,
    pub stop_times_written: usize,
    /// Origin equals destination; nothing was requested.
    pub skipped: bool,
}

/// State shared by every worker of one run.
pub struct ScrapingContext<P, S> {
    pub executor: RetryingQueryExecutor<P>,
    pub filter: ItineraryFilter,
    pub sink: Arc<S>,
}

impl<P: RoutePlanner, S: ResultSink> ScrapingContext<P, S> {
    pub fn new(planner: Arc<P>, retry: RetryPolicy, filter: ItineraryFilter, sink: Arc<S>) -> Self {
        Self {
            executor: RetryingQueryExecutor::new(planner, retry),
            filter,
            sink,
        }
    }

    /// Query, filter, normalize and write one task.
    ///
    /// Nothing is written unless every accepted itinerary normalized cleanly.
    pub async fn scrape_task(&self, task: &ScrapeTask) -> Result<TaskReport, TaskError> {
        if task.is_self_pair() {
            return Ok(TaskReport {
                skipped: true,
                ..TaskReport::default()
            });
        }

        let plan = self.executor.execute(task).await?;
        let origin = Coordinate::from(plan.from);
        let destination = Coordinate::from(plan.to);

        let mut batch = Vec::new();
        for itinerary in &plan.itineraries {
            match self.filter.check(
                itinerary,
                origin,
                destination,
                task.travel_time_factor_threshold,
            ) {
                Ok(()) => batch.push(normalize(itinerary)?),
                Err(rejection) => debug!("{task}: skipping itinerary, {rejection:?}"),
            }
        }

        if !batch.is_empty() {
            self.sink.persist(&batch).await?;
        }

        Ok(TaskReport {
            itineraries_found: plan.itineraries.len(),
            itineraries_accepted: batch.len(),
            stop_times_written: batch.iter().map(|n| n.stop_times.len()).sum(),
            skipped: false,
        })
    }
}
