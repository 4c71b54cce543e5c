use std::{fmt, sync::Arc};

use chrono::NaiveDate;
use itertools::{Itertools, iproduct};

use crate::models::{ScrapeTask, StopId};

type TaskStream = Box<dyn Iterator<Item = ScrapeTask> + Send>;

/// Lazily walks origins x destinations x dates.
///
/// Tasks are produced on demand, so the full product (often hundreds of
/// thousands of combinations) never sits in memory.
pub struct OdTaskGenerator {
    origins: Arc<[StopId]>,
    destinations: Arc<[StopId]>,
    dates: Arc<[NaiveDate]>,
    threshold: f64,
    tasks: TaskStream,
}

impl OdTaskGenerator {
    pub fn new(
        origins: impl IntoIterator<Item = StopId>,
        destinations: impl IntoIterator<Item = StopId>,
        dates: impl IntoIterator<Item = NaiveDate>,
        threshold: f64,
    ) -> Self {
        let origins: Arc<[StopId]> = origins.into_iter().unique().collect();
        let destinations: Arc<[StopId]> = destinations.into_iter().unique().collect();
        let dates: Arc<[NaiveDate]> = dates.into_iter().collect();
        let tasks = product(&origins, &destinations, &dates, threshold);
        Self {
            origins,
            destinations,
            dates,
            threshold,
            tasks,
        }
    }

    /// |origins| x |destinations| x |dates|, self pairs included.
    pub fn upper_bound(&self) -> usize {
        self.origins.len() * self.destinations.len() * self.dates.len()
    }

    pub fn origin_count(&self) -> usize {
        self.origins.len()
    }

    pub fn destination_count(&self) -> usize {
        self.destinations.len()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// The first task of the full product, wherever this generator currently
    /// stands. Never a self pair.
    pub fn warm_up_task(&self) -> Option<ScrapeTask> {
        product(&self.origins, &self.destinations, &self.dates, self.threshold).next()
    }
}

/// Origin-major product with self pairs dropped.
fn product(
    origins: &Arc<[StopId]>,
    destinations: &Arc<[StopId]>,
    dates: &Arc<[NaiveDate]>,
    threshold: f64,
) -> TaskStream {
    let (origins, destinations, dates) = (
        Arc::clone(origins),
        Arc::clone(destinations),
        Arc::clone(dates),
    );
    let indices = iproduct!(0..origins.len(), 0..destinations.len(), 0..dates.len());
    Box::new(indices.filter_map(move |(o, d, t)| {
        let (origin, destination) = (&origins[o], &destinations[d]);
        (origin != destination).then(|| ScrapeTask {
            origin_stop_id: origin.clone(),
            destination_stop_id: destination.clone(),
            date: dates[t],
            travel_time_factor_threshold: threshold,
        })
    }))
}

impl Iterator for OdTaskGenerator {
    type Item = ScrapeTask;

    fn next(&mut self) -> Option<ScrapeTask> {
        self.tasks.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.tasks.size_hint()
    }
}

impl fmt::Debug for OdTaskGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OdTaskGenerator")
            .field("origins", &self.origins.len())
            .field("destinations", &self.destinations.len())
            .field("dates", &self.dates)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}
