use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use chrono::NaiveDate;
use futures::FutureExt;
use log::{debug, error, info, warn};
use tokio::{sync::watch, task::JoinSet};

use crate::{
    config::ClientConfig,
    error::{PoolError, TaskError},
    filter::ItineraryFilter,
    models::{ScrapeTask, StopId},
    planner::{OtpClient, RoutePlanner},
    scraping_context::{ScrapingContext, TaskReport},
    sink::ResultSink,
    tasks::OdTaskGenerator,
};

pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

#[derive(Debug)]
pub struct TaskOutcome {
    pub task: ScrapeTask,
    pub result: Result<TaskReport, TaskError>,
}

/// Every outcome of a run. Data of successful tasks stays persisted even
/// when the run as a whole failed.
#[derive(Debug, Default)]
pub struct RunResult {
    pub outcomes: Vec<TaskOutcome>,
    /// The run was stopped before the task stream was drained.
    pub cancelled: bool,
    /// Workers that died outside of a task. Their finished outcomes are lost,
    /// the other workers' are not.
    pub lost_workers: usize,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        !self.cancelled
            && self.lost_workers == 0
            && self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&ScrapeTask, &TaskError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (&o.task, e)))
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    fn reports(&self) -> impl Iterator<Item = &TaskReport> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    pub fn itineraries_accepted(&self) -> usize {
        self.reports().map(|r| r.itineraries_accepted).sum()
    }

    pub fn itineraries_found(&self) -> usize {
        self.reports().map(|r| r.itineraries_found).sum()
    }

    pub fn stop_times_written(&self) -> usize {
        self.reports().map(|r| r.stop_times_written).sum()
    }
}

/// Fixed number of workers draining one shared, lazily generated task stream.
pub struct ScraperPool<P, S> {
    context: Arc<ScrapingContext<P, S>>,
    workers: usize,
    chunk_size: usize,
}

impl<P, S> ScraperPool<P, S>
where
    P: RoutePlanner + 'static,
    S: ResultSink + 'static,
{
    pub fn new(context: ScrapingContext<P, S>, workers: usize) -> Self {
        Self {
            context: Arc::new(context),
            workers: workers.max(1),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// One throwaway request so the router finishes its first-query setup
    /// before the workers hit it. The result is discarded.
    pub async fn warm_up(&self, task: &ScrapeTask) {
        if task.is_self_pair() {
            return;
        }
        debug!("Performing a dummy request to make sure the router is fully prepared.");
        match self.context.executor.planner().plan(task).await {
            Ok(reply) => debug!("Dummy request yielded: {reply:?}"),
            Err(e) => warn!("Dummy request failed, continuing anyway: {e}"),
        }
    }

    pub async fn run<I>(&self, tasks: I) -> RunResult
    where
        I: Iterator<Item = ScrapeTask> + Send + 'static,
    {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        self.run_with_shutdown(tasks, shutdown_rx).await
    }

    /// Like `run`, but workers stop taking new tasks once `shutdown` turns
    /// true. Tasks already in flight finish (or fail) normally.
    pub async fn run_with_shutdown<I>(
        &self,
        tasks: I,
        shutdown: watch::Receiver<bool>,
    ) -> RunResult
    where
        I: Iterator<Item = ScrapeTask> + Send + 'static,
    {
        let expected = tasks.size_hint().1;
        let chunk_size = balanced_chunk_size(expected, self.workers, self.chunk_size);
        info!(
            "Using {} workers, handing out tasks in chunks of {chunk_size}.",
            self.workers
        );

        let queue = Arc::new(Mutex::new(tasks));
        let done = Arc::new(AtomicUsize::new(0));
        let mut join_set = JoinSet::new();
        for worker_id in 0..self.workers {
            let worker = Worker {
                id: worker_id,
                context: Arc::clone(&self.context),
                queue: Arc::clone(&queue),
                done: Arc::clone(&done),
                expected,
                chunk_size,
                shutdown: shutdown.clone(),
            };
            join_set.spawn(worker.run());
        }

        let mut result = RunResult::default();
        // drain every worker, one dying must not abort the others
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((outcomes, cancelled)) => {
                    result.outcomes.extend(outcomes);
                    result.cancelled |= cancelled;
                }
                Err(e) => {
                    error!("Scraper worker died: {e}");
                    result.lost_workers += 1;
                }
            }
        }

        info!(
            "Processed {} tasks: {} failed, {} of {} itineraries accepted, {} stop times written.",
            result.outcomes.len(),
            result.failure_count(),
            result.itineraries_accepted(),
            result.itineraries_found(),
            result.stop_times_written()
        );
        if result.cancelled {
            warn!("Run was cancelled before all tasks were processed.");
        }
        result
    }
}

/// Big chunks amortise the queue lock; near the end they would leave most
/// workers idle, so keep at least four chunks per worker.
fn balanced_chunk_size(expected: Option<usize>, workers: usize, max_chunk: usize) -> usize {
    match expected {
        Some(total) => (total / (workers * 4)).clamp(1, max_chunk.max(1)),
        None => max_chunk.max(1),
    }
}

struct Worker<P, S, I> {
    id: usize,
    context: Arc<ScrapingContext<P, S>>,
    queue: Arc<Mutex<I>>,
    done: Arc<AtomicUsize>,
    expected: Option<usize>,
    chunk_size: usize,
    shutdown: watch::Receiver<bool>,
}

impl<P, S, I> Worker<P, S, I>
where
    P: RoutePlanner,
    S: ResultSink,
    I: Iterator<Item = ScrapeTask>,
{
    fn next_chunk(&self) -> Vec<ScrapeTask> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue.by_ref().take(self.chunk_size).collect()
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn run(self) -> (Vec<TaskOutcome>, bool) {
        let mut outcomes = Vec::new();
        loop {
            if self.stopping() {
                return (outcomes, true);
            }
            let chunk = self.next_chunk();
            if chunk.is_empty() {
                return (outcomes, false);
            }

            let chunk_len = chunk.len();
            for task in chunk {
                if self.stopping() {
                    return (outcomes, true);
                }
                let result = AssertUnwindSafe(self.context.scrape_task(&task))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(TaskError::Panicked(panic_message(&*payload))));
                if let Err(e) = &result {
                    error!("{task}: {e}");
                }
                outcomes.push(TaskOutcome { task, result });
            }

            let done = self.done.fetch_add(chunk_len, Ordering::Relaxed) + chunk_len;
            match self.expected {
                Some(expected) => info!("{done} of at most {expected} tasks processed."),
                None => info!("{done} tasks processed."),
            }
            debug!("Worker {} finished a chunk of {chunk_len} tasks.", self.id);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Scrapes every origin x destination x date combination into `sink`.
///
/// The caller decides what a failed outcome means; a single failure makes
/// `RunResult::is_success` false. `shutdown` stops the workers early.
pub async fn scrape<S>(
    origins: impl IntoIterator<Item = StopId>,
    destinations: impl IntoIterator<Item = StopId>,
    dates: impl IntoIterator<Item = NaiveDate>,
    threshold: f64,
    client_config: &ClientConfig,
    sink: Arc<S>,
    shutdown: Option<watch::Receiver<bool>>,
) -> Result<RunResult, PoolError>
where
    S: ResultSink + 'static,
{
    let tasks = OdTaskGenerator::new(origins, destinations, dates, threshold);
    let planner = Arc::new(OtpClient::new(client_config).map_err(PoolError::Client)?);
    Ok(scrape_with_planner(planner, tasks, client_config, sink, shutdown).await)
}

/// `scrape` against any planner.
pub async fn scrape_with_planner<P, S>(
    planner: Arc<P>,
    tasks: OdTaskGenerator,
    client_config: &ClientConfig,
    sink: Arc<S>,
    shutdown: Option<watch::Receiver<bool>>,
) -> RunResult
where
    P: RoutePlanner + 'static,
    S: ResultSink + 'static,
{
    let context = ScrapingContext::new(
        planner,
        client_config.retry.clone(),
        ItineraryFilter::new(client_config.car),
        sink,
    );
    let pool = ScraperPool::new(context, client_config.workers)
        .with_chunk_size(client_config.chunk_size);
    run_generated(&pool, tasks, shutdown).await
}

/// Logs the size of the task space, warms the router up and runs the pool.
pub async fn run_generated<P, S>(
    pool: &ScraperPool<P, S>,
    tasks: OdTaskGenerator,
    shutdown: Option<watch::Receiver<bool>>,
) -> RunResult
where
    P: RoutePlanner + 'static,
    S: ResultSink + 'static,
{
    info!(
        "Collecting itineraries for {} combinations of stops ({} * {}) and dates ({}).",
        tasks.upper_bound(),
        tasks.origin_count(),
        tasks.destination_count(),
        tasks
            .dates()
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    if let Some(task) = tasks.warm_up_task() {
        pool.warm_up(&task).await;
    }
    match shutdown {
        Some(shutdown) => pool.run_with_shutdown(tasks, shutdown).await,
        None => pool.run(tasks).await,
    }
}
