use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::NaiveDate;
use ptm_scraper::{
    ClientConfig, ItineraryFilter, MemorySink, OdTaskGenerator, QueryError, ResultSink,
    RetryPolicy, RoutePlanner, ScraperPool, ScrapingContext, StorageError,
    TRANSIENT_PLANNER_MESSAGE, TaskError, scrape_with_planner,
    models::{NormalizedItinerary, ScrapeTask},
    plan::{PlannerReply, RoutePlan},
    pool::run_generated,
};
use serde_json::{Value, json};
use tokio::sync::watch;

const T0: i64 = 1_704_700_800_000;

type Script = dyn Fn(&ScrapeTask) -> Result<PlannerReply, QueryError> + Send + Sync;

/// Answers from a closure and records every request.
struct FakePlanner {
    script: Box<Script>,
    requests: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl FakePlanner {
    fn new(
        script: impl Fn(&ScrapeTask) -> Result<PlannerReply, QueryError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            requests: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl RoutePlanner for FakePlanner {
    async fn plan(&self, task: &ScrapeTask) -> Result<PlannerReply, QueryError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(task.to_string());
        (self.script)(task)
    }
}

struct FailingSink;

#[async_trait]
impl ResultSink for FailingSink {
    async fn persist(&self, _batch: &[NormalizedItinerary]) -> Result<(), StorageError> {
        Err(sqlx::Error::PoolTimedOut.into())
    }
}

fn coordinate(stop: &str) -> Value {
    match stop {
        "A" => json!({"lon": 12.0, "lat": 54.0}),
        "B" => json!({"lon": 12.0, "lat": 54.1}),
        "C" => json!({"lon": 12.0, "lat": 54.2}),
        _ => json!({"lon": 10.0, "lat": 50.0}),
    }
}

fn bus_itinerary(from: &str, to: &str, duration_s: i64, walk_limit_exceeded: bool) -> Value {
    let end = T0 + duration_s * 1000;
    json!({
        "duration": duration_s,
        "startTime": T0,
        "endTime": end,
        "walkLimitExceeded": walk_limit_exceeded,
        "legs": [{
            "mode": "BUS",
            "routeId": "1:R1",
            "tripId": "1:T1",
            "from": {"stopId": format!("1:{from}"), "stopIndex": 0, "departure": T0},
            "to": {"stopId": format!("1:{to}"), "stopIndex": 1, "arrival": end},
            "intermediateStops": []
        }]
    })
}

fn plan(from: Value, to: Value, itineraries: Vec<Value>) -> Result<PlannerReply, QueryError> {
    let plan: RoutePlan = serde_json::from_value(json!({
        "from": from,
        "to": to,
        "itineraries": itineraries,
    }))
    .unwrap();
    Ok(PlannerReply::Plan(plan))
}

fn planner_error(message: &str) -> Result<PlannerReply, QueryError> {
    Ok(PlannerReply::Error {
        url: "http://router/plan".into(),
        message: message.into(),
    })
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 8).unwrap()
}

fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

fn no_backoff() -> RetryPolicy {
    RetryPolicy {
        backoff: Duration::ZERO,
        ..RetryPolicy::default()
    }
}

fn pool<S: ResultSink + 'static>(
    planner: Arc<FakePlanner>,
    sink: Arc<S>,
    workers: usize,
) -> ScraperPool<FakePlanner, S> {
    let context = ScrapingContext::new(planner, no_backoff(), ItineraryFilter::default(), sink);
    ScraperPool::new(context, workers)
}

/// B answers one quick bus itinerary, C one that walks too far.
fn a_to_b_and_c(task: &ScrapeTask) -> Result<PlannerReply, QueryError> {
    let (o, d) = (task.origin_stop_id.as_str(), task.destination_stop_id.as_str());
    match d {
        // 11.1 km -> ~0.31 h by car, 20 min by bus
        "B" => plan(coordinate(o), coordinate(d), vec![bus_itinerary(o, d, 1200, false)]),
        "C" => plan(coordinate(o), coordinate(d), vec![bus_itinerary(o, d, 1200, true)]),
        _ => planner_error("No trip found."),
    }
}

#[tokio::test]
async fn end_to_end_scenario() {
    let planner = FakePlanner::new(a_to_b_and_c);
    let sink = Arc::new(MemorySink::new());
    let tasks = OdTaskGenerator::new(ids(&["A"]), ids(&["B", "C"]), [date()], 2.0);

    let result = pool(planner.clone(), sink.clone(), 2).run(tasks).await;

    assert!(result.is_success());
    assert_eq!(result.outcomes.len(), 2);
    assert_eq!(planner.requests(), 2);

    let batches = sink.batches();
    assert_eq!(batches.len(), 1);
    let written = &batches[0][0];
    assert_eq!(written.itinerary.origin_stop_id, "1:A");
    assert_eq!(written.itinerary.destination_stop_id, "1:B");
    assert_eq!(written.stop_times.len(), 2);
    assert_eq!(written.stop_times[0].sequence_index, 1);
    assert_eq!(written.stop_times[1].sequence_index, 2);
    assert!(written.stop_times[0].arrival_time.is_none());
    assert!(written.stop_times[1].departure_time.is_none());

    let to_c = result
        .outcomes
        .iter()
        .find(|o| o.task.destination_stop_id == "C")
        .unwrap();
    let report = to_c.result.as_ref().unwrap();
    // rejected, not failed
    assert_eq!(report.itineraries_found, 1);
    assert_eq!(report.itineraries_accepted, 0);
}

#[tokio::test]
async fn self_pair_issues_no_request() {
    let planner = FakePlanner::new(a_to_b_and_c);
    let sink = Arc::new(MemorySink::new());
    let context = ScrapingContext::new(
        planner.clone(),
        no_backoff(),
        ItineraryFilter::default(),
        sink.clone(),
    );
    let task = ScrapeTask {
        origin_stop_id: "A".into(),
        destination_stop_id: "A".into(),
        date: date(),
        travel_time_factor_threshold: 2.0,
    };

    let report = context.scrape_task(&task).await.unwrap();

    assert!(report.skipped);
    assert_eq!(planner.requests(), 0);
    assert_eq!(sink.itinerary_count(), 0);
}

#[tokio::test]
async fn warm_up_request_precedes_the_run() {
    let planner = FakePlanner::new(a_to_b_and_c);
    let sink = Arc::new(MemorySink::new());
    let tasks = OdTaskGenerator::new(ids(&["A"]), ids(&["B", "C"]), [date()], 2.0);

    let result = run_generated(&pool(planner.clone(), sink.clone(), 1), tasks, None).await;

    assert!(result.is_success());
    // the warm-up result is thrown away
    assert_eq!(planner.requests(), 3);
    assert_eq!(sink.itinerary_count(), 1);
}

#[tokio::test]
async fn warm_up_never_requests_a_self_pair() {
    let planner = FakePlanner::new(|task| {
        let (o, d) = (task.origin_stop_id.as_str(), task.destination_stop_id.as_str());
        plan(coordinate(o), coordinate(d), vec![bus_itinerary(o, d, 1200, false)])
    });
    let sink = Arc::new(MemorySink::new());
    let tasks = OdTaskGenerator::new(ids(&["A", "B"]), ids(&["B", "A"]), [date()], 2.0);

    let result = run_generated(&pool(planner.clone(), sink.clone(), 1), tasks, None).await;

    assert!(result.is_success());
    assert_eq!(
        planner.seen(),
        [
            "A -> B on 2024-01-08",
            "A -> B on 2024-01-08",
            "B -> A on 2024-01-08"
        ]
    );
}

#[tokio::test]
async fn a_panicking_task_fails_alone() {
    let planner = FakePlanner::new(|task| {
        let (o, d) = (task.origin_stop_id.as_str(), task.destination_stop_id.as_str());
        if d == "d3" {
            panic!("planner blew up on {d}");
        }
        plan(coordinate("A"), coordinate("B"), vec![bus_itinerary(o, d, 1200, false)])
    });
    let sink = Arc::new(MemorySink::new());
    let destinations: Vec<_> = (0..10).map(|i| format!("d{i}")).collect();
    let tasks = OdTaskGenerator::new(ids(&["o"]), destinations, [date()], 100.0);

    let result = pool(planner.clone(), sink.clone(), 2)
        .with_chunk_size(1)
        .run(tasks)
        .await;

    assert_eq!(result.lost_workers, 0);
    assert_eq!(result.outcomes.len(), 10);
    assert_eq!(result.failure_count(), 1);
    let (task, error) = result.failures().next().unwrap();
    assert_eq!(task.destination_stop_id, "d3");
    assert!(matches!(error, TaskError::Panicked(message) if message == "planner blew up on d3"));
    assert_eq!(sink.itinerary_count(), 9);
    assert!(!result.is_success());
}

#[tokio::test]
async fn scrape_entry_point_runs_the_whole_product() {
    let planner = FakePlanner::new(a_to_b_and_c);
    let sink = Arc::new(MemorySink::new());
    let config = ClientConfig {
        retry: no_backoff(),
        workers: 2,
        ..ClientConfig::default()
    };
    let tasks = OdTaskGenerator::new(ids(&["A"]), ids(&["A", "B", "C"]), [date()], 2.0);

    let result = scrape_with_planner(planner.clone(), tasks, &config, sink.clone(), None).await;

    assert!(result.is_success());
    // A -> A is never issued, the warm-up goes first
    assert_eq!(result.outcomes.len(), 2);
    assert_eq!(planner.requests(), 3);
    assert!(planner.seen().iter().all(|t| !t.starts_with("A -> A")));
    assert_eq!(sink.itinerary_count(), 1);
}

#[tokio::test]
async fn scrape_entry_point_honours_shutdown() {
    let planner = FakePlanner::new(a_to_b_and_c);
    let sink = Arc::new(MemorySink::new());
    let config = ClientConfig {
        retry: no_backoff(),
        workers: 2,
        ..ClientConfig::default()
    };
    let tasks = OdTaskGenerator::new(ids(&["A"]), ids(&["B", "C"]), [date()], 2.0);
    let (_tx, shutdown) = watch::channel(true);

    let result = scrape_with_planner(planner, tasks, &config, sink.clone(), Some(shutdown)).await;

    assert!(result.cancelled);
    assert!(result.outcomes.is_empty());
    assert_eq!(sink.itinerary_count(), 0);
}

#[tokio::test]
async fn failures_are_isolated_per_task() {
    let planner = FakePlanner::new(|task| {
        let (o, d) = (task.origin_stop_id.as_str(), task.destination_stop_id.as_str());
        match d {
            "B" => plan(coordinate(o), coordinate(d), vec![bus_itinerary(o, d, 1200, false)]),
            "C" => {
                let mut itinerary = bus_itinerary(o, d, 1200, false);
                itinerary["legs"][0]["mode"] = json!("FERRY");
                plan(coordinate(o), coordinate(d), vec![itinerary])
            }
            _ => planner_error("No trip found."),
        }
    });
    let sink = Arc::new(MemorySink::new());
    let tasks = OdTaskGenerator::new(ids(&["A"]), ids(&["B", "C", "D"]), [date()], 2.0);

    let result = pool(planner.clone(), sink.clone(), 3).run(tasks).await;

    assert!(!result.is_success());
    assert_eq!(result.outcomes.len(), 3);
    assert_eq!(result.failure_count(), 2);
    // A -> B is kept even though the run failed
    assert_eq!(sink.itinerary_count(), 1);

    for (task, error) in result.failures() {
        match task.destination_stop_id.as_str() {
            "C" => assert!(matches!(error, TaskError::DataIntegrity(_))),
            "D" => assert!(matches!(error, TaskError::Query(QueryError::Upstream { .. }))),
            other => panic!("unexpected failure for {other}"),
        }
    }
}

#[tokio::test]
async fn transient_errors_are_retried_once() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = attempts.clone();
    let planner = FakePlanner::new(move |task| {
        let (o, d) = (task.origin_stop_id.as_str(), task.destination_stop_id.as_str());
        if seen.fetch_add(1, Ordering::SeqCst) == 0 {
            planner_error(TRANSIENT_PLANNER_MESSAGE)
        } else {
            plan(coordinate(o), coordinate(d), vec![bus_itinerary(o, d, 1200, false)])
        }
    });
    let sink = Arc::new(MemorySink::new());
    let tasks = OdTaskGenerator::new(ids(&["A"]), ids(&["B"]), [date()], 2.0);

    let result = pool(planner.clone(), sink.clone(), 1).run(tasks).await;

    assert!(result.is_success());
    assert_eq!(planner.requests(), 2);
    assert_eq!(sink.itinerary_count(), 1);
}

#[tokio::test]
async fn storage_failures_are_reported() {
    let planner = FakePlanner::new(a_to_b_and_c);
    let tasks = OdTaskGenerator::new(ids(&["A"]), ids(&["B", "C"]), [date()], 2.0);

    let result = pool(planner, Arc::new(FailingSink), 2).run(tasks).await;

    // only A -> B had something to write
    assert_eq!(result.failure_count(), 1);
    let (task, error) = result.failures().next().unwrap();
    assert_eq!(task.destination_stop_id, "B");
    assert!(matches!(error, TaskError::Storage(_)));
}

#[tokio::test]
async fn shutdown_stops_workers_from_taking_tasks() {
    let planner = FakePlanner::new(a_to_b_and_c);
    let sink = Arc::new(MemorySink::new());
    let tasks = OdTaskGenerator::new(ids(&["A"]), ids(&["B", "C"]), [date()], 2.0);
    let (_tx, shutdown) = watch::channel(true);

    let result = pool(planner.clone(), sink.clone(), 2)
        .run_with_shutdown(tasks, shutdown)
        .await;

    assert!(result.cancelled);
    assert!(!result.is_success());
    assert!(result.outcomes.is_empty());
    assert_eq!(planner.requests(), 0);
}

/// Deterministic planner for many O-D pairs: up to three itineraries per
/// pair, some flagged as exceeding the walk limit.
fn many_pairs(task: &ScrapeTask) -> Result<PlannerReply, QueryError> {
    let (o, d) = (task.origin_stop_id.as_str(), task.destination_stop_id.as_str());
    let (i, j) = (index(o), index(d));
    let itineraries = (0..(i + j) % 4)
        .map(|k| bus_itinerary(o, d, 600 + k as i64, (i * j + k) % 3 == 0))
        .collect();
    plan(
        json!({"lon": 10.0, "lat": 50.0}),
        json!({"lon": 10.0, "lat": 50.5}),
        itineraries,
    )
}

fn index(stop: &str) -> usize {
    stop[1..].parse().unwrap()
}

fn expected_accepted(n: usize) -> usize {
    let mut total = 0;
    for i in 0..n {
        for j in 0..n {
            total += (0..(i + j) % 4).filter(|k| (i * j + k) % 3 != 0).count();
        }
    }
    total
}

async fn run_many(workers: usize) -> (usize, usize, usize) {
    let origins: Vec<_> = (0..100).map(|i| format!("o{i}")).collect();
    let destinations: Vec<_> = (0..100).map(|i| format!("d{i}")).collect();
    let planner = FakePlanner::new(many_pairs);
    let sink = Arc::new(MemorySink::new());
    // threshold high enough that only the walk limit rejects
    let tasks = OdTaskGenerator::new(origins, destinations, [date()], 100.0);

    let result = pool(planner, sink.clone(), workers)
        .with_chunk_size(1000)
        .run(tasks)
        .await;

    assert!(result.is_success());
    assert_eq!(result.itineraries_accepted(), sink.itinerary_count());
    (result.outcomes.len(), sink.itinerary_count(), sink.stop_time_count())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallelism_does_not_change_totals() {
    let sequential = run_many(1).await;
    let parallel = run_many(8).await;

    assert_eq!(sequential.0, 10_000);
    assert_eq!(sequential.1, expected_accepted(100));
    assert_eq!(sequential.2, 2 * expected_accepted(100));
    assert_eq!(sequential, parallel);
}
