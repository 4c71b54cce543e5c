use std::{sync::Arc, time::Duration};

use anyhow::Context;
use chrono::{Datelike, Utc};
use dotenv::dotenv;
use log::{LevelFilter, error, info, warn};
use ptm_scraper::{
    LoadFromEnv, MemorySink, PgResultSink, RunResult, ScrapeEnv, dates_of_iso_week, scrape,
    stops::StopSetResolver,
};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let scrape_env = ScrapeEnv::load_from_env()?;
    let config = scrape_env.client_config()?;

    let today = Utc::now().date_naive().iso_week();
    let year = scrape_env.scrape_year.unwrap_or(today.year());
    let week = scrape_env.scrape_week.unwrap_or(today.week());
    let dates = dates_of_iso_week(year, week)
        .with_context(|| format!("{year} has no calendar week {week}"))?;

    let database_url = scrape_env
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set")?;
    let db = PgPoolOptions::new()
        .max_connections(config.workers as u32 + 2)
        .connect(database_url)
        .await
        .context("failed to connect to the database")?;
    info!(
        "Successful database server connection: {}",
        check_database(&db).await?
    );

    info!("Considering transit modes: WALK, BUS, TRAM, SUBWAY, RAIL");
    info!(
        "Using a maximum walking distance for transfers of {} m",
        config.max_walk_distance
    );
    info!(
        "Assuming a car speed of {} km/h and a linear distance factor of {}",
        config.car.kmh, config.car.travel_factor
    );
    info!(
        "Discarding itineraries taking {} times longer than a car",
        scrape_env.travel_time_factor_threshold
    );

    info!("##### Determining origin and destination stops...");
    let resolver = StopSetResolver::new(db.clone());
    let origins = resolver.origins().await?;
    let destinations = resolver
        .destinations(scrape_env.include_proxy_stops)
        .await?;
    info!("Found {} stops where trips start.", origins.len());
    info!("Found {} stops where trips end.", destinations.len());

    let threshold = scrape_env.travel_time_factor_threshold;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted! Finishing in-flight tasks, work done so far is kept.");
            let _ = shutdown_tx.send(true);
        }
    });

    info!("##### Collecting itineraries...");
    let result = if scrape_env.dry_run {
        let sink = Arc::new(MemorySink::new());
        let result = scrape(
            origins,
            destinations,
            dates,
            threshold,
            &config,
            sink.clone(),
            Some(shutdown_rx),
        )
        .await?;
        info!(
            "Dry run: would have written {} itineraries with {} stop times.",
            sink.itinerary_count(),
            sink.stop_time_count()
        );
        result
    } else {
        let sink = Arc::new(PgResultSink::new(db.clone()));
        let watcher = tokio::spawn(watch_progress(
            PgResultSink::new(db.clone()),
            Duration::from_secs(scrape_env.progress_interval_secs.max(1)),
        ));
        let result = scrape(
            origins,
            destinations,
            dates,
            threshold,
            &config,
            sink.clone(),
            Some(shutdown_rx),
        )
        .await?;
        watcher.abort();
        let (itineraries, stop_times) = sink.counts().await?;
        info!("Collected a total of {itineraries} itineraries with {stop_times} stop times!");
        result
    };

    report(&result)
}

/// Independent of the workers: logs what actually reached the database and
/// warns when the count stops moving.
async fn watch_progress(sink: PgResultSink, every: Duration) {
    let mut interval = tokio::time::interval(every);
    // the first tick fires immediately
    interval.tick().await;
    let mut previous = 0;
    loop {
        interval.tick().await;
        match sink.counts().await {
            Ok((itineraries, _)) => {
                info!("Progress watcher: {itineraries} itineraries collected...");
                if itineraries == previous && itineraries > 0 {
                    warn!("No new itineraries since the last check, is the router still answering?");
                }
                previous = itineraries;
            }
            Err(e) => warn!("Progress watcher could not count itineraries: {e}"),
        }
    }
}

fn report(result: &RunResult) -> anyhow::Result<()> {
    // workers already logged every failure as it happened
    if let Some((task, e)) = result.failures().next() {
        error!("First failure: {task}: {e}");
    }
    if result.is_success() {
        info!("Finished collecting itineraries!");
        return Ok(());
    }
    if result.lost_workers > 0 {
        error!("{} scraper workers died, their outcomes are missing", result.lost_workers);
    }
    anyhow::bail!(
        "{} of {} tasks failed{}",
        result.failure_count(),
        result.outcomes.len(),
        if result.cancelled { ", run was cancelled" } else { "" }
    )
}

async fn check_database(db: &PgPool) -> anyhow::Result<String> {
    let version: String = sqlx::query_scalar("SELECT version()")
        .fetch_one(db)
        .await?;
    Ok(version)
}
