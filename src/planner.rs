use anyhow::Context;
use async_trait::async_trait;
use log::debug;
use reqwest::{StatusCode, Url};

use crate::{
    config::ClientConfig,
    error::QueryError,
    models::ScrapeTask,
    plan::{PlanResponse, PlannerReply},
    requests::RequestClient,
};

/// Issues one routing request for a task.
#[async_trait]
pub trait RoutePlanner: Send + Sync {
    async fn plan(&self, task: &ScrapeTask) -> Result<PlannerReply, QueryError>;
}

/// Client for an OpenTripPlanner `plan` endpoint.
pub struct OtpClient {
    base_url: Url,
    feed_id: String,
    max_walk_distance: u32,
    request_client: RequestClient,
}

impl OtpClient {
    pub fn new(config: &ClientConfig) -> anyhow::Result<Self> {
        let base_url = Url::parse(&config.plan_url)
            .with_context(|| format!("invalid planner url: {}", config.plan_url))?;
        let request_client =
            RequestClient::new(config).context("failed to build planner http client")?;
        Ok(Self {
            base_url,
            feed_id: config.feed_id.clone(),
            max_walk_distance: config.max_walk_distance,
            request_client,
        })
    }

    /// Whole day search window, every itinerary the planner finds, with
    /// intermediate stops.
    pub fn plan_url(&self, task: &ScrapeTask) -> String {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair(
                "fromPlace",
                &format!("{}:{}", self.feed_id, task.origin_stop_id),
            )
            .append_pair(
                "toPlace",
                &format!("{}:{}", self.feed_id, task.destination_stop_id),
            )
            .append_pair("time", "00:00")
            .append_pair("date", &task.date.format("%Y-%m-%d").to_string())
            .append_pair("mode", "TRANSIT,WALK")
            .append_pair("maxWalkDistance", &self.max_walk_distance.to_string())
            .append_pair("arriveBy", "false")
            .append_pair("searchWindow", "86400")
            .append_pair("numOfItineraries", "99999")
            .append_pair("keepNumOfItineraries", "99999")
            .append_pair("showIntermediateStops", "true");
        url.into()
    }
}

#[async_trait]
impl RoutePlanner for OtpClient {
    async fn plan(&self, task: &ScrapeTask) -> Result<PlannerReply, QueryError> {
        let url = self.plan_url(task);
        debug!("Requesting {url}");
        let (status, body) = self
            .request_client
            .fetch_url_body(&url)
            .await
            .map_err(|e| QueryError::Transport {
                url: url.clone(),
                message: if e.is_timeout() {
                    format!("timed out: {e}")
                } else {
                    e.to_string()
                },
            })?;
        parse_reply(url, status, &body)
    }
}

/// Turns a planner body into a reply. Errors reported by the planner are a
/// reply, not a `QueryError`; the executor decides whether they are fatal.
pub fn parse_reply(url: String, status: StatusCode, body: &str) -> Result<PlannerReply, QueryError> {
    let response: PlanResponse = match serde_json::from_str(body) {
        Ok(response) => response,
        Err(_) if !status.is_success() => {
            return Err(QueryError::Transport {
                url,
                message: format!("HTTP {status}"),
            });
        }
        Err(e) => {
            return Err(QueryError::Malformed {
                url,
                message: e.to_string(),
            });
        }
    };

    match (response.error, response.plan) {
        (Some(error), _) => Ok(PlannerReply::Error {
            url,
            message: error.text(),
        }),
        (None, Some(plan)) => Ok(PlannerReply::Plan(plan)),
        (None, None) => Err(QueryError::Malformed {
            url,
            message: "response has neither plan nor error".to_string(),
        }),
    }
}
