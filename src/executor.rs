use std::{sync::Arc, time::Duration};

use log::{error, warn};

use crate::{
    error::QueryError,
    models::ScrapeTask,
    plan::{PlannerReply, RoutePlan},
    planner::RoutePlanner,
};

/// What the router answers when it is overloaded. Matched exactly.
pub const TRANSIENT_PLANNER_MESSAGE: &str =
    "We're sorry. The trip planner is temporarily unavailable. Please try again later.";

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Deliberately not a round number so workers don't retry in lockstep.
    pub backoff: Duration,
    /// Also retry connection failures and timeouts.
    pub retry_transport_errors: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Duration::from_millis(3140),
            retry_transport_errors: false,
        }
    }
}

/// Wraps a planner with the bounded retry for transient router errors.
pub struct RetryingQueryExecutor<P> {
    planner: Arc<P>,
    policy: RetryPolicy,
}

impl<P: RoutePlanner> RetryingQueryExecutor<P> {
    pub fn new(planner: Arc<P>, policy: RetryPolicy) -> Self {
        Self { planner, policy }
    }

    pub fn planner(&self) -> &P {
        &self.planner
    }

    pub async fn execute(&self, task: &ScrapeTask) -> Result<RoutePlan, QueryError> {
        if task.is_self_pair() {
            return Ok(RoutePlan::empty());
        }

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let last_attempt = attempt >= max_attempts;
            match self.planner.plan(task).await {
                Ok(PlannerReply::Plan(plan)) => return Ok(plan),
                Ok(PlannerReply::Error { url, message }) if last_attempt && attempt > 1 => {
                    error!("Final FAIL for {url}: {message}");
                    return Err(QueryError::RetriesExhausted {
                        url,
                        message,
                        attempts: attempt,
                    });
                }
                Ok(PlannerReply::Error { url, message }) => {
                    if message != TRANSIENT_PLANNER_MESSAGE || last_attempt {
                        return Err(QueryError::Upstream { url, message });
                    }
                    warn!("Nonfatal fail: making attempt {} for {url}", attempt + 1);
                }
                Err(e) if e.is_transport() && self.policy.retry_transport_errors && !last_attempt => {
                    warn!("Transport failure, making attempt {}: {e}", attempt + 1);
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(self.policy.backoff).await;
            attempt += 1;
        }
    }
}
