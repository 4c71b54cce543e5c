//! Wire model of the planner's `plan` response.
//!
//! Only the fields the scraper reads are modelled; everything else in the
//! OpenTripPlanner document is ignored by serde.

use serde::Deserialize;

use crate::models::Coordinate;

/// Top level document: either `plan` or `error` is set.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanResponse {
    #[serde(default)]
    pub plan: Option<RoutePlan>,
    #[serde(default)]
    pub error: Option<PlannerError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlannerError {
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl PlannerError {
    /// Human readable message, falling back to the machine code.
    pub fn text(&self) -> String {
        self.msg
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "unspecified planner error".to_string())
    }
}

/// What the planner answered for one request.
#[derive(Debug, Clone)]
pub enum PlannerReply {
    Plan(RoutePlan),
    Error { url: String, message: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoutePlan {
    pub from: PlanPlace,
    pub to: PlanPlace,
    #[serde(default)]
    pub itineraries: Vec<RawItinerary>,
}

impl RoutePlan {
    /// Plan with no itineraries, used for tasks that never reach the planner.
    pub fn empty() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PlanPlace {
    pub lon: f64,
    pub lat: f64,
}

impl From<PlanPlace> for Coordinate {
    fn from(place: PlanPlace) -> Self {
        Coordinate {
            lon: place.lon,
            lat: place.lat,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawItinerary {
    /// Seconds.
    pub duration: i64,
    /// Epoch milliseconds.
    pub start_time: i64,
    /// Epoch milliseconds.
    pub end_time: i64,
    #[serde(default)]
    pub walk_limit_exceeded: bool,
    #[serde(default)]
    pub legs: Vec<Leg>,
}

impl RawItinerary {
    pub fn transit_leg_count(&self) -> usize {
        self.legs.iter().filter(|leg| !leg.is_walk()).count()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Leg {
    pub mode: String,
    pub from: StopPlace,
    pub to: StopPlace,
    #[serde(default)]
    pub route_id: Option<String>,
    #[serde(default)]
    pub trip_id: Option<String>,
    #[serde(default)]
    pub intermediate_stops: Option<Vec<StopPlace>>,
}

impl Leg {
    pub const WALK: &'static str = "WALK";

    pub fn is_walk(&self) -> bool {
        self.mode == Self::WALK
    }

    pub fn intermediate_stops(&self) -> &[StopPlace] {
        self.intermediate_stops.as_deref().unwrap_or_default()
    }
}

/// A stop as it appears inside a leg. Times are epoch milliseconds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopPlace {
    #[serde(default)]
    pub stop_id: Option<String>,
    #[serde(default)]
    pub stop_index: Option<i32>,
    #[serde(default)]
    pub arrival: Option<i64>,
    #[serde(default)]
    pub departure: Option<i64>,
}
