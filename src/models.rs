use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::DataIntegrityError;

/// GTFS stop id as stored in the `stops` table (without the planner's feed prefix).
pub type StopId = String;

/// One origin-destination-date query, consumed exactly once by a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeTask {
    pub origin_stop_id: StopId,
    pub destination_stop_id: StopId,
    pub date: NaiveDate,
    /// How many times longer than a car a transit itinerary may take.
    pub travel_time_factor_threshold: f64,
}

impl ScrapeTask {
    pub fn is_self_pair(&self) -> bool {
        self.origin_stop_id == self.destination_stop_id
    }
}

impl fmt::Display for ScrapeTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} on {}",
            self.origin_stop_id, self.destination_stop_id, self.date
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Coordinate {
    pub lon: f64,
    pub lat: f64,
}

/// Modes the planner is allowed to hand back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Walk,
    Bus,
    Tram,
    Subway,
    Rail,
}

impl Mode {
    pub const ALLOWED: [Mode; 5] = [Mode::Walk, Mode::Bus, Mode::Tram, Mode::Subway, Mode::Rail];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Walk => "WALK",
            Mode::Bus => "BUS",
            Mode::Tram => "TRAM",
            Mode::Subway => "SUBWAY",
            Mode::Rail => "RAIL",
        }
    }

    pub fn is_transit(&self) -> bool {
        !matches!(self, Mode::Walk)
    }
}

impl FromStr for Mode {
    type Err = DataIntegrityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mode::ALLOWED
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| DataIntegrityError::UnexpectedMode { mode: s.to_string() })
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row of the `itineraries` table.
#[derive(Debug, Clone, PartialEq)]
pub struct Itinerary {
    pub id: Uuid,
    pub origin_stop_id: StopId,
    pub destination_stop_id: StopId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Row of the `itinerary_stop_times` table.
#[derive(Debug, Clone, PartialEq)]
pub struct ItineraryStopTime {
    pub itinerary_id: Uuid,
    /// 1-based position of the stop within the itinerary.
    pub sequence_index: i32,
    pub stop_id: StopId,
    pub route_id: Option<String>,
    pub trip_id: Option<String>,
    pub stop_index_in_trip: Option<i32>,
    pub arrival_time: Option<DateTime<Utc>>,
    pub departure_time: Option<DateTime<Utc>>,
    pub mode: Mode,
}

/// An accepted itinerary together with its stop times, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedItinerary {
    pub itinerary: Itinerary,
    pub stop_times: Vec<ItineraryStopTime>,
}
