use chrono::{DateTime, NaiveDate, Utc, Weekday};

use crate::{error::DataIntegrityError, models::Coordinate};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometres.
pub fn haversine_km(from: Coordinate, to: Coordinate) -> f64 {
    let (lat1, lat2) = (from.lat.to_radians(), to.lat.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (to.lon - from.lon).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * a.sqrt().asin() * EARTH_RADIUS_KM
}

/// Planner timestamps are unix epoch milliseconds in UTC.
pub fn millis_to_utc(millis: i64) -> Result<DateTime<Utc>, DataIntegrityError> {
    DateTime::from_timestamp_millis(millis).ok_or(DataIntegrityError::TimestampOutOfRange(millis))
}

/// Monday to Sunday of the given ISO calendar week.
pub fn dates_of_iso_week(year: i32, week: u32) -> Option<Vec<NaiveDate>> {
    let monday = NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)?;
    Some(monday.iter_days().take(7).collect())
}
