//! Flattens planner itineraries into `itineraries` / `itinerary_stop_times` rows.

use uuid::Uuid;

use crate::{
    error::DataIntegrityError,
    models::{Itinerary, ItineraryStopTime, Mode, NormalizedItinerary},
    plan::{Leg, RawItinerary, StopPlace},
    utils::millis_to_utc,
};

/// Emits, per leg, the boarding stop, the intermediate stops of transit legs
/// and the alighting stop, numbered 1..N across the whole itinerary.
pub fn normalize(raw: &RawItinerary) -> Result<NormalizedItinerary, DataIntegrityError> {
    let (Some(first_leg), Some(last_leg)) = (raw.legs.first(), raw.legs.last()) else {
        return Err(DataIntegrityError::NoLegs);
    };

    let itinerary = Itinerary {
        id: Uuid::new_v4(),
        origin_stop_id: stop_id(&first_leg.from, 0, "from")?,
        destination_stop_id: stop_id(&last_leg.to, raw.legs.len() - 1, "to")?,
        start_time: millis_to_utc(raw.start_time)?,
        end_time: millis_to_utc(raw.end_time)?,
    };

    let mut rows = RowWriter {
        itinerary_id: itinerary.id,
        rows: Vec::new(),
    };
    for (leg_no, leg) in raw.legs.iter().enumerate() {
        rows.push_leg(leg_no, leg)?;
    }

    Ok(NormalizedItinerary {
        itinerary,
        stop_times: rows.rows,
    })
}

struct RowWriter {
    itinerary_id: Uuid,
    rows: Vec<ItineraryStopTime>,
}

impl RowWriter {
    fn push_leg(&mut self, leg_no: usize, leg: &Leg) -> Result<(), DataIntegrityError> {
        let mode: Mode = leg.mode.parse()?;
        let (route_id, trip_id) = if mode.is_transit() {
            (leg.route_id.clone(), leg.trip_id.clone())
        } else {
            (None, None)
        };
        let stop_index = |place: &StopPlace| if mode.is_transit() { place.stop_index } else { None };

        // no arrival at the boarding stop
        let departure = required_time(leg.from.departure, leg_no, "from", "departure")?;
        self.push(ItineraryStopTime {
            itinerary_id: self.itinerary_id,
            sequence_index: 0,
            stop_id: stop_id(&leg.from, leg_no, "from")?,
            route_id: route_id.clone(),
            trip_id: trip_id.clone(),
            stop_index_in_trip: stop_index(&leg.from),
            arrival_time: None,
            departure_time: Some(millis_to_utc(departure)?),
            mode,
        });

        if mode.is_transit() {
            for stop in leg.intermediate_stops() {
                let arrival = required_time(stop.arrival, leg_no, "intermediate stop", "arrival")?;
                let departure =
                    required_time(stop.departure, leg_no, "intermediate stop", "departure")?;
                self.push(ItineraryStopTime {
                    itinerary_id: self.itinerary_id,
                    sequence_index: 0,
                    stop_id: stop_id(stop, leg_no, "intermediate stop")?,
                    route_id: route_id.clone(),
                    trip_id: trip_id.clone(),
                    stop_index_in_trip: stop.stop_index,
                    arrival_time: Some(millis_to_utc(arrival)?),
                    departure_time: Some(millis_to_utc(departure)?),
                    mode,
                });
            }
        }

        // no departure from the alighting stop
        let arrival = required_time(leg.to.arrival, leg_no, "to", "arrival")?;
        self.push(ItineraryStopTime {
            itinerary_id: self.itinerary_id,
            sequence_index: 0,
            stop_id: stop_id(&leg.to, leg_no, "to")?,
            route_id,
            trip_id,
            stop_index_in_trip: stop_index(&leg.to),
            arrival_time: Some(millis_to_utc(arrival)?),
            departure_time: None,
            mode,
        });
        Ok(())
    }

    fn push(&mut self, mut row: ItineraryStopTime) {
        row.sequence_index = self.rows.len() as i32 + 1;
        self.rows.push(row);
    }
}

fn stop_id(place: &StopPlace, leg: usize, which: &'static str) -> Result<String, DataIntegrityError> {
    place
        .stop_id
        .clone()
        .ok_or(DataIntegrityError::MissingStopId { leg, place: which })
}

fn required_time(
    millis: Option<i64>,
    leg: usize,
    place: &'static str,
    field: &'static str,
) -> Result<i64, DataIntegrityError> {
    millis.ok_or(DataIntegrityError::MissingTime { leg, place, field })
}
