use crate::{config::CarModel, models::Coordinate, plan::RawItinerary, utils::haversine_km};

/// At most two transfers.
pub const MAX_TRANSIT_LEGS: usize = 3;

/// Why an itinerary was left out. Rejection is a normal outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    SameCoordinates,
    TooManyTransitLegs(usize),
    WalkLimitExceeded,
    /// Transit over car duration ratio.
    SlowerThanCar(f64),
}

/// Decides which planner itineraries are worth keeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct ItineraryFilter {
    car: CarModel,
}

impl ItineraryFilter {
    pub fn new(car: CarModel) -> Self {
        Self { car }
    }

    pub fn accept(
        &self,
        itinerary: &RawItinerary,
        origin: Coordinate,
        destination: Coordinate,
        threshold: f64,
    ) -> bool {
        self.check(itinerary, origin, destination, threshold).is_ok()
    }

    /// Rules apply in order; the first one that fails decides.
    pub fn check(
        &self,
        itinerary: &RawItinerary,
        origin: Coordinate,
        destination: Coordinate,
        threshold: f64,
    ) -> Result<(), Rejection> {
        if origin == destination {
            return Err(Rejection::SameCoordinates);
        }

        let transit_legs = itinerary.transit_leg_count();
        if transit_legs > MAX_TRANSIT_LEGS {
            return Err(Rejection::TooManyTransitLegs(transit_legs));
        }

        // The planner keeps itineraries over maxWalkDistance but flags them.
        if itinerary.walk_limit_exceeded {
            return Err(Rejection::WalkLimitExceeded);
        }

        let ratio = self.transit_to_car_ratio(itinerary, origin, destination);
        if ratio > threshold {
            return Err(Rejection::SlowerThanCar(ratio));
        }
        Ok(())
    }

    pub fn car_duration_hours(&self, origin: Coordinate, destination: Coordinate) -> f64 {
        haversine_km(origin, destination) * self.car.travel_factor / self.car.kmh
    }

    fn transit_to_car_ratio(
        &self,
        itinerary: &RawItinerary,
        origin: Coordinate,
        destination: Coordinate,
    ) -> f64 {
        let transit_hours = itinerary.duration as f64 / 3600.0;
        transit_hours / self.car_duration_hours(origin, destination)
    }
}
