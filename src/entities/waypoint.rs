use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{invalid_input_error, Error};
use crate::geo::Coordinates;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Waypoint {
    pub waypoint_id: Uuid,
    pub trip_id: Uuid,
    pub location_name: String,
    pub address_line1: Option<String>,
    pub geopoint: Coordinates,
    pub sequence_order: i32,
    pub estimated_arrival_time: Option<DateTime<Utc>>,
    pub actual_arrival_time: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewWaypoint {
    pub location_name: String,
    pub address_line1: Option<String>,
    pub geopoint: Coordinates,
    pub sequence_order: i32,
    pub estimated_arrival_time: Option<DateTime<Utc>>,
}

impl NewWaypoint {
    /// Validates coordinates and `sequence_order` uniqueness across one trip
    /// submission, returning the set sorted ascending. Runs before any write.
    pub fn normalize(mut waypoints: Vec<NewWaypoint>) -> Result<Vec<NewWaypoint>, Error> {
        for waypoint in &waypoints {
            waypoint.geopoint.validate()?;
        }

        let mut orders: Vec<i32> = waypoints.iter().map(|w| w.sequence_order).collect();
        orders.sort_unstable();
        orders.dedup();
        if orders.len() != waypoints.len() {
            return Err(invalid_input_error());
        }

        waypoints.sort_by_key(|w| w.sequence_order);
        Ok(waypoints)
    }
}

/// How a waypoint relates to a rider's requested start/end points.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaypointPurpose {
    Pickup,
    Dropoff,
    Intermediate,
}

impl WaypointPurpose {
    pub fn parse(value: &str) -> Result<Self, Error> {
        match value {
            "pickup" => Ok(Self::Pickup),
            "dropoff" => Ok(Self::Dropoff),
            "intermediate" => Ok(Self::Intermediate),
            _ => Err(invalid_input_error()),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RelevantWaypoint {
    pub waypoint_id: Uuid,
    pub location_name: String,
    pub estimated_arrival_time: Option<DateTime<Utc>>,
    pub sequence_order: i32,
    pub purpose: WaypointPurpose,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct WaypointStats {
    pub total_waypoints: usize,
    pub relevant_waypoints: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waypoint(sequence_order: i32) -> NewWaypoint {
        NewWaypoint {
            location_name: format!("stop {sequence_order}"),
            address_line1: None,
            geopoint: Coordinates::new(12.9, 77.6),
            sequence_order,
            estimated_arrival_time: None,
        }
    }

    #[test]
    fn normalize_sorts_by_sequence_order() {
        let sorted = NewWaypoint::normalize(vec![waypoint(3), waypoint(1), waypoint(2)]).unwrap();
        let orders: Vec<i32> = sorted.iter().map(|w| w.sequence_order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
    }

    #[test]
    fn duplicate_sequence_orders_are_rejected() {
        let err = NewWaypoint::normalize(vec![waypoint(1), waypoint(1)]).unwrap_err();
        assert_eq!(err.code, 101);
    }

    #[test]
    fn empty_set_is_allowed() {
        assert!(NewWaypoint::normalize(vec![]).unwrap().is_empty());
    }

    #[test]
    fn invalid_waypoint_coordinates_are_rejected() {
        let mut bad = waypoint(1);
        bad.geopoint = Coordinates::new(123.0, 77.6);
        assert_eq!(NewWaypoint::normalize(vec![bad]).unwrap_err().code, 101);
    }
}
