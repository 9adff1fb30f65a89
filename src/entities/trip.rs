use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::waypoint::{RelevantWaypoint, Waypoint, WaypointStats};
use crate::error::{invalid_input_error, invalid_state_error, Error};
use crate::geo::Coordinates;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Trip {
    pub trip_id: Uuid,
    pub driver_id: Uuid,
    pub vehicle_id: Option<Uuid>,
    pub start_location_name: String,
    pub start_address_line1: Option<String>,
    pub start_geopoint: Coordinates,
    pub end_location_name: String,
    pub end_address_line1: Option<String>,
    pub end_geopoint: Coordinates,
    pub departure_time: DateTime<Utc>,
    pub estimated_arrival_time: DateTime<Utc>,
    pub available_seats: i32,
    pub price_per_seat: f64,
    pub trip_status: TripStatus,
    pub trip_description: Option<String>,
    /// WKT rendering of the start -> waypoints -> end line, absent until the
    /// path has been derived.
    pub polyline_path: Option<String>,
    pub actual_start_time: Option<DateTime<Utc>>,
    pub actual_end_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl TripStatus {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> Result<Self, Error> {
        match value {
            "SCHEDULED" => Ok(Self::Scheduled),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "CANCELLED" => Ok(Self::Cancelled),
            _ => Err(invalid_input_error()),
        }
    }

    /// Trip rows are frozen once the trip has started or finished.
    pub fn ensure_editable(&self) -> Result<(), Error> {
        match self {
            Self::InProgress | Self::Completed => Err(invalid_state_error()),
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewTrip {
    pub driver_id: Uuid,
    pub vehicle_id: Option<Uuid>,
    pub start_location_name: String,
    pub start_address_line1: Option<String>,
    pub start_geopoint: Coordinates,
    pub end_location_name: String,
    pub end_address_line1: Option<String>,
    pub end_geopoint: Coordinates,
    pub departure_time: DateTime<Utc>,
    pub estimated_arrival_time: DateTime<Utc>,
    pub available_seats: i32,
    pub price_per_seat: f64,
    pub trip_description: Option<String>,
}

/// Whitelisted trip columns for partial updates; `None` fields are left
/// untouched.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct UpdateTrip {
    pub vehicle_id: Option<Uuid>,
    pub start_location_name: Option<String>,
    pub start_address_line1: Option<String>,
    pub start_geopoint: Option<Coordinates>,
    pub end_location_name: Option<String>,
    pub end_address_line1: Option<String>,
    pub end_geopoint: Option<Coordinates>,
    pub departure_time: Option<DateTime<Utc>>,
    pub estimated_arrival_time: Option<DateTime<Utc>>,
    pub available_seats: Option<i32>,
    pub price_per_seat: Option<f64>,
    pub trip_description: Option<String>,
}

impl UpdateTrip {
    pub fn is_empty(&self) -> bool {
        self.vehicle_id.is_none()
            && self.start_location_name.is_none()
            && self.start_address_line1.is_none()
            && self.start_geopoint.is_none()
            && self.end_location_name.is_none()
            && self.end_address_line1.is_none()
            && self.end_geopoint.is_none()
            && self.departure_time.is_none()
            && self.estimated_arrival_time.is_none()
            && self.available_seats.is_none()
            && self.price_per_seat.is_none()
            && self.trip_description.is_none()
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct TripWithWaypoints {
    pub trip: Trip,
    pub waypoints: Vec<Waypoint>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TripFilters {
    pub start_location: Coordinates,
    pub end_location: Option<Coordinates>,
    pub radius_km: Option<f64>,
    pub driver_id: Option<Uuid>,
    pub trip_status: Option<TripStatus>,
    pub departure_date: Option<NaiveDate>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// One search hit: the trip summary plus the waypoints a rider could board
/// or alight at, and a proportional fare when a partial itinerary matched.
#[derive(Clone, Debug, Serialize)]
pub struct TripMatch {
    pub trip_id: Uuid,
    pub driver_id: Uuid,
    pub start_location_name: String,
    pub end_location_name: String,
    pub trip_status: TripStatus,
    pub departure_time: DateTime<Utc>,
    pub estimated_arrival_time: DateTime<Utc>,
    pub price_per_seat: f64,
    pub waypoints: Vec<RelevantWaypoint>,
    pub waypoint_stats: WaypointStats,
    pub segment: Option<SegmentInfo>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SegmentInfo {
    pub segments_travelled: u32,
    pub total_segments: u32,
    pub fare: f64,
    pub duration_seconds: i64,
}

impl SegmentInfo {
    /// Proportional fare/duration for a waypoint-to-waypoint itinerary.
    ///
    /// Path positions are 0 for the trip start, 1..=n for the n waypoints in
    /// sequence order and n + 1 for the trip end, so a trip with n waypoints
    /// has n + 1 segments. The apportionment is linear in segment count, not
    /// distance-weighted; a deliberate simplification.
    pub fn calculate(
        price_per_seat: f64,
        departure_time: DateTime<Utc>,
        estimated_arrival_time: DateTime<Utc>,
        waypoint_count: usize,
        board_position: usize,
        alight_position: usize,
    ) -> Result<Self, Error> {
        let total_segments = waypoint_count as u32 + 1;

        if board_position >= alight_position || alight_position > waypoint_count + 1 {
            return Err(invalid_input_error());
        }

        let segments_travelled = (alight_position - board_position) as u32;
        let ratio = f64::from(segments_travelled) / f64::from(total_segments);

        let span = estimated_arrival_time - departure_time;
        let duration_seconds = (span.num_seconds() as f64 * ratio).round() as i64;

        Ok(Self {
            segments_travelled,
            total_segments,
            fare: price_per_seat * ratio,
            duration_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn status_names_round_trip() {
        for status in [
            TripStatus::Scheduled,
            TripStatus::InProgress,
            TripStatus::Completed,
            TripStatus::Cancelled,
        ] {
            assert_eq!(TripStatus::parse(status.name()).unwrap(), status);
        }

        assert_eq!(TripStatus::parse("DRAFT").unwrap_err().code, 101);
    }

    #[test]
    fn started_and_finished_trips_are_frozen() {
        TripStatus::Scheduled.ensure_editable().unwrap();
        TripStatus::Cancelled.ensure_editable().unwrap();
        assert_eq!(TripStatus::InProgress.ensure_editable().unwrap_err().code, 100);
        assert_eq!(TripStatus::Completed.ensure_editable().unwrap_err().code, 100);
    }

    #[test]
    fn empty_change_set_is_detected() {
        assert!(UpdateTrip::default().is_empty());

        let changes = UpdateTrip {
            price_per_seat: Some(120.0),
            ..UpdateTrip::default()
        };
        assert!(!changes.is_empty());
    }

    #[test]
    fn full_path_segment_is_full_fare() {
        let departure = Utc::now();
        let arrival = departure + Duration::hours(3);

        let info = SegmentInfo::calculate(300.0, departure, arrival, 2, 0, 3).unwrap();

        assert_eq!(info.segments_travelled, 3);
        assert_eq!(info.total_segments, 3);
        assert_eq!(info.fare, 300.0);
        assert_eq!(info.duration_seconds, 3 * 3600);
    }

    #[test]
    fn partial_segment_scales_fare_and_duration() {
        let departure = Utc::now();
        let arrival = departure + Duration::hours(3);

        // board at waypoint 1, alight at waypoint 2 of a two-waypoint trip
        let info = SegmentInfo::calculate(300.0, departure, arrival, 2, 1, 2).unwrap();

        assert_eq!(info.segments_travelled, 1);
        assert_eq!(info.total_segments, 3);
        assert_eq!(info.fare, 100.0);
        assert_eq!(info.duration_seconds, 3600);
    }

    #[test]
    fn backwards_segment_is_rejected() {
        let departure = Utc::now();
        let arrival = departure + Duration::hours(1);

        assert_eq!(
            SegmentInfo::calculate(100.0, departure, arrival, 2, 2, 2)
                .unwrap_err()
                .code,
            101
        );
        assert_eq!(
            SegmentInfo::calculate(100.0, departure, arrival, 2, 1, 5)
                .unwrap_err()
                .code,
            101
        );
    }
}
