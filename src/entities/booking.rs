use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::entities::Wallet;
use crate::error::{
    already_cancelled_error, conflicting_state_error, invalid_input_error, Error,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Booking {
    pub booking_id: Uuid,
    pub trip_id: Uuid,
    pub rider_id: Uuid,
    pub booked_seats: i32,
    pub fare_amount: f64,
    pub bookings_status: BookingStatus,
    pub is_waypoint_booking: bool,
    pub waypoint_data: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
            Self::Cancelled => "CANCELLED",
            Self::Completed => "COMPLETED",
        }
    }

    pub fn parse(value: &str) -> Result<Self, Error> {
        match value {
            "PENDING" => Ok(Self::Pending),
            "ACCEPTED" => Ok(Self::Accepted),
            "REJECTED" => Ok(Self::Rejected),
            "CANCELLED" => Ok(Self::Cancelled),
            "COMPLETED" => Ok(Self::Completed),
            _ => Err(invalid_input_error()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Cancelled | Self::Completed)
    }
}

/// How the escrowed fare is disposed of when a rider cancels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Settlement {
    /// Booking was still PENDING; the rider gets the whole fare back.
    FullRefund,
    /// Booking was ACCEPTED; the rider forfeits half the fare to the driver.
    SplitFare,
}

impl Booking {
    /// Decides the wallet disposition for a rider-initiated cancellation.
    pub fn cancellation_settlement(&self) -> Result<Settlement, Error> {
        match self.bookings_status {
            BookingStatus::Pending => Ok(Settlement::FullRefund),
            BookingStatus::Accepted => Ok(Settlement::SplitFare),
            BookingStatus::Cancelled | BookingStatus::Rejected => Err(already_cancelled_error()),
            BookingStatus::Completed => Err(conflicting_state_error()),
        }
    }

    /// Completion is a rider action on a driver-accepted booking only.
    pub fn ensure_confirmable(&self) -> Result<(), Error> {
        match self.bookings_status {
            BookingStatus::Accepted => Ok(()),
            BookingStatus::Cancelled | BookingStatus::Rejected => Err(already_cancelled_error()),
            _ => Err(conflicting_state_error()),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewBooking {
    pub trip_id: Uuid,
    pub rider_id: Uuid,
    pub booked_seats: i32,
    pub fare_amount: f64,
    pub is_waypoint_booking: bool,
    pub waypoint_data: Option<Value>,
}

impl NewBooking {
    pub fn validate(&self) -> Result<(), Error> {
        if !self.fare_amount.is_finite() || self.fare_amount < 0.0 {
            return Err(invalid_input_error());
        }

        if self.booked_seats <= 0 {
            return Err(invalid_input_error());
        }

        Ok(())
    }
}

/// Booking creation result: the persisted row plus the wallet and seat
/// counts as they stood when the transaction committed. The snapshots are
/// absent when the booking was rejected outright and nothing moved.
#[derive(Clone, Debug, Serialize)]
pub struct BookingReceipt {
    pub booking: Booking,
    pub wallet: Option<Wallet>,
    pub available_seats: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking(status: BookingStatus) -> Booking {
        Booking {
            booking_id: Uuid::new_v4(),
            trip_id: Uuid::new_v4(),
            rider_id: Uuid::new_v4(),
            booked_seats: 2,
            fare_amount: 200.0,
            bookings_status: status,
            is_waypoint_booking: false,
            waypoint_data: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn pending_cancellation_refunds_in_full() {
        assert_eq!(
            booking(BookingStatus::Pending).cancellation_settlement().unwrap(),
            Settlement::FullRefund
        );
    }

    #[test]
    fn accepted_cancellation_splits_the_fare() {
        assert_eq!(
            booking(BookingStatus::Accepted).cancellation_settlement().unwrap(),
            Settlement::SplitFare
        );
    }

    #[test]
    fn resolved_bookings_cannot_be_cancelled_again() {
        assert_eq!(
            booking(BookingStatus::Cancelled)
                .cancellation_settlement()
                .unwrap_err()
                .code,
            106
        );
        assert_eq!(
            booking(BookingStatus::Rejected)
                .cancellation_settlement()
                .unwrap_err()
                .code,
            106
        );
        assert_eq!(
            booking(BookingStatus::Completed)
                .cancellation_settlement()
                .unwrap_err()
                .code,
            105
        );
    }

    #[test]
    fn only_accepted_bookings_are_confirmable() {
        booking(BookingStatus::Accepted).ensure_confirmable().unwrap();
        assert_eq!(
            booking(BookingStatus::Pending).ensure_confirmable().unwrap_err().code,
            105
        );
        assert_eq!(
            booking(BookingStatus::Rejected).ensure_confirmable().unwrap_err().code,
            106
        );
    }

    #[test]
    fn booking_input_validation() {
        let valid = NewBooking {
            trip_id: Uuid::new_v4(),
            rider_id: Uuid::new_v4(),
            booked_seats: 1,
            fare_amount: 0.0,
            is_waypoint_booking: false,
            waypoint_data: None,
        };
        valid.validate().unwrap();

        let mut negative_fare = valid.clone();
        negative_fare.fare_amount = -1.0;
        assert_eq!(negative_fare.validate().unwrap_err().code, 101);

        let mut zero_seats = valid;
        zero_seats.booked_seats = 0;
        assert_eq!(zero_seats.validate().unwrap_err().code, 101);
    }

    #[test]
    fn terminal_states() {
        assert!(BookingStatus::Rejected.is_terminal());
        assert!(BookingStatus::Cancelled.is_terminal());
        assert!(BookingStatus::Completed.is_terminal());
        assert!(!BookingStatus::Pending.is_terminal());
        assert!(!BookingStatus::Accepted.is_terminal());
    }
}
