use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::entities::{
    Booking, BookingReceipt, BookingStatus, NewBooking, NewTrip, NewWaypoint, TripFilters,
    TripMatch, TripStatus, TripWithWaypoints, UpdateTrip,
};
use crate::error::Error;

#[async_trait]
pub trait TripAPI {
    async fn create_trip(
        &self,
        trip: NewTrip,
        waypoints: Vec<NewWaypoint>,
    ) -> Result<TripWithWaypoints, Error>;
    async fn find_trip(&self, trip_id: Uuid) -> Result<TripWithWaypoints, Error>;
    async fn update_trip(
        &self,
        trip_id: Uuid,
        changes: UpdateTrip,
        waypoints: Vec<NewWaypoint>,
    ) -> Result<TripWithWaypoints, Error>;
    async fn update_trip_status(&self, trip_id: Uuid, status: TripStatus) -> Result<(), Error>;
    async fn delete_trip(&self, trip_id: Uuid) -> Result<(), Error>;
    async fn trips_by_driver(&self, driver_id: Uuid) -> Result<Vec<TripWithWaypoints>, Error>;
    async fn search_trips(&self, filters: TripFilters) -> Result<Vec<TripMatch>, Error>;
}

#[async_trait]
pub trait BookingAPI {
    async fn book_trip(&self, booking: NewBooking) -> Result<BookingReceipt, Error>;
    async fn update_booking_status_by_driver(
        &self,
        booking_id: Uuid,
        decision: BookingStatus,
    ) -> Result<Booking, Error>;
    async fn update_booking_status_by_rider(
        &self,
        booking_id: Uuid,
        requested: BookingStatus,
    ) -> Result<Booking, Error>;
    async fn bookings_by_rider(&self, rider_id: Uuid) -> Result<Vec<Booking>, Error>;
    async fn bookings_by_trip(&self, trip_id: Uuid) -> Result<Vec<Booking>, Error>;
}

pub type DynTripAPI = Arc<dyn TripAPI + Send + Sync>;
pub type DynBookingAPI = Arc<dyn BookingAPI + Send + Sync>;

/// Observer of trip cancellation. Invoked synchronously inside the
/// cancelling transaction so the cascade commits or rolls back with the
/// status change itself.
#[async_trait]
pub trait TripCancellationListener {
    async fn on_trip_cancelled(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        trip_id: Uuid,
    ) -> Result<(), Error>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    NewBookingRequest,
    BookingAccepted,
    BookingRejected,
    BookingCancelled,
    TripCompletionRequest,
    TripConfirmed,
}

/// External push-notification collaborator. Called only with committed
/// facts; delivery mechanics live outside this crate.
#[async_trait]
pub trait Notifier {
    async fn notify(
        &self,
        user_id: Uuid,
        kind: NotificationKind,
        payload: Value,
    ) -> Result<(), Error>;
}

pub type DynNotifier = Arc<dyn Notifier + Send + Sync>;

/// Drops every notification; for composition roots and tests that don't
/// care about delivery.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(
        &self,
        _user_id: Uuid,
        _kind: NotificationKind,
        _payload: Value,
    ) -> Result<(), Error> {
        Ok(())
    }
}
