use async_trait::async_trait;
use serde_json::json;
use sqlx::{Pool, Postgres, Transaction};
use uuid::Uuid;

use crate::api::{BookingAPI, DynNotifier, NotificationKind, TripCancellationListener};
use crate::engine::{booking_store, trip_store, wallet_store};
use crate::entities::{
    BalanceField, Booking, BookingReceipt, BookingStatus, NewBooking, Settlement, TripStatus,
};
use crate::error::{
    conflicting_state_error, insufficient_balance_error, invalid_input_error, not_found_error,
    seats_unavailable_error, Error,
};

/// Booking lifecycle and the money ledger. Every state transition and its
/// wallet/seat side effects run in one transaction; notifications go out
/// only after commit.
pub struct BookingService {
    pool: Pool<Postgres>,
    notifier: DynNotifier,
}

impl BookingService {
    pub fn new(pool: Pool<Postgres>, notifier: DynNotifier) -> Self {
        Self { pool, notifier }
    }

    /// Delivery is best effort. The ledger has already committed by the
    /// time this runs, so a failed push is logged and swallowed.
    async fn send(&self, user_id: Uuid, kind: NotificationKind, payload: serde_json::Value) {
        if let Err(err) = self.notifier.notify(user_id, kind, payload).await {
            tracing::warn!(%user_id, ?kind, code = err.code, "failed to send notification");
        }
    }

    async fn cancel_booking(&self, booking_id: Uuid) -> Result<Booking, Error> {
        let mut tx = self.pool.begin().await?;

        let booking = booking_store::find_booking(&mut tx, booking_id)
            .await?
            .ok_or_else(not_found_error)?;

        // trips row first, bookings row second; the cancellation cascade
        // locks in the same order
        let seat_update = trip_store::update_seats(&mut tx, booking.trip_id, -booking.booked_seats)
            .await?
            .ok_or_else(not_found_error)?;

        let booking = booking_store::booking_for_update(&mut tx, booking_id)
            .await?
            .ok_or_else(not_found_error)?;
        let settlement = booking.cancellation_settlement()?;

        match settlement {
            Settlement::SplitFare => {
                let half = booking.fare_amount / 2.0;
                wallet_store::adjust(&mut tx, seat_update.driver_id, BalanceField::Wallet, half)
                    .await?;
                wallet_store::adjust(&mut tx, booking.rider_id, BalanceField::Wallet, half).await?;
                wallet_store::adjust(
                    &mut tx,
                    booking.rider_id,
                    BalanceField::HoldAmount,
                    -booking.fare_amount,
                )
                .await?;
            }
            Settlement::FullRefund => {
                wallet_store::adjust(
                    &mut tx,
                    booking.rider_id,
                    BalanceField::Wallet,
                    booking.fare_amount,
                )
                .await?;
                wallet_store::adjust(
                    &mut tx,
                    booking.rider_id,
                    BalanceField::HoldAmount,
                    -booking.fare_amount,
                )
                .await?;
            }
        }

        let updated = booking_store::update_status(
            &mut tx,
            booking_id,
            BookingStatus::Cancelled,
            &[
                BookingStatus::Cancelled,
                BookingStatus::Rejected,
                BookingStatus::Completed,
            ],
        )
        .await?
        .ok_or_else(conflicting_state_error)?;

        tx.commit().await?;

        self.send(
            seat_update.driver_id,
            NotificationKind::BookingCancelled,
            json!({ "booking_id": booking_id, "trip_id": booking.trip_id }),
        )
        .await;

        Ok(updated)
    }

    /// Rider confirms an accepted booking after the ride: the held fare is
    /// released to the driver and, once no open bookings remain, the trip
    /// itself completes in the same transaction.
    async fn confirm_booking(&self, booking_id: Uuid) -> Result<Booking, Error> {
        let mut tx = self.pool.begin().await?;

        let booking = booking_store::find_booking(&mut tx, booking_id)
            .await?
            .ok_or_else(not_found_error)?;

        // trips row first, bookings row second; the cancellation cascade
        // locks in the same order
        let seats = trip_store::seats_for_update(&mut tx, booking.trip_id)
            .await?
            .ok_or_else(not_found_error)?;

        let booking = booking_store::booking_for_update(&mut tx, booking_id)
            .await?
            .ok_or_else(not_found_error)?;
        booking.ensure_confirmable()?;

        wallet_store::adjust(
            &mut tx,
            booking.rider_id,
            BalanceField::HoldAmount,
            -booking.fare_amount,
        )
        .await?;
        wallet_store::adjust(
            &mut tx,
            seats.driver_id,
            BalanceField::Wallet,
            booking.fare_amount,
        )
        .await?;

        let updated = booking_store::update_status(
            &mut tx,
            booking_id,
            BookingStatus::Completed,
            &[
                BookingStatus::Cancelled,
                BookingStatus::Rejected,
                BookingStatus::Completed,
            ],
        )
        .await?
        .ok_or_else(conflicting_state_error)?;

        if booking_store::count_open_bookings(&mut tx, booking.trip_id).await? == 0 {
            trip_store::update_by_status(&mut tx, booking.trip_id, TripStatus::Completed).await?;
        }

        tx.commit().await?;

        self.send(
            seats.driver_id,
            NotificationKind::TripConfirmed,
            json!({ "booking_id": booking_id, "trip_id": booking.trip_id }),
        )
        .await;

        Ok(updated)
    }
}

#[async_trait]
impl BookingAPI for BookingService {
    #[tracing::instrument(skip(self, booking))]
    async fn book_trip(&self, booking: NewBooking) -> Result<BookingReceipt, Error> {
        booking.validate()?;

        let mut tx = self.pool.begin().await?;

        let wallet = wallet_store::balance(&mut tx, booking.rider_id)
            .await?
            .ok_or_else(not_found_error)?;
        if !wallet.covers(booking.fare_amount) {
            return Err(insufficient_balance_error());
        }

        let seats = trip_store::available_seats(&mut tx, booking.trip_id)
            .await?
            .ok_or_else(not_found_error)?;
        match seats.available_seats {
            Some(count) if count >= booking.booked_seats => {}
            _ => return Err(seats_unavailable_error()),
        }

        let created = booking_store::insert_booking(&mut tx, &booking).await?;
        if created.bookings_status == BookingStatus::Rejected {
            // an in-database rule declined the request; nothing was charged
            tx.commit().await?;
            return Ok(BookingReceipt {
                booking: created,
                wallet: None,
                available_seats: None,
            });
        }

        let wallet = wallet_store::debit_and_hold(&mut tx, booking.rider_id, booking.fare_amount)
            .await?
            .ok_or_else(insufficient_balance_error)?;

        let seat_update = trip_store::update_seats(&mut tx, booking.trip_id, booking.booked_seats)
            .await?
            .ok_or_else(seats_unavailable_error)?;

        tx.commit().await?;

        self.send(
            seat_update.driver_id,
            NotificationKind::NewBookingRequest,
            json!({
                "booking_id": created.booking_id,
                "trip_id": created.trip_id,
                "rider_id": created.rider_id,
            }),
        )
        .await;

        Ok(BookingReceipt {
            booking: created,
            wallet: Some(wallet),
            available_seats: Some(seat_update.available_seats),
        })
    }

    #[tracing::instrument(skip(self))]
    async fn update_booking_status_by_driver(
        &self,
        booking_id: Uuid,
        decision: BookingStatus,
    ) -> Result<Booking, Error> {
        if !matches!(decision, BookingStatus::Accepted | BookingStatus::Rejected) {
            return Err(invalid_input_error());
        }

        let mut tx = self.pool.begin().await?;

        let booking = booking_store::booking_for_update(&mut tx, booking_id)
            .await?
            .ok_or_else(not_found_error)?;

        let updated = booking_store::update_status(
            &mut tx,
            booking_id,
            decision,
            &[
                BookingStatus::Accepted,
                BookingStatus::Rejected,
                BookingStatus::Completed,
                BookingStatus::Cancelled,
            ],
        )
        .await?
        .ok_or_else(conflicting_state_error)?;

        if decision == BookingStatus::Rejected {
            wallet_store::adjust(
                &mut tx,
                booking.rider_id,
                BalanceField::Wallet,
                booking.fare_amount,
            )
            .await?;
            wallet_store::adjust(
                &mut tx,
                booking.rider_id,
                BalanceField::HoldAmount,
                -booking.fare_amount,
            )
            .await?;
            trip_store::update_seats(&mut tx, booking.trip_id, -booking.booked_seats)
                .await?
                .ok_or_else(not_found_error)?;
        }

        tx.commit().await?;

        let kind = match decision {
            BookingStatus::Accepted => NotificationKind::BookingAccepted,
            _ => NotificationKind::BookingRejected,
        };
        self.send(
            booking.rider_id,
            kind,
            json!({ "booking_id": booking_id, "trip_id": booking.trip_id }),
        )
        .await;

        Ok(updated)
    }

    #[tracing::instrument(skip(self))]
    async fn update_booking_status_by_rider(
        &self,
        booking_id: Uuid,
        requested: BookingStatus,
    ) -> Result<Booking, Error> {
        match requested {
            BookingStatus::Cancelled => self.cancel_booking(booking_id).await,
            BookingStatus::Completed => self.confirm_booking(booking_id).await,
            _ => Err(invalid_input_error()),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn bookings_by_rider(&self, rider_id: Uuid) -> Result<Vec<Booking>, Error> {
        let mut conn = self.pool.acquire().await?;
        booking_store::bookings_by_rider(&mut conn, rider_id).await
    }

    #[tracing::instrument(skip(self))]
    async fn bookings_by_trip(&self, trip_id: Uuid) -> Result<Vec<Booking>, Error> {
        let mut conn = self.pool.acquire().await?;
        booking_store::bookings_by_trip(&mut conn, trip_id).await
    }
}

#[async_trait]
impl TripCancellationListener for BookingService {
    /// Part of the trip-cancellation transaction: cancels every active
    /// booking and refunds each rider in full. Already-terminal bookings
    /// are skipped, so re-running the cascade is harmless.
    async fn on_trip_cancelled(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        trip_id: Uuid,
    ) -> Result<(), Error> {
        let active = booking_store::active_bookings_for_update(tx, trip_id).await?;
        tracing::info!(%trip_id, count = active.len(), "cancelling active bookings");

        for booking in active {
            let updated = booking_store::update_status(
                tx,
                booking.booking_id,
                BookingStatus::Cancelled,
                &[
                    BookingStatus::Cancelled,
                    BookingStatus::Rejected,
                    BookingStatus::Completed,
                ],
            )
            .await?;

            if updated.is_some() {
                wallet_store::adjust(tx, booking.rider_id, BalanceField::Wallet, booking.fare_amount)
                    .await?;
                wallet_store::adjust(
                    tx,
                    booking.rider_id,
                    BalanceField::HoldAmount,
                    -booking.fare_amount,
                )
                .await?;
            }
        }

        Ok(())
    }
}
