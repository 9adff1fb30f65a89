use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Executor, Postgres, QueryBuilder, Row, Transaction};
use uuid::Uuid;

use crate::entities::{Booking, BookingStatus, NewBooking};
use crate::error::Error;

const BOOKING_COLUMNS: &str = "
    booking_id,
    trip_id,
    rider_id,
    booked_seats,
    fare_amount,
    bookings_status,
    is_waypoint_booking,
    waypoint_data,
    created_at,
    updated_at
";

fn booking_from_row(row: &PgRow) -> Result<Booking, Error> {
    let status: String = row.try_get("bookings_status")?;
    let waypoint_data: Option<Json<Value>> = row.try_get("waypoint_data")?;

    Ok(Booking {
        booking_id: row.try_get("booking_id")?,
        trip_id: row.try_get("trip_id")?,
        rider_id: row.try_get("rider_id")?,
        booked_seats: row.try_get("booked_seats")?,
        fare_amount: row.try_get("fare_amount")?,
        bookings_status: BookingStatus::parse(&status)?,
        is_waypoint_booking: row.try_get("is_waypoint_booking")?,
        waypoint_data: waypoint_data.map(|Json(value)| value),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Inserts the booking row. The status is read back rather than assumed:
/// the store may reject a booking outright through a database-side rule.
#[tracing::instrument(skip(tx, booking))]
pub async fn insert_booking(
    tx: &mut Transaction<'_, Postgres>,
    booking: &NewBooking,
) -> Result<Booking, Error> {
    let query = format!(
        "INSERT INTO bookings (booking_id, trip_id, rider_id, booked_seats, fare_amount,
                               is_waypoint_booking, waypoint_data)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING {BOOKING_COLUMNS}"
    );

    let row = tx
        .fetch_one(
            sqlx::query(&query)
                .bind(Uuid::new_v4())
                .bind(booking.trip_id)
                .bind(booking.rider_id)
                .bind(booking.booked_seats)
                .bind(booking.fare_amount)
                .bind(booking.is_waypoint_booking)
                .bind(booking.waypoint_data.clone().map(Json)),
        )
        .await?;

    booking_from_row(&row)
}

pub async fn find_booking<'a, E>(executor: E, booking_id: Uuid) -> Result<Option<Booking>, Error>
where
    E: Executor<'a, Database = Postgres>,
{
    let query = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE booking_id = $1");

    let maybe_row = executor
        .fetch_optional(sqlx::query(&query).bind(booking_id))
        .await?;

    maybe_row.as_ref().map(booking_from_row).transpose()
}

#[tracing::instrument(skip(tx))]
pub async fn booking_for_update(
    tx: &mut Transaction<'_, Postgres>,
    booking_id: Uuid,
) -> Result<Option<Booking>, Error> {
    let query = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE booking_id = $1 FOR UPDATE");

    let maybe_row = tx
        .fetch_optional(sqlx::query(&query).bind(booking_id))
        .await?;

    maybe_row.as_ref().map(booking_from_row).transpose()
}

/// Guarded status transition: the row moves to `requested` only while its
/// current status is outside `excluded`. `None` means a concurrent request
/// already transitioned the booking, and the caller decides what that means.
#[tracing::instrument(skip(tx))]
pub async fn update_status(
    tx: &mut Transaction<'_, Postgres>,
    booking_id: Uuid,
    requested: BookingStatus,
    excluded: &[BookingStatus],
) -> Result<Option<Booking>, Error> {
    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new("UPDATE bookings SET bookings_status = ");
    builder.push_bind(requested.name());
    builder.push(", updated_at = NOW() WHERE booking_id = ");
    builder.push_bind(booking_id);
    builder.push(" AND bookings_status NOT IN (");

    let mut separated = builder.separated(", ");
    for status in excluded {
        separated.push_bind(status.name());
    }

    builder.push(") RETURNING ");
    builder.push(BOOKING_COLUMNS);

    let maybe_row = tx.fetch_optional(builder.build()).await?;

    maybe_row.as_ref().map(booking_from_row).transpose()
}

/// Bookings still in play for the trip: neither cancelled, rejected nor
/// completed. Locked, because the cancellation cascade settles each one.
#[tracing::instrument(skip(tx))]
pub async fn active_bookings_for_update(
    tx: &mut Transaction<'_, Postgres>,
    trip_id: Uuid,
) -> Result<Vec<Booking>, Error> {
    let query = format!(
        "SELECT {BOOKING_COLUMNS}
         FROM bookings
         WHERE trip_id = $1
           AND bookings_status NOT IN ('CANCELLED', 'COMPLETED', 'REJECTED')
         FOR UPDATE"
    );

    let rows = tx.fetch_all(sqlx::query(&query).bind(trip_id)).await?;

    rows.iter().map(booking_from_row).collect()
}

/// Bookings that still stand between the trip and completion.
#[tracing::instrument(skip(tx))]
pub async fn count_open_bookings(
    tx: &mut Transaction<'_, Postgres>,
    trip_id: Uuid,
) -> Result<i64, Error> {
    let query = "
        SELECT COUNT(booking_id) AS count
        FROM bookings
        WHERE trip_id = $1
          AND bookings_status NOT IN ('CANCELLED', 'REJECTED', 'COMPLETED')
    ";

    let row = tx.fetch_one(sqlx::query(query).bind(trip_id)).await?;

    Ok(row.try_get("count")?)
}

#[tracing::instrument(skip(tx))]
pub async fn accepted_rider_ids(
    tx: &mut Transaction<'_, Postgres>,
    trip_id: Uuid,
) -> Result<Vec<Uuid>, Error> {
    let rows = tx
        .fetch_all(
            sqlx::query(
                "SELECT rider_id FROM bookings
                 WHERE trip_id = $1 AND bookings_status = 'ACCEPTED'",
            )
            .bind(trip_id),
        )
        .await?;

    rows.iter()
        .map(|row| Ok(row.try_get("rider_id")?))
        .collect()
}

pub async fn bookings_by_rider<'a, E>(executor: E, rider_id: Uuid) -> Result<Vec<Booking>, Error>
where
    E: Executor<'a, Database = Postgres>,
{
    let query = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings WHERE rider_id = $1 ORDER BY created_at DESC"
    );

    let rows = executor.fetch_all(sqlx::query(&query).bind(rider_id)).await?;

    rows.iter().map(booking_from_row).collect()
}

pub async fn bookings_by_trip<'a, E>(executor: E, trip_id: Uuid) -> Result<Vec<Booking>, Error>
where
    E: Executor<'a, Database = Postgres>,
{
    let query = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings WHERE trip_id = $1 ORDER BY created_at DESC"
    );

    let rows = executor.fetch_all(sqlx::query(&query).bind(trip_id)).await?;

    rows.iter().map(booking_from_row).collect()
}
