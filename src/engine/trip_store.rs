use chrono::Utc;
use geozero::wkb;
use sqlx::postgres::PgRow;
use sqlx::{Executor, Postgres, QueryBuilder, Row, Transaction};
use uuid::Uuid;

use crate::entities::{
    NewTrip, NewWaypoint, RelevantWaypoint, Trip, TripFilters, TripStatus, UpdateTrip, Waypoint,
    WaypointPurpose,
};
use crate::error::{no_fields_to_update_error, not_found_error, Error};
use crate::geo::{self, Coordinates};

pub const DEFAULT_RADIUS_KM: f64 = 50.0;
const DEFAULT_LIMIT: i64 = 20;

pub const TRIP_COLUMNS: &str = "
    t.trip_id,
    t.driver_id,
    t.vehicle_id,
    t.start_location_name,
    t.start_address_line1,
    ST_Y(t.start_geopoint::geometry) AS start_lat,
    ST_X(t.start_geopoint::geometry) AS start_lng,
    t.end_location_name,
    t.end_address_line1,
    ST_Y(t.end_geopoint::geometry) AS end_lat,
    ST_X(t.end_geopoint::geometry) AS end_lng,
    t.departure_time,
    t.estimated_arrival_time,
    t.available_seats,
    t.price_per_seat,
    t.trip_status,
    t.trip_description,
    ST_AsText(t.polyline_path::geometry) AS polyline_path,
    t.actual_start_time,
    t.actual_end_time,
    t.created_at,
    t.updated_at
";

pub fn trip_from_row(row: &PgRow) -> Result<Trip, Error> {
    let status: String = row.try_get("trip_status")?;

    Ok(Trip {
        trip_id: row.try_get("trip_id")?,
        driver_id: row.try_get("driver_id")?,
        vehicle_id: row.try_get("vehicle_id")?,
        start_location_name: row.try_get("start_location_name")?,
        start_address_line1: row.try_get("start_address_line1")?,
        start_geopoint: Coordinates::new(row.try_get("start_lat")?, row.try_get("start_lng")?),
        end_location_name: row.try_get("end_location_name")?,
        end_address_line1: row.try_get("end_address_line1")?,
        end_geopoint: Coordinates::new(row.try_get("end_lat")?, row.try_get("end_lng")?),
        departure_time: row.try_get("departure_time")?,
        estimated_arrival_time: row.try_get("estimated_arrival_time")?,
        available_seats: row.try_get("available_seats")?,
        price_per_seat: row.try_get("price_per_seat")?,
        trip_status: TripStatus::parse(&status)?,
        trip_description: row.try_get("trip_description")?,
        polyline_path: row.try_get("polyline_path")?,
        actual_start_time: row.try_get("actual_start_time")?,
        actual_end_time: row.try_get("actual_end_time")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn waypoint_from_row(row: &PgRow) -> Result<Waypoint, Error> {
    Ok(Waypoint {
        waypoint_id: row.try_get("waypoint_id")?,
        trip_id: row.try_get("trip_id")?,
        location_name: row.try_get("location_name")?,
        address_line1: row.try_get("address_line1")?,
        geopoint: Coordinates::new(row.try_get("lat")?, row.try_get("lng")?),
        sequence_order: row.try_get("sequence_order")?,
        estimated_arrival_time: row.try_get("estimated_arrival_time")?,
        actual_arrival_time: row.try_get("actual_arrival_time")?,
    })
}

#[tracing::instrument(skip(tx, trip))]
pub async fn insert_trip(tx: &mut Transaction<'_, Postgres>, trip: &NewTrip) -> Result<Trip, Error> {
    let trip_id = Uuid::new_v4();

    let query = "
        INSERT INTO trips (trip_id, driver_id, vehicle_id, start_location_name, start_address_line1,
                           start_geopoint, end_location_name, end_address_line1, end_geopoint,
                           departure_time, estimated_arrival_time, available_seats, price_per_seat,
                           trip_description)
        VALUES ($1, $2, $3, $4, $5, ST_SetSRID($6, 4326)::geography, $7, $8,
                ST_SetSRID($9, 4326)::geography, $10, $11, $12, $13, $14)
        RETURNING trip_status, created_at, updated_at
    ";

    let row = tx
        .fetch_one(
            sqlx::query(query)
                .bind(trip_id)
                .bind(trip.driver_id)
                .bind(trip.vehicle_id)
                .bind(&trip.start_location_name)
                .bind(&trip.start_address_line1)
                .bind(wkb::Encode(trip.start_geopoint.to_geometry()))
                .bind(&trip.end_location_name)
                .bind(&trip.end_address_line1)
                .bind(wkb::Encode(trip.end_geopoint.to_geometry()))
                .bind(trip.departure_time)
                .bind(trip.estimated_arrival_time)
                .bind(trip.available_seats)
                .bind(trip.price_per_seat)
                .bind(&trip.trip_description),
        )
        .await?;

    let status: String = row.try_get("trip_status")?;

    Ok(Trip {
        trip_id,
        driver_id: trip.driver_id,
        vehicle_id: trip.vehicle_id,
        start_location_name: trip.start_location_name.clone(),
        start_address_line1: trip.start_address_line1.clone(),
        start_geopoint: trip.start_geopoint,
        end_location_name: trip.end_location_name.clone(),
        end_address_line1: trip.end_address_line1.clone(),
        end_geopoint: trip.end_geopoint,
        departure_time: trip.departure_time,
        estimated_arrival_time: trip.estimated_arrival_time,
        available_seats: trip.available_seats,
        price_per_seat: trip.price_per_seat,
        trip_status: TripStatus::parse(&status)?,
        trip_description: trip.trip_description.clone(),
        polyline_path: None,
        actual_start_time: None,
        actual_end_time: None,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[tracing::instrument(skip(tx, waypoints))]
pub async fn insert_waypoints(
    tx: &mut Transaction<'_, Postgres>,
    trip_id: Uuid,
    waypoints: &[NewWaypoint],
) -> Result<Vec<Waypoint>, Error> {
    let mut inserted = Vec::with_capacity(waypoints.len());

    for waypoint in waypoints {
        let waypoint_id = Uuid::new_v4();

        tx.execute(
            sqlx::query(
                "INSERT INTO trip_waypoints (waypoint_id, trip_id, location_name, address_line1,
                                             geopoint, sequence_order, estimated_arrival_time)
                 VALUES ($1, $2, $3, $4, ST_SetSRID($5, 4326)::geography, $6, $7)",
            )
            .bind(waypoint_id)
            .bind(trip_id)
            .bind(&waypoint.location_name)
            .bind(&waypoint.address_line1)
            .bind(wkb::Encode(waypoint.geopoint.to_geometry()))
            .bind(waypoint.sequence_order)
            .bind(waypoint.estimated_arrival_time),
        )
        .await?;

        inserted.push(Waypoint {
            waypoint_id,
            trip_id,
            location_name: waypoint.location_name.clone(),
            address_line1: waypoint.address_line1.clone(),
            geopoint: waypoint.geopoint,
            sequence_order: waypoint.sequence_order,
            estimated_arrival_time: waypoint.estimated_arrival_time,
            actual_arrival_time: None,
        });
    }

    Ok(inserted)
}

#[tracing::instrument(skip(tx))]
pub async fn delete_waypoints(
    tx: &mut Transaction<'_, Postgres>,
    trip_id: Uuid,
) -> Result<(), Error> {
    tx.execute(sqlx::query("DELETE FROM trip_waypoints WHERE trip_id = $1").bind(trip_id))
        .await?;

    Ok(())
}

/// Rebuilds the trip's path as start -> waypoints (by sequence) -> end.
#[tracing::instrument(skip(tx))]
pub async fn regenerate_polyline(
    tx: &mut Transaction<'_, Postgres>,
    trip_id: Uuid,
) -> Result<String, Error> {
    let query = "
        UPDATE trips
        SET polyline_path = ST_MakeLine(
              ARRAY [start_geopoint::geometry]
              || ARRAY(
                   SELECT geopoint::geometry
                   FROM trip_waypoints
                   WHERE trip_id = $1
                   ORDER BY sequence_order
                 )
              || ARRAY [end_geopoint::geometry]
            )::geography
        WHERE trip_id = $1
        RETURNING ST_AsText(polyline_path::geometry) AS polyline_path,
                  ST_Length(polyline_path) AS distance_meters
    ";

    let row = tx
        .fetch_optional(sqlx::query(query).bind(trip_id))
        .await?
        .ok_or_else(not_found_error)?;

    let polyline: String = row.try_get("polyline_path")?;
    let distance_meters: f64 = row.try_get("distance_meters")?;

    tracing::info!(%trip_id, distance_meters, "regenerated trip polyline");

    Ok(polyline)
}

#[tracing::instrument(skip(tx))]
pub async fn fetch_status_for_update(
    tx: &mut Transaction<'_, Postgres>,
    trip_id: Uuid,
) -> Result<Option<TripStatus>, Error> {
    let maybe_row = tx
        .fetch_optional(
            sqlx::query("SELECT trip_status FROM trips WHERE trip_id = $1 FOR UPDATE")
                .bind(trip_id),
        )
        .await?;

    match maybe_row {
        Some(row) => {
            let status: String = row.try_get("trip_status")?;
            Ok(Some(TripStatus::parse(&status)?))
        }
        None => Ok(None),
    }
}

/// Applies the whitelisted columns present in `changes`. The caller is
/// expected to have rejected an empty change-set already; this double-checks.
#[tracing::instrument(skip(tx, changes))]
pub async fn update_columns(
    tx: &mut Transaction<'_, Postgres>,
    trip_id: Uuid,
    changes: &UpdateTrip,
) -> Result<(), Error> {
    if changes.is_empty() {
        return Err(no_fields_to_update_error());
    }

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE trips SET updated_at = ");
    builder.push_bind(Utc::now());

    if let Some(vehicle_id) = changes.vehicle_id {
        builder.push(", vehicle_id = ").push_bind(vehicle_id);
    }
    if let Some(name) = &changes.start_location_name {
        builder.push(", start_location_name = ").push_bind(name.clone());
    }
    if let Some(address) = &changes.start_address_line1 {
        builder.push(", start_address_line1 = ").push_bind(address.clone());
    }
    if let Some(point) = changes.start_geopoint {
        builder
            .push(", start_geopoint = ST_SetSRID(")
            .push_bind(wkb::Encode(point.to_geometry()))
            .push(", 4326)::geography");
    }
    if let Some(name) = &changes.end_location_name {
        builder.push(", end_location_name = ").push_bind(name.clone());
    }
    if let Some(address) = &changes.end_address_line1 {
        builder.push(", end_address_line1 = ").push_bind(address.clone());
    }
    if let Some(point) = changes.end_geopoint {
        builder
            .push(", end_geopoint = ST_SetSRID(")
            .push_bind(wkb::Encode(point.to_geometry()))
            .push(", 4326)::geography");
    }
    if let Some(departure_time) = changes.departure_time {
        builder.push(", departure_time = ").push_bind(departure_time);
    }
    if let Some(arrival) = changes.estimated_arrival_time {
        builder.push(", estimated_arrival_time = ").push_bind(arrival);
    }
    if let Some(seats) = changes.available_seats {
        builder.push(", available_seats = ").push_bind(seats);
    }
    if let Some(price) = changes.price_per_seat {
        builder.push(", price_per_seat = ").push_bind(price);
    }
    if let Some(description) = &changes.trip_description {
        builder.push(", trip_description = ").push_bind(description.clone());
    }

    builder.push(" WHERE trip_id = ").push_bind(trip_id);

    tx.execute(builder.build()).await?;

    Ok(())
}

/// Status write that can participate in a caller's transaction. The actual
/// start/end timestamps are set through COALESCE so repeating a transition
/// never overwrites the first observation.
#[tracing::instrument(skip(tx))]
pub async fn update_by_status(
    tx: &mut Transaction<'_, Postgres>,
    trip_id: Uuid,
    status: TripStatus,
) -> Result<(), Error> {
    let mut query = String::from("UPDATE trips SET trip_status = $1, updated_at = NOW()");

    match status {
        TripStatus::InProgress => {
            query.push_str(", actual_start_time = COALESCE(actual_start_time, NOW())");
        }
        TripStatus::Completed => {
            query.push_str(", actual_end_time = COALESCE(actual_end_time, NOW())");
        }
        _ => {}
    }

    query.push_str(" WHERE trip_id = $2 RETURNING trip_id");

    tx.fetch_optional(sqlx::query(&query).bind(status.name()).bind(trip_id))
        .await?
        .ok_or_else(not_found_error)?;

    Ok(())
}

#[derive(Clone, Copy, Debug)]
pub struct SeatUpdate {
    pub available_seats: i32,
    pub driver_id: Uuid,
}

/// Guarded seat adjustment: decrements by `delta` (negative to return seats)
/// only while `available_seats >= delta` holds. `None` means the guard
/// failed and the caller's transaction must abort; this conditional WHERE is
/// the seat-inventory concurrency control.
#[tracing::instrument(skip(tx))]
pub async fn update_seats(
    tx: &mut Transaction<'_, Postgres>,
    trip_id: Uuid,
    delta: i32,
) -> Result<Option<SeatUpdate>, Error> {
    let query = "
        UPDATE trips
        SET available_seats = available_seats - $1
        WHERE trip_id = $2
          AND available_seats >= $1
        RETURNING available_seats, driver_id
    ";

    let maybe_row = tx
        .fetch_optional(sqlx::query(query).bind(delta).bind(trip_id))
        .await?;

    match maybe_row {
        Some(row) => Ok(Some(SeatUpdate {
            available_seats: row.try_get("available_seats")?,
            driver_id: row.try_get("driver_id")?,
        })),
        None => Ok(None),
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SeatCount {
    pub available_seats: Option<i32>,
    pub driver_id: Uuid,
}

#[tracing::instrument(skip(tx))]
pub async fn available_seats(
    tx: &mut Transaction<'_, Postgres>,
    trip_id: Uuid,
) -> Result<Option<SeatCount>, Error> {
    let maybe_row = tx
        .fetch_optional(
            sqlx::query("SELECT available_seats, driver_id FROM trips WHERE trip_id = $1")
                .bind(trip_id),
        )
        .await?;

    match maybe_row {
        Some(row) => Ok(Some(SeatCount {
            available_seats: row.try_get("available_seats")?,
            driver_id: row.try_get("driver_id")?,
        })),
        None => Ok(None),
    }
}

/// Same read as `available_seats` but takes the trips row lock. Booking
/// flows that go on to lock booking rows read through this so the trips
/// lock is always acquired first, the same order the cancellation cascade
/// uses.
#[tracing::instrument(skip(tx))]
pub async fn seats_for_update(
    tx: &mut Transaction<'_, Postgres>,
    trip_id: Uuid,
) -> Result<Option<SeatCount>, Error> {
    let maybe_row = tx
        .fetch_optional(
            sqlx::query("SELECT available_seats, driver_id FROM trips WHERE trip_id = $1 FOR UPDATE")
                .bind(trip_id),
        )
        .await?;

    match maybe_row {
        Some(row) => Ok(Some(SeatCount {
            available_seats: row.try_get("available_seats")?,
            driver_id: row.try_get("driver_id")?,
        })),
        None => Ok(None),
    }
}

pub async fn waypoints_by_trip<'a, E>(executor: E, trip_id: Uuid) -> Result<Vec<Waypoint>, Error>
where
    E: Executor<'a, Database = Postgres>,
{
    let query = "
        SELECT waypoint_id,
               trip_id,
               location_name,
               address_line1,
               ST_Y(geopoint::geometry) AS lat,
               ST_X(geopoint::geometry) AS lng,
               sequence_order,
               estimated_arrival_time,
               actual_arrival_time
        FROM trip_waypoints
        WHERE trip_id = $1
        ORDER BY sequence_order
    ";

    let rows = executor.fetch_all(sqlx::query(query).bind(trip_id)).await?;

    rows.iter().map(waypoint_from_row).collect()
}

/// A search hit before waypoint classification is attached.
#[derive(Clone, Debug)]
pub struct SearchRow {
    pub trip_id: Uuid,
    pub driver_id: Uuid,
    pub start_location_name: String,
    pub end_location_name: String,
    pub trip_status: TripStatus,
    pub departure_time: chrono::DateTime<Utc>,
    pub estimated_arrival_time: chrono::DateTime<Utc>,
    pub price_per_seat: f64,
}

/// Geospatial trip search. Candidates are narrowed with a cheap bounding-box
/// containment test before the exact ST_DWithin radius check; when both
/// endpoints are given, ST_LineLocatePoint enforces that the boarding point
/// precedes the alighting point along the path.
#[tracing::instrument(skip(executor, filters))]
pub async fn search<'a, E>(executor: E, filters: &TripFilters) -> Result<Vec<SearchRow>, Error>
where
    E: Executor<'a, Database = Postgres>,
{
    let radius_km = filters.radius_km.unwrap_or(DEFAULT_RADIUS_KM);
    let radius_degrees = geo::radius_degrees(radius_km);
    let radius_meters = geo::radius_meters(radius_km);

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT t.trip_id,
                t.driver_id,
                t.start_location_name,
                t.end_location_name,
                t.trip_status,
                t.departure_time,
                t.estimated_arrival_time,
                t.price_per_seat
         FROM trips t
         WHERE t.polyline_path IS NOT NULL",
    );

    let start_point = |filters: &TripFilters| wkb::Encode(filters.start_location.to_geometry());

    match filters.end_location {
        None => {
            builder
                .push(" AND t.polyline_path::geometry && ST_Envelope(ST_Expand(ST_SetSRID(")
                .push_bind(start_point(filters))
                .push(", 4326), ")
                .push_bind(radius_degrees)
                .push("))");
            builder
                .push(" AND ST_DWithin(t.polyline_path, ST_SetSRID(")
                .push_bind(start_point(filters))
                .push(", 4326)::geography, ")
                .push_bind(radius_meters)
                .push(")");
        }
        Some(end_location) => {
            let end_point = move || wkb::Encode(end_location.to_geometry());

            builder
                .push(" AND t.polyline_path::geometry && ST_Envelope(ST_Collect(")
                .push("ST_Expand(ST_SetSRID(")
                .push_bind(start_point(filters))
                .push(", 4326), ")
                .push_bind(radius_degrees)
                .push("), ST_Expand(ST_SetSRID(")
                .push_bind(end_point())
                .push(", 4326), ")
                .push_bind(radius_degrees)
                .push(")))");
            builder
                .push(" AND ST_DWithin(t.polyline_path, ST_SetSRID(")
                .push_bind(start_point(filters))
                .push(", 4326)::geography, ")
                .push_bind(radius_meters)
                .push(")");
            builder
                .push(" AND ST_DWithin(t.polyline_path, ST_SetSRID(")
                .push_bind(end_point())
                .push(", 4326)::geography, ")
                .push_bind(radius_meters)
                .push(")");
            // direction of travel: the rider must board before they alight
            builder
                .push(" AND ST_LineLocatePoint(t.polyline_path::geometry, ST_SetSRID(")
                .push_bind(start_point(filters))
                .push(", 4326)) < ST_LineLocatePoint(t.polyline_path::geometry, ST_SetSRID(")
                .push_bind(end_point())
                .push(", 4326))");
        }
    }

    if let Some(driver_id) = filters.driver_id {
        builder.push(" AND t.driver_id = ").push_bind(driver_id);
    }

    if let Some(status) = filters.trip_status {
        builder.push(" AND t.trip_status = ").push_bind(status.name());
    }

    match filters.departure_date {
        Some(date) => {
            builder.push(" AND DATE(t.departure_time) = ").push_bind(date);
        }
        None => {
            builder.push(" AND t.departure_time > NOW()");
        }
    }

    builder
        .push(" LIMIT ")
        .push_bind(filters.limit.unwrap_or(DEFAULT_LIMIT))
        .push(" OFFSET ")
        .push_bind(filters.offset.unwrap_or(0));

    let rows = executor.fetch_all(builder.build()).await?;

    rows.iter()
        .map(|row| {
            let status: String = row.try_get("trip_status")?;

            Ok(SearchRow {
                trip_id: row.try_get("trip_id")?,
                driver_id: row.try_get("driver_id")?,
                start_location_name: row.try_get("start_location_name")?,
                end_location_name: row.try_get("end_location_name")?,
                trip_status: TripStatus::parse(&status)?,
                departure_time: row.try_get("departure_time")?,
                estimated_arrival_time: row.try_get("estimated_arrival_time")?,
                price_per_seat: row.try_get("price_per_seat")?,
            })
        })
        .collect()
}

/// Classifies a matched trip's waypoints against the rider's requested
/// points: near the start => pickup, near the end => dropoff. A waypoint
/// near both is disambiguated by comparing its sequence order to the mean
/// sequence order of the ambiguous set; everything else is excluded.
#[tracing::instrument(skip(executor))]
pub async fn relevant_waypoints<'a, E>(
    executor: E,
    trip_id: Uuid,
    start_location: Coordinates,
    end_location: Option<Coordinates>,
    radius_km: f64,
) -> Result<Vec<RelevantWaypoint>, Error>
where
    E: Executor<'a, Database = Postgres>,
{
    let radius_degrees = geo::radius_degrees(radius_km);
    let radius_meters = geo::radius_meters(radius_km);
    let start = wkb::Encode(start_location.to_geometry());

    let rows = match end_location {
        Some(end_location) => {
            let query = "
                WITH candidate_waypoints AS (
                    SELECT tw.waypoint_id,
                           tw.location_name,
                           tw.estimated_arrival_time,
                           tw.sequence_order,
                           ST_DWithin(tw.geopoint,
                                      ST_SetSRID($2, 4326)::geography, $4) AS near_start,
                           ST_DWithin(tw.geopoint,
                                      ST_SetSRID($3, 4326)::geography, $4) AS near_end
                    FROM trip_waypoints tw
                    WHERE tw.trip_id = $1
                      AND tw.geopoint::geometry && ST_Envelope(
                            ST_Collect(
                              ST_Expand(ST_SetSRID($2, 4326), $5),
                              ST_Expand(ST_SetSRID($3, 4326), $5)
                            )
                          )
                      AND (
                        ST_DWithin(tw.geopoint, ST_SetSRID($2, 4326)::geography, $4)
                        OR ST_DWithin(tw.geopoint, ST_SetSRID($3, 4326)::geography, $4)
                      )
                )
                SELECT waypoint_id,
                       location_name,
                       estimated_arrival_time,
                       sequence_order,
                       CASE
                         WHEN near_start AND near_end THEN
                           CASE
                             WHEN sequence_order < (SELECT AVG(sequence_order)
                                                    FROM candidate_waypoints
                                                    WHERE near_start AND near_end) THEN 'pickup'
                             ELSE 'dropoff'
                           END
                         WHEN near_start THEN 'pickup'
                         WHEN near_end THEN 'dropoff'
                         ELSE 'intermediate'
                       END AS waypoint_purpose
                FROM candidate_waypoints
                ORDER BY sequence_order
            ";

            executor
                .fetch_all(
                    sqlx::query(query)
                        .bind(trip_id)
                        .bind(start)
                        .bind(wkb::Encode(end_location.to_geometry()))
                        .bind(radius_meters)
                        .bind(radius_degrees),
                )
                .await?
        }
        None => {
            let query = "
                SELECT tw.waypoint_id,
                       tw.location_name,
                       tw.estimated_arrival_time,
                       tw.sequence_order,
                       'pickup' AS waypoint_purpose
                FROM trip_waypoints tw
                WHERE tw.trip_id = $1
                  AND tw.geopoint::geometry && ST_Envelope(
                        ST_Expand(ST_SetSRID($2, 4326), $4)
                      )
                  AND ST_DWithin(tw.geopoint, ST_SetSRID($2, 4326)::geography, $3)
                ORDER BY tw.sequence_order
            ";

            executor
                .fetch_all(
                    sqlx::query(query)
                        .bind(trip_id)
                        .bind(start)
                        .bind(radius_meters)
                        .bind(radius_degrees),
                )
                .await?
        }
    };

    rows.iter()
        .map(|row| {
            let purpose: String = row.try_get("waypoint_purpose")?;

            Ok(RelevantWaypoint {
                waypoint_id: row.try_get("waypoint_id")?,
                location_name: row.try_get("location_name")?,
                estimated_arrival_time: row.try_get("estimated_arrival_time")?,
                sequence_order: row.try_get("sequence_order")?,
                purpose: WaypointPurpose::parse(&purpose)?,
            })
        })
        .collect()
}
