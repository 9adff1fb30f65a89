use sqlx::{postgres::PgPoolOptions, Executor, Pool, Postgres};

pub struct PgPool(pub Pool<Postgres>);

impl PgPool {
    pub async fn new(db_uri: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_uri)
            .await?;

        pool.execute("CREATE EXTENSION IF NOT EXISTS postgis").await?;

        // TODO: move this to migrations
        pool.execute(
            "CREATE TABLE IF NOT EXISTS users (
                user_id UUID PRIMARY KEY,
                wallet DOUBLE PRECISION NOT NULL DEFAULT 0,
                hold_amount DOUBLE PRECISION NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
        )
        .await?;

        pool.execute(
            "CREATE TABLE IF NOT EXISTS trips (
                trip_id UUID PRIMARY KEY,
                driver_id UUID NOT NULL,
                vehicle_id UUID,
                start_location_name VARCHAR NOT NULL,
                start_address_line1 VARCHAR,
                start_geopoint geography(Point, 4326) NOT NULL,
                end_location_name VARCHAR NOT NULL,
                end_address_line1 VARCHAR,
                end_geopoint geography(Point, 4326) NOT NULL,
                departure_time TIMESTAMPTZ NOT NULL,
                estimated_arrival_time TIMESTAMPTZ NOT NULL,
                available_seats INT4 NOT NULL,
                price_per_seat DOUBLE PRECISION NOT NULL,
                trip_status VARCHAR NOT NULL DEFAULT 'SCHEDULED',
                trip_description TEXT,
                polyline_path geography(LineString, 4326),
                actual_start_time TIMESTAMPTZ,
                actual_end_time TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
        )
        .await?;

        pool.execute(
            "CREATE TABLE IF NOT EXISTS trip_waypoints (
                waypoint_id UUID PRIMARY KEY,
                trip_id UUID NOT NULL REFERENCES trips (trip_id) ON DELETE CASCADE,
                location_name VARCHAR NOT NULL,
                address_line1 VARCHAR,
                geopoint geography(Point, 4326) NOT NULL,
                sequence_order INT4 NOT NULL,
                estimated_arrival_time TIMESTAMPTZ,
                actual_arrival_time TIMESTAMPTZ,
                UNIQUE (trip_id, sequence_order)
            )",
        )
        .await?;

        pool.execute(
            "CREATE TABLE IF NOT EXISTS bookings (
                booking_id UUID PRIMARY KEY,
                trip_id UUID NOT NULL REFERENCES trips (trip_id) ON DELETE CASCADE,
                rider_id UUID NOT NULL REFERENCES users (user_id),
                booked_seats INT4 NOT NULL,
                fare_amount DOUBLE PRECISION NOT NULL,
                bookings_status VARCHAR NOT NULL DEFAULT 'PENDING',
                is_waypoint_booking BOOLEAN NOT NULL DEFAULT FALSE,
                waypoint_data JSONB,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
        )
        .await?;

        Ok(Self(pool))
    }
}
