mod booking;
mod trip;
mod wallet;
mod waypoint;

pub use booking::{Booking, BookingReceipt, BookingStatus, NewBooking, Settlement};
pub use trip::{
    NewTrip, SegmentInfo, Trip, TripFilters, TripMatch, TripStatus, TripWithWaypoints, UpdateTrip,
};
pub use wallet::{BalanceField, Wallet};
pub use waypoint::{
    NewWaypoint, RelevantWaypoint, Waypoint, WaypointPurpose, WaypointStats,
};
