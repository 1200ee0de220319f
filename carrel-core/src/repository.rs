use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::booking::{Booking, BookingRevision};
use crate::query::{AttendanceStats, BookingQuery, Page, UserQuery};
use crate::seat::{Seat, SeatFilter};
use crate::user::User;

pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Result of the atomic check-and-insert for a new booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Seat vanished or was deactivated since it was looked up.
    SeatUnavailable,
    /// A seat-holding booking overlaps the requested window.
    SeatConflict(Booking),
    /// The user still holds an active, unfinished booking.
    UserAlreadyBooked(Booking),
}

/// Result of a guarded seat update or delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatWrite {
    Written,
    NotFound,
    /// An `active` or `checked-in` booking still holds the seat.
    Held,
}

/// Result of a user update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserWrite {
    Written,
    NotFound,
    /// The phone number belongs to another account.
    Duplicate,
}

/// Repository trait for seat data access
#[async_trait]
pub trait SeatRepository: Send + Sync {
    /// Returns `false` when the seat number is already taken.
    async fn insert_seat(&self, seat: &Seat) -> Result<bool, StoreError>;

    async fn get_seat(&self, id: Uuid) -> Result<Option<Seat>, StoreError>;

    /// Matching seats ordered by floor, then seat number.
    async fn list_seats(&self, filter: &SeatFilter) -> Result<Vec<Seat>, StoreError>;

    /// Persists descriptive fields and the active flag; leaves occupancy alone.
    /// With `require_unheld`, the holding-booking check and the write are one
    /// atomic unit, serialized against booking inserts on the same seat.
    async fn update_seat(&self, seat: &Seat, require_unheld: bool) -> Result<SeatWrite, StoreError>;

    /// Deletes the seat only if no booking holds it, atomically.
    async fn delete_seat(&self, id: Uuid) -> Result<SeatWrite, StoreError>;

    async fn set_occupied(&self, id: Uuid, occupied: bool) -> Result<bool, StoreError>;
}

/// Repository trait for booking data access
#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Runs the seat-conflict and user-outstanding checks and the insert as
    /// one atomic unit. Nothing is written unless the outcome is `Inserted`.
    async fn insert_if_available(
        &self,
        booking: &Booking,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome, StoreError>;

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError>;

    /// Overwrites the whole record if the stored row still matches
    /// `expected`. Returns `false` when it has moved on or is gone.
    async fn save_booking(&self, booking: &Booking, expected: &BookingRevision) -> Result<bool, StoreError>;

    async fn list_bookings(&self, query: &BookingQuery) -> Result<Page<Booking>, StoreError>;

    /// Whether any `active` or `checked-in` booking references the seat.
    async fn has_holding_bookings(&self, seat_id: Uuid) -> Result<bool, StoreError>;

    async fn attendance_stats(&self, user_id: Uuid) -> Result<AttendanceStats, StoreError>;
}

/// Repository trait for user accounts
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Returns `false` when the email or phone is already registered.
    async fn insert_user(&self, user: &User) -> Result<bool, StoreError>;

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Persists name, phone and the active flag.
    async fn update_user(&self, user: &User) -> Result<UserWrite, StoreError>;

    async fn list_users(&self, query: &UserQuery) -> Result<Page<User>, StoreError>;
}
