use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::booking::BookingStatus;
use crate::repository::StoreError;
use crate::window::TimeWindow;

/// Coarse error classes the outer layers map to transport codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    Conflict,
    InvalidState,
    Malformed,
    Unavailable,
}

/// Why a check-in was refused, reported back to the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInRejection {
    pub status: BookingStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub already_checked_in: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOutRejection {
    pub status: BookingStatus,
    pub checked_in: bool,
    pub already_checked_out: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Seat not found: {0}")]
    SeatNotFound(Uuid),

    #[error("Seat {0} is not available for booking")]
    SeatInactive(Uuid),

    #[error("Seat is already booked for the selected time slot")]
    SeatConflict {
        seat_id: Uuid,
        conflicting: TimeWindow,
    },

    #[error("You already have an active booking. Please complete or cancel it first.")]
    UserAlreadyBooked {
        booking_id: Uuid,
        seat_id: Uuid,
        window: TimeWindow,
    },

    #[error("Seat with number {0} already exists")]
    DuplicateSeat(String),

    #[error("Seat {0} has active bookings")]
    HasActiveBookings(Uuid),

    #[error("User already exists with this email or phone number")]
    DuplicateUser,

    #[error("Booking not found: {0}")]
    NotFound(Uuid),

    #[error("User not found: {0}")]
    UserNotFound(Uuid),

    #[error("Booking {0} was modified concurrently, please retry")]
    ConcurrentModification(Uuid),

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("{}", describe_cancel_refusal(status, *already_started))]
    CannotCancel {
        status: BookingStatus,
        already_started: bool,
    },

    #[error("Booking cannot be checked in at this time")]
    CheckInNotAllowed(CheckInRejection),

    #[error("Booking cannot be checked out")]
    CheckOutNotAllowed(CheckOutRejection),

    #[error("Cannot generate QR for {0} booking")]
    InvalidBookingState(BookingStatus),

    #[error("Invalid QR code: {0}")]
    MalformedToken(String),

    #[error("QR code is not for booking (type: {0})")]
    WrongTokenType(String),

    #[error("Invalid booking window: {0}")]
    InvalidWindow(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

fn describe_cancel_refusal(status: &BookingStatus, already_started: bool) -> String {
    if already_started {
        "Cannot cancel booking that has already started".to_string()
    } else {
        format!("Cannot cancel booking with status: {}", status)
    }
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::SeatNotFound(_) | CoreError::NotFound(_) | CoreError::UserNotFound(_) => {
                ErrorKind::NotFound
            }
            CoreError::Forbidden(_) => ErrorKind::Forbidden,
            CoreError::SeatConflict { .. }
            | CoreError::UserAlreadyBooked { .. }
            | CoreError::DuplicateSeat(_)
            | CoreError::DuplicateUser
            | CoreError::HasActiveBookings(_)
            | CoreError::ConcurrentModification(_) => ErrorKind::Conflict,
            CoreError::SeatInactive(_)
            | CoreError::CannotCancel { .. }
            | CoreError::CheckInNotAllowed(_)
            | CoreError::CheckOutNotAllowed(_)
            | CoreError::InvalidBookingState(_) => ErrorKind::InvalidState,
            CoreError::MalformedToken(_)
            | CoreError::WrongTokenType(_)
            | CoreError::InvalidWindow(_)
            | CoreError::Validation(_) => ErrorKind::Malformed,
            CoreError::Unavailable(_) => ErrorKind::Unavailable,
        }
    }

    /// Structured diagnostics for the caller, when the variant carries any.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            CoreError::SeatConflict { conflicting, .. } => Some(serde_json::json!({
                "conflictingBooking": conflicting,
            })),
            CoreError::UserAlreadyBooked { booking_id, seat_id, window } => Some(serde_json::json!({
                "activeBooking": {
                    "id": booking_id,
                    "seat": seat_id,
                    "startTime": window.start,
                    "endTime": window.end,
                }
            })),
            CoreError::CheckInNotAllowed(rejection) => serde_json::to_value(rejection).ok(),
            CoreError::CheckOutNotAllowed(rejection) => serde_json::to_value(rejection).ok(),
            _ => None,
        }
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        CoreError::Unavailable(err.to_string())
    }
}
