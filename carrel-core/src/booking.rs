use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CheckInRejection, CheckOutRejection, CoreError, CoreResult};
use crate::window::TimeWindow;

/// Booking status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum BookingStatus {
    Active,
    CheckedIn,
    Completed,
    Cancelled,
    /// Reserved; nothing transitions into it yet.
    NoShow,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Active => "active",
            BookingStatus::CheckedIn => "checked-in",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::NoShow => "no-show",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::NoShow
        )
    }

    /// Statuses that keep a seat occupied.
    pub fn holds_seat(&self) -> bool {
        matches!(self, BookingStatus::Active | BookingStatus::CheckedIn)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(BookingStatus::Active),
            "checked-in" => Ok(BookingStatus::CheckedIn),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            "no-show" => Ok(BookingStatus::NoShow),
            other => Err(CoreError::Validation(format!("Invalid booking status: {}", other))),
        }
    }
}

/// A reservation of one seat by one user for one window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Uuid,
    pub user_id: Uuid,
    pub seat_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: BookingStatus,
    pub check_in_time: Option<DateTime<Utc>>,
    pub check_out_time: Option<DateTime<Utc>>,
    /// Minutes between check-in and check-out; zero until checkout.
    pub actual_duration: i64,
    pub qr_code: Option<String>,
    pub qr_data: Option<String>,
    pub notes: Option<String>,
    pub attendance_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The fields a transition was guarded on. Saves are conditional on the
/// stored row still carrying them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingRevision {
    pub status: BookingStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub user_id: Uuid,
    pub seat_id: Uuid,
    pub window: TimeWindow,
    pub notes: Option<String>,
}

impl Booking {
    pub fn new(input: NewBooking, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            seat_id: input.seat_id,
            start_time: input.window.start,
            end_time: input.window.end,
            status: BookingStatus::Active,
            check_in_time: None,
            check_out_time: None,
            actual_duration: 0,
            qr_code: None,
            qr_data: None,
            notes: input.notes,
            attendance_notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn window(&self) -> TimeWindow {
        TimeWindow {
            start: self.start_time,
            end: self.end_time,
        }
    }

    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.user_id == user_id
    }

    pub fn revision(&self) -> BookingRevision {
        BookingRevision {
            status: self.status,
            updated_at: self.updated_at,
        }
    }

    /// `active -> checked-in`, allowed from `lead` before start until end.
    pub fn check_in(&mut self, now: DateTime<Utc>, lead: Duration) -> CoreResult<()> {
        let allowed = self.status == BookingStatus::Active
            && self.check_in_time.is_none()
            && self.window().check_in_open(now, lead);
        if !allowed {
            return Err(CoreError::CheckInNotAllowed(CheckInRejection {
                status: self.status,
                start_time: self.start_time,
                end_time: self.end_time,
                already_checked_in: self.check_in_time.is_some(),
            }));
        }

        self.status = BookingStatus::CheckedIn;
        self.check_in_time = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// `checked-in -> completed`. Records the attended duration.
    pub fn check_out(&mut self, now: DateTime<Utc>, notes: Option<String>) -> CoreResult<()> {
        let checked_in = match self.check_in_time {
            Some(at) if self.status == BookingStatus::CheckedIn && self.check_out_time.is_none() => at,
            _ => {
                return Err(CoreError::CheckOutNotAllowed(CheckOutRejection {
                    status: self.status,
                    checked_in: self.check_in_time.is_some(),
                    already_checked_out: self.check_out_time.is_some(),
                }));
            }
        };

        self.status = BookingStatus::Completed;
        self.check_out_time = Some(now);
        self.actual_duration = rounded_minutes(now - checked_in);
        if notes.is_some() {
            self.attendance_notes = notes;
        }
        self.updated_at = now;
        Ok(())
    }

    /// `active -> cancelled`, only before the window starts.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        if self.status != BookingStatus::Active {
            return Err(CoreError::CannotCancel {
                status: self.status,
                already_started: false,
            });
        }
        if self.start_time <= now {
            return Err(CoreError::CannotCancel {
                status: self.status,
                already_started: true,
            });
        }

        self.status = BookingStatus::Cancelled;
        self.updated_at = now;
        Ok(())
    }

    /// `active -> cancelled` regardless of start time. Used when the owner's
    /// account is deactivated.
    pub fn withdraw(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        if self.status != BookingStatus::Active {
            return Err(CoreError::CannotCancel {
                status: self.status,
                already_started: false,
            });
        }
        self.status = BookingStatus::Cancelled;
        self.updated_at = now;
        Ok(())
    }

    pub fn attach_token(&mut self, qr_code: String, qr_data: String, now: DateTime<Utc>) {
        self.qr_code = Some(qr_code);
        self.qr_data = Some(qr_data);
        self.updated_at = now;
    }
}

/// Whole minutes, half rounded up, never negative.
fn rounded_minutes(elapsed: Duration) -> i64 {
    (elapsed.num_milliseconds() + 30_000).div_euclid(60_000).max(0)
}
