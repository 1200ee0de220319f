use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::booking::{Booking, BookingStatus};
use crate::error::{CoreError, CoreResult};

/// Half-open booking interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    #[serde(rename = "startTime")]
    pub start: DateTime<Utc>,
    #[serde(rename = "endTime")]
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> CoreResult<Self> {
        if start >= end {
            return Err(CoreError::InvalidWindow(
                "End time must be after start time".to_string(),
            ));
        }
        Ok(Self { start, end })
    }

    /// Touching windows do not overlap.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && self.end > other.start
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Checks a window proposed for a new booking against the clock and rules.
    pub fn validate_new(&self, now: DateTime<Utc>, rules: &BookingRules) -> CoreResult<()> {
        if self.start <= now {
            return Err(CoreError::InvalidWindow(
                "Start time must be in the future".to_string(),
            ));
        }
        let minutes = self.duration().num_minutes();
        if self.duration() < Duration::minutes(rules.min_booking_minutes) {
            return Err(CoreError::InvalidWindow(format!(
                "Booking must be at least {} minutes (got {})",
                rules.min_booking_minutes, minutes
            )));
        }
        if self.duration() > Duration::minutes(rules.max_booking_minutes) {
            return Err(CoreError::InvalidWindow(format!(
                "Booking cannot exceed {} minutes (got {})",
                rules.max_booking_minutes, minutes
            )));
        }
        Ok(())
    }

    /// Check-in is open from `lead` before start until end, inclusive.
    pub fn check_in_open(&self, now: DateTime<Utc>, lead: Duration) -> bool {
        now >= self.start - lead && now <= self.end
    }
}

/// Tunable limits for booking windows and free text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRules {
    pub min_booking_minutes: i64,
    pub max_booking_minutes: i64,
    pub check_in_lead_minutes: i64,
    pub notes_max_length: usize,
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            min_booking_minutes: 30,
            max_booking_minutes: 480,
            check_in_lead_minutes: 30,
            notes_max_length: 500,
        }
    }
}

impl BookingRules {
    pub fn check_in_lead(&self) -> Duration {
        Duration::minutes(self.check_in_lead_minutes)
    }

    pub fn validate_notes(&self, field: &str, notes: Option<&str>) -> CoreResult<()> {
        match notes {
            Some(text) if text.chars().count() > self.notes_max_length => {
                Err(CoreError::Validation(format!(
                    "{} cannot exceed {} characters",
                    field, self.notes_max_length
                )))
            }
            _ => Ok(()),
        }
    }
}

/// First seat-holding booking on `seat_id` whose window overlaps `window`.
pub fn find_seat_conflict<'a, I>(bookings: I, seat_id: Uuid, window: &TimeWindow) -> Option<&'a Booking>
where
    I: IntoIterator<Item = &'a Booking>,
{
    bookings
        .into_iter()
        .find(|b| b.seat_id == seat_id && b.status.holds_seat() && b.window().overlaps(window))
}

/// An `active` booking of the user that has not yet ended.
pub fn find_user_outstanding<'a, I>(bookings: I, user_id: Uuid, now: DateTime<Utc>) -> Option<&'a Booking>
where
    I: IntoIterator<Item = &'a Booking>,
{
    bookings
        .into_iter()
        .find(|b| b.user_id == user_id && b.status == BookingStatus::Active && b.end_time > now)
}
