use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::booking::{Booking, BookingStatus};
use crate::user::{Role, User};

pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const USER_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Page selection carried by a listing query.
pub trait PageBounds {
    fn page(&self) -> u32;
    fn limit(&self) -> u32;

    fn offset(&self) -> u64 {
        u64::from(self.page().saturating_sub(1)) * u64::from(self.limit())
    }
}

fn clamp_page(page: Option<u32>, limit: Option<u32>, default_limit: u32) -> (u32, u32) {
    (
        page.unwrap_or(1).max(1),
        limit.unwrap_or(default_limit).clamp(1, MAX_PAGE_LIMIT),
    )
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BookingOrder {
    /// Newest booking first.
    #[default]
    CreatedDesc,
    /// Most recent check-in first.
    CheckInDesc,
}

/// Filter and page selection over bookings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingQuery {
    pub user_id: Option<Uuid>,
    pub seat_id: Option<Uuid>,
    pub status: Option<BookingStatus>,
    /// Matches bookings starting on this UTC day.
    pub date: Option<NaiveDate>,
    pub checked_in_only: bool,
    pub order: BookingOrder,
    pub page: u32,
    pub limit: u32,
}

impl Default for BookingQuery {
    fn default() -> Self {
        Self {
            user_id: None,
            seat_id: None,
            status: None,
            date: None,
            checked_in_only: false,
            order: BookingOrder::CreatedDesc,
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl BookingQuery {
    pub fn paged(mut self, page: Option<u32>, limit: Option<u32>) -> Self {
        (self.page, self.limit) = clamp_page(page, limit, self.limit);
        self
    }

    pub fn matches(&self, booking: &Booking) -> bool {
        self.user_id.map_or(true, |id| booking.user_id == id)
            && self.seat_id.map_or(true, |id| booking.seat_id == id)
            && self.status.map_or(true, |status| booking.status == status)
            && self.date.map_or(true, |day| booking.start_time.date_naive() == day)
            && (!self.checked_in_only || booking.check_in_time.is_some())
    }

    /// Sorts in place according to `order`.
    pub fn sort(&self, bookings: &mut [Booking]) {
        match self.order {
            BookingOrder::CreatedDesc => bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            BookingOrder::CheckInDesc => bookings.sort_by(|a, b| b.check_in_time.cmp(&a.check_in_time)),
        }
    }
}

impl PageBounds for BookingQuery {
    fn page(&self) -> u32 {
        self.page
    }

    fn limit(&self) -> u32 {
        self.limit
    }
}

/// Admin filter over user accounts, newest account first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserQuery {
    /// Case-insensitive substring of name, email or phone.
    pub search: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
    pub page: u32,
    pub limit: u32,
}

impl Default for UserQuery {
    fn default() -> Self {
        Self {
            search: None,
            role: None,
            is_active: None,
            page: 1,
            limit: USER_PAGE_LIMIT,
        }
    }
}

impl UserQuery {
    pub fn paged(mut self, page: Option<u32>, limit: Option<u32>) -> Self {
        (self.page, self.limit) = clamp_page(page, limit, self.limit);
        self
    }

    /// Trimmed, lowercased search term; blank terms match everything.
    pub fn search_term(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
    }

    pub fn matches(&self, user: &User) -> bool {
        let found = self.search_term().map_or(true, |term| {
            user.name.to_lowercase().contains(&term)
                || user.email.expose().contains(&term)
                || user.phone.expose().contains(&term)
        });
        found
            && self.role.map_or(true, |role| user.role == role)
            && self.is_active.map_or(true, |active| user.is_active == active)
    }
}

impl PageBounds for UserQuery {
    fn page(&self) -> u32 {
        self.page
    }

    fn limit(&self) -> u32 {
        self.limit
    }
}

/// One page of results plus the total match count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: u32,
    pub total_pages: u64,
    pub total_items: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, query: &impl PageBounds) -> Self {
        Self {
            items,
            total,
            page: query.page(),
            limit: query.limit(),
        }
    }

    pub fn total_pages(&self) -> u64 {
        if self.limit == 0 {
            return 0;
        }
        self.total.div_ceil(u64::from(self.limit))
    }

    pub fn pagination(&self) -> Pagination {
        let seen = u64::from(self.page.saturating_sub(1)) * u64::from(self.limit) + self.items.len() as u64;
        Pagination {
            current_page: self.page,
            total_pages: self.total_pages(),
            total_items: self.total,
            has_next: seen < self.total,
            has_prev: self.page > 1,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            limit: self.limit,
        }
    }
}

/// Aggregates over a user's checked-in bookings.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceStats {
    pub total_sessions: u64,
    pub total_duration: i64,
    pub avg_duration: f64,
    pub completed_sessions: u64,
}

impl AttendanceStats {
    pub fn from_bookings<'a>(bookings: impl IntoIterator<Item = &'a Booking>) -> Self {
        let mut stats = AttendanceStats::default();
        for booking in bookings.into_iter().filter(|b| b.check_in_time.is_some()) {
            stats.total_sessions += 1;
            stats.total_duration += booking.actual_duration;
            if booking.status == BookingStatus::Completed {
                stats.completed_sessions += 1;
            }
        }
        if stats.total_sessions > 0 {
            stats.avg_duration = stats.total_duration as f64 / stats.total_sessions as f64;
        }
        stats
    }
}
