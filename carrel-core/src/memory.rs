use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::booking::{Booking, BookingRevision};
use crate::query::{AttendanceStats, BookingQuery, Page, PageBounds, UserQuery};
use crate::repository::{
    BookingRepository, InsertOutcome, SeatRepository, SeatWrite, StoreError, UserRepository,
    UserWrite,
};
use crate::seat::{Seat, SeatFilter};
use crate::user::User;
use crate::window::{find_seat_conflict, find_user_outstanding};

#[derive(Debug, Default)]
struct Tables {
    seats: HashMap<Uuid, Seat>,
    bookings: HashMap<Uuid, Booking>,
    users: HashMap<Uuid, User>,
}

impl Tables {
    fn seat_is_held(&self, seat_id: Uuid) -> bool {
        self.bookings
            .values()
            .any(|b| b.seat_id == seat_id && b.status.holds_seat())
    }
}

fn paginate<T>(items: Vec<T>, query: &impl PageBounds) -> Result<Page<T>, StoreError> {
    let total = items.len() as u64;
    let items = items
        .into_iter()
        .skip(usize::try_from(query.offset())?)
        .take(query.limit() as usize)
        .collect();
    Ok(Page::new(items, total, query))
}

/// Process-local store backing all three repositories.
///
/// Every check-and-write runs under a single write lock, which gives the same
/// atomicity the Postgres store gets from its transaction.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SeatRepository for InMemoryStore {
    async fn insert_seat(&self, seat: &Seat) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.seats.values().any(|s| s.seat_number == seat.seat_number) {
            return Ok(false);
        }
        tables.seats.insert(seat.id, seat.clone());
        Ok(true)
    }

    async fn get_seat(&self, id: Uuid) -> Result<Option<Seat>, StoreError> {
        Ok(self.tables.read().await.seats.get(&id).cloned())
    }

    async fn list_seats(&self, filter: &SeatFilter) -> Result<Vec<Seat>, StoreError> {
        let tables = self.tables.read().await;
        let mut seats: Vec<Seat> = tables
            .seats
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        seats.sort_by(|a, b| a.floor.cmp(&b.floor).then_with(|| a.seat_number.cmp(&b.seat_number)));
        Ok(seats)
    }

    async fn update_seat(&self, seat: &Seat, require_unheld: bool) -> Result<SeatWrite, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.seats.contains_key(&seat.id) {
            return Ok(SeatWrite::NotFound);
        }
        if require_unheld && tables.seat_is_held(seat.id) {
            return Ok(SeatWrite::Held);
        }
        if let Some(stored) = tables.seats.get_mut(&seat.id) {
            let occupied = stored.is_occupied;
            *stored = seat.clone();
            stored.is_occupied = occupied;
        }
        Ok(SeatWrite::Written)
    }

    async fn delete_seat(&self, id: Uuid) -> Result<SeatWrite, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.seats.contains_key(&id) {
            return Ok(SeatWrite::NotFound);
        }
        if tables.seat_is_held(id) {
            return Ok(SeatWrite::Held);
        }
        tables.seats.remove(&id);
        tables.bookings.retain(|_, b| b.seat_id != id);
        Ok(SeatWrite::Written)
    }

    async fn set_occupied(&self, id: Uuid, occupied: bool) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.seats.get_mut(&id) {
            Some(seat) => {
                seat.is_occupied = occupied;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl BookingRepository for InMemoryStore {
    async fn insert_if_available(
        &self,
        booking: &Booking,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome, StoreError> {
        let mut tables = self.tables.write().await;

        if !tables.seats.get(&booking.seat_id).is_some_and(|s| s.is_active) {
            return Ok(InsertOutcome::SeatUnavailable);
        }
        if let Some(existing) =
            find_seat_conflict(tables.bookings.values(), booking.seat_id, &booking.window())
        {
            return Ok(InsertOutcome::SeatConflict(existing.clone()));
        }
        if let Some(existing) = find_user_outstanding(tables.bookings.values(), booking.user_id, now) {
            return Ok(InsertOutcome::UserAlreadyBooked(existing.clone()));
        }

        tables.bookings.insert(booking.id, booking.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        Ok(self.tables.read().await.bookings.get(&id).cloned())
    }

    async fn save_booking(&self, booking: &Booking, expected: &BookingRevision) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.bookings.get_mut(&booking.id) {
            Some(stored) if stored.revision() == *expected => {
                *stored = booking.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_bookings(&self, query: &BookingQuery) -> Result<Page<Booking>, StoreError> {
        let tables = self.tables.read().await;
        let mut matching: Vec<Booking> = tables
            .bookings
            .values()
            .filter(|b| query.matches(b))
            .cloned()
            .collect();
        query.sort(&mut matching);
        paginate(matching, query)
    }

    async fn has_holding_bookings(&self, seat_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.tables.read().await.seat_is_held(seat_id))
    }

    async fn attendance_stats(&self, user_id: Uuid) -> Result<AttendanceStats, StoreError> {
        let tables = self.tables.read().await;
        Ok(AttendanceStats::from_bookings(
            tables.bookings.values().filter(|b| b.user_id == user_id),
        ))
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn insert_user(&self, user: &User) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let taken = tables.users.values().any(|u| {
            u.email.expose() == user.email.expose() || u.phone.expose() == user.phone.expose()
        });
        if taken {
            return Ok(false);
        }
        tables.users.insert(user.id, user.clone());
        Ok(true)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().find(|u| u.email.expose() == email).cloned())
    }

    async fn update_user(&self, user: &User) -> Result<UserWrite, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&user.id) {
            return Ok(UserWrite::NotFound);
        }
        let phone_taken = tables
            .users
            .values()
            .any(|u| u.id != user.id && u.phone.expose() == user.phone.expose());
        if phone_taken {
            return Ok(UserWrite::Duplicate);
        }
        if let Some(stored) = tables.users.get_mut(&user.id) {
            stored.name = user.name.clone();
            stored.phone = user.phone.clone();
            stored.is_active = user.is_active;
            stored.updated_at = user.updated_at;
        }
        Ok(UserWrite::Written)
    }

    async fn list_users(&self, query: &UserQuery) -> Result<Page<User>, StoreError> {
        let tables = self.tables.read().await;
        let mut matching: Vec<User> = tables.users.values().filter(|u| query.matches(u)).cloned().collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        paginate(matching, query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::NewBooking;
    use crate::seat::NewSeat;
    use crate::window::TimeWindow;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, 0, 0).unwrap()
    }

    fn seat(number: &str, floor: i32) -> Seat {
        Seat::new(
            NewSeat {
                seat_number: number.to_string(),
                seat_type: None,
                floor,
                section: "A".to_string(),
                description: None,
            },
            at(0),
        )
        .unwrap()
    }

    fn booking(user_id: Uuid, seat_id: Uuid, start: u32, end: u32) -> Booking {
        Booking::new(
            NewBooking {
                user_id,
                seat_id,
                window: TimeWindow::new(at(start), at(end)).unwrap(),
                notes: None,
            },
            at(0),
        )
    }

    #[tokio::test]
    async fn test_duplicate_seat_number_rejected() {
        let store = InMemoryStore::new();
        assert!(store.insert_seat(&seat("A1", 1)).await.unwrap());
        assert!(!store.insert_seat(&seat("A1", 2)).await.unwrap());
    }

    #[tokio::test]
    async fn test_seats_sorted_by_floor_then_number() {
        let store = InMemoryStore::new();
        store.insert_seat(&seat("B2", 2)).await.unwrap();
        store.insert_seat(&seat("A9", 1)).await.unwrap();
        store.insert_seat(&seat("A1", 2)).await.unwrap();

        let listed = store.list_seats(&SeatFilter::default()).await.unwrap();
        let numbers: Vec<&str> = listed.iter().map(|s| s.seat_number.as_str()).collect();
        assert_eq!(numbers, vec!["A9", "A1", "B2"]);
    }

    #[tokio::test]
    async fn test_conditional_insert_outcomes() {
        let store = InMemoryStore::new();
        let s = seat("A1", 1);
        store.insert_seat(&s).await.unwrap();

        let first = booking(Uuid::new_v4(), s.id, 9, 11);
        assert_eq!(store.insert_if_available(&first, at(8)).await.unwrap(), InsertOutcome::Inserted);

        let clash = booking(Uuid::new_v4(), s.id, 10, 12);
        assert_eq!(
            store.insert_if_available(&clash, at(8)).await.unwrap(),
            InsertOutcome::SeatConflict(first.clone())
        );

        let other_seat = seat("A2", 1);
        store.insert_seat(&other_seat).await.unwrap();
        let same_user = booking(first.user_id, other_seat.id, 13, 14);
        assert_eq!(
            store.insert_if_available(&same_user, at(8)).await.unwrap(),
            InsertOutcome::UserAlreadyBooked(first)
        );

        let ghost = booking(Uuid::new_v4(), Uuid::new_v4(), 9, 10);
        assert_eq!(
            store.insert_if_available(&ghost, at(8)).await.unwrap(),
            InsertOutcome::SeatUnavailable
        );
    }

    #[tokio::test]
    async fn test_update_seat_keeps_occupancy() {
        let store = InMemoryStore::new();
        let mut s = seat("A1", 1);
        store.insert_seat(&s).await.unwrap();
        store.set_occupied(s.id, true).await.unwrap();

        s.is_occupied = false;
        s.floor = 3;
        assert_eq!(store.update_seat(&s, false).await.unwrap(), SeatWrite::Written);

        let stored = store.get_seat(s.id).await.unwrap().unwrap();
        assert_eq!(stored.floor, 3);
        assert!(stored.is_occupied);
    }

    #[tokio::test]
    async fn test_guarded_seat_writes_refuse_held_seats() {
        let store = InMemoryStore::new();
        let mut s = seat("A1", 1);
        store.insert_seat(&s).await.unwrap();
        let live = booking(Uuid::new_v4(), s.id, 9, 10);
        store.insert_if_available(&live, at(8)).await.unwrap();

        s.is_active = false;
        assert_eq!(store.update_seat(&s, true).await.unwrap(), SeatWrite::Held);
        assert_eq!(store.delete_seat(s.id).await.unwrap(), SeatWrite::Held);
        assert!(store.get_seat(s.id).await.unwrap().unwrap().is_active);
        assert!(store.get_booking(live.id).await.unwrap().is_some());

        assert_eq!(store.delete_seat(Uuid::new_v4()).await.unwrap(), SeatWrite::NotFound);
    }

    #[tokio::test]
    async fn test_save_booking_is_conditional_on_revision() {
        let store = InMemoryStore::new();
        let s = seat("A1", 1);
        store.insert_seat(&s).await.unwrap();
        let original = booking(Uuid::new_v4(), s.id, 9, 11);
        store.insert_if_available(&original, at(8)).await.unwrap();

        let expected = original.revision();
        let mut first = original.clone();
        first.cancel(at(8)).unwrap();
        assert!(store.save_booking(&first, &expected).await.unwrap());

        let mut stale = original.clone();
        stale.check_in(at(9), chrono::Duration::minutes(30)).unwrap();
        assert!(!store.save_booking(&stale, &expected).await.unwrap());

        let stored = store.get_booking(original.id).await.unwrap().unwrap();
        assert_eq!(stored, first);
    }
}
