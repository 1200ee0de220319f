use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::booking::{Booking, BookingStatus, NewBooking};
use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::qr::{IssuedToken, QrCodec};
use crate::query::{AttendanceStats, BookingOrder, BookingQuery, Page, MAX_PAGE_LIMIT};
use crate::registry::SeatRegistry;
use crate::repository::{BookingRepository, InsertOutcome};
use crate::user::Principal;
use crate::window::{BookingRules, TimeWindow};

/// Reloads allowed when a conditional save finds the row already changed.
const MAX_TRANSITION_ATTEMPTS: u32 = 3;

/// Who may act on a booking besides its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    OwnerOnly,
    OwnerOrAdmin,
}

/// Booking lifecycle: creation with conflict detection, cancellation,
/// check-in, check-out and token issuance.
#[derive(Clone)]
pub struct BookingEngine {
    registry: SeatRegistry,
    bookings: Arc<dyn BookingRepository>,
    clock: Arc<dyn Clock>,
    codec: QrCodec,
    rules: BookingRules,
}

impl BookingEngine {
    pub fn new(
        registry: SeatRegistry,
        bookings: Arc<dyn BookingRepository>,
        clock: Arc<dyn Clock>,
        rules: BookingRules,
    ) -> Self {
        Self {
            registry,
            bookings,
            clock,
            codec: QrCodec::new(),
            rules,
        }
    }

    pub fn registry(&self) -> &SeatRegistry {
        &self.registry
    }

    pub fn rules(&self) -> &BookingRules {
        &self.rules
    }

    /// Reserve a seat. Seat conflict and the one-booking-per-user rule are
    /// checked and written atomically by the repository.
    pub async fn create_booking(
        &self,
        principal: &Principal,
        seat_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        notes: Option<String>,
    ) -> CoreResult<Booking> {
        let now = self.clock.now();
        let window = TimeWindow::new(start_time, end_time)?;
        window.validate_new(now, &self.rules)?;
        self.rules.validate_notes("Notes", notes.as_deref())?;

        let seat = self.registry.get(seat_id).await?;
        if !seat.is_active {
            return Err(CoreError::SeatInactive(seat_id));
        }

        let booking = Booking::new(
            NewBooking {
                user_id: principal.user_id,
                seat_id,
                window,
                notes,
            },
            now,
        );

        match self.bookings.insert_if_available(&booking, now).await? {
            InsertOutcome::Inserted => {}
            InsertOutcome::SeatUnavailable => return Err(CoreError::SeatInactive(seat_id)),
            InsertOutcome::SeatConflict(existing) => {
                tracing::debug!(seat_id = %seat_id, conflicting = %existing.id, "seat conflict");
                return Err(CoreError::SeatConflict {
                    seat_id,
                    conflicting: existing.window(),
                });
            }
            InsertOutcome::UserAlreadyBooked(existing) => {
                return Err(CoreError::UserAlreadyBooked {
                    booking_id: existing.id,
                    seat_id: existing.seat_id,
                    window: existing.window(),
                });
            }
        }

        if let Err(e) = self.registry.set_occupied(seat_id, true).await {
            tracing::warn!(seat_id = %seat_id, error = %e, "booking stored but seat occupancy not updated");
        }

        tracing::info!(
            booking_id = %booking.id,
            user_id = %booking.user_id,
            seat_id = %seat_id,
            start = %booking.start_time,
            end = %booking.end_time,
            "booking created"
        );
        Ok(booking)
    }

    /// `active -> cancelled`. Owner or admin, only before the window starts.
    pub async fn cancel_booking(&self, booking_id: Uuid, principal: &Principal) -> CoreResult<Booking> {
        let booking = self
            .transition(booking_id, principal, Access::OwnerOrAdmin, |b, now| b.cancel(now))
            .await?;
        self.release_seat(booking.seat_id).await;

        tracing::info!(booking_id = %booking_id, by = %principal.user_id, "booking cancelled");
        Ok(booking)
    }

    /// `active -> checked-in`. Owner only.
    pub async fn check_in(&self, booking_id: Uuid, principal: &Principal) -> CoreResult<Booking> {
        let lead = self.rules.check_in_lead();
        let booking = self
            .transition(booking_id, principal, Access::OwnerOnly, |b, now| b.check_in(now, lead))
            .await?;

        tracing::info!(booking_id = %booking_id, seat_id = %booking.seat_id, "checked in");
        Ok(booking)
    }

    /// `checked-in -> completed`. Owner only; releases the seat.
    pub async fn check_out(
        &self,
        booking_id: Uuid,
        principal: &Principal,
        notes: Option<String>,
    ) -> CoreResult<Booking> {
        self.rules.validate_notes("Attendance notes", notes.as_deref())?;
        let booking = self
            .transition(booking_id, principal, Access::OwnerOnly, |b, now| {
                b.check_out(now, notes.clone())
            })
            .await?;
        self.release_seat(booking.seat_id).await;

        tracing::info!(
            booking_id = %booking_id,
            seat_id = %booking.seat_id,
            minutes = booking.actual_duration,
            "checked out"
        );
        Ok(booking)
    }

    /// Issue (or re-issue) the scannable token for a live booking.
    pub async fn issue_token(&self, booking_id: Uuid, principal: &Principal) -> CoreResult<IssuedToken> {
        let codec = self.codec;
        let booking = self
            .transition(booking_id, principal, Access::OwnerOnly, |b, now| {
                if b.status.is_terminal() {
                    return Err(CoreError::InvalidBookingState(b.status));
                }
                let issued = codec.encode(b.id, now);
                b.attach_token(issued.qr_code, issued.qr_data, now);
                Ok(())
            })
            .await?;

        tracing::debug!(booking_id = %booking_id, "token issued");
        let status = booking.status;
        booking
            .qr_code
            .zip(booking.qr_data)
            .map(|(qr_code, qr_data)| IssuedToken { qr_code, qr_data })
            .ok_or(CoreError::InvalidBookingState(status))
    }

    pub fn resolve_token(&self, token: &str) -> CoreResult<Uuid> {
        Ok(self.codec.decode(token)?)
    }

    pub async fn check_in_with_token(&self, token: &str, principal: &Principal) -> CoreResult<Booking> {
        let booking_id = self.resolve_token(token)?;
        self.check_in(booking_id, principal).await
    }

    pub async fn check_out_with_token(
        &self,
        token: &str,
        principal: &Principal,
        notes: Option<String>,
    ) -> CoreResult<Booking> {
        let booking_id = self.resolve_token(token)?;
        self.check_out(booking_id, principal, notes).await
    }

    pub async fn get_booking(&self, booking_id: Uuid, principal: &Principal) -> CoreResult<Booking> {
        self.load(booking_id, principal, Access::OwnerOrAdmin).await
    }

    pub async fn list_user_bookings(
        &self,
        principal: &Principal,
        status: Option<BookingStatus>,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> CoreResult<Page<Booking>> {
        let query = BookingQuery {
            user_id: Some(principal.user_id),
            status,
            ..Default::default()
        }
        .paged(page, limit);
        Ok(self.bookings.list_bookings(&query).await?)
    }

    /// Admin listing across all users.
    pub async fn list_all_bookings(&self, principal: &Principal, query: BookingQuery) -> CoreResult<Page<Booking>> {
        if !principal.is_admin() {
            return Err(CoreError::Forbidden("admin role required".to_string()));
        }
        Ok(self.bookings.list_bookings(&query).await?)
    }

    /// The caller's checked-in bookings, newest check-in first, with totals.
    pub async fn attendance_history(
        &self,
        principal: &Principal,
        status: Option<BookingStatus>,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> CoreResult<(Page<Booking>, AttendanceStats)> {
        let query = BookingQuery {
            user_id: Some(principal.user_id),
            status,
            checked_in_only: true,
            order: BookingOrder::CheckInDesc,
            ..Default::default()
        }
        .paged(page, limit);
        let records = self.bookings.list_bookings(&query).await?;
        let stats = self.bookings.attendance_stats(principal.user_id).await?;
        Ok((records, stats))
    }

    /// Cancels every `active` booking of `user_id` regardless of start time,
    /// releasing their seats. Bookings that moved on concurrently are skipped.
    pub(crate) async fn withdraw_user_bookings(&self, principal: &Principal, user_id: Uuid) -> CoreResult<Vec<Booking>> {
        if !principal.is_admin() {
            return Err(CoreError::Forbidden("admin role required".to_string()));
        }

        let mut pending = Vec::new();
        let mut query = BookingQuery {
            user_id: Some(user_id),
            status: Some(BookingStatus::Active),
            ..Default::default()
        }
        .paged(Some(1), Some(MAX_PAGE_LIMIT));
        loop {
            let page = self.bookings.list_bookings(&query).await?;
            let last = !page.pagination().has_next;
            pending.extend(page.items.into_iter().map(|b| b.id));
            if last {
                break;
            }
            query.page += 1;
        }

        let mut withdrawn = Vec::with_capacity(pending.len());
        for booking_id in pending {
            match self
                .transition(booking_id, principal, Access::OwnerOrAdmin, |b, now| b.withdraw(now))
                .await
            {
                Ok(booking) => {
                    self.release_seat(booking.seat_id).await;
                    withdrawn.push(booking);
                }
                Err(CoreError::CannotCancel { status, .. }) => {
                    tracing::debug!(booking_id = %booking_id, status = status.as_str(), "booking left active before withdrawal");
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(user_id = %user_id, cancelled = withdrawn.len(), "user bookings withdrawn");
        Ok(withdrawn)
    }

    /// Loads, applies `apply` and saves conditionally on the loaded revision.
    /// A lost race reloads and re-applies, so guards always see the latest row.
    async fn transition<F>(
        &self,
        booking_id: Uuid,
        principal: &Principal,
        access: Access,
        mut apply: F,
    ) -> CoreResult<Booking>
    where
        F: FnMut(&mut Booking, DateTime<Utc>) -> CoreResult<()> + Send,
    {
        for attempt in 1..=MAX_TRANSITION_ATTEMPTS {
            let mut booking = self.load(booking_id, principal, access).await?;
            let expected = booking.revision();
            apply(&mut booking, self.clock.now())?;
            if self.bookings.save_booking(&booking, &expected).await? {
                return Ok(booking);
            }
            tracing::debug!(booking_id = %booking_id, attempt, "booking changed before save, reloading");
        }
        Err(CoreError::ConcurrentModification(booking_id))
    }

    async fn load(&self, booking_id: Uuid, principal: &Principal, access: Access) -> CoreResult<Booking> {
        let booking = self
            .bookings
            .get_booking(booking_id)
            .await?
            .ok_or(CoreError::NotFound(booking_id))?;

        let allowed = booking.is_owned_by(principal.user_id)
            || (access == Access::OwnerOrAdmin && principal.is_admin());
        if !allowed {
            return Err(CoreError::Forbidden(format!("booking {} belongs to another user", booking_id)));
        }
        Ok(booking)
    }

    /// Occupancy follows the booking commit; drift is left for reconciliation.
    async fn release_seat(&self, seat_id: Uuid) {
        if let Err(e) = self.registry.reconcile_occupancy(seat_id).await {
            tracing::warn!(seat_id = %seat_id, error = %e, "seat occupancy not released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::error::{CheckOutRejection, ErrorKind};
    use crate::booking::BookingRevision;
    use crate::memory::InMemoryStore;
    use crate::query::AttendanceStats;
    use crate::repository::{SeatRepository, SeatWrite, StoreError};
    use crate::seat::{NewSeat, Seat, SeatFilter};
    use crate::user::Role;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use tokio::task::JoinSet;

    struct Harness {
        engine: BookingEngine,
        clock: Arc<FixedClock>,
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, minute, 0).unwrap()
    }

    fn harness(now: DateTime<Utc>) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(FixedClock::new(now));
        let registry = SeatRegistry::new(store.clone(), store.clone(), clock.clone());
        let engine = BookingEngine::new(registry, store, clock.clone(), BookingRules::default());
        Harness { engine, clock }
    }

    /// Yields after every read so that joined futures load the same row
    /// before either of them writes.
    struct Interleaved(Arc<InMemoryStore>);

    #[async_trait]
    impl SeatRepository for Interleaved {
        async fn insert_seat(&self, seat: &Seat) -> Result<bool, StoreError> {
            self.0.insert_seat(seat).await
        }

        async fn get_seat(&self, id: Uuid) -> Result<Option<Seat>, StoreError> {
            let seat = self.0.get_seat(id).await;
            tokio::task::yield_now().await;
            seat
        }

        async fn list_seats(&self, filter: &SeatFilter) -> Result<Vec<Seat>, StoreError> {
            self.0.list_seats(filter).await
        }

        async fn update_seat(&self, seat: &Seat, require_unheld: bool) -> Result<SeatWrite, StoreError> {
            self.0.update_seat(seat, require_unheld).await
        }

        async fn delete_seat(&self, id: Uuid) -> Result<SeatWrite, StoreError> {
            self.0.delete_seat(id).await
        }

        async fn set_occupied(&self, id: Uuid, occupied: bool) -> Result<bool, StoreError> {
            self.0.set_occupied(id, occupied).await
        }
    }

    #[async_trait]
    impl BookingRepository for Interleaved {
        async fn insert_if_available(
            &self,
            booking: &Booking,
            now: DateTime<Utc>,
        ) -> Result<InsertOutcome, StoreError> {
            self.0.insert_if_available(booking, now).await
        }

        async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
            let booking = self.0.get_booking(id).await;
            tokio::task::yield_now().await;
            booking
        }

        async fn save_booking(&self, booking: &Booking, expected: &BookingRevision) -> Result<bool, StoreError> {
            self.0.save_booking(booking, expected).await
        }

        async fn list_bookings(&self, query: &BookingQuery) -> Result<Page<Booking>, StoreError> {
            self.0.list_bookings(query).await
        }

        async fn has_holding_bookings(&self, seat_id: Uuid) -> Result<bool, StoreError> {
            self.0.has_holding_bookings(seat_id).await
        }

        async fn attendance_stats(&self, user_id: Uuid) -> Result<AttendanceStats, StoreError> {
            self.0.attendance_stats(user_id).await
        }
    }

    fn interleaved_harness(now: DateTime<Utc>) -> (Harness, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let repo = Arc::new(Interleaved(store.clone()));
        let clock = Arc::new(FixedClock::new(now));
        let registry = SeatRegistry::new(repo.clone(), repo.clone(), clock.clone());
        let engine = BookingEngine::new(registry, repo, clock.clone(), BookingRules::default());
        (Harness { engine, clock }, store)
    }

    fn student() -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            role: Role::Student,
        }
    }

    fn admin() -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            role: Role::Admin,
        }
    }

    async fn seat(engine: &BookingEngine, number: &str) -> Seat {
        engine
            .registry()
            .create(NewSeat {
                seat_number: number.to_string(),
                seat_type: None,
                floor: 1,
                section: "A".to_string(),
                description: None,
            })
            .await
            .unwrap()
    }

    async fn occupied(engine: &BookingEngine, seat_id: Uuid) -> bool {
        engine.registry().get(seat_id).await.unwrap().is_occupied
    }

    #[tokio::test]
    async fn test_back_to_back_bookings_allowed_overlap_rejected() {
        let h = harness(at(8, 0));
        let s1 = seat(&h.engine, "S1").await;

        h.engine
            .create_booking(&student(), s1.id, at(10, 0), at(11, 0), None)
            .await
            .unwrap();
        assert!(occupied(&h.engine, s1.id).await);

        let err = h
            .engine
            .create_booking(&student(), s1.id, at(10, 30), at(11, 30), None)
            .await
            .unwrap_err();
        match err {
            CoreError::SeatConflict { conflicting, .. } => {
                assert_eq!(conflicting.start, at(10, 0));
                assert_eq!(conflicting.end, at(11, 0));
            }
            other => panic!("expected seat conflict, got {:?}", other),
        }

        h.engine
            .create_booking(&student(), s1.id, at(11, 0), at(12, 0), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_user_with_outstanding_booking_cannot_book_again() {
        let h = harness(at(8, 0));
        let s1 = seat(&h.engine, "S1").await;
        let s2 = seat(&h.engine, "S2").await;
        let user = student();

        let first = h
            .engine
            .create_booking(&user, s1.id, at(12, 0), at(14, 0), None)
            .await
            .unwrap();

        let err = h
            .engine
            .create_booking(&user, s2.id, at(15, 0), at(16, 0), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::UserAlreadyBooked { booking_id, .. } if booking_id == first.id));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(!occupied(&h.engine, s2.id).await);
    }

    #[tokio::test]
    async fn test_check_in_opens_thirty_minutes_early() {
        let h = harness(at(7, 0));
        let s1 = seat(&h.engine, "S1").await;
        let user = student();
        let booking = h
            .engine
            .create_booking(&user, s1.id, at(9, 0), at(11, 0), None)
            .await
            .unwrap();

        h.clock.set(at(8, 25));
        let err = h.engine.check_in(booking.id, &user).await.unwrap_err();
        assert!(matches!(err, CoreError::CheckInNotAllowed(_)));

        h.clock.set(at(8, 35));
        let checked_in = h.engine.check_in(booking.id, &user).await.unwrap();
        assert_eq!(checked_in.status, BookingStatus::CheckedIn);
        assert_eq!(checked_in.check_in_time, Some(at(8, 35)));
    }

    #[tokio::test]
    async fn test_check_out_records_duration_and_frees_seat() {
        let h = harness(at(7, 0));
        let s1 = seat(&h.engine, "S1").await;
        let user = student();
        let booking = h
            .engine
            .create_booking(&user, s1.id, at(9, 0), at(11, 0), None)
            .await
            .unwrap();

        h.clock.set(at(8, 35));
        h.engine.check_in(booking.id, &user).await.unwrap();
        assert!(occupied(&h.engine, s1.id).await);

        h.clock.set(at(10, 5));
        let done = h
            .engine
            .check_out(booking.id, &user, Some("finished chapter 3".to_string()))
            .await
            .unwrap();
        assert_eq!(done.actual_duration, 90);
        assert_eq!(done.status, BookingStatus::Completed);
        assert!(!occupied(&h.engine, s1.id).await);

        h.clock.advance(Duration::minutes(5));
        let err = h.engine.check_out(booking.id, &user, None).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::CheckOutNotAllowed(CheckOutRejection { already_checked_out: true, .. })
        ));
        let stored = h.engine.get_booking(booking.id, &user).await.unwrap();
        assert_eq!(stored, done);
    }

    #[tokio::test]
    async fn test_cannot_cancel_started_booking() {
        let h = harness(at(8, 0));
        let s1 = seat(&h.engine, "S1").await;
        let user = student();
        let booking = h
            .engine
            .create_booking(&user, s1.id, at(9, 0), at(10, 0), None)
            .await
            .unwrap();

        h.clock.set(at(9, 1));
        let err = h.engine.cancel_booking(booking.id, &user).await.unwrap_err();
        assert!(matches!(err, CoreError::CannotCancel { already_started: true, .. }));
        assert!(occupied(&h.engine, s1.id).await);
    }

    #[tokio::test]
    async fn test_cancel_keeps_seat_held_by_other_booking() {
        let h = harness(at(8, 0));
        let s1 = seat(&h.engine, "S1").await;
        let early = student();
        let late = student();

        let first = h
            .engine
            .create_booking(&early, s1.id, at(10, 0), at(11, 0), None)
            .await
            .unwrap();
        h.engine
            .create_booking(&late, s1.id, at(11, 0), at(12, 0), None)
            .await
            .unwrap();

        let cancelled = h.engine.cancel_booking(first.id, &early).await.unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert!(occupied(&h.engine, s1.id).await);
    }

    #[tokio::test]
    async fn test_admin_may_cancel_but_not_check_in_for_others() {
        let h = harness(at(8, 0));
        let s1 = seat(&h.engine, "S1").await;
        let owner = student();
        let booking = h
            .engine
            .create_booking(&owner, s1.id, at(9, 0), at(10, 0), None)
            .await
            .unwrap();

        let stranger = student();
        assert!(matches!(
            h.engine.get_booking(booking.id, &stranger).await,
            Err(CoreError::Forbidden(_))
        ));
        assert!(matches!(
            h.engine.check_in(booking.id, &admin()).await,
            Err(CoreError::Forbidden(_))
        ));

        h.engine.cancel_booking(booking.id, &admin()).await.unwrap();
        assert!(!occupied(&h.engine, s1.id).await);
    }

    #[tokio::test]
    async fn test_token_round_trip_and_terminal_refusal() {
        let h = harness(at(8, 0));
        let s1 = seat(&h.engine, "S1").await;
        let user = student();
        let booking = h
            .engine
            .create_booking(&user, s1.id, at(9, 0), at(10, 0), None)
            .await
            .unwrap();

        let issued = h.engine.issue_token(booking.id, &user).await.unwrap();
        assert_eq!(h.engine.resolve_token(&issued.qr_code).unwrap(), booking.id);
        let stored = h.engine.get_booking(booking.id, &user).await.unwrap();
        assert_eq!(stored.qr_code.as_deref(), Some(issued.qr_code.as_str()));
        assert_eq!(stored.status, BookingStatus::Active);

        h.clock.set(at(8, 45));
        let checked_in = h.engine.check_in_with_token(&issued.qr_data, &user).await.unwrap();
        assert_eq!(checked_in.status, BookingStatus::CheckedIn);

        h.clock.set(at(9, 30));
        h.engine
            .check_out_with_token(&issued.qr_code, &user, None)
            .await
            .unwrap();
        assert!(matches!(
            h.engine.issue_token(booking.id, &user).await,
            Err(CoreError::InvalidBookingState(BookingStatus::Completed))
        ));
    }

    #[tokio::test]
    async fn test_inactive_seat_and_bad_window_rejected() {
        let h = harness(at(8, 0));
        let s1 = seat(&h.engine, "S1").await;
        h.engine.registry().deactivate(s1.id).await.unwrap();

        let err = h
            .engine
            .create_booking(&student(), s1.id, at(9, 0), at(10, 0), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::SeatInactive(_)));

        let s2 = seat(&h.engine, "S2").await;
        let err = h
            .engine
            .create_booking(&student(), s2.id, at(7, 0), at(8, 30), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidWindow(_)));

        let err = h
            .engine
            .create_booking(&student(), Uuid::new_v4(), at(9, 0), at(10, 0), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::SeatNotFound(_)));
    }

    #[tokio::test]
    async fn test_attendance_history_lists_checked_in_sessions() {
        let h = harness(at(7, 0));
        let s1 = seat(&h.engine, "S1").await;
        let user = student();

        let booking = h
            .engine
            .create_booking(&user, s1.id, at(9, 0), at(11, 0), None)
            .await
            .unwrap();
        h.clock.set(at(9, 0));
        h.engine.check_in(booking.id, &user).await.unwrap();
        h.clock.set(at(10, 0));
        h.engine.check_out(booking.id, &user, None).await.unwrap();

        let (page, stats) = h.engine.attendance_history(&user, None, None, None).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(stats.total_sessions, 1);
        assert_eq!(stats.total_duration, 60);
        assert_eq!(stats.completed_sessions, 1);

        let mine = h.engine.list_user_bookings(&user, Some(BookingStatus::Active), None, None).await.unwrap();
        assert!(mine.items.is_empty());

        assert!(matches!(
            h.engine.list_all_bookings(&user, BookingQuery::default()).await,
            Err(CoreError::Forbidden(_))
        ));
        let all = h.engine.list_all_bookings(&admin(), BookingQuery::default()).await.unwrap();
        assert_eq!(all.total, 1);
    }

    #[tokio::test]
    async fn test_racing_check_outs_complete_once() {
        let (h, store) = interleaved_harness(at(7, 0));
        let s1 = seat(&h.engine, "S1").await;
        let user = student();
        let booking = h
            .engine
            .create_booking(&user, s1.id, at(9, 0), at(11, 0), None)
            .await
            .unwrap();
        h.clock.set(at(9, 0));
        h.engine.check_in(booking.id, &user).await.unwrap();
        h.clock.set(at(10, 0));

        let (first, second) = tokio::join!(
            h.engine.check_out(booking.id, &user, Some("first".to_string())),
            h.engine.check_out(booking.id, &user, Some("second".to_string())),
        );

        let (winner, loser) = match (first, second) {
            (Ok(done), Err(e)) | (Err(e), Ok(done)) => (done, e),
            other => panic!("expected exactly one check-out to succeed, got {:?}", other),
        };
        assert!(matches!(
            loser,
            CoreError::CheckOutNotAllowed(CheckOutRejection { already_checked_out: true, .. })
        ));
        let stored = store.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored, winner);
        assert_eq!(stored.status, BookingStatus::Completed);
        assert!(!occupied(&h.engine, s1.id).await);
    }

    #[tokio::test]
    async fn test_cancel_racing_check_in_leaves_one_outcome() {
        let (h, store) = interleaved_harness(at(7, 0));
        let s1 = seat(&h.engine, "S1").await;
        let user = student();
        let booking = h
            .engine
            .create_booking(&user, s1.id, at(9, 0), at(10, 0), None)
            .await
            .unwrap();
        h.clock.set(at(8, 45));

        let (cancelled, checked_in) = tokio::join!(
            h.engine.cancel_booking(booking.id, &user),
            h.engine.check_in(booking.id, &user),
        );

        let stored = store.get_booking(booking.id).await.unwrap().unwrap();
        match (cancelled, checked_in) {
            (Ok(c), Err(e)) => {
                assert_eq!(stored, c);
                assert_eq!(stored.status, BookingStatus::Cancelled);
                assert!(stored.check_in_time.is_none());
                assert!(matches!(e, CoreError::CheckInNotAllowed(_) | CoreError::InvalidBookingState(_)));
                assert!(!occupied(&h.engine, s1.id).await);
            }
            (Err(e), Ok(c)) => {
                assert_eq!(stored, c);
                assert_eq!(stored.status, BookingStatus::CheckedIn);
                assert!(matches!(e, CoreError::CannotCancel { .. }));
                assert!(occupied(&h.engine, s1.id).await);
            }
            other => panic!("expected exactly one transition to succeed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_seat_deactivation_racing_booking_never_strands_it() {
        let (h, store) = interleaved_harness(at(7, 0));
        let s1 = seat(&h.engine, "S1").await;
        let user = student();

        let (created, deactivated) = tokio::join!(
            h.engine.create_booking(&user, s1.id, at(9, 0), at(10, 0), None),
            h.engine.registry().deactivate(s1.id),
        );

        let seat = store.get_seat(s1.id).await.unwrap().unwrap();
        let held = store.has_holding_bookings(s1.id).await.unwrap();
        match (created, deactivated) {
            (Ok(_), Err(e)) => {
                assert!(matches!(e, CoreError::HasActiveBookings(_)));
                assert!(seat.is_active);
                assert!(held);
            }
            (Err(e), Ok(_)) => {
                assert!(matches!(e, CoreError::SeatInactive(_)));
                assert!(!seat.is_active);
                assert!(!held);
            }
            other => panic!("expected exactly one of booking or deactivation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_seat_delete_racing_booking_never_orphans_it() {
        let (h, store) = interleaved_harness(at(7, 0));
        let s1 = seat(&h.engine, "S1").await;
        let user = student();

        let (created, deleted) = tokio::join!(
            h.engine.create_booking(&user, s1.id, at(9, 0), at(10, 0), None),
            h.engine.registry().delete(s1.id),
        );

        let remaining = store.list_bookings(&BookingQuery::default()).await.unwrap();
        match (created, deleted) {
            (Ok(booking), Err(e)) => {
                assert!(matches!(e, CoreError::HasActiveBookings(_)));
                assert!(store.get_seat(s1.id).await.unwrap().is_some());
                assert_eq!(remaining.items, vec![booking]);
            }
            (Err(e), Ok(())) => {
                assert!(matches!(e, CoreError::SeatInactive(_) | CoreError::SeatNotFound(_)));
                assert!(store.get_seat(s1.id).await.unwrap().is_none());
                assert_eq!(remaining.total, 0);
            }
            other => panic!("expected exactly one of booking or delete, got {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_bookings_on_one_seat_admit_one() {
        let h = harness(at(7, 0));
        let s1 = seat(&h.engine, "S1").await;

        let mut tasks = JoinSet::new();
        for offset in 0..8 {
            let engine = h.engine.clone();
            let start = at(9, 0) + Duration::minutes(offset * 5);
            tasks.spawn(async move {
                engine
                    .create_booking(&student(), s1.id, start, start + Duration::hours(1), None)
                    .await
            });
        }

        let mut admitted = 0;
        let mut conflicts = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined.unwrap() {
                Ok(_) => admitted += 1,
                Err(CoreError::SeatConflict { seat_id, .. }) if seat_id == s1.id => conflicts += 1,
                Err(other) => panic!("unexpected error {:?}", other),
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(conflicts, 7);

        let all = h.engine.list_all_bookings(&admin(), BookingQuery::default()).await.unwrap();
        assert_eq!(all.total, 1);
        assert!(occupied(&h.engine, s1.id).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_bookings_by_one_user_admit_one() {
        let h = harness(at(7, 0));
        let user = student();
        let mut seats = Vec::new();
        for n in 0..8 {
            seats.push(seat(&h.engine, &format!("S{}", n)).await);
        }

        let mut tasks = JoinSet::new();
        for s in &seats {
            let engine = h.engine.clone();
            let seat_id = s.id;
            tasks.spawn(async move {
                engine
                    .create_booking(&user, seat_id, at(9, 0), at(10, 0), None)
                    .await
            });
        }

        let mut admitted = Vec::new();
        let mut refused = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined.unwrap() {
                Ok(booking) => admitted.push(booking),
                Err(CoreError::UserAlreadyBooked { .. }) => refused += 1,
                Err(other) => panic!("unexpected error {:?}", other),
            }
        }
        assert_eq!(admitted.len(), 1);
        assert_eq!(refused, 7);

        let mine = h.engine.list_user_bookings(&user, None, None, None).await.unwrap();
        assert_eq!(mine.items, admitted);
        for s in &seats {
            assert_eq!(occupied(&h.engine, s.id).await, s.id == admitted[0].seat_id);
        }
    }

    #[tokio::test]
    async fn test_withdraw_user_bookings_ignores_start_time() {
        let h = harness(at(8, 0));
        let s1 = seat(&h.engine, "S1").await;
        let s2 = seat(&h.engine, "S2").await;
        let user = student();
        let other = student();

        let mine = h
            .engine
            .create_booking(&user, s1.id, at(9, 0), at(10, 0), None)
            .await
            .unwrap();
        let theirs = h
            .engine
            .create_booking(&other, s2.id, at(9, 0), at(10, 0), None)
            .await
            .unwrap();

        assert!(matches!(
            h.engine.withdraw_user_bookings(&other, user.user_id).await,
            Err(CoreError::Forbidden(_))
        ));

        h.clock.set(at(9, 15));
        let withdrawn = h.engine.withdraw_user_bookings(&admin(), user.user_id).await.unwrap();
        assert_eq!(withdrawn.len(), 1);
        assert_eq!(withdrawn[0].id, mine.id);
        assert_eq!(withdrawn[0].status, BookingStatus::Cancelled);
        assert!(!occupied(&h.engine, s1.id).await);

        let untouched = h.engine.get_booking(theirs.id, &other).await.unwrap();
        assert_eq!(untouched.status, BookingStatus::Active);
        assert!(occupied(&h.engine, s2.id).await);
    }
}
