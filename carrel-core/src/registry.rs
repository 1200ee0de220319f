use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::repository::{BookingRepository, SeatRepository, SeatWrite};
use crate::seat::{NewSeat, Seat, SeatFilter, SeatUpdate};

/// Outcome of a full occupancy sweep.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub checked: usize,
    pub corrected: Vec<Uuid>,
}

/// Seat administration plus the occupancy cache.
#[derive(Clone)]
pub struct SeatRegistry {
    seats: Arc<dyn SeatRepository>,
    bookings: Arc<dyn BookingRepository>,
    clock: Arc<dyn Clock>,
}

impl SeatRegistry {
    pub fn new(
        seats: Arc<dyn SeatRepository>,
        bookings: Arc<dyn BookingRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { seats, bookings, clock }
    }

    pub async fn create(&self, input: NewSeat) -> CoreResult<Seat> {
        let seat = Seat::new(input, self.clock.now())?;
        if !self.seats.insert_seat(&seat).await? {
            return Err(CoreError::DuplicateSeat(seat.seat_number));
        }
        tracing::info!(seat_id = %seat.id, seat_number = %seat.seat_number, "seat created");
        Ok(seat)
    }

    pub async fn get(&self, seat_id: Uuid) -> CoreResult<Seat> {
        self.seats
            .get_seat(seat_id)
            .await?
            .ok_or(CoreError::SeatNotFound(seat_id))
    }

    pub async fn list(&self, filter: &SeatFilter) -> CoreResult<Vec<Seat>> {
        Ok(self.seats.list_seats(filter).await?)
    }

    /// Partial update. Deactivation is refused while bookings hold the seat.
    pub async fn update(&self, seat_id: Uuid, update: SeatUpdate) -> CoreResult<Seat> {
        let mut seat = self.get(seat_id).await?;
        let deactivating = update.deactivates(&seat);
        update.apply(&mut seat, self.clock.now())?;
        check_write(seat_id, self.seats.update_seat(&seat, deactivating).await?)?;
        tracing::info!(seat_id = %seat_id, active = seat.is_active, "seat updated");
        Ok(seat)
    }

    pub async fn deactivate(&self, seat_id: Uuid) -> CoreResult<Seat> {
        self.update(
            seat_id,
            SeatUpdate {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn delete(&self, seat_id: Uuid) -> CoreResult<()> {
        check_write(seat_id, self.seats.delete_seat(seat_id).await?)?;
        tracing::info!(seat_id = %seat_id, "seat deleted");
        Ok(())
    }

    pub(crate) async fn set_occupied(&self, seat_id: Uuid, occupied: bool) -> CoreResult<()> {
        if !self.seats.set_occupied(seat_id, occupied).await? {
            return Err(CoreError::SeatNotFound(seat_id));
        }
        Ok(())
    }

    /// Re-derives `is_occupied` from live bookings. Idempotent.
    pub async fn reconcile_occupancy(&self, seat_id: Uuid) -> CoreResult<Seat> {
        let mut seat = self.get(seat_id).await?;
        let held = self.bookings.has_holding_bookings(seat_id).await?;
        if seat.is_occupied != held {
            tracing::warn!(
                seat_id = %seat_id,
                cached = seat.is_occupied,
                derived = held,
                "correcting seat occupancy drift"
            );
            self.set_occupied(seat_id, held).await?;
            seat.is_occupied = held;
        }
        Ok(seat)
    }

    pub async fn reconcile_all(&self) -> CoreResult<ReconcileReport> {
        let seats = self
            .seats
            .list_seats(&SeatFilter {
                include_inactive: true,
                ..Default::default()
            })
            .await?;

        let mut report = ReconcileReport {
            checked: seats.len(),
            ..Default::default()
        };
        for seat in seats {
            let reconciled = self.reconcile_occupancy(seat.id).await?;
            if reconciled.is_occupied != seat.is_occupied {
                report.corrected.push(seat.id);
            }
        }
        tracing::info!(checked = report.checked, corrected = report.corrected.len(), "occupancy reconciled");
        Ok(report)
    }
}

fn check_write(seat_id: Uuid, outcome: SeatWrite) -> CoreResult<()> {
    match outcome {
        SeatWrite::Written => Ok(()),
        SeatWrite::NotFound => Err(CoreError::SeatNotFound(seat_id)),
        SeatWrite::Held => Err(CoreError::HasActiveBookings(seat_id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::{Booking, NewBooking};
    use crate::clock::FixedClock;
    use crate::memory::InMemoryStore;
    use crate::window::TimeWindow;
    use chrono::{Duration, TimeZone, Utc};

    fn registry() -> (SeatRegistry, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()));
        (SeatRegistry::new(store.clone(), store.clone(), clock), store)
    }

    fn input(number: &str) -> NewSeat {
        NewSeat {
            seat_number: number.to_string(),
            seat_type: None,
            floor: 1,
            section: "a".to_string(),
            description: None,
        }
    }

    async fn hold(store: &InMemoryStore, seat_id: Uuid) {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let booking = Booking::new(
            NewBooking {
                user_id: Uuid::new_v4(),
                seat_id,
                window: TimeWindow::new(start, start + Duration::hours(1)).unwrap(),
                notes: None,
            },
            start - Duration::hours(1),
        );
        store.insert_if_available(&booking, start - Duration::hours(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_number_is_case_insensitive() {
        let (registry, _) = registry();
        registry.create(input("a1")).await.unwrap();
        let err = registry.create(input(" A1 ")).await.unwrap_err();
        assert!(matches!(err, CoreError::DuplicateSeat(ref n) if n == "A1"));
    }

    #[tokio::test]
    async fn test_delete_and_deactivate_guarded_by_live_bookings() {
        let (registry, store) = registry();
        let seat = registry.create(input("A1")).await.unwrap();
        hold(&store, seat.id).await;

        assert!(matches!(registry.delete(seat.id).await, Err(CoreError::HasActiveBookings(_))));
        assert!(matches!(registry.deactivate(seat.id).await, Err(CoreError::HasActiveBookings(_))));
        assert!(registry.get(seat.id).await.unwrap().is_active);
    }

    #[tokio::test]
    async fn test_reconcile_repairs_drift() {
        let (registry, store) = registry();
        let seat = registry.create(input("A1")).await.unwrap();
        let idle = registry.create(input("A2")).await.unwrap();
        hold(&store, seat.id).await;
        store.set_occupied(idle.id, true).await.unwrap();

        let report = registry.reconcile_all().await.unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.corrected.len(), 2);
        assert!(registry.get(seat.id).await.unwrap().is_occupied);
        assert!(!registry.get(idle.id).await.unwrap().is_occupied);

        let again = registry.reconcile_all().await.unwrap();
        assert!(again.corrected.is_empty());
    }

    #[tokio::test]
    async fn test_missing_seat() {
        let (registry, _) = registry();
        assert!(matches!(registry.get(Uuid::new_v4()).await, Err(CoreError::SeatNotFound(_))));
    }
}
