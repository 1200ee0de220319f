use async_trait::async_trait;
use carrel_core::booking::{Booking, BookingRevision};
use carrel_core::query::{AttendanceStats, BookingOrder, BookingQuery, Page, PageBounds};
use carrel_core::repository::{BookingRepository, InsertOutcome, StoreError};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

/// SQLSTATE raised by the `bookings_no_seat_overlap` exclusion constraint.
const EXCLUSION_VIOLATION: &str = "23P01";

pub struct StoreBookingRepository {
    pool: PgPool,
}

impl StoreBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    user_id: Uuid,
    seat_id: Uuid,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    status: String,
    check_in_time: Option<DateTime<Utc>>,
    check_out_time: Option<DateTime<Utc>>,
    actual_duration: i64,
    qr_code: Option<String>,
    qr_data: Option<String>,
    notes: Option<String>,
    attendance_notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: row.id,
            user_id: row.user_id,
            seat_id: row.seat_id,
            start_time: row.start_time,
            end_time: row.end_time,
            status: row.status.parse()?,
            check_in_time: row.check_in_time,
            check_out_time: row.check_out_time,
            actual_duration: row.actual_duration,
            qr_code: row.qr_code,
            qr_data: row.qr_data,
            notes: row.notes,
            attendance_notes: row.attendance_notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const BOOKING_COLUMNS: &str = "id, user_id, seat_id, start_time, end_time, status, check_in_time, \
                               check_out_time, actual_duration, qr_code, qr_data, notes, \
                               attendance_notes, created_at, updated_at";

const FILTER_CLAUSE: &str = r#"
    ($1::UUID IS NULL OR user_id = $1)
    AND ($2::UUID IS NULL OR seat_id = $2)
    AND ($3::TEXT IS NULL OR status = $3)
    AND ($4::DATE IS NULL OR (start_time AT TIME ZONE 'UTC')::DATE = $4)
    AND (NOT $5 OR check_in_time IS NOT NULL)
"#;

impl StoreBookingRepository {
    async fn find_seat_conflict(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        booking: &Booking,
    ) -> Result<Option<Booking>, StoreError> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            r#"
            SELECT {}
            FROM bookings
            WHERE seat_id = $1
              AND status IN ('active', 'checked-in')
              AND start_time < $3
              AND end_time > $2
            ORDER BY start_time
            LIMIT 1
            "#,
            BOOKING_COLUMNS
        ))
        .bind(booking.seat_id)
        .bind(booking.start_time)
        .bind(booking.end_time)
        .fetch_optional(&mut **tx)
        .await?;

        row.map(Booking::try_from).transpose()
    }

    async fn find_user_outstanding(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Booking>, StoreError> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            r#"
            SELECT {}
            FROM bookings
            WHERE user_id = $1
              AND status = 'active'
              AND end_time > $2
            ORDER BY start_time
            LIMIT 1
            "#,
            BOOKING_COLUMNS
        ))
        .bind(user_id)
        .bind(now)
        .fetch_optional(&mut **tx)
        .await?;

        row.map(Booking::try_from).transpose()
    }
}

#[async_trait]
impl BookingRepository for StoreBookingRepository {
    async fn insert_if_available(
        &self,
        booking: &Booking,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Serializes concurrent bookings of the same seat.
        let seat: Option<(bool,)> = sqlx::query_as("SELECT is_active FROM seats WHERE id = $1 FOR UPDATE")
            .bind(booking.seat_id)
            .fetch_optional(&mut *tx)
            .await?;
        if !matches!(seat, Some((true,))) {
            tx.rollback().await?;
            return Ok(InsertOutcome::SeatUnavailable);
        }

        // Serializes concurrent bookings by the same user across seats.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::TEXT, 0))")
            .bind(booking.user_id)
            .execute(&mut *tx)
            .await?;

        if let Some(existing) = self.find_seat_conflict(&mut tx, booking).await? {
            tx.rollback().await?;
            return Ok(InsertOutcome::SeatConflict(existing));
        }
        if let Some(existing) = self.find_user_outstanding(&mut tx, booking.user_id, now).await? {
            tx.rollback().await?;
            return Ok(InsertOutcome::UserAlreadyBooked(existing));
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO bookings
                (id, user_id, seat_id, start_time, end_time, status, actual_duration,
                 notes, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(booking.id)
        .bind(booking.user_id)
        .bind(booking.seat_id)
        .bind(booking.start_time)
        .bind(booking.end_time)
        .bind(booking.status.as_str())
        .bind(booking.actual_duration)
        .bind(&booking.notes)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            let excluded = matches!(
                &e,
                sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(EXCLUSION_VIOLATION)
            );
            let _ = tx.rollback().await;
            if excluded {
                tracing::warn!(seat_id = %booking.seat_id, "overlap caught by exclusion constraint");
                let mut tx = self.pool.begin().await?;
                let existing = self.find_seat_conflict(&mut tx, booking).await?;
                tx.rollback().await?;
                if let Some(existing) = existing {
                    return Ok(InsertOutcome::SeatConflict(existing));
                }
            }
            return Err(e.into());
        }

        tx.commit().await?;
        Ok(InsertOutcome::Inserted)
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings WHERE id = $1",
            BOOKING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Booking::try_from).transpose()
    }

    async fn save_booking(&self, booking: &Booking, expected: &BookingRevision) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET status = $2,
                check_in_time = $3,
                check_out_time = $4,
                actual_duration = $5,
                qr_code = $6,
                qr_data = $7,
                notes = $8,
                attendance_notes = $9,
                updated_at = $10
            WHERE id = $1
              AND status = $11
              AND updated_at = $12
            "#,
        )
        .bind(booking.id)
        .bind(booking.status.as_str())
        .bind(booking.check_in_time)
        .bind(booking.check_out_time)
        .bind(booking.actual_duration)
        .bind(&booking.qr_code)
        .bind(&booking.qr_data)
        .bind(&booking.notes)
        .bind(&booking.attendance_notes)
        .bind(booking.updated_at)
        .bind(expected.status.as_str())
        .bind(expected.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_bookings(&self, query: &BookingQuery) -> Result<Page<Booking>, StoreError> {
        let order = match query.order {
            BookingOrder::CreatedDesc => "created_at DESC",
            BookingOrder::CheckInDesc => "check_in_time DESC NULLS LAST",
        };
        let status = query.status.map(|s| s.as_str());
        let limit = i64::from(query.limit);
        let offset = i64::try_from(query.offset())?;

        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings WHERE {} ORDER BY {} LIMIT $6 OFFSET $7",
            BOOKING_COLUMNS, FILTER_CLAUSE, order
        ))
        .bind(query.user_id)
        .bind(query.seat_id)
        .bind(status)
        .bind(query.date)
        .bind(query.checked_in_only)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let (total,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM bookings WHERE {}",
            FILTER_CLAUSE
        ))
        .bind(query.user_id)
        .bind(query.seat_id)
        .bind(status)
        .bind(query.date)
        .bind(query.checked_in_only)
        .fetch_one(&self.pool)
        .await?;

        let items = rows
            .into_iter()
            .map(Booking::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, u64::try_from(total)?, query))
    }

    async fn has_holding_bookings(&self, seat_id: Uuid) -> Result<bool, StoreError> {
        let (held,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM bookings WHERE seat_id = $1 AND status IN ('active', 'checked-in'))",
        )
        .bind(seat_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(held)
    }

    async fn attendance_stats(&self, user_id: Uuid) -> Result<AttendanceStats, StoreError> {
        let (sessions, total, avg, completed): (i64, i64, f64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(actual_duration), 0)::BIGINT,
                   COALESCE(AVG(actual_duration), 0)::FLOAT8,
                   COUNT(*) FILTER (WHERE status = 'completed')
            FROM bookings
            WHERE user_id = $1 AND check_in_time IS NOT NULL
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(AttendanceStats {
            total_sessions: u64::try_from(sessions)?,
            total_duration: total,
            avg_duration: avg,
            completed_sessions: u64::try_from(completed)?,
        })
    }
}
