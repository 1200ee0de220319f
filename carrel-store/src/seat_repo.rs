use async_trait::async_trait;
use carrel_core::repository::{SeatRepository, SeatWrite, StoreError};
use carrel_core::seat::{normalize_code, Seat, SeatFilter};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

pub struct StoreSeatRepository {
    pool: PgPool,
}

impl StoreSeatRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct SeatRow {
    id: Uuid,
    seat_number: String,
    seat_type: String,
    floor: i32,
    section: String,
    description: Option<String>,
    is_active: bool,
    is_occupied: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SeatRow> for Seat {
    type Error = StoreError;

    fn try_from(row: SeatRow) -> Result<Self, Self::Error> {
        Ok(Seat {
            id: row.id,
            seat_number: row.seat_number,
            seat_type: row.seat_type.parse()?,
            floor: row.floor,
            section: row.section,
            description: row.description,
            is_active: row.is_active,
            is_occupied: row.is_occupied,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SEAT_COLUMNS: &str = "id, seat_number, seat_type, floor, section, description, \
                            is_active, is_occupied, created_at, updated_at";

impl StoreSeatRepository {
    /// Takes the same row lock booking inserts take, then checks for holding
    /// bookings. `None` when the seat does not exist.
    async fn lock_seat(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> Result<Option<bool>, StoreError> {
        let locked: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM seats WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        if locked.is_none() {
            return Ok(None);
        }

        let (held,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM bookings WHERE seat_id = $1 AND status IN ('active', 'checked-in'))",
        )
        .bind(id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(Some(held))
    }
}

#[async_trait]
impl SeatRepository for StoreSeatRepository {
    async fn insert_seat(&self, seat: &Seat) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO seats
                (id, seat_number, seat_type, floor, section, description,
                 is_active, is_occupied, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (seat_number) DO NOTHING
            "#,
        )
        .bind(seat.id)
        .bind(&seat.seat_number)
        .bind(seat.seat_type.as_str())
        .bind(seat.floor)
        .bind(&seat.section)
        .bind(&seat.description)
        .bind(seat.is_active)
        .bind(seat.is_occupied)
        .bind(seat.created_at)
        .bind(seat.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_seat(&self, id: Uuid) -> Result<Option<Seat>, StoreError> {
        let row = sqlx::query_as::<_, SeatRow>(&format!("SELECT {} FROM seats WHERE id = $1", SEAT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Seat::try_from).transpose()
    }

    async fn list_seats(&self, filter: &SeatFilter) -> Result<Vec<Seat>, StoreError> {
        let available = filter.available;
        let rows = sqlx::query_as::<_, SeatRow>(&format!(
            r#"
            SELECT {}
            FROM seats
            WHERE ($1 OR is_active)
              AND ($2::INTEGER IS NULL OR floor = $2)
              AND ($3::TEXT IS NULL OR section = $3)
              AND ($4::BOOLEAN IS NULL OR (is_active AND NOT is_occupied) = $4)
            ORDER BY floor ASC, seat_number ASC
            "#,
            SEAT_COLUMNS
        ))
        .bind(filter.include_inactive)
        .bind(filter.floor)
        .bind(filter.section.as_deref().map(normalize_code))
        .bind(available)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Seat::try_from).collect()
    }

    async fn update_seat(&self, seat: &Seat, require_unheld: bool) -> Result<SeatWrite, StoreError> {
        let mut tx = self.pool.begin().await?;
        match self.lock_seat(&mut tx, seat.id).await? {
            None => {
                tx.rollback().await?;
                return Ok(SeatWrite::NotFound);
            }
            Some(true) if require_unheld => {
                tx.rollback().await?;
                return Ok(SeatWrite::Held);
            }
            Some(_) => {}
        }

        sqlx::query(
            r#"
            UPDATE seats
            SET seat_type = $2,
                floor = $3,
                section = $4,
                description = $5,
                is_active = $6,
                updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(seat.id)
        .bind(seat.seat_type.as_str())
        .bind(seat.floor)
        .bind(&seat.section)
        .bind(&seat.description)
        .bind(seat.is_active)
        .bind(seat.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(SeatWrite::Written)
    }

    async fn delete_seat(&self, id: Uuid) -> Result<SeatWrite, StoreError> {
        let mut tx = self.pool.begin().await?;
        let outcome = match self.lock_seat(&mut tx, id).await? {
            None => SeatWrite::NotFound,
            Some(true) => SeatWrite::Held,
            Some(false) => {
                sqlx::query("DELETE FROM seats WHERE id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                SeatWrite::Written
            }
        };

        if outcome == SeatWrite::Written {
            tx.commit().await?;
        } else {
            tx.rollback().await?;
        }
        Ok(outcome)
    }

    async fn set_occupied(&self, id: Uuid, occupied: bool) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE seats SET is_occupied = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(occupied)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}
