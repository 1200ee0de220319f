use async_trait::async_trait;
use carrel_core::query::{Page, PageBounds, UserQuery};
use carrel_core::repository::{StoreError, UserRepository, UserWrite};
use carrel_core::user::User;
use carrel_shared::Masked;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

pub struct StoreUserRepository {
    pool: PgPool,
}

impl StoreUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    phone: String,
    password_hash: String,
    role: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.id,
            name: row.name,
            email: Masked::new(row.email),
            phone: Masked::new(row.phone),
            password_hash: Masked::new(row.password_hash),
            role: row.role.parse()?,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const USER_COLUMNS: &str = "id, name, email, phone, password_hash, role, is_active, created_at, updated_at";

const USER_FILTER: &str = r#"
    ($1::TEXT IS NULL
        OR LOWER(name) LIKE '%' || $1 || '%'
        OR email LIKE '%' || $1 || '%'
        OR phone LIKE '%' || $1 || '%')
    AND ($2::TEXT IS NULL OR role = $2)
    AND ($3::BOOLEAN IS NULL OR is_active = $3)
"#;

/// Escapes LIKE wildcards so the search term matches literally.
fn like_literal(term: &str) -> String {
    term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[async_trait]
impl UserRepository for StoreUserRepository {
    async fn insert_user(&self, user: &User) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO users
                (id, name, email, phone, password_hash, role, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(user.email.expose())
        .bind(user.phone.expose())
        .bind(user.password_hash.expose())
        .bind(user.role.as_str())
        .bind(user.is_active)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(User::try_from).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        row.map(User::try_from).transpose()
    }

    async fn update_user(&self, user: &User) -> Result<UserWrite, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET name = $2,
                phone = $3,
                is_active = $4,
                updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(user.phone.expose())
        .bind(user.is_active)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 1 => Ok(UserWrite::Written),
            Ok(_) => Ok(UserWrite::NotFound),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Ok(UserWrite::Duplicate),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_users(&self, query: &UserQuery) -> Result<Page<User>, StoreError> {
        let search = query.search_term().map(|term| like_literal(&term));
        let role = query.role.map(|r| r.as_str());
        let limit = i64::from(query.limit());
        let offset = i64::try_from(query.offset())?;

        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE {} ORDER BY created_at DESC LIMIT $4 OFFSET $5",
            USER_COLUMNS, USER_FILTER
        ))
        .bind(&search)
        .bind(role)
        .bind(query.is_active)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let (total,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM users WHERE {}", USER_FILTER))
            .bind(&search)
            .bind(role)
            .bind(query.is_active)
            .fetch_one(&self.pool)
            .await?;

        let items = rows
            .into_iter()
            .map(User::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, u64::try_from(total)?, query))
    }
}
