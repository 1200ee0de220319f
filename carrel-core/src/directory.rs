use std::sync::Arc;

use carrel_shared::Masked;
use serde::Serialize;
use uuid::Uuid;

use crate::clock::Clock;
use crate::engine::BookingEngine;
use crate::error::{CoreError, CoreResult};
use crate::query::{Page, UserQuery, MAX_PAGE_LIMIT};
use crate::repository::{UserRepository, UserWrite};
use crate::user::{validate_name, validate_phone, NewUser, Principal, User};

/// Self-service profile edit. Absent fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub phone: Option<Masked<String>>,
}

/// Result of an activation toggle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub user: User,
    /// Bookings cancelled because the account was deactivated.
    pub cancelled_bookings: Vec<Uuid>,
}

/// Account lookup and administration.
#[derive(Clone)]
pub struct UserDirectory {
    users: Arc<dyn UserRepository>,
    engine: BookingEngine,
    clock: Arc<dyn Clock>,
}

impl UserDirectory {
    pub fn new(users: Arc<dyn UserRepository>, engine: BookingEngine, clock: Arc<dyn Clock>) -> Self {
        Self { users, engine, clock }
    }

    pub async fn register(&self, input: NewUser) -> CoreResult<User> {
        let user = input.into_user(self.clock.now())?;
        if !self.users.insert_user(&user).await? {
            return Err(CoreError::DuplicateUser);
        }
        tracing::info!(user_id = %user.id, role = %user.role, "user registered");
        Ok(user)
    }

    pub async fn find(&self, user_id: Uuid) -> CoreResult<Option<User>> {
        Ok(self.users.get_user(user_id).await?)
    }

    pub async fn get(&self, user_id: Uuid) -> CoreResult<User> {
        self.find(user_id).await?.ok_or(CoreError::UserNotFound(user_id))
    }

    /// `email` must already be normalized.
    pub async fn find_by_email(&self, email: &str) -> CoreResult<Option<User>> {
        Ok(self.users.find_user_by_email(email).await?)
    }

    pub async fn update_profile(&self, principal: &Principal, update: ProfileUpdate) -> CoreResult<User> {
        let mut user = self.get(principal.user_id).await?;
        if let Some(name) = update.name {
            user.name = validate_name(&name)?;
        }
        if let Some(phone) = update.phone {
            user.phone = Masked::new(validate_phone(phone.expose())?);
        }
        user.updated_at = self.clock.now();

        self.write(&user).await?;
        tracing::info!(user_id = %user.id, "profile updated");
        Ok(user)
    }

    pub async fn list(&self, principal: &Principal, query: &UserQuery) -> CoreResult<Page<User>> {
        require_admin(principal)?;
        Ok(self.users.list_users(query).await?)
    }

    /// Every account, newest first.
    pub async fn all(&self, principal: &Principal) -> CoreResult<Vec<User>> {
        require_admin(principal)?;
        let mut query = UserQuery::default().paged(Some(1), Some(MAX_PAGE_LIMIT));
        let mut users = Vec::new();
        loop {
            let page = self.users.list_users(&query).await?;
            let last = !page.pagination().has_next;
            users.extend(page.items);
            if last {
                return Ok(users);
            }
            query.page += 1;
        }
    }

    /// Activates or deactivates an account. Deactivation is written first so
    /// the owner cannot book again, then their `active` bookings are cancelled.
    pub async fn set_active(&self, principal: &Principal, user_id: Uuid, active: bool) -> CoreResult<StatusChange> {
        require_admin(principal)?;
        let mut user = self.get(user_id).await?;
        let changed = user.is_active != active;
        if changed {
            user.is_active = active;
            user.updated_at = self.clock.now();
            self.write(&user).await?;
        }

        let cancelled_bookings = if active {
            Vec::new()
        } else {
            self.engine
                .withdraw_user_bookings(principal, user_id)
                .await?
                .into_iter()
                .map(|b| b.id)
                .collect()
        };

        tracing::info!(
            user_id = %user_id,
            by = %principal.user_id,
            active,
            changed,
            cancelled = cancelled_bookings.len(),
            "user status updated"
        );
        Ok(StatusChange {
            user,
            cancelled_bookings,
        })
    }

    async fn write(&self, user: &User) -> CoreResult<()> {
        match self.users.update_user(user).await? {
            UserWrite::Written => Ok(()),
            UserWrite::NotFound => Err(CoreError::UserNotFound(user.id)),
            UserWrite::Duplicate => Err(CoreError::DuplicateUser),
        }
    }
}

fn require_admin(principal: &Principal) -> CoreResult<()> {
    if !principal.is_admin() {
        return Err(CoreError::Forbidden("admin role required".to_string()));
    }
    Ok(())
}
