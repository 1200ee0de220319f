use std::fmt;
use std::str::FromStr;

use carrel_shared::Masked;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

const NAME_MAX_LENGTH: usize = 50;
const PASSWORD_MIN_LENGTH: usize = 6;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Student,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Role::Student),
            "admin" => Ok(Role::Admin),
            other => Err(CoreError::Validation(format!("Invalid role: {}", other))),
        }
    }
}

/// Registered account. Contact details and the hash are masked in logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: Masked<String>,
    pub phone: Masked<String>,
    #[serde(skip_serializing)]
    pub password_hash: Masked<String>,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn principal(&self) -> Principal {
        Principal {
            user_id: self.id,
            role: self.role,
        }
    }
}

/// Registration input after password hashing.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: Masked<String>,
    pub phone: Masked<String>,
    pub password_hash: Masked<String>,
    pub role: Role,
}

impl NewUser {
    pub fn into_user(self, now: DateTime<Utc>) -> CoreResult<User> {
        let name = validate_name(&self.name)?;
        let email = normalize_email(self.email.expose())?;
        let phone = validate_phone(self.phone.expose())?;

        Ok(User {
            id: Uuid::new_v4(),
            name,
            email: Masked::new(email),
            phone: Masked::new(phone),
            password_hash: self.password_hash,
            role: self.role,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Trimmed display name, non-empty and within the length limit.
pub fn validate_name(raw: &str) -> CoreResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(CoreError::Validation("Name is required".to_string()));
    }
    if name.chars().count() > NAME_MAX_LENGTH {
        return Err(CoreError::Validation(format!(
            "Name cannot exceed {} characters",
            NAME_MAX_LENGTH
        )));
    }
    Ok(name.to_string())
}

pub fn validate_phone(raw: &str) -> CoreResult<String> {
    let phone = raw.trim();
    if phone.len() != 10 || !phone.chars().all(|c| c.is_ascii_digit()) {
        return Err(CoreError::Validation(
            "Phone number must be 10 digits".to_string(),
        ));
    }
    Ok(phone.to_string())
}

/// Lowercases and sanity-checks an email address.
pub fn normalize_email(raw: &str) -> CoreResult<String> {
    let email = raw.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    };
    if !valid {
        return Err(CoreError::Validation("Please enter a valid email".to_string()));
    }
    Ok(email)
}

pub fn validate_password(password: &str) -> CoreResult<()> {
    if password.chars().count() < PASSWORD_MIN_LENGTH {
        return Err(CoreError::Validation(format!(
            "Password must be at least {} characters",
            PASSWORD_MIN_LENGTH
        )));
    }
    Ok(())
}

/// Authenticated caller passed into every engine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: Role,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
