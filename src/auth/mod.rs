//! Principals, credential verification, and user records.
//!
//! The authorization layer never inspects credentials itself; it talks to
//! two collaborators: a [`TokenVerifier`] that resolves a raw credential
//! into a [`Principal`], and a [`UserDirectory`] that resolves an email
//! into a stored [`User`] record. Both are traits so policies can be
//! exercised without a database.

pub mod reset;
pub mod storage;
pub mod token;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Authenticated identity resolved from a bearer credential.
///
/// A principal is either user-scoped or app-scoped, never both. App-scoped
/// credentials carry the name of the single application they were issued
/// for and cannot act on any other.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Principal {
    User { email: String },
    App { app_name: String },
}

impl Principal {
    #[must_use]
    pub fn is_app_scoped(&self) -> bool {
        matches!(self, Self::App { .. })
    }

    /// The application this credential is scoped to, if any.
    #[must_use]
    pub fn app_name(&self) -> Option<&str> {
        match self {
            Self::App { app_name } => Some(app_name),
            Self::User { .. } => None,
        }
    }

    /// The email of the owning user, absent for app-scoped credentials.
    #[must_use]
    pub fn user_email(&self) -> Option<&str> {
        match self {
            Self::User { email } => Some(email),
            Self::App { .. } => None,
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User { email } => write!(f, "user {email}"),
            Self::App { app_name } => write!(f, "app {app_name}"),
        }
    }
}

/// Why a credential was rejected.
///
/// The two variants map to the two user-facing 401 messages; anything more
/// specific (expired, malformed, unknown, revoked, scope mismatch) collapses
/// into `InvalidCredential` on purpose.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("You must provide the Authorization header")]
    MissingCredential,
    #[error("Invalid token")]
    InvalidCredential,
}

/// Stored user record.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub is_admin: bool,
}

/// Resolves a raw credential string into a principal.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Authenticate `credential`. Callers check for empty credentials before
    /// invoking this, so implementations only report `InvalidCredential`.
    async fn authenticate(&self, credential: &str) -> Result<Principal, AuthError>;
}

/// Resolves an email into a stored user record.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn lookup(&self, email: &str) -> Result<Option<User>>;
}
