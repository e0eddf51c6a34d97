//! Single-use password reset tokens.
//!
//! A reset token is tied to one user email, valid for 24 hours from
//! creation, and permanently invalid once consumed. Expiry is evaluated at
//! read time; rows are never deleted here.

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use thiserror::Error;
use tracing::Instrument;

use super::{storage, token, User};

/// How long a reset token stays consumable.
pub const TOKEN_TTL_HOURS: i64 = 24;

/// Stored reset token row. The token string itself is the unique key.
#[derive(Clone, Debug, PartialEq, Eq, sqlx::FromRow)]
pub struct ResetToken {
    pub token: String,
    pub user_email: String,
    pub creation: DateTime<Utc>,
    pub used: bool,
}

impl ResetToken {
    /// A token is consumable until it is used or 24 hours old.
    #[must_use]
    pub fn consumable(&self, now: DateTime<Utc>) -> bool {
        !self.used && now - self.creation < Duration::hours(TOKEN_TTL_HOURS)
    }
}

#[derive(Debug, Error)]
pub enum ResetError {
    #[error("User is nil")]
    NilUser,
    #[error("User email is empty")]
    EmptyEmail,
    /// Unknown, expired, and already-used tokens all report this same error
    /// so callers cannot probe which tokens exist.
    #[error("Invalid token")]
    InvalidToken,
    #[error("User not found")]
    UserNotFound,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Create and persist a reset token for `user`.
///
/// The backing store enforces uniqueness on the token string; the derivation
/// salts every call, so duplicate insertions do not occur in practice.
pub async fn create(pool: &PgPool, user: Option<&User>) -> Result<ResetToken, ResetError> {
    let user = user.ok_or(ResetError::NilUser)?;
    if user.email.is_empty() {
        return Err(ResetError::EmptyEmail);
    }

    let token = token::generate(&user.email).context("failed to derive reset token")?;

    let query = r"
        INSERT INTO password_tokens (token, user_email, creation, used)
        VALUES ($1, $2, NOW(), false)
        RETURNING token, user_email, creation, used
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query_as::<_, ResetToken>(query)
        .bind(&token)
        .bind(&user.email)
        .fetch_one(pool)
        .instrument(span)
        .await
        .map_err(|err| {
            if storage::is_unique_violation(&err) {
                anyhow::anyhow!("password reset token collision")
            } else {
                anyhow::Error::new(err).context("failed to insert password reset token")
            }
        })?;

    Ok(row)
}

/// Fetch a consumable reset token by its token string.
pub async fn get(pool: &PgPool, token: &str) -> Result<ResetToken, ResetError> {
    let query = r"
        SELECT token, user_email, creation, used
        FROM password_tokens
        WHERE token = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query_as::<_, ResetToken>(query)
        .bind(token)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup password reset token")?;

    evaluate(row, Utc::now())
}

/// Read-time verdict for a fetched row. Missing, used, and expired rows all
/// collapse into the same rejection.
fn evaluate(row: Option<ResetToken>, now: DateTime<Utc>) -> Result<ResetToken, ResetError> {
    match row {
        Some(reset) if reset.consumable(now) => Ok(reset),
        _ => Err(ResetError::InvalidToken),
    }
}

/// Mark a reset token consumed. Consumed tokens are never revived.
pub async fn mark_used(pool: &PgPool, token: &str) -> Result<(), ResetError> {
    let query = r"
        UPDATE password_tokens
        SET used = true
        WHERE token = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to mark password reset token used")?;
    Ok(())
}

/// Resolve the user a reset token was issued for.
pub async fn resolve_user(pool: &PgPool, token: &ResetToken) -> Result<User, ResetError> {
    let user = storage::lookup_user(pool, &token.user_email)
        .await
        .context("failed to resolve reset token user")?;
    user.ok_or(ResetError::UserNotFound)
}
