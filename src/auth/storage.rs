//! Postgres-backed collaborators for credentials and users.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{error, Instrument};

use super::{token, AuthError, Principal, TokenVerifier, User, UserDirectory};

/// Look up the principal an access-token hash was issued to.
///
/// Rows carry either a user email or an application name; a row with both or
/// neither is malformed and treated as an unknown credential.
pub async fn lookup_principal(pool: &PgPool, token_hash: &[u8]) -> Result<Option<Principal>> {
    let query = r"
        SELECT user_email, app_name
        FROM access_tokens
        WHERE token_hash = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup access token")?;

    Ok(row.and_then(|row| {
        let user_email: Option<String> = row.get("user_email");
        let app_name: Option<String> = row.get("app_name");
        match (user_email, app_name) {
            (Some(email), None) => Some(Principal::User { email }),
            (None, Some(app_name)) => Some(Principal::App { app_name }),
            _ => None,
        }
    }))
}

/// Fetch a user record by email.
pub async fn lookup_user(pool: &PgPool, email: &str) -> Result<Option<User>> {
    let query = r"
        SELECT id, email, is_admin
        FROM users
        WHERE email = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    sqlx::query_as::<_, User>(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user")
}

/// List all user records, newest first.
pub async fn list_users(pool: &PgPool) -> Result<Vec<User>> {
    let query = r"
        SELECT id, email, is_admin
        FROM users
        ORDER BY email
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    sqlx::query_as::<_, User>(query)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list users")
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Verifier backed by the `access_tokens` table.
#[derive(Clone)]
pub struct PgTokenVerifier {
    pool: PgPool,
}

impl PgTokenVerifier {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenVerifier for PgTokenVerifier {
    async fn authenticate(&self, credential: &str) -> Result<Principal, AuthError> {
        // Only the hash is stored; never compare raw credentials against the
        // database.
        let token_hash = token::hash_credential(credential);
        match lookup_principal(&self.pool, &token_hash).await {
            Ok(Some(principal)) => Ok(principal),
            Ok(None) => Err(AuthError::InvalidCredential),
            Err(err) => {
                error!("Failed to lookup access token: {err}");
                Err(AuthError::InvalidCredential)
            }
        }
    }
}

/// Directory backed by the `users` table.
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn lookup(&self, email: &str) -> Result<Option<User>> {
        lookup_user(&self.pool, email).await
    }
}
