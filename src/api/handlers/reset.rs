//! Password reset endpoints.
//!
//! Both endpoints are anonymous: the caller has forgotten their credentials.
//! They run under the guard's `open` policy so failures follow the shared
//! reporting rule, and the reset store enforces the 24-hour single-use
//! token lifecycle.

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

use super::{normalize_email, valid_email};
use crate::api::guard::HandlerFailure;
use crate::api::ApiContext;
use crate::auth::{reset, storage};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResetStartRequest {
    pub email: String,
}

/// Issue a reset token for a known user.
#[utoipa::path(
    post,
    path = "/users/password/reset",
    request_body = ResetStartRequest,
    responses(
        (status = 204, description = "Reset token issued"),
        (status = 400, description = "Missing payload or invalid email", body = String),
        (status = 404, description = "Unknown user", body = String),
    ),
    tag = "users",
)]
pub async fn start(
    Extension(context): Extension<Arc<ApiContext>>,
    payload: Option<Json<ResetStartRequest>>,
) -> Response {
    let pool = context.pool.clone();
    context
        .guard
        .open(|mut tracker| async move {
            let Some(Json(request)) = payload else {
                return (
                    tracker,
                    Err(HandlerFailure::with_status(
                        StatusCode::BAD_REQUEST,
                        "Missing payload",
                    )),
                );
            };

            let email = normalize_email(&request.email);
            if !valid_email(&email) {
                return (
                    tracker,
                    Err(HandlerFailure::with_status(
                        StatusCode::BAD_REQUEST,
                        "Invalid email",
                    )),
                );
            }

            let user = match storage::lookup_user(&pool, &email).await {
                Ok(Some(user)) => user,
                Ok(None) => {
                    return (
                        tracker,
                        Err(HandlerFailure::with_status(
                            StatusCode::NOT_FOUND,
                            "User not found",
                        )),
                    )
                }
                Err(err) => return (tracker, Err(err.into())),
            };

            if let Err(err) = reset::create(&pool, Some(&user)).await {
                return (tracker, Err(err.into()));
            }

            // Stands in for the outbound mailer; link delivery is not this
            // service's concern.
            info!("password reset token issued for {}", user.email);

            tracker.set_status(StatusCode::NO_CONTENT);
            (tracker, Ok(()))
        })
        .await
}

/// Consume a reset token. Unknown, expired, and used tokens are rejected
/// with the same message.
#[utoipa::path(
    post,
    path = "/users/password/reset/{token}",
    params(
        ("token" = String, Path, description = "Reset token")
    ),
    responses(
        (status = 204, description = "Token consumed"),
        (status = 400, description = "Invalid token", body = String),
        (status = 404, description = "Unknown user", body = String),
    ),
    tag = "users",
)]
pub async fn finish(
    Path(token): Path<String>,
    Extension(context): Extension<Arc<ApiContext>>,
) -> Response {
    let pool = context.pool.clone();
    context
        .guard
        .open(|mut tracker| async move {
            let reset_token = match reset::get(&pool, &token).await {
                Ok(reset_token) => reset_token,
                Err(err) => return (tracker, Err(err.into())),
            };
            let user = match reset::resolve_user(&pool, &reset_token).await {
                Ok(user) => user,
                Err(err) => return (tracker, Err(err.into())),
            };
            if let Err(err) = reset::mark_used(&pool, &reset_token.token).await {
                return (tracker, Err(err.into()));
            }

            info!("password reset completed for {}", user.email);

            tracker.set_status(StatusCode::NO_CONTENT);
            (tracker, Ok(()))
        })
        .await
}
