//! User-facing management endpoints.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::Response,
};
use serde_json::json;
use std::sync::Arc;

use crate::api::guard::HandlerFailure;
use crate::api::ApiContext;
use crate::auth::{storage, Principal};

/// Identity of the caller. Any authenticated credential may ask.
#[utoipa::path(
    get,
    path = "/users/me",
    responses(
        (status = 200, description = "Caller identity"),
        (status = 401, description = "Missing or invalid credential", body = String),
    ),
    tag = "users",
)]
pub async fn whoami(
    headers: HeaderMap,
    Extension(context): Extension<Arc<ApiContext>>,
) -> Response {
    let pool = context.pool.clone();
    context
        .guard
        .user_required(&headers, |mut tracker, principal| async move {
            let body = match principal {
                Principal::User { email } => {
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
                    json!({ "email": user.email, "admin": user.is_admin })
                }
                Principal::App { app_name } => json!({ "app": app_name }),
            };
            tracker.write_line(&body.to_string());
            (tracker, Ok(()))
        })
        .await
}

/// Full user listing; administrators only.
#[utoipa::path(
    get,
    path = "/users",
    responses(
        (status = 200, description = "All users"),
        (status = 401, description = "Missing or invalid credential", body = String),
        (status = 403, description = "Caller is not an administrator", body = String),
    ),
    tag = "users",
)]
pub async fn list(headers: HeaderMap, Extension(context): Extension<Arc<ApiContext>>) -> Response {
    let pool = context.pool.clone();
    context
        .guard
        .admin_required(&headers, |mut tracker, _principal| async move {
            let users = match storage::list_users(&pool).await {
                Ok(users) => users,
                Err(err) => return (tracker, Err(err.into())),
            };
            let body = match serde_json::to_string(&users) {
                Ok(body) => body,
                Err(err) => return (tracker, Err(anyhow::Error::new(err).into())),
            };
            tracker.write_line(&body);
            (tracker, Ok(()))
        })
        .await
}
