//! Application-scoped endpoints.
//!
//! Routes here carry an application path parameter, so the app-scope check
//! is always active: an app-scoped credential for any other application is
//! rejected as an invalid token.

use axum::{
    extract::{Extension, Path},
    http::HeaderMap,
    response::Response,
};
use serde_json::json;
use std::sync::Arc;

use crate::api::ApiContext;

#[utoipa::path(
    get,
    path = "/apps/{app}",
    params(
        ("app" = String, Path, description = "Application name")
    ),
    responses(
        (status = 200, description = "Application summary"),
        (status = 401, description = "Missing or invalid credential, or credential scoped to another application", body = String),
    ),
    tag = "apps",
)]
pub async fn info(
    headers: HeaderMap,
    Path(app): Path<String>,
    Extension(context): Extension<Arc<ApiContext>>,
) -> Response {
    let app_name = app.clone();
    context
        .guard
        .app_scoped(&headers, &app, |mut tracker, principal| async move {
            let body = json!({
                "app": app_name,
                "authorized": principal.to_string(),
            });
            tracker.write_line(&body.to_string());
            (tracker, Ok(()))
        })
        .await
}
