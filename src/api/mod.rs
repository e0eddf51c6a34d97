use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Method, Request},
    routing::{get, post},
    Extension, Router,
};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::{SetRequestHeaderLayer, SetResponseHeaderLayer},
    trace::TraceLayer,
};
use tracing::{debug_span, info, Span};
use ulid::Ulid;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{
    guard::Guard,
    handlers::{apps, health, reset, users},
};
use crate::auth::storage::{PgTokenVerifier, PgUserDirectory};

pub mod guard;
pub mod handlers;
pub mod response;

// Minimum client versions advertised on every response, success or failure.
const GARDISTO_MIN: &str = "0.9.0";
const KRANO_MIN: &str = "0.5.1";
const GARDISTO_ADMIN_MIN: &str = "0.3.0";

/// Shared per-process state handed to handlers through an extension.
pub struct ApiContext {
    pub pool: PgPool,
    pub guard: Guard,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::index,
        handlers::health::health,
        handlers::users::whoami,
        handlers::users::list,
        handlers::apps::info,
        handlers::reset::start,
        handlers::reset::finish,
    ),
    components(schemas(handlers::reset::ResetStartRequest)),
    tags(
        (name = "gardisto", description = "Management API gate"),
        (name = "users", description = "User management and password reset"),
        (name = "apps", description = "Application-scoped management"),
    )
)]
struct ApiDoc;

/// Build the API router with every layer the responses depend on.
///
/// The three `Supported-*` headers are stamped by a response layer so that
/// even short-circuited 401/403 responses carry them.
#[must_use]
pub fn router(context: Arc<ApiContext>) -> Router {
    let cors = CorsLayer::new()
        // allow `GET` and `POST` when accessing the resource
        .allow_methods([Method::GET, Method::POST])
        // allow requests from any origin
        .allow_origin(Any);

    Router::new()
        .route("/", get(health::index))
        .route("/health", get(health::health))
        .route("/users", get(users::list))
        .route("/users/me", get(users::whoami))
        .route("/users/password/reset", post(reset::start))
        .route("/users/password/reset/:token", post(reset::finish))
        .route("/apps/:app", get(apps::info))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetResponseHeaderLayer::overriding(
                    HeaderName::from_static("supported-gardisto"),
                    HeaderValue::from_static(GARDISTO_MIN),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    HeaderName::from_static("supported-krano"),
                    HeaderValue::from_static(KRANO_MIN),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    HeaderName::from_static("supported-gardisto-admin"),
                    HeaderValue::from_static(GARDISTO_ADMIN_MIN),
                ))
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(context)),
        )
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, dsn: String) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let guard = Guard::new(
        Arc::new(PgTokenVerifier::new(pool.clone())),
        Arc::new(PgUserDirectory::new(pool.clone())),
    );
    let context = Arc::new(ApiContext { pool, guard });

    let app = router(context);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let path = request.uri().path();
    let request_id = headers
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", path, ?headers, request_id)
}
