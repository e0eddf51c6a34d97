//! Layered authorization around management handlers.
//!
//! Flow Overview: extract the bearer credential, resolve it to a principal,
//! apply the policy's scope check, then delegate to the wrapped handler with
//! a [`ResponseTracker`]. A handler failure is reported as a fresh error
//! response while nothing has been written, or appended to the body once the
//! status line is already out. Every handler failure is logged exactly once.
//!
//! The compatibility headers every response carries are stamped by a
//! `tower-http` layer in the router, so they are present on auth rejections
//! as well; the request body is owned by axum and dropped on every exit
//! path, so no policy here ever has to release it explicitly.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::auth::{reset::ResetError, AuthError, Principal, TokenVerifier, UserDirectory};

use super::response::ResponseTracker;

/// Failure reported by a delegated handler.
///
/// Carries an optional status code; absence means 500. The status is only
/// honored while no output has been written.
#[derive(Debug)]
pub struct HandlerFailure {
    message: String,
    status: Option<StatusCode>,
}

impl HandlerFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<anyhow::Error> for HandlerFailure {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

impl From<ResetError> for HandlerFailure {
    fn from(err: ResetError) -> Self {
        match err {
            ResetError::NilUser | ResetError::EmptyEmail | ResetError::InvalidToken => {
                Self::with_status(StatusCode::BAD_REQUEST, err.to_string())
            }
            ResetError::UserNotFound => Self::with_status(StatusCode::NOT_FOUND, err.to_string()),
            ResetError::Storage(err) => err.into(),
        }
    }
}

/// What a delegated handler hands back: the tracker it wrote through, plus
/// its verdict.
pub type HandlerOutcome = (ResponseTracker, Result<(), HandlerFailure>);

/// Authorization policies wrapped around management handlers.
///
/// Collaborators are explicit: a verifier resolves credentials and a
/// directory resolves users for the admin check. There is no process-wide
/// authentication scheme.
#[derive(Clone)]
pub struct Guard {
    verifier: Arc<dyn TokenVerifier>,
    users: Arc<dyn UserDirectory>,
}

impl Guard {
    #[must_use]
    pub fn new(verifier: Arc<dyn TokenVerifier>, users: Arc<dyn UserDirectory>) -> Self {
        Self { verifier, users }
    }

    /// Anonymous routes: no credential, but failures still follow the shared
    /// reporting rule.
    pub async fn open<F, Fut>(&self, handler: F) -> Response
    where
        F: FnOnce(ResponseTracker) -> Fut + Send,
        Fut: Future<Output = HandlerOutcome> + Send,
    {
        let (tracker, result) = handler(ResponseTracker::new()).await;
        complete(tracker, result)
    }

    /// Routes that only need an authenticated user. An app-scoped credential
    /// passes here because no target application is named.
    pub async fn user_required<F, Fut>(&self, headers: &HeaderMap, handler: F) -> Response
    where
        F: FnOnce(ResponseTracker, Principal) -> Fut + Send,
        Fut: Future<Output = HandlerOutcome> + Send,
    {
        self.authorized(headers, None, handler).await
    }

    /// Routes addressing one application. App-scoped credentials must match
    /// the application the route names; user credentials always pass.
    pub async fn app_scoped<F, Fut>(
        &self,
        headers: &HeaderMap,
        app_name: &str,
        handler: F,
    ) -> Response
    where
        F: FnOnce(ResponseTracker, Principal) -> Fut + Send,
        Fut: Future<Output = HandlerOutcome> + Send,
    {
        self.authorized(headers, Some(app_name), handler).await
    }

    /// Routes reserved for platform administrators.
    pub async fn admin_required<F, Fut>(&self, headers: &HeaderMap, handler: F) -> Response
    where
        F: FnOnce(ResponseTracker, Principal) -> Fut + Send,
        Fut: Future<Output = HandlerOutcome> + Send,
    {
        let Some(credential) = bearer(headers) else {
            return (
                StatusCode::UNAUTHORIZED,
                AuthError::MissingCredential.to_string(),
            )
                .into_response();
        };
        let Ok(principal) = self.verifier.authenticate(&credential).await else {
            return (
                StatusCode::UNAUTHORIZED,
                AuthError::InvalidCredential.to_string(),
            )
                .into_response();
        };
        if !self.is_admin(&principal).await {
            return (StatusCode::FORBIDDEN, "Forbidden").into_response();
        }

        let (tracker, result) = handler(ResponseTracker::new(), principal).await;
        complete(tracker, result)
    }

    async fn authorized<F, Fut>(
        &self,
        headers: &HeaderMap,
        app_name: Option<&str>,
        handler: F,
    ) -> Response
    where
        F: FnOnce(ResponseTracker, Principal) -> Fut + Send,
        Fut: Future<Output = HandlerOutcome> + Send,
    {
        let principal = match self.validate(bearer(headers).as_deref(), app_name).await {
            Ok(principal) => principal,
            Err(err) => return (StatusCode::UNAUTHORIZED, err.to_string()).into_response(),
        };

        let (tracker, result) = handler(ResponseTracker::new(), principal).await;
        complete(tracker, result)
    }

    /// Resolve a credential into a principal and apply the app-scope check.
    async fn validate(
        &self,
        credential: Option<&str>,
        app_name: Option<&str>,
    ) -> Result<Principal, AuthError> {
        let credential = credential
            .filter(|credential| !credential.is_empty())
            .ok_or(AuthError::MissingCredential)?;
        let principal = self
            .verifier
            .authenticate(credential)
            .await
            .map_err(|_| AuthError::InvalidCredential)?;

        // An app-scoped credential acting on a named application must be
        // scoped to exactly that application. The rejection is
        // indistinguishable from an unknown credential.
        if let (Some(scoped), Some(requested)) = (principal.app_name(), app_name) {
            if scoped != requested {
                return Err(AuthError::InvalidCredential);
            }
        }

        Ok(principal)
    }

    /// App credentials never carry admin rights; a directory failure fails
    /// closed.
    async fn is_admin(&self, principal: &Principal) -> bool {
        let Some(email) = principal.user_email() else {
            return false;
        };
        match self.users.lookup(email).await {
            Ok(Some(user)) => user.is_admin,
            Ok(None) => false,
            Err(err) => {
                error!("Failed to resolve user for admin check: {err}");
                false
            }
        }
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn complete(mut tracker: ResponseTracker, result: Result<(), HandlerFailure>) -> Response {
    match result {
        Ok(()) => tracker.into_response(),
        Err(failure) => {
            error!("{failure}");
            if tracker.wrote() {
                // The status line is already out; the error can only travel
                // as a trailing line of the body.
                tracker.write_line(failure.message());
                tracker.into_response()
            } else {
                (failure.status(), failure.message().to_string()).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{User, UserDirectory};
    use anyhow::Result;
    use async_trait::async_trait;
    use axum::body::to_bytes;
    use axum::http::HeaderValue;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct StaticVerifier {
        tokens: HashMap<String, Principal>,
    }

    impl StaticVerifier {
        fn new(tokens: Vec<(&str, Principal)>) -> Arc<Self> {
            Arc::new(Self {
                tokens: tokens
                    .into_iter()
                    .map(|(token, principal)| (token.to_string(), principal))
                    .collect(),
            })
        }
    }

    #[async_trait]
    impl TokenVerifier for StaticVerifier {
        async fn authenticate(&self, credential: &str) -> Result<Principal, AuthError> {
            self.tokens
                .get(credential)
                .cloned()
                .ok_or(AuthError::InvalidCredential)
        }
    }

    struct StaticDirectory {
        users: HashMap<String, User>,
    }

    impl StaticDirectory {
        fn new(users: Vec<User>) -> Arc<Self> {
            Arc::new(Self {
                users: users
                    .into_iter()
                    .map(|user| (user.email.clone(), user))
                    .collect(),
            })
        }
    }

    #[async_trait]
    impl UserDirectory for StaticDirectory {
        async fn lookup(&self, email: &str) -> Result<Option<User>> {
            Ok(self.users.get(email).cloned())
        }
    }

    fn user(email: &str, is_admin: bool) -> User {
        User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            is_admin,
        }
    }

    fn guard() -> Guard {
        let verifier = StaticVerifier::new(vec![
            (
                "alice-token",
                Principal::User {
                    email: "alice@example.com".to_string(),
                },
            ),
            (
                "root-token",
                Principal::User {
                    email: "root@example.com".to_string(),
                },
            ),
            (
                "billing-token",
                Principal::App {
                    app_name: "billing".to_string(),
                },
            ),
        ]);
        let users = StaticDirectory::new(vec![
            user("alice@example.com", false),
            user("root@example.com", true),
        ]);
        Guard::new(verifier, users)
    }

    fn authorization(token: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static(token));
        headers
    }

    async fn body_text(response: Response) -> Result<String> {
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    #[tokio::test]
    async fn user_required_missing_header_never_invokes_handler() -> Result<()> {
        let guard = guard();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let response = guard
            .user_required(&HeaderMap::new(), |tracker, _principal| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                (tracker, Ok(()))
            })
            .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_text(response).await?,
            "You must provide the Authorization header"
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn user_required_rejects_unknown_token() -> Result<()> {
        let guard = guard();
        let response = guard
            .user_required(&authorization("bogus"), |tracker, _principal| async move {
                (tracker, Ok(()))
            })
            .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_text(response).await?, "Invalid token");
        Ok(())
    }

    #[tokio::test]
    async fn user_required_delegates_with_principal() -> Result<()> {
        let guard = guard();
        let response = guard
            .user_required(
                &authorization("alice-token"),
                |mut tracker, principal| async move {
                    tracker.write_line(&principal.to_string());
                    (tracker, Ok(()))
                },
            )
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await?, "user alice@example.com\n");
        Ok(())
    }

    #[tokio::test]
    async fn app_scope_mismatch_rejected_as_invalid_token() -> Result<()> {
        let guard = guard();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let response = guard
            .app_scoped(
                &authorization("billing-token"),
                "payroll",
                |tracker, _principal| async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (tracker, Ok(()))
                },
            )
            .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_text(response).await?, "Invalid token");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn app_scope_match_delegates() -> Result<()> {
        let guard = guard();
        let response = guard
            .app_scoped(
                &authorization("billing-token"),
                "billing",
                |mut tracker, principal| async move {
                    tracker.write_line(&principal.to_string());
                    (tracker, Ok(()))
                },
            )
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await?, "app billing\n");
        Ok(())
    }

    #[tokio::test]
    async fn user_credential_passes_app_scoped_routes() -> Result<()> {
        let guard = guard();
        let response = guard
            .app_scoped(
                &authorization("alice-token"),
                "billing",
                |tracker, _principal| async move { (tracker, Ok(())) },
            )
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn handler_failure_before_output_uses_carried_status() -> Result<()> {
        let guard = guard();
        let response = guard
            .user_required(
                &authorization("alice-token"),
                |tracker, _principal| async move {
                    (
                        tracker,
                        Err(HandlerFailure::with_status(StatusCode::CONFLICT, "boom")),
                    )
                },
            )
            .await;

        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_text(response).await?, "boom");
        Ok(())
    }

    #[tokio::test]
    async fn handler_failure_without_status_defaults_to_500() -> Result<()> {
        let guard = guard();
        let response = guard
            .user_required(
                &authorization("alice-token"),
                |tracker, _principal| async move { (tracker, Err(HandlerFailure::new("boom"))) },
            )
            .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        Ok(())
    }

    #[tokio::test]
    async fn handler_failure_after_output_keeps_status_and_appends_error() -> Result<()> {
        let guard = guard();
        let response = guard
            .user_required(
                &authorization("alice-token"),
                |mut tracker, _principal| async move {
                    tracker.write_line("partial");
                    (
                        tracker,
                        Err(HandlerFailure::with_status(StatusCode::CONFLICT, "boom")),
                    )
                },
            )
            .await;

        // The status line already went out with the partial body.
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await?, "partial\nboom\n");
        Ok(())
    }

    #[tokio::test]
    async fn admin_required_missing_header_rejected() -> Result<()> {
        let guard = guard();
        let response = guard
            .admin_required(&HeaderMap::new(), |tracker, _principal| async move {
                (tracker, Ok(()))
            })
            .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_text(response).await?,
            "You must provide the Authorization header"
        );
        Ok(())
    }

    #[tokio::test]
    async fn admin_required_rejects_valid_non_admin() -> Result<()> {
        let guard = guard();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let response = guard
            .admin_required(
                &authorization("alice-token"),
                |tracker, _principal| async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (tracker, Ok(()))
                },
            )
            .await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_text(response).await?, "Forbidden");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn admin_required_rejects_app_credentials() -> Result<()> {
        let guard = guard();
        let response = guard
            .admin_required(
                &authorization("billing-token"),
                |tracker, _principal| async move { (tracker, Ok(())) },
            )
            .await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        Ok(())
    }

    #[tokio::test]
    async fn admin_required_invokes_handler_exactly_once_for_admin() -> Result<()> {
        let guard = guard();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let response = guard
            .admin_required(
                &authorization("root-token"),
                |mut tracker, principal| async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tracker.write_line(&principal.to_string());
                    (tracker, Ok(()))
                },
            )
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await?, "user root@example.com\n");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn open_reports_failures_like_the_other_policies() -> Result<()> {
        let guard = guard();
        let response = guard
            .open(|tracker| async move {
                (
                    tracker,
                    Err(HandlerFailure::with_status(
                        StatusCode::BAD_REQUEST,
                        "Missing payload",
                    )),
                )
            })
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await?, "Missing payload");
        Ok(())
    }

    #[test]
    fn handler_failure_default_status_is_500() {
        let failure = HandlerFailure::new("boom");
        assert_eq!(failure.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(failure.message(), "boom");
    }

    #[test]
    fn reset_errors_map_to_http_statuses() {
        let failure = HandlerFailure::from(ResetError::InvalidToken);
        assert_eq!(failure.status(), StatusCode::BAD_REQUEST);
        assert_eq!(failure.message(), "Invalid token");

        let failure = HandlerFailure::from(ResetError::UserNotFound);
        assert_eq!(failure.status(), StatusCode::NOT_FOUND);

        let failure = HandlerFailure::from(ResetError::Storage(anyhow::anyhow!("db down")));
        assert_eq!(failure.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
