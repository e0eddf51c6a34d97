//! Response assembly with write tracking.
//!
//! [`ResponseTracker`] stands between a guarded handler and the HTTP
//! response. It forwards everything the handler writes and remembers that
//! output has started; once that happens the status code is frozen, which is
//! what the error-reporting branch in the guard keys off.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

pub struct ResponseTracker {
    status: StatusCode,
    body: Vec<u8>,
    wrote: bool,
}

impl ResponseTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            body: Vec::new(),
            wrote: false,
        }
    }

    /// Set the response status. Ignored once output has started, the same
    /// way headers cannot be re-sent after the first body byte on a real
    /// connection.
    pub fn set_status(&mut self, status: StatusCode) {
        if !self.wrote {
            self.status = status;
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Append bytes to the response body. Any write, even an empty one,
    /// flushes the status line.
    pub fn write(&mut self, bytes: &[u8]) {
        self.wrote = true;
        self.body.extend_from_slice(bytes);
    }

    /// Append a line followed by a newline.
    pub fn write_line(&mut self, line: &str) {
        self.write(line.as_bytes());
        self.write(b"\n");
    }

    /// Whether any output has been produced. Never resets.
    #[must_use]
    pub fn wrote(&self) -> bool {
        self.wrote
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

impl Default for ResponseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl IntoResponse for ResponseTracker {
    fn into_response(self) -> Response {
        (self.status, self.body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use axum::body::to_bytes;

    #[test]
    fn starts_clean() {
        let tracker = ResponseTracker::new();
        assert!(!tracker.wrote());
        assert_eq!(tracker.status(), StatusCode::OK);
        assert!(tracker.body().is_empty());
    }

    #[test]
    fn write_marks_output_started() {
        let mut tracker = ResponseTracker::new();
        tracker.write(b"partial");
        assert!(tracker.wrote());
    }

    #[test]
    fn empty_write_still_flushes() {
        let mut tracker = ResponseTracker::new();
        tracker.write(b"");
        assert!(tracker.wrote());
        assert!(tracker.body().is_empty());
    }

    #[test]
    fn status_frozen_after_first_write() {
        let mut tracker = ResponseTracker::new();
        tracker.set_status(StatusCode::NO_CONTENT);
        assert_eq!(tracker.status(), StatusCode::NO_CONTENT);

        tracker.write(b"body");
        tracker.set_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(tracker.status(), StatusCode::NO_CONTENT);
    }

    #[test]
    fn write_line_appends_newline() {
        let mut tracker = ResponseTracker::new();
        tracker.write_line("one");
        tracker.write_line("two");
        assert_eq!(tracker.body(), b"one\ntwo\n");
    }

    #[tokio::test]
    async fn into_response_carries_status_and_body() -> Result<()> {
        let mut tracker = ResponseTracker::new();
        tracker.set_status(StatusCode::CREATED);
        tracker.write_line("created");

        let response = tracker.into_response();
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = to_bytes(response.into_body(), usize::MAX).await?;
        assert_eq!(&body[..], b"created\n");
        Ok(())
    }
}
