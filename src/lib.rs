//! # Gardisto (Management API gate)
//!
//! `gardisto` guards an HTTP management API with a layered authorization
//! scheme and manages short-lived, single-use password-reset tokens.
//!
//! ## Authorization
//!
//! Every protected route is wrapped by one of three policies: user-required,
//! app-scoped, or admin-required. Credentials travel in the `Authorization`
//! header as plain bearer strings; the verifier resolves them into a
//! [`auth::Principal`] that is either user-scoped or app-scoped, never both.
//! An app-scoped credential can only act on the application it was issued
//! for.
//!
//! ## Error reporting
//!
//! Once any byte of a response body has been written the status code can no
//! longer change, so handler failures are reported in one of two ways: a
//! fresh error response when nothing has been written yet, or a trailing
//! line appended to the already-started body.
//!
//! ## Password reset
//!
//! Reset tokens are collision-resistant, valid for 24 hours, and single-use.
//! Lookups never reveal whether a token is unknown, expired, or already
//! consumed.

pub mod api;
pub mod auth;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }
}
