use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Maximum characters of a remote error body carried into a diagnostic.
pub(crate) const MAX_ERROR_BODY_CHARS: usize = 200;

/// Failures of the on-disk credential cache.
///
/// Every variant is advisory to the broker: a failed load falls through to
/// a live exchange, a failed store is logged and the fresh credential is
/// still emitted.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("neither $XDG_CACHE_HOME nor $HOME are defined")]
    NoCacheDir,

    #[error("cannot read cache file {}: {source}", path.display())]
    NotFoundOrUnreadable { path: PathBuf, source: io::Error },

    #[error("malformed cache file {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("cached credential expired at {expiration}")]
    Expired { expiration: DateTime<Utc> },

    #[error("cannot create cache directory {}: {source}", path.display())]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("cannot write cache file {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("cannot encode credential: {0}")]
    Encode(#[from] serde_json::Error),
}

impl CacheError {
    /// Returns `true` when the failure only means there is nothing usable
    /// in the cache yet.
    pub fn is_miss(&self) -> bool {
        match self {
            CacheError::NotFoundOrUnreadable { source, .. } => {
                source.kind() == io::ErrorKind::NotFound
            }
            CacheError::Expired { .. } => true,
            _ => false,
        }
    }
}

/// Failures obtaining a Google OIDC ID token.
#[derive(Debug, Error)]
pub enum TokenError {
    /// No usable Google credentials could be located.
    #[error("Google credentials unavailable: {0}")]
    Unavailable(String),

    /// The ambient identity may not impersonate the target service account.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Unexpected HTTP status or response body from a Google endpoint.
    #[error("Google API error: {0}")]
    Remote(String),

    /// HTTP/network layer error from reqwest.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The ambient credentials failed to produce a token.
    #[error("{0}")]
    Credentials(#[from] google_cloud_auth::errors::CredentialsError),
}

/// Reasons an ID token payload cannot yield the caller identity.
#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("token has no payload segment")]
    MissingPayload,

    #[error("payload is not base64url: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("payload is not a JSON object: {0}")]
    NotJson(#[from] serde_json::Error),

    #[error("payload has no string `{0}` claim")]
    MissingClaim(&'static str),
}

/// Failures reported by AWS STS `AssumeRoleWithWebIdentity`.
///
/// The message is the SDK's full error context, surfaced verbatim.
#[derive(Debug, Error)]
pub enum StsError {
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("invalid identity token: {0}")]
    InvalidIdToken(String),

    #[error("requested duration out of range: {0}")]
    DurationOutOfRange(String),

    #[error("{0}")]
    Remote(String),
}

/// Top-level error of a broker invocation. Display names the failing stage.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Config(String),

    #[error("failed to obtain Google ID token: {0}")]
    Token(#[from] TokenError),

    #[error("malformed token: {0}")]
    MalformedToken(#[from] ClaimError),

    /// The ambient ID token carries neither `email` nor `sub`.
    #[error("{0}")]
    MissingIdentity(String),

    #[error("failed to assume AWS role: {0}")]
    Sts(#[from] StsError),

    #[error("failed to write credential: {0}")]
    Output(#[source] io::Error),

    #[error("interrupted")]
    Interrupted,
}

/// A specialized Result type for broker operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The longest prefix of `s` that holds at most `max` characters.
pub(crate) fn clip(s: &str, max: usize) -> &str {
    s.char_indices().nth(max).map_or(s, |(end, _)| &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_is_named_in_display() {
        let err = Error::from(StsError::AccessDenied("Not authorized".into()));
        assert_eq!(
            err.to_string(),
            "failed to assume AWS role: access denied: Not authorized"
        );

        let err = Error::from(ClaimError::MissingClaim("email"));
        assert_eq!(
            err.to_string(),
            "malformed token: payload has no string `email` claim"
        );
    }

    #[test]
    fn no_cache_dir_display() {
        assert_eq!(
            CacheError::NoCacheDir.to_string(),
            "neither $XDG_CACHE_HOME nor $HOME are defined"
        );
    }

    #[test]
    fn missing_file_is_a_miss() {
        let err = CacheError::NotFoundOrUnreadable {
            path: PathBuf::from("/nonexistent"),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert!(err.is_miss());

        let err = CacheError::Malformed {
            path: PathBuf::from("/x.json"),
            reason: "expected value".into(),
        };
        assert!(!err.is_miss());
    }

    #[test]
    fn clip_counts_characters_not_bytes() {
        assert_eq!(clip("żółw@example.com", 4), "żółw");
        assert_eq!(clip("a@b", 3), "a@b");
        assert_eq!(clip("a@b", 64), "a@b");
        assert_eq!(clip("", 1), "");
    }
}
