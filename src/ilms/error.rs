//! Error types for the iLMS collaborator.

use std::path::PathBuf;

use thiserror::Error;

use crate::engine::StorageError;
use crate::transport::TransportError;

/// Errors raised while talking to iLMS or saving what it returned.
#[derive(Debug, Error)]
pub enum SiteError {
    /// The request itself failed (after any retries).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The page carries the red "No Permission!" notice.
    #[error("no permission for {url}: {message}")]
    NoPermission {
        /// Page URL.
        url: String,
        /// Notice text as shown by the site.
        message: String,
    },

    /// The requested resource does not exist or is not shown.
    #[error("unavailable resource {url}: {detail}")]
    Unavailable {
        /// Page URL.
        url: String,
        /// What was found instead.
        detail: String,
    },

    /// The server returned something the parser does not recognise.
    #[error("cannot understand response from {url}: {detail}")]
    CannotUnderstand {
        /// Page URL.
        url: String,
        /// What was unexpected.
        detail: String,
    },

    /// Login was rejected.
    #[error("login failed: {0}")]
    LoginFailed(String),

    /// Invalid user input such as an inaccessible course id.
    #[error("{0}")]
    User(String),

    /// Building a site URL failed.
    #[error("invalid URL {url}: {source}")]
    Url {
        /// The URL text.
        url: String,
        /// Parse failure.
        #[source]
        source: url::ParseError,
    },

    /// Writing an item file failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Reading or writing local session state failed.
    #[error("IO error at {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl SiteError {
    /// Creates a [`SiteError::CannotUnderstand`].
    pub fn cannot_understand(url: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::CannotUnderstand {
            url: url.into(),
            detail: detail.into(),
        }
    }

    /// Creates a [`SiteError::Unavailable`].
    pub fn unavailable(url: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Unavailable {
            url: url.into(),
            detail: detail.into(),
        }
    }

    /// Creates a [`SiteError::Io`].
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true for faults caused by user input rather than the site.
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::User(_) | Self::LoginFailed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_url_and_detail() {
        let err = SiteError::cannot_understand("http://lms.example/x", "missing ret");
        let msg = err.to_string();
        assert!(msg.contains("http://lms.example/x"));
        assert!(msg.contains("missing ret"));
    }

    #[test]
    fn test_user_errors_are_classified() {
        assert!(SiteError::User("no access".into()).is_user_error());
        assert!(SiteError::LoginFailed("bad password".into()).is_user_error());
        assert!(!SiteError::unavailable("u", "gone").is_user_error());
    }
}
