//! Error taxonomy shared by every layer of the crate.

use thiserror::Error;

use crate::extraction::ExtractionOptions;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Lookup by identity found nothing.
    #[error("{0}")]
    NotFound(String),

    /// Create collided with an existing identity.
    #[error("{0}")]
    AlreadyExists(String),

    #[error("{0}")]
    DeleteError(String),

    /// Malformed URL or a record missing required fields.
    #[error("{0}")]
    InvalidRecord(String),

    #[error("no handler supports the URL '{0}'")]
    HandlerNotFound(String),

    #[error("extraction failed for {url}: {reason}")]
    ExtractionError {
        url: String,
        options: Box<ExtractionOptions>,
        reason: String,
    },

    #[error("database error: {0}")]
    Database(#[from] libsql::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("upstream request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("feed rendering failed: {0}")]
    Feed(#[from] rss::Error),
}

impl Error {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRecord(message.into())
    }

    pub fn extraction(url: &str, options: &ExtractionOptions, reason: impl Into<String>) -> Self {
        Self::ExtractionError {
            url: url.to_string(),
            options: Box::new(options.clone()),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True for failures coming out of the extraction tool, which batch
    /// refreshes log and skip instead of propagating.
    pub fn is_extraction(&self) -> bool {
        matches!(self, Self::ExtractionError { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_error_carries_url_and_options() {
        let options = ExtractionOptions {
            extract_flat: true,
            ..ExtractionOptions::default()
        };
        let err = Error::extraction("https://example.com/v", &options, "exit status 1");
        assert!(err.is_extraction());
        assert!(!err.is_not_found());
        assert_eq!(
            err.to_string(),
            "extraction failed for https://example.com/v: exit status 1"
        );
        match err {
            Error::ExtractionError { options, .. } => assert!(options.extract_flat),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn not_found_displays_message_verbatim() {
        let err = Error::not_found("Source not found");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Source not found");
    }
}
