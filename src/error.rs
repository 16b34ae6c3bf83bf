use thiserror::Error;
use tracing::{error, warn};

pub const WIRE_INVALID_URL: &str = "invalidURL";
pub const WIRE_NO_METADATA: &str = "noMetadata";
pub const WIRE_FETCH_FAILED: &str = "fetchFailed";

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("Failed to parse URL: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to fetch metadata: {0}")]
    FetchFailed(String),

    #[error("No preview metadata available")]
    NoMetadata,

    #[error("Request timeout: {0}")]
    TimeoutError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Cache I/O failed: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to encode or decode record: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Document patch rejected: {0}")]
    DocumentError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

impl PreviewError {
    /// Encodes a fetch failure as the error string carried by a response
    /// record. Anything that is not one of the three fetch classifications is
    /// reported as a `fetchFailed` with its message as the cause.
    pub fn to_wire(&self) -> String {
        match self {
            PreviewError::InvalidUrl(_) | PreviewError::UrlParseError(_) => {
                WIRE_INVALID_URL.to_string()
            }
            PreviewError::NoMetadata => WIRE_NO_METADATA.to_string(),
            PreviewError::FetchFailed(cause) => format!("{WIRE_FETCH_FAILED}: {cause}"),
            other => format!("{WIRE_FETCH_FAILED}: {other}"),
        }
    }

    /// Inverse of [`PreviewError::to_wire`]. Unknown strings become
    /// `FetchFailed` with the raw string as the cause.
    pub fn from_wire(error: &str) -> Self {
        let error = error.trim();
        if error == WIRE_INVALID_URL {
            return PreviewError::InvalidUrl(String::new());
        }
        if error == WIRE_NO_METADATA {
            return PreviewError::NoMetadata;
        }
        match error.strip_prefix(WIRE_FETCH_FAILED) {
            Some(rest) => {
                let cause = rest.trim_start_matches(':').trim();
                PreviewError::FetchFailed(cause.to_string())
            }
            None => PreviewError::FetchFailed(error.to_string()),
        }
    }

    pub fn log(&self) {
        match self {
            PreviewError::UrlParseError(e) => {
                warn!(error = %e, "URL parsing failed");
            }
            PreviewError::InvalidUrl(e) => {
                warn!(error = %e, "URL rejected");
            }
            PreviewError::FetchFailed(e) => {
                error!(error = %e, "Metadata fetch failed");
            }
            PreviewError::NoMetadata => {
                warn!("Fetcher returned no preview metadata");
            }
            PreviewError::TimeoutError(e) => {
                warn!(error = %e, "Request timed out");
            }
            PreviewError::CacheError(e) => {
                warn!(error = %e, "Cache operation failed");
            }
            PreviewError::IoError(e) => {
                warn!(error = %e, "Cache storage I/O failed");
            }
            PreviewError::SerializationError(e) => {
                warn!(error = %e, "Cache record encoding failed");
            }
            PreviewError::DocumentError(e) => {
                error!(error = %e, "Document patch failed");
            }
            PreviewError::ConfigError(e) => {
                error!(error = %e, "Configuration invalid");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_classification() {
        assert_eq!(PreviewError::NoMetadata.to_wire(), "noMetadata");
        assert_eq!(
            PreviewError::InvalidUrl("ftp://x".into()).to_wire(),
            "invalidURL"
        );
        assert_eq!(
            PreviewError::FetchFailed("connection reset".into()).to_wire(),
            "fetchFailed: connection reset"
        );
    }

    #[test]
    fn test_wire_parse() {
        assert!(matches!(
            PreviewError::from_wire("invalidURL"),
            PreviewError::InvalidUrl(_)
        ));
        assert!(matches!(
            PreviewError::from_wire("noMetadata"),
            PreviewError::NoMetadata
        ));
        match PreviewError::from_wire("fetchFailed: dns lookup") {
            PreviewError::FetchFailed(cause) => assert_eq!(cause, "dns lookup"),
            e => panic!("unexpected {e:?}"),
        }
        match PreviewError::from_wire("socket closed") {
            PreviewError::FetchFailed(cause) => assert_eq!(cause, "socket closed"),
            e => panic!("unexpected {e:?}"),
        }
    }
}
