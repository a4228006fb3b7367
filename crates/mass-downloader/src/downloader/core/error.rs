//! Error types for the downloader system with context and recovery information
//!
//! Provider- and chunk-scoped variants are recovered locally by the
//! orchestrator (logged, reflected in artifact status). Only configuration
//! errors and storage that cannot be prepared at all reach the caller.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DownloadError {
    /// Provider failed to initialize or lacks a required service
    #[error("Provider '{provider}' is unavailable: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    /// The station/availability query of one provider failed
    #[error("Availability query against '{provider}' failed: {reason}")]
    AvailabilityQueryFailed { provider: String, reason: String },

    /// One bulk waveform chunk failed as a whole
    #[error("Chunk {chunk} ({requests} requests) from '{provider}' failed: {reason}")]
    ChunkDownloadFailed {
        provider: String,
        chunk: usize,
        requests: usize,
        reason: String,
    },

    /// The provider answered but holds no data for the request
    #[error("No data available from '{provider}' for {request}")]
    NoData { provider: String, request: String },

    /// HTTP-related errors with context
    #[error("HTTP request to '{url}' failed")]
    HttpRequest {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Non-success HTTP status
    #[error("HTTP request to '{url}' returned status {status}")]
    HttpStatus { url: String, status: u16 },

    /// Network timeout
    #[error("Request to '{url}' timed out after {duration_secs}s")]
    NetworkTimeout { url: String, duration_secs: u64 },

    /// File system I/O errors with file context
    #[error("File operation failed on '{path}' ({operation})")]
    FileSystem {
        path: PathBuf,
        operation: FileOperation,
        #[source]
        source: std::io::Error,
    },

    /// URL parsing errors with helpful suggestions
    #[error("Invalid URL '{url}': {suggestion}")]
    InvalidUrl {
        url: String,
        suggestion: String,
        #[source]
        source: url::ParseError,
    },

    /// Invalid domain/restriction/config combination, raised before any network activity
    #[error("Invalid configuration: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
        suggestion: Option<String>,
    },
}

/// Types of file operations for error context
#[derive(Debug, Clone, PartialEq)]
pub enum FileOperation {
    Write,
    Delete,
    Move,
    CreateDir,
}

impl std::fmt::Display for FileOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileOperation::Write => write!(f, "writing"),
            FileOperation::Delete => write!(f, "deleting"),
            FileOperation::Move => write!(f, "moving"),
            FileOperation::CreateDir => write!(f, "creating directory"),
        }
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;

impl DownloadError {
    /// Shorthand for a configuration error on a named field
    pub fn configuration<M: Into<String>, F: Into<String>>(message: M, field: F) -> Self {
        DownloadError::Configuration {
            message: message.into(),
            field: Some(field.into()),
            suggestion: None,
        }
    }

    /// Wrap an I/O error with the path and operation it happened on
    pub fn file_system<P: Into<PathBuf>>(path: P, operation: FileOperation, source: std::io::Error) -> Self {
        DownloadError::FileSystem {
            path: path.into(),
            operation,
            source,
        }
    }

    /// Check if error is transient (network level) rather than a hard failure
    pub fn is_recoverable(&self) -> bool {
        match self {
            DownloadError::HttpRequest { source, .. } => {
                // Only network-level problems and 5xx/429, not client errors
                source.status().is_none_or(|status| status.is_server_error() || status == 429)
            }
            DownloadError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            DownloadError::NetworkTimeout { .. } => true,
            DownloadError::FileSystem { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::Interrupted | std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ),
            DownloadError::ProviderUnavailable { .. }
            | DownloadError::AvailabilityQueryFailed { .. }
            | DownloadError::ChunkDownloadFailed { .. }
            | DownloadError::NoData { .. }
            | DownloadError::InvalidUrl { .. }
            | DownloadError::Configuration { .. } => false,
        }
    }

    /// Whether the error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DownloadError::Configuration { .. } | DownloadError::FileSystem { .. }
        )
    }

    /// Get error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            DownloadError::ProviderUnavailable { .. } => "provider_unavailable",
            DownloadError::AvailabilityQueryFailed { .. } => "availability_query_failed",
            DownloadError::ChunkDownloadFailed { .. } => "chunk_download_failed",
            DownloadError::NoData { .. } => "no_data",
            DownloadError::HttpRequest { .. } => "http_request",
            DownloadError::HttpStatus { .. } => "http_status",
            DownloadError::NetworkTimeout { .. } => "network_timeout",
            DownloadError::FileSystem { .. } => "file_system",
            DownloadError::InvalidUrl { .. } => "invalid_url",
            DownloadError::Configuration { .. } => "configuration",
        }
    }

    /// Get severity level for error prioritization
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            DownloadError::NoData { .. } => ErrorSeverity::Low,
            DownloadError::ProviderUnavailable { .. }
            | DownloadError::AvailabilityQueryFailed { .. }
            | DownloadError::ChunkDownloadFailed { .. }
            | DownloadError::HttpRequest { .. }
            | DownloadError::HttpStatus { .. }
            | DownloadError::NetworkTimeout { .. } => ErrorSeverity::Medium,
            DownloadError::InvalidUrl { .. } | DownloadError::Configuration { .. } => ErrorSeverity::High,
            DownloadError::FileSystem { .. } => ErrorSeverity::Critical,
        }
    }

    /// Get user-friendly suggestion for resolving the error
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            DownloadError::NetworkTimeout { .. } => {
                Some("Check your internet connection or try increasing the timeout value")
            }
            DownloadError::InvalidUrl { suggestion, .. } => Some(suggestion),
            DownloadError::Configuration { suggestion, .. } => suggestion.as_deref(),
            DownloadError::FileSystem { .. } => Some("Check that the storage location is writable"),
            _ => None,
        }
    }
}

/// Error severity levels for prioritization
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl From<reqwest::Error> for DownloadError {
    fn from(error: reqwest::Error) -> Self {
        let url = error.url().map(|u| u.to_string()).unwrap_or_else(|| "<unknown>".to_string());

        if error.is_timeout() {
            DownloadError::NetworkTimeout { url, duration_secs: 0 }
        } else {
            DownloadError::HttpRequest { url, source: error }
        }
    }
}

impl From<url::ParseError> for DownloadError {
    fn from(error: url::ParseError) -> Self {
        let suggestion = match error {
            url::ParseError::EmptyHost => "URL must have a valid hostname",
            url::ParseError::InvalidPort => "Port number must be between 1 and 65535",
            url::ParseError::RelativeUrlWithoutBase => "URL must be absolute (include http:// or https://)",
            _ => "Check URL format and try again",
        }
        .to_string();

        DownloadError::InvalidUrl {
            url: "<unparseable>".to_string(),
            suggestion,
            source: error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_is_fatal_and_not_recoverable() {
        let err = DownloadError::configuration("endtime must be after starttime", "endtime");
        assert!(err.is_fatal());
        assert!(!err.is_recoverable());
        assert_eq!(err.category(), "configuration");
        assert_eq!(err.severity(), ErrorSeverity::High);
    }

    #[test]
    fn test_provider_scoped_errors_are_not_fatal() {
        let err = DownloadError::AvailabilityQueryFailed {
            provider: "IRIS".to_string(),
            reason: "connection reset".to_string(),
        };
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("IRIS"));
    }

    #[test]
    fn test_file_system_error_context() {
        let err = DownloadError::file_system(
            "/readonly/out",
            FileOperation::CreateDir,
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.is_fatal());
        assert_eq!(err.category(), "file_system");
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert!(err.to_string().contains("creating directory"));
        assert!(err.suggestion().is_some());
    }

    #[test]
    fn test_server_status_is_recoverable() {
        let err = DownloadError::HttpStatus { url: "http://x".to_string(), status: 503 };
        assert!(err.is_recoverable());
        let err = DownloadError::HttpStatus { url: "http://x".to_string(), status: 400 };
        assert!(!err.is_recoverable());
    }
}
