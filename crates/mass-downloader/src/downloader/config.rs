//! Configuration types for the downloader system

use crate::downloader::core::{DownloadError, Result};
use std::time::Duration;

/// Configuration for acquisition runs
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Upper bound of the estimated payload of one bulk waveform request, in MB
    pub chunk_size_in_mb: f64,
    /// Concurrent transfers per provider
    pub threads_per_client: usize,
    /// Log the final report once the run finished
    pub print_report: bool,
    /// Budget for connecting to one provider and discovering its services
    pub init_timeout: Duration,
    /// Budget for one availability (station service) query
    pub query_timeout: Duration,
    /// Timeout of a single HTTP request
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl DownloadConfig {
    pub fn with_chunk_size_in_mb(mut self, chunk_size_in_mb: f64) -> Self {
        self.chunk_size_in_mb = chunk_size_in_mb;
        self
    }

    pub fn with_threads_per_client(mut self, threads_per_client: usize) -> Self {
        self.threads_per_client = threads_per_client;
        self
    }

    pub fn with_print_report(mut self, print_report: bool) -> Self {
        self.print_report = print_report;
        self
    }

    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Chunk budget in bytes
    pub fn chunk_size_bytes(&self) -> u64 {
        (self.chunk_size_in_mb * 1024.0 * 1024.0).round() as u64
    }

    /// Reject settings that cannot produce a meaningful run
    pub fn validate(&self) -> Result<()> {
        if !self.chunk_size_in_mb.is_finite() || self.chunk_size_in_mb <= 0.0 {
            return Err(DownloadError::Configuration {
                message: format!("chunk size must be positive, got {} MB", self.chunk_size_in_mb),
                field: Some("chunk_size_in_mb".to_string()),
                suggestion: Some("The default of 20 MB works well for most providers".to_string()),
            });
        }
        if self.threads_per_client == 0 {
            return Err(DownloadError::configuration(
                "at least one download thread per provider is required",
                "threads_per_client",
            ));
        }
        Ok(())
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            chunk_size_in_mb: 20.0,
            threads_per_client: 3,
            print_report: true,
            init_timeout: Duration::from_secs(30),
            query_timeout: Duration::from_secs(120),
            request_timeout: Duration::from_secs(120),
            user_agent: concat!("mass-downloader/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DownloadConfig::default();
        assert_eq!(config.threads_per_client, 3);
        assert_eq!(config.chunk_size_bytes(), 20 * 1024 * 1024);
        assert!(config.print_report);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values_are_configuration_errors() {
        let zero_threads = DownloadConfig::default().with_threads_per_client(0);
        assert!(matches!(zero_threads.validate(), Err(DownloadError::Configuration { .. })));

        let negative_chunk = DownloadConfig::default().with_chunk_size_in_mb(-1.0);
        assert!(matches!(negative_chunk.validate(), Err(DownloadError::Configuration { .. })));
    }
}
