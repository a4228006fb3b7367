//! Downloader module
//!
//! This module contains the acquisition pipeline: core types, query
//! constraints, provider clients and registry, per-provider state, chunked
//! transfers and the final report.

pub mod core;
pub mod config;
pub mod domain;
pub mod spatial;
pub mod storage;
pub mod sources;
pub mod registry;
pub mod batch;
pub mod helper;
pub mod report;
pub mod r#lib;

// Re-export main types for convenience
pub use r#lib::{DownloadOutcome, MassDownloader};
pub use core::{
    AcquisitionEvent, Channel, Station, StationId, Status, TimeInterval,
    ProgressCallback, ProgressReporter, IntoProgressCallback, FilterStage,
    TracingProgressReporter, NullProgressReporter, CompositeProgressReporter, RecordingProgressReporter,
    DownloadError, Result, ErrorSeverity, FileOperation,
};
pub use config::DownloadConfig;
pub use domain::{Domain, Restrictions, DEFAULT_CHANNEL_PRIORITIES, DEFAULT_LOCATION_PRIORITIES};
pub use storage::{ArtifactKey, Storage, StorageTarget};
pub use sources::{
    ChannelRecord, FdsnClient, FdsnConnector, MetadataRequest, ProviderClient, ProviderConnector,
    StationQuery, WaveformRequest,
};
pub use registry::{default_provider_order, Provider, ProviderRegistry};
pub use helper::ClientDownloadHelper;
pub use batch::{DownloadMetrics, DownloadMetricsSnapshot};
pub use report::{DownloadReport, FileTally, ProviderSummary};
