//! Mass Downloader Library
//!
//! This library acquires seismic waveforms and station metadata for a
//! geographic and temporal query from several FDSN data centers at once.
//! Providers are queried in priority order; a station delivered by one
//! provider is never fetched again from another, stations closer than a
//! minimum distance are thinned out, and files already on disk are reused,
//! so repeated runs only fetch what is still missing.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mass_downloader::{
//!     DownloadConfig, Domain, MassDownloader, Restrictions, Storage, TracingProgressReporter,
//!     IntoProgressCallback,
//! };
//! use chrono::{TimeZone, Utc};
//!
//! # async fn example() -> mass_downloader::Result<()> {
//! let config = DownloadConfig::default().with_threads_per_client(3);
//!
//! // Use IRIS first, then GFZ
//! let downloader = MassDownloader::new(
//!     Some(vec!["IRIS".to_string(), "GFZ".to_string()]),
//!     config,
//!     None,
//! )
//! .await?;
//!
//! let domain = Domain::Circular {
//!     latitude: 35.0,
//!     longitude: -106.0,
//!     min_radius: 0.0,
//!     max_radius: 5.0,
//! };
//! let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
//! let restrictions = Restrictions::new(start, start + chrono::TimeDelta::hours(1))
//!     .with_minimum_interstation_distance_in_m(5000.0);
//!
//! let outcome = downloader
//!     .download(
//!         domain,
//!         restrictions,
//!         Storage::from_location("waveforms"),
//!         Storage::from_location("stations"),
//!         Some(TracingProgressReporter::new(false).into_callback()),
//!     )
//!     .await?;
//! println!("{}", outcome.report);
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Priority ordered providers**: concurrent initialization, order kept from the caller
//! - **Cross-provider deduplication**: every station is sourced from exactly one provider
//! - **Minimum inter-station distance**: greedy great-circle filtering
//! - **Chunked transfers**: bulk requests bounded by an estimated payload size
//! - **Idempotent runs**: existing files are detected and never fetched again
//! - **Sanitation**: waveforms without metadata and metadata without waveforms are removed
//! - **Progress tracking**: structured events through an injected reporter

pub mod downloader;

// Re-export commonly used types for convenience
pub use downloader::{
    AcquisitionEvent, ClientDownloadHelper, CompositeProgressReporter, Domain, DownloadConfig, DownloadError,
    DownloadOutcome, DownloadReport, IntoProgressCallback, MassDownloader, NullProgressReporter, ProgressCallback,
    ProgressReporter, Restrictions, Result, Status, Storage, StorageTarget, TracingProgressReporter,
};
