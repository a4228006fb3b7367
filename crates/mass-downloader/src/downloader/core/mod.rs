//! Core types used throughout the downloader system
//!
//! This module contains the fundamental types that all other modules depend on:
//! the per-artifact status, the station/channel/interval working set and the
//! error and progress plumbing.

pub mod error;
pub mod files;
pub mod progress;
pub mod status;

// Re-export main types for convenience
pub use error::{DownloadError, ErrorSeverity, FileOperation, Result};
pub use progress::{
    AcquisitionEvent, CompositeProgressReporter, FilterStage, IntoProgressCallback, NullProgressReporter,
    ProgressCallback, ProgressReporter, RecordingProgressReporter, TracingProgressReporter, emit,
};
pub use status::Status;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Station identity, `NETWORK.STATION`
///
/// Ordering is by network code, then station code. Every deterministic walk
/// over stations (distance filtering, chunk planning) uses this order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StationId {
    pub network: String,
    pub station: String,
}

impl StationId {
    pub fn new<N: Into<String>, S: Into<String>>(network: N, station: S) -> Self {
        Self {
            network: network.into(),
            station: station.into(),
        }
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.network, self.station)
    }
}

/// One requested time span of one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Resolved storage location, set during download preparation
    pub filename: Option<PathBuf>,
    pub status: Status,
}

impl TimeInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            filename: None,
            status: Status::None,
        }
    }

    /// Resolved to a path but not fetched yet
    pub fn is_pending(&self) -> bool {
        self.status == Status::None && self.filename.is_some()
    }
}

/// A channel (location + channel code) of a station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub location: String,
    pub channel: String,
    pub sample_rate: Option<f64>,
    pub intervals: Vec<TimeInterval>,
}

impl Channel {
    pub fn new<L: Into<String>, C: Into<String>>(location: L, channel: C) -> Self {
        Self {
            location: location.into(),
            channel: channel.into(),
            sample_rate: None,
            intervals: Vec::new(),
        }
    }

    /// `LOCATION.CHANNEL`, unique within a station
    pub fn id(&self) -> String {
        format!("{}.{}", self.location, self.channel)
    }

    pub fn has_existing_or_downloaded_intervals(&self) -> bool {
        self.intervals.iter().any(|ti| ti.status.has_data())
    }

    /// Mark every undecided or downloaded interval as ignored
    ///
    /// Pre-existing and failed intervals keep their status.
    pub fn ignore(&mut self) {
        for interval in &mut self.intervals {
            interval.status.transition(Status::Ignore);
        }
    }
}

/// A station with its channels and the status of its metadata artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub network: String,
    pub station: String,
    pub latitude: f64,
    pub longitude: f64,
    pub channels: Vec<Channel>,
    pub metadata_filename: Option<PathBuf>,
    pub metadata_status: Status,
    /// Released by a filter step; no further processing
    #[serde(default)]
    pub ignored: bool,
}

impl Station {
    pub fn new<N: Into<String>, S: Into<String>>(network: N, station: S, latitude: f64, longitude: f64) -> Self {
        Self {
            network: network.into(),
            station: station.into(),
            latitude,
            longitude,
            channels: Vec::new(),
            metadata_filename: None,
            metadata_status: Status::None,
            ignored: false,
        }
    }

    pub fn id(&self) -> StationId {
        StationId::new(self.network.clone(), self.station.clone())
    }

    /// Ignored stations are kept for reporting but never processed further
    pub fn is_ignored(&self) -> bool {
        self.ignored
    }

    pub fn has_existing_or_downloaded_intervals(&self) -> bool {
        self.channels.iter().any(Channel::has_existing_or_downloaded_intervals)
    }

    /// Mark the station and everything below it as ignored
    pub fn ignore(&mut self) {
        self.ignored = true;
        self.metadata_status.transition(Status::Ignore);
        for channel in &mut self.channels {
            channel.ignore();
        }
    }

    /// Files written by this run, waveforms and metadata alike
    pub fn downloaded_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self
            .channels
            .iter()
            .flat_map(|c| c.intervals.iter())
            .filter(|ti| ti.status == Status::Downloaded)
            .filter_map(|ti| ti.filename.clone())
            .collect();
        if self.metadata_status == Status::Downloaded {
            if let Some(ref path) = self.metadata_filename {
                files.push(path.clone());
            }
        }
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn station_with_interval(status: Status) -> Station {
        let mut station = Station::new("IU", "ANMO", 34.9, -106.4);
        let mut channel = Channel::new("00", "BHZ");
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap();
        let mut interval = TimeInterval::new(start, end);
        interval.status = status;
        interval.filename = Some(PathBuf::from("IU.ANMO.00.BHZ.mseed"));
        channel.intervals.push(interval);
        station.channels.push(channel);
        station
    }

    #[test]
    fn test_station_id_display_and_order() {
        let a = StationId::new("IU", "ANMO");
        let b = StationId::new("IU", "COLA");
        let c = StationId::new("US", "AAA");
        assert_eq!(a.to_string(), "IU.ANMO");
        assert!(a < b && b < c);
    }

    #[test]
    fn test_ignore_cascades_to_intervals() {
        let mut station = station_with_interval(Status::None);
        station.ignore();
        assert!(station.is_ignored());
        assert_eq!(station.metadata_status, Status::Ignore);
        assert_eq!(station.channels[0].intervals[0].status, Status::Ignore);
    }

    #[test]
    fn test_ignore_keeps_existing_and_failed_artifacts() {
        for status in [Status::Exists, Status::DownloadFailed] {
            let mut station = station_with_interval(status);
            station.metadata_status = Status::DownloadFailed;
            station.ignore();
            assert!(station.is_ignored());
            assert_eq!(station.channels[0].intervals[0].status, status);
            assert_eq!(station.metadata_status, Status::DownloadFailed);
        }
    }

    #[test]
    fn test_downloaded_files_only_lists_this_runs_files() {
        let existing = station_with_interval(Status::Exists);
        assert!(existing.downloaded_files().is_empty());
        assert!(existing.has_existing_or_downloaded_intervals());

        let mut fetched = station_with_interval(Status::Downloaded);
        fetched.metadata_status = Status::Downloaded;
        fetched.metadata_filename = Some(PathBuf::from("IU.ANMO.xml"));
        assert_eq!(fetched.downloaded_files().len(), 2);
    }
}
