//! Final report of an acquisition run
//!
//! Computed once after every provider finished, from the artifact statuses
//! and the sizes of the files on disk.

use crate::downloader::batch::DownloadMetricsSnapshot;
use crate::downloader::core::files::file_size;
use crate::downloader::core::Status;
use crate::downloader::helper::ClientDownloadHelper;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use tracing::info;

const MB: f64 = 1024.0 * 1024.0;

/// Number and total size of a group of files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FileTally {
    pub count: usize,
    pub bytes: u64,
}

impl FileTally {
    async fn of(files: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut tally = FileTally::default();
        for path in files {
            tally.count += 1;
            tally.bytes += file_size(&path).await;
        }
        tally
    }

    pub fn megabytes(&self) -> f64 {
        self.bytes as f64 / MB
    }
}

/// What one provider contributed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderSummary {
    pub provider: String,
    /// Stations with at least one file written by this run
    pub stations: usize,
    pub waveforms: FileTally,
    pub metadata: FileTally,
    pub transfers: DownloadMetricsSnapshot,
}

impl ProviderSummary {
    pub fn downloaded_bytes(&self) -> u64 {
        self.waveforms.bytes + self.metadata.bytes
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadReport {
    pub existing_waveforms: FileTally,
    pub existing_metadata: FileTally,
    pub providers: Vec<ProviderSummary>,
    pub total_downloaded_bytes: u64,
}

impl DownloadReport {
    pub async fn collect(helpers: &[ClientDownloadHelper]) -> Self {
        let existing_waveforms: BTreeSet<PathBuf> =
            helpers.iter().flat_map(|h| h.waveform_files(Status::Exists)).collect();
        let existing_metadata: BTreeSet<PathBuf> =
            helpers.iter().flat_map(|h| h.metadata_files(Status::Exists)).collect();

        let mut providers = Vec::with_capacity(helpers.len());
        for helper in helpers {
            providers.push(ProviderSummary {
                provider: helper.name().to_string(),
                stations: helper.acquired_station_count(),
                waveforms: FileTally::of(helper.waveform_files(Status::Downloaded)).await,
                metadata: FileTally::of(helper.metadata_files(Status::Downloaded)).await,
                transfers: helper.metrics(),
            });
        }
        let total_downloaded_bytes = providers.iter().map(ProviderSummary::downloaded_bytes).sum();

        Self {
            existing_waveforms: FileTally::of(existing_waveforms).await,
            existing_metadata: FileTally::of(existing_metadata).await,
            providers,
            total_downloaded_bytes,
        }
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderSummary> {
        self.providers.iter().find(|p| p.provider == name)
    }

    /// Files written by this run over all providers
    pub fn downloaded_files(&self) -> usize {
        self.providers.iter().map(|p| p.waveforms.count + p.metadata.count).sum()
    }

    pub fn total_downloaded_mb(&self) -> f64 {
        self.total_downloaded_bytes as f64 / MB
    }

    /// Emit the report through `tracing`, one line per entry
    pub fn log(&self) {
        for line in self.to_string().lines() {
            info!("{}", line);
        }
    }
}

impl fmt::Display for DownloadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "==================== FINAL REPORT ====================")?;
        writeln!(
            f,
            "{} MiniSEED files [{:.1} MB] already existed.",
            self.existing_waveforms.count,
            self.existing_waveforms.megabytes()
        )?;
        writeln!(
            f,
            "{} StationXML files [{:.1} MB] already existed.",
            self.existing_metadata.count,
            self.existing_metadata.megabytes()
        )?;
        for summary in &self.providers {
            writeln!(
                f,
                "Client '{}' - Acquired {} MiniSEED files [{:.1} MB].",
                summary.provider,
                summary.waveforms.count,
                summary.waveforms.megabytes()
            )?;
            writeln!(
                f,
                "Client '{}' - Acquired {} StationXML files [{:.1} MB].",
                summary.provider,
                summary.metadata.count,
                summary.metadata.megabytes()
            )?;
        }
        write!(f, "{:.1} MB in total.", self.total_downloaded_mb())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(provider: &str, waveform_bytes: u64) -> ProviderSummary {
        ProviderSummary {
            provider: provider.to_string(),
            stations: 1,
            waveforms: FileTally { count: 2, bytes: waveform_bytes },
            metadata: FileTally { count: 1, bytes: 1024 },
            transfers: DownloadMetricsSnapshot::default(),
        }
    }

    #[test]
    fn test_display_lists_every_provider() {
        let report = DownloadReport {
            existing_waveforms: FileTally { count: 3, bytes: 3 * 1024 * 1024 },
            existing_metadata: FileTally::default(),
            providers: vec![summary("IRIS", 2 * 1024 * 1024), summary("GFZ", 0)],
            total_downloaded_bytes: 2 * 1024 * 1024 + 2048,
        };
        let text = report.to_string();
        assert!(text.contains("3 MiniSEED files [3.0 MB] already existed."));
        assert!(text.contains("Client 'IRIS' - Acquired 2 MiniSEED files [2.0 MB]."));
        assert!(text.contains("Client 'GFZ' - Acquired 1 StationXML files"));
        assert!(text.ends_with("2.0 MB in total."));
        assert_eq!(report.downloaded_files(), 6);
        assert_eq!(report.provider("GFZ").map(|p| p.downloaded_bytes()), Some(1024));
    }

    #[test]
    fn test_serializes_to_json() {
        let report = DownloadReport {
            existing_waveforms: FileTally::default(),
            existing_metadata: FileTally::default(),
            providers: vec![summary("IRIS", 10)],
            total_downloaded_bytes: 1034,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["providers"][0]["provider"], "IRIS");
        assert_eq!(json["total_downloaded_bytes"], 1034);
    }
}
