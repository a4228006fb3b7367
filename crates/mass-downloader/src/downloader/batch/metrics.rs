//! Transfer metrics for one provider
//!
//! Counters are atomics so concurrently running chunks can update them
//! without coordination.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct DownloadMetrics {
    pub chunks_started: AtomicU64,
    pub chunks_failed: AtomicU64,
    pub waveforms_downloaded: AtomicU64,
    pub waveforms_failed: AtomicU64,
    pub metadata_downloaded: AtomicU64,
    pub metadata_failed: AtomicU64,
    pub total_bytes: AtomicU64,
}

impl DownloadMetrics {
    pub fn record_chunk_started(&self) {
        self.chunks_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chunk_failed(&self) {
        self.chunks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_waveform_downloaded(&self, size: u64) {
        self.waveforms_downloaded.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(size, Ordering::Relaxed);
    }

    pub fn record_waveform_failed(&self) {
        self.waveforms_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_metadata_downloaded(&self, size: u64) {
        self.metadata_downloaded.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(size, Ordering::Relaxed);
    }

    pub fn record_metadata_failed(&self) {
        self.metadata_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> DownloadMetricsSnapshot {
        DownloadMetricsSnapshot {
            chunks_started: self.chunks_started.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
            waveforms_downloaded: self.waveforms_downloaded.load(Ordering::Relaxed),
            waveforms_failed: self.waveforms_failed.load(Ordering::Relaxed),
            metadata_downloaded: self.metadata_downloaded.load(Ordering::Relaxed),
            metadata_failed: self.metadata_failed.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of download metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadMetricsSnapshot {
    pub chunks_started: u64,
    pub chunks_failed: u64,
    pub waveforms_downloaded: u64,
    pub waveforms_failed: u64,
    pub metadata_downloaded: u64,
    pub metadata_failed: u64,
    pub total_bytes: u64,
}

impl DownloadMetricsSnapshot {
    /// Share of attempted artifacts that were acquired (0.0 to 1.0)
    pub fn success_rate(&self) -> f64 {
        let succeeded = self.waveforms_downloaded + self.metadata_downloaded;
        let attempted = succeeded + self.waveforms_failed + self.metadata_failed;
        if attempted == 0 {
            0.0
        } else {
            succeeded as f64 / attempted as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_success_rate() {
        let metrics = DownloadMetrics::default();
        metrics.record_waveform_downloaded(100);
        metrics.record_waveform_downloaded(50);
        metrics.record_waveform_failed();
        metrics.record_metadata_downloaded(10);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_bytes, 160);
        assert_eq!(snapshot.waveforms_downloaded, 2);
        assert!((snapshot.success_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(DownloadMetricsSnapshot::default().success_rate(), 0.0);
    }
}
