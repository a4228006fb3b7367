//! Chunk planning and concurrent transfer execution
//!
//! Waveform requests of one provider are grouped into chunks bounded by an
//! estimated payload budget. Chunks run concurrently up to the per-provider
//! worker count; a failing chunk only fails its own requests.

pub mod metrics;

pub use metrics::{DownloadMetrics, DownloadMetricsSnapshot};

use crate::downloader::core::files::write_artifact;
use crate::downloader::core::{emit, AcquisitionEvent, DownloadError, ProgressCallback, StationId, Status};
use crate::downloader::sources::{MetadataRequest, ProviderClient, WaveformRequest};
use chrono::TimeDelta;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Samples per second implied by the band code (first letter) of a channel
///
/// Unknown band codes assume 250 Hz.
pub fn band_sample_rate(channel: &str) -> f64 {
    match channel.chars().next().map(|c| c.to_ascii_uppercase()) {
        Some('F' | 'G' | 'A' | 'O') => 5000.0,
        Some('D' | 'C') => 1000.0,
        Some('E' | 'H') => 250.0,
        Some('S' | 'B') => 80.0,
        Some('M') => 10.0,
        Some('L') => 1.0,
        Some('V') => 0.1,
        Some('U') => 0.01,
        Some('R') => 0.001,
        Some('P') => 0.0001,
        Some('T') => 0.00001,
        Some('Q') => 0.000001,
        _ => 250.0,
    }
}

/// Estimated miniSEED size of a segment, in bytes
///
/// Four bytes per sample at a compression ratio of three, never below one byte.
pub fn estimate_waveform_size(channel: &str, duration: TimeDelta) -> u64 {
    let seconds = duration.num_milliseconds().max(0) as f64 / 1000.0;
    let bytes = (band_sample_rate(channel) * seconds * 4.0 / 3.0).ceil();
    (bytes as u64).max(1)
}

/// Group `items` in order into chunks whose estimated size stays within `budget`
///
/// An item larger than the budget forms a chunk of its own. No item is dropped.
pub fn plan_chunks<T, F>(items: Vec<T>, size: F, budget: u64) -> Vec<Vec<T>>
where
    F: Fn(&T) -> u64,
{
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut current_size = 0u64;

    for item in items {
        let item_size = size(&item);
        if !current.is_empty() && current_size.saturating_add(item_size) > budget {
            chunks.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current_size = current_size.saturating_add(item_size);
        current.push(item);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Position of one time interval inside a provider's working set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalSlot {
    pub station: StationId,
    pub channel: usize,
    pub interval: usize,
}

#[derive(Debug, Clone)]
pub struct WaveformJob {
    pub slot: IntervalSlot,
    pub request: WaveformRequest,
    pub path: PathBuf,
    pub estimated_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct MetadataJob {
    pub station: StationId,
    pub request: MetadataRequest,
    pub path: PathBuf,
}

/// Final status of one artifact and the bytes written for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome<S> {
    pub slot: S,
    pub status: Status,
    pub bytes: u64,
}

impl<S> JobOutcome<S> {
    fn failed(slot: S) -> Self {
        Self { slot, status: Status::DownloadFailed, bytes: 0 }
    }

    fn downloaded(slot: S, bytes: u64) -> Self {
        Self { slot, status: Status::Downloaded, bytes }
    }
}

/// Run waveform chunks with at most `threads` in flight
pub async fn download_chunks(
    client: &dyn ProviderClient,
    chunks: Vec<Vec<WaveformJob>>,
    threads: usize,
    metrics: &DownloadMetrics,
    progress: Option<&ProgressCallback>,
) -> Vec<JobOutcome<IntervalSlot>> {
    debug!("{}: running {} chunk(s) with {} thread(s)", client.name(), chunks.len(), threads);

    stream::iter(chunks.into_iter().enumerate())
        .map(|(index, chunk)| download_chunk(client, index + 1, chunk, metrics, progress))
        .buffer_unordered(threads.max(1))
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .flatten()
        .collect()
}

async fn download_chunk(
    client: &dyn ProviderClient,
    chunk_number: usize,
    jobs: Vec<WaveformJob>,
    metrics: &DownloadMetrics,
    progress: Option<&ProgressCallback>,
) -> Vec<JobOutcome<IntervalSlot>> {
    let provider = client.name().to_string();
    let requests: Vec<WaveformRequest> = jobs.iter().map(|job| job.request.clone()).collect();
    let estimated_bytes = jobs.iter().map(|job| job.estimated_bytes).sum();

    metrics.record_chunk_started();
    emit(progress, AcquisitionEvent::ChunkStarted {
        provider: provider.clone(),
        chunk: chunk_number,
        requests: requests.len(),
        estimated_bytes,
    });

    let outcomes = match client.get_waveforms_bulk(&requests).await {
        Ok(mut payloads) => {
            payloads.resize(jobs.len(), None);
            let mut outcomes = Vec::with_capacity(jobs.len());
            for (job, payload) in jobs.into_iter().zip(payloads) {
                outcomes.push(store_waveform(&provider, job, payload, metrics).await);
            }
            outcomes
        }
        Err(e) => {
            let error = DownloadError::ChunkDownloadFailed {
                provider: provider.clone(),
                chunk: chunk_number,
                requests: requests.len(),
                reason: e.to_string(),
            };
            warn!("{}", error);
            metrics.record_chunk_failed();
            jobs.into_iter()
                .map(|job| {
                    metrics.record_waveform_failed();
                    JobOutcome::failed(job.slot)
                })
                .collect()
        }
    };

    let downloaded = outcomes.iter().filter(|o| o.status == Status::Downloaded).count();
    emit(progress, AcquisitionEvent::ChunkComplete {
        provider,
        chunk: chunk_number,
        downloaded,
        failed: outcomes.len() - downloaded,
    });
    outcomes
}

async fn store_waveform(
    provider: &str,
    job: WaveformJob,
    payload: Option<Vec<u8>>,
    metrics: &DownloadMetrics,
) -> JobOutcome<IntervalSlot> {
    let Some(data) = payload.filter(|data| !data.is_empty()) else {
        debug!("{}: no data for {}", provider, job.request);
        metrics.record_waveform_failed();
        return JobOutcome::failed(job.slot);
    };
    match write_artifact(&job.path, &data).await {
        Ok(bytes) => {
            metrics.record_waveform_downloaded(bytes);
            JobOutcome::downloaded(job.slot, bytes)
        }
        Err(e) => {
            warn!("{}: could not store {}: {}", provider, job.request, e);
            metrics.record_waveform_failed();
            JobOutcome::failed(job.slot)
        }
    }
}

/// Fetch one metadata document per station with at most `threads` in flight
pub async fn download_metadata(
    client: &dyn ProviderClient,
    jobs: Vec<MetadataJob>,
    threads: usize,
    metrics: &DownloadMetrics,
    progress: Option<&ProgressCallback>,
) -> Vec<JobOutcome<StationId>> {
    let provider = client.name().to_string();
    let outcomes: Vec<JobOutcome<StationId>> = stream::iter(jobs)
        .map(|job| {
            let provider = provider.as_str();
            async move {
                let data = match client.get_station_metadata(&job.request).await {
                    Ok(data) if !data.is_empty() => data,
                    Ok(_) | Err(DownloadError::NoData { .. }) => {
                        debug!("{}: no metadata for {}", provider, job.station);
                        metrics.record_metadata_failed();
                        return JobOutcome::failed(job.station);
                    }
                    Err(e) => {
                        warn!("{}: metadata request for {} failed: {}", provider, job.station, e);
                        metrics.record_metadata_failed();
                        return JobOutcome::failed(job.station);
                    }
                };
                match write_artifact(&job.path, &data).await {
                    Ok(bytes) => {
                        metrics.record_metadata_downloaded(bytes);
                        JobOutcome::downloaded(job.station, bytes)
                    }
                    Err(e) => {
                        warn!("{}: could not store metadata of {}: {}", provider, job.station, e);
                        metrics.record_metadata_failed();
                        JobOutcome::failed(job.station)
                    }
                }
            }
        })
        .buffer_unordered(threads.max(1))
        .collect()
        .await;

    let downloaded = outcomes.iter().filter(|o| o.status == Status::Downloaded).count();
    emit(progress, AcquisitionEvent::MetadataComplete {
        provider,
        downloaded,
        failed: outcomes.len() - downloaded,
    });
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_five_six_megabyte_requests_fill_two_chunks() {
        let chunks = plan_chunks(vec![6 * MB; 5], |size| *size, 20 * MB);
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 2]);
    }

    #[test]
    fn test_oversized_request_gets_its_own_chunk() {
        let chunks = plan_chunks(vec![1, 50, 1, 1], |size| *size, 10);
        assert_eq!(chunks, vec![vec![1], vec![50], vec![1, 1]]);
        assert!(plan_chunks(Vec::<u64>::new(), |size| *size, 10).is_empty());
    }

    #[test]
    fn test_chunks_respect_budget_and_keep_everything() {
        let items: Vec<u64> = (1..=40).map(|i| (i * 7919) % 13 + 1).collect();
        let chunks = plan_chunks(items.clone(), |size| *size, 20);
        for chunk in &chunks {
            let total: u64 = chunk.iter().sum();
            assert!(total <= 20 || chunk.len() == 1);
        }
        let flattened: Vec<u64> = chunks.into_iter().flatten().collect();
        assert_eq!(flattened, items);
    }

    #[test]
    fn test_size_estimate() {
        assert_eq!(band_sample_rate("BHZ"), 80.0);
        assert_eq!(band_sample_rate("XYZ"), 250.0);
        // 1 Hz for one hour: 3600 samples, 4 bytes each, compressed by 3
        assert_eq!(estimate_waveform_size("LHZ", TimeDelta::hours(1)), 4800);
        assert_eq!(estimate_waveform_size("QHZ", TimeDelta::seconds(1)), 1);
    }
}
