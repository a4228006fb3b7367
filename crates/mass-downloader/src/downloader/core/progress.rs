//! Progress tracking and reporting for acquisition runs
//!
//! A run reports through an injected sink rather than a process-wide logger.
//! The sink is created by the caller for one run; the orchestrator emits
//! [`AcquisitionEvent::RunFinished`] last, which reporters treat as a flush.

use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Progress callback for acquisition runs
pub type ProgressCallback = Arc<dyn Fn(AcquisitionEvent) + Send + Sync>;

/// Events emitted during an acquisition run
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionEvent {
    ProviderInitialized {
        provider: String,
        services: Vec<String>,
    },
    ProviderRejected {
        provider: String,
        reason: String,
    },
    AvailabilityReceived {
        provider: String,
        stations: usize,
        channels: usize,
    },
    StationsFiltered {
        provider: String,
        stage: FilterStage,
        removed: usize,
        remaining: usize,
    },
    ChunkStarted {
        provider: String,
        chunk: usize,
        requests: usize,
        estimated_bytes: u64,
    },
    ChunkComplete {
        provider: String,
        chunk: usize,
        downloaded: usize,
        failed: usize,
    },
    MetadataComplete {
        provider: String,
        downloaded: usize,
        failed: usize,
    },
    Warning {
        provider: String,
        message: String,
    },
    RunFinished {
        providers: usize,
        downloaded_bytes: u64,
    },
}

/// Which pipeline step removed stations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStage {
    AlreadyClaimed,
    MinimumDistance,
    Sanitize,
}

impl std::fmt::Display for FilterStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterStage::AlreadyClaimed => write!(f, "already claimed by an earlier provider"),
            FilterStage::MinimumDistance => write!(f, "minimum inter-station distance"),
            FilterStage::Sanitize => write!(f, "sanitation"),
        }
    }
}

/// Send an event to an optional callback
pub fn emit(progress: Option<&ProgressCallback>, event: AcquisitionEvent) {
    if let Some(callback) = progress {
        callback(event);
    }
}

/// Trait for progress reporting with more granular control
pub trait ProgressReporter: Send + Sync {
    fn on_provider_initialized(&self, _provider: &str, _services: &[String]) {}
    fn on_provider_rejected(&self, _provider: &str, _reason: &str) {}
    fn on_availability(&self, _provider: &str, _stations: usize, _channels: usize) {}
    fn on_stations_filtered(&self, _provider: &str, _stage: FilterStage, _removed: usize, _remaining: usize) {}
    fn on_chunk_started(&self, _provider: &str, _chunk: usize, _requests: usize, _estimated_bytes: u64) {}
    fn on_chunk_complete(&self, _provider: &str, _chunk: usize, _downloaded: usize, _failed: usize) {}
    fn on_metadata_complete(&self, _provider: &str, _downloaded: usize, _failed: usize) {}
    fn on_warning(&self, _provider: &str, _message: &str) {}
    /// End of the run; buffered output must be written out here
    fn flush(&self, _providers: usize, _downloaded_bytes: u64) {}
}

/// Extension trait to convert ProgressReporter to ProgressCallback
pub trait IntoProgressCallback {
    fn into_callback(self) -> ProgressCallback;
}

impl<T: ProgressReporter + 'static> IntoProgressCallback for T {
    fn into_callback(self) -> ProgressCallback {
        Arc::new(move |event| match event {
            AcquisitionEvent::ProviderInitialized { provider, services } => {
                self.on_provider_initialized(&provider, &services);
            }
            AcquisitionEvent::ProviderRejected { provider, reason } => {
                self.on_provider_rejected(&provider, &reason);
            }
            AcquisitionEvent::AvailabilityReceived { provider, stations, channels } => {
                self.on_availability(&provider, stations, channels);
            }
            AcquisitionEvent::StationsFiltered { provider, stage, removed, remaining } => {
                self.on_stations_filtered(&provider, stage, removed, remaining);
            }
            AcquisitionEvent::ChunkStarted { provider, chunk, requests, estimated_bytes } => {
                self.on_chunk_started(&provider, chunk, requests, estimated_bytes);
            }
            AcquisitionEvent::ChunkComplete { provider, chunk, downloaded, failed } => {
                self.on_chunk_complete(&provider, chunk, downloaded, failed);
            }
            AcquisitionEvent::MetadataComplete { provider, downloaded, failed } => {
                self.on_metadata_complete(&provider, downloaded, failed);
            }
            AcquisitionEvent::Warning { provider, message } => {
                self.on_warning(&provider, &message);
            }
            AcquisitionEvent::RunFinished { providers, downloaded_bytes } => {
                self.flush(providers, downloaded_bytes);
            }
        })
    }
}

/// Reporter forwarding events to `tracing`
#[derive(Debug, Default)]
pub struct TracingProgressReporter {
    pub verbose: bool,
}

impl TracingProgressReporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for TracingProgressReporter {
    fn on_provider_initialized(&self, provider: &str, services: &[String]) {
        debug!(provider, services = %services.join(","), "Provider initialized");
    }

    fn on_provider_rejected(&self, provider: &str, reason: &str) {
        warn!(provider, reason, "Provider rejected");
    }

    fn on_availability(&self, provider: &str, stations: usize, channels: usize) {
        info!(provider, stations, channels, "Availability received");
    }

    fn on_stations_filtered(&self, provider: &str, stage: FilterStage, removed: usize, remaining: usize) {
        if removed > 0 || self.verbose {
            info!(provider, %stage, removed, remaining, "Stations filtered");
        }
    }

    fn on_chunk_started(&self, provider: &str, chunk: usize, requests: usize, estimated_bytes: u64) {
        if self.verbose {
            debug!(provider, chunk, requests, estimated_bytes, "Chunk started");
        }
    }

    fn on_chunk_complete(&self, provider: &str, chunk: usize, downloaded: usize, failed: usize) {
        if self.verbose || failed > 0 {
            info!(provider, chunk, downloaded, failed, "Chunk complete");
        }
    }

    fn on_metadata_complete(&self, provider: &str, downloaded: usize, failed: usize) {
        info!(provider, downloaded, failed, "Station metadata complete");
    }

    fn on_warning(&self, provider: &str, message: &str) {
        warn!(provider, "{}", message);
    }

    fn flush(&self, providers: usize, downloaded_bytes: u64) {
        info!(providers, downloaded_bytes, "Acquisition run finished");
    }
}

/// Null progress reporter that does nothing
#[derive(Debug, Default)]
pub struct NullProgressReporter;

impl ProgressReporter for NullProgressReporter {}

/// Reporter that keeps every event in memory, handy for tests and UIs polling state
#[derive(Debug, Default, Clone)]
pub struct RecordingProgressReporter {
    events: Arc<Mutex<Vec<AcquisitionEvent>>>,
}

impl RecordingProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callback sharing this recorder's event buffer
    pub fn callback(&self) -> ProgressCallback {
        let events = self.events.clone();
        Arc::new(move |event| {
            if let Ok(mut guard) = events.lock() {
                guard.push(event);
            }
        })
    }

    pub fn events(&self) -> Vec<AcquisitionEvent> {
        self.events.lock().map(|guard| guard.clone()).unwrap_or_default()
    }
}

/// Composite progress reporter that forwards events to multiple reporters
pub struct CompositeProgressReporter {
    reporters: Vec<Box<dyn ProgressReporter>>,
}

impl std::fmt::Debug for CompositeProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeProgressReporter")
            .field("reporters_count", &self.reporters.len())
            .finish()
    }
}

impl CompositeProgressReporter {
    pub fn new() -> Self {
        Self { reporters: Vec::new() }
    }

    pub fn add_reporter<R: ProgressReporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }
}

impl Default for CompositeProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for CompositeProgressReporter {
    fn on_provider_initialized(&self, provider: &str, services: &[String]) {
        for reporter in &self.reporters {
            reporter.on_provider_initialized(provider, services);
        }
    }

    fn on_provider_rejected(&self, provider: &str, reason: &str) {
        for reporter in &self.reporters {
            reporter.on_provider_rejected(provider, reason);
        }
    }

    fn on_availability(&self, provider: &str, stations: usize, channels: usize) {
        for reporter in &self.reporters {
            reporter.on_availability(provider, stations, channels);
        }
    }

    fn on_stations_filtered(&self, provider: &str, stage: FilterStage, removed: usize, remaining: usize) {
        for reporter in &self.reporters {
            reporter.on_stations_filtered(provider, stage, removed, remaining);
        }
    }

    fn on_chunk_started(&self, provider: &str, chunk: usize, requests: usize, estimated_bytes: u64) {
        for reporter in &self.reporters {
            reporter.on_chunk_started(provider, chunk, requests, estimated_bytes);
        }
    }

    fn on_chunk_complete(&self, provider: &str, chunk: usize, downloaded: usize, failed: usize) {
        for reporter in &self.reporters {
            reporter.on_chunk_complete(provider, chunk, downloaded, failed);
        }
    }

    fn on_metadata_complete(&self, provider: &str, downloaded: usize, failed: usize) {
        for reporter in &self.reporters {
            reporter.on_metadata_complete(provider, downloaded, failed);
        }
    }

    fn on_warning(&self, provider: &str, message: &str) {
        for reporter in &self.reporters {
            reporter.on_warning(provider, message);
        }
    }

    fn flush(&self, providers: usize, downloaded_bytes: u64) {
        for reporter in &self.reporters {
            reporter.flush(providers, downloaded_bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingReporter {
        warnings: Arc<AtomicUsize>,
        flushes: Arc<AtomicUsize>,
    }

    impl ProgressReporter for CountingReporter {
        fn on_warning(&self, _provider: &str, _message: &str) {
            self.warnings.fetch_add(1, Ordering::SeqCst);
        }

        fn flush(&self, _providers: usize, _downloaded_bytes: u64) {
            self.flushes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_composite_forwards_and_flushes() {
        let warnings = Arc::new(AtomicUsize::new(0));
        let flushes = Arc::new(AtomicUsize::new(0));
        let reporter = CompositeProgressReporter::new()
            .add_reporter(CountingReporter { warnings: warnings.clone(), flushes: flushes.clone() })
            .add_reporter(CountingReporter { warnings: warnings.clone(), flushes: flushes.clone() })
            .add_reporter(NullProgressReporter);
        let callback = reporter.into_callback();

        callback(AcquisitionEvent::Warning { provider: "IRIS".into(), message: "slow".into() });
        callback(AcquisitionEvent::RunFinished { providers: 1, downloaded_bytes: 0 });

        assert_eq!(warnings.load(Ordering::SeqCst), 2);
        assert_eq!(flushes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_recording_reporter_keeps_order() {
        let recorder = RecordingProgressReporter::new();
        let callback = recorder.callback();
        emit(Some(&callback), AcquisitionEvent::MetadataComplete { provider: "A".into(), downloaded: 1, failed: 0 });
        emit(None, AcquisitionEvent::MetadataComplete { provider: "B".into(), downloaded: 1, failed: 0 });
        emit(Some(&callback), AcquisitionEvent::RunFinished { providers: 1, downloaded_bytes: 10 });

        let events = recorder.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], AcquisitionEvent::RunFinished { downloaded_bytes: 10, .. }));
    }
}
