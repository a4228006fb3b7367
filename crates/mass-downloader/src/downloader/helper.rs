//! Per-provider acquisition state
//!
//! A [`ClientDownloadHelper`] owns the working set of one provider for one
//! run: the stations, channels and time intervals it offers for the query,
//! and the status of every artifact derived from them. The orchestrator
//! drives it step by step and hands the finished helpers of earlier
//! providers to later ones for deduplication.

use crate::downloader::batch::{
    self, estimate_waveform_size, plan_chunks, DownloadMetrics, DownloadMetricsSnapshot, IntervalSlot, MetadataJob,
    WaveformJob,
};
use crate::downloader::core::files::remove_artifact;
use crate::downloader::core::{
    emit, AcquisitionEvent, Channel, DownloadError, FilterStage, ProgressCallback, Station, StationId, Status,
    TimeInterval,
};
use crate::downloader::domain::{select_by_priority, Domain, Restrictions};
use crate::downloader::registry::Provider;
use crate::downloader::sources::{
    ChannelRecord, MetadataRequest, ProviderClient, StationQuery, WaveformRequest, SERVICE_AVAILABILITY,
    SERVICE_MATCHTIMESERIES,
};
use crate::downloader::spatial::{filter_by_minimum_distance, SiteCoordinates};
use crate::downloader::storage::{ArtifactKey, Resolution, Storage};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Inputs shared read-only by every helper of a run
#[derive(Clone)]
pub struct RunContext {
    pub domain: Arc<Domain>,
    pub restrictions: Arc<Restrictions>,
    pub waveform_storage: Arc<Storage>,
    pub metadata_storage: Arc<Storage>,
    pub query_timeout: Duration,
    pub progress: Option<ProgressCallback>,
}

pub struct ClientDownloadHelper {
    provider: Provider,
    context: RunContext,
    stations: BTreeMap<StationId, Station>,
    metrics: DownloadMetrics,
}

impl std::fmt::Debug for ClientDownloadHelper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientDownloadHelper")
            .field("provider", &self.provider.name)
            .field("stations", &self.stations.len())
            .finish()
    }
}

impl ClientDownloadHelper {
    pub fn new(provider: Provider, context: RunContext) -> Self {
        Self {
            provider,
            context,
            stations: BTreeMap::new(),
            metrics: DownloadMetrics::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.provider.name
    }

    fn client(&self) -> &dyn ProviderClient {
        self.provider.client.as_ref()
    }

    /// Every station seen, ignored ones included
    pub fn stations(&self) -> &BTreeMap<StationId, Station> {
        &self.stations
    }

    pub fn station(&self, id: &StationId) -> Option<&Station> {
        self.stations.get(id)
    }

    /// Stations still taking part in the run
    pub fn active_stations(&self) -> impl Iterator<Item = &Station> {
        self.stations.values().filter(|s| !s.is_ignored())
    }

    /// Number of stations that are not ignored
    pub fn len(&self) -> usize {
        self.active_stations().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> DownloadMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Whether the provider's availability can be used to filter before downloading
    pub fn is_availability_reliable(&self) -> bool {
        self.context.restrictions.trust_availability
            && (self.client().supports(SERVICE_MATCHTIMESERIES) || self.client().supports(SERVICE_AVAILABILITY))
    }

    pub fn sanitize_enabled(&self) -> bool {
        self.context.restrictions.sanitize
    }

    fn warn(&self, message: String) {
        warn!("Client '{}' - {}", self.name(), message);
        emit(self.context.progress.as_ref(), AcquisitionEvent::Warning {
            provider: self.name().to_string(),
            message,
        });
    }

    fn report_filtered(&self, stage: FilterStage, removed: usize) {
        emit(self.context.progress.as_ref(), AcquisitionEvent::StationsFiltered {
            provider: self.name().to_string(),
            stage,
            removed,
            remaining: self.len(),
        });
    }

    /// Build the working set from the provider's station service
    ///
    /// A failing or timed out query leaves the working set empty.
    pub async fn get_availability(&mut self) {
        let query = StationQuery::new(
            &self.context.domain,
            &self.context.restrictions,
            self.client().supports(SERVICE_MATCHTIMESERIES),
        );

        let outcome = tokio::time::timeout(self.context.query_timeout, self.client().get_stations(&query)).await;
        let records = match outcome {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => {
                let error = DownloadError::AvailabilityQueryFailed {
                    provider: self.name().to_string(),
                    reason: e.to_string(),
                };
                self.warn(error.to_string());
                Vec::new()
            }
            Err(_) => {
                let error = DownloadError::AvailabilityQueryFailed {
                    provider: self.name().to_string(),
                    reason: format!("timeout after {}s", self.context.query_timeout.as_secs()),
                };
                self.warn(error.to_string());
                Vec::new()
            }
        };

        self.build_working_set(records);

        let channels: usize = self.stations.values().map(|s| s.channels.len()).sum();
        info!(
            "Client '{}' - Found {} stations ({} channels).",
            self.name(),
            self.stations.len(),
            channels
        );
        emit(self.context.progress.as_ref(), AcquisitionEvent::AvailabilityReceived {
            provider: self.name().to_string(),
            stations: self.stations.len(),
            channels,
        });
    }

    fn build_working_set(&mut self, records: Vec<ChannelRecord>) {
        let restrictions = &self.context.restrictions;
        let mut grouped: BTreeMap<StationId, (f64, f64, BTreeMap<(String, String), Option<f64>>)> = BTreeMap::new();

        for record in records {
            if !self.context.domain.contains(record.latitude, record.longitude) {
                continue;
            }
            if let (Some(minimum), Some(rate)) = (restrictions.minimum_sample_rate, record.sample_rate) {
                if rate < minimum {
                    continue;
                }
            }
            // Epochs entirely outside the requested window
            if record.start.is_some_and(|start| start >= restrictions.endtime)
                || record.end.is_some_and(|end| end <= restrictions.starttime)
            {
                continue;
            }
            let entry = grouped
                .entry(StationId::new(&record.network, &record.station))
                .or_insert_with(|| (record.latitude, record.longitude, BTreeMap::new()));
            entry.2.entry((record.location, record.channel)).or_insert(record.sample_rate);
        }

        let channel_priorities = restrictions.effective_channel_priorities();
        let location_priorities = restrictions.effective_location_priorities();
        let spans = restrictions.time_intervals();

        self.stations.clear();
        for (id, (latitude, longitude, channels)) in grouped {
            let candidates: Vec<((String, String), Option<f64>)> = channels.into_iter().collect();
            let candidates = select_by_priority(candidates, |((_, code), _)| code.as_str(), &channel_priorities);
            let candidates = select_by_priority(candidates, |((location, _), _)| location.as_str(), &location_priorities);
            if candidates.is_empty() {
                continue;
            }

            let mut station = Station::new(id.network.clone(), id.station.clone(), latitude, longitude);
            for ((location, code), sample_rate) in candidates {
                let mut channel = Channel::new(location, code);
                channel.sample_rate = sample_rate;
                channel.intervals = spans.iter().map(|(start, end)| TimeInterval::new(*start, *end)).collect();
                station.channels.push(channel);
            }
            self.stations.insert(id, station);
        }
    }

    /// Ignore stations already claimed by an earlier provider
    pub fn discard_stations(&mut self, existing: &[ClientDownloadHelper]) -> usize {
        let claimed: Vec<StationId> = self
            .active_stations()
            .map(Station::id)
            .filter(|id| {
                existing
                    .iter()
                    .any(|helper| helper.station(id).is_some_and(|station| !station.is_ignored()))
            })
            .collect();

        for id in &claimed {
            if let Some(station) = self.stations.get_mut(id) {
                station.ignore();
            }
        }
        if !claimed.is_empty() {
            info!(
                "Client '{}' - {} station(s) have already been acquired. Will not be downloaded again.",
                self.name(),
                claimed.len()
            );
        }
        self.report_filtered(FilterStage::AlreadyClaimed, claimed.len());
        claimed.len()
    }

    /// Ignore stations too close to an accepted one
    ///
    /// Stations of `existing` helpers count as accepted. Files this run
    /// already wrote for a rejected station are deleted.
    pub async fn filter_by_minimum_distance(&mut self, existing: &[ClientDownloadHelper]) -> usize {
        let minimum = self.context.restrictions.minimum_interstation_distance_in_m;
        let accepted: Vec<SiteCoordinates> = existing
            .iter()
            .flat_map(ClientDownloadHelper::active_stations)
            .map(|s| SiteCoordinates::new(s.id(), s.latitude, s.longitude))
            .collect();
        let candidates: Vec<SiteCoordinates> = self
            .active_stations()
            .map(|s| SiteCoordinates::new(s.id(), s.latitude, s.longitude))
            .collect();

        let outcome = filter_by_minimum_distance(&accepted, candidates, minimum);

        let mut files = Vec::new();
        for id in &outcome.rejected {
            if let Some(station) = self.stations.get_mut(id) {
                files.extend(station.downloaded_files());
                station.ignore();
            }
        }
        self.remove_files(files).await;

        if !outcome.rejected.is_empty() {
            info!(
                "Client '{}' - {} station(s) removed by the minimum inter-station distance of {} m.",
                self.name(),
                outcome.rejected.len(),
                minimum
            );
        }
        self.report_filtered(FilterStage::MinimumDistance, outcome.rejected.len());
        outcome.rejected.len()
    }

    /// Resolve a storage location for every undecided interval
    pub fn prepare_waveform_download(&mut self) {
        let storage = Arc::clone(&self.context.waveform_storage);
        for station in self.stations.values_mut().filter(|s| !s.is_ignored()) {
            for channel in &mut station.channels {
                for interval in channel.intervals.iter_mut().filter(|ti| ti.status == Status::None) {
                    let key = ArtifactKey::Waveform {
                        network: station.network.clone(),
                        station: station.station.clone(),
                        location: channel.location.clone(),
                        channel: channel.channel.clone(),
                        start: interval.start,
                        end: interval.end,
                    };
                    match storage.resolve(&key) {
                        Resolution::Download(path) => interval.filename = Some(path),
                        Resolution::Exists(path) => {
                            interval.filename = path;
                            interval.status.transition(Status::Exists);
                        }
                        Resolution::Ignore => {
                            interval.status.transition(Status::Ignore);
                        }
                    }
                }
            }
        }

        let counts = self.interval_status_counts();
        debug!("Client '{}' - Interval status before downloading: {:?}", self.name(), counts);
        info!(
            "Client '{}' - {} interval(s) already exist, {} need to be downloaded.",
            self.name(),
            counts.get(&Status::Exists).copied().unwrap_or(0),
            self.pending_intervals()
        );
    }

    fn pending_intervals(&self) -> usize {
        self.active_stations()
            .flat_map(|s| s.channels.iter())
            .flat_map(|c| c.intervals.iter())
            .filter(|ti| ti.is_pending())
            .count()
    }

    /// Count of intervals per status, ignored stations included
    pub fn interval_status_counts(&self) -> BTreeMap<Status, usize> {
        let mut counts = BTreeMap::new();
        for interval in self.stations.values().flat_map(|s| s.channels.iter()).flat_map(|c| c.intervals.iter()) {
            *counts.entry(interval.status).or_insert(0) += 1;
        }
        counts
    }

    /// Fetch every pending interval in chunks of at most `budget` estimated bytes
    pub async fn download_waveforms(&mut self, budget: u64, threads: usize) {

        let mut jobs = Vec::new();
        for (id, station) in self.stations.iter().filter(|(_, s)| !s.is_ignored()) {
            for (channel_index, channel) in station.channels.iter().enumerate() {
                for (interval_index, interval) in channel.intervals.iter().enumerate() {
                    if !interval.is_pending() {
                        continue;
                    }
                    let Some(path) = interval.filename.clone() else { continue };
                    jobs.push(WaveformJob {
                        slot: IntervalSlot {
                            station: id.clone(),
                            channel: channel_index,
                            interval: interval_index,
                        },
                        request: WaveformRequest {
                            network: station.network.clone(),
                            station: station.station.clone(),
                            location: channel.location.clone(),
                            channel: channel.channel.clone(),
                            start: interval.start,
                            end: interval.end,
                        },
                        path,
                        estimated_bytes: estimate_waveform_size(&channel.channel, interval.end - interval.start),
                    });
                }
            }
        }
        if jobs.is_empty() {
            return;
        }

        let total = jobs.len();
        let chunks = plan_chunks(jobs, |job| job.estimated_bytes, budget);
        info!(
            "Client '{}' - Requesting {} interval(s) in {} chunk(s).",
            self.name(),
            total,
            chunks.len()
        );

        let outcomes = batch::download_chunks(
            self.provider.client.as_ref(),
            chunks,
            threads,
            &self.metrics,
            self.context.progress.as_ref(),
        )
        .await;

        let mut downloaded = 0;
        for outcome in outcomes {
            if outcome.status == Status::Downloaded {
                downloaded += 1;
            }
            let slot = outcome.slot;
            if let Some(interval) = self
                .stations
                .get_mut(&slot.station)
                .and_then(|s| s.channels.get_mut(slot.channel))
                .and_then(|c| c.intervals.get_mut(slot.interval))
            {
                interval.status.transition(outcome.status);
            }
        }
        info!(
            "Client '{}' - Successfully downloaded {} of {} interval(s).",
            self.name(),
            downloaded,
            total
        );
    }

    /// Resolve metadata locations for stations holding waveform data
    ///
    /// Stations without any data are ignored so a later provider may serve them.
    pub fn prepare_metadata_download(&mut self) {
        let storage = Arc::clone(&self.context.metadata_storage);
        let mut without_data = 0;
        for station in self.stations.values_mut().filter(|s| !s.is_ignored()) {
            if !station.has_existing_or_downloaded_intervals() {
                station.ignore();
                without_data += 1;
                continue;
            }
            if station.metadata_status != Status::None {
                continue;
            }
            let key = ArtifactKey::Metadata {
                network: station.network.clone(),
                station: station.station.clone(),
            };
            match storage.resolve(&key) {
                Resolution::Download(path) => station.metadata_filename = Some(path),
                Resolution::Exists(path) => {
                    station.metadata_filename = path;
                    station.metadata_status.transition(Status::Exists);
                }
                // Left undecided and without a target, so it is never fetched
                Resolution::Ignore => {}
            }
        }
        if without_data > 0 {
            debug!("Client '{}' - {} station(s) without any waveform data.", self.name(), without_data);
        }
    }

    /// Fetch the metadata document of every station with a pending target
    pub async fn download_metadata(&mut self, threads: usize) {
        let restrictions = &self.context.restrictions;
        let jobs: Vec<MetadataJob> = self
            .active_stations()
            .filter(|s| s.metadata_status == Status::None)
            .filter_map(|station| {
                let path = station.metadata_filename.clone()?;
                let channels = station
                    .channels
                    .iter()
                    .filter(|c| c.has_existing_or_downloaded_intervals())
                    .map(|c| (c.location.clone(), c.channel.clone()))
                    .collect();
                Some(MetadataJob {
                    station: station.id(),
                    request: MetadataRequest {
                        network: station.network.clone(),
                        station: station.station.clone(),
                        channels,
                        start: restrictions.starttime,
                        end: restrictions.endtime,
                    },
                    path,
                })
            })
            .collect();
        if jobs.is_empty() {
            return;
        }

        let total = jobs.len();
        let outcomes = batch::download_metadata(
            self.provider.client.as_ref(),
            jobs,
            threads,
            &self.metrics,
            self.context.progress.as_ref(),
        )
        .await;

        let mut downloaded = 0;
        for outcome in outcomes {
            if outcome.status == Status::Downloaded {
                downloaded += 1;
            }
            if let Some(station) = self.stations.get_mut(&outcome.slot) {
                station.metadata_status.transition(outcome.status);
            }
        }
        info!(
            "Client '{}' - Successfully downloaded {} of {} StationXML file(s).",
            self.name(),
            downloaded,
            total
        );
    }

    /// Drop waveforms without metadata and metadata without waveforms
    pub async fn sanitize(&mut self) -> usize {
        let mut files = Vec::new();
        let mut removed = 0;
        for station in self.stations.values_mut().filter(|s| !s.is_ignored()) {
            let has_metadata = station.metadata_status.has_data();
            let has_waveforms = station.has_existing_or_downloaded_intervals();
            if has_metadata && has_waveforms {
                continue;
            }
            files.extend(station.downloaded_files());
            station.ignore();
            removed += 1;
        }
        self.remove_files(files).await;

        if removed > 0 {
            info!(
                "Client '{}' - Removed {} station(s) lacking either waveforms or station metadata.",
                self.name(),
                removed
            );
        }
        self.report_filtered(FilterStage::Sanitize, removed);
        removed
    }

    async fn remove_files(&self, files: Vec<PathBuf>) {
        for path in files {
            if let Err(e) = remove_artifact(&path).await {
                self.warn(format!("could not remove {}: {}", path.display(), e));
            }
        }
    }

    /// Waveform files with the given status
    pub fn waveform_files(&self, status: Status) -> Vec<PathBuf> {
        self.stations
            .values()
            .flat_map(|s| s.channels.iter())
            .flat_map(|c| c.intervals.iter())
            .filter(|ti| ti.status == status)
            .filter_map(|ti| ti.filename.clone())
            .collect()
    }

    /// Metadata files with the given status
    pub fn metadata_files(&self, status: Status) -> Vec<PathBuf> {
        self.stations
            .values()
            .filter(|s| s.metadata_status == status)
            .filter_map(|s| s.metadata_filename.clone())
            .collect()
    }

    /// Stations for which this run wrote at least one file
    pub fn acquired_station_count(&self) -> usize {
        self.active_stations().filter(|s| !s.downloaded_files().is_empty()).count()
    }

    /// Stations holding waveform data, whether fetched now or earlier
    pub fn stations_with_data(&self) -> usize {
        self.active_stations().filter(|s| s.has_existing_or_downloaded_intervals()).count()
    }
}
