//! Main entry point of the mass downloader
//!
//! The call chain flows as follows:
//!
//! User Code
//! ↓
//! MassDownloader (this file)
//! ↓
//! ProviderRegistry (registry.rs)
//! ↓
//! ClientDownloadHelper (helper.rs), one per provider, in priority order
//! ↓
//! batch:: chunk planning and transfers (batch/mod.rs)
//! ↓
//! ProviderClient implementations (sources/*)

use crate::downloader::{
    config::DownloadConfig,
    core::{emit, AcquisitionEvent, ProgressCallback, Result},
    domain::{Domain, Restrictions},
    helper::{ClientDownloadHelper, RunContext},
    registry::ProviderRegistry,
    report::DownloadReport,
    sources::{FdsnConnector, ProviderConnector},
    storage::Storage,
};
use std::sync::Arc;
use tracing::{info, info_span, Instrument};

/// Result of a run: the report plus every provider's final working set
#[derive(Debug)]
pub struct DownloadOutcome {
    pub report: DownloadReport,
    pub helpers: Vec<ClientDownloadHelper>,
}

/// Downloads waveforms and station metadata from several providers
///
/// Providers are processed one after another in priority order. Each one
/// only acquires what earlier providers did not already deliver.
pub struct MassDownloader {
    registry: ProviderRegistry,
    config: DownloadConfig,
}

impl MassDownloader {
    /// Initialize FDSN providers by catalog name or base URL
    ///
    /// `None` uses every catalog provider in default order.
    pub async fn new(
        providers: Option<Vec<String>>,
        config: DownloadConfig,
        progress: Option<ProgressCallback>,
    ) -> Result<Self> {
        config.validate()?;
        let connector = FdsnConnector::new(&config)?;
        Ok(Self::with_connector(providers, &connector, config, progress).await)
    }

    /// Initialize providers through a custom connector
    pub async fn with_connector(
        providers: Option<Vec<String>>,
        connector: &dyn ProviderConnector,
        config: DownloadConfig,
        progress: Option<ProgressCallback>,
    ) -> Self {
        let registry =
            ProviderRegistry::initialize(providers, connector, config.init_timeout, progress.as_ref()).await;
        Self { registry, config }
    }

    /// Use an already built registry
    pub fn with_registry(registry: ProviderRegistry, config: DownloadConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Acquire everything matching `domain` and `restrictions`
    ///
    /// Only invalid input and storage that cannot be prepared fail the run.
    /// Provider and chunk failures shrink the result instead.
    pub async fn download(
        &self,
        domain: Domain,
        restrictions: Restrictions,
        waveform_storage: Storage,
        metadata_storage: Storage,
        progress: Option<ProgressCallback>,
    ) -> Result<DownloadOutcome> {
        self.config.validate()?;
        domain.validate()?;
        restrictions.validate()?;
        waveform_storage.prepare().await?;
        metadata_storage.prepare().await?;

        let context = RunContext {
            domain: Arc::new(domain),
            restrictions: Arc::new(restrictions),
            waveform_storage: Arc::new(waveform_storage),
            metadata_storage: Arc::new(metadata_storage),
            query_timeout: self.config.query_timeout,
            progress: progress.clone(),
        };

        let mut helpers: Vec<ClientDownloadHelper> = Vec::with_capacity(self.registry.len());
        for provider in self.registry.iter() {
            let acquired: usize = helpers.iter().map(ClientDownloadHelper::stations_with_data).sum();
            info!(
                "Total acquired or preexisting stations: {}. Requesting data from client '{}'.",
                acquired, provider.name
            );

            let mut helper = ClientDownloadHelper::new(provider.clone(), context.clone());
            let span = info_span!("provider", name = %provider.name);
            self.process_provider(&mut helper, &helpers).instrument(span).await;
            helpers.push(helper);
        }

        let report = DownloadReport::collect(&helpers).await;
        if self.config.print_report {
            report.log();
        }
        emit(progress.as_ref(), AcquisitionEvent::RunFinished {
            providers: helpers.len(),
            downloaded_bytes: report.total_downloaded_bytes,
        });

        Ok(DownloadOutcome { report, helpers })
    }

    async fn process_provider(&self, helper: &mut ClientDownloadHelper, existing: &[ClientDownloadHelper]) {
        helper.get_availability().await;
        if helper.is_empty() {
            info!("Client '{}' - No data available.", helper.name());
            return;
        }

        helper.discard_stations(existing);
        if helper.is_empty() {
            info!("Client '{}' - No new data available after discarding already downloaded data.", helper.name());
            return;
        }

        let reliable = helper.is_availability_reliable();
        if reliable {
            helper.filter_by_minimum_distance(existing).await;
            if helper.is_empty() {
                info!("Client '{}' - No new data available after filtering by distance.", helper.name());
                return;
            }
        }

        info!("Client '{}' - Will attempt to download data from {} stations.", helper.name(), helper.len());

        helper.prepare_waveform_download();
        helper
            .download_waveforms(self.config.chunk_size_bytes(), self.config.threads_per_client)
            .await;

        helper.prepare_metadata_download();
        helper.download_metadata(self.config.threads_per_client).await;

        if helper.sanitize_enabled() {
            helper.sanitize().await;
        }

        // Unreliable availability, filter on what actually arrived
        if !reliable {
            helper.filter_by_minimum_distance(existing).await;
        }
    }
}
