//! Command line front end of the mass downloader

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use clap::Parser;
use mass_downloader::{
    DownloadConfig, Domain, IntoProgressCallback, MassDownloader, Restrictions, Storage, TracingProgressReporter,
};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Download seismic waveforms and station metadata from several FDSN data centers
#[derive(Debug, Parser)]
#[command(name = "mass-download", version, about)]
struct Cli {
    /// Start of the time window (YYYY-MM-DD or RFC3339)
    #[arg(long, env = "MASS_DOWNLOAD_START")]
    start: String,

    /// End of the time window (YYYY-MM-DD or RFC3339)
    #[arg(long, env = "MASS_DOWNLOAD_END")]
    end: String,

    /// Split the window into pieces of this many seconds
    #[arg(long)]
    chunk_length_secs: Option<i64>,

    /// Providers in priority order, by catalog name or base URL
    #[arg(long, value_delimiter = ',', env = "MASS_DOWNLOAD_PROVIDERS")]
    providers: Option<Vec<String>>,

    // Rectangular domain
    #[arg(long, allow_hyphen_values = true, requires_all = ["max_latitude", "min_longitude", "max_longitude"])]
    min_latitude: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    max_latitude: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    min_longitude: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    max_longitude: Option<f64>,

    // Circular domain, radii in degrees
    #[arg(long, allow_hyphen_values = true, requires_all = ["longitude", "max_radius"], conflicts_with = "min_latitude")]
    latitude: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    longitude: Option<f64>,
    #[arg(long, default_value_t = 0.0)]
    min_radius: f64,
    #[arg(long)]
    max_radius: Option<f64>,

    #[arg(long)]
    network: Option<String>,
    #[arg(long)]
    station: Option<String>,
    #[arg(long)]
    location: Option<String>,
    #[arg(long)]
    channel: Option<String>,

    /// Channel patterns in order of preference
    #[arg(long, value_delimiter = ',', conflicts_with = "channel")]
    channel_priorities: Option<Vec<String>>,

    /// Location patterns in order of preference
    #[arg(long, value_delimiter = ',', conflicts_with = "location")]
    location_priorities: Option<Vec<String>>,

    #[arg(long)]
    minimum_sample_rate: Option<f64>,

    /// Minimum distance between two acquired stations, 0 disables the filter
    #[arg(long, default_value_t = 1000.0)]
    minimum_interstation_distance_m: f64,

    /// Keep waveforms without metadata and metadata without waveforms
    #[arg(long)]
    no_sanitize: bool,

    /// Never filter on provider availability before downloading
    #[arg(long)]
    no_trust_availability: bool,

    /// Waveform directory or path template
    #[arg(long, default_value = "waveforms", env = "MASS_DOWNLOAD_WAVEFORMS")]
    waveforms: String,

    /// StationXML directory or path template
    #[arg(long, default_value = "stations", env = "MASS_DOWNLOAD_STATIONS")]
    stations: String,

    #[arg(long, default_value_t = 20.0)]
    chunk_size_mb: f64,

    #[arg(long, default_value_t = 3)]
    threads_per_client: usize,

    /// Seconds allowed for a provider to initialize
    #[arg(long, default_value_t = 30)]
    init_timeout_secs: u64,

    /// Seconds allowed for an availability query
    #[arg(long, default_value_t = 120)]
    query_timeout_secs: u64,

    /// Do not log the final report
    #[arg(long)]
    no_report: bool,

    /// Print the final report as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Report every chunk and filter step
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn domain(&self) -> Result<Domain> {
        if let (Some(min_latitude), Some(max_latitude), Some(min_longitude), Some(max_longitude)) =
            (self.min_latitude, self.max_latitude, self.min_longitude, self.max_longitude)
        {
            return Ok(Domain::Rectangular { min_latitude, max_latitude, min_longitude, max_longitude });
        }
        if let (Some(latitude), Some(longitude), Some(max_radius)) = (self.latitude, self.longitude, self.max_radius) {
            return Ok(Domain::Circular { latitude, longitude, min_radius: self.min_radius, max_radius });
        }
        if self.max_latitude.is_some() || self.longitude.is_some() || self.max_radius.is_some() {
            bail!("incomplete domain: give all four box bounds or a center with --max-radius");
        }
        Ok(Domain::Global)
    }

    fn restrictions(&self) -> Result<Restrictions> {
        let start = parse_time(&self.start, false).context("invalid --start")?;
        let end = parse_time(&self.end, true).context("invalid --end")?;

        let mut restrictions = Restrictions::new(start, end)
            .with_minimum_interstation_distance_in_m(self.minimum_interstation_distance_m)
            .with_sanitize(!self.no_sanitize)
            .with_trust_availability(!self.no_trust_availability);
        if let Some(secs) = self.chunk_length_secs {
            restrictions = restrictions.with_chunk_length(TimeDelta::seconds(secs));
        }
        if let Some(ref network) = self.network {
            restrictions = restrictions.with_network(network.as_str());
        }
        if let Some(ref station) = self.station {
            restrictions = restrictions.with_station(station.as_str());
        }
        if let Some(ref location) = self.location {
            restrictions = restrictions.with_location(location.as_str());
        }
        if let Some(ref channel) = self.channel {
            restrictions = restrictions.with_channel(channel.as_str());
        }
        if let Some(rate) = self.minimum_sample_rate {
            restrictions = restrictions.with_minimum_sample_rate(rate);
        }
        if let Some(ref priorities) = self.channel_priorities {
            restrictions = restrictions.with_channel_priorities(priorities.iter().cloned());
        }
        if let Some(ref priorities) = self.location_priorities {
            restrictions = restrictions.with_location_priorities(priorities.iter().cloned());
        }
        Ok(restrictions)
    }

    fn config(&self) -> DownloadConfig {
        DownloadConfig::default()
            .with_chunk_size_in_mb(self.chunk_size_mb)
            .with_threads_per_client(self.threads_per_client)
            .with_print_report(!self.no_report)
            .with_init_timeout(Duration::from_secs(self.init_timeout_secs))
            .with_query_timeout(Duration::from_secs(self.query_timeout_secs))
    }
}

/// Date-only input covers the whole day on the end side
fn parse_time(input: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(&format!("{input}Z")) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .with_context(|| format!("'{input}' is neither YYYY-MM-DD nor RFC3339"))?;
    let date = if end_of_day { date.succ_opt().context("date out of range")? } else { date };
    let midnight = date.and_hms_opt(0, 0, 0).context("date out of range")?;
    Ok(midnight.and_utc())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

async fn run(cli: Cli) -> Result<()> {
    let domain = cli.domain()?;
    let restrictions = cli.restrictions()?;
    let config = cli.config();

    let progress = TracingProgressReporter::new(cli.verbose).into_callback();
    let downloader = MassDownloader::new(cli.providers.clone(), config, Some(progress.clone()))
        .await
        .context("failed to set up providers")?;
    if downloader.registry().is_empty() {
        bail!("no provider could be initialized");
    }
    info!("Using providers: {}", downloader.registry().names().join(", "));

    let outcome = downloader
        .download(
            domain,
            restrictions,
            Storage::from_location(cli.waveforms.as_str()),
            Storage::from_location(cli.stations.as_str()),
            Some(progress),
        )
        .await
        .context("download run failed")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&outcome.report)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }
}
