//! Provider clients
//!
//! A provider is reached through a [`ProviderClient`], which advertises the
//! web services it offers as a set of names and performs the actual
//! requests. The registry only talks to a [`ProviderConnector`] that turns a
//! provider identifier into a client, so tests and alternative transports can
//! plug in without touching the orchestration.

pub mod fdsn;

pub use fdsn::{FdsnClient, FdsnConnector};

use crate::downloader::core::{DownloadError, Result};
use crate::downloader::domain::{Domain, Restrictions};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

pub const SERVICE_DATASELECT: &str = "dataselect";
pub const SERVICE_STATION: &str = "station";
pub const SERVICE_EVENT: &str = "event";
pub const SERVICE_AVAILABILITY: &str = "availability";
/// Station service option restricting results to channels with actual data
pub const SERVICE_MATCHTIMESERIES: &str = "matchtimeseries";

/// Services a provider must offer to take part in a run
pub const REQUIRED_SERVICES: &[&str] = &[SERVICE_DATASELECT, SERVICE_STATION];

/// Known providers and their base URLs
pub static URL_MAPPINGS: Lazy<BTreeMap<&'static str, &'static str>> = Lazy::new(|| {
    BTreeMap::from([
        ("BGR", "http://eida.bgr.de"),
        ("EMSC", "http://www.seismicportal.eu"),
        ("ETH", "http://eida.ethz.ch"),
        ("GFZ", "http://geofon.gfz-potsdam.de"),
        ("ICGC", "http://ws.icgc.cat"),
        ("INGV", "http://webservices.ingv.it"),
        ("IPGP", "http://eida.ipgp.fr"),
        ("IRIS", "http://service.iris.edu"),
        ("ISC", "http://isc-mirror.iris.washington.edu"),
        ("KOERI", "http://eida.koeri.boun.edu.tr"),
        ("LMU", "http://erde.geophysik.uni-muenchen.de"),
        ("NCEDC", "http://service.ncedc.org"),
        ("NIEP", "http://eida-sc3.infp.ro"),
        ("ODC", "http://www.orfeus-eu.org"),
        ("ORFEUS", "http://www.orfeus-eu.org"),
        ("RESIF", "http://ws.resif.fr"),
        ("SCEDC", "http://service.scedc.caltech.edu"),
        ("USGS", "http://earthquake.usgs.gov"),
        ("USP", "http://sismo.iag.usp.br"),
    ])
});

/// Look up a catalog entry, ignoring case
pub fn catalog_url(provider: &str) -> Option<&'static str> {
    let key = provider.to_ascii_uppercase();
    URL_MAPPINGS.get(key.as_str()).copied()
}

/// One waveform segment to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveformRequest {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl fmt::Display for WaveformRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{} [{} - {}]",
            self.network, self.station, self.location, self.channel, self.start, self.end
        )
    }
}

/// Channel level availability query
#[derive(Debug, Clone, PartialEq)]
pub struct StationQuery {
    pub network: Option<String>,
    pub station: Option<String>,
    pub location: Option<String>,
    pub channel: Option<String>,
    pub starttime: DateTime<Utc>,
    pub endtime: DateTime<Utc>,
    pub domain: Domain,
    /// Ask the provider to only report channels with data in the window
    pub match_timeseries: bool,
}

impl StationQuery {
    pub fn new(domain: &Domain, restrictions: &Restrictions, match_timeseries: bool) -> Self {
        Self {
            network: restrictions.network.clone(),
            station: restrictions.station.clone(),
            location: restrictions.location.clone(),
            channel: restrictions.channel.clone(),
            starttime: restrictions.starttime,
            endtime: restrictions.endtime,
            domain: domain.clone(),
            match_timeseries,
        }
    }

    /// FDSN station service parameters, without output format options
    pub fn query_parameters(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        let optional = [
            ("network", &self.network),
            ("station", &self.station),
            ("location", &self.location),
            ("channel", &self.channel),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                params.push((name.to_string(), value.clone()));
            }
        }
        params.push(("starttime".to_string(), format_fdsn_time(&self.starttime)));
        params.push(("endtime".to_string(), format_fdsn_time(&self.endtime)));
        params.extend(
            self.domain
                .query_parameters()
                .into_iter()
                .map(|(name, value)| (name.to_string(), value)),
        );
        if self.match_timeseries {
            params.push(("matchtimeseries".to_string(), "true".to_string()));
        }
        params
    }
}

/// One channel epoch as reported by a station service
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRecord {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
    pub latitude: f64,
    pub longitude: f64,
    pub sample_rate: Option<f64>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Station metadata for the channels acquired from one station
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRequest {
    pub network: String,
    pub station: String,
    /// `(location, channel)` pairs
    pub channels: Vec<(String, String)>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Client of one provider
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn name(&self) -> &str;

    /// Names of the services the provider offers
    fn services(&self) -> &BTreeSet<String>;

    fn supports(&self, service: &str) -> bool {
        self.services().contains(service)
    }

    /// Channel level availability for a query
    async fn get_stations(&self, query: &StationQuery) -> Result<Vec<ChannelRecord>>;

    /// Raw waveform data of one segment
    ///
    /// Returns [`DownloadError::NoData`] when the provider holds nothing for it.
    async fn get_waveforms(&self, request: &WaveformRequest) -> Result<Vec<u8>>;

    /// Fetch a batch of segments as one unit
    ///
    /// Entries are `None` for segments without data. Any other error fails
    /// the whole batch. The default issues the requests one after another.
    async fn get_waveforms_bulk(&self, requests: &[WaveformRequest]) -> Result<Vec<Option<Vec<u8>>>> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            match self.get_waveforms(request).await {
                Ok(data) if !data.is_empty() => results.push(Some(data)),
                Ok(_) | Err(DownloadError::NoData { .. }) => results.push(None),
                Err(e) => return Err(e),
            }
        }
        Ok(results)
    }

    /// Raw station metadata document
    async fn get_station_metadata(&self, request: &MetadataRequest) -> Result<Vec<u8>>;
}

/// Turns provider identifiers into initialized clients
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    async fn connect(&self, provider: &str) -> Result<Arc<dyn ProviderClient>>;
}

pub(crate) fn format_fdsn_time(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_catalog_lookup_ignores_case() {
        assert_eq!(catalog_url("iris"), Some("http://service.iris.edu"));
        assert_eq!(catalog_url("ORFEUS"), Some("http://www.orfeus-eu.org"));
        assert_eq!(catalog_url("NOPE"), None);
    }

    #[test]
    fn test_station_query_parameters() {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let restrictions = Restrictions::new(start, start + chrono::TimeDelta::hours(1)).with_network("IU");
        let domain = Domain::Circular { latitude: 10.0, longitude: 20.0, min_radius: 0.0, max_radius: 5.0 };

        let params = StationQuery::new(&domain, &restrictions, true).query_parameters();

        assert!(params.contains(&("network".to_string(), "IU".to_string())));
        assert!(params.contains(&("starttime".to_string(), "2020-01-01T00:00:00".to_string())));
        assert!(params.contains(&("maxradius".to_string(), "5".to_string())));
        assert!(params.contains(&("matchtimeseries".to_string(), "true".to_string())));
        assert!(!params.iter().any(|(name, _)| name == "station"));
    }
}
