//! FDSN web service client over HTTP
//!
//! Availability comes from the station service in `format=text` (one pipe
//! separated line per channel epoch). Waveform and StationXML bodies are
//! passed through unparsed.

use crate::downloader::config::DownloadConfig;
use crate::downloader::core::{DownloadError, Result};
use crate::downloader::sources::{
    ChannelRecord, MetadataRequest, ProviderClient, ProviderConnector, StationQuery, WaveformRequest, catalog_url,
    format_fdsn_time, SERVICE_AVAILABILITY, SERVICE_DATASELECT, SERVICE_EVENT, SERVICE_MATCHTIMESERIES,
    SERVICE_STATION, URL_MAPPINGS,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use reqwest::{Client, StatusCode};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info_span, Instrument};

const KNOWN_SERVICES: &[&str] = &[SERVICE_DATASELECT, SERVICE_STATION, SERVICE_EVENT, SERVICE_AVAILABILITY];

/// Client of one FDSN data center
///
/// Uses the default `get_waveforms_bulk`, so a planned chunk is sent as
/// sequential single dataselect queries rather than one bulk POST.
#[derive(Debug, Clone)]
pub struct FdsnClient {
    name: String,
    base_url: String,
    http: Client,
    services: BTreeSet<String>,
}

impl FdsnClient {
    /// Client with an explicit service set, no discovery
    pub fn new<N: Into<String>, U: Into<String>>(name: N, base_url: U, http: Client) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            services: BTreeSet::new(),
        }
    }

    pub fn with_services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.services = services.into_iter().map(Into::into).collect();
        self
    }

    /// Create a client and discover its services from their WADL documents
    pub async fn connect<N: Into<String>, U: Into<String>>(name: N, base_url: U, http: Client) -> Result<Self> {
        let mut client = Self::new(name, base_url, http);
        let span = info_span!("discover_services", provider = %client.name);
        client.services = client.discover_services().instrument(span).await?;
        Ok(client)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn service_url(&self, service: &str, method: &str) -> String {
        format!("{}/fdsnws/{}/1/{}", self.base_url, service, method)
    }

    async fn discover_services(&self) -> Result<BTreeSet<String>> {
        let lookups = KNOWN_SERVICES.iter().map(|service| self.discover_service(service));

        let mut services = BTreeSet::new();
        for lookup in futures::future::join_all(lookups).await {
            services.extend(lookup.map_err(|e| DownloadError::ProviderUnavailable {
                provider: self.name.clone(),
                reason: e.to_string(),
            })?);
        }
        debug!("{} offers {:?}", self.name, services);
        Ok(services)
    }

    /// Services found behind one WADL document, empty if it is missing
    async fn discover_service(&self, service: &str) -> Result<Vec<String>> {
        let url = self.service_url(service, "application.wadl");
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            debug!("{} does not offer '{}' ({})", self.name, service, response.status());
            return Ok(Vec::new());
        }
        let mut found = vec![service.to_string()];
        if service == SERVICE_STATION {
            let wadl = response.text().await?;
            if wadl.contains(SERVICE_MATCHTIMESERIES) {
                found.push(SERVICE_MATCHTIMESERIES.to_string());
            }
        }
        Ok(found)
    }

    /// GET a service endpoint; `None` when the service reports no data
    async fn fetch(&self, url: &str, params: &[(String, String)]) -> Result<Option<Vec<u8>>> {
        let response = self.http.get(url).query(params).send().await?;
        let status = response.status();
        if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                url: response.url().to_string(),
                status: status.as_u16(),
            });
        }
        Ok(Some(response.bytes().await?.to_vec()))
    }
}

#[async_trait]
impl ProviderClient for FdsnClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn services(&self) -> &BTreeSet<String> {
        &self.services
    }

    async fn get_stations(&self, query: &StationQuery) -> Result<Vec<ChannelRecord>> {
        let mut params = query.query_parameters();
        params.push(("level".to_string(), "channel".to_string()));
        params.push(("format".to_string(), "text".to_string()));

        let url = self.service_url(SERVICE_STATION, "query");
        match self.fetch(&url, &params).await? {
            Some(body) => Ok(parse_channel_text(&String::from_utf8_lossy(&body))),
            None => Ok(Vec::new()),
        }
    }

    async fn get_waveforms(&self, request: &WaveformRequest) -> Result<Vec<u8>> {
        let params = vec![
            ("network".to_string(), request.network.clone()),
            ("station".to_string(), request.station.clone()),
            ("location".to_string(), location_parameter(&request.location)),
            ("channel".to_string(), request.channel.clone()),
            ("starttime".to_string(), format_fdsn_time(&request.start)),
            ("endtime".to_string(), format_fdsn_time(&request.end)),
        ];
        let url = self.service_url(SERVICE_DATASELECT, "query");
        self.fetch(&url, &params).await?.ok_or_else(|| DownloadError::NoData {
            provider: self.name.clone(),
            request: request.to_string(),
        })
    }

    async fn get_station_metadata(&self, request: &MetadataRequest) -> Result<Vec<u8>> {
        let locations: BTreeSet<String> = request.channels.iter().map(|(loc, _)| location_parameter(loc)).collect();
        let channels: BTreeSet<&str> = request.channels.iter().map(|(_, cha)| cha.as_str()).collect();
        let params = vec![
            ("network".to_string(), request.network.clone()),
            ("station".to_string(), request.station.clone()),
            ("location".to_string(), locations.into_iter().collect::<Vec<_>>().join(",")),
            ("channel".to_string(), channels.into_iter().collect::<Vec<_>>().join(",")),
            ("starttime".to_string(), format_fdsn_time(&request.start)),
            ("endtime".to_string(), format_fdsn_time(&request.end)),
            ("level".to_string(), "response".to_string()),
        ];
        let url = self.service_url(SERVICE_STATION, "query");
        self.fetch(&url, &params).await?.ok_or_else(|| DownloadError::NoData {
            provider: self.name.clone(),
            request: format!("{}.{} metadata", request.network, request.station),
        })
    }
}

/// Connects catalog names and base URLs to [`FdsnClient`]s
#[derive(Debug, Clone)]
pub struct FdsnConnector {
    http: Client,
}

impl FdsnConnector {
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl ProviderConnector for FdsnConnector {
    async fn connect(&self, provider: &str) -> Result<Arc<dyn ProviderClient>> {
        let base_url = if provider.starts_with("http://") || provider.starts_with("https://") {
            url::Url::parse(provider).map_err(|source| DownloadError::InvalidUrl {
                url: provider.to_string(),
                suggestion: "Provider URLs must be absolute base URLs like http://service.iris.edu".to_string(),
                source,
            })?;
            provider.to_string()
        } else {
            catalog_url(provider)
                .ok_or_else(|| DownloadError::ProviderUnavailable {
                    provider: provider.to_string(),
                    reason: format!(
                        "unknown provider, known are: {}",
                        URL_MAPPINGS.keys().copied().collect::<Vec<_>>().join(", ")
                    ),
                })?
                .to_string()
        };

        let client = FdsnClient::connect(provider, base_url, self.http.clone()).await?;
        Ok(Arc::new(client))
    }
}

/// Empty location codes travel as `--`
fn location_parameter(location: &str) -> String {
    if location.is_empty() { "--".to_string() } else { location.to_string() }
}

/// Parse a channel level `format=text` station response
pub fn parse_channel_text(body: &str) -> Vec<ChannelRecord> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let record = parse_channel_line(line);
            if record.is_none() {
                debug!("Skipping malformed station line: {}", line);
            }
            record
        })
        .collect()
}

fn parse_channel_line(line: &str) -> Option<ChannelRecord> {
    let fields: Vec<&str> = line.split('|').map(str::trim).collect();
    if fields.len() < 6 {
        return None;
    }
    Some(ChannelRecord {
        network: fields[0].to_string(),
        station: fields[1].to_string(),
        location: fields[2].trim_matches('-').to_string(),
        channel: fields[3].to_string(),
        latitude: fields[4].parse().ok()?,
        longitude: fields[5].parse().ok()?,
        sample_rate: fields.get(14).and_then(|v| v.parse().ok()),
        start: fields.get(15).and_then(|v| parse_fdsn_time(v)),
        end: fields.get(16).and_then(|v| parse_fdsn_time(v)),
    })
}

fn parse_fdsn_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim().trim_end_matches('Z');
    if value.is_empty() {
        return None;
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const STATION_TEXT: &str = "\
#Network | Station | Location | Channel | Latitude | Longitude | Elevation | Depth | Azimuth | Dip | SensorDescription | Scale | ScaleFreq | ScaleUnits | SampleRate | StartTime | EndTime
IU|ANMO|00|BHZ|34.9459|-106.4572|1850.0|100.0|0.0|-90.0|STS-6A|1.0|0.02|M/S|40.0|2018-07-09T20:45:00.0000|
IU|ANMO||LHZ|34.9459|-106.4572|1850.0|100.0|0.0|-90.0|STS-6A|1.0|0.02|M/S|1.0|2018-07-09T20:45:00|2599-12-31T23:59:59
broken line
";

    fn http() -> Client {
        Client::new()
    }

    #[test]
    fn test_parse_channel_text() {
        let records = parse_channel_text(STATION_TEXT);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].channel, "BHZ");
        assert_eq!(records[0].sample_rate, Some(40.0));
        assert!(records[0].end.is_none());
        assert_eq!(records[1].location, "");
        assert_eq!(records[1].start, Some(Utc.with_ymd_and_hms(2018, 7, 9, 20, 45, 0).unwrap()));
    }

    #[tokio::test]
    async fn test_connect_discovers_services() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fdsnws/station/1/application.wadl"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<param name=\"matchtimeseries\"/>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fdsnws/dataselect/1/application.wadl"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<application/>"))
            .mount(&server)
            .await;

        let client = FdsnClient::connect("TEST", server.uri(), http()).await.unwrap();

        assert!(client.supports(SERVICE_STATION));
        assert!(client.supports(SERVICE_DATASELECT));
        assert!(client.supports(SERVICE_MATCHTIMESERIES));
        assert!(!client.supports(SERVICE_EVENT));
    }

    #[tokio::test]
    async fn test_get_stations_and_no_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fdsnws/station/1/query"))
            .and(query_param("network", "IU"))
            .and(query_param("level", "channel"))
            .and(query_param("format", "text"))
            .respond_with(ResponseTemplate::new(200).set_body_string(STATION_TEXT))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fdsnws/station/1/query"))
            .and(query_param("network", "XX"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = FdsnClient::new("TEST", server.uri(), http()).with_services([SERVICE_STATION]);
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let restrictions = crate::downloader::domain::Restrictions::new(start, start + chrono::TimeDelta::hours(1));

        let query = StationQuery::new(&crate::downloader::domain::Domain::Global, &restrictions.clone().with_network("IU"), false);
        assert_eq!(client.get_stations(&query).await.unwrap().len(), 2);

        let query = StationQuery::new(&crate::downloader::domain::Domain::Global, &restrictions.with_network("XX"), false);
        assert!(client.get_stations(&query).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_waveform_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fdsnws/dataselect/1/query"))
            .and(query_param("station", "ANMO"))
            .and(query_param("location", "--"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"MSEED".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fdsnws/dataselect/1/query"))
            .and(query_param("station", "EMPTY"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fdsnws/dataselect/1/query"))
            .and(query_param("station", "BROKEN"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = FdsnClient::new("TEST", server.uri(), http());
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let request = |station: &str| WaveformRequest {
            network: "IU".to_string(),
            station: station.to_string(),
            location: String::new(),
            channel: "BHZ".to_string(),
            start,
            end: start + chrono::TimeDelta::minutes(10),
        };

        assert_eq!(client.get_waveforms(&request("ANMO")).await.unwrap(), b"MSEED".to_vec());
        assert!(matches!(client.get_waveforms(&request("EMPTY")).await, Err(DownloadError::NoData { .. })));
        let err = client.get_waveforms(&request("BROKEN")).await.unwrap_err();
        assert!(matches!(err, DownloadError::HttpStatus { status: 503, .. }));
        assert!(err.is_recoverable());

        let bulk = client
            .get_waveforms_bulk(&[request("ANMO"), request("EMPTY")])
            .await
            .unwrap();
        assert_eq!(bulk, vec![Some(b"MSEED".to_vec()), None]);
    }

    #[tokio::test]
    async fn test_bulk_chunk_is_sent_as_single_queries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fdsnws/dataselect/1/query"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"MSEED".to_vec()))
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/fdsnws/dataselect/1/query"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = FdsnClient::new("TEST", server.uri(), http());
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let requests: Vec<_> = ["BHZ", "BHN", "BHE"]
            .iter()
            .map(|channel| WaveformRequest {
                network: "IU".to_string(),
                station: "ANMO".to_string(),
                location: "00".to_string(),
                channel: channel.to_string(),
                start,
                end: start + chrono::TimeDelta::minutes(10),
            })
            .collect();

        let bulk = client.get_waveforms_bulk(&requests).await.unwrap();
        assert_eq!(bulk.len(), 3);
        server.verify().await;
    }

    #[tokio::test]
    async fn test_unknown_provider_is_unavailable() {
        let connector = FdsnConnector::new(&DownloadConfig::default()).unwrap();
        let result = connector.connect("NOT_A_PROVIDER").await;
        assert!(matches!(result, Err(DownloadError::ProviderUnavailable { .. })));
    }
}
