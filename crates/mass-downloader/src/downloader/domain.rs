//! Query constraints: the spatial domain and the non-spatial restrictions
//!
//! Both are immutable inputs shared read-only by every provider of a run.
//! [`Domain::validate`] and [`Restrictions::validate`] run before any network
//! activity and are the only source of `Configuration` errors for a query.

use crate::downloader::core::{DownloadError, Result};
use crate::downloader::spatial;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Channel preference when no explicit channel is requested
pub const DEFAULT_CHANNEL_PRIORITIES: &[&str] = &[
    "HH[ZNE12]", "BH[ZNE12]", "MH[ZNE12]", "EH[ZNE12]", "LH[ZNE12]", "HL[ZNE12]",
    "BL[ZNE12]", "ML[ZNE12]", "EL[ZNE12]", "LL[ZNE12]", "SH[ZNE12]",
];

/// Location preference when no explicit location is requested
pub const DEFAULT_LOCATION_PRIORITIES: &[&str] = &[
    "", "00", "10", "01", "20", "02", "30", "03", "40", "04", "50", "05", "60", "06", "70", "07",
    "80", "08", "90", "09",
];

/// Geographic selection of a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Domain {
    /// Everything a provider has
    Global,
    /// Latitude/longitude box, in degrees
    Rectangular {
        min_latitude: f64,
        max_latitude: f64,
        min_longitude: f64,
        max_longitude: f64,
    },
    /// Ring around a point; radii are great-circle distances in degrees
    Circular {
        latitude: f64,
        longitude: f64,
        min_radius: f64,
        max_radius: f64,
    },
}

impl Domain {
    /// FDSN station service parameters describing this domain
    pub fn query_parameters(&self) -> Vec<(&'static str, String)> {
        match *self {
            Domain::Global => Vec::new(),
            Domain::Rectangular { min_latitude, max_latitude, min_longitude, max_longitude } => vec![
                ("minlatitude", min_latitude.to_string()),
                ("maxlatitude", max_latitude.to_string()),
                ("minlongitude", min_longitude.to_string()),
                ("maxlongitude", max_longitude.to_string()),
            ],
            Domain::Circular { latitude, longitude, min_radius, max_radius } => vec![
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("minradius", min_radius.to_string()),
                ("maxradius", max_radius.to_string()),
            ],
        }
    }

    /// Whether a coordinate lies inside the domain
    ///
    /// Providers are asked with [`Domain::query_parameters`] already, this
    /// check guards against endpoints that ignore some of them.
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        match *self {
            Domain::Global => true,
            Domain::Rectangular { min_latitude, max_latitude, min_longitude, max_longitude } => {
                (min_latitude..=max_latitude).contains(&latitude)
                    && (min_longitude..=max_longitude).contains(&longitude)
            }
            Domain::Circular { latitude: lat, longitude: lon, min_radius, max_radius } => {
                let distance = spatial::angular_distance_deg(lat, lon, latitude, longitude);
                (min_radius..=max_radius).contains(&distance)
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            Domain::Global => Ok(()),
            Domain::Rectangular { min_latitude, max_latitude, min_longitude, max_longitude } => {
                check_latitude(min_latitude, "min_latitude")?;
                check_latitude(max_latitude, "max_latitude")?;
                check_longitude(min_longitude, "min_longitude")?;
                check_longitude(max_longitude, "max_longitude")?;
                if min_latitude >= max_latitude {
                    return Err(DownloadError::configuration(
                        "min_latitude must be smaller than max_latitude",
                        "min_latitude",
                    ));
                }
                if min_longitude >= max_longitude {
                    return Err(DownloadError::configuration(
                        "min_longitude must be smaller than max_longitude",
                        "min_longitude",
                    ));
                }
                Ok(())
            }
            Domain::Circular { latitude, longitude, min_radius, max_radius } => {
                check_latitude(latitude, "latitude")?;
                check_longitude(longitude, "longitude")?;
                if !(0.0..=180.0).contains(&min_radius) || !(0.0..=180.0).contains(&max_radius) {
                    return Err(DownloadError::configuration(
                        "radii must be within 0 and 180 degrees",
                        "max_radius",
                    ));
                }
                if min_radius >= max_radius {
                    return Err(DownloadError::configuration(
                        "min_radius must be smaller than max_radius",
                        "min_radius",
                    ));
                }
                Ok(())
            }
        }
    }
}

fn check_latitude(value: f64, field: &str) -> Result<()> {
    if (-90.0..=90.0).contains(&value) {
        Ok(())
    } else {
        Err(DownloadError::configuration(format!("{field} {value} is outside [-90, 90]"), field))
    }
}

fn check_longitude(value: f64, field: &str) -> Result<()> {
    if (-180.0..=180.0).contains(&value) {
        Ok(())
    } else {
        Err(DownloadError::configuration(format!("{field} {value} is outside [-180, 180]"), field))
    }
}

/// Non-spatial constraints of a query
#[derive(Debug, Clone, PartialEq)]
pub struct Restrictions {
    pub starttime: DateTime<Utc>,
    pub endtime: DateTime<Utc>,
    /// Split the requested span into pieces of this length
    pub chunk_length: Option<TimeDelta>,
    /// FDSN patterns (`*`, `?`, comma separated lists)
    pub network: Option<String>,
    pub station: Option<String>,
    pub location: Option<String>,
    pub channel: Option<String>,
    pub minimum_sample_rate: Option<f64>,
    /// `None` means [`DEFAULT_CHANNEL_PRIORITIES`]
    pub channel_priorities: Option<Vec<String>>,
    /// `None` means [`DEFAULT_LOCATION_PRIORITIES`]
    pub location_priorities: Option<Vec<String>>,
    pub minimum_interstation_distance_in_m: f64,
    /// Drop waveforms without metadata and metadata without waveforms
    pub sanitize: bool,
    /// Allow provider availability information to be used for pre-download filtering
    pub trust_availability: bool,
}

impl Restrictions {
    pub fn new(starttime: DateTime<Utc>, endtime: DateTime<Utc>) -> Self {
        Self {
            starttime,
            endtime,
            chunk_length: None,
            network: None,
            station: None,
            location: None,
            channel: None,
            minimum_sample_rate: None,
            channel_priorities: None,
            location_priorities: None,
            minimum_interstation_distance_in_m: 1000.0,
            sanitize: true,
            trust_availability: true,
        }
    }

    pub fn with_chunk_length(mut self, chunk_length: TimeDelta) -> Self {
        self.chunk_length = Some(chunk_length);
        self
    }

    pub fn with_network<S: Into<String>>(mut self, network: S) -> Self {
        self.network = Some(network.into());
        self
    }

    pub fn with_station<S: Into<String>>(mut self, station: S) -> Self {
        self.station = Some(station.into());
        self
    }

    pub fn with_location<S: Into<String>>(mut self, location: S) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_channel<S: Into<String>>(mut self, channel: S) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_minimum_sample_rate(mut self, rate: f64) -> Self {
        self.minimum_sample_rate = Some(rate);
        self
    }

    pub fn with_channel_priorities<I, S>(mut self, priorities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channel_priorities = Some(priorities.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_location_priorities<I, S>(mut self, priorities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.location_priorities = Some(priorities.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_minimum_interstation_distance_in_m(mut self, distance: f64) -> Self {
        self.minimum_interstation_distance_in_m = distance;
        self
    }

    pub fn with_sanitize(mut self, sanitize: bool) -> Self {
        self.sanitize = sanitize;
        self
    }

    pub fn with_trust_availability(mut self, trust: bool) -> Self {
        self.trust_availability = trust;
        self
    }

    /// Channel patterns in order of preference
    ///
    /// An explicit channel selection already narrows the query, so it accepts
    /// whatever the provider returned.
    pub fn effective_channel_priorities(&self) -> Vec<String> {
        effective_priorities(self.channel.is_some(), self.channel_priorities.as_ref(), DEFAULT_CHANNEL_PRIORITIES)
    }

    /// Location patterns in order of preference
    pub fn effective_location_priorities(&self) -> Vec<String> {
        effective_priorities(self.location.is_some(), self.location_priorities.as_ref(), DEFAULT_LOCATION_PRIORITIES)
    }

    /// The requested span, cut into consecutive pieces of `chunk_length`
    pub fn time_intervals(&self) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        let Some(step) = self.chunk_length else {
            return vec![(self.starttime, self.endtime)];
        };

        let mut intervals = Vec::new();
        let mut current = self.starttime;
        while current < self.endtime {
            let next = (current + step).min(self.endtime);
            intervals.push((current, next));
            current = next;
        }
        intervals
    }

    pub fn validate(&self) -> Result<()> {
        if self.endtime <= self.starttime {
            return Err(DownloadError::Configuration {
                message: format!("endtime {} is not after starttime {}", self.endtime, self.starttime),
                field: Some("endtime".to_string()),
                suggestion: Some("Swap the two times or widen the window".to_string()),
            });
        }
        if let Some(step) = self.chunk_length {
            if step <= TimeDelta::zero() {
                return Err(DownloadError::configuration("chunk length must be positive", "chunk_length"));
            }
        }
        if !self.minimum_interstation_distance_in_m.is_finite() || self.minimum_interstation_distance_in_m < 0.0 {
            return Err(DownloadError::configuration(
                "minimum inter-station distance must be zero or positive",
                "minimum_interstation_distance_in_m",
            ));
        }
        if let Some(rate) = self.minimum_sample_rate {
            if !rate.is_finite() || rate < 0.0 {
                return Err(DownloadError::configuration("minimum sample rate must be zero or positive", "minimum_sample_rate"));
            }
        }
        if self.channel.is_some() && self.channel_priorities.is_some() {
            return Err(DownloadError::Configuration {
                message: "channel and channel_priorities are mutually exclusive".to_string(),
                field: Some("channel_priorities".to_string()),
                suggestion: Some("Either request explicit channels or rank them, not both".to_string()),
            });
        }
        if self.location.is_some() && self.location_priorities.is_some() {
            return Err(DownloadError::Configuration {
                message: "location and location_priorities are mutually exclusive".to_string(),
                field: Some("location_priorities".to_string()),
                suggestion: Some("Either request explicit locations or rank them, not both".to_string()),
            });
        }
        Ok(())
    }
}

fn effective_priorities(explicit_filter: bool, priorities: Option<&Vec<String>>, defaults: &[&str]) -> Vec<String> {
    if explicit_filter {
        return vec!["*".to_string()];
    }
    match priorities {
        Some(list) => list.clone(),
        None => defaults.iter().map(|p| p.to_string()).collect(),
    }
}

/// Keep the items matching the first priority pattern that matches anything
///
/// An empty priority list keeps everything; no match at all keeps nothing.
pub fn select_by_priority<T, F>(items: Vec<T>, key: F, priorities: &[String]) -> Vec<T>
where
    F: Fn(&T) -> &str,
{
    if priorities.is_empty() {
        return items;
    }
    for pattern in priorities {
        if items.iter().any(|item| wildcard_match(pattern, key(item))) {
            return items.into_iter().filter(|item| wildcard_match(pattern, key(item))).collect();
        }
    }
    Vec::new()
}

/// Shell-style matching with `*`, `?` and `[...]` classes (`!`/`^` negates)
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    match_from(&pattern, &text)
}

fn match_from(pattern: &[char], text: &[char]) -> bool {
    let Some((&first, rest)) = pattern.split_first() else {
        return text.is_empty();
    };
    match first {
        '*' => (0..=text.len()).any(|skip| match_from(rest, &text[skip..])),
        '?' => !text.is_empty() && match_from(rest, &text[1..]),
        '[' => match parse_class(rest) {
            Some((class, after)) => {
                !text.is_empty() && class.matches(text[0]) && match_from(after, &text[1..])
            }
            // Unterminated class, treat the bracket literally
            None => text.first() == Some(&'[') && match_from(rest, &text[1..]),
        },
        c => text.first() == Some(&c) && match_from(rest, &text[1..]),
    }
}

struct CharClass {
    negated: bool,
    ranges: Vec<(char, char)>,
}

impl CharClass {
    fn matches(&self, c: char) -> bool {
        self.ranges.iter().any(|&(lo, hi)| lo <= c && c <= hi) != self.negated
    }
}

fn parse_class(pattern: &[char]) -> Option<(CharClass, &[char])> {
    let mut idx = 0;
    let negated = matches!(pattern.first(), Some('!') | Some('^'));
    if negated {
        idx += 1;
    }
    let mut ranges = Vec::new();
    let mut first = true;
    while idx < pattern.len() {
        let c = pattern[idx];
        if c == ']' && !first {
            return Some((CharClass { negated, ranges }, &pattern[idx + 1..]));
        }
        first = false;
        if idx + 2 < pattern.len() && pattern[idx + 1] == '-' && pattern[idx + 2] != ']' {
            ranges.push((c, pattern[idx + 2]));
            idx += 3;
        } else {
            ranges.push((c, c));
            idx += 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_wildcards() {
        assert!(wildcard_match("HH[ZNE12]", "HHZ"));
        assert!(!wildcard_match("HH[ZNE12]", "HHX"));
        assert!(wildcard_match("B?Z", "BHZ"));
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("", ""));
        assert!(!wildcard_match("", "00"));
        assert!(wildcard_match("[!0]0", "10"));
        assert!(!wildcard_match("[!0]0", "00"));
        assert!(wildcard_match("[A-C]H*", "BHN"));
    }

    #[test]
    fn test_priority_picks_first_matching_pattern() {
        let channels = vec!["BHZ", "BHN", "LHZ", "HHZ"];
        let priorities = vec!["HH[ZNE12]".to_string(), "BH[ZNE12]".to_string()];
        let selected = select_by_priority(channels.clone(), |c| *c, &priorities);
        assert_eq!(selected, vec!["HHZ"]);

        let none = select_by_priority(channels, |c| *c, &["SH?".to_string()]);
        assert!(none.is_empty());
    }

    #[test]
    fn test_empty_location_code_ranks_first() {
        let locations = vec!["10", "", "00"];
        let priorities = Restrictions::new(day(1), day(2)).effective_location_priorities();
        assert_eq!(select_by_priority(locations, |l| *l, &priorities), vec![""]);
    }

    #[test]
    fn test_time_intervals_cover_span_without_gaps() {
        let restrictions = Restrictions::new(day(1), day(3) + TimeDelta::hours(12))
            .with_chunk_length(TimeDelta::days(1));
        let intervals = restrictions.time_intervals();
        assert_eq!(intervals.len(), 3);
        assert_eq!(intervals[0].0, day(1));
        assert_eq!(intervals[2].1, day(3) + TimeDelta::hours(12));
        for pair in intervals.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
    }

    #[test]
    fn test_conflicting_filters_are_rejected() {
        let restrictions = Restrictions::new(day(1), day(2))
            .with_channel("BHZ")
            .with_channel_priorities(["HH?"]);
        assert!(matches!(restrictions.validate(), Err(DownloadError::Configuration { .. })));

        let backwards = Restrictions::new(day(2), day(1));
        assert!(backwards.validate().is_err());
    }

    #[test]
    fn test_explicit_channel_disables_priorities() {
        let restrictions = Restrictions::new(day(1), day(2)).with_channel("LHZ");
        assert_eq!(restrictions.effective_channel_priorities(), vec!["*".to_string()]);
        assert!(restrictions.validate().is_ok());
    }

    #[test]
    fn test_domains() {
        let rect = Domain::Rectangular {
            min_latitude: -10.0,
            max_latitude: 10.0,
            min_longitude: 20.0,
            max_longitude: 30.0,
        };
        assert!(rect.validate().is_ok());
        assert!(rect.contains(0.0, 25.0));
        assert!(!rect.contains(0.0, 35.0));
        assert_eq!(rect.query_parameters().len(), 4);

        let ring = Domain::Circular { latitude: 0.0, longitude: 0.0, min_radius: 10.0, max_radius: 20.0 };
        assert!(ring.contains(0.0, 15.0));
        assert!(!ring.contains(0.0, 5.0));

        let broken = Domain::Circular { latitude: 0.0, longitude: 0.0, min_radius: 30.0, max_radius: 20.0 };
        assert!(broken.validate().is_err());
        assert!(Domain::Global.query_parameters().is_empty());
    }
}
