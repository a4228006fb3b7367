//! Minimum inter-station distance filtering
//!
//! Distances are great-circle distances on a sphere with the mean Earth
//! radius (haversine). The filter is greedy: candidates are visited in
//! ascending station id order and each one is kept unless an already kept or
//! previously accepted station lies closer than the minimum. Decisions are
//! never revisited, so for two conflicting stations the lower id always wins.

use crate::downloader::core::StationId;

/// Mean Earth radius (IUGG), in meters
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Central angle between two points, in radians
fn central_angle(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * a.sqrt().min(1.0).asin()
}

/// Great-circle distance in degrees of arc
pub fn angular_distance_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    central_angle(lat1, lon1, lat2, lon2).to_degrees()
}

/// Great-circle distance in meters
pub fn great_circle_distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    central_angle(lat1, lon1, lat2, lon2) * EARTH_RADIUS_M
}

/// A station position taking part in the filter
#[derive(Debug, Clone, PartialEq)]
pub struct SiteCoordinates {
    pub id: StationId,
    pub latitude: f64,
    pub longitude: f64,
}

impl SiteCoordinates {
    pub fn new(id: StationId, latitude: f64, longitude: f64) -> Self {
        Self { id, latitude, longitude }
    }

    fn distance_m(&self, other: &SiteCoordinates) -> f64 {
        great_circle_distance_m(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistanceFilterOutcome {
    pub kept: Vec<StationId>,
    pub rejected: Vec<StationId>,
}

/// Greedily thin out `candidates` so no two kept stations are closer than
/// `minimum_distance_m`, treating every `accepted` station as already kept
pub fn filter_by_minimum_distance(
    accepted: &[SiteCoordinates],
    mut candidates: Vec<SiteCoordinates>,
    minimum_distance_m: f64,
) -> DistanceFilterOutcome {
    candidates.sort_by(|a, b| a.id.cmp(&b.id));

    if minimum_distance_m <= 0.0 {
        return DistanceFilterOutcome {
            kept: candidates.into_iter().map(|c| c.id).collect(),
            rejected: Vec::new(),
        };
    }

    let mut retained: Vec<SiteCoordinates> = accepted.to_vec();
    let mut outcome = DistanceFilterOutcome::default();

    for candidate in candidates {
        let too_close = retained
            .iter()
            .any(|kept| kept.distance_m(&candidate) < minimum_distance_m);
        if too_close {
            outcome.rejected.push(candidate.id);
        } else {
            outcome.kept.push(candidate.id.clone());
            retained.push(candidate);
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(sta: &str, lat: f64, lon: f64) -> SiteCoordinates {
        SiteCoordinates::new(StationId::new("XX", sta), lat, lon)
    }

    #[test]
    fn test_distance_of_a_millidegree_on_the_equator() {
        let d = great_circle_distance_m(0.0, 0.0, 0.0, 0.001);
        assert!((d - 111.19).abs() < 0.1, "got {d}");
        assert!((angular_distance_deg(0.0, 0.0, 0.0, 90.0) - 90.0).abs() < 1e-9);
        assert_eq!(great_circle_distance_m(10.0, 10.0, 10.0, 10.0), 0.0);
    }

    #[test]
    fn test_lower_id_wins_regardless_of_input_order() {
        let candidates = vec![site("B", 0.0, 0.001), site("A", 0.0, 0.0)];
        let outcome = filter_by_minimum_distance(&[], candidates, 1000.0);
        assert_eq!(outcome.kept, vec![StationId::new("XX", "A")]);
        assert_eq!(outcome.rejected, vec![StationId::new("XX", "B")]);
    }

    #[test]
    fn test_previously_accepted_stations_block_candidates() {
        let accepted = vec![site("Z", 0.0, 0.0)];
        let candidates = vec![site("A", 0.0, 0.005), site("B", 10.0, 10.0)];
        let outcome = filter_by_minimum_distance(&accepted, candidates, 1000.0);
        assert_eq!(outcome.kept, vec![StationId::new("XX", "B")]);
        assert_eq!(outcome.rejected, vec![StationId::new("XX", "A")]);
    }

    #[test]
    fn test_zero_distance_disables_filter() {
        let candidates = vec![site("A", 0.0, 0.0), site("B", 0.0, 0.0)];
        let outcome = filter_by_minimum_distance(&[], candidates, 0.0);
        assert_eq!(outcome.kept.len(), 2);
    }

    #[test]
    fn test_kept_pairs_respect_minimum_and_rejected_have_close_neighbour() {
        // A line of stations 600 m apart, minimum 1000 m
        let step = 600.0 / EARTH_RADIUS_M;
        let candidates: Vec<SiteCoordinates> = (0..10)
            .map(|i| site(&format!("S{i:02}"), 0.0, (i as f64 * step).to_degrees()))
            .collect();
        let by_id = candidates.clone();
        let outcome = filter_by_minimum_distance(&[], candidates, 1000.0);

        let find = |id: &StationId| by_id.iter().find(|s| &s.id == id).unwrap().clone();
        let kept: Vec<SiteCoordinates> = outcome.kept.iter().map(find).collect();
        for (i, a) in kept.iter().enumerate() {
            for b in &kept[i + 1..] {
                assert!(a.distance_m(b) >= 1000.0);
            }
        }
        for rejected in outcome.rejected.iter().map(find) {
            assert!(kept.iter().any(|k| k.distance_m(&rejected) < 1000.0 && k.id < rejected.id));
        }
        assert_eq!(outcome.kept.len() + outcome.rejected.len(), 10);
    }
}
