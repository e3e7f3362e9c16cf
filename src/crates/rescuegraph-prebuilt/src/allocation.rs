//! Resource Allocation - Capability and Distance Ranking
//!
//! Matches mobile units to a task. Every candidate gets a capability tier and a
//! great-circle distance to the task, and the ranked list puts full matches first
//! and closer units ahead of farther ones.
//!
//! # Ranking
//!
//! ```text
//!   required = {medical, winch}         task @ (47.61, -122.33)
//!
//!   candidate  declared              tier     distance   rank key
//!   ─────────  ────────────────────  ───────  ─────────  ───────────────
//!   heli-2     {medical, winch}      full       12.4 km  (false, 12.4)
//!   amb-7      {medical, winch, cpr} full       18.0 km  (false, 18.0)
//!   drone-3    {}                    none        0.8 km  (true,   0.8)
//!   boat-1     {winch}               partial     2.1 km  (true,   2.1)
//! ```
//!
//! The sort key is `(tier != full, distance)`. Partial and none candidates share a
//! group and are ordered by distance; exact ties break by tier, then candidate id.
//!
//! # Travel-time refinement
//!
//! Straight-line distance ignores roads and terrain. Once a routing service has
//! estimated travel times, [`refine_with_travel_times`] re-sorts by
//! `(tier != full, travel_time)`. Candidates without an estimate keep their
//! distance and sort after the estimated ones of their group.
//!
//! # Example
//!
//! ```rust
//! use rescuegraph_prebuilt::allocation::{rank_candidates, CapabilityMatch, GeoPoint, ResourceCandidate};
//!
//! let task = GeoPoint::new(0.0, 0.0);
//! let candidates = vec![
//!     ResourceCandidate::new("far", ["rescue"], GeoPoint::new(0.0, 0.09)),
//!     ResourceCandidate::new("near", ["rescue"], GeoPoint::new(0.0, 0.01)),
//! ];
//!
//! let ranked = rank_candidates(&["rescue"], task, &candidates);
//! assert_eq!(ranked[0].candidate_id, "near");
//! assert_eq!(ranked[0].capability_match, CapabilityMatch::Full);
//! ```

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

/// Mean Earth radius in kilometres (IUGG)
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Latitude/longitude in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Great-circle distance between two points in kilometres
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let d_lat = lat2 - lat1;
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// How well a candidate's declared capabilities cover the requirement
///
/// Ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityMatch {
    Full,
    Partial,
    None,
}

impl CapabilityMatch {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityMatch::Full => "full",
            CapabilityMatch::Partial => "partial",
            CapabilityMatch::None => "none",
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, CapabilityMatch::Full)
    }
}

/// Classify `declared` against `required` by set difference
///
/// A candidate declaring nothing is always `None`, even for an empty requirement.
pub fn classify<R, D>(required: &[R], declared: &BTreeSet<D>) -> CapabilityMatch
where
    R: AsRef<str>,
    D: AsRef<str> + Ord,
{
    if declared.is_empty() {
        return CapabilityMatch::None;
    }

    let declared: BTreeSet<&str> = declared.iter().map(AsRef::as_ref).collect();
    let required: BTreeSet<&str> = required.iter().map(AsRef::as_ref).collect();
    let missing = required.difference(&declared).count();

    if missing == 0 {
        CapabilityMatch::Full
    } else if missing < required.len() {
        CapabilityMatch::Partial
    } else {
        CapabilityMatch::None
    }
}

/// A mobile unit that could be assigned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceCandidate {
    pub id: String,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    pub location: GeoPoint,
}

impl ResourceCandidate {
    pub fn new<I, S>(id: impl Into<String>, capabilities: I, location: GeoPoint) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            location,
        }
    }
}

/// Cost a candidate is ordered by within its group
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "basis", content = "value", rename_all = "snake_case")]
pub enum RankMetric {
    /// Routed travel time in seconds
    TravelSecs(f64),
    /// Straight-line distance in kilometres
    DistanceKm(f64),
}

impl RankMetric {
    fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (RankMetric::TravelSecs(a), RankMetric::TravelSecs(b))
            | (RankMetric::DistanceKm(a), RankMetric::DistanceKm(b)) => a.total_cmp(b),
            (RankMetric::TravelSecs(_), RankMetric::DistanceKm(_)) => Ordering::Less,
            (RankMetric::DistanceKm(_), RankMetric::TravelSecs(_)) => Ordering::Greater,
        }
    }
}

/// Sort key of an assignment: `(tier != full, metric)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankKey {
    pub not_full: bool,
    pub metric: RankMetric,
}

impl RankKey {
    pub fn compare(&self, other: &Self) -> Ordering {
        self.not_full
            .cmp(&other.not_full)
            .then_with(|| self.metric.compare(&other.metric))
    }
}

/// A ranked candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub candidate_id: String,
    pub capability_match: CapabilityMatch,
    pub distance_km: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub travel_time_secs: Option<f64>,
    pub location: GeoPoint,
    pub rank_key: RankKey,
}

impl Assignment {
    fn order(&self, other: &Self) -> Ordering {
        self.rank_key
            .compare(&other.rank_key)
            .then_with(|| self.capability_match.cmp(&other.capability_match))
            .then_with(|| self.candidate_id.cmp(&other.candidate_id))
    }
}

/// Score and rank `candidates` for a task at `task_location`
///
/// An empty candidate list gives an empty ranking.
pub fn rank_candidates<R: AsRef<str>>(
    required: &[R],
    task_location: GeoPoint,
    candidates: &[ResourceCandidate],
) -> Vec<Assignment> {
    let mut assignments: Vec<Assignment> = candidates
        .iter()
        .map(|candidate| {
            let capability_match = classify(required, &candidate.capabilities);
            let distance_km = haversine_km(task_location, candidate.location);
            Assignment {
                candidate_id: candidate.id.clone(),
                capability_match,
                distance_km,
                travel_time_secs: None,
                location: candidate.location,
                rank_key: RankKey {
                    not_full: !capability_match.is_full(),
                    metric: RankMetric::DistanceKm(distance_km),
                },
            }
        })
        .collect();

    assignments.sort_by(Assignment::order);
    assignments
}

/// Re-rank with routed travel times, keyed by candidate id
pub fn refine_with_travel_times(
    mut assignments: Vec<Assignment>,
    travel_times: &HashMap<String, f64>,
) -> Vec<Assignment> {
    for assignment in &mut assignments {
        if let Some(&secs) = travel_times.get(&assignment.candidate_id) {
            assignment.travel_time_secs = Some(secs);
            assignment.rank_key.metric = RankMetric::TravelSecs(secs);
        }
    }
    assignments.sort_by(Assignment::order);
    assignments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    /// Point `km` east of the origin along the equator
    fn east(km: f64) -> GeoPoint {
        GeoPoint::new(0.0, (km / EARTH_RADIUS_KM).to_degrees())
    }

    fn order(ranked: &[Assignment]) -> Vec<&str> {
        ranked.iter().map(|a| a.candidate_id.as_str()).collect()
    }

    #[test]
    fn test_haversine_known_distance() {
        // Paris to London, about 343.5 km
        let paris = GeoPoint::new(48.8566, 2.3522);
        let london = GeoPoint::new(51.5074, -0.1278);
        let d = haversine_km(paris, london);
        assert!((d - 343.5).abs() < 1.0, "got {d}");

        assert_eq!(haversine_km(paris, paris), 0.0);
        assert!((haversine_km(east(0.0), east(10.0)) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_classification() {
        let required = ["A", "B"];
        assert_eq!(classify(&required, &caps(&["A", "B", "C"])), CapabilityMatch::Full);
        assert_eq!(classify(&required, &caps(&["A"])), CapabilityMatch::Partial);
        assert_eq!(classify(&required, &caps(&["C"])), CapabilityMatch::None);
        assert_eq!(classify(&required, &caps(&[])), CapabilityMatch::None);
    }

    #[test]
    fn test_empty_requirement() {
        let none: [&str; 0] = [];
        assert_eq!(classify(&none, &caps(&["A"])), CapabilityMatch::Full);
        assert_eq!(classify(&none, &caps(&[])), CapabilityMatch::None);
    }

    #[test]
    fn test_tier_order_at_equal_distance() {
        let here = east(3.0);
        let candidates = vec![
            ResourceCandidate::new("empty", Vec::<String>::new(), here),
            ResourceCandidate::new("a", ["A"], here),
            ResourceCandidate::new("ab", ["A", "B"], here),
        ];
        let ranked = rank_candidates(&["A", "B"], east(0.0), &candidates);
        assert_eq!(order(&ranked), vec!["ab", "a", "empty"]);
    }

    #[test]
    fn test_full_matches_ordered_by_distance() {
        let candidates = vec![
            ResourceCandidate::new("five", ["rescue"], east(5.0)),
            ResourceCandidate::new("ten", ["rescue"], east(10.0)),
            ResourceCandidate::new("one", ["rescue"], east(1.0)),
        ];
        let ranked = rank_candidates(&["rescue"], east(0.0), &candidates);
        assert_eq!(order(&ranked), vec!["one", "five", "ten"]);
        assert!((ranked[0].distance_km - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_full_match_beats_closer_partial() {
        let candidates = vec![
            ResourceCandidate::new("close-partial", ["A"], east(1.0)),
            ResourceCandidate::new("far-full", ["A", "B"], east(50.0)),
        ];
        let ranked = rank_candidates(&["A", "B"], east(0.0), &candidates);
        assert_eq!(order(&ranked), vec!["far-full", "close-partial"]);
    }

    #[test]
    fn test_empty_candidates() {
        assert!(rank_candidates(&["A"], east(0.0), &[]).is_empty());
    }

    #[test]
    fn test_ties_break_by_id() {
        let candidates = vec![
            ResourceCandidate::new("b", ["A"], east(2.0)),
            ResourceCandidate::new("a", ["A"], east(2.0)),
        ];
        let ranked = rank_candidates(&["A"], east(0.0), &candidates);
        assert_eq!(order(&ranked), vec!["a", "b"]);
    }

    #[test]
    fn test_refinement_reorders_by_travel_time() {
        let candidates = vec![
            ResourceCandidate::new("near", ["A"], east(1.0)),
            ResourceCandidate::new("mid", ["A"], east(5.0)),
            ResourceCandidate::new("far", ["A"], east(10.0)),
            ResourceCandidate::new("partial", Vec::<String>::new(), east(0.5)),
        ];
        let ranked = rank_candidates(&["A"], east(0.0), &candidates);

        // The near unit is across a river
        let times = HashMap::from([
            ("near".to_string(), 1800.0),
            ("far".to_string(), 600.0),
            ("partial".to_string(), 60.0),
        ]);
        let refined = refine_with_travel_times(ranked, &times);

        assert_eq!(order(&refined), vec!["far", "near", "mid", "partial"]);
        assert_eq!(refined[0].travel_time_secs, Some(600.0));
        assert_eq!(refined[2].travel_time_secs, None);
    }

    #[test]
    fn test_assignment_serializes_tier_lowercase() {
        let ranked = rank_candidates(
            &["A"],
            east(0.0),
            &[ResourceCandidate::new("u", ["A"], east(1.0))],
        );
        let value = serde_json::to_value(&ranked[0]).unwrap();
        assert_eq!(value["capability_match"], "full");
        assert_eq!(value["rank_key"]["metric"]["basis"], "distance_km");
    }
}
