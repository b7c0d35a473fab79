//! Proximity evaluation: which locked targets does a position fall inside?
//!
//! Everything here is pure and synchronous so it can run on every location
//! tick.

use crate::geo::Coordinate;
use crate::types::{Target, TargetId};
use std::collections::HashSet;

/// Returns the targets whose geofence contains `current`, skipping any id in
/// `already_unlocked`. Input order is preserved.
pub fn find_in_range<'a>(
    current: &Coordinate,
    targets: &'a [Target],
    already_unlocked: &HashSet<TargetId>,
) -> Vec<&'a Target> {
    targets
        .iter()
        .filter(|target| !already_unlocked.contains(&target.id))
        .filter(|target| target.contains(current))
        .collect()
}

/// Distance from `current` to the center of `target` in meters.
#[inline]
pub fn distance_to_target(current: &Coordinate, target: &Target) -> f64 {
    current.distance_to(&target.location)
}

/// The closest target not yet unlocked, with its distance in meters.
pub fn nearest_locked<'a>(
    current: &Coordinate,
    targets: &'a [Target],
    already_unlocked: &HashSet<TargetId>,
) -> Option<(&'a Target, f64)> {
    targets
        .iter()
        .filter(|target| !already_unlocked.contains(&target.id))
        .map(|target| (target, distance_to_target(current, target)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: &str, lat: f64, lng: f64, radius_m: f64) -> Target {
        Target {
            id: id.to_string(),
            name: format!("Gem {id}"),
            location: Coordinate::new(lat, lng),
            radius_m,
            hint: String::new(),
            badge: None,
        }
    }

    #[test]
    fn test_target_within_radius_is_found() {
        let targets = vec![target("A", 10.0, 20.0, 20.0)];
        let hits = find_in_range(&Coordinate::new(10.00005, 20.00005), &targets, &HashSet::new());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "A");
    }

    #[test]
    fn test_unlocked_targets_are_never_returned() {
        let targets = vec![target("A", 10.0, 20.0, 20.0), target("B", 10.0, 20.0, 5_000.0)];
        let unlocked: HashSet<TargetId> = ["A".to_string(), "B".to_string()].into();

        // Standing exactly on both
        let hits = find_in_range(&Coordinate::new(10.0, 20.0), &targets, &unlocked);
        assert!(hits.is_empty());
    }

    #[test]
    fn test_results_keep_input_order() {
        let targets = vec![
            target("far", 0.0, 0.0, 1.0),
            target("second", 0.0, 0.0001, 100.0),
            target("first", 0.0, 0.0, 100.0),
        ];
        let hits = find_in_range(&Coordinate::new(0.0, 0.00005), &targets, &HashSet::new());
        let ids: Vec<&str> = hits.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["second", "first"]);
    }

    #[test]
    fn test_radius_boundary_is_inclusive() {
        let here = Coordinate::new(0.0, 0.0);
        let there = Coordinate::new(0.0, 0.001);
        let exact = here.distance_to(&there);
        let targets = vec![target("edge", 0.0, 0.001, exact)];
        assert_eq!(find_in_range(&here, &targets, &HashSet::new()).len(), 1);
    }

    #[test]
    fn test_nearest_locked_skips_unlocked() {
        let targets = vec![target("near", 0.0, 0.001, 5.0), target("far", 0.0, 0.01, 5.0)];
        let unlocked: HashSet<TargetId> = ["near".to_string()].into();

        let (t, d) = nearest_locked(&Coordinate::new(0.0, 0.0), &targets, &unlocked).unwrap();
        assert_eq!(t.id, "far");
        assert!((d - 1_111.95).abs() < 1.0);

        let all: HashSet<TargetId> = ["near".to_string(), "far".to_string()].into();
        assert!(nearest_locked(&Coordinate::new(0.0, 0.0), &targets, &all).is_none());
    }
}
