//! Roof capacity and winter-shadow scoring over footprints already projected
//! into a shared metric frame.

use crate::height::HeightEstimate;
use crate::types::{ViabilityPolicy, ViabilityScore};
use geo::{Area, Centroid, EuclideanDistance};
use geo_types::{MultiPolygon, Point};

/// A building in the local metric frame with its resolved height.
#[derive(Debug, Clone)]
pub struct PlacedBuilding {
    pub id: i64,
    pub footprint: MultiPolygon<f64>,
    pub height: HeightEstimate,
}

impl PlacedBuilding {
    pub fn area(&self) -> f64 {
        self.footprint.unsigned_area()
    }

    pub fn centroid(&self) -> Option<Point<f64>> {
        self.footprint.centroid()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapacityEstimate {
    pub roof_area_m2: f64,
    pub usable_area_m2: f64,
    pub capacity_kw: f64,
}

pub fn estimate_capacity(footprint_area_m2: f64, policy: &ViabilityPolicy) -> CapacityEstimate {
    let usable_area_m2 = footprint_area_m2 * policy.usable_fraction;
    let capacity_kw = (usable_area_m2 / policy.panel_area_m2) * policy.panel_power_kw;
    CapacityEstimate {
        roof_area_m2: footprint_area_m2,
        usable_area_m2,
        capacity_kw,
    }
}

/// Index of the building nearest to `query`. Ties keep the first index.
pub fn select_target(query: Point<f64>, buildings: &[PlacedBuilding]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, building) in buildings.iter().enumerate() {
        let distance = query.euclidean_distance(&building.footprint);
        if distance.is_nan() {
            continue;
        }
        if best.map_or(true, |(_, best_distance)| distance < best_distance) {
            best = Some((idx, distance));
        }
    }
    best.map(|(idx, _)| idx)
}

/// Length of the shadow a neighbour casts beyond the target's roof line, or
/// `None` when it is not taller than the target.
pub fn shadow_length(neighbor_height: f64, target_height: f64, altitude_deg: f64) -> Option<f64> {
    if neighbor_height <= target_height {
        return None;
    }
    Some((neighbor_height - target_height) / altitude_deg.to_radians().tan())
}

/// Counts neighbours whose shadow reaches the target's centroid.
///
/// Only the centroid distance is compared against the shadow length; the
/// neighbour's bearing relative to the sun is not considered.
pub fn count_threats<'a>(
    target: &PlacedBuilding,
    neighbors: impl IntoIterator<Item = &'a PlacedBuilding>,
    altitude_deg: f64,
) -> usize {
    if altitude_deg <= 0.0 {
        return 0;
    }
    let Some(target_centroid) = target.centroid() else {
        return 0;
    };
    let target_height = target.height.meters();

    neighbors
        .into_iter()
        .filter(|neighbor| {
            let Some(length) = shadow_length(neighbor.height.meters(), target_height, altitude_deg)
            else {
                return false;
            };
            match neighbor.centroid() {
                Some(centroid) => target_centroid.euclidean_distance(&centroid) < length,
                None => {
                    tracing::debug!(id = neighbor.id, "neighbor has no centroid");
                    false
                }
            }
        })
        .count()
}

pub fn classify(threats: usize, policy: &ViabilityPolicy) -> (ViabilityScore, String) {
    if threats == 0 {
        (
            ViabilityScore::Excellent,
            "No significant shading detected from neighbors.".to_string(),
        )
    } else if threats < policy.poor_threshold {
        (
            ViabilityScore::Moderate,
            format!("Partial shading risks from {threats} nearby taller structures."),
        )
    } else {
        (
            ViabilityScore::Poor,
            format!("Heavy shading detected from {threats} taller buildings."),
        )
    }
}
