use chrono::{DateTime, TimeZone, Utc};
use geo_types::MultiPolygon;
use serde::{Deserialize, Serialize};

pub const DEFAULT_USABLE_FRACTION: f64 = 0.60;
pub const DEFAULT_PANEL_AREA_M2: f64 = 1.7;
pub const DEFAULT_PANEL_POWER_KW: f64 = 0.400;
pub const DEFAULT_FLOOR_HEIGHT_M: f64 = 3.5;
pub const DEFAULT_BUILDING_HEIGHT_M: f64 = 10.0;
pub const DEFAULT_POOR_THRESHOLD: usize = 3;
pub const DEFAULT_SEARCH_RADIUS_M: f64 = 100.0;

/// A WGS84 position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn validate(&self) -> Result<(), ViabilityError> {
        let valid = self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon);
        if valid {
            Ok(())
        } else {
            Err(ViabilityError::InvalidCoordinate {
                lat: self.lat,
                lon: self.lon,
            })
        }
    }
}

/// Raw OSM tags relevant to height estimation. Values are kept as the
/// free-form strings found in the map data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildingAttributes {
    pub height: Option<String>,
    pub levels: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BuildingFeature {
    pub id: i64,
    pub footprint: MultiPolygon<f64>,
    pub attributes: BuildingAttributes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ViabilityScore {
    Excellent,
    Moderate,
    Poor,
    Unknown,
}

impl ViabilityScore {
    /// Share of nameplate output expected given the shading tier.
    pub fn performance_ratio(&self) -> f64 {
        match self {
            ViabilityScore::Excellent => 0.85,
            ViabilityScore::Moderate => 0.65,
            ViabilityScore::Poor => 0.40,
            ViabilityScore::Unknown => 0.80,
        }
    }
}

/// Tunable constants of the capacity and shading policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViabilityPolicy {
    /// Fraction of the footprint assumed free of obstructions and setbacks.
    pub usable_fraction: f64,
    pub panel_area_m2: f64,
    pub panel_power_kw: f64,
    pub floor_height_m: f64,
    pub default_height_m: f64,
    /// Smallest threat count scored as POOR.
    pub poor_threshold: usize,
}

impl Default for ViabilityPolicy {
    fn default() -> Self {
        Self {
            usable_fraction: DEFAULT_USABLE_FRACTION,
            panel_area_m2: DEFAULT_PANEL_AREA_M2,
            panel_power_kw: DEFAULT_PANEL_POWER_KW,
            floor_height_m: DEFAULT_FLOOR_HEIGHT_M,
            default_height_m: DEFAULT_BUILDING_HEIGHT_M,
            poor_threshold: DEFAULT_POOR_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub search_radius_m: f64,
    /// Instant at which the sun altitude is evaluated. Defaults to noon UTC
    /// on the winter solstice, the lowest sun of the year.
    pub reference_instant: DateTime<Utc>,
    pub policy: ViabilityPolicy,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            search_radius_m: DEFAULT_SEARCH_RADIUS_M,
            reference_instant: winter_solstice_noon(),
            policy: ViabilityPolicy::default(),
        }
    }
}

pub fn winter_solstice_noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 12, 21, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SunPosition {
    pub azimuth: f64,
    pub elevation: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViabilityResult {
    pub success: bool,
    pub score: ViabilityScore,
    pub roof_area: u64,
    pub usable_area: u64,
    pub capacity_kw: f64,
    pub shadow_impact: String,
    pub messages: Vec<String>,
}

impl Default for ViabilityResult {
    fn default() -> Self {
        Self {
            success: false,
            score: ViabilityScore::Unknown,
            roof_area: 0,
            usable_area: 0,
            capacity_kw: 0.0,
            shadow_impact: "Analysis Failed".to_string(),
            messages: Vec::new(),
        }
    }
}

impl ViabilityResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            messages: vec![message.into()],
            ..Self::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ViabilityError {
    #[error("No OSM building data found at this location.")]
    NoDataFound,
    #[error("Invalid coordinate: lat={lat}, lon={lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },
    #[error("{service} request failed: {message}")]
    Upstream {
        service: &'static str,
        message: String,
    },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Projection error: {0}")]
    Projection(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_record_has_unknown_score_and_zero_areas() {
        let result = ViabilityResult::failed("boom");
        assert!(!result.success);
        assert_eq!(result.score, ViabilityScore::Unknown);
        assert_eq!(result.roof_area, 0);
        assert_eq!(result.usable_area, 0);
        assert_eq!(result.capacity_kw, 0.0);
        assert_eq!(result.messages, vec!["boom".to_string()]);
    }

    #[test]
    fn score_serializes_uppercase() {
        let json = serde_json::to_value(ViabilityScore::Excellent).unwrap();
        assert_eq!(json, serde_json::json!("EXCELLENT"));
        let json = serde_json::to_value(ViabilityResult::default()).unwrap();
        assert_eq!(json["score"], "UNKNOWN");
        assert_eq!(json["shadow_impact"], "Analysis Failed");
    }

    #[test]
    fn coordinate_validation_rejects_out_of_range() {
        assert!(Coordinate::new(51.5, -0.12).validate().is_ok());
        assert!(Coordinate::new(91.0, 0.0).validate().is_err());
        assert!(Coordinate::new(0.0, -180.5).validate().is_err());
        assert!(Coordinate::new(f64::NAN, 0.0).validate().is_err());
    }

    #[test]
    fn default_reference_instant_is_solstice_noon() {
        let instant = AnalysisConfig::default().reference_instant;
        assert_eq!(instant.to_rfc3339(), "2023-12-21T12:00:00+00:00");
    }
}
