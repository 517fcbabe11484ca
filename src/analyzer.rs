use crate::height::HeightEstimate;
use crate::osm::FeatureProvider;
use crate::projection::LocalProjection;
use crate::shadow_engine::{
    classify, count_threats, estimate_capacity, select_target, PlacedBuilding,
};
use crate::sun_position::SolarAltitudeProvider;
use crate::types::{AnalysisConfig, BuildingFeature, Coordinate, ViabilityError, ViabilityResult};
use geo_types::Point;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStage {
    Fetching,
    Projecting,
    SelectingTarget,
    Scoring,
}

impl fmt::Display for AnalysisStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnalysisStage::Fetching => "fetching",
            AnalysisStage::Projecting => "projecting",
            AnalysisStage::SelectingTarget => "selecting_target",
            AnalysisStage::Scoring => "scoring",
        };
        f.write_str(name)
    }
}

/// Runs fetch, projection, target selection and scoring for one coordinate.
/// Holds no per-query state, so one instance serves concurrent requests.
pub struct ViabilityAnalyzer {
    features: Arc<dyn FeatureProvider>,
    sun: Arc<dyn SolarAltitudeProvider>,
    config: AnalysisConfig,
}

impl ViabilityAnalyzer {
    pub fn new(
        features: Arc<dyn FeatureProvider>,
        sun: Arc<dyn SolarAltitudeProvider>,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            features,
            sun,
            config,
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Never fails: errors are folded into an unsuccessful result.
    pub async fn analyze(&self, lat: f64, lon: f64) -> ViabilityResult {
        let coordinate = Coordinate::new(lat, lon);
        tracing::info!(lat, lon, "analyzing solar viability");

        let mut stage = AnalysisStage::Fetching;
        let outcome = self.run(coordinate, &mut stage).await;
        match outcome {
            Ok(result) => {
                tracing::info!(score = ?result.score, capacity_kw = result.capacity_kw, "analysis complete");
                result
            }
            Err(ViabilityError::NoDataFound) => {
                tracing::info!(lat, lon, "no buildings near query point");
                ViabilityResult::failed(ViabilityError::NoDataFound.to_string())
            }
            Err(e) => {
                tracing::error!(%stage, error = %e, "analysis error");
                ViabilityResult::failed(e.to_string())
            }
        }
    }

    async fn run(
        &self,
        coordinate: Coordinate,
        stage: &mut AnalysisStage,
    ) -> Result<ViabilityResult, ViabilityError> {
        coordinate.validate()?;
        let features = self
            .features
            .fetch_buildings(coordinate, self.config.search_radius_m)
            .await?;
        self.assess_with_stage(coordinate, &features, stage)
    }

    /// Scores an already fetched feature set.
    pub fn assess(
        &self,
        coordinate: Coordinate,
        features: &[BuildingFeature],
    ) -> Result<ViabilityResult, ViabilityError> {
        let mut stage = AnalysisStage::Projecting;
        self.assess_with_stage(coordinate, features, &mut stage)
    }

    fn assess_with_stage(
        &self,
        coordinate: Coordinate,
        features: &[BuildingFeature],
        stage: &mut AnalysisStage,
    ) -> Result<ViabilityResult, ViabilityError> {
        if features.is_empty() {
            return Err(ViabilityError::NoDataFound);
        }
        let policy = &self.config.policy;

        *stage = AnalysisStage::Projecting;
        tracing::debug!(%stage, features = features.len());
        let projection = LocalProjection::for_features(features, coordinate)?;
        let buildings = features
            .iter()
            .map(|feature| {
                Ok(PlacedBuilding {
                    id: feature.id,
                    footprint: projection.project_footprint(&feature.footprint)?,
                    height: HeightEstimate::resolve(&feature.attributes, policy),
                })
            })
            .collect::<Result<Vec<_>, ViabilityError>>()?;
        let query = Point::from(projection.project_point(coordinate)?);

        *stage = AnalysisStage::SelectingTarget;
        tracing::debug!(%stage, zone = projection.zone().epsg());
        let target_idx = select_target(query, &buildings).ok_or(ViabilityError::NoDataFound)?;
        let target = &buildings[target_idx];
        let capacity = estimate_capacity(target.area(), policy);

        *stage = AnalysisStage::Scoring;
        let altitude = self
            .sun
            .altitude(coordinate, &self.config.reference_instant)?;
        let neighbors = buildings
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != target_idx)
            .map(|(_, building)| building);
        let threats = count_threats(target, neighbors, altitude);
        tracing::debug!(%stage, target = target.id, target_height = target.height.meters(), altitude, threats);

        let (score, shadow_impact) = classify(threats, policy);
        Ok(ViabilityResult {
            success: true,
            score,
            roof_area: capacity.roof_area_m2.round() as u64,
            usable_area: capacity.usable_area_m2.round() as u64,
            capacity_kw: (capacity.capacity_kw * 10.0).round() / 10.0,
            shadow_impact,
            messages: Vec::new(),
        })
    }
}
