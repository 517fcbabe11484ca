//! Integration tests for the HTTP routes, driven with stub data sources.

use async_trait::async_trait;
use axum::body::Body;
use geo_types::{polygon, MultiPolygon};
use solar_viability::analyzer::ViabilityAnalyzer;
use solar_viability::config::{EnergyConfig, RegulationsConfig};
use solar_viability::energy::{EnergyError, EnergyForecaster, IrradianceSource, MonthlyIrradiance};
use solar_viability::osm::FeatureProvider;
use solar_viability::regulations::{RegulationsError, RegulationsFinder, RegulationsProvider};
use solar_viability::server::{router, AppState};
use solar_viability::sun_position::AlmanacSun;
use solar_viability::types::{
    AnalysisConfig, BuildingAttributes, BuildingFeature, Coordinate, ViabilityError,
};
use std::sync::Arc;
use tower::ServiceExt;

const LAT: f64 = 48.0;
const LON: f64 = 11.0;

struct StubBuildings(Vec<BuildingFeature>);

#[async_trait]
impl FeatureProvider for StubBuildings {
    async fn fetch_buildings(
        &self,
        _coordinate: Coordinate,
        _radius_m: f64,
    ) -> Result<Vec<BuildingFeature>, ViabilityError> {
        Ok(self.0.clone())
    }
}

struct FlatIrradiance(f64);

#[async_trait]
impl IrradianceSource for FlatIrradiance {
    async fn monthly_irradiance(
        &self,
        _coordinate: Coordinate,
        start_year: i32,
        end_year: i32,
    ) -> Result<Vec<MonthlyIrradiance>, EnergyError> {
        Ok((start_year..=end_year)
            .flat_map(|year| {
                (1..=12).map(move |month| MonthlyIrradiance {
                    year,
                    month,
                    kwh_per_m2_day: self.0,
                })
            })
            .collect())
    }
}

/// Answers every prompt with the same completion, or with a busy server.
struct CannedModel(Option<&'static str>);

#[async_trait]
impl RegulationsProvider for CannedModel {
    async fn complete(&self, _prompt: &str) -> Result<String, RegulationsError> {
        self.0.map(str::to_string).ok_or(RegulationsError::ServerBusy(
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
        ))
    }
}

const FENCED_REGULATIONS: &str = "```json\n{\"location\": \"Munich\", \"summary\": \"Rooftop systems need grid registration.\", \"approvals\": [{\"approval_name\": \"Planning Approval\", \"required\": false, \"explanation\": \"Permitted development.\"}]}\n```";

fn square(id: i64, east_m: f64, north_m: f64, height: &str) -> BuildingFeature {
    let dlat = 1.0 / 111_190.0;
    let dlon = 1.0 / 74_625.0;
    let (x0, y0) = (LON + east_m * dlon, LAT + north_m * dlat);
    let (x1, y1) = (x0 + 10.0 * dlon, y0 + 10.0 * dlat);
    BuildingFeature {
        id,
        footprint: MultiPolygon(vec![polygon![
            (x: x0, y: y0),
            (x: x1, y: y0),
            (x: x1, y: y1),
            (x: x0, y: y1),
            (x: x0, y: y0),
        ]]),
        attributes: BuildingAttributes {
            height: Some(height.to_string()),
            levels: None,
        },
    }
}

fn make_state(buildings: Vec<BuildingFeature>, irradiance: f64) -> AppState {
    make_state_with_model(buildings, irradiance, Some(FENCED_REGULATIONS))
}

fn make_state_with_model(
    buildings: Vec<BuildingFeature>,
    irradiance: f64,
    completion: Option<&'static str>,
) -> AppState {
    let analyzer = ViabilityAnalyzer::new(
        Arc::new(StubBuildings(buildings)),
        Arc::new(AlmanacSun),
        AnalysisConfig::default(),
    );
    let forecaster = EnergyForecaster::new(
        Arc::new(FlatIrradiance(irradiance)),
        EnergyConfig::default(),
    );
    let regulations_config = RegulationsConfig {
        retry_delay_secs: 0,
        ..RegulationsConfig::default()
    };
    let regulations = RegulationsFinder::new(Arc::new(CannedModel(completion)), &regulations_config);
    AppState {
        analyzer: Arc::new(analyzer),
        forecaster: Arc::new(forecaster),
        regulations: Arc::new(regulations),
    }
}

fn make_post_request(uri: &str, body: serde_json::Value) -> axum::http::Request<Body> {
    axum::http::Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

async fn send(
    state: AppState,
    request: axum::http::Request<Body>,
) -> (axum::http::StatusCode, serde_json::Value) {
    let app = router(state);
    let resp = ServiceExt::<axum::http::Request<Body>>::oneshot(app, request)
        .await
        .unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), 1_000_000)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or_default();
    (status, json)
}

// --- /health ---

#[tokio::test]
async fn test_health_reports_ok() {
    let request = axum::http::Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, json) = send(make_state(Vec::new(), 4.0), request).await;
    assert_eq!(status, 200);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

// --- /api/analyze-viability ---

#[tokio::test]
async fn test_analyze_shaded_roof_in_winter() {
    // At 48N the December noon sun sits below 20 degrees, so a neighbour
    // 15 m away and 10 m taller reaches the target.
    let buildings = vec![square(1, -5.0, -5.0, "10"), square(2, 10.0, -5.0, "20")];
    let (status, json) = send(
        make_state(buildings, 4.0),
        make_post_request("/api/analyze-viability", serde_json::json!({"lat": LAT, "lon": LON})),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(json["success"], true);
    assert_eq!(json["score"], "MODERATE");
    assert_eq!(json["usable_area"], 60);
    assert_eq!(
        json["shadow_impact"],
        "Partial shading risks from 1 nearby taller structures."
    );
    assert_eq!(json["messages"], serde_json::json!([]));
}

#[tokio::test]
async fn test_analyze_isolated_roof_is_excellent() {
    let buildings = vec![square(1, -5.0, -5.0, "10"), square(2, 60.0, 60.0, "12")];
    let (_, json) = send(
        make_state(buildings, 4.0),
        make_post_request("/api/analyze-viability", serde_json::json!({"lat": LAT, "lon": LON})),
    )
    .await;
    assert_eq!(json["score"], "EXCELLENT");
    assert_eq!(json["shadow_impact"], "No significant shading detected from neighbors.");
}

#[tokio::test]
async fn test_analyze_without_buildings_fails_softly() {
    let (status, json) = send(
        make_state(Vec::new(), 4.0),
        make_post_request("/api/analyze-viability", serde_json::json!({"lat": LAT, "lon": LON})),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(json["success"], false);
    assert_eq!(json["score"], "UNKNOWN");
    assert_eq!(json["roof_area"], 0);
    assert_eq!(json["capacity_kw"], 0.0);
    assert_eq!(json["shadow_impact"], "Analysis Failed");
    assert_eq!(
        json["messages"][0],
        "No OSM building data found at this location."
    );
}

#[tokio::test]
async fn test_analyze_rejects_malformed_body() {
    let (status, _) = send(
        make_state(Vec::new(), 4.0),
        make_post_request("/api/analyze-viability", serde_json::json!({"lat": "north"})),
    )
    .await;
    assert!(status.is_client_error());
}

// --- /api/predict-energy ---

#[tokio::test]
async fn test_predict_energy_with_defaults() {
    let (status, json) = send(
        make_state(Vec::new(), 4.0),
        make_post_request("/api/predict-energy", serde_json::json!({"lat": LAT, "lon": LON})),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(json["success"], true);
    assert_eq!(json["labels"].as_array().unwrap().len(), 24);
    assert_eq!(json["labels"][0], "2026-Jan");
    // 4.0 * 5 kW * 0.65 * 30.5 days
    assert_eq!(json["monthly_kwh"][0], 396.5);
    assert_eq!(json["cumulative_kwh"][23], 9516.0);
    assert!(json.get("error").is_none());
}

#[tokio::test]
async fn test_predict_energy_uses_score_ratio() {
    let (_, json) = send(
        make_state(Vec::new(), 4.0),
        make_post_request(
            "/api/predict-energy",
            serde_json::json!({"lat": LAT, "lon": LON, "capacity_kw": 10.0, "score": "EXCELLENT"}),
        ),
    )
    .await;
    // 4.0 * 10 kW * 0.85 * 30.5 days
    assert_eq!(json["monthly_kwh"][11], 1037.0);
}

#[tokio::test]
async fn test_predict_energy_invalid_coordinate() {
    let (status, json) = send(
        make_state(Vec::new(), 4.0),
        make_post_request("/api/predict-energy", serde_json::json!({"lat": 95.0, "lon": LON})),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(json["success"], false);
    assert!(json["error"].as_str().unwrap().starts_with("Invalid coordinate"));
}

// --- /api/get-regulations ---

#[tokio::test]
async fn test_regulations_unwraps_fenced_json() {
    let (status, json) = send(
        make_state(Vec::new(), 4.0),
        make_post_request("/api/get-regulations", serde_json::json!({"lat": LAT, "lon": LON})),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(json["success"], true);
    assert_eq!(json["location"], "Munich");
    assert_eq!(json["approvals"][0]["approval_name"], "Planning Approval");
    assert!(json.get("error").is_none());
}

#[tokio::test]
async fn test_regulations_busy_model_fails_softly() {
    let (status, json) = send(
        make_state_with_model(Vec::new(), 4.0, None),
        make_post_request("/api/get-regulations", serde_json::json!({"lat": LAT, "lon": LON})),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(json["success"], false);
    assert!(json["error"].as_str().unwrap().contains("server busy"));
    assert!(json.get("summary").is_none());
}

#[tokio::test]
async fn test_regulations_rejects_non_json_completion() {
    let (_, json) = send(
        make_state_with_model(Vec::new(), 4.0, Some("I cannot help with that.")),
        make_post_request("/api/get-regulations", serde_json::json!({"lat": LAT, "lon": LON})),
    )
    .await;
    assert_eq!(json["success"], false);
    assert!(json["error"]
        .as_str()
        .unwrap()
        .starts_with("Malformed regulations response"));
}
