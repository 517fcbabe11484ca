//! JSON-over-HTTP surface for viability analysis, energy forecasts and
//! regulatory summaries.

use crate::analyzer::ViabilityAnalyzer;
use crate::energy::{EnergyForecast, EnergyForecaster, ForecastRequest};
use crate::regulations::{RegulationsFinder, RegulationsReport, RegulationsRequest};
use crate::types::ViabilityResult;
use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct AppState {
    pub analyzer: Arc<ViabilityAnalyzer>,
    pub forecaster: Arc<EnergyForecaster>,
    pub regulations: Arc<RegulationsFinder>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ViabilityRequest {
    pub lat: f64,
    pub lon: f64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/analyze-viability", post(analyze_viability))
        .route("/api/predict-energy", post(predict_energy))
        .route("/api/get-regulations", post(get_regulations))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn analyze_viability(
    State(state): State<AppState>,
    Json(request): Json<ViabilityRequest>,
) -> Json<ViabilityResult> {
    Json(state.analyzer.analyze(request.lat, request.lon).await)
}

async fn predict_energy(
    State(state): State<AppState>,
    Json(request): Json<ForecastRequest>,
) -> Json<EnergyForecast> {
    Json(state.forecaster.predict(&request).await)
}

async fn get_regulations(
    State(state): State<AppState>,
    Json(request): Json<RegulationsRequest>,
) -> Json<RegulationsReport> {
    Json(state.regulations.find(request).await)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
