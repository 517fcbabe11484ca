use anyhow::Context;
use solar_viability::analyzer::ViabilityAnalyzer;
use solar_viability::config::load_config;
use solar_viability::energy::{EnergyForecaster, NasaPowerClient};
use solar_viability::osm::OverpassClient;
use solar_viability::regulations::{GeminiClient, RegulationsFinder};
use solar_viability::server::{router, AppState};
use solar_viability::sun_position::AlmanacSun;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Optional first argument: path to a TOML config file.
    let config_file = std::env::args_os().nth(1).map(PathBuf::from);
    let config = load_config(config_file.as_deref())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let analyzer = ViabilityAnalyzer::new(
        Arc::new(OverpassClient::new(&config.overpass)),
        Arc::new(AlmanacSun),
        config.analysis.clone(),
    );
    let forecaster = EnergyForecaster::new(
        Arc::new(NasaPowerClient::new(&config.energy)),
        config.energy.clone(),
    );
    let regulations = RegulationsFinder::new(
        Arc::new(GeminiClient::new(&config.regulations)),
        &config.regulations,
    );
    let app = router(AppState {
        analyzer: Arc::new(analyzer),
        forecaster: Arc::new(forecaster),
        regulations: Arc::new(regulations),
    });

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_addr))?;
    tracing::info!(addr = %config.server.bind_addr, "solar viability service listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
