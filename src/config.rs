//! Layered configuration: built-in defaults -> user config file -> local
//! `solar-viability.toml` -> `SOLAR_VIABILITY_*` environment variables.

use crate::types::AnalysisConfig;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "solar-viability.toml";
pub const ENV_PREFIX: &str = "SOLAR_VIABILITY_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub overpass: OverpassConfig,
    pub analysis: AnalysisConfig,
    pub energy: EnergyConfig,
    pub regulations: RegulationsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverpassConfig {
    pub url: String,
    /// Server-side query timeout; the HTTP client allows a few seconds more.
    pub timeout_secs: u64,
}

impl Default for OverpassConfig {
    fn default() -> Self {
        Self {
            url: "https://overpass-api.de/api/interpreter".to_string(),
            timeout_secs: 25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyConfig {
    pub nasa_power_url: String,
    pub timeout_secs: u64,
    pub history_start_year: i32,
    pub history_end_year: i32,
    pub forecast_years: Vec<i32>,
    pub days_per_month: f64,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            nasa_power_url: "https://power.larc.nasa.gov/api/temporal/monthly/point".to_string(),
            timeout_secs: 30,
            history_start_year: 2018,
            history_end_year: 2023,
            forecast_years: vec![2026, 2027],
            days_per_month: 30.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegulationsConfig {
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub attempts: u32,
    pub retry_delay_secs: u64,
}

impl Default for RegulationsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.5-flash".to_string(),
            api_key_env: "GENAI_KEY".to_string(),
            timeout_secs: 60,
            attempts: 5,
            retry_delay_secs: 5,
        }
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("solar-viability").join("config.toml"))
}

/// Loads configuration. `config_file`, when given, replaces the local
/// `solar-viability.toml` lookup.
pub fn load_config(config_file: Option<&Path>) -> Result<AppConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if let Some(user_config) = user_config_path().filter(|p| p.exists()) {
        figment = figment.merge(Toml::file(user_config));
    }

    let local = config_file
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    if local.exists() {
        figment = figment.merge(Toml::file(local));
    }

    // SOLAR_VIABILITY_SERVER__BIND_ADDR, SOLAR_VIABILITY_ANALYSIS__POLICY__USABLE_FRACTION, ...
    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

    figment.extract().map_err(Box::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ViabilityPolicy;

    #[test]
    fn defaults_match_reference_policy() {
        let config = AppConfig::default();
        assert_eq!(config.server.bind_addr, "0.0.0.0:8000");
        assert_eq!(config.analysis.search_radius_m, 100.0);
        assert_eq!(config.analysis.policy, ViabilityPolicy::default());
        assert_eq!(config.energy.forecast_years, vec![2026, 2027]);
        assert_eq!(config.regulations.attempts, 5);
        assert_eq!(config.regulations.retry_delay_secs, 5);
    }

    #[test]
    fn toml_overrides_merge_over_defaults() {
        let config: AppConfig = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::string(
                r#"
                [analysis]
                reference_instant = "2023-06-21T12:00:00Z"

                [analysis.policy]
                usable_fraction = 0.5
                poor_threshold = 4
                "#,
            ))
            .extract()
            .unwrap();

        assert_eq!(
            config.analysis.reference_instant.to_rfc3339(),
            "2023-06-21T12:00:00+00:00"
        );
        assert_eq!(config.analysis.policy.usable_fraction, 0.5);
        assert_eq!(config.analysis.policy.poor_threshold, 4);
        assert_eq!(config.analysis.policy.panel_area_m2, 1.7);
        assert_eq!(config.overpass.timeout_secs, 25);
    }

    #[test]
    fn missing_explicit_file_falls_back_to_defaults() {
        let config = load_config(Some(Path::new("/nonexistent/solar-viability.toml"))).unwrap();
        assert_eq!(config.energy.history_start_year, 2018);
    }
}
