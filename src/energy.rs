//! Irradiance history and the seasonal trend forecast of monthly yield.

use crate::config::EnergyConfig;
use crate::types::{Coordinate, ViabilityScore};
use async_trait::async_trait;
use chrono::NaiveDate;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Duration;

const PARAMETER: &str = "ALLSKY_SFC_SW_DWN";

#[derive(Debug, thiserror::Error)]
pub enum EnergyError {
    #[error("No NASA data available")]
    NoData,
    #[error("Invalid coordinate: lat={lat}, lon={lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("NASA POWER returned HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("Irradiance history cannot separate seasonal terms")]
    Singular,
}

/// Mean daily surface irradiance for one month, kWh/m²/day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonthlyIrradiance {
    pub year: i32,
    pub month: u32,
    pub kwh_per_m2_day: f64,
}

#[async_trait]
pub trait IrradianceSource: Send + Sync {
    async fn monthly_irradiance(
        &self,
        coordinate: Coordinate,
        start_year: i32,
        end_year: i32,
    ) -> Result<Vec<MonthlyIrradiance>, EnergyError>;
}

pub struct NasaPowerClient {
    client: reqwest::Client,
    url: String,
}

impl NasaPowerClient {
    pub fn new(config: &EnergyConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            url: config.nasa_power_url.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PowerResponse {
    properties: PowerProperties,
}

#[derive(Debug, Deserialize)]
struct PowerProperties {
    parameter: PowerParameters,
}

#[derive(Debug, Deserialize)]
struct PowerParameters {
    #[serde(rename = "ALLSKY_SFC_SW_DWN", default)]
    allsky_sfc_sw_dwn: BTreeMap<String, f64>,
}

#[async_trait]
impl IrradianceSource for NasaPowerClient {
    async fn monthly_irradiance(
        &self,
        coordinate: Coordinate,
        start_year: i32,
        end_year: i32,
    ) -> Result<Vec<MonthlyIrradiance>, EnergyError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("parameters", PARAMETER.to_string()),
                ("community", "RE".to_string()),
                ("longitude", coordinate.lon.to_string()),
                ("latitude", coordinate.lat.to_string()),
                ("start", start_year.to_string()),
                ("end", end_year.to_string()),
                ("format", "JSON".to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EnergyError::Status(response.status()));
        }

        let payload: PowerResponse = response.json().await?;
        let samples = parse_power_response(payload);
        tracing::info!(samples = samples.len(), "fetched irradiance history");
        Ok(samples)
    }
}

/// Keys are `YYYYMM`. Negative values are fill markers and are dropped.
/// Month 13 is the annual mean, not a calendar month; it is dropped as well
/// rather than fitted, since `2π·13/12` would alias it onto January.
pub(crate) fn parse_power_response(response: PowerResponse) -> Vec<MonthlyIrradiance> {
    response
        .properties
        .parameter
        .allsky_sfc_sw_dwn
        .into_iter()
        .filter_map(|(key, value)| {
            if key.len() != 6 || !key.is_ascii() || value < 0.0 {
                return None;
            }
            let year = key[..4].parse::<i32>().ok()?;
            let month = key[4..]
                .parse::<u32>()
                .ok()
                .filter(|m| (1..=12).contains(m))?;
            Some(MonthlyIrradiance {
                year,
                month,
                kwh_per_m2_day: value,
            })
        })
        .collect()
}

/// Linear fit of irradiance against year plus one annual harmonic.
#[derive(Debug, Clone, PartialEq)]
pub struct SeasonalTrendModel {
    intercept: f64,
    trend: f64,
    sin_coef: f64,
    cos_coef: f64,
    mean_year: f64,
}

fn seasonal_terms(month: u32) -> (f64, f64) {
    let angle = 2.0 * PI * month as f64 / 12.0;
    (angle.sin(), angle.cos())
}

impl SeasonalTrendModel {
    pub fn fit(samples: &[MonthlyIrradiance]) -> Result<Self, EnergyError> {
        if samples.is_empty() {
            return Err(EnergyError::NoData);
        }

        let n = samples.len();
        let mean_year = samples.iter().map(|s| s.year as f64).sum::<f64>() / n as f64;
        // With a single year the trend column is all zeros.
        let has_trend = samples.iter().any(|s| s.year != samples[0].year);
        let columns = if has_trend { 4 } else { 3 };

        let mut x = Array2::<f64>::zeros((n, columns));
        let mut y = Array1::<f64>::zeros(n);
        for (row, sample) in samples.iter().enumerate() {
            let (sin, cos) = seasonal_terms(sample.month);
            x[[row, 0]] = 1.0;
            x[[row, 1]] = sin;
            x[[row, 2]] = cos;
            if has_trend {
                x[[row, 3]] = sample.year as f64 - mean_year;
            }
            y[row] = sample.kwh_per_m2_day;
        }

        let xtx = x.t().dot(&x);
        let xty = x.t().dot(&y);
        let coefs = solve(xtx, xty).ok_or(EnergyError::Singular)?;

        Ok(Self {
            intercept: coefs[0],
            sin_coef: coefs[1],
            cos_coef: coefs[2],
            trend: if has_trend { coefs[3] } else { 0.0 },
            mean_year,
        })
    }

    pub fn predict(&self, year: i32, month: u32) -> f64 {
        let (sin, cos) = seasonal_terms(month);
        self.intercept
            + self.trend * (year as f64 - self.mean_year)
            + self.sin_coef * sin
            + self.cos_coef * cos
    }
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Option<Array1<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))?;
        if a[[pivot, col]].abs() < 1e-10 {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                a.swap([col, k], [pivot, k]);
            }
            b.swap(col, pivot);
        }
        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut solution = Array1::<f64>::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[[row, k]] * solution[k]).sum();
        solution[row] = (b[row] - tail) / a[[row, row]];
    }
    Some(solution)
}

fn default_capacity_kw() -> f64 {
    5.0
}

fn default_score() -> String {
    "MODERATE".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastRequest {
    pub lat: f64,
    pub lon: f64,
    #[serde(default = "default_capacity_kw")]
    pub capacity_kw: f64,
    /// Viability tier label; unrecognised labels use the neutral ratio.
    #[serde(default = "default_score")]
    pub score: String,
}

impl ForecastRequest {
    pub fn performance_ratio(&self) -> f64 {
        let score = serde_json::from_value::<ViabilityScore>(serde_json::Value::String(
            self.score.clone(),
        ))
        .unwrap_or(ViabilityScore::Unknown);
        score.performance_ratio()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnergyForecast {
    pub success: bool,
    pub labels: Vec<String>,
    pub monthly_irradiance: Vec<f64>,
    pub monthly_kwh: Vec<f64>,
    pub cumulative_kwh: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EnergyForecast {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn month_label(year: i32, month: u32) -> String {
    let abbrev = NaiveDate::from_ymd_opt(1900, month, 1)
        .map(|d| d.format("%b").to_string())
        .unwrap_or_default();
    format!("{year}-{abbrev}")
}

/// Month-by-month yield over the configured forecast years.
pub fn project_yield(
    model: &SeasonalTrendModel,
    capacity_kw: f64,
    performance_ratio: f64,
    config: &EnergyConfig,
) -> EnergyForecast {
    let mut forecast = EnergyForecast {
        success: true,
        ..EnergyForecast::default()
    };
    let mut cumulative = 0.0;

    for &year in &config.forecast_years {
        for month in 1..=12 {
            let irradiance = model.predict(year, month).max(0.0);
            let monthly = irradiance * capacity_kw * performance_ratio * config.days_per_month;
            cumulative += monthly;

            forecast.labels.push(month_label(year, month));
            forecast.monthly_irradiance.push(round_to(irradiance, 2));
            forecast.monthly_kwh.push(round_to(monthly, 1));
            forecast.cumulative_kwh.push(round_to(cumulative, 0));
        }
    }

    forecast
}

pub struct EnergyForecaster {
    source: Arc<dyn IrradianceSource>,
    config: EnergyConfig,
}

impl EnergyForecaster {
    pub fn new(source: Arc<dyn IrradianceSource>, config: EnergyConfig) -> Self {
        Self { source, config }
    }

    /// Never fails: errors are reported through `success` and `error`.
    pub async fn predict(&self, request: &ForecastRequest) -> EnergyForecast {
        tracing::info!(
            lat = request.lat,
            lon = request.lon,
            capacity_kw = request.capacity_kw,
            "predicting energy production"
        );
        match self.try_predict(request).await {
            Ok(forecast) => forecast,
            Err(e) => {
                tracing::error!(error = %e, "energy prediction failed");
                EnergyForecast::failed(e.to_string())
            }
        }
    }

    async fn try_predict(&self, request: &ForecastRequest) -> Result<EnergyForecast, EnergyError> {
        let coordinate = Coordinate::new(request.lat, request.lon);
        if coordinate.validate().is_err() {
            return Err(EnergyError::InvalidCoordinate {
                lat: request.lat,
                lon: request.lon,
            });
        }

        let samples = self
            .source
            .monthly_irradiance(
                coordinate,
                self.config.history_start_year,
                self.config.history_end_year,
            )
            .await?;
        let model = SeasonalTrendModel::fit(&samples)?;
        Ok(project_yield(
            &model,
            request.capacity_kw,
            request.performance_ratio(),
            &self.config,
        ))
    }
}
