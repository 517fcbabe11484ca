pub mod analyzer;
pub mod config;
pub mod energy;
pub mod height;
pub mod osm;
pub mod projection;
pub mod regulations;
pub mod server;
pub mod shadow_engine;
pub mod sun_position;
pub mod types;

pub use analyzer::ViabilityAnalyzer;
pub use energy::{EnergyForecast, EnergyForecaster};
pub use types::{ViabilityError, ViabilityResult, ViabilityScore};
