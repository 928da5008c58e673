use axum::http::HeaderValue;
use carbon_exec::{
    tracker::{BackendKind, GpuTracking, TrackerSettings, DEFAULT_COUNTRY_ISO_CODE},
    ExecutionConfig, DEFAULT_INTERPRETER,
};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value '{0}'. It must be a number.")]
    NotANumber(String),

    #[error("Value must be greater than zero, got '{0}'.")]
    NotPositive(String),

    #[error("Invalid CORS origin '{0}'")]
    InvalidOrigin(String),
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Wall-clock limit for a single execution, in seconds
    #[arg(long, env = "EXECUTION_TIMEOUT", default_value = "10", value_parser = parse_seconds)]
    pub execution_timeout: Duration,

    /// Comma-separated list of allowed CORS origins, `*` for any
    #[arg(long, env = "ALLOWED_ORIGINS", default_value = "*", value_delimiter = ',')]
    pub allowed_origins: Vec<String>,

    /// Address to listen on
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "8000")]
    pub port: u16,

    /// Python interpreter used to run submitted code
    #[arg(long, env = "PYTHON_BIN", default_value = DEFAULT_INTERPRETER)]
    pub interpreter: String,

    /// CPU energy source: auto, rapl or cpu-time
    #[arg(long, env = "TRACKER_BACKEND", default_value = "auto")]
    pub tracker_backend: BackendKind,

    /// ISO 3166-1 alpha-3 code of the country whose grid powers this host
    #[arg(long, env = "TRACKER_COUNTRY", default_value = DEFAULT_COUNTRY_ISO_CODE)]
    pub country_iso_code: String,

    /// Interval between in-progress measurements, in seconds
    #[arg(long, env = "TRACKER_MEASURE_POWER_SECS", default_value = "1", value_parser = parse_seconds)]
    pub measure_power_secs: Duration,

    /// CPU package power used by the cpu-time estimate, in watts
    #[arg(long, env = "TRACKER_CPU_TDP_WATTS", default_value = "85", value_parser = parse_positive)]
    pub cpu_tdp_watts: f64,

    /// Never read GPU power
    #[arg(long, env = "TRACKER_DISABLE_GPU")]
    pub disable_gpu_tracking: bool,
}

impl Args {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn execution_config(&self) -> ExecutionConfig {
        ExecutionConfig {
            interpreter: self.interpreter.clone(),
            timeout: self.execution_timeout,
        }
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            backend: self.tracker_backend,
            country_iso_code: self.country_iso_code.clone(),
            measure_interval: self.measure_power_secs,
            cpu_tdp_watts: self.cpu_tdp_watts,
        }
    }

    pub fn gpu_tracking(&self) -> GpuTracking {
        if self.disable_gpu_tracking {
            GpuTracking::off()
        } else {
            GpuTracking::detect()
        }
    }
}

pub fn parse_positive(raw: &str) -> Result<f64, ConfigError> {
    let raw = raw.trim();
    let value: f64 = raw
        .parse()
        .map_err(|_| ConfigError::NotANumber(raw.to_string()))?;
    if !value.is_finite() {
        return Err(ConfigError::NotANumber(raw.to_string()));
    }
    if value <= 0.0 {
        return Err(ConfigError::NotPositive(raw.to_string()));
    }
    Ok(value)
}

pub fn parse_seconds(raw: &str) -> Result<Duration, ConfigError> {
    let secs = parse_positive(raw)?;
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::NotANumber(raw.trim().to_string()))
}

/// CORS for the configured origins. Any entry equal to `*` allows every
/// origin.
pub fn cors_layer(origins: &[String]) -> Result<CorsLayer, ConfigError> {
    let origins: Vec<&str> = origins
        .iter()
        .map(|o| o.trim())
        .filter(|o| !o.is_empty())
        .collect();

    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.contains(&"*") {
        return Ok(cors.allow_origin(Any));
    }

    let origins = origins
        .into_iter()
        .map(|o| HeaderValue::from_str(o).map_err(|_| ConfigError::InvalidOrigin(o.to_string())))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(cors.allow_origin(origins))
}
