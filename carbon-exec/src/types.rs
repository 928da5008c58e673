use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Interpreter used when none is configured
pub const DEFAULT_INTERPRETER: &str = "python3";

/// Wall-clock limit used when none is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Code execution request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Python source code to execute
    pub code: String,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }

    /// True when there is nothing to run once surrounding whitespace is
    /// removed.
    pub fn is_blank(&self) -> bool {
        self.code.trim().is_empty()
    }
}

/// Output of a finished child process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Program output (stdout)
    pub stdout: String,
    /// Program errors (stderr)
    pub stderr: String,
    /// Exit code, `None` if the process was terminated by a signal
    pub exit_code: Option<i32>,
    /// Wall-clock time between spawn and exit
    #[serde(with = "duration_serde")]
    pub execution_time: Duration,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Energy and carbon figures for a single execution window.
///
/// `emissions` is in grams of CO2-equivalent, energies are in kWh and
/// `duration` is in seconds. `carbon_intensity` is the grid intensity used
/// for the estimate, in gCO2eq/kWh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmissionsRecord {
    pub emissions: f64,
    pub energy_kwh: f64,
    pub cpu_energy: f64,
    pub gpu_energy: f64,
    pub duration: f64,
    pub carbon_intensity: Option<f64>,
    pub country: Option<String>,
}

/// Successful execution together with its metrics
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub result: ExecutionResult,
    pub emissions: EmissionsRecord,
}

/// Settings for the subprocess side of an execution
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Interpreter program name or path
    pub interpreter: String,
    /// Wall-clock limit for a single run
    pub timeout: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            interpreter: DEFAULT_INTERPRETER.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
