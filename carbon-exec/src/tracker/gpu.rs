use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GpuError {
    /// The driver or management library failed to answer.
    #[error("GPU telemetry failed: {0}")]
    Telemetry(String),

    /// The device answered but does not report power draw.
    #[error("GPU power draw not reported: {0}")]
    Unsupported(String),
}

/// Source of instantaneous GPU power readings
#[async_trait]
pub trait GpuProbe: Send + Sync + fmt::Debug {
    /// Total board power draw across visible devices, in watts.
    async fn power_draw_watts(&self) -> Result<f64, GpuError>;
}

/// Reads power draw through `nvidia-smi`.
#[derive(Debug, Clone)]
pub struct NvidiaSmi {
    program: PathBuf,
}

impl NvidiaSmi {
    /// `None` when `nvidia-smi` is not on `PATH`.
    pub fn detect() -> Option<Self> {
        which::which("nvidia-smi")
            .ok()
            .map(|program| Self { program })
    }
}

#[async_trait]
impl GpuProbe for NvidiaSmi {
    async fn power_draw_watts(&self) -> Result<f64, GpuError> {
        let output = Command::new(&self.program)
            .args(["--query-gpu=power.draw", "--format=csv,noheader,nounits"])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| GpuError::Telemetry(format!("failed to run nvidia-smi: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let message = if stderr.trim().is_empty() { stdout } else { stderr };
            return Err(GpuError::Telemetry(message.trim().to_string()));
        }

        parse_power_draw(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Sum the per-device lines printed by `nvidia-smi --query-gpu=power.draw`.
fn parse_power_draw(stdout: &str) -> Result<f64, GpuError> {
    let mut total = 0.0;
    let mut devices = 0;
    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let watts: f64 = line
            .parse()
            .map_err(|_| GpuError::Unsupported(line.to_string()))?;
        total += watts;
        devices += 1;
    }

    if devices == 0 {
        return Err(GpuError::Telemetry("no devices reported".to_string()));
    }
    Ok(total)
}

/// Whether GPU power is measured, shared by every tracker the service
/// creates.
///
/// Starts enabled when a probe is present. The first GPU failure seen by any
/// tracker switches it off for good; later trackers skip the GPU entirely.
#[derive(Debug, Clone)]
pub struct GpuTracking {
    probe: Option<Arc<dyn GpuProbe>>,
    disabled: Arc<AtomicBool>,
}

impl GpuTracking {
    /// Use `nvidia-smi` if it is installed.
    pub fn detect() -> Self {
        match NvidiaSmi::detect() {
            Some(smi) => {
                debug!("GPU tracking through {}", smi.program.display());
                Self::with_probe(Arc::new(smi))
            }
            None => Self::off(),
        }
    }

    pub fn with_probe(probe: Arc<dyn GpuProbe>) -> Self {
        Self {
            probe: Some(probe),
            disabled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// No GPU measurement at all.
    pub fn off() -> Self {
        Self {
            probe: None,
            disabled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.probe.is_some() && !self.disabled.load(Ordering::Acquire)
    }

    pub(crate) fn active_probe(&self) -> Option<Arc<dyn GpuProbe>> {
        if self.is_enabled() {
            self.probe.clone()
        } else {
            None
        }
    }

    /// Switch GPU tracking off. Returns `true` only for the call that
    /// performed the transition.
    pub(crate) fn disable(&self, cause: &GpuError) -> bool {
        if self.disabled.swap(true, Ordering::AcqRel) {
            return false;
        }
        warn!("GPU tracking disabled: {}", cause);
        true
    }
}
