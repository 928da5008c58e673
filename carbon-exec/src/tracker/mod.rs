//! Energy and carbon measurement around a single execution.
//!
//! A tracker reads a [`CpuPowerSource`] and, while GPU tracking is enabled,
//! a [`GpuProbe`]. Between `start` and `stop` a background task takes a
//! sample every `measure_interval`; `stop` takes the final one. Failures are
//! logged and degrade the figures, they never fail the caller.

mod cpu;
mod gpu;
mod intensity;

pub use cpu::{BackendKind, CpuPowerSource, CpuTimeSource, RaplSource, DEFAULT_CPU_TDP_WATTS};
pub use gpu::{GpuError, GpuProbe, GpuTracking, NvidiaSmi};
pub use intensity::{GridIntensity, WORLD_AVERAGE_G_PER_KWH};

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::types::EmissionsRecord;

pub const DEFAULT_COUNTRY_ISO_CODE: &str = "IND";
pub const DEFAULT_MEASURE_INTERVAL: Duration = Duration::from_secs(1);
const MIN_MEASURE_INTERVAL: Duration = Duration::from_millis(10);
const MAX_MEASURE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

const JOULES_PER_KWH: f64 = 3_600_000.0;

#[derive(Error, Debug)]
pub enum MeasurementError {
    #[error(transparent)]
    Gpu(#[from] GpuError),

    #[error("CPU energy source unavailable: {0}")]
    CpuUnavailable(String),

    #[error("Failed to read energy counter {path:?}: {source}")]
    Counter {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Resource usage query failed: {0}")]
    ResourceUsage(#[from] nix::errno::Errno),
}

impl MeasurementError {
    pub fn is_gpu_telemetry(&self) -> bool {
        matches!(self, MeasurementError::Gpu(_))
    }
}

#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub backend: BackendKind,
    pub country_iso_code: String,
    pub measure_interval: Duration,
    pub cpu_tdp_watts: f64,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            country_iso_code: DEFAULT_COUNTRY_ISO_CODE.to_string(),
            measure_interval: DEFAULT_MEASURE_INTERVAL,
            cpu_tdp_watts: DEFAULT_CPU_TDP_WATTS,
        }
    }
}

/// One sample of the measurement window, from `start` up to the sample time
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub emissions_kg: f64,
    pub energy_kwh: f64,
    pub cpu_energy_kwh: f64,
    pub gpu_energy_kwh: f64,
    pub duration: Duration,
    pub carbon_intensity: f64,
    pub country_name: Option<String>,
}

impl From<&Measurement> for EmissionsRecord {
    fn from(m: &Measurement) -> Self {
        EmissionsRecord {
            emissions: m.emissions_kg * 1000.0,
            energy_kwh: m.energy_kwh,
            cpu_energy: m.cpu_energy_kwh,
            gpu_energy: m.gpu_energy_kwh,
            duration: m.duration.as_secs_f64(),
            carbon_intensity: Some(m.carbon_intensity),
            country: m.country_name.clone(),
        }
    }
}

struct GpuEnergy {
    joules: f64,
    last_watts: f64,
    last_sample: Instant,
}

/// State of a running measurement window, shared with the sampler task
struct Meter {
    cpu: Arc<dyn CpuPowerSource>,
    gpu: GpuTracking,
    grid: GridIntensity,
    started: Instant,
    cpu_baseline: f64,
    gpu_energy: tokio::sync::Mutex<GpuEnergy>,
}

impl Meter {
    async fn sample(&self) -> Result<Measurement, MeasurementError> {
        let cpu_joules = (self.cpu.energy_joules()? - self.cpu_baseline).max(0.0);
        let gpu_joules = self.integrate_gpu().await;

        let cpu_energy_kwh = cpu_joules / JOULES_PER_KWH;
        let gpu_energy_kwh = gpu_joules / JOULES_PER_KWH;
        let energy_kwh = cpu_energy_kwh + gpu_energy_kwh;

        Ok(Measurement {
            emissions_kg: energy_kwh * self.grid.g_co2_per_kwh / 1000.0,
            energy_kwh,
            cpu_energy_kwh,
            gpu_energy_kwh,
            duration: self.started.elapsed(),
            carbon_intensity: self.grid.g_co2_per_kwh,
            country_name: self.grid.country_name.clone(),
        })
    }

    /// Accumulate GPU energy up to now using the previous power reading, then
    /// take a new reading for the next interval.
    async fn integrate_gpu(&self) -> f64 {
        let mut acc = self.gpu_energy.lock().await;
        let now = Instant::now();
        acc.joules += acc.last_watts * now.duration_since(acc.last_sample).as_secs_f64();
        acc.last_sample = now;
        acc.last_watts = read_gpu_power(&self.gpu).await;
        acc.joules
    }
}

/// Current GPU power, or zero when tracking is off. A failed reading turns
/// tracking off.
async fn read_gpu_power(gpu: &GpuTracking) -> f64 {
    let Some(probe) = gpu.active_probe() else {
        return 0.0;
    };
    match probe.power_draw_watts().await {
        Ok(watts) => watts,
        Err(e) => {
            gpu.disable(&e);
            0.0
        }
    }
}

struct ActiveRun {
    meter: Arc<Meter>,
    sampler: JoinHandle<()>,
}

pub struct EmissionsTracker {
    settings: TrackerSettings,
    cpu: Arc<dyn CpuPowerSource>,
    gpu: GpuTracking,
    grid: GridIntensity,
    run: Option<ActiveRun>,
    cached: Arc<Mutex<Vec<Measurement>>>,
    final_measurement: Option<Measurement>,
}

impl EmissionsTracker {
    /// Build a tracker for one execution.
    ///
    /// If the GPU cannot be read, GPU tracking is switched off on `gpu` and
    /// the tracker is built again without it.
    pub async fn new(
        settings: &TrackerSettings,
        gpu: GpuTracking,
    ) -> Result<Self, MeasurementError> {
        let cpu = cpu::select(settings.backend, settings.cpu_tdp_watts)?;

        match Self::build(settings, cpu.clone(), gpu.clone()).await {
            Err(MeasurementError::Gpu(e)) => {
                gpu.disable(&e);
                Self::build(settings, cpu, gpu).await
            }
            built => built,
        }
    }

    async fn build(
        settings: &TrackerSettings,
        cpu: Arc<dyn CpuPowerSource>,
        gpu: GpuTracking,
    ) -> Result<Self, MeasurementError> {
        if let Some(probe) = gpu.active_probe() {
            probe.power_draw_watts().await?;
        }

        debug!(
            "Emissions tracker using {} (gpu: {}, country: {})",
            cpu.name(),
            gpu.is_enabled(),
            settings.country_iso_code
        );

        Ok(Self {
            settings: settings.clone(),
            grid: GridIntensity::for_country(&settings.country_iso_code),
            cpu,
            gpu,
            run: None,
            cached: Arc::new(Mutex::new(Vec::new())),
            final_measurement: None,
        })
    }

    pub fn backend_name(&self) -> &'static str {
        self.cpu.name()
    }

    pub fn gpu_tracking(&self) -> &GpuTracking {
        &self.gpu
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// Open the measurement window. Calling it on a running tracker is a no-op.
    pub async fn start(&mut self) -> Result<(), MeasurementError> {
        if self.run.is_some() {
            return Ok(());
        }

        let cpu_baseline = self.cpu.energy_joules()?;
        let now = Instant::now();
        let last_watts = read_gpu_power(&self.gpu).await;

        let meter = Arc::new(Meter {
            cpu: self.cpu.clone(),
            gpu: self.gpu.clone(),
            grid: self.grid.clone(),
            started: now,
            cpu_baseline,
            gpu_energy: tokio::sync::Mutex::new(GpuEnergy {
                joules: 0.0,
                last_watts,
                last_sample: now,
            }),
        });

        let sampler = tokio::spawn(sample_periodically(
            meter.clone(),
            self.cached.clone(),
            self.settings.measure_interval,
        ));

        self.final_measurement = None;
        self.run = Some(ActiveRun { meter, sampler });
        Ok(())
    }

    /// Close the measurement window and record the final measurement.
    pub async fn stop(&mut self) {
        let Some(run) = self.run.take() else {
            debug!("Emissions tracker stopped without being started");
            return;
        };
        run.sampler.abort();

        match run.meter.sample().await {
            Ok(measurement) => self.final_measurement = Some(measurement),
            Err(e) => warn!("Failed to finalize emissions measurement: {}", e),
        }
    }

    /// The final measurement if `stop` produced one, otherwise the latest
    /// in-progress sample.
    pub fn latest(&self) -> Option<Measurement> {
        if let Some(m) = &self.final_measurement {
            return Some(m.clone());
        }
        self.cached
            .lock()
            .ok()
            .and_then(|cached| cached.last().cloned())
    }

    /// Figures for the response; all zero when nothing was measured.
    pub fn metrics(&self) -> EmissionsRecord {
        self.latest()
            .map(|m| EmissionsRecord::from(&m))
            .unwrap_or_default()
    }
}

impl Drop for EmissionsTracker {
    fn drop(&mut self) {
        if let Some(run) = self.run.take() {
            run.sampler.abort();
        }
    }
}

async fn sample_periodically(
    meter: Arc<Meter>,
    cached: Arc<Mutex<Vec<Measurement>>>,
    interval: Duration,
) {
    let interval = sampling_period(interval);
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    loop {
        ticker.tick().await;
        match meter.sample().await {
            Ok(measurement) => {
                if let Ok(mut cached) = cached.lock() {
                    cached.push(measurement);
                }
            }
            Err(e) => warn!("Emissions sample failed: {}", e),
        }
    }
}

/// Sampling period clamped to a range the timer can schedule.
fn sampling_period(requested: Duration) -> Duration {
    requested.clamp(MIN_MEASURE_INTERVAL, MAX_MEASURE_INTERVAL)
}
