//! CPU energy sources.
//!
//! Every source reports a cumulative energy figure in joules from an
//! arbitrary origin; the tracker works with deltas between two readings.

use nix::sys::resource::{getrusage, UsageWho};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::MeasurementError;

/// Default CPU package power when no better figure is known, in watts
pub const DEFAULT_CPU_TDP_WATTS: f64 = 85.0;

const POWERCAP_ROOT: &str = "/sys/class/powercap";

const RAPL_PREFIX: &str = "intel-rapl:";

/// Measurement source selected at configuration time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// RAPL when readable, otherwise CPU time
    #[default]
    Auto,
    Rapl,
    CpuTime,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(BackendKind::Auto),
            "rapl" => Ok(BackendKind::Rapl),
            "cpu-time" | "cputime" | "cpu_time" => Ok(BackendKind::CpuTime),
            other => Err(format!("Unsupported tracker backend: {}", other)),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Auto => "auto",
            BackendKind::Rapl => "rapl",
            BackendKind::CpuTime => "cpu-time",
        };
        f.write_str(name)
    }
}

pub trait CpuPowerSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cumulative energy in joules.
    fn energy_joules(&self) -> Result<f64, MeasurementError>;
}

/// Build the source for `kind`.
pub(crate) fn select(
    kind: BackendKind,
    tdp_watts: f64,
) -> Result<Arc<dyn CpuPowerSource>, MeasurementError> {
    match kind {
        BackendKind::Rapl => Ok(Arc::new(RaplSource::discover()?)),
        BackendKind::CpuTime => Ok(Arc::new(CpuTimeSource::new(tdp_watts))),
        BackendKind::Auto => match RaplSource::discover() {
            Ok(rapl) => Ok(Arc::new(rapl)),
            Err(e) => {
                debug!("RAPL unavailable ({}), estimating from CPU time", e);
                Ok(Arc::new(CpuTimeSource::new(tdp_watts)))
            }
        },
    }
}

struct RaplDomain {
    energy_path: PathBuf,
    max_range_uj: u64,
}

#[derive(Default)]
struct Counter {
    last_uj: u64,
    total_uj: u64,
}

/// Intel RAPL package counters exposed through the powercap sysfs tree.
pub struct RaplSource {
    domains: Vec<RaplDomain>,
    counters: Mutex<Vec<Counter>>,
}

impl RaplSource {
    pub fn discover() -> Result<Self, MeasurementError> {
        Self::discover_in(Path::new(POWERCAP_ROOT))
    }

    /// Scan `root` for package domains (`intel-rapl:N`). Subdomains such as
    /// `intel-rapl:0:0` are already counted by their package and skipped.
    pub fn discover_in(root: &Path) -> Result<Self, MeasurementError> {
        let entries = std::fs::read_dir(root).map_err(|e| {
            MeasurementError::CpuUnavailable(format!("{}: {}", root.display(), e))
        })?;

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| {
                name.strip_prefix(RAPL_PREFIX)
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains(':'))
            })
            .collect();
        names.sort();

        if names.is_empty() {
            return Err(MeasurementError::CpuUnavailable(format!(
                "no RAPL package domains under {}",
                root.display()
            )));
        }

        let mut domains = Vec::with_capacity(names.len());
        let mut counters = Vec::with_capacity(names.len());
        for name in names {
            let dir = root.join(&name);
            let energy_path = dir.join("energy_uj");
            let last_uj = read_counter(&energy_path)?;
            let max_range_uj = read_counter(&dir.join("max_energy_range_uj")).unwrap_or(u64::MAX);
            domains.push(RaplDomain {
                energy_path,
                max_range_uj,
            });
            counters.push(Counter {
                last_uj,
                total_uj: 0,
            });
        }

        debug!("Using {} RAPL package domain(s)", domains.len());
        Ok(Self {
            domains,
            counters: Mutex::new(counters),
        })
    }
}

impl CpuPowerSource for RaplSource {
    fn name(&self) -> &'static str {
        "rapl"
    }

    fn energy_joules(&self) -> Result<f64, MeasurementError> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| MeasurementError::CpuUnavailable("RAPL counter state poisoned".into()))?;

        let mut total_uj: u64 = 0;
        for (domain, counter) in self.domains.iter().zip(counters.iter_mut()) {
            let current = read_counter(&domain.energy_path)?;
            let delta = if current >= counter.last_uj {
                current - counter.last_uj
            } else {
                // counter wrapped
                domain.max_range_uj.saturating_sub(counter.last_uj) + current
            };
            counter.last_uj = current;
            counter.total_uj = counter.total_uj.saturating_add(delta);
            total_uj = total_uj.saturating_add(counter.total_uj);
        }

        Ok(total_uj as f64 / 1_000_000.0)
    }
}

fn read_counter(path: &Path) -> Result<u64, MeasurementError> {
    let raw = std::fs::read_to_string(path).map_err(|source| MeasurementError::Counter {
        path: path.to_path_buf(),
        source,
    })?;
    raw.trim().parse().map_err(|_| {
        MeasurementError::CpuUnavailable(format!(
            "unparseable counter {}: {:?}",
            path.display(),
            raw.trim()
        ))
    })
}

/// Estimate from CPU time consumed by reaped child processes, at a fixed
/// power per logical core.
///
/// The figure comes from `getrusage(RUSAGE_CHILDREN)`, which covers every
/// child this process reaps and not only the measured one. Children of
/// overlapping executions and the `nvidia-smi` runs of [`NvidiaSmi`] that
/// finish inside a window are counted in it, so the estimate is an upper
/// bound for that run.
///
/// [`NvidiaSmi`]: super::NvidiaSmi
pub struct CpuTimeSource {
    watts_per_core: f64,
}

impl CpuTimeSource {
    pub fn new(tdp_watts: f64) -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            watts_per_core: tdp_watts / cores as f64,
        }
    }

    pub fn watts_per_core(&self) -> f64 {
        self.watts_per_core
    }
}

impl CpuPowerSource for CpuTimeSource {
    fn name(&self) -> &'static str {
        "cpu-time"
    }

    fn energy_joules(&self) -> Result<f64, MeasurementError> {
        let usage = getrusage(UsageWho::RUSAGE_CHILDREN)?;
        let user = usage.user_time();
        let system = usage.system_time();
        let cpu_secs = (user.tv_sec() + system.tv_sec()) as f64
            + (user.tv_usec() + system.tv_usec()) as f64 / 1_000_000.0;
        Ok(cpu_secs * self.watts_per_core)
    }
}
