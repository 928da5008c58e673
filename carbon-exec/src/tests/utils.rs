pub mod defaults {
    use crate::{
        tracker::{BackendKind, GpuTracking, TrackerSettings},
        CodeExecutionService, ExecutionConfig, Result, DEFAULT_INTERPRETER,
    };
    use std::time::Duration;

    pub fn default_timeout() -> Duration {
        Duration::from_secs(10)
    }

    pub fn short_timeout() -> Duration {
        Duration::from_secs(1)
    }

    /// CPU-time backend with a fast sampler so tests do not depend on RAPL
    /// permissions of the host.
    pub fn test_tracker_settings() -> TrackerSettings {
        TrackerSettings {
            backend: BackendKind::CpuTime,
            measure_interval: Duration::from_millis(20),
            ..TrackerSettings::default()
        }
    }

    pub fn test_service(timeout: Duration) -> Result<CodeExecutionService> {
        CodeExecutionService::new(
            ExecutionConfig {
                interpreter: DEFAULT_INTERPRETER.to_string(),
                timeout,
            },
            test_tracker_settings(),
            GpuTracking::off(),
        )
    }
}

pub mod probes {
    use crate::tracker::{GpuError, GpuProbe};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers `healthy_calls` times with `watts`, then fails like a driver
    /// that went away.
    #[derive(Debug)]
    pub struct ScriptedProbe {
        pub watts: f64,
        pub healthy_calls: usize,
        calls: AtomicUsize,
    }

    impl ScriptedProbe {
        pub fn healthy(watts: f64) -> Self {
            Self::failing_after(watts, usize::MAX)
        }

        pub fn broken() -> Self {
            Self::failing_after(0.0, 0)
        }

        pub fn failing_after(watts: f64, healthy_calls: usize) -> Self {
            Self {
                watts,
                healthy_calls,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GpuProbe for ScriptedProbe {
        async fn power_draw_watts(&self) -> Result<f64, GpuError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.healthy_calls {
                Ok(self.watts)
            } else {
                Err(GpuError::Telemetry("NVML: Driver Not Loaded".to_string()))
            }
        }
    }
}

pub(crate) fn skip_if_not_available(tools: &[&str]) -> bool {
    let missing: Vec<_> = tools
        .iter()
        .filter(|tool| which::which(tool).is_err())
        .map(|s| (*s).to_string())
        .collect();

    if !missing.is_empty() {
        eprintln!("Skipping test: {} not available", missing.join(", "));
        return true;
    }
    false
}
