use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{
    error::Error,
    executor::CodeExecutor,
    sandbox::Sandbox,
    tracker::{EmissionsTracker, GpuTracking, TrackerSettings},
    types::{ExecutionConfig, ExecutionRequest, RunOutput},
};

/// Entry point for running submitted code.
///
/// Every call gets its own sandbox, subprocess and tracker; calls are not
/// serialized against each other. The only state shared between calls is the
/// GPU tracking switch.
#[derive(Clone)]
pub struct CodeExecutionService {
    executor: Arc<CodeExecutor>,
    tracker_settings: TrackerSettings,
    gpu: GpuTracking,
}

impl CodeExecutionService {
    pub fn new(
        config: ExecutionConfig,
        tracker_settings: TrackerSettings,
        gpu: GpuTracking,
    ) -> Result<Self, Error> {
        let executor = CodeExecutor::new(&config)?;

        Ok(Self {
            executor: Arc::new(executor),
            tracker_settings,
            gpu,
        })
    }

    pub fn gpu_tracking(&self) -> &GpuTracking {
        &self.gpu
    }

    pub async fn execute(&self, request: ExecutionRequest) -> Result<RunOutput, Error> {
        debug!("Starting code execution ({} bytes)", request.code.len());

        // Dropped on return, which removes the directory
        let sandbox = Sandbox::new()?;
        let tracker = self.create_tracker().await;

        let result = self
            .executor
            .execute_in_sandbox(&request.code, &sandbox, tracker)
            .await;

        match &result {
            Ok(output) => info!(
                "Code execution completed in {:?} ({:.6} kWh)",
                output.result.execution_time, output.emissions.energy_kwh
            ),
            Err(e) if e.is_client_error() => info!("Code execution rejected: {}", e),
            Err(e) => error!("Code execution failed: {}", e),
        }

        result
    }

    async fn create_tracker(&self) -> Option<EmissionsTracker> {
        match EmissionsTracker::new(&self.tracker_settings, self.gpu.clone()).await {
            Ok(tracker) => Some(tracker),
            Err(e) => {
                warn!("Emissions tracking unavailable for this run: {}", e);
                None
            }
        }
    }
}
