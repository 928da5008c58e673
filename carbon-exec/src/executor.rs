use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::{
    env::sanitized_process_environment,
    error::Error,
    sandbox::{Sandbox, SCRIPT_NAME},
    tracker::EmissionsTracker,
    types::{ExecutionConfig, ExecutionResult, RunOutput},
};

/// Message used when failing code leaves nothing on stderr
pub const GENERIC_FAILURE: &str = "Execution failed.";

/// Python interpreter resolved on `PATH`
#[derive(Debug, Clone)]
pub struct PythonExecutor {
    program: PathBuf,
}

impl PythonExecutor {
    pub fn new(interpreter: &str) -> Result<Self, Error> {
        let program = which::which(interpreter)
            .map_err(|e| Error::InterpreterNotFound(format!("{}: {}", interpreter, e)))?;
        Ok(Self { program })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// `-I` ignores `PYTHON*` variables and the user site directory, `-B`
    /// skips writing bytecode caches.
    pub fn run_args(&self) -> Vec<&'static str> {
        vec!["-I", "-B", SCRIPT_NAME]
    }
}

/// Runs source text in a sandbox while an emissions tracker is open
pub struct CodeExecutor {
    python: PythonExecutor,
    timeout: Duration,
}

impl CodeExecutor {
    pub fn new(config: &ExecutionConfig) -> Result<Self, Error> {
        Ok(Self {
            python: PythonExecutor::new(&config.interpreter)?,
            timeout: config.timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute `code` in `sandbox`.
    ///
    /// The tracker, if any, is started right before the spawn and stopped on
    /// every path once the child is gone.
    pub async fn execute_in_sandbox(
        &self,
        code: &str,
        sandbox: &Sandbox,
        mut tracker: Option<EmissionsTracker>,
    ) -> Result<RunOutput, Error> {
        let script = sandbox.write_script(code).await?;
        debug!("Wrote source to {}", script.display());

        let started = match tracker.as_mut() {
            Some(t) => t.start().await,
            None => Ok(()),
        };
        if let Err(e) = started {
            warn!("Emissions tracker failed to start, running untracked: {}", e);
            tracker = None;
        }

        let outcome = sandbox
            .execute(
                self.python.program(),
                &self.python.run_args(),
                &sanitized_process_environment(),
                self.timeout,
            )
            .await;

        if let Some(t) = tracker.as_mut() {
            t.stop().await;
        }

        let result = check_exit(outcome?)?;
        let emissions = tracker
            .as_ref()
            .map(EmissionsTracker::metrics)
            .unwrap_or_default();

        Ok(RunOutput { result, emissions })
    }
}

/// Turn an unsuccessful exit into `Error::Execution`.
pub(crate) fn check_exit(result: ExecutionResult) -> Result<ExecutionResult, Error> {
    if result.success() {
        return Ok(result);
    }

    let stderr = result.stderr.trim();
    let message = if stderr.is_empty() {
        GENERIC_FAILURE.to_string()
    } else {
        stderr.to_string()
    };
    Err(Error::Execution(message))
}
