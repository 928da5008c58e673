//! # Carbon-metered Code Execution
//!
//! Runs submitted Python source in a throwaway sandbox with a sanitized
//! environment and a wall-clock timeout, and reports the energy and carbon
//! cost of each run alongside its output.

pub mod env;
mod error;
mod executor;
mod sandbox;
mod service;
pub mod tracker;
mod types;

#[cfg(test)]
mod tests;

pub use error::Error;
pub use executor::{CodeExecutor, PythonExecutor, GENERIC_FAILURE};
pub use sandbox::Sandbox;
pub use service::CodeExecutionService;
pub use types::{
    EmissionsRecord, ExecutionConfig, ExecutionRequest, ExecutionResult, RunOutput,
    DEFAULT_INTERPRETER, DEFAULT_TIMEOUT,
};

/// Result type for code execution operations
pub type Result<T> = std::result::Result<T, Error>;
