use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// User code exited unsuccessfully. Carries the trimmed stderr, which is
    /// reported to the caller verbatim.
    #[error("{0}")]
    Execution(String),

    #[error("Execution timed out after {:?} seconds.", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("Interpreter not found: {0}")]
    InterpreterNotFound(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the failure was caused by the submitted code rather than by
    /// the service itself.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Execution(_) | Error::Timeout(_))
    }
}
