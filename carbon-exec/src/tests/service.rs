use super::{
    fixtures::{code_samples::*, test_scenarios::*},
    utils::{
        defaults::{default_timeout, short_timeout, test_service, test_tracker_settings},
        probes::ScriptedProbe,
        skip_if_not_available,
    },
};
use crate::{
    tracker::GpuTracking, CodeExecutionService, Error, ExecutionConfig, ExecutionRequest, Result,
    GENERIC_FAILURE,
};
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tokio_test::assert_err;

#[tokio::test]
async fn test_python_execution() -> Result<()> {
    if skip_if_not_available(&["python3"]) {
        return Ok(());
    }
    let service = test_service(default_timeout())?;
    let output = service.execute(ExecutionRequest::new(PYTHON_HELLO)).await?;

    assert_eq!(output.result.stdout, "Hello from Python!\n");
    assert!(output.result.stderr.is_empty());
    assert!(output.emissions.duration >= 0.0);
    assert_eq!(output.emissions.country.as_deref(), Some("India"));
    Ok(())
}

#[tokio::test]
async fn test_stdout_and_stderr_are_returned_verbatim() -> Result<()> {
    if skip_if_not_available(&["python3"]) {
        return Ok(());
    }
    let service = test_service(default_timeout())?;

    let output = service
        .execute(ExecutionRequest::new(PYTHON_STDERR_AND_STDOUT))
        .await?;
    assert_eq!(output.result.stdout, "to stdout\n");
    assert_eq!(output.result.stderr, "to stderr\n");

    let output = service.execute(ExecutionRequest::new(PYTHON_MULTILINE)).await?;
    assert_eq!(output.result.stdout.trim(), "Factorial of 5 is 120");
    Ok(())
}

#[tokio::test]
async fn test_no_bytecode_cache_is_written() -> Result<()> {
    if skip_if_not_available(&["python3"]) {
        return Ok(());
    }
    let service = test_service(default_timeout())?;
    let output = service
        .execute(ExecutionRequest::new(PYTHON_NO_BYTECODE))
        .await?;
    assert_eq!(output.result.stdout, "42\nFalse\n");
    Ok(())
}

#[tokio::test]
async fn test_exception_reports_trimmed_stderr() -> Result<()> {
    if skip_if_not_available(&["python3"]) {
        return Ok(());
    }
    let service = test_service(default_timeout())?;
    let err = assert_err!(service.execute(ExecutionRequest::new(PYTHON_RAISES)).await);

    match err {
        Error::Execution(message) => {
            assert!(message.starts_with("Traceback"));
            assert!(message.ends_with("ValueError: bad value"));
        }
        other => panic!("unexpected error: {}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_silent_failure_uses_generic_message() -> Result<()> {
    if skip_if_not_available(&["python3"]) {
        return Ok(());
    }
    let service = test_service(default_timeout())?;
    let err = assert_err!(
        service
            .execute(ExecutionRequest::new(PYTHON_SILENT_EXIT))
            .await
    );
    assert!(err.is_client_error());
    assert_eq!(err.to_string(), GENERIC_FAILURE);
    Ok(())
}

#[tokio::test]
async fn test_timeout_handling() -> Result<()> {
    if skip_if_not_available(&["python3"]) {
        return Ok(());
    }
    let service = test_service(short_timeout())?;
    let err = assert_err!(service.execute(ExecutionRequest::new(PYTHON_SLEEP)).await);

    assert!(matches!(err, Error::Timeout(_)));
    assert!(err.is_client_error());
    assert_eq!(err.to_string(), "Execution timed out after 1.0 seconds.");
    Ok(())
}

#[tokio::test]
async fn test_timeout_with_background_child_holding_stdout() -> Result<()> {
    if skip_if_not_available(&["python3", "sleep"]) {
        return Ok(());
    }
    let service = test_service(short_timeout())?;
    let started = Instant::now();
    let err = assert_err!(
        service
            .execute(ExecutionRequest::new(PYTHON_BACKGROUND_CHILD))
            .await
    );

    assert!(matches!(err, Error::Timeout(_)));
    assert!(started.elapsed() < Duration::from_secs(5));
    Ok(())
}

#[tokio::test]
async fn test_concurrent_executions() -> Result<()> {
    if skip_if_not_available(&["python3"]) {
        return Ok(());
    }
    let service = test_service(default_timeout())?;

    let mut handles = vec![];
    for i in 0..4 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .execute(ExecutionRequest::new(format!("print({} * 2)", i)))
                .await
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let output = handle.await.unwrap()?;
        assert_eq!(output.result.stdout.trim(), (i * 2).to_string());
    }
    Ok(())
}

#[tokio::test]
async fn test_broken_gpu_does_not_fail_requests() -> Result<()> {
    if skip_if_not_available(&["python3"]) {
        return Ok(());
    }
    let probe = Arc::new(ScriptedProbe::broken());
    let service = CodeExecutionService::new(
        ExecutionConfig {
            timeout: default_timeout(),
            ..ExecutionConfig::default()
        },
        test_tracker_settings(),
        GpuTracking::with_probe(probe.clone()),
    )?;

    for _ in 0..2 {
        let output = service.execute(ExecutionRequest::new(PYTHON_HELLO)).await?;
        assert_eq!(output.emissions.gpu_energy, 0.0);
    }
    assert!(!service.gpu_tracking().is_enabled());
    assert_eq!(probe.calls(), 1);
    Ok(())
}

#[test]
fn test_missing_interpreter_fails_construction() {
    let result = CodeExecutionService::new(
        ExecutionConfig {
            interpreter: "no-such-python-3.99".to_string(),
            timeout: default_timeout(),
        },
        test_tracker_settings(),
        GpuTracking::off(),
    );
    assert!(matches!(result, Err(Error::InterpreterNotFound(_))));
}
