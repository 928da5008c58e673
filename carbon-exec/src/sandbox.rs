use crate::{error::Error, types::ExecutionResult};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::{
    fs,
    io::{AsyncRead, AsyncReadExt},
    process::Command,
    task::JoinHandle,
    time::{self, Duration, Instant},
};
use tracing::{debug, warn};

pub const SCRIPT_NAME: &str = "script.py";

/// Private scratch directory for one execution. The directory and
/// everything in it is removed when the sandbox is dropped.
pub struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    pub fn new() -> Result<Self, Error> {
        let dir = tempfile::Builder::new()
            .prefix("sandbox-")
            .tempdir()
            .map_err(|e| Error::Sandbox(format!("Failed to create sandbox directory: {}", e)))?;
        Ok(Self { dir })
    }

    pub fn root_dir(&self) -> &Path {
        self.dir.path()
    }

    /// Write the user's source into the sandbox and return its path.
    pub async fn write_script(&self, code: &str) -> Result<PathBuf, Error> {
        let path = self.dir.path().join(SCRIPT_NAME);
        fs::write(&path, code).await?;
        Ok(path)
    }

    /// Run `program` inside the sandbox directory with exactly `env` as its
    /// environment.
    ///
    /// A non-zero exit is not an error here. `timeout` bounds both the wait
    /// and the reads of stdout and stderr, so a background process that keeps
    /// the pipes open cannot hold the call past it. When it elapses the
    /// child's process group is killed and the child reaped before
    /// `Error::Timeout` is returned.
    pub async fn execute(
        &self,
        program: &Path,
        args: &[&str],
        env: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<ExecutionResult, Error> {
        debug!("Sandbox execute - Command: {}", program.display());
        debug!("Sandbox execute - Args: {:?}", args);
        debug!("Sandbox execute - Env keys: {:?}", env.keys().collect::<Vec<_>>());
        debug!("Sandbox execute - Root dir: {}", self.root_dir().display());

        let started = Instant::now();
        let mut child = Command::new(program)
            .args(args)
            .env_clear()
            .envs(env)
            .current_dir(self.root_dir())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Sandbox(format!("Failed to spawn process: {}", e)))?;
        // `id` is gone once the child is reaped, the group outlives it
        let group = child.id();

        let mut stdout = spawn_reader(child.stdout.take());
        let mut stderr = spawn_reader(child.stderr.take());

        let finished = time::timeout(timeout, async {
            let status = child.wait().await;
            let out = collect(&mut stdout).await;
            let err = collect(&mut stderr).await;
            (status, out, err)
        })
        .await;

        let (status, out, err) = match finished {
            Ok(finished) => finished,
            Err(_) => {
                kill_group(group);
                if let Ok(None) = child.try_wait() {
                    if let Err(e) = child.start_kill() {
                        warn!("Failed to kill timed out process: {}", e);
                    }
                }
                if let Err(e) = child.wait().await {
                    warn!("Failed to reap timed out process: {}", e);
                }
                stdout.abort();
                stderr.abort();
                return Err(Error::Timeout(timeout));
            }
        };

        let status = status.map_err(|e| Error::Sandbox(format!("Process error: {}", e)))?;
        Ok(ExecutionResult {
            stdout: String::from_utf8_lossy(&out?).into_owned(),
            stderr: String::from_utf8_lossy(&err?).into_owned(),
            exit_code: status.code(),
            execution_time: started.elapsed(),
        })
    }
}

/// SIGKILL every process left in the group led by `leader`.
fn kill_group(leader: Option<u32>) {
    let Some(pid) = leader.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to kill process group {}: {}", pid, e),
    }
}

fn spawn_reader<R>(pipe: Option<R>) -> JoinHandle<std::io::Result<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf).await?;
        }
        Ok(buf)
    })
}

async fn collect(reader: &mut JoinHandle<std::io::Result<Vec<u8>>>) -> Result<Vec<u8>, Error> {
    reader
        .await
        .map_err(|e| Error::Sandbox(format!("Output reader failed: {}", e)))?
        .map_err(Error::Io)
}
