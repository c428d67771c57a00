//! Remote script execution on cluster machines.
//!
//! Scripts run inside a root-privileged, host-networked, ephemeral container
//! on the target machine, so they can reprogram the host's addressing,
//! shaping and classification state without touching the host's userland.

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt as _;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("failed to reach '{machine}': {source}")]
    Io {
        machine: String,
        #[source]
        source: std::io::Error,
    },
    #[error("script failed on '{machine}': {stderr}")]
    ScriptFailed { machine: String, stderr: String },
}

/// Remote command-execution channel.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Runs `script` on `machine` within the scope of `job`, optionally
    /// piping `input` into it, and returns captured stdout. Non-zero exit
    /// fails with captured stderr.
    async fn execute(
        &self,
        job: u32,
        machine: &str,
        script: &str,
        input: Option<&str>,
    ) -> Result<String, ShellError>;
}

/// [`RemoteShell`] reaching machines over `oarsh` and running scripts in a
/// privileged networking container.
#[derive(Debug, Clone)]
pub struct OarShell {
    image: String,
}

impl OarShell {
    /// Default container image. Any image carrying `iproute2` and `nftables`
    /// works.
    pub const DEFAULT_IMAGE: &'static str = "ghcr.io/netlag/runtime:latest";

    pub fn new(image: impl Into<String>) -> Self {
        Self { image: image.into() }
    }
}

impl Default for OarShell {
    fn default() -> Self {
        Self::new(Self::DEFAULT_IMAGE)
    }
}

/// Wraps a script so an optional payload reaches it on stdin through a
/// here-doc. `set -e` makes any failing batch command fail the whole run.
fn wrap_script(script: &str, input: Option<&str>) -> String {
    match input {
        Some(input) => format!(
            "#!/bin/bash\nset -e\ncat << 'NETLAG_EOF' | {script}\n{input}\nNETLAG_EOF\n"
        ),
        None => format!("#!/bin/bash\nset -e\n{script}\n"),
    }
}

#[async_trait]
impl RemoteShell for OarShell {
    async fn execute(
        &self,
        job: u32,
        machine: &str,
        script: &str,
        input: Option<&str>,
    ) -> Result<String, ShellError> {
        let wrapped = wrap_script(script, input);

        let mut cmd = Command::new("oarsh");
        cmd.env("OAR_JOB_ID", job.to_string())
            .arg(machine)
            .args(["docker", "run", "--rm", "--privileged", "--pull=always", "--net=host", "-i"])
            .arg(&self.image)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        tracing::debug!(job, %machine, %script, "executing remote script");

        let io_err = |source| ShellError::Io { machine: machine.to_string(), source };

        let mut child = cmd.spawn().map_err(io_err)?;
        let mut stdin = child.stdin.take().expect("stdin is piped");
        stdin.write_all(wrapped.as_bytes()).await.map_err(io_err)?;
        drop(stdin);

        let output = child.wait_with_output().await.map_err(io_err)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            tracing::debug!(%machine, %script, %stderr, "remote script returned non-zero status");
            return Err(ShellError::ScriptFailed { machine: machine.to_string(), stderr });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}
