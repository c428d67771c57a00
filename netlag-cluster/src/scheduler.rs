//! Batch-scheduler job queries.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to run {program}: {source}")]
    Io {
        program: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} failed: {stderr}")]
    CommandFailed { program: &'static str, stderr: String },
    #[error("unexpected scheduler output: {0}")]
    UnexpectedOutput(#[from] serde_json::Error),
    #[error("scheduler output is not valid utf-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("job {0} not found in scheduler output")]
    UnknownJob(u32),
}

/// Read-only view of the batch scheduler.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// The ordered machine hostnames allocated to a job.
    async fn machines(&self, job: u32) -> Result<Vec<String>, SchedulerError>;

    /// The invoking user's running job ids.
    async fn running_jobs(&self) -> Result<Vec<u32>, SchedulerError>;
}

/// [`Scheduler`] backed by the OAR `oarstat` utility.
#[derive(Debug, Clone, Copy, Default)]
pub struct OarScheduler;

impl OarScheduler {
    pub fn new() -> Self {
        Self
    }

    async fn oarstat(args: &[&str]) -> Result<String, SchedulerError> {
        let output = Command::new("oarstat")
            .args(args)
            .output()
            .await
            .map_err(|source| SchedulerError::Io { program: "oarstat", source })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            tracing::error!(?args, %stderr, "oarstat returned non-zero status");
            return Err(SchedulerError::CommandFailed { program: "oarstat", stderr });
        }

        Ok(String::from_utf8(output.stdout)?)
    }
}

#[async_trait]
impl Scheduler for OarScheduler {
    async fn machines(&self, job: u32) -> Result<Vec<String>, SchedulerError> {
        let stdout = Self::oarstat(&["-j", &job.to_string(), "-J"]).await?;
        machines_from_json(&stdout, job)
    }

    async fn running_jobs(&self) -> Result<Vec<u32>, SchedulerError> {
        let stdout = Self::oarstat(&["-u", "-J"]).await?;
        running_jobs_from_json(&stdout)
    }
}

#[derive(Debug, Deserialize)]
struct JobSchema {
    state: Option<String>,
    #[serde(default)]
    assigned_network_address: Vec<String>,
}

fn machines_from_json(output: &str, job: u32) -> Result<Vec<String>, SchedulerError> {
    let mut jobs: HashMap<String, JobSchema> = serde_json::from_str(output)?;
    let entry = jobs.remove(&job.to_string()).ok_or(SchedulerError::UnknownJob(job))?;
    Ok(entry.assigned_network_address)
}

// oarstat -J with no running jobs prints this error instead of an empty
// object; treat it as one.
const OARSTAT_NO_JOBS: &str = "hash- or arrayref expected (not a simple scalar, use allow_nonref to allow this) at /usr/lib/oar/oarstat line 285.";

fn running_jobs_from_json(output: &str) -> Result<Vec<u32>, SchedulerError> {
    let output = if output.trim() == OARSTAT_NO_JOBS { "{}" } else { output };
    let jobs: HashMap<String, JobSchema> = serde_json::from_str(output)?;

    let mut ids = Vec::new();
    for (key, job) in &jobs {
        if job.state.as_deref() != Some("Running") {
            continue;
        }
        match key.parse() {
            Ok(id) => ids.push(id),
            Err(err) => tracing::warn!(%key, %err, "skipping non-numeric job key"),
        }
    }
    ids.sort_unstable();
    Ok(ids)
}
