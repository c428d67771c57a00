//! Per-machine concurrent fan-out.
//!
//! Every orchestrator operation issues one task per machine and joins them at
//! a single barrier. The two operations need different failure behavior, so
//! the barrier is parameterized by a [`Policy`]: `up` wants the first failure
//! immediately, `down` must let every machine finish and then report all
//! failures at once.

use std::future::Future;

use thiserror::Error;
use tokio::task::JoinSet;

use crate::remote::RemoteError;

/// How the join barrier reacts to a failing machine task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Return the first failure; remaining tasks are dropped, not awaited.
    FailFast,
    /// Await every task, then aggregate all failures into one error.
    CollectAll,
}

#[derive(Debug, Error)]
pub enum FanoutError {
    #[error("{hostname}: {source}")]
    Machine {
        hostname: String,
        #[source]
        source: RemoteError,
    },
    #[error("operation failed on {} machine(s): {}", .failures.len(), describe(.failures))]
    Aggregate { failures: Vec<(String, RemoteError)> },
    #[error("machine task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

fn describe(failures: &[(String, RemoteError)]) -> String {
    failures
        .iter()
        .map(|(hostname, error)| format!("{hostname} ({error})"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Runs one task per machine concurrently and joins them under `policy`.
/// Each entry pairs a hostname with the future doing that machine's work.
pub async fn join_machines<F>(tasks: Vec<(String, F)>, policy: Policy) -> Result<(), FanoutError>
where
    F: Future<Output = Result<(), RemoteError>> + Send + 'static,
{
    let mut set = JoinSet::new();
    for (hostname, task) in tasks {
        set.spawn(async move { (hostname, task.await) });
    }

    match policy {
        Policy::FailFast => {
            while let Some(joined) = set.join_next().await {
                let (hostname, result) = joined?;
                result.map_err(|source| FanoutError::Machine { hostname, source })?;
            }
            Ok(())
        }
        Policy::CollectAll => {
            let mut failures = Vec::new();
            while let Some(joined) = set.join_next().await {
                let (hostname, result) = joined?;
                if let Err(source) = result {
                    tracing::error!(%hostname, %source, "machine task failed");
                    failures.push((hostname, source));
                }
            }
            if failures.is_empty() {
                Ok(())
            } else {
                failures.sort_by(|(a, _), (b, _)| a.cmp(b));
                Err(FanoutError::Aggregate { failures })
            }
        }
    }
}
