//! # netlag-cluster
//!
//! The two external collaborators netlag drives a cluster through:
//!
//! - [`Scheduler`](scheduler::Scheduler) — asks the batch scheduler which
//!   machines a job was allocated;
//! - [`RemoteShell`](shell::RemoteShell) — runs a script on one machine
//!   inside a root-privileged, host-networked, ephemeral container.
//!
//! Both are traits so the orchestrator can be exercised against in-memory
//! fakes; the production implementations shell out to `oarstat` and `oarsh`.

pub mod scheduler;
pub mod shell;

pub use scheduler::{OarScheduler, Scheduler, SchedulerError};
pub use shell::{OarShell, RemoteShell, ShellError};
