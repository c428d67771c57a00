//! The three cluster-wide operations: `up`, `down`, `configurations`.

use std::net::Ipv4Addr;
use std::sync::Arc;

use thiserror::Error;

use netlag_cluster::{RemoteShell, Scheduler, SchedulerError};
use netlag_topo::inventory::InventoryError;
use netlag_topo::layout::LayoutError;
use netlag_topo::matrix::LatencyMatrix;
use netlag_topo::plan::PlanError;
use netlag_topo::{EndpointLayout, EndpointPolicy, Inventory, Machine, MachineConfiguration};

use crate::fanout::{self, FanoutError, Policy};
use crate::remote;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Inventory(#[from] InventoryError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Fanout(#[from] FanoutError),
}

/// One row of the endpoint table printed by `up`: which machine serves an
/// endpoint address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointBinding {
    pub machine: String,
    pub address: Ipv4Addr,
}

/// Drives the cluster: resolves a job's machines against the inventory,
/// builds their configurations and fans the remote work out.
#[derive(Debug)]
pub struct Orchestrator<S, R> {
    inventory: Inventory,
    scheduler: S,
    shell: Arc<R>,
    excluded: Vec<String>,
}

impl<S, R> Orchestrator<S, R>
where
    S: Scheduler,
    R: RemoteShell + 'static,
{
    pub fn new(inventory: Inventory, scheduler: S, shell: R) -> Self {
        Self { inventory, scheduler, shell: Arc::new(shell), excluded: Vec::new() }
    }

    /// Machines that keep their endpoint slots but receive no remote calls.
    pub fn with_excluded(mut self, excluded: Vec<String>) -> Self {
        self.excluded = excluded;
        self
    }

    fn is_excluded(&self, hostname: &str) -> bool {
        self.excluded.iter().any(|excluded| excluded == hostname)
    }

    /// Resolves a job's machines against the inventory, in scheduler order.
    async fn job_machines(&self, job: u32) -> Result<Vec<Machine>, Error> {
        let hostnames = self.scheduler.machines(job).await?;
        tracing::info!(job, machines = hostnames.len(), "resolved job machines");
        hostnames
            .iter()
            .map(|hostname| Ok(self.inventory.get(hostname)?.clone()))
            .collect()
    }

    fn build_configurations(
        &self,
        machines: Vec<Machine>,
        policy: EndpointPolicy,
        matrix: &LatencyMatrix,
    ) -> Result<Vec<MachineConfiguration>, Error> {
        let total = policy.resolve(&machines);
        let layout = EndpointLayout::new(machines, total)?;
        tracing::info!(
            total,
            per_machine = layout.per_machine(),
            "laid out endpoints over {} machines",
            layout.machines().len()
        );
        Ok(MachineConfiguration::build_all(&layout, matrix)?)
    }

    /// Cleans and configures every machine of the job, concurrently and
    /// fail-fast. Returns the endpoint table in machine-then-address order.
    pub async fn up(
        &self,
        job: u32,
        policy: EndpointPolicy,
        matrix: &LatencyMatrix,
    ) -> Result<Vec<EndpointBinding>, Error> {
        let machines = self.job_machines(job).await?;
        let configs = self.build_configurations(machines, policy, matrix)?;

        let table: Vec<EndpointBinding> = configs
            .iter()
            .flat_map(|config| {
                let machine = config.machine.hostname().to_string();
                config
                    .addresses
                    .iter()
                    .map(move |&address| EndpointBinding { machine: machine.clone(), address })
            })
            .collect();

        let mut tasks = Vec::with_capacity(configs.len());
        for config in configs {
            let hostname = config.machine.hostname().to_string();
            if self.is_excluded(&hostname) {
                tracing::info!(%hostname, "machine excluded, skipping setup");
                continue;
            }
            let dev = config.machine.interface()?.to_string();
            let shell = Arc::clone(&self.shell);
            tasks.push((hostname.clone(), async move {
                remote::clean_machine(shell.as_ref(), job, &hostname, &dev).await?;
                remote::apply_machine(shell.as_ref(), job, &config).await
            }));
        }

        fanout::join_machines(tasks, Policy::FailFast).await?;
        Ok(table)
    }

    /// Cleans every machine of the job. Never fail-fast: all machines get
    /// their cleanup attempt, then one aggregate error names the failures.
    pub async fn down(&self, job: u32) -> Result<(), Error> {
        let machines = self.job_machines(job).await?;

        let mut tasks = Vec::with_capacity(machines.len());
        for machine in machines {
            let hostname = machine.hostname().to_string();
            if self.is_excluded(&hostname) {
                tracing::info!(%hostname, "machine excluded, skipping cleanup");
                continue;
            }
            let dev = machine.interface()?.to_string();
            let shell = Arc::clone(&self.shell);
            tasks.push((
                hostname.clone(),
                async move { remote::clean_machine(shell.as_ref(), job, &hostname, &dev).await },
            ));
        }

        fanout::join_machines(tasks, Policy::CollectAll).await?;
        tracing::info!(job, "cleanup completed on all machines");
        Ok(())
    }

    /// Dry run: builds every machine's bundle without any remote call.
    pub async fn configurations(
        &self,
        job: u32,
        policy: EndpointPolicy,
        matrix: &LatencyMatrix,
    ) -> Result<Vec<MachineConfiguration>, Error> {
        let machines = self.job_machines(job).await?;
        self.build_configurations(machines, policy, matrix)
    }

    /// The invoking user's running jobs, for `netlag jobs`.
    pub async fn running_jobs(&self) -> Result<Vec<u32>, Error> {
        Ok(self.scheduler.running_jobs().await?)
    }
}
