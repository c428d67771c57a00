use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eyre::Result;

use netlag::Orchestrator;
use netlag_cluster::{OarScheduler, OarShell};
use netlag_topo::{EndpointPolicy, Inventory, LatencyMatrix, TimeUnit};

#[derive(Debug, Parser)]
#[command(name = "netlag", version, about)]
struct Cli {
    /// Path to the machine inventory file.
    #[arg(long, default_value = "machines.txt", global = true)]
    inventory: PathBuf,

    /// Machines to skip when programming the cluster. They keep their
    /// endpoint slots but receive no remote calls.
    #[arg(long, global = true)]
    exclude: Vec<String>,

    /// Container image used for remote execution. Needs iproute2 and
    /// nftables.
    #[arg(long, default_value = OarShell::DEFAULT_IMAGE, global = true)]
    image: String,

    /// Unit of the latency matrix values ('ms' or 's').
    #[arg(long, default_value = "ms", global = true)]
    time_unit: TimeUnit,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Configure the job's machines to emulate the latency topology.
    Up {
        /// Batch-scheduler job id.
        job: u32,
        /// Endpoint count: a total, '<n>/machine' or '<n>/cpu'.
        endpoints: EndpointPolicy,
        /// Path to the latency matrix file.
        matrix: PathBuf,
    },
    /// Remove every netlag artifact from the job's machines.
    Down {
        /// Batch-scheduler job id.
        job: u32,
    },
    /// Print the per-machine bundles without touching the cluster.
    Configurations {
        /// Batch-scheduler job id.
        job: u32,
        /// Endpoint count: a total, '<n>/machine' or '<n>/cpu'.
        endpoints: EndpointPolicy,
        /// Path to the latency matrix file.
        matrix: PathBuf,
    },
    /// List the invoking user's running jobs.
    Jobs,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let inventory = Inventory::load(&cli.inventory)?;
    let orchestrator = Orchestrator::new(inventory, OarScheduler::new(), OarShell::new(cli.image))
        .with_excluded(cli.exclude);

    match cli.command {
        Command::Up { job, endpoints, matrix } => {
            let matrix = LatencyMatrix::load(&matrix, cli.time_unit)?;
            let table = orchestrator.up(job, endpoints, &matrix).await?;
            for binding in table {
                println!("{} {}", binding.machine, binding.address);
            }
        }
        Command::Down { job } => {
            orchestrator.down(job).await?;
        }
        Command::Configurations { job, endpoints, matrix } => {
            let matrix = LatencyMatrix::load(&matrix, cli.time_unit)?;
            let configs = orchestrator.configurations(job, endpoints, &matrix).await?;
            for (idx, config) in configs.iter().enumerate() {
                if idx > 0 {
                    println!("\n{}\n", "=".repeat(80));
                }
                print!("{config}");
            }
        }
        Command::Jobs => {
            for job in orchestrator.running_jobs().await? {
                println!("{job}");
            }
        }
    }

    Ok(())
}
