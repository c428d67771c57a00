//! Remote cleanup and apply for one machine.
//!
//! Cleanup always precedes apply and is independently invocable: it removes
//! every netlag artifact a previous run may have left behind. Conditions like
//! "no such address" or "no such table" are expected and swallowed; anything
//! else propagates. Apply pushes the three configuration programs in one
//! remote round trip each, concurrently, since addressing, shaping and
//! classification are independent kernel subsystems.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use netlag_cluster::{RemoteShell, ShellError};
use netlag_topo::program::{IpBatch, NftRuleset, TcBatch, NFT_TABLE};
use netlag_topo::{MachineConfiguration, ENDPOINT_PREFIX};

/// Pause after cleanup so the kernel state settles before reprogramming.
const SETTLE_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error(transparent)]
    Shell(#[from] ShellError),
    #[error("unexpected address listing from '{machine}': {source}")]
    AddrListing {
        machine: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
struct InterfaceAddrs {
    #[serde(default)]
    addr_info: Vec<AddrInfo>,
}

#[derive(Debug, Deserialize)]
struct AddrInfo {
    family: Option<String>,
    local: Option<String>,
}

/// Extracts the endpoint-prefix IPv4 addresses out of `ip -j addr show`
/// output.
fn endpoint_addresses(listing: &str) -> Result<Vec<Ipv4Addr>, serde_json::Error> {
    let interfaces: Vec<InterfaceAddrs> = serde_json::from_str(listing)?;
    Ok(interfaces
        .iter()
        .flat_map(|interface| &interface.addr_info)
        .filter(|addr| addr.family.as_deref() == Some("inet"))
        .filter_map(|addr| addr.local.as_deref()?.parse::<Ipv4Addr>().ok())
        .filter(|addr| addr.octets()[0] == 10)
        .collect())
}

/// One shell batch removing the discovered addresses and the aggregate
/// route. The route may legitimately be absent.
fn removal_script(addresses: &[Ipv4Addr], dev: &str) -> String {
    let mut lines: Vec<String> =
        addresses.iter().map(|addr| format!("ip addr del {addr}/32 dev {dev}")).collect();
    lines.push(format!("ip route del {ENDPOINT_PREFIX} dev {dev} 2>/dev/null || true"));
    lines.join("\n")
}

/// Removes every netlag artifact from the machine: endpoint addresses, the
/// aggregate route, the shaping hierarchy and the classification table.
pub async fn clean_machine<R: RemoteShell + ?Sized>(
    shell: &R,
    job: u32,
    hostname: &str,
    dev: &str,
) -> Result<(), RemoteError> {
    let listing = shell.execute(job, hostname, &format!("ip -j addr show {dev}"), None).await?;
    if listing.trim().is_empty() {
        tracing::info!(%hostname, %dev, "no interface information, skipping cleanup");
        return Ok(());
    }

    let addresses = endpoint_addresses(&listing).map_err(|source| RemoteError::AddrListing {
        machine: hostname.to_string(),
        source,
    })?;
    tracing::info!(%hostname, addresses = addresses.len(), "removing addresses and shaping state");

    let removal = removal_script(&addresses, dev);
    let tc_root = format!("tc qdisc del dev {dev} root 2>/dev/null || true");
    let tc_ingress = format!("tc qdisc del dev {dev} ingress 2>/dev/null || true");
    let nft_del = format!("nft delete table ip {NFT_TABLE} 2>/dev/null || true");
    tokio::try_join!(
        shell.execute(job, hostname, &removal, None),
        shell.execute(job, hostname, &tc_root, None),
        shell.execute(job, hostname, &tc_ingress, None),
        shell.execute(job, hostname, &nft_del, None),
    )?;

    tokio::time::sleep(SETTLE_DELAY).await;
    Ok(())
}

/// Pushes the machine's three programs, one round trip per subsystem,
/// concurrently. Empty programs are skipped.
pub async fn apply_machine<R: RemoteShell + ?Sized>(
    shell: &R,
    job: u32,
    config: &MachineConfiguration,
) -> Result<(), RemoteError> {
    let hostname = config.machine.hostname();
    tracing::info!(%hostname, "applying configuration");

    let addresses = async {
        if config.address_program.is_empty() {
            return Ok(String::new());
        }
        shell
            .execute(job, hostname, IpBatch::INTERPRETER, Some(&config.address_program.render()))
            .await
    };
    let shaping = async {
        if config.shaping_program.is_empty() {
            return Ok(String::new());
        }
        shell
            .execute(job, hostname, TcBatch::INTERPRETER, Some(&config.shaping_program.render()))
            .await
    };
    let classification = async {
        if config.classification_ruleset.is_empty() {
            return Ok(String::new());
        }
        shell
            .execute(
                job,
                hostname,
                NftRuleset::INTERPRETER,
                Some(&config.classification_ruleset.render()),
            )
            .await
    };

    tokio::try_join!(addresses, shaping, classification)?;
    Ok(())
}
