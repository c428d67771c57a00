//! Per-machine configuration bundles.

use std::fmt;
use std::net::Ipv4Addr;

use thiserror::Error;

use crate::classes::{latency_classes, MatrixTooSmall};
use crate::inventory::{InventoryError, Machine};
use crate::layout::{EndpointLayout, LayoutError};
use crate::matrix::LatencyMatrix;
use crate::program::{IpBatch, IpCommand, NftPairSet, NftRuleset, TcBatch, TcCommand};

/// Minor number of the default shaping class. Traffic carrying no mark lands
/// here undelayed, which is what untracked (e.g. control) traffic must do.
pub const DEFAULT_CLASS: u16 = 9999;

/// Rate given to every shaping class; the hierarchy classifies, it does not
/// limit bandwidth.
pub const CLASS_RATE: &str = "10gbit";

#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Inventory(#[from] InventoryError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Matrix(#[from] MatrixTooSmall),
    #[error("machine '{machine}' has {classes} latency classes, the shaping hierarchy supports at most {max}", max = DEFAULT_CLASS - 1)]
    TooManyClasses { machine: String, classes: usize },
}

/// Everything one machine needs to realize its slice of the topology.
///
/// Built fresh per invocation and never persisted.
#[derive(Debug, Clone)]
pub struct MachineConfiguration {
    pub machine: Machine,
    pub addresses: Vec<Ipv4Addr>,
    pub address_program: IpBatch,
    pub shaping_program: TcBatch,
    pub classification_ruleset: NftRuleset,
}

impl MachineConfiguration {
    /// Builds the bundle for the machine at `position` in the layout. Pure:
    /// touches no network, fails only on configuration errors.
    pub fn build(
        layout: &EndpointLayout,
        position: usize,
        matrix: &LatencyMatrix,
    ) -> Result<Self, PlanError> {
        let machine = layout.machines()[position].clone();
        let dev = machine.interface()?.to_string();

        let mut addresses = Vec::with_capacity(layout.per_machine());
        let mut address_program = IpBatch::default();
        address_program.push(IpCommand::RouteAdd { dev: dev.clone() });
        for endpoint in layout.slots(position) {
            let addr = layout.address(endpoint)?;
            addresses.push(addr);
            address_program.push(IpCommand::AddrAdd { addr, dev: dev.clone() });
        }

        let classes = latency_classes(matrix, layout.slots(position), layout.total())?;
        if classes.len() >= DEFAULT_CLASS as usize {
            return Err(PlanError::TooManyClasses {
                machine: machine.hostname().to_string(),
                classes: classes.len(),
            });
        }

        let mut shaping_program = TcBatch::default();
        shaping_program.push(TcCommand::QdiscAddRootHtb {
            dev: dev.clone(),
            default_class: DEFAULT_CLASS,
        });
        shaping_program.push(TcCommand::ClassAddHtb {
            dev: dev.clone(),
            class: DEFAULT_CLASS,
            rate: CLASS_RATE,
        });

        let mut classification_ruleset = NftRuleset::default();
        for class in &classes {
            shaping_program.push(TcCommand::ClassAddHtb {
                dev: dev.clone(),
                class: class.id,
                rate: CLASS_RATE,
            });
            shaping_program.push(TcCommand::QdiscAddNetem {
                dev: dev.clone(),
                class: class.id,
                handle: class.id + 1,
                delay_ms: class.delay_ms,
            });
            shaping_program.push(TcCommand::FilterAddFwMark {
                dev: dev.clone(),
                mark: class.id,
                class: class.id,
            });

            let mut elements = Vec::with_capacity(class.pairs.len());
            for &(src, dst) in &class.pairs {
                elements.push((layout.address(src)?, layout.address(dst)?));
            }
            classification_ruleset.push(NftPairSet { mark: class.id, elements });
        }

        Ok(Self {
            machine,
            addresses,
            address_program,
            shaping_program,
            classification_ruleset,
        })
    }

    /// Builds the bundles for every machine in the layout.
    pub fn build_all(
        layout: &EndpointLayout,
        matrix: &LatencyMatrix,
    ) -> Result<Vec<Self>, PlanError> {
        (0..layout.machines().len()).map(|position| Self::build(layout, position, matrix)).collect()
    }
}

impl fmt::Display for MachineConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Machine: {}", self.machine.hostname())?;
        writeln!(f, "{}", "-".repeat(40))?;

        writeln!(f, "\nAddresses:")?;
        for addr in &self.addresses {
            writeln!(f, "{addr}")?;
        }

        writeln!(f, "\nAddress program ({}):", IpBatch::INTERPRETER)?;
        f.write_str(&self.address_program.render())?;

        writeln!(f, "\nShaping program ({}):", TcBatch::INTERPRETER)?;
        f.write_str(&self.shaping_program.render())?;

        writeln!(f, "\nClassification ruleset ({}):", NftRuleset::INTERPRETER)?;
        f.write_str(&self.classification_ruleset.render())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Inventory;
    use crate::program::NFT_TABLE;

    fn inventory() -> Inventory {
        Inventory::parse("atlas-1 16 bond0\natlas-2 16 bond0\nboreas-1 16 -\n").unwrap()
    }

    fn layout(hostnames: &[&str], total: usize) -> EndpointLayout {
        let inventory = inventory();
        let machines = hostnames.iter().map(|h| inventory.get(h).unwrap().clone()).collect();
        EndpointLayout::new(machines, total).unwrap()
    }

    #[test]
    fn two_endpoints_on_one_machine() {
        let matrix: LatencyMatrix = "0 1\n2 0\n".parse().unwrap();
        let config = MachineConfiguration::build(&layout(&["atlas-1"], 2), 0, &matrix).unwrap();

        assert_eq!(
            config.addresses,
            vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)]
        );
        assert_eq!(
            config.address_program.render(),
            "route add 10.0.0.0/8 dev bond0\n\
             addr add 10.0.0.1/32 dev bond0\n\
             addr add 10.0.0.2/32 dev bond0\n"
        );
        assert_eq!(
            config.shaping_program.render(),
            "qdisc add dev bond0 root handle 1: htb default 9999\n\
             class add dev bond0 parent 1: classid 1:9999 htb rate 10gbit\n\
             class add dev bond0 parent 1: classid 1:1 htb rate 10gbit\n\
             qdisc add dev bond0 parent 1:1 handle 2: netem delay 1ms\n\
             filter add dev bond0 parent 1:0 prio 1 handle 1 fw flowid 1:1\n\
             class add dev bond0 parent 1: classid 1:2 htb rate 10gbit\n\
             qdisc add dev bond0 parent 1:2 handle 3: netem delay 2ms\n\
             filter add dev bond0 parent 1:0 prio 1 handle 2 fw flowid 1:2\n"
        );

        let ruleset = config.classification_ruleset.render();
        assert!(ruleset.contains(&format!("table ip {NFT_TABLE}")));
        assert!(ruleset.contains("10.0.0.1 . 10.0.0.2"));
        assert!(ruleset.contains("10.0.0.2 . 10.0.0.1"));
        assert!(ruleset.contains("meta mark set 1"));
        assert!(ruleset.contains("meta mark set 2"));
    }

    #[test]
    fn class_count_tracks_distinct_latencies_not_pairs() {
        // 4 endpoints on one machine, 12 ordered pairs, but only two distinct
        // rounded latencies.
        let matrix: LatencyMatrix =
            "0 1 1 5\n1 0 5 1\n1 5 0 1\n5 1 1 0\n".parse().unwrap();
        let config = MachineConfiguration::build(&layout(&["atlas-1"], 4), 0, &matrix).unwrap();

        let netems = config
            .shaping_program
            .commands()
            .iter()
            .filter(|c| matches!(c, TcCommand::QdiscAddNetem { .. }))
            .count();
        assert_eq!(netems, 2);

        let pairs: usize =
            config.classification_ruleset.sets().iter().map(|s| s.elements.len()).sum();
        assert_eq!(pairs, 12);
    }

    #[test]
    fn cross_machine_pairs_use_the_peer_machine_octet() {
        let matrix: LatencyMatrix = "0 3\n3 0\n".parse().unwrap();
        let config = MachineConfiguration::build(&layout(&["atlas-1", "atlas-2"], 2), 1, &matrix)
            .unwrap();

        assert_eq!(config.addresses, vec![Ipv4Addr::new(10, 1, 0, 1)]);
        let ruleset = config.classification_ruleset.render();
        assert!(ruleset.contains("10.1.0.1 . 10.0.0.1"));
    }

    #[test]
    fn zero_endpoints_yields_the_default_only_bundle() {
        let matrix: LatencyMatrix = "".parse().unwrap();
        let config = MachineConfiguration::build(&layout(&["atlas-1"], 0), 0, &matrix).unwrap();

        assert!(config.addresses.is_empty());
        assert_eq!(config.address_program.render(), "route add 10.0.0.0/8 dev bond0\n");
        assert_eq!(
            config.shaping_program.render(),
            "qdisc add dev bond0 root handle 1: htb default 9999\n\
             class add dev bond0 parent 1: classid 1:9999 htb rate 10gbit\n"
        );
        assert!(config.classification_ruleset.is_empty());
        assert_eq!(config.classification_ruleset.render(), "");
    }

    #[test]
    fn missing_interface_is_a_configuration_error() {
        let matrix: LatencyMatrix = "0 1\n1 0\n".parse().unwrap();
        let err = MachineConfiguration::build(&layout(&["boreas-1"], 2), 0, &matrix).unwrap_err();
        assert!(matches!(err, PlanError::Inventory(InventoryError::MissingInterface(_))));
    }

    #[test]
    fn undersized_matrix_is_a_configuration_error() {
        let matrix: LatencyMatrix = "0 1\n1 0\n".parse().unwrap();
        let err = MachineConfiguration::build(&layout(&["atlas-1"], 3), 0, &matrix).unwrap_err();
        assert!(matches!(err, PlanError::Matrix(_)));
    }
}
