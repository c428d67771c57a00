//! The canonical machine inventory.
//!
//! An [`Inventory`] is an immutable, explicitly injected value: the ordered
//! list of every machine the cluster can schedule, each with its designated
//! network interface and CPU count. A machine's position in the inventory is
//! its index for addressing purposes, so the file must list machines in a
//! stable order.
//!
//! File format, one machine per line:
//!
//! ```text
//! # hostname  cpus  interface (- when not configured)
//! atlas-1     32    bond0
//! atlas-2     32    bond0
//! boreas-01   64    -
//! ```

use std::path::Path;

use thiserror::Error;

use crate::addr::MAX_MACHINE_INDEX;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("failed to read inventory from '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed inventory line {line}: expected '<hostname> <cpus> <interface|->', got '{content}'")]
    Malformed { line: usize, content: String },
    #[error("invalid cpu count on inventory line {line}: {source}")]
    InvalidCpus {
        line: usize,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("duplicate machine '{0}' in inventory")]
    Duplicate(String),
    #[error("inventory has {0} machines, the addressing scheme supports at most {max}", max = MAX_MACHINE_INDEX + 1)]
    TooManyMachines(usize),
    #[error("unknown machine: '{0}'")]
    UnknownMachine(String),
    #[error("no interface configured for machine '{0}'")]
    MissingInterface(String),
}

/// One physical node of the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Machine {
    hostname: String,
    index: usize,
    cpus: u32,
    interface: Option<String>,
}

impl Machine {
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Position in the canonical inventory. Feeds the addressing scheme.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn cpus(&self) -> u32 {
        self.cpus
    }

    /// The designated interface, or an error when the machine is referenced
    /// as a target without one configured.
    pub fn interface(&self) -> Result<&str, InventoryError> {
        self.interface
            .as_deref()
            .ok_or_else(|| InventoryError::MissingInterface(self.hostname.clone()))
    }
}

/// Immutable ordered machine inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inventory {
    machines: Vec<Machine>,
}

impl Inventory {
    /// Parses the inventory text format. Blank lines and `#` comments are
    /// skipped.
    pub fn parse(content: &str) -> Result<Self, InventoryError> {
        let mut machines: Vec<Machine> = Vec::new();

        for (line_idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut fields = line.split_whitespace();
            let (hostname, cpus, interface) = match (fields.next(), fields.next(), fields.next(), fields.next()) {
                (Some(hostname), Some(cpus), Some(interface), None) => (hostname, cpus, interface),
                _ => {
                    return Err(InventoryError::Malformed {
                        line: line_idx + 1,
                        content: line.to_string(),
                    });
                }
            };

            if machines.iter().any(|m| m.hostname == hostname) {
                return Err(InventoryError::Duplicate(hostname.to_string()));
            }

            let cpus = cpus.parse().map_err(|source| InventoryError::InvalidCpus {
                line: line_idx + 1,
                source,
            })?;
            let interface = match interface {
                "-" => None,
                name => Some(name.to_string()),
            };

            machines.push(Machine {
                hostname: hostname.to_string(),
                index: machines.len(),
                cpus,
                interface,
            });
        }

        if machines.len() > MAX_MACHINE_INDEX + 1 {
            return Err(InventoryError::TooManyMachines(machines.len()));
        }

        Ok(Self { machines })
    }

    /// Reads and parses an inventory file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, InventoryError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| InventoryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Looks a machine up by hostname. Unknown machines are invalid targets.
    pub fn get(&self, hostname: &str) -> Result<&Machine, InventoryError> {
        self.machines
            .iter()
            .find(|m| m.hostname == hostname)
            .ok_or_else(|| InventoryError::UnknownMachine(hostname.to_string()))
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Machine> {
        self.machines.iter()
    }
}
