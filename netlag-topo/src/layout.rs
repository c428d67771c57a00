//! Endpoint-to-machine layout.
//!
//! Partitions the endpoint index space evenly across a job's machines, in the
//! order the scheduler listed them, by ceiling division: every machine gets
//! the same number of slots, so the total allocated is at least the requested
//! endpoint count and less than one extra slot per machine beyond it.

use std::net::Ipv4Addr;
use std::ops::Range;

use thiserror::Error;

use crate::addr::{endpoint_address, AddressError};
use crate::inventory::Machine;

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("cannot lay out endpoints over an empty machine list")]
    NoMachines,
    #[error(transparent)]
    Address(#[from] AddressError),
}

/// The assignment of endpoint slots to a job's machines.
#[derive(Debug, Clone)]
pub struct EndpointLayout {
    machines: Vec<Machine>,
    per_machine: usize,
    total: usize,
}

impl EndpointLayout {
    /// Lays `total` endpoints out over `machines` (scheduler order).
    pub fn new(machines: Vec<Machine>, total: usize) -> Result<Self, LayoutError> {
        if machines.is_empty() {
            return Err(LayoutError::NoMachines);
        }
        let per_machine = total.div_ceil(machines.len());
        Ok(Self { machines, per_machine, total })
    }

    pub fn machines(&self) -> &[Machine] {
        &self.machines
    }

    /// Endpoint slots per machine, `ceil(total / machines)`.
    pub fn per_machine(&self) -> usize {
        self.per_machine
    }

    /// The requested endpoint count. Slot indices at or above this are
    /// padding from the ceiling division.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Global endpoint slot range owned by the machine at `position` in the
    /// job's machine list.
    pub fn slots(&self, position: usize) -> Range<usize> {
        position * self.per_machine..(position + 1) * self.per_machine
    }

    /// The machine owning a global endpoint slot.
    pub fn owner(&self, endpoint: usize) -> Option<&Machine> {
        self.machines.get(endpoint / self.per_machine)
    }

    /// The address of a global endpoint slot: the owner's inventory index
    /// and the slot's position on the owner feed the addressing scheme.
    pub fn address(&self, endpoint: usize) -> Result<Ipv4Addr, LayoutError> {
        let machine = self.machines[endpoint / self.per_machine].index();
        Ok(endpoint_address(machine, endpoint % self.per_machine)?)
    }
}
