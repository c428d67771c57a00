//! Deterministic endpoint addressing.
//!
//! Every endpoint address lives inside [`ENDPOINT_PREFIX`]. The owning
//! machine's inventory index occupies the second octet, so two machines can
//! never hand out the same address, and the local endpoint slot is spread
//! over the remaining two octets in base 254 (the host octet stays in
//! `1..=254`, never `0` or `255`).

use std::net::Ipv4Addr;

/// The prefix all endpoint addresses are allocated from. Also used as the
/// aggregate route pushed to every machine and as the cleanup match.
pub const ENDPOINT_PREFIX: &str = "10.0.0.0/8";

/// Endpoint slots addressable on a single machine.
pub const MACHINE_CAPACITY: usize = 255 * 254;

/// Highest machine inventory index that fits the second octet.
pub const MAX_MACHINE_INDEX: usize = 254;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("machine index {0} does not fit the addressing scheme (max {MAX_MACHINE_INDEX})")]
    MachineIndex(usize),
    #[error("endpoint slot {0} exceeds the per-machine capacity of {MACHINE_CAPACITY} addresses")]
    Capacity(usize),
}

/// Maps a (machine inventory index, local endpoint slot) pair to its address.
///
/// Pure and collision-free: distinct input pairs always yield distinct
/// addresses as long as machine indices are distinct.
pub fn endpoint_address(machine_index: usize, local_index: usize) -> Result<Ipv4Addr, AddressError> {
    if machine_index > MAX_MACHINE_INDEX {
        return Err(AddressError::MachineIndex(machine_index));
    }
    let c = local_index / 254;
    let d = local_index % 254;
    if c > 254 {
        return Err(AddressError::Capacity(local_index));
    }
    Ok(Ipv4Addr::new(10, machine_index as u8, c as u8, d as u8 + 1))
}
