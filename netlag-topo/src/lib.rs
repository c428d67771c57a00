//! # netlag-topo
//!
//! Pure configuration generation for emulating a point-to-point latency
//! topology on a batch-scheduled cluster.
//!
//! Everything in this crate is deterministic and touches no network: given a
//! machine [`Inventory`](inventory::Inventory), a square
//! [`LatencyMatrix`](matrix::LatencyMatrix) and an endpoint count, it produces
//! one [`MachineConfiguration`](plan::MachineConfiguration) per machine.
//! Pushing those configurations to the cluster is the job of the `netlag`
//! binary crate.
//!
//! ## Pipeline
//!
//! ```text
//! Inventory ──┐
//!             ├─▶ EndpointLayout ──▶ latency_classes ──▶ MachineConfiguration
//! matrix ─────┘        │                                   │
//!                      │                                   ├─ IpBatch     (ip -b -)
//!                      └─ endpoint_address                 ├─ TcBatch     (tc -b -)
//!                                                          └─ NftRuleset  (nft -f -)
//! ```
//!
//! The central performance property: per-machine shaping state is
//! O(distinct rounded latencies), never O(endpoint pairs).

pub mod addr;
pub mod classes;
pub mod inventory;
pub mod layout;
pub mod matrix;
pub mod plan;
pub mod policy;
pub mod program;

pub use addr::{endpoint_address, ENDPOINT_PREFIX};
pub use classes::{latency_classes, LatencyClass};
pub use inventory::{Inventory, Machine};
pub use layout::EndpointLayout;
pub use matrix::{LatencyMatrix, TimeUnit};
pub use plan::MachineConfiguration;
pub use policy::EndpointPolicy;
