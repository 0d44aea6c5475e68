//! In-memory cluster backend for Plinth.
//!
//! [`InMemoryCluster`] stands in for a real API server: typed objects,
//! watches, manifest installation and secrets, all held in process. It backs
//! the tests and the local (file-driven) mode of the `plinth` binary.
//!
//! # Example
//!
//! ```ignore
//! use plinth_cluster_memory::InMemoryCluster;
//! use std::sync::Arc;
//!
//! let cluster = Arc::new(InMemoryCluster::new());
//! cluster.fail_manifest("ingress-controller", "ingress webhook unreachable");
//! ```

mod cluster;
mod deployer;

pub use cluster::InMemoryCluster;
pub use deployer::DeployerCall;
