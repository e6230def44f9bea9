//! ---
//! netorch_section: "06-topology"
//! netorch_subsection: "module"
//! netorch_type: "source"
//! netorch_scope: "code"
//! netorch_description: "Link coordination between devices on remote computes."
//! netorch_version: "v0.0.0-prealpha"
//! netorch_owner: "tbd"
//! ---
//! Links between devices, possibly placed on different computes.

pub mod coordinator;
pub mod error;
pub mod link;
pub mod ports;
mod reservation;

pub use coordinator::TopologyCoordinator;
pub use error::{LinkError, Result};
pub use link::{udp_tunnel, Link, LinkEndpoint, LinkId, LinkSide, LinkSpec};
pub use ports::UdpPortAllocator;
pub use reservation::OrphanedNio;
