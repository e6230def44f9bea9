//! ---
//! netorch_section: "02-compute-backends"
//! netorch_subsection: "module"
//! netorch_type: "source"
//! netorch_scope: "code"
//! netorch_description: "Compute node handles and REST transports."
//! netorch_version: "v0.0.0-prealpha"
//! netorch_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Handles describing remote compute nodes and the transport used to reach them.
//!
//! The orchestrator never talks HTTP directly: every remote call goes through a
//! [`ComputeHandle`], which forwards to a [`ComputeTransport`]. The reqwest-backed
//! [`HttpTransport`] is the production implementation.

pub mod handle;
pub mod http;
pub mod routes;
pub mod transport;

pub use handle::{ComputeAddress, ComputeDirectory, ComputeHandle, Credentials, Reachability};
pub use http::HttpTransport;
pub use transport::{ComputeResponse, ComputeTransport, HttpMethod, Result, TransportError};
