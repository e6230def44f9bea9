//! ---
//! netorch_section: "06-topology"
//! netorch_subsection: "module"
//! netorch_type: "source"
//! netorch_scope: "code"
//! netorch_description: "Link coordination between devices on remote computes."
//! netorch_version: "v0.0.0-prealpha"
//! netorch_owner: "tbd"
//! ---
//! UDP port bookkeeping for links in flight, and the NIOs left behind when a link
//! could not be completed.

use std::sync::Arc;

use netorch_common::config::LinksConfig;
use netorch_compute::ComputeHandle;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{LinkError, Result};
use crate::link::LinkEndpoint;
use crate::ports::UdpPortAllocator;

/// A NIO still configured on a compute without a matching peer. Its UDP port stays
/// reserved until a teardown succeeds or the device is destroyed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanedNio {
    pub endpoint: LinkEndpoint,
    pub compute: String,
    pub udp_port: u16,
    /// NIO path relative to the compute API root.
    pub path: String,
}

/// Port allocator and orphan list, shared with background compensation tasks.
#[derive(Debug)]
pub(crate) struct PortBook {
    ports: Mutex<UdpPortAllocator>,
    orphans: Mutex<Vec<OrphanedNio>>,
}

impl PortBook {
    pub(crate) fn new(config: &LinksConfig) -> Self {
        Self {
            ports: Mutex::new(UdpPortAllocator::new(config)),
            orphans: Mutex::new(Vec::new()),
        }
    }

    /// Reserve one port on each compute, both or neither.
    pub(crate) fn reserve(self: &Arc<Self>, first: &str, second: &str) -> Result<Reservation> {
        let mut ports = self.ports.lock();
        let first_port = ports
            .allocate(first)
            .ok_or_else(|| LinkError::PortsExhausted(first.to_owned()))?;
        let Some(second_port) = ports.allocate(second) else {
            ports.release(first, first_port);
            return Err(LinkError::PortsExhausted(second.to_owned()));
        };
        Ok(Reservation {
            book: Arc::clone(self),
            first: (first.to_owned(), first_port),
            second: (second.to_owned(), second_port),
            established: None,
            settled: false,
        })
    }

    pub(crate) fn release(&self, compute: &str, port: u16) {
        self.ports.lock().release(compute, port);
    }

    pub(crate) fn orphans(&self) -> Vec<OrphanedNio> {
        self.orphans.lock().clone()
    }

    fn record_orphan(&self, orphan: OrphanedNio) {
        warn!(
            device = %orphan.endpoint.device,
            compute = %orphan.compute,
            udp_port = orphan.udp_port,
            "half-link left on compute, port kept reserved"
        );
        self.orphans.lock().push(orphan);
    }

    /// Forget an orphan and free its port.
    pub(crate) fn settle(&self, orphan: &OrphanedNio) {
        let removed = {
            let mut orphans = self.orphans.lock();
            let before = orphans.len();
            orphans.retain(|held| held != orphan);
            before != orphans.len()
        };
        if removed {
            self.release(&orphan.compute, orphan.udp_port);
            debug!(device = %orphan.endpoint.device, compute = %orphan.compute, "orphaned NIO settled");
        }
    }

    /// Delete an orphaned NIO; a `404` counts as gone. Returns whether it is settled.
    pub(crate) async fn compensate(&self, compute: &ComputeHandle, orphan: &OrphanedNio) -> bool {
        match compute.delete(&orphan.path).await {
            Ok(_) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                warn!(
                    device = %orphan.endpoint.device,
                    compute = %orphan.compute,
                    error = %err,
                    "orphaned NIO teardown failed"
                );
                return false;
            }
        }
        self.settle(orphan);
        true
    }
}

/// Ports reserved for one `create_link` call.
///
/// Dropped without [`Reservation::commit`] or [`Reservation::abort`], as happens when
/// the caller cancels the link future, it frees the ports; if the first side was
/// already established that side is recorded as orphaned and a compensating teardown
/// is spawned on the current runtime.
pub(crate) struct Reservation {
    book: Arc<PortBook>,
    first: (String, u16),
    second: (String, u16),
    established: Option<(OrphanedNio, Arc<ComputeHandle>)>,
    settled: bool,
}

impl Reservation {
    pub(crate) fn first_port(&self) -> u16 {
        self.first.1
    }

    pub(crate) fn second_port(&self) -> u16 {
        self.second.1
    }

    /// The first side's NIO now exists on its compute.
    pub(crate) fn first_established(&mut self, endpoint: LinkEndpoint, path: String, compute: Arc<ComputeHandle>) {
        let orphan = OrphanedNio {
            endpoint,
            compute: self.first.0.clone(),
            udp_port: self.first.1,
            path,
        };
        self.established = Some((orphan, compute));
    }

    /// Both sides are up; the ports now belong to the link.
    pub(crate) fn commit(mut self) {
        self.settled = true;
    }

    /// The link failed. The first port is kept only when an established first side
    /// could not be torn down.
    pub(crate) fn abort(mut self, compensated: bool) {
        self.settled = true;
        self.book.release(&self.second.0, self.second.1);
        match self.established.take() {
            Some((orphan, _)) if !compensated => self.book.record_orphan(orphan),
            _ => self.book.release(&self.first.0, self.first.1),
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.book.release(&self.second.0, self.second.1);
        let Some((orphan, compute)) = self.established.take() else {
            self.book.release(&self.first.0, self.first.1);
            return;
        };
        self.book.record_orphan(orphan.clone());
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let book = Arc::clone(&self.book);
                runtime.spawn(async move {
                    book.compensate(&compute, &orphan).await;
                });
            }
            Err(_) => warn!(
                device = %orphan.endpoint.device,
                "no runtime for compensating teardown, orphan kept for reaping"
            ),
        }
    }
}
