//! ---
//! netorch_section: "06-topology"
//! netorch_subsection: "module"
//! netorch_type: "source"
//! netorch_scope: "code"
//! netorch_description: "Link coordination between devices on remote computes."
//! netorch_version: "v0.0.0-prealpha"
//! netorch_owner: "tbd"
//! ---
use std::sync::Arc;

use indexmap::IndexMap;
use netorch_common::config::LinksConfig;
use netorch_compute::{routes, ComputeHandle};
use netorch_devices::{DeviceId, DeviceRecord, DeviceStatus, OperationToken};
use netorch_logging::{net_info, net_warn, LogContext};
use netorch_orchestrator::{BatchReport, LifecycleError, LifecycleOrchestrator, Operation};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{LinkError, Result};
use crate::link::{udp_tunnel, Link, LinkEndpoint, LinkId, LinkSide, LinkSpec};
use crate::reservation::{OrphanedNio, PortBook};

/// A link side resolved against the registry and its compute.
struct Resolved {
    endpoint: LinkEndpoint,
    record: DeviceRecord,
    compute: Arc<ComputeHandle>,
}

impl Resolved {
    fn nio_path(&self) -> String {
        routes::nio(
            self.record.project_id().as_str(),
            self.record.device_type(),
            self.record.id().as_str(),
            self.endpoint.adapter,
            self.endpoint.port,
        )
    }
}

/// Sequences operations that span two devices.
#[derive(Debug)]
pub struct TopologyCoordinator {
    orchestrator: Arc<LifecycleOrchestrator>,
    book: Arc<PortBook>,
    links: Mutex<IndexMap<LinkId, Link>>,
}

impl TopologyCoordinator {
    pub fn new(orchestrator: Arc<LifecycleOrchestrator>, config: &LinksConfig) -> Self {
        Self {
            orchestrator,
            book: Arc::new(PortBook::new(config)),
            links: Mutex::new(IndexMap::new()),
        }
    }

    pub fn orchestrator(&self) -> &Arc<LifecycleOrchestrator> {
        &self.orchestrator
    }

    /// Connect two device ports with a UDP tunnel.
    ///
    /// Both device tokens are taken in lexicographic identity order and the sides
    /// are established in that same order. If the second side fails, the first is
    /// torn down again and [`LinkError::PartialLinkFailure`] reports whether that
    /// teardown succeeded; a first side that could not be torn down is kept in
    /// [`TopologyCoordinator::orphans`] together with its UDP port. Cancelling the
    /// returned future frees the ports and tears an established first side down in
    /// the background.
    pub async fn create_link(&self, spec: LinkSpec) -> Result<Link> {
        self.validate(&spec)?;
        let (first, second) = if spec.a.device <= spec.b.device {
            (spec.a.clone(), spec.b.clone())
        } else {
            (spec.b.clone(), spec.a.clone())
        };

        let _first_token = self.lock(&first.device, Operation::Link).await?;
        let _second_token = self.lock(&second.device, Operation::Link).await?;
        // State may have moved while we waited for the tokens.
        self.validate(&spec)?;

        let first = self.resolve(first)?;
        let second = self.resolve(second)?;
        let mut reservation = self.book.reserve(first.compute.id(), second.compute.id())?;
        let (first_port, second_port) = (reservation.first_port(), reservation.second_port());

        let first_body = udp_tunnel(first_port, second.compute.host(), second_port);
        if let Err(source) = first.compute.post(&first.nio_path(), Some(first_body)).await {
            reservation.abort(true);
            return Err(LinkError::Endpoint {
                device: first.record.id().clone(),
                compute: first.compute.id().to_owned(),
                source,
            });
        }
        reservation.first_established(
            first.endpoint.clone(),
            first.nio_path(),
            Arc::clone(&first.compute),
        );

        let second_body = udp_tunnel(second_port, first.compute.host(), first_port);
        if let Err(source) = second.compute.post(&second.nio_path(), Some(second_body)).await {
            let compensated = match first.compute.delete(&first.nio_path()).await {
                Ok(_) => true,
                Err(err) if err.is_not_found() => true,
                Err(err) => {
                    net_warn!(
                        context = self.context(&first, "unlink"),
                        "compensating teardown failed: {}",
                        err
                    );
                    false
                }
            };
            reservation.abort(compensated);
            net_warn!(
                context = self.context(&second, "link"),
                "link half-applied, compensated: {}",
                compensated
            );
            return Err(LinkError::PartialLinkFailure {
                established: first.record.id().clone(),
                failed: second.record.id().clone(),
                source,
                compensated,
            });
        }
        reservation.commit();

        let (a, b) = if first.endpoint == spec.a {
            (side(&first, first_port), side(&second, second_port))
        } else {
            (side(&second, second_port), side(&first, first_port))
        };
        let link = Link {
            id: LinkId::generate(),
            a,
            b,
        };
        self.links.lock().insert(link.id.clone(), link.clone());
        net_info!(
            context = self.context(&first, "link"),
            "link {} established to {}",
            link.id,
            second.endpoint
        );
        Ok(link)
    }

    /// Tear down both sides of a link and release its ports. A side whose device no
    /// longer exists, or whose compute answers `404`, counts as already gone.
    pub async fn delete_link(&self, id: &LinkId) -> Result<()> {
        let link = self
            .links
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| LinkError::UnknownLink(id.clone()))?;

        let mut sides: Vec<&LinkSide> = link.sides().into_iter().collect();
        sides.sort_by(|left, right| left.endpoint.device.cmp(&right.endpoint.device));

        let mut tokens: Vec<OperationToken> = Vec::with_capacity(2);
        let mut live = Vec::with_capacity(2);
        for side in sides {
            let device = &side.endpoint.device;
            let eligible = self
                .orchestrator
                .registry()
                .status_of(device)
                .is_some_and(DeviceStatus::is_link_eligible);
            if !eligible {
                debug!(link = %id, device = %device, "skipping teardown of departed device");
                continue;
            }
            tokens.push(self.lock(device, Operation::Unlink).await?);
            live.push(self.resolve(side.endpoint.clone())?);
        }

        for resolved in &live {
            match resolved.compute.delete(&resolved.nio_path()).await {
                Ok(_) => {}
                Err(err) if err.is_not_found() => {}
                Err(source) => {
                    return Err(LinkError::Endpoint {
                        device: resolved.record.id().clone(),
                        compute: resolved.compute.id().to_owned(),
                        source,
                    })
                }
            }
        }
        drop(tokens);

        self.forget(&link);
        debug!(link = %id, "link removed");
        Ok(())
    }

    /// Every link in creation order.
    pub fn links(&self) -> Vec<Link> {
        self.links.lock().values().cloned().collect()
    }

    pub fn links_for(&self, device: &DeviceId) -> Vec<Link> {
        self.links
            .lock()
            .values()
            .filter(|link| link.touches(device))
            .cloned()
            .collect()
    }

    /// Delete every link attached to `device`, then destroy it.
    pub async fn remove_device(&self, device: &DeviceId) -> Result<()> {
        for link in self.links_for(device) {
            self.delete_link(&link.id).await?;
        }
        self.orchestrator.destroy(device).await?;
        self.prune_departed();
        Ok(())
    }

    /// Half-links that could not be torn down, with their ports still reserved.
    pub fn orphans(&self) -> Vec<OrphanedNio> {
        self.book.orphans()
    }

    /// Retry the teardown of every orphaned NIO and return those still left.
    pub async fn reap_orphans(&self) -> Vec<OrphanedNio> {
        for orphan in self.book.orphans() {
            match self.orchestrator.computes().get(&orphan.compute) {
                Some(compute) => {
                    self.book.compensate(&compute, &orphan).await;
                }
                None => warn!(compute = %orphan.compute, "orphan on unknown compute"),
            }
        }
        self.book.orphans()
    }

    /// Forget links and orphans whose devices no longer exist, freeing their ports.
    /// Destroying a device removes its NIOs on the compute as well.
    pub fn prune_departed(&self) -> usize {
        let departed = |device: &DeviceId| {
            matches!(
                self.orchestrator.registry().status_of(device),
                None | Some(DeviceStatus::Destroyed)
            )
        };
        let stale: Vec<Link> = self
            .links
            .lock()
            .values()
            .filter(|link| link.sides().iter().any(|side| departed(&side.endpoint.device)))
            .cloned()
            .collect();
        for link in &stale {
            self.forget(link);
        }
        let orphans: Vec<OrphanedNio> = self
            .book
            .orphans()
            .into_iter()
            .filter(|orphan| departed(&orphan.endpoint.device))
            .collect();
        for orphan in &orphans {
            self.book.settle(orphan);
        }
        if !stale.is_empty() || !orphans.is_empty() {
            debug!(links = stale.len(), orphans = orphans.len(), "pruned departed devices");
        }
        stale.len() + orphans.len()
    }

    /// Tear the project down: links first, then every device.
    ///
    /// A link whose teardown fails is forgotten anyway, since destroying its devices
    /// removes the NIOs on the computes.
    pub async fn close_project(&self) -> BatchReport {
        for link in self.links() {
            if let Err(err) = self.delete_link(&link.id).await {
                warn!(link = %link.id, error = %err, "link teardown failed during project close");
                self.forget(&link);
            }
        }
        let report = self.orchestrator.close_project().await;
        self.prune_departed();
        report
    }

    fn forget(&self, link: &Link) {
        if self.links.lock().shift_remove(&link.id).is_none() {
            return;
        }
        for side in link.sides() {
            self.book.release(&side.compute, side.udp_port);
        }
    }

    fn validate(&self, spec: &LinkSpec) -> Result<()> {
        if spec.a.device == spec.b.device {
            return Err(LinkError::SameDevice(spec.a.device.clone()));
        }
        for endpoint in [&spec.a, &spec.b] {
            self.check_eligible(&endpoint.device)?;
        }
        let links = self.links.lock();
        for endpoint in [&spec.a, &spec.b] {
            if links.values().any(|link| link.uses(endpoint)) {
                return Err(LinkError::PortInUse(endpoint.clone()));
            }
        }
        drop(links);
        let orphans = self.book.orphans();
        for endpoint in [&spec.a, &spec.b] {
            if orphans.iter().any(|orphan| &orphan.endpoint == endpoint) {
                return Err(LinkError::PortInUse(endpoint.clone()));
            }
        }
        Ok(())
    }

    fn check_eligible(&self, device: &DeviceId) -> Result<()> {
        match self.orchestrator.registry().status_of(device) {
            None => Err(LifecycleError::NotFound(device.clone()).into()),
            Some(status) if !status.is_link_eligible() => Err(LifecycleError::InvalidTransition {
                device: device.clone(),
                operation: Operation::Link,
                status,
            }
            .into()),
            Some(_) => Ok(()),
        }
    }

    async fn lock(&self, device: &DeviceId, operation: Operation) -> Result<OperationToken> {
        Ok(self.orchestrator.lock_device(device, operation).await?)
    }

    fn resolve(&self, endpoint: LinkEndpoint) -> Result<Resolved> {
        let record = self.orchestrator.find(&endpoint.device)?;
        let compute = self.orchestrator.compute_for(&record, Operation::Link)?;
        Ok(Resolved {
            endpoint,
            record,
            compute,
        })
    }

    fn context<'a>(&'a self, side: &'a Resolved, operation: &'a str) -> LogContext<'a> {
        LogContext::new()
            .with_project(self.orchestrator.project_id().as_str())
            .with_device(side.record.id().as_str())
            .with_compute(side.compute.id())
            .with_operation(operation)
    }
}

fn side(resolved: &Resolved, udp_port: u16) -> LinkSide {
    LinkSide {
        endpoint: resolved.endpoint.clone(),
        compute: resolved.compute.id().to_owned(),
        udp_port,
    }
}
