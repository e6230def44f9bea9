//! ---
//! netorch_section: "04-device-state"
//! netorch_subsection: "module"
//! netorch_type: "source"
//! netorch_scope: "code"
//! netorch_description: "Device records, status model and the per-project registry."
//! netorch_version: "v0.0.0-prealpha"
//! netorch_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::{Mutex as TokenSlot, OwnedMutexGuard};
use tracing::debug;

use crate::error::{DeviceError, Result};
use crate::model::{DeviceId, DeviceStatus, ProjectId};
use crate::record::{DeviceConfig, DeviceRecord};

/// Held for the duration of one operation on one device.
pub type OperationToken = OwnedMutexGuard<()>;

#[derive(Debug)]
struct Entry {
    record: DeviceRecord,
    token: Arc<TokenSlot<()>>,
}

#[derive(Debug, Default)]
struct RegistryState {
    devices: IndexMap<DeviceId, Entry>,
    tombstones: HashSet<DeviceId>,
}

/// Every device of one project, behind a single writer lock.
#[derive(Debug)]
pub struct DeviceRegistry {
    project_id: ProjectId,
    state: Mutex<RegistryState>,
}

impl DeviceRegistry {
    /// Empty registry for `project_id`.
    pub fn new(project_id: ProjectId) -> Self {
        Self {
            project_id,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Project owning the registry.
    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    /// Register a device as `pending`.
    pub fn register(&self, config: DeviceConfig) -> Result<DeviceRecord> {
        self.register_claimed(config, DeviceStatus::Pending)
            .map(|(record, _token)| record)
    }

    /// Register a device with the given status and hand back its operation token,
    /// already held, so no other operation can slip in before the caller's first
    /// remote call.
    pub fn register_claimed(
        &self,
        config: DeviceConfig,
        status: DeviceStatus,
    ) -> Result<(DeviceRecord, OperationToken)> {
        let record = DeviceRecord::from_config(self.project_id.clone(), config, status);
        let id = record.id().clone();
        let mut state = self.state.lock();
        if state.devices.contains_key(&id) {
            return Err(DeviceError::DuplicateIdentity(id));
        }
        let token = Arc::new(TokenSlot::new(()));
        let guard = Arc::clone(&token)
            .try_lock_owned()
            .map_err(|_| DeviceError::Busy(id.clone()))?;
        if state.tombstones.remove(&id) {
            debug!(project = %self.project_id, device = %id, "re-registering destroyed identity");
        }
        state.devices.insert(
            id.clone(),
            Entry {
                record: record.clone(),
                token,
            },
        );
        debug!(project = %self.project_id, device = %id, %status, "device registered");
        Ok((record, guard))
    }

    /// Snapshot of a live record.
    pub fn find(&self, id: &DeviceId) -> Result<DeviceRecord> {
        self.state
            .lock()
            .devices
            .get(id)
            .map(|entry| entry.record.clone())
            .ok_or_else(|| DeviceError::NotFound(id.clone()))
    }

    /// Status of a live record, `Destroyed` for a tombstone, `None` if never seen.
    pub fn status_of(&self, id: &DeviceId) -> Option<DeviceStatus> {
        let state = self.state.lock();
        match state.devices.get(id) {
            Some(entry) => Some(entry.record.status()),
            None if state.tombstones.contains(id) => Some(DeviceStatus::Destroyed),
            None => None,
        }
    }

    /// Whether a live record carries this identity.
    pub fn contains(&self, id: &DeviceId) -> bool {
        self.state.lock().devices.contains_key(id)
    }

    /// Mutate a live record under the registry lock and return the new snapshot.
    pub fn modify<F>(&self, id: &DeviceId, apply: F) -> Result<DeviceRecord>
    where
        F: FnOnce(&mut DeviceRecord),
    {
        let mut state = self.state.lock();
        let entry = state
            .devices
            .get_mut(id)
            .ok_or_else(|| DeviceError::NotFound(id.clone()))?;
        apply(&mut entry.record);
        Ok(entry.record.clone())
    }

    /// Remove a record and tombstone its identity.
    pub fn remove(&self, id: &DeviceId) -> Option<DeviceRecord> {
        let mut state = self.state.lock();
        let removed = state.devices.shift_remove(id).map(|entry| entry.record);
        state.tombstones.insert(id.clone());
        if removed.is_some() {
            debug!(project = %self.project_id, device = %id, "device removed");
        }
        removed
    }

    /// Forget a record without tombstoning it, as if it was never registered.
    pub fn discard(&self, id: &DeviceId) -> Option<DeviceRecord> {
        let removed = self.state.lock().devices.shift_remove(id).map(|entry| entry.record);
        if removed.is_some() {
            debug!(project = %self.project_id, device = %id, "pending registration discarded");
        }
        removed
    }

    /// Snapshots of every live record in insertion order.
    pub fn list(&self) -> Vec<DeviceRecord> {
        self.state
            .lock()
            .devices
            .values()
            .map(|entry| entry.record.clone())
            .collect()
    }

    /// Identities of every live record in insertion order.
    pub fn ids(&self) -> Vec<DeviceId> {
        self.state.lock().devices.keys().cloned().collect()
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.state.lock().devices.len()
    }

    /// True when no live record exists.
    pub fn is_empty(&self) -> bool {
        self.state.lock().devices.is_empty()
    }

    /// Take the device token or fail with `Busy` if an operation holds it.
    pub fn try_acquire(&self, id: &DeviceId) -> Result<OperationToken> {
        self.slot(id)?
            .try_lock_owned()
            .map_err(|_| DeviceError::Busy(id.clone()))
    }

    /// Wait for the device token.
    pub async fn acquire(&self, id: &DeviceId) -> Result<OperationToken> {
        let slot = self.slot(id)?;
        Ok(slot.lock_owned().await)
    }

    fn slot(&self, id: &DeviceId) -> Result<Arc<TokenSlot<()>>> {
        self.state
            .lock()
            .devices
            .get(id)
            .map(|entry| Arc::clone(&entry.token))
            .ok_or_else(|| DeviceError::NotFound(id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new(ProjectId::new("lab"))
    }

    #[test]
    fn register_assigns_identity_and_keeps_order() {
        let registry = registry();
        let first = registry
            .register(DeviceConfig::new("R1", "iou", "local"))
            .expect("first");
        let second = registry
            .register(DeviceConfig::new("R2", "iou", "local").with_id("fixed"))
            .expect("second");
        assert_eq!(first.status(), DeviceStatus::Pending);
        assert_eq!(second.id().as_str(), "fixed");
        assert_eq!(registry.ids(), vec![first.id().clone(), second.id().clone()]);
        assert_eq!(
            registry.find(first.id()).expect("find").name(),
            "R1"
        );
    }

    #[test]
    fn duplicate_identity_is_rejected() {
        let registry = registry();
        registry
            .register(DeviceConfig::new("R1", "iou", "local").with_id("d1"))
            .expect("first");
        let err = registry
            .register(DeviceConfig::new("other", "qemu", "local").with_id("d1"))
            .expect_err("duplicate");
        assert_eq!(err, DeviceError::DuplicateIdentity(DeviceId::new("d1")));
        assert_eq!(registry.find(&DeviceId::new("d1")).expect("kept").name(), "R1");
    }

    #[test]
    fn remove_tombstones_and_allows_reregistration() {
        let registry = registry();
        let id = DeviceId::new("d1");
        registry
            .register(DeviceConfig::new("R1", "iou", "local").with_id("d1"))
            .expect("register");
        assert!(registry.remove(&id).is_some());
        assert_eq!(registry.status_of(&id), Some(DeviceStatus::Destroyed));
        assert_eq!(
            registry.find(&id).expect_err("gone"),
            DeviceError::NotFound(id.clone())
        );
        assert!(registry.remove(&id).is_none());

        registry
            .register(DeviceConfig::new("R1", "iou", "local").with_id("d1"))
            .expect("re-register");
        assert_eq!(registry.status_of(&id), Some(DeviceStatus::Pending));
    }

    #[test]
    fn discard_leaves_no_tombstone() {
        let registry = registry();
        let id = DeviceId::new("d1");
        registry
            .register(DeviceConfig::new("R1", "iou", "local").with_id("d1"))
            .expect("register");
        registry.discard(&id);
        assert_eq!(registry.status_of(&id), None);
    }

    #[test]
    fn modify_updates_snapshot() {
        let registry = registry();
        let record = registry
            .register(DeviceConfig::new("R1", "iou", "local"))
            .expect("register");
        let updated = registry
            .modify(record.id(), |record| record.set_status(DeviceStatus::Created))
            .expect("modify");
        assert_eq!(updated.status(), DeviceStatus::Created);
        assert_eq!(registry.list()[0].status(), DeviceStatus::Created);
        assert!(registry
            .modify(&DeviceId::new("missing"), |_| {})
            .is_err());
    }

    #[tokio::test]
    async fn token_serializes_operations() {
        let registry = Arc::new(registry());
        let (record, claimed) = registry
            .register_claimed(DeviceConfig::new("R1", "iou", "local"), DeviceStatus::Pending)
            .expect("register");
        let id = record.id().clone();

        assert_eq!(
            registry.try_acquire(&id).expect_err("held"),
            DeviceError::Busy(id.clone())
        );

        let waiter = {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            tokio::spawn(async move { registry.acquire(&id).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(claimed);
        waiter.await.expect("join").expect("acquired");
        assert!(registry.try_acquire(&id).is_ok());
    }
}
