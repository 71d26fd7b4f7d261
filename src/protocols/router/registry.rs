// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Interface ownership registry
//!
//! An interface id may be attached to at most one instance per protocol.
//! Instances that must agree on this share one registry; cloning the handle
//! shares the underlying table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{InstanceId, IntfId};
use crate::protocols::Proto;

#[derive(Debug, Default)]
struct RegistryInner {
    owners: HashMap<(Proto, IntfId), InstanceId>,
    next_instance: u32,
}

/// Shared (protocol, interface) to instance table
#[derive(Debug, Clone, Default)]
pub struct IntfRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl IntfRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn next_instance_id(&self) -> InstanceId {
        let mut inner = self.lock();
        let id = InstanceId(inner.next_instance);
        inner.next_instance += 1;
        id
    }

    /// Claim an interface for an instance
    ///
    /// Returns the current owner if the interface is already taken.
    pub(crate) fn claim(
        &self,
        proto: Proto,
        intf: IntfId,
        instance: InstanceId,
    ) -> Result<(), InstanceId> {
        let mut inner = self.lock();
        if let Some(owner) = inner.owners.get(&(proto, intf)) {
            return Err(*owner);
        }
        inner.owners.insert((proto, intf), instance);
        Ok(())
    }

    pub(crate) fn release(&self, proto: Proto, intf: IntfId) {
        self.lock().owners.remove(&(proto, intf));
    }

    pub(crate) fn release_instance(&self, proto: Proto, instance: InstanceId) {
        self.lock()
            .owners
            .retain(|(p, _), owner| !(*p == proto && *owner == instance));
    }

    /// Instance owning an interface for a protocol
    pub fn owner(&self, proto: Proto, intf: IntfId) -> Option<InstanceId> {
        self.lock().owners.get(&(proto, intf)).copied()
    }

    pub fn len(&self) -> usize {
        self.lock().owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
