//! Device registry.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::wire::Device;

/// Registered devices by id, in registration order.
///
/// Cloning shares the store, so the SSDP advertiser and the well-known
/// resources can serve the same set of devices.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: Arc<RwLock<IndexMap<String, Device>>>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `device` unless its id is taken.
    ///
    /// Returns the stored device (the earlier one on a repeat) and whether
    /// an insert happened.
    pub fn insert_if_absent(&self, device: Device) -> (Device, bool) {
        let mut devices = self.devices.write();
        match devices.get(device.id()) {
            Some(existing) => (existing.clone(), false),
            None => {
                devices.insert(device.id().to_string(), device.clone());
                (device, true)
            }
        }
    }

    /// Remove a device.
    pub fn remove(&self, id: &str) -> Option<Device> {
        self.devices.write().shift_remove(id)
    }

    /// Look up a device.
    pub fn get(&self, id: &str) -> Option<Device> {
        self.devices.read().get(id).cloned()
    }

    /// Check whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.devices.read().contains_key(id)
    }

    /// Every device, in registration order.
    pub fn list(&self) -> Vec<Device> {
        self.devices.read().values().cloned().collect()
    }

    /// Number of devices.
    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    /// Check whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_registration_wins() {
        let registry = DeviceRegistry::new();
        let mut first = Device::new("D1");
        first.model_name = Some("first".into());
        let mut second = Device::new("D1");
        second.model_name = Some("second".into());

        assert!(registry.insert_if_absent(first).1);
        let (stored, inserted) = registry.insert_if_absent(second);
        assert!(!inserted);
        assert_eq!(stored.model_name.as_deref(), Some("first"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_order_and_removal() {
        let registry = DeviceRegistry::new();
        for id in ["a", "b", "c"] {
            registry.insert_if_absent(Device::new(id));
        }
        assert!(registry.remove("b").is_some());
        assert!(registry.remove("b").is_none());

        let ids: Vec<_> = registry.list().into_iter().filter_map(|d| d.id).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }
}
