// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The device slot registry: stable identity plus ordered slot assignment.
//!
//! Devices are exposed to clients as 0-based *slots*, but a device's slot
//! can shift when an earlier slot is freed. Subscriptions key on the stable
//! [`DeviceId`] instead, so a removal elsewhere never invalidates a live
//! subscription's meaning (it is simply swept out once the device is gone).
//!
//! Devices are stored as shared [`DeviceRef`]s rather than owned outright:
//! the same device can legitimately be registered with more than one server,
//! so identity for the `ALREADY_SERVING` check is pointer identity on the
//! shared handle, not a freshly-minted id.

use crate::config::SLOTS_PER_SERVER;
use crate::device::{Device, DeviceHandle, DeviceRef};
use crate::error::RegistrationError;
use std::rc::Rc;
use std::sync::mpsc::Sender;

/// Stable handle for a device, independent of its current slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u64);

/// Owns slot assignment for one server's set of devices.
///
/// `order` gives slot index -> [`DeviceId`]; `devices` holds the shared
/// handles keyed by the same stable id. Kept as two structures rather than
/// one `Vec<(DeviceId, DeviceRef)>` so slot lookups by id don't need a
/// linear scan on the hot data-frame path.
#[derive(Default)]
pub struct DeviceRegistry {
    next_id: u64,
    order: Vec<DeviceId>,
    devices: std::collections::HashMap<DeviceId, DeviceRef>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new device, assigning it the next free slot and handing
    /// it a [`DeviceHandle`] (built from `events_tx`) via `on_added`.
    ///
    /// Fails with [`RegistrationError::AlreadyServing`] if this exact
    /// device (by `Rc` pointer identity) is already registered, or with
    /// [`RegistrationError::ServerFull`] once [`SLOTS_PER_SERVER`] devices
    /// are registered.
    pub fn add_device(
        &mut self,
        device: DeviceRef,
        events_tx: Sender<crate::device::DeviceEvent>,
    ) -> Result<DeviceId, RegistrationError> {
        if self.devices.values().any(|d| Rc::ptr_eq(d, &device)) {
            return Err(RegistrationError::AlreadyServing);
        }
        if self.order.len() >= SLOTS_PER_SERVER as usize {
            return Err(RegistrationError::ServerFull(SLOTS_PER_SERVER));
        }
        let id = DeviceId(self.next_id);
        self.next_id += 1;
        device.borrow_mut().on_added(DeviceHandle::new(id, events_tx));
        self.order.push(id);
        self.devices.insert(id, device);
        Ok(id)
    }

    /// Remove a device by its stable id, compacting the slot order so later
    /// devices shift down to fill the gap. Slots are always contiguous
    /// starting at 0 for the currently-connected set.
    pub fn remove_device(&mut self, id: DeviceId) -> Option<DeviceRef> {
        let removed = self.devices.remove(&id)?;
        self.order.retain(|d| *d != id);
        removed.borrow_mut().on_removed();
        Some(removed)
    }

    /// Current slot index of a device, if still registered.
    pub fn slot_of(&self, id: DeviceId) -> Option<u8> {
        self.order.iter().position(|d| *d == id).map(|i| i as u8)
    }

    /// Device id currently occupying `slot`, if any.
    pub fn device_at_slot(&self, slot: u8) -> Option<DeviceId> {
        self.order.get(slot as usize).copied()
    }

    pub fn get(&self, id: DeviceId) -> Option<&DeviceRef> {
        self.devices.get(&id)
    }

    /// All currently-registered device ids, in slot order.
    pub fn ids(&self) -> &[DeviceId] {
        &self.order
    }

    pub fn active_devices_count(&self) -> usize {
        self.order.len()
    }

    pub fn contains(&self, id: DeviceId) -> bool {
        self.devices.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{BaseData, DeviceOrientation, DeviceType};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::mpsc;

    struct StubDevice {
        orientation: DeviceOrientation,
        removed: bool,
    }

    impl StubDevice {
        fn new() -> Self {
            Self {
                orientation: DeviceOrientation::Normal,
                removed: false,
            }
        }
    }

    impl Device for StubDevice {
        fn get_device_type(&self) -> DeviceType {
            DeviceType::NoMotion
        }
        fn orientation(&self) -> DeviceOrientation {
            self.orientation
        }
        fn set_orientation(&mut self, orientation: DeviceOrientation) {
            self.orientation = orientation;
        }
        fn get_base_inputs(&self) -> BaseData {
            BaseData::default()
        }
        fn on_removed(&mut self) {
            self.removed = true;
        }
    }

    fn stub() -> DeviceRef {
        Rc::new(RefCell::new(StubDevice::new()))
    }

    fn events() -> Sender<crate::device::DeviceEvent> {
        mpsc::channel().0
    }

    #[test]
    fn test_add_assigns_contiguous_slots() {
        let mut registry = DeviceRegistry::new();
        let a = registry.add_device(stub(), events()).unwrap();
        let b = registry.add_device(stub(), events()).unwrap();
        assert_eq!(registry.slot_of(a), Some(0));
        assert_eq!(registry.slot_of(b), Some(1));
        assert_eq!(registry.active_devices_count(), 2);
    }

    #[test]
    fn test_remove_compacts_slots() {
        let mut registry = DeviceRegistry::new();
        let a = registry.add_device(stub(), events()).unwrap();
        let b = registry.add_device(stub(), events()).unwrap();

        registry.remove_device(a);
        assert_eq!(registry.slot_of(b), Some(0));
        assert_eq!(registry.device_at_slot(0), Some(b));
        assert!(!registry.contains(a));
    }

    #[test]
    fn test_server_full_rejects_fifth_device() {
        let mut registry = DeviceRegistry::new();
        for _ in 0..SLOTS_PER_SERVER {
            registry.add_device(stub(), events()).unwrap();
        }
        let result = registry.add_device(stub(), events());
        assert_eq!(result.unwrap_err(), RegistrationError::ServerFull(SLOTS_PER_SERVER));
    }

    #[test]
    fn test_stable_id_survives_slot_shift() {
        let mut registry = DeviceRegistry::new();
        let a = registry.add_device(stub(), events()).unwrap();
        let b = registry.add_device(stub(), events()).unwrap();
        let c = registry.add_device(stub(), events()).unwrap();

        registry.remove_device(a);
        // b and c shift down, but their ids (what subscriptions key on) never change.
        assert_eq!(registry.slot_of(b), Some(0));
        assert_eq!(registry.slot_of(c), Some(1));
        assert!(registry.contains(b));
        assert!(registry.contains(c));
    }

    #[test]
    fn test_adding_same_device_twice_is_already_serving() {
        let mut registry = DeviceRegistry::new();
        let device = stub();
        registry.add_device(device.clone(), events()).unwrap();
        let result = registry.add_device(device, events());
        assert_eq!(result.unwrap_err(), RegistrationError::AlreadyServing);
    }
}
