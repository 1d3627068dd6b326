//! Device Registry
//!
//! Address-keyed table of onboarded devices. Adding a device is a two-step
//! sequence: [`DeviceRegistry::reserve`] claims the address and allocates a
//! device id in one critical section, then the caller builds and starts the
//! device and [`Reservation::commit`]s it. A reservation dropped without
//! committing releases the address again, so a failed add leaves no trace.
//!
//! Device ids are `device<n>` from a monotonic counter and are never reused
//! during the registry's lifetime.

use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::device::Device;
use crate::error::DabError;

enum Slot {
    /// Address claimed, device under construction
    Reserved { device_id: String, seq: u64 },
    /// Device started and routable
    Active { device: Device, seq: u64 },
}

impl Slot {
    fn device_id(&self) -> &str {
        match self {
            Slot::Reserved { device_id, .. } => device_id,
            Slot::Active { device, .. } => device.device_id(),
        }
    }
}

#[derive(Default)]
struct State {
    by_address: AHashMap<String, Slot>,
    /// device id -> address, for active devices only
    by_id: AHashMap<String, String>,
}

/// `{address, deviceId}` pair reported by list-devices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub address: String,
    pub device_id: String,
}

/// Registry of devices keyed by address
pub struct DeviceRegistry {
    state: RwLock<State>,
    next_id: AtomicU64,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Claim `address` and allocate a fresh device id.
    ///
    /// Fails with [`DabError::AlreadyRegistered`] if the address is active or
    /// another add for it is still in flight.
    pub fn reserve(&self, address: &str) -> Result<Reservation<'_>, DabError> {
        let mut state = self.state.write();
        if state.by_address.contains_key(address) {
            return Err(DabError::AlreadyRegistered(address.to_string()));
        }

        let seq = self.next_id.fetch_add(1, Ordering::Relaxed);
        let device_id = format!("device{}", seq);
        state.by_address.insert(
            address.to_string(),
            Slot::Reserved {
                device_id: device_id.clone(),
                seq,
            },
        );
        debug!(address, device_id = %device_id, "Reserved address");

        Ok(Reservation {
            registry: self,
            address: address.to_string(),
            device_id,
            seq,
            committed: false,
        })
    }

    fn commit(&self, address: &str, seq: u64, device: Device) {
        let mut state = self.state.write();
        state
            .by_id
            .insert(device.device_id().to_string(), address.to_string());
        state
            .by_address
            .insert(address.to_string(), Slot::Active { device, seq });
    }

    fn release(&self, address: &str, seq: u64) {
        let mut state = self.state.write();
        let owned = matches!(
            state.by_address.get(address),
            Some(Slot::Reserved { seq: s, .. }) if *s == seq
        );
        if owned {
            state.by_address.remove(address);
            debug!(address, "Released reservation");
        }
    }

    /// Remove the active device at `address`.
    ///
    /// An address whose add is still in flight counts as not registered.
    pub fn remove(&self, address: &str) -> Result<Device, DabError> {
        let mut state = self.state.write();
        match state.by_address.get(address) {
            Some(Slot::Active { .. }) => {}
            _ => return Err(DabError::NotRegistered(address.to_string())),
        }
        let Some(Slot::Active { device, .. }) = state.by_address.remove(address) else {
            return Err(DabError::NotRegistered(address.to_string()));
        };
        state.by_id.remove(device.device_id());
        Ok(device)
    }

    /// Active device with the given id
    pub fn get_by_id(&self, device_id: &str) -> Option<Device> {
        let state = self.state.read();
        let address = state.by_id.get(device_id)?;
        match state.by_address.get(address) {
            Some(Slot::Active { device, .. }) => Some(device.clone()),
            _ => None,
        }
    }

    /// Active device at the given address
    pub fn get_by_address(&self, address: &str) -> Option<Device> {
        match self.state.read().by_address.get(address) {
            Some(Slot::Active { device, .. }) => Some(device.clone()),
            _ => None,
        }
    }

    /// Whether `address` is active or reserved
    pub fn contains(&self, address: &str) -> bool {
        self.state.read().by_address.contains_key(address)
    }

    /// Every active registration, in registration order
    pub fn list(&self) -> Vec<Registration> {
        let state = self.state.read();
        let mut entries: Vec<_> = state
            .by_address
            .iter()
            .filter_map(|(address, slot)| match slot {
                Slot::Active { seq, .. } => Some((
                    *seq,
                    Registration {
                        address: address.clone(),
                        device_id: slot.device_id().to_string(),
                    },
                )),
                Slot::Reserved { .. } => None,
            })
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, r)| r).collect()
    }

    /// Every active device, in registration order
    pub fn devices(&self) -> Vec<Device> {
        let state = self.state.read();
        let mut devices: Vec<_> = state
            .by_address
            .values()
            .filter_map(|slot| match slot {
                Slot::Active { device, seq } => Some((*seq, device.clone())),
                Slot::Reserved { .. } => None,
            })
            .collect();
        devices.sort_by_key(|(seq, _)| *seq);
        devices.into_iter().map(|(_, d)| d).collect()
    }

    /// Remove and return every active device. In-flight reservations are
    /// left alone and release themselves.
    pub fn drain(&self) -> Vec<Device> {
        let mut state = self.state.write();
        state.by_id.clear();

        let active: Vec<String> = state
            .by_address
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Active { .. }))
            .map(|(address, _)| address.clone())
            .collect();

        let mut devices: Vec<_> = active
            .into_iter()
            .filter_map(|address| match state.by_address.remove(&address) {
                Some(Slot::Active { device, seq }) => Some((seq, device)),
                _ => None,
            })
            .collect();
        devices.sort_by_key(|(seq, _)| *seq);
        devices.into_iter().map(|(_, d)| d).collect()
    }

    /// Number of active devices
    pub fn len(&self) -> usize {
        self.state.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A claimed address awaiting its device.
///
/// Dropping without [`commit`](Reservation::commit) releases the address.
pub struct Reservation<'a> {
    registry: &'a DeviceRegistry,
    address: String,
    device_id: String,
    seq: u64,
    committed: bool,
}

impl Reservation<'_> {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Make the device active and routable
    pub fn commit(mut self, device: Device) {
        self.registry.commit(&self.address, self.seq, device);
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.registry.release(&self.address, self.seq);
        }
    }
}
