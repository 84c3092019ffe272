// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The subscription table: a multi-indexed map of `(client_id, device) ->
//! ClientRecord`, plus a per-client packet counter, with time-based expiry.

use crate::registry::DeviceId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A client stops being considered subscribed if it hasn't sent a renewing
/// `data` request in this long.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Key identifying a single client's subscription to a single device.
///
/// Hashed and compared by `(client_id, device)` — the device side is the
/// stable [`DeviceId`], not its MAC, since two devices may share MAC 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub client_id: u32,
    pub device: DeviceId,
}

/// Per-subscription bookkeeping.
#[derive(Debug, Clone, Copy)]
pub struct ClientRecord {
    pub addr: SocketAddr,
    pub client_id: u32,
    pub last_request_time: Instant,
}

/// Multi-indexed subscription state.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    clients: HashMap<ClientKey, ClientRecord>,
    device_to_clients: HashMap<DeviceId, Vec<ClientKey>>,
    client_to_devices: HashMap<u32, Vec<DeviceId>>,
    packet_counters: HashMap<u32, u32>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or refresh) a client's subscription to a device.
    ///
    /// A fresh registration seeds the packet counter at 0 if one doesn't
    /// already exist for this client_id; an existing registration just bumps
    /// `last_request_time` and updates `addr` (tolerates the client's source
    /// port changing, e.g. across a NAT rebind).
    pub fn register(&mut self, client_id: u32, device: DeviceId, addr: SocketAddr, now: Instant) {
        let key = ClientKey { client_id, device };

        match self.clients.get_mut(&key) {
            Some(record) => {
                record.last_request_time = now;
                record.addr = addr;
            }
            None => {
                self.clients.insert(
                    key,
                    ClientRecord {
                        addr,
                        client_id,
                        last_request_time: now,
                    },
                );
                self.device_to_clients.entry(device).or_default().push(key);
                self.client_to_devices
                    .entry(client_id)
                    .or_default()
                    .push(device);
                self.packet_counters.entry(client_id).or_insert(0);
            }
        }
    }

    /// Remove every index entry for a device (called when a device disconnects).
    ///
    /// The server's normal disconnect path is a deliberate no-op here: the
    /// caller (server teardown / device registry) does not proactively call
    /// this — stale subscriptions are reaped by the next [`Self::sweep`]
    /// instead. Exposed for completeness and for tests that want eager
    /// cleanup.
    pub fn remove_device(&mut self, device: DeviceId) {
        if let Some(keys) = self.device_to_clients.remove(&device) {
            for key in keys {
                self.clients.remove(&key);
                if let Some(devices) = self.client_to_devices.get_mut(&key.client_id) {
                    devices.retain(|d| *d != device);
                }
            }
        }
    }

    /// Remove expired client records, then purge packet counters for clients
    /// left with no subscriptions at all. Step order matters: a client that
    /// expires this sweep must have its counter purged in the same pass.
    pub fn sweep(&mut self, now: Instant) -> SweepReport {
        let expired: Vec<ClientKey> = self
            .clients
            .iter()
            .filter(|(_, record)| now.duration_since(record.last_request_time) > REQUEST_TIMEOUT)
            .map(|(key, _)| *key)
            .collect();

        for key in &expired {
            self.clients.remove(key).expect("key indexed but absent from clients");
            let device_clients = self
                .device_to_clients
                .get_mut(&key.device)
                .expect("device index missing entry for a live client key");
            device_clients.retain(|k| k != key);
            let client_devices = self
                .client_to_devices
                .get_mut(&key.client_id)
                .expect("client index missing entry for a live client key");
            client_devices.retain(|d| *d != key.device);
        }

        let stale_counters: Vec<u32> = self
            .packet_counters
            .keys()
            .copied()
            .filter(|client_id| {
                self.client_to_devices
                    .get(client_id)
                    .is_none_or(|devices| devices.is_empty())
            })
            .collect();
        for client_id in &stale_counters {
            self.packet_counters.remove(client_id);
            self.client_to_devices.remove(client_id);
        }

        SweepReport {
            expired_subscriptions: expired.len(),
            purged_counters: stale_counters.len(),
        }
    }

    /// Clients currently subscribed to `device`, for the emitter's fan-out.
    pub fn subscribers_of(&self, device: DeviceId) -> &[ClientKey] {
        self.device_to_clients
            .get(&device)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn record(&self, key: &ClientKey) -> Option<&ClientRecord> {
        self.clients.get(key)
    }

    /// Next packet number for `client_id`, incrementing it (wraps silently,
    /// matching the reference implementation; see DESIGN.md).
    pub fn next_packet_number(&mut self, client_id: u32) -> u32 {
        let counter = self.packet_counters.entry(client_id).or_insert(0);
        let n = *counter;
        *counter = counter.wrapping_add(1);
        n
    }

    /// All devices currently registered: a `data` request with
    /// registration_type == 0 subscribes to all of them.
    pub fn devices_of_client(&self, client_id: u32) -> &[DeviceId] {
        self.client_to_devices
            .get(&client_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    #[cfg(test)]
    fn subscription_count(&self) -> usize {
        self.clients.len()
    }

    #[cfg(test)]
    fn counter_count(&self) -> usize {
        self.packet_counters.len()
    }
}

/// Outcome of a single [`SubscriptionTable::sweep`] call, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_subscriptions: usize,
    pub purged_counters: usize,
}
