use std::collections::{BTreeMap, BTreeSet};

use lightrail_core::types::clamp_utilization;
use lightrail_core::{Device, DeviceId, DeviceStatePatch, Result, SchedulerError};
use parking_lot::{RwLock, RwLockReadGuard};
use tracing::{debug, info};

/// The registered devices plus a generation counter, bumped on every change
/// that can alter a route (membership, links, power draw).
///
/// Iteration is in ascending device id, which is also registration order.
#[derive(Debug, Default)]
pub struct DeviceTable {
    devices: BTreeMap<DeviceId, Device>,
    next_id: DeviceId,
    generation: u64,
}

impl DeviceTable {
    pub fn get(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(&id)
    }

    pub fn contains(&self, id: DeviceId) -> bool {
        self.devices.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Largest absolute deviation of any device's utilization from the mean.
    pub fn load_imbalance(&self) -> f64 {
        if self.devices.is_empty() {
            return 0.0;
        }
        let n = self.devices.len() as f64;
        let mean = self.iter().map(|d| d.state.utilization_pct).sum::<f64>() / n;
        self.iter()
            .map(|d| (d.state.utilization_pct - mean).abs())
            .fold(0.0, f64::max)
    }

    fn bump(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }
}

/// Owner of all device records.
///
/// Every operation takes one short exclusive (or shared) section over the
/// whole table and never blocks on anything else while holding it.
pub struct DeviceRegistry {
    table: RwLock<DeviceTable>,
    max_devices: Option<usize>,
}

impl DeviceRegistry {
    pub fn new(max_devices: Option<usize>) -> Self {
        Self {
            table: RwLock::new(DeviceTable::default()),
            max_devices,
        }
    }

    /// Add a device and return the id the registry assigned to it.
    pub fn register(&self, mut device: Device) -> Result<DeviceId> {
        let mut table = self.table.write();

        if let Some(limit) = self.max_devices {
            if table.len() >= limit {
                return Err(SchedulerError::CapacityExceeded { limit });
            }
        }

        let id = table.next_id;
        validate_links(&device, id, self.max_devices)?;

        device.id = id;
        device.state.utilization_pct = clamp_utilization(device.state.utilization_pct);

        info!(
            "Registered device {}: {} ({}, {} links)",
            id,
            device.name,
            device.device_type,
            device.links.len()
        );

        table.devices.insert(id, device);
        table.next_id = id.wrapping_add(1);
        table.bump();
        Ok(id)
    }

    /// Remove a device. Links from other devices to it are dropped too.
    pub fn unregister(&self, id: DeviceId) -> Result<Device> {
        let mut table = self.table.write();
        let device = table
            .devices
            .remove(&id)
            .ok_or(SchedulerError::DeviceNotFound(id))?;

        for other in table.devices.values_mut() {
            other.links.retain(|l| l.neighbor != id);
        }
        table.bump();

        info!("Unregistered device {}: {}", id, device.name);
        Ok(device)
    }

    /// Overwrite the live-state fields present in `patch`.
    pub fn update_state(&self, id: DeviceId, patch: &DeviceStatePatch) -> Result<()> {
        let mut table = self.table.write();
        let device = table
            .devices
            .get_mut(&id)
            .ok_or(SchedulerError::DeviceNotFound(id))?;

        let power_changed = patch
            .power_draw_watts
            .is_some_and(|w| w.to_bits() != device.state.power_draw_watts.to_bits());
        device.state.apply(patch);
        debug!(
            "Device {} state: util={:.1}%, power={:.0}W, temp={}mC",
            id,
            device.state.utilization_pct,
            device.state.power_draw_watts,
            device.state.temperature_mc
        );

        // Edge costs only read power draw; utilization leaves routes alone
        if power_changed {
            table.bump();
        }
        Ok(())
    }

    /// Add an estimated load to a device. Returns the new utilization.
    pub(crate) fn add_load(&self, id: DeviceId, pct: f64) -> Result<f64> {
        let mut table = self.table.write();
        let device = table
            .devices
            .get_mut(&id)
            .ok_or(SchedulerError::DeviceNotFound(id))?;

        device.state.utilization_pct = clamp_utilization(device.state.utilization_pct + pct);
        Ok(device.state.utilization_pct)
    }

    pub fn get(&self, id: DeviceId) -> Option<Device> {
        self.table.read().get(id).cloned()
    }

    pub fn snapshot(&self) -> Vec<Device> {
        self.table.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.table.read().generation()
    }

    pub fn load_imbalance(&self) -> f64 {
        self.table.read().load_imbalance()
    }

    /// Shared view for routing and scoring. Hold it only for one decision.
    pub fn read(&self) -> RwLockReadGuard<'_, DeviceTable> {
        self.table.read()
    }
}

fn validate_links(device: &Device, id: DeviceId, max_devices: Option<usize>) -> Result<()> {
    let mut neighbors = BTreeSet::new();
    for link in &device.links {
        if link.neighbor == id {
            return Err(SchedulerError::InvalidDevice(format!(
                "{}: link to itself",
                device.name
            )));
        }
        if !link.latency_us.is_finite() || link.latency_us < 0.0 {
            return Err(SchedulerError::InvalidDevice(format!(
                "{}: link to {} has invalid latency {}",
                device.name, link.neighbor, link.latency_us
            )));
        }
        if !link.bandwidth_gbps.is_finite() || link.bandwidth_gbps <= 0.0 {
            return Err(SchedulerError::InvalidDevice(format!(
                "{}: link to {} has invalid bandwidth {}",
                device.name, link.neighbor, link.bandwidth_gbps
            )));
        }
        neighbors.insert(link.neighbor);
    }

    if let Some(limit) = max_devices {
        if neighbors.len() > limit {
            return Err(SchedulerError::InvalidDevice(format!(
                "{}: {} neighbours exceed registry size {}",
                device.name,
                neighbors.len(),
                limit
            )));
        }
    }
    Ok(())
}
