use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Registry-assigned device identity. Sequential, never reused.
pub type DeviceId = u32;

/// Submitter-assigned task identity.
pub type TaskId = Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    #[default]
    Cpu,
    Gpu,
    Tpu,
    Npu,
    Photonic,
}

/// Static capability figures reported once at registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DeviceCapabilities {
    pub compute_capacity_gflops: f64,
    pub memory_capacity_bytes: u64,
    pub memory_bandwidth_gbps: f64,
    pub num_cores: u32,
    pub peak_performance_tflops: f64,
    pub energy_efficiency_gflops_per_watt: f64,
}

/// Live state, overwritten by the telemetry feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DeviceState {
    /// Always within [0, 100].
    pub utilization_pct: f64,
    pub memory_used_bytes: u64,
    pub power_draw_watts: f64,
    /// Millidegrees Celsius.
    pub temperature_mc: u32,
}

/// Partial telemetry update. `None` fields are left untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DeviceStatePatch {
    pub utilization_pct: Option<f64>,
    pub memory_used_bytes: Option<u64>,
    pub power_draw_watts: Option<f64>,
    pub temperature_mc: Option<u32>,
}

impl DeviceStatePatch {
    pub fn is_empty(&self) -> bool {
        self.utilization_pct.is_none()
            && self.memory_used_bytes.is_none()
            && self.power_draw_watts.is_none()
            && self.temperature_mc.is_none()
    }
}

impl DeviceState {
    pub fn apply(&mut self, patch: &DeviceStatePatch) {
        if let Some(util) = patch.utilization_pct {
            self.utilization_pct = clamp_utilization(util);
        }
        if let Some(used) = patch.memory_used_bytes {
            self.memory_used_bytes = used;
        }
        if let Some(power) = patch.power_draw_watts {
            self.power_draw_watts = power;
        }
        if let Some(temp) = patch.temperature_mc {
            self.temperature_mc = temp;
        }
    }
}

/// Clamp a utilization reading into [0, 100]. NaN reads as idle.
pub fn clamp_utilization(pct: f64) -> f64 {
    if pct.is_nan() {
        0.0
    } else {
        pct.clamp(0.0, 100.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DeviceEconomics {
    pub cost_per_hour: f64,
    /// Cost charged per unit of work run on the device.
    pub cost_per_inference: f64,
}

/// Directed point-to-point link to a neighbour device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Link {
    pub neighbor: DeviceId,
    pub bandwidth_gbps: f64,
    pub latency_us: f64,
}

impl Link {
    pub fn new(neighbor: DeviceId, bandwidth_gbps: f64, latency_us: f64) -> Self {
        Self {
            neighbor,
            bandwidth_gbps,
            latency_us,
        }
    }
}

/// One compute node in the pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Device {
    /// Overwritten by the registry on registration.
    #[serde(default)]
    pub id: DeviceId,
    #[serde(default)]
    pub device_type: DeviceType,
    pub name: String,
    #[serde(default)]
    pub capabilities: DeviceCapabilities,
    #[serde(default)]
    pub state: DeviceState,
    #[serde(default)]
    pub economics: DeviceEconomics,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl Device {
    pub fn new(name: impl Into<String>, device_type: DeviceType) -> Self {
        Self {
            name: name.into(),
            device_type,
            ..Default::default()
        }
    }

    pub fn with_peak_tflops(mut self, tflops: f64) -> Self {
        self.capabilities.peak_performance_tflops = tflops;
        self
    }

    pub fn with_memory(mut self, bytes: u64) -> Self {
        self.capabilities.memory_capacity_bytes = bytes;
        self
    }

    pub fn with_utilization(mut self, pct: f64) -> Self {
        self.state.utilization_pct = clamp_utilization(pct);
        self
    }

    pub fn with_power_draw(mut self, watts: f64) -> Self {
        self.state.power_draw_watts = watts;
        self
    }

    pub fn with_cost_per_hour(mut self, cost: f64) -> Self {
        self.economics.cost_per_hour = cost;
        self
    }

    pub fn with_link(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }

    /// Memory not currently in use.
    pub fn memory_free_bytes(&self) -> u64 {
        self.capabilities
            .memory_capacity_bytes
            .saturating_sub(self.state.memory_used_bytes)
    }

    /// Links leading to `neighbor`, in declaration order.
    pub fn links_to(&self, neighbor: DeviceId) -> impl Iterator<Item = &Link> {
        self.links.iter().filter(move |l| l.neighbor == neighbor)
    }
}

// --- Display implementations ---

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Cpu => write!(f, "CPU"),
            DeviceType::Gpu => write!(f, "GPU"),
            DeviceType::Tpu => write!(f, "TPU"),
            DeviceType::Npu => write!(f, "NPU"),
            DeviceType::Photonic => write!(f, "Photonic"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_patch_changes_nothing() {
        let mut state = DeviceState {
            utilization_pct: 42.0,
            memory_used_bytes: 1024,
            power_draw_watts: 250.0,
            temperature_mc: 65_000,
        };
        let before = state.clone();
        let patch = DeviceStatePatch::default();

        assert!(patch.is_empty());
        state.apply(&patch);
        assert_eq!(state, before);
    }

    #[test]
    fn test_patch_overwrites_only_given_fields() {
        let mut state = DeviceState {
            utilization_pct: 10.0,
            memory_used_bytes: 1024,
            power_draw_watts: 100.0,
            temperature_mc: 40_000,
        };
        state.apply(&DeviceStatePatch {
            power_draw_watts: Some(300.0),
            ..Default::default()
        });

        assert_eq!(state.power_draw_watts, 300.0);
        assert_eq!(state.utilization_pct, 10.0);
        assert_eq!(state.memory_used_bytes, 1024);
        assert_eq!(state.temperature_mc, 40_000);
    }

    #[test]
    fn test_utilization_is_clamped() {
        let mut state = DeviceState::default();
        state.apply(&DeviceStatePatch {
            utilization_pct: Some(140.0),
            ..Default::default()
        });
        assert_eq!(state.utilization_pct, 100.0);

        state.apply(&DeviceStatePatch {
            utilization_pct: Some(-5.0),
            ..Default::default()
        });
        assert_eq!(state.utilization_pct, 0.0);

        assert_eq!(clamp_utilization(f64::NAN), 0.0);
    }

    #[test]
    fn test_device_type_from_toml_lowercase() {
        let device: Device = toml::from_str(
            r#"
            name = "photon-0"
            device_type = "photonic"

            [[links]]
            neighbor = 1
            bandwidth_gbps = 400.0
            latency_us = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(device.device_type, DeviceType::Photonic);
        assert_eq!(device.links.len(), 1);
        assert_eq!(device.links_to(1).count(), 1);
        assert_eq!(device.device_type.to_string(), "Photonic");
    }
}
