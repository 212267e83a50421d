use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use lightrail_core::{Device, SchedulerConfig, Task};
use lightrail_scheduler::LightrailScheduler;

/// A cluster description: devices (with links), tasks to place, and
/// optionally scheduler settings that replace the configured ones.
///
/// Device ids are assigned in file order from 0, so links name devices by
/// their position in `devices`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ClusterFile {
    #[serde(default)]
    pub scheduler: Option<SchedulerConfig>,
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl ClusterFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading cluster file {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("parsing cluster file {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let cluster: ClusterFile = toml::from_str(contents)?;
        if cluster.devices.is_empty() {
            bail!("cluster has no devices");
        }
        Ok(cluster)
    }

    /// Register every device in order. Fails on the first refused device.
    pub fn register_devices(&self, scheduler: &LightrailScheduler) -> Result<()> {
        for (index, device) in self.devices.iter().enumerate() {
            let id = scheduler
                .register_device(device.clone())
                .with_context(|| format!("registering device {} ({})", index, device.name))?;
            if id as usize != index {
                warn!(
                    "Device {} registered as id {}; links in the file assume {}",
                    device.name, id, index
                );
            }
        }
        info!("Registered {} devices", self.devices.len());
        Ok(())
    }
}
