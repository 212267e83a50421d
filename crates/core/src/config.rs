use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// Scalar the routing and policy engines minimise.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    #[default]
    MinimizeLatency,
    MinimizePower,
    MinimizeCost,
    MaximizeThroughput,
    Balanced,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Cache-aware scoring with shortest-path transfer estimates.
    #[default]
    OptimalShortestPath,
    /// Lowest current utilization wins.
    GreedyLeastLoaded,
}

/// What happens to a task the policy engine could not place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct RetryPolicy {
    /// Re-enqueue a failed task at most this many times. 0 disables retry.
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub objective: Objective,
    pub algorithm: Algorithm,

    /// Multi-objective weights; must sum to 1.0 under `Objective::Balanced`.
    pub weight_latency: f64,
    pub weight_power: f64,
    pub weight_cost: f64,

    /// Score bonus for running on the device that holds the task's cache.
    pub cache_hit_bonus: f64,
    /// Max deviation (percentage points) of any device from mean utilization.
    pub load_imbalance_threshold_pct: f64,
    /// Devices at or above this utilization are not eligible.
    pub saturation_ceiling_pct: f64,
    /// Utilization added to a device per 1e12 operations placed on it.
    pub load_per_tflop_pct: f64,

    pub queue_capacity: usize,
    /// `None` leaves the registry unbounded.
    pub max_devices: Option<usize>,
    pub route_cache_enabled: bool,
    /// Buffer of the scheduling event broadcast.
    pub event_capacity: usize,
    /// Finished tasks kept in the status table before the oldest are pruned.
    pub max_terminal_tasks: usize,
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            objective: Objective::MinimizeLatency,
            algorithm: Algorithm::OptimalShortestPath,
            weight_latency: 0.5,
            weight_power: 0.3,
            weight_cost: 0.2,
            cache_hit_bonus: 1000.0,
            load_imbalance_threshold_pct: 20.0,
            saturation_ceiling_pct: 95.0,
            load_per_tflop_pct: 1.0,
            queue_capacity: 4096,
            max_devices: None,
            route_cache_enabled: true,
            event_capacity: 1024,
            max_terminal_tasks: 500,
            retry: RetryPolicy::default(),
        }
    }
}

const WEIGHT_SUM_TOLERANCE: f64 = 1e-3;

impl SchedulerConfig {
    /// Reject malformed weights and thresholds.
    pub fn validate(&self) -> Result<()> {
        let weights = [
            ("weight_latency", self.weight_latency),
            ("weight_power", self.weight_power),
            ("weight_cost", self.weight_cost),
        ];
        for (name, w) in weights {
            if !w.is_finite() || w < 0.0 {
                return Err(invalid(format!("{} must be a non-negative number, got {}", name, w)));
            }
        }

        if self.objective == Objective::Balanced {
            let sum = self.weight_latency + self.weight_power + self.weight_cost;
            if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
                return Err(invalid(format!(
                    "balanced objective needs weights summing to 1.0, got {:.4}",
                    sum
                )));
            }
        }

        if !self.cache_hit_bonus.is_finite() || self.cache_hit_bonus < 0.0 {
            return Err(invalid(format!(
                "cache_hit_bonus must be a non-negative number, got {}",
                self.cache_hit_bonus
            )));
        }
        if !(0.0..=100.0).contains(&self.load_imbalance_threshold_pct) {
            return Err(invalid(format!(
                "load_imbalance_threshold_pct must be within [0, 100], got {}",
                self.load_imbalance_threshold_pct
            )));
        }
        if !(self.saturation_ceiling_pct > 0.0 && self.saturation_ceiling_pct <= 100.0) {
            return Err(invalid(format!(
                "saturation_ceiling_pct must be within (0, 100], got {}",
                self.saturation_ceiling_pct
            )));
        }
        if !self.load_per_tflop_pct.is_finite() || self.load_per_tflop_pct < 0.0 {
            return Err(invalid(format!(
                "load_per_tflop_pct must be a non-negative number, got {}",
                self.load_per_tflop_pct
            )));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity must be at least 1".into()));
        }
        if self.max_devices == Some(0) {
            return Err(invalid("max_devices must be at least 1 when set".into()));
        }
        if self.event_capacity == 0 {
            return Err(invalid("event_capacity must be at least 1".into()));
        }
        Ok(())
    }

    /// Multi-objective value: α·latency + β·power + γ·cost.
    pub fn weighted_objective(&self, latency_ms: f64, power_watts: f64, cost: f64) -> f64 {
        self.weight_latency * latency_ms + self.weight_power * power_watts + self.weight_cost * cost
    }
}

fn invalid(msg: String) -> SchedulerError {
    SchedulerError::InvalidConfig(msg)
}

fn default_log_filter() -> String {
    "lightrail=info,lightrail_scheduler=info,lightrail_core=info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins when set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Write daily-rotated logs here instead of stderr.
    #[serde(default)]
    pub directory: Option<std::path::PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            directory: None,
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LightrailConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Returns the config directory for lightrail.
///
/// `$XDG_CONFIG_HOME/lightrail/`, falling back to `~/.config/lightrail/`.
pub fn config_dir() -> std::path::PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return std::path::PathBuf::from(xdg).join("lightrail");
    }

    if let Ok(home) = std::env::var("HOME") {
        return std::path::PathBuf::from(home).join(".config").join("lightrail");
    }

    // Last resort
    std::path::PathBuf::from(".lightrail")
}

/// Returns the full path to the config file.
pub fn config_path() -> std::path::PathBuf {
    config_dir().join("config.toml")
}

/// Load configuration from the default path.
/// Creates the config file with defaults on first run.
pub fn load_or_create_config() -> LightrailConfig {
    let path = config_path();

    if path.exists() {
        load_config(&path)
    } else {
        let config = LightrailConfig::default();

        if let Err(e) = save_config(&config, &path) {
            tracing::warn!("Could not create default config at {:?}: {}", path, e);
        } else {
            tracing::info!("Created default config at {:?}", path);
        }

        config
    }
}

/// Load configuration from a TOML file.
/// Falls back to defaults if the file is missing or malformed.
pub fn load_config(path: &std::path::Path) -> LightrailConfig {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => {
                tracing::info!("Loaded config from {:?}", path);
                config
            }
            Err(e) => {
                tracing::warn!("Failed to parse config {:?}: {}, using defaults", path, e);
                LightrailConfig::default()
            }
        },
        Err(_) => {
            tracing::debug!("Config file {:?} not found, using defaults", path);
            LightrailConfig::default()
        }
    }
}

/// Save configuration to a TOML file.
/// Creates parent directories if they don't exist.
pub fn save_config(config: &LightrailConfig, path: &std::path::Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    tracing::info!("Config saved to {:?}", path);
    Ok(())
}
