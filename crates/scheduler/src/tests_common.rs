use lightrail_core::{Device, DeviceType, SchedulerConfig, Task};

pub const GIB: u64 = 1 << 30;

/// 10 TFLOP/s GPU with 16 GiB and the given utilization.
pub fn make_gpu(name: &str, utilization_pct: f64) -> Device {
    Device::new(name, DeviceType::Gpu)
        .with_peak_tflops(10.0)
        .with_memory(16 * GIB)
        .with_utilization(utilization_pct)
        .with_power_draw(300.0)
        .with_cost_per_hour(3.6)
}

pub fn make_devices(utilizations: &[f64]) -> Vec<Device> {
    utilizations
        .iter()
        .enumerate()
        .map(|(i, u)| make_gpu(&format!("gpu-{}", i), *u))
        .collect()
}

/// 1e12 operations needing 1 GiB.
pub fn make_test_task() -> Task {
    Task::new(1e12).with_memory(GIB)
}

pub fn make_config() -> SchedulerConfig {
    SchedulerConfig {
        cache_hit_bonus: 1000.0,
        ..Default::default()
    }
}
