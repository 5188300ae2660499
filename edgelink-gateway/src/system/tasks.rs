use parking_lot::Mutex;
use sysinfo::System;

/// One utilization reading source, sampled on every poll cycle.
pub trait UtilizationTask: Send + Sync {
    fn name(&self) -> &str;

    /// Percentage in `0.0..=100.0`.
    fn telemetry_value(&self) -> f32;
}

/// Global CPU usage. The first sample after construction reads 0.
pub struct CpuUtilTask {
    sys: Mutex<System>,
}

impl CpuUtilTask {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        Self {
            sys: Mutex::new(sys),
        }
    }
}

impl Default for CpuUtilTask {
    fn default() -> Self {
        Self::new()
    }
}

impl UtilizationTask for CpuUtilTask {
    fn name(&self) -> &str {
        "CpuUtil"
    }

    fn telemetry_value(&self) -> f32 {
        let mut sys = self.sys.lock();
        sys.refresh_cpu_usage();
        sys.global_cpu_info().cpu_usage()
    }
}

pub struct MemUtilTask {
    sys: Mutex<System>,
}

impl MemUtilTask {
    pub fn new() -> Self {
        Self {
            sys: Mutex::new(System::new()),
        }
    }
}

impl Default for MemUtilTask {
    fn default() -> Self {
        Self::new()
    }
}

impl UtilizationTask for MemUtilTask {
    fn name(&self) -> &str {
        "MemUtil"
    }

    fn telemetry_value(&self) -> f32 {
        let mut sys = self.sys.lock();
        sys.refresh_memory();
        let total = sys.total_memory();
        if total == 0 {
            return 0.0;
        }
        (sys.used_memory() as f64 / total as f64 * 100.0) as f32
    }
}
