use std::fmt;

use serde::Serialize;

/// Clamp a raw percentage reading into [0, 100]. Non-finite input (NaN,
/// infinities from a bad delta division) maps to 0.
fn clamp_percent(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Clamp a raw rate reading to be non-negative, mapping non-finite input to 0.
fn clamp_rate(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

/// Memory pressure level as reported by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PressureLevel {
    /// Sufficient memory available.
    Normal,
    /// Memory is becoming constrained.
    Warning,
    /// System is under severe memory constraints.
    Critical,
}

impl fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "Normal"),
            Self::Warning => write!(f, "Warning"),
            Self::Critical => write!(f, "Critical"),
        }
    }
}

/// One process entry in a CPU record's optional process list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessSample {
    pub pid: i32,
    pub name: String,
    /// CPU usage percentage attributed to this process, clamped to [0, 100].
    pub cpu_usage: f64,
}

impl ProcessSample {
    pub fn new(pid: i32, name: impl Into<String>, cpu_usage: f64) -> Self {
        Self { pid, name: name.into(), cpu_usage: clamp_percent(cpu_usage) }
    }
}

/// CPU metrics for one sampling tick.
///
/// Usage is clamped to [0, 100] at construction; a reading of `-5` stores as
/// `0`, a reading of `150` stores as `100`. Core count is at least 1.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuMetrics {
    /// Overall usage percentage across all logical cores.
    pub usage: f64,
    /// Number of logical cores, always at least 1.
    pub logical_cores: u32,
    /// Nominal frequency in MHz, never negative.
    pub frequency_mhz: f64,
    /// Top processes by CPU, possibly empty.
    pub processes: Vec<ProcessSample>,
}

impl CpuMetrics {
    pub fn new(usage: f64, logical_cores: u32, frequency_mhz: f64) -> Self {
        Self {
            usage: clamp_percent(usage),
            logical_cores: logical_cores.max(1),
            frequency_mhz: clamp_rate(frequency_mhz),
            processes: Vec::new(),
        }
    }

    pub fn with_processes(mut self, processes: Vec<ProcessSample>) -> Self {
        self.processes = processes;
        self
    }

    /// Safe default published when the CPU collector fails but memory
    /// succeeded: 0% usage, 1 core, 0 MHz.
    pub fn fallback() -> Self {
        Self::new(0.0, 1, 0.0)
    }
}

/// Memory metrics for one sampling tick.
///
/// If a raw reading reports `used > total`, `total` is raised to `used`;
/// `used` is never lowered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryMetrics {
    /// Used bytes.
    pub used: u64,
    /// Total bytes, always at least `used`.
    pub total: u64,
    /// Kernel memory pressure level.
    pub pressure: PressureLevel,
    /// Swap space in use, in bytes.
    pub swap_used: u64,
}

impl MemoryMetrics {
    pub fn new(used: u64, total: u64, pressure: PressureLevel, swap_used: u64) -> Self {
        Self { used, total: total.max(used), pressure, swap_used }
    }

    /// Derived usage percentage; 0 when total is 0, exactly 100.0 when the
    /// `used > total` correction fired.
    pub fn usage_percentage(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.used as f64 / self.total as f64 * 100.0
        }
    }

    /// Safe default published when the memory collector fails but CPU
    /// succeeded: 0 used, 1 total, normal pressure, no swap.
    pub fn fallback() -> Self {
        Self::new(0, 1, PressureLevel::Normal, 0)
    }
}

/// GPU metrics for one sampling tick. Entirely absent from a snapshot when
/// no GPU collector is available, to distinguish "no reading" from zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuMetrics {
    /// Adapter name, when known.
    pub name: Option<String>,
    /// Utilization percentage, clamped to [0, 100].
    pub utilization: f64,
    /// Used VRAM bytes.
    pub memory_used: u64,
    /// Total VRAM bytes, always at least `memory_used`.
    pub memory_total: u64,
}

impl GpuMetrics {
    pub fn new(utilization: f64, memory_used: u64, memory_total: u64) -> Self {
        Self {
            name: None,
            utilization: clamp_percent(utilization),
            memory_used,
            memory_total: memory_total.max(memory_used),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn memory_usage_percentage(&self) -> f64 {
        if self.memory_total == 0 {
            0.0
        } else {
            self.memory_used as f64 / self.memory_total as f64 * 100.0
        }
    }
}

/// Per-volume disk metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskMetrics {
    /// Volume or mount identifier, e.g. "/" or "Macintosh HD".
    pub volume: String,
    /// Used bytes.
    pub used: u64,
    /// Total bytes, always at least `used`.
    pub total: u64,
    /// Read throughput in bytes per second.
    pub read_bytes_per_sec: f64,
    /// Write throughput in bytes per second.
    pub write_bytes_per_sec: f64,
}

impl DiskMetrics {
    pub fn new(volume: impl Into<String>, used: u64, total: u64) -> Self {
        Self {
            volume: volume.into(),
            used,
            total: total.max(used),
            read_bytes_per_sec: 0.0,
            write_bytes_per_sec: 0.0,
        }
    }

    pub fn with_throughput(mut self, read_bytes_per_sec: f64, write_bytes_per_sec: f64) -> Self {
        self.read_bytes_per_sec = clamp_rate(read_bytes_per_sec);
        self.write_bytes_per_sec = clamp_rate(write_bytes_per_sec);
        self
    }

    pub fn usage_percentage(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.used as f64 / self.total as f64 * 100.0
        }
    }
}

/// Thermal readings. Fan speeds are in RPM.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemperatureMetrics {
    pub cpu_celsius: f64,
    pub gpu_celsius: Option<f64>,
    pub fan_rpm: Vec<f64>,
}

/// Network throughput for one sampling tick, derived from counter deltas
/// kept inside the network collector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkMetrics {
    /// Download rate in bytes per second.
    pub download_bytes_per_sec: f64,
    /// Upload rate in bytes per second.
    pub upload_bytes_per_sec: f64,
    /// Cumulative bytes received since interface counters were last reset.
    pub bytes_received: u64,
    /// Cumulative bytes sent since interface counters were last reset.
    pub bytes_sent: u64,
}

impl NetworkMetrics {
    pub fn new(download_bytes_per_sec: f64, upload_bytes_per_sec: f64, bytes_received: u64, bytes_sent: u64) -> Self {
        Self {
            download_bytes_per_sec: clamp_rate(download_bytes_per_sec),
            upload_bytes_per_sec: clamp_rate(upload_bytes_per_sec),
            bytes_received,
            bytes_sent,
        }
    }
}

/// Resource usage of the sampling process itself. Doubles as the proxy
/// signal for the low-power heuristic fed to the frequency controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelfMetrics {
    /// CPU usage percentage of this process, clamped to [0, 100].
    pub cpu_usage: f64,
    /// Resident memory of this process, in bytes.
    pub memory_bytes: u64,
}

impl SelfMetrics {
    pub fn new(cpu_usage: f64, memory_bytes: u64) -> Self {
        Self { cpu_usage: clamp_percent(cpu_usage), memory_bytes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_usage_is_clamped() {
        assert_eq!(CpuMetrics::new(-5.0, 8, 2400.0).usage, 0.0);
        assert_eq!(CpuMetrics::new(150.0, 8, 2400.0).usage, 100.0);
        assert_eq!(CpuMetrics::new(42.5, 8, 2400.0).usage, 42.5);
        assert_eq!(CpuMetrics::new(f64::NAN, 8, 2400.0).usage, 0.0);
    }

    #[test]
    fn cpu_core_count_is_at_least_one() {
        assert_eq!(CpuMetrics::new(10.0, 0, 0.0).logical_cores, 1);
        assert_eq!(CpuMetrics::new(10.0, 0, -100.0).frequency_mhz, 0.0);
    }

    #[test]
    fn memory_total_is_raised_to_used() {
        let memory = MemoryMetrics::new(10_000_000_000, 8_000_000_000, PressureLevel::Normal, 0);
        assert_eq!(memory.total, 10_000_000_000);
        assert_eq!(memory.used, 10_000_000_000);
        assert_eq!(memory.usage_percentage(), 100.0);
    }

    #[test]
    fn memory_usage_percentage_handles_zero_total() {
        let memory = MemoryMetrics::new(0, 0, PressureLevel::Normal, 0);
        assert_eq!(memory.usage_percentage(), 0.0);
    }

    #[test]
    fn memory_usage_percentage_is_exact() {
        let memory = MemoryMetrics::new(7_000_000_000, 8_000_000_000, PressureLevel::Warning, 0);
        assert_eq!(memory.usage_percentage(), 87.5);
    }

    #[test]
    fn gpu_invariants_match_memory() {
        let gpu = GpuMetrics::new(130.0, 6_000, 4_000).with_name("Apple M2");
        assert_eq!(gpu.utilization, 100.0);
        assert_eq!(gpu.memory_total, 6_000);
        assert_eq!(gpu.memory_usage_percentage(), 100.0);
        assert_eq!(gpu.name.as_deref(), Some("Apple M2"));
    }

    #[test]
    fn disk_total_is_raised_and_rates_clamped() {
        let disk = DiskMetrics::new("/", 500, 400).with_throughput(-1.0, f64::INFINITY);
        assert_eq!(disk.total, 500);
        assert_eq!(disk.read_bytes_per_sec, 0.0);
        assert_eq!(disk.write_bytes_per_sec, 0.0);
        assert_eq!(disk.usage_percentage(), 100.0);
    }

    #[test]
    fn fallbacks_use_documented_defaults() {
        let cpu = CpuMetrics::fallback();
        assert_eq!((cpu.usage, cpu.logical_cores, cpu.frequency_mhz), (0.0, 1, 0.0));
        assert!(cpu.processes.is_empty());

        let memory = MemoryMetrics::fallback();
        assert_eq!((memory.used, memory.total, memory.swap_used), (0, 1, 0));
        assert_eq!(memory.pressure, PressureLevel::Normal);
    }
}
