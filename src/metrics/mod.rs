//! Snapshot types for the aggregation pipeline.
//!
//! A [`Snapshot`] is an immutable bundle of per-subsystem records taken in
//! one sampling tick. CPU and memory are required; every other subsystem is
//! optional and stays entirely absent when its collector is unavailable or
//! failed, so a missing reading is never confused with a reading of zero.
//!
//! Construction goes through [`SnapshotBuilder`], which implements the
//! scheduler's merge rule: a tick with both required records produces a full
//! snapshot, a tick where exactly one of them failed produces a *degraded*
//! snapshot with the missing record synthesized from a documented safe
//! default, and a tick where both failed produces nothing.
//!
//! # Examples
//!
//! ```rust
//! use darwin_sampler::metrics::{CpuMetrics, MemoryMetrics, PressureLevel, SnapshotBuilder};
//!
//! let mut builder = SnapshotBuilder::new();
//! builder.cpu(CpuMetrics::new(35.0, 8, 2400.0));
//! builder.memory(MemoryMetrics::new(4 << 30, 16 << 30, PressureLevel::Normal, 0));
//!
//! let snapshot = builder.finish().expect("both required records present");
//! assert!(!snapshot.degraded);
//! assert_eq!(snapshot.memory.usage_percentage(), 25.0);
//! ```

mod types;

pub use types::{
    CpuMetrics, DiskMetrics, GpuMetrics, MemoryMetrics, NetworkMetrics, PressureLevel, ProcessSample, SelfMetrics,
    TemperatureMetrics,
};

use std::time::SystemTime;

use serde::Serialize;

/// One consistent, time-stamped bundle of subsystem metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub cpu: CpuMetrics,
    pub memory: MemoryMetrics,
    pub gpu: Option<GpuMetrics>,
    pub disks: Vec<DiskMetrics>,
    pub temperature: Option<TemperatureMetrics>,
    pub network: Option<NetworkMetrics>,
    pub self_usage: Option<SelfMetrics>,
    /// Instant the tick that produced this snapshot completed its merge.
    pub taken_at: SystemTime,
    /// True when a required record was synthesized from a safe default
    /// because its collector failed this tick.
    pub degraded: bool,
}

/// Accumulates per-collector results during a tick and applies the
/// merge/degrade rule on [`finish`](SnapshotBuilder::finish).
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    cpu: Option<CpuMetrics>,
    memory: Option<MemoryMetrics>,
    gpu: Option<GpuMetrics>,
    disks: Option<Vec<DiskMetrics>>,
    temperature: Option<TemperatureMetrics>,
    network: Option<NetworkMetrics>,
    self_usage: Option<SelfMetrics>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cpu(&mut self, cpu: CpuMetrics) {
        self.cpu = Some(cpu);
    }

    pub fn memory(&mut self, memory: MemoryMetrics) {
        self.memory = Some(memory);
    }

    pub fn gpu(&mut self, gpu: GpuMetrics) {
        self.gpu = Some(gpu);
    }

    pub fn disks(&mut self, disks: Vec<DiskMetrics>) {
        self.disks = Some(disks);
    }

    pub fn temperature(&mut self, temperature: TemperatureMetrics) {
        self.temperature = Some(temperature);
    }

    pub fn network(&mut self, network: NetworkMetrics) {
        self.network = Some(network);
    }

    pub fn self_usage(&mut self, self_usage: SelfMetrics) {
        self.self_usage = Some(self_usage);
    }

    pub fn has_cpu(&self) -> bool {
        self.cpu.is_some()
    }

    pub fn has_memory(&self) -> bool {
        self.memory.is_some()
    }

    /// Applies the merge rule.
    ///
    /// Returns `None` when neither required record is present; the tick then
    /// publishes nothing and the previous snapshot stays current. When
    /// exactly one required record is missing it is synthesized from its
    /// documented fallback and the snapshot is flagged degraded.
    pub fn finish(self) -> Option<Snapshot> {
        if self.cpu.is_none() && self.memory.is_none() {
            return None;
        }
        let degraded = self.cpu.is_none() || self.memory.is_none();
        Some(Snapshot {
            cpu: self.cpu.unwrap_or_else(CpuMetrics::fallback),
            memory: self.memory.unwrap_or_else(MemoryMetrics::fallback),
            gpu: self.gpu,
            disks: self.disks.unwrap_or_default(),
            temperature: self.temperature,
            network: self.network,
            self_usage: self.self_usage,
            taken_at: SystemTime::now(),
            degraded,
        })
    }
}
