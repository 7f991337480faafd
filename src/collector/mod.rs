//! The collector contract: the boundary between the scheduler and the
//! platform-specific probes.
//!
//! A [`Collector`] produces one subsystem's [`Sample`] per invocation. The
//! scheduler treats every collector as independent: a failure in one never
//! aborts the others, and no ordering is assumed among them within a tick.
//! Real implementations wrap IOKit queries, `host_statistics` calls, or a
//! long-lived `powermetrics` subprocess; this crate only sees the trait.
//!
//! CPU, memory, and self-performance collectors are *required*: they always
//! participate in fan-out and their availability probe is never consulted.
//! The remaining kinds are optional; when [`Collector::is_available`]
//! returns false at start-up the collector is excluded from fan-out
//! entirely and its snapshot field stays absent for the run.
//!
//! Collectors holding external resources (a subprocess handle, an SMC
//! connection) acquire them in [`Collector::start`] and release them in
//! [`Collector::stop`] or [`Collector::on_shutdown`]; the suspend/resume
//! hooks let them tear down and rebuild across system sleep.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;

use crate::error::CollectorError;
use crate::metrics::{
    CpuMetrics, DiskMetrics, GpuMetrics, MemoryMetrics, NetworkMetrics, SelfMetrics, TemperatureMetrics,
};

/// The seven collector capabilities the scheduler can fan out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum CollectorKind {
    Cpu,
    Memory,
    Gpu,
    Disk,
    Temperature,
    Network,
    SelfUsage,
}

impl CollectorKind {
    /// Required collectors always participate in fan-out; their
    /// availability probe is not consulted.
    pub fn is_required(self) -> bool {
        matches!(self, CollectorKind::Cpu | CollectorKind::Memory | CollectorKind::SelfUsage)
    }
}

impl fmt::Display for CollectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CollectorKind::Cpu => "cpu",
            CollectorKind::Memory => "memory",
            CollectorKind::Gpu => "gpu",
            CollectorKind::Disk => "disk",
            CollectorKind::Temperature => "temperature",
            CollectorKind::Network => "network",
            CollectorKind::SelfUsage => "self_usage",
        };
        f.write_str(name)
    }
}

/// One collector invocation's typed result.
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    Cpu(CpuMetrics),
    Memory(MemoryMetrics),
    Gpu(GpuMetrics),
    Disks(Vec<DiskMetrics>),
    Temperature(TemperatureMetrics),
    Network(NetworkMetrics),
    SelfUsage(SelfMetrics),
}

impl Sample {
    /// The collector kind this sample belongs to. The scheduler rejects a
    /// sample whose kind does not match the collector that produced it.
    pub fn kind(&self) -> CollectorKind {
        match self {
            Sample::Cpu(_) => CollectorKind::Cpu,
            Sample::Memory(_) => CollectorKind::Memory,
            Sample::Gpu(_) => CollectorKind::Gpu,
            Sample::Disks(_) => CollectorKind::Disk,
            Sample::Temperature(_) => CollectorKind::Temperature,
            Sample::Network(_) => CollectorKind::Network,
            Sample::SelfUsage(_) => CollectorKind::SelfUsage,
        }
    }
}

/// Typed payloads collectors keep in the shared expiring cache: facts that
/// change rarely enough that re-querying them every tick is wasted work.
#[derive(Debug, Clone, PartialEq)]
pub enum StaticFact {
    /// A device or adapter name, e.g. the GPU model string.
    DeviceName(String),
    /// A core or sensor count.
    Count(u32),
    /// Mounted volume paths.
    MountPoints(Vec<String>),
}

/// One independent metric probe.
///
/// `collect` may be slow (it may shell out to an external sampling tool);
/// the scheduler bounds the wait with a deadline and abandons stragglers.
/// Implementations must never panic across this boundary; any internal
/// failure becomes a [`CollectorError`]. Blocking OS calls belong on
/// `tokio::task::spawn_blocking` inside the implementation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Collector: Send + Sync {
    /// Which subsystem this collector samples.
    fn kind(&self) -> CollectorKind;

    /// Cheap capability probe, consulted at scheduler start-up for optional
    /// collectors. Required collectors are assumed available.
    fn is_available(&self) -> bool {
        true
    }

    /// Produce one sample.
    async fn collect(&self) -> Result<Sample, CollectorError>;

    /// Prime delta-tracking state, e.g. take one throwaway sample so the
    /// first real sample has a baseline.
    async fn start(&self) {}

    /// Release held resources.
    async fn stop(&self) {}

    /// System is going to sleep; tear down external resources.
    async fn on_suspend(&self) {}

    /// System woke up; rebuild what `on_suspend` tore down.
    async fn on_resume(&self) {}

    /// System is powering off; final teardown in place of `stop`.
    async fn on_shutdown(&self) {}
}

/// The scheduler's collectors, keyed by kind.
///
/// Registering a second collector for the same kind replaces the first.
#[derive(Default)]
pub struct CollectorSet {
    inner: HashMap<CollectorKind, Arc<dyn Collector>>,
}

impl CollectorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration.
    pub fn with(mut self, collector: impl Collector + 'static) -> Self {
        self.register(Arc::new(collector));
        self
    }

    pub fn register(&mut self, collector: Arc<dyn Collector>) {
        self.inner.insert(collector.kind(), collector);
    }

    pub fn get(&self, kind: CollectorKind) -> Option<&Arc<dyn Collector>> {
        self.inner.get(&kind)
    }

    pub fn contains(&self, kind: CollectorKind) -> bool {
        self.inner.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Kinds that participate in fan-out: every required kind that is
    /// registered, plus every optional kind whose availability probe
    /// passes. Sorted for stable fan-out order in logs.
    pub(crate) fn participants(&self) -> Vec<CollectorKind> {
        let mut kinds: Vec<CollectorKind> = self
            .inner
            .iter()
            .filter(|(kind, collector)| kind.is_required() || collector.is_available())
            .map(|(kind, _)| *kind)
            .collect();
        kinds.sort();
        kinds
    }

    pub(crate) async fn start_many(&self, kinds: &[CollectorKind]) {
        join_all(self.collectors(kinds).map(|collector| collector.start())).await;
    }

    pub(crate) async fn stop_many(&self, kinds: &[CollectorKind]) {
        join_all(self.collectors(kinds).map(|collector| collector.stop())).await;
    }

    pub(crate) async fn suspend_many(&self, kinds: &[CollectorKind]) {
        join_all(self.collectors(kinds).map(|collector| collector.on_suspend())).await;
    }

    pub(crate) async fn resume_many(&self, kinds: &[CollectorKind]) {
        join_all(self.collectors(kinds).map(|collector| collector.on_resume())).await;
    }

    pub(crate) async fn shutdown_many(&self, kinds: &[CollectorKind]) {
        join_all(self.collectors(kinds).map(|collector| collector.on_shutdown())).await;
    }

    fn collectors<'a>(&'a self, kinds: &'a [CollectorKind]) -> impl Iterator<Item = &'a Arc<dyn Collector>> {
        kinds.iter().filter_map(|kind| self.inner.get(kind))
    }
}

impl fmt::Debug for CollectorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectorSet").field("kinds", &self.inner.keys().collect::<Vec<_>>()).finish()
    }
}
