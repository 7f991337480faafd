//! # darwin-sampler
//!
//! An adaptive sampling scheduler for macOS system statistics. The crate
//! periodically fans out to a set of independent metric collectors (CPU,
//! memory, GPU, disk, temperature, network, self-usage), merges their
//! results into a single [`Snapshot`](metrics::Snapshot) under a fixed
//! deadline, and adapts its own sampling frequency to system load and power
//! state. It is the engine behind a menu-bar style stats display: the
//! embedder supplies the collectors and renders the snapshots.
//!
//! ## Features
//!
//! - **Concurrent collection**: every tick polls all collectors in
//!   parallel; a straggler is abandoned at the deadline rather than
//!   stalling the tick.
//! - **Degraded snapshots**: if one required collector fails, the snapshot
//!   is still published with a flagged fallback value, so the display never
//!   goes blank because of a single subsystem.
//! - **Adaptive frequency**: sustained high load halves the sampling
//!   period; Low Power Mode doubles it; both respect a hysteresis window
//!   so the timer does not thrash. See [`frequency`].
//! - **Error backoff**: repeated failures of the same kind are tallied and
//!   rate-limited before they reach the user. See [`backoff`].
//! - **Expiring cache**: collectors share a TTL cache for facts that
//!   change rarely (device names, mount points). See [`cache`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use darwin_sampler::prelude::*;
//!
//! # #[derive(Debug)] struct CpuProbe;
//! # #[async_trait::async_trait]
//! # impl Collector for CpuProbe {
//! #     fn kind(&self) -> CollectorKind { CollectorKind::Cpu }
//! #     async fn collect(&self) -> darwin_sampler::Result<Sample> {
//! #         Ok(Sample::Cpu(CpuMetrics::new(10.0, 8, 2400.0)))
//! #     }
//! # }
//! # #[derive(Debug)] struct MemoryProbe;
//! # #[async_trait::async_trait]
//! # impl Collector for MemoryProbe {
//! #     fn kind(&self) -> CollectorKind { CollectorKind::Memory }
//! #     async fn collect(&self) -> darwin_sampler::Result<Sample> {
//! #         Ok(Sample::Memory(MemoryMetrics::new(1, 2, PressureLevel::Normal, 0)))
//! #     }
//! # }
//! #[tokio::main]
//! async fn main() -> darwin_sampler::Result<()> {
//!     let collectors = CollectorSet::new().with(CpuProbe).with(MemoryProbe);
//!     let cache = Arc::new(Cache::new(TtlPolicy::default()));
//!     let (sampler, mut events) = Sampler::new(SamplerConfig::default(), collectors, cache)?;
//!
//!     sampler.start().await?;
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             SamplerEvent::Snapshot(snapshot) => {
//!                 println!("cpu {:.1}%  mem {:.1}%", snapshot.cpu.usage,
//!                     snapshot.memory.usage_percentage());
//!             },
//!             SamplerEvent::Error { message, user_visible: true, .. } => {
//!                 eprintln!("{message}");
//!             },
//!             SamplerEvent::Error { .. } => {},
//!         }
//!     }
//!     sampler.stop().await;
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod cache;
pub mod collector;
pub mod error;
pub mod frequency;
pub mod metrics;
pub mod sampler;

pub use error::{CollectorError, ErrorKind, Result};

/// Commonly used types, re-exported for convenience.
pub mod prelude {
    pub use crate::backoff::{ErrorPolicy, Verdict};
    pub use crate::cache::{Cache, CacheStats, TtlPolicy};
    pub use crate::collector::{Collector, CollectorKind, CollectorSet, Sample, StaticFact};
    pub use crate::error::{CollectorError, ErrorKind};
    pub use crate::frequency::{AdjustmentReason, FrequencyController, LoadSample};
    pub use crate::metrics::{
        CpuMetrics, DiskMetrics, GpuMetrics, MemoryMetrics, NetworkMetrics, PressureLevel,
        ProcessSample, SelfMetrics, Snapshot, SnapshotBuilder, TemperatureMetrics,
    };
    pub use crate::sampler::{Sampler, SamplerConfig, SamplerEvent, SamplerState};
}
