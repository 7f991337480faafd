//! Shared helpers for the integration suites: scripted collectors and
//! tracing setup.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use tracing_subscriber::EnvFilter;

use darwin_sampler::prelude::*;
use darwin_sampler::Result;

static TRACING: Lazy<()> = Lazy::new(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
});

/// Installs a test subscriber once per process. Respects `RUST_LOG`.
pub fn init_tracing() {
    Lazy::force(&TRACING);
}

type Script = Box<dyn Fn(usize) -> Result<Sample> + Send + Sync>;

/// A scripted metric probe for driving the scheduler in tests. The script
/// closure receives the zero-based call index.
pub struct FakeCollector {
    kind: CollectorKind,
    available: bool,
    delay: Option<Duration>,
    script: Script,
    calls: Arc<AtomicUsize>,
}

impl FakeCollector {
    pub fn scripted(
        kind: CollectorKind,
        script: impl Fn(usize) -> Result<Sample> + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            available: true,
            delay: None,
            script: Box::new(script),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns the same sample on every call.
    pub fn steady(kind: CollectorKind, sample: Sample) -> Self {
        Self::scripted(kind, move |_| Ok(sample.clone()))
    }

    /// Fails on every call with a fresh error from the closure.
    pub fn failing(
        kind: CollectorKind,
        error: impl Fn() -> CollectorError + Send + Sync + 'static,
    ) -> Self {
        Self::scripted(kind, move |_| Err(error()))
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Delays every `collect` call, for exercising the fan-in deadline.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Shared call counter, usable after the collector is consumed by a
    /// [`CollectorSet`].
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Collector for FakeCollector {
    fn kind(&self) -> CollectorKind {
        self.kind
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn collect(&self) -> Result<Sample> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.script)(call)
    }
}

pub fn cpu_at(usage: f64) -> Sample {
    Sample::Cpu(CpuMetrics::new(usage, 8, 2400.0))
}

pub fn memory_at(used: u64, total: u64) -> Sample {
    Sample::Memory(MemoryMetrics::new(used, total, PressureLevel::Normal, 0))
}

/// Waits for the next snapshot event, skipping error events.
pub async fn next_snapshot(
    events: &mut tokio::sync::mpsc::Receiver<SamplerEvent>,
) -> Arc<Snapshot> {
    loop {
        match events.recv().await.expect("event channel closed") {
            SamplerEvent::Snapshot(snapshot) => return snapshot,
            SamplerEvent::Error { .. } => continue,
        }
    }
}
