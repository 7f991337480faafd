//! The aggregation scheduler.
//!
//! [`Sampler`] drives the whole pipeline: a periodic tick fans out to every
//! participating collector concurrently, waits for the results under a fixed
//! deadline, merges whatever completed into one [`Snapshot`], feeds the load
//! figures to the frequency controller, and publishes the snapshot to the
//! subscriber over an event channel. Collector failures are tallied and
//! rate-limited by the error policy; a tick where a required collector
//! failed still publishes a degraded snapshot when any required data exists.
//!
//! # State machine
//!
//! `Stopped → Starting → Running ⇄ Suspended → Stopped`
//!
//! Starting brackets collector [`start`](crate::collector::Collector::start)
//! calls and performs one collection pass before the timer loop begins.
//! Suspension (system sleep) skips ticks and delivers `on_suspend`; resume
//! delivers `on_resume`, resets the frequency controller (pre-sleep load
//! samples are stale), and issues one pass after a short settle delay so a
//! mid-wake transient is not sampled. Stop and shutdown are idempotent;
//! shutdown delivers `on_shutdown` in place of `stop`.
//!
//! # Tick discipline
//!
//! Ticks never overlap: a generation counter plus a tick guard serialize
//! them, and a result arriving from an abandoned (timed-out) tick is
//! discarded rather than merged into a later tick. In-flight collector
//! calls are never forcibly cancelled, since they may be inside blocking OS
//! APIs; the scheduler simply stops waiting.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use darwin_sampler::prelude::*;
//!
//! # #[derive(Debug)] struct MyCpuProbe;
//! # #[async_trait::async_trait]
//! # impl Collector for MyCpuProbe {
//! #     fn kind(&self) -> CollectorKind { CollectorKind::Cpu }
//! #     async fn collect(&self) -> darwin_sampler::Result<Sample> {
//! #         Ok(Sample::Cpu(CpuMetrics::new(12.0, 8, 2400.0)))
//! #     }
//! # }
//! # #[derive(Debug)] struct MyMemoryProbe;
//! # #[async_trait::async_trait]
//! # impl Collector for MyMemoryProbe {
//! #     fn kind(&self) -> CollectorKind { CollectorKind::Memory }
//! #     async fn collect(&self) -> darwin_sampler::Result<Sample> {
//! #         Ok(Sample::Memory(MemoryMetrics::new(1, 2, PressureLevel::Normal, 0)))
//! #     }
//! # }
//! #[tokio::main]
//! async fn main() -> darwin_sampler::Result<()> {
//!     let collectors = CollectorSet::new().with(MyCpuProbe).with(MyMemoryProbe);
//!     let cache = Arc::new(Cache::new(TtlPolicy::default()));
//!     let (sampler, mut events) = Sampler::new(SamplerConfig::default(), collectors, cache)?;
//!
//!     sampler.start().await?;
//!     while let Some(event) = events.recv().await {
//!         if let SamplerEvent::Snapshot(snapshot) = event {
//!             println!("cpu {:.1}%", snapshot.cpu.usage);
//!             break;
//!         }
//!     }
//!     sampler.stop().await;
//!     Ok(())
//! }
//! ```


use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use scopeguard::defer;
use serde::Deserialize;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout_at;
use tracing::{debug, warn};

use crate::backoff::{ErrorPolicy, TallySnapshot, Verdict};
use crate::cache::{Cache, CacheStats};
use crate::collector::{CollectorKind, CollectorSet, Sample, StaticFact};
use crate::error::{CollectorError, ErrorKind, Result};
use crate::frequency::{AdjustmentReason, FrequencyController, LoadSample};
use crate::metrics::{Snapshot, SnapshotBuilder};

/// How long `stop` waits for the timer loop to wind down before aborting it.
const LOOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Scheduler tuning knobs. All fields have sensible defaults, so an embedder
/// can deserialize a partial config from its settings file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// User-configured sampling period in seconds, clamped into [1, 10].
    pub base_period_secs: f64,
    /// Fan-in deadline per tick; stragglers past this are abandoned.
    pub collection_deadline: Duration,
    /// Delay before the post-resume collection pass, to avoid sampling
    /// mid-wake transients.
    pub settle_delay: Duration,
    /// User-visible errors forwarded per kind before suppression.
    pub error_forward_cap: u32,
    /// Cool-down after which a suppressed error kind forwards again.
    pub error_cooldown: Duration,
    /// Self-process CPU percentage above which the low-power proxy signal
    /// trips, absent an embedder-supplied hint.
    pub low_power_cpu_threshold: f64,
    /// Capacity of the subscriber event channel.
    pub event_buffer: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            base_period_secs: 2.0,
            collection_deadline: Duration::from_secs(5),
            settle_delay: Duration::from_millis(500),
            error_forward_cap: crate::backoff::DEFAULT_FORWARD_CAP,
            error_cooldown: crate::backoff::DEFAULT_COOLDOWN,
            low_power_cpu_threshold: 15.0,
            event_buffer: 16,
        }
    }
}

/// Lifecycle state of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Stopped,
    Starting,
    Running,
    Suspended,
}

/// Events published to the subscriber.
///
/// The channel is bounded and sends are non-blocking: a subscriber that
/// stops draining loses events rather than stalling the scheduler.
#[derive(Debug, Clone)]
pub enum SamplerEvent {
    /// A publishable (full or degraded) snapshot from a completed tick.
    Snapshot(Arc<Snapshot>),
    /// A collection failure. `user_visible` failures passed the backoff
    /// policy's rate limit; the rest are informational.
    Error { kind: ErrorKind, message: String, user_visible: bool },
}

/// A fan-out task's result, tagged with the tick generation that spawned it.
struct TickOutcome {
    generation: u64,
    kind: CollectorKind,
    result: std::result::Result<Sample, CollectorError>,
}

struct Shared {
    config: SamplerConfig,
    collectors: CollectorSet,
    cache: Arc<Cache<StaticFact>>,
    frequency: Mutex<FrequencyController>,
    policy: Mutex<ErrorPolicy>,
    state: Mutex<SamplerState>,
    /// Kinds participating in fan-out, fixed at start-up.
    active: RwLock<Vec<CollectorKind>>,
    /// Most recently completed tick's snapshot.
    current: RwLock<Option<Arc<Snapshot>>>,
    /// Embedder-supplied low-power signal; the self-usage proxy applies
    /// while unset.
    low_power_hint: Mutex<Option<bool>>,
    generation: AtomicU64,
    /// Tick guard: ticks are serialized, never concurrent.
    ticking: AtomicBool,
    /// Reentry guard for the multi-step resume sequence.
    resuming: AtomicBool,
    /// Wakes the timer loop early on stop or period change.
    wake: Notify,
    events: mpsc::Sender<SamplerEvent>,
    results_tx: mpsc::Sender<TickOutcome>,
    results_rx: tokio::sync::Mutex<mpsc::Receiver<TickOutcome>>,
}

/// The aggregation scheduler. See the module docs for the full contract.
pub struct Sampler {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Sampler {
    /// Builds a sampler and the event stream its subscriber reads.
    ///
    /// CPU and memory collectors must be registered; without them no tick
    /// could ever produce a snapshot.
    pub fn new(
        config: SamplerConfig,
        collectors: CollectorSet,
        cache: Arc<Cache<StaticFact>>,
    ) -> Result<(Self, mpsc::Receiver<SamplerEvent>)> {
        if !collectors.contains(CollectorKind::Cpu) {
            return Err(CollectorError::invalid_data("a CPU collector must be registered"));
        }
        if !collectors.contains(CollectorKind::Memory) {
            return Err(CollectorError::invalid_data("a memory collector must be registered"));
        }

        let (events, events_rx) = mpsc::channel(config.event_buffer.max(1));
        let (results_tx, results_rx) = mpsc::channel(32);
        let frequency = FrequencyController::new(config.base_period_secs);
        let policy = ErrorPolicy::with_limits(config.error_forward_cap, config.error_cooldown);

        let shared = Arc::new(Shared {
            config,
            collectors,
            cache,
            frequency: Mutex::new(frequency),
            policy: Mutex::new(policy),
            state: Mutex::new(SamplerState::Stopped),
            active: RwLock::new(Vec::new()),
            current: RwLock::new(None),
            low_power_hint: Mutex::new(None),
            generation: AtomicU64::new(0),
            ticking: AtomicBool::new(false),
            resuming: AtomicBool::new(false),
            wake: Notify::new(),
            events,
            results_tx,
            results_rx: tokio::sync::Mutex::new(results_rx),
        });

        Ok((Self { shared, task: Mutex::new(None) }, events_rx))
    }

    /// Starts the scheduler: brackets collector start-up, performs one
    /// collection pass, then begins the timer loop. A no-op unless stopped.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            if *state != SamplerState::Stopped {
                return Ok(());
            }
            *state = SamplerState::Starting;
        }

        let active = self.shared.collectors.participants();
        debug!(collectors = ?active, "starting sampler");
        // Published before the hooks run, so a stop racing this start-up
        // delivers `stop` to the right set.
        *self.shared.active.write() = active.clone();
        self.shared.collectors.start_many(&active).await;

        // One synchronous pass so the subscriber has data immediately.
        tick(&self.shared).await;

        {
            let mut state = self.shared.state.lock();
            // A stop that landed during start-up wins; it already delivered
            // `stop` to the collectors, so just decline to spawn the loop.
            if *state != SamplerState::Starting {
                return Ok(());
            }
            *state = SamplerState::Running;
        }
        let shared = Arc::clone(&self.shared);
        *self.task.lock() = Some(tokio::spawn(run_loop(shared)));
        Ok(())
    }

    /// Stops scheduling, waits for the loop to wind down, and delivers
    /// `stop` to every active collector. Idempotent.
    pub async fn stop(&self) {
        if !self.enter_stopped() {
            return;
        }
        self.join_loop().await;
        let active = self.shared.active.read().clone();
        self.shared.collectors.stop_many(&active).await;
    }

    /// Like [`stop`](Sampler::stop), but collectors receive `on_shutdown`
    /// instead of `stop`. Used on an OS power-off signal.
    pub async fn shutdown(&self) {
        if !self.enter_stopped() {
            return;
        }
        self.join_loop().await;
        let active = self.shared.active.read().clone();
        self.shared.collectors.shutdown_many(&active).await;
    }

    /// Suspends ticking (system sleep) and delivers `on_suspend`. A no-op
    /// unless running.
    pub async fn suspend(&self) {
        {
            let mut state = self.shared.state.lock();
            if *state != SamplerState::Running {
                return;
            }
            *state = SamplerState::Suspended;
        }
        debug!("sampler suspended");
        let active = self.shared.active.read().clone();
        self.shared.collectors.suspend_many(&active).await;
    }

    /// Resumes after a suspend: delivers `on_resume`, discards stale
    /// hysteresis state, and performs one collection pass after the settle
    /// delay.
    ///
    /// The state stays `Suspended` until the settle delay has elapsed, so a
    /// timer armed before the suspend cannot sample a mid-wake transient.
    pub async fn resume(&self) {
        if *self.shared.state.lock() != SamplerState::Suspended {
            return;
        }
        if self.shared.resuming.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return;
        }
        defer! {
            self.shared.resuming.store(false, Ordering::Release);
        }

        debug!("sampler resuming");
        let active = self.shared.active.read().clone();
        self.shared.collectors.resume_many(&active).await;

        // Load samples collected before sleep are stale.
        self.shared.frequency.lock().reset_to_base();

        tokio::time::sleep(self.shared.config.settle_delay).await;
        {
            let mut state = self.shared.state.lock();
            // A stop that landed during the settle window wins.
            if *state != SamplerState::Suspended {
                return;
            }
            *state = SamplerState::Running;
        }
        tick(&self.shared).await;
        // Re-arm the timer so the first scheduled tick is a full period
        // after the settle pass.
        self.shared.wake.notify_one();
    }

    /// Changes the base sampling period, clamped into [1, 10] seconds.
    /// Applies immediately, bypassing hysteresis.
    pub fn set_base_period(&self, secs: f64) {
        if self.shared.frequency.lock().set_base_period(secs).is_some() {
            self.shared.wake.notify_one();
        }
    }

    /// Supplies the real power-state signal. Once set, it replaces the
    /// self-usage proxy heuristic.
    pub fn set_low_power(&self, low_power: bool) {
        *self.shared.low_power_hint.lock() = Some(low_power);
    }

    pub fn state(&self) -> SamplerState {
        *self.shared.state.lock()
    }

    /// The period the timer loop is currently running at.
    pub fn current_period(&self) -> Duration {
        self.shared.frequency.lock().current_period()
    }

    /// Why the frequency controller last changed the period.
    pub fn adjustment_reason(&self) -> AdjustmentReason {
        self.shared.frequency.lock().adjustment_reason()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.shared.cache.stats()
    }

    pub fn error_tally(&self) -> Vec<TallySnapshot> {
        self.shared.policy.lock().snapshot()
    }

    /// The most recently completed tick's snapshot, if any tick has
    /// succeeded this run.
    pub fn current_snapshot(&self) -> Option<Arc<Snapshot>> {
        self.shared.current.read().clone()
    }

    /// Transitions to `Stopped` and wakes the loop. Returns false when
    /// already stopped.
    fn enter_stopped(&self) -> bool {
        {
            let mut state = self.shared.state.lock();
            if *state == SamplerState::Stopped {
                return false;
            }
            *state = SamplerState::Stopped;
        }
        self.shared.wake.notify_one();
        true
    }

    async fn join_loop(&self) {
        let handle = self.task.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(LOOP_JOIN_TIMEOUT, &mut handle).await.is_err() {
                warn!("timer loop did not stop in time; aborting it");
                handle.abort();
            }
        }
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

/// The timer loop. Re-reads the period from the frequency controller on
/// every iteration, so a committed period change is equivalent to
/// cancelling and recreating the timer; there is never more than one.
async fn run_loop(shared: Arc<Shared>) {
    loop {
        let period = shared.frequency.lock().current_period();
        tokio::select! {
            _ = tokio::time::sleep(period) => {
                if *shared.state.lock() == SamplerState::Stopped {
                    break;
                }
                tick(&shared).await;
            },
            _ = shared.wake.notified() => {
                // Period changed or a stop was requested; re-arm the timer.
                if *shared.state.lock() == SamplerState::Stopped {
                    break;
                }
            },
        }
    }
}

/// One collection pass: fan out, join under the deadline, merge, publish.
async fn tick(shared: &Arc<Shared>) {
    {
        let state = *shared.state.lock();
        // Starting covers the initial and post-resume passes; a tick racing
        // a suspend or stop request is skipped here.
        if !matches!(state, SamplerState::Running | SamplerState::Starting) {
            return;
        }
    }
    if shared.ticking.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
        debug!("previous tick still in flight; skipping");
        return;
    }
    defer! {
        shared.ticking.store(false, Ordering::Release);
    }

    let generation = shared.generation.fetch_add(1, Ordering::Relaxed) + 1;
    let active = shared.active.read().clone();

    let mut results_rx = shared.results_rx.lock().await;
    // Drain stragglers from abandoned ticks before fanning out.
    while let Ok(outcome) = results_rx.try_recv() {
        debug!(collector = %outcome.kind, "discarding result from an abandoned tick");
    }

    let mut expected = 0usize;
    for kind in &active {
        let Some(collector) = shared.collectors.get(*kind) else { continue };
        expected += 1;
        let collector = Arc::clone(collector);
        let results_tx = shared.results_tx.clone();
        let kind = *kind;
        tokio::spawn(async move {
            let result = collector.collect().await;
            let _ = results_tx.try_send(TickOutcome { generation, kind, result });
        });
    }

    let deadline = tokio::time::Instant::now() + shared.config.collection_deadline;
    let mut results: HashMap<CollectorKind, std::result::Result<Sample, CollectorError>> =
        HashMap::with_capacity(expected);
    while results.len() < expected {
        match timeout_at(deadline, results_rx.recv()).await {
            Ok(Some(outcome)) if outcome.generation == generation => {
                results.insert(outcome.kind, outcome.result);
            },
            Ok(Some(outcome)) => {
                debug!(collector = %outcome.kind, "discarding result from an abandoned tick");
            },
            Ok(None) => break,
            Err(_) => {
                // Deadline elapsed; in-flight collectors are abandoned, not
                // killed, and whatever completed is still used.
                let missing: Vec<CollectorKind> =
                    active.iter().copied().filter(|kind| !results.contains_key(kind)).collect();
                record_failure(
                    shared,
                    &CollectorError::timeout(format!(
                        "{} collector(s) missed the {:?} deadline: {missing:?}",
                        missing.len(),
                        shared.config.collection_deadline,
                    )),
                );
                break;
            },
        }
    }
    drop(results_rx);

    let mut builder = SnapshotBuilder::new();
    for (kind, result) in results {
        match result {
            Ok(sample) if sample.kind() == kind => match sample {
                Sample::Cpu(cpu) => builder.cpu(cpu),
                Sample::Memory(memory) => builder.memory(memory),
                Sample::Gpu(gpu) => builder.gpu(gpu),
                Sample::Disks(disks) => builder.disks(disks),
                Sample::Temperature(temperature) => builder.temperature(temperature),
                Sample::Network(network) => builder.network(network),
                Sample::SelfUsage(self_usage) => builder.self_usage(self_usage),
            },
            Ok(sample) => {
                record_failure(
                    shared,
                    &CollectorError::invalid_data(format!(
                        "{kind} collector produced a {} sample",
                        sample.kind()
                    )),
                );
            },
            Err(error) => {
                debug!(collector = %kind, %error, "collector failed");
                record_failure(shared, &error);
            },
        }
    }

    if !builder.has_cpu() || !builder.has_memory() {
        record_failure(shared, &CollectorError::DataUnavailable);
    }

    match builder.finish() {
        Some(snapshot) => publish(shared, snapshot),
        None => debug!("tick produced no publishable snapshot; keeping the previous one"),
    }
}

/// Step 7 and 8 of the tick: controller feedback, store, emit.
fn publish(shared: &Arc<Shared>, snapshot: Snapshot) {
    let proxy = snapshot
        .self_usage
        .as_ref()
        .map(|self_usage| self_usage.cpu_usage > shared.config.low_power_cpu_threshold)
        .unwrap_or(false);
    let low_power = (*shared.low_power_hint.lock()).unwrap_or(proxy);

    let changed = shared.frequency.lock().observe(LoadSample {
        cpu_usage: snapshot.cpu.usage,
        memory_usage: snapshot.memory.usage_percentage(),
        low_power,
    });

    let snapshot = Arc::new(snapshot);
    *shared.current.write() = Some(Arc::clone(&snapshot));
    if shared.events.try_send(SamplerEvent::Snapshot(snapshot)).is_err() {
        warn!("subscriber is not keeping up; dropping snapshot event");
    }

    if changed.is_some() {
        // Re-arm the timer at the new period.
        shared.wake.notify_one();
    }
}

/// Runs one failure through the backoff policy and dispatches accordingly.
fn record_failure(shared: &Arc<Shared>, error: &CollectorError) {
    let verdict = shared.policy.lock().record(error);
    let event = match verdict {
        Verdict::Forward => {
            Some(SamplerEvent::Error { kind: error.kind(), message: error.user_message(), user_visible: true })
        },
        Verdict::LogOnly => {
            warn!(kind = %error.kind(), %error, "collection failure");
            Some(SamplerEvent::Error { kind: error.kind(), message: error.user_message(), user_visible: false })
        },
        Verdict::Suppressed => {
            debug!(kind = %error.kind(), "user-visible failure suppressed");
            None
        },
    };
    if let Some(event) = event {
        if shared.events.try_send(event).is_err() {
            warn!("subscriber is not keeping up; dropping error event");
        }
    }
}
