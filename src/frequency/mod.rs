//! Hysteresis-based sampling-frequency controller.
//!
//! Maps recent load samples (CPU%, memory%, low-power flag) to a sampling
//! period within [1 s, 10 s]. The controller debounces noisy load readings:
//! it only flips its high-load state after three consecutive samples in the
//! same direction, so a single spiky tick never changes the period. The
//! low-power flag is edge-triggered and bypasses the counters, since a
//! power-state change is a deliberate signal rather than noise.
//!
//! The committed period is
//! `clamp(base × (low_power ? 2 : 1) × (high_load ? 0.5 : 1), 1 s, 10 s)`;
//! the factors compose. A recalculated period is committed only when it
//! moves the current period by more than 0.1 s, which keeps float jitter
//! from churning the scheduler's timer.

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

/// Lower bound on the sampling period, in seconds.
pub const MIN_PERIOD_SECS: f64 = 1.0;
/// Upper bound on the sampling period, in seconds.
pub const MAX_PERIOD_SECS: f64 = 10.0;

const HIGH_CPU_THRESHOLD: f64 = 70.0;
const HIGH_MEMORY_THRESHOLD: f64 = 80.0;
const HYSTERESIS_SAMPLES: u32 = 3;
const COMMIT_THRESHOLD_SECS: f64 = 0.1;
const LOW_POWER_FACTOR: f64 = 2.0;
const HIGH_LOAD_FACTOR: f64 = 0.5;

fn clamp_period(secs: f64) -> f64 {
    if secs.is_finite() {
        secs.clamp(MIN_PERIOD_SECS, MAX_PERIOD_SECS)
    } else {
        MIN_PERIOD_SECS
    }
}

/// Load figures from one published snapshot.
#[derive(Debug, Clone, Copy)]
pub struct LoadSample {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub low_power: bool,
}

/// Why the controller last committed a period change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AdjustmentReason {
    /// No change has been committed since construction.
    Initial,
    /// Three consecutive high-load samples raised the sampling rate.
    HighLoad,
    /// Three consecutive low-load samples restored the base rate.
    LoadSettled,
    /// The low-power flag toggled.
    PowerStateChanged,
    /// The user changed the base period.
    BasePeriodChanged,
    /// State was reset after a sleep/wake cycle.
    Reset,
}

/// Control loop over the frequency state. Mutated only by the scheduler's
/// sequential post-tick phase; no internal locking needed.
#[derive(Debug)]
pub struct FrequencyController {
    base_secs: f64,
    current_secs: f64,
    high_streak: u32,
    low_streak: u32,
    high_load: bool,
    low_power: bool,
    reason: AdjustmentReason,
}

impl FrequencyController {
    /// Controller starting at `base_secs`, clamped into [1, 10] seconds.
    pub fn new(base_secs: f64) -> Self {
        let base = clamp_period(base_secs);
        Self {
            base_secs: base,
            current_secs: base,
            high_streak: 0,
            low_streak: 0,
            high_load: false,
            low_power: false,
            reason: AdjustmentReason::Initial,
        }
    }

    /// The period the scheduler should currently run at.
    pub fn current_period(&self) -> Duration {
        Duration::from_secs_f64(self.current_secs)
    }

    /// The user-configured base period.
    pub fn base_period(&self) -> Duration {
        Duration::from_secs_f64(self.base_secs)
    }

    pub fn adjustment_reason(&self) -> AdjustmentReason {
        self.reason
    }

    pub fn is_high_load(&self) -> bool {
        self.high_load
    }

    pub fn is_low_power(&self) -> bool {
        self.low_power
    }

    /// Feeds one load sample into the hysteresis loop. Returns the new
    /// period when a change was committed.
    pub fn observe(&mut self, sample: LoadSample) -> Option<Duration> {
        let high = sample.cpu_usage > HIGH_CPU_THRESHOLD || sample.memory_usage > HIGH_MEMORY_THRESHOLD;
        if high {
            self.high_streak += 1;
            self.low_streak = 0;
        } else {
            self.low_streak += 1;
            self.high_streak = 0;
        }

        let mut reason = None;
        if !self.high_load && self.high_streak >= HYSTERESIS_SAMPLES {
            self.high_load = true;
            reason = Some(AdjustmentReason::HighLoad);
        } else if self.high_load && self.low_streak >= HYSTERESIS_SAMPLES {
            self.high_load = false;
            reason = Some(AdjustmentReason::LoadSettled);
        }
        if sample.low_power != self.low_power {
            self.low_power = sample.low_power;
            reason = Some(AdjustmentReason::PowerStateChanged);
        }

        self.recalculate(reason?)
    }

    /// Stores a new base period, clamped into [1, 10] seconds, and
    /// recalculates immediately regardless of hysteresis state.
    pub fn set_base_period(&mut self, secs: f64) -> Option<Duration> {
        self.base_secs = clamp_period(secs);
        self.recalculate(AdjustmentReason::BasePeriodChanged)
    }

    /// Clears the hysteresis counters and the high-load flag, then
    /// recalculates. Used after a sleep/wake cycle, when load samples
    /// collected before sleep are stale.
    pub fn reset_to_base(&mut self) -> Option<Duration> {
        self.high_streak = 0;
        self.low_streak = 0;
        self.high_load = false;
        self.recalculate(AdjustmentReason::Reset)
    }

    fn recalculate(&mut self, reason: AdjustmentReason) -> Option<Duration> {
        let power_factor = if self.low_power { LOW_POWER_FACTOR } else { 1.0 };
        let load_factor = if self.high_load { HIGH_LOAD_FACTOR } else { 1.0 };
        let target = clamp_period(self.base_secs * power_factor * load_factor);

        if (target - self.current_secs).abs() > COMMIT_THRESHOLD_SECS {
            debug!(from = self.current_secs, to = target, reason = ?reason, "sampling period changed");
            self.current_secs = target;
            self.reason = reason;
            Some(self.current_period())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn high() -> LoadSample {
        LoadSample { cpu_usage: 95.0, memory_usage: 40.0, low_power: false }
    }

    fn low() -> LoadSample {
        LoadSample { cpu_usage: 10.0, memory_usage: 30.0, low_power: false }
    }

    fn secs(period: Option<Duration>) -> f64 {
        period.expect("a change should have been committed").as_secs_f64()
    }

    #[test]
    fn two_high_samples_and_one_low_do_not_change_period() {
        let mut controller = FrequencyController::new(2.0);
        assert!(controller.observe(high()).is_none());
        assert!(controller.observe(high()).is_none());
        assert!(controller.observe(low()).is_none());
        assert_eq!(controller.current_period(), Duration::from_secs(2));
    }

    #[test]
    fn three_consecutive_high_samples_halve_the_period() {
        let mut controller = FrequencyController::new(2.0);
        assert!(controller.observe(high()).is_none());
        assert!(controller.observe(high()).is_none());
        assert_eq!(secs(controller.observe(high())), 1.0);
        assert_eq!(controller.adjustment_reason(), AdjustmentReason::HighLoad);
    }

    #[test]
    fn three_low_samples_restore_base_after_high_load() {
        let mut controller = FrequencyController::new(4.0);
        for _ in 0..3 {
            controller.observe(high());
        }
        assert_eq!(controller.current_period(), Duration::from_secs(2));

        assert!(controller.observe(low()).is_none());
        assert!(controller.observe(low()).is_none());
        assert_eq!(secs(controller.observe(low())), 4.0);
        assert_eq!(controller.adjustment_reason(), AdjustmentReason::LoadSettled);
    }

    #[test]
    fn high_memory_alone_counts_as_high_load() {
        let mut controller = FrequencyController::new(2.0);
        let sample = LoadSample { cpu_usage: 5.0, memory_usage: 85.0, low_power: false };
        controller.observe(sample);
        controller.observe(sample);
        assert_eq!(secs(controller.observe(sample)), 1.0);
    }

    #[test]
    fn low_power_toggle_is_edge_triggered() {
        let mut controller = FrequencyController::new(3.0);
        let sample = LoadSample { cpu_usage: 10.0, memory_usage: 30.0, low_power: true };
        // First low-power sample triggers immediately, no streak needed.
        assert_eq!(secs(controller.observe(sample)), 6.0);
        assert_eq!(controller.adjustment_reason(), AdjustmentReason::PowerStateChanged);
        // Holding the flag does not re-trigger.
        assert!(controller.observe(sample).is_none());
    }

    #[test]
    fn factors_compose_under_clamping() {
        let mut controller = FrequencyController::new(4.0);
        let sample = LoadSample { cpu_usage: 95.0, memory_usage: 90.0, low_power: true };
        // low_power edge commits 8.0 on the first sample, then the third
        // high-load sample brings in the 0.5 factor: 4 * 2 * 0.5 = 4.
        assert_eq!(secs(controller.observe(sample)), 8.0);
        controller.observe(sample);
        assert_eq!(secs(controller.observe(sample)), 4.0);
    }

    #[test]
    fn set_base_period_clamps_and_applies_immediately() {
        let mut controller = FrequencyController::new(2.0);
        assert_eq!(secs(controller.set_base_period(0.25)), 1.0);
        assert_eq!(secs(controller.set_base_period(99.0)), 10.0);
        assert_eq!(secs(controller.set_base_period(3.5)), 3.5);
        assert_eq!(controller.adjustment_reason(), AdjustmentReason::BasePeriodChanged);
    }

    #[test]
    fn period_stays_within_bounds_for_arbitrary_input() {
        let mut controller = FrequencyController::new(f64::NAN);
        for base in [-5.0, 0.0, 0.9, 1.0, 5.5, 10.0, 10.1, 1e9, f64::INFINITY, f64::NAN] {
            controller.set_base_period(base);
            let secs = controller.current_period().as_secs_f64();
            assert!((MIN_PERIOD_SECS..=MAX_PERIOD_SECS).contains(&secs), "period {secs} out of bounds");
        }
    }

    #[test]
    fn sub_threshold_recalculation_is_not_committed() {
        let mut controller = FrequencyController::new(1.0);
        // 1.0 * 0.5 clamps back to 1.0; no observable change.
        for _ in 0..5 {
            assert!(controller.observe(high()).is_none());
        }
        assert_eq!(controller.current_period(), Duration::from_secs(1));
        assert_eq!(controller.adjustment_reason(), AdjustmentReason::Initial);
    }

    #[test]
    fn reset_clears_high_load_state() {
        let mut controller = FrequencyController::new(2.0);
        for _ in 0..3 {
            controller.observe(high());
        }
        assert!(controller.is_high_load());

        assert_eq!(secs(controller.reset_to_base()), 2.0);
        assert!(!controller.is_high_load());
        assert_eq!(controller.adjustment_reason(), AdjustmentReason::Reset);

        // After a reset the debounce starts over.
        assert!(controller.observe(high()).is_none());
        assert!(controller.observe(high()).is_none());
        assert_eq!(secs(controller.observe(high())), 1.0);
    }
}
