//! Error counting and user-facing rate limiting.
//!
//! Every collection failure is tallied by [`ErrorKind`]. Kinds marked
//! user-visible (by default only permission failures) are forwarded to the
//! subscriber's error channel until a cap is reached; past the cap they are
//! suppressed to avoid alert storms, and the tally resets automatically
//! after a cool-down measured from the moment the cap was hit. Log-only
//! kinds always reach the log sink and are never suppressed there.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::error::{CollectorError, ErrorKind};

/// User-visible events forwarded per kind before suppression kicks in.
pub const DEFAULT_FORWARD_CAP: u32 = 10;
/// Cool-down after which a suppressed kind starts forwarding again.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(300);

/// What to do with one recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Forward to the subscriber's error channel as user-visible.
    Forward,
    /// Record to the log sink only.
    LogOnly,
    /// User-visible kind past its cap; drop the notification.
    Suppressed,
}

#[derive(Debug, Default)]
struct Tally {
    count: u32,
    suppressed_until: Option<Instant>,
}

/// Read-only view of one kind's tally, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TallySnapshot {
    pub kind: ErrorKind,
    pub count: u32,
    pub suppressed: bool,
}

/// Per-kind failure counters with forwarding caps.
///
/// Owned and mutated only by the scheduler's sequential post-tick logic.
#[derive(Debug)]
pub struct ErrorPolicy {
    tallies: HashMap<ErrorKind, Tally>,
    visibility_overrides: HashMap<ErrorKind, bool>,
    forward_cap: u32,
    cooldown: Duration,
}

impl ErrorPolicy {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_FORWARD_CAP, DEFAULT_COOLDOWN)
    }

    pub fn with_limits(forward_cap: u32, cooldown: Duration) -> Self {
        Self { tallies: HashMap::new(), visibility_overrides: HashMap::new(), forward_cap, cooldown }
    }

    /// Overrides the static visibility table for one kind.
    pub fn set_user_visible(&mut self, kind: ErrorKind, visible: bool) {
        self.visibility_overrides.insert(kind, visible);
    }

    pub fn is_user_visible(&self, kind: ErrorKind) -> bool {
        self.visibility_overrides.get(&kind).copied().unwrap_or_else(|| kind.is_user_visible())
    }

    /// Tallies one failure and decides its disposition.
    pub fn record(&mut self, error: &CollectorError) -> Verdict {
        let kind = error.kind();
        let user_visible = self.is_user_visible(kind);
        let tally = self.tallies.entry(kind).or_default();

        // Cool-down elapsed: the kind starts over.
        if let Some(until) = tally.suppressed_until {
            if Instant::now() >= until {
                tally.count = 0;
                tally.suppressed_until = None;
            }
        }

        tally.count = tally.count.saturating_add(1);

        if !user_visible {
            return Verdict::LogOnly;
        }
        if tally.suppressed_until.is_some() {
            return Verdict::Suppressed;
        }
        if tally.count > self.forward_cap {
            tally.suppressed_until = Some(Instant::now() + self.cooldown);
            debug!(%kind, cap = self.forward_cap, "suppressing user-visible failures for this kind");
            Verdict::Suppressed
        } else {
            Verdict::Forward
        }
    }

    /// Clears every tally and suppression window.
    pub fn reset(&mut self) {
        self.tallies.clear();
    }

    /// Current tallies, for diagnostics.
    pub fn snapshot(&self) -> Vec<TallySnapshot> {
        let now = Instant::now();
        let mut entries: Vec<TallySnapshot> = self
            .tallies
            .iter()
            .map(|(kind, tally)| TallySnapshot {
                kind: *kind,
                count: tally.count,
                suppressed: tally.suppressed_until.map(|until| now < until).unwrap_or(false),
            })
            .collect();
        entries.sort_by_key(|entry| format!("{}", entry.kind));
        entries
    }
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self::new()
    }
}
