use std::time::{Duration, Instant};

use crate::{block::TipHash, client::ClientError};

/// Default time a search may run before the tip is re-checked.
pub const DEFAULT_STALE_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Result of comparing the live tip against the one a search started on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TipCheck {
    Unchanged,
    Changed(TipHash),
    /// The tip could not be fetched; the search keeps going.
    Unknown(ClientError),
}

impl TipCheck {
    pub fn is_stale(&self) -> bool {
        matches!(self, TipCheck::Changed(_))
    }
}

/// Timer-gated check for a chain tip that moved while a search was running.
///
/// Every evaluation, whatever its result, opens a fresh window of
/// `threshold`, so a failing endpoint is polled at most once per window.
#[derive(Debug, Clone)]
pub struct StalenessMonitor {
    threshold: Duration,
    window_start: Instant,
}

impl StalenessMonitor {
    pub fn new(threshold: Duration, now: Instant) -> Self {
        StalenessMonitor {
            threshold,
            window_start: now,
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) > self.threshold
    }

    pub fn evaluate(
        &mut self,
        started_on: &TipHash,
        latest: Result<TipHash, ClientError>,
        now: Instant,
    ) -> TipCheck {
        self.window_start = now;
        match latest {
            Ok(tip) if &tip == started_on => TipCheck::Unchanged,
            Ok(tip) => TipCheck::Changed(tip),
            Err(err) => TipCheck::Unknown(err),
        }
    }
}
