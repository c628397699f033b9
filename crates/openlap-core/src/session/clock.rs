//! Device clock reconciliation
//!
//! The Control Unit timestamps crossings with a 32-bit millisecond counter
//! that restarts on a timer reset or power cycle and eventually wraps. The
//! reconciler maps raw timestamps onto a synthetic timeline that never runs
//! backwards: when the raw time drops, the wall-clock time passed since the
//! previous tick is used to bridge the gap.

use tracing::debug;

/// Keeps one timer stream monotonic
#[derive(Debug, Clone, Default)]
pub struct ClockReconciler {
    /// Raw time and wall-clock time of the previous tick
    previous: Option<(u32, u64)>,
    /// Added to every raw time
    offset: u64,
}

impl ClockReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a raw device time to the synthetic timeline.
    ///
    /// `now_ms` is a monotonic wall-clock reading in milliseconds.
    pub fn reconcile(&mut self, time: u32, now_ms: u64) -> u64 {
        if let Some((prev, then)) = self.previous {
            if time < prev {
                let elapsed = now_ms.saturating_sub(then);
                // continue from the previous adjusted time
                self.offset = u64::from(prev) + self.offset + elapsed - u64::from(time);
                debug!(
                    previous = prev,
                    time,
                    offset = self.offset,
                    "Device clock went backwards"
                );
            }
        }
        self.previous = Some((time, now_ms));
        u64::from(time) + self.offset
    }

    /// Current offset applied to raw times
    pub fn offset(&self) -> u64 {
        self.offset
    }
}
