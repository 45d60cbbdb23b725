//! The two named timers wrapping each participant read (spec §5, §6).

use std::time::Duration;

/// One of the two named timers wrapping a single participant read
/// (spec §6: "duration of leader-retrieval"). Kept as a thin wrapper
/// rather than bare `metrics::histogram!` call sites so the two names
/// can never drift apart.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsHandle;

const LEGACY_TIMER: &str = "current-leader-host-port";
const CURRENT_TIMER: &str = "debug.current-leader.retrieval.duration";

impl MetricsHandle {
    pub fn record_retrieval(&self, elapsed: Duration) {
        metrics::histogram!(LEGACY_TIMER).record(elapsed.as_secs_f64());
        metrics::histogram!(CURRENT_TIMER).record(elapsed.as_secs_f64());
    }
}
