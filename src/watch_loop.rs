//! Re-arm-then-read watch/poll loop (spec §4.3).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{ElectionError, StoreError};
use crate::latch::LeaderLatch;
use crate::metrics::MetricsHandle;
use crate::state::LeadershipState;
use crate::stream::Emitter;

/// Fixed, non-configurable startup-race retry policy (spec §9: "this is
/// a fixed policy, not configurable").
const STARTUP_RETRY_ATTEMPTS: u32 = 100;
const STARTUP_RETRY_STEP: Duration = Duration::from_millis(10);

/// Runs until cancelled or until a fatal condition fails the stream.
/// One iteration: re-arm the watch and read participants in a single
/// store call, derive a state, offer it, then suspend until the watch
/// fires. Every terminal failure (startup retries exhausted, a
/// non-recoverable read error, a duplicate identity, or a failed watch)
/// invokes `on_terminal_failure` after failing the stream, so the caller
/// can schedule `cancel()` and release the membership node on every exit
/// path, not just the caller-initiated one (spec §4.5).
pub(crate) async fn run_watch_loop(
    latch: Arc<LeaderLatch>,
    candidate_id: String,
    emitter: Arc<Emitter>,
    cancelled: Arc<AtomicBool>,
    metrics: MetricsHandle,
    on_terminal_failure: Arc<dyn Fn() + Send + Sync>,
) {
    let mut startup_attempt: u32 = 0;

    loop {
        if cancelled.load(Ordering::Acquire) {
            return;
        }

        let started_at = Instant::now();
        let read = latch.get_participants().await;
        metrics.record_retrieval(started_at.elapsed());

        let (participants, watch) = match read {
            Ok(pair) => pair,
            Err(StoreError::NoNode(_)) => {
                startup_attempt += 1;
                if startup_attempt > STARTUP_RETRY_ATTEMPTS {
                    emitter.fail(ElectionError::StartupRetriesExhausted(STARTUP_RETRY_ATTEMPTS)).await;
                    on_terminal_failure();
                    return;
                }
                tokio::time::sleep(STARTUP_RETRY_STEP * startup_attempt).await;
                continue;
            }
            Err(err) => {
                emitter.fail(ElectionError::ParticipantRead(err)).await;
                on_terminal_failure();
                return;
            }
        };
        startup_attempt = 0;

        let matches: Vec<_> = participants.iter().filter(|p| p.id == candidate_id).collect();
        match matches.len() {
            0 => {}
            1 => {
                let our = matches[0];
                let state = if our.is_leader {
                    LeadershipState::ElectedAsLeader
                } else {
                    let leader_id = participants.iter().find(|p| p.is_leader).map(|p| p.id.clone());
                    LeadershipState::standby(leader_id)
                };
                emitter.offer(state).await;
            }
            count => {
                emitter.fail(ElectionError::DuplicateIdentity(candidate_id.clone(), count)).await;
                on_terminal_failure();
                return;
            }
        }

        if cancelled.load(Ordering::Acquire) {
            return;
        }
        if let Err(err) = watch.fired().await {
            emitter.fail(ElectionError::ParticipantRead(err)).await;
            on_terminal_failure();
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use futures::StreamExt;

    use super::*;
    use crate::config::ElectionConfig;
    use crate::store::fake::FakeStore;
    use crate::stream::channel;

    async fn make_latch(store: Arc<FakeStore>, candidate_id: &str) -> Arc<LeaderLatch> {
        let config =
            ElectionConfig { candidate_id: candidate_id.to_string(), election_path: "/omni/election".to_string() };
        let latch = Arc::new(LeaderLatch::new(store, &config, vec![]));
        latch.start().await.unwrap();
        latch
    }

    #[tokio::test]
    async fn solo_candidate_is_elected() {
        let store = FakeStore::new();
        let latch = make_latch(store, "A:1").await;
        let (emitter, mut stream) = channel();
        let emitter = Arc::new(emitter);
        let cancelled = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_watch_loop(
            latch.clone(),
            "A:1".to_string(),
            emitter.clone(),
            cancelled.clone(),
            MetricsHandle,
            no_op_callback(),
        ));

        assert_eq!(stream.next().await.unwrap().unwrap(), LeadershipState::ElectedAsLeader);

        cancelled.store(true, Ordering::Release);
        latch.close().await;
        emitter.complete_normally().await;
        assert_eq!(stream.next().await.unwrap().unwrap(), LeadershipState::standby(None));
    }

    #[tokio::test]
    async fn duplicate_identity_fails_the_stream() {
        let store = FakeStore::new();
        store.seed_child("/omni/election-curator", "A:1").await;
        let latch = make_latch(store, "A:1").await;
        let (emitter, mut stream) = channel();
        let emitter = Arc::new(emitter);
        let cancelled = Arc::new(AtomicBool::new(false));

        run_watch_loop(latch, "A:1".to_string(), emitter, cancelled, MetricsHandle, no_op_callback()).await;

        assert!(stream.next().await.unwrap().is_err());
    }

    #[tokio::test]
    async fn duplicate_identity_invokes_terminal_failure_callback() {
        let store = FakeStore::new();
        store.seed_child("/omni/election-curator", "A:1").await;
        let latch = make_latch(store, "A:1").await;
        let (emitter, mut stream) = channel();
        let emitter = Arc::new(emitter);
        let cancelled = Arc::new(AtomicBool::new(false));
        let invoked = Arc::new(AtomicBool::new(false));
        let invoked_flag = invoked.clone();
        let callback: Arc<dyn Fn() + Send + Sync> = Arc::new(move || invoked_flag.store(true, Ordering::Release));

        run_watch_loop(latch, "A:1".to_string(), emitter, cancelled, MetricsHandle, callback).await;

        assert!(stream.next().await.unwrap().is_err());
        assert!(invoked.load(Ordering::Acquire));
    }

    fn no_op_callback() -> Arc<dyn Fn() + Send + Sync> {
        Arc::new(|| {})
    }

    #[tokio::test]
    async fn startup_race_retries_until_path_exists() {
        let store = FakeStore::new();
        store.inject_no_node("/omni/election-curator", 3).await;
        let config = ElectionConfig { candidate_id: "A:1".to_string(), election_path: "/omni/election".to_string() };
        let latch = Arc::new(LeaderLatch::new(store, &config, vec![]));
        // Don't call start() yet: exercise the race directly against the fault.
        let (emitter, mut stream) = channel();
        let emitter = Arc::new(emitter);
        let cancelled = Arc::new(AtomicBool::new(false));

        let handle = tokio::spawn(run_watch_loop(
            latch.clone(),
            "A:1".to_string(),
            emitter,
            cancelled.clone(),
            MetricsHandle,
            no_op_callback(),
        ));
        latch.start().await.unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), LeadershipState::ElectedAsLeader);
        cancelled.store(true, Ordering::Release);
        let _ = handle.await;
    }
}
