//! Binds stream start/cancel to the subscriber's handle and to the
//! shared store client's pre-close hook (spec §4.5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;

use crate::config::{AclEntry, ElectionConfig};
use crate::error::ElectionError;
use crate::latch::LeaderLatch;
use crate::metrics::MetricsHandle;
use crate::store::{CoordinationStore, HookToken};
use crate::stream::{self, Emitter, LeadershipEventStream};
use crate::watch_loop::run_watch_loop;

/// Handle the subscriber uses to abdicate. Cloning it is cheap; every
/// clone drives the same underlying cancellation.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<LifecycleController>,
}

impl CancelHandle {
    /// Idempotent: safe to call any number of times, concurrently.
    pub async fn cancel(&self) {
        self.inner.cancel().await;
    }
}

pub(crate) struct LifecycleController {
    store: Arc<dyn CoordinationStore>,
    latch: Arc<LeaderLatch>,
    emitter: Arc<Emitter>,
    cancelled: Arc<AtomicBool>,
    hook_token: AsyncMutex<Option<HookToken>>,
    cancel_once: AsyncMutex<bool>,
}

impl LifecycleController {
    /// Wires a latch, the watch/poll loop and the event stream together
    /// for one election instance, registers the pre-close hook, starts
    /// the latch, and launches the first loop iteration. On failure the
    /// stream is failed with the error rather than returned as `Err`,
    /// since a partially-started election still needs a stream for its
    /// subscriber to observe the failure on. Stream completion for any
    /// reason — connect timeout, latch start failure, or a terminal
    /// failure from the watch loop — schedules `cancel()`, so the
    /// membership node is released on every exit path, not just the
    /// subscriber-initiated one.
    pub async fn start(
        store: Arc<dyn CoordinationStore>,
        election: &ElectionConfig,
        acl: Vec<AclEntry>,
        connection_timeout: Duration,
        metrics: MetricsHandle,
    ) -> (CancelHandle, LeadershipEventStream) {
        let latch = Arc::new(LeaderLatch::new(store.clone(), election, acl));
        let (emitter, event_stream) = stream::channel();
        let emitter = Arc::new(emitter);
        let cancelled = Arc::new(AtomicBool::new(false));

        let controller = Arc::new(Self {
            store: store.clone(),
            latch: latch.clone(),
            emitter: emitter.clone(),
            cancelled: cancelled.clone(),
            hook_token: AsyncMutex::new(None),
            cancel_once: AsyncMutex::new(false),
        });

        let hook_controller = controller.clone();
        let token = store.register_pre_close_hook(Box::new(move || {
            let hook_controller = hook_controller.clone();
            tokio::spawn(async move {
                hook_controller.cancel().await;
            });
        }));
        *controller.hook_token.lock().await = Some(token);

        let watchdog_emitter = emitter.clone();
        let watchdog_controller = controller.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = watchdog_emitter.wait_for_first_emission() => {}
                _ = tokio::time::sleep(connection_timeout) => {
                    watchdog_emitter.fail(ElectionError::InitialConnectTimeout(connection_timeout)).await;
                    watchdog_controller.cancel().await;
                }
            }
        });

        if let Err(err) = latch.start().await {
            emitter.fail(ElectionError::LatchStart(err)).await;
            let failed_start_controller = controller.clone();
            tokio::spawn(async move { failed_start_controller.cancel().await });
            return (CancelHandle { inner: controller }, event_stream);
        }

        let loop_controller = controller.clone();
        let on_terminal_failure: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
            let loop_controller = loop_controller.clone();
            tokio::spawn(async move { loop_controller.cancel().await });
        });

        let candidate_id = election.candidate_id.clone();
        tokio::spawn(run_watch_loop(latch, candidate_id, emitter, cancelled, metrics, on_terminal_failure));

        (CancelHandle { inner: controller }, event_stream)
    }

    /// Deregister the pre-close hook, set the cancelled flag, close the
    /// latch, and complete the stream. Completes the latch close before
    /// returning so a subsequent store-session close may assume the
    /// ephemeral is gone.
    async fn cancel(&self) {
        let mut done = self.cancel_once.lock().await;
        if *done {
            return;
        }
        *done = true;
        drop(done);

        if let Some(token) = self.hook_token.lock().await.take() {
            self.store.deregister_pre_close_hook(token);
        }
        self.cancelled.store(true, Ordering::Release);
        self.latch.close().await;
        self.emitter.complete_normally().await;
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::state::LeadershipState;
    use crate::store::fake::FakeStore;

    #[tokio::test]
    async fn solo_candidate_sees_elected_then_standby_none_on_cancel() {
        let store = FakeStore::new();
        let election = ElectionConfig { candidate_id: "A:1".to_string(), election_path: "/omni/election".to_string() };
        let (cancel, mut stream) =
            LifecycleController::start(store, &election, vec![], Duration::from_secs(5), MetricsHandle).await;

        assert_eq!(stream.next().await.unwrap().unwrap(), LeadershipState::ElectedAsLeader);

        cancel.cancel().await;
        assert_eq!(stream.next().await.unwrap().unwrap(), LeadershipState::standby(None));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let store = FakeStore::new();
        let election = ElectionConfig { candidate_id: "A:1".to_string(), election_path: "/omni/election".to_string() };
        let (cancel, mut stream) =
            LifecycleController::start(store, &election, vec![], Duration::from_secs(5), MetricsHandle).await;

        stream.next().await.unwrap().unwrap();
        cancel.cancel().await;
        cancel.cancel().await;
        cancel.cancel().await;

        assert_eq!(stream.next().await.unwrap().unwrap(), LeadershipState::standby(None));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn cancel_removes_membership_node() {
        let store = FakeStore::new();
        let election = ElectionConfig { candidate_id: "A:1".to_string(), election_path: "/omni/election".to_string() };
        let (cancel, mut stream) =
            LifecycleController::start(store.clone(), &election, vec![], Duration::from_secs(5), MetricsHandle).await;

        stream.next().await.unwrap().unwrap();
        cancel.cancel().await;

        let (children, _watch) = store.get_children_w("/omni/election-curator").await.unwrap();
        assert!(children.is_empty());
    }

    #[tokio::test]
    async fn duplicate_identity_removes_this_candidates_membership_node() {
        let store = FakeStore::new();
        store.seed_child("/omni/election-curator", "A:1").await;
        let election = ElectionConfig { candidate_id: "A:1".to_string(), election_path: "/omni/election".to_string() };
        let (_cancel, mut stream) =
            LifecycleController::start(store.clone(), &election, vec![], Duration::from_secs(5), MetricsHandle).await;

        let event = stream.next().await.unwrap();
        assert!(event.is_err());

        // The terminal-failure callback schedules cancel() on its own task;
        // give it a chance to run before asserting on store state.
        for _ in 0..100 {
            let (children, _watch) = store.get_children_w("/omni/election-curator").await.unwrap();
            if children.len() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }

        let (children, _watch) = store.get_children_w("/omni/election-curator").await.unwrap();
        assert_eq!(children.len(), 1);
        assert!(children[0].starts_with("A:1-"), "the seeded node should remain, this candidate's own node removed");
    }

    #[tokio::test]
    async fn connection_timeout_fails_stream_before_any_emission() {
        let store = FakeStore::new();
        store.inject_no_node("/omni/election-curator", 10_000).await;
        let election = ElectionConfig { candidate_id: "A:1".to_string(), election_path: "/omni/election".to_string() };
        let (_cancel, mut stream) =
            LifecycleController::start(store, &election, vec![], Duration::from_millis(50), MetricsHandle).await;

        let event = stream.next().await.unwrap();
        assert!(event.is_err());
    }
}
