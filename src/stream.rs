//! Bounded, deduplicated leadership event stream with a terminal event
//! on normal close (spec §4.4).

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::ElectionError;
use crate::state::LeadershipState;

const QUEUE_CAPACITY: usize = 16;

pub type StreamItem = Result<LeadershipState, Arc<ElectionError>>;

/// Producer-side handle used by the watch/poll loop to publish state
/// transitions. Owns the dedup slot seeded with `Standby(none)` and the
/// "has anything real been emitted yet" notification the initial-
/// connect timeout races against.
pub(crate) struct Emitter {
    sender: async_broadcast::Sender<StreamItem>,
    last_emitted: Mutex<LeadershipState>,
    first_emitted: Notify,
}

impl Emitter {
    pub(crate) fn new(sender: async_broadcast::Sender<StreamItem>) -> Self {
        Self { sender, last_emitted: Mutex::new(LeadershipState::standby(None)), first_emitted: Notify::new() }
    }

    /// Offers a state transition, suppressing it if equal to the last
    /// one actually sent (dedup, spec §4.4). Logs one of the three
    /// transition messages on genuine emission.
    pub(crate) async fn offer(&self, state: LeadershipState) {
        {
            let mut last = self.last_emitted.lock();
            if *last == state {
                return;
            }
            *last = state.clone();
        }
        tracing::info!("{state}");
        let _ = self.sender.broadcast(Ok(state)).await;
        self.first_emitted.notify_one();
    }

    /// Fails the stream and closes it. No terminal `Standby(none)` is
    /// appended: a fabricated "not leader" observation after a fault
    /// would misrepresent why the stream ended. `cancel()` still runs
    /// and guarantees the membership node is gone.
    pub(crate) async fn fail(&self, err: ElectionError) {
        tracing::error!(%err, "leadership event stream failing");
        let _ = self.sender.broadcast(Err(Arc::new(err))).await;
        self.sender.close();
    }

    /// Appends the terminal `Standby(none)` event on graceful shutdown,
    /// unless the immediately preceding emission was already
    /// `Standby(none)` — appending it again would violate the
    /// no-consecutive-duplicates invariant while adding nothing, since
    /// that invariant is already satisfied.
    pub(crate) async fn complete_normally(&self) {
        let terminal = LeadershipState::standby(None);
        let mut last = self.last_emitted.lock();
        if *last != terminal {
            *last = terminal.clone();
            drop(last);
            tracing::info!("{terminal}");
            let _ = self.sender.broadcast(Ok(terminal)).await;
        }
        self.sender.close();
    }

    /// Waits until the first state has been genuinely emitted (i.e.
    /// survived dedup), used by the initial-connect timeout watchdog.
    pub(crate) async fn wait_for_first_emission(&self) {
        self.first_emitted.notified().await;
    }
}

/// The subscriber-facing half: a `Stream<Item = Result<LeadershipState,
/// Arc<ElectionError>>>` backed by a bounded, drop-oldest broadcast
/// channel.
pub struct LeadershipEventStream {
    receiver: async_broadcast::Receiver<StreamItem>,
}

impl LeadershipEventStream {
    pub(crate) fn new(receiver: async_broadcast::Receiver<StreamItem>) -> Self {
        Self { receiver }
    }
}

impl Stream for LeadershipEventStream {
    type Item = StreamItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}

/// Builds the producer/consumer pair for one election instance: queue
/// capacity 16, drop-oldest on overflow (spec §4.4).
pub(crate) fn channel() -> (Emitter, LeadershipEventStream) {
    let (mut sender, receiver) = async_broadcast::broadcast(QUEUE_CAPACITY);
    sender.set_overflow(true);
    sender.set_await_active(false);
    (Emitter::new(sender), LeadershipEventStream::new(receiver))
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[tokio::test]
    async fn dedup_suppresses_repeated_standby_none_seed() {
        let (emitter, mut stream) = channel();
        emitter.offer(LeadershipState::standby(None)).await;
        emitter.offer(LeadershipState::ElectedAsLeader).await;
        assert_eq!(stream.next().await.unwrap().unwrap(), LeadershipState::ElectedAsLeader);
    }

    #[tokio::test]
    async fn dedup_suppresses_immediate_repeat() {
        let (emitter, mut stream) = channel();
        emitter.offer(LeadershipState::ElectedAsLeader).await;
        emitter.offer(LeadershipState::ElectedAsLeader).await;
        emitter.offer(LeadershipState::standby(None)).await;
        assert_eq!(stream.next().await.unwrap().unwrap(), LeadershipState::ElectedAsLeader);
        assert_eq!(stream.next().await.unwrap().unwrap(), LeadershipState::standby(None));
    }

    #[tokio::test]
    async fn terminal_event_appended_on_normal_completion() {
        let (emitter, mut stream) = channel();
        emitter.offer(LeadershipState::ElectedAsLeader).await;
        emitter.complete_normally().await;
        assert_eq!(stream.next().await.unwrap().unwrap(), LeadershipState::ElectedAsLeader);
        assert_eq!(stream.next().await.unwrap().unwrap(), LeadershipState::standby(None));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn terminal_event_skipped_when_already_standby_none() {
        let (emitter, mut stream) = channel();
        emitter.offer(LeadershipState::ElectedAsLeader).await;
        emitter.offer(LeadershipState::standby(None)).await;
        emitter.complete_normally().await;
        assert_eq!(stream.next().await.unwrap().unwrap(), LeadershipState::ElectedAsLeader);
        assert_eq!(stream.next().await.unwrap().unwrap(), LeadershipState::standby(None));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn failure_completion_has_no_synthetic_terminal_event() {
        let (emitter, mut stream) = channel();
        emitter.offer(LeadershipState::ElectedAsLeader).await;
        emitter.fail(ElectionError::DuplicateIdentity("A:1".to_string(), 2)).await;
        assert_eq!(stream.next().await.unwrap().unwrap(), LeadershipState::ElectedAsLeader);
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }
}
