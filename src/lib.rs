//! Leader election core for the OmniOrchestrator cluster scheduler.
//!
//! Elects exactly one leader among a set of candidate processes sharing
//! a ZooKeeper-style coordination store, and publishes the result as a
//! live [`LeadershipState`] stream with a [`CancelHandle`] the
//! subscriber can use to abdicate.
//!
//! The election protocol itself ([`latch`], [`watch_loop`]) is
//! backend-agnostic over the [`store::CoordinationStore`] trait; the
//! only concrete backend shipped here is [`store::zk::ZkStore`].

pub mod config;
pub mod error;
pub mod latch;
pub mod lifecycle;
pub mod metrics;
pub mod state;
pub mod store;
pub mod stream;
mod watch_loop;

use std::sync::Arc;
use std::time::Duration;

use config::{AclEntry, ElectionConfig};
use lifecycle::{CancelHandle, LifecycleController};
use metrics::MetricsHandle;
use store::CoordinationStore;
use stream::LeadershipEventStream;

pub use error::{ConnectError, ElectionError, StoreError};
pub use state::LeadershipState;

/// Starts one election instance against an already-connected
/// coordination store: registers the pre-close hook, starts the latch,
/// and launches the watch/poll loop. Returns immediately with a cancel
/// handle and the event stream; failures surface on the stream rather
/// than as an `Err` here, since the subscriber observes them the same
/// way regardless of when during startup they occurred.
pub async fn start_election(
    store: Arc<dyn CoordinationStore>,
    election: ElectionConfig,
    acl: Vec<AclEntry>,
    connection_timeout: Duration,
) -> (CancelHandle, LeadershipEventStream) {
    LifecycleController::start(store, &election, acl, connection_timeout, MetricsHandle).await
}
