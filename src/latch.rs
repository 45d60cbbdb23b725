//! The per-candidate membership node and participant view (spec §4.2).

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{AclEntry, ElectionConfig};
use crate::error::StoreError;
use crate::store::{ChildWatch, CoordinationStore, Participant};

const SEQUENCE_DIGITS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchState {
    Latent,
    Started,
    Closed,
}

/// Owns this candidate's ephemeral-sequenced child under the election
/// path and answers "am I leader" / "who else is here" queries.
pub struct LeaderLatch {
    store: Arc<dyn CoordinationStore>,
    election_path: String,
    candidate_id: String,
    acl: Vec<AclEntry>,
    state: Mutex<LatchState>,
    our_node: Mutex<Option<String>>,
}

impl LeaderLatch {
    pub fn new(store: Arc<dyn CoordinationStore>, config: &ElectionConfig, acl: Vec<AclEntry>) -> Self {
        Self {
            store,
            election_path: config.curator_path(),
            candidate_id: config.candidate_id.clone(),
            acl,
            state: Mutex::new(LatchState::Latent),
            our_node: Mutex::new(None),
        }
    }

    pub fn election_path(&self) -> &str {
        &self.election_path
    }

    /// Synchronous lifecycle accessor; never suspends.
    pub fn get_state(&self) -> LatchState {
        *self.state.lock()
    }

    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<(), StoreError> {
        tracing::info!("starting leader latch");
        self.store.ensure_path(&self.election_path).await?;
        let id_prefix = format!("{}-", self.candidate_id);
        let node = self.store.create_ephemeral_sequential(&self.election_path, &id_prefix, &self.acl).await?;
        *self.our_node.lock() = Some(node);
        *self.state.lock() = LatchState::Started;
        Ok(())
    }

    /// Deletes this candidate's child and releases internal resources.
    /// Safe to call after store disconnection or more than once.
    #[tracing::instrument(skip(self))]
    pub async fn close(&self) {
        tracing::info!("Closing leader latch");
        let node = self.our_node.lock().take();
        *self.state.lock() = LatchState::Closed;
        if let Some(node) = node {
            match self.store.delete(&node).await {
                Ok(()) => {}
                Err(StoreError::NoNode(_)) => {}
                Err(err) => tracing::warn!(%err, "failed to delete membership node on latch close"),
            }
        }
        tracing::info!("Leader latch closed");
    }

    /// Reads the children of the election path, ordered by sequence,
    /// and atomically arms the watch for the next change.
    pub async fn get_participants(&self) -> Result<(Vec<Participant>, Box<dyn ChildWatch>), StoreError> {
        let (names, watch) = self.store.get_children_w(&self.election_path).await?;
        Ok((parse_participants(names), watch))
    }
}

fn parse_participants(mut names: Vec<String>) -> Vec<Participant> {
    names.sort_by_key(|n| sequence_suffix(n));
    names
        .into_iter()
        .enumerate()
        .map(|(i, name)| Participant { id: candidate_id_from_child_name(&name), is_leader: i == 0 })
        .collect()
}

fn sequence_suffix(name: &str) -> u64 {
    let start = name.len().saturating_sub(SEQUENCE_DIGITS);
    name.get(start..).and_then(|s| s.parse().ok()).unwrap_or(0)
}

/// Recovers the candidate id embedded in a child name: the fixed
/// 10-digit sequence suffix is stripped, along with the separating
/// hyphen `start()` inserts before it. No extra `get_data` round trip
/// is needed per participant.
fn candidate_id_from_child_name(name: &str) -> String {
    let cut = name.len().saturating_sub(SEQUENCE_DIGITS);
    let without_seq = &name[..cut];
    without_seq.strip_suffix('-').unwrap_or(without_seq).to_string()
}
