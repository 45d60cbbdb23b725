//! In-memory `CoordinationStore` double used to drive the S1-S6 scenarios
//! deterministically, with injectable faults.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{oneshot, Mutex};

use crate::config::AclEntry;
use crate::error::StoreError;

use super::{ChildWatch, CoordinationStore, HookToken};

struct PathState {
    children: Vec<String>,
    watchers: Vec<oneshot::Sender<()>>,
}

struct Inner {
    paths: HashMap<String, PathState>,
    next_sequence: HashMap<String, u64>,
    no_node_faults: HashMap<String, u32>,
    session_lost: bool,
}

/// In-memory election path: create/delete/watch semantics matching a
/// single ZooKeeper path, without a network round trip.
pub struct FakeStore {
    inner: Mutex<Inner>,
    hooks: SyncMutex<HashMap<u64, Box<dyn Fn() + Send + Sync>>>,
    next_token: AtomicU64,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                paths: HashMap::new(),
                next_sequence: HashMap::new(),
                no_node_faults: HashMap::new(),
                session_lost: false,
            }),
            hooks: SyncMutex::new(HashMap::new()),
            next_token: AtomicU64::new(0),
        })
    }

    /// Makes `get_children_w(path)` return `StoreError::NoNode` the next
    /// `times` calls before succeeding normally, simulating the startup
    /// race described in spec §4.3 (S4).
    pub async fn inject_no_node(&self, path: &str, times: u32) {
        self.inner.lock().await.no_node_faults.insert(path.to_string(), times);
    }

    /// Pre-seeds `path` with a child bearing `id` (and a 10-digit
    /// sequence suffix), simulating a stale/duplicate membership node
    /// left over from a prior run (S5).
    pub async fn seed_child(&self, path: &str, id: &str) {
        let mut inner = self.inner.lock().await;
        let seq = next_sequence(&mut inner, path);
        let name = format!("{id}-{seq:010}");
        inner.paths.entry(path.to_string()).or_insert_with(|| PathState { children: Vec::new(), watchers: Vec::new() }).children.push(name);
    }

    /// Simulates loss of the coordination-store session: every pending
    /// watch fires (as it would on a real disconnect) and subsequent
    /// operations fail with `StoreError::Session`.
    pub async fn simulate_session_loss(&self) {
        let mut inner = self.inner.lock().await;
        inner.session_lost = true;
        for state in inner.paths.values_mut() {
            for tx in state.watchers.drain(..) {
                let _ = tx.send(());
            }
        }
    }

    /// Runs every registered pre-close hook, as the owner of a real
    /// shared client would just before closing its session.
    pub fn run_pre_close_hooks(&self) {
        let hooks: Vec<_> = std::mem::take(&mut *self.hooks.lock()).into_values().collect();
        for hook in hooks {
            hook();
        }
    }

    fn fire_watchers(inner: &mut Inner, path: &str) {
        if let Some(state) = inner.paths.get_mut(path) {
            for tx in state.watchers.drain(..) {
                let _ = tx.send(());
            }
        }
    }
}

fn next_sequence(inner: &mut Inner, path: &str) -> u64 {
    let counter = inner.next_sequence.entry(path.to_string()).or_insert(0);
    let seq = *counter;
    *counter += 1;
    seq
}

#[async_trait]
impl CoordinationStore for FakeStore {
    async fn ensure_path(&self, path: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.session_lost {
            return Err(StoreError::Session("session lost".to_string()));
        }
        inner.paths.entry(path.to_string()).or_insert_with(|| PathState { children: Vec::new(), watchers: Vec::new() });
        Ok(())
    }

    async fn create_ephemeral_sequential(
        &self,
        path: &str,
        id_prefix: &str,
        _acl: &[AclEntry],
    ) -> Result<String, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.session_lost {
            return Err(StoreError::Session("session lost".to_string()));
        }
        let seq = next_sequence(&mut inner, path);
        let name = format!("{id_prefix}{seq:010}");
        let full_path = format!("{path}/{name}");
        inner
            .paths
            .entry(path.to_string())
            .or_insert_with(|| PathState { children: Vec::new(), watchers: Vec::new() })
            .children
            .push(name);
        FakeStore::fire_watchers(&mut inner, path);
        Ok(full_path)
    }

    async fn delete(&self, full_path: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.session_lost {
            return Err(StoreError::Session("session lost".to_string()));
        }
        let (path, name) = match full_path.rsplit_once('/') {
            Some(pair) => pair,
            None => return Ok(()),
        };
        if let Some(state) = inner.paths.get_mut(path) {
            state.children.retain(|c| c != name);
        }
        FakeStore::fire_watchers(&mut inner, path);
        Ok(())
    }

    async fn get_children_w(&self, path: &str) -> Result<(Vec<String>, Box<dyn ChildWatch>), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.session_lost {
            return Err(StoreError::Session("session lost".to_string()));
        }
        if let Some(remaining) = inner.no_node_faults.get_mut(path) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::NoNode(path.to_string()));
            }
        }
        let children = inner.paths.get(path).map(|s| s.children.clone()).unwrap_or_default();
        let (tx, rx) = oneshot::channel();
        inner
            .paths
            .entry(path.to_string())
            .or_insert_with(|| PathState { children: Vec::new(), watchers: Vec::new() })
            .watchers
            .push(tx);
        Ok((children, Box::new(FakeChildWatch { rx })))
    }

    fn register_pre_close_hook(&self, hook: Box<dyn Fn() + Send + Sync>) -> HookToken {
        let id = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.hooks.lock().insert(id, hook);
        HookToken(id)
    }

    fn deregister_pre_close_hook(&self, token: HookToken) {
        self.hooks.lock().remove(&token.0);
    }
}

struct FakeChildWatch {
    rx: oneshot::Receiver<()>,
}

#[async_trait]
impl ChildWatch for FakeChildWatch {
    async fn fired(self: Box<Self>) -> Result<(), StoreError> {
        self.rx.await.map_err(|_| StoreError::Session("watch dropped before firing".to_string()))
    }
}
