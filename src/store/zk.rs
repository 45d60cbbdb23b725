//! ZooKeeper-backed `CoordinationStore`, via the async `zookeeper-async`
//! client. This is the only module that touches `zookeeper_async` types
//! directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use zookeeper_async::{Acl, CreateMode, Perms, Watcher, WatchedEvent, ZkError, ZkState, ZooKeeper};

use crate::config::{AclEntry, ClientConfig};
use crate::error::{ConnectError, StoreError};

use super::{effective_acl, ChildWatch, CoordinationStore, HookToken};

const TRANSIENT_RETRY_COUNT: u32 = 10;
const TRANSIENT_RETRY_BASE: Duration = Duration::from_secs(1);

pub struct ZkStore {
    client: ZooKeeper,
    acl: Vec<Acl>,
    hooks: Mutex<HashMap<u64, Box<dyn Fn() + Send + Sync>>>,
    next_token: AtomicU64,
}

impl ZkStore {
    /// Build and connect a session-backed client per spec §4.1: union the
    /// caller ACL with a world-readable entry, register digest auth if
    /// supplied, and block until connected or the connect timeout elapses.
    #[tracing::instrument(skip(config), fields(store_url = %redact(&config.store_url)))]
    pub async fn connect(config: &ClientConfig) -> Result<Arc<Self>, ConnectError> {
        let acl = to_zk_acl(&effective_acl(&config.default_acl));

        let captured_error: Arc<Mutex<Option<StoreError>>> = Arc::new(Mutex::new(None));
        let watcher = UnhandledErrorListener::new(captured_error.clone());

        let connect = ZooKeeper::connect(&config.store_url, config.session_timeout, watcher);
        let client = match tokio::time::timeout(config.blocking_connect_timeout, connect).await {
            Ok(Ok(client)) => client,
            Ok(Err(e)) => return Err(ConnectError::Unhandled(StoreError::Backend(e.to_string()))),
            Err(_) => {
                return Err(match captured_error.lock().take() {
                    Some(err) => ConnectError::Unhandled(err),
                    None => ConnectError::Timeout(config.blocking_connect_timeout),
                });
            }
        };

        if let Some(credentials) = &config.credentials {
            let digest = format!("{}:{}", credentials.username, credentials.password).into_bytes();
            client
                .add_auth("digest", digest)
                .await
                .map_err(|e| ConnectError::Auth(StoreError::Backend(e.to_string())))?;
        }

        tracing::info!("Will do leader election through {}", redact(&config.store_url));

        Ok(Arc::new(Self {
            client,
            acl,
            hooks: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(0),
        }))
    }

    /// Deregister every remaining pre-close hook, run them, then close
    /// the underlying session. The election core itself never calls
    /// this — only the owner of the shared client does (spec §5,
    /// "shared resources").
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        let hooks: Vec<_> = std::mem::take(&mut *self.hooks.lock()).into_values().collect();
        for hook in hooks {
            hook();
        }
        self.client.close().await.map_err(|e| StoreError::Backend(e.to_string()))
    }
}

async fn with_retry<T, F, Fut>(op_name: &str, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, StoreError>>,
{
    let mut backoff = ExponentialBackoff {
        initial_interval: TRANSIENT_RETRY_BASE,
        ..ExponentialBackoff::default()
    };
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(err) if attempt < TRANSIENT_RETRY_COUNT && err.is_transient() => {
                attempt += 1;
                let delay = backoff.next_backoff().unwrap_or(TRANSIENT_RETRY_BASE);
                tracing::warn!(%err, op_name, attempt, "transient coordination-store error, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[async_trait]
impl CoordinationStore for ZkStore {
    async fn ensure_path(&self, path: &str) -> Result<(), StoreError> {
        with_retry("ensure_path", || async {
            match self.client.create(path, Vec::new(), self.acl.clone(), CreateMode::Persistent).await {
                Ok(_) => Ok(()),
                Err(ZkError::NodeExists) => Ok(()),
                Err(e) => Err(to_store_error(e)),
            }
        })
        .await
    }

    async fn create_ephemeral_sequential(
        &self,
        path: &str,
        id_prefix: &str,
        acl: &[AclEntry],
    ) -> Result<String, StoreError> {
        let zk_acl = to_zk_acl(&effective_acl(acl));
        let full_prefix = format!("{path}/{id_prefix}");
        with_retry("create_ephemeral_sequential", || async {
            self.client
                .create(&full_prefix, id_prefix.as_bytes().to_vec(), zk_acl.clone(), CreateMode::EphemeralSequential)
                .await
                .map_err(to_store_error)
        })
        .await
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        with_retry("delete", || async {
            match self.client.delete(path, None).await {
                Ok(()) => Ok(()),
                Err(ZkError::NoNode) => Ok(()),
                Err(e) => Err(to_store_error(e)),
            }
        })
        .await
    }

    async fn get_children_w(&self, path: &str) -> Result<(Vec<String>, Box<dyn ChildWatch>), StoreError> {
        let mut backoff = ExponentialBackoff {
            initial_interval: TRANSIENT_RETRY_BASE,
            ..ExponentialBackoff::default()
        };
        let mut attempt = 0u32;
        loop {
            let (tx, rx) = oneshot::channel();
            let watcher = OneShotWatcher::new(tx);
            match self.client.get_children_w(path, watcher).await {
                Ok(children) => return Ok((children, Box::new(OneShotChildWatch { rx }))),
                Err(e) => {
                    let err = to_store_error(e);
                    if attempt >= TRANSIENT_RETRY_COUNT || !err.is_transient() {
                        return Err(err);
                    }
                    attempt += 1;
                    let delay = backoff.next_backoff().unwrap_or(TRANSIENT_RETRY_BASE);
                    tracing::warn!(%err, attempt, "transient error reading participants, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
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

struct OneShotChildWatch {
    rx: oneshot::Receiver<()>,
}

#[async_trait]
impl ChildWatch for OneShotChildWatch {
    async fn fired(self: Box<Self>) -> Result<(), StoreError> {
        self.rx.await.map_err(|_| StoreError::Session("watch channel closed before firing".to_string()))
    }
}

struct OneShotWatcher {
    tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl OneShotWatcher {
    fn new(tx: oneshot::Sender<()>) -> Self {
        Self { tx: Mutex::new(Some(tx)) }
    }
}

impl Watcher for OneShotWatcher {
    fn handle(&self, _event: WatchedEvent) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(());
        }
    }
}

/// Captures the first unhandled session error so `connect()` can report
/// it instead of a bare timeout when the connect-with-timeout race is
/// lost for a reason more specific than "still waiting".
struct UnhandledErrorListener {
    captured: Arc<Mutex<Option<StoreError>>>,
}

impl UnhandledErrorListener {
    fn new(captured: Arc<Mutex<Option<StoreError>>>) -> Self {
        Self { captured }
    }
}

impl Watcher for UnhandledErrorListener {
    fn handle(&self, event: WatchedEvent) {
        if matches!(event.keeper_state, ZkState::AuthFailed | ZkState::Closed) {
            let mut guard = self.captured.lock();
            if guard.is_none() {
                *guard = Some(StoreError::Session(format!("{:?}", event.keeper_state)));
            }
        }
    }
}

fn to_zk_acl(entries: &[AclEntry]) -> Vec<Acl> {
    entries
        .iter()
        .map(|e| Acl {
            perms: Perms::from_bits_truncate(i32::from(e.permissions.0)),
            scheme: e.scheme.clone(),
            id: e.id.clone(),
        })
        .collect()
}

fn to_store_error(e: ZkError) -> StoreError {
    match e {
        ZkError::NoNode => StoreError::NoNode(String::new()),
        ZkError::NodeExists => StoreError::NodeExists(String::new()),
        ZkError::ConnectionLoss | ZkError::SessionExpired | ZkError::SessionMoved => {
            StoreError::Session(format!("{e:?}"))
        }
        other => StoreError::Backend(format!("{other:?}")),
    }
}

/// Strips credentials from a `user:pass@host:port` style connect string
/// before it is logged.
fn redact(store_url: &str) -> String {
    match store_url.rsplit_once('@') {
        Some((_, rest)) => rest.to_string(),
        None => store_url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_strips_credentials() {
        assert_eq!(redact("user:pass@zk1:2181,zk2:2181"), "zk1:2181,zk2:2181");
        assert_eq!(redact("zk1:2181"), "zk1:2181");
    }

    #[test]
    fn membership_node_acl_is_always_world_readable() {
        // create_ephemeral_sequential must union the caller ACL with a
        // world-readable entry, the same as ensure_path, so the leader
        // record itself stays discoverable without credentials.
        let acl = to_zk_acl(&effective_acl(&[]));
        assert_eq!(acl.len(), 1);
        assert_eq!(acl[0].scheme, "world");
        assert_eq!(acl[0].id, "anyone");
    }
}
