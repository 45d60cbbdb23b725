//! Backend-agnostic coordination-store contract (spec §6).
//!
//! Everything above this module talks to a `CoordinationStore` trait
//! object; only `zk.rs` knows about the concrete ZooKeeper wire client.

pub mod fake;
pub mod zk;

use async_trait::async_trait;

use crate::config::AclEntry;
use crate::error::StoreError;

/// One membership-node child, derived view per spec §3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
    pub is_leader: bool,
}

/// A one-shot child-change watch; `fired()` resolves exactly once.
#[async_trait]
pub trait ChildWatch: Send {
    async fn fired(self: Box<Self>) -> Result<(), StoreError>;
}

/// Opaque handle to a registered pre-close hook, for deregistration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookToken(pub u64);

/// The ZooKeeper-shaped contract the election core depends on (spec §6).
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Idempotently create `path` as a persistent node if it doesn't exist.
    async fn ensure_path(&self, path: &str) -> Result<(), StoreError>;

    /// Create an ephemeral-sequential child of `path` whose name begins
    /// with `id_prefix`, returning the full path of the created node.
    /// `acl` is the caller-supplied ACL; implementations apply the same
    /// effective-ACL union (caller ∪ world-readable, see
    /// [`effective_acl`]) used for `ensure_path`, since this node is the
    /// leader record external tooling discovers.
    async fn create_ephemeral_sequential(
        &self,
        path: &str,
        id_prefix: &str,
        acl: &[AclEntry],
    ) -> Result<String, StoreError>;

    /// Delete a node by its full path. Must succeed (as a no-op) if the
    /// node is already gone.
    async fn delete(&self, path: &str) -> Result<(), StoreError>;

    /// Read the children of `path` and atomically arm a one-shot watch
    /// for the next change, so no intervening change can be missed
    /// between the read and the watch taking effect.
    async fn get_children_w(&self, path: &str) -> Result<(Vec<String>, Box<dyn ChildWatch>), StoreError>;

    /// Register a callback to run before the shared client's own
    /// session close. Returns a token usable to deregister it.
    fn register_pre_close_hook(&self, hook: Box<dyn Fn() + Send + Sync>) -> HookToken;

    /// Remove a previously registered pre-close hook. Safe to call more
    /// than once or after the client has already started shutting down.
    fn deregister_pre_close_hook(&self, token: HookToken);
}

/// Compose the effective ACL as caller-provided entries unioned with a
/// world-readable entry, per spec §4.1 / §6.
pub fn effective_acl(caller_acl: &[AclEntry]) -> Vec<AclEntry> {
    let mut acl = caller_acl.to_vec();
    if !acl.iter().any(|e| e.scheme == "world" && e.id == "anyone") {
        acl.push(AclEntry::world_readable());
    }
    acl
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_acl_adds_world_readable_once() {
        let acl = effective_acl(&[]);
        assert_eq!(acl, vec![AclEntry::world_readable()]);

        let acl = effective_acl(&[AclEntry::world_readable()]);
        assert_eq!(acl.len(), 1);
    }
}
