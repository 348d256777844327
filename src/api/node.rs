use crate::peer::NodeAddr;
use crate::role::{Role, RoleActorClient, RoleSnapshot};
use crate::server::RpcServerShutdownHandle;
use crate::store::{ReplicatedStore, RoleListener};
use std::sync::Arc;

/// StorageNode is the handle to a running node. Dropping it stops the role actor and, for a gRPC
/// node, the server.
pub struct StorageNode {
    addr: NodeAddr,
    membership_entry: String,
    store: Arc<ReplicatedStore>,
    role_actor: RoleActorClient,
    server_shutdown: Option<RpcServerShutdownHandle>,
}

impl StorageNode {
    pub(super) fn new(
        addr: NodeAddr,
        membership_entry: String,
        store: Arc<ReplicatedStore>,
        role_actor: RoleActorClient,
        server_shutdown: Option<RpcServerShutdownHandle>,
    ) -> Self {
        StorageNode {
            addr,
            membership_entry,
            store,
            role_actor,
            server_shutdown,
        }
    }

    pub fn addr(&self) -> &NodeAddr {
        &self.addr
    }

    /// Name of this node's ephemeral entry under the membership root, e.g. `znode0000000003`.
    pub fn membership_entry(&self) -> &str {
        &self.membership_entry
    }

    pub fn role(&self) -> Role {
        self.store.role()
    }

    pub fn is_alone(&self) -> bool {
        self.store.is_alone()
    }

    pub fn role_snapshot(&self) -> RoleSnapshot {
        self.store.role_snapshot()
    }

    pub fn role_listener(&self) -> RoleListener {
        self.store.role_listener()
    }

    /// Direct access to the node's local key/value service, bypassing the network.
    pub fn store(&self) -> &Arc<ReplicatedStore> {
        &self.store
    }

    /// Forces an identification pass outside of membership notifications.
    pub async fn identify(&self) -> Option<RoleSnapshot> {
        self.role_actor.identify().await
    }

    /// Stops serving RPCs and identifying. The membership entry goes away with the coordination
    /// session, which the caller owns.
    pub fn shutdown(self) {
        if let Some(handle) = self.server_shutdown {
            handle.shutdown();
        }
    }
}
