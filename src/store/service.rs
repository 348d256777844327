use crate::peer::NodeAddr;
use crate::pool::PoolError;
use crate::role::Role;

/// KeyValueService is the RPC surface every storage node exposes. The gRPC server and the
/// in-process test network both dispatch onto it.
#[async_trait::async_trait]
pub trait KeyValueService: Send + Sync + 'static {
    /// `get()` returns the value for `key`, or an empty string if absent.
    async fn get(&self, key: String) -> Result<String, RoleViolation>;

    async fn put(&self, key: String, value: String) -> Result<(), RoleViolation>;

    /// Applies a write replicated by the primary unless a newer sequence was already applied to
    /// the key.
    async fn forward_request(&self, key: String, value: String, sequence: u64);

    /// Liveness and eligibility: false iff this node is a spare.
    async fn ping(&self) -> bool;

    /// Sends this node's full map to `target`, which has just become the backup.
    async fn complete_data_transfer(&self, target: NodeAddr) -> Result<DataTransferSummary, DataTransferError>;

    /// Inserts every pair whose key is not already present.
    async fn set_map(&self, keys: Vec<String>, values: Vec<String>);
}

/// A client request reached a node whose role does not allow serving it.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("Node is {role} and does not serve client requests")]
pub struct RoleViolation {
    pub role: Role,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DataTransferSummary {
    pub entries_sent: u64,
    pub batches_sent: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum DataTransferError {
    /// Remaining batches were not sent. The next transfer cycle repairs the backup.
    #[error("Batch {batch} of {total_batches} to {target} failed: {source}")]
    Batch {
        target: NodeAddr,
        batch: usize,
        total_batches: usize,
        #[source]
        source: PoolError,
    },
}
