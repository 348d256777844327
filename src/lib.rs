mod api;
mod coordination;
mod logging;
mod peer;
mod pool;
mod role;
mod server;
mod store;
mod grpc {
    include!("../generated/kv.rs");
}

pub use api::try_create_local_storage_node;
pub use api::try_create_storage_node;
pub use api::NodeCreationError;
pub use api::NodeOptions;
pub use api::StorageNode;
pub use api::StorageNodeConfig;
pub use coordination::CoordinationError;
pub use coordination::Coordinator;
pub use coordination::LocalEnsemble;
pub use coordination::LocalSession;
pub use coordination::MembershipWatch;
pub use coordination::MembershipWatchTrigger;
#[cfg(feature = "zookeeper")]
pub use coordination::ZooKeeperCoordinator;
pub use logging::create_root_logger_for_file;
pub use logging::create_root_logger_for_stdout;
pub use logging::discard_logger;
pub use peer::KvRpcClient;
pub use peer::LocalNetwork;
pub use peer::NodeAddr;
pub use peer::ParseNodeAddrError;
pub use peer::PeerConnection;
pub use peer::PeerConnector;
pub use peer::PeerError;
pub use role::Role;
pub use role::RoleSnapshot;
pub use role::UnknownRole;
pub use store::DataTransferError;
pub use store::DataTransferSummary;
pub use store::KeyValueService;
pub use store::ReplicatedStore;
pub use store::RoleListener;
pub use store::RoleViolation;

