mod addr;
mod connection;
mod grpc_client;
mod local;
mod probe;

pub use addr::NodeAddr;
pub use addr::ParseNodeAddrError;
pub use connection::PeerConnection;
pub use connection::PeerConnector;
pub use connection::PeerError;
pub use grpc_client::GrpcPeerConnector;
pub use grpc_client::KvRpcClient;
pub use local::LocalNetwork;
pub use probe::ProbeOutcome;

pub(crate) use probe::ProbedPeer;
