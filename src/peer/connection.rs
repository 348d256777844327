use crate::peer::NodeAddr;
use std::fmt;

/// PeerConnector opens connections to other storage nodes. The gRPC transport and the in-process
/// test network both implement it, so the pool and the role state machine never see the wire.
#[async_trait::async_trait]
pub trait PeerConnector: Send + Sync + 'static {
    async fn connect(&self, addr: &NodeAddr) -> Result<Box<dyn PeerConnection>, PeerError>;
}

/// PeerConnection is one open connection to a single peer, carrying the peer-to-peer half of the
/// RPC surface.
#[async_trait::async_trait]
pub trait PeerConnection: Send {
    fn addr(&self) -> &NodeAddr;

    async fn ping(&mut self) -> Result<bool, PeerError>;

    async fn forward_request(&mut self, key: String, value: String, sequence: u64) -> Result<(), PeerError>;

    async fn complete_data_transfer(&mut self, target: NodeAddr) -> Result<(), PeerError>;

    async fn set_map(&mut self, keys: Vec<String>, values: Vec<String>) -> Result<(), PeerError>;
}

impl fmt::Debug for dyn PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerConnection({})", self.addr())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("Failed to connect to {addr}: {message}")]
    Connect { addr: NodeAddr, message: String },
    #[error("Timed out calling {0}")]
    Timeout(NodeAddr),
    #[error("Un-modeled failure from RPC call: {0:?}")]
    Rpc(tonic::Status),
    #[error("Explicit server fault: {0}")]
    RemoteFault(String),
    #[error("Malformed reply: {0}")]
    MalformedReply(&'static str),
    #[error("Node {0} is down")]
    NodeDown(NodeAddr),
}

impl From<tonic::Status> for PeerError {
    fn from(status: tonic::Status) -> Self {
        PeerError::Rpc(status)
    }
}
