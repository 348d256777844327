use crate::grpc::grpc_kv_client::GrpcKvClient;
use crate::grpc::{
    proto_data_transfer_result, proto_get_result, proto_kv_error, proto_put_result, ProtoDataTransferReq,
    ProtoForwardReq, ProtoGetReq, ProtoKvError, ProtoPingReq, ProtoPutReq, ProtoSetMapReq,
};
use crate::peer::{NodeAddr, PeerConnection, PeerConnector, PeerError};
use crate::store::RoleViolation;
use std::future::Future;
use tokio::time::Duration;
use tonic::transport::{Channel, Endpoint};

/// GrpcPeerConnector opens `KvRpcClient` connections with fixed connect and per-call timeouts.
pub struct GrpcPeerConnector {
    logger: slog::Logger,
    connect_timeout: Duration,
    rpc_timeout: Duration,
}

impl GrpcPeerConnector {
    pub fn new(logger: slog::Logger, connect_timeout: Duration, rpc_timeout: Duration) -> Self {
        GrpcPeerConnector {
            logger,
            connect_timeout,
            rpc_timeout,
        }
    }
}

#[async_trait::async_trait]
impl PeerConnector for GrpcPeerConnector {
    async fn connect(&self, addr: &NodeAddr) -> Result<Box<dyn PeerConnection>, PeerError> {
        let client = KvRpcClient::connect(addr.clone(), self.connect_timeout, self.rpc_timeout).await?;
        slog::debug!(self.logger, "Opened connection to {}", addr);
        Ok(Box::new(client))
    }
}

/// KvRpcClient is a single gRPC connection to a storage node. Peers use it through the
/// `PeerConnection` trait; external callers can use `get`/`put` directly.
pub struct KvRpcClient {
    addr: NodeAddr,
    inner: GrpcKvClient<Channel>,
    rpc_timeout: Duration,
}

impl KvRpcClient {
    pub async fn connect(addr: NodeAddr, connect_timeout: Duration, rpc_timeout: Duration) -> Result<Self, PeerError> {
        let connect_error = |message: String| PeerError::Connect {
            addr: addr.clone(),
            message,
        };

        let endpoint = Endpoint::from_shared(addr.to_url()).map_err(|e| connect_error(e.to_string()))?;
        let channel = match tokio::time::timeout(connect_timeout, endpoint.connect()).await {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => return Err(connect_error(e.to_string())),
            Err(_timeout) => return Err(connect_error("connect timed out".to_string())),
        };

        Ok(KvRpcClient {
            addr,
            inner: GrpcKvClient::new(channel),
            rpc_timeout,
        })
    }

    /// `get()` returns the stored value, or an empty string if the key is absent.
    pub async fn get(&mut self, key: String) -> Result<Result<String, RoleViolation>, PeerError> {
        let request = ProtoGetReq { key };
        let addr = self.addr.clone();
        let inner = &mut self.inner;
        let reply = with_timeout(addr, self.rpc_timeout, inner.get(request)).await?;

        match reply.result {
            Some(proto_get_result::Result::Ok(ok)) => Ok(Ok(ok.value)),
            Some(proto_get_result::Result::Err(err)) => convert_kv_error(err).map(Err),
            None => Err(PeerError::MalformedReply("Malformed Get Result")),
        }
    }

    pub async fn put(&mut self, key: String, value: String) -> Result<Result<(), RoleViolation>, PeerError> {
        let request = ProtoPutReq { key, value };
        let addr = self.addr.clone();
        let inner = &mut self.inner;
        let reply = with_timeout(addr, self.rpc_timeout, inner.put(request)).await?;

        match reply.result {
            Some(proto_put_result::Result::Ok(_)) => Ok(Ok(())),
            Some(proto_put_result::Result::Err(err)) => convert_kv_error(err).map(Err),
            None => Err(PeerError::MalformedReply("Malformed Put Result")),
        }
    }
}

#[async_trait::async_trait]
impl PeerConnection for KvRpcClient {
    fn addr(&self) -> &NodeAddr {
        &self.addr
    }

    async fn ping(&mut self) -> Result<bool, PeerError> {
        let addr = self.addr.clone();
        let inner = &mut self.inner;
        let reply = with_timeout(addr, self.rpc_timeout, inner.ping(ProtoPingReq {})).await?;
        Ok(reply.eligible)
    }

    async fn forward_request(&mut self, key: String, value: String, sequence: u64) -> Result<(), PeerError> {
        let request = ProtoForwardReq { key, value, sequence };
        let addr = self.addr.clone();
        let inner = &mut self.inner;
        with_timeout(addr, self.rpc_timeout, inner.forward_request(request)).await?;
        Ok(())
    }

    async fn complete_data_transfer(&mut self, target: NodeAddr) -> Result<(), PeerError> {
        let request = ProtoDataTransferReq {
            host: target.host().to_string(),
            port: u32::from(target.port()),
        };
        // A transfer sends the whole map, so it is bounded by the transport only.
        let reply = self
            .inner
            .complete_data_transfer(request)
            .await
            .map(tonic::Response::into_inner)?;

        match reply.result {
            Some(proto_data_transfer_result::Result::Ok(_)) => Ok(()),
            Some(proto_data_transfer_result::Result::Err(fault)) => Err(PeerError::RemoteFault(fault.message)),
            None => Err(PeerError::MalformedReply("Malformed CompleteDataTransfer Result")),
        }
    }

    async fn set_map(&mut self, keys: Vec<String>, values: Vec<String>) -> Result<(), PeerError> {
        let request = ProtoSetMapReq { keys, values };
        let addr = self.addr.clone();
        let inner = &mut self.inner;
        with_timeout(addr, self.rpc_timeout, inner.set_map(request)).await?;
        Ok(())
    }
}

async fn with_timeout<T, F>(addr: NodeAddr, rpc_timeout: Duration, call: F) -> Result<T, PeerError>
where
    F: Future<Output = Result<tonic::Response<T>, tonic::Status>>,
{
    match tokio::time::timeout(rpc_timeout, call).await {
        Ok(Ok(response)) => Ok(response.into_inner()),
        Ok(Err(status)) => Err(PeerError::Rpc(status)),
        Err(_elapsed) => Err(PeerError::Timeout(addr)),
    }
}

fn convert_kv_error(err: ProtoKvError) -> Result<RoleViolation, PeerError> {
    match err.err {
        Some(proto_kv_error::Err::RoleViolation(violation)) => match violation.role.parse() {
            Ok(role) => Ok(RoleViolation { role }),
            Err(_) => Err(PeerError::MalformedReply("Unknown role in RoleViolation")),
        },
        Some(proto_kv_error::Err::ServerFault(fault)) => Err(PeerError::RemoteFault(fault.message)),
        None => Err(PeerError::MalformedReply("Malformed KvError")),
    }
}
