use crate::grpc::grpc_kv_server::{GrpcKv, GrpcKvServer};
use crate::grpc::{
    proto_data_transfer_result, proto_get_result, proto_kv_error, proto_put_result, ProtoDataTransferReq,
    ProtoDataTransferResult, ProtoDataTransferSuccess, ProtoForwardReq, ProtoForwardResult, ProtoGetReq,
    ProtoGetResult, ProtoGetSuccess, ProtoKvError, ProtoPingReq, ProtoPingResult, ProtoPutReq, ProtoPutResult,
    ProtoPutSuccess, ProtoRoleViolation, ProtoServerFault, ProtoSetMapReq, ProtoSetMapResult,
};
use crate::peer::NodeAddr;
use crate::server::RpcServerShutdownSignal;
use crate::store::{DataTransferError, DataTransferSummary, KeyValueService, RoleViolation};
use std::convert::TryFrom;
use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

/// RpcServer is the type that implements the storage node gRPC interface on top of a
/// `KeyValueService`.
pub(crate) struct RpcServer<S: KeyValueService> {
    logger: slog::Logger,
    service: Arc<S>,
}

impl<S: KeyValueService> RpcServer<S> {
    pub(crate) fn new(logger: slog::Logger, service: Arc<S>) -> Self {
        RpcServer { logger, service }
    }

    pub(crate) async fn run(self, socket_addr: SocketAddr, shutdown_signal: RpcServerShutdownSignal) {
        let logger = self.logger.clone();
        slog::info!(logger, "Listening on '{:?}'", socket_addr);

        let result = Server::builder()
            .add_service(GrpcKvServer::new(self))
            .serve_with_shutdown(socket_addr, shutdown_signal)
            .await;

        slog::info!(logger, "Server run() has exited: {:?}", result);
    }

    fn convert_kv_error(err: RoleViolation) -> ProtoKvError {
        ProtoKvError {
            err: Some(proto_kv_error::Err::RoleViolation(ProtoRoleViolation {
                role: err.role.to_string(),
            })),
        }
    }

    fn convert_get_result(app_result: Result<String, RoleViolation>) -> ProtoGetResult {
        match app_result {
            Ok(value) => ProtoGetResult {
                result: Some(proto_get_result::Result::Ok(ProtoGetSuccess { value })),
            },
            Err(e) => ProtoGetResult {
                result: Some(proto_get_result::Result::Err(Self::convert_kv_error(e))),
            },
        }
    }

    fn convert_put_result(app_result: Result<(), RoleViolation>) -> ProtoPutResult {
        match app_result {
            Ok(()) => ProtoPutResult {
                result: Some(proto_put_result::Result::Ok(ProtoPutSuccess {
                    // Empty
                })),
            },
            Err(e) => ProtoPutResult {
                result: Some(proto_put_result::Result::Err(Self::convert_kv_error(e))),
            },
        }
    }

    fn convert_data_transfer_input(rpc_request: ProtoDataTransferReq) -> Result<NodeAddr, Status> {
        if rpc_request.host.is_empty() {
            return Err(Status::invalid_argument("DataTransfer target host is empty"));
        }
        let port = u16::try_from(rpc_request.port)
            .map_err(|_| Status::invalid_argument(format!("DataTransfer target port {} out of range", rpc_request.port)))?;

        Ok(NodeAddr::new(rpc_request.host, port))
    }

    fn convert_data_transfer_result(
        app_result: Result<DataTransferSummary, DataTransferError>,
    ) -> ProtoDataTransferResult {
        match app_result {
            Ok(summary) => ProtoDataTransferResult {
                result: Some(proto_data_transfer_result::Result::Ok(ProtoDataTransferSuccess {
                    entries_sent: summary.entries_sent,
                    batches_sent: summary.batches_sent,
                })),
            },
            Err(e) => ProtoDataTransferResult {
                result: Some(proto_data_transfer_result::Result::Err(ProtoServerFault {
                    message: e.to_string(),
                })),
            },
        }
    }

    fn convert_set_map_input(rpc_request: ProtoSetMapReq) -> Result<(Vec<String>, Vec<String>), Status> {
        if rpc_request.keys.len() != rpc_request.values.len() {
            return Err(Status::invalid_argument(format!(
                "SetMap has {} keys but {} values",
                rpc_request.keys.len(),
                rpc_request.values.len()
            )));
        }
        Ok((rpc_request.keys, rpc_request.values))
    }
}

#[async_trait::async_trait]
impl<S: KeyValueService> GrpcKv for RpcServer<S> {
    async fn get(&self, rpc_request_wrapped: Request<ProtoGetReq>) -> Result<Response<ProtoGetResult>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let app_result = self.service.get(rpc_request.key).await;
        let rpc_reply = Self::convert_get_result(app_result);
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_reply);

        Ok(Response::new(rpc_reply))
    }

    async fn put(&self, rpc_request_wrapped: Request<ProtoPutReq>) -> Result<Response<ProtoPutResult>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let app_result = self.service.put(rpc_request.key, rpc_request.value).await;
        let rpc_reply = Self::convert_put_result(app_result);
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_reply);

        Ok(Response::new(rpc_reply))
    }

    async fn forward_request(
        &self,
        rpc_request_wrapped: Request<ProtoForwardReq>,
    ) -> Result<Response<ProtoForwardResult>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        self.service
            .forward_request(rpc_request.key, rpc_request.value, rpc_request.sequence)
            .await;

        Ok(Response::new(ProtoForwardResult {
            // Empty
        }))
    }

    async fn ping(&self, _rpc_request_wrapped: Request<ProtoPingReq>) -> Result<Response<ProtoPingResult>, Status> {
        let eligible = self.service.ping().await;
        Ok(Response::new(ProtoPingResult { eligible }))
    }

    async fn complete_data_transfer(
        &self,
        rpc_request_wrapped: Request<ProtoDataTransferReq>,
    ) -> Result<Response<ProtoDataTransferResult>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let target = Self::convert_data_transfer_input(rpc_request)?;
        let app_result = self.service.complete_data_transfer(target).await;
        let rpc_reply = Self::convert_data_transfer_result(app_result);
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_reply);

        Ok(Response::new(rpc_reply))
    }

    async fn set_map(&self, rpc_request_wrapped: Request<ProtoSetMapReq>) -> Result<Response<ProtoSetMapResult>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        // Batches can hold 100k entries; only log their size.
        slog::debug!(self.logger, "ServerWire - SetMap with {} keys", rpc_request.keys.len());
        let (keys, values) = Self::convert_set_map_input(rpc_request)?;
        self.service.set_map(keys, values).await;

        Ok(Response::new(ProtoSetMapResult {
            // Empty
        }))
    }
}
