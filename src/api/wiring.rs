use crate::api::node::StorageNode;
use crate::api::options::NodeOptionsValidated;
use crate::coordination::{CoordinationError, Coordinator};
use crate::peer::{GrpcPeerConnector, LocalNetwork, NodeAddr, PeerConnector};
use crate::pool::ConnectionPool;
use crate::role::{create_role_actor, MembershipReader, RoleMachine};
use crate::server::{RpcServer, RpcServerShutdownHandle};
use crate::store::ReplicatedStore;
use crate::{server, NodeOptions};
use std::convert::TryFrom;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::time::{Duration, Instant};

const ROLE_ACTOR_QUEUE_SIZE: usize = 16;

pub struct StorageNodeConfig {
    /// Advertised in the membership entry; peers connect to `host:port`.
    pub host: String,
    pub port: u16,
    /// Persistent membership root, e.g. `/kv`. Must already exist.
    pub root_path: String,
    pub info_logger: slog::Logger,
    pub options: NodeOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum NodeCreationError {
    #[error("Illegal options for configuring node: {0}")]
    IllegalOptions(String),
    #[error("Failed to register in membership root")]
    Coordination(#[from] CoordinationError),
    #[error("RPC server could not start")]
    ServerUnavailable(#[source] io::Error),
    #[error("Role actor exited before the initial identification")]
    ActorExited,
}

/// Starts a node serving gRPC on `0.0.0.0:{port}`, registers it under the membership root and
/// runs the first identification pass before returning.
pub async fn try_create_storage_node(
    config: StorageNodeConfig,
    coordinator: Arc<dyn Coordinator>,
) -> Result<StorageNode, NodeCreationError> {
    let options = validate(&config)?;
    let me = NodeAddr::new(config.host.clone(), config.port);
    let root_logger = config.info_logger.new(slog::o!("Node" => me.to_string()));

    let connector: Arc<dyn PeerConnector> = Arc::new(GrpcPeerConnector::new(
        root_logger.clone(),
        options.connect_timeout,
        options.rpc_timeout,
    ));
    let store = create_store(&root_logger, connector.clone(), &options);

    let socket_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port));
    // Fail fast on a taken port instead of from inside the spawned server task.
    std::net::TcpListener::bind(socket_addr).map_err(NodeCreationError::ServerUnavailable)?;

    let (server_shutdown_handle, server_shutdown_signal) = server::shutdown_signal();
    let rpc_server = RpcServer::new(root_logger.clone(), store.clone());
    tokio::spawn(rpc_server.run(socket_addr, server_shutdown_signal));
    wait_until_serving(config.port, options.connect_timeout).await?;

    start_node(
        root_logger,
        me,
        config.root_path,
        store,
        connector,
        coordinator,
        options,
        Some(server_shutdown_handle),
    )
    .await
}

/// Like `try_create_storage_node()`, but the node is only reachable through `network`.
pub async fn try_create_local_storage_node(
    config: StorageNodeConfig,
    coordinator: Arc<dyn Coordinator>,
    network: LocalNetwork,
) -> Result<StorageNode, NodeCreationError> {
    let options = validate(&config)?;
    let me = NodeAddr::new(config.host.clone(), config.port);
    let root_logger = config.info_logger.new(slog::o!("Node" => me.to_string()));

    let connector: Arc<dyn PeerConnector> = Arc::new(network.clone());
    let store = create_store(&root_logger, connector.clone(), &options);
    network.register(me.clone(), &store);

    start_node(
        root_logger,
        me,
        config.root_path,
        store,
        connector,
        coordinator,
        options,
        None,
    )
    .await
}

fn validate(config: &StorageNodeConfig) -> Result<NodeOptionsValidated, NodeCreationError> {
    if config.host.is_empty() {
        return Err(NodeCreationError::IllegalOptions("Host must not be empty".to_string()));
    }
    NodeOptionsValidated::try_from(config.options.clone())
        .map_err(|e| NodeCreationError::IllegalOptions(e.to_string()))
}

fn create_store(
    logger: &slog::Logger,
    connector: Arc<dyn PeerConnector>,
    options: &NodeOptionsValidated,
) -> Arc<ReplicatedStore> {
    let pool = ConnectionPool::new(
        logger.new(slog::o!("Pool" => "backup")),
        connector,
        options.connection_pool_size,
    );
    Arc::new(ReplicatedStore::new(logger.clone(), pool, options.transfer_batch_size))
}

#[allow(clippy::too_many_arguments)]
async fn start_node(
    logger: slog::Logger,
    me: NodeAddr,
    root_path: String,
    store: Arc<ReplicatedStore>,
    connector: Arc<dyn PeerConnector>,
    coordinator: Arc<dyn Coordinator>,
    options: NodeOptionsValidated,
    server_shutdown: Option<RpcServerShutdownHandle>,
) -> Result<StorageNode, NodeCreationError> {
    let membership_entry = coordinator.register(&root_path, me.to_string().into_bytes()).await?;
    slog::info!(logger, "Registered as '{}' under '{}'", membership_entry, root_path);

    let membership = MembershipReader::new(logger.clone(), coordinator, root_path, options.membership_retry_delay);
    let machine = RoleMachine::new(logger.clone(), me.clone(), store.clone(), connector, membership);
    let (role_actor, actor) = create_role_actor(
        logger.new(slog::o!("Actor" => "role")),
        ROLE_ACTOR_QUEUE_SIZE,
        machine,
    );
    tokio::spawn(actor.run_event_loop());

    let snapshot = role_actor.identify().await.ok_or(NodeCreationError::ActorExited)?;
    slog::info!(logger, "Initial role: {} (alone = {})", snapshot.role, snapshot.alone);

    Ok(StorageNode::new(me, membership_entry, store, role_actor, server_shutdown))
}

// Polls until the spawned server accepts connections on the loopback interface.
async fn wait_until_serving(port: u16, timeout: Duration) -> Result<(), NodeCreationError> {
    let deadline = Instant::now() + timeout;
    loop {
        match tokio::net::TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await {
            Ok(_) => return Ok(()),
            Err(e) if Instant::now() >= deadline => return Err(NodeCreationError::ServerUnavailable(e)),
            Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }
}
