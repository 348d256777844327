use kvrepl::{
    Coordinator, KeyValueService, KvRpcClient, LocalEnsemble, LocalNetwork, LocalSession, NodeAddr, NodeCreationError,
    NodeOptions, PeerConnection, Role, RoleSnapshot, StorageNode, StorageNodeConfig,
};
use std::error::Error;
use std::sync::Arc;
use tokio::time::{timeout, Duration};

const ROOT: &str = "/kv";
const CONVERGENCE_TIMEOUT: Duration = Duration::from_secs(5);

struct LocalCluster {
    ensemble: LocalEnsemble,
    network: LocalNetwork,
}

struct ClusterMember {
    node: StorageNode,
    session: Arc<LocalSession>,
}

impl LocalCluster {
    fn new() -> Self {
        let ensemble = LocalEnsemble::new();
        ensemble.create_root(ROOT);
        LocalCluster {
            ensemble,
            network: LocalNetwork::new(),
        }
    }

    async fn join(&self, port: u16) -> Result<ClusterMember, NodeCreationError> {
        let session = Arc::new(self.ensemble.session());
        let node = kvrepl::try_create_local_storage_node(
            config(port, kvrepl::discard_logger()),
            session.clone(),
            self.network.clone(),
        )
        .await?;

        Ok(ClusterMember { node, session })
    }

    // Simulates a process crash: unreachable on the network and its ephemeral entry expires.
    fn crash(&self, member: &ClusterMember) {
        self.network.set_down(member.node.addr(), true);
        member.session.close();
    }
}

fn config(port: u16, info_logger: slog::Logger) -> StorageNodeConfig {
    StorageNodeConfig {
        host: "127.0.0.1".to_string(),
        port,
        root_path: ROOT.to_string(),
        info_logger,
        options: NodeOptions {
            membership_retry_delay: Some(Duration::from_millis(20)),
            rpc_timeout: Some(Duration::from_millis(500)),
            connect_timeout: Some(Duration::from_millis(500)),
            ..NodeOptions::default()
        },
    }
}

async fn wait_for_snapshot(node: &StorageNode, expected: RoleSnapshot) {
    let mut listener = node.role_listener();
    timeout(CONVERGENCE_TIMEOUT, listener.wait_for(|s| *s == expected))
        .await
        .unwrap_or_else(|_| panic!("{} did not reach {:?} in time", node.addr(), expected))
        .expect("node dropped");
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    timeout(CONVERGENCE_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

fn snapshot(role: Role, alone: bool) -> RoleSnapshot {
    RoleSnapshot { role, alone }
}

#[tokio::test]
async fn three_nodes_settle_into_primary_backup_spare() -> Result<(), Box<dyn Error>> {
    let cluster = LocalCluster::new();

    let a = cluster.join(1).await?;
    assert_eq!(a.node.role_snapshot(), snapshot(Role::Primary, true));

    let b = cluster.join(2).await?;
    assert_eq!(b.node.role(), Role::Backup);
    assert!(!a.node.is_alone());

    let c = cluster.join(3).await?;
    assert_eq!(c.node.role(), Role::Spare);
    assert_eq!(a.node.role(), Role::Primary);
    assert_eq!(b.node.role(), Role::Backup);

    a.node.store().put("x".into(), "1".into()).await?;
    assert_eq!(b.node.store().get("x".into()).await?, "1");

    let violation = c.node.store().get("x".into()).await.unwrap_err();
    assert_eq!(violation.role, Role::Spare);

    Ok(())
}

#[tokio::test]
async fn primary_crash_promotes_backup_and_spare_takes_over_backup() -> Result<(), Box<dyn Error>> {
    let cluster = LocalCluster::new();
    let a = cluster.join(1).await?;
    let b = cluster.join(2).await?;
    let c = cluster.join(3).await?;

    for i in 0..100 {
        a.node.store().put(format!("k{}", i), format!("v{}", i)).await?;
    }

    cluster.crash(&a);

    wait_for_snapshot(&b.node, snapshot(Role::Primary, false)).await;
    wait_for_snapshot(&c.node, snapshot(Role::Backup, false)).await;
    // A spare holds no data until its transfer has completed.
    wait_until(|| c.node.store().len() == 100).await;

    // Data written before the crash survived on the old backup and was transferred on.
    assert_eq!(b.node.store().get("k42".into()).await?, "v42");
    assert_eq!(c.node.store().get("k99".into()).await?, "v99");

    // New writes replicate to the new backup.
    b.node.store().put("after".into(), "crash".into()).await?;
    assert_eq!(c.node.store().get("after".into()).await?, "crash");

    Ok(())
}

#[tokio::test]
async fn lone_backup_becomes_alone_primary() -> Result<(), Box<dyn Error>> {
    let cluster = LocalCluster::new();
    let a = cluster.join(1).await?;
    let b = cluster.join(2).await?;

    cluster.crash(&a);

    wait_for_snapshot(&b.node, snapshot(Role::Primary, true)).await;

    // Alone: writes succeed without anyone to forward to.
    b.node.store().put("k".into(), "v".into()).await?;
    assert_eq!(b.node.store().get("k".into()).await?, "v");

    Ok(())
}

#[tokio::test]
async fn restarted_node_rejoins_as_backup() -> Result<(), Box<dyn Error>> {
    let cluster = LocalCluster::new();
    let a = cluster.join(1).await?;
    let b = cluster.join(2).await?;
    a.node.store().put("k".into(), "v".into()).await?;

    cluster.crash(&b);
    drop(b);
    wait_for_snapshot(&a.node, snapshot(Role::Primary, true)).await;

    // Same address, new process: a fresh spare that must resync.
    let b = cluster.join(2).await?;
    assert_eq!(b.node.role(), Role::Backup);
    assert_eq!(b.node.store().get("k".into()).await?, "v");
    assert!(!a.node.is_alone());

    Ok(())
}

#[tokio::test]
async fn membership_root_must_exist() {
    let ensemble = LocalEnsemble::new();
    let session = Arc::new(ensemble.session());

    let result =
        kvrepl::try_create_local_storage_node(config(1, kvrepl::discard_logger()), session, LocalNetwork::new()).await;

    assert!(matches!(result, Err(NodeCreationError::Coordination(_))));
}

#[tokio::test]
async fn illegal_options_are_rejected() {
    let ensemble = LocalEnsemble::new();
    ensemble.create_root(ROOT);
    let session: Arc<dyn Coordinator> = Arc::new(ensemble.session());

    let mut bad_config = config(1, kvrepl::discard_logger());
    bad_config.options.transfer_batch_size = Some(0);
    let result = kvrepl::try_create_local_storage_node(bad_config, session, LocalNetwork::new()).await;

    assert!(matches!(result, Err(NodeCreationError::IllegalOptions(_))));
    assert!(ensemble.children(ROOT).is_empty());
}

#[tokio::test]
async fn grpc_nodes_replicate_and_reject_spare_requests() -> Result<(), Box<dyn Error>> {
    let ensemble = LocalEnsemble::new();
    ensemble.create_root(ROOT);
    let ports = [47311, 47312, 47313];

    let mut nodes = Vec::with_capacity(ports.len());
    for &port in ports.iter() {
        let session: Arc<dyn Coordinator> = Arc::new(ensemble.session());
        let logger = kvrepl::create_root_logger_for_stdout(format!("127.0.0.1:{}", port));
        let node = kvrepl::try_create_storage_node(config(port, logger), session).await?;
        nodes.push(node);
    }
    assert_eq!(nodes[0].role(), Role::Primary);
    assert_eq!(nodes[1].role(), Role::Backup);
    assert_eq!(nodes[2].role(), Role::Spare);

    let connect = |port: u16| {
        KvRpcClient::connect(
            NodeAddr::new("127.0.0.1", port),
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
    };

    let mut primary = connect(ports[0]).await?;
    primary.put("hello".into(), "world".into()).await??;
    assert_eq!(primary.get("hello".into()).await??, "world");
    assert_eq!(primary.get("absent".into()).await??, "");

    let mut backup = connect(ports[1]).await?;
    assert_eq!(backup.get("hello".into()).await??, "world");

    let mut spare = connect(ports[2]).await?;
    let violation = spare.get("hello".into()).await?.unwrap_err();
    assert_eq!(violation.role, Role::Spare);
    assert!(!spare.ping().await?);
    assert!(primary.ping().await?);

    Ok(())
}

#[tokio::test]
async fn taken_port_is_a_startup_error() -> Result<(), Box<dyn Error>> {
    let ensemble = LocalEnsemble::new();
    ensemble.create_root(ROOT);
    let _squatter = std::net::TcpListener::bind("0.0.0.0:47321")?;

    let session: Arc<dyn Coordinator> = Arc::new(ensemble.session());
    let result = kvrepl::try_create_storage_node(config(47321, kvrepl::discard_logger()), session).await;

    assert!(matches!(result, Err(NodeCreationError::ServerUnavailable(_))));
    assert!(ensemble.children(ROOT).is_empty());
    Ok(())
}

#[tokio::test]
async fn shutdown_stops_the_rpc_server() -> Result<(), Box<dyn Error>> {
    let ensemble = LocalEnsemble::new();
    ensemble.create_root(ROOT);
    let port = 47331;

    let session: Arc<dyn Coordinator> = Arc::new(ensemble.session());
    let node = kvrepl::try_create_storage_node(config(port, kvrepl::discard_logger()), session).await?;
    assert!(tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok());

    node.shutdown();

    timeout(CONVERGENCE_TIMEOUT, async {
        while tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    Ok(())
}
