//! ZooKeeper-backed `Coordinator`, enabled with the `zookeeper` feature.

use crate::coordination::api::{child_path, Coordinator, CoordinationError, MembershipWatch};
use std::net::SocketAddr;
use tokio_zookeeper::{error as zk_error, Acl, CreateMode, ZooKeeper};

/// Name prefix of membership entries; ZooKeeper appends the sequence suffix.
const ENTRY_PREFIX: &str = "znode";

pub struct ZooKeeperCoordinator {
    logger: slog::Logger,
    session: ZooKeeper,
}

impl ZooKeeperCoordinator {
    /// Connects to the first reachable server listed in `connect_string`
    /// (`host:port[,host:port...]`).
    pub async fn connect(logger: slog::Logger, connect_string: &str) -> Result<Self, CoordinationError> {
        let mut last_error = CoordinationError::Unavailable(format!("empty connect string '{}'", connect_string));

        for server in connect_string.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let addrs: Vec<SocketAddr> = match tokio::net::lookup_host(server).await {
                Ok(addrs) => addrs.collect(),
                Err(e) => {
                    last_error = CoordinationError::Unavailable(format!("cannot resolve '{}': {}", server, e));
                    continue;
                }
            };

            for addr in addrs {
                match ZooKeeper::connect(&addr).await {
                    Ok((session, _default_watcher)) => {
                        slog::info!(logger, "Connected to ZooKeeper at {}", addr);
                        return Ok(ZooKeeperCoordinator { logger, session });
                    }
                    Err(e) => {
                        slog::warn!(logger, "Failed to connect to ZooKeeper at {}: {:?}", addr, e);
                        last_error = CoordinationError::Unavailable(format!("{:?}", e));
                    }
                }
            }
        }

        Err(last_error)
    }
}

fn unavailable<E: std::fmt::Debug>(e: E) -> CoordinationError {
    CoordinationError::Unavailable(format!("{:?}", e))
}

#[async_trait::async_trait]
impl Coordinator for ZooKeeperCoordinator {
    async fn register(&self, root: &str, payload: Vec<u8>) -> Result<String, CoordinationError> {
        let path = child_path(root, ENTRY_PREFIX);
        let created = self
            .session
            .create(&path, payload, Acl::open_unsafe(), CreateMode::EphemeralSequential)
            .await
            .map_err(unavailable)?;

        match created {
            Ok(full_path) => Ok(full_path.rsplit('/').next().unwrap_or_default().to_string()),
            Err(zk_error::Create::NoNode) => Err(CoordinationError::MissingRoot(root.to_string())),
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn sync(&self, root: &str) -> Result<(), CoordinationError> {
        // The client library has no `sync` request. Reads go to the connected server, so the
        // root's existence check below is as fresh as this session's view.
        match self.session.exists(root).await.map_err(unavailable)? {
            Some(_) => Ok(()),
            None => Err(CoordinationError::MissingRoot(root.to_string())),
        }
    }

    async fn watch_children(&self, root: &str) -> Result<(Vec<String>, MembershipWatch), CoordinationError> {
        let listed = self
            .session
            .with_watcher()
            .get_children(root)
            .await
            .map_err(unavailable)?;

        let (children, zk_watch) = listed.ok_or_else(|| CoordinationError::MissingRoot(root.to_string()))?;

        let (trigger, watch) = MembershipWatch::new();
        let logger = self.logger.clone();
        tokio::spawn(async move {
            match zk_watch.await {
                Ok(event) => {
                    slog::debug!(logger, "ZooKeeper watch fired: {:?}", event);
                    trigger.fire();
                }
                // Session gone: dropping the trigger tells the watcher it will never fire.
                Err(_) => {}
            }
        });

        Ok((children, watch))
    }

    async fn data(&self, root: &str, child: &str) -> Result<Vec<u8>, CoordinationError> {
        let path = child_path(root, child);
        match self.session.get_data(&path).await.map_err(unavailable)? {
            Some((data, _stat)) => Ok(data),
            None => Err(CoordinationError::NoNode(path)),
        }
    }
}
