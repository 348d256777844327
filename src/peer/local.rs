use crate::peer::{NodeAddr, PeerConnection, PeerConnector, PeerError};
use crate::store::KeyValueService;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

/// LocalNetwork connects storage nodes living in one process without any sockets. Nodes are
/// reachable by address while registered, alive, and not marked down, which lets tests cut a node
/// off exactly when they want to.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    inner: Arc<NetworkInner>,
}

#[derive(Default)]
struct NetworkInner {
    nodes: Mutex<HashMap<NodeAddr, Weak<dyn KeyValueService>>>,
    down: Mutex<HashSet<NodeAddr>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        LocalNetwork::default()
    }

    pub fn register<S: KeyValueService>(&self, addr: NodeAddr, service: &Arc<S>) {
        let weak: Weak<dyn KeyValueService> = Arc::downgrade(service) as Weak<dyn KeyValueService>;
        self.inner
            .nodes
            .lock()
            .expect("LocalNetwork nodes mutex guard poison")
            .insert(addr.clone(), weak);
        self.set_down(&addr, false);
    }

    /// Marks `addr` (un)reachable. Connections already open to it fail from now on.
    pub fn set_down(&self, addr: &NodeAddr, down: bool) {
        let mut down_set = self.inner.down.lock().expect("LocalNetwork down mutex guard poison");
        if down {
            down_set.insert(addr.clone());
        } else {
            down_set.remove(addr);
        }
    }

    fn service(&self, addr: &NodeAddr) -> Result<Arc<dyn KeyValueService>, PeerError> {
        if self
            .inner
            .down
            .lock()
            .expect("LocalNetwork down mutex guard poison")
            .contains(addr)
        {
            return Err(PeerError::NodeDown(addr.clone()));
        }

        self.inner
            .nodes
            .lock()
            .expect("LocalNetwork nodes mutex guard poison")
            .get(addr)
            .and_then(Weak::upgrade)
            .ok_or_else(|| PeerError::NodeDown(addr.clone()))
    }
}

#[async_trait::async_trait]
impl PeerConnector for LocalNetwork {
    async fn connect(&self, addr: &NodeAddr) -> Result<Box<dyn PeerConnection>, PeerError> {
        self.service(addr).map_err(|_| PeerError::Connect {
            addr: addr.clone(),
            message: "connection refused".to_string(),
        })?;

        Ok(Box::new(LocalConnection {
            addr: addr.clone(),
            network: self.clone(),
        }))
    }
}

struct LocalConnection {
    addr: NodeAddr,
    network: LocalNetwork,
}

#[async_trait::async_trait]
impl PeerConnection for LocalConnection {
    fn addr(&self) -> &NodeAddr {
        &self.addr
    }

    async fn ping(&mut self) -> Result<bool, PeerError> {
        let service = self.network.service(&self.addr)?;
        Ok(service.ping().await)
    }

    async fn forward_request(&mut self, key: String, value: String, sequence: u64) -> Result<(), PeerError> {
        let service = self.network.service(&self.addr)?;
        service.forward_request(key, value, sequence).await;
        Ok(())
    }

    async fn complete_data_transfer(&mut self, target: NodeAddr) -> Result<(), PeerError> {
        let service = self.network.service(&self.addr)?;
        service
            .complete_data_transfer(target)
            .await
            .map(|_| ())
            .map_err(|e| PeerError::RemoteFault(e.to_string()))
    }

    async fn set_map(&mut self, keys: Vec<String>, values: Vec<String>) -> Result<(), PeerError> {
        let service = self.network.service(&self.addr)?;
        service.set_map(keys, values).await;
        Ok(())
    }
}
