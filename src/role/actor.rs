use crate::coordination::MembershipWatch;
use crate::role::identification::RoleMachine;
use crate::role::RoleSnapshot;
use tokio::sync::{mpsc, oneshot};

pub(crate) fn create(
    logger: slog::Logger,
    buffer_size: usize,
    machine: RoleMachine,
) -> (RoleActorClient, RoleActor) {
    let (tx, rx) = mpsc::channel(buffer_size);
    let client = RoleActorClient { sender: tx };
    let actor = RoleActor {
        logger,
        receiver: rx,
        machine,
        weak_self: client.weak(),
        watch_pending: false,
    };

    (client, actor)
}

#[derive(Debug)]
enum Event {
    // Run a pass now and report the resulting role. Used for the initial identification.
    Identify(oneshot::Sender<Option<RoleSnapshot>>),

    // The membership watch fired.
    MembershipChanged,
}

/// RoleActorClient submits identification passes to the node's single `RoleActor`, which runs them
/// one at a time.
#[derive(Clone)]
pub struct RoleActorClient {
    sender: mpsc::Sender<Event>,
}

impl RoleActorClient {
    /// Runs an identification pass and returns the resulting role, or `None` if the actor has
    /// stopped because its coordination session ended.
    pub async fn identify(&self) -> Option<RoleSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.sender.send(Event::Identify(tx)).await.ok()?;
        rx.await.ok().flatten()
    }

    pub(crate) async fn membership_changed(&self) -> bool {
        self.sender.send(Event::MembershipChanged).await.is_ok()
    }

    pub fn weak(&self) -> WeakRoleActorClient {
        WeakRoleActorClient {
            sender: self.sender.downgrade(),
        }
    }
}

/// A handle that does not keep the actor alive. Watch forwarders hold one of these so a node that
/// shuts down is not resurrected by a late notification.
#[derive(Clone)]
pub struct WeakRoleActorClient {
    sender: mpsc::WeakSender<Event>,
}

impl WeakRoleActorClient {
    pub fn upgrade(&self) -> Option<RoleActorClient> {
        self.sender.upgrade().map(|sender| RoleActorClient { sender })
    }
}

/// RoleActor owns the role state machine and serializes identification passes.
pub(crate) struct RoleActor {
    logger: slog::Logger,
    receiver: mpsc::Receiver<Event>,
    machine: RoleMachine,
    weak_self: WeakRoleActorClient,
    // A forwarder is waiting on a watch from an earlier pass. That watch covers every change
    // after it was installed, so passes in between don't need their own.
    watch_pending: bool,
}

impl RoleActor {
    pub(crate) async fn run_event_loop(mut self) {
        while let Some(event) = self.receiver.recv().await {
            if let Event::MembershipChanged = event {
                self.watch_pending = false;
            }

            let snapshot = match self.machine.identify().await {
                Some(watch) => {
                    if !self.watch_pending {
                        self.forward_next_change(watch);
                        self.watch_pending = true;
                    }
                    Some(self.machine.store().role_snapshot())
                }
                None => None,
            };

            if let Event::Identify(callback) = event {
                let _ = callback.send(snapshot);
            }

            if snapshot.is_none() {
                slog::info!(self.logger, "Coordination session closed. Role actor exiting.");
                return;
            }
        }
        slog::debug!(self.logger, "All role actor clients dropped. Exiting.");
    }

    // Watches are one-shot: this task turns the firing into the next pass, which installs the
    // next watch. A watch that can never fire also triggers a pass, so the loop either reinstalls
    // it or learns that the session is gone.
    fn forward_next_change(&self, watch: MembershipWatch) {
        let client = self.weak_self.clone();
        let logger = self.logger.clone();
        tokio::task::spawn(async move {
            if !watch.changed().await {
                slog::debug!(logger, "Membership watch dropped without firing");
            }
            match client.upgrade() {
                Some(client) => {
                    if !client.membership_changed().await {
                        slog::debug!(logger, "Role actor gone before membership change was delivered");
                    }
                }
                None => slog::debug!(logger, "Dropping membership change for stopped node"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{CoordinationError, Coordinator, LocalEnsemble, LocalSession, MembershipWatch};
    use crate::logging;
    use crate::peer::{LocalNetwork, NodeAddr};
    use crate::pool::ConnectionPool;
    use crate::role::membership::MembershipReader;
    use crate::role::Role;
    use crate::store::ReplicatedStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::{timeout, Duration};

    const ROOT: &str = "/kv";

    /// Counts how many membership listings, i.e. identification passes, a node performs.
    struct CountingCoordinator {
        session: Arc<LocalSession>,
        listings: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Coordinator for CountingCoordinator {
        async fn register(&self, root: &str, payload: Vec<u8>) -> Result<String, CoordinationError> {
            self.session.register(root, payload).await
        }

        async fn sync(&self, root: &str) -> Result<(), CoordinationError> {
            self.session.sync(root).await
        }

        async fn watch_children(&self, root: &str) -> Result<(Vec<String>, MembershipWatch), CoordinationError> {
            self.listings.fetch_add(1, Ordering::SeqCst);
            self.session.watch_children(root).await
        }

        async fn data(&self, root: &str, child: &str) -> Result<Vec<u8>, CoordinationError> {
            self.session.data(root, child).await
        }
    }

    fn store(network: &LocalNetwork, addr: &NodeAddr) -> Arc<ReplicatedStore> {
        let logger = logging::discard_logger();
        let pool = ConnectionPool::new(logger.clone(), Arc::new(network.clone()), 2);
        let store = Arc::new(ReplicatedStore::new(logger, pool, 10));
        network.register(addr.clone(), &store);
        store
    }

    async fn spawn_actor(
        ensemble: &LocalEnsemble,
        network: &LocalNetwork,
        addr: NodeAddr,
        store: Arc<ReplicatedStore>,
    ) -> (Arc<LocalSession>, RoleActorClient, tokio::task::JoinHandle<()>) {
        let logger = logging::discard_logger();
        let session = Arc::new(ensemble.session());
        session.register(ROOT, addr.to_string().into_bytes()).await.unwrap();

        let membership =
            MembershipReader::new(logger.clone(), session.clone(), ROOT.to_string(), Duration::from_millis(10));
        let machine = RoleMachine::new(logger.clone(), addr, store, Arc::new(network.clone()), membership);
        let (client, actor) = create(logger, 8, machine);
        let handle = tokio::task::spawn(actor.run_event_loop());

        (session, client, handle)
    }

    #[tokio::test]
    async fn membership_change_triggers_a_new_pass() {
        let ensemble = LocalEnsemble::new();
        ensemble.create_root(ROOT);
        let network = LocalNetwork::new();

        // An older member that already acts as primary.
        let primary_addr = NodeAddr::new("127.0.0.1", 1);
        let primary = store(&network, &primary_addr);
        primary.set_role(Role::Primary);
        let primary_session = ensemble.session();
        primary_session
            .register(ROOT, primary_addr.to_string().into_bytes())
            .await
            .unwrap();

        let addr = NodeAddr::new("127.0.0.1", 2);
        let backup = store(&network, &addr);
        let (_session, client, _handle) = spawn_actor(&ensemble, &network, addr, backup.clone()).await;

        let snapshot = client.identify().await.unwrap();
        assert_eq!(snapshot.role, Role::Backup);

        // No explicit identify: the membership watch must drive the takeover.
        let mut listener = backup.role_listener();
        primary_session.close();
        let snapshot = timeout(Duration::from_secs(1), listener.wait_for(|s| s.role == Role::Primary))
            .await
            .unwrap()
            .unwrap();
        assert!(snapshot.alone);
    }

    #[tokio::test]
    async fn actor_stops_when_session_closes() {
        let ensemble = LocalEnsemble::new();
        ensemble.create_root(ROOT);
        let network = LocalNetwork::new();

        let addr = NodeAddr::new("127.0.0.1", 1);
        let store = store(&network, &addr);
        let (session, client, handle) = spawn_actor(&ensemble, &network, addr, store).await;
        assert!(client.identify().await.is_some());

        session.close();
        assert!(client.identify().await.is_none());
        timeout(Duration::from_millis(500), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn repeated_identify_keeps_a_single_watch_forwarder() {
        let ensemble = LocalEnsemble::new();
        ensemble.create_root(ROOT);
        let network = LocalNetwork::new();
        let logger = logging::discard_logger();

        let addr = NodeAddr::new("127.0.0.1", 1);
        let store = store(&network, &addr);
        let coordinator = Arc::new(CountingCoordinator {
            session: Arc::new(ensemble.session()),
            listings: AtomicUsize::new(0),
        });
        coordinator.register(ROOT, addr.to_string().into_bytes()).await.unwrap();

        let membership =
            MembershipReader::new(logger.clone(), coordinator.clone(), ROOT.to_string(), Duration::from_millis(10));
        let machine = RoleMachine::new(logger.clone(), addr, store, Arc::new(network), membership);
        let (client, actor) = create(logger, 8, machine);
        tokio::task::spawn(actor.run_event_loop());

        for _ in 0..3 {
            client.identify().await.unwrap();
        }
        assert_eq!(coordinator.listings.load(Ordering::SeqCst), 3);

        // One change, one extra pass.
        let other = ensemble.session();
        other.register(ROOT, b"127.0.0.1:2".to_vec()).await.unwrap();
        timeout(Duration::from_secs(1), async {
            while coordinator.listings.load(Ordering::SeqCst) < 4 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(coordinator.listings.load(Ordering::SeqCst), 4);
    }
}
