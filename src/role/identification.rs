use crate::coordination::MembershipWatch;
use crate::peer::{NodeAddr, PeerConnector, ProbeOutcome, ProbedPeer};
use crate::role::membership::{MembershipReader, MembershipView};
use crate::role::Role;
use crate::store::ReplicatedStore;
use std::sync::Arc;

/// RoleMachine re-derives this node's role from the ordered membership list and direct probes of
/// the presumptive primary and backup. Passes must not run concurrently; `RoleActor` serializes
/// them.
pub(crate) struct RoleMachine {
    logger: slog::Logger,
    me: NodeAddr,
    store: Arc<ReplicatedStore>,
    connector: Arc<dyn PeerConnector>,
    membership: MembershipReader,
}

impl RoleMachine {
    pub(crate) fn new(
        logger: slog::Logger,
        me: NodeAddr,
        store: Arc<ReplicatedStore>,
        connector: Arc<dyn PeerConnector>,
        membership: MembershipReader,
    ) -> Self {
        RoleMachine {
            logger,
            me,
            store,
            connector,
            membership,
        }
    }

    pub(crate) fn store(&self) -> &Arc<ReplicatedStore> {
        &self.store
    }

    /// `identify()` runs one identification pass and returns the reinstalled membership watch, or
    /// `None` if the coordination session has ended.
    pub(crate) async fn identify(&self) -> Option<MembershipWatch> {
        let (view, watch) = self.membership.fetch().await?;
        self.identify_with(&view).await;
        Some(watch)
    }

    pub(crate) async fn identify_with(&self, view: &MembershipView) {
        let current_role = self.store.role();
        slog::debug!(
            self.logger,
            "Identifying with {} live members as {}",
            view.len(),
            current_role
        );

        if view.len() == 1 {
            self.store.set_role(Role::Primary);
            self.store.set_alone(true);
            return;
        }

        match current_role {
            Role::Primary => { /* Already serving. */ }
            Role::Backup => self.identify_as_backup(view).await,
            Role::Spare => self.identify_as_spare(view).await,
        }
    }

    async fn identify_as_backup(&self, view: &MembershipView) {
        let head = match view.get(0) {
            Some(head) => head,
            None => return,
        };

        if head.addr == self.me {
            slog::info!(self.logger, "Backup is now the oldest member. Taking over as primary.");
            self.store.set_role(Role::Primary);
            return;
        }

        let mut primary = self.open(&head.addr).await;
        match primary.probe().await {
            ProbeOutcome::Reachable => { /* Primary alive. Stay backup. */ }
            outcome => {
                slog::info!(
                    self.logger,
                    "Primary {} probed {:?}. Taking over as primary.",
                    primary.addr(),
                    outcome
                );
                self.store.set_role(Role::Primary);
                // Without a third member nobody can become our backup.
                if view.len() < 3 {
                    self.store.set_alone(true);
                }
            }
        }
    }

    async fn identify_as_spare(&self, view: &MembershipView) {
        let (first, second) = match (view.get(0), view.get(1)) {
            (Some(first), Some(second)) => (first, second),
            _ => return,
        };

        if view.len() == 2 {
            let mut primary = self.open(&first.addr).await;
            match primary.probe().await {
                ProbeOutcome::Reachable => {
                    self.store.set_role(Role::Backup);
                    self.request_data_transfer(&mut primary).await;
                }
                ProbeOutcome::Unreachable | ProbeOutcome::Ineligible => {
                    slog::info!(self.logger, "No eligible primary at {}. Becoming primary.", first.addr);
                    self.store.set_role(Role::Primary);
                    self.store.set_alone(true);
                }
            }
            return;
        }

        // Three or more members: the first two are the presumptive primary and backup. Both
        // checks run independently, so a single pass can request two transfers.
        let mut primary = self.open(&first.addr).await;
        let mut backup = self.open(&second.addr).await;

        match primary.probe().await {
            ProbeOutcome::Reachable => {}
            outcome => {
                slog::info!(self.logger, "Primary {} probed {:?}. Becoming backup.", first.addr, outcome);
                self.store.set_role(Role::Backup);
                self.request_data_transfer(&mut backup).await;
            }
        }

        match backup.probe().await {
            ProbeOutcome::Reachable => {}
            outcome => {
                slog::info!(self.logger, "Backup {} probed {:?}. Becoming backup.", second.addr, outcome);
                self.store.set_role(Role::Backup);
                self.request_data_transfer(&mut primary).await;
            }
        }
    }

    async fn open(&self, addr: &NodeAddr) -> ProbedPeer {
        ProbedPeer::open(&self.logger, &*self.connector, addr.clone()).await
    }

    async fn request_data_transfer(&self, source: &mut ProbedPeer) {
        slog::info!(self.logger, "Requesting full data transfer from {}", source.addr());
        if let Err(e) = source.request_data_transfer(&self.me).await {
            slog::warn!(self.logger, "Data transfer from {} failed: {}", source.addr(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{Coordinator, LocalEnsemble, LocalSession};
    use crate::logging;
    use crate::peer::LocalNetwork;
    use crate::pool::ConnectionPool;
    use crate::role::RoleSnapshot;
    use crate::store::KeyValueService;
    use tokio::time::Duration;

    const ROOT: &str = "/kv";

    struct TestNode {
        addr: NodeAddr,
        session: Arc<LocalSession>,
        machine: RoleMachine,
    }

    impl TestNode {
        fn snapshot(&self) -> RoleSnapshot {
            self.machine.store().role_snapshot()
        }

        async fn identify(&self) {
            self.machine.identify().await.expect("session should be open");
        }
    }

    async fn join(ensemble: &LocalEnsemble, network: &LocalNetwork, port: u16) -> TestNode {
        let logger = logging::discard_logger();
        let addr = NodeAddr::new("127.0.0.1", port);
        let pool = ConnectionPool::new(logger.clone(), Arc::new(network.clone()), 4);
        let store = Arc::new(ReplicatedStore::new(logger.clone(), pool, 100_000));
        network.register(addr.clone(), &store);

        let session = Arc::new(ensemble.session());
        session.register(ROOT, addr.to_string().into_bytes()).await.unwrap();

        let membership = MembershipReader::new(
            logger.clone(),
            session.clone(),
            ROOT.to_string(),
            Duration::from_millis(10),
        );
        let machine = RoleMachine::new(logger, addr.clone(), store, Arc::new(network.clone()), membership);

        TestNode { addr, session, machine }
    }

    fn setup() -> (LocalEnsemble, LocalNetwork) {
        let ensemble = LocalEnsemble::new();
        ensemble.create_root(ROOT);
        (ensemble, LocalNetwork::new())
    }

    fn crash(network: &LocalNetwork, node: &TestNode) {
        network.set_down(&node.addr, true);
        node.session.close();
    }

    fn snapshot(role: Role, alone: bool) -> RoleSnapshot {
        RoleSnapshot { role, alone }
    }

    #[tokio::test]
    async fn single_member_becomes_alone_primary() {
        let (ensemble, network) = setup();
        let a = join(&ensemble, &network, 1).await;

        a.identify().await;

        assert_eq!(a.snapshot(), snapshot(Role::Primary, true));
    }

    #[tokio::test]
    async fn second_member_becomes_backup_and_receives_data() {
        let (ensemble, network) = setup();
        let a = join(&ensemble, &network, 1).await;
        a.identify().await;
        a.machine.store().put("k".into(), "v".into()).await.unwrap();

        let b = join(&ensemble, &network, 2).await;
        b.identify().await;

        assert_eq!(b.snapshot(), snapshot(Role::Backup, false));
        assert_eq!(a.snapshot(), snapshot(Role::Primary, false));
        assert_eq!(b.machine.store().get("k".into()).await.unwrap(), "v");

        // Primary keeps its role on the next notification.
        a.identify().await;
        assert_eq!(a.snapshot().role, Role::Primary);
    }

    #[tokio::test]
    async fn spare_promotes_to_alone_primary_when_head_is_unreachable() {
        let (ensemble, network) = setup();
        let a = join(&ensemble, &network, 1).await;
        a.identify().await;
        // A is listed but no longer answers.
        network.set_down(&a.addr, true);

        let b = join(&ensemble, &network, 2).await;
        b.identify().await;

        assert_eq!(b.snapshot(), snapshot(Role::Primary, true));
    }

    #[tokio::test]
    async fn spare_promotes_when_head_is_ineligible() {
        let (ensemble, network) = setup();
        // Registered but never identified: still a spare, so its ping answers false.
        let a = join(&ensemble, &network, 1).await;
        let b = join(&ensemble, &network, 2).await;

        b.identify().await;

        assert_eq!(b.snapshot(), snapshot(Role::Primary, true));
        assert_eq!(a.snapshot().role, Role::Spare);
    }

    #[tokio::test]
    async fn backup_with_two_members_promotes_alone() {
        let (ensemble, network) = setup();
        let a = join(&ensemble, &network, 1).await;
        a.identify().await;
        let b = join(&ensemble, &network, 2).await;
        b.identify().await;
        assert_eq!(b.snapshot().role, Role::Backup);

        // Still listed, not answering.
        network.set_down(&a.addr, true);
        b.identify().await;

        assert_eq!(b.snapshot(), snapshot(Role::Primary, true));
    }

    #[tokio::test]
    async fn backup_with_three_members_promotes_without_alone() {
        let (ensemble, network) = setup();
        let a = join(&ensemble, &network, 1).await;
        a.identify().await;
        let b = join(&ensemble, &network, 2).await;
        b.identify().await;
        let c = join(&ensemble, &network, 3).await;
        c.identify().await;
        assert_eq!(c.snapshot().role, Role::Spare);

        network.set_down(&a.addr, true);
        b.identify().await;

        assert_eq!(b.snapshot(), snapshot(Role::Primary, false));
    }

    #[tokio::test]
    async fn backup_at_head_takes_over_after_primary_leaves() {
        let (ensemble, network) = setup();
        let a = join(&ensemble, &network, 1).await;
        a.identify().await;
        let b = join(&ensemble, &network, 2).await;
        b.identify().await;
        let c = join(&ensemble, &network, 3).await;
        c.identify().await;

        crash(&network, &a);
        b.identify().await;
        assert_eq!(b.snapshot().role, Role::Primary);

        c.identify().await;
        assert_eq!(c.snapshot().role, Role::Backup);
        assert_eq!(b.snapshot(), snapshot(Role::Primary, false));
    }

    #[tokio::test]
    async fn spare_replaces_a_dead_backup_in_three_member_view() {
        let (ensemble, network) = setup();
        let a = join(&ensemble, &network, 1).await;
        a.identify().await;
        a.machine.store().put("before".into(), "1".into()).await.unwrap();
        let b = join(&ensemble, &network, 2).await;
        b.identify().await;
        let c = join(&ensemble, &network, 3).await;
        c.identify().await;

        // B still listed but unreachable: C takes the backup slot and syncs from A.
        network.set_down(&b.addr, true);
        c.identify().await;

        assert_eq!(c.snapshot().role, Role::Backup);
        assert_eq!(c.machine.store().get("before".into()).await.unwrap(), "1");
        assert!(!a.snapshot().alone);

        a.machine.store().put("after".into(), "2".into()).await.unwrap();
        assert_eq!(c.machine.store().get("after".into()).await.unwrap(), "2");
    }

    #[tokio::test]
    async fn spare_syncs_from_backup_when_listed_primary_is_unreachable() {
        let (ensemble, network) = setup();
        let a = join(&ensemble, &network, 1).await;
        a.identify().await;
        a.machine.store().put("k".into(), "v".into()).await.unwrap();
        let b = join(&ensemble, &network, 2).await;
        b.identify().await;
        let c = join(&ensemble, &network, 3).await;
        b.machine.store().set_alone(true);

        // A stays listed but no longer answers.
        network.set_down(&a.addr, true);
        c.identify().await;

        assert_eq!(c.snapshot().role, Role::Backup);
        assert_eq!(c.machine.store().get("k".into()).await.unwrap(), "v");
        // The transfer came from B, which now forwards to C.
        assert!(!b.snapshot().alone);
        b.machine.store().put("from-b".into(), "1".into()).await.unwrap();
        assert_eq!(c.machine.store().get("from-b".into()).await.unwrap(), "1");
    }

    #[tokio::test]
    async fn spare_requests_two_transfers_when_both_heads_are_ineligible() {
        let (ensemble, network) = setup();
        // Never identified: both answer pings but report themselves as spares.
        let a = join(&ensemble, &network, 1).await;
        let b = join(&ensemble, &network, 2).await;
        let c = join(&ensemble, &network, 3).await;
        a.machine.store().set_map(vec!["from-a".into()], vec!["1".into()]).await;
        b.machine.store().set_map(vec!["from-b".into()], vec!["2".into()]).await;
        a.machine.store().set_alone(true);
        b.machine.store().set_alone(true);

        c.identify().await;

        assert_eq!(c.snapshot().role, Role::Backup);
        assert!(!a.snapshot().alone);
        assert!(!b.snapshot().alone);
        assert_eq!(c.machine.store().get("from-a".into()).await.unwrap(), "1");
        assert_eq!(c.machine.store().get("from-b".into()).await.unwrap(), "2");
    }

    #[tokio::test]
    async fn spare_becomes_backup_even_when_both_heads_are_unreachable() {
        let (ensemble, network) = setup();
        let a = join(&ensemble, &network, 1).await;
        a.identify().await;
        let b = join(&ensemble, &network, 2).await;
        b.identify().await;
        let c = join(&ensemble, &network, 3).await;

        network.set_down(&a.addr, true);
        network.set_down(&b.addr, true);
        c.identify().await;

        // Both transfers fail; the next membership change sorts it out.
        assert_eq!(c.snapshot(), snapshot(Role::Backup, false));
        assert_eq!(c.machine.store().len(), 0);
    }

    #[tokio::test]
    async fn identify_ends_when_session_is_closed() {
        let (ensemble, network) = setup();
        let a = join(&ensemble, &network, 1).await;
        a.session.close();

        assert!(a.machine.identify().await.is_none());
    }
}
