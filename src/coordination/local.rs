use crate::coordination::api::{child_path, Coordinator, CoordinationError, MembershipWatch, MembershipWatchTrigger};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Prefix of every membership entry name; the ensemble appends a zero-padded sequence number.
const ENTRY_PREFIX: &str = "znode";

type SessionId = u64;

/// LocalEnsemble is an in-process stand-in for a ZooKeeper ensemble. It keeps the semantics the
/// role state machine depends on: ephemeral entries vanish with their session, sequence suffixes
/// strictly increase per parent, and watches fire once.
#[derive(Clone, Default)]
pub struct LocalEnsemble {
    inner: Arc<Mutex<EnsembleState>>,
}

#[derive(Default)]
struct EnsembleState {
    roots: HashMap<String, RootNode>,
    next_session: SessionId,
    unavailable: bool,
}

#[derive(Default)]
struct RootNode {
    next_sequence: u64,
    children: BTreeMap<String, Child>,
    watches: Vec<MembershipWatchTrigger>,
}

struct Child {
    data: Vec<u8>,
    owner: SessionId,
}

impl RootNode {
    fn fire_watches(&mut self) {
        for trigger in self.watches.drain(..) {
            trigger.fire();
        }
    }
}

impl LocalEnsemble {
    pub fn new() -> Self {
        LocalEnsemble::default()
    }

    /// Creates a persistent root path. Idempotent.
    pub fn create_root(&self, root: &str) {
        self.lock().roots.entry(root.to_string()).or_default();
    }

    pub fn session(&self) -> LocalSession {
        let id = {
            let mut state = self.lock();
            state.next_session += 1;
            state.next_session
        };

        LocalSession {
            id,
            ensemble: self.clone(),
            closed: AtomicBool::new(false),
        }
    }

    /// Current children of `root`, sorted by join order.
    pub fn children(&self, root: &str) -> Vec<String> {
        self.lock()
            .roots
            .get(root)
            .map(|r| r.children.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// While unavailable, every session operation fails with `CoordinationError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.lock().unavailable = !available;
    }

    fn expire(&self, session: SessionId) {
        let mut state = self.lock();
        for root in state.roots.values_mut() {
            let before = root.children.len();
            root.children.retain(|_, child| child.owner != session);
            if root.children.len() != before {
                root.fire_watches();
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, EnsembleState> {
        self.inner.lock().expect("LocalEnsemble mutex guard poison")
    }
}

/// LocalSession is one client session with a `LocalEnsemble`. Closing or dropping it removes every
/// ephemeral entry it created.
pub struct LocalSession {
    id: SessionId,
    ensemble: LocalEnsemble,
    closed: AtomicBool,
}

impl LocalSession {
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.ensemble.expire(self.id);
        }
    }

    fn live_state(&self) -> Result<MutexGuard<'_, EnsembleState>, CoordinationError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CoordinationError::Closed);
        }
        let state = self.ensemble.lock();
        if state.unavailable {
            return Err(CoordinationError::Unavailable("ensemble unreachable".to_string()));
        }
        Ok(state)
    }
}

impl Drop for LocalSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait::async_trait]
impl Coordinator for LocalSession {
    async fn register(&self, root: &str, payload: Vec<u8>) -> Result<String, CoordinationError> {
        let mut state = self.live_state()?;
        let root_node = state
            .roots
            .get_mut(root)
            .ok_or_else(|| CoordinationError::MissingRoot(root.to_string()))?;

        root_node.next_sequence += 1;
        let name = format!("{}{:010}", ENTRY_PREFIX, root_node.next_sequence);
        root_node.children.insert(
            name.clone(),
            Child {
                data: payload,
                owner: self.id,
            },
        );
        root_node.fire_watches();

        Ok(name)
    }

    async fn sync(&self, _root: &str) -> Result<(), CoordinationError> {
        // A single in-process replica is always in sync.
        self.live_state().map(|_| ())
    }

    async fn watch_children(&self, root: &str) -> Result<(Vec<String>, MembershipWatch), CoordinationError> {
        let mut state = self.live_state()?;
        let root_node = state
            .roots
            .get_mut(root)
            .ok_or_else(|| CoordinationError::MissingRoot(root.to_string()))?;

        let (trigger, watch) = MembershipWatch::new();
        root_node.watches.push(trigger);

        Ok((root_node.children.keys().cloned().collect(), watch))
    }

    async fn data(&self, root: &str, child: &str) -> Result<Vec<u8>, CoordinationError> {
        let state = self.live_state()?;
        state
            .roots
            .get(root)
            .and_then(|r| r.children.get(child))
            .map(|c| c.data.clone())
            .ok_or_else(|| CoordinationError::NoNode(child_path(root, child)))
    }
}
