use tokio::sync::oneshot;

/// Coordinator is the slice of a ZooKeeper-style ensemble a storage node uses: ephemeral-sequential
/// registration, children listing with a one-shot watch, data reads, and `sync`.
#[async_trait::async_trait]
pub trait Coordinator: Send + Sync + 'static {
    /// Creates an ephemeral-sequential child of `root` carrying `payload` and returns the child's
    /// name (without the root prefix). The entry disappears when this session ends.
    async fn register(&self, root: &str, payload: Vec<u8>) -> Result<String, CoordinationError>;

    /// Brings this session's view of `root` up to date with the ensemble leader.
    async fn sync(&self, root: &str) -> Result<(), CoordinationError>;

    /// Lists the children of `root` and installs a watch that fires once on the next change. The
    /// watch has to be reinstalled by calling this again.
    async fn watch_children(&self, root: &str) -> Result<(Vec<String>, MembershipWatch), CoordinationError>;

    async fn data(&self, root: &str, child: &str) -> Result<Vec<u8>, CoordinationError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CoordinationError {
    #[error("Coordination service unavailable: {0}")]
    Unavailable(String),
    #[error("Root path '{0}' does not exist")]
    MissingRoot(String),
    #[error("Node '{0}' does not exist")]
    NoNode(String),
    #[error("Coordination session is closed")]
    Closed,
}

/// MembershipWatch resolves once after the watched children list changes.
pub struct MembershipWatch {
    rx: oneshot::Receiver<()>,
}

impl MembershipWatch {
    pub fn new() -> (MembershipWatchTrigger, MembershipWatch) {
        let (tx, rx) = oneshot::channel();
        (MembershipWatchTrigger { tx }, MembershipWatch { rx })
    }

    /// Returns false if the watch can never fire, e.g. the session ended.
    pub async fn changed(self) -> bool {
        self.rx.await.is_ok()
    }
}

pub struct MembershipWatchTrigger {
    tx: oneshot::Sender<()>,
}

impl MembershipWatchTrigger {
    pub fn fire(self) {
        let _ = self.tx.send(());
    }
}

pub(crate) fn child_path(root: &str, child: &str) -> String {
    format!("{}/{}", root.trim_end_matches('/'), child)
}
