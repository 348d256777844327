mod api;
mod local;
#[cfg(feature = "zookeeper")]
mod zookeeper;

pub use api::Coordinator;
pub use api::CoordinationError;
pub use api::MembershipWatch;
pub use api::MembershipWatchTrigger;
pub use local::LocalEnsemble;
pub use local::LocalSession;
#[cfg(feature = "zookeeper")]
pub use zookeeper::ZooKeeperCoordinator;
