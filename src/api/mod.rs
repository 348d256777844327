//! This mod holds the library's client-facing API: configuration, wiring, and the node handle.
mod node;
mod options;
mod wiring;

pub use node::StorageNode;
pub use options::NodeOptions;
pub use wiring::try_create_local_storage_node;
pub use wiring::try_create_storage_node;
pub use wiring::NodeCreationError;
pub use wiring::StorageNodeConfig;
