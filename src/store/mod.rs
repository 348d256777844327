mod maps;
mod node_state;
mod replicated_store;
mod service;
mod transfer;

pub use node_state::RoleListener;
pub use replicated_store::ReplicatedStore;
pub use service::DataTransferError;
pub use service::DataTransferSummary;
pub use service::KeyValueService;
pub use service::RoleViolation;
