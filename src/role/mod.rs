mod actor;
mod identification;
mod membership;
mod role;

pub use actor::RoleActorClient;
pub use actor::WeakRoleActorClient;
pub use role::Role;
pub use role::RoleSnapshot;
pub use role::UnknownRole;

pub(crate) use actor::create as create_role_actor;
pub(crate) use identification::RoleMachine;
pub(crate) use membership::MembershipReader;
