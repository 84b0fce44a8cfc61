//! Authorization: bearer/context types, policy parsing, role membership, the ownership
//! predicate and the `Authorizer` that combines them behind a decision cache.

mod authorizer;
mod owner;
mod policy;
mod principal;
mod roles;

pub use authorizer::Authorizer;
pub use owner::{owners_role, DocumentSource, Ownership};
pub use policy::{parse_policies, Effect, Policy};
pub use principal::{AuthContext, Bearer, AUTHENTICATED, EVERYONE, OWNER, WILDCARD};
pub use roles::{MemoryRoleStore, RoleManager, RoleStore};
