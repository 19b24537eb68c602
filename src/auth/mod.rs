//! Principal identity and the authorization guard.
//!
//! Bearer tokens carry either an agent claim (bound to one tenant and one
//! project) or a user claim (per-project roles resolved from the store).
//! The guard turns a validated principal into a [`crate::store::Scope`];
//! no store call happens without one.

mod claims;
mod rbac;

pub use claims::{Claims, Principal, TokenValidator};
pub use rbac::{Guard, Permission, Role};
