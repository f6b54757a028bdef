//! Central identity and session management for the HR portal.
//! Keep the public surface thin and split implementation across sub-modules.

mod role;
mod profile;
mod provider;
mod session;
mod resolver;
mod gate;

pub use role::Role;
pub use profile::{Identity, Profile};
pub use provider::{AuthEvent, AuthEventKind, IdentityProvider, LocalIdentityProvider, SignUpMeta};
pub use session::{Session, SessionStore};
pub use resolver::{has_role, resolve_profile};
pub use gate::{evaluate, GateDecision, RouteClaim, RouteTable};
