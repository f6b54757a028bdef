//! Role resolution: one profile point-lookup per identity plus the pure
//! role-membership check consumed by the route gate.

use tracing::error;

use crate::error::{AppError, AppResult};

use super::profile::Profile;
use super::provider::IdentityProvider;
use super::role::Role;

/// Fetch exactly one Profile for the given identity id.
///
/// Zero rows means the identity is not yet provisioned (a fresh sign-up whose
/// profile trigger has not run) and maps to a not-found error. More than one
/// row is a backend data bug and is reported as a distinct integrity error.
pub async fn resolve_profile(provider: &dyn IdentityProvider, identity_id: &str) -> AppResult<Profile> {
    let mut rows = provider.fetch_profiles(identity_id).await?;
    match rows.len() {
        0 => Err(AppError::not_found(
            "profile_not_provisioned".to_string(),
            format!("no profile row for identity {}", identity_id),
        )),
        1 => Ok(rows.remove(0)),
        n => {
            error!(identity_id, rows = n, "duplicate profile rows for one identity");
            Err(AppError::integrity(
                "duplicate_profiles".to_string(),
                format!("{} profile rows for identity {}", n, identity_id),
            ))
        }
    }
}

/// True iff a profile is present and its role is in the required set.
/// An absent or empty requirement means any authenticated role passes.
pub fn has_role(profile: Option<&Profile>, required: Option<&[Role]>) -> bool {
    let Some(profile) = profile else { return false; };
    match required {
        None => true,
        Some(roles) if roles.is_empty() => true,
        Some(roles) => roles.contains(&profile.role),
    }
}
