//! Route gate: the decision function consulted before rendering any protected
//! view, plus the declarative route table it draws its required-role sets from.
//! The gate holds no state of its own; it is a pure function of
//! (Session, RouteClaim) recomputed on every session change and navigation.

use serde::Serialize;

use super::resolver::has_role;
use super::role::Role;
use super::session::Session;

/// Per-navigation value derived from the route table. `required_roles = None`
/// means the mount accepts any authenticated role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteClaim {
    pub requested_path: String,
    pub required_roles: Option<Vec<Role>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    /// Session still loading; render a loading indicator, no redirect.
    Pending,
    /// Redirect to login, preserving the originally requested path.
    Unauthenticated { return_to: String },
    /// Authenticated but no profile, or role not in the required set.
    Forbidden,
    Authorized,
}

/// Evaluate the gate for one navigation. Deterministic for a fixed input pair.
pub fn evaluate(session: &Session, claim: &RouteClaim) -> GateDecision {
    if session.is_loading {
        return GateDecision::Pending;
    }
    if session.identity.is_none() {
        return GateDecision::Unauthenticated { return_to: claim.requested_path.clone() };
    }
    if has_role(session.profile.as_ref(), claim.required_roles.as_deref()) {
        GateDecision::Authorized
    } else {
        GateDecision::Forbidden
    }
}

#[derive(Debug, Clone)]
struct RouteRule {
    prefix: String,
    required_roles: Option<Vec<Role>>,
}

/// Declarative route table mapping path prefixes to required role sets.
/// Longest matching prefix wins; paths with no matching rule are public.
/// The same logical view may be mounted under several role prefixes with a
/// different required set per mount (goals, feedback, assessments...).
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount a protected prefix. An empty role slice means any authenticated
    /// role passes.
    pub fn protect(mut self, prefix: &str, roles: &[Role]) -> Self {
        self.rules.push(RouteRule {
            prefix: prefix.trim_end_matches('/').to_string(),
            required_roles: Some(roles.to_vec()),
        });
        self
    }

    /// Mount a protected prefix with no role restriction at all (any
    /// authenticated user).
    pub fn protect_any(mut self, prefix: &str) -> Self {
        self.rules.push(RouteRule {
            prefix: prefix.trim_end_matches('/').to_string(),
            required_roles: None,
        });
        self
    }

    /// Derive the claim for a navigation. `None` means the path is public.
    pub fn claim_for(&self, path: &str) -> Option<RouteClaim> {
        let normalized = if path.starts_with('/') { path.to_string() } else { format!("/{}", path) };
        let mut best: Option<&RouteRule> = None;
        for rule in &self.rules {
            if !prefix_matches(&rule.prefix, &normalized) {
                continue;
            }
            match best {
                Some(b) if b.prefix.len() >= rule.prefix.len() => {}
                _ => best = Some(rule),
            }
        }
        best.map(|rule| RouteClaim {
            requested_path: normalized,
            required_roles: rule.required_roles.clone(),
        })
    }

    /// The portal's route table: three mutually exclusive role trees, with
    /// shared views (goals, feedback, assessments, notifications, settings,
    /// performance) mounted per role prefix.
    pub fn portal() -> Self {
        let mut table = Self::new();
        for view in ["dashboard", "employees", "managers", "departments", "leaves", "goals",
                     "feedback", "salary", "users", "assessments", "team-performance",
                     "notifications", "settings"] {
            table = table.protect(&format!("/hr/{}", view), &[Role::Hr]);
        }
        for view in ["dashboard", "goals", "feedback", "team-performance", "my-performance",
                     "leave-request", "assessments", "notifications", "settings"] {
            table = table.protect(&format!("/manager/{}", view), &[Role::Manager]);
        }
        for view in ["dashboard", "goals", "feedback", "my-performance", "leave-request",
                     "assessments", "notifications", "settings"] {
            table = table.protect(&format!("/employee/{}", view), &[Role::Employee]);
        }
        table
    }
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix.is_empty() {
        return false;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Identity, Profile};
    use chrono::Utc;

    fn identity() -> Identity {
        let now = Utc::now();
        Identity {
            id: "i1".into(),
            email: "t@example.com".into(),
            access_token: "tok".into(),
            issued_at: now,
            expires_at: now,
        }
    }

    fn profile(role: Role) -> Profile {
        let now = Utc::now();
        Profile {
            id: "p1".into(),
            identity_id: "i1".into(),
            display_name: "Test".into(),
            email: "t@example.com".into(),
            role,
            created_at: now,
            updated_at: now,
        }
    }

    fn claim(path: &str, roles: &[Role]) -> RouteClaim {
        RouteClaim { requested_path: path.into(), required_roles: Some(roles.to_vec()) }
    }

    #[test]
    fn loading_session_is_pending_regardless_of_claim() {
        let session = Session { identity: None, profile: None, is_loading: true };
        assert_eq!(evaluate(&session, &claim("/hr/dashboard", &[Role::Hr])), GateDecision::Pending);
        let session = Session { identity: Some(identity()), profile: None, is_loading: true };
        assert_eq!(evaluate(&session, &claim("/hr/dashboard", &[Role::Hr])), GateDecision::Pending);
    }

    #[test]
    fn settled_empty_session_redirects_to_login_with_return_path() {
        let session = Session { identity: None, profile: None, is_loading: false };
        let got = evaluate(&session, &claim("/manager/goals", &[Role::Manager]));
        assert_eq!(got, GateDecision::Unauthenticated { return_to: "/manager/goals".into() });
    }

    #[test]
    fn identity_without_profile_is_forbidden_not_a_crash() {
        let session = Session { identity: Some(identity()), profile: None, is_loading: false };
        assert_eq!(evaluate(&session, &claim("/employee/dashboard", &[Role::Employee])), GateDecision::Forbidden);
        // Even for an unrestricted mount: no profile, no entry.
        let unrestricted = RouteClaim { requested_path: "/account".into(), required_roles: None };
        assert_eq!(evaluate(&session, &unrestricted), GateDecision::Forbidden);
    }

    #[test]
    fn role_membership_decides_between_authorized_and_forbidden() {
        let session = Session {
            identity: Some(identity()),
            profile: Some(profile(Role::Hr)),
            is_loading: false,
        };
        assert_eq!(evaluate(&session, &claim("/hr/dashboard", &[Role::Hr])), GateDecision::Authorized);
        assert_eq!(evaluate(&session, &claim("/manager/dashboard", &[Role::Manager])), GateDecision::Forbidden);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let session = Session {
            identity: Some(identity()),
            profile: Some(profile(Role::Employee)),
            is_loading: false,
        };
        let c = claim("/employee/goals", &[Role::Employee]);
        let first = evaluate(&session, &c);
        for _ in 0..10 {
            assert_eq!(evaluate(&session, &c), first);
        }
    }

    #[test]
    fn portal_table_mounts_shared_views_per_role_prefix() {
        let table = RouteTable::portal();
        let hr = table.claim_for("/hr/goals").expect("hr goals is protected");
        let mgr = table.claim_for("/manager/goals").expect("manager goals is protected");
        let emp = table.claim_for("/employee/goals").expect("employee goals is protected");
        assert_eq!(hr.required_roles, Some(vec![Role::Hr]));
        assert_eq!(mgr.required_roles, Some(vec![Role::Manager]));
        assert_eq!(emp.required_roles, Some(vec![Role::Employee]));
        // Public paths yield no claim.
        assert!(table.claim_for("/").is_none());
        assert!(table.claim_for("/login").is_none());
        assert!(table.claim_for("/unauthorized").is_none());
    }

    #[test]
    fn prefix_match_respects_segment_boundaries() {
        let table = RouteTable::new().protect("/hr/goals", &[Role::Hr]);
        assert!(table.claim_for("/hr/goals").is_some());
        assert!(table.claim_for("/hr/goals/2024").is_some());
        assert!(table.claim_for("/hr/goals-archive").is_none());
    }
}
