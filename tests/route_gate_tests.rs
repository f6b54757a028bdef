//! Route gate integration tests: the portal route table driving gate
//! decisions against live session store snapshots.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use hrgate::identity::{
    evaluate, GateDecision, LocalIdentityProvider, Role, RouteTable, Session, SessionStore,
};

fn seeded_provider() -> Arc<LocalIdentityProvider> {
    let p = Arc::new(LocalIdentityProvider::new());
    p.register_user("hr@example.com", "password", "HR Admin", Role::Hr).expect("seed hr");
    p.register_user("manager@example.com", "password", "Team Manager", Role::Manager).expect("seed manager");
    p.register_user("employee@example.com", "password", "John Employee", Role::Employee).expect("seed employee");
    p
}

async fn wait_for<F>(store: &SessionStore, pred: F) -> Session
where
    F: Fn(&Session) -> bool,
{
    let mut rx = store.subscribe();
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let snap = rx.borrow_and_update().clone();
            if pred(&snap) {
                return snap;
            }
            rx.changed().await.expect("store dropped while waiting");
        }
    })
    .await
    .expect("session did not reach expected state in time")
}

#[tokio::test]
async fn fresh_load_is_pending_then_redirects_to_login() -> Result<()> {
    let table = RouteTable::portal();
    let claim = table.claim_for("/hr/dashboard").expect("hr dashboard is protected");

    let store = SessionStore::new(seeded_provider());

    // Before the initial check settles, the gate must hold, not redirect.
    assert_eq!(evaluate(&store.current_session(), &claim), GateDecision::Pending);

    store.initialize().await;
    let session = wait_for(&store, |s| !s.is_loading).await;
    assert_eq!(
        evaluate(&session, &claim),
        GateDecision::Unauthenticated { return_to: "/hr/dashboard".into() }
    );
    Ok(())
}

#[tokio::test]
async fn hr_sign_in_authorizes_hr_tree_and_forbids_manager_tree() -> Result<()> {
    let table = RouteTable::portal();
    let store = SessionStore::new(seeded_provider());
    store.initialize().await;
    wait_for(&store, |s| !s.is_loading).await;

    store.sign_in("hr@example.com", "password").await?;
    let session = wait_for(&store, |s| s.profile.is_some()).await;

    let hr_claim = table.claim_for("/hr/dashboard").expect("protected");
    assert_eq!(evaluate(&session, &hr_claim), GateDecision::Authorized);

    let mgr_claim = table.claim_for("/manager/dashboard").expect("protected");
    assert_eq!(evaluate(&session, &mgr_claim), GateDecision::Forbidden);
    Ok(())
}

#[tokio::test]
async fn shared_views_gate_per_mount_not_per_view() -> Result<()> {
    let table = RouteTable::portal();
    let store = SessionStore::new(seeded_provider());
    store.initialize().await;
    wait_for(&store, |s| !s.is_loading).await;

    store.sign_in("employee@example.com", "password").await?;
    let session = wait_for(&store, |s| s.profile.is_some()).await;

    // The goals view exists under all three prefixes; only the employee mount
    // admits this session.
    let own = table.claim_for("/employee/goals").expect("protected");
    assert_eq!(evaluate(&session, &own), GateDecision::Authorized);
    for path in ["/hr/goals", "/manager/goals"] {
        let other = table.claim_for(path).expect("protected");
        assert_eq!(evaluate(&session, &other), GateDecision::Forbidden, "{path}");
    }
    Ok(())
}

#[tokio::test]
async fn unrestricted_mount_admits_any_authenticated_role() -> Result<()> {
    let table = RouteTable::portal().protect_any("/account");
    let store = SessionStore::new(seeded_provider());
    store.initialize().await;
    wait_for(&store, |s| !s.is_loading).await;

    let claim = table.claim_for("/account/password").expect("protected");

    // Settled and signed out: login redirect, not forbidden.
    let session = store.current_session();
    assert_eq!(
        evaluate(&session, &claim),
        GateDecision::Unauthenticated { return_to: "/account/password".into() }
    );

    store.sign_in("manager@example.com", "password").await?;
    let session = wait_for(&store, |s| s.profile.is_some()).await;
    assert_eq!(evaluate(&session, &claim), GateDecision::Authorized);
    Ok(())
}

#[tokio::test]
async fn pre_trigger_signup_is_forbidden_until_profile_appears() -> Result<()> {
    let table = RouteTable::portal();
    let provider = Arc::new(LocalIdentityProvider::new());
    provider.hold_triggers(true);
    let store = SessionStore::new(provider.clone());
    store.initialize().await;
    wait_for(&store, |s| !s.is_loading).await;

    store.sign_up("new@example.com", "s3cr3t!", "New Hire", Role::Employee).await?;
    let session = wait_for(&store, |s| s.is_authenticated() && !s.is_loading).await;

    let claim = table.claim_for("/employee/dashboard").expect("protected");
    assert_eq!(evaluate(&session, &claim), GateDecision::Forbidden);

    provider.run_pending_triggers();
    let session = wait_for(&store, |s| s.profile.is_some()).await;
    assert_eq!(evaluate(&session, &claim), GateDecision::Authorized);
    Ok(())
}
