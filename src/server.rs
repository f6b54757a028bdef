//!
//! hrgate HTTP server
//! ------------------
//! Axum embedding of the authorization core.
//!
//! Responsibilities:
//! - Auth endpoints (login/signup/logout) delegating to the session store.
//! - Session snapshot endpoint for clients that render their own views.
//! - A gated wildcard handler for the role-prefixed portal paths, mapping
//!   gate decisions to responses: loading body, login redirect (preserving
//!   the requested path), unauthorized redirect, or the view stub.
//! - First-run demo account seeding and startup inventory logs.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::error::AppError;
use crate::identity::{
    evaluate, GateDecision, LocalIdentityProvider, Role, RouteTable, Session, SessionStore,
};

/// How long login/signup wait for the session to settle before answering
/// without a role-specific redirect.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared server state injected into all handlers.
///
/// Holds the session store (single writer of session state), the local
/// identity provider it is wired to, and the portal route table the gate
/// draws its required-role sets from.
#[derive(Clone)]
pub struct AppState {
    pub store: SessionStore,
    pub provider: Arc<LocalIdentityProvider>,
    pub routes: Arc<RouteTable>,
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct SignupPayload {
    email: String,
    password: String,
    display_name: String,
    role: Role,
}

pub async fn run() -> anyhow::Result<()> {
    let http_port: u16 = std::env::var("HRGATE_HTTP_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(7878);
    run_with_port(http_port).await
}

/// Start the hrgate HTTP server bound to the given port.
///
/// Builds the provider and session store, seeds the demo accounts when the
/// user directory is empty, initializes the store (subscribe, then initial
/// session check), and mounts all routes.
pub async fn run_with_port(http_port: u16) -> anyhow::Result<()> {
    let provider = Arc::new(LocalIdentityProvider::new());
    seed_demo_accounts(&provider)?;

    let store = SessionStore::new(provider.clone());
    store.initialize().await;

    let app_state = AppState {
        store,
        provider,
        routes: Arc::new(RouteTable::portal()),
    };

    let app = build_router(app_state);

    let addr: SocketAddr = format!("0.0.0.0:{}", http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "hrgate ok" }))
        .route("/login", get(login_page))
        .route("/unauthorized", get(unauthorized_page))
        .route("/auth/login", post(login))
        .route("/auth/signup", post(signup))
        .route("/auth/logout", post(logout))
        .route("/auth/session", get(session_snapshot))
        .route("/{*path}", get(portal))
        .with_state(state)
}

/// Seed the three demo accounts when the user directory is empty, one per
/// role. The password comes from HRGATE_DEMO_PASSWORD (default "password").
fn seed_demo_accounts(provider: &LocalIdentityProvider) -> anyhow::Result<()> {
    if provider.user_count() > 0 {
        return Ok(());
    }
    let password = std::env::var("HRGATE_DEMO_PASSWORD").unwrap_or_else(|_| "password".to_string());
    for (email, name, role) in [
        ("hr@example.com", "HR Admin", Role::Hr),
        ("manager@example.com", "Team Manager", Role::Manager),
        ("employee@example.com", "John Employee", Role::Employee),
    ] {
        provider.register_user(email, &password, name, role)
            .map_err(|e| anyhow::anyhow!("seeding {} failed: {}", email, e))?;
        info!(email, role = %role, "seeded demo account");
    }
    Ok(())
}

fn error_response(e: &AppError) -> Response {
    let status = StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({"status": "error", "error": e}))).into_response()
}

/// Wait until the session reaches a state accepted by `pred`, or the timeout
/// expires; falls back to the latest snapshot either way.
async fn wait_for_session<F>(store: &SessionStore, pred: F) -> Session
where
    F: Fn(&Session) -> bool,
{
    let mut rx = store.subscribe();
    let got = tokio::time::timeout(SETTLE_TIMEOUT, async {
        loop {
            let snap = rx.borrow_and_update().clone();
            if pred(&snap) {
                return snap;
            }
            if rx.changed().await.is_err() {
                return store.current_session();
            }
        }
    })
    .await;
    got.unwrap_or_else(|_| store.current_session())
}

async fn login(State(state): State<AppState>, Json(payload): Json<LoginPayload>) -> Response {
    if let Err(e) = state.store.sign_in(&payload.email, &payload.password).await {
        // Credential errors render inline on the auth form; no redirect.
        if !matches!(e, AppError::Credential { .. }) {
            error!("login error: {e}");
        }
        return error_response(&e);
    }
    // The SignedIn event is applied by the store's event loop after sign_in
    // returns; wait for a snapshot that reflects it, not the previous settled
    // state.
    let session = wait_for_session(&state.store, |s| s.is_authenticated() && !s.is_loading).await;
    // Successful sign-in navigates to the role's dashboard; a settled session
    // without a profile lands on the unauthorized page instead.
    let redirect = session
        .role()
        .map(|r| r.dashboard_path())
        .unwrap_or_else(|| "/unauthorized".to_string());
    (StatusCode::OK, Json(json!({"status": "ok", "redirect": redirect}))).into_response()
}

async fn signup(State(state): State<AppState>, Json(payload): Json<SignupPayload>) -> Response {
    if let Err(e) = state.store
        .sign_up(&payload.email, &payload.password, &payload.display_name, payload.role)
        .await
    {
        return error_response(&e);
    }
    let session = wait_for_session(&state.store, |s| s.is_authenticated() && !s.is_loading).await;
    // The profile trigger may not have run yet; send such sessions to their
    // dashboard anyway and let the gate hold them until the profile appears.
    let redirect = session
        .role()
        .map(|r| r.dashboard_path())
        .unwrap_or_else(|| payload.role.dashboard_path());
    (StatusCode::OK, Json(json!({"status": "ok", "redirect": redirect}))).into_response()
}

async fn logout(State(state): State<AppState>) -> Response {
    match state.store.sign_out().await {
        // Local state is cleared even on provider failure; report the error
        // but the client is logged out either way.
        Ok(()) => (StatusCode::OK, Json(json!({"status": "ok", "redirect": "/login"}))).into_response(),
        Err(e) => {
            error!("logout error: {e}");
            error_response(&e)
        }
    }
}

async fn session_snapshot(State(state): State<AppState>) -> Response {
    let s = state.store.current_session();
    let body = json!({
        "is_loading": s.is_loading,
        "identity": s.identity.as_ref().map(|i| json!({"id": i.id, "email": i.email})),
        "profile": s.profile,
    });
    (StatusCode::OK, Json(body)).into_response()
}

async fn login_page() -> Response {
    (StatusCode::OK, Json(json!({"page": "login"}))).into_response()
}

async fn unauthorized_page() -> Response {
    (StatusCode::OK, Json(json!({"page": "unauthorized"}))).into_response()
}

/// Gate every portal navigation: derive the claim for the requested path and
/// map the decision to a response.
async fn portal(State(state): State<AppState>, Path(path): Path<String>) -> Response {
    let requested = format!("/{}", path);
    let Some(claim) = state.routes.claim_for(&requested) else {
        return (StatusCode::NOT_FOUND, Json(json!({"status": "not_found"}))).into_response();
    };
    let session = state.store.current_session();
    match evaluate(&session, &claim) {
        GateDecision::Pending => {
            (StatusCode::OK, Json(json!({"status": "loading"}))).into_response()
        }
        GateDecision::Unauthenticated { return_to } => {
            Redirect::to(&format!("/login?from={}", return_to)).into_response()
        }
        GateDecision::Forbidden => Redirect::to("/unauthorized").into_response(),
        GateDecision::Authorized => {
            let profile = session.profile.as_ref();
            let body = json!({
                "status": "ok",
                "view": requested,
                "role": profile.map(|p| p.role),
                "display_name": profile.map(|p| p.display_name.clone()),
            });
            (StatusCode::OK, Json(body)).into_response()
        }
    }
}
