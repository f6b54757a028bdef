//! Session store: the single authoritative source of "who is the current user
//! and what is their role", with a deterministic loading -> resolved lifecycle.
//!
//! The store is the only writer of Session state. It subscribes once to the
//! identity provider's event stream and publishes snapshots over a watch
//! channel; the route gate and views are read-only consumers of that channel.
//! One instance is constructed at bootstrap and injected, never a global, so
//! every test can build its own. The handle is a cheap Arc clone.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::error::{AppError, AppResult};

use super::profile::{Identity, Profile};
use super::provider::{AuthEvent, AuthEventKind, IdentityProvider, SignUpMeta};
use super::resolver::resolve_profile;
use super::role::Role;

/// Process-wide session snapshot. `profile` is populated iff `identity` is
/// populated and its profile lookup has completed; `is_loading` is true from
/// store construction until the first settle.
#[derive(Debug, Clone)]
pub struct Session {
    pub identity: Option<Identity>,
    pub profile: Option<Profile>,
    pub is_loading: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self { identity: None, profile: None, is_loading: true }
    }
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    pub fn role(&self) -> Option<Role> {
        self.profile.as_ref().map(|p| p.role)
    }
}

struct StoreInner {
    provider: Arc<dyn IdentityProvider>,
    state: watch::Sender<Session>,
    /// Bumped on every identity transition. A profile resolution captures the
    /// epoch it was scheduled under and is discarded if the epoch has moved,
    /// so a sign-out racing an outstanding fetch always wins.
    epoch: AtomicU64,
}

#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

impl SessionStore {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        let (state, _) = watch::channel(Session::default());
        Self {
            inner: Arc::new(StoreInner { provider, state, epoch: AtomicU64::new(0) }),
        }
    }

    /// Subscribe to the provider's event stream and perform the initial
    /// session check, strictly in that order: reversing it is a race that
    /// drops a sign-in event firing between check and subscribe.
    pub async fn initialize(&self) {
        let rx = self.inner.provider.subscribe();
        match self.inner.provider.current_identity().await {
            Ok(Some(identity)) => {
                info!(identity = %identity.id, "restoring stored session");
                self.apply_signed_in(identity);
            }
            Ok(None) => self.settle_unauthenticated(),
            Err(e) => {
                warn!(error = %e, "initial session check failed, starting unauthenticated");
                self.settle_unauthenticated();
            }
        }
        self.spawn_event_loop(rx);
    }

    /// Non-blocking snapshot of the current session.
    pub fn current_session(&self) -> Session {
        self.inner.state.borrow().clone()
    }

    /// Watch channel of session snapshots; consumers react to pushes, they
    /// never poll.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.state.subscribe()
    }

    /// Delegate to the provider. Does not mutate the session itself; mutation
    /// arrives through the event stream so there is a single write path.
    pub async fn sign_in(&self, email: &str, password: &str) -> AppResult<()> {
        self.inner.provider.sign_in(email, password).await.map(|_| ())
    }

    /// Delegate to the provider with profile-creation metadata. The profile
    /// row is materialized by a trigger external to this core; it may not
    /// exist yet when this returns.
    pub async fn sign_up(&self, email: &str, password: &str, display_name: &str, role: Role) -> AppResult<()> {
        let meta = SignUpMeta { display_name: display_name.to_string(), role };
        self.inner.provider.sign_up(email, password, meta).await.map(|_| ())
    }

    /// Invalidate the provider session. The local clear completes even when
    /// the provider call fails on the network, so a blip during sign-out never
    /// leaves the app stuck logged in; the provider error is still returned.
    pub async fn sign_out(&self) -> AppResult<()> {
        let result = self.inner.provider.sign_out().await;
        if let Err(ref e) = result {
            warn!(error = %e, "provider sign-out failed, clearing local session anyway");
        }
        self.clear();
        result
    }

    fn spawn_event_loop(&self, mut rx: broadcast::Receiver<AuthEvent>) {
        let store = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => store.apply_event(ev),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "auth event stream lagged, re-syncing from provider");
                        store.resync().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// A lagged stream may have dropped a sign-out; the dropped events are
    /// unknowable, so re-establish state from the provider's current session
    /// instead of trusting local state.
    async fn resync(&self) {
        match self.inner.provider.current_identity().await {
            Ok(Some(identity)) => self.apply_signed_in(identity),
            Ok(None) => self.clear(),
            Err(e) => warn!(error = %e, "re-sync after lagged stream failed"),
        }
    }

    fn apply_event(&self, ev: AuthEvent) {
        match (ev.kind, ev.identity) {
            (AuthEventKind::SignedIn, Some(identity)) => self.apply_signed_in(identity),
            (AuthEventKind::TokenRefreshed, Some(identity)) => self.apply_refresh(identity),
            (AuthEventKind::SignedOut, _) => self.clear(),
            (kind, None) => debug!(?kind, "ignoring auth event without identity"),
        }
    }

    /// Store the identity synchronously, then resolve the profile off the
    /// event callback. A repeated sign-in for the same identity is treated as
    /// fresh; the epoch makes the latest event win.
    fn apply_signed_in(&self, identity: Identity) {
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.state.send_modify(|s| {
            s.identity = Some(identity.clone());
            s.profile = None;
            s.is_loading = true;
        });
        self.schedule_resolution(identity, epoch);
    }

    /// Replace the credential; re-resolve the profile only if one is still
    /// missing (a fresh sign-up whose trigger has since run).
    fn apply_refresh(&self, identity: Identity) {
        let mut profile_missing = false;
        self.inner.state.send_modify(|s| {
            s.identity = Some(identity.clone());
            profile_missing = s.profile.is_none();
            if profile_missing {
                s.is_loading = true;
            }
        });
        if profile_missing {
            let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            self.schedule_resolution(identity, epoch);
        }
    }

    fn clear(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.state.send_modify(|s| {
            s.identity = None;
            s.profile = None;
            s.is_loading = false;
        });
    }

    fn settle_unauthenticated(&self) {
        self.inner.state.send_modify(|s| {
            s.is_loading = false;
        });
    }

    fn schedule_resolution(&self, identity: Identity, epoch: u64) {
        let store = self.clone();
        tokio::spawn(async move {
            // Reentrancy guard: resolution must not run inside the provider's
            // own event callback, so it is deferred to the next scheduling tick.
            tokio::task::yield_now().await;
            let result = resolve_profile(store.inner.provider.as_ref(), &identity.id).await;
            store.apply_resolution(epoch, &identity.id, result);
        });
    }

    fn apply_resolution(&self, epoch: u64, identity_id: &str, result: AppResult<Profile>) {
        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            debug!(identity_id, "discarding stale profile resolution");
            return;
        }
        self.inner.state.send_modify(|s| {
            let still_current = s.identity.as_ref().map(|i| i.id == identity_id).unwrap_or(false);
            if !still_current {
                debug!(identity_id, "identity changed before resolution applied");
                return;
            }
            match result {
                Ok(profile) => {
                    info!(identity_id, role = %profile.role, "profile resolved");
                    s.profile = Some(profile);
                }
                Err(AppError::NotFound { .. }) => {
                    // Fresh sign-up before its trigger ran: authenticated but
                    // unauthorized for any role-gated route, never a crash.
                    info!(identity_id, "profile not yet provisioned");
                    s.profile = None;
                }
                Err(e @ AppError::Integrity { .. }) => {
                    error!(identity_id, error = %e, "profile lookup integrity failure");
                    s.profile = None;
                }
                Err(e) => {
                    warn!(identity_id, error = %e, "profile lookup failed");
                    s.profile = None;
                }
            }
            s.is_loading = false;
        });
    }
}
