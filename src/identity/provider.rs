//! Identity provider contract and a local in-process implementation.
//! The session store consumes the provider only through these contracts:
//! an auth-event subscription, a one-shot initial session check, sign-in /
//! sign-up / sign-out calls, and a profile point-lookup by identity id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use base64::Engine;
use chrono::{Duration, Utc};
use parking_lot::RwLock;
use password_hash::{PasswordHash, SaltString};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::tprintln;

use super::profile::{Identity, Profile};
use super::role::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEventKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

/// Event delivered on the provider's auth stream. `identity` is present for
/// sign-in and token-refresh events and absent for sign-out.
#[derive(Debug, Clone)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub identity: Option<Identity>,
}

/// Profile-creation metadata attached to a sign-up call. The profile row
/// itself is materialized by a trigger external to the caller.
#[derive(Debug, Clone)]
pub struct SignUpMeta {
    pub display_name: String,
    pub role: Role,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Subscribe to the auth event stream. Callers must subscribe before
    /// performing the initial session check so no event is dropped in between.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;

    /// One-shot initial session check.
    async fn current_identity(&self) -> AppResult<Option<Identity>>;

    async fn sign_in(&self, email: &str, password: &str) -> AppResult<Identity>;

    async fn sign_up(&self, email: &str, password: &str, meta: SignUpMeta) -> AppResult<Identity>;

    async fn sign_out(&self) -> AppResult<()>;

    /// Point lookup of profile rows keyed by identity id. Returned as rows so
    /// the resolver can distinguish "not yet provisioned" (zero rows) from a
    /// duplicate-row data bug (more than one).
    async fn fetch_profiles(&self, identity_id: &str) -> AppResult<Vec<Profile>>;
}

fn gen_token() -> String {
    // 256-bit random token base64url without padding
    let mut buf = [0u8; 32];
    let _ = getrandom::getrandom(&mut buf);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

fn hash_password(password: &str) -> AppResult<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes)
        .map_err(|e| AppError::internal("salt_gen_failed".to_string(), e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AppError::internal("salt_encode_failed".to_string(), e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::internal("hash_failed".to_string(), e.to_string()))?
        .to_string();
    Ok(phc)
}

fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else { false }
}

#[derive(Debug, Clone)]
struct UserRecord {
    identity_id: String,
    email: String,
    password_phc: String,
}

#[derive(Debug, Clone)]
struct PendingProfile {
    identity_id: String,
    email: String,
    display_name: String,
    role: Role,
}

/// In-process identity provider backing the HTTP embedding and the tests.
/// Passwords are stored as Argon2 PHC strings; the auth event stream is a
/// broadcast channel, so every store subscribed to the same provider sees the
/// same sign-in/sign-out events (the multi-tab propagation path).
///
/// Profile rows created by `sign_up` are queued and materialized by a
/// simulated trigger; `hold_triggers(true)` keeps them queued until
/// `run_pending_triggers` is called, modelling the window in which a fresh
/// sign-up has an identity but no profile yet.
pub struct LocalIdentityProvider {
    users: RwLock<HashMap<String, UserRecord>>,
    profiles: RwLock<HashMap<String, Vec<Profile>>>,
    pending: RwLock<Vec<PendingProfile>>,
    current: RwLock<Option<Identity>>,
    events: broadcast::Sender<AuthEvent>,
    offline: AtomicBool,
    triggers_held: AtomicBool,
}

impl Default for LocalIdentityProvider {
    fn default() -> Self { Self::new() }
}

impl LocalIdentityProvider {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            users: RwLock::new(HashMap::new()),
            profiles: RwLock::new(HashMap::new()),
            pending: RwLock::new(Vec::new()),
            current: RwLock::new(None),
            events,
            offline: AtomicBool::new(false),
            triggers_held: AtomicBool::new(false),
        }
    }

    /// Simulate losing (or regaining) the network path to the provider.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// While held, sign-up profile rows stay queued until
    /// `run_pending_triggers` is called.
    pub fn hold_triggers(&self, hold: bool) {
        self.triggers_held.store(hold, Ordering::SeqCst);
    }

    pub fn user_count(&self) -> usize {
        self.users.read().len()
    }

    fn check_online(&self) -> AppResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::network("provider_unreachable", "identity provider unreachable"));
        }
        Ok(())
    }

    fn emit(&self, ev: AuthEvent) {
        // No receivers is fine; the stream is fire-and-forget.
        let _ = self.events.send(ev);
    }

    fn mint_identity(&self, user: &UserRecord) -> Identity {
        let now = Utc::now();
        Identity {
            id: user.identity_id.clone(),
            email: user.email.clone(),
            access_token: gen_token(),
            issued_at: now,
            expires_at: now + Duration::hours(1),
        }
    }

    /// Register an account and provision its profile row immediately.
    /// Used for seeding known accounts; returns the identity id.
    pub fn register_user(&self, email: &str, password: &str, display_name: &str, role: Role) -> AppResult<String> {
        let key = email.trim().to_ascii_lowercase();
        let mut users = self.users.write();
        if users.contains_key(&key) {
            return Err(AppError::conflict("email_in_use", "an account already exists for this email"));
        }
        let identity_id = Uuid::new_v4().to_string();
        let rec = UserRecord {
            identity_id: identity_id.clone(),
            email: key.clone(),
            password_phc: hash_password(password)?,
        };
        users.insert(key.clone(), rec);
        drop(users);

        let now = Utc::now();
        self.profiles.write().insert(identity_id.clone(), vec![Profile {
            id: Uuid::new_v4().to_string(),
            identity_id: identity_id.clone(),
            display_name: display_name.to_string(),
            email: key,
            role,
            created_at: now,
            updated_at: now,
        }]);
        Ok(identity_id)
    }

    /// Materialize queued sign-up profiles. Emits a token-refresh event for
    /// the currently signed-in identity when its row appears, which is how a
    /// live session picks up a profile that arrived after sign-up.
    pub fn run_pending_triggers(&self) -> usize {
        let drained: Vec<PendingProfile> = self.pending.write().drain(..).collect();
        let count = drained.len();
        if count == 0 { return 0; }
        let now = Utc::now();
        {
            let mut profiles = self.profiles.write();
            for p in &drained {
                profiles.entry(p.identity_id.clone()).or_default().push(Profile {
                    id: Uuid::new_v4().to_string(),
                    identity_id: p.identity_id.clone(),
                    display_name: p.display_name.clone(),
                    email: p.email.clone(),
                    role: p.role,
                    created_at: now,
                    updated_at: now,
                });
            }
        }
        let current = self.current.read().clone();
        if let Some(ident) = current {
            if drained.iter().any(|p| p.identity_id == ident.id) {
                self.emit(AuthEvent { kind: AuthEventKind::TokenRefreshed, identity: Some(ident) });
            }
        }
        tprintln!("provider.trigger materialized={}", count);
        count
    }

    /// Feed a raw event into the auth stream, as a provider client would after
    /// noticing an external session change. Test control for the refresh and
    /// lagged-stream paths.
    pub fn inject_event(&self, ev: AuthEvent) {
        self.emit(ev);
    }

    /// Insert an extra profile row for an identity. Reproduces the backend
    /// duplicate-row bug the resolver must report as an integrity error.
    pub fn inject_duplicate_profile(&self, identity_id: &str) {
        let now = Utc::now();
        let mut profiles = self.profiles.write();
        let rows = profiles.entry(identity_id.to_string()).or_default();
        let dup = Profile {
            id: Uuid::new_v4().to_string(),
            identity_id: identity_id.to_string(),
            display_name: "duplicate".to_string(),
            email: String::new(),
            role: Role::Employee,
            created_at: now,
            updated_at: now,
        };
        rows.push(dup);
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn current_identity(&self) -> AppResult<Option<Identity>> {
        self.check_online()?;
        Ok(self.current.read().clone())
    }

    async fn sign_in(&self, email: &str, password: &str) -> AppResult<Identity> {
        self.check_online()?;
        let key = email.trim().to_ascii_lowercase();
        let user = {
            let users = self.users.read();
            users.get(&key).cloned()
        };
        let Some(user) = user else {
            return Err(AppError::credential("invalid_credentials", "invalid email or password"));
        };
        if !verify_password(&user.password_phc, password) {
            return Err(AppError::credential("invalid_credentials", "invalid email or password"));
        }
        let ident = self.mint_identity(&user);
        *self.current.write() = Some(ident.clone());
        self.emit(AuthEvent { kind: AuthEventKind::SignedIn, identity: Some(ident.clone()) });
        tprintln!("auth.sign_in user={} identity={}", user.email, ident.id);
        Ok(ident)
    }

    async fn sign_up(&self, email: &str, password: &str, meta: SignUpMeta) -> AppResult<Identity> {
        self.check_online()?;
        let key = email.trim().to_ascii_lowercase();
        let user = {
            let mut users = self.users.write();
            if users.contains_key(&key) {
                return Err(AppError::conflict("email_in_use", "an account already exists for this email"));
            }
            let rec = UserRecord {
                identity_id: Uuid::new_v4().to_string(),
                email: key.clone(),
                password_phc: hash_password(password)?,
            };
            users.insert(key.clone(), rec.clone());
            rec
        };
        // Queue the profile row; materialization is the trigger's job, not ours.
        self.pending.write().push(PendingProfile {
            identity_id: user.identity_id.clone(),
            email: key,
            display_name: meta.display_name,
            role: meta.role,
        });
        let ident = self.mint_identity(&user);
        *self.current.write() = Some(ident.clone());
        self.emit(AuthEvent { kind: AuthEventKind::SignedIn, identity: Some(ident.clone()) });
        tprintln!("auth.sign_up user={} identity={}", user.email, ident.id);
        if !self.triggers_held.load(Ordering::SeqCst) {
            self.run_pending_triggers();
        }
        Ok(ident)
    }

    async fn sign_out(&self) -> AppResult<()> {
        // Fails before clearing anything: a network blip leaves the provider
        // session intact and lets the caller decide what to do locally.
        self.check_online()?;
        let had = self.current.write().take();
        if let Some(ident) = had {
            tprintln!("auth.sign_out identity={}", ident.id);
            self.emit(AuthEvent { kind: AuthEventKind::SignedOut, identity: None });
        }
        Ok(())
    }

    async fn fetch_profiles(&self, identity_id: &str) -> AppResult<Vec<Profile>> {
        self.check_online()?;
        Ok(self.profiles.read().get(identity_id).cloned().unwrap_or_default())
    }
}
