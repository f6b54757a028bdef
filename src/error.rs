//! Unified application error model for the authorization core.
//! One enum shared by the session store, resolver and HTTP surface, with a
//! serde-tagged wire shape and an HTTP status mapping for the server layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    /// Bad email/password; recovered locally on the auth form.
    #[error("{code}: {message}")]
    Credential { code: String, message: String },
    /// Resource already exists (e.g. sign-up with a taken email).
    #[error("{code}: {message}")]
    Conflict { code: String, message: String },
    /// Profile row not yet provisioned for an identity.
    #[error("{code}: {message}")]
    NotFound { code: String, message: String },
    /// Backend data bug, e.g. more than one profile row per identity.
    #[error("{code}: {message}")]
    Integrity { code: String, message: String },
    /// Transport failure talking to the identity provider.
    #[error("{code}: {message}")]
    Network { code: String, message: String },
    /// Provider-side failure that is not a credential or transport problem.
    #[error("{code}: {message}")]
    Provider { code: String, message: String },
    #[error("{code}: {message}")]
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::Credential { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Integrity { code, .. }
            | AppError::Network { code, .. }
            | AppError::Provider { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::Credential { message, .. }
            | AppError::Conflict { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Integrity { message, .. }
            | AppError::Network { message, .. }
            | AppError::Provider { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn credential<S: Into<String>>(code: S, msg: S) -> Self { AppError::Credential { code: code.into(), message: msg.into() } }
    pub fn conflict<S: Into<String>>(code: S, msg: S) -> Self { AppError::Conflict { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn integrity<S: Into<String>>(code: S, msg: S) -> Self { AppError::Integrity { code: code.into(), message: msg.into() } }
    pub fn network<S: Into<String>>(code: S, msg: S) -> Self { AppError::Network { code: code.into(), message: msg.into() } }
    pub fn provider<S: Into<String>>(code: S, msg: S) -> Self { AppError::Provider { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::Credential { .. } => 401,
            AppError::Conflict { .. } => 409,
            AppError::NotFound { .. } => 404,
            AppError::Integrity { .. } => 500,
            AppError::Network { .. } => 503,
            AppError::Provider { .. } => 502,
            AppError::Internal { .. } => 500,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(AppError::credential("invalid_credentials", "no").http_status(), 401);
        assert_eq!(AppError::conflict("email_in_use", "dup").http_status(), 409);
        assert_eq!(AppError::not_found("profile_not_provisioned", "missing").http_status(), 404);
        assert_eq!(AppError::integrity("duplicate_profiles", "two rows").http_status(), 500);
        assert_eq!(AppError::network("provider_unreachable", "down").http_status(), 503);
        assert_eq!(AppError::provider("provider_error", "odd").http_status(), 502);
        assert_eq!(AppError::internal("internal", "panic").http_status(), 500);
    }

    #[test]
    fn display_includes_code_and_message() {
        let e = AppError::credential("invalid_credentials", "invalid email or password");
        assert_eq!(e.to_string(), "invalid_credentials: invalid email or password");
        assert_eq!(e.code_str(), "invalid_credentials");
        assert_eq!(e.message(), "invalid email or password");
    }
}
