//! Credential set for one client session.

use crate::error::{DfaError, MISSING_CREDENTIAL};
use serde_json::{json, Value};
use std::fmt;

/// Opaque OAuth credential, attached by the transport to outgoing requests.
#[derive(Clone, PartialEq, Eq)]
pub struct OAuthCredential {
    access_token: String,
}

impl OAuthCredential {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl fmt::Debug for OAuthCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthCredential")
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// The secret used to log in.
#[derive(Clone, PartialEq, Eq)]
pub enum Secret {
    /// Plain password (discouraged; OAuth is preferred)
    Password(String),
    /// OAuth credential
    OAuth(OAuthCredential),
}

impl Secret {
    fn is_usable(&self) -> bool {
        match self {
            Self::Password(password) => !password.is_empty(),
            Self::OAuth(credential) => !credential.access_token.is_empty(),
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(<redacted>)"),
            Self::OAuth(credential) => f.debug_tuple("OAuth").field(credential).finish(),
        }
    }
}

/// Username, login secret and current session token.
///
/// The token is replaced wholesale after a successful login and is only
/// written while the session's regeneration guard is held.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialSet {
    pub username: String,
    pub secret: Option<Secret>,
    pub token: Option<String>,
}

impl CredentialSet {
    /// Credentials that log in with a password.
    pub fn with_password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: Some(Secret::Password(password.into())),
            token: None,
        }
    }

    /// Credentials that log in with an OAuth credential.
    pub fn with_oauth(username: impl Into<String>, credential: OAuthCredential) -> Self {
        Self {
            username: username.into(),
            secret: Some(Secret::OAuth(credential)),
            token: None,
        }
    }

    /// Seed a previously obtained token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// The current token, if one is present and non-empty.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn has_token(&self) -> bool {
        self.token().is_some()
    }

    /// Check the set can be used to log in and return its secret.
    pub fn login_secret(&self) -> Result<&Secret, DfaError> {
        if self.username.trim().is_empty() {
            return Err(DfaError::authentication(MISSING_CREDENTIAL));
        }
        self.secret
            .as_ref()
            .filter(|secret| secret.is_usable())
            .ok_or_else(|| DfaError::authentication(MISSING_CREDENTIAL))
    }

    /// Arguments for the login call.
    ///
    /// OAuth logins only carry the username; the transport attaches the
    /// OAuth credential from the set itself.
    pub fn login_args(&self) -> Result<Value, DfaError> {
        Ok(match self.login_secret()? {
            Secret::Password(password) => json!({
                "username": self.username,
                "password": password,
            }),
            Secret::OAuth(_) => json!({ "username": self.username }),
        })
    }
}
