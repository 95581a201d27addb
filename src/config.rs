//! Configuration types for the DFA SOAP client.

use crate::credentials::{CredentialSet, OAuthCredential, Secret};
use crate::diagnostics::DEFAULT_COMPONENT;
use crate::error::DfaError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Config version
    pub version: String,

    /// Login credentials
    pub credentials: CredentialsConfig,

    /// Target server
    pub server: ServerConfig,

    /// Per-call diagnostic records
    pub diagnostics: DiagnosticsConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            credentials: CredentialsConfig::default(),
            server: ServerConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Parse configuration from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, DfaError> {
        serde_yaml::from_str(yaml).map_err(|e| DfaError::Config(format!("Invalid YAML: {}", e)))
    }

    /// Read and parse a YAML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DfaError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Build the session credential set.
    ///
    /// A password and an OAuth credential are mutually exclusive. Having
    /// neither is accepted here and reported when a login is attempted.
    pub fn credential_set(&self) -> Result<CredentialSet, DfaError> {
        let creds = &self.credentials;
        let password = creds.password.as_ref().filter(|p| !p.is_empty());
        let oauth = creds.oauth_token.as_ref().filter(|t| !t.is_empty());

        let secret = match (password, oauth) {
            (Some(_), Some(_)) => {
                return Err(DfaError::Config(
                    "credentials.password and credentials.oauth_token are mutually exclusive"
                        .to_string(),
                ))
            }
            (Some(password), None) => Some(Secret::Password(password.clone())),
            (None, Some(token)) => Some(Secret::OAuth(OAuthCredential::new(token.clone()))),
            (None, None) => None,
        };

        Ok(CredentialSet {
            username: creds.username.clone(),
            secret,
            token: creds.token.clone().filter(|t| !t.is_empty()),
        })
    }
}

/// Login credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// DFA username
    pub username: String,

    /// Password (deprecated in favour of OAuth)
    pub password: Option<String>,

    /// OAuth access token, refreshed outside this client
    pub oauth_token: Option<String>,

    /// Previously obtained session token
    pub token: Option<String>,
}

/// Target server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// API base URL
    pub base_url: String,

    /// API version
    pub api_version: String,

    /// Name reported in component marker records
    pub application_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://advertisersapi.doubleclick.net".to_string(),
            api_version: "v1.20".to_string(),
            application_name: DEFAULT_COMPONENT.to_string(),
        }
    }
}

/// Diagnostic record settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Produce records for every call
    pub enabled: bool,

    /// Include the raw request/response XML
    pub capture_xml: bool,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capture_xml: false,
        }
    }
}
