//! Error types for the DFA SOAP client.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Vendor code the platform uses for authentication failures.
pub const AUTH_ERROR_CODE: i64 = 4;

/// Message the platform returns when a session token has expired.
pub const AUTH_TOKEN_EXPIRED: &str = "Authentication token has expired.";

/// Message used when the credential set cannot be used to log in.
pub const MISSING_CREDENTIAL: &str =
    "missing required credential: username plus password or OAuth credential";

/// A vendor-coded SOAP fault, as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiFault {
    /// Vendor error code, `-1` when the fault carried none
    pub code: i64,
    /// Best available human-readable message
    pub message: String,
    /// Localized message from the fault detail (may be empty)
    pub localized_message: String,
    /// The fault string exactly as the server sent it
    pub raw_fault_string: String,
    /// Server host that produced the fault (may be empty)
    pub hostname: String,
}

impl ApiFault {
    /// Create a fault with no vendor code.
    pub fn uncoded(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            code: -1,
            raw_fault_string: message.clone(),
            message,
            localized_message: String::new(),
            hostname: String::new(),
        }
    }

    /// Whether the fault carries a known vendor code.
    pub fn has_code(&self) -> bool {
        self.code > -1
    }
}

impl fmt::Display for ApiFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_code() {
            write!(f, "Code {}: {}", self.code, self.message)
        } else {
            f.write_str(&self.raw_fault_string)
        }
    }
}

/// DFA client errors.
#[derive(Error, Debug)]
pub enum DfaError {
    /// Generic vendor-coded API fault.
    #[error("{0}")]
    Api(ApiFault),

    /// Missing or rejected credentials, or an expired session token.
    #[error("{0}")]
    Authentication(ApiFault),

    /// Non-fault failure from the transport (HTTP error, malformed response).
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("XML parsing error: {0}")]
    XmlParse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DfaError {
    /// Authentication error with no vendor code.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication(ApiFault::uncoded(message))
    }

    /// The structured fault behind an API or authentication error.
    pub fn fault(&self) -> Option<&ApiFault> {
        match self {
            Self::Api(fault) | Self::Authentication(fault) => Some(fault),
            _ => None,
        }
    }

    /// Whether this is an authentication error.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    /// Whether the server reported the session token as expired.
    ///
    /// This is the only error the call wrapper recovers from.
    pub fn is_token_expired(&self) -> bool {
        match self {
            Self::Authentication(fault) => fault.message == AUTH_TOKEN_EXPIRED,
            _ => false,
        }
    }

    /// Vendor code of the underlying fault, `-1` for anything else.
    pub fn code(&self) -> i64 {
        self.fault().map_or(-1, |f| f.code)
    }
}
