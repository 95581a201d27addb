//! Transport capability seen by the call wrapper.
//!
//! The wire exchange itself (HTTP, envelope serialization, WSDL stubs) lives
//! behind [`SoapTransport`]; this crate only sees typed arguments going in and
//! either a parsed response or a fault payload coming back.

use crate::credentials::CredentialSet;
use crate::fault::FaultPayload;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of the service used to obtain session tokens.
pub const LOGIN_SERVICE: &str = "login";

/// Method on the login service that exchanges credentials for a token.
pub const LOGIN_METHOD: &str = "authenticate";

/// Identifies the remote endpoint a call targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceIdentity {
    /// Service name (e.g. `campaign`, `login`)
    pub name: String,
    /// Server base URL
    pub base_url: String,
    /// API version (e.g. `v1.20`)
    pub api_version: String,
}

impl ServiceIdentity {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_version: api_version.into(),
        }
    }

    /// The login identity on the same server and version.
    pub fn login_for(&self) -> Self {
        Self {
            name: LOGIN_SERVICE.to_string(),
            base_url: self.base_url.clone(),
            api_version: self.api_version.clone(),
        }
    }

    /// Whether calls to this service may run without a token.
    pub fn is_login(&self) -> bool {
        self.name == LOGIN_SERVICE
    }
}

/// Raw request/response XML of the last exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedBuffer {
    pub request_xml: String,
    pub response_xml: String,
}

impl CapturedBuffer {
    pub fn new(request_xml: impl Into<String>, response_xml: impl Into<String>) -> Self {
        Self {
            request_xml: request_xml.into(),
            response_xml: response_xml.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.request_xml.is_empty() && self.response_xml.is_empty()
    }
}

/// Why a dispatch did not produce a response.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportFailure {
    /// The server answered with a SOAP fault.
    Fault(FaultPayload),
    /// The exchange failed below the SOAP layer.
    Transport(String),
}

/// Blocking SOAP transport.
///
/// Implementations must be shareable across threads; a single transport
/// serves every service proxy of a client session.
pub trait SoapTransport: Send + Sync {
    /// Perform one request/response exchange.
    fn dispatch(
        &self,
        service: &ServiceIdentity,
        method: &str,
        args: &Value,
        credentials: &CredentialSet,
    ) -> Result<Value, TransportFailure>;

    /// Request/response XML of the calling thread's most recent exchange.
    ///
    /// Called right after `dispatch` on the same thread. A transport shared
    /// across threads must key its capture by thread (a `thread_local!` or a
    /// map keyed by `ThreadId`) so that a concurrent exchange never replaces
    /// the buffer between the two calls.
    fn captured_buffer(&self) -> Option<CapturedBuffer>;
}
