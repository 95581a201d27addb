//! Authenticated SOAP client core for the DFA advertising API.
//!
//! Turns typed method calls into authenticated SOAP dispatches over an
//! injected transport, manages the short-lived session token, and classifies
//! server faults into typed errors.
//!
//! # Features
//!
//! - Token obtained on first use and regenerated once when it expires mid-call
//! - Single-flight login across every service proxy of a session
//! - Fault classification with per-field alias tables
//! - Per-call diagnostic records (raw XML, summary, component marker)
//!
//! # Example
//!
//! ```ignore
//! use dfa_soap_client::{ClientSession, CredentialSet};
//! use serde_json::json;
//!
//! let session = ClientSession::new(CredentialSet::with_password("user", "pw"), transport);
//! let campaign = session.service("campaign").invoke("getCampaign", &json!({ "id": 42 }))?;
//! ```

pub mod client;
pub mod config;
pub mod credentials;
pub mod diagnostics;
pub mod error;
pub mod fault;
pub mod parser;
pub mod session;
pub mod transport;

pub use client::ServiceProxy;
pub use config::ClientConfig;
pub use credentials::{CredentialSet, OAuthCredential, Secret};
pub use diagnostics::{CallDiagnostics, CallRecord, CallRecorder};
pub use error::{ApiFault, DfaError};
pub use fault::{classify, FaultPayload};
pub use parser::{parse_fault, XmlDocument, XmlTree};
pub use session::{ClientSession, ConcurrencyGuard, RegenerationLock, TokenStore};
pub use transport::{CapturedBuffer, ServiceIdentity, SoapTransport, TransportFailure};
