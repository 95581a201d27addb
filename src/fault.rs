//! Fault payload model and classification into typed errors.
//!
//! Fault details arrive as loosely-typed nested mappings whose key names have
//! drifted between server versions. Every logical field is looked up through
//! an ordered alias list; the first key present wins.

use crate::error::{ApiFault, DfaError, AUTH_ERROR_CODE};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys under `detail` that hold the vendor fault, primary namespace first.
pub const DETAIL_NAMESPACE_ALIASES: &[&str] = &["doubleclick", "dfa"];
/// Keys holding the numeric vendor error code.
pub const VENDOR_CODE_ALIASES: &[&str] = &["errorCode", "code"];
/// Keys holding the vendor error message.
pub const VENDOR_MESSAGE_ALIASES: &[&str] = &["errorMessage"];
/// Keys holding the localized message.
pub const LOCALIZED_MESSAGE_ALIASES: &[&str] = &["localizedMessage"];
/// Keys holding the preferred display message.
pub const MESSAGE_ALIASES: &[&str] = &["message"];
/// Keys holding the reporting server host.
pub const HOSTNAME_ALIASES: &[&str] = &["hostname", "hostName"];

/// A SOAP fault as returned by the transport. Never mutated after receipt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FaultPayload {
    /// SOAP fault code (e.g. `soap:Server`)
    pub fault_code: String,
    /// SOAP fault string
    pub fault_string: String,
    /// Raw `detail` subtree, keyed by element local name
    pub detail: Option<Value>,
}

impl FaultPayload {
    /// Create a payload with no detail.
    pub fn new(fault_code: impl Into<String>, fault_string: impl Into<String>) -> Self {
        Self {
            fault_code: fault_code.into(),
            fault_string: fault_string.into(),
            detail: None,
        }
    }

    /// Attach a detail mapping.
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Vendor detail extracted from a fault, every field optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultDetail {
    pub vendor_code: Option<i64>,
    /// Vendor-side text; informational, classification uses `message`
    pub vendor_message: Option<String>,
    pub localized_message: Option<String>,
    pub message: Option<String>,
    pub hostname: Option<String>,
}

impl FaultDetail {
    /// Extract the vendor detail from a raw `detail` value.
    ///
    /// The first namespace key holding a mapping is used; returns `None` if
    /// there is none.
    pub fn extract(detail: &Value) -> Option<Self> {
        let detail = detail.as_object()?;
        let vendor = DETAIL_NAMESPACE_ALIASES
            .iter()
            .find_map(|key| detail.get(*key).and_then(Value::as_object))?;

        Some(Self {
            vendor_code: first_alias(vendor, VENDOR_CODE_ALIASES).and_then(as_code),
            vendor_message: first_alias(vendor, VENDOR_MESSAGE_ALIASES).and_then(as_text),
            localized_message: first_alias(vendor, LOCALIZED_MESSAGE_ALIASES).and_then(as_text),
            message: first_alias(vendor, MESSAGE_ALIASES).and_then(as_text),
            hostname: first_alias(vendor, HOSTNAME_ALIASES).and_then(as_text),
        })
    }
}

fn first_alias<'a>(map: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|key| map.get(*key))
        .find(|value| !value.is_null())
}

fn as_code(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Classify a fault payload into an API or authentication error.
pub fn classify(payload: &FaultPayload) -> DfaError {
    let detail = payload
        .detail
        .as_ref()
        .and_then(FaultDetail::extract)
        .unwrap_or_default();

    let fault = ApiFault {
        code: detail.vendor_code.unwrap_or(-1),
        message: detail
            .message
            .unwrap_or_else(|| payload.fault_string.clone()),
        localized_message: detail.localized_message.unwrap_or_default(),
        raw_fault_string: payload.fault_string.clone(),
        hostname: detail.hostname.unwrap_or_default(),
    };

    if detail.vendor_code == Some(AUTH_ERROR_CODE) {
        DfaError::Authentication(fault)
    } else {
        DfaError::Api(fault)
    }
}
