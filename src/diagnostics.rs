//! Per-call diagnostic records.
//!
//! Every completed exchange yields three records: the raw XML capture, a
//! one-line summary, and a marker naming the component that made the call.
//! Records are handed to `tracing` on dedicated targets; persistence is the
//! subscriber's business.

use crate::parser::{XmlDocument, XmlTree};
use crate::transport::{CapturedBuffer, ServiceIdentity};
use chrono::{DateTime, Utc};
use std::fmt;
use tracing::{debug, info, trace};
use url::Url;

/// Target for raw request/response XML.
pub const SOAP_XML_TARGET: &str = "dfa_soap_client::soap_xml";
/// Target for one-line call summaries.
pub const REQUEST_INFO_TARGET: &str = "dfa_soap_client::request_info";
/// Target for the originating-component marker.
pub const COMPONENT_TARGET: &str = "dfa_soap_client::component";

/// Default component name used in marker records.
pub const DEFAULT_COMPONENT: &str = "DfaClient";

const RESPONSE_TIME_PATHS: &[&[&str]] = &[
    &["Envelope", "Header", "ResponseHeader", "responseTime"],
    &["Envelope", "Header", "responseTime"],
];

const REQUEST_ID_PATHS: &[&[&str]] = &[
    &["Envelope", "Header", "ResponseHeader", "requestId"],
    &["Envelope", "Header", "requestId"],
];

/// Summary of one call, built from its captured buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub service_host: String,
    pub service_name: String,
    pub method_name: String,
    pub response_time_ms: Option<String>,
    pub request_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl fmt::Display for CallRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "host={} service={} method={} responseTime={} requestID={}",
            self.service_host,
            self.service_name,
            self.method_name,
            self.response_time_ms.as_deref().unwrap_or(""),
            self.request_id.as_deref().unwrap_or(""),
        )
    }
}

/// A named log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub target: &'static str,
    pub message: String,
}

impl LogRecord {
    fn new(target: &'static str, message: String) -> Self {
        Self { target, message }
    }
}

/// The records produced for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallDiagnostics {
    pub call: CallRecord,
    /// Raw XML capture, absent when XML capture is disabled
    pub soap_xml: Option<LogRecord>,
    pub request_info: LogRecord,
    pub component: LogRecord,
}

impl CallDiagnostics {
    /// All records in emission order.
    pub fn records(&self) -> impl Iterator<Item = &LogRecord> {
        self.soap_xml
            .iter()
            .chain([&self.request_info, &self.component])
    }

    /// Hand the records to the tracing subscriber.
    pub fn emit(&self) {
        if let Some(ref xml) = self.soap_xml {
            debug!(target: SOAP_XML_TARGET, "{}", xml.message);
        }
        info!(
            target: REQUEST_INFO_TARGET,
            service = %self.call.service_name,
            method = %self.call.method_name,
            "{}",
            self.request_info.message
        );
        trace!(target: COMPONENT_TARGET, "{}", self.component.message);
    }
}

/// Builds diagnostic records from captured call buffers.
#[derive(Debug, Clone)]
pub struct CallRecorder {
    component: String,
    capture_xml: bool,
}

impl Default for CallRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_COMPONENT, true)
    }
}

impl CallRecorder {
    pub fn new(component: impl Into<String>, capture_xml: bool) -> Self {
        Self {
            component: component.into(),
            capture_xml,
        }
    }

    /// Build the records for one call.
    ///
    /// Never fails: header values that cannot be found or parsed are left
    /// empty.
    pub fn record(
        &self,
        service: &ServiceIdentity,
        method: &str,
        buffer: &CapturedBuffer,
    ) -> CallDiagnostics {
        let response = XmlTree::parse(&buffer.response_xml).ok();
        let header_value = |paths: &[&[&str]]| {
            response
                .as_ref()
                .and_then(|doc| doc.value_at(paths))
                .filter(|v| !v.is_empty())
        };

        let call = CallRecord {
            service_host: service_host(&service.base_url),
            service_name: service.name.clone(),
            method_name: method.to_string(),
            response_time_ms: header_value(RESPONSE_TIME_PATHS),
            request_id: header_value(REQUEST_ID_PATHS),
            recorded_at: Utc::now(),
        };

        let soap_xml = self.capture_xml.then(|| {
            LogRecord::new(
                SOAP_XML_TARGET,
                format!(
                    "Outgoing request: {}\n\nIncoming response:\n{}",
                    buffer.request_xml, buffer.response_xml
                ),
            )
        });

        CallDiagnostics {
            request_info: LogRecord::new(REQUEST_INFO_TARGET, call.to_string()),
            component: LogRecord::new(
                COMPONENT_TARGET,
                format!("API call made by {}", self.component),
            ),
            soap_xml,
            call,
        }
    }
}

fn service_host(base_url: &str) -> String {
    Url::parse(base_url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| base_url.to_string())
}
