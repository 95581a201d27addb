//! Authenticated call wrapper.
//!
//! A [`ServiceProxy`] turns a method call into a SOAP dispatch, making sure a
//! session token is present first and logging in again when the server
//! reports the token expired. The expiry retry fires at most once per call:
//!
//! ```text
//! NoToken -> TokenEnsured -> Dispatched -> Success
//!                                       -> FaultClassified -> FinalError
//!                                       -> FaultClassified (token expired)
//!                                            -> RetryDispatched -> Success | FinalError
//! ```

use crate::credentials::{CredentialSet, Secret};
use crate::error::DfaError;
use crate::fault::classify;
use crate::session::ClientSession;
use crate::transport::{ServiceIdentity, TransportFailure, LOGIN_METHOD};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Target of the warning emitted for every password-based login.
pub const DEPRECATION_TARGET: &str = "dfa_soap_client::deprecation";

/// Which dispatch of an outer call is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    Retry,
}

impl Attempt {
    fn as_str(self) -> &'static str {
        match self {
            Self::First => "first",
            Self::Retry => "retry",
        }
    }
}

/// Calls one remote service on behalf of a client session.
#[derive(Clone)]
pub struct ServiceProxy {
    session: ClientSession,
    service: ServiceIdentity,
}

impl ServiceProxy {
    pub(crate) fn new(session: ClientSession, service: ServiceIdentity) -> Self {
        Self { session, service }
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.service
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    /// Invoke a remote method.
    ///
    /// Logs in first if the session has no token (except on the login
    /// service itself). If the server answers that the token expired, the
    /// token is regenerated and the call is dispatched exactly once more;
    /// whatever that second dispatch returns is final.
    pub fn invoke(&self, method: &str, args: &Value) -> Result<Value, DfaError> {
        if !self.service.is_login() && !self.session.store().has_token() {
            debug!(
                service = %self.service.name,
                method = %method,
                "No session token, logging in before dispatch"
            );
            self.ensure_token()?;
        }

        let used = self.session.store().snapshot();
        let err = match self.attempt(method, args, &used, Attempt::First) {
            Ok(response) => return Ok(response),
            Err(err) => err,
        };

        if !err.is_token_expired() {
            return Err(err);
        }

        info!(
            service = %self.service.name,
            method = %method,
            "Session token expired, regenerating and retrying once"
        );
        self.regenerate_token(used.token())?;

        let refreshed = self.session.store().snapshot();
        self.attempt(method, args, &refreshed, Attempt::Retry)
    }

    /// Make sure the session holds a token, logging in if it does not.
    ///
    /// Returns the token in effect afterwards. Concurrent callers are
    /// serialized on the session guard, so only the first one logs in.
    pub fn ensure_token(&self) -> Result<String, DfaError> {
        self.session.store().snapshot().login_secret()?;

        let lock = self.session.lock_regeneration();
        let credentials = lock.credentials();
        if let Some(token) = credentials.token() {
            debug!("Session token already present");
            return Ok(token.to_string());
        }

        let token = self.login(&credentials)?;
        lock.replace_token(Some(token.clone()));
        Ok(token)
    }

    /// Replace a token the server rejected as expired.
    ///
    /// `expired` is the token the caller dispatched with. If another caller
    /// has already replaced it, the newer token is reused without logging in
    /// again.
    pub fn regenerate_token(&self, expired: Option<&str>) -> Result<String, DfaError> {
        self.session.store().snapshot().login_secret()?;

        let lock = self.session.lock_regeneration();
        let credentials = lock.credentials();
        if let Some(current) = credentials.token() {
            if Some(current) != expired {
                debug!("Session token already regenerated by another caller");
                return Ok(current.to_string());
            }
        }

        let token = self.login(&credentials)?;
        lock.replace_token(Some(token.clone()));
        Ok(token)
    }

    /// Exchange the credential set for a new token. Runs under the guard.
    fn login(&self, credentials: &CredentialSet) -> Result<String, DfaError> {
        let args = credentials.login_args()?;
        if let Some(Secret::Password(_)) = credentials.secret {
            warn!(
                target: DEPRECATION_TARGET,
                username = %credentials.username,
                "Password login is deprecated; configure an OAuth credential instead"
            );
        }

        let login = self.service.login_for();
        let without_token = CredentialSet {
            token: None,
            ..credentials.clone()
        };

        let response = self
            .dispatch(&login, LOGIN_METHOD, &args, &without_token)
            .map_err(|err| match err {
                DfaError::Api(fault) => DfaError::Authentication(fault),
                other => other,
            })?;

        let token = response
            .get("token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| DfaError::Transport("Login response did not contain a token".to_string()))?;

        info!(username = %credentials.username, "Obtained new session token");
        Ok(token.to_string())
    }

    fn attempt(
        &self,
        method: &str,
        args: &Value,
        credentials: &CredentialSet,
        attempt: Attempt,
    ) -> Result<Value, DfaError> {
        debug!(
            service = %self.service.name,
            method = %method,
            attempt = attempt.as_str(),
            "Dispatching SOAP call"
        );

        self.dispatch(&self.service, method, args, credentials)
            .inspect_err(|err| {
                warn!(
                    service = %self.service.name,
                    method = %method,
                    attempt = attempt.as_str(),
                    code = err.code(),
                    error = %err,
                    "SOAP call failed"
                );
            })
    }

    /// One transport exchange: record diagnostics, classify faults.
    fn dispatch(
        &self,
        service: &ServiceIdentity,
        method: &str,
        args: &Value,
        credentials: &CredentialSet,
    ) -> Result<Value, DfaError> {
        let transport = self.session.transport();
        let outcome = transport.dispatch(service, method, args, credentials);

        if let Some(recorder) = self.session.recorder() {
            if let Some(buffer) = transport.captured_buffer().filter(|b| !b.is_empty()) {
                recorder.record(service, method, &buffer).emit();
            }
        }

        outcome.map_err(|failure| match failure {
            TransportFailure::Fault(payload) => classify(&payload),
            TransportFailure::Transport(message) => DfaError::Transport(message),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::OAuthCredential;
    use crate::diagnostics::{REQUEST_INFO_TARGET, SOAP_XML_TARGET};
    use crate::error::{AUTH_ERROR_CODE, AUTH_TOKEN_EXPIRED, MISSING_CREDENTIAL};
    use crate::fault::FaultPayload;
    use crate::transport::{CapturedBuffer, SoapTransport};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::fmt;
    use std::sync::Arc;
    use tracing::field::{Field, Visit};
    use tracing::{Event, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
    use tracing_subscriber::Registry;

    /// Collects `(target, message)` for every event raised while installed.
    #[derive(Clone, Default)]
    struct EventLog(Arc<Mutex<Vec<(String, String)>>>);

    struct MessageVisitor<'a>(&'a mut String);

    impl Visit for MessageVisitor<'_> {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            if field.name() == "message" {
                *self.0 = format!("{:?}", value);
            }
        }
    }

    impl<S: Subscriber> Layer<S> for EventLog {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut message = String::new();
            event.record(&mut MessageVisitor(&mut message));
            self.0
                .lock()
                .push((event.metadata().target().to_string(), message));
        }
    }

    impl EventLog {
        fn capture<T>(&self, f: impl FnOnce() -> T) -> T {
            tracing::subscriber::with_default(Registry::default().with(self.clone()), f)
        }

        fn messages(&self, target: &str) -> Vec<String> {
            self.0
                .lock()
                .iter()
                .filter(|(t, _)| t == target)
                .map(|(_, m)| m.clone())
                .collect()
        }
    }

    type Outcome = Result<Value, TransportFailure>;

    /// Replays scripted outcomes and records every call.
    #[derive(Default)]
    struct ScriptedTransport {
        logins: Mutex<VecDeque<Outcome>>,
        calls: Mutex<VecDeque<Outcome>>,
        log: Mutex<Vec<(String, String, Option<String>)>>,
        blank_buffers: bool,
    }

    impl ScriptedTransport {
        fn login_ok(self, token: &str) -> Self {
            self.logins.lock().push_back(Ok(json!({ "token": token })));
            self
        }

        fn login_fault(self, payload: FaultPayload) -> Self {
            self.logins.lock().push_back(Err(TransportFailure::Fault(payload)));
            self
        }

        fn call(self, outcome: Outcome) -> Self {
            self.calls.lock().push_back(outcome);
            self
        }

        fn count(&self, service: &str) -> usize {
            self.log.lock().iter().filter(|(s, _, _)| s == service).count()
        }

        fn tokens_used(&self, service: &str) -> Vec<Option<String>> {
            self.log
                .lock()
                .iter()
                .filter(|(s, _, _)| s == service)
                .map(|(_, _, t)| t.clone())
                .collect()
        }
    }

    impl SoapTransport for ScriptedTransport {
        fn dispatch(
            &self,
            service: &ServiceIdentity,
            method: &str,
            _args: &Value,
            credentials: &CredentialSet,
        ) -> Outcome {
            self.log.lock().push((
                service.name.clone(),
                method.to_string(),
                credentials.token.clone(),
            ));
            let queue = if service.is_login() { &self.logins } else { &self.calls };
            queue
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(TransportFailure::Transport("script exhausted".to_string())))
        }

        fn captured_buffer(&self) -> Option<CapturedBuffer> {
            if self.blank_buffers {
                return Some(CapturedBuffer::default());
            }
            Some(CapturedBuffer::new("<req/>", "<resp/>"))
        }
    }

    fn expired() -> Outcome {
        Err(TransportFailure::Fault(
            FaultPayload::new("soap:Server", "auth").with_detail(json!({
                "doubleclick": { "errorCode": AUTH_ERROR_CODE, "message": AUTH_TOKEN_EXPIRED }
            })),
        ))
    }

    fn proxy(credentials: CredentialSet, transport: &Arc<ScriptedTransport>) -> ServiceProxy {
        ClientSession::new(credentials, transport.clone()).service("campaign")
    }

    #[test]
    fn test_logs_in_when_token_missing() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .login_ok("t1")
                .call(Ok(json!({ "id": 1 }))),
        );
        let proxy = proxy(CredentialSet::with_password("u", "p"), &transport);

        let response = proxy.invoke("getCampaign", &json!({ "id": 1 })).unwrap();
        assert_eq!(response["id"], 1);
        assert_eq!(transport.count("login"), 1);
        assert_eq!(transport.tokens_used("login"), vec![None]);
        assert_eq!(transport.tokens_used("campaign"), vec![Some("t1".to_string())]);
    }

    #[test]
    fn test_seeded_token_skips_login() {
        let transport = Arc::new(ScriptedTransport::default().call(Ok(json!({}))));
        let proxy = proxy(CredentialSet::with_password("u", "p").with_token("seed"), &transport);

        proxy.invoke("getCampaign", &json!({})).unwrap();
        assert_eq!(transport.count("login"), 0);
    }

    #[test]
    fn test_expired_token_retried_once() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .login_ok("fresh")
                .call(expired())
                .call(Ok(json!({ "ok": true }))),
        );
        let proxy = proxy(CredentialSet::with_password("u", "p").with_token("stale"), &transport);

        let response = proxy.invoke("saveCampaign", &json!({})).unwrap();
        assert_eq!(response["ok"], true);
        assert_eq!(transport.count("campaign"), 2);
        assert_eq!(transport.count("login"), 1);
        assert_eq!(
            transport.tokens_used("campaign"),
            vec![Some("stale".to_string()), Some("fresh".to_string())]
        );
    }

    #[test]
    fn test_second_expiry_is_final() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .login_ok("fresh")
                .login_ok("unused")
                .call(expired())
                .call(expired())
                .call(Ok(json!({}))),
        );
        let proxy = proxy(CredentialSet::with_password("u", "p").with_token("stale"), &transport);

        let err = proxy.invoke("saveCampaign", &json!({})).unwrap_err();
        assert!(err.is_token_expired());
        assert_eq!(transport.count("campaign"), 2);
        assert_eq!(transport.count("login"), 1);
    }

    #[test]
    fn test_other_faults_not_retried() {
        let transport = Arc::new(ScriptedTransport::default().call(Err(TransportFailure::Fault(
            FaultPayload::new("soap:Server", "bad request").with_detail(json!({
                "doubleclick": { "errorCode": "8304", "message": "Name exists." }
            })),
        ))));
        let proxy = proxy(CredentialSet::with_password("u", "p").with_token("t"), &transport);

        let err = proxy.invoke("saveCampaign", &json!({})).unwrap_err();
        assert!(matches!(err, DfaError::Api(_)));
        assert_eq!(err.code(), 8304);
        assert_eq!(transport.count("campaign"), 1);
    }

    #[test]
    fn test_transport_error_during_retry_propagates() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .login_ok("fresh")
                .call(expired())
                .call(Err(TransportFailure::Transport("HTTP 502".to_string()))),
        );
        let proxy = proxy(CredentialSet::with_password("u", "p").with_token("stale"), &transport);

        let err = proxy.invoke("saveCampaign", &json!({})).unwrap_err();
        assert!(matches!(err, DfaError::Transport(ref m) if m == "HTTP 502"));
        assert_eq!(transport.count("campaign"), 2);
    }

    #[test]
    fn test_missing_credentials_make_no_dispatch() {
        let transport = Arc::new(ScriptedTransport::default());
        let proxy = proxy(
            CredentialSet {
                username: "u".to_string(),
                ..Default::default()
            },
            &transport,
        );

        let err = proxy.ensure_token().unwrap_err();
        assert!(err.is_authentication());
        assert_eq!(err.to_string(), MISSING_CREDENTIAL);

        let err = proxy.invoke("getCampaign", &json!({})).unwrap_err();
        assert_eq!(err.to_string(), MISSING_CREDENTIAL);
        assert!(transport.log.lock().is_empty());
        assert!(proxy.session().token().is_none());
    }

    #[test]
    fn test_login_fault_is_authentication_error() {
        let transport = Arc::new(ScriptedTransport::default().login_fault(
            FaultPayload::new("soap:Server", "denied").with_detail(json!({
                "doubleclick": { "errorCode": "3", "message": "Account locked." }
            })),
        ));
        let proxy = proxy(CredentialSet::with_password("u", "p"), &transport);

        let err = proxy.invoke("getCampaign", &json!({})).unwrap_err();
        assert!(err.is_authentication());
        assert_eq!(err.to_string(), "Code 3: Account locked.");
        assert_eq!(transport.count("campaign"), 0);
    }

    #[test]
    fn test_login_response_without_token() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.logins.lock().push_back(Ok(json!({ "profileId": 7 })));
        let proxy = proxy(CredentialSet::with_password("u", "p"), &transport);

        let err = proxy.ensure_token().unwrap_err();
        assert!(matches!(err, DfaError::Transport(_)));
        assert!(proxy.session().token().is_none());
    }

    #[test]
    fn test_ensure_token_is_idempotent() {
        let transport = Arc::new(ScriptedTransport::default().login_ok("t1").login_ok("t2"));
        let proxy = proxy(
            CredentialSet::with_oauth("u", OAuthCredential::new("ya29")),
            &transport,
        );

        assert_eq!(proxy.ensure_token().unwrap(), "t1");
        assert_eq!(proxy.ensure_token().unwrap(), "t1");
        assert_eq!(transport.count("login"), 1);
    }

    #[test]
    fn test_regenerate_skips_when_token_already_replaced() {
        let transport = Arc::new(ScriptedTransport::default().login_ok("t2"));
        let proxy = proxy(CredentialSet::with_password("u", "p").with_token("t1"), &transport);

        assert_eq!(proxy.regenerate_token(Some("old")).unwrap(), "t1");
        assert_eq!(transport.count("login"), 0);

        assert_eq!(proxy.regenerate_token(Some("t1")).unwrap(), "t2");
        assert_eq!(transport.count("login"), 1);
    }

    #[test]
    fn test_login_service_needs_no_token() {
        let transport = Arc::new(ScriptedTransport::default().login_ok("direct"));
        let session = ClientSession::new(CredentialSet::with_password("u", "p"), transport.clone());

        let response = session
            .service("login")
            .invoke(LOGIN_METHOD, &json!({ "username": "u", "password": "p" }))
            .unwrap();
        assert_eq!(response["token"], "direct");
        assert_eq!(transport.count("login"), 1);
    }

    #[test]
    fn test_password_login_warns_of_deprecation() {
        let transport = Arc::new(ScriptedTransport::default().login_ok("t1"));
        let proxy = proxy(CredentialSet::with_password("u", "p"), &transport);

        let events = EventLog::default();
        events.capture(|| proxy.ensure_token()).unwrap();

        let warnings = events.messages(DEPRECATION_TARGET);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("OAuth"));
    }

    #[test]
    fn test_oauth_login_has_no_deprecation_warning() {
        let transport = Arc::new(ScriptedTransport::default().login_ok("t1"));
        let proxy = proxy(
            CredentialSet::with_oauth("u", OAuthCredential::new("ya29")),
            &transport,
        );

        let events = EventLog::default();
        events.capture(|| proxy.ensure_token()).unwrap();

        assert!(events.messages(DEPRECATION_TARGET).is_empty());
        assert_eq!(transport.count("login"), 1);
    }

    #[test]
    fn test_every_dispatch_is_recorded() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .login_ok("t1")
                .call(expired())
                .login_ok("t2")
                .call(Ok(json!({ "id": 1 }))),
        );
        let proxy = proxy(CredentialSet::with_password("u", "p"), &transport);

        let events = EventLog::default();
        events.capture(|| proxy.invoke("getCampaign", &json!({}))).unwrap();

        let summaries = events.messages(REQUEST_INFO_TARGET);
        assert_eq!(summaries.len(), 4);
        assert_eq!(
            summaries
                .iter()
                .filter(|m| m.contains("method=getCampaign"))
                .count(),
            2
        );
        // Raw XML capture is off by default.
        assert!(events.messages(SOAP_XML_TARGET).is_empty());
    }

    #[test]
    fn test_empty_buffer_is_not_recorded() {
        let transport = Arc::new(ScriptedTransport {
            blank_buffers: true,
            ..Default::default()
        }
        .call(Ok(json!({ "id": 1 }))));
        let proxy = proxy(CredentialSet::with_password("u", "p").with_token("t1"), &transport);

        let events = EventLog::default();
        events.capture(|| proxy.invoke("getCampaign", &json!({}))).unwrap();

        assert!(events.messages(REQUEST_INFO_TARGET).is_empty());
        assert_eq!(transport.count("campaign"), 1);
    }
}
