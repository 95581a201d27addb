//! Client session: shared credential state and the regeneration guard.
//!
//! One session serves any number of service proxies across threads. All of
//! them read the same [`TokenStore`] and serialize token regeneration on the
//! same [`ConcurrencyGuard`], so a burst of callers that find the token
//! missing or expired produces a single login.

use crate::client::ServiceProxy;
use crate::config::{ClientConfig, DiagnosticsConfig, ServerConfig};
use crate::credentials::CredentialSet;
use crate::diagnostics::CallRecorder;
use crate::error::DfaError;
use crate::transport::{ServiceIdentity, SoapTransport, LOGIN_SERVICE};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock};
use std::sync::Arc;
use tracing::debug;

/// Holds the session's credential set.
///
/// Reads are lock-free with respect to the guard. The token can only be
/// written through a [`RegenerationLock`], which holds the owning session's
/// [`ConcurrencyGuard`].
#[derive(Debug, Default)]
pub struct TokenStore {
    credentials: RwLock<CredentialSet>,
}

impl TokenStore {
    pub fn new(credentials: CredentialSet) -> Self {
        Self {
            credentials: RwLock::new(credentials),
        }
    }

    /// Copy of the current credential set.
    pub fn snapshot(&self) -> CredentialSet {
        self.credentials.read().clone()
    }

    /// The current token, if any.
    pub fn token(&self) -> Option<String> {
        self.credentials.read().token().map(str::to_string)
    }

    pub fn has_token(&self) -> bool {
        self.credentials.read().has_token()
    }

    fn write_token(&self, token: Option<String>) {
        self.credentials.write().token = token;
    }
}

/// Re-entrant lock serializing token regeneration for one session.
#[derive(Debug, Default)]
pub struct ConcurrencyGuard {
    lock: ReentrantMutex<()>,
}

impl ConcurrencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the guard is held by the current thread.
    pub fn lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.lock.lock()
    }
}

/// Exclusive right to regenerate one session's token.
///
/// Only [`ClientSession::lock_regeneration`] creates one, pairing the
/// session's guard with the same session's store.
pub struct RegenerationLock<'a> {
    _held: ReentrantMutexGuard<'a, ()>,
    store: &'a TokenStore,
}

impl RegenerationLock<'_> {
    /// Credential set as seen inside the critical section.
    pub fn credentials(&self) -> CredentialSet {
        self.store.snapshot()
    }

    pub fn replace_token(&self, token: Option<String>) {
        self.store.write_token(token);
    }
}

struct SessionShared {
    store: TokenStore,
    guard: ConcurrencyGuard,
    transport: Arc<dyn SoapTransport>,
    recorder: Option<CallRecorder>,
    server: ServerConfig,
}

/// A client session against one DFA server.
///
/// Cloning is cheap and shares all state.
#[derive(Clone)]
pub struct ClientSession {
    shared: Arc<SessionShared>,
}

impl ClientSession {
    /// Create a session with default server and diagnostics settings.
    pub fn new(credentials: CredentialSet, transport: Arc<dyn SoapTransport>) -> Self {
        Self::with_settings(
            credentials,
            transport,
            ServerConfig::default(),
            DiagnosticsConfig::default(),
        )
    }

    pub fn with_settings(
        credentials: CredentialSet,
        transport: Arc<dyn SoapTransport>,
        server: ServerConfig,
        diagnostics: DiagnosticsConfig,
    ) -> Self {
        let recorder = diagnostics
            .enabled
            .then(|| CallRecorder::new(server.application_name.clone(), diagnostics.capture_xml));

        Self {
            shared: Arc::new(SessionShared {
                store: TokenStore::new(credentials),
                guard: ConcurrencyGuard::new(),
                transport,
                recorder,
                server,
            }),
        }
    }

    /// Create a session from a loaded configuration.
    pub fn from_config(
        config: &ClientConfig,
        transport: Arc<dyn SoapTransport>,
    ) -> Result<Self, DfaError> {
        let credentials = config.credential_set()?;
        Ok(Self::with_settings(
            credentials,
            transport,
            config.server.clone(),
            config.diagnostics.clone(),
        ))
    }

    /// Identity of a named service on this session's server.
    pub fn identity(&self, name: &str) -> ServiceIdentity {
        Self::identity_for(&self.shared.server, name)
    }

    /// Identity of a named service on a configured server.
    pub fn identity_for(server: &ServerConfig, name: &str) -> ServiceIdentity {
        ServiceIdentity::new(name, server.base_url.clone(), server.api_version.clone())
    }

    /// Proxy for a named service, sharing this session's state.
    pub fn service(&self, name: &str) -> ServiceProxy {
        ServiceProxy::new(self.clone(), self.identity(name))
    }

    /// Obtain a token if none is present.
    pub fn ensure_token(&self) -> Result<String, DfaError> {
        self.service(LOGIN_SERVICE).ensure_token()
    }

    /// The current session token.
    pub fn token(&self) -> Option<String> {
        self.shared.store.token()
    }

    /// Drop the current token; the next call logs in again.
    pub fn invalidate_token(&self) {
        self.lock_regeneration().replace_token(None);
        debug!("Session token invalidated");
    }

    pub(crate) fn store(&self) -> &TokenStore {
        &self.shared.store
    }

    /// Block until this thread holds the session's regeneration guard.
    pub fn lock_regeneration(&self) -> RegenerationLock<'_> {
        RegenerationLock {
            _held: self.shared.guard.lock(),
            store: &self.shared.store,
        }
    }

    pub(crate) fn transport(&self) -> &dyn SoapTransport {
        self.shared.transport.as_ref()
    }

    pub(crate) fn recorder(&self) -> Option<&CallRecorder> {
        self.shared.recorder.as_ref()
    }

    /// Whether two handles share the same session state.
    pub fn same_session(&self, other: &ClientSession) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}
