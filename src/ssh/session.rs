//! Remote session lifecycle
//!
//! A [`RemoteSession`] owns one authenticated connection to the configured
//! host. It moves `Disconnected -> Connecting -> {Connected, Failed}`;
//! `Connected <-> Executing` for each command; `Closed` is terminal.
//! The handle only becomes reachable in `Connected`, and only after the
//! host key passed [`HostTrustStore`] verification during the handshake.

use std::fmt;
use std::sync::Arc;

use russh::client::{self, Handle};
use russh::keys::{load_secret_key, PrivateKey, PrivateKeyWithHashAlg};
use russh::Disconnect;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::config::{ConnectionConfig, Credential};
use super::handler::TrustingHandler;
use super::known_hosts::HostTrustStore;
use crate::error::{Error, Result};

/// Observable lifecycle state of a [`RemoteSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
    Executing,
    Failed,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
            SessionStatus::Executing => "executing",
            SessionStatus::Failed => "failed",
            SessionStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) type SessionHandle = Arc<Handle<TrustingHandler>>;

enum SessionState {
    Disconnected,
    Connecting,
    Connected(SessionHandle),
    Executing(SessionHandle),
    Failed,
    Closed,
}

impl SessionState {
    fn status(&self) -> SessionStatus {
        match self {
            SessionState::Disconnected => SessionStatus::Disconnected,
            SessionState::Connecting => SessionStatus::Connecting,
            SessionState::Connected(_) => SessionStatus::Connected,
            SessionState::Executing(_) => SessionStatus::Executing,
            SessionState::Failed => SessionStatus::Failed,
            SessionState::Closed => SessionStatus::Closed,
        }
    }

    fn not_ready(&self) -> Error {
        Error::SessionNotReady {
            state: self.status().as_str(),
        }
    }
}

/// Authentication method resolved from config before any network I/O
enum AuthMethod {
    KeyFile(Arc<PrivateKey>),
    Password(String),
}

/// One authenticated connection to the administrative host
///
/// Exactly one `execute` may be in flight at a time; a second concurrent
/// call fails with `SessionNotReady` instead of sharing the connection.
pub struct RemoteSession {
    config: ConnectionConfig,
    trust: Arc<HostTrustStore>,
    state: Mutex<SessionState>,
}

impl RemoteSession {
    /// Create a session in the `Disconnected` state. Does no I/O.
    pub fn new(config: ConnectionConfig, trust: Arc<HostTrustStore>) -> Self {
        Self {
            config,
            trust,
            state: Mutex::new(SessionState::Disconnected),
        }
    }

    /// Open, verify and authenticate a session in one step.
    pub async fn connect(config: ConnectionConfig, trust: Arc<HostTrustStore>) -> Result<Self> {
        let session = Self::new(config, trust);
        session.establish().await?;
        Ok(session)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub async fn status(&self) -> SessionStatus {
        self.state.lock().await.status()
    }

    /// Connect a `Disconnected` or `Failed` session.
    ///
    /// Already connected sessions return immediately. A session that is
    /// connecting or closed is not ready.
    pub async fn establish(&self) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            match *state {
                SessionState::Connected(_) | SessionState::Executing(_) => {
                    debug!("Already connected to {}", self.config.host());
                    return Ok(());
                }
                SessionState::Disconnected | SessionState::Failed => {
                    *state = SessionState::Connecting;
                }
                SessionState::Connecting | SessionState::Closed => return Err(state.not_ready()),
            }
        }

        let result = self.open_transport().await;

        let mut state = self.state.lock().await;
        match result {
            Ok(handle) => {
                if matches!(*state, SessionState::Closed) {
                    drop(state);
                    let _ = handle
                        .disconnect(Disconnect::ByApplication, "", "en")
                        .await;
                    return Err(Error::SessionNotReady { state: "closed" });
                }
                *state = SessionState::Connected(Arc::new(handle));
                info!(
                    "Connected to {}@{}:{}",
                    self.config.user(),
                    self.config.host(),
                    self.config.port()
                );
                Ok(())
            }
            Err(e) => {
                if !matches!(*state, SessionState::Closed) {
                    *state = SessionState::Failed;
                }
                error!(
                    "Connection to {}:{} failed: {}",
                    self.config.host(),
                    self.config.port(),
                    e
                );
                Err(e)
            }
        }
    }

    async fn open_transport(&self) -> Result<Handle<TrustingHandler>> {
        let auth = self.resolve_auth_method()?;
        let (host, port) = (self.config.host(), self.config.port());

        info!("Connecting to SSH server {}:{}...", host, port);
        let handler = TrustingHandler::new(host, port, Arc::clone(&self.trust));
        let russh_config = Arc::new(client::Config::default());

        let mut handle = client::connect(russh_config, (host, port), handler)
            .await
            .map_err(|e| self.classify_connect_error(e))?;

        self.authenticate(&mut handle, auth).await?;
        Ok(handle)
    }

    /// Trust failures keep their own kind; anything else that stops the
    /// handshake means the host could not be reached.
    fn classify_connect_error(&self, err: Error) -> Error {
        let reason = match err {
            Error::Protocol(e) => e.to_string(),
            Error::Io(e) => e.to_string(),
            other => return other,
        };
        Error::ConnectionRefused {
            host: self.config.host().to_string(),
            port: self.config.port(),
            reason,
        }
    }

    fn auth_failed(&self, reason: impl Into<String>) -> Error {
        Error::AuthenticationFailed {
            user: self.config.user().to_string(),
            host: self.config.host().to_string(),
            port: self.config.port(),
            reason: reason.into(),
        }
    }

    fn resolve_auth_method(&self) -> Result<AuthMethod> {
        match self.config.credential() {
            Some(Credential::IdentityFile(path)) => {
                let key = load_secret_key(path, None).map_err(|e| {
                    self.auth_failed(format!("failed to load key {}: {}", path.display(), e))
                })?;
                Ok(AuthMethod::KeyFile(Arc::new(key)))
            }
            Some(Credential::Password(password)) => Ok(AuthMethod::Password(password.to_string())),
            None => Err(Error::config(
                "no credential configured (require an identity file or a password)",
            )),
        }
    }

    async fn authenticate(
        &self,
        handle: &mut Handle<TrustingHandler>,
        auth: AuthMethod,
    ) -> Result<()> {
        let user = self.config.user();
        let (method, result) = match auth {
            AuthMethod::KeyFile(key) => {
                debug!("Attempting key authentication for user '{}'", user);
                let hash_alg = handle
                    .best_supported_rsa_hash()
                    .await
                    .map_err(|e| self.auth_failed(e.to_string()))?
                    .flatten();
                let result = handle
                    .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key, hash_alg))
                    .await;
                ("Key", result)
            }
            AuthMethod::Password(password) => {
                debug!("Attempting password authentication for user '{}'", user);
                ("Password", handle.authenticate_password(user, password).await)
            }
        };

        let result = result.map_err(|e| self.auth_failed(e.to_string()))?;
        if !result.success() {
            return Err(self.auth_failed(format!("{} authentication rejected", method)));
        }
        info!("{} authentication successful", method);
        Ok(())
    }

    /// Move `Connected -> Executing` and hand out the transport.
    pub(crate) async fn begin_execute(&self) -> Result<SessionHandle> {
        let mut state = self.state.lock().await;
        match &*state {
            SessionState::Connected(handle) => {
                let handle = Arc::clone(handle);
                *state = SessionState::Executing(Arc::clone(&handle));
                Ok(handle)
            }
            other => Err(other.not_ready()),
        }
    }

    /// Move `Executing -> Connected` unless the session was closed meanwhile.
    pub(crate) async fn end_execute(&self) {
        let mut state = self.state.lock().await;
        if let SessionState::Executing(handle) = &*state {
            *state = SessionState::Connected(Arc::clone(handle));
        }
    }

    /// Release the transport. Safe to call any number of times.
    ///
    /// Closing while a command runs makes that `execute` fail with a
    /// transport failure.
    pub async fn close(&self) {
        let previous = {
            let mut state = self.state.lock().await;
            std::mem::replace(&mut *state, SessionState::Closed)
        };

        match previous {
            SessionState::Connected(handle) | SessionState::Executing(handle) => {
                if let Err(e) = handle
                    .disconnect(Disconnect::ByApplication, "", "en")
                    .await
                {
                    debug!("Disconnect reported: {}", e);
                }
                info!("SSH connection to {} closed", self.config.host());
            }
            SessionState::Closed => {}
            _ => debug!("Session closed before it connected"),
        }
    }
}

impl fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self
            .state
            .try_lock()
            .map(|state| state.status().as_str())
            .unwrap_or("busy");
        f.debug_struct("RemoteSession")
            .field("host", &self.config.host())
            .field("port", &self.config.port())
            .field("user", &self.config.user())
            .field("status", &status)
            .finish()
    }
}
