//! Connection parameters for the administrative host

use std::fmt;
use std::path::{Path, PathBuf};

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// How the session proves the user's identity
#[derive(Clone, PartialEq, Eq)]
pub enum Credential<'a> {
    /// Private key file on local disk
    IdentityFile(&'a Path),
    /// Plain password
    Password(&'a str),
}

impl fmt::Debug for Credential<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::IdentityFile(path) => f.debug_tuple("IdentityFile").field(path).finish(),
            Credential::Password(_) => f.write_str("Password(<redacted>)"),
        }
    }
}

/// SSH connection configuration
///
/// Built once with the `with_*` methods and then handed to
/// [`RemoteSession`](super::session::RemoteSession), which never mutates it.
#[derive(Clone)]
pub struct ConnectionConfig {
    host: String,
    port: u16,
    user: String,
    identity_file: Option<PathBuf>,
    password: Option<String>,
}

impl ConnectionConfig {
    /// Create a configuration with no credential on the default port
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            user: user.into(),
            identity_file: None,
            password: None,
        }
    }

    /// Set the SSH port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the private key file used for authentication
    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    /// Set password authentication; an empty password counts as none
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into()).filter(|p| !p.is_empty());
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn identity_file(&self) -> Option<&Path> {
        self.identity_file.as_deref()
    }

    /// The credential to authenticate with: the identity file wins over the password.
    pub fn credential(&self) -> Option<Credential<'_>> {
        match (&self.identity_file, &self.password) {
            (Some(path), _) => Some(Credential::IdentityFile(path)),
            (None, Some(password)) => Some(Credential::Password(password)),
            (None, None) => None,
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("identity_file", &self.identity_file)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
