//! Error types for the DGX remote operations core

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for dgx-manager
#[derive(Debug, Error)]
pub enum Error {
    /// First contact with a host whose key the operator did not accept
    #[error("unknown host {host}:{port} (first contact): host key was not accepted")]
    HostKeyUnknown { host: String, port: u16 },

    /// The recorded key differs from the one the host presented
    #[error(
        "HOST KEY MISMATCH for {host}:{port}: the key presented does not match the key \
         recorded at {}:{line}. This may indicate a man-in-the-middle attack; \
         the connection was aborted",
        path.display()
    )]
    HostKeyMismatch {
        host: String,
        port: u16,
        path: PathBuf,
        line: usize,
    },

    /// The handshake key differs from the key fetched out of band on first contact
    #[error(
        "HOST KEY MISMATCH for {host}:{port}: the key presented during the handshake differs \
         from the key fetched independently. This may indicate a man-in-the-middle attack; \
         nothing was recorded"
    )]
    ScannedKeyMismatch { host: String, port: u16 },

    /// The presented key is marked `@revoked` in the known hosts file
    #[error("host key presented by {host}:{port} is marked @revoked in {}", path.display())]
    HostKeyRevoked {
        host: String,
        port: u16,
        path: PathBuf,
    },

    /// Known hosts file exists but cannot be trusted as a record
    #[error(
        "cannot verify host key for {host}:{port}: known hosts file {} is unusable: {reason}; \
         refusing to connect without host key verification",
        path.display()
    )]
    TrustStoreCorrupt {
        host: String,
        port: u16,
        path: PathBuf,
        reason: String,
    },

    /// Out-of-band host key fetch failed during first contact
    #[error("could not fetch host key for {host}:{port} out of band: {reason}")]
    KeyScanFailed {
        host: String,
        port: u16,
        reason: String,
    },

    /// TCP connect or SSH handshake failed
    #[error("connection to {host}:{port} failed: {reason}")]
    ConnectionRefused {
        host: String,
        port: u16,
        reason: String,
    },

    /// Password or key rejected, or key could not be loaded
    #[error("authentication as {user} on {host}:{port} failed: {reason}")]
    AuthenticationFailed {
        user: String,
        host: String,
        port: u16,
        reason: String,
    },

    /// Session used outside the `Connected` state
    #[error("session not ready: operation requires a connected session (state: {state})")]
    SessionNotReady { state: &'static str },

    /// Command could not complete because the transport failed
    #[error("transport failure on {host}:{port}: {reason}")]
    TransportFailure {
        host: String,
        port: u16,
        reason: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SSH protocol error
    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),
}

/// Result type alias using Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a transport failure for `host:port`
    pub fn transport(host: impl Into<String>, port: u16, reason: impl Into<String>) -> Self {
        Error::TransportFailure {
            host: host.into(),
            port,
            reason: reason.into(),
        }
    }

    /// Create a corrupt trust store error for a check against `host:port`
    pub fn corrupt(
        host: impl Into<String>,
        port: u16,
        path: impl Into<PathBuf>,
        reason: impl Into<String>,
    ) -> Self {
        Error::TrustStoreCorrupt {
            host: host.into(),
            port,
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for the outcomes of host key verification that abort a connection
    pub fn is_security_rejection(&self) -> bool {
        matches!(
            self,
            Error::HostKeyUnknown { .. }
                | Error::HostKeyMismatch { .. }
                | Error::ScannedKeyMismatch { .. }
                | Error::HostKeyRevoked { .. }
                | Error::TrustStoreCorrupt { .. }
                | Error::KeyScanFailed { .. }
        )
    }
}
