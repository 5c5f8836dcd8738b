//! SSH client handler implementation
//!
//! Implements the `russh::client::Handler` trait so that the key a server
//! presents during the handshake is checked against the [`HostTrustStore`]
//! before authentication starts.

use std::sync::Arc;

use russh::keys::PublicKey;
use tracing::debug;

use super::known_hosts::{HostTrustStore, TrustDecision};
use crate::error::Error;

/// russh client handler bound to one target host
pub struct TrustingHandler {
    host: String,
    port: u16,
    trust: Arc<HostTrustStore>,
}

impl TrustingHandler {
    pub fn new(host: impl Into<String>, port: u16, trust: Arc<HostTrustStore>) -> Self {
        Self {
            host: host.into(),
            port,
            trust,
        }
    }
}

impl russh::client::Handler for TrustingHandler {
    type Error = Error;

    /// Verify the server's host key
    ///
    /// Anything other than [`TrustDecision::Trusted`] becomes an error, which
    /// makes russh tear the connection down before authentication.
    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            "Checking {} host key for {}:{}",
            server_public_key.algorithm(),
            self.host,
            self.port
        );
        match self
            .trust
            .verify(&self.host, self.port, server_public_key)
            .await
        {
            TrustDecision::Trusted => Ok(true),
            TrustDecision::Rejected(e) => Err(e),
            TrustDecision::Aborted => Err(Error::HostKeyUnknown {
                host: self.host.clone(),
                port: self.port,
            }),
        }
    }
}

impl std::fmt::Debug for TrustingHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustingHandler")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("known_hosts", &self.trust.path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::keyscan::StaticScanner;
    use crate::ssh::prompt::ScriptedPrompt;
    use russh::client::Handler;
    use russh::keys::parse_public_key_base64;

    const KEY_1: &str = "AAAAC3NzaC1lZDI1NTE5AAAAIJY8QRdtjmb8BtUKdqTUuwgIqgL+G+K4FN9i1I1P+sOA";
    const KEY_2: &str = "AAAAC3NzaC1lZDI1NTE5AAAAIK6DQOBNZF7j/Vd0amps8h37Wni16dMvIUdIwbbXS22Z";

    fn handler(dir: &tempfile::TempDir, answers: &[bool]) -> TrustingHandler {
        let store = HostTrustStore::new(
            dir.path().join("known_hosts"),
            Arc::new(ScriptedPrompt::answering(answers.iter().copied())),
            Arc::new(StaticScanner::new(vec![parse_public_key_base64(KEY_1).unwrap()])),
        );
        TrustingHandler::new("dgx", 22, Arc::new(store))
    }

    #[tokio::test]
    async fn test_trusted_key_is_accepted() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut handler = handler(&dir, &[true]);
        let key = parse_public_key_base64(KEY_1).unwrap();

        assert!(handler.check_server_key(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_declined_first_contact_is_unknown_host_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut handler = handler(&dir, &[false]);
        let key = parse_public_key_base64(KEY_1).unwrap();

        let err = handler.check_server_key(&key).await.unwrap_err();
        assert!(matches!(err, Error::HostKeyUnknown { port: 22, .. }));
    }

    #[tokio::test]
    async fn test_changed_key_is_mismatch_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("known_hosts");
        std::fs::write(&path, format!("dgx ssh-ed25519 {KEY_1}\n")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        }
        let mut handler = handler(&dir, &[true]);
        let key = parse_public_key_base64(KEY_2).unwrap();

        let err = handler.check_server_key(&key).await.unwrap_err();
        assert!(matches!(err, Error::HostKeyMismatch { .. }));
        assert!(err.is_security_rejection());
    }
}
