//! Out-of-band host key lookup
//!
//! On first contact the key to pin is fetched over a separate connection
//! made by `ssh-keyscan`, never taken from the handshake being verified.

use std::process::Stdio;

use async_trait::async_trait;
use russh::keys::{parse_public_key_base64, PublicKey};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Seconds `ssh-keyscan` waits for the host before giving up
pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 10;

/// Fetches the public keys a host offers, independently of any open session
#[async_trait]
pub trait KeyScanner: Send + Sync {
    async fn scan(&self, host: &str, port: u16) -> Result<Vec<PublicKey>>;
}

/// [`KeyScanner`] backed by the system `ssh-keyscan` binary
#[derive(Debug, Clone)]
pub struct SshKeyscan {
    program: String,
    timeout_secs: u64,
}

impl SshKeyscan {
    pub fn new() -> Self {
        Self {
            program: "ssh-keyscan".to_string(),
            timeout_secs: DEFAULT_SCAN_TIMEOUT_SECS,
        }
    }

    /// Use a different scanner executable
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

impl Default for SshKeyscan {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyScanner for SshKeyscan {
    async fn scan(&self, host: &str, port: u16) -> Result<Vec<PublicKey>> {
        let scan_failed = |reason: String| Error::KeyScanFailed {
            host: host.to_string(),
            port,
            reason,
        };

        debug!("Running {} for {}:{}", self.program, host, port);
        let output = Command::new(&self.program)
            .arg("-p")
            .arg(port.to_string())
            .arg("-T")
            .arg(self.timeout_secs.to_string())
            .arg("--")
            .arg(host)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| scan_failed(format!("failed to run {}: {}", self.program, e)))?;

        let keys = parse_keyscan_output(&String::from_utf8_lossy(&output.stdout));
        if keys.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(scan_failed(format!(
                "{} returned no host keys ({}){}",
                self.program,
                output.status,
                if stderr.trim().is_empty() {
                    String::new()
                } else {
                    format!(": {}", stderr.trim())
                }
            )));
        }

        Ok(keys)
    }
}

/// Extract the public keys from `ssh-keyscan` output.
///
/// Each line is `host key-type base64`; comment lines are skipped and so
/// are lines whose key does not decode.
pub fn parse_keyscan_output(output: &str) -> Vec<PublicKey> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let (_host, algorithm, encoded) = (fields.next()?, fields.next()?, fields.next()?);
            match parse_public_key_base64(encoded) {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!("Ignoring unreadable {} key from scan: {}", algorithm, e);
                    None
                }
            }
        })
        .collect()
}

/// Scanner that hands back fixed keys and counts how often it was asked
#[cfg(test)]
pub(crate) struct StaticScanner {
    keys: Vec<PublicKey>,
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl StaticScanner {
    pub(crate) fn new(keys: Vec<PublicKey>) -> Self {
        Self {
            keys,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl KeyScanner for StaticScanner {
    async fn scan(&self, host: &str, port: u16) -> Result<Vec<PublicKey>> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.keys.is_empty() {
            return Err(Error::KeyScanFailed {
                host: host.to_string(),
                port,
                reason: "no host keys".to_string(),
            });
        }
        Ok(self.keys.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ED25519_A: &str = "AAAAC3NzaC1lZDI1NTE5AAAAIJY8QRdtjmb8BtUKdqTUuwgIqgL+G+K4FN9i1I1P+sOA";
    const ED25519_B: &str = "AAAAC3NzaC1lZDI1NTE5AAAAIK6DQOBNZF7j/Vd0amps8h37Wni16dMvIUdIwbbXS22Z";

    #[test]
    fn test_parse_keyscan_output() {
        let output = format!(
            "# dgx:22 SSH-2.0-OpenSSH_9.6\n\
             dgx ssh-ed25519 {ED25519_A}\n\
             \n\
             [dgx]:2222 ssh-ed25519 {ED25519_B}\n"
        );
        let keys = parse_keyscan_output(&output);
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0], parse_public_key_base64(ED25519_A).unwrap());
        assert_eq!(keys[1], parse_public_key_base64(ED25519_B).unwrap());
    }

    #[test]
    fn test_parse_keyscan_output_skips_garbage() {
        let output = format!("dgx ssh-ed25519 not-base64!!\ndgx\ndgx ssh-ed25519 {ED25519_A}\n");
        assert_eq!(parse_keyscan_output(&output).len(), 1);
    }

    #[test]
    fn test_parse_keyscan_output_empty() {
        assert!(parse_keyscan_output("").is_empty());
        assert!(parse_keyscan_output("# only a banner\n").is_empty());
    }

    #[tokio::test]
    async fn test_missing_scanner_binary_is_scan_failure() {
        let scanner = SshKeyscan::new().with_program("/nonexistent/ssh-keyscan");
        let err = scanner.scan("dgx", 22).await.unwrap_err();
        assert!(matches!(err, Error::KeyScanFailed { ref host, port: 22, .. } if host == "dgx"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_scanner_with_no_output_is_scan_failure() {
        let scanner = SshKeyscan::new().with_program("true");
        let err = scanner.scan("dgx", 2222).await.unwrap_err();
        assert!(err.to_string().contains("no host keys"));
    }
}
