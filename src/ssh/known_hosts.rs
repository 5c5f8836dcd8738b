//! Host key trust store (trust on first use)
//!
//! Keys are pinned in an OpenSSH-compatible `known_hosts` file so that keys
//! trusted here are honoured by plain `ssh` and the other way round.
//!
//! The record is never rewritten, only appended to. If it exists but cannot
//! be read or parsed, verification fails; there is no code path that skips
//! the check. Host matching follows OpenSSH: comma separated patterns with
//! `*`/`?` wildcards and `!` negation, `[host]:port` for non-default ports,
//! and `|1|salt|hash` hashed names.

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hmac::{Hmac, Mac};
use russh::keys::PublicKey;
use sha1::Sha1;
use ssh_key::known_hosts::{Entry, HostPatterns, Marker};
use tracing::{debug, info, warn};

use super::keyscan::KeyScanner;
use super::prompt::{ask, Prompt};
use crate::error::{Error, Result};

/// Outcome of checking a presented host key
///
/// `Rejected` carries the reason; callers cannot mistake a pending or
/// declined first contact for a verified host.
#[derive(Debug)]
pub enum TrustDecision {
    /// Key is recorded for this host, or was just pinned after confirmation
    Trusted,
    /// Verification failed; the connection must not proceed
    Rejected(Error),
    /// The operator declined to trust an unknown host
    Aborted,
}

impl TrustDecision {
    pub fn is_trusted(&self) -> bool {
        matches!(self, TrustDecision::Trusted)
    }
}

/// `host` on port 22, `[host]:port` otherwise
pub fn host_pattern(host: &str, port: u16) -> String {
    if port == 22 {
        host.to_string()
    } else {
        format!("[{}]:{}", host, port)
    }
}

/// One parsed line of the record
struct Recorded {
    line: usize,
    entry: Entry,
}

/// Persisted record of accepted host keys plus the TOFU protocol around it
pub struct HostTrustStore {
    path: PathBuf,
    prompt: Arc<dyn Prompt>,
    scanner: Arc<dyn KeyScanner>,
}

impl HostTrustStore {
    pub fn new(
        path: impl Into<PathBuf>,
        prompt: Arc<dyn Prompt>,
        scanner: Arc<dyn KeyScanner>,
    ) -> Self {
        Self {
            path: path.into(),
            prompt,
            scanner,
        }
    }

    /// `~/.ssh/known_hosts`
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::config("cannot determine home directory for known_hosts"))?;
        Ok(home.join(".ssh").join("known_hosts"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decide whether a connection to `host:port` presenting `presented` may proceed.
    pub async fn verify(&self, host: &str, port: u16, presented: &PublicKey) -> TrustDecision {
        match self.evaluate(host, port, presented).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!("Host key verification for {}:{} failed: {}", host, port, e);
                TrustDecision::Rejected(e)
            }
        }
    }

    async fn evaluate(&self, host: &str, port: u16, presented: &PublicKey) -> Result<TrustDecision> {
        let corrupt = |reason: String| Error::corrupt(host, port, &self.path, reason);

        if !self.record_exists().map_err(corrupt)? {
            debug!("No known hosts file at {}", self.path.display());
            return self.bootstrap(host, port, presented).await;
        }

        let recorded = self.read_record().map_err(corrupt)?;
        let presented_bytes = presented
            .to_bytes()
            .map_err(|e| corrupt(format!("cannot encode presented key: {}", e)))?;
        let target = host_pattern(host, port);

        let matching: Vec<&Recorded> = recorded
            .iter()
            .filter(|r| host_matches(r.entry.host_patterns(), &target))
            .collect();

        if matching.iter().any(|r| {
            r.entry.marker() == Some(&Marker::Revoked) && same_key(&r.entry, &presented_bytes)
        }) {
            return Err(Error::HostKeyRevoked {
                host: host.to_string(),
                port,
                path: self.path.clone(),
            });
        }

        let pinned: Vec<&&Recorded> = matching
            .iter()
            .filter(|r| r.entry.marker().is_none())
            .collect();

        if pinned.is_empty() {
            debug!("No key recorded for {} in {}", target, self.path.display());
            return self.bootstrap(host, port, presented).await;
        }

        if pinned.iter().any(|r| same_key(&r.entry, &presented_bytes)) {
            debug!("Host key for {}:{} matches known hosts", host, port);
            return Ok(TrustDecision::Trusted);
        }

        Err(Error::HostKeyMismatch {
            host: host.to_string(),
            port,
            path: self.path.clone(),
            line: pinned[0].line,
        })
    }

    /// `false` only when the file is absent; anything odd about an existing
    /// file is a corrupt store.
    fn record_exists(&self) -> std::result::Result<bool, String> {
        let metadata = match fs::metadata(&self.path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.to_string()),
        };

        if !metadata.is_file() {
            return Err("not a regular file".to_string());
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = metadata.permissions().mode();
            if mode & 0o002 != 0 {
                return Err(format!("file is world-writable (mode {:o})", mode & 0o777));
            }
        }

        Ok(true)
    }

    /// Parse every line strictly; one bad line spoils the whole record.
    fn read_record(&self) -> std::result::Result<Vec<Recorded>, String> {
        let contents = fs::read_to_string(&self.path).map_err(|e| e.to_string())?;
        let mut recorded = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let entry = line
                .parse::<Entry>()
                .map_err(|e| format!("line {}: {}", index + 1, e))?;
            recorded.push(Recorded {
                line: index + 1,
                entry,
            });
        }
        Ok(recorded)
    }

    async fn bootstrap(&self, host: &str, port: u16, presented: &PublicKey) -> Result<TrustDecision> {
        let target = host_pattern(host, port);
        warn!("First contact with {}:{}, host key is not pinned", host, port);

        let warning = format!(
            "The authenticity of host '{}' can't be established. \
             It presented a {} key with fingerprint {}, which is not recorded in {}.",
            target,
            presented.algorithm(),
            presented.fingerprint(Default::default()),
            self.path.display()
        );
        let question = format!("Fetch the host key of {} out of band and trust it?", target);
        if !ask(Arc::clone(&self.prompt), warning, question).await? {
            info!("Operator declined to trust {}", target);
            return Ok(TrustDecision::Aborted);
        }

        let scanned = self.scanner.scan(host, port).await?;
        let Some(confirmed) = scanned
            .iter()
            .find(|key| key.key_data() == presented.key_data())
        else {
            return Err(Error::ScannedKeyMismatch {
                host: host.to_string(),
                port,
            });
        };

        self.append(&target, confirmed)?;
        info!(
            "Pinned {} host key for {} in {}",
            confirmed.algorithm(),
            target,
            self.path.display()
        );
        Ok(TrustDecision::Trusted)
    }

    fn append(&self, pattern: &str, key: &PublicKey) -> Result<()> {
        let encoded = key
            .to_openssh()
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
        let mut line = format!("{} {}\n", pattern, encoded.trim());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                set_permissions(parent, 0o700)?;
            }
        }

        let mut options = OpenOptions::new();
        options.create(true).append(true).read(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path)?;

        if !ends_with_newline(&mut file)? {
            line.insert(0, '\n');
        }
        file.write_all(line.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }
}

impl std::fmt::Debug for HostTrustStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostTrustStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Empty files count as ending with a newline.
fn ends_with_newline(file: &mut fs::File) -> Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn same_key(entry: &Entry, presented: &[u8]) -> bool {
    entry
        .public_key()
        .to_bytes()
        .is_ok_and(|recorded| recorded == presented)
}

/// OpenSSH host matching: any negated pattern that matches vetoes the entry.
fn host_matches(patterns: &HostPatterns, target: &str) -> bool {
    let target = target.to_ascii_lowercase();
    match patterns {
        HostPatterns::Patterns(patterns) => {
            let mut matched = false;
            for pattern in patterns {
                let pattern = pattern.to_ascii_lowercase();
                match pattern.strip_prefix('!') {
                    Some(negated) if glob_match(negated, &target) => return false,
                    Some(_) => {}
                    None => matched |= glob_match(&pattern, &target),
                }
            }
            matched
        }
        HostPatterns::HashedName { salt, hash } => {
            let Ok(mut mac) = Hmac::<Sha1>::new_from_slice(salt) else {
                return false;
            };
            mac.update(target.as_bytes());
            mac.verify_slice(hash).is_ok()
        }
    }
}

/// `*` matches any run of characters, `?` exactly one.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(&'*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, consumed)) => {
                    p = star + 1;
                    t = consumed + 1;
                    backtrack = Some((star, consumed + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
