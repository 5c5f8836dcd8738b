//! Connection profiles
//!
//! Profiles use the ssh_config block layout written by NVIDIA Sync:
//!
//! ```text
//! Host spark
//!     Hostname 192.168.0.10
//!     User alice
//!     Port 2222
//!     IdentityFile "~/.ssh/nvsync.key"
//! ```
//!
//! Only `Hostname`, `User`, `Port` and `IdentityFile` are read; other
//! directives, comments and wildcard blocks are skipped.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::ssh::config::DEFAULT_PORT;

/// One `Host` block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    /// Name after `Host`
    pub alias: String,
    /// `Hostname`, or the alias when absent
    pub host: String,
    pub user: Option<String>,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
}

impl Profile {
    fn new(alias: &str) -> Self {
        Self {
            alias: alias.to_string(),
            host: alias.to_string(),
            user: None,
            port: DEFAULT_PORT,
            identity_file: None,
        }
    }
}

/// Read profiles from a file
pub fn load_profiles(path: &Path) -> Result<Vec<Profile>> {
    let file = File::open(path).map_err(|e| {
        Error::config(format!("cannot read profile file {}: {}", path.display(), e))
    })?;
    parse_profiles(BufReader::new(file))
}

/// Parse profile blocks from any reader
pub fn parse_profiles<R: BufRead>(reader: R) -> Result<Vec<Profile>> {
    let mut profiles = Vec::new();
    let mut current: Option<Profile> = None;

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let Some((key, value)) = split_directive(&line) else {
            continue;
        };

        if key.eq_ignore_ascii_case("host") {
            profiles.extend(current.take());
            let alias = value.split_whitespace().next().unwrap_or_default();
            if !alias.is_empty() && !alias.contains(['*', '?', '!']) {
                current = Some(Profile::new(alias));
            }
            continue;
        }

        let Some(profile) = current.as_mut() else {
            continue;
        };
        let value = unquote(value);
        match key.to_ascii_lowercase().as_str() {
            "hostname" => profile.host = value.to_string(),
            "user" => profile.user = Some(value.to_string()),
            "port" => {
                profile.port = value.parse().map_err(|_| {
                    Error::config(format!("invalid port {:?} on line {}", value, index + 1))
                })?;
            }
            "identityfile" => profile.identity_file = Some(expand_home(value)),
            _ => {}
        }
    }

    profiles.extend(current);
    Ok(profiles)
}

/// Find a profile by alias, falling back to its hostname
pub fn find_profile<'a>(profiles: &'a [Profile], name: &str) -> Option<&'a Profile> {
    profiles
        .iter()
        .find(|p| p.alias == name)
        .or_else(|| profiles.iter().find(|p| p.host == name))
}

/// `Key value` or `Key=value`, ignoring blanks and comments
fn split_directive(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let split_at = line.find(|c: char| c.is_whitespace() || c == '=')?;
    let (key, rest) = line.split_at(split_at);
    let value = rest
        .trim_start()
        .strip_prefix('=')
        .unwrap_or(rest)
        .trim();
    Some((key, value))
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn expand_home(value: &str) -> PathBuf {
    match (value.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(value),
    }
}
