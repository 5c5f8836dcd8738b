//! Configuration and CLI argument parsing for dgx

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::playbook::dmr::DmrCommand;
use crate::profile::{find_profile, load_profiles};
use crate::ssh::{ConnectionConfig, HostTrustStore};

/// dgx CLI arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "dgx")]
#[command(version)]
#[command(about = "Run setup and maintenance playbooks on a DGX host over SSH")]
pub struct Args {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Print command results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Where and as whom to connect
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// SSH host to connect to
    #[arg(long, env = "DGX_HOST", global = true)]
    pub host: Option<String>,

    /// SSH port
    #[arg(long, env = "DGX_PORT", global = true)]
    pub port: Option<u16>,

    /// SSH username
    #[arg(long, env = "DGX_USER", global = true)]
    pub user: Option<String>,

    /// Path to SSH private key file (preferred over password)
    #[arg(long, env = "DGX_IDENTITY_FILE", global = true)]
    pub identity_file: Option<PathBuf>,

    /// SSH password (alternative to identity file)
    #[arg(long, env = "DGX_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,

    /// known_hosts file used to pin host keys [default: ~/.ssh/known_hosts]
    #[arg(long, env = "DGX_KNOWN_HOSTS", global = true)]
    pub known_hosts: Option<PathBuf>,

    /// Profile file in ssh_config format [default: <config dir>/dgx/profiles]
    #[arg(long, env = "DGX_PROFILES", global = true)]
    pub profiles: Option<PathBuf>,

    /// Profile to take host, port, user and identity file from
    #[arg(long, env = "DGX_PROFILE", global = true)]
    pub profile: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run a command line on the host exactly as written
    Exec {
        /// Shell command line, passed to the remote shell unmodified
        #[arg(value_parser = clap::builder::NonEmptyStringValueParser::new())]
        command: String,
    },

    /// Docker Model Runner helpers
    #[command(subcommand)]
    Dmr(DmrCommand),
}

/// Parsed and validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Connection parameters for the session
    pub connection: ConnectionConfig,

    /// Host key record
    pub known_hosts: PathBuf,
}

impl Config {
    /// Create Config from CLI connection arguments, merging in a profile if one is selected
    pub fn from_args(args: &ConnectionArgs) -> Result<Self> {
        let args = apply_profile(args)?;
        validate_args(&args)?;

        let (Some(host), Some(user)) = (args.host, args.user) else {
            return Err(Error::config("host and user are required"));
        };

        let mut connection = ConnectionConfig::new(host, user).with_port(args.port.unwrap_or(22));
        if let Some(path) = args.identity_file {
            connection = connection.with_identity_file(path);
        }
        if let Some(password) = args.password {
            connection = connection.with_password(password);
        }

        let known_hosts = match args.known_hosts {
            Some(path) => path,
            None => HostTrustStore::default_path()?,
        };

        Ok(Config {
            connection,
            known_hosts,
        })
    }
}

/// Default profile file location
pub fn default_profiles_path() -> Result<PathBuf> {
    let dir = dirs::config_dir()
        .ok_or_else(|| Error::config("cannot determine config directory for profiles"))?;
    Ok(dir.join("dgx").join("profiles"))
}

/// Fill unset connection fields from the selected profile
fn apply_profile(args: &ConnectionArgs) -> Result<ConnectionArgs> {
    let mut merged = args.clone();
    let Some(name) = &args.profile else {
        return Ok(merged);
    };

    let path = match &args.profiles {
        Some(path) => path.clone(),
        None => default_profiles_path()?,
    };
    let profiles = load_profiles(&path)?;
    let profile = find_profile(&profiles, name).ok_or_else(|| {
        Error::config(format!("profile {:?} not found in {}", name, path.display()))
    })?;

    merged.host = merged.host.or_else(|| Some(profile.host.clone()));
    merged.port = merged.port.or(Some(profile.port));
    merged.user = merged.user.or_else(|| profile.user.clone());
    merged.identity_file = merged.identity_file.or_else(|| profile.identity_file.clone());
    Ok(merged)
}

/// Validate connection arguments, reporting every problem at once
fn validate_args(args: &ConnectionArgs) -> Result<()> {
    let mut errors = Vec::new();

    if args.host.as_deref().is_none_or(str::is_empty) {
        errors.push("Missing required --host".to_string());
    }

    if args.user.as_deref().is_none_or(str::is_empty) {
        errors.push("Missing required --user".to_string());
    }

    // Must have either password or identity file
    let has_password = args.password.as_deref().is_some_and(|p| !p.is_empty());
    if !has_password && args.identity_file.is_none() {
        errors.push("Must provide either --identity-file or --password".to_string());
    }

    if let Some(ref key_path) = args.identity_file {
        if !key_path.exists() {
            errors.push(format!("SSH key file not found: {}", key_path.display()));
        }
    }

    if !errors.is_empty() {
        return Err(Error::config(errors.join("\n")));
    }

    Ok(())
}
