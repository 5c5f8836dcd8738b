//! dgx-manager - remote operations for a single DGX host over SSH
//!
//! This crate connects to one remote host, pins its SSH host key on first
//! contact, and runs setup and maintenance playbooks through a single
//! authenticated session.
//!
//! # Features
//!
//! - Trust on first use: unknown host keys are fetched out of band, confirmed
//!   by the operator and appended to a `known_hosts` file; changed keys abort
//!   the connection
//! - POSIX single-quote quoting for every operator-supplied token
//! - A small session state machine: connect, execute, close
//! - Docker Model Runner playbook (`dgx dmr ...`)
//! - Connection profiles in ssh_config layout
//!
//! # Example Usage (CLI)
//!
//! ```bash
//! dgx --host=192.168.1.100 --user=admin --identity-file ~/.ssh/id_ed25519 dmr status
//! dgx --profile spark exec 'nvidia-smi --query-gpu=name --format=csv'
//! ```

pub mod config;
pub mod error;
pub mod playbook;
pub mod profile;
pub mod ssh;

// Re-exports for convenience
pub use config::{Args, Config};
pub use error::{Error, Result};
pub use playbook::{Executor, Outcome};
pub use ssh::{
    quote, CommandResult, ConnectionConfig, HostTrustStore, RemoteSession, SessionStatus,
    TrustDecision,
};
