//! Trusted remote execution
//!
//! Host key pinning, shell quoting and the single-host SSH session that the
//! playbooks run their commands through.

pub mod command;
pub mod config;
pub mod handler;
pub mod keyscan;
pub mod known_hosts;
pub mod prompt;
pub mod quote;
pub mod session;

// Re-exports
pub use command::CommandResult;
pub use config::{ConnectionConfig, Credential};
pub use handler::TrustingHandler;
pub use keyscan::{KeyScanner, SshKeyscan};
pub use known_hosts::{HostTrustStore, TrustDecision};
pub use prompt::{LinePrompt, Prompt};
pub use quote::{quote, quote_all};
pub use session::{RemoteSession, SessionStatus};
