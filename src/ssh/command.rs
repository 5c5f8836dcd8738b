//! Command execution over SSH
//!
//! Provides the `CommandResult` struct and the `execute` operation of
//! [`RemoteSession`]. Commands are passed through untouched; anything
//! interpolated into them must already have gone through
//! [`quote`](super::quote::quote).

use async_trait::async_trait;
use russh::client;
use russh::{Channel, ChannelMsg, Sig};
use serde::Serialize;
use tracing::debug;

use super::session::RemoteSession;
use crate::error::{Error, Result};

/// Output of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    /// Standard output from the command
    pub stdout: String,

    /// Standard error from the command
    pub stderr: String,

    /// Exit status; `128 + n` when the command died from signal `n`
    pub exit_status: i32,
}

impl CommandResult {
    /// Check if the command exited with status 0
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    /// Get combined output (stdout + stderr)
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Shell-style exit status for a process killed by `signal`
fn signal_exit_status(signal: &Sig) -> i32 {
    let number = match signal {
        Sig::HUP => 1,
        Sig::INT => 2,
        Sig::QUIT => 3,
        Sig::ILL => 4,
        Sig::ABRT => 6,
        Sig::FPE => 8,
        Sig::KILL => 9,
        Sig::USR1 => 10,
        Sig::SEGV => 11,
        Sig::PIPE => 13,
        Sig::ALRM => 14,
        Sig::TERM => 15,
        _ => return 255,
    };
    128 + number
}

impl RemoteSession {
    /// Execute a fully assembled command with the remote default shell.
    ///
    /// Returns the collected output for any exit status, including non-zero.
    /// Fails with `SessionNotReady` unless the session is `Connected`, and
    /// with `TransportFailure` if the channel cannot be opened or ends
    /// before the command reports how it exited.
    pub async fn execute(&self, command: &str) -> Result<CommandResult> {
        let handle = self.begin_execute().await?;
        debug!("Executing remote command ({} bytes)", command.len());

        let result = async {
            let mut channel = handle
                .channel_open_session()
                .await
                .map_err(|e| self.transport_failure(format!("failed to open channel: {}", e)))?;

            channel
                .exec(true, command)
                .await
                .map_err(|e| self.transport_failure(format!("failed to exec command: {}", e)))?;

            collect_channel_output(&mut channel)
                .await
                .map_err(|reason| self.transport_failure(reason))
        }
        .await;

        self.end_execute().await;
        result
    }

    fn transport_failure(&self, reason: impl Into<String>) -> Error {
        Error::transport(self.config().host(), self.config().port(), reason)
    }
}

/// Messages arriving on one session channel
#[async_trait]
pub(crate) trait ChannelMessages: Send {
    /// `None` once the channel or the connection under it is gone
    async fn next_message(&mut self) -> Option<ChannelMsg>;
}

#[async_trait]
impl ChannelMessages for Channel<client::Msg> {
    async fn next_message(&mut self) -> Option<ChannelMsg> {
        self.wait().await
    }
}

/// Collect output until the command has exited and the output stream has
/// ended. Errors name what was missing when the messages stopped.
async fn collect_channel_output<M>(messages: &mut M) -> std::result::Result<CommandResult, String>
where
    M: ChannelMessages + ?Sized,
{
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_status = None;
    let mut got_eof = false;

    while let Some(msg) = messages.next_message().await {
        match msg {
            ChannelMsg::Data { data } => {
                stdout.extend_from_slice(&data);
            }
            ChannelMsg::ExtendedData { data, ext } => {
                // ext == 1 is stderr
                if ext == 1 {
                    stderr.extend_from_slice(&data);
                } else {
                    stdout.extend_from_slice(&data);
                }
            }
            ChannelMsg::ExitStatus { exit_status: status } => {
                exit_status = Some(i32::try_from(status).unwrap_or(i32::MAX));
                if got_eof {
                    break;
                }
            }
            ChannelMsg::ExitSignal { signal_name, .. } => {
                debug!("Remote command terminated by signal {:?}", signal_name);
                exit_status = Some(signal_exit_status(&signal_name));
                if got_eof {
                    break;
                }
            }
            ChannelMsg::Eof => {
                got_eof = true;
                if exit_status.is_some() {
                    break;
                }
            }
            ChannelMsg::Close => break,
            _ => {}
        }
    }

    let exit_status = exit_status
        .ok_or_else(|| "channel closed before the command reported an exit status".to_string())?;

    let result = CommandResult {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_status,
    };
    debug!(
        "Command completed: exit_status={}, stdout_len={}, stderr_len={}",
        result.exit_status,
        result.stdout.len(),
        result.stderr.len()
    );
    Ok(result)
}
