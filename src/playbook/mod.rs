//! Playbooks
//!
//! A playbook turns an operator request into a short sequence of remote
//! command lines and runs them through an [`Executor`], stopping at the
//! first step that exits non-zero.

pub mod dmr;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::ssh::{CommandResult, RemoteSession};

/// Runs fully assembled command lines on the host
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, command: &str) -> Result<CommandResult>;
}

#[async_trait]
impl Executor for RemoteSession {
    async fn execute(&self, command: &str) -> Result<CommandResult> {
        RemoteSession::execute(self, command).await
    }
}

/// One executed command line and what it produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    pub command: String,
    #[serde(flatten)]
    pub result: CommandResult,
}

/// Result of running a playbook
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Steps ran; the last one is the one that stopped the sequence
    Completed {
        steps: Vec<Step>,
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    /// Nothing was executed
    Skipped { reason: String },
}

impl Outcome {
    pub fn completed(steps: Vec<Step>) -> Self {
        Outcome::Completed { steps, note: None }
    }

    /// Exit status to report for the whole run
    pub fn exit_status(&self) -> i32 {
        match self {
            Outcome::Completed { steps, .. } => steps.last().map_or(0, |s| s.result.exit_status),
            Outcome::Skipped { .. } => 0,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_status() == 0
    }
}

/// Run command lines in order until one fails
pub async fn run_steps<I, S>(executor: &dyn Executor, commands: I) -> Result<Vec<Step>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut steps = Vec::new();
    for command in commands {
        let command = command.into();
        debug!("Running step {}", steps.len() + 1);
        let result = executor.execute(&command).await?;
        let failed = !result.success();
        if failed {
            warn!("Step exited with status {}", result.exit_status);
        }
        steps.push(Step { command, result });
        if failed {
            break;
        }
    }
    Ok(steps)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Executor that records command lines and replays canned results
    #[derive(Default)]
    pub(crate) struct RecordingExecutor {
        commands: Mutex<Vec<String>>,
        results: Mutex<VecDeque<CommandResult>>,
    }

    impl RecordingExecutor {
        /// Replay `statuses` as exit statuses, then succeed
        pub(crate) fn with_statuses(statuses: &[i32]) -> Self {
            let results = statuses
                .iter()
                .map(|&exit_status| CommandResult {
                    exit_status,
                    ..Default::default()
                })
                .collect();
            Self {
                commands: Mutex::default(),
                results: Mutex::new(results),
            }
        }

        pub(crate) fn commands(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Executor for RecordingExecutor {
        async fn execute(&self, command: &str) -> Result<CommandResult> {
            self.commands.lock().unwrap().push(command.to_string());
            Ok(self.results.lock().unwrap().pop_front().unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingExecutor;
    use super::*;

    #[tokio::test]
    async fn test_run_steps_stops_at_first_failure() {
        let executor = RecordingExecutor::with_statuses(&[0, 3]);
        let steps = run_steps(&executor, ["true", "false", "never"]).await.unwrap();

        assert_eq!(executor.commands(), vec!["true", "false"]);
        assert_eq!(steps.len(), 2);
        assert_eq!(Outcome::completed(steps).exit_status(), 3);
    }

    #[test]
    fn test_outcome_json() {
        let outcome = Outcome::completed(vec![Step {
            command: "uptime".to_string(),
            result: CommandResult {
                stdout: "up".to_string(),
                stderr: String::new(),
                exit_status: 0,
            },
        }]);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "completed");
        assert_eq!(json["steps"][0]["command"], "uptime");
        assert_eq!(json["steps"][0]["exit_status"], 0);
        assert!(json.get("note").is_none());

        let skipped = Outcome::Skipped {
            reason: "cancelled".to_string(),
        };
        assert!(skipped.success());
        assert_eq!(serde_json::to_value(&skipped).unwrap()["outcome"], "skipped");
    }
}
