//! Docker Model Runner helpers
//!
//! Installs, updates and drives `docker model` on the host. Model names,
//! prompts and pass-through flags are operator input and always reach the
//! remote shell quoted.

use clap::Subcommand;
use tracing::info;

use super::{run_steps, Executor, Outcome};
use crate::error::{Error, Result};
use std::sync::Arc;

use crate::ssh::prompt::ask;
use crate::ssh::{quote, quote_all, Prompt};

/// Prerequisites: Docker Engine, the model plugin and the NVIDIA runtime
const SETUP_SCRIPT: &str = r#"set -euo pipefail
if ! command -v docker >/dev/null 2>&1; then
  curl -fsSL https://get.docker.com | sudo sh
fi
if command -v apt-get >/dev/null 2>&1; then
  sudo apt-get update
  if ! dpkg -s docker-model-plugin >/dev/null 2>&1; then
    sudo apt-get install -y docker-model-plugin
  fi
  if ! dpkg -s nvidia-container-toolkit >/dev/null 2>&1; then
    sudo apt-get install -y nvidia-container-toolkit
  fi
elif command -v dnf >/dev/null 2>&1; then
  sudo dnf install -y docker-model-plugin nvidia-container-toolkit
fi
if command -v nvidia-ctk >/dev/null 2>&1; then
  sudo nvidia-ctk runtime configure --runtime=docker >/dev/null 2>&1 || true
  sudo systemctl restart docker >/dev/null 2>&1 || true
fi
sudo usermod -aG docker "$(whoami)" >/dev/null 2>&1 || true
"#;

const INSTALL_RUNNER: &str = "docker model install-runner --gpu auto";
const DEFAULT_LOG_ARGS: [&str; 2] = ["--tail", "200"];

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum DmrCommand {
    /// Install Docker Engine, the model plugin and the GPU runtime (uses sudo)
    Setup,

    /// Install the Model Runner controller container
    Install,

    /// Reinstall the Model Runner controller container
    Update {
        /// Also delete the cached runner images
        #[arg(long)]
        purge_images: bool,
    },

    /// Show Model Runner status
    Status,

    /// Show Model Runner logs [default: --tail 200]
    Logs {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// List local models
    List {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Pull a model
    Pull {
        model: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Run a single prompt against a model
    Run {
        model: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        prompt: Vec<String>,
    },

    /// Remove the Model Runner controller container
    Uninstall {
        /// Also delete the cached runner images
        #[arg(long)]
        images: bool,
    },
}

impl DmrCommand {
    /// Command lines this operation runs, in order
    pub fn command_lines(&self) -> Vec<String> {
        match self {
            DmrCommand::Setup => vec![format!("bash -c {}", quote(SETUP_SCRIPT))],
            DmrCommand::Install => vec![INSTALL_RUNNER.to_string()],
            DmrCommand::Update { purge_images } => {
                vec![uninstall_runner(*purge_images), INSTALL_RUNNER.to_string()]
            }
            DmrCommand::Status => {
                vec!["docker model status --json || docker model status || true".to_string()]
            }
            DmrCommand::Logs { args } if args.is_empty() => {
                vec![with_args("docker model logs", &DEFAULT_LOG_ARGS)]
            }
            DmrCommand::Logs { args } => vec![with_args("docker model logs", args)],
            DmrCommand::List { args } => vec![with_args("docker model list", args)],
            DmrCommand::Pull { model, args } => {
                vec![with_args(&format!("docker model pull {}", quote(model)), args)]
            }
            DmrCommand::Run { prompt, .. } if prompt.is_empty() => Vec::new(),
            DmrCommand::Run { model, prompt } => vec![format!(
                "docker model run {} {}",
                quote(model),
                quote(&prompt.join(" "))
            )],
            DmrCommand::Uninstall { images } => vec![uninstall_runner(*images)],
        }
    }

    fn announcement(&self) -> &'static str {
        match self {
            DmrCommand::Setup => "Installing Docker Model Runner prerequisites",
            DmrCommand::Install => "Installing Docker Model Runner controller container",
            DmrCommand::Update { .. } => "Updating Docker Model Runner",
            DmrCommand::Status => "Checking Docker Model Runner status",
            DmrCommand::Logs { .. } => "Fetching Docker Model Runner logs",
            DmrCommand::List { .. } => "Listing models",
            DmrCommand::Pull { .. } => "Pulling model",
            DmrCommand::Run { .. } => "Running model",
            DmrCommand::Uninstall { .. } => "Removing Docker Model Runner",
        }
    }

    fn completion_note(&self) -> Option<&'static str> {
        match self {
            DmrCommand::Setup => Some(
                "Prerequisites installed. Log out and back in to apply docker group membership.",
            ),
            DmrCommand::Install => Some("Docker Model Runner installed. Run 'dgx dmr status' to verify."),
            _ => None,
        }
    }
}

/// Run one Docker Model Runner operation
pub async fn run(
    command: &DmrCommand,
    executor: &dyn Executor,
    prompt: Arc<dyn Prompt>,
) -> Result<Outcome> {
    if let DmrCommand::Run {
        model,
        prompt: words,
    } = command
    {
        if model.is_empty() {
            return Err(Error::config("model reference required"));
        }
        if words.is_empty() {
            return Ok(Outcome::Skipped {
                reason: format!(
                    "Interactive chat requires a TTY. Supply a prompt: dgx dmr run {} \"prompt\"",
                    model
                ),
            });
        }
    }
    if let DmrCommand::Pull { model, .. } = command {
        if model.is_empty() {
            return Err(Error::config("model reference required"));
        }
    }

    if *command == DmrCommand::Setup && !confirm_setup(prompt).await? {
        return Ok(Outcome::Skipped {
            reason: "Setup cancelled.".to_string(),
        });
    }

    info!("{}...", command.announcement());
    let steps = run_steps(executor, command.command_lines()).await?;
    let note = steps
        .iter()
        .all(|s| s.result.success())
        .then(|| command.completion_note().map(str::to_string))
        .flatten();
    Ok(Outcome::Completed { steps, note })
}

async fn confirm_setup(prompt: Arc<dyn Prompt>) -> Result<bool> {
    let confirmed = ask(
        prompt,
        "This may download and run scripts from https://get.docker.com with sudo.".to_string(),
        "Install Docker Model Runner prerequisites (Docker Engine, plugin, GPU runtime)?"
            .to_string(),
    )
    .await?;
    Ok(confirmed)
}

fn uninstall_runner(images: bool) -> String {
    if images {
        "docker model uninstall-runner --images".to_string()
    } else {
        "docker model uninstall-runner".to_string()
    }
}

fn with_args<S: AsRef<str>>(base: &str, args: &[S]) -> String {
    if args.is_empty() {
        base.to_string()
    } else {
        format!("{} {}", base, quote_all(args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playbook::testing::RecordingExecutor;
    use crate::ssh::prompt::ScriptedPrompt;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_logs_default_tail() {
        let lines = DmrCommand::Logs { args: Vec::new() }.command_lines();
        assert_eq!(lines, vec!["docker model logs '--tail' '200'"]);
    }

    #[test]
    fn test_pass_through_args_are_quoted() {
        let lines = DmrCommand::List {
            args: strings(&["--format", "json; reboot"]),
        }
        .command_lines();
        assert_eq!(lines, vec!["docker model list '--format' 'json; reboot'"]);
    }

    #[test]
    fn test_pull_quotes_model() {
        let lines = DmrCommand::Pull {
            model: "ai/smollm2$(id)".to_string(),
            args: Vec::new(),
        }
        .command_lines();
        assert_eq!(lines, vec!["docker model pull 'ai/smollm2$(id)'"]);
    }

    #[test]
    fn test_run_joins_prompt_into_one_argument() {
        let lines = DmrCommand::Run {
            model: "ai/smollm2".to_string(),
            prompt: strings(&["what's", "up?"]),
        }
        .command_lines();
        assert_eq!(lines, vec!["docker model run 'ai/smollm2' 'what'\\''s up?'"]);
    }

    #[test]
    fn test_image_deletion_is_opt_in() {
        assert_eq!(
            DmrCommand::Uninstall { images: false }.command_lines(),
            vec!["docker model uninstall-runner"]
        );
        assert_eq!(
            DmrCommand::Uninstall { images: true }.command_lines(),
            vec!["docker model uninstall-runner --images"]
        );
        assert_eq!(
            DmrCommand::Update {
                purge_images: false
            }
            .command_lines(),
            vec!["docker model uninstall-runner", INSTALL_RUNNER]
        );
    }

    #[test]
    fn test_setup_script_is_one_quoted_argument() {
        let lines = DmrCommand::Setup.command_lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("bash -c 'set -euo pipefail\n"));
        assert!(lines[0].ends_with("|| true\n'"));
    }

    #[tokio::test]
    async fn test_setup_declined_runs_nothing() {
        let executor = RecordingExecutor::default();
        let prompt = Arc::new(ScriptedPrompt::answering([false]));

        let outcome = run(&DmrCommand::Setup, &executor, prompt.clone()).await.unwrap();

        assert_eq!(
            outcome,
            Outcome::Skipped {
                reason: "Setup cancelled.".to_string()
            }
        );
        assert!(executor.commands().is_empty());
        let transcript = prompt.transcript();
        assert!(transcript[0].contains("get.docker.com"));
        assert!(transcript[1].starts_with("confirm: "));
    }

    #[tokio::test]
    async fn test_setup_accepted_runs_script() {
        let executor = RecordingExecutor::default();
        let prompt = Arc::new(ScriptedPrompt::answering([true]));

        let outcome = run(&DmrCommand::Setup, &executor, prompt.clone()).await.unwrap();

        assert!(outcome.success());
        assert_eq!(executor.commands(), DmrCommand::Setup.command_lines());
        assert!(matches!(outcome, Outcome::Completed { note: Some(_), .. }));
    }

    #[tokio::test]
    async fn test_update_stops_when_uninstall_fails() {
        let executor = RecordingExecutor::with_statuses(&[1]);
        let prompt = Arc::new(ScriptedPrompt::default());
        let command = DmrCommand::Update { purge_images: true };

        let outcome = run(&command, &executor, prompt.clone()).await.unwrap();

        assert_eq!(outcome.exit_status(), 1);
        assert_eq!(
            executor.commands(),
            vec!["docker model uninstall-runner --images"]
        );
        assert!(prompt.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_run_without_prompt_is_skipped() {
        let executor = RecordingExecutor::default();
        let prompt = Arc::new(ScriptedPrompt::default());
        let command = DmrCommand::Run {
            model: "ai/smollm2".to_string(),
            prompt: Vec::new(),
        };

        let outcome = run(&command, &executor, prompt.clone()).await.unwrap();

        assert!(matches!(outcome, Outcome::Skipped { ref reason } if reason.contains("TTY")));
        assert!(executor.commands().is_empty());
    }

    #[tokio::test]
    async fn test_empty_model_is_rejected() {
        let executor = RecordingExecutor::default();
        let prompt = Arc::new(ScriptedPrompt::default());
        let command = DmrCommand::Pull {
            model: String::new(),
            args: Vec::new(),
        };

        let err = run(&command, &executor, prompt.clone()).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(executor.commands().is_empty());
    }
}
