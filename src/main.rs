//! dgx - Entry point
//!
//! Parses CLI arguments, validates configuration, opens one trusted SSH
//! session to the host, runs the requested playbook and reports its output.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use dgx_manager::config::{Args, Command, Config};
use dgx_manager::playbook::{self, dmr, Outcome};
use dgx_manager::ssh::{HostTrustStore, LinePrompt, Prompt, RemoteSession, SshKeyscan};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries remote command output
    let default_level = match args.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_args(&args.connection)?;
    debug!("{:?}", config.connection);

    // One prompt for host trust and playbook confirmations so stdin is read once
    let prompt: Arc<dyn Prompt> = Arc::new(LinePrompt::stdio());
    let trust = Arc::new(HostTrustStore::new(
        &config.known_hosts,
        prompt.clone(),
        Arc::new(SshKeyscan::default()),
    ));

    info!(
        "Connecting to {}@{}:{}",
        config.connection.user(),
        config.connection.host(),
        config.connection.port()
    );
    let session = RemoteSession::connect(config.connection.clone(), trust)
        .await
        .with_context(|| format!("cannot open session to {}", config.connection.host()))?;

    let outcome = tokio::select! {
        outcome = run_command(&args.command, &session, prompt.clone()) => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, closing session");
            session.close().await;
            // A prompt may still be blocked reading stdin; runtime shutdown would wait on it
            std::process::exit(130);
        }
    };
    session.close().await;

    let outcome = outcome?;
    render(&outcome, args.json)?;
    Ok(exit_code(outcome.exit_status()))
}

async fn run_command(
    command: &Command,
    session: &RemoteSession,
    prompt: Arc<dyn Prompt>,
) -> anyhow::Result<Outcome> {
    match command {
        Command::Exec { command } => {
            let steps = playbook::run_steps(session, [command.as_str()])
                .await
                .context("remote command failed")?;
            Ok(Outcome::completed(steps))
        }
        Command::Dmr(op) => dmr::run(op, session, prompt)
            .await
            .context("Docker Model Runner operation failed"),
    }
}

fn render(outcome: &Outcome, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    match outcome {
        Outcome::Completed { steps, note } => {
            for step in steps {
                print_stream(&step.result.stdout, false);
                print_stream(&step.result.stderr, true);
                if !step.result.success() {
                    eprintln!("Remote command exited with status {}", step.result.exit_status);
                }
            }
            if let Some(note) = note {
                eprintln!("{note}");
            }
        }
        Outcome::Skipped { reason } => eprintln!("{reason}"),
    }
    Ok(())
}

fn print_stream(text: &str, stderr: bool) {
    if text.is_empty() {
        return;
    }
    let newline = if text.ends_with('\n') { "" } else { "\n" };
    if stderr {
        eprint!("{text}{newline}");
    } else {
        print!("{text}{newline}");
    }
}

fn exit_code(status: i32) -> ExitCode {
    match status {
        0 => ExitCode::SUCCESS,
        s => ExitCode::from(u8::try_from(s).unwrap_or(1)),
    }
}
