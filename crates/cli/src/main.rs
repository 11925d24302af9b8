// crates/cli/src/main.rs
//! `jobwatch` binary.
//!
//! `watch` drives a job to completion and deletes it; `stream` relays the
//! merged stream to stdout for another process to consume.

mod args;
mod render;

use std::io::IsTerminal;

use anyhow::{Context, Result};
use clap::Parser;
use jobwatch_core::{CancellationController, CompletionController, StreamMerger, StreamTransport};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use crate::args::{Cli, Command, StreamArgs, WatchArgs};
use crate::render::{render_outcome, stream_exit_code, TerminalPresenter};

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "warn,jobwatch_core=debug,jobwatch=debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .compact()
        .with_writer(std::io::stderr)
        .init();
}

/// Cancel on `q` + Enter. Only runs when stdin is a terminal.
fn spawn_interrupt_reader(cancel: CancellationController) -> Option<JoinHandle<()>> {
    if !std::io::stdin().is_terminal() {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) if line.trim().eq_ignore_ascii_case("q") => {
                        cancel.interrupt();
                        break;
                    }
                    Ok(Some(_)) => continue,
                    Ok(None) | Err(_) => break,
                },
            }
        }
    }))
}

async fn watch(args: WatchArgs) -> Result<i32> {
    let job = args.target.identity();
    let plane = args.target.connect()?;
    let merger = StreamMerger::new(plane.clone(), args.target.monitor_config()?);

    let cancel = CancellationController::new();
    let signals = cancel.listen_for_signals();
    if let Some(timeout) = args.target.timeout {
        cancel.arm_timeout(timeout);
    }

    let presenter = TerminalPresenter::new(job.clone(), args.verbosity(), args.output);
    let mut controller = CompletionController::new(plane, presenter, cancel.clone());
    let stdin = spawn_interrupt_reader(controller.interrupter());

    let result = controller.watch(&merger, &job).await;

    signals.abort();
    if let Some(stdin) = stdin {
        stdin.abort();
    }
    controller.presenter().finish();

    let outcome = result.with_context(|| format!("watching {job}"))?;
    render_outcome(&job, &outcome, args.output).context("writing result")?;
    Ok(outcome.exit_code())
}

async fn stream(args: StreamArgs) -> Result<i32> {
    let job = args.target.identity();
    let plane = args.target.connect()?;
    let merger = StreamMerger::new(plane, args.target.monitor_config()?);

    let cancel = CancellationController::new();
    let signals = cancel.listen_for_signals();
    if let Some(timeout) = args.target.timeout {
        cancel.arm_timeout(timeout);
    }

    let merged = merger
        .start(job.clone(), cancel.token())
        .await
        .with_context(|| format!("watching {job}"))?;
    let mut stdout = tokio::io::stdout();
    let relayed = StreamTransport::relay(merged, &mut stdout).await;
    signals.abort();

    let summary = relayed.context("writing frames to stdout")?;
    tracing::debug!(job = %job, frames = summary.frames, "stream finished");
    Ok(stream_exit_code(&summary, cancel.is_cancelled()))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Watch(args) => args.target.verbose,
        Command::Stream(args) => args.target.verbose,
    };
    init_tracing(verbose);

    let result = match cli.command {
        Command::Watch(args) => watch(args).await,
        Command::Stream(args) => stream(args).await,
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            1
        }
    };
    // Exit directly: a pending stdin read would otherwise hold the runtime open.
    std::process::exit(code);
}
