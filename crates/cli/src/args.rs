use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use jobwatch_core::{ControlPlane, HttpControlPlane, JobIdentity, MonitorConfig, PlaneConfig};

/// jobwatch - follow a job on the control plane until it finishes
#[derive(Parser, Debug)]
#[command(name = "jobwatch")]
#[command(version)]
#[command(about = "Watch a submitted job, stream its diagnostics and clean it up", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Block until the job finishes, then delete it. Type `q` + Enter to cancel.
    Watch(WatchArgs),
    /// Write the job's merged stream to stdout as SSE frames. Never deletes the job.
    Stream(StreamArgs),
}

/// Which job to follow and how to reach it.
#[derive(Args, Debug)]
pub struct Target {
    /// Job name
    pub name: String,

    /// Job namespace
    #[arg(short = 'n', long = "namespace", default_value = "default")]
    pub namespace: String,

    /// Give up after this long (e.g. 30s, 5m, 1500ms)
    #[arg(long = "timeout", value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Milliseconds to keep collecting diagnostics after the job finishes
    #[arg(long = "grace-ms", value_name = "MS")]
    pub grace_ms: Option<u64>,

    /// Control-plane base URL (overrides JOBWATCH_API_URL)
    #[arg(long = "api-url")]
    pub api_url: Option<String>,

    /// Enable debug logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Target {
    pub fn identity(&self) -> JobIdentity {
        JobIdentity::new(self.name.clone(), self.namespace.clone())
    }

    /// Environment settings with command-line overrides applied.
    pub fn monitor_config(&self) -> Result<MonitorConfig> {
        let mut config = MonitorConfig::from_env().context("reading monitor settings")?;
        if let Some(ms) = self.grace_ms {
            config = config.with_grace_period(Duration::from_millis(ms));
        }
        Ok(config)
    }

    pub fn plane_config(&self) -> PlaneConfig {
        let mut config = PlaneConfig::from_env();
        if let Some(url) = &self.api_url {
            config.api_url = url.trim_end_matches('/').to_string();
        }
        config
    }

    pub fn connect(&self) -> Result<Arc<dyn ControlPlane>> {
        let plane = HttpControlPlane::new(self.plane_config()).context("building control-plane client")?;
        Ok(Arc::new(plane))
    }
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    #[command(flatten)]
    pub target: Target,

    /// Do not print diagnostics (the spinner is kept)
    #[arg(short = 'q', long = "quiet", conflicts_with = "verbose")]
    pub quiet: bool,

    /// Final result format
    #[arg(short = 'o', long = "output", value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

impl WatchArgs {
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else if self.target.verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }
}

#[derive(Args, Debug)]
pub struct StreamArgs {
    #[command(flatten)]
    pub target: Target,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// How many diagnostics the interactive session prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// None; the spinner still runs.
    Quiet,
    /// Warnings and errors.
    Normal,
    /// Every diagnostic.
    Verbose,
}

/// Parse `1500ms`, `30s`, `5m`, `1h`, or a bare number of seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration {raw:?}: expected a number with an optional unit"))?;
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        other => Err(format!("invalid duration unit {other:?} (use ms, s, m or h)")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("1500ms"), Ok(Duration::from_millis(1500)));
        assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_duration("2h"), Ok(Duration::from_secs(7200)));
        assert_eq!(parse_duration("45"), Ok(Duration::from_secs(45)));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("10d").is_err());
    }

    #[test]
    fn test_watch_flags() {
        let cli = Cli::try_parse_from([
            "jobwatch", "watch", "nightly", "-n", "analytics", "--timeout", "30s", "-q", "-o", "json",
            "--grace-ms", "750",
        ])
        .unwrap();
        let Command::Watch(args) = cli.command else {
            panic!("expected watch");
        };
        assert_eq!(args.target.identity(), JobIdentity::new("nightly", "analytics"));
        assert_eq!(args.target.timeout, Some(Duration::from_secs(30)));
        assert_eq!(args.verbosity(), Verbosity::Quiet);
        assert_eq!(args.output, OutputFormat::Json);
        assert_eq!(args.target.grace_ms, Some(750));
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        let result = Cli::try_parse_from(["jobwatch", "watch", "nightly", "-q", "-v"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_stream_defaults() {
        let cli = Cli::try_parse_from(["jobwatch", "stream", "nightly"]).unwrap();
        let Command::Stream(args) = cli.command else {
            panic!("expected stream");
        };
        assert_eq!(args.target.namespace, "default");
        assert_eq!(args.target.timeout, None);
    }
}
