//! oplog CLI - capture a remote oplog to a dump file and replay it

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use oplogkit::capture::{capture_to_file, CaptureOptions};
use oplogkit::constants::{
  DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_DESTINATION_HOST, DEFAULT_OPLOG_NAMESPACE,
  DEFAULT_PROGRESS_INTERVAL, DEFAULT_SOURCE_HOST,
};
use oplogkit::dump::DumpReader;
use oplogkit::replay::{RejectionPolicy, ReplayEngine, ReplayOptions};
use oplogkit::tail::TailingReader;
use oplogkit::transport::{HttpCommandEndpoint, HttpLogSource, HttpOptions};
use oplogkit::OpTime;

#[derive(Parser)]
#[command(name = "oplog")]
#[command(about = "Pull a remote oplog into a dump file, or replay a dump", long_about = None)]
#[command(version)]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Tail a remote oplog into a dump file
  Capture {
    /// Host to pull from
    #[arg(long, env = "OPLOG_SOURCE", default_value = DEFAULT_SOURCE_HOST)]
    host: String,
    /// Namespace to pull from
    #[arg(long, default_value = DEFAULT_OPLOG_NAMESPACE)]
    oplogns: String,
    /// First timestamp to dump, as `seconds` or `seconds:ordinal`
    #[arg(short, long, default_value = "0", value_parser = parse_optime)]
    begin: OpTime,
    /// Last timestamp to dump; tails until end of stream when omitted.
    /// Capture only stops once an entry newer than this arrives, so a live
    /// source that has not moved past it keeps the capture waiting
    #[arg(short, long, value_parser = parse_optime)]
    end: Option<OpTime>,
    /// Output file
    #[arg(short, long)]
    out: PathBuf,
    /// Entries between progress reports
    #[arg(long, default_value_t = DEFAULT_PROGRESS_INTERVAL)]
    progress_interval: u64,
    #[command(flatten)]
    timeouts: TimeoutArgs,
  },
  /// Replay a dump file against a destination
  Replay {
    /// Dump file produced by `capture`
    file: PathBuf,
    /// Destination host
    #[arg(long, env = "OPLOG_DESTINATION", default_value = DEFAULT_DESTINATION_HOST)]
    host: String,
    /// What to do when the destination refuses an operation
    #[arg(long, default_value_t = RejectionPolicy::Continue)]
    on_rejection: RejectionPolicy,
    #[command(flatten)]
    timeouts: TimeoutArgs,
  },
}

#[derive(Args)]
struct TimeoutArgs {
  /// Connect timeout in seconds (0 = none)
  #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS)]
  connect_timeout: u64,
  /// Read timeout in seconds (0 = wait indefinitely)
  #[arg(long, default_value_t = 0)]
  read_timeout: u64,
}

impl TimeoutArgs {
  fn http_options(&self) -> HttpOptions {
    let seconds = |value: u64| (value > 0).then(|| Duration::from_secs(value));
    HttpOptions::new()
      .connect_timeout(seconds(self.connect_timeout))
      .read_timeout(seconds(self.read_timeout))
  }
}

fn parse_optime(raw: &str) -> Result<OpTime, String> {
  if raw.contains(':') {
    return raw.parse::<OpTime>().map_err(|error| error.to_string());
  }
  raw
    .parse::<u32>()
    .map(OpTime::from_seconds)
    .map_err(|error| format!("invalid seconds {raw}: {error}"))
}

fn main() -> ExitCode {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    )
    .init();

  let cli = Cli::parse();

  match run(cli.command) {
    Ok(()) => ExitCode::SUCCESS,
    Err(error) => {
      tracing::error!("{error:#}");
      ExitCode::FAILURE
    }
  }
}

fn run(command: Commands) -> Result<()> {
  match command {
    Commands::Capture {
      host,
      oplogns,
      begin,
      end,
      out,
      progress_interval,
      timeouts,
    } => {
      tracing::info!(start = %begin.pretty(), "starting capture");
      let mut source = HttpLogSource::connect(&host, &timeouts.http_options())
        .with_context(|| format!("connecting to {host}"))?;
      let mut reader = TailingReader::open(&mut source, &oplogns, begin)
        .with_context(|| format!("opening tailing query on {oplogns}"))?;

      let options = CaptureOptions::new()
        .progress_interval(progress_interval)
        .end(end);
      let result = capture_to_file(&mut reader, &out, options);
      let report = result.with_context(|| match reader.last_seen() {
        Some(last) => format!("dumping to {} (resume from {last})", out.display()),
        None => format!("dumping to {}", out.display()),
      })?;
      println!("captured {} entries to {}", report.entries, out.display());
    }
    Commands::Replay {
      file,
      host,
      on_rejection,
      timeouts,
    } => {
      let reader =
        DumpReader::open(&file).with_context(|| format!("opening dump {}", file.display()))?;
      let endpoint = HttpCommandEndpoint::connect(&host, &timeouts.http_options())
        .with_context(|| format!("connecting to {host}"))?;

      let mut engine = ReplayEngine::new(endpoint, ReplayOptions::new().on_rejection(on_rejection));
      let report = engine
        .run(reader)
        .with_context(|| format!("replaying {}", file.display()))?;
      println!(
        "replayed {} entries ({} no-ops skipped, {} rejected)",
        report.applied, report.skipped_noops, report.rejected
      );
    }
  }

  Ok(())
}
