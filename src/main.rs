//! CLI entry point for the station status archiver.
//!
//! Fetches the current bike station status, normalizes redundant fields and
//! stores the result as a new timestamped JSON file. Meant to be re-invoked
//! by an external scheduler; every failure ends the run with a non-zero exit.

use anyhow::Result;
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use station_status_archiver::config::{
    ArchiverConfig, DEFAULT_OUTPUT_DIR, DEFAULT_SOURCE, DEFAULT_TIMEOUT_SECS,
};
use station_status_archiver::fetch::{BasicClient, load_source, read_json_file};
use station_status_archiver::output::{print_summary, to_pretty_json, write_snapshot};
use station_status_archiver::processing::SnapshotNormalizer;
use std::ffi::OsStr;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "station_status_archiver")]
#[command(about = "Fetch, normalize and archive bike station status snapshots", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    snapshot: SnapshotArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the current station status and save it as a new snapshot file
    Snapshot(SnapshotArgs),
    /// Normalize a saved raw station status document
    Normalize {
        /// Raw JSON document to normalize
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Write the result to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct SnapshotArgs {
    /// URL to fetch, or path to a raw JSON document
    #[arg(short, long, env = "STATION_STATUS_URL", default_value = DEFAULT_SOURCE)]
    source: String,

    /// Directory the snapshot file is written to
    #[arg(short, long, env = "STATION_STATUS_OUTPUT_DIR", default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// HTTP request timeout in seconds
    #[arg(long, env = "STATION_STATUS_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    let _file_guard = init_tracing()?;

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Snapshot(cli.snapshot)) {
        Commands::Snapshot(args) => {
            let config = ArchiverConfig::new(&args.source, args.output_dir, args.timeout_secs)?;
            run_snapshot(&config).await?;
        }
        Commands::Normalize { input, output } => {
            run_normalize(&input, output.as_deref())?;
        }
    }

    Ok(())
}

/// Colored stderr output plus a JSON daily rolling log file.
fn init_tracing() -> Result<WorkerGuard> {
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/station_status_archiver.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("station_status_archiver.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .try_init()?;

    Ok(file_guard)
}

/// Fetches, normalizes and stores one snapshot. Nothing is written unless
/// every earlier step succeeded.
#[tracing::instrument(skip(config), fields(source = %config.source))]
async fn run_snapshot(config: &ArchiverConfig) -> Result<PathBuf> {
    let client = BasicClient::with_timeout(config.timeout)?;

    let mut document = load_source(&client, &config.source).await?;
    debug!(document = %document, "Raw station status");

    let summary = SnapshotNormalizer::local().normalize_in_place(&mut document)?;
    info!(
        stations = summary.stations,
        dropped_last_reported = summary.dropped_last_reported,
        "Snapshot normalized"
    );
    print_summary(&summary)?;

    let path = write_snapshot(&config.output_dir, &document, Local::now().naive_local())?;
    Ok(path)
}

/// Normalizes a raw document from disk and prints or writes the result.
#[tracing::instrument]
fn run_normalize(input: &Path, output: Option<&Path>) -> Result<()> {
    let raw = read_json_file(input)?;
    let normalized = SnapshotNormalizer::local().normalize(raw)?;
    let bytes = to_pretty_json(&normalized)?;

    match output {
        Some(path) => {
            std::fs::write(path, &bytes)?;
            info!(path = %path.display(), "Normalized document written");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bytes)?;
            writeln!(stdout)?;
        }
    }

    Ok(())
}
