use std::process::ExitCode;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use clap::Parser;
use miette::IntoDiagnostic;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use bagitify::app::{Archiver, ProgressSink, RunOptions};
use bagitify::config::ConfigLoader;
use bagitify::domain::{TabledapUrl, parse_user_timestamp};
use bagitify::erddap::ErddapHttpClient;
use bagitify::error::BagitifyError;
use bagitify::output::{ConsoleOutput, JsonOutput};

#[derive(Parser)]
#[command(name = "bagitify")]
#[command(about = "Generate NCEI BagIt archives from an ERDDAP tabledap dataset at TABLEDAP_URL")]
#[command(version, author)]
struct Cli {
    /// ERDDAP tabledap dataset url (a trailing .html is ignored)
    tabledap_url: TabledapUrl,

    /// Directory to create the bagit archive in
    #[arg(short = 'd', long)]
    bag_directory: Option<Utf8PathBuf>,

    /// Data start date (YYYY-MM-DD or YYYY-MM-DDTHH:MM:SSZ)
    #[arg(short = 's', long, value_parser = parse_user_timestamp)]
    start_date: Option<DateTime<Utc>>,

    /// Data end date (YYYY-MM-DD or YYYY-MM-DDTHH:MM:SSZ)
    #[arg(short = 'e', long, value_parser = parse_user_timestamp)]
    end_date: Option<DateTime<Utc>>,

    /// Parent for temporary download directories, on the bag's filesystem
    #[arg(short = 't', long)]
    tmp_parent: Option<Utf8PathBuf>,

    /// Print more information about the process
    #[arg(short, long)]
    verbose: bool,

    /// Delete and redownload existing files
    #[arg(short, long)]
    force: bool,

    /// Print a JSON summary instead of progress messages
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<BagitifyError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &BagitifyError) -> u8 {
    match error {
        BagitifyError::DifferentFilesystems { .. }
        | BagitifyError::InvalidUrl(_)
        | BagitifyError::InvalidTimestamp(_) => 2,
        err if err.is_remote() => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "bagitify=debug,warn" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let report = ConfigLoader::from_env();
    for warning in &report.warnings {
        warn!("{warning}");
    }

    let options = RunOptions {
        url: cli.tabledap_url,
        bag_directory: cli.bag_directory,
        start: cli.start_date,
        end: cli.end_date,
        tmp_parent: cli.tmp_parent,
        force: cli.force,
    };

    let archiver = Archiver::new(ErddapHttpClient::new()?);
    let console = ConsoleOutput {
        verbose: cli.verbose,
    };
    let sink: &dyn ProgressSink = if cli.json { &JsonOutput } else { &console };
    let summary = archiver.run(&options, &report.config, sink)?;

    if cli.json {
        JsonOutput::print_summary(&summary).into_diagnostic()?;
    }
    Ok(())
}
