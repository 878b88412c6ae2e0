use std::process::ExitCode;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use jgi_bulk_fetcher::app::{App, RunOptions, RunSummary};
use jgi_bulk_fetcher::error::FetchError;
use jgi_bulk_fetcher::filter::NameFilter;
use jgi_bulk_fetcher::manifest::ManifestWriter;
use jgi_bulk_fetcher::output::{ConsoleSink, JsonOutput};
use jgi_bulk_fetcher::portal::JgiHttpClient;
use jgi_bulk_fetcher::queries::read_queries;
use jgi_bulk_fetcher::restore::{SystemClock, WaitPolicy};

#[derive(Parser)]
#[command(name = "jgi-fetch")]
#[command(about = "Bulk fetch JGI/Phytozome files from portal search URLs (CSV)")]
#[command(version, author)]
struct Cli {
    #[arg(value_name = "CSV", help = "CSV rows: label,search_url (header optional)")]
    csv: Utf8PathBuf,

    #[arg(long, default_value = "jgi_downloads", help = "Output directory")]
    outdir: Utf8PathBuf,

    #[arg(
        long = "include",
        value_name = "GLOB",
        help = "Glob to include by file_name (repeatable)"
    )]
    include: Vec<String>,

    #[arg(
        long = "exclude",
        value_name = "GLOB",
        help = "Glob to exclude by file_name (repeatable)"
    )]
    exclude: Vec<String>,

    #[arg(long, help = "Keep only the newest detected Phytozome version per query")]
    latest_only: bool,

    #[arg(long, default_value_t = 600, help = "Seconds between restore-status polls")]
    poll_seconds: u64,

    #[arg(long, default_value_t = 21600, help = "Max seconds to wait for restore")]
    max_wait_seconds: u64,

    #[arg(long, help = "Keep downloaded zip archives after extraction")]
    keep_zip: bool,

    #[arg(long, help = "Print the run summary as JSON")]
    json: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(summary) if summary.any_query_succeeded() => ExitCode::SUCCESS,
        Ok(_) => {
            eprintln!("no query processed successfully");
            ExitCode::from(1)
        }
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(fetch) = report.downcast_ref::<FetchError>() {
                return ExitCode::from(map_exit_code(fetch));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &FetchError) -> u8 {
    match error {
        FetchError::MissingToken
        | FetchError::Auth { .. }
        | FetchError::InvalidGlob(_)
        | FetchError::InvalidLabel(_)
        | FetchError::QueryFile { .. }
        | FetchError::EmptyQueryFile
        | FetchError::Manifest(_) => 2,
        _ => 1,
    }
}

fn run() -> miette::Result<RunSummary> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let token = std::env::var("JGI_TOKEN")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or(FetchError::MissingToken)?;

    let filter = NameFilter::new(&cli.include, &cli.exclude)?;
    let parsed = read_queries(cli.csv.as_std_path())?;

    std::fs::create_dir_all(cli.outdir.as_std_path())
        .map_err(|err| FetchError::Filesystem(err.to_string()))?;
    let mut manifest = ManifestWriter::create(cli.outdir.join("manifest.tsv").as_std_path())?;

    let portal = JgiHttpClient::new(&token)?;
    let options = RunOptions {
        outdir: cli.outdir.clone(),
        latest_only: cli.latest_only,
        keep_zip: cli.keep_zip,
        wait: WaitPolicy::new(
            Duration::from_secs(cli.poll_seconds),
            Duration::from_secs(cli.max_wait_seconds),
        ),
    };
    let app = App::new(portal, SystemClock, filter, options);

    eprintln!(
        "Loaded {} query(ies) from {} ({} malformed row(s) skipped)",
        parsed.queries.len(),
        cli.csv,
        parsed.malformed_rows
    );
    if cli.include.is_empty() {
        eprintln!("Include globs: (none) -> all files returned by each query are candidates");
    }
    if cli.latest_only {
        eprintln!("Latest-only mode: ON (newest detected Phytozome version per query)");
    }

    let summary = if cli.json {
        let summary = app.run(&parsed.queries, &mut manifest, &JsonOutput)?;
        JsonOutput::print_summary(&summary).into_diagnostic()?;
        summary
    } else {
        let summary = app.run(&parsed.queries, &mut manifest, &ConsoleSink)?;
        print_run_summary(&summary);
        summary
    };

    Ok(summary)
}

fn print_run_summary(summary: &RunSummary) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}JGI fetch summary{reset}");
    println!(
        "{green}  queries processed: {} (failed: {}){reset}",
        summary.queries_processed, summary.queries_failed
    );
    println!(
        "{green}  files downloaded:  {} of {} seen{reset}",
        summary.downloaded, summary.files_seen
    );
    println!(
        "{yellow}  skipped: {} filtered, {} restore-timeout, {} error(s){reset}",
        summary.skipped_filtered, summary.skipped_restore_timeout, summary.skipped_error
    );
}
