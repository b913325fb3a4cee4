use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use esaloader_core::client::EsaClient;
use esaloader_core::config::{
    DEFAULT_CONFIG_FILENAME, EsaConfig, access_token_from_env, load_config,
};
use esaloader_core::download::{DownloadOptions, DownloadReport, PostDownloader};
use esaloader_core::http::is_unauthorized;
use esaloader_core::progress::{NoProgress, ProgressReporter, StdoutProgress};

#[derive(Debug, Parser)]
#[command(
    name = "esaloader",
    version,
    about = "Download articles from esa.io",
    after_help = "Examples:
  # Download all posts
  esaloader -t your_team

  # Download posts with specific tag
  esaloader -t your_team -q \"tag:important\"

  # Download posts in specific category (Japanese supported)
  esaloader -t your_team -q \"category:開発/仕様書\"

  # Dry run to see what would be downloaded
  esaloader -t your_team -q \"tag:public\" --dry-run"
)]
struct Cli {
    #[arg(short = 't', long, help = "esa.io team name")]
    team: String,
    #[arg(short = 'q', long, help = "Search query (supports Japanese)")]
    query: Option<String>,
    #[arg(
        short = 'o',
        long,
        value_name = "PATH",
        help = "Output directory (default: ./esa_posts)"
    )]
    output: Option<PathBuf>,
    #[arg(long, help = "List posts without downloading")]
    dry_run: bool,
    #[arg(
        long,
        value_name = "N",
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Maximum number of posts to download"
    )]
    limit: Option<u64>,
    #[arg(
        long,
        help = "Save images in \"images\" subdirectory instead of alongside articles"
    )]
    images_dir: bool,
    #[arg(short = 'v', long, help = "Enable verbose output")]
    verbose: bool,
    #[arg(long, value_name = "PATH", help = "Path to a TOML config file")]
    config: Option<PathBuf>,
    #[arg(long, help = "Print the final report as JSON")]
    json: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(error) = ctrlc::set_handler(|| {
        println!("\nDownload interrupted by user");
        std::process::exit(1);
    }) {
        log::warn!("failed to install interrupt handler: {error}");
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) if is_unauthorized(&error) => {
            eprintln!("Authentication error: Invalid access token");
            ExitCode::FAILURE
        }
        Err(error) => {
            eprintln!("\nError: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    dotenvy::dotenv().ok();
    let access_token = access_token_from_env()?;
    let config = load_runtime_config(cli.config.as_deref())?;
    let output_dir = cli.output.clone().unwrap_or_else(|| config.output_dir());

    let mut client = EsaClient::new(&config, &cli.team, &access_token)?;
    let mut downloader = PostDownloader::from_config(&config, &output_dir)?;
    let options = DownloadOptions {
        query: cli.query.clone().filter(|query| !query.trim().is_empty()),
        limit: cli
            .limit
            .map(|limit| usize::try_from(limit).unwrap_or(usize::MAX)),
        dry_run: cli.dry_run,
        images_subdir: cli.images_dir,
        per_page: config.per_page(),
        page_delay: config.page_delay(),
    };

    let mut progress: Box<dyn ProgressReporter> = if cli.json {
        Box::new(NoProgress)
    } else {
        Box::new(StdoutProgress)
    };
    let report = downloader.download_all(&mut client, &options, progress.as_mut())?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, downloader.output_dir());
    }
    Ok(())
}

fn load_runtime_config(explicit: Option<&Path>) -> Result<EsaConfig> {
    match explicit {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("config file not found: {}", normalize_path(path));
            }
            load_config(path)
        }
        None => load_config(Path::new(DEFAULT_CONFIG_FILENAME))
            .with_context(|| format!("failed to load {DEFAULT_CONFIG_FILENAME}")),
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

/// Listings were already streamed; only a real run gets a summary.
fn print_report(report: &DownloadReport, output_dir: &Path) {
    if report.dry_run {
        return;
    }

    println!(
        "\nDownloaded {} posts to {}",
        report.saved_files.len(),
        normalize_path(output_dir)
    );
    if !report.failures.is_empty() {
        println!("failed: {}", report.failures.len());
        for failure in &report.failures {
            println!("  - [{}] {}", failure.number, failure.error);
        }
    }
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    #[test]
    fn parses_full_flag_set() {
        let cli = Cli::try_parse_from([
            "esaloader",
            "-t",
            "docs",
            "-q",
            "category:開発/仕様書",
            "-o",
            "mirror",
            "--dry-run",
            "--limit",
            "5",
            "--images-dir",
            "-v",
            "--json",
        ])
        .expect("parse");
        assert_eq!(cli.team, "docs");
        assert_eq!(cli.query.as_deref(), Some("category:開発/仕様書"));
        assert_eq!(cli.output.as_deref(), Some(std::path::Path::new("mirror")));
        assert!(cli.dry_run);
        assert_eq!(cli.limit, Some(5));
        assert!(cli.images_dir);
        assert!(cli.verbose);
        assert!(cli.json);
    }

    #[test]
    fn team_is_required() {
        assert!(Cli::try_parse_from(["esaloader"]).is_err());
    }

    #[test]
    fn zero_limit_is_rejected() {
        assert!(Cli::try_parse_from(["esaloader", "-t", "docs", "--limit", "0"]).is_err());
    }
}
