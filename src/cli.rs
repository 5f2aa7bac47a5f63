//! CLI parsing and orchestration. Download pass, then conversion pass for EPUB downloads.
//! Maps errors to exit codes.

use crate::config::{self, Config};
use crate::convert::{
    convert_directory, list_epubs, write_report, ConvertError, ConvertOptions, Converter,
};
use crate::extract::DEFAULT_WIDTH;
use crate::model::DownloadFormat;
use crate::scraper::{
    scrape_catalog, CatalogOptions, PoliteClientBuilder, ScraperError,
};
use clap::Parser;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Scraper(#[from] ScraperError),

    #[error("{0}")]
    Convert(#[from] ConvertError),
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) => 1,
            CliRunError::Scraper(_) => 2,
            CliRunError::Convert(_) => 3,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "ebook-corpus")]
#[command(about = "Download free e-books from a catalog category and flatten EPUBs to plain text")]
#[command(
    after_help = "Config file keys (data_dir, category_id, pages, page_items, format, keep_source, converter, line_width, jobs, user_agent, request_delay_secs, timeout_secs, retry_count, retry_backoff_secs, throttle_marker) are read from ./ebook-corpus.toml or the user config dir. CLI flags override config."
)]
pub struct Args {
    /// Directory the book files download to (default ./data).
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Catalog category id (default 1245).
    #[arg(long)]
    pub id: Option<u32>,

    /// Number of items on each catalog list page (default 20).
    #[arg(long = "pageitems")]
    pub page_items: Option<u32>,

    /// Number of list pages to scrape (default 7).
    #[arg(long)]
    pub pages: Option<u32>,

    /// Download format: txt or epub. EPUB downloads are converted to text afterwards.
    #[arg(long, value_parser = parse_format)]
    pub format: Option<DownloadFormat>,

    /// Keep the .epub after converting it (default: delete it).
    #[arg(long)]
    pub keep_source: bool,

    /// Skip downloading; convert the EPUBs already in the data directory.
    #[arg(long)]
    pub convert_only: bool,

    /// List what would be downloaded or converted without writing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Section converter: stream (default), grid, or markdown.
    #[arg(long, value_parser = parse_converter)]
    pub converter: Option<Converter>,

    /// Layout width in columns (default 80).
    #[arg(long)]
    pub line_width: Option<usize>,

    /// Worker threads for list pages and conversion.
    #[arg(long)]
    pub jobs: Option<usize>,

    /// Do not reconvert books whose .txt already exists.
    #[arg(long)]
    pub skip_existing: bool,

    /// Write the conversion report as JSON to this path.
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Suppress progress output (warnings and errors only).
    #[arg(short, long)]
    pub quiet: bool,

    /// Debug logging and the full error chain.
    #[arg(long)]
    pub verbose: bool,

    /// HTTP User-Agent (overrides config).
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Delay between requests in seconds (overrides config; default 1).
    #[arg(long)]
    pub delay: Option<u64>,

    /// Request timeout in seconds (overrides config; default 60).
    #[arg(long)]
    pub timeout: Option<u64>,
}

fn parse_format(s: &str) -> Result<DownloadFormat, String> {
    match s.to_lowercase().as_str() {
        "txt" | "text" => Ok(DownloadFormat::Txt),
        "epub" => Ok(DownloadFormat::Epub),
        _ => Err(format!(
            "Invalid --format value: '{}'. Use txt or epub.",
            s
        )),
    }
}

fn parse_converter(s: &str) -> Result<Converter, String> {
    Converter::parse(s).ok_or_else(|| {
        format!(
            "Invalid --converter value: '{}'. Use stream, grid, or markdown.",
            s
        )
    })
}

/// Effective settings after merging flags, config, and defaults.
#[derive(Debug)]
struct Settings {
    catalog: CatalogOptions,
    convert: ConvertOptions,
    client: PoliteClientBuilder,
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn resolve_settings(args: &Args, config: Option<&Config>) -> Result<Settings, CliRunError> {
    let format = match (args.format, config.and_then(|c| c.format.as_deref())) {
        (Some(f), _) => f,
        (None, Some(s)) => {
            parse_format(s).map_err(|e| CliRunError::InvalidInput(format!("config: {}", e)))?
        }
        (None, None) => DownloadFormat::Txt,
    };
    let converter = match (args.converter, config.and_then(|c| c.converter.as_deref())) {
        (Some(c), _) => c,
        (None, Some(s)) => {
            parse_converter(s).map_err(|e| CliRunError::InvalidInput(format!("config: {}", e)))?
        }
        (None, None) => Converter::Stream,
    };

    let mut catalog = CatalogOptions {
        format,
        dry_run: args.dry_run,
        ..Default::default()
    };
    if let Some(dir) = args.data_dir.clone().or_else(|| config.and_then(|c| c.data_dir.clone())) {
        catalog.data_dir = dir;
    }
    if let Some(id) = args.id.or_else(|| config.and_then(|c| c.category_id)) {
        catalog.category_id = id;
    }
    if let Some(items) = args.page_items.or_else(|| config.and_then(|c| c.page_items)) {
        catalog.page_items = items;
    }
    if let Some(pages) = args.pages.or_else(|| config.and_then(|c| c.pages)) {
        catalog.pages = pages;
    }
    if let Some(marker) = config.and_then(|c| c.throttle_marker.clone()) {
        catalog.throttle_marker = marker;
    }
    if catalog.page_items == 0 {
        return Err(CliRunError::InvalidInput(
            "--pageitems must be at least 1".to_string(),
        ));
    }

    let jobs = args.jobs.or_else(|| config.and_then(|c| c.jobs));
    if jobs == Some(0) {
        return Err(CliRunError::InvalidInput("--jobs must be at least 1".to_string()));
    }
    catalog.jobs = jobs.unwrap_or(catalog.pages.max(1) as usize);

    let width = args
        .line_width
        .or_else(|| config.and_then(|c| c.line_width))
        .unwrap_or(DEFAULT_WIDTH);
    if width == 0 {
        return Err(CliRunError::InvalidInput(
            "--line-width must be at least 1".to_string(),
        ));
    }
    let keep_source = args.keep_source || config.and_then(|c| c.keep_source).unwrap_or(false);
    let convert = ConvertOptions {
        converter,
        width,
        remove_source: !keep_source,
        skip_existing: args.skip_existing,
        jobs: jobs.unwrap_or_else(default_jobs),
        show_progress: !args.quiet,
    };

    // Unset keys keep the client's own defaults.
    let mut client = PoliteClientBuilder::default();
    if let Some(secs) = args.delay.or_else(|| config.and_then(|c| c.request_delay_secs)) {
        client = client.delay_secs(secs);
    }
    if let Some(secs) = args.timeout.or_else(|| config.and_then(|c| c.timeout_secs)) {
        client = client.timeout_secs(secs);
    }
    if let Some(n) = config.and_then(|c| c.retry_count) {
        client = client.retry_count(n);
    }
    if let Some(backoff) = config.and_then(|c| c.retry_backoff_secs.clone()) {
        client = client.retry_backoff_secs(backoff);
    }
    let user_agent = args
        .user_agent
        .clone()
        .or_else(|| config.and_then(|c| c.user_agent.clone()));
    if let Some(ua) = user_agent {
        client = client.user_agent(ua);
    }

    Ok(Settings {
        catalog,
        convert,
        client,
    })
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub fn run(args: &Args) -> Result<(), CliRunError> {
    let config = config::load_config().map_err(CliRunError::InvalidInput)?;
    let settings = resolve_settings(args, config.as_ref())?;
    let data_dir = settings.catalog.data_dir.clone();

    if !args.convert_only {
        let summary = scrape_catalog(&settings.catalog, &settings.client, !args.quiet)?;
        if args.dry_run {
            for path in &summary.planned {
                println!("{}", path.display());
            }
        }
        if summary.failures > 0 {
            warn!(failures = summary.failures, "some pages or downloads failed");
        }
    }

    if !(args.convert_only || settings.catalog.format == DownloadFormat::Epub) {
        return Ok(());
    }
    if !data_dir.is_dir() {
        if args.dry_run && !args.convert_only {
            return Ok(());
        }
        return Err(CliRunError::InvalidInput(format!(
            "Data directory {} does not exist.",
            data_dir.display()
        )));
    }

    if args.dry_run {
        for path in list_epubs(&data_dir)? {
            println!("convert {}", path.display());
        }
        return Ok(());
    }

    let report = convert_directory(&data_dir, &settings.convert)?;
    if let Some(path) = &args.report {
        write_report(&report, path)?;
        info!(report = %path.display(), "wrote conversion report");
    }
    if report.failed() > 0 {
        warn!(failed = report.failed(), "some books could not be converted");
    }
    if !args.quiet {
        eprintln!(
            "Parsed {} characters in {:.1}s, a rate of {} characters per second.",
            report.characters, report.elapsed_secs, report.chars_per_sec
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["ebook-corpus"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn parse_format_all() {
        assert_eq!(parse_format("txt").unwrap(), DownloadFormat::Txt);
        assert_eq!(parse_format("TEXT").unwrap(), DownloadFormat::Txt);
        assert_eq!(parse_format("epub").unwrap(), DownloadFormat::Epub);
        assert!(parse_format("pdf").is_err());
    }

    #[test]
    fn parse_converter_invalid() {
        assert_eq!(parse_converter("grid").unwrap(), Converter::Grid);
        let err = parse_converter("fancy").unwrap_err();
        assert!(err.contains("stream, grid, or markdown"));
    }

    #[test]
    fn defaults_match_documented_flags() -> Result<(), CliRunError> {
        let s = resolve_settings(&args(&[]), None)?;
        assert_eq!(s.catalog.data_dir, PathBuf::from("./data"));
        assert_eq!(s.catalog.category_id, 1245);
        assert_eq!(s.catalog.page_items, 20);
        assert_eq!(s.catalog.pages, 7);
        assert_eq!(s.catalog.format, DownloadFormat::Txt);
        assert_eq!(s.catalog.jobs, 7);
        assert!(s.convert.remove_source);
        assert_eq!(s.convert.width, 80);
        assert_eq!(s.convert.converter, Converter::Stream);
        assert_eq!(s.client, PoliteClientBuilder::default());
        Ok(())
    }

    #[test]
    fn client_settings_layer_over_builder_defaults() -> Result<(), CliRunError> {
        let config: Config = toml::from_str("timeout_secs = 30\nretry_count = 2").unwrap();
        let s = resolve_settings(&args(&["--delay", "5"]), Some(&config))?;
        let expected = PoliteClientBuilder::default()
            .delay_secs(5)
            .timeout_secs(30)
            .retry_count(2);
        assert_eq!(s.client, expected);
        Ok(())
    }

    #[test]
    fn flags_override_config() -> Result<(), CliRunError> {
        let config: Config = toml::from_str(
            r#"
            data_dir = "from-config"
            pages = 2
            format = "epub"
            converter = "markdown"
            keep_source = true
            jobs = 3
            throttle_marker = "Slow down"
            "#,
        )
        .unwrap();
        let a = args(&["--pages", "5", "--converter", "grid", "--line-width", "60"]);
        let s = resolve_settings(&a, Some(&config))?;
        assert_eq!(s.catalog.data_dir, PathBuf::from("from-config"));
        assert_eq!(s.catalog.pages, 5);
        assert_eq!(s.catalog.format, DownloadFormat::Epub);
        assert_eq!(s.catalog.jobs, 3);
        assert_eq!(s.catalog.throttle_marker, "Slow down");
        assert_eq!(s.convert.converter, Converter::Grid);
        assert_eq!(s.convert.width, 60);
        assert!(!s.convert.remove_source);
        Ok(())
    }

    #[test]
    fn long_flag_names_parse() {
        let a = args(&[
            "--data-dir", "books", "--id", "99", "--pageitems", "10", "--pages", "2", "--format",
            "epub", "--keep-source",
        ]);
        assert_eq!(a.data_dir, Some(PathBuf::from("books")));
        assert_eq!(a.id, Some(99));
        assert_eq!(a.page_items, Some(10));
        assert_eq!(a.pages, Some(2));
        assert_eq!(a.format, Some(DownloadFormat::Epub));
        assert!(a.keep_source);
    }

    #[test]
    fn invalid_config_values_are_input_errors() {
        let config: Config = toml::from_str(r#"format = "pdf""#).unwrap();
        let err = resolve_settings(&args(&[]), Some(&config)).unwrap_err();
        assert_eq!(err.exit_code(), 1);

        let err = resolve_settings(&args(&["--jobs", "0"]), None).unwrap_err();
        assert!(matches!(err, CliRunError::InvalidInput(_)));
        let err = resolve_settings(&args(&["--line-width", "0"]), None).unwrap_err();
        assert!(matches!(err, CliRunError::InvalidInput(_)));
    }

    #[test]
    fn convert_only_on_missing_directory_is_input_error() {
        let a = args(&["--convert-only", "--data-dir", "/nonexistent_dir_ebook_corpus_xyz"]);
        let err = run(&a).unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn convert_only_converts_and_writes_report() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let epub = dir.path().join("one.epub");
        crate::epub::tests::write_test_epub(&epub, "One", &["<p>Text.</p>"]);
        let report = dir.path().join("report.json");
        let data_dir = dir.path().to_string_lossy().to_string();
        let report_arg = report.to_string_lossy().to_string();
        let a = args(&[
            "--convert-only",
            "--quiet",
            "--keep-source",
            "--data-dir",
            &data_dir,
            "--report",
            &report_arg,
        ]);
        run(&a)?;
        assert!(dir.path().join("one.txt").exists());
        assert!(dir.path().join("one.epub").exists());
        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(report)?)?;
        assert_eq!(value["books"][0]["sections"].as_u64(), Some(1));
        Ok(())
    }

    #[test]
    fn cli_run_error_exit_codes() {
        assert_eq!(CliRunError::InvalidInput("x".into()).exit_code(), 1);
        assert_eq!(
            CliRunError::Scraper(ScraperError::Throttled { url: "x".into() }).exit_code(),
            2
        );
        assert_eq!(
            CliRunError::Convert(ConvertError::ReadDir {
                path: PathBuf::from("x"),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            })
            .exit_code(),
            3
        );
    }
}
