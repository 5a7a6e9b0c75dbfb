//! Demo binary wiring the `harvest` fetch-coordination engine to a real
//! `reqwest` driver, a TOML config file, and `tracing_subscriber` logging.
//!
//! Not part of the core: everything here is the "external collaborator"
//! wiring spec.md §1/§6 names as out of scope — configuration loading, log
//! setup, and a concrete network driver.

mod config;
mod reqwest_driver;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use harvest::Harvester;
use harvest::config::PageType;
use reqwest_driver::ReqwestDriver;
use tokio_util::sync::CancellationToken;

use config::CliConfig;

const DEFAULT_USER_AGENT: &str = "harvest-cli/0.1";
const DEFAULT_DRIVER_TIMEOUT: Duration = Duration::from_secs(30);

fn usage() -> &'static str {
    "usage:\n  \
     harvest-cli fetch <url> --site <name> [--page-type list|detail|image] [--config <path>]\n  \
     harvest-cli cleanup [--config <path>]\n  \
     harvest-cli stats [--config <path>]"
}

struct Args {
    command: String,
    url: Option<String>,
    site: Option<String>,
    page_type: PageType,
    config_path: PathBuf,
}

fn parse_args() -> Result<Args> {
    let mut raw: Vec<String> = std::env::args().skip(1).collect();
    if raw.is_empty() {
        bail!("missing command\n\n{}", usage());
    }
    let command = raw.remove(0);

    let mut site = None;
    let mut page_type = PageType::Detail;
    let mut config_path = PathBuf::from("harvest.toml");

    let mut positional = Vec::new();
    let mut iter = raw.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--site" => site = Some(iter.next().context("--site requires a value")?),
            "--page-type" => {
                let raw = iter.next().context("--page-type requires a value")?;
                page_type = PageType::parse(&raw)
                    .with_context(|| format!("unknown page type {raw:?} (expected list|detail|image)"))?;
            }
            "--config" => config_path = PathBuf::from(iter.next().context("--config requires a value")?),
            other => positional.push(other.to_string()),
        }
    }

    Ok(Args {
        command,
        url: positional.into_iter().next(),
        site,
        page_type,
        config_path,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    let args = parse_args()?;

    let cli_config = match CliConfig::load(&args.config_path) {
        Ok(cfg) => cfg,
        Err(_) => {
            tracing::warn!(path = %args.config_path.display(), "no config file found, using compiled-in defaults");
            CliConfig::default()
        }
    };
    let harvester_config = cli_config.resolve();

    let harvester = Harvester::open(harvester_config).context("opening harvest engine")?;

    match args.command.as_str() {
        "fetch" => run_fetch(&harvester, args).await,
        "cleanup" => run_cleanup(&harvester),
        "stats" => run_stats(&harvester),
        other => bail!("unknown command {other:?}\n\n{}", usage()),
    }
}

async fn run_fetch(harvester: &Harvester, args: Args) -> Result<()> {
    let url = args.url.context("fetch requires a URL")?;
    let site = args.site.context("fetch requires --site <name>")?;

    let driver = Arc::new(ReqwestDriver::new(DEFAULT_USER_AGENT, DEFAULT_DRIVER_TIMEOUT)?);
    let coordinator = harvester.coordinator(driver);
    let cancel = CancellationToken::new();

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    match coordinator.fetch(&url, &site, args.page_type, &cancel).await {
        Some(outcome) => {
            tracing::info!(
                url,
                site,
                from_cache = outcome.from_cache,
                bytes = outcome.body.len(),
                "fetch complete"
            );
            println!("{}", String::from_utf8_lossy(&outcome.body));
            Ok(())
        }
        None => bail!("fetch of {url} did not produce a body (cancelled, timed out, or failed)"),
    }
}

fn run_cleanup(harvester: &Harvester) -> Result<()> {
    let stats = harvester.cache().cleanup().context("cache cleanup failed")?;
    println!(
        "entries invalidated: {}\nfiles deleted: {}\nbytes freed: {}",
        stats.entries_invalidated, stats.files_deleted, stats.bytes_freed
    );
    Ok(())
}

fn run_stats(harvester: &Harvester) -> Result<()> {
    let stats = harvester.cache().stats().context("reading cache stats failed")?;
    println!(
        "total entries: {}\nfile bytes: {}\ntoday's requests: {}\nhits: {}\nmisses: {}\nhit rate: {:.1}%",
        stats.total_entries,
        stats.file_bytes,
        stats.today.total_requests,
        stats.today.cache_hits,
        stats.today.cache_misses,
        stats.hit_rate * 100.0
    );
    Ok(())
}
