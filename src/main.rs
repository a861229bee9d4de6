//! # thread_feeds
//!
//! Turns forum and news listing pages into deduplicated Atom feeds.
//!
//! ## Features
//!
//! - Built-in sources for HKDiscuss (money, house, hot topics), HKET news
//!   and the HongKongCard forum, or any set described in a YAML file
//! - Full post or article content pulled from each detail page, cleaned of
//!   scripts and tracking markup, with lazy-loaded images made absolute
//! - Relative (`3小時前`), ISO-8601 and bare `HH:MM` timestamps normalized
//!   to the source's UTC offset
//! - Titles already published (in the deployed feed or the local copy) are
//!   never fetched or emitted again
//!
//! ## Usage
//!
//! ```sh
//! thread_feeds --feeds money house --output-dir ./public
//! ```
//!
//! ## Architecture
//!
//! Each selected source runs in turn:
//! 1. **Ledger**: collect titles from the prior feeds
//! 2. **Listing**: fetch the listing page and walk its rows
//! 3. **Assembly**: fetch detail pages for unseen titles, extract content and timestamps
//! 4. **Output**: write the Atom file when at least one entry is new

use clap::Parser;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use std::error::Error;
use std::time::Duration;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod error;
mod fetch;
mod ledger;
mod models;
mod outputs;
mod pipeline;
mod scrapers;
mod time;
mod utils;

use cli::Cli;
use config::SourceConfig;
use fetch::HttpFetcher;
use pipeline::run_source;
use utils::ensure_writable_dir;

#[tokio::main(flavor = "current_thread")]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("thread_feeds starting up");

    let args = Cli::parse();
    debug!(
        feeds = ?args.feeds,
        output_dir = %args.output_dir.display(),
        deploy_dir = %args.deploy_dir.display(),
        "Parsed CLI arguments"
    );

    // ---- Sources ----
    let configs = config::load_sources(args.config.as_deref()).await?;
    if args.list_sources {
        for source in &configs {
            println!("{:<12} {:<26} {}", source.name, source.atom_file, source.url);
        }
        return Ok(());
    }

    let sources = config::select_sources(configs, &args.feeds)?
        .iter()
        .map(SourceConfig::compile)
        .collect::<Result<Vec<_>, _>>()?;
    for source in &sources {
        debug!(
            source = %source.name,
            offset = %source.normalizer.offset(),
            max_entries = source.max_entries,
            "Compiled source"
        );
    }
    info!(
        count = sources.len(),
        names = %sources.iter().map(|s| s.name.as_str()).join(","),
        "Sources ready"
    );

    // Early check: ensure the output dir is writable
    if let Err(e) = ensure_writable_dir(&args.output_dir).await {
        error!(
            path = %args.output_dir.display(),
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    // ---- Run each source in turn ----
    let timeout = Duration::from_secs(args.timeout_secs);
    let plain = HttpFetcher::new(timeout, false)?;
    let browser = HttpFetcher::new(timeout, true)?;
    let (plain, browser) = (&plain, &browser);
    let output_dir = args.output_dir.as_path();
    let deploy_dir = args.deploy_dir.as_path();

    let results: Vec<_> = stream::iter(sources.iter())
        .then(|source| {
            let fetcher = if source.browser_headers { browser } else { plain };
            async move {
                let result = run_source(fetcher, source, output_dir, deploy_dir).await;
                (source.name.as_str(), result)
            }
        })
        .collect()
        .await;

    let total = results.len();
    let mut failed = 0;
    let mut new_entries = 0;
    for (name, result) in results {
        match result {
            Ok(report) => {
                new_entries += report.new_entries;
                info!(
                    source = name,
                    candidates = report.candidates,
                    new_entries = report.new_entries,
                    written = report.written,
                    "Source finished"
                );
            }
            Err(e) => {
                failed += 1;
                error!(source = name, error = %e, "Source failed");
            }
        }
    }

    info!(
        sources = total,
        failed,
        new_entries,
        elapsed_secs = start_time.elapsed().as_secs_f64(),
        "Run complete"
    );

    if failed > 0 {
        return Err(format!("{failed} of {total} sources failed").into());
    }
    Ok(())
}
